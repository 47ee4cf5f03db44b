pub mod core;
pub mod ui;

pub use crate::core::Color;
pub use crate::core::codec::{CompressedImage, ImageError, ImageFile};
pub use crate::core::form::{FormError, FormErrors, FormField, ProjectForm, ValidationError};
pub use crate::core::gateway::{
    ListenerSet, MemoryGateway, ProjectPatch, Snapshot, SnapshotHandler, SqliteGateway,
    StoreError, StoreOperation, Subscription, SyncGateway,
};
pub use crate::core::project::{Project, ProjectFields, ProjectId, ProjectRecord, Status};
pub use crate::core::store::{Notice, Phase, ProjectStore, ProjectsView};
