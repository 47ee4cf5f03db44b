#![allow(dead_code, unused_imports)]

mod fixtures;
pub use fixtures::*;

// Re-export commonly used types from projectarc for tests
pub use projectarc::{
    Color, CompressedImage, FormError, FormErrors, FormField, ImageError, ImageFile,
    ListenerSet, MemoryGateway, Notice, Phase, Project, ProjectFields, ProjectForm, ProjectId,
    ProjectPatch, ProjectRecord, ProjectStore, ProjectsView, Snapshot, SqliteGateway, Status,
    StoreError, StoreOperation, Subscription, SyncGateway, ValidationError,
};
