use std::sync::{
    Mutex,
    atomic::{AtomicBool, Ordering},
};

use uuid::Uuid;

use super::{
    ListenerSet, NewDocument, ProjectPatch, ServerClock, Snapshot, SnapshotHandler, StoreError,
    StoreOperation, Subscription, SyncGateway, lock,
};
use crate::core::project::{Project, ProjectId, ProjectRecord};

const OFFLINE_REASON: &str = "store is unreachable";

/// In-process document collection with live listeners.
///
/// Writes are applied and published to every listener before the write
/// returns, so a test can assert on the subscriber's state right after
/// awaiting it.
pub struct MemoryGateway {
    documents: Mutex<Vec<ProjectRecord>>,
    listeners: ListenerSet,
    clock: ServerClock,
    offline: AtomicBool,
}

impl Default for MemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryGateway")
            .field("documents", &lock(&self.documents).len())
            .field("listeners", &self.listeners.len())
            .field("offline", &self.offline.load(Ordering::SeqCst))
            .finish()
    }
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self {
            documents: Mutex::new(Vec::new()),
            listeners: ListenerSet::default(),
            clock: ServerClock::new(),
            offline: AtomicBool::new(false),
        }
    }

    /// Simulates losing (or regaining) the connection to the store.
    ///
    /// While offline every write fails and new subscriptions get an empty,
    /// failed snapshot. Coming back online republishes the current state.
    pub fn set_offline(&self, offline: bool) {
        let was_offline = self.offline.swap(offline, Ordering::SeqCst);
        if was_offline && !offline {
            let documents = lock(&self.documents);
            self.listeners.broadcast(&Snapshot::new(documents.clone()));
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Current contents of the collection, in snapshot order.
    pub fn documents(&self) -> Vec<ProjectRecord> {
        lock(&self.documents).clone()
    }

    fn check_online(&self, operation: StoreOperation) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(StoreError::new(operation, OFFLINE_REASON))
        } else {
            Ok(())
        }
    }

    /// Applies `change` to the collection and, if it reports a change,
    /// publishes the result while the collection is still locked so snapshots
    /// go out in write order.
    fn write(
        &self,
        change: impl FnOnce(&mut Vec<ProjectRecord>) -> Result<bool, StoreError>,
    ) -> Result<(), StoreError> {
        let mut documents = lock(&self.documents);
        if change(&mut documents)? {
            self.listeners.broadcast(&Snapshot::new(documents.clone()));
        }
        Ok(())
    }
}

impl SyncGateway for MemoryGateway {
    fn subscribe(&self, on_snapshot: SnapshotHandler) -> Subscription {
        let documents = lock(&self.documents);
        let (listener, subscription) = self.listeners.register(on_snapshot);
        if self.offline.load(Ordering::SeqCst) {
            tracing::warn!("Subscription failed, delivering an empty snapshot");
            listener.deliver(Snapshot::failed(OFFLINE_REASON));
        } else {
            listener.deliver(Snapshot::new(documents.clone()));
        }
        subscription
    }

    async fn create(&self, project: &Project) -> Result<ProjectId, StoreError> {
        self.check_online(StoreOperation::Create)?;
        let document = NewDocument::from_project(project);
        let id = ProjectId::new(Uuid::new_v4().simple().to_string());
        let now = self.clock.now();
        self.write(|documents| {
            documents.push(ProjectRecord {
                id: id.clone(),
                name: document.name,
                description: document.description,
                image_url: document.image_url,
                status: document.status.as_str().to_string(),
                created_at: Some(now),
                updated_at: Some(now),
            });
            Ok(true)
        })?;
        tracing::info!(id = %id, "Project added");
        Ok(id)
    }

    async fn update(&self, id: &ProjectId, patch: &ProjectPatch) -> Result<(), StoreError> {
        self.check_online(StoreOperation::Update)?;
        let now = self.clock.now();
        self.write(|documents| {
            let record = documents
                .iter_mut()
                .find(|record| &record.id == id)
                .ok_or_else(|| {
                    StoreError::new(StoreOperation::Update, format!("no document with id {id}"))
                })?;
            if let Some(name) = &patch.name {
                record.name = name.clone();
            }
            if let Some(description) = &patch.description {
                record.description = description.clone();
            }
            if let Some(image_url) = &patch.image_url {
                record.image_url = image_url.clone();
            }
            if let Some(status) = patch.status {
                record.status = status.as_str().to_string();
            }
            record.updated_at = Some(now);
            Ok(true)
        })?;
        tracing::info!(id = %id, "Project updated");
        Ok(())
    }

    async fn delete(&self, id: &ProjectId) -> Result<(), StoreError> {
        self.check_online(StoreOperation::Delete)?;
        self.write(|documents| {
            let before = documents.len();
            documents.retain(|record| &record.id != id);
            Ok(documents.len() != before)
        })?;
        tracing::info!(id = %id, "Project deleted");
        Ok(())
    }
}
