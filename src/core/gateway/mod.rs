//! Contract over the live document store holding the `projects` collection.
//!
//! A gateway is a thin pass-through: it never retries, never interprets
//! store-specific failures, and never patches local state. Writes become
//! visible to callers only through the snapshots it pushes to subscribers.

mod memory;
mod sqlite;

use std::{
    fmt,
    future::Future,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
};

use time::{Duration, OffsetDateTime};

use crate::core::project::{Project, ProjectId, ProjectRecord, Status};

pub use memory::MemoryGateway;
pub use sqlite::SqliteGateway;

/// Name of the collection every gateway reads and writes.
pub const PROJECTS_COLLECTION: &str = "projects";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOperation {
    Subscribe,
    Create,
    Update,
    Delete,
}

impl fmt::Display for StoreOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StoreOperation::Subscribe => "subscribe",
            StoreOperation::Create => "create",
            StoreOperation::Update => "update",
            StoreOperation::Delete => "delete",
        })
    }
}

/// Any transport or store failure, tagged with the operation that hit it.
#[derive(Debug, thiserror::Error)]
#[error("store {operation} failed: {cause}")]
pub struct StoreError {
    pub operation: StoreOperation,
    #[source]
    pub cause: Box<dyn std::error::Error + Send + Sync>,
}

impl StoreError {
    pub fn new(
        operation: StoreOperation,
        cause: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self {
            operation,
            cause: cause.into(),
        }
    }
}

/// Complete, ordered view of the collection at one point in time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub records: Vec<ProjectRecord>,
    /// Set when the subscription itself failed. `records` is empty then.
    pub failure: Option<String>,
}

impl Snapshot {
    pub fn new(records: Vec<ProjectRecord>) -> Self {
        Self {
            records,
            failure: None,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            records: Vec::new(),
            failure: Some(reason.into()),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.failure.is_some()
    }
}

pub type SnapshotHandler = Box<dyn FnMut(Snapshot) + Send + 'static>;

/// Fields merged into an existing record by [`SyncGateway::update`].
/// `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub status: Option<Status>,
}

impl ProjectPatch {
    /// Every field of `project` except its identity and timestamps.
    pub fn from_project(project: &Project) -> Self {
        Self {
            name: Some(project.name.clone()),
            description: Some(project.description.clone()),
            image_url: Some(project.image_url.clone()),
            status: Some(project.status),
        }
    }
}

/// Document body written by [`SyncGateway::create`].
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct NewDocument {
    pub name: String,
    pub description: String,
    pub image_url: String,
    pub status: Status,
}

impl NewDocument {
    pub(crate) fn from_project(project: &Project) -> Self {
        Self {
            name: project.name.clone(),
            description: project.description.clone(),
            image_url: project.image_url.clone(),
            status: project.status,
        }
    }
}

pub trait SyncGateway: Send + Sync + 'static {
    /// Starts a live subscription to the collection.
    ///
    /// `on_snapshot` runs once with the current state and again after every
    /// change. A failing subscription delivers [`Snapshot::failed`] instead of
    /// returning an error. Handlers must not call back into the gateway.
    fn subscribe(&self, on_snapshot: SnapshotHandler) -> Subscription;

    /// Adds a document with server-assigned timestamps, returning its id.
    fn create(
        &self,
        project: &Project,
    ) -> impl Future<Output = Result<ProjectId, StoreError>> + Send;

    /// Merges `patch` into the document and stamps its update time.
    fn update(
        &self,
        id: &ProjectId,
        patch: &ProjectPatch,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn delete(&self, id: &ProjectId) -> impl Future<Output = Result<(), StoreError>> + Send;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One subscriber's handler, shared between the gateway and its
/// [`Subscription`].
pub struct Listener {
    handler: Mutex<Option<SnapshotHandler>>,
    delivered: AtomicBool,
}

impl Listener {
    /// Runs the handler unless the listener was closed. Returns whether it is
    /// still open.
    pub fn deliver(&self, snapshot: Snapshot) -> bool {
        let mut handler = lock(&self.handler);
        match handler.as_mut() {
            Some(handler) => {
                self.delivered.store(true, Ordering::SeqCst);
                handler(snapshot);
                true
            }
            None => false,
        }
    }

    /// Delivers the first snapshot of a subscription, unless a broadcast
    /// already reached this listener.
    pub fn deliver_initial(&self, snapshot: Snapshot) -> bool {
        let mut handler = lock(&self.handler);
        match handler.as_mut() {
            Some(_) if self.delivered.load(Ordering::SeqCst) => true,
            Some(handler) => {
                self.delivered.store(true, Ordering::SeqCst);
                handler(snapshot);
                true
            }
            None => false,
        }
    }

    fn close(&self) {
        // Waits for an in-flight delivery to finish.
        lock(&self.handler).take();
    }

    fn is_open(&self) -> bool {
        lock(&self.handler).is_some()
    }
}

/// Handle to a live subscription. Dropping it unsubscribes.
pub struct Subscription {
    listener: Arc<Listener>,
}

impl Subscription {
    /// Stops delivery. No handler call starts after this returns; calling it
    /// again is a no-op.
    pub fn unsubscribe(&self) {
        self.listener.close();
    }

    pub fn is_active(&self) -> bool {
        self.listener.is_open()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

/// Live listeners of one gateway. Gateway implementations register handlers
/// here and broadcast every snapshot through it.
#[derive(Default)]
pub struct ListenerSet {
    listeners: Mutex<Vec<Arc<Listener>>>,
}

impl ListenerSet {
    pub fn register(&self, handler: SnapshotHandler) -> (Arc<Listener>, Subscription) {
        let listener = Arc::new(Listener {
            handler: Mutex::new(Some(handler)),
            delivered: AtomicBool::new(false),
        });
        lock(&self.listeners).push(listener.clone());
        let subscription = Subscription {
            listener: listener.clone(),
        };
        (listener, subscription)
    }

    /// Sends `snapshot` to every open listener, forgetting closed ones.
    pub fn broadcast(&self, snapshot: &Snapshot) {
        let listeners: Vec<Arc<Listener>> = lock(&self.listeners).clone();
        let mut closed = Vec::new();
        for listener in &listeners {
            if !listener.deliver(snapshot.clone()) {
                closed.push(listener.clone());
            }
        }
        if !closed.is_empty() {
            lock(&self.listeners).retain(|l| !closed.iter().any(|c| Arc::ptr_eq(c, l)));
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.listeners).iter().filter(|l| l.is_open()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Source of server timestamps. Every stamp is strictly later than the one
/// before it.
#[derive(Debug)]
pub(crate) struct ServerClock {
    last: Mutex<Option<OffsetDateTime>>,
}

impl ServerClock {
    pub(crate) fn new() -> Self {
        Self {
            last: Mutex::new(None),
        }
    }

    pub(crate) fn now(&self) -> OffsetDateTime {
        let mut last = lock(&self.last);
        let mut now = OffsetDateTime::now_utc();
        if let Some(previous) = *last {
            if now <= previous {
                now = previous + Duration::microseconds(1);
            }
        }
        *last = Some(now);
        now
    }
}
