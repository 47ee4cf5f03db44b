use std::{
    io::Cursor,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use image::{ImageBuffer, ImageFormat, Rgb};
use projectarc::{
    ImageFile, ListenerSet, MemoryGateway, Project, ProjectFields, ProjectId, ProjectPatch,
    ProjectRecord, ProjectStore, Snapshot, SnapshotHandler, SqliteGateway, StoreError,
    StoreOperation, Subscription, SyncGateway,
};
use tempfile::NamedTempFile;
use tokio::sync::mpsc;

/// Smooth RGB gradient, cheap to compress.
pub fn gradient_image(width: u32, height: u32) -> ImageBuffer<Rgb<u8>, Vec<u8>> {
    ImageBuffer::from_fn(width, height, |x, y| {
        Rgb([(x * 255 / width.max(1)) as u8, (y * 255 / height.max(1)) as u8, 128u8])
    })
}

/// Deterministic pixel noise, which JPEG compresses badly.
pub fn noise_image(width: u32, height: u32) -> ImageBuffer<Rgb<u8>, Vec<u8>> {
    let mut state: u32 = 0x2545_f491;
    ImageBuffer::from_fn(width, height, |_, _| {
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        let [r, g, b, _] = state.to_le_bytes();
        Rgb([r, g, b])
    })
}

pub fn encode_png(image: &ImageBuffer<Rgb<u8>, Vec<u8>>) -> Vec<u8> {
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .expect("Failed to encode test image");
    bytes
}

/// An in-memory PNG upload.
pub fn png_upload(name: &str, image: &ImageBuffer<Rgb<u8>, Vec<u8>>) -> ImageFile {
    ImageFile::from_bytes(name, "image/png", encode_png(image))
}

/// Writes a gradient PNG of the given size to a temp file.
/// The file will be automatically cleaned up when dropped.
pub fn create_test_image(width: u32, height: u32) -> NamedTempFile {
    let img = gradient_image(width, height);
    let file = tempfile::Builder::new()
        .suffix(".png")
        .tempfile()
        .expect("Failed to create temp image file");
    img.save_with_format(file.path(), ImageFormat::Png)
        .expect("Failed to save test image");
    file
}

/// Creates a SqliteGateway backed by a database in a temp directory.
/// Returns both the gateway and the temp directory (which must be kept alive).
pub async fn create_test_gateway() -> (SqliteGateway, tempfile::TempDir) {
    let dir = tempfile::TempDir::new().expect("Failed to create temp directory");
    let gateway = SqliteGateway::open(dir.path().join("projects.db"))
        .await
        .expect("Failed to open test database");
    (gateway, dir)
}

/// A mounted store over a fresh MemoryGateway.
pub fn create_memory_store() -> (Arc<MemoryGateway>, ProjectStore<MemoryGateway>) {
    let gateway = Arc::new(MemoryGateway::new());
    let store = ProjectStore::new(gateway.clone());
    store.mount();
    (gateway, store)
}

pub fn make_project(name: &str, description: &str, status: &str) -> Project {
    Project::create(&ProjectFields {
        name: Some(name.to_string()),
        description: Some(description.to_string()),
        status: Some(status.to_string()),
        ..Default::default()
    })
}

pub fn make_record(id: &str, name: &str) -> ProjectRecord {
    ProjectRecord {
        id: ProjectId::from(id),
        name: name.to_string(),
        description: format!("{name} description"),
        image_url: String::new(),
        status: "pending".to_string(),
        created_at: None,
        updated_at: None,
    }
}

/// Handler that forwards every snapshot into a channel.
pub fn snapshot_channel() -> (SnapshotHandler, mpsc::UnboundedReceiver<Snapshot>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handler: SnapshotHandler = Box::new(move |snapshot| {
        let _ = tx.send(snapshot);
    });
    (handler, rx)
}

pub async fn next_snapshot(rx: &mut mpsc::UnboundedReceiver<Snapshot>) -> Snapshot {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("Timed out waiting for a snapshot")
        .expect("Snapshot channel closed")
}

/// A write the [`ScriptedGateway`] was asked to perform.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedWrite {
    Create(Project),
    Update(ProjectId, ProjectPatch),
    Delete(ProjectId),
}

/// Gateway whose snapshots are pushed by the test. Writes are recorded and
/// never published.
#[derive(Default)]
pub struct ScriptedGateway {
    listeners: ListenerSet,
    failing: AtomicBool,
    next_id: AtomicUsize,
    writes: Mutex<Vec<RecordedWrite>>,
}

impl ScriptedGateway {
    pub fn push(&self, snapshot: Snapshot) {
        self.listeners.broadcast(&snapshot);
    }

    pub fn push_records(&self, records: Vec<ProjectRecord>) {
        self.push(Snapshot::new(records));
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn writes(&self) -> Vec<RecordedWrite> {
        self.writes.lock().unwrap().clone()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    fn record(&self, operation: StoreOperation, write: RecordedWrite) -> Result<(), StoreError> {
        self.writes.lock().unwrap().push(write);
        if self.failing.load(Ordering::SeqCst) {
            Err(StoreError::new(operation, "scripted failure"))
        } else {
            Ok(())
        }
    }
}

impl SyncGateway for ScriptedGateway {
    fn subscribe(&self, on_snapshot: SnapshotHandler) -> Subscription {
        let (_listener, subscription) = self.listeners.register(on_snapshot);
        subscription
    }

    async fn create(&self, project: &Project) -> Result<ProjectId, StoreError> {
        self.record(StoreOperation::Create, RecordedWrite::Create(project.clone()))?;
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(ProjectId::new(format!("scripted-{n}")))
    }

    async fn update(&self, id: &ProjectId, patch: &ProjectPatch) -> Result<(), StoreError> {
        self.record(
            StoreOperation::Update,
            RecordedWrite::Update(id.clone(), patch.clone()),
        )
    }

    async fn delete(&self, id: &ProjectId) -> Result<(), StoreError> {
        self.record(StoreOperation::Delete, RecordedWrite::Delete(id.clone()))
    }
}

/// A mounted store over a fresh ScriptedGateway. Still loading: nothing has
/// been pushed yet.
pub fn create_scripted_store() -> (Arc<ScriptedGateway>, ProjectStore<ScriptedGateway>) {
    let gateway = Arc::new(ScriptedGateway::default());
    let store = ProjectStore::new(gateway.clone());
    store.mount();
    (gateway, store)
}
