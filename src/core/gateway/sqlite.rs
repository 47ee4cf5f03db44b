use std::{
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use anyhow::Context;
use sqlx::{
    ConnectOptions, Connection, Row, SqliteConnection,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous},
};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tokio::{
    sync::Mutex as AsyncMutex,
    time::{MissedTickBehavior, interval},
};
use uuid::Uuid;

use super::{
    Listener, ListenerSet, NewDocument, PROJECTS_COLLECTION, ProjectPatch, ServerClock, Snapshot,
    SnapshotHandler, StoreError, StoreOperation, Subscription, SyncGateway,
};
use crate::core::project::{Project, ProjectId, ProjectRecord};

/// How often the database is checked for commits made by other connections.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Project collection kept in a SQLite database file.
///
/// Every committed write is followed by a publish: the whole collection is
/// re-read and pushed to all listeners. While anyone is subscribed, a
/// background task also watches `PRAGMA data_version` so that commits from
/// other processes sharing the file are published too. Publishes are
/// serialized and a snapshot identical to the previous one is not sent again.
pub struct SqliteGateway {
    shared: Arc<Shared>,
    clock: ServerClock,
}

struct Shared {
    pool: SqlitePool,
    connect_opts: SqliteConnectOptions,
    listeners: ListenerSet,
    /// Last snapshot broadcast to every listener.
    published: AsyncMutex<Option<Snapshot>>,
    polling: AtomicBool,
}

impl std::fmt::Debug for SqliteGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteGateway")
            .field("listeners", &self.shared.listeners.len())
            .field("polling", &self.shared.polling.load(Ordering::SeqCst))
            .finish()
    }
}

impl SqliteGateway {
    /// Opens the database, creating it if needed, and applies migrations.
    pub async fn open<P: AsRef<Path>>(database_file: P) -> anyhow::Result<Self> {
        let database_file = database_file.as_ref();
        if let Some(parent) = database_file.parent() {
            if !parent.as_os_str().is_empty() && !parent.is_dir() {
                anyhow::bail!("Database directory does not exist: {:?}", parent);
            }
        }

        let connect_opts = SqliteConnectOptions::new()
            .filename(database_file)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_opts.clone())
            .await
            .with_context(|| format!("Failed to open project database {:?}", database_file))?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("Failed to migrate project database")?;

        tracing::debug!(
            database = ?database_file,
            collection = PROJECTS_COLLECTION,
            "Project database ready"
        );
        Ok(Self {
            shared: Arc::new(Shared {
                pool,
                connect_opts,
                listeners: ListenerSet::default(),
                published: AsyncMutex::new(None),
                polling: AtomicBool::new(false),
            }),
            clock: ServerClock::new(),
        })
    }

    /// Flushes the WAL into the main database file and closes the pool.
    /// Any later operation fails with a [`StoreError`].
    pub async fn close(&self) -> anyhow::Result<()> {
        sqlx::query("PRAGMA wal_checkpoint(TRUNCATE);")
            .execute(&self.shared.pool)
            .await?;
        self.shared.pool.close().await;
        Ok(())
    }

    pub fn listener_count(&self) -> usize {
        self.shared.listeners.len()
    }

    /// True while the background task watching for outside commits runs.
    pub fn is_polling(&self) -> bool {
        self.shared.polling.load(Ordering::SeqCst)
    }
}

impl Shared {
    /// Re-reads the collection and broadcasts it if it changed. `joining`
    /// gets the current snapshot even when nothing changed.
    async fn publish(&self, joining: Option<&Listener>) {
        let mut published = self.published.lock().await;
        let snapshot = load_snapshot(&self.pool).await;
        if published.as_ref() == Some(&snapshot) {
            if let Some(listener) = joining {
                listener.deliver_initial(snapshot);
            }
            return;
        }
        self.listeners.broadcast(&snapshot);
        *published = Some(snapshot);
    }

    /// Lets the poller stop once the last listener is gone. Returns false if a
    /// listener showed up in the meantime and polling should go on.
    fn release_polling(&self) -> bool {
        self.polling.store(false, Ordering::SeqCst);
        self.listeners.is_empty() || self.polling.swap(true, Ordering::SeqCst)
    }
}

async fn read_data_version(conn: &mut SqliteConnection) -> sqlx::Result<i64> {
    sqlx::query_scalar::<_, i64>("PRAGMA data_version;")
        .fetch_one(&mut *conn)
        .await
}

/// Delivers `first` its initial snapshot, then publishes whenever another
/// connection commits, until nobody listens or the pool is closed.
async fn watch_for_commits(shared: Arc<Shared>, first: Arc<Listener>) {
    let connected = match shared.connect_opts.connect().await {
        Ok(mut conn) => read_data_version(&mut conn).await.map(|version| (conn, version)),
        Err(e) => Err(e),
    };
    // Read after the baseline, so any later commit bumps the version.
    shared.publish(Some(&first)).await;

    let (mut conn, mut data_version) = match connected {
        Ok(connected) => connected,
        Err(e) => {
            tracing::warn!(error = %e, "Cannot watch the database for outside changes");
            shared.polling.store(false, Ordering::SeqCst);
            return;
        }
    };
    tracing::debug!(data_version, "Watching the project database for changes");

    let mut ticker = interval(POLL_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if shared.pool.is_closed() {
            shared.polling.store(false, Ordering::SeqCst);
            break;
        }
        if shared.listeners.is_empty() {
            if shared.release_polling() {
                break;
            }
            continue;
        }
        match read_data_version(&mut conn).await {
            Ok(version) if version != data_version => {
                tracing::debug!(version, "Database changed, publishing");
                data_version = version;
                shared.publish(None).await;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "Lost the database watch connection");
                shared.polling.store(false, Ordering::SeqCst);
                break;
            }
        }
    }
    tracing::debug!("Stopped watching the project database");
    let _ = conn.close().await;
}

async fn fetch_records(pool: &SqlitePool) -> anyhow::Result<Vec<ProjectRecord>> {
    sqlx::query(
        r#"SELECT id, name, description, image_url, status, created_at, updated_at
        FROM projects
        ORDER BY rowid ASC"#,
    )
    .fetch_all(pool)
    .await?
    .into_iter()
    .map(|row| -> anyhow::Result<ProjectRecord> {
        Ok(ProjectRecord {
            id: ProjectId::new(row.try_get::<String, _>("id")?),
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            image_url: row.try_get("image_url")?,
            status: row.try_get("status")?,
            created_at: parse_timestamp(&row.try_get::<String, _>("created_at")?),
            updated_at: parse_timestamp(&row.try_get::<String, _>("updated_at")?),
        })
    })
    .collect()
}

async fn load_snapshot(pool: &SqlitePool) -> Snapshot {
    match fetch_records(pool).await {
        Ok(records) => {
            tracing::debug!(documents = records.len(), "Snapshot loaded");
            Snapshot::new(records)
        }
        Err(e) => {
            tracing::warn!(error = %e, "Snapshot query failed, delivering an empty snapshot");
            Snapshot::failed(format!("{e:#}"))
        }
    }
}

fn parse_timestamp(value: &str) -> Option<OffsetDateTime> {
    OffsetDateTime::parse(value, &Rfc3339).ok()
}

fn format_timestamp(operation: StoreOperation, value: OffsetDateTime) -> Result<String, StoreError> {
    value
        .format(&Rfc3339)
        .map_err(|e| StoreError::new(operation, e))
}

impl SyncGateway for SqliteGateway {
    fn subscribe(&self, on_snapshot: SnapshotHandler) -> Subscription {
        let (listener, subscription) = self.shared.listeners.register(on_snapshot);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let shared = self.shared.clone();
                if shared.polling.swap(true, Ordering::SeqCst) {
                    handle.spawn(async move { shared.publish(Some(&listener)).await });
                } else {
                    handle.spawn(watch_for_commits(shared, listener));
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Cannot load the initial snapshot outside a runtime");
                listener.deliver(Snapshot::failed(e.to_string()));
            }
        }
        subscription
    }

    async fn create(&self, project: &Project) -> Result<ProjectId, StoreError> {
        let document = NewDocument::from_project(project);
        let id = ProjectId::new(Uuid::new_v4().simple().to_string());
        let now = format_timestamp(StoreOperation::Create, self.clock.now())?;
        sqlx::query(
            r#"INSERT INTO projects (id, name, description, image_url, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)"#,
        )
        .bind(id.as_str())
        .bind(&document.name)
        .bind(&document.description)
        .bind(&document.image_url)
        .bind(document.status.as_str())
        .bind(&now)
        .bind(&now)
        .execute(&self.shared.pool)
        .await
        .map_err(|e| StoreError::new(StoreOperation::Create, e))?;
        tracing::info!(id = %id, "Project added");
        self.shared.publish(None).await;
        Ok(id)
    }

    async fn update(&self, id: &ProjectId, patch: &ProjectPatch) -> Result<(), StoreError> {
        let now = format_timestamp(StoreOperation::Update, self.clock.now())?;
        let result = sqlx::query(
            r#"UPDATE projects SET
                name = COALESCE($1, name),
                description = COALESCE($2, description),
                image_url = COALESCE($3, image_url),
                status = COALESCE($4, status),
                updated_at = $5
            WHERE id = $6"#,
        )
        .bind(patch.name.as_deref())
        .bind(patch.description.as_deref())
        .bind(patch.image_url.as_deref())
        .bind(patch.status.map(|status| status.as_str()))
        .bind(&now)
        .bind(id.as_str())
        .execute(&self.shared.pool)
        .await
        .map_err(|e| StoreError::new(StoreOperation::Update, e))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::new(
                StoreOperation::Update,
                format!("no document with id {id}"),
            ));
        }
        tracing::info!(id = %id, "Project updated");
        self.shared.publish(None).await;
        Ok(())
    }

    async fn delete(&self, id: &ProjectId) -> Result<(), StoreError> {
        let result = sqlx::query(r#"DELETE FROM projects WHERE id = $1"#)
            .bind(id.as_str())
            .execute(&self.shared.pool)
            .await
            .map_err(|e| StoreError::new(StoreOperation::Delete, e))?;
        if result.rows_affected() > 0 {
            tracing::info!(id = %id, "Project deleted");
            self.shared.publish(None).await;
        } else {
            tracing::debug!(id = %id, "Nothing to delete");
        }
        Ok(())
    }
}
