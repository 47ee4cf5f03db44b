//! Session-local view of the project collection.
//!
//! The project list is only ever replaced by snapshots from the gateway.
//! Saves and deletes go straight to the gateway and show up once the
//! subscription delivers them back.

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use tokio::sync::watch;

use crate::core::{
    gateway::{ProjectPatch, Snapshot, StoreError, StoreOperation, Subscription, SyncGateway},
    project::{Project, ProjectId},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No snapshot received yet.
    Loading,
    /// At least one snapshot applied.
    Ready,
}

/// A dismissible, user-facing report of a failed write or subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub operation: StoreOperation,
    pub message: String,
}

impl Notice {
    fn for_failed(operation: StoreOperation) -> Self {
        let message = match operation {
            StoreOperation::Create => "Failed to add project. Please try again.",
            StoreOperation::Update => "Failed to update project. Please try again.",
            StoreOperation::Delete => "Failed to delete project. Please try again.",
            StoreOperation::Subscribe => "Failed to load projects.",
        };
        Self {
            operation,
            message: message.to_string(),
        }
    }
}

/// What the presentation reads from the store.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectsView {
    pub loading: bool,
    pub projects: Vec<Project>,
    /// Why the latest snapshot is empty, when the subscription failed.
    pub failure: Option<String>,
    pub editing: Option<ProjectId>,
    pub create_form_open: bool,
    pub notice: Option<Notice>,
}

impl ProjectsView {
    /// True when there is nothing to show and no form to fill in.
    pub fn shows_empty_state(&self) -> bool {
        !self.loading && self.projects.is_empty() && !self.create_form_open
    }
}

#[derive(Debug)]
struct SessionState {
    phase: Phase,
    projects: Vec<Project>,
    failure: Option<String>,
    editing: Option<ProjectId>,
    create_form_open: bool,
    notice: Option<Notice>,
}

impl SessionState {
    fn new() -> Self {
        Self {
            phase: Phase::Loading,
            projects: Vec::new(),
            failure: None,
            editing: None,
            create_form_open: false,
            notice: None,
        }
    }

    fn apply(&mut self, snapshot: Snapshot) {
        if snapshot.is_failure() {
            self.notice = Some(Notice::for_failed(StoreOperation::Subscribe));
        } else if self
            .notice
            .as_ref()
            .is_some_and(|notice| notice.operation == StoreOperation::Subscribe)
        {
            self.notice = None;
        }
        self.projects = snapshot.records.iter().map(Project::from_record).collect();
        self.failure = snapshot.failure;
        self.phase = Phase::Ready;

        if let Some(id) = &self.editing {
            if !self.contains(id) {
                tracing::debug!(id = %id, "Edited project left the collection, leaving edit mode");
                self.editing = None;
            }
        }
    }

    fn contains(&self, id: &ProjectId) -> bool {
        self.projects.iter().any(|p| p.id.as_ref() == Some(id))
    }
}

fn lock(state: &Mutex<SessionState>) -> MutexGuard<'_, SessionState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Waits up to `within` for the next snapshot announced on `changes`.
///
/// Returns false when none arrives in time, as after a delete of a project
/// that was already gone.
pub async fn wait_for_snapshot(changes: &mut watch::Receiver<u64>, within: Duration) -> bool {
    matches!(
        tokio::time::timeout(within, changes.changed()).await,
        Ok(Ok(()))
    )
}

/// Reconciles a [`SyncGateway`] subscription with local edit state.
pub struct ProjectStore<G: SyncGateway> {
    gateway: Arc<G>,
    state: Arc<Mutex<SessionState>>,
    revision: Arc<watch::Sender<u64>>,
    subscription: Mutex<Option<Subscription>>,
}

impl<G: SyncGateway> ProjectStore<G> {
    pub fn new(gateway: Arc<G>) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            gateway,
            state: Arc::new(Mutex::new(SessionState::new())),
            revision: Arc::new(revision),
            subscription: Mutex::new(None),
        }
    }

    pub fn gateway(&self) -> &Arc<G> {
        &self.gateway
    }

    /// Subscribes to the gateway. Calling it while already mounted does
    /// nothing.
    pub fn mount(&self) {
        let mut subscription = self
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if subscription.as_ref().is_some_and(Subscription::is_active) {
            return;
        }

        let state = self.state.clone();
        let revision = self.revision.clone();
        tracing::debug!("Subscribing to project snapshots");
        *subscription = Some(self.gateway.subscribe(Box::new(move |snapshot: Snapshot| {
            tracing::debug!(
                projects = snapshot.records.len(),
                failed = snapshot.is_failure(),
                "Snapshot received"
            );
            if let Some(reason) = &snapshot.failure {
                tracing::warn!(reason = %reason, "Project subscription failed");
            }
            lock(&state).apply(snapshot);
            revision.send_modify(|r| *r += 1);
        })));
    }

    /// Ends the subscription. No snapshot is applied after this returns.
    pub fn unmount(&self) {
        let subscription = self
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(subscription) = subscription {
            tracing::debug!("Unsubscribing from project snapshots");
            subscription.unsubscribe();
        }
    }

    pub fn is_mounted(&self) -> bool {
        self.subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(Subscription::is_active)
    }

    /// Receiver whose value is bumped every time a snapshot is applied.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    pub fn phase(&self) -> Phase {
        lock(&self.state).phase
    }

    pub fn view(&self) -> ProjectsView {
        let state = lock(&self.state);
        ProjectsView {
            loading: state.phase == Phase::Loading,
            projects: state.projects.clone(),
            failure: state.failure.clone(),
            editing: state.editing.clone(),
            create_form_open: state.create_form_open,
            notice: state.notice.clone(),
        }
    }

    pub fn projects(&self) -> Vec<Project> {
        lock(&self.state).projects.clone()
    }

    pub fn project(&self, id: &ProjectId) -> Option<Project> {
        lock(&self.state)
            .projects
            .iter()
            .find(|p| p.id.as_ref() == Some(id))
            .cloned()
    }

    /// Creates a new project or updates an existing one.
    ///
    /// On success the create form is closed (for new projects) or edit mode
    /// is left (for existing ones); the list itself is untouched until the
    /// next snapshot. On failure a notice is raised and nothing else changes.
    pub async fn save(&self, project: Project) -> Result<ProjectId, StoreError> {
        match project.id.clone() {
            None => {
                let result = self.gateway.create(&project).await;
                let mut state = lock(&self.state);
                match result {
                    Ok(id) => {
                        tracing::debug!(id = %id, "Waiting for the snapshot with the new project");
                        state.create_form_open = false;
                        Ok(id)
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Adding project failed");
                        state.notice = Some(Notice::for_failed(StoreOperation::Create));
                        Err(e)
                    }
                }
            }
            Some(id) => {
                let result = self
                    .gateway
                    .update(&id, &ProjectPatch::from_project(&project))
                    .await;
                let mut state = lock(&self.state);
                match result {
                    Ok(()) => {
                        if state.editing.as_ref() == Some(&id) {
                            state.editing = None;
                        }
                        Ok(id)
                    }
                    Err(e) => {
                        tracing::warn!(id = %id, error = %e, "Updating project failed");
                        state.notice = Some(Notice::for_failed(StoreOperation::Update));
                        Err(e)
                    }
                }
            }
        }
    }

    pub async fn delete(&self, id: &ProjectId) -> Result<(), StoreError> {
        let result = self.gateway.delete(id).await;
        if let Err(e) = &result {
            tracing::warn!(id = %id, error = %e, "Deleting project failed");
            lock(&self.state).notice = Some(Notice::for_failed(StoreOperation::Delete));
        }
        result
    }

    /// Enters edit mode for a project in the current list. Returns false if
    /// the id is unknown.
    pub fn begin_edit(&self, id: &ProjectId) -> bool {
        let mut state = lock(&self.state);
        if state.contains(id) {
            state.editing = Some(id.clone());
            true
        } else {
            false
        }
    }

    pub fn cancel_edit(&self) {
        lock(&self.state).editing = None;
    }

    /// The latest snapshot's version of the project being edited.
    pub fn editing_project(&self) -> Option<Project> {
        let state = lock(&self.state);
        let id = state.editing.as_ref()?;
        state
            .projects
            .iter()
            .find(|p| p.id.as_ref() == Some(id))
            .cloned()
    }

    pub fn open_create_form(&self) {
        lock(&self.state).create_form_open = true;
    }

    pub fn close_create_form(&self) {
        lock(&self.state).create_form_open = false;
    }

    pub fn toggle_create_form(&self) -> bool {
        let mut state = lock(&self.state);
        state.create_form_open = !state.create_form_open;
        state.create_form_open
    }

    pub fn dismiss_notice(&self) {
        lock(&self.state).notice = None;
    }
}

impl<G: SyncGateway> Drop for ProjectStore<G> {
    fn drop(&mut self) {
        self.unmount();
    }
}
