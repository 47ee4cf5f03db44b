//! Integration tests for the reconciliation store.
//!
//! Tests cover:
//! - Loading to Ready on the first snapshot
//! - Full replacement of the list on every snapshot
//! - Edit mode tracked by id across snapshots
//! - Failed writes raising notices without touching the list
//! - Mount and unmount
//! - Subscription failures raising and clearing their notice

mod common;

use common::*;

#[tokio::test]
async fn test_loading_until_first_snapshot() -> anyhow::Result<()> {
    let (gateway, store) = create_scripted_store();
    assert_eq!(store.phase(), Phase::Loading);
    assert!(store.view().loading);
    assert!(!store.view().shows_empty_state());

    // 1. An empty snapshot still completes loading
    gateway.push_records(vec![]);
    assert_eq!(store.phase(), Phase::Ready);
    let view = store.view();
    assert!(!view.loading);
    assert!(view.shows_empty_state());
    Ok(())
}

#[tokio::test]
async fn test_snapshot_replaces_list() -> anyhow::Result<()> {
    let (gateway, store) = create_scripted_store();

    // 1. Snapshot A
    gateway.push_records(vec![make_record("a1", "Alpha"), make_record("a2", "Apex")]);
    assert_eq!(store.projects().len(), 2);

    // 2. Snapshot B with disjoint ids
    gateway.push_records(vec![make_record("b1", "Bravo")]);

    // 3. Exactly B is shown
    let projects = store.projects();
    assert_eq!(projects.len(), 1);
    assert_eq!(projects[0].id, Some(ProjectId::from("b1")));
    assert_eq!(projects[0].name, "Bravo");
    assert!(store.project(&ProjectId::from("a1")).is_none());
    Ok(())
}

#[tokio::test]
async fn test_changes_bumped_per_snapshot() -> anyhow::Result<()> {
    let (gateway, store) = create_scripted_store();
    let mut changes = store.changes();
    assert!(!changes.has_changed()?);

    gateway.push_records(vec![make_record("a", "Alpha")]);
    gateway.push_records(vec![make_record("b", "Bravo")]);
    assert!(changes.has_changed()?);
    assert_eq!(*changes.borrow_and_update(), 2);
    Ok(())
}

#[tokio::test]
async fn test_edit_mode_follows_id() -> anyhow::Result<()> {
    let (gateway, store) = create_scripted_store();
    gateway.push_records(vec![make_record("a", "Alpha"), make_record("b", "Bravo")]);

    // 1. Only known ids can be edited
    assert!(!store.begin_edit(&ProjectId::from("zzz")));
    assert!(store.begin_edit(&ProjectId::from("a")));
    assert_eq!(store.view().editing, Some(ProjectId::from("a")));

    // 2. A new snapshot with the same id keeps edit mode and the new data
    let mut renamed = make_record("a", "Alpha Two");
    renamed.status = "active".to_string();
    gateway.push_records(vec![make_record("b", "Bravo"), renamed]);
    let editing = store.editing_project().expect("still editing");
    assert_eq!(editing.name, "Alpha Two");
    assert_eq!(editing.status, Status::Active);

    // 3. The id disappears, edit mode ends
    gateway.push_records(vec![make_record("b", "Bravo")]);
    assert_eq!(store.view().editing, None);
    assert!(store.editing_project().is_none());

    // 4. Cancel works on its own
    assert!(store.begin_edit(&ProjectId::from("b")));
    store.cancel_edit();
    assert_eq!(store.view().editing, None);
    Ok(())
}

#[tokio::test]
async fn test_save_new_project() -> anyhow::Result<()> {
    let (gateway, store) = create_scripted_store();
    gateway.push_records(vec![]);
    assert!(store.toggle_create_form());

    // 1. Save closes the form but leaves the list for the next snapshot
    let project = make_project("Website", "Landing page", "pending");
    let id = store.save(project.clone()).await?;
    let view = store.view();
    assert!(!view.create_form_open);
    assert!(view.projects.is_empty());
    assert_eq!(gateway.writes(), vec![RecordedWrite::Create(project)]);

    // 2. The snapshot makes it visible
    gateway.push_records(vec![make_record(id.as_str(), "Website")]);
    assert_eq!(store.projects().len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_save_existing_project() -> anyhow::Result<()> {
    let (gateway, store) = create_scripted_store();
    gateway.push_records(vec![make_record("a", "Alpha")]);
    assert!(store.begin_edit(&ProjectId::from("a")));

    // 1. Update sends every field except the id and leaves edit mode
    let mut project = store.editing_project().expect("editing");
    project.status = Status::Complete;
    let id = store.save(project).await?;
    assert_eq!(id, ProjectId::from("a"));
    assert_eq!(store.view().editing, None);

    let expected = ProjectPatch {
        name: Some("Alpha".to_string()),
        description: Some("Alpha description".to_string()),
        image_url: Some(String::new()),
        status: Some(Status::Complete),
    };
    assert_eq!(
        gateway.writes(),
        vec![RecordedWrite::Update(ProjectId::from("a"), expected)]
    );

    // 2. The list still shows the old status until the store confirms
    assert_eq!(store.projects()[0].status, Status::Pending);
    Ok(())
}

#[tokio::test]
async fn test_failed_writes_raise_notices() -> anyhow::Result<()> {
    let (gateway, store) = create_scripted_store();
    gateway.push_records(vec![make_record("a", "Alpha")]);
    gateway.set_failing(true);
    store.open_create_form();
    let before = store.projects();

    // 1. Create
    let err = store
        .save(make_project("Website", "Landing page", "pending"))
        .await
        .unwrap_err();
    assert_eq!(err.operation, StoreOperation::Create);
    let view = store.view();
    assert!(view.create_form_open);
    assert_eq!(view.projects, before);
    assert_eq!(
        view.notice.map(|n| n.message),
        Some("Failed to add project. Please try again.".to_string())
    );

    // 2. Update keeps edit mode
    assert!(store.begin_edit(&ProjectId::from("a")));
    let project = store.editing_project().expect("editing");
    store.save(project).await.unwrap_err();
    let view = store.view();
    assert_eq!(view.editing, Some(ProjectId::from("a")));
    assert_eq!(
        view.notice.map(|n| n.message),
        Some("Failed to update project. Please try again.".to_string())
    );

    // 3. Delete
    store.delete(&ProjectId::from("a")).await.unwrap_err();
    let view = store.view();
    assert_eq!(view.projects, before);
    assert_eq!(
        view.notice.as_ref().map(|n| n.operation),
        Some(StoreOperation::Delete)
    );

    // 4. Dismiss
    store.dismiss_notice();
    assert_eq!(store.view().notice, None);
    Ok(())
}

#[tokio::test]
async fn test_failed_subscription_exposes_reason() -> anyhow::Result<()> {
    let (gateway, store) = create_scripted_store();
    gateway.push_records(vec![make_record("a", "Alpha")]);

    gateway.push(Snapshot::failed("permission denied"));
    let view = store.view();
    assert!(!view.loading);
    assert!(view.projects.is_empty());
    assert_eq!(view.failure.as_deref(), Some("permission denied"));
    assert_eq!(
        view.notice,
        Some(Notice {
            operation: StoreOperation::Subscribe,
            message: "Failed to load projects.".to_string(),
        })
    );

    // A good snapshot clears the failure and its notice
    gateway.push_records(vec![make_record("a", "Alpha")]);
    let view = store.view();
    assert_eq!(view.failure, None);
    assert_eq!(view.notice, None);
    Ok(())
}

#[tokio::test]
async fn test_recovery_keeps_write_notices() -> anyhow::Result<()> {
    let (gateway, store) = create_scripted_store();
    gateway.push_records(vec![]);
    gateway.set_failing(true);
    store.delete(&ProjectId::from("a")).await.unwrap_err();

    // A later good snapshot leaves the delete notice alone
    gateway.push_records(vec![make_record("b", "Bravo")]);
    assert_eq!(
        store.view().notice.map(|n| n.operation),
        Some(StoreOperation::Delete)
    );
    Ok(())
}

#[tokio::test]
async fn test_mount_and_unmount() -> anyhow::Result<()> {
    let (gateway, store) = create_scripted_store();
    assert!(store.is_mounted());

    // 1. Mounting again keeps a single subscription
    store.mount();
    assert_eq!(gateway.listener_count(), 1);

    // 2. After unmount snapshots are ignored
    store.unmount();
    assert!(!store.is_mounted());
    assert_eq!(gateway.listener_count(), 0);
    gateway.push_records(vec![make_record("a", "Alpha")]);
    assert_eq!(store.phase(), Phase::Loading);
    assert!(store.projects().is_empty());

    // 3. Remounting resumes delivery
    store.mount();
    gateway.push_records(vec![make_record("a", "Alpha")]);
    assert_eq!(store.projects().len(), 1);

    // 4. Dropping the store unsubscribes
    drop(store);
    assert_eq!(gateway.listener_count(), 0);
    Ok(())
}
