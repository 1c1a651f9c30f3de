//! Integration tests for image resolution and the child lifecycle.

use hostshim::engine::ImageRecord;
use hostshim::{ChildManager, ImageResolver, Shim, ShimError, ShimOptions};
use hostshim_shared::constants::labels;
use hostshim_test_utils::{FakeContainer, FakeRuntime};
use std::sync::Arc;

// ============================================================================
// TEST FIXTURES
// ============================================================================

fn options() -> ShimOptions {
    ShimOptions::default()
}

fn runtime_with_parent() -> Arc<FakeRuntime> {
    Arc::new(FakeRuntime::with_parent("project_shim_parent_1", "node:20"))
}

// ============================================================================
// IMAGE RESOLUTION
// ============================================================================

#[tokio::test]
async fn inherits_parent_image_id() {
    let runtime = runtime_with_parent();
    let image = ImageResolver::new(runtime.clone())
        .resolve(None, "shim_parent")
        .await
        .unwrap();
    assert_eq!(image, "sha256:node:20");
    assert_eq!(runtime.calls("pull_image"), 0);
}

#[tokio::test]
async fn missing_parent_is_reported() {
    let runtime = Arc::new(FakeRuntime::new());
    let err = ImageResolver::new(runtime)
        .resolve(None, "shim_parent")
        .await
        .unwrap_err();
    assert!(matches!(err, ShimError::ParentNotFound(name) if name == "shim_parent"));
}

#[tokio::test]
async fn explicit_image_is_pulled_and_resolved_to_id() {
    let runtime = runtime_with_parent();
    runtime.add_image(
        "alpine:3.20",
        ImageRecord {
            id: Some("sha256:abc".into()),
            repo_tags: vec!["alpine:3.20".into()],
        },
    );

    let image = ImageResolver::new(runtime.clone())
        .resolve(Some("alpine:3.20"), "shim_parent")
        .await
        .unwrap();
    assert_eq!(image, "sha256:abc");
    assert_eq!(runtime.calls("pull_image"), 1);
}

#[tokio::test]
async fn explicit_image_never_falls_back_to_parent() {
    let runtime = runtime_with_parent();
    let err = ImageResolver::new(runtime.clone())
        .resolve(Some("alpnie:latest"), "shim_parent")
        .await
        .unwrap_err();
    assert!(matches!(err, ShimError::ImageUnavailable { reference, .. } if reference == "alpnie:latest"));
    assert_eq!(runtime.calls("list_containers"), 0);
}

#[tokio::test]
async fn image_without_id_resolves_to_repo_tag() {
    let runtime = runtime_with_parent();
    runtime.add_image(
        "registry.local:5000/tools",
        ImageRecord {
            id: None,
            repo_tags: vec!["registry.local:5000/tools:latest".into()],
        },
    );
    let image = ImageResolver::new(runtime)
        .resolve(Some("registry.local:5000/tools"), "shim_parent")
        .await
        .unwrap();
    assert_eq!(image, "registry.local:5000/tools:latest");
}

// ============================================================================
// CHILD CREATION
// ============================================================================

#[tokio::test]
async fn creates_privileged_child_with_bind_and_idle_command() {
    let runtime = runtime_with_parent();
    let child = ChildManager::new(runtime.clone(), &options())
        .ensure_child("shim_child", "sha256:node:20")
        .await
        .unwrap();
    assert!(!child.adopted);

    let container = runtime.container_named("shim_child").expect("child exists");
    assert_eq!(container.id, child.id);
    assert!(container.running);
    assert!(container.privileged);
    assert_eq!(container.binds, ["/:/mnt/root"]);
    assert_eq!(container.cmd, ["sleep", "infinity"]);
    assert_eq!(container.image, "sha256:node:20");
    assert_eq!(
        container.labels.get(labels::ROLE).map(String::as_str),
        Some(labels::ROLE_CHILD)
    );
    assert_eq!(
        container.labels.get(labels::NAME).map(String::as_str),
        Some("shim_child")
    );
}

#[tokio::test]
async fn ensure_child_is_idempotent() {
    let runtime = runtime_with_parent();
    let manager = ChildManager::new(runtime.clone(), &options());

    let first = manager.ensure_child("shim_child", "img").await.unwrap();
    let count = runtime.containers().len();
    let second = manager.ensure_child("shim_child", "img").await.unwrap();

    assert_eq!(first.id, second.id);
    assert!(second.adopted);
    assert_eq!(runtime.containers().len(), count);
    assert_eq!(runtime.calls("create_container"), 1);
}

#[tokio::test]
async fn shim_construction_twice_reuses_child() {
    let runtime = runtime_with_parent();
    let a = Shim::with_runtime(runtime.clone(), options()).await.unwrap();
    let b = Shim::with_runtime(runtime.clone(), options()).await.unwrap();
    assert_eq!(a.child().id, b.child().id);
    assert_eq!(runtime.containers().len(), 2);
}

#[tokio::test]
async fn create_failure_is_fatal() {
    let runtime = runtime_with_parent();
    runtime.fail_next("start_container", "cgroup error");
    let err = ChildManager::new(runtime, &options())
        .ensure_child("shim_child", "img")
        .await
        .unwrap_err();
    match err {
        ShimError::ContainerCreateFailed { name, message } => {
            assert_eq!(name, "shim_child");
            assert!(message.contains("cgroup error"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn rename_conflict_is_a_create_failure() {
    let runtime = runtime_with_parent();
    runtime.fail_next("rename_container", "name already in use");
    let err = ChildManager::new(runtime, &options())
        .ensure_child("shim_child", "img")
        .await
        .unwrap_err();
    assert!(matches!(err, ShimError::ContainerCreateFailed { .. }));
}

#[tokio::test]
async fn failed_rename_leaves_no_orphan_and_retry_creates_named_child() {
    let runtime = runtime_with_parent();
    let manager = ChildManager::new(runtime.clone(), &options());
    runtime.fail_next("rename_container", "name already in use");

    manager.ensure_child("shim_child", "img").await.unwrap_err();
    assert_eq!(runtime.calls("remove_container"), 1);
    assert_eq!(runtime.containers().len(), 1, "only the parent remains");

    let child = manager.ensure_child("shim_child", "img").await.unwrap();
    assert!(!child.adopted);
    let named = runtime.container_named("shim_child").expect("child is named");
    assert_eq!(named.id, child.id);
    assert!(named.running);
}

#[tokio::test]
async fn failed_start_removes_created_container() {
    let runtime = runtime_with_parent();
    runtime.fail_next("start_container", "cgroup error");
    ChildManager::new(runtime.clone(), &options())
        .ensure_child("shim_child", "img")
        .await
        .unwrap_err();
    assert!(runtime.container_named("shim_child").is_none());
    assert_eq!(runtime.containers().len(), 1);
}

#[tokio::test]
async fn lost_name_race_adopts_the_winner() {
    let runtime = runtime_with_parent();
    runtime.add_before_next(
        "rename_container",
        FakeContainer::running("winner", "shim_child", "img")
            .privileged()
            .with_bind("/:/mnt/root"),
    );

    let child = ChildManager::new(runtime.clone(), &options())
        .ensure_child("shim_child", "img")
        .await
        .unwrap();
    assert_eq!(child.id, "winner");
    assert!(child.adopted);
    assert_eq!(runtime.calls("remove_container"), 1);
    assert_eq!(runtime.containers().len(), 2);
}

#[tokio::test]
async fn labelled_container_without_matching_name_is_ignored() {
    let runtime = runtime_with_parent();
    runtime.add_container(
        FakeContainer::running("orphan", "unnamed_orphan", "img")
            .privileged()
            .with_bind("/:/mnt/root")
            .with_label(labels::ROLE, labels::ROLE_CHILD)
            .with_label(labels::NAME, "shim_child"),
    );
    let child = ChildManager::new(runtime.clone(), &options())
        .ensure_child("shim_child", "img")
        .await
        .unwrap();
    assert_ne!(child.id, "orphan");
    assert!(!child.adopted);
    assert!(runtime.container_named("shim_child").is_some());
}

// ============================================================================
// ADOPTION
// ============================================================================

#[tokio::test]
async fn labelled_child_wins_over_name_match() {
    let runtime = runtime_with_parent();
    runtime.add_container(
        FakeContainer::running("decoy", "old_shim_child_backup", "img")
            .privileged()
            .with_bind("/:/mnt/root"),
    );
    runtime.add_container(
        FakeContainer::running("real", "project_shim_child_2", "img")
            .privileged()
            .with_bind("/:/mnt/root")
            .with_label(labels::ROLE, labels::ROLE_CHILD)
            .with_label(labels::NAME, "shim_child"),
    );

    let child = ChildManager::new(runtime, &options())
        .ensure_child("shim_child", "img")
        .await
        .unwrap();
    assert_eq!(child.id, "real");
}

#[tokio::test]
async fn adopts_by_name_substring() {
    let runtime = runtime_with_parent();
    runtime.add_container(
        FakeContainer::running("legacy", "compose_shim_child_1", "img")
            .privileged()
            .with_bind("/:/mnt/root:rw"),
    );
    let child = ChildManager::new(runtime.clone(), &options())
        .ensure_child("shim_child", "img")
        .await
        .unwrap();
    assert_eq!(child.id, "legacy");
    assert!(child.adopted);
    assert_eq!(runtime.calls("create_container"), 0);
}

#[tokio::test]
async fn stopped_child_is_started() {
    let runtime = runtime_with_parent();
    runtime.add_container(
        FakeContainer::running("sleepy", "shim_child", "img")
            .stopped()
            .privileged()
            .with_bind("/:/mnt/root"),
    );
    ChildManager::new(runtime.clone(), &options())
        .ensure_child("shim_child", "img")
        .await
        .unwrap();
    assert!(runtime.container_named("shim_child").unwrap().running);
    assert_eq!(runtime.calls("start_container"), 1);
}

#[tokio::test]
async fn child_with_wrong_bind_is_rejected() {
    let runtime = runtime_with_parent();
    runtime.add_container(
        FakeContainer::running("other", "shim_child", "img")
            .privileged()
            .with_bind("/home:/mnt/root"),
    );
    let err = ChildManager::new(runtime, &options())
        .ensure_child("shim_child", "img")
        .await
        .unwrap_err();
    assert!(matches!(err, ShimError::ContainerIncompatible { .. }));
}

#[tokio::test]
async fn unprivileged_child_is_rejected() {
    let runtime = runtime_with_parent();
    runtime.add_container(
        FakeContainer::running("other", "shim_child", "img").with_bind("/:/mnt/root"),
    );
    let err = ChildManager::new(runtime, &options())
        .ensure_child("shim_child", "img")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("not privileged"));
}
