//! Integration tests for the `Shim` facade.

use hostshim::{HelperKind, Shim, ShimError, ShimOptions, WatchListeners};
use hostshim_test_utils::{ExecScript, FakeRuntime};
use std::sync::Arc;

async fn shim_with(options: ShimOptions) -> (Arc<FakeRuntime>, Shim) {
    let runtime = Arc::new(FakeRuntime::with_parent("shim_parent", "node:20"));
    let shim = Shim::with_runtime(runtime.clone(), options).await.unwrap();
    (runtime, shim)
}

fn native_options() -> ShimOptions {
    ShimOptions {
        helper: HelperKind::Native {
            binary: "/usr/local/bin/hostshim-helper".into(),
        },
        ..Default::default()
    }
}

#[tokio::test]
async fn construction_yields_running_child() {
    let (runtime, shim) = shim_with(ShimOptions::default()).await;
    let child = runtime.container_named("shim_child").unwrap();
    assert!(child.running);
    assert_eq!(shim.child().id, child.id);
    assert_eq!(child.image, "sha256:node:20");
}

#[tokio::test]
async fn invalid_options_fail_before_touching_runtime() {
    let runtime = Arc::new(FakeRuntime::with_parent("shim_parent", "node:20"));
    let options = ShimOptions {
        child_mount_path: "mnt/root".into(),
        ..Default::default()
    };
    let err = Shim::with_runtime(runtime.clone(), options).await.err().unwrap();
    assert!(matches!(err, ShimError::Config(_)));
    assert_eq!(runtime.calls("list_containers"), 0);
}

#[tokio::test]
async fn read_runs_node_helper_in_child() {
    let (runtime, shim) = shim_with(ShimOptions::default()).await;
    runtime.respond("utils/read.js", ExecScript::ok("{\"a\":1}\n"));

    let contents = shim.read("/mnt/root/demo/config.json").await.unwrap();
    assert_eq!(contents, "{\"a\":1}\n");
    assert_eq!(
        runtime.exec_commands(),
        ["node utils/read.js /mnt/root/demo/config.json"]
    );
    assert_eq!(runtime.exec_containers(), [shim.child().id.clone()]);
}

#[tokio::test]
async fn write_quotes_json_content() {
    let (runtime, shim) = shim_with(ShimOptions::default()).await;
    runtime.respond("utils/write.js", ExecScript::ok("true\n"));

    shim.write("/mnt/root/demo/config.json", r#"{"test":"it's"}"#)
        .await
        .unwrap();
    assert_eq!(
        runtime.exec_commands(),
        [r#"node utils/write.js /mnt/root/demo/config.json '"{\"test\":\"it'\''s\"}"'"#]
    );
}

#[tokio::test]
async fn write_failure_is_reported() {
    let (runtime, shim) = shim_with(ShimOptions::default()).await;
    runtime.respond("utils/write.js", ExecScript::failing("EACCES"));
    let err = shim.write("/mnt/root/ro", "x").await.unwrap_err();
    assert!(err.is_exec_failure());

    // The shim stays usable after a failed call.
    runtime.respond("utils/read.js", ExecScript::ok("x"));
    assert_eq!(shim.read("/mnt/root/ro").await.unwrap(), "x");
}

#[tokio::test]
async fn native_helper_commands() {
    let (runtime, shim) = shim_with(native_options()).await;
    runtime.respond("hostshim-helper write", ExecScript::ok("true\n"));
    runtime.respond("hostshim-helper read", ExecScript::ok(""));

    shim.write("/mnt/root/empty", "").await.unwrap();
    assert_eq!(shim.read("/mnt/root/empty").await.unwrap(), "");
    assert_eq!(
        runtime.exec_commands(),
        [
            "/usr/local/bin/hostshim-helper write /mnt/root/empty --base64 ''",
            "/usr/local/bin/hostshim-helper read /mnt/root/empty",
        ]
    );
}

#[tokio::test]
async fn override_commands_replace_defaults() {
    let (runtime, shim) = shim_with(ShimOptions::default()).await;
    runtime.respond("cat", ExecScript::ok("raw"));

    let out = shim
        .read_with_command("/ignored", Some("cat /mnt/root/etc/hostname"))
        .await
        .unwrap();
    assert_eq!(out, "raw");
    shim.write_with_command("/ignored", "ignored", Some("touch /mnt/root/tmp/x"))
        .await
        .unwrap();

    let live = runtime.respond_live("inotifywait", false);
    let watcher = shim
        .watch_with_command(
            "/ignored",
            WatchListeners::new(),
            Some("inotifywait -m /mnt/root/tmp"),
        )
        .await
        .unwrap();
    watcher.close();
    drop(live);

    assert_eq!(
        runtime.exec_commands(),
        [
            "cat /mnt/root/etc/hostname",
            "touch /mnt/root/tmp/x",
            "inotifywait -m /mnt/root/tmp",
        ]
    );
}

#[tokio::test]
async fn watch_uses_configured_tty_mode() {
    let options = ShimOptions {
        watch_tty: true,
        ..Default::default()
    };
    let (runtime, shim) = shim_with(options).await;
    let _live = runtime.respond_live("utils/watch.js", true);

    let watcher = shim
        .watch("/mnt/root/demo/vpn_status", WatchListeners::new())
        .await
        .unwrap();
    let specs = runtime.exec_specs();
    assert_eq!(
        specs[0].cmd.last().map(String::as_str),
        Some("node utils/watch.js /mnt/root/demo/vpn_status")
    );
    assert!(specs[0].tty && specs[0].attach_stdin);
    watcher.close();
}
