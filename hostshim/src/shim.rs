//! Public facade.

use crate::child::{ChildHandle, ChildManager, ImageResolver};
use crate::engine::{DockerRuntime, RuntimeApi};
use crate::options::{HelperKind, ShimOptions};
use crate::portal::{CommandExecutor, WatchChannel, WatchHandle, WatchListeners};
use crate::util::shell_quote;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use hostshim_shared::constants::helper::WRITE_OK;
use hostshim_shared::errors::ShimResult;
use std::sync::Arc;

/// Renders the default helper command lines.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HelperCommands {
    kind: HelperKind,
}

impl HelperCommands {
    pub fn new(kind: HelperKind) -> Self {
        Self { kind }
    }

    /// Command printing the contents of `path`.
    pub fn read(&self, path: &str) -> String {
        match &self.kind {
            HelperKind::Node { dir } => {
                format!("node {} {}", node_script(dir, "read.js"), shell_quote(path))
            }
            HelperKind::Native { binary } => {
                format!("{} read {}", shell_quote(binary), shell_quote(path))
            }
        }
    }

    /// Command replacing the contents of `path` with `content`.
    ///
    /// The node helper receives `content` serialized as a JSON string literal.
    /// The native helper receives the raw bytes, base64 encoded.
    pub fn write(&self, path: &str, content: &str) -> String {
        match &self.kind {
            HelperKind::Node { dir } => {
                let literal = serde_json::Value::String(content.to_string()).to_string();
                format!(
                    "node {} {} {}",
                    node_script(dir, "write.js"),
                    shell_quote(path),
                    shell_quote(&literal)
                )
            }
            HelperKind::Native { binary } => format!(
                "{} write {} --base64 {}",
                shell_quote(binary),
                shell_quote(path),
                shell_quote(&BASE64.encode(content))
            ),
        }
    }

    /// Command streaming events for `path`.
    pub fn watch(&self, path: &str) -> String {
        match &self.kind {
            HelperKind::Node { dir } => {
                format!("node {} {}", node_script(dir, "watch.js"), shell_quote(path))
            }
            HelperKind::Native { binary } => {
                format!("{} watch {}", shell_quote(binary), shell_quote(path))
            }
        }
    }
}

fn node_script(dir: &str, script: &str) -> String {
    shell_quote(&format!("{}/{}", dir.trim_end_matches('/'), script))
}

/// Host file access through the child container.
///
/// Every call opens its own exec in the child, so a `Shim` can be shared
/// across tasks and used concurrently.
pub struct Shim {
    options: ShimOptions,
    child: ChildHandle,
    commands: HelperCommands,
    executor: CommandExecutor,
    watcher: WatchChannel,
}

impl Shim {
    /// Connect to the runtime socket in `options` and materialize the child.
    pub async fn connect(options: ShimOptions) -> ShimResult<Self> {
        options.validate()?;
        let runtime = DockerRuntime::connect(&options.socket_path)?;
        Self::with_runtime(Arc::new(runtime), options).await
    }

    /// Resolve the child image, then find or create the child, using any
    /// runtime backend.
    pub async fn with_runtime(runtime: Arc<dyn RuntimeApi>, options: ShimOptions) -> ShimResult<Self> {
        options.validate()?;

        let image = ImageResolver::new(Arc::clone(&runtime))
            .resolve(options.image.as_deref(), &options.parent_container_name)
            .await?;
        let child = ChildManager::new(Arc::clone(&runtime), &options)
            .ensure_child(&options.child_container_name, &image)
            .await?;

        tracing::info!(
            container_id = %child.id,
            name = %child.name,
            adopted = child.adopted,
            "Shim child ready"
        );

        Ok(Self {
            commands: HelperCommands::new(options.helper.clone()),
            executor: CommandExecutor::new(Arc::clone(&runtime), child.id.clone()),
            watcher: WatchChannel::new(runtime, child.id.clone(), options.watch_tty),
            child,
            options,
        })
    }

    pub fn child(&self) -> &ChildHandle {
        &self.child
    }

    pub fn options(&self) -> &ShimOptions {
        &self.options
    }

    pub fn commands(&self) -> &HelperCommands {
        &self.commands
    }

    /// Read the file at `path`, a path inside the child (normally under the
    /// child mount path).
    pub async fn read(&self, path: &str) -> ShimResult<String> {
        self.read_with_command(path, None).await
    }

    /// Like [`Shim::read`], running `command` instead of the default helper.
    pub async fn read_with_command(&self, path: &str, command: Option<&str>) -> ShimResult<String> {
        let command = command.map_or_else(|| self.commands.read(path), str::to_string);
        tracing::debug!(path, "Reading file");
        self.executor.run(&command).await
    }

    /// Replace the contents of the file at `path`.
    pub async fn write(&self, path: &str, content: &str) -> ShimResult<()> {
        self.write_with_command(path, content, None).await
    }

    /// Like [`Shim::write`], running `command` instead of the default helper.
    /// `content` is only used by the default command.
    pub async fn write_with_command(
        &self,
        path: &str,
        content: &str,
        command: Option<&str>,
    ) -> ShimResult<()> {
        tracing::debug!(path, len = content.len(), "Writing file");
        match command {
            Some(command) => {
                self.executor.run(command).await?;
            }
            None => {
                let output = self.executor.run(&self.commands.write(path, content)).await?;
                if output.trim() != WRITE_OK {
                    tracing::warn!(path, output = %output.trim(), "Write helper did not confirm");
                }
            }
        }
        Ok(())
    }

    /// Watch `path` (a file or directory) and dispatch events to `listeners`.
    pub async fn watch(&self, path: &str, listeners: WatchListeners) -> ShimResult<WatchHandle> {
        self.watch_with_command(path, listeners, None).await
    }

    /// Like [`Shim::watch`], running `command` instead of the default helper.
    pub async fn watch_with_command(
        &self,
        path: &str,
        listeners: WatchListeners,
        command: Option<&str>,
    ) -> ShimResult<WatchHandle> {
        let command = command.map_or_else(|| self.commands.watch(path), str::to_string);
        tracing::debug!(path, "Opening watch");
        self.watcher.open(&command, listeners).await
    }
}
