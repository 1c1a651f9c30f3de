//! Container runtime client.
//!
//! `RuntimeApi` is the small capability surface the rest of the crate needs
//! from the container runtime. `DockerRuntime` implements it over the local
//! daemon socket; tests substitute an in-memory runtime. Implementations
//! never retry on their own.

mod demux;
mod docker;

pub use demux::{Demuxed, ExecOutput, RawStreamCodec, RouterGuard, decode_raw, demux};
pub use docker::DockerRuntime;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use hostshim_shared::constants::defaults;
use hostshim_shared::errors::ShimResult;
use std::collections::HashMap;
use std::pin::Pin;
use tokio::io::AsyncWrite;

/// Summary of a container as returned by a listing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ContainerRecord {
    pub id: String,
    /// Names as reported by the runtime (Docker prefixes them with `/`).
    pub names: Vec<String>,
    /// Image reference the container was created from.
    pub image: String,
    /// Resolved image id, when the runtime reports one.
    pub image_id: Option<String>,
    pub labels: HashMap<String, String>,
}

impl ContainerRecord {
    /// Whether any of the container's names contains `needle`.
    pub fn name_contains(&self, needle: &str) -> bool {
        self.names.iter().any(|name| name.contains(needle))
    }

    pub fn has_label(&self, key: &str, value: &str) -> bool {
        self.labels.get(key).is_some_and(|v| v == value)
    }
}

/// Image metadata.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ImageRecord {
    pub id: Option<String>,
    pub repo_tags: Vec<String>,
}

/// Inspected container state.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ContainerDetails {
    pub id: String,
    pub name: String,
    pub image: String,
    pub running: bool,
    pub privileged: bool,
    /// Bind mounts in `source:destination[:options]` form.
    pub binds: Vec<String>,
    pub labels: HashMap<String, String>,
}

/// Container creation request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ContainerSpec {
    pub image: String,
    pub cmd: Vec<String>,
    pub binds: Vec<String>,
    pub privileged: bool,
    pub labels: HashMap<String, String>,
    pub attach_stdout: bool,
    pub attach_stderr: bool,
}

/// Exec creation request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecSpec {
    pub cmd: Vec<String>,
    pub attach_stdin: bool,
    pub attach_stdout: bool,
    pub attach_stderr: bool,
    pub tty: bool,
}

impl ExecSpec {
    /// `sh -c <command>` with stdout and stderr attached, stdin detached, no TTY.
    pub fn shell(command: impl Into<String>) -> Self {
        Self {
            cmd: vec![defaults::SHELL.to_string(), "-c".to_string(), command.into()],
            attach_stdin: false,
            attach_stdout: true,
            attach_stderr: true,
            tty: false,
        }
    }

    /// Attach stdin as well.
    pub fn with_stdin(mut self) -> Self {
        self.attach_stdin = true;
        self
    }

    pub fn with_tty(mut self, tty: bool) -> Self {
        self.tty = tty;
        self
    }

    /// Start options matching this spec.
    pub fn start_options(&self) -> ExecStartOptions {
        ExecStartOptions {
            stdin: self.attach_stdin,
            tty: self.tty,
        }
    }
}

/// Exec start request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExecStartOptions {
    /// Hijack the connection so the caller can write to the process's stdin.
    pub stdin: bool,
    pub tty: bool,
}

/// One unit of exec output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExecFrame {
    Stdout(Bytes),
    Stderr(Bytes),
    /// Merged output of a TTY exec.
    Console(Bytes),
}

impl ExecFrame {
    pub fn payload(&self) -> &Bytes {
        match self {
            ExecFrame::Stdout(b) | ExecFrame::Stderr(b) | ExecFrame::Console(b) => b,
        }
    }
}

/// Exec output as a stream of frames.
pub type FrameStream = BoxStream<'static, ShimResult<ExecFrame>>;

/// Writable half of a hijacked exec connection.
pub type ExecInput = Pin<Box<dyn AsyncWrite + Send>>;

/// Bidirectional exec transport.
pub struct ExecStream {
    pub output: FrameStream,
    /// Present when the exec was started with stdin.
    pub input: Option<ExecInput>,
}

/// Exec process status.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExecStatus {
    pub running: bool,
    /// Known once the process has exited.
    pub exit_code: Option<i64>,
}

/// Container runtime abstraction.
///
/// Must be safe for concurrent use: every `Shim` operation opens its own exec
/// and several may be in flight at once.
#[async_trait]
pub trait RuntimeApi: Send + Sync {
    async fn list_containers(&self, all: bool) -> ShimResult<Vec<ContainerRecord>>;
    async fn pull_image(&self, reference: &str) -> ShimResult<()>;
    async fn inspect_image(&self, reference: &str) -> ShimResult<ImageRecord>;
    async fn get_container(&self, id: &str) -> ShimResult<ContainerDetails>;
    /// Create a container and return its id.
    async fn create_container(&self, spec: &ContainerSpec) -> ShimResult<String>;
    async fn rename_container(&self, id: &str, new_name: &str) -> ShimResult<()>;
    async fn start_container(&self, id: &str) -> ShimResult<()>;
    /// Force-remove a container. Removing a container that no longer exists
    /// is not an error.
    async fn remove_container(&self, id: &str) -> ShimResult<()>;
    /// Create an exec instance and return its id.
    async fn exec_create(&self, container_id: &str, spec: &ExecSpec) -> ShimResult<String>;
    async fn exec_start(&self, exec_id: &str, options: ExecStartOptions)
    -> ShimResult<ExecStream>;
    async fn exec_inspect(&self, exec_id: &str) -> ShimResult<ExecStatus>;
}
