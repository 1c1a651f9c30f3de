//! One-shot command execution inside the child.

use crate::engine::{Demuxed, ExecSpec, ExecStatus, RuntimeApi, demux};
use hostshim_shared::errors::{ShimError, ShimResult};
use std::sync::Arc;

/// Runs short-lived shell commands in the child and buffers their output.
#[derive(Clone)]
pub struct CommandExecutor {
    runtime: Arc<dyn RuntimeApi>,
    container_id: String,
}

impl CommandExecutor {
    pub fn new(runtime: Arc<dyn RuntimeApi>, container_id: impl Into<String>) -> Self {
        Self {
            runtime,
            container_id: container_id.into(),
        }
    }

    /// Run `sh -c <command>` and return its stdout.
    ///
    /// Both output halves are read to the end before the exit code is
    /// inspected. The call fails with [`ShimError::ExecFailed`] if the command
    /// wrote anything to stderr or exited non-zero.
    ///
    /// Dropping the returned future closes the exec stream; the command itself
    /// may keep running briefly inside the child.
    pub async fn run(&self, command: &str) -> ShimResult<String> {
        let spec = ExecSpec::shell(command);
        let exec_id = self.runtime.exec_create(&self.container_id, &spec).await?;
        tracing::debug!(container_id = %self.container_id, exec_id = %exec_id, command, "Running command");

        let stream = self
            .runtime
            .exec_start(&exec_id, spec.start_options())
            .await?;

        let Demuxed {
            stdout,
            stderr,
            guard,
        } = demux(stream.output);
        let (stdout, stderr) = futures::try_join!(stdout.collect_bytes(), stderr.collect_bytes())?;
        drop(guard);

        let status = match self.runtime.exec_inspect(&exec_id).await {
            Ok(status) => status,
            Err(e) => {
                tracing::warn!(exec_id = %exec_id, error = %e, "Failed to inspect finished exec");
                ExecStatus::default()
            }
        };

        let result = completion(stdout, stderr, status.exit_code);
        if let Err(e) = &result {
            tracing::debug!(exec_id = %exec_id, error = %e, "Command failed");
        }
        result
    }
}

/// Stderr output or a non-zero exit code fail the command; otherwise stdout
/// must be UTF-8.
fn completion(stdout: Vec<u8>, stderr: Vec<u8>, exit_code: Option<i64>) -> ShimResult<String> {
    if !stderr.is_empty() || exit_code.is_some_and(|code| code != 0) {
        return Err(ShimError::ExecFailed {
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            exit_code,
        });
    }
    String::from_utf8(stdout).map_err(|e| ShimError::InvalidOutput(e.to_string()))
}
