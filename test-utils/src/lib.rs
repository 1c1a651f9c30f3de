//! Test doubles for hostshim.
//!
//! [`FakeRuntime`] implements [`RuntimeApi`] in memory. Exec output is
//! described as raw daemon transport bytes (8-byte-header frames, or unframed
//! TTY bytes) and decoded through the library's own frame decoder, so tests
//! exercise the same demultiplexing path a real transport would.

mod exec;
mod runtime;

pub use exec::{ExecScript, LiveExec, stderr_frame, stdout_frame};
pub use runtime::{FakeContainer, FakeRuntime};

use std::time::Duration;

/// Upper bound for waits in async tests.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Poll `condition` until it holds or [`TEST_TIMEOUT`] elapses.
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + TEST_TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
