//! Exec-backed channels into the child container.
//!
//! - [`CommandExecutor`]: one-shot commands, buffered to completion
//! - [`WatchChannel`]: a long-running helper streaming file events

mod exec;
mod watch;

pub use exec::CommandExecutor;
pub use watch::{WatchChannel, WatchHandle, WatchListeners, WatchState};
