//! hostshim - host filesystem access through a sibling container
//!
//! A process running inside a container reads, writes and watches files on
//! the host by delegating to a privileged child container that bind-mounts
//! the host root. The parent talks to the container runtime over its local
//! socket, materializes (or reuses) the child, and runs short-lived helper
//! commands inside it through the runtime's exec facility.
//!
//! ## Architecture
//!
//! - `engine`: runtime client seam (`RuntimeApi`), the Docker backend and the
//!   exec stream demultiplexer
//! - `child`: image resolution and the create-or-reuse child lifecycle
//! - `portal`: one-shot command execution and the long-lived watch channel
//! - `shim`: the public `Shim` facade (`read`, `write`, `watch`)
//!
//! ```rust,no_run
//! # async fn example() -> hostshim::ShimResult<()> {
//! use hostshim::{Shim, ShimOptions, WatchListeners};
//!
//! let shim = Shim::connect(ShimOptions::from_env()?).await?;
//! let config = shim.read("/mnt/root/demo/config.json").await?;
//! shim.write("/mnt/root/demo/config.json", &config).await?;
//!
//! let watcher = shim
//!     .watch(
//!         "/mnt/root/demo/vpn_status",
//!         WatchListeners::new().on_add(|file| println!("added {file}")),
//!     )
//!     .await?;
//! watcher.close();
//! # Ok(())
//! # }
//! ```

pub mod child;
pub mod engine;
pub mod options;
pub mod portal;
mod shim;
pub mod util;

pub use child::{ChildHandle, ChildManager, ImageResolver};
pub use engine::{DockerRuntime, RuntimeApi};
pub use options::{HelperKind, ShimOptions};
pub use portal::{CommandExecutor, WatchChannel, WatchHandle, WatchListeners, WatchState};
pub use shim::{HelperCommands, Shim};
pub use util::init_logging;

pub use hostshim_shared::{FileEvent, FileEventKind, ShimError, ShimResult};
