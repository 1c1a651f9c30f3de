//! Child container materialization.
//!
//! [`ImageResolver`] decides which image the child runs, [`ChildManager`]
//! finds or creates the child itself.

mod image;
mod lifecycle;

pub use image::ImageResolver;
pub use lifecycle::ChildManager;

/// Reference to a running child container.
///
/// Once handed out, the container exists, is running, is privileged, and
/// bind-mounts the configured host path at the configured child path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChildHandle {
    /// Runtime container id.
    pub id: String,
    /// Configured child name.
    pub name: String,
    /// Image the child was created from.
    pub image: String,
    /// Whether an existing container was reused rather than created.
    pub adopted: bool,
}
