//! Configuration for hostshim.

use hostshim_shared::constants::{defaults, envs};
use hostshim_shared::errors::{ShimError, ShimResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Which helper programs the child runs for read/write/watch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum HelperKind {
    /// Node scripts (`read.js`, `write.js`, `watch.js`) in `dir`, relative to
    /// the child's working directory.
    Node { dir: String },
    /// The `hostshim-helper` binary at `binary` inside the child.
    Native { binary: String },
}

impl Default for HelperKind {
    fn default() -> Self {
        HelperKind::Node {
            dir: defaults::NODE_HELPER_DIR.to_string(),
        }
    }
}

/// Shim configuration.
///
/// Immutable once a `Shim` is built. Populated from the environment with
/// [`ShimOptions::from_env`], or constructed directly.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShimOptions {
    /// Local runtime API socket.
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,

    /// Substring used to locate the parent container for image inheritance.
    #[serde(default = "default_parent_container_name")]
    pub parent_container_name: String,

    /// Name given to the child container, also used to find an existing one.
    #[serde(default = "default_child_container_name")]
    pub child_container_name: String,

    /// Host-side source of the bind mount.
    #[serde(default = "default_parent_mount_path")]
    pub parent_mount_path: String,

    /// In-child destination of the bind mount.
    #[serde(default = "default_child_mount_path")]
    pub child_mount_path: String,

    /// Explicit image for the child. `None` inherits the parent's image.
    #[serde(default)]
    pub image: Option<String>,

    #[serde(default)]
    pub helper: HelperKind,

    /// Run the watch exec with a TTY. Off by default so helper stderr stays
    /// separable from the event stream.
    #[serde(default)]
    pub watch_tty: bool,
}

fn default_socket_path() -> PathBuf {
    PathBuf::from(defaults::SOCKET_PATH)
}

fn default_parent_container_name() -> String {
    defaults::PARENT_CONTAINER_NAME.to_string()
}

fn default_child_container_name() -> String {
    defaults::CHILD_CONTAINER_NAME.to_string()
}

fn default_parent_mount_path() -> String {
    defaults::PARENT_MOUNT_PATH.to_string()
}

fn default_child_mount_path() -> String {
    defaults::CHILD_MOUNT_PATH.to_string()
}

impl Default for ShimOptions {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            parent_container_name: default_parent_container_name(),
            child_container_name: default_child_container_name(),
            parent_mount_path: default_parent_mount_path(),
            child_mount_path: default_child_mount_path(),
            image: None,
            helper: HelperKind::default(),
            watch_tty: false,
        }
    }
}

impl ShimOptions {
    /// Build options from the process environment, falling back to defaults.
    pub fn from_env() -> ShimResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build options from an arbitrary key lookup.
    ///
    /// Empty values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> ShimResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let mut options = Self::default();

        if let Some(host) = get(envs::DOCKER_HOST) {
            options.socket_path = parse_socket_path(&host)?;
        }
        if let Some(name) = get(envs::PARENT_CONTAINER_NAME) {
            options.parent_container_name = name;
        }
        if let Some(name) = get(envs::CHILD_CONTAINER_NAME) {
            options.child_container_name = name;
        }
        if let Some(path) = get(envs::PARENT_MOUNT_PATH) {
            options.parent_mount_path = path;
        }
        if let Some(path) = get(envs::CHILD_MOUNT_PATH) {
            options.child_mount_path = path;
        }
        options.image = get(envs::SHIM_IMAGE);
        if let Some(binary) = get(envs::SHIM_HELPER_BIN) {
            options.helper = HelperKind::Native { binary };
        }
        if let Some(flag) = get(envs::SHIM_WATCH_TTY) {
            options.watch_tty = parse_flag(envs::SHIM_WATCH_TTY, &flag)?;
        }

        options.validate()?;
        Ok(options)
    }

    /// Check that the options describe a usable configuration.
    pub fn validate(&self) -> ShimResult<()> {
        if self.socket_path.as_os_str().is_empty() {
            return Err(ShimError::Config("socket path cannot be empty".into()));
        }
        for (field, value) in [
            ("parent container name", &self.parent_container_name),
            ("child container name", &self.child_container_name),
        ] {
            if value.trim().is_empty() {
                return Err(ShimError::Config(format!("{field} cannot be empty")));
            }
        }
        for (field, value) in [
            ("parent mount path", &self.parent_mount_path),
            ("child mount path", &self.child_mount_path),
        ] {
            if !value.starts_with('/') {
                return Err(ShimError::Config(format!(
                    "{field} must be absolute, got: {value}"
                )));
            }
        }
        Ok(())
    }

    /// The bind spec `parent_mount_path:child_mount_path`.
    pub fn bind_spec(&self) -> String {
        format!("{}:{}", self.parent_mount_path, self.child_mount_path)
    }
}

/// Accepts `/path/to/sock` or `unix:///path/to/sock`.
fn parse_socket_path(value: &str) -> ShimResult<PathBuf> {
    let value = value.trim();
    if let Some(path) = value.strip_prefix("unix://") {
        return Ok(PathBuf::from(path));
    }
    if value.contains("://") {
        return Err(ShimError::Config(format!(
            "unsupported {} '{}': only unix sockets are supported",
            envs::DOCKER_HOST,
            value
        )));
    }
    Ok(PathBuf::from(value))
}

fn parse_flag(key: &str, value: &str) -> ShimResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ShimError::Config(format!(
            "{key} must be a boolean, got: {other}"
        ))),
    }
}
