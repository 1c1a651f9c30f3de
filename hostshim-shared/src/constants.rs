//! Shared constants between the parent-side library and the in-child helper
//!
//! These constants must be identical on both sides of the exec boundary.

/// Environment variable names read by `ShimOptions::from_env`.
pub mod envs {
    /// Runtime socket path. Accepts a bare path or a `unix://` URI.
    pub const DOCKER_HOST: &str = "DOCKER_HOST";
    pub const PARENT_CONTAINER_NAME: &str = "PARENT_CONTAINER_NAME";
    pub const CHILD_CONTAINER_NAME: &str = "CHILD_CONTAINER_NAME";
    pub const PARENT_MOUNT_PATH: &str = "PARENT_MOUNT_PATH";
    pub const CHILD_MOUNT_PATH: &str = "CHILD_MOUNT_PATH";
    /// Explicit image reference for the child (skips parent inheritance).
    pub const SHIM_IMAGE: &str = "SHIM_IMAGE";
    /// Path of the native helper binary inside the child.
    pub const SHIM_HELPER_BIN: &str = "SHIM_HELPER_BIN";
    /// Run the watch exec with a TTY ("1"/"true").
    pub const SHIM_WATCH_TTY: &str = "SHIM_WATCH_TTY";
    /// Directory the helper writes its log file into. Unset disables helper logging.
    pub const HELPER_LOG_DIR: &str = "HOSTSHIM_HELPER_LOG_DIR";
}

/// Configuration defaults.
pub mod defaults {
    pub const SOCKET_PATH: &str = "/var/run/docker.sock";
    pub const PARENT_CONTAINER_NAME: &str = "shim_parent";
    pub const CHILD_CONTAINER_NAME: &str = "shim_child";
    pub const PARENT_MOUNT_PATH: &str = "/";
    pub const CHILD_MOUNT_PATH: &str = "/mnt/root";

    /// Directory (relative to the child's working dir) holding the node helpers.
    pub const NODE_HELPER_DIR: &str = "utils";

    /// Shell used to run every exec command.
    pub const SHELL: &str = "sh";

    /// Command the child container idles on. Never exits, never reads stdin.
    pub const IDLE_COMMAND: &[&str] = &["sleep", "infinity"];
}

/// Labels attached to containers created by the library.
pub mod labels {
    /// Marks a container as a shim child.
    pub const ROLE: &str = "hostshim.role";
    pub const ROLE_CHILD: &str = "child";
    /// The configured child name, matched exactly during discovery.
    pub const NAME: &str = "hostshim.name";
}

/// In-band control bytes written to a helper's stdin.
pub mod control {
    /// ETX (Ctrl+C). Asks a long-running helper to exit.
    pub const CANCEL_BYTE: u8 = 0x03;
}

/// Helper stdout tokens.
pub mod helper {
    /// Printed by the write helper on success.
    pub const WRITE_OK: &str = "true";
}
