use crate::commands::{read::ReadArgs, watch::WatchArgs, write::WriteArgs};
use clap::{Args, Parser, Subcommand};
use hostshim::{Shim, ShimOptions};
use hostshim_shared::constants::{defaults, envs};

#[derive(Parser, Debug)]
#[command(
    name = "hostshim",
    author,
    version,
    about = "Read, write and watch host files through a privileged sibling container"
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalFlags,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Find or create the child container and print its id
    Ensure,
    /// Print a file's contents
    Read(ReadArgs),
    /// Replace a file's contents
    Write(WriteArgs),
    /// Print file events until interrupted
    Watch(WatchArgs),
}

/// Settings shared by every subcommand. Each falls back to the environment
/// variable the library reads.
#[derive(Args, Debug)]
pub struct GlobalFlags {
    /// Runtime socket (`/path` or `unix:///path`)
    #[arg(long, global = true, env = envs::DOCKER_HOST, default_value = defaults::SOCKET_PATH)]
    pub docker_host: String,

    /// Substring identifying the parent container
    #[arg(long, global = true, env = envs::PARENT_CONTAINER_NAME, default_value = defaults::PARENT_CONTAINER_NAME)]
    pub parent_name: String,

    /// Name of the child container
    #[arg(long, global = true, env = envs::CHILD_CONTAINER_NAME, default_value = defaults::CHILD_CONTAINER_NAME)]
    pub child_name: String,

    /// Host path bind-mounted into the child
    #[arg(long, global = true, env = envs::PARENT_MOUNT_PATH, default_value = defaults::PARENT_MOUNT_PATH)]
    pub parent_mount_path: String,

    /// Mount point of the host path inside the child
    #[arg(long, global = true, env = envs::CHILD_MOUNT_PATH, default_value = defaults::CHILD_MOUNT_PATH)]
    pub child_mount_path: String,

    /// Image for the child instead of the parent's image
    #[arg(long, global = true, env = envs::SHIM_IMAGE)]
    pub image: Option<String>,

    /// Native helper binary inside the child (default: node helpers)
    #[arg(long, global = true, env = envs::SHIM_HELPER_BIN)]
    pub helper_bin: Option<String>,

    /// Run the watch helper under a TTY
    #[arg(
        long,
        global = true,
        env = envs::SHIM_WATCH_TTY,
        value_parser = clap::builder::FalseyValueParser::new()
    )]
    pub watch_tty: bool,
}

impl GlobalFlags {
    pub fn options(&self) -> anyhow::Result<ShimOptions> {
        let watch_tty = self.watch_tty.to_string();
        let options = ShimOptions::from_lookup(|key| match key {
            envs::DOCKER_HOST => Some(self.docker_host.clone()),
            envs::PARENT_CONTAINER_NAME => Some(self.parent_name.clone()),
            envs::CHILD_CONTAINER_NAME => Some(self.child_name.clone()),
            envs::PARENT_MOUNT_PATH => Some(self.parent_mount_path.clone()),
            envs::CHILD_MOUNT_PATH => Some(self.child_mount_path.clone()),
            envs::SHIM_IMAGE => self.image.clone(),
            envs::SHIM_HELPER_BIN => self.helper_bin.clone(),
            envs::SHIM_WATCH_TTY => Some(watch_tty.clone()),
            _ => None,
        })?;
        Ok(options)
    }

    pub async fn connect(&self) -> anyhow::Result<Shim> {
        let options = self.options()?;
        tracing::debug!(?options, "connecting");
        Ok(Shim::connect(options).await?)
    }
}
