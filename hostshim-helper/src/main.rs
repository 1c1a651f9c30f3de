//! In-container helper for hostshim.
//!
//! Runs inside the child container against the bind-mounted host tree.
//! Results go to stdout, failures to stderr with a non-zero exit code.
//! Nothing else may be written to stderr: the parent treats any stderr
//! output as failure.

mod files;
mod watch;

use clap::{Parser, Subcommand};
use hostshim_shared::constants::{envs, helper::WRITE_OK};
use hostshim_shared::errors::ShimResult;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Log file written under `HOSTSHIM_HELPER_LOG_DIR`.
const LOG_FILE: &str = "helper.log";

#[derive(Parser, Debug)]
#[command(author, version, about = "hostshim helper - file access inside the shim child")]
struct HelperArgs {
    #[command(subcommand)]
    command: HelperCommand,
}

#[derive(Subcommand, Debug)]
enum HelperCommand {
    /// Print a file's contents unchanged
    Read { path: PathBuf },

    /// Replace a file's contents and print `true`
    Write {
        path: PathBuf,

        /// New contents (empty allowed)
        #[arg(allow_hyphen_values = true)]
        content: String,

        /// Content is base64 encoded
        #[arg(long)]
        base64: bool,
    },

    /// Print `add|unlink|change <name>` lines until 0x03 arrives on stdin
    Watch { path: PathBuf },
}

/// File logging, enabled only when the log directory variable is set.
fn init_logging() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let dir = std::env::var_os(envs::HELPER_LOG_DIR)?;
    std::fs::create_dir_all(&dir).ok()?;

    let file_appender = tracing_appender::rolling::never(dir, LOG_FILE);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_target(true)
                .with_ansi(false),
        )
        .try_init();
    Some(guard)
}

fn run(command: HelperCommand) -> ShimResult<()> {
    match command {
        HelperCommand::Read { path } => {
            let stdout = std::io::stdout();
            files::read_to(&path, &mut stdout.lock())
        }
        HelperCommand::Write {
            path,
            content,
            base64,
        } => {
            let bytes = files::decode_content(&content, base64)?;
            files::write_file(&path, &bytes)?;
            let mut stdout = std::io::stdout().lock();
            writeln!(stdout, "{WRITE_OK}")?;
            stdout.flush()?;
            Ok(())
        }
        HelperCommand::Watch { path } => watch::run(&path),
    }
}

fn main() -> ExitCode {
    let args = HelperArgs::parse();
    let _log_guard = init_logging();
    tracing::debug!(?args, "helper starting");

    match run(args.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "helper failed");
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}
