use clap::Args;
use hostshim::WatchListeners;

#[derive(Args, Debug)]
pub struct WatchArgs {
    /// File or directory inside the child
    pub path: String,

    /// Run this shell command in the child instead of the watch helper
    #[arg(long)]
    pub command: Option<String>,
}

pub async fn execute(args: WatchArgs, global: &crate::cli::GlobalFlags) -> anyhow::Result<()> {
    let shim = global.connect().await?;

    let listeners = WatchListeners::new().on_event(|event| println!("{event}"));
    let mut watcher = shim
        .watch_with_command(&args.path, listeners, args.command.as_deref())
        .await?;
    tracing::info!(exec_id = watcher.exec_id(), path = %args.path, "watching");

    let finished = tokio::select! {
        outcome = watcher.wait() => Some(outcome),
        _ = tokio::signal::ctrl_c() => None,
    };

    match finished {
        Some(outcome) => outcome?,
        None => {
            tracing::debug!("interrupted, closing watcher");
            watcher.close();
            watcher.wait().await?;
        }
    }
    Ok(())
}
