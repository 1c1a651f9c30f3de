use clap::Args;
use std::io::Write;

#[derive(Args, Debug)]
pub struct ReadArgs {
    /// Path inside the child (usually under the child mount path)
    pub path: String,

    /// Run this shell command in the child instead of the read helper
    #[arg(long)]
    pub command: Option<String>,
}

pub async fn execute(args: ReadArgs, global: &crate::cli::GlobalFlags) -> anyhow::Result<()> {
    let shim = global.connect().await?;
    let contents = shim
        .read_with_command(&args.path, args.command.as_deref())
        .await?;

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(contents.as_bytes())?;
    stdout.flush()?;
    Ok(())
}
