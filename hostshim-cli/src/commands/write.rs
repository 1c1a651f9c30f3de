use anyhow::Context;
use clap::Args;
use std::io::Read;

#[derive(Args, Debug)]
pub struct WriteArgs {
    /// Path inside the child (usually under the child mount path)
    pub path: String,

    /// New contents; read from stdin when omitted
    #[arg(allow_hyphen_values = true)]
    pub content: Option<String>,

    /// Run this shell command in the child instead of the write helper
    #[arg(long)]
    pub command: Option<String>,
}

pub async fn execute(args: WriteArgs, global: &crate::cli::GlobalFlags) -> anyhow::Result<()> {
    let content = match args.content {
        Some(content) => content,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("failed to read content from stdin")?;
            buf
        }
    };

    let shim = global.connect().await?;
    shim.write_with_command(&args.path, &content, args.command.as_deref())
        .await?;
    Ok(())
}
