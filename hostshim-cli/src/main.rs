mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Command};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    hostshim::init_logging();

    let result = match cli.command {
        Command::Ensure => commands::ensure::execute(&cli.global).await,
        Command::Read(args) => commands::read::execute(args, &cli.global).await,
        Command::Write(args) => commands::write::execute(args, &cli.global).await,
        Command::Watch(args) => commands::watch::execute(args, &cli.global).await,
    };

    if let Err(error) = result {
        eprintln!("Error: {error:#}");
        std::process::exit(1);
    }
}
