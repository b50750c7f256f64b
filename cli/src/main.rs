use anyhow::Result;
use clap::Parser;
use restbackup::cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    restbackup::setup_logger();
    let cli = Cli::parse();
    restbackup::commands::run(cli).await
}
