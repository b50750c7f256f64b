use anyhow::Result;
use clap::Parser;
use restbackup::tar::TarCli;

#[tokio::main]
async fn main() -> Result<()> {
    restbackup::setup_logger();
    let cli = TarCli::parse();
    restbackup::tar::run(cli).await
}
