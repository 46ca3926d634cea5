mod cli;
mod config;
mod docker;
mod nats;
mod utils;

use anyhow::Result;
use clap::Parser;
use cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first so --verbose reaches the logger
    let cli = Cli::parse();

    utils::logger::init(cli.verbose)?;

    cli.execute().await
}
