pub mod run;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;

use crate::config::settings::Settings;
use crate::docker::client::DockerClient;

#[derive(Parser)]
#[command(name = "natsbox")]
#[command(version)]
#[command(about = "Disposable NATS server containers for tests and local development", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a NATS server and print its connection string
    Run(run::RunArgs),

    /// Remove a NATS server container
    Stop {
        /// Container ID or name
        id: String,
    },

    /// Show the effective settings (~/.natsbox/settings.yaml)
    Settings,
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Run(args) => args.execute().await,
            Commands::Stop { id } => stop(&id).await,
            Commands::Settings => show_settings(),
        }
    }
}

async fn stop(id: &str) -> Result<()> {
    let client = DockerClient::new().await?;
    client
        .remove_container(id, true)
        .await
        .with_context(|| format!("Failed to remove container {}", id))?;

    println!("{} Removed {}", "✓".green().bold(), id);
    Ok(())
}

fn show_settings() -> Result<()> {
    let settings = Settings::load()?;
    print!("{}", serde_yaml::to_string(&settings)?);
    Ok(())
}
