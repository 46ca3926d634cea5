use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use std::fs::File;
use std::path::PathBuf;

use crate::config::settings::Settings;
use crate::docker::client::DockerClient;
use crate::nats::container::ROUTING_PORT;
use crate::nats::{self, Customizer, NatsContainer};

#[derive(Args)]
pub struct RunArgs {
    /// NATS image to run (defaults to the image in settings)
    #[arg(long, env = "NATSBOX_IMAGE")]
    pub image: Option<String>,

    /// Username clients must authenticate with
    #[arg(short, long)]
    pub user: Option<String>,

    /// Password clients must authenticate with
    #[arg(short, long)]
    pub pass: Option<String>,

    /// Extra server flag (format: FLAG=VALUE, dashes optional, repeatable)
    #[arg(short, long = "arg", value_name = "FLAG=VALUE", allow_hyphen_values = true)]
    pub args: Vec<String>,

    /// Server configuration file, staged at /etc/nats.conf
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Container name (defaults to natsbox-<random>)
    #[arg(long)]
    pub name: Option<String>,

    /// Leave the server running and exit
    #[arg(short, long)]
    pub detach: bool,

    /// Emit connection details as JSON on stdout
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize)]
struct RunInfo<'a> {
    id: &'a str,
    connection_string: String,
    monitoring_url: String,
    routing_url: String,
}

impl RunArgs {
    pub async fn execute(self) -> Result<()> {
        let customizers = self.customizers()?;

        let settings = Settings::load()?;
        let name = self
            .name
            .clone()
            .unwrap_or_else(|| generated_name(&uuid::Uuid::new_v4()));
        let run_settings = settings.run_settings(self.image.as_deref(), Some(&name));

        let client = DockerClient::new().await?;

        if !self.json {
            println!(
                "{} Starting {} as {}...",
                "=>".blue().bold(),
                run_settings.image.cyan(),
                name
            );
        }

        let container = nats::run_container(&client, &run_settings, customizers)
            .await
            .context("Failed to start NATS container")?;

        let attended = self.attend(&container).await;
        if !should_remove(self.detach, &attended) {
            return Ok(());
        }

        tracing::info!("Stopping {}", container.id());
        let removed = container
            .terminate()
            .await
            .context("Failed to remove NATS container");

        attended?;
        removed?;

        if !self.json {
            println!("{} Server stopped", "✓".green().bold());
        }

        Ok(())
    }

    /// Report the server, then unless detached wait for Ctrl-C
    async fn attend(&self, container: &NatsContainer) -> Result<()> {
        self.report(container).await?;

        if self.detach {
            return Ok(());
        }

        if !self.json {
            println!("Press Ctrl-C to stop the server");
        }
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl-C")
    }

    /// Turn flags into configuration units, in the order they apply
    fn customizers(&self) -> Result<Vec<Box<dyn Customizer>>> {
        let mut customizers: Vec<Box<dyn Customizer>> = Vec::new();

        if let Some(user) = &self.user {
            customizers.push(Box::new(nats::with_username(user)));
        }
        if let Some(pass) = &self.pass {
            customizers.push(Box::new(nats::with_password(pass)));
        }
        for (flag, value) in parse_arguments(&self.args)? {
            customizers.push(Box::new(nats::with_argument(&flag, &value)));
        }
        if let Some(path) = &self.config {
            let file = File::open(path)
                .with_context(|| format!("Failed to open config file: {}", path.display()))?;
            customizers.push(Box::new(nats::with_config_file(Some(file))));
        }

        Ok(customizers)
    }

    async fn report(&self, container: &NatsContainer) -> Result<()> {
        let routing_port = container.mapped_port(ROUTING_PORT).await?;
        let info = RunInfo {
            id: container.id(),
            connection_string: container.connection_string(),
            monitoring_url: container.monitoring_url(),
            routing_url: format!("nats-route://{}:{}", container.host(), routing_port),
        };

        if self.json {
            println!("{}", serde_json::to_string_pretty(&info)?);
            return Ok(());
        }

        println!(
            "{} NATS ready: {}",
            "✓".green().bold(),
            info.connection_string.cyan()
        );
        println!("  {} Monitoring: {}", "•".yellow(), info.monitoring_url);
        println!("  {} Routes: {}", "•".yellow(), info.routing_url);
        println!("  {} Container: {}", "•".yellow(), short_id(info.id));
        Ok(())
    }
}

/// Detached servers stay up unless something went wrong while attending them
fn should_remove(detach: bool, attended: &Result<()>) -> bool {
    !detach || attended.is_err()
}

fn generated_name(id: &uuid::Uuid) -> String {
    format!("natsbox-{}", &id.simple().to_string()[..8])
}

fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}

fn parse_arguments(raw: &[String]) -> Result<Vec<(String, String)>> {
    let mut parsed = Vec::new();

    for arg in raw {
        let parts: Vec<&str> = arg.splitn(2, '=').collect();
        if parts.len() != 2 || parts[0].trim_matches('-').is_empty() {
            anyhow::bail!("Invalid server argument format: {}. Expected FLAG=VALUE", arg);
        }
        parsed.push((parts[0].to_string(), parts[1].to_string()));
    }

    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nats::container::{build_request, RunSettings};

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    fn run_args() -> RunArgs {
        RunArgs {
            image: None,
            user: None,
            pass: None,
            args: Vec::new(),
            config: None,
            name: None,
            detach: false,
            json: false,
        }
    }

    #[test]
    fn arguments_split_on_first_equals() {
        let parsed = parse_arguments(&args(&["--max_payload=2MB", "tag=a=b"])).unwrap();
        assert_eq!(
            parsed,
            vec![
                ("--max_payload".to_string(), "2MB".to_string()),
                ("tag".to_string(), "a=b".to_string()),
            ]
        );
    }

    #[test]
    fn arguments_allow_empty_values() {
        let parsed = parse_arguments(&args(&["no_advertise="])).unwrap();
        assert_eq!(parsed, vec![("no_advertise".to_string(), String::new())]);
    }

    #[test]
    fn arguments_without_value_or_flag_are_rejected() {
        assert!(parse_arguments(&args(&["trace"])).is_err());
        assert!(parse_arguments(&args(&["=1"])).is_err());
        assert!(parse_arguments(&args(&["--=1"])).is_err());
    }

    #[test]
    fn flags_become_customizers_in_order() {
        let mut run = run_args();
        run.user = Some("alice".to_string());
        run.args = args(&["--user=bob", "max_payload=2MB"]);

        let req = build_request(&RunSettings::default(), run.customizers().unwrap()).unwrap();

        assert_eq!(
            req.cmd,
            vec!["-DV", "-js", "--max_payload", "2MB", "--user", "bob"]
        );
    }

    #[test]
    fn config_flag_stages_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nats.conf");
        std::fs::write(&path, "max_connections: 10\n").unwrap();

        let mut run = run_args();
        run.config = Some(path);

        let req = build_request(&RunSettings::default(), run.customizers().unwrap()).unwrap();

        assert_eq!(req.cmd[req.cmd.len() - 2..], ["-config", "/etc/nats.conf"]);
        assert_eq!(req.files.len(), 1);
    }

    #[test]
    fn missing_config_file_is_reported() {
        let mut run = run_args();
        run.config = Some(PathBuf::from("/nonexistent/nats.conf"));

        let err = run.customizers().err().unwrap();
        assert!(err.to_string().contains("Failed to open config file"));
    }

    #[test]
    fn attached_server_is_removed_even_when_waiting_fails() {
        assert!(should_remove(false, &Ok(())));
        assert!(should_remove(
            false,
            &Err(anyhow::anyhow!("Failed to listen for Ctrl-C"))
        ));
    }

    #[test]
    fn detached_server_is_kept_unless_reporting_fails() {
        assert!(!should_remove(true, &Ok(())));
        assert!(should_remove(true, &Err(anyhow::anyhow!("port not mapped"))));
    }

    #[test]
    fn generated_names_are_short() {
        let name = generated_name(&uuid::Uuid::nil());
        assert_eq!(name, "natsbox-00000000");
    }

    #[test]
    fn short_id_tolerates_short_input() {
        assert_eq!(short_id("0123456789abcdef"), "0123456789ab");
        assert_eq!(short_id("abc"), "abc");
    }
}
