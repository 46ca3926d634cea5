use std::time::Duration;

use crate::docker::client::DockerClient;
use crate::docker::config::{ContainerRequest, LaunchRequest};
use crate::docker::error::LaunchError;

use super::options::{Customizer, Options};

pub const DEFAULT_IMAGE: &str = "nats:2.9";

/// Port for client connections
pub const CLIENT_PORT: u16 = 4222;
/// Port for clustering routes
pub const ROUTING_PORT: u16 = 6222;
/// Port for the HTTP monitoring endpoint
pub const MONITORING_PORT: u16 = 8222;

/// Printed by the server once it accepts clients
pub const READY_LOG: &str = "Listening for client connections on 0.0.0.0:4222";

/// Debug and verbose logging, JetStream enabled
const DEFAULT_CMD: [&str; 2] = ["-DV", "-js"];

/// Launch settings that are not server flags
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub image: String,
    pub name: Option<String>,
    pub host: String,
    pub startup_timeout: Duration,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            image: DEFAULT_IMAGE.to_string(),
            name: None,
            host: "localhost".to_string(),
            startup_timeout: Duration::from_secs(60),
        }
    }
}

/// A running NATS server
pub struct NatsContainer {
    client: DockerClient,
    id: String,
    host: String,
    client_port: u16,
    monitoring_port: u16,
}

impl NatsContainer {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Host port mapped to a container port
    pub async fn mapped_port(&self, port: u16) -> Result<u16, LaunchError> {
        match port {
            CLIENT_PORT => Ok(self.client_port),
            MONITORING_PORT => Ok(self.monitoring_port),
            _ => self.client.host_port(&self.id, port).await,
        }
    }

    /// URL for NATS clients, e.g. `nats://localhost:49153`
    pub fn connection_string(&self) -> String {
        format!("nats://{}:{}", self.host, self.client_port)
    }

    /// URL of the HTTP monitoring endpoint
    pub fn monitoring_url(&self) -> String {
        format!("http://{}:{}", self.host, self.monitoring_port)
    }

    /// Force-remove the container
    pub async fn terminate(self) -> Result<(), LaunchError> {
        tracing::debug!("Removing container {}", self.id);
        self.client.remove_container(&self.id, true).await
    }
}

/// Build the launch request for a NATS server.
///
/// Customizers first contribute server flags, which are rendered after the
/// default command; then each one is applied to the request, in order.
pub fn build_request(
    settings: &RunSettings,
    customizers: Vec<Box<dyn Customizer>>,
) -> Result<ContainerRequest, LaunchError> {
    let mut opts = Options::default();
    for customizer in &customizers {
        customizer.apply_options(&mut opts);
    }

    let mut req = ContainerRequest::new(settings.image.clone());
    req.exposed_ports = vec![CLIENT_PORT, ROUTING_PORT, MONITORING_PORT];
    req.wait_for_log = Some(READY_LOG.to_string());
    req.startup_timeout = settings.startup_timeout;
    req.name = settings.name.clone();

    for token in DEFAULT_CMD.iter().map(|s| s.to_string()).chain(opts.to_args()) {
        req.append_argument(token);
    }

    for customizer in customizers {
        customizer.customize(&mut req)?;
    }

    Ok(req)
}

/// Start a NATS server and wait until it accepts clients
pub async fn run_container(
    client: &DockerClient,
    settings: &RunSettings,
    customizers: Vec<Box<dyn Customizer>>,
) -> Result<NatsContainer, LaunchError> {
    let req = build_request(settings, customizers)?;
    tracing::debug!("Launching {} with {:?}", req.image, req.cmd);

    let id = client.launch(req).await?;

    let ports = async {
        let client_port = client.host_port(&id, CLIENT_PORT).await?;
        let monitoring_port = client.host_port(&id, MONITORING_PORT).await?;
        Ok::<_, LaunchError>((client_port, monitoring_port))
    }
    .await;

    let (client_port, monitoring_port) = match ports {
        Ok(ports) => ports,
        Err(e) => {
            client.remove_container(&id, true).await.ok();
            return Err(e);
        }
    };

    Ok(NatsContainer {
        client: client.clone(),
        id,
        host: settings.host.clone(),
        client_port,
        monitoring_port,
    })
}
