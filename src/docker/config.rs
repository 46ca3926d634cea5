use std::fmt;
use std::io::Read;
use std::time::Duration;

/// Capability to accumulate arguments and file mounts before a container is created.
pub trait LaunchRequest {
    fn append_argument(&mut self, token: String);

    fn append_file_mount(&mut self, source: Box<dyn Read + Send>, path: &str, mode: u32);
}

/// A byte stream to materialize inside the container before it starts
pub struct ContainerFile {
    pub reader: Box<dyn Read + Send>,
    pub container_path: String,
    pub mode: u32,
}

impl fmt::Debug for ContainerFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerFile")
            .field("container_path", &self.container_path)
            .field("mode", &format_args!("{:o}", self.mode))
            .finish_non_exhaustive()
    }
}

/// Everything the Docker client needs to create, start and await a container
#[derive(Debug)]
pub struct ContainerRequest {
    pub image: String,
    pub cmd: Vec<String>,
    pub exposed_ports: Vec<u16>,
    pub files: Vec<ContainerFile>,
    pub name: Option<String>,
    /// Log line that marks the container as ready
    pub wait_for_log: Option<String>,
    pub startup_timeout: Duration,
}

impl ContainerRequest {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            cmd: Vec::new(),
            exposed_ports: Vec::new(),
            files: Vec::new(),
            name: None,
            wait_for_log: None,
            startup_timeout: Duration::from_secs(60),
        }
    }

    /// Container ports in the `<port>/tcp` form Docker expects
    pub fn exposed_port_keys(&self) -> Vec<String> {
        self.exposed_ports
            .iter()
            .map(|port| format!("{}/tcp", port))
            .collect()
    }
}

impl LaunchRequest for ContainerRequest {
    fn append_argument(&mut self, token: String) {
        self.cmd.push(token);
    }

    fn append_file_mount(&mut self, source: Box<dyn Read + Send>, path: &str, mode: u32) {
        self.files.push(ContainerFile {
            reader: source,
            container_path: path.to_string(),
            mode,
        });
    }
}
