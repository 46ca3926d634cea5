use anyhow::{Context, Result};
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, LogsOptions, RemoveContainerOptions,
    StartContainerOptions, UploadToContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::CreateImageInfo;
use bollard::Docker;
use bytes::Bytes;
use futures::StreamExt;
use std::collections::HashMap;
use std::future::Future;
use std::io::Read;

use super::config::{ContainerFile, ContainerRequest};
use super::error::LaunchError;

/// Docker client wrapper for natsbox operations
#[derive(Clone)]
pub struct DockerClient {
    docker: Docker,
}

impl DockerClient {
    /// Create a new Docker client
    pub async fn new() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .context("Failed to connect to Docker daemon. Is Docker running?")?;

        // Verify connection
        docker
            .ping()
            .await
            .context("Failed to ping Docker daemon")?;

        Ok(Self { docker })
    }

    /// Pull the image unless it is already present locally
    pub async fn ensure_image(&self, image: &str) -> Result<(), LaunchError> {
        match self.docker.inspect_image(image).await {
            Ok(_) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => {
                tracing::info!("Pulling image {}", image);
                self.pull_image(image).await
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Pull a Docker image from a registry
    pub async fn pull_image(&self, image: &str) -> Result<(), LaunchError> {
        let options = Some(CreateImageOptions {
            from_image: image,
            ..Default::default()
        });

        let mut stream = self.docker.create_image(options, None, None);

        while let Some(result) = stream.next().await {
            let info = result?;
            if is_pull_milestone(&info) {
                tracing::info!(
                    "{}: {}",
                    info.id.as_deref().unwrap_or(image),
                    info.status.as_deref().unwrap_or_default()
                );
            } else if let Some(status) = info.status {
                tracing::debug!("Pull status: {}", status);
            }
        }

        Ok(())
    }

    /// Create, populate and start a container, then wait until it reports ready.
    ///
    /// Staged files are read here, once, and copied into the container before
    /// it starts. If any step after creation fails the container is removed.
    pub async fn launch(&self, request: ContainerRequest) -> Result<String, LaunchError> {
        self.ensure_image(&request.image).await?;

        let exposed: HashMap<String, HashMap<(), ()>> = request
            .exposed_port_keys()
            .into_iter()
            .map(|key| (key, HashMap::new()))
            .collect();

        let ContainerRequest {
            image,
            cmd,
            files,
            name,
            wait_for_log,
            startup_timeout,
            ..
        } = request;

        let archive = if files.is_empty() {
            None
        } else {
            Some(build_archive(files)?)
        };

        let host_config = bollard::models::HostConfig {
            publish_all_ports: Some(true),
            ..Default::default()
        };

        let container_config = Config {
            image: Some(image),
            cmd: Some(cmd),
            exposed_ports: Some(exposed),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = name.map(|name| CreateContainerOptions {
            name,
            platform: None,
        });

        let response = self
            .docker
            .create_container(options, container_config)
            .await?;
        let container_id = response.id;
        tracing::debug!("Created container {}", container_id);

        let started = async {
            if let Some(archive) = archive {
                let options = UploadToContainerOptions {
                    path: "/".to_string(),
                    ..Default::default()
                };
                self.docker
                    .upload_to_container(&container_id, Some(options), archive)
                    .await?;
            }

            self.docker
                .start_container(&container_id, None::<StartContainerOptions<String>>)
                .await?;

            if let Some(expected) = wait_for_log {
                tokio::time::timeout(startup_timeout, self.wait_for_log(&container_id, &expected))
                    .await
                    .map_err(|_| LaunchError::WaitTimeout {
                        expected: expected.clone(),
                        timeout: startup_timeout,
                    })??;
            }

            Ok::<(), LaunchError>(())
        }
        .await;

        remove_on_error(started, async {
            tracing::debug!("Removing container {} after failed start", container_id);
            self.remove_container(&container_id, true).await.ok();
        })
        .await?;

        Ok(container_id)
    }

    /// Follow the container logs until a line contains `expected`
    async fn wait_for_log(&self, container_id: &str, expected: &str) -> Result<(), LaunchError> {
        let log_options = LogsOptions::<String> {
            follow: true,
            stdout: true,
            stderr: true,
            ..Default::default()
        };

        let mut log_stream = self.docker.logs(container_id, Some(log_options));
        let mut pending = String::new();

        while let Some(result) = log_stream.next().await {
            let output = result?;
            pending.push_str(&output.to_string());

            if pending.contains(expected) {
                tracing::debug!("Container {} is ready", container_id);
                return Ok(());
            }

            // Only the unterminated tail can still complete a match.
            if let Some(idx) = pending.rfind('\n') {
                pending.drain(..=idx);
            }
        }

        Err(LaunchError::ExitedEarly(container_id.to_string()))
    }

    /// Host port that Docker published for a container port
    pub async fn host_port(&self, container_id: &str, port: u16) -> Result<u16, LaunchError> {
        let info = self
            .docker
            .inspect_container(container_id, None::<InspectContainerOptions>)
            .await?;

        let key = format!("{}/tcp", port);
        info.network_settings
            .and_then(|settings| settings.ports)
            .and_then(|ports| ports.get(&key).cloned().flatten())
            .and_then(|bindings| {
                bindings
                    .into_iter()
                    .find_map(|binding| binding.host_port?.parse::<u16>().ok())
            })
            .ok_or(LaunchError::PortNotMapped(port))
    }

    /// Remove a container
    pub async fn remove_container(&self, container_id: &str, force: bool) -> Result<(), LaunchError> {
        let options = RemoveContainerOptions {
            force,
            ..Default::default()
        };
        self.docker.remove_container(container_id, Some(options)).await?;
        Ok(())
    }
}

/// Hand back `outcome`, running `cleanup` first when it is an error
async fn remove_on_error<T, C>(outcome: Result<T, LaunchError>, cleanup: C) -> Result<T, LaunchError>
where
    C: Future<Output = ()>,
{
    if outcome.is_err() {
        cleanup.await;
    }
    outcome
}

/// Pull updates without a progress bar, e.g. "Pull complete"
fn is_pull_milestone(info: &CreateImageInfo) -> bool {
    info.status.is_some() && info.progress.is_none()
}

/// Read every staged file once and pack it into a tar archive rooted at `/`
pub fn build_archive(files: Vec<ContainerFile>) -> Result<Bytes, LaunchError> {
    let mut builder = tar::Builder::new(Vec::new());

    for mut file in files {
        let mut contents = Vec::new();
        file.reader
            .read_to_end(&mut contents)
            .map_err(|source| LaunchError::FileRead {
                path: file.container_path.clone(),
                source,
            })?;

        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(file.mode);

        let entry_path = file.container_path.trim_start_matches('/');
        builder
            .append_data(&mut header, entry_path, contents.as_slice())
            .map_err(LaunchError::Archive)?;
    }

    builder
        .into_inner()
        .map(Bytes::from)
        .map_err(LaunchError::Archive)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    struct BrokenReader;

    impl Read for BrokenReader {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::Other, "stream closed"))
        }
    }

    fn staged(contents: &'static [u8], path: &str, mode: u32) -> ContainerFile {
        ContainerFile {
            reader: Box::new(contents),
            container_path: path.to_string(),
            mode,
        }
    }

    #[test]
    fn archive_keeps_path_mode_and_contents() {
        let archive = build_archive(vec![staged(b"port: 4222\n", "/etc/nats.conf", 0o644)])
            .unwrap();

        let mut reader = tar::Archive::new(&archive[..]);
        let mut entries = reader.entries().unwrap();
        let mut entry = entries.next().unwrap().unwrap();

        assert_eq!(entry.path().unwrap().to_str(), Some("etc/nats.conf"));
        assert_eq!(entry.header().mode().unwrap(), 0o644);

        let mut body = String::new();
        entry.read_to_string(&mut body).unwrap();
        assert_eq!(body, "port: 4222\n");

        drop(entry);
        assert!(entries.next().is_none());
    }

    #[test]
    fn archive_holds_one_entry_per_file() {
        let archive = build_archive(vec![
            staged(b"a", "/etc/a.conf", 0o644),
            staged(b"b", "/etc/b.conf", 0o600),
        ])
        .unwrap();

        let mut reader = tar::Archive::new(&archive[..]);
        let paths: Vec<String> = reader
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().display().to_string())
            .collect();

        assert_eq!(paths, vec!["etc/a.conf", "etc/b.conf"]);
    }

    #[tokio::test]
    async fn failed_start_runs_cleanup() {
        let mut removed = false;
        let outcome: Result<(), LaunchError> = Err(LaunchError::ExitedEarly("abc".to_string()));

        let result = remove_on_error(outcome, async { removed = true }).await;

        assert!(matches!(result, Err(LaunchError::ExitedEarly(id)) if id == "abc"));
        assert!(removed);
    }

    #[tokio::test]
    async fn successful_start_keeps_container() {
        let mut removed = false;

        let result = remove_on_error(Ok(7), async { removed = true }).await;

        assert_eq!(result.unwrap(), 7);
        assert!(!removed);
    }

    #[test]
    fn pull_milestones_are_lines_without_progress() {
        let milestone = CreateImageInfo {
            id: Some("a1b2c3".to_string()),
            status: Some("Pull complete".to_string()),
            ..Default::default()
        };
        let progress = CreateImageInfo {
            status: Some("Downloading".to_string()),
            progress: Some("[=====>    ] 1.2MB/2.4MB".to_string()),
            ..Default::default()
        };

        assert!(is_pull_milestone(&milestone));
        assert!(!is_pull_milestone(&progress));
        assert!(!is_pull_milestone(&CreateImageInfo::default()));
    }

    #[test]
    fn unreadable_stream_names_its_destination() {
        let file = ContainerFile {
            reader: Box::new(BrokenReader),
            container_path: "/etc/nats.conf".to_string(),
            mode: 0o644,
        };

        match build_archive(vec![file]) {
            Err(LaunchError::FileRead { path, .. }) => assert_eq!(path, "/etc/nats.conf"),
            other => panic!("expected FileRead, got {:?}", other.map(|a| a.len())),
        }
    }
}
