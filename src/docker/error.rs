use std::time::Duration;

/// Failures raised while turning a request into a running container
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("failed to read contents staged for {path}")]
    FileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to build the archive of staged files")]
    Archive(#[source] std::io::Error),

    #[error("container did not log {expected:?} within {timeout:?}")]
    WaitTimeout { expected: String, timeout: Duration },

    #[error("container {0} stopped before it became ready")]
    ExitedEarly(String),

    #[error("container port {0}/tcp is not published to the host")]
    PortNotMapped(u16),

    #[error(transparent)]
    Docker(#[from] bollard::errors::Error),
}
