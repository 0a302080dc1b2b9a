//! Docker client wrapper with connection handling

use super::DockerError;
use bollard::Docker;
use tracing::debug;

/// Handle to the local Docker daemon
#[derive(Clone)]
pub struct DockerClient {
    inner: Docker,
}

impl DockerClient {
    /// Connect using the platform default socket or `DOCKER_HOST`
    pub fn new() -> Result<Self, DockerError> {
        let inner = Docker::connect_with_local_defaults().map_err(DockerError::from)?;
        Ok(Self { inner })
    }

    /// Ping the daemon so connection problems surface before any real work
    pub async fn verify_connection(&self) -> Result<(), DockerError> {
        self.inner.ping().await.map_err(DockerError::from)?;
        debug!("Docker daemon responded to ping");
        Ok(())
    }

    /// Access the underlying bollard client
    pub fn inner(&self) -> &Docker {
        &self.inner
    }
}
