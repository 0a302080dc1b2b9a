//! The container-engine seam
//!
//! Everything the pipeline needs from Docker goes through `ImageRuntime`.
//! `DockerClient` implements it with bollard; tests substitute a fake.

use super::progress::ProgressReporter;
use super::reference::ImageReference;
use super::{DockerClient, DockerError, container, exec, image, registry};
use crate::config::RegistryCredentials;
use std::collections::HashMap;
use std::path::Path;

/// Inputs for one image build
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildRequest {
    /// Tag the image is built under (`repo:tag`)
    pub tag: String,
    pub build_args: HashMap<String, String>,
    pub labels: HashMap<String, String>,
    pub no_cache: bool,
}

/// Snapshot of a container's state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerStatus {
    pub running: bool,
    /// Docker state name: created, running, exited, ...
    pub state: String,
    /// Health status when the image declares a HEALTHCHECK
    pub health: Option<String>,
}

impl ContainerStatus {
    pub fn is_healthy(&self) -> bool {
        self.health.as_deref() == Some(HEALTHY)
    }
}

pub const HEALTHY: &str = "healthy";

/// Result of a command run inside a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: i64,
    /// Combined stdout and stderr
    pub output: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

#[allow(async_fn_in_trait)]
pub trait ImageRuntime {
    /// Build an image from a directory holding a Dockerfile; returns the image id
    async fn build_image(
        &self,
        context_dir: &Path,
        request: &BuildRequest,
        progress: &mut ProgressReporter,
    ) -> Result<String, DockerError>;

    /// Add another tag to an existing local image
    async fn tag_image(&self, source: &str, target: &ImageReference) -> Result<(), DockerError>;

    /// Create and start a detached container, replacing any leftover with the same name
    async fn start_test_container(&self, name: &str, image: &str) -> Result<String, DockerError>;

    async fn container_status(&self, name: &str) -> Result<ContainerStatus, DockerError>;

    async fn exec(&self, name: &str, cmd: &[&str]) -> Result<ExecOutput, DockerError>;

    /// Last `lines` lines of container output
    async fn tail_logs(&self, name: &str, lines: usize) -> Result<Vec<String>, DockerError>;

    /// Force-remove a container; absent containers are not an error
    async fn remove_container(&self, name: &str) -> Result<(), DockerError>;

    /// Check the credentials against the registry before pushing
    async fn authenticate(
        &self,
        reference: &ImageReference,
        credentials: &RegistryCredentials,
    ) -> Result<(), DockerError>;

    async fn push_image(
        &self,
        reference: &ImageReference,
        credentials: &RegistryCredentials,
        progress: &mut ProgressReporter,
    ) -> Result<(), DockerError>;
}

impl ImageRuntime for DockerClient {
    async fn build_image(
        &self,
        context_dir: &Path,
        request: &BuildRequest,
        progress: &mut ProgressReporter,
    ) -> Result<String, DockerError> {
        image::build_image(self, context_dir, request, progress).await
    }

    async fn tag_image(&self, source: &str, target: &ImageReference) -> Result<(), DockerError> {
        image::tag_image(self, source, target).await
    }

    async fn start_test_container(&self, name: &str, image: &str) -> Result<String, DockerError> {
        container::start_test_container(self, name, image).await
    }

    async fn container_status(&self, name: &str) -> Result<ContainerStatus, DockerError> {
        container::container_status(self, name).await
    }

    async fn exec(&self, name: &str, cmd: &[&str]) -> Result<ExecOutput, DockerError> {
        exec::exec_command(self, name, cmd).await
    }

    async fn tail_logs(&self, name: &str, lines: usize) -> Result<Vec<String>, DockerError> {
        container::tail_logs(self, name, lines).await
    }

    async fn remove_container(&self, name: &str) -> Result<(), DockerError> {
        container::remove_container(self, name).await
    }

    async fn authenticate(
        &self,
        reference: &ImageReference,
        credentials: &RegistryCredentials,
    ) -> Result<(), DockerError> {
        registry::authenticate(reference, credentials).await
    }

    async fn push_image(
        &self,
        reference: &ImageReference,
        credentials: &RegistryCredentials,
        progress: &mut ProgressReporter,
    ) -> Result<(), DockerError> {
        image::push_image(self, reference, credentials, progress).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn healthy_requires_health_status() {
        let mut status = ContainerStatus {
            running: true,
            state: "running".to_string(),
            health: None,
        };
        assert!(!status.is_healthy());
        status.health = Some("starting".to_string());
        assert!(!status.is_healthy());
        status.health = Some("healthy".to_string());
        assert!(status.is_healthy());
    }

    #[test]
    fn exec_success_is_exit_zero() {
        let ok = ExecOutput {
            exit_code: 0,
            output: String::new(),
        };
        let failed = ExecOutput {
            exit_code: 1,
            ..ok.clone()
        };
        assert!(ok.success());
        assert!(!failed.success());
    }
}
