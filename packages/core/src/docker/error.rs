//! Docker-specific error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DockerError {
    #[error("Docker daemon is not running")]
    NotRunning,

    #[error("Docker socket not found")]
    SocketNotFound,

    #[error("Permission denied accessing the Docker socket")]
    PermissionDenied,

    #[error("Docker connection error: {0}")]
    Connection(String),

    #[error("Container error: {0}")]
    Container(String),

    #[error("Exec error: {0}")]
    Exec(String),

    #[error("Image build failed: {0}")]
    Build(String),

    #[error("Image error: {0}")]
    Image(String),

    #[error("Push failed: {0}")]
    Push(String),

    #[error("Registry error: {0}")]
    Registry(String),
}

impl From<bollard::errors::Error> for DockerError {
    fn from(err: bollard::errors::Error) -> Self {
        let msg = err.to_string();
        let lower = msg.to_lowercase();

        if lower.contains("permission denied") {
            DockerError::PermissionDenied
        } else if lower.contains("no such file or directory")
            || lower.contains("socket not found")
        {
            DockerError::SocketNotFound
        } else if lower.contains("connection refused")
            || lower.contains("is the docker daemon running")
            || lower.contains("error trying to connect")
        {
            DockerError::NotRunning
        } else {
            DockerError::Connection(msg)
        }
    }
}

impl DockerError {
    /// True for failures that mean the daemon itself is unreachable
    pub fn is_daemon_unavailable(&self) -> bool {
        matches!(
            self,
            DockerError::NotRunning | DockerError::SocketNotFound | DockerError::PermissionDenied
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_errors_classified() {
        let err: DockerError = bollard::errors::Error::SocketNotFoundError(
            "/var/run/docker.sock".to_string(),
        )
        .into();
        assert!(err.is_daemon_unavailable());
    }

    #[test]
    fn server_errors_stay_connection_errors() {
        let err: DockerError = bollard::errors::Error::DockerResponseServerError {
            status_code: 500,
            message: "internal".to_string(),
        }
        .into();
        assert!(matches!(err, DockerError::Connection(_)));
        assert!(!err.is_daemon_unavailable());
    }

    #[test]
    fn display_includes_detail() {
        let err = DockerError::Build("step 4 failed".to_string());
        assert_eq!(err.to_string(), "Image build failed: step 4 failed");
    }
}
