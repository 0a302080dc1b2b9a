//! Test container lifecycle
//!
//! The smoke test runs the freshly built image in a detached container,
//! inspects its state and health, reads its logs, and removes it.

use super::exec::log_output_text;
use super::runtime::ContainerStatus;
use super::{DockerClient, DockerError};
use bollard::models::ContainerCreateBody;
use bollard::query_parameters::{
    CreateContainerOptions, LogsOptions, RemoveContainerOptions, StartContainerOptions,
};
use futures_util::StreamExt;
use tracing::debug;

/// Create and start a container from `image`
///
/// A stale container with the same name (left behind by an interrupted
/// run) is removed first. Returns the container id.
pub async fn start_test_container(
    client: &DockerClient,
    name: &str,
    image: &str,
) -> Result<String, DockerError> {
    if container_exists(client, name).await? {
        debug!("Removing leftover container {}", name);
        remove_container(client, name).await?;
    }

    let config = ContainerCreateBody {
        image: Some(image.to_string()),
        hostname: Some(name.to_string()),
        ..Default::default()
    };
    let options = CreateContainerOptions {
        name: Some(name.to_string()),
        platform: String::new(),
    };

    let response = client
        .inner()
        .create_container(Some(options), config)
        .await
        .map_err(|e| DockerError::Container(format!("Failed to create container {name}: {e}")))?;
    debug!("Container created with ID: {}", response.id);

    client
        .inner()
        .start_container(name, None::<StartContainerOptions>)
        .await
        .map_err(|e| DockerError::Container(format!("Failed to start container {name}: {e}")))?;
    debug!("Container {} started", name);

    Ok(response.id)
}

/// Force-remove a container and its anonymous volumes
///
/// A container that no longer exists counts as removed.
pub async fn remove_container(client: &DockerClient, name: &str) -> Result<(), DockerError> {
    debug!("Removing container {}", name);

    let options = RemoveContainerOptions {
        force: true,
        v: true,
        link: false,
    };

    match client.inner().remove_container(name, Some(options)).await {
        Ok(()) => {
            debug!("Container {} removed", name);
            Ok(())
        }
        Err(bollard::errors::Error::DockerResponseServerError {
            status_code: 404, ..
        }) => {
            debug!("Container {} already gone", name);
            Ok(())
        }
        Err(e) => Err(DockerError::Container(format!(
            "Failed to remove container {name}: {e}"
        ))),
    }
}

pub async fn container_exists(client: &DockerClient, name: &str) -> Result<bool, DockerError> {
    match client.inner().inspect_container(name, None).await {
        Ok(_) => Ok(true),
        Err(bollard::errors::Error::DockerResponseServerError {
            status_code: 404, ..
        }) => Ok(false),
        Err(e) => Err(DockerError::Container(format!(
            "Failed to inspect container {name}: {e}"
        ))),
    }
}

/// Running flag, state name and health status of a container
///
/// A container that has disappeared reports as not running.
pub async fn container_status(
    client: &DockerClient,
    name: &str,
) -> Result<ContainerStatus, DockerError> {
    match client.inner().inspect_container(name, None).await {
        Ok(info) => {
            let state = info.state.unwrap_or_default();
            Ok(ContainerStatus {
                running: state.running.unwrap_or(false),
                state: state
                    .status
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "unknown".to_string()),
                health: state
                    .health
                    .and_then(|h| h.status)
                    .map(|s| s.to_string()),
            })
        }
        Err(bollard::errors::Error::DockerResponseServerError {
            status_code: 404, ..
        }) => Ok(ContainerStatus {
            running: false,
            state: "removed".to_string(),
            health: None,
        }),
        Err(e) => Err(DockerError::Container(format!(
            "Failed to inspect container {name}: {e}"
        ))),
    }
}

/// Last `lines` lines of a container's stdout and stderr
pub async fn tail_logs(
    client: &DockerClient,
    name: &str,
    lines: usize,
) -> Result<Vec<String>, DockerError> {
    let options = LogsOptions {
        stdout: true,
        stderr: true,
        follow: false,
        tail: lines.to_string(),
        ..Default::default()
    };

    let mut stream = client.inner().logs(name, Some(options));
    let mut text = String::new();
    while let Some(result) = stream.next().await {
        let output = result
            .map_err(|e| DockerError::Container(format!("Failed to read logs for {name}: {e}")))?;
        if let Some(chunk) = log_output_text(output) {
            text.push_str(&chunk);
        }
    }

    Ok(split_log_lines(&text, lines))
}

fn split_log_lines(text: &str, limit: usize) -> Vec<String> {
    let lines: Vec<String> = text
        .lines()
        .map(|line| line.trim_end_matches('\r').to_string())
        .filter(|line| !line.trim().is_empty())
        .collect();
    let skip = lines.len().saturating_sub(limit);
    lines.into_iter().skip(skip).collect()
}
