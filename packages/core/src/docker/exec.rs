//! Running commands inside a container

use super::runtime::ExecOutput;
use super::{DockerClient, DockerError};
use bollard::container::LogOutput;
use bollard::exec::{CreateExecOptions, StartExecResults};
use futures_util::StreamExt;
use tracing::debug;

/// Run a command in a running container and wait for it to exit
///
/// stdout and stderr are collected together in arrival order.
pub async fn exec_command(
    client: &DockerClient,
    container: &str,
    cmd: &[&str],
) -> Result<ExecOutput, DockerError> {
    debug!("Exec in {}: {}", container, cmd.join(" "));

    let exec_config = CreateExecOptions {
        attach_stdout: Some(true),
        attach_stderr: Some(true),
        cmd: Some(cmd.iter().map(|s| s.to_string()).collect()),
        ..Default::default()
    };

    let exec = client
        .inner()
        .create_exec(container, exec_config)
        .await
        .map_err(|e| DockerError::Exec(format!("Failed to create exec in {container}: {e}")))?;

    let mut output = String::new();
    match client
        .inner()
        .start_exec(&exec.id, None)
        .await
        .map_err(|e| DockerError::Exec(format!("Failed to start exec in {container}: {e}")))?
    {
        StartExecResults::Attached {
            output: mut stream, ..
        } => {
            while let Some(chunk) = stream.next().await {
                let chunk = chunk
                    .map_err(|e| DockerError::Exec(format!("Exec output stream failed: {e}")))?;
                if let Some(text) = log_output_text(chunk) {
                    output.push_str(&text);
                }
            }
        }
        StartExecResults::Detached => {
            return Err(DockerError::Exec(
                "Exec unexpectedly detached".to_string(),
            ));
        }
    }

    let inspect = client
        .inner()
        .inspect_exec(&exec.id)
        .await
        .map_err(|e| DockerError::Exec(format!("Failed to inspect exec: {e}")))?;
    // A missing exit code means the process never reported one
    let exit_code = inspect.exit_code.unwrap_or(-1);
    debug!("Exec in {} exited with {}", container, exit_code);

    Ok(ExecOutput { exit_code, output })
}

pub(crate) fn log_output_text(output: LogOutput) -> Option<String> {
    match output {
        LogOutput::StdOut { message } | LogOutput::StdErr { message } => {
            Some(String::from_utf8_lossy(&message).to_string())
        }
        LogOutput::Console { message } => Some(String::from_utf8_lossy(&message).to_string()),
        LogOutput::StdIn { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn stdin_echo_is_ignored() {
        let out = LogOutput::StdIn {
            message: Bytes::from_static(b"typed"),
        };
        assert_eq!(log_output_text(out), None);
    }

    #[test]
    fn stdout_and_stderr_are_text() {
        let out = LogOutput::StdOut {
            message: Bytes::from_static(b"64 bytes from 127.0.0.1"),
        };
        assert_eq!(log_output_text(out).as_deref(), Some("64 bytes from 127.0.0.1"));

        let err = LogOutput::StdErr {
            message: Bytes::from_static(b"ping: bad address"),
        };
        assert_eq!(log_output_text(err).as_deref(), Some("ping: bad address"));
    }
}
