//! Centralized error formatting
//!
//! Actionable Docker error messages and smoke test diagnostics, shared by
//! every command.

use super::colors::{check_status_style, log_level_style};
use anyhow::anyhow;
use console::style;
use mediawiki_image_core::docker::DockerError;
use mediawiki_image_core::{CheckStatus, TestOutcome};

/// Format Docker errors with actionable guidance
pub fn format_docker_error(e: &DockerError) -> String {
    match e {
        DockerError::NotRunning => {
            format!(
                "{}\n\n  {}\n  {}\n  {}",
                style("Docker is not responding").red().bold(),
                "Start or restart the Docker daemon:",
                style("  Linux:  sudo systemctl start docker").cyan(),
                style("  macOS:  open -a Docker").cyan(),
            )
        }
        DockerError::SocketNotFound => {
            format!(
                "{}\n\n  {}\n  {}\n  {}\n  {}",
                style("Docker socket not found").red().bold(),
                "Docker may not be installed or the service isn't running:",
                style("  Linux:  sudo apt-get install docker.io").cyan(),
                style("  Linux:  sudo systemctl enable --now docker").cyan(),
                "Then verify the socket exists at /var/run/docker.sock, or set DOCKER_HOST.",
            )
        }
        DockerError::PermissionDenied => {
            format!(
                "{}\n\n  {}\n  {}\n\n  {}\n  {}\n  {}",
                style("Permission denied accessing Docker").red().bold(),
                "Your user likely lacks access to the Docker socket.",
                style("  Check: ls -l /var/run/docker.sock").cyan(),
                "Fix (Linux):",
                style("  sudo usermod -aG docker $USER").cyan(),
                "Then log out and back in (or run: newgrp docker).",
            )
        }
        DockerError::Connection(msg) => {
            format!(
                "{}\n\n  {}",
                style("Cannot connect to Docker").red().bold(),
                msg
            )
        }
        DockerError::Registry(msg) | DockerError::Push(msg)
            if msg.contains("401") || msg.contains("unauthorized") || msg.contains("denied") =>
        {
            format!(
                "{}\n\n  {}\n  {}",
                style("Registry rejected the credentials").red().bold(),
                msg,
                style("  Check --username/--token or DOCKER_USERNAME/DOCKER_TOKEN").cyan(),
            )
        }
        _ => e.to_string(),
    }
}

/// Format Docker errors as anyhow::Error
pub fn format_docker_error_anyhow(e: &DockerError) -> anyhow::Error {
    anyhow!("{}", format_docker_error(e))
}

/// Show Docker error in a rich format to stderr
pub fn show_docker_error(e: &DockerError) {
    let msg = format_docker_error(e);
    eprintln!();
    eprintln!("{msg}");
}

/// Render smoke test results with the failing check's diagnostics
pub fn format_smoke_failure(outcome: &TestOutcome) -> Vec<String> {
    let mut lines = vec![style("Smoke tests failed").red().bold().to_string(), String::new()];

    for result in outcome.results() {
        lines.push(format!(
            "  {:<12} {}",
            result.check.label(),
            check_status_style(&result.status)
        ));
    }

    let Some((check, failure)) = outcome.first_failure() else {
        return lines;
    };

    lines.push(String::new());
    lines.push(format!("  {}  {}", style("Check:").dim(), check));
    lines.push(format!("  {}  {}", style("Reason:").dim(), failure.reason));
    lines.push(format!("  {}  {}", style("Attempts:").dim(), failure.attempts));
    if let Some(response) = &failure.last_response {
        lines.push(format!("  {}", style("Last response:").dim()));
        lines.extend(response.lines().map(|line| format!("    {line}")));
    }
    if !failure.logs.is_empty() {
        lines.push(format!(
            "  {} (last {} lines)",
            style("Container logs:").dim(),
            failure.logs.len()
        ));
        lines.extend(
            failure
                .logs
                .iter()
                .map(|line| format!("    {}", log_level_style(line))),
        );
    }
    if outcome
        .results()
        .iter()
        .any(|r| r.status == CheckStatus::Skipped)
    {
        lines.push(String::new());
        lines.push(format!(
            "  {}",
            style("Later checks were skipped after the first failure.").dim()
        ));
    }
    lines
}

pub fn show_smoke_failure(outcome: &TestOutcome) {
    eprintln!();
    for line in format_smoke_failure(outcome) {
        eprintln!("{line}");
    }
}
