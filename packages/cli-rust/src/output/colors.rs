//! Color utilities for CLI output
//!
//! Consistent styling for smoke check states and container log levels.

use console::{Style, StyledObject};
use mediawiki_image_core::CheckStatus;
use mediawiki_image_core::versions::VersionSource;

/// Style a check status label
///
/// - passed -> green bold
/// - failed -> red bold
/// - skipped -> dim
pub fn check_status_style(status: &CheckStatus) -> StyledObject<&'static str> {
    match status {
        CheckStatus::Passed { .. } => Style::new().green().bold().apply_to("passed"),
        CheckStatus::Failed(_) => Style::new().red().bold().apply_to("failed"),
        CheckStatus::Skipped => Style::new().dim().apply_to("skipped"),
    }
}

/// Style a version source; anything short of an upstream lookup is yellow
pub fn source_style(source: VersionSource) -> StyledObject<String> {
    let style = match source {
        VersionSource::Primary => Style::new().green(),
        VersionSource::Pinned => Style::new().cyan(),
        VersionSource::Fallback | VersionSource::Default => Style::new().yellow(),
    };
    style.apply_to(source.to_string())
}

/// Style a log line based on detected log level
///
/// - Contains "ERROR", "error" or "fatal" -> red
/// - Contains "WARN" or "warn" -> yellow
/// - Contains "NOTICE" or "notice" -> cyan
/// - Contains "DEBUG" or "debug" -> dim
/// - else -> unstyled
pub fn log_level_style(line: &str) -> StyledObject<&str> {
    let style = if line.contains("ERROR") || line.contains("error") || line.contains("fatal") {
        Style::new().red()
    } else if line.contains("WARN") || line.contains("warn") {
        Style::new().yellow()
    } else if line.contains("NOTICE") || line.contains("notice") {
        Style::new().cyan()
    } else if line.contains("DEBUG") || line.contains("debug") {
        Style::new().dim()
    } else {
        Style::new()
    };
    style.apply_to(line)
}
