//! Output utilities for CLI commands
//!
//! Spinners with elapsed time for long-running steps, color helpers for
//! check states and container logs, and rich error rendering.

pub mod colors;
pub mod errors;
pub mod spinner;

pub use colors::source_style;
pub use errors::{format_docker_error_anyhow, show_docker_error, show_smoke_failure};
pub use spinner::{CommandSpinner, format_elapsed};
