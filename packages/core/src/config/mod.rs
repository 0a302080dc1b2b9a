//! Pipeline configuration
//!
//! `PipelineConfig` is the persistent part (optional JSONC file plus CLI
//! overrides); `PipelineOptions` carries the per-run choices. Environment
//! variables are read once by the caller and passed in here.

pub mod schema;
pub mod validation;

pub use schema::{CONFIG_VERSION, ExtensionPolicy, PipelineConfig, SourcesConfig};
pub use validation::{
    ValidationError, ValidationWarning, display_validation_error, display_validation_warning,
    username_namespace, validate_config, validate_options,
};

use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Environment variable holding the registry username
pub const USERNAME_ENV: &str = "DOCKER_USERNAME";

/// Environment variable holding the registry token
pub const TOKEN_ENV: &str = "DOCKER_TOKEN";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    #[error("Invalid config file {}: {source}", path.display())]
    Schema {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

/// Load a JSONC config file
///
/// Comments and trailing commas are accepted. An empty file yields the
/// defaults. Unknown fields are rejected.
pub fn load_config(path: &Path) -> Result<PipelineConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config = parse_config(&text).map_err(|e| match e {
        ParseFailure::Syntax(message) => ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        },
        ParseFailure::Schema(source) => ConfigError::Schema {
            path: path.to_path_buf(),
            source,
        },
    })?;
    debug!("Loaded config from {}", path.display());
    Ok(config)
}

enum ParseFailure {
    Syntax(String),
    Schema(serde_json::Error),
}

fn parse_config(text: &str) -> Result<PipelineConfig, ParseFailure> {
    let value = jsonc_parser::parse_to_serde_value(text, &Default::default())
        .map_err(|e| ParseFailure::Syntax(e.to_string()))?;
    match value {
        Some(value) => serde_json::from_value(value).map_err(ParseFailure::Schema),
        None => Ok(PipelineConfig::default()),
    }
}

/// Registry login
///
/// `Debug` never prints the token.
#[derive(Clone, PartialEq, Eq)]
pub struct RegistryCredentials {
    pub username: String,
    pub token: String,
}

impl RegistryCredentials {
    pub fn new(username: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            token: token.into(),
        }
    }
}

impl std::fmt::Debug for RegistryCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryCredentials")
            .field("username", &self.username)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Resolve credentials from flags, then the environment
///
/// Each value is resolved independently; blank values count as missing.
/// Returns `None` unless both username and token are present.
pub fn resolve_credentials<E>(
    username_flag: Option<&str>,
    token_flag: Option<&str>,
    env: E,
) -> Option<RegistryCredentials>
where
    E: Fn(&str) -> Option<String>,
{
    let pick = |flag: Option<&str>, var: &str| -> Option<String> {
        flag.map(str::to_string)
            .filter(|v| !v.trim().is_empty())
            .or_else(|| env(var).filter(|v| !v.trim().is_empty()))
    };

    let username = pick(username_flag, USERNAME_ENV)?;
    let token = pick(token_flag, TOKEN_ENV)?;
    Some(RegistryCredentials { username, token })
}

/// Per-run choices that do not belong in the config file
#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    /// Registry login; publishing requires it
    pub credentials: Option<RegistryCredentials>,
    /// Push was requested explicitly with --auto-push
    pub auto_push: bool,
    /// Write the versions file after resolution
    pub output_versions: bool,
    /// Pinned PHP version (skips lookup)
    pub php_version: Option<String>,
    /// Pinned MediaWiki version (skips lookup)
    pub mediawiki_version: Option<String>,
}
