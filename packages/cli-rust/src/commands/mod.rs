//! CLI command implementations
//!
//! Every command starts from the same settings flags: an optional JSONC
//! config file, overridden by flags, then validated.

mod build;
mod generate;
mod versions;

pub use build::{BuildArgs, cmd_build};
pub use generate::{GenerateArgs, cmd_generate};
pub use versions::{VersionsArgs, cmd_versions};

use anyhow::{Result, anyhow};
use clap::Args;
use mediawiki_image_core::config::{
    display_validation_error, display_validation_warning, validate_config, validate_options,
};
use mediawiki_image_core::{
    ExtensionPolicy, HttpFetcher, PipelineConfig, PipelineOptions, load_config,
};
use std::path::PathBuf;
use tracing::debug;

/// Config file and override flags shared by all commands
#[derive(Args, Debug, Clone, Default)]
pub struct SettingsArgs {
    /// JSONC config file (comments and trailing commas allowed)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Directory the Dockerfile and health-check script are written to
    #[arg(long, value_name = "DIR")]
    pub work_dir: Option<PathBuf>,

    /// Registry host (default: docker.io)
    #[arg(long)]
    pub registry: Option<String>,

    /// Repository namespace (default: registry username, else "local")
    #[arg(long)]
    pub namespace: Option<String>,

    /// Repository name (default: mediawiki)
    #[arg(long)]
    pub image_name: Option<String>,

    /// Fail the build when a PHP extension package is unavailable
    #[arg(long)]
    pub strict_extensions: bool,

    /// Pin the PHP version instead of looking it up
    #[arg(long, value_name = "MAJOR.MINOR")]
    pub php_version: Option<String>,

    /// Pin the MediaWiki version instead of looking it up
    #[arg(long, value_name = "X.Y.Z")]
    pub mediawiki_version: Option<String>,

    /// Path written by --output-versions (default: versions.env)
    #[arg(long, value_name = "PATH")]
    pub versions_file: Option<PathBuf>,
}

impl SettingsArgs {
    /// Load the config file (or defaults), apply flag overrides and validate
    pub fn load_config(&self, quiet: bool) -> Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => load_config(path)?,
            None => PipelineConfig::default(),
        };
        self.apply_overrides(&mut config);

        match validate_config(&config) {
            Ok(warnings) => {
                if !quiet {
                    for warning in &warnings {
                        display_validation_warning(warning);
                    }
                }
            }
            Err(error) => {
                display_validation_error(&error);
                return Err(anyhow!("Configuration is invalid"));
            }
        }

        debug!("Effective config: {config:?}");
        Ok(config)
    }

    fn apply_overrides(&self, config: &mut PipelineConfig) {
        if let Some(dir) = &self.work_dir {
            config.work_dir = dir.clone();
        }
        if let Some(registry) = &self.registry {
            config.registry = registry.clone();
        }
        if let Some(namespace) = &self.namespace {
            config.namespace = Some(namespace.clone());
        }
        if let Some(name) = &self.image_name {
            config.image_name = name.clone();
        }
        if self.strict_extensions {
            config.extension_policy = ExtensionPolicy::Strict;
        }
        if let Some(path) = &self.versions_file {
            config.versions_file = path.clone();
        }
    }

    /// Per-run options carrying the pinned versions, validated
    pub fn pinned_options(&self) -> Result<PipelineOptions> {
        let options = PipelineOptions {
            php_version: self.php_version.clone(),
            mediawiki_version: self.mediawiki_version.clone(),
            ..PipelineOptions::default()
        };
        if let Err(error) = validate_options(&options) {
            display_validation_error(&error);
            return Err(anyhow!("Pinned version is invalid"));
        }
        Ok(options)
    }
}

/// HTTP client for upstream version lookups
pub fn http_fetcher(config: &PipelineConfig) -> Result<HttpFetcher> {
    Ok(HttpFetcher::new(
        config.http_connect_timeout(),
        config.http_request_timeout(),
    )?)
}
