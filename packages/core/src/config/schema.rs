//! Configuration schema for mediawiki-image
//!
//! Defines the structure and defaults of the optional JSONC config file.
//! Every field has a default, so an empty object is a valid config.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Current config file version
pub const CONFIG_VERSION: u32 = 1;

/// How the generated Dockerfile treats a PHP extension it cannot install
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtensionPolicy {
    /// Warn and continue the build without the extension
    #[default]
    BestEffort,
    /// Fail the image build
    Strict,
}

/// Upstream URLs used for version discovery
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SourcesConfig {
    /// Alpine community package index (gzip'd tar)
    #[serde(default = "default_php_index_url")]
    pub php_index_url: String,

    /// Same index on a secondary mirror
    #[serde(default = "default_php_index_fallback_url")]
    pub php_index_fallback_url: String,

    /// MediaWiki release listing with `MAJOR.MINOR/` directories
    #[serde(default = "default_mediawiki_releases_url")]
    pub mediawiki_releases_url: String,

    /// MediaWiki repository tag list (JSON)
    #[serde(default = "default_mediawiki_tags_url")]
    pub mediawiki_tags_url: String,
}

fn default_php_index_url() -> String {
    "https://dl-cdn.alpinelinux.org/alpine/latest-stable/community/x86_64/APKINDEX.tar.gz"
        .to_string()
}

fn default_php_index_fallback_url() -> String {
    "https://mirrors.edge.kernel.org/alpine/latest-stable/community/x86_64/APKINDEX.tar.gz"
        .to_string()
}

fn default_mediawiki_releases_url() -> String {
    "https://releases.wikimedia.org/mediawiki/".to_string()
}

fn default_mediawiki_tags_url() -> String {
    "https://api.github.com/repos/wikimedia/mediawiki/tags?per_page=100".to_string()
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            php_index_url: default_php_index_url(),
            php_index_fallback_url: default_php_index_fallback_url(),
            mediawiki_releases_url: default_mediawiki_releases_url(),
            mediawiki_tags_url: default_mediawiki_tags_url(),
        }
    }
}

/// Pipeline configuration
///
/// Loaded from an optional JSONC file and then overridden by CLI flags.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    /// Config file version
    #[serde(default = "default_version")]
    pub version: u32,

    /// Directory the Dockerfile and health-check script are written to (default: "build")
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    /// Base image of the generated Dockerfile; must provide `apk` (default: "alpine:latest")
    #[serde(default = "default_base_image")]
    pub base_image: String,

    /// Registry host the image is pushed to (default: "docker.io")
    #[serde(default = "default_registry")]
    pub registry: String,

    /// Repository namespace; falls back to the registry username
    #[serde(default)]
    pub namespace: Option<String>,

    /// Repository name (default: "mediawiki")
    #[serde(default = "default_image_name")]
    pub image_name: String,

    /// Name of the throwaway smoke-test container
    #[serde(default = "default_container_name")]
    pub container_name: String,

    /// Versions file written with --output-versions (default: "versions.env")
    #[serde(default = "default_versions_file")]
    pub versions_file: PathBuf,

    /// Behavior when a PHP extension package is missing
    #[serde(default)]
    pub extension_policy: ExtensionPolicy,

    /// Build without the layer cache
    #[serde(default)]
    pub no_cache: bool,

    /// Connect timeout for version lookups, in seconds (default: 5)
    #[serde(default = "default_http_connect_timeout_secs")]
    pub http_connect_timeout_secs: u64,

    /// Overall timeout for a single version lookup, in seconds (default: 20)
    #[serde(default = "default_http_request_timeout_secs")]
    pub http_request_timeout_secs: u64,

    #[serde(default)]
    pub sources: SourcesConfig,
}

fn default_version() -> u32 {
    CONFIG_VERSION
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("build")
}

fn default_base_image() -> String {
    "alpine:latest".to_string()
}

fn default_registry() -> String {
    "docker.io".to_string()
}

fn default_image_name() -> String {
    "mediawiki".to_string()
}

fn default_container_name() -> String {
    "mediawiki-smoke-test".to_string()
}

fn default_versions_file() -> PathBuf {
    PathBuf::from("versions.env")
}

fn default_http_connect_timeout_secs() -> u64 {
    5
}

fn default_http_request_timeout_secs() -> u64 {
    20
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            work_dir: default_work_dir(),
            base_image: default_base_image(),
            registry: default_registry(),
            namespace: None,
            image_name: default_image_name(),
            container_name: default_container_name(),
            versions_file: default_versions_file(),
            extension_policy: ExtensionPolicy::default(),
            no_cache: false,
            http_connect_timeout_secs: default_http_connect_timeout_secs(),
            http_request_timeout_secs: default_http_request_timeout_secs(),
            sources: SourcesConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn http_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.http_connect_timeout_secs)
    }

    pub fn http_request_timeout(&self) -> Duration {
        Duration::from_secs(self.http_request_timeout_secs)
    }
}
