//! Configuration validation with actionable error messages
//!
//! Validates the merged configuration and suggests the flag or config
//! entry that fixes each issue.

use super::schema::{CONFIG_VERSION, PipelineConfig};
use super::PipelineOptions;
use crate::versions::VersionSet;
use console::style;
use thiserror::Error;

/// A configuration validation error with an actionable fix
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid {field}: {message}")]
pub struct ValidationError {
    /// The config field that has an error
    pub field: String,
    /// Description of what's wrong
    pub message: String,
    /// Flag or config entry that fixes the issue
    pub fix_command: String,
}

/// A configuration validation warning (non-fatal)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationWarning {
    /// The config field with a potential issue
    pub field: String,
    /// Description of the warning
    pub message: String,
    /// Suggested flag or config entry
    pub fix_command: String,
}

fn error(field: &str, message: impl Into<String>, fix: impl Into<String>) -> ValidationError {
    ValidationError {
        field: field.to_string(),
        message: message.into(),
        fix_command: fix.into(),
    }
}

/// Docker repository path component: lowercase alphanumerics with `.`, `_`, `-`
fn is_valid_repo_component(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c.is_ascii_digit() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-'))
}

/// Docker container name: `[a-zA-Z0-9][a-zA-Z0-9_.-]*`
fn is_valid_container_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphanumeric() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

/// Namespace taken from a registry username, held to the same rules as a
/// configured one
pub fn username_namespace(username: &str) -> Result<String, ValidationError> {
    let namespace = username.to_lowercase();
    if is_valid_repo_component(&namespace) {
        Ok(namespace)
    } else {
        Err(error(
            "namespace",
            format!("registry username '{username}' is not a valid repository namespace (lowercase letters, digits, '.', '_', '-')"),
            "--namespace <your-docker-username>",
        ))
    }
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("https://") || url.starts_with("http://")
}

/// Validate configuration and return warnings or first error
///
/// Returns Ok(warnings) if validation passes (possibly with non-fatal warnings).
/// Returns Err(error) on the first fatal validation error encountered.
pub fn validate_config(config: &PipelineConfig) -> Result<Vec<ValidationWarning>, ValidationError> {
    let mut warnings = Vec::new();

    if config.version != CONFIG_VERSION {
        return Err(error(
            "version",
            format!(
                "unsupported config version {} (expected {CONFIG_VERSION})",
                config.version
            ),
            format!("set \"version\": {CONFIG_VERSION} in the config file"),
        ));
    }

    if config.work_dir.as_os_str().is_empty() {
        return Err(error(
            "work_dir",
            "work_dir must not be empty",
            "--work-dir build",
        ));
    }

    if config.base_image.trim().is_empty() {
        return Err(error(
            "base_image",
            "base_image must not be empty",
            "set \"base_image\": \"alpine:latest\" in the config file",
        ));
    }

    if config.registry.is_empty()
        || config.registry.contains("://")
        || config.registry.ends_with('/')
    {
        return Err(error(
            "registry",
            "registry must be a bare host name such as docker.io or ghcr.io",
            "--registry docker.io",
        ));
    }

    if let Some(namespace) = &config.namespace
        && !is_valid_repo_component(namespace)
    {
        return Err(error(
            "namespace",
            format!("'{namespace}' is not a valid repository namespace (lowercase letters, digits, '.', '_', '-')"),
            "--namespace <your-docker-username>",
        ));
    }

    if !is_valid_repo_component(&config.image_name) {
        return Err(error(
            "image_name",
            format!(
                "'{}' is not a valid repository name (lowercase letters, digits, '.', '_', '-')",
                config.image_name
            ),
            "--image-name mediawiki",
        ));
    }

    if !is_valid_container_name(&config.container_name) {
        return Err(error(
            "container_name",
            format!("'{}' is not a valid container name", config.container_name),
            "set \"container_name\": \"mediawiki-smoke-test\" in the config file",
        ));
    }

    if config.versions_file.as_os_str().is_empty() {
        return Err(error(
            "versions_file",
            "versions_file must not be empty",
            "--versions-file versions.env",
        ));
    }

    if config.http_connect_timeout_secs == 0 {
        return Err(error(
            "http_connect_timeout_secs",
            "http_connect_timeout_secs must be > 0",
            "set \"http_connect_timeout_secs\": 5 in the config file",
        ));
    }

    if config.http_request_timeout_secs == 0 {
        return Err(error(
            "http_request_timeout_secs",
            "http_request_timeout_secs must be > 0",
            "set \"http_request_timeout_secs\": 20 in the config file",
        ));
    }

    let sources = [
        ("sources.php_index_url", &config.sources.php_index_url),
        (
            "sources.php_index_fallback_url",
            &config.sources.php_index_fallback_url,
        ),
        (
            "sources.mediawiki_releases_url",
            &config.sources.mediawiki_releases_url,
        ),
        (
            "sources.mediawiki_tags_url",
            &config.sources.mediawiki_tags_url,
        ),
    ];
    for (field, url) in sources {
        if !is_http_url(url) {
            return Err(error(
                field,
                format!("'{url}' is not an http(s) URL"),
                format!("remove \"{field}\" from the config file to use the default"),
            ));
        }
        if url.starts_with("http://") {
            warnings.push(ValidationWarning {
                field: field.to_string(),
                message: "version lookups over plain HTTP can be tampered with".to_string(),
                fix_command: format!("use an https:// URL for \"{field}\""),
            });
        }
    }

    // Warnings (non-fatal)

    if !config.base_image.contains("alpine") {
        warnings.push(ValidationWarning {
            field: "base_image".to_string(),
            message: format!(
                "'{}' does not look Alpine-based; the generated Dockerfile installs packages with apk",
                config.base_image
            ),
            fix_command: "set \"base_image\": \"alpine:latest\" in the config file".to_string(),
        });
    }

    if config.http_request_timeout_secs < config.http_connect_timeout_secs {
        warnings.push(ValidationWarning {
            field: "http_request_timeout_secs".to_string(),
            message: "request timeout is shorter than the connect timeout".to_string(),
            fix_command: format!(
                "set \"http_request_timeout_secs\": {} or more in the config file",
                config.http_connect_timeout_secs
            ),
        });
    }

    Ok(warnings)
}

/// Validate per-run options (pinned versions)
pub fn validate_options(options: &PipelineOptions) -> Result<(), ValidationError> {
    let php = options
        .php_version
        .as_deref()
        .unwrap_or(crate::versions::DEFAULT_PHP_VERSION);
    let mediawiki = options
        .mediawiki_version
        .as_deref()
        .unwrap_or(crate::versions::DEFAULT_MEDIAWIKI_VERSION);

    if let Err(e) = VersionSet::new(php, mediawiki) {
        let (field, fix) = match e {
            crate::versions::VersionError::InvalidPhp(_) => {
                ("php_version", "--php-version 8.4")
            }
            _ => ("mediawiki_version", "--mediawiki-version 1.43.0"),
        };
        return Err(error(field, e.to_string(), fix));
    }

    Ok(())
}

/// Display a validation error with styled formatting
pub fn display_validation_error(error: &ValidationError) {
    eprintln!();
    eprintln!("{}", style("Error: Configuration error").red().bold());
    eprintln!();
    eprintln!("  {}  {}", style("Field:").dim(), error.field);
    eprintln!("  {}  {}", style("Problem:").dim(), error.message);
    eprintln!();
    eprintln!("{}:", style("To fix").dim());
    eprintln!("  {}", style(&error.fix_command).cyan());
    eprintln!();
}

/// Display a validation warning with styled formatting
pub fn display_validation_warning(warning: &ValidationWarning) {
    eprintln!();
    eprintln!(
        "{}",
        style("Warning: Configuration warning").yellow().bold()
    );
    eprintln!("  {}  {}", style("Field:").dim(), warning.field);
    eprintln!("  {}  {}", style("Issue:").dim(), warning.message);
    eprintln!("  {}  {}", style("Suggestion:").dim(), style(&warning.fix_command).cyan());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_valid_config_passes() {
        let warnings = validate_config(&PipelineConfig::default()).unwrap();
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_unsupported_version() {
        let config = PipelineConfig {
            version: 2,
            ..PipelineConfig::default()
        };
        let err = validate_config(&config).unwrap_err();
        assert_eq!(err.field, "version");
    }

    #[test]
    fn test_uppercase_image_name_rejected() {
        let config = PipelineConfig {
            image_name: "MediaWiki".to_string(),
            ..PipelineConfig::default()
        };
        let err = validate_config(&config).unwrap_err();
        assert_eq!(err.field, "image_name");
        assert!(err.fix_command.contains("--image-name"));
    }

    #[test]
    fn test_invalid_namespace_rejected() {
        let config = PipelineConfig {
            namespace: Some("-bad".to_string()),
            ..PipelineConfig::default()
        };
        assert_eq!(validate_config(&config).unwrap_err().field, "namespace");
    }

    #[test]
    fn test_username_namespace_lowercased() {
        assert_eq!(username_namespace("Alice").unwrap(), "alice");
        assert_eq!(username_namespace("wiki-ops_2").unwrap(), "wiki-ops_2");
    }

    #[test]
    fn test_email_username_is_not_a_namespace() {
        let error = username_namespace("alice@example.com").unwrap_err();
        assert_eq!(error.field, "namespace");
        assert!(error.message.contains("alice@example.com"));
        assert_eq!(error.fix_command, "--namespace <your-docker-username>");
    }

    #[test]
    fn test_registry_with_scheme_rejected() {
        let config = PipelineConfig {
            registry: "https://ghcr.io".to_string(),
            ..PipelineConfig::default()
        };
        assert_eq!(validate_config(&config).unwrap_err().field, "registry");
    }

    #[test]
    fn test_container_name_rules() {
        let config = PipelineConfig {
            container_name: "smoke test".to_string(),
            ..PipelineConfig::default()
        };
        assert_eq!(validate_config(&config).unwrap_err().field, "container_name");
        assert!(is_valid_container_name("Smoke_Test-1.0"));
    }

    #[test]
    fn test_empty_work_dir_rejected() {
        let config = PipelineConfig {
            work_dir: PathBuf::new(),
            ..PipelineConfig::default()
        };
        assert_eq!(validate_config(&config).unwrap_err().field, "work_dir");
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = PipelineConfig {
            http_connect_timeout_secs: 0,
            ..PipelineConfig::default()
        };
        assert_eq!(
            validate_config(&config).unwrap_err().field,
            "http_connect_timeout_secs"
        );
    }

    #[test]
    fn test_non_http_source_rejected() {
        let mut config = PipelineConfig::default();
        config.sources.mediawiki_tags_url = "ftp://example.org/tags".to_string();
        assert_eq!(
            validate_config(&config).unwrap_err().field,
            "sources.mediawiki_tags_url"
        );
    }

    #[test]
    fn test_plain_http_source_warns() {
        let mut config = PipelineConfig::default();
        config.sources.php_index_url = "http://mirror.local/APKINDEX.tar.gz".to_string();
        let warnings = validate_config(&config).unwrap();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].field, "sources.php_index_url");
    }

    #[test]
    fn test_non_alpine_base_image_warns() {
        let config = PipelineConfig {
            base_image: "debian:bookworm".to_string(),
            ..PipelineConfig::default()
        };
        let warnings = validate_config(&config).unwrap();
        assert!(warnings.iter().any(|w| w.field == "base_image"));
    }

    #[test]
    fn test_pinned_versions_validated() {
        assert!(validate_options(&PipelineOptions::default()).is_ok());

        let options = PipelineOptions {
            php_version: Some("8".to_string()),
            ..PipelineOptions::default()
        };
        assert_eq!(validate_options(&options).unwrap_err().field, "php_version");

        let options = PipelineOptions {
            mediawiki_version: Some("1.43".to_string()),
            ..PipelineOptions::default()
        };
        let err = validate_options(&options).unwrap_err();
        assert_eq!(err.field, "mediawiki_version");
        assert!(err.fix_command.contains("--mediawiki-version"));
    }
}
