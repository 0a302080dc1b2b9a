//! Build-context generation
//!
//! Renders the Dockerfile and health-check script for a `VersionSet` and
//! writes them into the working directory. Output depends only on the
//! versions and the generator settings, so repeated runs produce
//! byte-identical files.

mod templates;

use crate::config::{ExtensionPolicy, PipelineConfig};
use crate::versions::VersionSet;
use serde::Serialize;
use std::path::{Path, PathBuf};
use templates::{DOCKERFILE_TEMPLATE, HEALTHCHECK_TEMPLATE, TemplateRenderer};
use thiserror::Error;
use tracing::{debug, info};

/// File names inside the build context
pub const DOCKERFILE_NAME: &str = "Dockerfile";
pub const HEALTHCHECK_NAME: &str = "healthcheck.sh";

/// Container paths and ports baked into the image
pub const HTTP_PORT: u16 = 80;
pub const FPM_LISTEN: &str = "127.0.0.1:9000";
pub const DOCUMENT_ROOT: &str = "/var/www/html";
pub const START_SCRIPT_PATH: &str = "/usr/local/bin/start-mediawiki.sh";
pub const HEALTHCHECK_PATH: &str = "/usr/local/bin/healthcheck.sh";

/// Text the diagnostic page must contain for PHP to count as working
pub const PHP_INFO_MARKER: &str = "PHP Version";

/// Docker HEALTHCHECK timing
pub const HEALTHCHECK_INTERVAL_SECS: u32 = 30;
pub const HEALTHCHECK_TIMEOUT_SECS: u32 = 10;
pub const HEALTHCHECK_START_PERIOD_SECS: u32 = 60;
pub const HEALTHCHECK_RETRIES: u32 = 3;

/// Default location of MediaWiki release tarballs
pub const DEFAULT_DOWNLOAD_BASE: &str = "https://releases.wikimedia.org/mediawiki";

/// PHP extensions installed into the image, in install order
pub const PHP_EXTENSIONS: &[&str] = &[
    "ctype",
    "curl",
    "dom",
    "fileinfo",
    "gd",
    "iconv",
    "intl",
    "mbstring",
    "mysqli",
    "opcache",
    "openssl",
    "pdo",
    "pdo_mysql",
    "pdo_sqlite",
    "session",
    "simplexml",
    "sqlite3",
    "tokenizer",
    "xml",
    "xmlreader",
    "xmlwriter",
    "zip",
    "apcu",
];

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("Failed to render {template}: {source}")]
    Render {
        template: &'static str,
        #[source]
        source: tera::Error,
    },

    #[error("Failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Rendered build-context files
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildArtifacts {
    pub dockerfile: String,
    pub healthcheck: String,
}

/// Build-context files written to disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedArtifacts {
    pub dir: PathBuf,
    pub dockerfile: PathBuf,
    pub healthcheck: PathBuf,
}

#[derive(Serialize)]
struct HealthTiming {
    interval_secs: u32,
    timeout_secs: u32,
    start_period_secs: u32,
    retries: u32,
}

#[derive(Serialize)]
struct TemplateContext<'a> {
    base_image: &'a str,
    php_version: &'a str,
    mediawiki_version: &'a str,
    mediawiki_major_version: &'a str,
    extensions: &'a [&'a str],
    strict_extensions: bool,
    download_base: &'a str,
    document_root: &'a str,
    http_port: u16,
    fpm_listen: &'a str,
    start_script: &'a str,
    healthcheck_file: &'a str,
    healthcheck_path: &'a str,
    php_marker: &'a str,
    health: HealthTiming,
}

pub struct ArtifactGenerator {
    renderer: TemplateRenderer,
    base_image: String,
    extension_policy: ExtensionPolicy,
    download_base: String,
}

impl ArtifactGenerator {
    pub fn new(
        base_image: impl Into<String>,
        extension_policy: ExtensionPolicy,
    ) -> Result<Self, ArtifactError> {
        let renderer = TemplateRenderer::from_embedded().map_err(|source| ArtifactError::Render {
            template: "embedded templates",
            source,
        })?;
        Ok(Self {
            renderer,
            base_image: base_image.into(),
            extension_policy,
            download_base: DEFAULT_DOWNLOAD_BASE.to_string(),
        })
    }

    pub fn from_config(config: &PipelineConfig) -> Result<Self, ArtifactError> {
        let mut generator = Self::new(config.base_image.clone(), config.extension_policy)?;
        generator.download_base = config
            .sources
            .mediawiki_releases_url
            .trim_end_matches('/')
            .to_string();
        Ok(generator)
    }

    /// Render both files without touching the filesystem
    pub fn render(&self, versions: &VersionSet) -> Result<BuildArtifacts, ArtifactError> {
        let context = TemplateContext {
            base_image: &self.base_image,
            php_version: versions.php_version(),
            mediawiki_version: versions.mediawiki_version(),
            mediawiki_major_version: versions.mediawiki_major_version(),
            extensions: PHP_EXTENSIONS,
            strict_extensions: self.extension_policy == ExtensionPolicy::Strict,
            download_base: &self.download_base,
            document_root: DOCUMENT_ROOT,
            http_port: HTTP_PORT,
            fpm_listen: FPM_LISTEN,
            start_script: START_SCRIPT_PATH,
            healthcheck_file: HEALTHCHECK_NAME,
            healthcheck_path: HEALTHCHECK_PATH,
            php_marker: PHP_INFO_MARKER,
            health: HealthTiming {
                interval_secs: HEALTHCHECK_INTERVAL_SECS,
                timeout_secs: HEALTHCHECK_TIMEOUT_SECS,
                start_period_secs: HEALTHCHECK_START_PERIOD_SECS,
                retries: HEALTHCHECK_RETRIES,
            },
        };

        let context = tera::Context::from_serialize(&context).map_err(|source| {
            ArtifactError::Render {
                template: DOCKERFILE_TEMPLATE,
                source,
            }
        })?;

        let render = |template: &'static str| {
            self.renderer
                .render(template, &context)
                .map_err(|source| ArtifactError::Render { template, source })
        };

        Ok(BuildArtifacts {
            dockerfile: render(DOCKERFILE_TEMPLATE)?,
            healthcheck: render(HEALTHCHECK_TEMPLATE)?,
        })
    }

    /// Render and write both files into `out_dir`, overwriting existing ones
    pub fn generate(
        &self,
        versions: &VersionSet,
        out_dir: &Path,
    ) -> Result<GeneratedArtifacts, ArtifactError> {
        let artifacts = self.render(versions)?;

        std::fs::create_dir_all(out_dir).map_err(|source| ArtifactError::Io {
            path: out_dir.to_path_buf(),
            source,
        })?;

        let dockerfile = out_dir.join(DOCKERFILE_NAME);
        let healthcheck = out_dir.join(HEALTHCHECK_NAME);
        write_file(&dockerfile, &artifacts.dockerfile, false)?;
        write_file(&healthcheck, &artifacts.healthcheck, true)?;

        info!(
            "Generated {} and {} in {}",
            DOCKERFILE_NAME,
            HEALTHCHECK_NAME,
            out_dir.display()
        );

        Ok(GeneratedArtifacts {
            dir: out_dir.to_path_buf(),
            dockerfile,
            healthcheck,
        })
    }
}

fn write_file(path: &Path, content: &str, executable: bool) -> Result<(), ArtifactError> {
    let io_err = |source: std::io::Error| ArtifactError::Io {
        path: path.to_path_buf(),
        source,
    };
    std::fs::write(path, content).map_err(io_err)?;
    if executable {
        set_executable(path).map_err(io_err)?;
    }
    debug!("Wrote {} ({} bytes)", path.display(), content.len());
    Ok(())
}

#[cfg(unix)]
fn set_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generator(policy: ExtensionPolicy) -> ArtifactGenerator {
        ArtifactGenerator::new("alpine:latest", policy).unwrap()
    }

    #[test]
    fn dockerfile_carries_versions_as_arg_defaults() {
        let versions = VersionSet::new("8.3", "1.42.4").unwrap();
        let out = generator(ExtensionPolicy::BestEffort)
            .render(&versions)
            .unwrap();

        assert!(out.dockerfile.contains("ARG PHP_VERSION=8.3\n"));
        assert!(out.dockerfile.contains("ARG MEDIAWIKI_VERSION=1.42.4\n"));
        assert!(out.dockerfile.contains("ARG MEDIAWIKI_MAJOR_VERSION=1.42\n"));
        assert!(out.dockerfile.starts_with("# syntax=docker/dockerfile:1\n"));
        assert!(out.dockerfile.contains("FROM alpine:latest\n"));
    }

    #[test]
    fn dockerfile_has_expected_runtime_layout() {
        let out = generator(ExtensionPolicy::BestEffort)
            .render(&VersionSet::fallback())
            .unwrap();
        let d = &out.dockerfile;

        assert!(d.contains(
            "HEALTHCHECK --interval=30s --timeout=10s --start-period=60s --retries=3"
        ));
        assert!(d.contains("EXPOSE 80\n"));
        assert!(d.contains("fastcgi_pass 127.0.0.1:9000;"));
        assert!(d.contains("listen = 127.0.0.1:9000"));
        assert!(d.contains("location ^~ /images/"));
        assert!(d.contains("deny all;"));
        assert!(d.contains("<?php phpinfo();"));
        assert!(d.contains("adduser -S -D -H -G www-data"));
        assert!(d.contains(
            "https://releases.wikimedia.org/mediawiki/${MEDIAWIKI_MAJOR_VERSION}/mediawiki-${MEDIAWIKI_VERSION}.tar.gz"
        ));
        assert!(d.contains("\"${fpm}\" -F &"));
        assert!(d.contains("exec nginx -g 'daemon off;'"));
    }

    #[test]
    fn start_script_checks_fpm_candidates_in_order() {
        let d = generator(ExtensionPolicy::BestEffort)
            .render(&VersionSet::fallback())
            .unwrap()
            .dockerfile;
        let first = d.find("\"/usr/sbin/php-fpm${suffix}\"").unwrap();
        let second = d.find(" /usr/sbin/php-fpm ").unwrap();
        let third = d.find("/usr/local/sbin/php-fpm").unwrap();
        let search = d.find("find / -xdev").unwrap();
        assert!(first < second && second < third && third < search);
    }

    #[test]
    fn every_extension_is_listed() {
        let d = generator(ExtensionPolicy::BestEffort)
            .render(&VersionSet::fallback())
            .unwrap()
            .dockerfile;
        let expected = format!("for ext in {}; do", PHP_EXTENSIONS.join(" "));
        assert!(d.contains(&expected));
    }

    #[test]
    fn extension_policy_controls_failure() {
        let lenient = generator(ExtensionPolicy::BestEffort)
            .render(&VersionSet::fallback())
            .unwrap()
            .dockerfile;
        let strict = generator(ExtensionPolicy::Strict)
            .render(&VersionSet::fallback())
            .unwrap()
            .dockerfile;

        assert!(lenient.contains("strict=\"0\""));
        assert!(strict.contains("strict=\"1\""));
        assert_ne!(lenient, strict);
    }

    #[test]
    fn healthcheck_checks_in_order() {
        let h = generator(ExtensionPolicy::BestEffort)
            .render(&VersionSet::fallback())
            .unwrap()
            .healthcheck;

        let nginx = h.find("pgrep -x nginx").unwrap();
        let fpm = h.find("pgrep -f php-fpm").unwrap();
        let info = h.find("/info.php").unwrap();
        let ping = h.find("ping -c 1 -W 2 127.0.0.1").unwrap();
        let setup = h.find("/mw-config/index.php").unwrap();
        assert!(nginx < fpm && fpm < info && info < ping && ping < setup);
        assert!(h.contains("*\"PHP Version\"*"));
        assert!(h.starts_with("#!/bin/sh\n"));
    }

    #[test]
    fn rendering_is_deterministic() {
        let generator = generator(ExtensionPolicy::BestEffort);
        let versions = VersionSet::fallback();
        assert_eq!(
            generator.render(&versions).unwrap(),
            generator.render(&versions).unwrap()
        );
    }

    #[test]
    fn generate_twice_is_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let generator = generator(ExtensionPolicy::BestEffort);
        let versions = VersionSet::fallback();

        let first = generator.generate(&versions, dir.path()).unwrap();
        let dockerfile_1 = std::fs::read(&first.dockerfile).unwrap();
        let healthcheck_1 = std::fs::read(&first.healthcheck).unwrap();

        let second = generator.generate(&versions, dir.path()).unwrap();
        assert_eq!(first, second);
        assert_eq!(dockerfile_1, std::fs::read(&second.dockerfile).unwrap());
        assert_eq!(healthcheck_1, std::fs::read(&second.healthcheck).unwrap());
    }

    #[test]
    fn generate_overwrites_stale_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(DOCKERFILE_NAME), "FROM scratch\n").unwrap();

        let generated = generator(ExtensionPolicy::BestEffort)
            .generate(&VersionSet::fallback(), dir.path())
            .unwrap();
        let content = std::fs::read_to_string(generated.dockerfile).unwrap();
        assert!(content.contains("ARG MEDIAWIKI_VERSION=1.43.0"));
    }

    #[cfg(unix)]
    #[test]
    fn healthcheck_is_executable() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let generated = generator(ExtensionPolicy::BestEffort)
            .generate(&VersionSet::fallback(), &dir.path().join("build"))
            .unwrap();
        let mode = std::fs::metadata(generated.healthcheck)
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o111, 0o111);
    }

    #[test]
    fn download_base_follows_config() {
        let mut config = PipelineConfig::default();
        config.sources.mediawiki_releases_url = "https://mirror.example/mediawiki/".to_string();
        let d = ArtifactGenerator::from_config(&config)
            .unwrap()
            .render(&VersionSet::fallback())
            .unwrap()
            .dockerfile;
        assert!(d.contains("curl -fsSL \"https://mirror.example/mediawiki/${MEDIAWIKI_MAJOR_VERSION}"));
    }
}
