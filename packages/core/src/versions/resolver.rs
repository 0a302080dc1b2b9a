//! Latest-version discovery with static fallbacks

use super::fetch::{FetchError, HttpFetch};
use super::parse::{
    extract_mediawiki_majors, extract_mediawiki_tarball_versions, extract_php_versions,
    extract_tag_versions, parse_apkindex_packages,
};
use super::{
    DEFAULT_MEDIAWIKI_VERSION, DEFAULT_PHP_VERSION, VersionError, VersionSet, latest_version,
};
use crate::config::SourcesConfig;
use serde::Serialize;
use tracing::{debug, info, warn};

/// Where a resolved value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionSource {
    /// Primary upstream lookup
    Primary,
    /// Secondary mirror or tag list
    Fallback,
    /// Hardcoded default
    Default,
    /// Supplied by the user
    Pinned,
}

impl std::fmt::Display for VersionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            VersionSource::Primary => "primary",
            VersionSource::Fallback => "fallback",
            VersionSource::Default => "default",
            VersionSource::Pinned => "pinned",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedVersions {
    pub versions: VersionSet,
    pub php_source: VersionSource,
    pub mediawiki_source: VersionSource,
}

/// Finds the newest PHP and MediaWiki releases
///
/// `resolve` never fails: every lookup error degrades to the next source and
/// finally to the defaults in [`VersionSet::fallback`].
pub struct VersionResolver<F> {
    fetcher: F,
    sources: SourcesConfig,
    pinned_php: Option<String>,
    pinned_mediawiki: Option<String>,
}

impl<F: HttpFetch> VersionResolver<F> {
    pub fn new(fetcher: F, sources: SourcesConfig) -> Self {
        Self {
            fetcher,
            sources,
            pinned_php: None,
            pinned_mediawiki: None,
        }
    }

    /// Skip network lookups for the values given here
    pub fn with_pinned(mut self, php: Option<String>, mediawiki: Option<String>) -> Self {
        self.pinned_php = php;
        self.pinned_mediawiki = mediawiki;
        self
    }

    pub async fn resolve(&self) -> ResolvedVersions {
        let (php, php_source) = match &self.pinned_php {
            Some(pinned) => (pinned.clone(), VersionSource::Pinned),
            None => self.resolve_php().await,
        };
        let (mediawiki, mediawiki_source) = match &self.pinned_mediawiki {
            Some(pinned) => (pinned.clone(), VersionSource::Pinned),
            None => self.resolve_mediawiki().await,
        };

        let resolved = assemble(php, php_source, mediawiki, mediawiki_source);
        info!(
            "Resolved {} (php: {}, mediawiki: {})",
            resolved.versions, resolved.php_source, resolved.mediawiki_source
        );
        resolved
    }

    async fn resolve_php(&self) -> (String, VersionSource) {
        match self.latest_php_from(&self.sources.php_index_url).await {
            Ok(version) => return (version, VersionSource::Primary),
            Err(e) => warn!("PHP package index unavailable, trying mirror: {e}"),
        }

        match self.latest_php_from(&self.sources.php_index_fallback_url).await {
            Ok(version) => (version, VersionSource::Fallback),
            Err(e) => {
                warn!("PHP mirror index unavailable, using PHP {DEFAULT_PHP_VERSION}: {e}");
                (DEFAULT_PHP_VERSION.to_string(), VersionSource::Default)
            }
        }
    }

    /// Highest PHP version with a base package in the given APKINDEX
    pub async fn latest_php_from(&self, url: &str) -> Result<String, FetchError> {
        let data = self.fetcher.fetch_bytes(url).await?;
        let packages = parse_apkindex_packages(&data).map_err(|source| FetchError::Parse {
            url: url.to_string(),
            source,
        })?;
        let candidates = extract_php_versions(&packages);
        debug!("PHP candidates from {url}: {candidates:?}");
        latest_version(candidates).ok_or_else(|| FetchError::NoVersions(url.to_string()))
    }

    async fn resolve_mediawiki(&self) -> (String, VersionSource) {
        let major = match self.latest_mediawiki_major().await {
            Ok(major) => Some(major),
            Err(e) => {
                warn!("MediaWiki release listing unavailable: {e}");
                None
            }
        };

        if let Some(major) = &major {
            match self.latest_mediawiki_release(major).await {
                Ok(version) => return (version, VersionSource::Primary),
                Err(e) => warn!("No MediaWiki {major} tarball found, trying tag list: {e}"),
            }
        }

        match self.latest_mediawiki_tag(major.as_deref()).await {
            Ok(version) => (version, VersionSource::Fallback),
            Err(e) => {
                warn!(
                    "MediaWiki tag list unavailable, using MediaWiki {DEFAULT_MEDIAWIKI_VERSION}: {e}"
                );
                (
                    DEFAULT_MEDIAWIKI_VERSION.to_string(),
                    VersionSource::Default,
                )
            }
        }
    }

    async fn latest_mediawiki_major(&self) -> Result<String, FetchError> {
        let url = &self.sources.mediawiki_releases_url;
        let html = self.fetcher.fetch_text(url).await?;
        latest_version(extract_mediawiki_majors(&html))
            .ok_or_else(|| FetchError::NoVersions(url.to_string()))
    }

    async fn latest_mediawiki_release(&self, major: &str) -> Result<String, FetchError> {
        let url = format!(
            "{}/{}/",
            self.sources.mediawiki_releases_url.trim_end_matches('/'),
            major
        );
        let html = self.fetcher.fetch_text(&url).await?;
        latest_version(extract_mediawiki_tarball_versions(&html))
            .ok_or(FetchError::NoVersions(url))
    }

    async fn latest_mediawiki_tag(&self, major: Option<&str>) -> Result<String, FetchError> {
        let url = &self.sources.mediawiki_tags_url;
        let json = self.fetcher.fetch_text(url).await?;
        let tags = extract_tag_versions(&json).map_err(|source| FetchError::Parse {
            url: url.to_string(),
            source,
        })?;

        let matching = tags.into_iter().filter(|tag| match major {
            Some(major) => tag
                .strip_prefix(major)
                .is_some_and(|rest| rest.starts_with('.')),
            None => true,
        });
        latest_version(matching).ok_or_else(|| FetchError::NoVersions(url.to_string()))
    }
}

/// Combine independently resolved values into a valid `VersionSet`
///
/// A malformed value is replaced by its default. MediaWiki version and major
/// are always replaced together.
fn assemble(
    php: String,
    php_source: VersionSource,
    mediawiki: String,
    mediawiki_source: VersionSource,
) -> ResolvedVersions {
    match VersionSet::new(php.as_str(), mediawiki.as_str()) {
        Ok(versions) => ResolvedVersions {
            versions,
            php_source,
            mediawiki_source,
        },
        Err(VersionError::InvalidPhp(_)) => {
            warn!("Ignoring invalid PHP version '{php}', using {DEFAULT_PHP_VERSION}");
            assemble(
                DEFAULT_PHP_VERSION.to_string(),
                VersionSource::Default,
                mediawiki,
                mediawiki_source,
            )
        }
        Err(_) => {
            warn!(
                "Ignoring invalid MediaWiki version '{mediawiki}', using {DEFAULT_MEDIAWIKI_VERSION}"
            );
            let fallback = VersionSet::fallback();
            let versions = VersionSet::new(php.as_str(), fallback.mediawiki_version())
                .unwrap_or(fallback);
            let php_source = if versions.php_version() == php {
                php_source
            } else {
                VersionSource::Default
            };
            ResolvedVersions {
                versions,
                php_source,
                mediawiki_source: VersionSource::Default,
            }
        }
    }
}
