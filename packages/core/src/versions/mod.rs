//! PHP and MediaWiki version handling
//!
//! `VersionSet` is the value every later stage is parameterized by. It is
//! produced once per run (resolved from upstream or pinned) and never
//! mutated afterwards.

mod fetch;
mod parse;
mod resolver;

pub use fetch::{FetchError, HttpFetch, HttpFetcher};
pub use parse::{
    extract_mediawiki_majors, extract_mediawiki_tarball_versions, extract_php_versions,
    extract_tag_versions, parse_apkindex_packages, ParseError,
};
pub use resolver::{ResolvedVersions, VersionResolver, VersionSource};

use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

/// PHP version used when the package index cannot be read
pub const DEFAULT_PHP_VERSION: &str = "8.4";

/// MediaWiki version used when the release listing cannot be read
pub const DEFAULT_MEDIAWIKI_VERSION: &str = "1.43.0";

/// Major version matching [`DEFAULT_MEDIAWIKI_VERSION`]
pub const DEFAULT_MEDIAWIKI_MAJOR_VERSION: &str = "1.43";

/// Build argument / versions file keys
pub const KEY_PHP_VERSION: &str = "PHP_VERSION";
pub const KEY_MEDIAWIKI_VERSION: &str = "MEDIAWIKI_VERSION";
pub const KEY_MEDIAWIKI_MAJOR_VERSION: &str = "MEDIAWIKI_MAJOR_VERSION";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VersionError {
    #[error("Invalid PHP version '{0}': expected MAJOR.MINOR (e.g. 8.4)")]
    InvalidPhp(String),

    #[error("Invalid MediaWiki version '{0}': expected MAJOR.MINOR.PATCH (e.g. 1.43.0)")]
    InvalidMediawiki(String),

    #[error("MediaWiki major version '{major}' is not the MAJOR.MINOR prefix of '{version}'")]
    MajorMismatch { version: String, major: String },
}

/// The three version strings a build is parameterized by
///
/// Invariant: `mediawiki_major_version` is the `MAJOR.MINOR` prefix of
/// `mediawiki_version`. Every constructor enforces it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionSet {
    php_version: String,
    mediawiki_version: String,
    mediawiki_major_version: String,
}

impl VersionSet {
    /// Build a set from a PHP version and a full MediaWiki version,
    /// deriving the major version.
    pub fn new(
        php_version: impl Into<String>,
        mediawiki_version: impl Into<String>,
    ) -> Result<Self, VersionError> {
        let php_version = php_version.into();
        let mediawiki_version = mediawiki_version.into();

        if !is_dotted_numeric(&php_version, 2) {
            return Err(VersionError::InvalidPhp(php_version));
        }
        if !is_dotted_numeric(&mediawiki_version, 3) {
            return Err(VersionError::InvalidMediawiki(mediawiki_version));
        }

        let mediawiki_major_version = major_minor(&mediawiki_version)
            .ok_or_else(|| VersionError::InvalidMediawiki(mediawiki_version.clone()))?
            .to_string();

        Ok(Self {
            php_version,
            mediawiki_version,
            mediawiki_major_version,
        })
    }

    /// Build a set from all three values, checking the major/full relation
    pub fn with_major(
        php_version: impl Into<String>,
        mediawiki_version: impl Into<String>,
        mediawiki_major_version: impl Into<String>,
    ) -> Result<Self, VersionError> {
        let set = Self::new(php_version, mediawiki_version)?;
        let major = mediawiki_major_version.into();
        if set.mediawiki_major_version != major {
            return Err(VersionError::MajorMismatch {
                version: set.mediawiki_version,
                major,
            });
        }
        Ok(set)
    }

    /// The hardcoded defaults used when every lookup fails
    pub fn fallback() -> Self {
        Self {
            php_version: DEFAULT_PHP_VERSION.to_string(),
            mediawiki_version: DEFAULT_MEDIAWIKI_VERSION.to_string(),
            mediawiki_major_version: DEFAULT_MEDIAWIKI_MAJOR_VERSION.to_string(),
        }
    }

    pub fn php_version(&self) -> &str {
        &self.php_version
    }

    pub fn mediawiki_version(&self) -> &str {
        &self.mediawiki_version
    }

    pub fn mediawiki_major_version(&self) -> &str {
        &self.mediawiki_major_version
    }

    /// Key/value pairs in versions-file order
    pub fn entries(&self) -> [(&'static str, &str); 3] {
        [
            (KEY_PHP_VERSION, &self.php_version),
            (KEY_MEDIAWIKI_VERSION, &self.mediawiki_version),
            (KEY_MEDIAWIKI_MAJOR_VERSION, &self.mediawiki_major_version),
        ]
    }

    /// Docker build arguments consumed by the generated Dockerfile
    pub fn build_args(&self) -> HashMap<String, String> {
        self.entries()
            .into_iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    /// Render the flat `KEY=VALUE` versions file
    pub fn to_env_file(&self) -> String {
        let mut out = String::new();
        for (key, value) in self.entries() {
            out.push_str(key);
            out.push('=');
            out.push_str(value);
            out.push('\n');
        }
        out
    }

    /// Write the versions file, creating parent directories as needed
    pub fn write_env_file(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_env_file())
    }
}

impl std::fmt::Display for VersionSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "PHP {} / MediaWiki {} ({})",
            self.php_version, self.mediawiki_version, self.mediawiki_major_version
        )
    }
}

/// Return the `MAJOR.MINOR` prefix of a dotted version
pub fn major_minor(version: &str) -> Option<&str> {
    let mut dots = version.match_indices('.');
    let _first = dots.next()?;
    match dots.next() {
        Some((idx, _)) => Some(&version[..idx]),
        None => Some(version),
    }
}

/// Compare dotted numeric versions component by component
///
/// Missing components compare as zero, so "1.43" == "1.43.0".
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let parse = |v: &str| -> Vec<u64> { v.split('.').filter_map(|s| s.parse().ok()).collect() };
    let a_parts = parse(a);
    let b_parts = parse(b);

    for i in 0..a_parts.len().max(b_parts.len()) {
        let a_part = a_parts.get(i).copied().unwrap_or(0);
        let b_part = b_parts.get(i).copied().unwrap_or(0);
        match a_part.cmp(&b_part) {
            Ordering::Equal => continue,
            other => return other,
        }
    }

    Ordering::Equal
}

/// Highest version in a collection, by [`compare_versions`]
pub fn latest_version<I>(versions: I) -> Option<String>
where
    I: IntoIterator<Item = String>,
{
    versions
        .into_iter()
        .max_by(|a, b| compare_versions(a, b))
}

fn is_dotted_numeric(value: &str, parts: usize) -> bool {
    let split: Vec<&str> = value.split('.').collect();
    split.len() == parts
        && split
            .iter()
            .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()))
}
