//! Parsers for upstream version sources
//!
//! - Alpine `APKINDEX.tar.gz` (gzip'd tar with `P:<name>` lines)
//! - Apache-style directory listings on releases.wikimedia.org
//! - The GitHub tag list JSON for the MediaWiki repository

use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::io::Read;
use std::sync::LazyLock;
use thiserror::Error;

static PHP_PACKAGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^php(\d)(\d+)$").expect("valid regex"));

static MAJOR_DIR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"href="?(\d+\.\d+)/"#).expect("valid regex"));

static TARBALL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"mediawiki-(\d+\.\d+\.\d+)\.tar\.gz").expect("valid regex"));

static RELEASE_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+\.\d+\.\d+$").expect("valid regex"));

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid gzip data: {0}")]
    Gzip(#[source] std::io::Error),

    #[error("invalid tar archive: {0}")]
    Tar(#[source] std::io::Error),

    #[error("archive has no APKINDEX entry")]
    MissingIndex,

    #[error("APKINDEX is not valid UTF-8")]
    Utf8,

    #[error("no packages found in APKINDEX")]
    Empty,

    #[error("invalid tag list: {0}")]
    Json(#[from] serde_json::Error),
}

/// Package names (`P:` lines) from a compressed APKINDEX archive
pub fn parse_apkindex_packages(data: &[u8]) -> Result<Vec<String>, ParseError> {
    let mut decoder = flate2::read::MultiGzDecoder::new(data);
    let mut tar_data = Vec::new();
    decoder
        .read_to_end(&mut tar_data)
        .map_err(ParseError::Gzip)?;

    let mut archive = tar::Archive::new(&tar_data[..]);
    let entries = archive.entries().map_err(ParseError::Tar)?;

    for entry in entries {
        let mut entry = entry.map_err(ParseError::Tar)?;
        let is_index = entry
            .path()
            .map(|p| p.to_str() == Some("APKINDEX"))
            .unwrap_or(false);
        if !is_index {
            continue;
        }

        let mut content = Vec::new();
        entry.read_to_end(&mut content).map_err(ParseError::Tar)?;
        let text = std::str::from_utf8(&content).map_err(|_| ParseError::Utf8)?;

        let packages: Vec<String> = text
            .lines()
            .filter_map(|line| line.strip_prefix("P:"))
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect();

        if packages.is_empty() {
            return Err(ParseError::Empty);
        }
        return Ok(packages);
    }

    Err(ParseError::MissingIndex)
}

/// PHP `MAJOR.MINOR` versions implied by base package names (`php84` -> `8.4`)
///
/// Result is deduplicated; order is unspecified.
pub fn extract_php_versions<I>(packages: I) -> Vec<String>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    let versions: BTreeSet<String> = packages
        .into_iter()
        .filter_map(|name| {
            let caps = PHP_PACKAGE_RE.captures(name.as_ref())?;
            Some(format!("{}.{}", &caps[1], &caps[2]))
        })
        .collect();
    versions.into_iter().collect()
}

/// `MAJOR.MINOR/` directory links from the top-level release listing
pub fn extract_mediawiki_majors(html: &str) -> Vec<String> {
    let majors: BTreeSet<String> = MAJOR_DIR_RE
        .captures_iter(html)
        .map(|caps| caps[1].to_string())
        .collect();
    majors.into_iter().collect()
}

/// Full versions of `mediawiki-X.Y.Z.tar.gz` links in a major's listing
///
/// Release candidates and signature files do not match.
pub fn extract_mediawiki_tarball_versions(html: &str) -> Vec<String> {
    let versions: BTreeSet<String> = TARBALL_RE
        .captures_iter(html)
        .map(|caps| caps[1].to_string())
        .collect();
    versions.into_iter().collect()
}

#[derive(Debug, Deserialize)]
struct Tag {
    name: String,
}

/// Plain `X.Y.Z` release names from a GitHub tag list
pub fn extract_tag_versions(json: &str) -> Result<Vec<String>, ParseError> {
    let tags: Vec<Tag> = serde_json::from_str(json)?;
    Ok(tags
        .into_iter()
        .map(|tag| tag.name)
        .filter(|name| RELEASE_TAG_RE.is_match(name))
        .collect())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;

    /// Build an APKINDEX.tar.gz holding the given index text
    pub(crate) fn apkindex_archive(index: &str) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        header.set_size(index.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, "APKINDEX", index.as_bytes())
            .unwrap();
        let tar_bytes = builder.into_inner().unwrap();

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&tar_bytes).unwrap();
        encoder.finish().unwrap()
    }

    const INDEX: &str = "C:Q1abc=\nP:php83\nV:8.3.14-r0\n\nC:Q1def=\nP:php84\nV:8.4.1-r0\n\nP:php84-fpm\nV:8.4.1-r0\n\nP:php8\n\nP:phpmyadmin\n\nP:php85-intl\n";

    #[test]
    fn apkindex_lists_package_names() {
        let packages = parse_apkindex_packages(&apkindex_archive(INDEX)).unwrap();
        assert!(packages.contains(&"php84".to_string()));
        assert!(packages.contains(&"php84-fpm".to_string()));
        assert_eq!(packages.len(), 6);
    }

    #[test]
    fn apkindex_rejects_garbage() {
        assert!(matches!(
            parse_apkindex_packages(b"not gzip at all"),
            Err(ParseError::Gzip(_))
        ));
    }

    #[test]
    fn apkindex_without_packages_is_empty_error() {
        let err = parse_apkindex_packages(&apkindex_archive("C:Q1abc=\n")).unwrap_err();
        assert!(matches!(err, ParseError::Empty));
    }

    #[test]
    fn php_versions_only_from_base_packages() {
        let packages = parse_apkindex_packages(&apkindex_archive(INDEX)).unwrap();
        let versions = extract_php_versions(&packages);
        assert_eq!(versions, vec!["8.3".to_string(), "8.4".to_string()]);
    }

    #[test]
    fn php_versions_support_two_digit_minor() {
        let versions = extract_php_versions(["php810", "php89"]);
        assert!(versions.contains(&"8.10".to_string()));
        assert!(versions.contains(&"8.9".to_string()));
    }

    #[test]
    fn majors_from_release_listing() {
        let html = r#"<a href="../">../</a>
<a href="1.41/">1.41/</a>   01-Jan-2024
<a href="1.42/">1.42/</a>
<a href="1.43/">1.43/</a>
<a href="1.5/">1.5/</a>
<a href="archive/">archive/</a>"#;
        let majors = extract_mediawiki_majors(html);
        assert_eq!(majors.len(), 4);
        assert!(majors.contains(&"1.43".to_string()));
        assert!(!majors.iter().any(|m| m == "archive"));
    }

    #[test]
    fn tarballs_skip_release_candidates_and_signatures() {
        let html = r#"<a href="mediawiki-1.43.0-rc.0.tar.gz">x</a>
<a href="mediawiki-1.43.0.tar.gz">x</a>
<a href="mediawiki-1.43.0.tar.gz.sig">x</a>
<a href="mediawiki-1.43.1.tar.gz">x</a>
<a href="mediawiki-core-1.43.2.tar.gz">x</a>"#;
        let versions = extract_mediawiki_tarball_versions(html);
        assert_eq!(versions, vec!["1.43.0".to_string(), "1.43.1".to_string()]);
    }

    #[test]
    fn tags_filtered_to_plain_releases() {
        let json = r#"[{"name":"1.44.0-wmf.3"},{"name":"1.43.1"},{"name":"1.42.4"},{"name":"wmf/1.44"}]"#;
        let versions = extract_tag_versions(json).unwrap();
        assert_eq!(versions, vec!["1.43.1".to_string(), "1.42.4".to_string()]);
    }

    #[test]
    fn tags_reject_non_list_json() {
        assert!(matches!(
            extract_tag_versions(r#"{"message":"rate limited"}"#),
            Err(ParseError::Json(_))
        ));
    }
}
