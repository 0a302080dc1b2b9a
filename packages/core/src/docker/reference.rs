//! Image naming
//!
//! Docker images follow `[registry/]namespace/name[:tag]`. Docker Hub
//! references omit the registry, so `docker.io/alice/mediawiki:1.43` is
//! written `alice/mediawiki:1.43`.
//!
//! Every build gets three tags that alias the same image:
//!   alice/mediawiki:1.43.0   exact MediaWiki version
//!   alice/mediawiki:1.43     major version
//!   alice/mediawiki:latest

use crate::config::{PipelineConfig, RegistryCredentials, ValidationError, username_namespace};
use crate::versions::VersionSet;

/// Namespace used for local-only builds with no namespace or username
pub const LOCAL_NAMESPACE: &str = "local";

/// Tag that always points at the newest build
pub const LATEST_TAG: &str = "latest";

const DOCKER_HUB_HOSTS: &[&str] = &["docker.io", "index.docker.io", "registry-1.docker.io"];

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference {
    registry: String,
    namespace: String,
    name: String,
    tag: String,
}

impl ImageReference {
    pub fn new(
        registry: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
        tag: impl Into<String>,
    ) -> Self {
        Self {
            registry: registry.into(),
            namespace: namespace.into(),
            name: name.into(),
            tag: tag.into(),
        }
    }

    pub fn registry(&self) -> &str {
        &self.registry
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn is_docker_hub(&self) -> bool {
        DOCKER_HUB_HOSTS.contains(&self.registry.as_str())
    }

    /// `namespace/name`, as used in registry token scopes
    pub fn path(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    /// Repository as Docker names it locally (registry omitted for Docker Hub)
    pub fn repository(&self) -> String {
        if self.is_docker_hub() {
            self.path()
        } else {
            format!("{}/{}", self.registry, self.path())
        }
    }

    /// Same repository, different tag
    pub fn with_tag(&self, tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..self.clone()
        }
    }
}

impl std::fmt::Display for ImageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.repository(), self.tag)
    }
}

/// Namespace: explicit config, then the registry username, then `local`
///
/// A username that is not a valid repository component (an e-mail
/// address, say) is rejected instead of producing a reference Docker
/// refuses later.
pub fn resolve_namespace(
    config: &PipelineConfig,
    credentials: Option<&RegistryCredentials>,
) -> Result<String, ValidationError> {
    match (&config.namespace, credentials) {
        (Some(namespace), _) => Ok(namespace.clone()),
        (None, Some(credentials)) => username_namespace(&credentials.username),
        (None, None) => Ok(LOCAL_NAMESPACE.to_string()),
    }
}

/// The three references for a build: exact version, major version, latest
///
/// The first entry is the tag the image is built under.
pub fn image_references(
    config: &PipelineConfig,
    namespace: &str,
    versions: &VersionSet,
) -> [ImageReference; 3] {
    let primary = ImageReference::new(
        config.registry.clone(),
        namespace,
        config.image_name.clone(),
        versions.mediawiki_version(),
    );
    let major = primary.with_tag(versions.mediawiki_major_version());
    let latest = primary.with_tag(LATEST_TAG);
    [primary, major, latest]
}
