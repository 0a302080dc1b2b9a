//! Registry publishing
//!
//! Pushing is gated twice: every smoke check must have passed, and both a
//! username and a token must be present. A skipped publish is not an error.

use crate::config::{PipelineConfig, RegistryCredentials, ValidationError};
use crate::docker::{DockerError, ImageReference, ImageRuntime, ProgressReporter};
use crate::docker::{image_references, resolve_namespace};
use crate::smoke::TestOutcome;
use crate::versions::VersionSet;
use serde::Serialize;
use std::fmt;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishDecision {
    Publish,
    /// Tests passed but no complete username/token pair was given
    SkipMissingCredentials,
    /// At least one smoke check failed or did not run
    BlockedByTests,
}

impl PublishDecision {
    pub fn decide(outcome: &TestOutcome, credentials: Option<&RegistryCredentials>) -> Self {
        if !outcome.all_passed() {
            PublishDecision::BlockedByTests
        } else if credentials.is_none() {
            PublishDecision::SkipMissingCredentials
        } else {
            PublishDecision::Publish
        }
    }
}

impl fmt::Display for PublishDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            PublishDecision::Publish => "publish",
            PublishDecision::SkipMissingCredentials => "skipped (no registry credentials)",
            PublishDecision::BlockedByTests => "skipped (smoke tests did not pass)",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error(transparent)]
    Namespace(#[from] ValidationError),

    #[error("Registry authentication failed for {repository}: {source}")]
    Auth {
        repository: String,
        #[source]
        source: DockerError,
    },

    #[error("Failed to push {reference}: {source}")]
    Push {
        reference: String,
        #[source]
        source: DockerError,
    },
}

pub struct Publisher<'a, R> {
    runtime: &'a R,
    config: &'a PipelineConfig,
}

impl<'a, R: ImageRuntime> Publisher<'a, R> {
    pub fn new(runtime: &'a R, config: &'a PipelineConfig) -> Self {
        Self { runtime, config }
    }

    /// References a publish would push, in push order
    pub fn references(
        &self,
        versions: &VersionSet,
        credentials: &RegistryCredentials,
    ) -> Result<[ImageReference; 3], ValidationError> {
        let namespace = resolve_namespace(self.config, Some(credentials))?;
        Ok(image_references(self.config, &namespace, versions))
    }

    /// Authenticate, then push the version, major and latest tags
    ///
    /// `image` is the local image the tags already point at. The first
    /// push failure stops the publish.
    pub async fn publish(
        &self,
        image: &str,
        versions: &VersionSet,
        credentials: &RegistryCredentials,
        progress: &mut ProgressReporter,
    ) -> Result<Vec<ImageReference>, PublishError> {
        let references = self.references(versions, credentials)?;
        let primary = &references[0];

        debug!("Publishing {} as {}", image, primary.repository());
        self.runtime
            .authenticate(primary, credentials)
            .await
            .map_err(|source| PublishError::Auth {
                repository: primary.repository(),
                source,
            })?;
        info!(
            "Authenticated to {} as {}",
            primary.registry(),
            credentials.username
        );

        let mut pushed = Vec::with_capacity(references.len());
        for reference in references {
            self.runtime
                .push_image(&reference, credentials, progress)
                .await
                .map_err(|source| PublishError::Push {
                    reference: reference.to_string(),
                    source,
                })?;
            pushed.push(reference);
        }

        Ok(pushed)
    }
}
