//! mediawiki-image-core - build pipeline for MediaWiki container images
//!
//! This crate holds everything the CLI drives:
//! - Version discovery for PHP and MediaWiki with static fallbacks
//! - Dockerfile and health-check script generation
//! - Docker image build, tagging and push
//! - Post-build smoke tests against a throwaway container
//! - Pipeline orchestration tying the stages together

pub mod artifacts;
pub mod config;
pub mod docker;
pub mod pipeline;
pub mod poll;
pub mod publish;
pub mod smoke;
pub mod versions;

pub use artifacts::{ArtifactError, ArtifactGenerator, BuildArtifacts, GeneratedArtifacts};
pub use config::{
    ConfigError, ExtensionPolicy, PipelineConfig, PipelineOptions, RegistryCredentials,
    load_config, resolve_credentials,
};
pub use docker::{DockerClient, DockerError, ImageReference, ImageRuntime, ProgressReporter};
pub use pipeline::{
    Pipeline, PipelineError, PipelineEvent, PipelineObserver, PipelineReport, resolve_versions,
    run_pipeline,
};
pub use publish::{PublishDecision, PublishError, Publisher};
pub use smoke::{CheckFailure, CheckStatus, SmokeCheck, SmokePolicies, SmokeTester, TestOutcome};
pub use versions::{HttpFetcher, ResolvedVersions, VersionResolver, VersionSet, VersionSource};

/// Library version from Cargo.toml
pub fn get_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
