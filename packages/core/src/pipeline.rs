//! Stage orchestration
//!
//! Resolve versions, generate the build context, build and tag the image,
//! smoke-test it in a throwaway container, then publish when allowed.
//! Stages run strictly in order and Ctrl-C stops whichever one is running.
//! The test container is removed whatever happens once it has been started.

use crate::artifacts::{ArtifactError, ArtifactGenerator, GeneratedArtifacts};
use crate::config::{PipelineConfig, PipelineOptions, ValidationError};
use crate::docker::{
    BuildRequest, DockerError, ImageReference, ImageRuntime, ProgressReporter, image_labels,
    image_references, resolve_namespace,
};
use crate::publish::{PublishDecision, PublishError, Publisher};
use crate::smoke::{CheckResult, SmokeCheck, SmokePolicies, SmokeProgress, SmokeTester, TestOutcome};
use crate::versions::{HttpFetch, ResolvedVersions, VersionResolver};
use std::future::Future;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Artifacts(#[from] ArtifactError),

    #[error("Failed to write versions file {}: {source}", path.display())]
    VersionsFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Namespace(#[from] ValidationError),

    #[error(transparent)]
    Build(DockerError),

    #[error("Failed to tag image: {0}")]
    Tag(#[source] DockerError),

    #[error("Failed to start test container: {0}")]
    Container(#[source] DockerError),

    #[error("Smoke tests failed{}", failed_check_suffix(.0))]
    TestsFailed(Box<TestOutcome>),

    #[error("Interrupted")]
    Interrupted,

    #[error(transparent)]
    Publish(#[from] PublishError),
}

fn failed_check_suffix(outcome: &TestOutcome) -> String {
    match outcome.first_failure() {
        Some((check, failure)) => format!(" at the {check} check: {}", failure.reason),
        None => String::new(),
    }
}

impl PipelineError {
    /// The Docker failure underneath, if any
    pub fn docker_error(&self) -> Option<&DockerError> {
        match self {
            PipelineError::Build(e) | PipelineError::Tag(e) | PipelineError::Container(e) => {
                Some(e)
            }
            PipelineError::Publish(PublishError::Auth { source, .. })
            | PipelineError::Publish(PublishError::Push { source, .. }) => Some(source),
            _ => None,
        }
    }
}

/// Milestones reported while the pipeline runs
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    VersionsResolved(ResolvedVersions),
    VersionsFileWritten(PathBuf),
    ArtifactsGenerated(GeneratedArtifacts),
    BuildStarted { tag: String },
    ImageBuilt { image_id: String, tags: Vec<String> },
    ContainerStarted { name: String },
    CheckStarted(SmokeCheck),
    CheckFinished(CheckResult),
    ContainerRemoved { name: String },
    PublishSkipped { decision: PublishDecision, auto_push: bool },
    Published { references: Vec<String> },
}

pub trait PipelineObserver {
    fn on_event(&mut self, event: &PipelineEvent);
}

impl PipelineObserver for () {
    fn on_event(&mut self, _event: &PipelineEvent) {}
}

/// Summary of a successful run
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub resolved: ResolvedVersions,
    pub artifacts: GeneratedArtifacts,
    pub image_id: String,
    pub references: Vec<ImageReference>,
    pub outcome: TestOutcome,
    pub publish: PublishDecision,
    pub pushed: Vec<ImageReference>,
    pub elapsed: Duration,
}

/// Resolve versions honoring pins and optionally write the versions file
pub async fn resolve_versions<F: HttpFetch>(
    fetcher: F,
    config: &PipelineConfig,
    options: &PipelineOptions,
) -> ResolvedVersions {
    VersionResolver::new(fetcher, config.sources.clone())
        .with_pinned(options.php_version.clone(), options.mediawiki_version.clone())
        .resolve()
        .await
}

/// Run every stage, stopping early on Ctrl-C
pub async fn run_pipeline<R, F, O>(
    runtime: &R,
    fetcher: F,
    config: &PipelineConfig,
    options: &PipelineOptions,
    observer: &mut O,
    progress: &mut ProgressReporter,
) -> Result<PipelineReport, PipelineError>
where
    R: ImageRuntime,
    F: HttpFetch,
    O: PipelineObserver,
{
    Pipeline::new(runtime, config, options)
        .run(fetcher, observer, progress, ctrl_c())
        .await
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        // Without a signal handler the run is simply not interruptible
        warn!("Could not listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
}

pub struct Pipeline<'a, R> {
    runtime: &'a R,
    config: &'a PipelineConfig,
    options: &'a PipelineOptions,
    smoke_policies: SmokePolicies,
}

impl<'a, R: ImageRuntime> Pipeline<'a, R> {
    pub fn new(runtime: &'a R, config: &'a PipelineConfig, options: &'a PipelineOptions) -> Self {
        Self {
            runtime,
            config,
            options,
            smoke_policies: SmokePolicies::default(),
        }
    }

    pub fn with_smoke_policies(mut self, policies: SmokePolicies) -> Self {
        self.smoke_policies = policies;
        self
    }

    /// Run every stage until done or until `shutdown` completes
    ///
    /// An interrupted run returns [`PipelineError::Interrupted`] from
    /// whichever stage was in flight. A test container that was started and
    /// not yet removed is removed before returning.
    pub async fn run<F, O, S>(
        &self,
        fetcher: F,
        observer: &mut O,
        progress: &mut ProgressReporter,
        shutdown: S,
    ) -> Result<PipelineReport, PipelineError>
    where
        F: HttpFetch,
        O: PipelineObserver,
        S: Future<Output = ()>,
    {
        let mut container_live = false;
        let result = tokio::select! {
            biased;
            _ = shutdown => {
                warn!("Interrupted, stopping the pipeline");
                Err(PipelineError::Interrupted)
            }
            result = self.run_stages(fetcher, observer, progress, &mut container_live) => result,
        };

        if container_live {
            self.remove_container(&self.config.container_name, observer).await;
        }
        result
    }

    async fn run_stages<F, O>(
        &self,
        fetcher: F,
        observer: &mut O,
        progress: &mut ProgressReporter,
        container_live: &mut bool,
    ) -> Result<PipelineReport, PipelineError>
    where
        F: HttpFetch,
        O: PipelineObserver,
    {
        let started = Instant::now();

        let resolved = resolve_versions(fetcher, self.config, self.options).await;
        observer.on_event(&PipelineEvent::VersionsResolved(resolved.clone()));
        let versions = &resolved.versions;

        if self.options.output_versions {
            let path = self.config.versions_file.clone();
            versions
                .write_env_file(&path)
                .map_err(|source| PipelineError::VersionsFile {
                    path: path.clone(),
                    source,
                })?;
            info!("Wrote versions to {}", path.display());
            observer.on_event(&PipelineEvent::VersionsFileWritten(path));
        }

        let artifacts =
            ArtifactGenerator::from_config(self.config)?.generate(versions, &self.config.work_dir)?;
        observer.on_event(&PipelineEvent::ArtifactsGenerated(artifacts.clone()));

        let namespace = resolve_namespace(self.config, self.options.credentials.as_ref())?;
        let references = image_references(self.config, &namespace, versions);
        let primary = references[0].to_string();

        observer.on_event(&PipelineEvent::BuildStarted {
            tag: primary.clone(),
        });
        let request = BuildRequest {
            tag: primary.clone(),
            build_args: versions.build_args(),
            labels: image_labels(versions, chrono::Utc::now()),
            no_cache: self.config.no_cache,
        };
        let image_id = self
            .runtime
            .build_image(&artifacts.dir, &request, progress)
            .await
            .map_err(PipelineError::Build)?;
        for reference in &references[1..] {
            self.runtime
                .tag_image(&primary, reference)
                .await
                .map_err(PipelineError::Tag)?;
        }
        observer.on_event(&PipelineEvent::ImageBuilt {
            image_id: image_id.clone(),
            tags: references.iter().map(ToString::to_string).collect(),
        });

        let outcome = self.smoke_test(&primary, observer, container_live).await?;
        if !outcome.all_passed() {
            return Err(PipelineError::TestsFailed(Box::new(outcome)));
        }

        let decision =
            PublishDecision::decide(&outcome, self.options.credentials.as_ref());
        let pushed = match (&decision, &self.options.credentials) {
            (PublishDecision::Publish, Some(credentials)) => {
                let pushed = Publisher::new(self.runtime, self.config)
                    .publish(&primary, versions, credentials, progress)
                    .await?;
                observer.on_event(&PipelineEvent::Published {
                    references: pushed.iter().map(ToString::to_string).collect(),
                });
                pushed
            }
            _ => {
                if self.options.auto_push {
                    warn!("--auto-push given but no registry credentials found; not publishing");
                } else {
                    info!("Publishing {}", decision);
                }
                observer.on_event(&PipelineEvent::PublishSkipped {
                    decision,
                    auto_push: self.options.auto_push,
                });
                Vec::new()
            }
        };

        Ok(PipelineReport {
            resolved,
            artifacts,
            image_id,
            references: references.to_vec(),
            outcome,
            publish: decision,
            pushed,
            elapsed: started.elapsed(),
        })
    }

    /// Start the test container, run the checks, remove the container
    ///
    /// `container_live` stays set while the container may exist so an
    /// interrupted run can still clean it up.
    async fn smoke_test<O: PipelineObserver>(
        &self,
        image: &str,
        observer: &mut O,
        container_live: &mut bool,
    ) -> Result<TestOutcome, PipelineError> {
        let name = &self.config.container_name;
        *container_live = true;
        self.runtime
            .start_test_container(name, image)
            .await
            .map_err(PipelineError::Container)?;
        observer.on_event(&PipelineEvent::ContainerStarted { name: name.clone() });

        let outcome = SmokeTester::new(self.runtime)
            .with_policies(self.smoke_policies)
            .test_observed(name, |step| match step {
                SmokeProgress::Started(check) => {
                    observer.on_event(&PipelineEvent::CheckStarted(check));
                }
                SmokeProgress::Finished(result) => {
                    observer.on_event(&PipelineEvent::CheckFinished(result.clone()));
                }
            })
            .await;

        self.remove_container(name, observer).await;
        *container_live = false;
        Ok(outcome)
    }

    async fn remove_container<O: PipelineObserver>(&self, name: &str, observer: &mut O) {
        match self.runtime.remove_container(name).await {
            Ok(()) => observer.on_event(&PipelineEvent::ContainerRemoved {
                name: name.to_string(),
            }),
            Err(e) => warn!("Failed to remove test container {name}: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegistryCredentials;
    use crate::smoke::tests::{FakeRuntime, exec_fail, running};
    use crate::versions::FetchError;
    use std::collections::VecDeque;

    /// Every upstream lookup fails
    struct OfflineFetcher;

    impl HttpFetch for OfflineFetcher {
        async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
            Err(FetchError::Request {
                url: url.to_string(),
                message: "network unreachable".to_string(),
            })
        }
    }

    #[derive(Default)]
    struct Recorder(Vec<PipelineEvent>);

    impl PipelineObserver for Recorder {
        fn on_event(&mut self, event: &PipelineEvent) {
            self.0.push(event.clone());
        }
    }

    fn config_in(dir: &std::path::Path) -> PipelineConfig {
        PipelineConfig {
            work_dir: dir.join("build"),
            versions_file: dir.join("versions.env"),
            ..PipelineConfig::default()
        }
    }

    async fn run_with(
        fake: &FakeRuntime,
        config: &PipelineConfig,
        options: &PipelineOptions,
        recorder: &mut Recorder,
    ) -> Result<PipelineReport, PipelineError> {
        Pipeline::new(fake, config, options)
            .run(
                OfflineFetcher,
                recorder,
                &mut ProgressReporter::hidden(),
                std::future::pending(),
            )
            .await
    }

    #[tokio::test(start_paused = true)]
    async fn offline_run_without_credentials_succeeds_without_registry() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let options = PipelineOptions {
            output_versions: true,
            ..PipelineOptions::default()
        };
        let fake = FakeRuntime::healthy();
        let mut recorder = Recorder::default();

        let report = run_with(&fake, &config, &options, &mut recorder).await.unwrap();

        let versions = &report.resolved.versions;
        assert_eq!(versions.php_version(), "8.4");
        assert_eq!(versions.mediawiki_version(), "1.43.0");
        assert_eq!(versions.mediawiki_major_version(), "1.43");
        assert!(report.outcome.all_passed());
        assert_eq!(report.publish, PublishDecision::SkipMissingCredentials);
        assert!(report.pushed.is_empty());

        assert!(fake.calls_starting_with("auth").is_empty());
        assert!(fake.calls_starting_with("push").is_empty());
        assert_eq!(
            fake.calls_starting_with("tag"),
            vec![
                "tag local/mediawiki:1.43.0 local/mediawiki:1.43",
                "tag local/mediawiki:1.43.0 local/mediawiki:latest",
            ]
        );
        assert_eq!(fake.calls_starting_with("remove"), vec!["remove mediawiki-smoke-test"]);

        let dockerfile = std::fs::read_to_string(&report.artifacts.dockerfile).unwrap();
        assert!(dockerfile.contains("ARG PHP_VERSION=8.4"));
        assert!(dockerfile.contains("ARG MEDIAWIKI_VERSION=1.43.0"));
        assert!(dockerfile.contains("ARG MEDIAWIKI_MAJOR_VERSION=1.43"));

        let env = std::fs::read_to_string(dir.path().join("versions.env")).unwrap();
        assert_eq!(
            env,
            "PHP_VERSION=8.4\nMEDIAWIKI_VERSION=1.43.0\nMEDIAWIKI_MAJOR_VERSION=1.43\n"
        );
        assert!(recorder
            .0
            .iter()
            .any(|e| matches!(e, PipelineEvent::PublishSkipped { auto_push: false, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn credentials_publish_three_tags() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let options = PipelineOptions {
            credentials: Some(RegistryCredentials::new("alice", "token")),
            ..PipelineOptions::default()
        };
        let fake = FakeRuntime::healthy();

        let report = run_with(&fake, &config, &options, &mut Recorder::default())
            .await
            .unwrap();

        assert_eq!(report.publish, PublishDecision::Publish);
        assert_eq!(
            fake.calls_starting_with("push"),
            vec![
                "push alice/mediawiki:1.43.0",
                "push alice/mediawiki:1.43",
                "push alice/mediawiki:latest",
            ]
        );
        assert_eq!(fake.calls_starting_with("build alice/mediawiki:1.43.0").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_smoke_test_blocks_publish_and_removes_container() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let options = PipelineOptions {
            credentials: Some(RegistryCredentials::new("alice", "token")),
            auto_push: true,
            ..PipelineOptions::default()
        };
        let fake = FakeRuntime::healthy();
        *fake.ping.borrow_mut() = VecDeque::from([exec_fail(1, "100% packet loss")]);

        let err = run_with(&fake, &config, &options, &mut Recorder::default())
            .await
            .unwrap_err();

        let PipelineError::TestsFailed(outcome) = err else {
            panic!("expected test failure, got {err:?}");
        };
        assert_eq!(outcome.first_failure().unwrap().0, SmokeCheck::Ping);
        assert!(fake.calls_starting_with("auth").is_empty());
        assert!(fake.calls_starting_with("push").is_empty());
        assert_eq!(fake.calls_starting_with("remove").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn build_failure_stops_before_container() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let fake = FakeRuntime {
            fail_build: true,
            ..FakeRuntime::healthy()
        };

        let err = run_with(&fake, &config, &PipelineOptions::default(), &mut Recorder::default())
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Build(_)));
        assert!(err.docker_error().is_some());
        assert!(fake.calls_starting_with("start").is_empty());
        assert!(fake.calls_starting_with("remove").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn interrupt_still_removes_container() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let options = PipelineOptions::default();
        let fake = FakeRuntime::healthy();
        // Health never settles, so only the shutdown signal ends the run
        *fake.statuses.borrow_mut() = VecDeque::from([running(Some("starting"))]);

        let err = Pipeline::new(&fake, &config, &options)
            .run(
                OfflineFetcher,
                &mut (),
                &mut ProgressReporter::hidden(),
                tokio::time::sleep(Duration::from_secs(12)),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Interrupted));
        assert_eq!(fake.calls_starting_with("remove"), vec!["remove mediawiki-smoke-test"]);
    }

    #[tokio::test(start_paused = true)]
    async fn interrupt_during_push_stops_publishing() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let options = PipelineOptions {
            credentials: Some(RegistryCredentials::new("alice", "token")),
            ..PipelineOptions::default()
        };
        let fake = FakeRuntime {
            push_delay: Some(Duration::from_secs(60)),
            ..FakeRuntime::healthy()
        };
        let mut recorder = Recorder::default();

        let err = Pipeline::new(&fake, &config, &options)
            .run(
                OfflineFetcher,
                &mut recorder,
                &mut ProgressReporter::hidden(),
                tokio::time::sleep(Duration::from_secs(90)),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Interrupted));
        assert_eq!(err.to_string(), "Interrupted");
        assert_eq!(
            fake.calls_starting_with("push"),
            vec!["push alice/mediawiki:1.43.0", "push alice/mediawiki:1.43"]
        );
        // Removed once after the checks, not again on interrupt
        assert_eq!(fake.calls_starting_with("remove").len(), 1);
        assert!(!recorder
            .0
            .iter()
            .any(|e| matches!(e, PipelineEvent::Published { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn interrupt_before_build_never_starts_container() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let options = PipelineOptions::default();
        let fake = FakeRuntime::healthy();

        let err = Pipeline::new(&fake, &config, &options)
            .run(
                OfflineFetcher,
                &mut (),
                &mut ProgressReporter::hidden(),
                std::future::ready(()),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Interrupted));
        assert!(fake.calls_starting_with("start").is_empty());
        assert!(fake.calls_starting_with("remove").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn email_username_fails_before_build() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let options = PipelineOptions {
            credentials: Some(RegistryCredentials::new("alice@example.com", "token")),
            ..PipelineOptions::default()
        };
        let fake = FakeRuntime::healthy();

        let err = run_with(&fake, &config, &options, &mut Recorder::default())
            .await
            .unwrap_err();

        let PipelineError::Namespace(error) = err else {
            panic!("expected namespace error, got {err:?}");
        };
        assert_eq!(error.field, "namespace");
        assert!(fake.calls_starting_with("build").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn auto_push_without_credentials_is_skipped_not_failed() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let options = PipelineOptions {
            auto_push: true,
            ..PipelineOptions::default()
        };
        let fake = FakeRuntime::healthy();
        let mut recorder = Recorder::default();

        let report = run_with(&fake, &config, &options, &mut recorder).await.unwrap();

        assert_eq!(report.publish, PublishDecision::SkipMissingCredentials);
        assert!(recorder.0.contains(&PipelineEvent::PublishSkipped {
            decision: PublishDecision::SkipMissingCredentials,
            auto_push: true,
        }));
    }

    #[test]
    fn tests_failed_message_names_the_check() {
        use crate::smoke::{CheckFailure, CheckStatus};

        let outcome = TestOutcome::new(
            CheckStatus::Passed { attempts: 1 },
            CheckStatus::Failed(CheckFailure {
                reason: "container is no longer running (state: exited)".to_string(),
                attempts: 3,
                last_response: None,
                logs: vec![],
            }),
            CheckStatus::Skipped,
        );
        let err = PipelineError::TestsFailed(Box::new(outcome));
        assert_eq!(
            err.to_string(),
            "Smoke tests failed at the health check: container is no longer running (state: exited)"
        );
    }
}
