//! Post-build smoke tests
//!
//! Three checks run in order against a container started from the new
//! image. Each polls with a fixed attempt ceiling; the first failure
//! marks the remaining checks as skipped.

mod outcome;

pub use outcome::{CheckFailure, CheckResult, CheckStatus, SmokeCheck, TestOutcome};

use crate::artifacts::HTTP_PORT;
use crate::docker::{ContainerStatus, ImageRuntime};
use crate::poll::{PollError, PollPolicy, ProbeFailure, poll_until};
use tracing::{debug, info, warn};

/// Container log lines attached to a failed check
pub const LOG_TAIL_LINES: usize = 40;

/// Installer page path served by MediaWiki before LocalSettings.php exists
pub const SETUP_PAGE_PATH: &str = "/mw-config/index.php";

/// Either marker on the installer page counts as success
pub const SETUP_PAGE_MARKERS: [&str; 2] = ["installation", "LocalSettings.php"];

/// Captured responses are cut to this many characters in reports
const RESPONSE_EXCERPT_CHARS: usize = 400;

const PING_COMMAND: &[&str] = &["ping", "-c", "1", "-W", "2", "127.0.0.1"];

/// Attempt ceilings and intervals for each check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SmokePolicies {
    pub ping: PollPolicy,
    pub health: PollPolicy,
    pub setup_page: PollPolicy,
}

impl Default for SmokePolicies {
    fn default() -> Self {
        Self {
            ping: PollPolicy::PING,
            health: PollPolicy::HEALTH,
            setup_page: PollPolicy::SETUP_PAGE,
        }
    }
}

impl SmokePolicies {
    pub fn for_check(&self, check: SmokeCheck) -> PollPolicy {
        match check {
            SmokeCheck::Ping => self.ping,
            SmokeCheck::Health => self.health,
            SmokeCheck::SetupPage => self.setup_page,
        }
    }
}

/// Progress notifications while a smoke test runs
#[derive(Debug, Clone, Copy)]
pub enum SmokeProgress<'a> {
    Started(SmokeCheck),
    Finished(&'a CheckResult),
}

pub struct SmokeTester<'a, R> {
    runtime: &'a R,
    policies: SmokePolicies,
    log_tail: usize,
}

impl<'a, R: ImageRuntime> SmokeTester<'a, R> {
    pub fn new(runtime: &'a R) -> Self {
        Self {
            runtime,
            policies: SmokePolicies::default(),
            log_tail: LOG_TAIL_LINES,
        }
    }

    pub fn with_policies(mut self, policies: SmokePolicies) -> Self {
        self.policies = policies;
        self
    }

    /// Run all checks against `container`
    pub async fn test(&self, container: &str) -> TestOutcome {
        self.test_observed(container, |_| {}).await
    }

    /// Run all checks, reporting each start and result to `observe`
    pub async fn test_observed<F>(&self, container: &str, mut observe: F) -> TestOutcome
    where
        F: FnMut(SmokeProgress<'_>),
    {
        let mut statuses = Vec::with_capacity(SmokeCheck::ALL.len());
        let mut failed = false;

        for check in SmokeCheck::ALL {
            let status = if failed {
                debug!("Skipping {} check after earlier failure", check);
                CheckStatus::Skipped
            } else {
                observe(SmokeProgress::Started(check));
                let status = self.run_check(check, container).await;
                failed = !status.is_passed();
                status
            };
            let result = CheckResult { check, status };
            observe(SmokeProgress::Finished(&result));
            statuses.push(result.status);
        }

        let mut statuses = statuses.into_iter();
        let mut next = || statuses.next().unwrap_or(CheckStatus::Skipped);
        TestOutcome::new(next(), next(), next())
    }

    /// Run a single check to completion
    pub async fn run_check(&self, check: SmokeCheck, container: &str) -> CheckStatus {
        let policy = self.policies.for_check(check);
        info!(
            "Running {} check (up to {} attempts, {:?} apart)",
            check, policy.max_attempts, policy.interval
        );

        let result = match check {
            SmokeCheck::Ping => {
                poll_until(policy, |attempt| self.probe_ping(container, attempt)).await
            }
            SmokeCheck::Health => {
                poll_until(policy, |attempt| self.probe_health(container, attempt)).await
            }
            SmokeCheck::SetupPage => {
                poll_until(policy, |attempt| self.probe_setup_page(container, attempt)).await
            }
        };

        match result {
            Ok(polled) => {
                info!("{} check passed after {} attempt(s)", check, polled.attempts);
                CheckStatus::Passed {
                    attempts: polled.attempts,
                }
            }
            Err(err) => {
                let failure = self.failure(check, err, container).await;
                warn!("{} check failed: {}", check, failure.reason);
                CheckStatus::Failed(failure)
            }
        }
    }

    async fn failure(
        &self,
        check: SmokeCheck,
        err: PollError<ProbeReport>,
        container: &str,
    ) -> CheckFailure {
        let reason = match &err {
            PollError::Exhausted { attempts, last } => format!(
                "{check} check did not pass within {attempts} attempts: {}",
                last.summary
            ),
            PollError::Aborted { attempt, reason } => {
                format!("{check} check aborted on attempt {attempt}: {}", reason.summary)
            }
        };
        let attempts = err.attempts();
        let last_response = err.into_inner().response.map(|r| excerpt(&r));

        let logs = match self.runtime.tail_logs(container, self.log_tail).await {
            Ok(lines) => lines,
            Err(e) => {
                debug!("Could not read container logs: {}", e);
                vec![format!("(container logs unavailable: {e})")]
            }
        };

        CheckFailure {
            reason,
            attempts,
            last_response,
            logs,
        }
    }

    async fn probe_ping(
        &self,
        container: &str,
        attempt: u32,
    ) -> Result<(), ProbeFailure<ProbeReport>> {
        match self.runtime.exec(container, PING_COMMAND).await {
            Ok(output) if output.success() => Ok(()),
            Ok(output) => {
                debug!("Ping attempt {} exited with {}", attempt, output.exit_code);
                Err(ProbeFailure::Pending(ProbeReport::with_response(
                    format!("ping exited with status {}", output.exit_code),
                    output.output,
                )))
            }
            Err(e) => {
                debug!("Ping attempt {} could not run: {}", attempt, e);
                Err(ProbeFailure::Pending(ProbeReport::new(format!(
                    "ping could not run: {e}"
                ))))
            }
        }
    }

    async fn probe_health(
        &self,
        container: &str,
        attempt: u32,
    ) -> Result<(), ProbeFailure<ProbeReport>> {
        let status = match self.runtime.container_status(container).await {
            Ok(status) => status,
            Err(e) => {
                return Err(ProbeFailure::Pending(ProbeReport::new(format!(
                    "could not inspect container: {e}"
                ))));
            }
        };
        debug!(
            "Health attempt {}: state={} health={:?}",
            attempt, status.state, status.health
        );
        classify_health(&status)
    }

    async fn probe_setup_page(
        &self,
        container: &str,
        attempt: u32,
    ) -> Result<(), ProbeFailure<ProbeReport>> {
        let url = format!("http://127.0.0.1:{HTTP_PORT}{SETUP_PAGE_PATH}");
        let cmd = ["curl", "-sS", "--max-time", "10", url.as_str()];

        let page = match self.runtime.exec(container, &cmd).await {
            Ok(output) if output.success() => output.output,
            Ok(output) => {
                self.log_secondary_pages(container, attempt).await;
                return Err(ProbeFailure::Pending(ProbeReport::with_response(
                    format!("curl exited with status {}", output.exit_code),
                    output.output,
                )));
            }
            Err(e) => {
                return Err(ProbeFailure::Pending(ProbeReport::new(format!(
                    "could not fetch setup page: {e}"
                ))));
            }
        };

        if setup_page_ready(&page) {
            return Ok(());
        }

        self.log_secondary_pages(container, attempt).await;
        Err(ProbeFailure::Pending(ProbeReport::with_response(
            "setup page did not contain the expected content".to_string(),
            page,
        )))
    }

    /// Informational: which other pages answer while the installer does not
    async fn log_secondary_pages(&self, container: &str, attempt: u32) {
        for path in ["/", "/info.php"] {
            let url = format!("http://127.0.0.1:{HTTP_PORT}{path}");
            let cmd = [
                "curl",
                "-s",
                "-o",
                "/dev/null",
                "-w",
                "%{http_code}",
                "--max-time",
                "5",
                url.as_str(),
            ];
            match self.runtime.exec(container, &cmd).await {
                Ok(output) => info!(
                    "Setup page attempt {}: {} answered HTTP {}",
                    attempt,
                    path,
                    output.output.trim()
                ),
                Err(e) => debug!("Setup page attempt {}: {} not checked: {}", attempt, path, e),
            }
        }
    }
}

/// Failure detail carried between attempts
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ProbeReport {
    summary: String,
    response: Option<String>,
}

impl ProbeReport {
    fn new(summary: String) -> Self {
        Self {
            summary,
            response: None,
        }
    }

    fn with_response(summary: String, response: String) -> Self {
        Self {
            summary,
            response: Some(response),
        }
    }
}

/// A stopped container fails at once; anything short of healthy waits
fn classify_health(status: &ContainerStatus) -> Result<(), ProbeFailure<ProbeReport>> {
    if !status.running {
        return Err(ProbeFailure::Fatal(ProbeReport::new(format!(
            "container is no longer running (state: {})",
            status.state
        ))));
    }
    if status.is_healthy() {
        return Ok(());
    }
    let health = status.health.as_deref().unwrap_or("none reported");
    Err(ProbeFailure::Pending(ProbeReport::new(format!(
        "health status is {health}"
    ))))
}

pub fn setup_page_ready(page: &str) -> bool {
    SETUP_PAGE_MARKERS.iter().any(|marker| page.contains(marker))
}

fn excerpt(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= RESPONSE_EXCERPT_CHARS {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(RESPONSE_EXCERPT_CHARS).collect();
    format!("{cut}...")
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::RegistryCredentials;
    use crate::docker::{
        BuildRequest, DockerError, ExecOutput, ImageReference, ProgressReporter,
    };
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;
    use std::path::Path;
    use tokio::time::{Duration, Instant};

    /// Scripted container runtime
    ///
    /// Each exec pops the next scripted reply for its command (the last one
    /// repeats); status calls do the same for container states.
    #[derive(Default)]
    pub(crate) struct FakeRuntime {
        pub ping: RefCell<VecDeque<Result<ExecOutput, String>>>,
        pub setup_page: RefCell<VecDeque<Result<ExecOutput, String>>>,
        pub statuses: RefCell<VecDeque<ContainerStatus>>,
        pub logs: Vec<String>,
        pub ping_calls: Cell<u32>,
        pub status_calls: Cell<u32>,
        pub setup_calls: Cell<u32>,
        pub calls: RefCell<Vec<String>>,
        pub fail_build: bool,
        pub fail_push: bool,
        pub push_delay: Option<Duration>,
    }

    pub(crate) fn exec_ok(output: &str) -> Result<ExecOutput, String> {
        Ok(ExecOutput {
            exit_code: 0,
            output: output.to_string(),
        })
    }

    pub(crate) fn exec_fail(code: i64, output: &str) -> Result<ExecOutput, String> {
        Ok(ExecOutput {
            exit_code: code,
            output: output.to_string(),
        })
    }

    pub(crate) fn running(health: Option<&str>) -> ContainerStatus {
        ContainerStatus {
            running: true,
            state: "running".to_string(),
            health: health.map(str::to_string),
        }
    }

    pub(crate) fn exited() -> ContainerStatus {
        ContainerStatus {
            running: false,
            state: "exited".to_string(),
            health: Some("unhealthy".to_string()),
        }
    }

    fn next_reply<T: Clone>(queue: &RefCell<VecDeque<T>>) -> Option<T> {
        let mut queue = queue.borrow_mut();
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }

    impl FakeRuntime {
        /// Container that answers every check on the first attempt
        pub(crate) fn healthy() -> Self {
            let fake = Self::default();
            fake.ping.borrow_mut().push_back(exec_ok("1 packets received"));
            fake.statuses.borrow_mut().push_back(running(Some("healthy")));
            fake.setup_page
                .borrow_mut()
                .push_back(exec_ok("<title>MediaWiki 1.43.0 installation</title>"));
            fake
        }

        fn record(&self, call: String) {
            self.calls.borrow_mut().push(call);
        }

        pub(crate) fn calls_starting_with(&self, prefix: &str) -> Vec<String> {
            self.calls
                .borrow()
                .iter()
                .filter(|c| c.starts_with(prefix))
                .cloned()
                .collect()
        }
    }

    impl ImageRuntime for FakeRuntime {
        async fn build_image(
            &self,
            context_dir: &Path,
            request: &BuildRequest,
            _progress: &mut ProgressReporter,
        ) -> Result<String, DockerError> {
            self.record(format!("build {} {}", request.tag, context_dir.display()));
            if self.fail_build {
                return Err(DockerError::Build("exit code 1".to_string()));
            }
            Ok("sha256:feedface".to_string())
        }

        async fn tag_image(
            &self,
            source: &str,
            target: &ImageReference,
        ) -> Result<(), DockerError> {
            self.record(format!("tag {source} {target}"));
            Ok(())
        }

        async fn start_test_container(
            &self,
            name: &str,
            image: &str,
        ) -> Result<String, DockerError> {
            self.record(format!("start {name} {image}"));
            Ok("container-id".to_string())
        }

        async fn container_status(&self, _name: &str) -> Result<ContainerStatus, DockerError> {
            self.status_calls.set(self.status_calls.get() + 1);
            next_reply(&self.statuses)
                .ok_or_else(|| DockerError::Container("no scripted status".to_string()))
        }

        async fn exec(&self, _name: &str, cmd: &[&str]) -> Result<ExecOutput, DockerError> {
            let reply = match cmd.first().copied() {
                Some("ping") => {
                    self.ping_calls.set(self.ping_calls.get() + 1);
                    next_reply(&self.ping)
                }
                Some("curl") if cmd.contains(&"-w") => {
                    return Ok(ExecOutput {
                        exit_code: 0,
                        output: "200".to_string(),
                    });
                }
                Some("curl") => {
                    self.setup_calls.set(self.setup_calls.get() + 1);
                    next_reply(&self.setup_page)
                }
                _ => None,
            };
            match reply {
                Some(Ok(output)) => Ok(output),
                Some(Err(message)) => Err(DockerError::Exec(message)),
                None => Err(DockerError::Exec(format!("unscripted command {cmd:?}"))),
            }
        }

        async fn tail_logs(&self, _name: &str, lines: usize) -> Result<Vec<String>, DockerError> {
            let skip = self.logs.len().saturating_sub(lines);
            Ok(self.logs.iter().skip(skip).cloned().collect())
        }

        async fn remove_container(&self, name: &str) -> Result<(), DockerError> {
            self.record(format!("remove {name}"));
            Ok(())
        }

        async fn authenticate(
            &self,
            reference: &ImageReference,
            credentials: &RegistryCredentials,
        ) -> Result<(), DockerError> {
            self.record(format!("auth {} {}", reference.path(), credentials.username));
            Ok(())
        }

        async fn push_image(
            &self,
            reference: &ImageReference,
            _credentials: &RegistryCredentials,
            _progress: &mut ProgressReporter,
        ) -> Result<(), DockerError> {
            self.record(format!("push {reference}"));
            if let Some(delay) = self.push_delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail_push {
                return Err(DockerError::Push(format!("{reference}: denied")));
            }
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn all_checks_pass_on_responsive_container() {
        let fake = FakeRuntime::healthy();
        let start = Instant::now();
        let outcome = SmokeTester::new(&fake).test("mw").await;

        assert!(outcome.all_passed());
        assert_eq!(
            outcome.status(SmokeCheck::Ping),
            &CheckStatus::Passed { attempts: 1 }
        );
        assert_eq!(fake.ping_calls.get(), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn ping_fails_after_exactly_ten_attempts() {
        let fake = FakeRuntime::healthy();
        *fake.ping.borrow_mut() = VecDeque::from([exec_fail(1, "100% packet loss")]);
        let fake = FakeRuntime {
            logs: vec!["nginx: [emerg] bind() failed".to_string()],
            ..fake
        };

        let start = Instant::now();
        let outcome = SmokeTester::new(&fake).test("mw").await;

        assert_eq!(fake.ping_calls.get(), 10);
        assert_eq!(start.elapsed(), Duration::from_secs(27));
        let failure = outcome.status(SmokeCheck::Ping).failure().unwrap();
        assert_eq!(failure.attempts, 10);
        assert_eq!(failure.last_response.as_deref(), Some("100% packet loss"));
        assert_eq!(failure.logs, vec!["nginx: [emerg] bind() failed"]);
        assert_eq!(outcome.status(SmokeCheck::Health), &CheckStatus::Skipped);
        assert_eq!(outcome.status(SmokeCheck::SetupPage), &CheckStatus::Skipped);
        assert_eq!(fake.status_calls.get(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn ping_errors_are_retried() {
        let fake = FakeRuntime::healthy();
        *fake.ping.borrow_mut() = VecDeque::from([
            Err("container not running".to_string()),
            exec_ok("1 packets received"),
        ]);
        let outcome = SmokeTester::new(&fake).test("mw").await;
        assert_eq!(
            outcome.status(SmokeCheck::Ping),
            &CheckStatus::Passed { attempts: 2 }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_container_fails_health_immediately() {
        let fake = FakeRuntime::healthy();
        *fake.statuses.borrow_mut() = VecDeque::from([running(Some("starting")), exited()]);

        let start = Instant::now();
        let outcome = SmokeTester::new(&fake).test("mw").await;

        assert_eq!(fake.status_calls.get(), 2);
        assert_eq!(start.elapsed(), Duration::from_secs(5));
        let failure = outcome.status(SmokeCheck::Health).failure().unwrap();
        assert_eq!(failure.attempts, 2);
        assert!(failure.reason.contains("no longer running"));
        assert!(failure.reason.contains("exited"));
        assert_eq!(outcome.status(SmokeCheck::SetupPage), &CheckStatus::Skipped);
        assert_eq!(fake.setup_calls.get(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unhealthy_keeps_polling_until_ceiling() {
        let fake = FakeRuntime::healthy();
        *fake.statuses.borrow_mut() = VecDeque::from([running(Some("unhealthy"))]);

        let outcome = SmokeTester::new(&fake).test("mw").await;

        assert_eq!(fake.status_calls.get(), 20);
        let failure = outcome.status(SmokeCheck::Health).failure().unwrap();
        assert!(failure.reason.contains("health status is unhealthy"));
    }

    #[tokio::test(start_paused = true)]
    async fn health_passes_once_healthy() {
        let fake = FakeRuntime::healthy();
        *fake.statuses.borrow_mut() = VecDeque::from([
            running(None),
            running(Some("starting")),
            running(Some("healthy")),
        ]);
        let outcome = SmokeTester::new(&fake).test("mw").await;
        assert_eq!(
            outcome.status(SmokeCheck::Health),
            &CheckStatus::Passed { attempts: 3 }
        );
        assert!(outcome.all_passed());
    }

    #[tokio::test(start_paused = true)]
    async fn setup_page_accepts_either_marker() {
        let fake = FakeRuntime::healthy();
        *fake.setup_page.borrow_mut() = VecDeque::from([
            exec_ok("<html>502 Bad Gateway</html>"),
            exec_ok("LocalSettings.php not found."),
        ]);
        let outcome = SmokeTester::new(&fake).test("mw").await;
        assert_eq!(
            outcome.status(SmokeCheck::SetupPage),
            &CheckStatus::Passed { attempts: 2 }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn setup_page_failure_keeps_last_response() {
        let fake = FakeRuntime::healthy();
        *fake.setup_page.borrow_mut() = VecDeque::from([exec_ok("<html>502 Bad Gateway</html>")]);

        let outcome = SmokeTester::new(&fake).test("mw").await;

        assert_eq!(fake.setup_calls.get(), 20);
        let failure = outcome.status(SmokeCheck::SetupPage).failure().unwrap();
        assert_eq!(
            failure.last_response.as_deref(),
            Some("<html>502 Bad Gateway</html>")
        );
        assert!(!outcome.all_passed());
    }

    #[tokio::test(start_paused = true)]
    async fn observer_sees_every_check() {
        let fake = FakeRuntime::healthy();
        let mut seen = Vec::new();
        SmokeTester::new(&fake)
            .test_observed("mw", |progress| match progress {
                SmokeProgress::Started(check) => seen.push(format!("start {check}")),
                SmokeProgress::Finished(result) => seen.push(format!("done {}", result.check)),
            })
            .await;
        assert_eq!(
            seen,
            vec![
                "start ping",
                "done ping",
                "start health",
                "done health",
                "start setup page",
                "done setup page"
            ]
        );
    }

    #[test]
    fn setup_markers() {
        assert!(setup_page_ready("Please complete the installation"));
        assert!(setup_page_ready("LocalSettings.php not found"));
        assert!(!setup_page_ready("<h1>It works</h1>"));
    }

    #[test]
    fn excerpt_truncates_long_responses() {
        let long = "x".repeat(1000);
        let cut = excerpt(&long);
        assert_eq!(cut.len(), RESPONSE_EXCERPT_CHARS + 3);
        assert!(cut.ends_with("..."));
        assert_eq!(excerpt("  short  "), "short");
    }
}
