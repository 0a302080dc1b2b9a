//! Smoke test results

use serde::Serialize;
use std::fmt;

/// One post-build check, in the order they run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SmokeCheck {
    /// Loopback ping inside the container
    Ping,
    /// Docker HEALTHCHECK status
    Health,
    /// MediaWiki installer page
    SetupPage,
}

impl SmokeCheck {
    pub const ALL: [SmokeCheck; 3] = [SmokeCheck::Ping, SmokeCheck::Health, SmokeCheck::SetupPage];

    pub fn label(self) -> &'static str {
        match self {
            SmokeCheck::Ping => "ping",
            SmokeCheck::Health => "health",
            SmokeCheck::SetupPage => "setup page",
        }
    }
}

impl fmt::Display for SmokeCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Why a check failed, with what was seen last
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckFailure {
    pub reason: String,
    pub attempts: u32,
    /// Last captured response or command output
    pub last_response: Option<String>,
    /// Trailing container log lines at the time of failure
    pub logs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CheckStatus {
    Passed { attempts: u32 },
    Failed(CheckFailure),
    /// Not run because an earlier check failed
    Skipped,
}

impl CheckStatus {
    pub fn is_passed(&self) -> bool {
        matches!(self, CheckStatus::Passed { .. })
    }

    pub fn failure(&self) -> Option<&CheckFailure> {
        match self {
            CheckStatus::Failed(failure) => Some(failure),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckResult {
    pub check: SmokeCheck,
    pub status: CheckStatus,
}

/// Per-check statuses for one smoke test run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestOutcome {
    results: [CheckResult; 3],
}

impl TestOutcome {
    pub fn new(ping: CheckStatus, health: CheckStatus, setup_page: CheckStatus) -> Self {
        Self {
            results: [
                CheckResult {
                    check: SmokeCheck::Ping,
                    status: ping,
                },
                CheckResult {
                    check: SmokeCheck::Health,
                    status: health,
                },
                CheckResult {
                    check: SmokeCheck::SetupPage,
                    status: setup_page,
                },
            ],
        }
    }

    pub fn status(&self, check: SmokeCheck) -> &CheckStatus {
        match check {
            SmokeCheck::Ping => &self.results[0].status,
            SmokeCheck::Health => &self.results[1].status,
            SmokeCheck::SetupPage => &self.results[2].status,
        }
    }

    pub fn results(&self) -> &[CheckResult] {
        &self.results
    }

    /// Every check ran and passed
    pub fn all_passed(&self) -> bool {
        self.results.iter().all(|r| r.status.is_passed())
    }

    pub fn first_failure(&self) -> Option<(SmokeCheck, &CheckFailure)> {
        self.results
            .iter()
            .find_map(|r| r.status.failure().map(|f| (r.check, f)))
    }
}
