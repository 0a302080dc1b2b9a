//! Bounded fixed-interval polling
//!
//! Smoke checks wait for a container to come up by repeating a probe a
//! fixed number of times. A probe reports `Pending` to try again after the
//! interval, or `Fatal` to stop immediately.

use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio_retry::RetryIf;
use tokio_retry::strategy::FixedInterval;
use tracing::debug;

/// Attempt ceiling and spacing for one check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl PollPolicy {
    /// Loopback ping inside the container: 10 attempts, 3s apart
    pub const PING: Self = Self::new(10, Duration::from_secs(3));

    /// Docker health status: 20 attempts, 5s apart
    pub const HEALTH: Self = Self::new(20, Duration::from_secs(5));

    /// MediaWiki setup page: 20 attempts, 5s apart
    pub const SETUP_PAGE: Self = Self::new(20, Duration::from_secs(5));

    pub const fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
        }
    }
}

/// Why a single probe attempt did not succeed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeFailure<E> {
    /// Not ready yet; retry after the interval
    Pending(E),
    /// Will never succeed; stop polling
    Fatal(E),
}

impl<E> ProbeFailure<E> {
    fn is_pending(&self) -> bool {
        matches!(self, ProbeFailure::Pending(_))
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PollError<E> {
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },

    #[error("aborted on attempt {attempt}: {reason}")]
    Aborted { attempt: u32, reason: E },
}

impl<E> PollError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            PollError::Exhausted { attempts, .. } => *attempts,
            PollError::Aborted { attempt, .. } => *attempt,
        }
    }

    pub fn into_inner(self) -> E {
        match self {
            PollError::Exhausted { last, .. } => last,
            PollError::Aborted { reason, .. } => reason,
        }
    }
}

/// Successful poll result with the attempt it succeeded on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Polled<T> {
    pub value: T,
    pub attempts: u32,
}

/// Run `probe` until it succeeds, fails fatally or the policy is exhausted
///
/// The probe receives the 1-based attempt number. The first attempt runs
/// immediately; later ones follow `policy.interval` apart.
pub async fn poll_until<T, E, P, Fut>(
    policy: PollPolicy,
    mut probe: P,
) -> Result<Polled<T>, PollError<E>>
where
    P: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ProbeFailure<E>>>,
{
    let retries = policy.max_attempts.saturating_sub(1) as usize;
    let strategy = FixedInterval::new(policy.interval).take(retries);
    let mut attempt = 0u32;

    let result = RetryIf::start(
        strategy,
        || {
            attempt += 1;
            debug!("Poll attempt {}/{}", attempt, policy.max_attempts);
            probe(attempt)
        },
        ProbeFailure::is_pending,
    )
    .await;

    match result {
        Ok(value) => Ok(Polled {
            value,
            attempts: attempt,
        }),
        Err(ProbeFailure::Pending(last)) => Err(PollError::Exhausted {
            attempts: attempt,
            last,
        }),
        Err(ProbeFailure::Fatal(reason)) => Err(PollError::Aborted {
            attempt,
            reason,
        }),
    }
}
