//! Bounded-time convergence polling.
//!
//! After a disruptive action (pod deletion, rollout restart) the cluster
//! takes seconds to minutes to settle. [`RecoveryPoller::poll_until`] checks
//! a predicate at a fixed cadence until it reports convergence or the
//! timeout elapses:
//!
//! ```text
//! Polling ──(predicate true)──> Converged
//!    │
//!    └──(elapsed >= timeout)──> TimedOut
//! ```
//!
//! Both terminal states return a [`PollOutcome`]; neither raises. The
//! predicate is infallible by signature: anything it cannot observe must be
//! reported as "not yet converged".

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Source of time for the poller.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;

    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;
}

/// Wall-clock time from the tokio runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// One predicate evaluation: whether it converged, and what was seen.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation<T> {
    pub converged: bool,
    pub value: T,
}

impl<T> Observation<T> {
    pub fn converged(value: T) -> Self {
        Self {
            converged: true,
            value,
        }
    }

    pub fn pending(value: T) -> Self {
        Self {
            converged: false,
            value,
        }
    }
}

/// Terminal state of a poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Converged,
    TimedOut,
}

/// Result of a poll.
#[derive(Debug, Clone, PartialEq)]
pub struct PollOutcome<T> {
    pub converged: bool,
    /// Time from the start of polling to the final evaluation
    pub elapsed: Duration,
    /// Number of predicate evaluations
    pub attempts: u32,
    pub last_observation: Option<T>,
}

impl<T> PollOutcome<T> {
    pub fn state(&self) -> PollState {
        if self.converged {
            PollState::Converged
        } else {
            PollState::TimedOut
        }
    }
}

/// Fixed-cadence convergence loop.
#[derive(Debug, Clone, Default)]
pub struct RecoveryPoller<K = TokioClock> {
    clock: K,
}

impl RecoveryPoller<TokioClock> {
    pub fn new() -> Self {
        Self { clock: TokioClock }
    }
}

impl<K: Clock> RecoveryPoller<K> {
    pub fn with_clock(clock: K) -> Self {
        Self { clock }
    }

    pub fn clock(&self) -> &K {
        &self.clock
    }

    /// Evaluate `predicate` every `interval` until it converges or `timeout`
    /// has elapsed.
    ///
    /// The first evaluation is immediate. Sleeps are clamped to the time
    /// remaining, so the last evaluation happens at the deadline and a
    /// timed-out outcome always has `elapsed >= timeout`.
    pub async fn poll_until<T, F, Fut>(
        &self,
        mut predicate: F,
        timeout: Duration,
        interval: Duration,
    ) -> PollOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Observation<T>>,
    {
        let start = self.clock.now();
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let observation = predicate().await;
            let elapsed = self.clock.now().saturating_duration_since(start);

            if observation.converged {
                info!(?elapsed, attempts, "Converged");
                return PollOutcome {
                    converged: true,
                    elapsed,
                    attempts,
                    last_observation: Some(observation.value),
                };
            }

            if elapsed >= timeout {
                warn!(?elapsed, attempts, ?timeout, "Did not converge before timeout");
                return PollOutcome {
                    converged: false,
                    elapsed,
                    attempts,
                    last_observation: Some(observation.value),
                };
            }

            let pause = interval.min(timeout - elapsed);
            debug!(attempts, ?elapsed, ?pause, "Not converged yet");
            self.clock.sleep(pause).await;
        }
    }

    /// [`poll_until`](Self::poll_until) for a plain boolean predicate.
    pub async fn poll_until_true<F, Fut>(
        &self,
        mut predicate: F,
        timeout: Duration,
        interval: Duration,
    ) -> PollOutcome<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        self.poll_until(
            || {
                let check = predicate();
                async move {
                    if check.await {
                        Observation::converged(())
                    } else {
                        Observation::pending(())
                    }
                }
            },
            timeout,
            interval,
        )
        .await
    }
}
