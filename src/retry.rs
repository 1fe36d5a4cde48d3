//! Retry logic for Google API operations with typed error classification.
//!
//! Every network-touching operation in this crate goes through
//! [`RetryExecutor`]: the operation is attempted, any error is classified as
//! [`ErrorClass::Fatal`] (returned straight away) or
//! [`ErrorClass::Retryable`] (logged, optionally followed by a recovery hook
//! such as a service handle reset, then retried after a geometrically growing
//! delay).

use std::fmt::Display;
use std::time::Duration;

use rand::Rng;
use tracing::{info, warn};

use crate::runtime::Runtime;

/// Number of retries allowed after the first attempt.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Delay before the first retry, in seconds.
pub const DEFAULT_RETRY_DELAY: f64 = 5.0;

/// Factor applied to the delay after each failed attempt.
pub const BACKOFF_MULTIPLIER: f64 = 1.5;

/// Logger namespace used when none is configured.
pub const DEFAULT_LOGGER: &str = "gapi_helper";

/// Half-width of the window used by [`RetryPolicy::jittered`], in seconds.
const JITTER_SPREAD: f64 = 5.0;

/// Lower bound of a jittered delay, in seconds.
const JITTER_FLOOR: f64 = 2.0;

/// Outcome of classifying an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Another attempt may succeed.
    Retryable,
    /// Retrying cannot help; surface the error immediately.
    Fatal,
}

/// How many times to retry and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt. Zero means a single attempt.
    pub max_attempts: u32,
    /// Seconds to wait before the first retry.
    pub initial_delay: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_delay: f64) -> Self {
        Self {
            max_attempts,
            initial_delay,
        }
    }

    pub fn with_initial_delay(mut self, initial_delay: f64) -> Self {
        self.initial_delay = initial_delay;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Returns a copy whose initial delay is drawn uniformly around the
    /// configured one (plus or minus five seconds, never under two seconds).
    ///
    /// Concurrent writers to the same spreadsheet use this so they do not
    /// all retry in lockstep.
    pub fn jittered(&self) -> Self {
        let low = self.initial_delay - JITTER_SPREAD;
        let high = self.initial_delay + JITTER_SPREAD;
        let delay = rand::rng().random_range(low..=high);
        self.with_initial_delay(delay.max(JITTER_FLOOR))
    }
}

fn to_duration(seconds: f64) -> Duration {
    Duration::try_from_secs_f64(seconds.max(0.0)).unwrap_or(Duration::MAX)
}

/// Runs fallible operations under a [`RetryPolicy`].
pub struct RetryExecutor<'a, R: Runtime> {
    runtime: &'a R,
    policy: RetryPolicy,
    logger: &'a str,
}

impl<'a, R: Runtime> RetryExecutor<'a, R> {
    pub fn new(runtime: &'a R, policy: RetryPolicy) -> Self {
        Self {
            runtime,
            policy,
            logger: DEFAULT_LOGGER,
        }
    }

    /// Sets the logger namespace attached to every retry event.
    pub fn with_logger(mut self, logger: &'a str) -> Self {
        self.logger = logger;
        self
    }

    /// Runs `operation` until it succeeds, fails fatally or exhausts the
    /// policy. No recovery action is taken between attempts.
    pub fn run<T, E, F, C>(&self, operation: F, classify: C) -> Result<T, E>
    where
        E: Display,
        F: FnMut() -> Result<T, E>,
        C: Fn(&E) -> ErrorClass,
    {
        self.run_with_recovery(operation, classify, || {})
    }

    /// Like [`run`](Self::run), but calls `on_retry` before each backoff
    /// sleep. Service-backed operations pass the handle's `reset` here so the
    /// next attempt re-authenticates.
    ///
    /// On exhaustion the error from the last attempt is returned unchanged.
    pub fn run_with_recovery<T, E, F, C, H>(
        &self,
        mut operation: F,
        classify: C,
        mut on_retry: H,
    ) -> Result<T, E>
    where
        E: Display,
        F: FnMut() -> Result<T, E>,
        C: Fn(&E) -> ErrorClass,
        H: FnMut(),
    {
        let mut failures: u32 = 0;
        let mut delay = self.policy.initial_delay;

        loop {
            if failures > 0 {
                info!(logger = %self.logger, "Retrying...");
            }

            let error = match operation() {
                Ok(result) => return Ok(result),
                Err(e) => e,
            };

            if classify(&error) == ErrorClass::Fatal {
                return Err(error);
            }

            failures += 1;
            if failures > self.policy.max_attempts {
                warn!(logger = %self.logger, "Too many failures, abandoning");
                return Err(error);
            }

            warn!(
                logger = %self.logger,
                "Failed {} times ({}), retrying in {} seconds...",
                failures, error, delay
            );
            on_retry();
            self.runtime.sleep(to_duration(delay));
            delay *= BACKOFF_MULTIPLIER;
        }
    }
}
