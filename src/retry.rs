//! Fixed-backoff retry for COM activation
//!
//! Remote activation fails transiently while a target's RPC endpoint or
//! service is starting. The policy retries a bounded number of times with a
//! constant delay and consults the HRESULT table to stop early on errors that
//! retrying cannot fix.

use std::time::Duration;

use crate::hresult;
use crate::{Error, Result};

/// What to do after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Retry,
    Fatal,
}

/// Blocking wait between attempts, injectable for tests
pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

/// Sleeps the current thread
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Retry configuration
#[derive(Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Constant delay between attempts
    pub backoff: Duration,
    /// Decides whether a failed attempt may be retried
    pub classify: fn(&Error) -> Disposition,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .finish()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::com_activation()
    }
}

impl RetryPolicy {
    /// 3 attempts, 500ms apart, classified through the HRESULT table
    pub fn com_activation() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(500),
            classify: classify_com,
        }
    }

    /// Run `operation` until it succeeds, fails fatally, or the budget is spent.
    ///
    /// The closure receives the 1-based attempt number. When the budget runs
    /// out the last error is wrapped in [`Error::RetriesExhausted`].
    pub fn run<T, F>(&self, sleeper: &dyn Sleeper, mut operation: F) -> Result<T>
    where
        F: FnMut(u32) -> Result<T>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match operation(attempt) {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if (self.classify)(&err) == Disposition::Fatal {
                        tracing::debug!(attempt, error = %err, "Fatal error, not retrying");
                        return Err(err);
                    }

                    if attempt >= max_attempts {
                        tracing::warn!(attempts = attempt, error = %err, "Retry budget exhausted");
                        return Err(Error::RetriesExhausted {
                            attempts: attempt,
                            last: Box::new(err),
                        });
                    }

                    tracing::warn!(
                        attempt,
                        max_attempts,
                        error = %err,
                        "Attempt failed, retrying in {:?}",
                        self.backoff
                    );
                    sleeper.sleep(self.backoff);
                }
            }
        }
    }
}

/// COM errors are retried unless the table marks them fatal; unmapped codes
/// are retried. Anything that is not a COM error is fatal.
pub fn classify_com(err: &Error) -> Disposition {
    match err {
        Error::Com { code, .. } => hresult::lookup(*code)
            .map(|info| info.disposition)
            .unwrap_or(Disposition::Retry),
        _ => Disposition::Fatal,
    }
}
