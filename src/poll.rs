//! Fixed-interval polling with cancellation.
//!
//! [`Poller::wait_until`] sleeps before each probe and suits provider state
//! that was just mutated. [`Poller::retry`] attempts first and sleeps between
//! failures, so it never sleeps after the final attempt.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Errors raised while polling.
#[derive(Debug, Error)]
pub enum PollError<E>
where
    E: std::error::Error + 'static,
{
    /// The cancellation token fired.
    #[error("cancelled while waiting for {what}")]
    Cancelled {
        /// Condition being waited on.
        what: String,
    },
    /// The attempt cap was reached.
    #[error("gave up on {what} after {attempts} attempts: {last_error}")]
    Exhausted {
        /// Condition being waited on.
        what: String,
        /// Attempts made.
        attempts: u32,
        /// Rendering of the last failure.
        last_error: String,
    },
    /// The probe itself failed.
    #[error("probe for {what} failed: {source}")]
    Probe {
        /// Condition being waited on.
        what: String,
        /// Underlying failure.
        #[source]
        source: E,
    },
}

/// Repeats a probe at a fixed interval until it succeeds.
#[derive(Clone, Debug)]
pub struct Poller {
    interval: Duration,
    max_attempts: Option<u32>,
    cancel: CancellationToken,
}

impl Poller {
    /// Creates an unbounded poller.
    #[must_use]
    pub const fn new(interval: Duration, cancel: CancellationToken) -> Self {
        Self {
            interval,
            max_attempts: None,
            cancel,
        }
    }

    /// Caps the number of attempts.
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Delay between attempts.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Token observed between attempts.
    #[must_use]
    pub const fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Sleeps for one interval unless cancelled first.
    ///
    /// # Errors
    ///
    /// Returns [`PollError::Cancelled`] when the token fires.
    pub async fn pause<E>(&self, what: &str) -> Result<(), PollError<E>>
    where
        E: std::error::Error + 'static,
    {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(PollError::Cancelled { what: what.to_owned() }),
            () = sleep(self.interval) => Ok(()),
        }
    }

    /// Sleeps, then probes, until the probe yields a value.
    ///
    /// A probe returning `Ok(None)` means "not yet"; an `Err` aborts polling.
    ///
    /// # Errors
    ///
    /// Returns [`PollError::Probe`] on probe failure, [`PollError::Cancelled`]
    /// on cancellation, and [`PollError::Exhausted`] when a cap is set and
    /// reached.
    pub async fn wait_until<T, E, F, Fut>(&self, what: &str, mut probe: F) -> Result<T, PollError<E>>
    where
        E: std::error::Error + 'static,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
    {
        let mut attempts: u32 = 0;
        loop {
            self.pause(what).await?;
            attempts = attempts.saturating_add(1);
            debug!(what, attempts, "polling");
            match probe().await {
                Ok(Some(value)) => return Ok(value),
                Ok(None) => {}
                Err(source) => {
                    return Err(PollError::Probe {
                        what: what.to_owned(),
                        source,
                    });
                }
            }
            if self.cap_reached(attempts) {
                return Err(PollError::Exhausted {
                    what: what.to_owned(),
                    attempts,
                    last_error: String::from("condition not met"),
                });
            }
        }
    }

    /// Runs `attempt` until it succeeds, sleeping between failures.
    ///
    /// Every failure is retried; the last one is reported once the cap is
    /// reached.
    ///
    /// # Errors
    ///
    /// Returns [`PollError::Exhausted`] once the cap is reached and
    /// [`PollError::Cancelled`] on cancellation.
    pub async fn retry<T, E, F, Fut>(&self, what: &str, mut attempt: F) -> Result<T, PollError<E>>
    where
        E: std::error::Error + 'static,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempts: u32 = 0;
        loop {
            if self.cancel.is_cancelled() {
                return Err(PollError::Cancelled {
                    what: what.to_owned(),
                });
            }
            attempts = attempts.saturating_add(1);
            match attempt().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    debug!(what, attempts, error = %err, "attempt failed");
                    if self.cap_reached(attempts) {
                        return Err(PollError::Exhausted {
                            what: what.to_owned(),
                            attempts,
                            last_error: err.to_string(),
                        });
                    }
                }
            }
            self.pause(what).await?;
        }
    }

    fn cap_reached(&self, attempts: u32) -> bool {
        self.max_attempts.is_some_and(|cap| attempts >= cap)
    }
}

impl fmt::Display for Poller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.max_attempts {
            Some(cap) => write!(f, "every {:?}, at most {cap} attempts", self.interval),
            None => write!(f, "every {:?}", self.interval),
        }
    }
}
