//! Retry policies for polling operations
//!
//! A [`RetryPolicy`] describes how long to keep polling and how long to wait
//! between attempts. It is consumed by the eventual-assertion primitives in
//! [`crate::core::eventually`] and never retries broker operations itself.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Observer invoked before each retry with the attempt number that just
/// failed and a description of the failure.
pub type RetryObserver = Arc<dyn Fn(usize, &str) + Send + Sync>;

/// Shortest wait between attempts, whatever the backoff says
pub const MIN_RETRY_DELAY: Duration = Duration::from_millis(1);

/// Delay strategy between consecutive attempts
#[derive(Clone)]
pub enum Backoff {
    /// Same delay before every retry
    Fixed(Duration),
    /// `initial * multiplier^(attempt - 1)`, capped at `max`; a multiplier
    /// below 1 is treated as 1
    Exponential {
        initial: Duration,
        multiplier: f64,
        max: Duration,
    },
    /// Caller supplied schedule; receives the 1-based number of the attempt
    /// that just failed
    Custom(Arc<dyn Fn(usize) -> Duration + Send + Sync>),
}

impl Backoff {
    /// Delay to wait after the given (1-based) failed attempt
    pub fn delay(&self, attempt: usize) -> Duration {
        match self {
            Backoff::Fixed(delay) => *delay,
            Backoff::Exponential {
                initial,
                multiplier,
                max,
            } => {
                let exponent = attempt.saturating_sub(1).min(i32::MAX as usize) as i32;
                let factor = multiplier.max(1.0).powi(exponent);
                let scaled = initial.as_secs_f64() * factor;
                if !scaled.is_finite() || scaled >= max.as_secs_f64() {
                    *max
                } else {
                    Duration::from_secs_f64(scaled)
                }
            }
            Backoff::Custom(schedule) => schedule(attempt),
        }
    }
}

impl fmt::Debug for Backoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backoff::Fixed(delay) => f.debug_tuple("Fixed").field(delay).finish(),
            Backoff::Exponential {
                initial,
                multiplier,
                max,
            } => f
                .debug_struct("Exponential")
                .field("initial", initial)
                .field("multiplier", multiplier)
                .field("max", max)
                .finish(),
            Backoff::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Polling policy: keep attempting until `max_duration` has elapsed
///
/// The schedule is: attempt immediately, then wait `backoff.delay(n)` and
/// attempt again, until the cumulative elapsed time reaches `max_duration`.
/// The final wait is clamped so the last attempt happens at the deadline.
///
/// # Examples
/// ```rust
/// use mqverify::core::retry::{Backoff, RetryPolicy};
/// use std::time::Duration;
///
/// let policy = RetryPolicy::default()
///     .with_max_duration(Duration::from_secs(20))
///     .with_backoff(Backoff::Fixed(Duration::from_secs(2)))
///     .on_retry(|attempt, failure| log::trace!("retry {attempt} after {failure}"));
/// assert_eq!(policy.max_duration(), Duration::from_secs(20));
/// ```
#[derive(Clone)]
pub struct RetryPolicy {
    max_duration: Duration,
    backoff: Backoff,
    on_retry: Option<RetryObserver>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_duration: Duration::from_secs(10),
            backoff: Backoff::Fixed(Duration::from_millis(250)),
            on_retry: Some(Arc::new(|attempt, failure| {
                log::trace!("attempt {} failed, retrying: {}", attempt, failure);
            })),
        }
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_duration", &self.max_duration)
            .field("backoff", &self.backoff)
            .field("on_retry", &self.on_retry.is_some())
            .finish()
    }
}

impl RetryPolicy {
    /// Policy without a retry observer
    ///
    /// # Arguments
    /// * `max_duration` - Total time budget measured from the first attempt
    /// * `backoff` - Delay schedule between attempts
    pub fn new(max_duration: Duration, backoff: Backoff) -> Self {
        Self {
            max_duration,
            backoff,
            on_retry: None,
        }
    }

    /// Fixed-delay policy
    pub fn fixed(max_duration: Duration, delay: Duration) -> Self {
        Self::new(max_duration, Backoff::Fixed(delay))
    }

    pub fn with_max_duration(mut self, max_duration: Duration) -> Self {
        self.max_duration = max_duration;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Shorthand for a fixed backoff of `delay`
    pub fn with_delay(self, delay: Duration) -> Self {
        self.with_backoff(Backoff::Fixed(delay))
    }

    /// Replace the retry observer
    pub fn on_retry<F>(mut self, observer: F) -> Self
    where
        F: Fn(usize, &str) + Send + Sync + 'static,
    {
        self.on_retry = Some(Arc::new(observer));
        self
    }

    /// Remove the retry observer
    pub fn without_observer(mut self) -> Self {
        self.on_retry = None;
        self
    }

    pub fn max_duration(&self) -> Duration {
        self.max_duration
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    /// Wait to apply after `attempt` failed, given `elapsed` time so far.
    ///
    /// Never shorter than [`MIN_RETRY_DELAY`] unless the deadline is closer.
    /// Returns `None` once the policy is exhausted.
    pub fn next_delay(&self, attempt: usize, elapsed: Duration) -> Option<Duration> {
        if elapsed >= self.max_duration {
            return None;
        }
        let remaining = self.max_duration - elapsed;
        Some(self.backoff.delay(attempt).max(MIN_RETRY_DELAY).min(remaining))
    }

    /// Notify the observer, if any, that a retry is about to happen
    pub(crate) fn notify_retry(&self, attempt: usize, failure: &str) {
        if let Some(observer) = &self.on_retry {
            observer(attempt, failure);
        }
    }
}
