//! Eventual-consistency assertions
//!
//! Poll a supplier until its value satisfies a [`Matcher`] or the
//! [`RetryPolicy`] runs out. Used wherever the system under test updates
//! asynchronously relative to the test thread: consumed messages, query
//! results, UI state.

use crate::core::matchers::{satisfies, Matcher};
use crate::core::retry::RetryPolicy;
use std::fmt::Debug;
use std::future::Future;
use std::time::{Duration, Instant};

/// Raised when an eventual assertion exhausts its retry policy
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error(
    "expected {expected} but {mismatch} after {attempts} attempts in {elapsed:?}; last observed value: {last_observed}"
)]
pub struct TimeoutAssertionError {
    /// Description of the matcher
    pub expected: String,
    /// Debug rendering of the last supplied value
    pub last_observed: String,
    /// Matcher's explanation of why the last value failed
    pub mismatch: String,
    pub attempts: usize,
    pub elapsed: Duration,
}

/// Poll `supplier` until `matcher` accepts its value
///
/// The first attempt is made immediately and returns without any delay when
/// it succeeds. Between attempts the calling thread sleeps according to
/// `policy`. Fails only once `policy.max_duration()` has elapsed.
///
/// # Examples
/// ```rust
/// use mqverify::core::eventually::eventually;
/// use mqverify::core::matchers::equal_to;
/// use mqverify::core::retry::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::fixed(Duration::from_secs(1), Duration::from_millis(10));
/// let value = eventually(|| 42, &equal_to(42), &policy).unwrap();
/// assert_eq!(value, 42);
/// ```
pub fn eventually<T, S, M>(
    mut supplier: S,
    matcher: &M,
    policy: &RetryPolicy,
) -> Result<T, TimeoutAssertionError>
where
    S: FnMut() -> T,
    M: Matcher<T> + ?Sized,
    T: Debug,
{
    let started = Instant::now();
    let mut attempt = 0;

    loop {
        attempt += 1;
        let value = supplier();
        log::trace!("asserting value {:?} against {}", value, matcher.describe());
        if matcher.matches(&value) {
            return Ok(value);
        }

        let mismatch = matcher.describe_mismatch(&value);
        match policy.next_delay(attempt, started.elapsed()) {
            Some(delay) => {
                policy.notify_retry(attempt, &mismatch);
                std::thread::sleep(delay);
            }
            None => return Err(exhausted(matcher, &value, mismatch, attempt, started)),
        }
    }
}

/// [`eventually`] with a plain closure predicate
pub fn eventually_that<T, S, P>(
    supplier: S,
    description: &str,
    predicate: P,
    policy: &RetryPolicy,
) -> Result<T, TimeoutAssertionError>
where
    S: FnMut() -> T,
    P: Fn(&T) -> bool + Send + Sync + 'static,
    T: Debug + 'static,
{
    eventually(supplier, &satisfies(description, predicate), policy)
}

/// Async flavour of [`eventually`] for code running on a tokio runtime
///
/// Sleeps with `tokio::time::sleep`, so the runtime thread is released
/// between attempts.
pub async fn eventually_async<T, S, Fut, M>(
    mut supplier: S,
    matcher: &M,
    policy: &RetryPolicy,
) -> Result<T, TimeoutAssertionError>
where
    S: FnMut() -> Fut,
    Fut: Future<Output = T>,
    M: Matcher<T> + ?Sized,
    T: Debug,
{
    let started = Instant::now();
    let mut attempt = 0;

    loop {
        attempt += 1;
        let value = supplier().await;
        if matcher.matches(&value) {
            return Ok(value);
        }

        let mismatch = matcher.describe_mismatch(&value);
        match policy.next_delay(attempt, started.elapsed()) {
            Some(delay) => {
                policy.notify_retry(attempt, &mismatch);
                tokio::time::sleep(delay).await;
            }
            None => return Err(exhausted(matcher, &value, mismatch, attempt, started)),
        }
    }
}

fn exhausted<T, M>(
    matcher: &M,
    value: &T,
    mismatch: String,
    attempts: usize,
    started: Instant,
) -> TimeoutAssertionError
where
    M: Matcher<T> + ?Sized,
    T: Debug,
{
    let error = TimeoutAssertionError {
        expected: matcher.describe(),
        last_observed: format!("{:?}", value),
        mismatch,
        attempts,
        elapsed: started.elapsed(),
    };
    log::error!("eventually got {}", error);
    error
}
