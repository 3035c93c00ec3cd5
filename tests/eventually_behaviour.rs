//! Eventual assertion integration tests
//!
//! Timing behaviour of `eventually` as seen by a caller: immediate success,
//! late success and exhaustion.

use mqverify::core::eventually::{eventually, eventually_that};
use mqverify::core::matchers::{equal_to, present};
use mqverify::core::retry::{Backoff, RetryPolicy};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

#[test]
fn test_first_success_returns_without_waiting() {
    let policy = RetryPolicy::fixed(Duration::from_secs(30), Duration::from_secs(5));
    let started = Instant::now();

    let value = eventually(|| "ready", &equal_to("ready"), &policy).unwrap();

    assert_eq!(value, "ready");
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[test]
fn test_value_set_by_another_thread_is_observed() {
    let slot: Arc<Mutex<Option<u32>>> = Arc::new(Mutex::new(None));
    let writer = {
        let slot = Arc::clone(&slot);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            *slot.lock().unwrap() = Some(7);
        })
    };

    let policy = RetryPolicy::fixed(Duration::from_secs(5), Duration::from_millis(10));
    let value = eventually(|| *slot.lock().unwrap(), &present(), &policy).unwrap();

    writer.join().unwrap();
    assert_eq!(value, Some(7));
}

#[test]
fn test_timeout_only_after_max_duration_with_last_value() {
    let calls = AtomicUsize::new(0);
    let policy = RetryPolicy::fixed(Duration::from_millis(300), Duration::from_millis(50));
    let started = Instant::now();

    let error = eventually(
        || calls.fetch_add(1, Ordering::SeqCst),
        &equal_to(usize::MAX),
        &policy,
    )
    .unwrap_err();

    assert!(started.elapsed() >= Duration::from_millis(300));
    let attempts = calls.load(Ordering::SeqCst);
    assert_eq!(error.attempts, attempts);
    assert_eq!(error.last_observed, (attempts - 1).to_string());
    assert!(error.to_string().contains("last observed value"));
}

#[test]
fn test_exponential_backoff_still_honours_max_duration() {
    let policy = RetryPolicy::new(
        Duration::from_millis(250),
        Backoff::Exponential {
            initial: Duration::from_millis(10),
            multiplier: 2.0,
            max: Duration::from_millis(100),
        },
    );
    let started = Instant::now();

    let error = eventually_that(|| 0, "positive", |v: &i32| *v > 0, &policy).unwrap_err();

    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(250));
    assert!(elapsed < Duration::from_secs(5));
    assert_eq!(error.expected, "positive");
}
