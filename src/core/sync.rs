//! Lock poisoning helpers
//!
//! Broker callbacks run on threads we do not own; a panic on one of them
//! poisons any lock it held. These helpers turn the poison into a domain
//! error so callers on the test thread get a `Result` instead of a panic.

use std::sync::{LockResult, MutexGuard};

/// Map a poisoned `Mutex::lock` result into an application error
///
/// # Examples
/// ```
/// use std::sync::Mutex;
/// use mqverify::core::sync::handle_mutex_poison;
/// use mqverify::queue::QueueError;
///
/// let mutex = Mutex::new(42);
/// let guard = handle_mutex_poison(mutex.lock(), |message| QueueError::Synchronisation { message })
///     .unwrap();
/// assert_eq!(*guard, 42);
/// ```
pub fn handle_mutex_poison<'a, T, E>(
    result: LockResult<MutexGuard<'a, T>>,
    error_constructor: impl FnOnce(String) -> E,
) -> Result<MutexGuard<'a, T>, E> {
    result.map_err(|_| error_constructor(poison_message("mutex")))
}

fn poison_message(kind: &str) -> String {
    format!(
        "Internal synchronisation error ({} poisoned): a thread panicked while holding the lock",
        kind
    )
}
