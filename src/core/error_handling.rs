//! Generic error handling utilities
//!
//! Lets callers log any domain error at the right level of detail without
//! knowing its concrete type.

/// Errors that can tell a user-fixable problem from a system failure
///
/// When `is_user_actionable()` returns `true`, `user_message()` must return
/// `Some(message)` with a message the user can act on. Otherwise it returns
/// `None`.
pub trait ContextualError: std::error::Error {
    /// Whether this error carries a message worth showing to the user as is,
    /// e.g. a bad configuration value
    fn is_user_actionable(&self) -> bool;

    fn user_message(&self) -> Option<&str>;
}

/// Log `error` as the failure of `operation_context`
///
/// User-actionable errors are logged with their own message. System errors
/// are logged with the operation only; their details go to debug level.
///
/// # Examples
/// ```rust
/// use mqverify::core::config::Settings;
/// use mqverify::core::error_handling::log_error_with_context;
///
/// let error = Settings::from_toml_str("[queue]\nprefetch = 0").unwrap_err();
/// log_error_with_context(&error, "loading configuration");
/// // Logs: "loading configuration: queue.prefetch must be greater than 0"
/// ```
pub fn log_error_with_context<E: ContextualError + std::fmt::Debug>(
    error: &E,
    operation_context: &str,
) {
    match error.user_message().filter(|_| error.is_user_actionable()) {
        Some(message) => log::error!("{}: {}", operation_context, message),
        None => log::error!("{} failed", operation_context),
    }
    log::debug!("DETAIL: {}", error);
    log::debug!("DEBUG_DETAILS: {:?}", error);
}
