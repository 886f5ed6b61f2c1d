//! Grepable error codes shared by every error type in the crate.
//!
//! DESIGN
//! ======
//! Nothing in the engine is fatal, so most errors end up in a log line
//! rather than a return value. Each error enum implements [`ErrorCode`] so
//! those log lines carry a stable `code` field and a `retryable` hint that
//! can be searched for independently of the human-readable message.

/// Grepable error code and retryable flag for structured log fields.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;

    fn retryable(&self) -> bool {
        false
    }
}
