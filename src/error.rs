//! # Error Handling
//!
//! This module defines the error types used throughout mqvault. We use a
//! single error enum ([`Error`]) to represent all failure modes, which keeps
//! function signatures simple for the host broker's glue code.
//!
//! ## Error Categories
//!
//! Errors fall into these categories:
//!
//! | Category | Examples | Typical Response |
//! |----------|----------|------------------|
//! | Initialization | store open, thread spawn, entropy | Decline to register the plugin |
//! | Storage | SQLite I/O, schema mismatch | Log; per-row failures never abort a batch |
//! | Validation | malformed ULID string | Reject the input, continue |
//!
//! Only initialization errors ever cross the plugin boundary: the message
//! callback is infallible toward the broker and persistence is best-effort.

use thiserror::Error;

// =============================================================================
// Error Type
// =============================================================================

/// All errors that can occur in mqvault operations.
#[derive(Error, Debug)]
pub enum Error {
    /// SQLite operation failed.
    ///
    /// Wraps any error from the `rusqlite` crate: the database file is
    /// locked by another process, the disk is full, the file is corrupted,
    /// or a statement failed to prepare.
    ///
    /// A failure opening the store at initialization is fatal; a failure
    /// stepping a single row inside a batch is logged and skipped.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Schema version mismatch or corruption detected.
    ///
    /// Returned when opening a database created by an incompatible mqvault
    /// version, or one modified outside mqvault. Fatal to initialization;
    /// there is no in-place migration path.
    #[error("schema error: {0}")]
    Schema(String),

    /// The OS entropy source was unavailable while the generator was
    /// configured to require it.
    ///
    /// Only raised in secure mode. In the default configuration the
    /// generator falls back to a time/stack/counter bootstrap instead,
    /// since its randomness backs uniqueness, not secrecy.
    #[error("entropy unavailable: {0}")]
    Entropy(String),

    /// A resource needed at initialization could not be acquired.
    ///
    /// Covers writer-thread spawn failures and similar setup problems.
    /// Fatal to initialization; partially-acquired resources are released
    /// before this is returned.
    #[error("initialization failed: {0}")]
    Init(String),

    /// A string was not a valid 26-character Crockford base-32 ULID.
    ///
    /// Raised when decoding identifiers received from the outside, e.g. a
    /// `ulid` user property on a delete request.
    #[error("invalid ulid: {0}")]
    InvalidUlid(String),
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// A `Result` type alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// Error messages appear in the broker log; keep them readable and
    /// carrying the relevant detail.
    #[test]
    fn test_error_display() {
        let schema = Error::Schema("bad version".to_string());
        assert_eq!(schema.to_string(), "schema error: bad version");

        let entropy = Error::Entropy("getrandom failed".to_string());
        assert_eq!(entropy.to_string(), "entropy unavailable: getrandom failed");

        let init = Error::Init("thread spawn failed".to_string());
        assert_eq!(init.to_string(), "initialization failed: thread spawn failed");

        let ulid = Error::InvalidUlid("too short".to_string());
        assert_eq!(ulid.to_string(), "invalid ulid: too short");
    }

    /// `#[from]` lets `?` convert rusqlite errors automatically.
    #[test]
    fn test_sqlite_error_conversion() {
        let sqlite_err = rusqlite::Error::InvalidParameterName("test".to_string());
        let our_err: Error = sqlite_err.into();

        assert!(matches!(our_err, Error::Sqlite(_)));
        assert!(our_err.to_string().contains("sqlite error"));
    }
}
