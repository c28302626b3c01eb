//! Error taxonomy shared by every layer of the I/O pipeline core.
//!
//! The kinds below are the ones named in the design: they are not meant to
//! map one-to-one onto any particular driver's errno space. Decorators
//! forward a child's `OaError` unchanged unless they deliberately transform
//! it (a meta-cache miss is not an error, for instance).

use std::backtrace::Backtrace;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum OaError {
    /// A subsystem failed to initialise (memcache client, driver, pool).
    #[error("not ready: {0}")]
    NotReady(String),

    /// Retryable driver/network failure. The core never retries on its own.
    #[error("transient I/O error: {0}")]
    Transient(#[source] anyhow::Error),

    /// Bad path, access denied, not found, and similar non-retryable faults.
    #[error("permanent I/O error: {0}")]
    Permanent(#[source] anyhow::Error),

    /// A pool or slot is exhausted and the caller must back off.
    #[error("capacity exhausted: {0}")]
    Capacity(String),

    /// An internal invariant failed (e.g. slot epoch mismatch).
    #[error("invariant violation: {0}")]
    Corruption(String),

    /// Unrecoverable; the worker thread that hit this exits.
    #[error("fatal error: {0}")]
    Fatal(String),
}

impl OaError {
    /// Build a `Corruption` error, logging it at error level together with
    /// a captured backtrace. The backtrace facility is an external
    /// collaborator; this wraps the one the standard library already
    /// provides rather than adding a crate for it.
    pub fn corruption(msg: impl Into<String>) -> Self {
        let msg = msg.into();
        log::error!("invariant violation: {msg}\n{}", Backtrace::capture());
        OaError::Corruption(msg)
    }

    pub fn not_ready(msg: impl Into<String>) -> Self {
        OaError::NotReady(msg.into())
    }

    pub fn capacity(msg: impl Into<String>) -> Self {
        OaError::Capacity(msg.into())
    }

    pub fn is_not_ready(&self) -> bool {
        matches!(self, OaError::NotReady(_))
    }
}

pub type OaResult<T> = Result<T, OaError>;
