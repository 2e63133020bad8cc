//! Error taxonomy for the controller.
//!
//! Three classes matter at the API boundary:
//! - input errors (`InvalidSnapshot`): the caller sent a malformed feature
//!   snapshot and must fix it; rejected synchronously.
//! - configuration errors (`InvalidConfig`): fatal at startup, the controller
//!   refuses to construct.
//! - persistence errors (`Persistence` / `Decode`): logged and retried on the
//!   next flush interval; in-memory state remains authoritative.
//!
//! Everything else (no eligible arm, unknown outcome reference, rollback) is a
//! logged state transition, not an error.

/// Controller error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A feature snapshot failed validation (out-of-range or non-finite field).
    #[error("invalid feature snapshot: {0}")]
    InvalidSnapshot(String),

    /// The controller configuration is unusable (empty arm catalog, bad
    /// weights, profile that allows no tier). Fatal at startup.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A persistence read or write failed.
    #[error("persistence failure: {0}")]
    Persistence(#[from] std::io::Error),

    /// A persisted snapshot could not be decoded.
    #[error("snapshot decode failure: {0}")]
    Decode(#[from] serde_json::Error),
}
