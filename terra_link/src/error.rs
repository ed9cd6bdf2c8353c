//! Link error taxonomy.
//!
//! Validation failures carry a stable machine-readable kind that goes back
//! to the caller verbatim; everything else is operational.

use thiserror::Error;

/// Error type for the command channel.
#[derive(Debug, Error)]
pub enum LinkError {
    /// Envelope failed the structural check.
    #[error("invalid envelope format: {0}")]
    InvalidFormat(String),

    /// A field is outside its allowed range.
    #[error("value out of range: {0}")]
    OutOfRange(String),

    /// Envelope timestamp outside the freshness window.
    #[error("stale command (age {age_ms} ms)")]
    Stale { age_ms: u64 },

    /// `(id, timestamp)` already admitted inside the window.
    #[error("replayed command")]
    Replay,

    /// Signature verification failed.
    #[error("invalid signature")]
    SignatureInvalid,

    /// Critical command without a recorded second factor.
    #[error("second factor required")]
    MfaRequired,

    /// Unknown client, expired certificate, or bad session token.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Handshake protocol violation.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// Underlying socket or file I/O.
    #[error("link i/o: {0}")]
    Io(#[from] std::io::Error),

    /// Queueing refused (critical command, queue disabled, …).
    #[error("not queueable: {0}")]
    NotQueueable(String),
}

impl LinkError {
    /// Stable kind string for rejection frames and metrics.
    pub fn kind_str(&self) -> &'static str {
        match self {
            LinkError::InvalidFormat(_) => "invalid_format",
            LinkError::OutOfRange(_) => "out_of_range",
            LinkError::Stale { .. } => "stale",
            LinkError::Replay => "replay",
            LinkError::SignatureInvalid => "signature_invalid",
            LinkError::MfaRequired => "mfa_required",
            LinkError::Unauthorized(_) => "unauthorized",
            LinkError::Handshake(_) => "handshake_failed",
            LinkError::Io(_) => "io",
            LinkError::NotQueueable(_) => "not_queueable",
        }
    }
}
