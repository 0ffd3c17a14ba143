//! Error taxonomy for the batch engine.
//!
//! [`BatchError`] covers the failures the engine distinguishes when deciding
//! what to do next: bad input is fatal to a load, a missing precondition blocks
//! a start, fetch/submit failures are recoverable per item, and diff rendering
//! problems are cosmetic. [`TransportError`] is the uniform failure type the
//! network collaborators report, independent of which protocol produced it.

use std::fmt;

/// What went wrong on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// The server answered with a non-success status code.
    Http(u16),
    /// Connection refused, DNS failure, TLS failure, redirect loop.
    Network,
    /// The request did not complete within the client timeout.
    Timeout,
    /// The connection dropped while the response body was being read.
    Aborted,
    /// The server answered 2xx but the body reported a failure.
    Rejected,
    /// The response body could not be decoded.
    Decode,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http(status) => write!(f, "HTTP {}", status),
            Self::Network => write!(f, "network error"),
            Self::Timeout => write!(f, "timeout"),
            Self::Aborted => write!(f, "aborted"),
            Self::Rejected => write!(f, "rejected"),
            Self::Decode => write!(f, "decode error"),
        }
    }
}

/// A failed fetch or submit, as reported by a transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {detail}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub detail: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    /// Non-success HTTP status with the (truncated) response body as detail.
    pub fn http(status: u16, body: &str) -> Self {
        let detail = body.chars().take(500).collect::<String>();
        Self::new(TransportErrorKind::Http(status), detail)
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            TransportErrorKind::Timeout
        } else if err.is_decode() {
            TransportErrorKind::Decode
        } else if err.is_body() {
            TransportErrorKind::Aborted
        } else if let Some(status) = err.status() {
            TransportErrorKind::Http(status.as_u16())
        } else {
            TransportErrorKind::Network
        };
        Self::new(kind, err.to_string())
    }
}

/// Errors surfaced by the batch engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BatchError {
    /// The dataset could not be parsed. Fatal to the load, never to a run.
    #[error("dataset format error: {0}")]
    Format(String),

    /// A required input (credential, dataset, state) is missing or the
    /// requested operation is not valid in the current state.
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// Retrieving the current item state failed.
    #[error("fetch failed for item {id}: {source}")]
    Fetch {
        id: String,
        #[source]
        source: TransportError,
    },

    /// Writing the patch failed.
    #[error("submit failed for item {id}: {source}")]
    Submit {
        id: String,
        #[source]
        source: TransportError,
    },

    /// The review diff could not be shown. Never blocks the edit path.
    #[error("diff render failed: {0}")]
    DiffRender(String),
}
