//! Error taxonomy for pipeline operations
//!
//! Upstream sites fail in operationally different ways, and the error type
//! keeps those ways apart: credentials problems need an operator, transport
//! hiccups retry themselves, and a parse failure means the site changed its
//! markup. `stage()` gives log pipelines a stable label per failure class.

use thiserror::Error;

/// How much of a parse payload the Display impl shows
const PAYLOAD_EXCERPT_LEN: usize = 200;

/// Errors surfaced by site pipelines
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Login rejected or the session could not be recovered. Fatal until an
    /// operator fixes the credentials; carries the site's own message when
    /// one could be extracted.
    #[error("authentication failed for {site}: {reason}")]
    Authentication { site: String, reason: String },

    /// The site could not be reached. Retried with backoff before surfacing.
    #[error("transport failure for {site}: {source}")]
    Transport {
        site: String,
        #[source]
        source: TransportError,
    },

    /// The site answered with a status the adapter did not expect and no
    /// expiry signal explained it.
    #[error("{site} returned unexpected status {status} for {url}")]
    UnexpectedStatus { site: String, status: u16, url: String },

    /// The response arrived but could not be interpreted. The full payload
    /// rides along for operator diagnosis; Display shows an excerpt.
    #[error("failed to parse response from {site}: {reason}; payload: {}", excerpt(.payload))]
    Parse {
        site: String,
        reason: String,
        payload: String,
    },

    /// A release record violated an invariant badly enough to be rejected
    #[error("invalid release: {reason}")]
    Validation { reason: String },

    /// No pipeline is registered under the given site ID
    #[error("site is not registered: {0}")]
    SiteNotRegistered(String),
}

impl PipelineError {
    /// Stable stage label for structured logs, so dashboards can tell
    /// "site down" from "markup changed" from "credentials expired"
    pub fn stage(&self) -> &'static str {
        match self {
            PipelineError::Authentication { .. } => "auth",
            PipelineError::Transport { .. } => "transport",
            PipelineError::UnexpectedStatus { .. } => "status",
            PipelineError::Parse { .. } => "parse",
            PipelineError::Validation { .. } => "validation",
            PipelineError::SiteNotRegistered(_) => "registry",
        }
    }

    /// Whether the failure is permanent until an operator intervenes
    pub fn needs_operator(&self) -> bool {
        matches!(self, PipelineError::Authentication { .. })
    }
}

/// Low-level transport failures. All of these are considered worth a
/// bounded retry by the executor.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("http error: {0}")]
    Http(String),
}

fn excerpt(payload: &str) -> &str {
    match payload.char_indices().nth(PAYLOAD_EXCERPT_LEN) {
        Some((idx, _)) => &payload[..idx],
        None => payload,
    }
}
