//! Error types for the routing tunnel and the adjudication path.

use thiserror::Error;

/// Errors surfaced by the [`Tunnel`](crate::tunnel::Tunnel) and suggestion parsing.
#[derive(Debug, Error)]
pub enum TunnelError {
    /// Lookup on an unknown channel id.
    #[error("channel not found: {0}")]
    ChannelNotFound(String),

    /// Channel exists but has been deactivated.
    #[error("channel is inactive: {0}")]
    ChannelInactive(String),

    /// Lookup on an unknown bin id.
    #[error("bin not found: {0}")]
    BinNotFound(String),

    /// The registered dispatch callback failed; the bin is now in `error`.
    #[error("dispatch failed for bin {bin_id}: {source}")]
    DispatchFailure {
        bin_id: String,
        #[source]
        source: anyhow::Error,
    },

    /// Category or severity outside the fixed enumerations.
    #[error("validation error: {0}")]
    Validation(String),

    /// Keyword automaton could not be built from the configured keywords.
    #[error("invalid filter keywords: {0}")]
    InvalidKeywords(#[from] aho_corasick::BuildError),
}

/// Errors surfaced by the [`Adjudicator`](crate::adjudication::Adjudicator).
#[derive(Debug, Error)]
pub enum AdjudicationError {
    /// Evaluation requested for an agent the ledger has never seen.
    #[error("agent not registered: {0}")]
    AgentNotRegistered(String),

    /// The external classifier returned an error.
    #[error("classification unavailable: {0}")]
    ClassificationUnavailable(String),

    /// The circuit for the classifier service is open; no call was attempted.
    #[error("circuit open for service {service}")]
    CircuitOpen { service: String },

    /// The award could not be written to the ledger journal.
    #[error("ledger write failed: {0}")]
    Ledger(#[source] anyhow::Error),
}

impl AdjudicationError {
    /// Whether this failure came from the classifier side rather than the caller.
    pub fn is_degraded(&self) -> bool {
        matches!(
            self,
            Self::ClassificationUnavailable(_) | Self::CircuitOpen { .. }
        )
    }
}
