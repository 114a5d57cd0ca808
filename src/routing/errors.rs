//! Routing error types.
//!
//! Per-turn resolution never surfaces an error; these only describe
//! startup-time misconfiguration.

use thiserror::Error;

/// Errors raised while constructing the routing layer.
#[derive(Debug, Error)]
pub enum RoutingError {
    /// The static last-resort address is missing or not a usable URL.
    #[error("invalid static fallback url '{url}': {reason}")]
    InvalidStaticFallback { url: String, reason: String },

    /// Failed to build the HTTP client used for directory lookups.
    #[error("routing directory client error: {reason}")]
    ClientBuild { reason: String },
}
