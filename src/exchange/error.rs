//! Errors raised by venue collaborators.

use thiserror::Error;

/// Failure reported by a venue client or book feed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum VenueError {
    /// An order book was empty, stale or could not be fetched.
    #[error("market data unavailable for {market}: {reason}")]
    MarketDataUnavailable { market: String, reason: String },

    /// The venue refused the order.
    #[error("order rejected: {0}")]
    OrderRejected(String),

    /// The venue does not know the order id.
    #[error("unknown order {0}")]
    UnknownOrder(String),

    /// The endpoint is not supported or not reachable on this venue.
    #[error("endpoint unavailable: {0}")]
    Unavailable(String),

    /// Network or decoding failure.
    #[error("transport error: {0}")]
    Transport(String),
}

impl VenueError {
    pub fn market_data(market: &str, reason: impl Into<String>) -> Self {
        VenueError::MarketDataUnavailable {
            market: market.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<reqwest::Error> for VenueError {
    fn from(err: reqwest::Error) -> Self {
        VenueError::Transport(err.to_string())
    }
}
