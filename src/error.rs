//! Error taxonomy of the hedging core.

use crate::exchange::{OrderSide, VenueError};
use rust_decimal::Decimal;
use thiserror::Error;

/// Failures the control loop distinguishes between.
///
/// `MarketDataUnavailable` and `OrderRejected` arrive wrapped in [`VenueError`].
#[derive(Debug, Error)]
pub enum HedgeError {
    #[error(transparent)]
    Venue(#[from] VenueError),

    /// A partial taker fill could not be reverted; exposure has drifted.
    #[error("partial fill revert failed on {market}: {quantity} {side} left unhedged ({reason})")]
    PartialFillRevertFailed {
        market: String,
        side: OrderSide,
        quantity: Decimal,
        reason: String,
    },

    /// Position cache, observation store or trade journal could not be used.
    #[error("persistence unavailable: {0}")]
    PersistenceUnavailable(String),
}

impl HedgeError {
    pub fn persistence(err: impl std::fmt::Display) -> Self {
        HedgeError::PersistenceUnavailable(err.to_string())
    }
}

impl From<rusqlite::Error> for HedgeError {
    fn from(err: rusqlite::Error) -> Self {
        HedgeError::persistence(err)
    }
}

impl From<std::io::Error> for HedgeError {
    fn from(err: std::io::Error) -> Self {
        HedgeError::persistence(err)
    }
}

impl From<serde_json::Error> for HedgeError {
    fn from(err: serde_json::Error) -> Self {
        HedgeError::persistence(err)
    }
}
