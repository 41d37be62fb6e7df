//! Venue-agnostic traits for the two legs of the hedge.
//!
//! The control loop only needs order books, order placement/inspection/cancel,
//! positions and balances. Anything that can answer these can back either leg:
//! - the spot venue, quoted in local fiat (maker leg)
//! - the derivatives venue, quoted in a stable unit (taker hedge leg)

use super::error::VenueError;
use super::types::{CancelOutcome, OrderAck, OrderBook, OrderRequest, OrderState};
use async_trait::async_trait;
use rust_decimal::Decimal;

/// Trading operations the hedging core needs from a venue.
#[async_trait]
pub trait TradingVenue: Send + Sync {
    /// Human-readable venue name for logs.
    fn name(&self) -> &str;

    /// Order book snapshot, best-first.
    async fn get_orderbook(&self, market: &str) -> Result<OrderBook, VenueError>;

    /// Submit an order.
    async fn place_order(&self, order: &OrderRequest) -> Result<OrderAck, VenueError>;

    /// Current fill state of an order.
    async fn check_order(&self, market: &str, order_id: &str) -> Result<OrderState, VenueError>;

    /// Cancel an order. Cancelling a finished order is not an error.
    async fn cancel_order(&self, market: &str, order_id: &str)
        -> Result<CancelOutcome, VenueError>;

    /// Signed net position on `market`.
    ///
    /// Venues without a position endpoint report `Unavailable`.
    async fn get_position(&self, market: &str) -> Result<Decimal, VenueError> {
        Err(VenueError::Unavailable(format!(
            "{} has no position endpoint for {}",
            self.name(),
            market
        )))
    }

    /// Free balance of `asset`.
    async fn get_balance(&self, asset: &str) -> Result<Decimal, VenueError>;

    /// Set leverage for a derivatives market. No-op where leverage does not apply.
    async fn set_leverage(&self, _market: &str, _leverage: u8) -> Result<(), VenueError> {
        Ok(())
    }
}

/// Source of order book snapshots only (no trading).
#[async_trait]
pub trait BookFeed: Send + Sync {
    async fn fetch_orderbook(&self, market: &str) -> Result<OrderBook, VenueError>;
}

