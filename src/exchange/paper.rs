//! Spot venue for paper trading across processes.
//!
//! Each process simulates its own spot venue, so fills made by the maker never
//! reach the hedger's copy. The held coin balance is therefore read from the
//! shared position cache, which the maker's ledger updates after every fill.

use super::error::VenueError;
use super::traits::TradingVenue;
use super::types::{CancelOutcome, OrderAck, OrderBook, OrderRequest, OrderState};
use crate::persistence::PositionStore;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::debug;

/// Wraps a simulated spot venue; the base asset balance comes from the cache.
pub struct PaperSpotVenue {
    inner: Arc<dyn TradingVenue>,
    positions: Arc<dyn PositionStore>,
    market: String,
    base_asset: String,
    /// Holding assumed before the cache has an entry for `market`
    initial: Decimal,
}

impl PaperSpotVenue {
    pub fn new(
        inner: Arc<dyn TradingVenue>,
        positions: Arc<dyn PositionStore>,
        market: &str,
        base_asset: &str,
        initial: Decimal,
    ) -> Self {
        Self {
            inner,
            positions,
            market: market.to_uppercase(),
            base_asset: base_asset.to_string(),
            initial,
        }
    }
}

#[async_trait]
impl TradingVenue for PaperSpotVenue {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn get_orderbook(&self, market: &str) -> Result<OrderBook, VenueError> {
        self.inner.get_orderbook(market).await
    }

    async fn place_order(&self, order: &OrderRequest) -> Result<OrderAck, VenueError> {
        self.inner.place_order(order).await
    }

    async fn check_order(&self, market: &str, order_id: &str) -> Result<OrderState, VenueError> {
        self.inner.check_order(market, order_id).await
    }

    async fn cancel_order(
        &self,
        market: &str,
        order_id: &str,
    ) -> Result<CancelOutcome, VenueError> {
        self.inner.cancel_order(market, order_id).await
    }

    async fn get_position(&self, market: &str) -> Result<Decimal, VenueError> {
        self.inner.get_position(market).await
    }

    async fn get_balance(&self, asset: &str) -> Result<Decimal, VenueError> {
        if asset != self.base_asset {
            return self.inner.get_balance(asset).await;
        }
        let held = match self.positions.read(&self.market) {
            Ok(Some(entry)) => entry.quantity,
            Ok(None) => self.initial,
            Err(e) => {
                return Err(VenueError::Unavailable(format!(
                    "paper balance for {}: {}",
                    self.market, e
                )))
            }
        };
        debug!(market = %self.market, %held, "Paper spot holding");
        Ok(held)
    }

    async fn set_leverage(&self, market: &str, leverage: u8) -> Result<(), VenueError> {
        self.inner.set_leverage(market, leverage).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::MockVenue;
    use crate::persistence::JsonPositionCache;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_base_balance_follows_shared_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(JsonPositionCache::new(dir.path().join("positions.json")));
        let inner = Arc::new(MockVenue::new("nobitex"));
        inner.set_balance("BTC", dec!(7)).await;
        inner.set_balance("IRT", dec!(1000)).await;
        let venue = PaperSpotVenue::new(inner, cache.clone(), "BTCIRT", "BTC", dec!(0.5));

        assert_eq!(venue.get_balance("BTC").await.unwrap(), dec!(0.5));
        // Another process records a fill
        cache.write("BTCIRT", dec!(1.5)).unwrap();
        assert_eq!(venue.get_balance("BTC").await.unwrap(), dec!(1.5));
        assert_eq!(venue.get_balance("IRT").await.unwrap(), dec!(1000));
    }
}
