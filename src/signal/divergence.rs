//! Live divergence between the derivatives-implied fiat price and the spot price.

use crate::exchange::{TradingVenue, VenueError};
use crate::utils::decimal::to_f64;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, instrument};

/// One reading of the signal: `z = x - y`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Divergence {
    /// Derivatives mid converted to fiat through the stable/fiat cross.
    pub x: Decimal,
    /// Spot mid in fiat.
    pub y: Decimal,
    pub z: Decimal,
}

impl Divergence {
    pub fn new(x: Decimal, y: Decimal) -> Self {
        Self { x, y, z: x - y }
    }

    pub fn z_value(&self) -> f64 {
        to_f64(self.z)
    }
}

/// Anything that can produce the current divergence.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DivergenceSource: Send + Sync {
    async fn live_diff(&self) -> Result<Divergence, VenueError>;
}

/// The three instruments behind one asset's signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalMarkets {
    /// Asset quoted in fiat on the spot venue (`BTCIRT`)
    pub spot_market: String,
    /// Asset quoted in the stable unit on the derivatives venue (`BTCUSDT`)
    pub derivatives_market: String,
    /// Stable/fiat cross on the spot venue (`USDTIRT`)
    pub fiat_rate_market: String,
}

/// Divergence computed from live order books of both venues.
pub struct PriceSignal {
    spot: Arc<dyn TradingVenue>,
    derivatives: Arc<dyn TradingVenue>,
    markets: SignalMarkets,
}

impl PriceSignal {
    pub fn new(
        spot: Arc<dyn TradingVenue>,
        derivatives: Arc<dyn TradingVenue>,
        markets: SignalMarkets,
    ) -> Self {
        Self {
            spot,
            derivatives,
            markets,
        }
    }

    pub fn markets(&self) -> &SignalMarkets {
        &self.markets
    }
}

#[async_trait]
impl DivergenceSource for PriceSignal {
    /// Any book with an empty side fails the whole reading.
    #[instrument(skip(self), fields(spot = %self.markets.spot_market))]
    async fn live_diff(&self) -> Result<Divergence, VenueError> {
        let derivatives_mid = self
            .derivatives
            .get_orderbook(&self.markets.derivatives_market)
            .await?
            .mid()?;
        let fiat_rate = self
            .spot
            .get_orderbook(&self.markets.fiat_rate_market)
            .await?
            .mid()?;
        let spot_mid = self
            .spot
            .get_orderbook(&self.markets.spot_market)
            .await?
            .mid()?;

        let divergence = Divergence::new(derivatives_mid * fiat_rate, spot_mid);
        debug!(
            x = %divergence.x,
            y = %divergence.y,
            z = %divergence.z,
            "Live divergence"
        );
        Ok(divergence)
    }
}
