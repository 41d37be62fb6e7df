//! Resting maker orders on the spot venue.
//!
//! An order is priced between the touch and the far side of the book, then
//! polled until it fills or one of three exit conditions holds:
//! - it no longer sits at the best price on its side
//! - the divergence has returned inside the band
//! - it has rested longer than the timeout
//!
//! Partial fills are kept when an order is cancelled.

use crate::exchange::{OrderRequest, OrderSide, TradingVenue, VenueError};
use crate::signal::{DivergenceSource, SignalBand};
use crate::utils::decimal::floor_to_precision;
use rust_decimal::Decimal;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct MakerConfig {
    pub poll_interval: Duration,
    pub timeout: Duration,
    pub price_precision: u32,
}

impl Default for MakerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            timeout: Duration::from_secs(45),
            price_precision: 0,
        }
    }
}

/// Terminal state of a tracked order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MakerOutcome {
    Filled,
    NotBest,
    NoSignal,
    Timeout,
}

impl fmt::Display for MakerOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MakerOutcome::Filled => write!(f, "FILLED"),
            MakerOutcome::NotBest => write!(f, "NOT_BEST"),
            MakerOutcome::NoSignal => write!(f, "NO_SIGNAL"),
            MakerOutcome::Timeout => write!(f, "TIMEOUT"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MakerReport {
    pub outcome: MakerOutcome,
    pub matched_qty: Decimal,
    /// `matched_qty × order price`
    pub matched_notional: Decimal,
    pub avg_price: Option<Decimal>,
}

/// A live resting order.
#[derive(Debug, Clone)]
pub struct TrackedOrder {
    pub order_id: String,
    pub side: OrderSide,
    pub market: String,
    /// Limit price the order was placed at
    pub reference_price: Decimal,
    pub quantity: Decimal,
    pub placed_at: Instant,
    pub matched_qty: Decimal,
    pub avg_price: Option<Decimal>,
}

impl TrackedOrder {
    fn report(&self, outcome: MakerOutcome) -> MakerReport {
        MakerReport {
            outcome,
            matched_qty: self.matched_qty,
            matched_notional: self.matched_qty * self.reference_price,
            avg_price: self.avg_price,
        }
    }
}

/// `w·near + (1-w)·far`, where near is the bid for buys and the ask for sells.
///
/// `w = 1` joins the touch; `w = 0` crosses to the far side.
pub fn weighted_limit_price(
    side: OrderSide,
    best_bid: Decimal,
    best_ask: Decimal,
    weight: Decimal,
) -> Decimal {
    let (near, far) = match side {
        OrderSide::Buy => (best_bid, best_ask),
        OrderSide::Sell => (best_ask, best_bid),
    };
    weight * near + (Decimal::ONE - weight) * far
}

/// Places and supervises maker orders.
pub struct MakerTracker {
    config: MakerConfig,
}

impl MakerTracker {
    pub fn new(config: MakerConfig) -> Self {
        Self { config }
    }

    /// Submit a resting order. A rejection means nothing is being tracked.
    pub async fn place(
        &self,
        venue: &dyn TradingVenue,
        market: &str,
        side: OrderSide,
        quantity: Decimal,
        price: Decimal,
    ) -> Result<TrackedOrder, VenueError> {
        let price = floor_to_precision(price, self.config.price_precision);
        let ack = venue
            .place_order(&OrderRequest::limit(market, side, quantity, price))
            .await?;

        info!(%market, order_id = %ack.order_id, side = %side, %quantity, %price, "Maker order placed");
        Ok(TrackedOrder {
            order_id: ack.order_id,
            side,
            market: market.to_string(),
            reference_price: price,
            quantity,
            placed_at: Instant::now(),
            matched_qty: Decimal::ZERO,
            avg_price: None,
        })
    }

    /// Poll until a terminal outcome.
    pub async fn track(
        &self,
        venue: &dyn TradingVenue,
        mut order: TrackedOrder,
        source: &dyn DivergenceSource,
        band: &SignalBand,
    ) -> MakerReport {
        loop {
            if let Some(report) = self.poll(venue, &mut order, source, band).await {
                return report;
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// One evaluation of the exit conditions, in priority order.
    ///
    /// A failed venue read skips only the check that needed it.
    pub async fn poll(
        &self,
        venue: &dyn TradingVenue,
        order: &mut TrackedOrder,
        source: &dyn DivergenceSource,
        band: &SignalBand,
    ) -> Option<MakerReport> {
        match venue.check_order(&order.market, &order.order_id).await {
            Ok(state) => {
                order.matched_qty = state.matched_qty;
                order.avg_price = state.avg_price;
                if state.is_fully_matched() {
                    info!(order_id = %order.order_id, matched = %order.matched_qty, "Maker order filled");
                    return Some(order.report(MakerOutcome::Filled));
                }
            }
            Err(e) => warn!(order_id = %order.order_id, error = %e, "Maker order check failed"),
        }

        match venue.get_orderbook(&order.market).await {
            Ok(book) => {
                let outbid = match order.side {
                    OrderSide::Buy => book.best_bid().is_some_and(|bid| order.reference_price < bid),
                    OrderSide::Sell => book.best_ask().is_some_and(|ask| order.reference_price > ask),
                };
                if outbid {
                    return Some(self.finish(venue, order, MakerOutcome::NotBest).await);
                }
            }
            Err(e) => debug!(market = %order.market, error = %e, "Best-price check skipped"),
        }

        match source.live_diff().await {
            Ok(d) if band.contains(d.z_value()) => {
                debug!(z = d.z_value(), lower = band.lower, upper = band.upper, "Signal gone");
                return Some(self.finish(venue, order, MakerOutcome::NoSignal).await);
            }
            Ok(_) => {}
            Err(e) => debug!(error = %e, "Signal check skipped"),
        }

        if order.placed_at.elapsed() > self.config.timeout {
            return Some(self.finish(venue, order, MakerOutcome::Timeout).await);
        }

        None
    }

    /// Cancel and capture the final matched quantity.
    async fn finish(
        &self,
        venue: &dyn TradingVenue,
        order: &mut TrackedOrder,
        outcome: MakerOutcome,
    ) -> MakerReport {
        if let Err(e) = venue.cancel_order(&order.market, &order.order_id).await {
            warn!(order_id = %order.order_id, error = %e, "Maker cancel failed");
        }
        if let Ok(state) = venue.check_order(&order.market, &order.order_id).await {
            order.matched_qty = state.matched_qty;
            order.avg_price = state.avg_price;
        }

        info!(
            order_id = %order.order_id,
            %outcome,
            matched = %order.matched_qty,
            elapsed = ?order.placed_at.elapsed(),
            "Maker order closed"
        );
        order.report(outcome)
    }
}
