//! Fill-or-kill emulation on the hedge venue.
//!
//! A limit order is placed at the touch, given a short moment to match, and
//! cancelled if it did not fill completely. Whatever did match is unwound
//! with one market order on the opposite side.

use crate::error::HedgeError;
use crate::exchange::{CancelOutcome, OrderRequest, OrderSide, OrderState, TradingVenue};
use crate::utils::decimal::floor_to_precision;
use rust_decimal::Decimal;
use std::time::Duration;
use tracing::{error, info, warn};

/// Taker execution settings for one instrument.
#[derive(Debug, Clone)]
pub struct TakerConfig {
    pub qty_precision: u32,
    pub price_precision: u32,
    /// Wait between placement and the fill check
    pub settle_wait: Duration,
    pub leverage: Option<u8>,
}

impl Default for TakerConfig {
    fn default() -> Self {
        Self {
            qty_precision: 6,
            price_precision: 2,
            settle_wait: Duration::from_millis(400),
            leverage: None,
        }
    }
}

/// What happened to the unwind of a partial fill.
#[derive(Debug, Clone, PartialEq)]
pub enum RevertStatus {
    /// Nothing matched.
    NotNeeded,
    /// The matched quantity was sold (or bought) back.
    Reverted,
    /// The unwind order failed; exposure has drifted by the matched quantity.
    Failed(String),
    /// The order could not be inspected, so the matched quantity is not known.
    Unknown,
}

/// Terminal result of one fill-or-kill attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum FokOutcome {
    Filled {
        quantity: Decimal,
        price: Decimal,
    },
    NotFilled {
        requested: Decimal,
        matched: Decimal,
        revert: RevertStatus,
    },
    /// Placement failed; no exposure change.
    Rejected { reason: String },
}

impl FokOutcome {
    pub fn is_filled(&self) -> bool {
        matches!(self, FokOutcome::Filled { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            FokOutcome::Filled { .. } => "FILLED",
            FokOutcome::NotFilled { .. } => "NOT_FILLED",
            FokOutcome::Rejected { .. } => "REJECTED",
        }
    }
}

/// Executes all-or-nothing aggressive orders.
pub struct TakerExecutor {
    config: TakerConfig,
}

impl TakerExecutor {
    pub fn new(config: TakerConfig) -> Self {
        Self { config }
    }

    /// Quantity actually submitted for a requested size.
    pub fn submitted_quantity(&self, quantity: Decimal) -> Decimal {
        floor_to_precision(quantity, self.config.qty_precision).max(Decimal::ZERO)
    }

    /// Buy or sell `quantity` at `price` completely, or leave exposure unchanged.
    pub async fn execute(
        &self,
        venue: &dyn TradingVenue,
        market: &str,
        side: OrderSide,
        quantity: Decimal,
        price: Decimal,
    ) -> FokOutcome {
        let quantity = self.submitted_quantity(quantity);
        let price = floor_to_precision(price, self.config.price_precision);
        if quantity <= Decimal::ZERO {
            return FokOutcome::Filled {
                quantity: Decimal::ZERO,
                price,
            };
        }

        let request = OrderRequest::limit(market, side, quantity, price)
            .with_leverage(self.config.leverage);
        let ack = match venue.place_order(&request).await {
            Ok(ack) => ack,
            Err(e) => {
                error!(%market, side = %side, %quantity, %price, error = %e, "Taker order failed");
                return FokOutcome::Rejected {
                    reason: e.to_string(),
                };
            }
        };

        tokio::time::sleep(self.config.settle_wait).await;

        let state = match venue.check_order(market, &ack.order_id).await {
            Ok(state) => state,
            Err(e) => {
                error!(%market, order_id = %ack.order_id, error = %e, "Taker order check failed");
                if let Err(e) = venue.cancel_order(market, &ack.order_id).await {
                    warn!(%market, order_id = %ack.order_id, error = %e, "Cancel failed");
                }
                return FokOutcome::NotFilled {
                    requested: quantity,
                    matched: Decimal::ZERO,
                    revert: RevertStatus::Unknown,
                };
            }
        };

        if let Some(filled) = Self::filled(&state, quantity) {
            return filled;
        }

        let state = match venue.cancel_order(market, &ack.order_id).await {
            // Filled or cancelled between the check and the cancel
            Ok(CancelOutcome::AlreadyTerminal) => {
                match venue.check_order(market, &ack.order_id).await {
                    Ok(latest) => latest,
                    Err(_) => state,
                }
            }
            Ok(CancelOutcome::Cancelled) => state,
            Err(e) => {
                warn!(%market, order_id = %ack.order_id, error = %e, "Cancel failed");
                state
            }
        };

        if let Some(filled) = Self::filled(&state, quantity) {
            return filled;
        }

        let matched = state.matched_qty;
        let revert = if matched > Decimal::ZERO {
            self.revert(venue, market, side, matched).await
        } else {
            RevertStatus::NotNeeded
        };

        info!(
            %market,
            side = %side,
            requested = %quantity,
            %matched,
            revert = ?revert,
            "Taker order not filled"
        );
        FokOutcome::NotFilled {
            requested: quantity,
            matched,
            revert,
        }
    }

    fn filled(state: &OrderState, quantity: Decimal) -> Option<FokOutcome> {
        let requested = if state.requested_qty > Decimal::ZERO {
            state.requested_qty
        } else {
            quantity
        };
        (state.matched_qty >= requested).then(|| FokOutcome::Filled {
            quantity,
            price: state.avg_price.unwrap_or(state.price),
        })
    }

    /// Undo a partial fill. Not retried.
    async fn revert(
        &self,
        venue: &dyn TradingVenue,
        market: &str,
        side: OrderSide,
        matched: Decimal,
    ) -> RevertStatus {
        let request = OrderRequest::market(market, side.opposite(), matched)
            .with_leverage(self.config.leverage);
        match venue.place_order(&request).await {
            Ok(ack) => {
                info!(%market, order_id = %ack.order_id, %matched, "Partial fill reverted");
                RevertStatus::Reverted
            }
            Err(e) => {
                let err = HedgeError::PartialFillRevertFailed {
                    market: market.to_string(),
                    side,
                    quantity: matched,
                    reason: e.to_string(),
                };
                error!(error = %err, "Exposure drift: partial fill left open");
                RevertStatus::Failed(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{FillPlan, MockVenue, OrderBook, OrderType};
    use rust_decimal_macros::dec;

    async fn venue() -> MockVenue {
        let venue = MockVenue::new("coinex");
        venue
            .set_orderbook(OrderBook::new(
                "BTCUSDT",
                vec![(dec!(70000), dec!(5))],
                vec![(dec!(70001), dec!(5))],
            ))
            .await;
        venue
    }

    fn executor() -> TakerExecutor {
        TakerExecutor::new(TakerConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_fill_issues_no_compensating_order() {
        let venue = venue().await;
        venue.plan_next_fill(FillPlan::Full).await;

        let started = tokio::time::Instant::now();
        let outcome = executor()
            .execute(&venue, "BTCUSDT", OrderSide::Buy, dec!(10), dec!(70001))
            .await;

        assert_eq!(
            outcome,
            FokOutcome::Filled {
                quantity: dec!(10),
                price: dec!(70001)
            }
        );
        assert_eq!(started.elapsed(), Duration::from_millis(400));
        assert_eq!(venue.placed_orders().await.len(), 1);
        assert!(venue.cancel_requests().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_fill_is_reverted_once() {
        let venue = venue().await;
        venue.plan_next_fill(FillPlan::Partial(dec!(4))).await;

        let outcome = executor()
            .execute(&venue, "BTCUSDT", OrderSide::Buy, dec!(10), dec!(70001))
            .await;

        assert_eq!(
            outcome,
            FokOutcome::NotFilled {
                requested: dec!(10),
                matched: dec!(4),
                revert: RevertStatus::Reverted,
            }
        );
        let placed = venue.placed_orders().await;
        assert_eq!(placed.len(), 2);
        assert_eq!(placed[1].order_type, OrderType::Market);
        assert_eq!(placed[1].side, OrderSide::Sell);
        assert_eq!(placed[1].quantity, dec!(4));
        assert_eq!(venue.cancel_requests().await.len(), 1);
        assert_eq!(venue.position("BTCUSDT").await, Decimal::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resting_order_cancelled_without_revert() {
        let venue = venue().await;
        venue.plan_next_fill(FillPlan::Rest).await;

        let outcome = executor()
            .execute(&venue, "BTCUSDT", OrderSide::Sell, dec!(1), dec!(70000))
            .await;

        assert_eq!(
            outcome,
            FokOutcome::NotFilled {
                requested: dec!(1),
                matched: Decimal::ZERO,
                revert: RevertStatus::NotNeeded,
            }
        );
        assert_eq!(venue.placed_orders().await.len(), 1);
        assert_eq!(venue.cancel_requests().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_revert_leaves_drift() {
        let venue = venue().await;
        venue.plan_next_fill(FillPlan::Partial(dec!(4))).await;
        venue.reject_market_orders(Some("reduce only")).await;

        let outcome = executor()
            .execute(&venue, "BTCUSDT", OrderSide::Sell, dec!(10), dec!(70000))
            .await;

        match outcome {
            FokOutcome::NotFilled {
                matched,
                revert: RevertStatus::Failed(reason),
                ..
            } => {
                assert_eq!(matched, dec!(4));
                assert!(reason.contains("reduce only"));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(venue.placed_orders().await.len(), 1);
        assert_eq!(venue.position("BTCUSDT").await, dec!(-4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_quantity_and_price_rounded_down() {
        let venue = venue().await;
        venue.plan_next_fill(FillPlan::Full).await;

        let outcome = executor()
            .execute(&venue, "BTCUSDT", OrderSide::Buy, dec!(1.23456789), dec!(70851.949))
            .await;

        assert!(outcome.is_filled());
        let placed = venue.placed_orders().await;
        assert_eq!(placed[0].quantity, dec!(1.234567));
        assert_eq!(placed[0].price, Some(dec!(70851.94)));
    }

    #[tokio::test]
    async fn test_dust_quantity_is_trivial_success() {
        let venue = venue().await;
        let outcome = executor()
            .execute(&venue, "BTCUSDT", OrderSide::Buy, dec!(0.0000004), dec!(70001))
            .await;

        assert!(outcome.is_filled());
        assert!(venue.placed_orders().await.is_empty());
    }

    #[tokio::test]
    async fn test_placement_rejection() {
        let venue = venue().await;
        venue.reject_orders(Some("insufficient margin")).await;

        let outcome = executor()
            .execute(&venue, "BTCUSDT", OrderSide::Buy, dec!(1), dec!(70001))
            .await;

        assert_eq!(outcome.label(), "REJECTED");
        assert!(venue.cancel_requests().await.is_empty());
        assert_eq!(venue.position("BTCUSDT").await, Decimal::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_leverage_forwarded() {
        let venue = venue().await;
        venue.plan_next_fill(FillPlan::Full).await;
        let executor = TakerExecutor::new(TakerConfig {
            leverage: Some(3),
            ..TakerConfig::default()
        });

        executor
            .execute(&venue, "BTCUSDT", OrderSide::Sell, dec!(1), dec!(70000))
            .await;
        assert_eq!(venue.placed_orders().await[0].leverage, Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_check_cancels_and_reports_unknown_revert() {
        let venue = venue().await;
        venue.plan_next_fill(FillPlan::Rest).await;
        venue.fail_next_checks(1).await;

        let outcome = executor()
            .execute(&venue, "BTCUSDT", OrderSide::Buy, dec!(10), dec!(70001))
            .await;

        assert_eq!(
            outcome,
            FokOutcome::NotFilled {
                requested: dec!(10),
                matched: Decimal::ZERO,
                revert: RevertStatus::Unknown,
            }
        );
        assert_eq!(venue.placed_orders().await.len(), 1);
        assert_eq!(venue.cancel_requests().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fill_racing_the_cancel_counts_as_filled() {
        let venue = venue().await;
        venue.plan_next_fill(FillPlan::Rest).await;
        venue.fill_before_next_cancel().await;

        let outcome = executor()
            .execute(&venue, "BTCUSDT", OrderSide::Buy, dec!(10), dec!(70001))
            .await;

        assert_eq!(
            outcome,
            FokOutcome::Filled {
                quantity: dec!(10),
                price: dec!(70001)
            }
        );
        // No compensating market order
        assert_eq!(venue.placed_orders().await.len(), 1);
        assert_eq!(venue.position("BTCUSDT").await, dec!(10));
    }
}
