//! The hedging control loop.
//!
//! One instance drives one asset in one role:
//! - [`HedgeRole::Hedger`] keeps the derivatives position at the inventory
//!   target with fill-or-kill taker orders
//! - [`HedgeRole::Maker`] trades the spot leg with resting orders while the
//!   divergence is outside the band
//!
//! Each cycle runs signal, position read, order placement and ledger write
//! strictly in that order.

use crate::config::{AssetConfig, ExecutionConfig};
use crate::exchange::{ExecutionRole, OrderAttempt, OrderSide, TradingVenue};
use crate::ledger::PositionLedger;
use crate::persistence::{PositionStore, TradeJournal, TradeRecord};
use crate::signal::{DivergenceSource, SignalBand, SignalDirection, SignalMarkets, StatsEstimator};
use crate::strategy::inventory::InventoryBounds;
use crate::strategy::maker::{weighted_limit_price, MakerConfig, MakerReport, MakerTracker};
use crate::strategy::taker::{FokOutcome, RevertStatus, TakerConfig, TakerExecutor};
use anyhow::{Context, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Which leg this instance drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HedgeRole {
    /// Derivatives leg, taker orders toward the inventory target.
    Hedger,
    /// Spot leg, maker orders on the signal.
    Maker,
}

impl fmt::Display for HedgeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HedgeRole::Hedger => write!(f, "hedger"),
            HedgeRole::Maker => write!(f, "maker"),
        }
    }
}

/// Why a cycle placed no order.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    /// Rolling deviation is zero.
    NoStatistics,
    MarketData(String),
    InsideBand,
    /// Hedge delta at or below the minimum order size.
    BelowMinQty,
    /// Hedge leg is too far from offsetting the spot holding.
    HedgeOutOfBand,
    /// The spot trade would leave the holding range.
    InventoryLimit,
}

/// Result of one control cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Skipped(SkipReason),
    Hedged {
        attempt: OrderAttempt,
        outcome: FokOutcome,
        position: Decimal,
    },
    Quoted {
        attempt: OrderAttempt,
        report: MakerReport,
        position: Decimal,
    },
    /// The maker order was refused; nothing rests.
    Rejected { reason: String, position: Decimal },
}

/// Immutable per-instance settings.
#[derive(Debug, Clone)]
pub struct ControlSettings {
    pub markets: SignalMarkets,
    /// Coin whose spot balance is the held inventory
    pub base_asset: String,
    pub bounds: InventoryBounds,
    pub window_minutes: u32,
    pub k: f64,
    pub stats_refresh: Duration,
    pub min_qty: Decimal,
    pub order_quantity: Decimal,
    pub w_buy: Decimal,
    pub w_sell: Decimal,
    pub leverage: u8,
    pub interval: Duration,
    pub error_backoff: Duration,
    pub taker: TakerConfig,
    pub maker: MakerConfig,
}

impl ControlSettings {
    pub fn from_config(asset: &AssetConfig, execution: &ExecutionConfig) -> Self {
        Self {
            markets: SignalMarkets {
                spot_market: asset.spot_market.clone(),
                derivatives_market: asset.derivatives_market.clone(),
                fiat_rate_market: asset.fiat_rate_market.clone(),
            },
            base_asset: asset.base_asset().to_string(),
            bounds: InventoryBounds::new(
                asset.lower_units,
                asset.upper_units,
                asset.tolerance_units,
            ),
            window_minutes: asset.window_minutes,
            k: asset.k,
            stats_refresh: asset.stats_refresh(),
            min_qty: asset.min_qty,
            order_quantity: asset.order_quantity,
            w_buy: asset.w_buy,
            w_sell: asset.w_sell,
            leverage: asset.leverage,
            interval: Duration::from_millis(execution.interval_ms),
            error_backoff: Duration::from_secs(execution.error_backoff_secs),
            taker: TakerConfig {
                qty_precision: asset.qty_precision,
                price_precision: asset.price_precision,
                settle_wait: Duration::from_millis(execution.taker_settle_ms),
                leverage: Some(asset.leverage),
            },
            maker: MakerConfig {
                poll_interval: Duration::from_millis(execution.maker_poll_ms),
                timeout: Duration::from_secs(execution.maker_timeout_secs),
                price_precision: asset.spot_price_precision,
            },
        }
    }
}

/// Sequential control loop for one asset and role.
pub struct ControlLoop {
    role: HedgeRole,
    settings: ControlSettings,
    spot: Arc<dyn TradingVenue>,
    derivatives: Arc<dyn TradingVenue>,
    signal: Arc<dyn DivergenceSource>,
    estimator: StatsEstimator,
    hedge_ledger: PositionLedger,
    spot_ledger: PositionLedger,
    taker: TakerExecutor,
    maker: MakerTracker,
    journal: Option<TradeJournal>,
    band: Option<SignalBand>,
    last_refresh: Option<Instant>,
}

impl ControlLoop {
    pub fn new(
        role: HedgeRole,
        settings: ControlSettings,
        spot: Arc<dyn TradingVenue>,
        derivatives: Arc<dyn TradingVenue>,
        signal: Arc<dyn DivergenceSource>,
        estimator: StatsEstimator,
        positions: Arc<dyn PositionStore>,
    ) -> Self {
        Self {
            role,
            hedge_ledger: PositionLedger::new(derivatives.clone(), positions.clone()),
            spot_ledger: PositionLedger::new(spot.clone(), positions),
            taker: TakerExecutor::new(settings.taker.clone()),
            maker: MakerTracker::new(settings.maker.clone()),
            settings,
            spot,
            derivatives,
            signal,
            estimator,
            journal: None,
            band: None,
            last_refresh: None,
        }
    }

    pub fn with_journal(mut self, journal: TradeJournal) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn journal(&self) -> Option<&TradeJournal> {
        self.journal.as_ref()
    }

    /// Current band, once statistics have been computed.
    pub fn band(&self) -> Option<&SignalBand> {
        self.band.as_ref()
    }

    /// Startup venue setup. Failures are warnings.
    pub async fn prepare(&self) {
        if self.role != HedgeRole::Hedger {
            return;
        }
        let market = &self.settings.markets.derivatives_market;
        match self
            .derivatives
            .set_leverage(market, self.settings.leverage)
            .await
        {
            Ok(()) => info!(%market, leverage = self.settings.leverage, "Leverage set"),
            Err(e) => warn!(%market, error = %e, "Failed to set leverage"),
        }
    }

    /// Run cycles until `shutdown` is set, then flush the trade journal.
    pub async fn run(&mut self, shutdown: Arc<AtomicBool>) {
        info!(
            role = %self.role,
            spot = %self.settings.markets.spot_market,
            derivatives = %self.settings.markets.derivatives_market,
            "Control loop started"
        );

        while !shutdown.load(Ordering::SeqCst) {
            tokio::time::sleep(self.settings.interval).await;
            if shutdown.load(Ordering::SeqCst) {
                break;
            }

            match self.run_cycle().await {
                Ok(CycleOutcome::Skipped(reason)) => debug!(?reason, "Cycle skipped"),
                Ok(outcome) => info!(?outcome, "Cycle complete"),
                Err(e) => {
                    error!(error = %e, "Cycle failed");
                    tokio::time::sleep(self.settings.error_backoff).await;
                }
            }
        }

        if let Some(journal) = self.journal.as_mut() {
            if let Err(e) = journal.flush() {
                warn!(error = %e, "Final trade journal flush failed");
            }
        }
        info!(role = %self.role, "Control loop stopped");
    }

    /// One cycle without the leading sleep.
    pub async fn run_cycle(&mut self) -> Result<CycleOutcome> {
        if self.refresh_due() {
            let stats = self
                .estimator
                .window_stats(self.signal.as_ref(), self.settings.window_minutes)
                .await;
            let band = SignalBand::new(&stats, self.settings.k);
            info!(
                mean = band.mean,
                std = band.std_dev,
                n = stats.samples,
                lower = band.lower,
                upper = band.upper,
                "Signal band refreshed"
            );
            if !stats.is_actionable() {
                warn!(n = stats.samples, "Zero deviation, no trading until the next refresh");
            }
            self.band = Some(band);
            self.last_refresh = Some(Instant::now());
        }

        let band = match self.band {
            Some(band) if band.std_dev > 0.0 => band,
            _ => return Ok(CycleOutcome::Skipped(SkipReason::NoStatistics)),
        };

        let z = match self.signal.live_diff().await {
            Ok(d) => d.z_value(),
            Err(e) => {
                warn!(error = %e, "Live divergence unavailable");
                return Ok(CycleOutcome::Skipped(SkipReason::MarketData(e.to_string())));
            }
        };
        if band.contains(z) {
            return Ok(CycleOutcome::Skipped(SkipReason::InsideBand));
        }

        match self.role {
            HedgeRole::Hedger => self.hedge(z).await,
            HedgeRole::Maker => self.quote(z, band).await,
        }
    }

    fn refresh_due(&self) -> bool {
        self.last_refresh
            .map_or(true, |at| at.elapsed() > self.settings.stats_refresh)
    }

    async fn held_units(&self) -> Result<Decimal> {
        self.spot
            .get_balance(&self.settings.base_asset)
            .await
            .with_context(|| format!("Failed to read {} spot balance", self.settings.base_asset))
    }

    /// Move the derivatives position to the inventory target.
    async fn hedge(&mut self, z: f64) -> Result<CycleOutcome> {
        let market = self.settings.markets.derivatives_market.clone();
        let held = self.held_units().await?;
        let target = self.settings.bounds.target(held);
        let current = self.hedge_ledger.current_position(&market).await;

        let delta = target - current.quantity;
        let side = OrderSide::from_delta(delta);
        let need = delta.abs();
        if need <= self.settings.min_qty {
            return Ok(CycleOutcome::Skipped(SkipReason::BelowMinQty));
        }

        let price = match self.derivatives.get_orderbook(&market).await {
            Ok(book) => book.aggressive_price(side),
            Err(e) => Err(e),
        };
        let price = match price {
            Ok(price) => price,
            Err(e) => return Ok(CycleOutcome::Skipped(SkipReason::MarketData(e.to_string()))),
        };

        info!(
            %market,
            z,
            %target,
            current = %current.quantity,
            source = %current.source,
            %delta,
            side = %side,
            %need,
            %price,
            "Hedging toward target"
        );

        let outcome = self
            .taker
            .execute(self.derivatives.as_ref(), &market, side, need, price)
            .await;
        let (moved, quantity, fill_price) = match &outcome {
            FokOutcome::Filled { quantity, price } => (true, *quantity, *price),
            // The unwind failed, so the matched part is still held
            FokOutcome::NotFilled {
                matched,
                revert: RevertStatus::Failed(_),
                ..
            } => (true, *matched, price),
            FokOutcome::NotFilled {
                revert: RevertStatus::Unknown,
                ..
            } => {
                warn!(
                    %market,
                    previous = %current.quantity,
                    "Hedge order state unknown, stored position may be stale"
                );
                (false, self.taker.submitted_quantity(need), price)
            }
            _ => (false, self.taker.submitted_quantity(need), price),
        };

        let position = self
            .hedge_ledger
            .reconcile_and_store(&market, side, quantity, moved, current.quantity)
            .await;

        if outcome.is_filled() && quantity > Decimal::ZERO {
            self.journal_trade(&market, side, ExecutionRole::Taker, quantity, fill_price, outcome.label());
        }

        Ok(CycleOutcome::Hedged {
            attempt: OrderAttempt {
                symbol: market,
                side,
                requested_qty: need,
                price,
                role: ExecutionRole::Taker,
            },
            outcome,
            position,
        })
    }

    /// Rest a spot order in the direction of the signal.
    async fn quote(&mut self, z: f64, band: SignalBand) -> Result<CycleOutcome> {
        let market = self.settings.markets.spot_market.clone();
        let hedge_market = &self.settings.markets.derivatives_market;
        let held = self.held_units().await?;

        // Processes share positions only through the cache
        let hedge = self.hedge_ledger.cached_position(hedge_market);
        if !self.settings.bounds.hedge_in_band(hedge.quantity, held) {
            info!(
                hedge = %hedge.quantity,
                target = %self.settings.bounds.target(held),
                tolerance = %self.settings.bounds.tolerance,
                "Hedge leg out of band, not quoting"
            );
            return Ok(CycleOutcome::Skipped(SkipReason::HedgeOutOfBand));
        }

        let side = match band.direction(z) {
            Some(SignalDirection::Above) => OrderSide::Buy,
            Some(SignalDirection::Below) => OrderSide::Sell,
            None => return Ok(CycleOutcome::Skipped(SkipReason::InsideBand)),
        };
        let quantity = self.settings.order_quantity;
        if !self.settings.bounds.permits(side, held, quantity) {
            info!(side = %side, %held, %quantity, "Spot trade would leave inventory range");
            return Ok(CycleOutcome::Skipped(SkipReason::InventoryLimit));
        }

        let top = match self.spot.get_orderbook(&market).await {
            Ok(book) => book.top_of_book(),
            Err(e) => Err(e),
        };
        let (best_bid, best_ask) = match top {
            Ok(top) => top,
            Err(e) => return Ok(CycleOutcome::Skipped(SkipReason::MarketData(e.to_string()))),
        };
        let weight = match side {
            OrderSide::Buy => self.settings.w_buy,
            OrderSide::Sell => self.settings.w_sell,
        };
        let price = weighted_limit_price(side, best_bid, best_ask, weight);

        info!(%market, z, lower = band.lower, upper = band.upper, side = %side, %quantity, %price, "Quoting spot");

        let order = match self
            .maker
            .place(self.spot.as_ref(), &market, side, quantity, price)
            .await
        {
            Ok(order) => order,
            Err(e) => {
                warn!(%market, error = %e, "Maker order rejected");
                let position = self
                    .spot_ledger
                    .reconcile_and_store(&market, side, quantity, false, held)
                    .await;
                return Ok(CycleOutcome::Rejected {
                    reason: e.to_string(),
                    position,
                });
            }
        };
        let order_price = order.reference_price;

        let report = self
            .maker
            .track(self.spot.as_ref(), order, self.signal.as_ref(), &band)
            .await;

        let matched = report.matched_qty;
        let position = self
            .spot_ledger
            .reconcile_and_store(&market, side, matched, matched > Decimal::ZERO, held)
            .await;

        if matched > Decimal::ZERO {
            let fill_price = report.avg_price.unwrap_or(order_price);
            let outcome = report.outcome.to_string();
            self.journal_trade(&market, side, ExecutionRole::Maker, matched, fill_price, &outcome);
        }

        Ok(CycleOutcome::Quoted {
            attempt: OrderAttempt {
                symbol: market,
                side,
                requested_qty: quantity,
                price: order_price,
                role: ExecutionRole::Maker,
            },
            report,
            position,
        })
    }

    fn journal_trade(
        &mut self,
        symbol: &str,
        side: OrderSide,
        role: ExecutionRole,
        quantity: Decimal,
        price: Decimal,
        outcome: &str,
    ) {
        if let Some(journal) = self.journal.as_mut() {
            journal.record(TradeRecord {
                timestamp: Utc::now(),
                symbol: symbol.to_string(),
                side,
                role,
                quantity,
                price,
                outcome: outcome.to_string(),
            });
        }
    }
}
