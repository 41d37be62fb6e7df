//! Position resolution and reconciliation.
//!
//! The venue is authoritative when it answers; otherwise the local cache is,
//! and an empty cache means flat. Every attempted order ends in exactly one
//! cache write so the cache stays a usable fallback.

use crate::exchange::{OrderSide, TradingVenue};
use crate::persistence::PositionStore;
use rust_decimal::Decimal;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Where a resolved position came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionSource {
    Venue,
    Cache,
    Default,
}

impl fmt::Display for PositionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PositionSource::Venue => write!(f, "venue"),
            PositionSource::Cache => write!(f, "cache"),
            PositionSource::Default => write!(f, "default"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedPosition {
    pub quantity: Decimal,
    pub source: PositionSource,
}

/// Two-tier position lookup over one venue and the shared cache.
pub struct PositionLedger {
    venue: Arc<dyn TradingVenue>,
    store: Arc<dyn PositionStore>,
}

impl PositionLedger {
    pub fn new(venue: Arc<dyn TradingVenue>, store: Arc<dyn PositionStore>) -> Self {
        Self { venue, store }
    }

    /// Live venue position, else cached, else zero. Never fails.
    pub async fn current_position(&self, symbol: &str) -> ResolvedPosition {
        match self.venue.get_position(symbol).await {
            Ok(quantity) => ResolvedPosition {
                quantity,
                source: PositionSource::Venue,
            },
            Err(e) => {
                debug!(%symbol, error = %e, "Venue position unavailable, using cache");
                self.cached_position(symbol)
            }
        }
    }

    /// Cached position only, zero when absent or unreadable.
    pub fn cached_position(&self, symbol: &str) -> ResolvedPosition {
        match self.store.read(symbol) {
            Ok(Some(entry)) => ResolvedPosition {
                quantity: entry.quantity,
                source: PositionSource::Cache,
            },
            Ok(None) => ResolvedPosition {
                quantity: Decimal::ZERO,
                source: PositionSource::Default,
            },
            Err(e) => {
                warn!(%symbol, error = %e, "Position cache unavailable, assuming flat");
                ResolvedPosition {
                    quantity: Decimal::ZERO,
                    source: PositionSource::Default,
                }
            }
        }
    }

    /// Store the post-attempt position for `symbol` and return it.
    ///
    /// A venue answer equal to the pre-trade cached value is treated as a stale
    /// endpoint and replaced by `previous ± quantity`. A position that truly
    /// did not move after a confirmed fill is indistinguishable from that case.
    pub async fn reconcile_and_store(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        filled: bool,
        previous: Decimal,
    ) -> Decimal {
        let position = if filled {
            let cached = self.cached_position(symbol);
            let synthesized = previous + side.sign() * quantity;
            match self.venue.get_position(symbol).await {
                Ok(live) if cached.source == PositionSource::Default || live != cached.quantity => {
                    live
                }
                Ok(live) => {
                    warn!(
                        %symbol,
                        %live,
                        %synthesized,
                        "Venue position unchanged after fill, synthesizing"
                    );
                    synthesized
                }
                Err(e) => {
                    debug!(%symbol, error = %e, "Venue position unavailable, synthesizing");
                    synthesized
                }
            }
        } else {
            previous
        };

        match self.store.write(symbol, position) {
            Ok(_) => info!(%symbol, %position, filled, "Position stored"),
            Err(e) => warn!(%symbol, %position, error = %e, "Failed to store position"),
        }
        position
    }
}
