//! Venue-neutral order book and order types.

use super::error::VenueError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One price level of an order book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: Decimal,
    pub quantity: Decimal,
}

/// Order book snapshot. Both sides are ordered best-first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderBook {
    pub market: String,
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
}

impl OrderBook {
    /// Build a book from `(price, quantity)` pairs, already best-first.
    pub fn new(
        market: impl Into<String>,
        bids: Vec<(Decimal, Decimal)>,
        asks: Vec<(Decimal, Decimal)>,
    ) -> Self {
        let level = |(price, quantity)| BookLevel { price, quantity };
        Self {
            market: market.into(),
            bids: bids.into_iter().map(level).collect(),
            asks: asks.into_iter().map(level).collect(),
        }
    }

    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.first().map(|l| l.price)
    }

    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.first().map(|l| l.price)
    }

    /// Best bid and best ask, failing when either side is empty.
    pub fn top_of_book(&self) -> Result<(Decimal, Decimal), VenueError> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Ok((bid, ask)),
            (None, _) => Err(VenueError::market_data(&self.market, "no bids")),
            (_, None) => Err(VenueError::market_data(&self.market, "no asks")),
        }
    }

    /// Mid price of the top of book.
    pub fn mid(&self) -> Result<Decimal, VenueError> {
        let (bid, ask) = self.top_of_book()?;
        Ok((bid + ask) / Decimal::TWO)
    }

    /// Price an aggressive order on `side` would hit: best ask for buys, best bid for sells.
    pub fn aggressive_price(&self, side: OrderSide) -> Result<Decimal, VenueError> {
        let (bid, ask) = self.top_of_book()?;
        Ok(match side {
            OrderSide::Buy => ask,
            OrderSide::Sell => bid,
        })
    }
}

/// Order side (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }

    /// +1 for buys, -1 for sells.
    pub fn sign(self) -> Decimal {
        match self {
            OrderSide::Buy => Decimal::ONE,
            OrderSide::Sell => Decimal::NEGATIVE_ONE,
        }
    }

    /// Side needed to move a position by `delta`.
    pub fn from_delta(delta: Decimal) -> Self {
        if delta > Decimal::ZERO {
            OrderSide::Buy
        } else {
            OrderSide::Sell
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Limit,
    Market,
}

/// Order status as reported by a venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Open,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
}

impl OrderStatus {
    /// Whether the venue will never match more of this order.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Canceled | OrderStatus::Rejected
        )
    }
}

/// New order request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderRequest {
    pub market: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub leverage: Option<u8>,
}

impl OrderRequest {
    pub fn limit(market: &str, side: OrderSide, quantity: Decimal, price: Decimal) -> Self {
        Self {
            market: market.to_string(),
            side,
            order_type: OrderType::Limit,
            quantity,
            price: Some(price),
            leverage: None,
        }
    }

    pub fn market(market: &str, side: OrderSide, quantity: Decimal) -> Self {
        Self {
            market: market.to_string(),
            side,
            order_type: OrderType::Market,
            quantity,
            price: None,
            leverage: None,
        }
    }

    pub fn with_leverage(mut self, leverage: Option<u8>) -> Self {
        self.leverage = leverage;
        self
    }
}

/// Acknowledgement of an accepted order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderAck {
    pub order_id: String,
    pub market: String,
}

/// Snapshot of an order's fill state.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderState {
    pub order_id: String,
    pub market: String,
    pub side: OrderSide,
    pub status: OrderStatus,
    pub requested_qty: Decimal,
    pub matched_qty: Decimal,
    pub unmatched_qty: Decimal,
    /// Limit price of the order (zero for market orders).
    pub price: Decimal,
    pub avg_price: Option<Decimal>,
}

impl OrderState {
    /// Terminal and nothing left unmatched.
    pub fn is_fully_matched(&self) -> bool {
        self.status.is_terminal() && self.unmatched_qty <= Decimal::ZERO
    }
}

/// Result of a cancel request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled,
    AlreadyTerminal,
}

/// Direction of a net position, derived from the sign of its quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    Long,
    Short,
    Flat,
}

impl PositionSide {
    pub fn from_quantity(quantity: Decimal) -> Self {
        if quantity > Decimal::ZERO {
            PositionSide::Long
        } else if quantity < Decimal::ZERO {
            PositionSide::Short
        } else {
            PositionSide::Flat
        }
    }
}

/// How an order interacts with the book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionRole {
    Maker,
    Taker,
}

impl ExecutionRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionRole::Maker => "maker",
            ExecutionRole::Taker => "taker",
        }
    }
}

/// One execution attempt, alive for the duration of a single executor call.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderAttempt {
    pub symbol: String,
    pub side: OrderSide,
    pub requested_qty: Decimal,
    pub price: Decimal,
    pub role: ExecutionRole,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_mid_and_aggressive_price() {
        let book = OrderBook::new(
            "BTCUSDT",
            vec![(dec!(100), dec!(1)), (dec!(99), dec!(2))],
            vec![(dec!(102), dec!(1))],
        );
        assert_eq!(book.mid().unwrap(), dec!(101));
        assert_eq!(book.aggressive_price(OrderSide::Buy).unwrap(), dec!(102));
        assert_eq!(book.aggressive_price(OrderSide::Sell).unwrap(), dec!(100));
    }

    #[test]
    fn test_empty_side_is_market_data_unavailable() {
        let book = OrderBook::new("USDTIRT", vec![(dec!(1), dec!(1))], vec![]);
        assert!(matches!(
            book.mid(),
            Err(VenueError::MarketDataUnavailable { .. })
        ));
    }

    #[test]
    fn test_position_side_from_quantity() {
        assert_eq!(PositionSide::from_quantity(dec!(0.5)), PositionSide::Long);
        assert_eq!(PositionSide::from_quantity(dec!(-0.5)), PositionSide::Short);
        assert_eq!(PositionSide::from_quantity(Decimal::ZERO), PositionSide::Flat);
    }

    #[test]
    fn test_fully_matched_requires_terminal_status() {
        let mut state = OrderState {
            order_id: "1".to_string(),
            market: "BTCIRT".to_string(),
            side: OrderSide::Buy,
            status: OrderStatus::Open,
            requested_qty: dec!(1),
            matched_qty: dec!(1),
            unmatched_qty: Decimal::ZERO,
            price: dec!(100),
            avg_price: Some(dec!(100)),
        };
        assert!(!state.is_fully_matched());
        state.status = OrderStatus::Filled;
        assert!(state.is_fully_matched());
    }
}
