//! Simulated venue for paper trading and tests.
//!
//! Order books are either scripted (a queue per market, advanced on each read)
//! or pulled from a live [`BookFeed`]. Limit orders rest until the book crosses
//! them, unless a [`FillPlan`] dictates the outcome of the next limit order.

use super::error::VenueError;
use super::traits::{BookFeed, TradingVenue};
use super::types::*;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Scripted outcome for the next limit order placed on the venue.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FillPlan {
    /// Fill the whole order at its limit price.
    Full,
    /// Match this quantity and leave the rest resting.
    Partial(Decimal),
    /// Rest without matching anything.
    Rest,
}

/// Simulated order with its current fill state.
#[derive(Debug, Clone)]
pub struct MockOrder {
    pub request: OrderRequest,
    pub state: OrderState,
    /// Scripted orders never match against the book.
    pub scripted: bool,
}

#[derive(Debug, Default)]
struct MockVenueState {
    books: HashMap<String, VecDeque<OrderBook>>,
    orders: HashMap<String, MockOrder>,
    positions: HashMap<String, Decimal>,
    balances: HashMap<String, Decimal>,
    /// market -> base asset whose balance moves on fills
    base_assets: HashMap<String, String>,
    fill_plans: VecDeque<FillPlan>,
    placed: Vec<OrderRequest>,
    cancels: Vec<String>,
    leverage: HashMap<String, u8>,
    reject_reason: Option<String>,
    market_order_reject_reason: Option<String>,
    position_endpoint: bool,
    failing_checks: usize,
    failing_books: usize,
    fill_before_cancel: bool,
}

/// Mock venue that simulates matching against a book.
pub struct MockVenue {
    name: String,
    state: Arc<RwLock<MockVenueState>>,
    order_id_counter: AtomicU64,
    feed: Option<Arc<dyn BookFeed>>,
}

impl MockVenue {
    /// Create an empty venue with scripted books.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: Arc::new(RwLock::new(MockVenueState::default())),
            order_id_counter: AtomicU64::new(1),
            feed: None,
        }
    }

    /// Pull books from a live feed instead of the scripted queue.
    pub fn with_feed(mut self, feed: Arc<dyn BookFeed>) -> Self {
        self.feed = Some(feed);
        self
    }

    fn next_order_id(&self) -> String {
        self.order_id_counter.fetch_add(1, Ordering::SeqCst).to_string()
    }

    /// Move `asset`'s balance whenever `market` fills.
    pub async fn register_market(&self, market: &str, base_asset: &str) {
        self.state
            .write()
            .await
            .base_assets
            .insert(market.to_string(), base_asset.to_string());
    }

    /// Replace the book for `market`.
    pub async fn set_orderbook(&self, book: OrderBook) {
        let mut state = self.state.write().await;
        state
            .books
            .insert(book.market.clone(), VecDeque::from(vec![book]));
    }

    /// Queue books for `market`. Each read returns the head and advances; the last one sticks.
    pub async fn queue_orderbooks(&self, market: &str, books: Vec<OrderBook>) {
        let mut state = self.state.write().await;
        state
            .books
            .entry(market.to_string())
            .or_default()
            .extend(books);
    }

    /// Script the outcome of the next limit order.
    pub async fn plan_next_fill(&self, plan: FillPlan) {
        self.state.write().await.fill_plans.push_back(plan);
    }

    /// Reject every new order with `reason` (or stop rejecting with `None`).
    pub async fn reject_orders(&self, reason: Option<&str>) {
        self.state.write().await.reject_reason = reason.map(str::to_string);
    }

    /// Reject market orders only.
    pub async fn reject_market_orders(&self, reason: Option<&str>) {
        self.state.write().await.market_order_reject_reason = reason.map(str::to_string);
    }

    /// Fail the next `count` order checks with a transport error.
    pub async fn fail_next_checks(&self, count: usize) {
        self.state.write().await.failing_checks = count;
    }

    /// Fail the next `count` order book reads with a transport error.
    pub async fn fail_next_orderbooks(&self, count: usize) {
        self.state.write().await.failing_books = count;
    }

    /// Fill the next cancelled order completely before the cancel lands.
    pub async fn fill_before_next_cancel(&self) {
        self.state.write().await.fill_before_cancel = true;
    }

    /// Expose or hide the position endpoint.
    pub async fn set_position_endpoint(&self, enabled: bool) {
        self.state.write().await.position_endpoint = enabled;
    }

    pub async fn set_position(&self, market: &str, quantity: Decimal) {
        self.state
            .write()
            .await
            .positions
            .insert(market.to_string(), quantity);
    }

    pub async fn set_balance(&self, asset: &str, quantity: Decimal) {
        self.state
            .write()
            .await
            .balances
            .insert(asset.to_string(), quantity);
    }

    /// Every order request accepted so far.
    pub async fn placed_orders(&self) -> Vec<OrderRequest> {
        self.state.read().await.placed.clone()
    }

    /// Order ids passed to `cancel_order`, in call order.
    pub async fn cancel_requests(&self) -> Vec<String> {
        self.state.read().await.cancels.clone()
    }

    pub async fn order(&self, order_id: &str) -> Option<MockOrder> {
        self.state.read().await.orders.get(order_id).cloned()
    }

    pub async fn position(&self, market: &str) -> Decimal {
        self.state
            .read()
            .await
            .positions
            .get(market)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    pub async fn leverage(&self, market: &str) -> Option<u8> {
        self.state.read().await.leverage.get(market).copied()
    }

    fn current_book(state: &MockVenueState, market: &str) -> Option<OrderBook> {
        state.books.get(market).and_then(|q| q.front().cloned())
    }

    /// Book a fill of `quantity` on `market` against positions and balances.
    fn apply_fill(state: &mut MockVenueState, market: &str, side: OrderSide, quantity: Decimal) {
        let signed = side.sign() * quantity;
        *state.positions.entry(market.to_string()).or_default() += signed;
        if let Some(asset) = state.base_assets.get(market).cloned() {
            *state.balances.entry(asset).or_default() += signed;
        }
    }

    /// Fill resting, non-scripted limit orders the current book crosses.
    fn match_resting(state: &mut MockVenueState, market: &str) {
        let Some(book) = Self::current_book(state, market) else {
            return;
        };

        let mut fills = Vec::new();
        for order in state.orders.values_mut() {
            let s = &mut order.state;
            if order.scripted || s.market != market || s.status.is_terminal() {
                continue;
            }
            let crosses = match s.side {
                OrderSide::Buy => book.best_ask().is_some_and(|ask| ask <= s.price),
                OrderSide::Sell => book.best_bid().is_some_and(|bid| bid >= s.price),
            };
            if crosses {
                let remaining = s.unmatched_qty;
                s.matched_qty += remaining;
                s.unmatched_qty = Decimal::ZERO;
                s.status = OrderStatus::Filled;
                s.avg_price = Some(s.price);
                fills.push((s.side, remaining, s.order_id.clone()));
            }
        }

        for (side, quantity, order_id) in fills {
            debug!(%market, %order_id, %quantity, "Mock resting order matched");
            Self::apply_fill(state, market, side, quantity);
        }
    }
}

#[async_trait]
impl TradingVenue for MockVenue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_orderbook(&self, market: &str) -> Result<OrderBook, VenueError> {
        {
            let mut state = self.state.write().await;
            if state.failing_books > 0 {
                state.failing_books -= 1;
                return Err(VenueError::Transport(format!("{} book read failed", self.name)));
            }
        }
        if let Some(feed) = &self.feed {
            let book = feed.fetch_orderbook(market).await?;
            let mut state = self.state.write().await;
            state
                .books
                .insert(market.to_string(), VecDeque::from(vec![book.clone()]));
            Self::match_resting(&mut state, market);
            return Ok(book);
        }

        let mut state = self.state.write().await;
        let book = Self::current_book(&state, market)
            .ok_or_else(|| VenueError::market_data(market, "no book"))?;
        Self::match_resting(&mut state, market);
        if let Some(queue) = state.books.get_mut(market) {
            if queue.len() > 1 {
                queue.pop_front();
            }
        }
        Ok(book)
    }

    async fn place_order(&self, order: &OrderRequest) -> Result<OrderAck, VenueError> {
        let mut state = self.state.write().await;

        if let Some(reason) = &state.reject_reason {
            return Err(VenueError::OrderRejected(reason.clone()));
        }
        if order.quantity <= Decimal::ZERO {
            return Err(VenueError::OrderRejected("quantity must be positive".into()));
        }

        let order_id = self.next_order_id();

        let (order_state, scripted) = match order.order_type {
            OrderType::Market => {
                if let Some(reason) = &state.market_order_reject_reason {
                    return Err(VenueError::OrderRejected(reason.clone()));
                }
                let book = Self::current_book(&state, &order.market)
                    .ok_or_else(|| VenueError::market_data(&order.market, "no book"))?;
                let fill_price = book.aggressive_price(order.side)?;
                Self::apply_fill(&mut state, &order.market, order.side, order.quantity);
                (
                    OrderState {
                        order_id: order_id.clone(),
                        market: order.market.clone(),
                        side: order.side,
                        status: OrderStatus::Filled,
                        requested_qty: order.quantity,
                        matched_qty: order.quantity,
                        unmatched_qty: Decimal::ZERO,
                        price: Decimal::ZERO,
                        avg_price: Some(fill_price),
                    },
                    false,
                )
            }
            OrderType::Limit => {
                let price = order
                    .price
                    .ok_or_else(|| VenueError::OrderRejected("limit order without price".into()))?;
                let plan = state.fill_plans.pop_front();
                let matched = match plan {
                    Some(FillPlan::Full) => order.quantity,
                    Some(FillPlan::Partial(q)) => q.min(order.quantity),
                    Some(FillPlan::Rest) | None => Decimal::ZERO,
                };
                let unmatched = order.quantity - matched;
                let status = if unmatched <= Decimal::ZERO {
                    OrderStatus::Filled
                } else if matched > Decimal::ZERO {
                    OrderStatus::PartiallyFilled
                } else {
                    OrderStatus::Open
                };
                if matched > Decimal::ZERO {
                    Self::apply_fill(&mut state, &order.market, order.side, matched);
                }
                (
                    OrderState {
                        order_id: order_id.clone(),
                        market: order.market.clone(),
                        side: order.side,
                        status,
                        requested_qty: order.quantity,
                        matched_qty: matched,
                        unmatched_qty: unmatched,
                        price,
                        avg_price: (matched > Decimal::ZERO).then_some(price),
                    },
                    plan.is_some(),
                )
            }
        };

        state.placed.push(order.clone());

        info!(
            venue = %self.name,
            %order_id,
            market = %order.market,
            side = %order.side,
            order_type = ?order.order_type,
            quantity = %order.quantity,
            price = ?order.price,
            status = ?order_state.status,
            "Mock order accepted"
        );

        state.orders.insert(
            order_id.clone(),
            MockOrder {
                request: order.clone(),
                state: order_state,
                scripted,
            },
        );
        if !scripted {
            Self::match_resting(&mut state, &order.market);
        }

        Ok(OrderAck {
            order_id,
            market: order.market.clone(),
        })
    }

    async fn check_order(&self, market: &str, order_id: &str) -> Result<OrderState, VenueError> {
        let mut state = self.state.write().await;
        if state.failing_checks > 0 {
            state.failing_checks -= 1;
            return Err(VenueError::Transport(format!("{} order check failed", self.name)));
        }
        Self::match_resting(&mut state, market);
        state
            .orders
            .get(order_id)
            .map(|o| o.state.clone())
            .ok_or_else(|| VenueError::UnknownOrder(order_id.to_string()))
    }

    async fn cancel_order(
        &self,
        _market: &str,
        order_id: &str,
    ) -> Result<CancelOutcome, VenueError> {
        let mut state = self.state.write().await;
        state.cancels.push(order_id.to_string());

        let race = state.fill_before_cancel;
        let order = state
            .orders
            .get_mut(order_id)
            .ok_or_else(|| VenueError::UnknownOrder(order_id.to_string()))?;

        if order.state.status.is_terminal() {
            return Ok(CancelOutcome::AlreadyTerminal);
        }
        if race {
            let s = &mut order.state;
            let remaining = s.unmatched_qty;
            s.matched_qty += remaining;
            s.unmatched_qty = Decimal::ZERO;
            s.status = OrderStatus::Filled;
            s.avg_price = Some(s.price);
            let (market, side) = (s.market.clone(), s.side);
            state.fill_before_cancel = false;
            Self::apply_fill(&mut state, &market, side, remaining);
            debug!(venue = %self.name, %order_id, "Mock order filled before cancel");
            return Ok(CancelOutcome::AlreadyTerminal);
        }
        order.state.status = OrderStatus::Canceled;
        debug!(venue = %self.name, %order_id, "Mock order cancelled");
        Ok(CancelOutcome::Cancelled)
    }

    async fn get_position(&self, market: &str) -> Result<Decimal, VenueError> {
        let state = self.state.read().await;
        if !state.position_endpoint {
            return Err(VenueError::Unavailable(format!(
                "{} has no position endpoint for {}",
                self.name, market
            )));
        }
        Ok(state.positions.get(market).copied().unwrap_or(Decimal::ZERO))
    }

    async fn get_balance(&self, asset: &str) -> Result<Decimal, VenueError> {
        Ok(self
            .state
            .read()
            .await
            .balances
            .get(asset)
            .copied()
            .unwrap_or(Decimal::ZERO))
    }

    async fn set_leverage(&self, market: &str, leverage: u8) -> Result<(), VenueError> {
        debug!(%market, %leverage, "Mock set leverage");
        self.state
            .write()
            .await
            .leverage
            .insert(market.to_string(), leverage);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn book(bid: Decimal, ask: Decimal) -> OrderBook {
        OrderBook::new("BTCIRT", vec![(bid, dec!(1))], vec![(ask, dec!(1))])
    }

    async fn setup_venue() -> MockVenue {
        let venue = MockVenue::new("spot");
        venue.register_market("BTCIRT", "BTC").await;
        venue.set_orderbook(book(dec!(100), dec!(102))).await;
        venue
    }

    #[tokio::test]
    async fn test_scripted_books_advance_and_stick() {
        let venue = MockVenue::new("spot");
        venue
            .queue_orderbooks(
                "BTCIRT",
                vec![book(dec!(100), dec!(102)), book(dec!(101), dec!(102))],
            )
            .await;

        assert_eq!(venue.get_orderbook("BTCIRT").await.unwrap().best_bid(), Some(dec!(100)));
        assert_eq!(venue.get_orderbook("BTCIRT").await.unwrap().best_bid(), Some(dec!(101)));
        assert_eq!(venue.get_orderbook("BTCIRT").await.unwrap().best_bid(), Some(dec!(101)));
    }

    #[tokio::test]
    async fn test_missing_book_is_market_data_unavailable() {
        let venue = MockVenue::new("spot");
        let err = venue.get_orderbook("ETHIRT").await.unwrap_err();
        assert!(matches!(err, VenueError::MarketDataUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_passive_limit_rests_until_crossed() {
        let venue = setup_venue().await;

        let ack = venue
            .place_order(&OrderRequest::limit("BTCIRT", OrderSide::Buy, dec!(1), dec!(100)))
            .await
            .unwrap();
        let state = venue.check_order("BTCIRT", &ack.order_id).await.unwrap();
        assert_eq!(state.status, OrderStatus::Open);

        venue.set_orderbook(book(dec!(98), dec!(100))).await;
        let state = venue.check_order("BTCIRT", &ack.order_id).await.unwrap();
        assert_eq!(state.status, OrderStatus::Filled);
        assert_eq!(state.matched_qty, dec!(1));
        assert_eq!(venue.get_balance("BTC").await.unwrap(), dec!(1));
    }

    #[tokio::test]
    async fn test_partial_fill_plan() {
        let venue = setup_venue().await;
        venue.plan_next_fill(FillPlan::Partial(dec!(4))).await;

        let ack = venue
            .place_order(&OrderRequest::limit("BTCIRT", OrderSide::Sell, dec!(10), dec!(100)))
            .await
            .unwrap();
        let state = venue.check_order("BTCIRT", &ack.order_id).await.unwrap();

        // Scripted orders ignore the crossing book
        assert_eq!(state.status, OrderStatus::PartiallyFilled);
        assert_eq!(state.matched_qty, dec!(4));
        assert_eq!(state.unmatched_qty, dec!(6));
        assert_eq!(venue.position("BTCIRT").await, dec!(-4));
    }

    #[tokio::test]
    async fn test_market_order_fills_at_top_of_book() {
        let venue = setup_venue().await;
        let ack = venue
            .place_order(&OrderRequest::market("BTCIRT", OrderSide::Buy, dec!(2)))
            .await
            .unwrap();
        let state = venue.check_order("BTCIRT", &ack.order_id).await.unwrap();
        assert_eq!(state.status, OrderStatus::Filled);
        assert_eq!(state.avg_price, Some(dec!(102)));
        assert_eq!(venue.position("BTCIRT").await, dec!(2));
    }

    #[tokio::test]
    async fn test_cancel_terminal_order_reports_already_terminal() {
        let venue = setup_venue().await;
        venue.plan_next_fill(FillPlan::Full).await;
        let ack = venue
            .place_order(&OrderRequest::limit("BTCIRT", OrderSide::Buy, dec!(1), dec!(100)))
            .await
            .unwrap();

        let outcome = venue.cancel_order("BTCIRT", &ack.order_id).await.unwrap();
        assert_eq!(outcome, CancelOutcome::AlreadyTerminal);
        assert_eq!(venue.cancel_requests().await, vec![ack.order_id]);
    }

    #[tokio::test]
    async fn test_rejections() {
        let venue = setup_venue().await;
        venue.reject_orders(Some("insufficient balance")).await;
        let err = venue
            .place_order(&OrderRequest::limit("BTCIRT", OrderSide::Buy, dec!(1), dec!(100)))
            .await
            .unwrap_err();
        assert_eq!(err, VenueError::OrderRejected("insufficient balance".into()));
        assert!(venue.placed_orders().await.is_empty());
    }

    #[tokio::test]
    async fn test_position_endpoint_toggle() {
        let venue = setup_venue().await;
        venue.set_position("BTCIRT", dec!(3)).await;
        assert!(matches!(
            venue.get_position("BTCIRT").await,
            Err(VenueError::Unavailable(_))
        ));
        venue.set_position_endpoint(true).await;
        assert_eq!(venue.get_position("BTCIRT").await.unwrap(), dec!(3));
    }

    #[tokio::test]
    async fn test_fault_switches_are_one_shot() {
        let venue = setup_venue().await;
        let ack = venue
            .place_order(&OrderRequest::limit("BTCIRT", OrderSide::Buy, dec!(1), dec!(99)))
            .await
            .unwrap();

        venue.fail_next_checks(1).await;
        venue.fail_next_orderbooks(1).await;
        assert!(matches!(
            venue.check_order("BTCIRT", &ack.order_id).await,
            Err(VenueError::Transport(_))
        ));
        assert!(venue.check_order("BTCIRT", &ack.order_id).await.is_ok());
        assert!(venue.get_orderbook("BTCIRT").await.is_err());
        assert!(venue.get_orderbook("BTCIRT").await.is_ok());

        venue.fill_before_next_cancel().await;
        let outcome = venue.cancel_order("BTCIRT", &ack.order_id).await.unwrap();
        assert_eq!(outcome, CancelOutcome::AlreadyTerminal);
        let state = venue.check_order("BTCIRT", &ack.order_id).await.unwrap();
        assert_eq!(state.status, OrderStatus::Filled);
        assert_eq!(venue.get_balance("BTC").await.unwrap(), dec!(1));
    }
}
