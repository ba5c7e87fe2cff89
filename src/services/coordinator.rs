//! Order Execution Coordinator
//!
//! Applies market fills and trigger events to positions, exactly once.
//! A position key (user, symbol, exchange, position type) maps to one async
//! mutex; every state change to that position (tick-driven fills, manual
//! square-offs, sweeper square-offs, cancels) happens under that lock, so
//! at most one execution is in flight per position while distinct positions
//! proceed concurrently.

use crate::services::clock::Clock;
use crate::services::ledger::{self, LedgerError};
use crate::services::order_book::{ConditionalOrderBook, TriggerEvent};
use crate::services::price_cache::PriceCache;
use crate::services::redis_store::RedisStore;
use crate::services::sqlite_store::SqliteStore;
use crate::types::{
    Holding, Order, OrderStatus, OrderVariant, PlaceOrderRequest, PlaceOrderResponse, Position,
    PositionKey, PositionType, TransactionType,
};
use chrono::{TimeZone, Timelike, Utc};
use dashmap::DashMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Settlement engine errors.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Position not found: {0}")]
    PositionNotFound(String),

    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error("Order {order_id} already applied to position")]
    DuplicateFill { order_id: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Order {0} has no funds approval")]
    MissingApproval(String),

    #[error("No price data available for {0}")]
    NoPriceData(String),

    #[error("Invalid order: {0}")]
    InvalidOrder(String),

    #[error("Persistence failure: {0}")]
    Persistence(String),
}

impl From<LedgerError> for EngineError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::DuplicateFill { order_id } => EngineError::DuplicateFill { order_id },
            LedgerError::PositionClosed => EngineError::Conflict("position is closed".to_string()),
            LedgerError::InvalidFill(msg) => EngineError::InvalidOrder(msg),
        }
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(e: rusqlite::Error) -> Self {
        EngineError::Persistence(e.to_string())
    }
}

/// Persistence retry policy.
#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    /// Storage write attempts before the failure is fatal
    pub max_persist_attempts: u32,
    /// First backoff delay; doubles per attempt
    pub persist_backoff_ms: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_persist_attempts: 3,
            persist_backoff_ms: 50,
        }
    }
}

/// Time-boundary settings for position expiry.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Intraday square-off cutoff, UTC wall-clock hour
    pub square_off_hour: u32,
    /// Intraday square-off cutoff, UTC wall-clock minute
    pub square_off_minute: u32,
    /// Delivery hold window before conversion to a holding (ms)
    pub delivery_hold_ms: i64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            square_off_hour: 15,
            square_off_minute: 15,
            delivery_hold_ms: 24 * 60 * 60 * 1000,
        }
    }
}

impl LifecycleConfig {
    /// Expiry timestamp for a position opened at `now`. Intraday positions
    /// expire at the day's cutoff (next day's if opened after it); delivery
    /// positions expire after the hold window.
    pub fn expiry_for(&self, position_type: PositionType, now: i64) -> i64 {
        match position_type {
            PositionType::Delivery => now + self.delivery_hold_ms,
            PositionType::Intraday => {
                let opened = Utc.timestamp_millis_opt(now).single().unwrap_or_else(Utc::now);
                let cutoff = opened
                    .with_hour(self.square_off_hour)
                    .and_then(|t| t.with_minute(self.square_off_minute))
                    .and_then(|t| t.with_second(0))
                    .and_then(|t| t.with_nanosecond(0))
                    .unwrap_or(opened);
                let cutoff_ms = cutoff.timestamp_millis();
                if cutoff_ms > now {
                    cutoff_ms
                } else {
                    cutoff_ms + 24 * 60 * 60 * 1000
                }
            }
        }
    }
}

/// Applies fills to positions with per-position mutual exclusion.
pub struct OrderExecutionCoordinator {
    store: Arc<SqliteStore>,
    book: Arc<ConditionalOrderBook>,
    price_cache: Arc<PriceCache>,
    clock: Arc<dyn Clock>,
    config: ExecutionConfig,
    lifecycle: LifecycleConfig,
    /// One async mutex per position key
    locks: DashMap<PositionKey, Arc<tokio::sync::Mutex<()>>>,
    /// Optional Redis mirror of resting orders
    redis: RwLock<Option<Arc<RedisStore>>>,
}

impl OrderExecutionCoordinator {
    pub fn new(
        store: Arc<SqliteStore>,
        book: Arc<ConditionalOrderBook>,
        price_cache: Arc<PriceCache>,
        clock: Arc<dyn Clock>,
        config: ExecutionConfig,
        lifecycle: LifecycleConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            book,
            price_cache,
            clock,
            config,
            lifecycle,
            locks: DashMap::new(),
            redis: RwLock::new(None),
        })
    }

    /// Attach the optional Redis mirror for resting orders.
    pub fn set_redis_store(&self, redis: Arc<RedisStore>) {
        if let Ok(mut guard) = self.redis.write() {
            *guard = Some(redis);
            info!("Redis mirror connected to coordinator");
        }
    }

    fn redis_store(&self) -> Option<Arc<RedisStore>> {
        self.redis.read().ok().and_then(|guard| guard.clone())
    }

    fn lock_for(&self, key: &PositionKey) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Get an order, preferring the book's resting copy.
    pub fn get_order(&self, order_id: &str) -> Option<Order> {
        self.book.get(order_id).or_else(|| self.store.get_order(order_id))
    }

    // ==========================================================================
    // Order placement
    // ==========================================================================

    /// Place an order: market orders fill immediately at the last traded
    /// price; limit/stop-loss orders rest in the conditional order book.
    pub async fn place_order(
        &self,
        request: PlaceOrderRequest,
    ) -> Result<PlaceOrderResponse, EngineError> {
        self.validate_request(&request)?;
        let now = self.clock.now_ms();

        let order = match request.variant {
            OrderVariant::Market => Order::market(
                request.user_id,
                request.wallet_id,
                request.symbol,
                request.exchange,
                request.position_type,
                request.transaction_type,
                request.quantity,
                request.approval_id,
                now,
            ),
            OrderVariant::Limit => Order::limit(
                request.user_id,
                request.wallet_id,
                request.symbol,
                request.exchange,
                request.position_type,
                request.transaction_type,
                request.quantity,
                request.limit_price.unwrap_or_default(),
                request.approval_id,
                now,
            ),
            OrderVariant::StopLoss => Order::stop_loss(
                request.user_id,
                request.wallet_id,
                request.symbol,
                request.exchange,
                request.position_type,
                request.transaction_type,
                request.quantity,
                request.trigger_price.unwrap_or_default(),
                request.limit_price.unwrap_or_default(),
                request.approval_id,
                now,
            ),
        };

        self.persist_order(&order).await?;

        if order.variant == OrderVariant::Market {
            let ltp = self
                .price_cache
                .ltp(&order.instrument())
                .ok_or_else(|| EngineError::NoPriceData(order.instrument().to_string()))?;
            let position = self.execute(&order.id, ltp).await?;
            let order = self
                .get_order(&order.id)
                .ok_or_else(|| EngineError::OrderNotFound(order.id.clone()))?;
            info!("Filled market order {} at {}", order.id, ltp);
            return Ok(PlaceOrderResponse {
                order,
                position: Some(position),
            });
        }

        self.book.insert(order.clone());
        if let Some(redis) = self.redis_store() {
            redis.save_resting_order(&order).await;
        }
        info!(
            "Resting {} {} order {} on {}",
            order.transaction_type, order.variant, order.id, order.instrument()
        );
        Ok(PlaceOrderResponse {
            order,
            position: None,
        })
    }

    fn validate_request(&self, request: &PlaceOrderRequest) -> Result<(), EngineError> {
        if request.quantity <= 0.0 {
            return Err(EngineError::InvalidOrder(
                "quantity must be positive".to_string(),
            ));
        }
        if request.approval_id.trim().is_empty() {
            return Err(EngineError::MissingApproval("<unplaced>".to_string()));
        }
        match request.variant {
            OrderVariant::Limit => {
                if request.limit_price.is_none() {
                    return Err(EngineError::InvalidOrder(
                        "limit order requires limitPrice".to_string(),
                    ));
                }
            }
            OrderVariant::StopLoss => {
                if request.trigger_price.is_none() || request.limit_price.is_none() {
                    return Err(EngineError::InvalidOrder(
                        "stop-loss order requires triggerPrice and limitPrice".to_string(),
                    ));
                }
            }
            OrderVariant::Market => {}
        }
        Ok(())
    }

    // ==========================================================================
    // Execution
    // ==========================================================================

    /// Apply a fill to the order's position, exactly once.
    ///
    /// Requires the wallet collaborator's approval token on the order. On a
    /// retry after a partial failure (position written, order status not),
    /// the fill is recognized by order-id membership and the order is marked
    /// executed without re-applying.
    pub async fn execute(&self, order_id: &str, fill_price: f64) -> Result<Position, EngineError> {
        let order = self
            .get_order(order_id)
            .ok_or_else(|| EngineError::OrderNotFound(order_id.to_string()))?;

        if order.approval_id.trim().is_empty() {
            return Err(EngineError::MissingApproval(order.id.clone()));
        }

        let key = order.position_key();
        let lock = self.lock_for(&key);
        let _guard = lock.lock().await;

        // Re-read under the lock: a racing cancel or execute may have
        // committed while we waited.
        let mut order = self
            .get_order(order_id)
            .ok_or_else(|| EngineError::OrderNotFound(order_id.to_string()))?;
        if order.is_terminal() {
            return Err(EngineError::Conflict(format!(
                "order {} is already {}",
                order.id, order.status
            )));
        }

        let now = self.clock.now_ms();
        let mut position = match self.store.get_open_position(
            &key.user_id,
            &key.symbol,
            key.exchange,
            key.position_type,
        ) {
            Some(position) => position,
            None => Position::open(
                order.user_id.clone(),
                order.wallet_id.clone(),
                order.symbol.clone(),
                order.exchange,
                order.position_type,
                self.lifecycle.expiry_for(order.position_type, now),
                now,
            ),
        };

        if position.order_ids.iter().any(|id| id == order_id) {
            // The fill landed in a previous attempt but the order status
            // write was lost. Finish the order instead of re-applying.
            warn!(
                "Order {} already recorded on position {}, completing status only",
                order_id, position.id
            );
        } else {
            ledger::apply_fill(
                &mut position,
                order.signed_quantity(),
                fill_price,
                &order.id,
                now,
            )?;
            ledger::mark_price(&mut position, fill_price, now);
            // A fill that nets the position flat closes it: quantity 0 is
            // never left active without the squared-off flag.
            if position.quantity == 0.0 {
                ledger::square_off(&mut position, &order.id, now);
            }
            self.persist_position(&position).await?;
        }

        order.status = OrderStatus::Executed;
        order.fill_price = Some(fill_price);
        order.executed_at = Some(now);
        order.updated_at = now;
        self.persist_order(&order).await?;
        self.book.set_status(&order.id, OrderStatus::Executed);
        if let Some(redis) = self.redis_store() {
            redis.remove_resting_order(&order.id).await;
        }

        debug!(
            "Executed order {}: {} {} {} @ {} -> position {} qty {}",
            order.id,
            order.transaction_type,
            order.quantity,
            order.symbol,
            fill_price,
            position.id,
            position.quantity
        );
        Ok(position)
    }

    /// Resolve a trigger event from the order book: persist the triggered
    /// status, then execute at the event's fill price. A concurrency conflict
    /// is retried once before surfacing.
    pub async fn handle_trigger(&self, event: &TriggerEvent) -> Result<Position, EngineError> {
        if let Some(mut order) = self.get_order(&event.order_id) {
            if order.status == OrderStatus::Pending {
                order.status = OrderStatus::Triggered;
                order.updated_at = event.triggered_at;
            }
            self.persist_order(&order).await?;
            if let Some(redis) = self.redis_store() {
                redis.save_resting_order(&order).await;
            }
        }

        match self.execute(&event.order_id, event.fill_price).await {
            Err(EngineError::Conflict(first)) => {
                debug!(
                    "Trigger for {} hit conflict ({}), retrying once",
                    event.order_id, first
                );
                self.execute(&event.order_id, event.fill_price).await
            }
            result => result,
        }
    }

    // ==========================================================================
    // Square-off
    // ==========================================================================

    /// Close a position by synthesizing the opposite-side market order for
    /// its full quantity. Manual (API) and sweeper square-offs both come
    /// through here and contend on the same position lock, so a simultaneous
    /// pair resolves to exactly one close and one conflict.
    pub async fn square_off_position(
        &self,
        position_id: &str,
        reason: &str,
    ) -> Result<Position, EngineError> {
        let position = self
            .store
            .get_position(position_id)
            .ok_or_else(|| EngineError::PositionNotFound(position_id.to_string()))?;

        let key = position.key();
        let lock = self.lock_for(&key);
        let _guard = lock.lock().await;

        // Re-read under the lock; the other square-off path may have won.
        let mut position = self
            .store
            .get_position(position_id)
            .ok_or_else(|| EngineError::PositionNotFound(position_id.to_string()))?;
        if !position.is_active() {
            return Err(EngineError::Conflict(format!(
                "position {} is already closed",
                position_id
            )));
        }

        let now = self.clock.now_ms();
        let instrument = position.instrument();
        let price = match self.price_cache.ltp(&instrument) {
            Some(ltp) => ltp,
            None => {
                warn!(
                    "No price for {} during {} square-off, closing at entry average",
                    instrument, reason
                );
                position.average_price
            }
        };

        let closing_side = if position.is_long() {
            TransactionType::Sell
        } else {
            TransactionType::Buy
        };
        let closing_quantity = -position.quantity;
        let mut order = Order::market(
            position.user_id.clone(),
            position.wallet_id.clone(),
            position.symbol.clone(),
            position.exchange,
            position.position_type,
            closing_side,
            closing_quantity.abs(),
            format!("system-{reason}"),
            now,
        );

        ledger::apply_fill(&mut position, closing_quantity, price, &order.id, now)?;
        ledger::mark_price(&mut position, price, now);
        ledger::square_off(&mut position, &order.id, now);
        self.persist_position(&position).await?;

        order.status = OrderStatus::Executed;
        order.fill_price = Some(price);
        order.executed_at = Some(now);
        order.updated_at = now;
        self.persist_order(&order).await?;

        info!(
            "Squared off position {} ({}) at {} [{}]",
            position.id, instrument, price, reason
        );
        Ok(position)
    }

    // ==========================================================================
    // Delivery conversion
    // ==========================================================================

    /// Convert an expired delivery position into a holding. Takes the same
    /// position lock as fills and square-offs, so a conversion cannot race a
    /// late fill or a manual close on the same position.
    pub async fn convert_to_holding(&self, position_id: &str) -> Result<Holding, EngineError> {
        let position = self
            .store
            .get_position(position_id)
            .ok_or_else(|| EngineError::PositionNotFound(position_id.to_string()))?;

        let key = position.key();
        let lock = self.lock_for(&key);
        let _guard = lock.lock().await;

        let mut position = self
            .store
            .get_position(position_id)
            .ok_or_else(|| EngineError::PositionNotFound(position_id.to_string()))?;
        if position.position_type != PositionType::Delivery {
            return Err(EngineError::InvalidOrder(format!(
                "position {} is not a delivery position",
                position_id
            )));
        }
        if !position.is_active() {
            return Err(EngineError::Conflict(format!(
                "position {} is already closed",
                position_id
            )));
        }

        let now = self.clock.now_ms();
        if !ledger::is_expired(&position, now) {
            return Err(EngineError::Conflict(format!(
                "position {} has not reached its delivery window",
                position_id
            )));
        }

        let holding = Holding::from_position(&position, now);
        self.with_retry("holding", || self.store.save_holding(&holding))
            .await?;

        // Quantity and average price stay on the record; the holding owns
        // forward tracking from here.
        position.converted_to_holding = true;
        position.holding_id = Some(holding.id.clone());
        position.updated_at = now;
        self.persist_position(&position).await?;

        info!(
            "Converted position {} into holding {} ({} @ {})",
            position.id, holding.id, holding.quantity, holding.average_price
        );
        Ok(holding)
    }

    // ==========================================================================
    // Cancellation & expiry
    // ==========================================================================

    /// Cancel a resting order. Succeeds only while execution has not
    /// committed; afterwards it is a conflict. There is no undo.
    pub async fn cancel_order(&self, order_id: &str) -> Result<Order, EngineError> {
        self.finalize_resting(order_id, OrderStatus::Cancelled).await
    }

    /// Expire a resting order (market-close sweep).
    pub async fn expire_order(&self, order_id: &str) -> Result<Order, EngineError> {
        self.finalize_resting(order_id, OrderStatus::Expired).await
    }

    async fn finalize_resting(
        &self,
        order_id: &str,
        status: OrderStatus,
    ) -> Result<Order, EngineError> {
        let order = self
            .get_order(order_id)
            .ok_or_else(|| EngineError::OrderNotFound(order_id.to_string()))?;

        let key = order.position_key();
        let lock = self.lock_for(&key);
        let _guard = lock.lock().await;

        let mut order = self
            .get_order(order_id)
            .ok_or_else(|| EngineError::OrderNotFound(order_id.to_string()))?;
        if !order.can_cancel() {
            return Err(EngineError::Conflict(format!(
                "order {} is already {}",
                order.id, order.status
            )));
        }

        order.status = status;
        order.updated_at = self.clock.now_ms();
        self.persist_order(&order).await?;
        self.book.set_status(&order.id, status);
        if let Some(redis) = self.redis_store() {
            redis.remove_resting_order(&order.id).await;
        }

        info!("Order {} -> {}", order.id, status);
        Ok(order)
    }

    // ==========================================================================
    // Persistence with bounded backoff
    // ==========================================================================

    async fn persist_position(&self, position: &Position) -> Result<(), EngineError> {
        self.with_retry("position", || self.store.save_position(position))
            .await
    }

    async fn persist_order(&self, order: &Order) -> Result<(), EngineError> {
        self.with_retry("order", || self.store.save_order(order)).await
    }

    async fn with_retry(
        &self,
        label: &str,
        mut write: impl FnMut() -> Result<(), rusqlite::Error>,
    ) -> Result<(), EngineError> {
        let mut backoff = self.config.persist_backoff_ms;
        let mut last_err = String::new();
        for attempt in 1..=self.config.max_persist_attempts {
            match write() {
                Ok(()) => return Ok(()),
                Err(e) => {
                    last_err = e.to_string();
                    warn!(
                        "Failed to persist {} (attempt {}/{}): {}",
                        label, attempt, self.config.max_persist_attempts, last_err
                    );
                    if attempt < self.config.max_persist_attempts {
                        tokio::time::sleep(tokio::time::Duration::from_millis(backoff)).await;
                        backoff *= 2;
                    }
                }
            }
        }
        Err(EngineError::Persistence(format!(
            "{label} write failed after {} attempts: {last_err}",
            self.config.max_persist_attempts
        )))
    }
}
