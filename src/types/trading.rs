//! Trading Types
//!
//! Types for the settlement engine: positions, orders, holdings, and the
//! API request/response shapes built on top of them.

use crate::types::market::{Exchange, Instrument};
use serde::{Deserialize, Serialize};

// =============================================================================
// Enums
// =============================================================================

/// How long a position may be held before the engine forces a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionType {
    /// Closed by the engine at the daily square-off cutoff
    Intraday,
    /// Converted into a holding after the delivery window elapses
    Delivery,
}

impl std::fmt::Display for PositionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PositionType::Intraday => write!(f, "intraday"),
            PositionType::Delivery => write!(f, "delivery"),
        }
    }
}

/// Buy or sell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Buy,
    Sell,
}

impl TransactionType {
    /// Signed quantity contribution of a fill of `quantity` units.
    pub fn signed(&self, quantity: f64) -> f64 {
        match self {
            TransactionType::Buy => quantity,
            TransactionType::Sell => -quantity,
        }
    }

    /// The closing direction for this direction.
    pub fn opposite(&self) -> Self {
        match self {
            TransactionType::Buy => TransactionType::Sell,
            TransactionType::Sell => TransactionType::Buy,
        }
    }
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionType::Buy => write!(f, "buy"),
            TransactionType::Sell => write!(f, "sell"),
        }
    }
}

/// Order variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderVariant {
    /// Execute immediately at the last traded price
    Market,
    /// Rest until price reaches the limit, then execute at the limit price
    Limit,
    /// Rest until the trigger price is crossed, then execute at the limit price
    StopLoss,
}

impl OrderVariant {
    /// Whether this variant rests in the conditional order book.
    pub fn is_conditional(&self) -> bool {
        matches!(self, OrderVariant::Limit | OrderVariant::StopLoss)
    }
}

impl std::fmt::Display for OrderVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderVariant::Market => write!(f, "market"),
            OrderVariant::Limit => write!(f, "limit"),
            OrderVariant::StopLoss => write!(f, "stop_loss"),
        }
    }
}

/// Order status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Resting, waiting for its price condition
    Pending,
    /// Price condition met, fill not yet applied
    Triggered,
    /// Fill applied to a position
    Executed,
    /// Cancelled by the user or the system
    Cancelled,
    /// Expired by the market-close sweep
    Expired,
}

impl OrderStatus {
    /// Terminal states never re-enter the order book.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Executed | OrderStatus::Cancelled | OrderStatus::Expired
        )
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderStatus::Pending => write!(f, "pending"),
            OrderStatus::Triggered => write!(f, "triggered"),
            OrderStatus::Executed => write!(f, "executed"),
            OrderStatus::Cancelled => write!(f, "cancelled"),
            OrderStatus::Expired => write!(f, "expired"),
        }
    }
}

// =============================================================================
// Position
// =============================================================================

/// The unit of mutual exclusion for fills: one open position exists per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionKey {
    pub user_id: String,
    pub symbol: String,
    pub exchange: Exchange,
    pub position_type: PositionType,
}

impl std::fmt::Display for PositionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}:{}/{}",
            self.user_id, self.exchange, self.symbol, self.position_type
        )
    }
}

/// A netted trading position.
///
/// `quantity` is signed: positive long, negative short, zero flat.
/// `average_price` and `total_value` are magnitudes; direction is carried by
/// the quantity sign alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    /// Unique position ID
    pub id: String,
    /// Owning user
    pub user_id: String,
    /// Wallet funding this position
    pub wallet_id: String,
    /// Instrument symbol
    pub symbol: String,
    /// Exchange segment
    pub exchange: Exchange,
    /// Intraday or delivery
    pub position_type: PositionType,
    /// Signed net quantity
    pub quantity: f64,
    /// Volume-weighted entry price (magnitude)
    pub average_price: f64,
    /// abs(quantity) x average_price
    pub total_value: f64,
    /// Last marked price
    pub current_price: f64,
    /// abs(quantity) x current_price
    pub current_value: f64,
    /// Unrealized P&L at the last mark
    pub unrealized_pnl: f64,
    /// Unrealized P&L as a percentage of total_value
    pub unrealized_pnl_pct: f64,
    /// Fills applied to this position, in order
    #[serde(default)]
    pub order_ids: Vec<String>,
    /// Intraday: the day's square-off cutoff; delivery: creation + hold window (ms)
    pub expires_at: i64,
    /// Terminal flag for the square-off path
    #[serde(default)]
    pub is_squared_off: bool,
    /// Order that closed this position
    #[serde(skip_serializing_if = "Option::is_none")]
    pub square_off_order_id: Option<String>,
    /// Terminal flag for the delivery path
    #[serde(default)]
    pub converted_to_holding: bool,
    /// Holding that took over tracking
    #[serde(skip_serializing_if = "Option::is_none")]
    pub holding_id: Option<String>,
    /// When the position was opened (ms)
    pub created_at: i64,
    /// When the position was last updated (ms)
    pub updated_at: i64,
}

impl Position {
    /// Create an empty position for a key. The first fill gives it direction.
    pub fn open(
        user_id: String,
        wallet_id: String,
        symbol: String,
        exchange: Exchange,
        position_type: PositionType,
        expires_at: i64,
        now: i64,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id,
            wallet_id,
            symbol,
            exchange,
            position_type,
            quantity: 0.0,
            average_price: 0.0,
            total_value: 0.0,
            current_price: 0.0,
            current_value: 0.0,
            unrealized_pnl: 0.0,
            unrealized_pnl_pct: 0.0,
            order_ids: Vec::new(),
            expires_at,
            is_squared_off: false,
            square_off_order_id: None,
            converted_to_holding: false,
            holding_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// The mutual-exclusion key for this position.
    pub fn key(&self) -> PositionKey {
        PositionKey {
            user_id: self.user_id.clone(),
            symbol: self.symbol.clone(),
            exchange: self.exchange,
            position_type: self.position_type,
        }
    }

    /// The instrument this position is in.
    pub fn instrument(&self) -> Instrument {
        Instrument::new(self.symbol.clone(), self.exchange)
    }

    /// Whether the position is still tracked by the engine.
    pub fn is_active(&self) -> bool {
        !self.is_squared_off && !self.converted_to_holding && self.quantity != 0.0
    }

    /// Long (bought first) or short (sold first)?
    pub fn is_long(&self) -> bool {
        self.quantity > 0.0
    }
}

// =============================================================================
// Order
// =============================================================================

/// An order against the market feed: immediate (market) or resting
/// (limit / stop-loss).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    /// Unique order ID
    pub id: String,
    /// Owning user
    pub user_id: String,
    /// Wallet funding the order
    pub wallet_id: String,
    /// Instrument symbol
    pub symbol: String,
    /// Exchange segment
    pub exchange: Exchange,
    /// Position bucket the fill lands in
    pub position_type: PositionType,
    /// Buy or sell
    pub transaction_type: TransactionType,
    /// Market, limit, or stop-loss
    pub variant: OrderVariant,
    /// Units to fill (all-or-nothing)
    pub quantity: f64,
    /// Execution price for limit and stop-loss orders
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<f64>,
    /// Activation threshold (stop-loss only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger_price: Option<f64>,
    /// Funds-approval token issued by the wallet service
    pub approval_id: String,
    /// Current status
    pub status: OrderStatus,
    /// Price the fill was applied at
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fill_price: Option<f64>,
    /// When the fill was applied (ms)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executed_at: Option<i64>,
    /// When the order was created (ms)
    pub created_at: i64,
    /// When the order was last updated (ms)
    pub updated_at: i64,
}

impl Order {
    /// Create a market order.
    pub fn market(
        user_id: String,
        wallet_id: String,
        symbol: String,
        exchange: Exchange,
        position_type: PositionType,
        transaction_type: TransactionType,
        quantity: f64,
        approval_id: String,
        now: i64,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id,
            wallet_id,
            symbol,
            exchange,
            position_type,
            transaction_type,
            variant: OrderVariant::Market,
            quantity,
            limit_price: None,
            trigger_price: None,
            approval_id,
            status: OrderStatus::Pending,
            fill_price: None,
            executed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Create a resting limit order.
    #[allow(clippy::too_many_arguments)]
    pub fn limit(
        user_id: String,
        wallet_id: String,
        symbol: String,
        exchange: Exchange,
        position_type: PositionType,
        transaction_type: TransactionType,
        quantity: f64,
        limit_price: f64,
        approval_id: String,
        now: i64,
    ) -> Self {
        let mut order = Self::market(
            user_id,
            wallet_id,
            symbol,
            exchange,
            position_type,
            transaction_type,
            quantity,
            approval_id,
            now,
        );
        order.variant = OrderVariant::Limit;
        order.limit_price = Some(limit_price);
        order
    }

    /// Create a resting stop-loss (stop-limit) order.
    #[allow(clippy::too_many_arguments)]
    pub fn stop_loss(
        user_id: String,
        wallet_id: String,
        symbol: String,
        exchange: Exchange,
        position_type: PositionType,
        transaction_type: TransactionType,
        quantity: f64,
        trigger_price: f64,
        limit_price: f64,
        approval_id: String,
        now: i64,
    ) -> Self {
        let mut order = Self::market(
            user_id,
            wallet_id,
            symbol,
            exchange,
            position_type,
            transaction_type,
            quantity,
            approval_id,
            now,
        );
        order.variant = OrderVariant::StopLoss;
        order.trigger_price = Some(trigger_price);
        order.limit_price = Some(limit_price);
        order
    }

    /// The instrument this order targets.
    pub fn instrument(&self) -> Instrument {
        Instrument::new(self.symbol.clone(), self.exchange)
    }

    /// The position this order's fill lands in, resolved by key at
    /// execution time (orders hold no position pointer).
    pub fn position_key(&self) -> PositionKey {
        PositionKey {
            user_id: self.user_id.clone(),
            symbol: self.symbol.clone(),
            exchange: self.exchange,
            position_type: self.position_type,
        }
    }

    /// Whether the order has reached a terminal status.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether a cancel may still succeed.
    pub fn can_cancel(&self) -> bool {
        matches!(self.status, OrderStatus::Pending | OrderStatus::Triggered)
    }

    /// Signed quantity this order contributes to its position.
    pub fn signed_quantity(&self) -> f64 {
        self.transaction_type.signed(self.quantity)
    }
}

// =============================================================================
// Holding
// =============================================================================

/// Long-term record a delivery position becomes after its window elapses.
/// Once created, the holding owns forward tracking; the engine stops
/// following the position.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Holding {
    /// Unique holding ID
    pub id: String,
    /// Owning user
    pub user_id: String,
    /// Wallet that funded the position
    pub wallet_id: String,
    /// Instrument symbol
    pub symbol: String,
    /// Exchange segment
    pub exchange: Exchange,
    /// Signed quantity carried over from the position
    pub quantity: f64,
    /// Entry average price carried over from the position
    pub average_price: f64,
    /// Position this holding was converted from
    pub position_id: String,
    /// When the holding was created (ms)
    pub created_at: i64,
}

impl Holding {
    /// Create a holding from an expired delivery position.
    pub fn from_position(position: &Position, now: i64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: position.user_id.clone(),
            wallet_id: position.wallet_id.clone(),
            symbol: position.symbol.clone(),
            exchange: position.exchange,
            quantity: position.quantity,
            average_price: position.average_price,
            position_id: position.id.clone(),
            created_at: now,
        }
    }
}

// =============================================================================
// Request/Response Types for API
// =============================================================================

/// Request to place an order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceOrderRequest {
    pub user_id: String,
    pub wallet_id: String,
    pub symbol: String,
    pub exchange: Exchange,
    pub position_type: PositionType,
    pub transaction_type: TransactionType,
    pub variant: OrderVariant,
    pub quantity: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger_price: Option<f64>,
    /// Funds-approval token from the wallet service
    pub approval_id: String,
}

/// Result of placing an order: market orders come back executed with the
/// affected position; conditional orders come back resting.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceOrderResponse {
    pub order: Order,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
}

/// Position query parameters.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionQuery {
    pub user_id: String,
    #[serde(default)]
    pub position_type: Option<PositionType>,
}

/// Paginated position history query.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionHistoryQuery {
    pub user_id: String,
    /// Range start (ms, inclusive)
    pub from: i64,
    /// Range end (ms, exclusive)
    pub to: i64,
    #[serde(default = "default_history_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

fn default_history_limit() -> u32 {
    50
}
