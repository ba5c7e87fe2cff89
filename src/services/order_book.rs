//! Conditional Order Book
//!
//! Index of resting limit/stop-loss orders keyed by instrument. Each
//! incoming tick is evaluated against the instrument's bucket and newly
//! satisfied orders transition pending -> triggered exactly once, emitting a
//! trigger event per order. The book never mutates position state; fills are
//! the coordinator's job.
//!
//! Buckets keep arrival order, so simultaneous triggers resolve oldest-first
//! (price-time priority). Evaluation takes the bucket's lock, making each
//! bucket single-writer while distinct instruments evaluate concurrently.

use crate::types::{Instrument, Order, OrderStatus, OrderVariant, PriceTick, TransactionType};
use dashmap::DashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Emitted when a resting order's price condition is first satisfied.
#[derive(Debug, Clone)]
pub struct TriggerEvent {
    /// The order that fired
    pub order_id: String,
    /// Instrument the trigger came from
    pub instrument: Instrument,
    /// Price the fill must execute at (the order's configured limit price)
    pub fill_price: f64,
    /// Tick timestamp that fired the trigger (ms)
    pub triggered_at: i64,
}

/// Resting-order index with per-instrument trigger evaluation.
pub struct ConditionalOrderBook {
    /// Resting orders by ID
    orders: DashMap<String, Order>,
    /// Arrival-ordered order IDs per instrument
    buckets: DashMap<Instrument, Mutex<Vec<String>>>,
}

impl ConditionalOrderBook {
    /// Create an empty book.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            orders: DashMap::new(),
            buckets: DashMap::new(),
        })
    }

    /// Rest a conditional order in the book. Market orders and orders in a
    /// terminal status are refused.
    pub fn insert(&self, order: Order) -> bool {
        if !order.variant.is_conditional() || order.is_terminal() {
            warn!(
                "Refusing to index order {} ({} / {})",
                order.id, order.variant, order.status
            );
            return false;
        }

        let instrument = order.instrument();
        let bucket = self
            .buckets
            .entry(instrument)
            .or_insert_with(|| Mutex::new(Vec::new()));
        let mut ids = bucket.lock().unwrap();
        if !ids.iter().any(|id| id == &order.id) {
            ids.push(order.id.clone());
        }
        drop(ids);

        debug!("Indexed {} order {} on {}", order.variant, order.id, order.instrument());
        self.orders.insert(order.id.clone(), order);
        true
    }

    /// Remove an order from the book entirely.
    pub fn remove(&self, order_id: &str) -> Option<Order> {
        let (_, order) = self.orders.remove(order_id)?;
        if let Some(bucket) = self.buckets.get(&order.instrument()) {
            bucket.lock().unwrap().retain(|id| id != order_id);
        }
        Some(order)
    }

    /// Get a resting order by ID.
    pub fn get(&self, order_id: &str) -> Option<Order> {
        self.orders.get(order_id).map(|entry| entry.value().clone())
    }

    /// Record a status change. Terminal statuses evict the order from the
    /// book; Pending/Triggered keep it resting.
    pub fn set_status(&self, order_id: &str, status: OrderStatus) {
        if status.is_terminal() {
            self.remove(order_id);
            return;
        }
        if let Some(mut order) = self.orders.get_mut(order_id) {
            order.status = status;
        }
    }

    /// Evaluate a tick against the instrument's bucket. Every order whose
    /// predicate is newly satisfied moves pending -> triggered and yields one
    /// event, in arrival order. Orders already triggered (or gone terminal)
    /// are skipped, so re-processing the same tick is a no-op.
    pub fn evaluate_tick(&self, tick: &PriceTick) -> Vec<TriggerEvent> {
        let instrument = tick.instrument();
        let bucket = match self.buckets.get(&instrument) {
            Some(b) => b,
            None => return Vec::new(),
        };

        let ids = bucket.lock().unwrap();
        let mut events = Vec::new();

        for order_id in ids.iter() {
            let mut order = match self.orders.get_mut(order_id) {
                Some(o) => o,
                None => continue,
            };
            if order.status != OrderStatus::Pending {
                continue;
            }
            if !should_trigger(&order, tick.last_traded_price) {
                continue;
            }

            // Stop-loss orders are stop-limit: the fill happens at the
            // configured limit price, not at the triggering tick.
            let fill_price = match order.limit_price {
                Some(price) => price,
                None => {
                    warn!("Resting order {} has no limit price, skipping", order.id);
                    continue;
                }
            };

            order.status = OrderStatus::Triggered;
            order.updated_at = tick.timestamp;
            events.push(TriggerEvent {
                order_id: order.id.clone(),
                instrument: instrument.clone(),
                fill_price,
                triggered_at: tick.timestamp,
            });
        }

        if !events.is_empty() {
            debug!(
                "Tick {}@{} triggered {} order(s)",
                instrument, tick.last_traded_price, events.len()
            );
        }
        events
    }

    /// Rebuild all buckets from a set of resting orders (startup and feed
    /// reconnection). Orders must arrive oldest-first so arrival priority is
    /// preserved.
    pub fn reindex(&self, orders: Vec<Order>) {
        self.orders.clear();
        self.buckets.clear();
        let mut count = 0;
        for order in orders {
            if self.insert(order) {
                count += 1;
            }
        }
        debug!("Reindexed {} resting order(s)", count);
    }

    /// Instruments with at least one resting order; the feed re-subscribes
    /// to these on reconnect.
    pub fn resting_instruments(&self) -> Vec<Instrument> {
        self.buckets
            .iter()
            .filter(|entry| !entry.value().lock().unwrap().is_empty())
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Snapshot of every resting order.
    pub fn resting_orders(&self) -> Vec<Order> {
        self.orders
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Number of resting orders.
    pub fn len(&self) -> usize {
        self.orders.len()
    }

    /// Whether the book has no resting orders.
    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }
}

/// Trigger predicate per variant and side, given tick price `price`.
fn should_trigger(order: &Order, price: f64) -> bool {
    match order.variant {
        OrderVariant::Limit => match (order.transaction_type, order.limit_price) {
            (TransactionType::Buy, Some(limit)) => price <= limit,
            (TransactionType::Sell, Some(limit)) => price >= limit,
            _ => false,
        },
        OrderVariant::StopLoss => match (order.transaction_type, order.trigger_price) {
            // Protective/breakout buy fires when price rises to the trigger.
            (TransactionType::Buy, Some(trigger)) => price >= trigger,
            (TransactionType::Sell, Some(trigger)) => price <= trigger,
            _ => false,
        },
        OrderVariant::Market => false,
    }
}
