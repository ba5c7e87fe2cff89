//! Redis fast-path cache for resting conditional orders.
//!
//! SQLite is the source of truth; Redis mirrors pending/triggered orders so
//! a restart can re-index the order book without scanning the primary store.
//! Redis being down or absent is never an error; callers fall back to the
//! SQLite scan.

use crate::types::Order;
use redis::{aio::ConnectionManager, RedisResult};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Redis key prefixes
const ORDER_PREFIX: &str = "squareoff:order:";
const RESTING_SET: &str = "squareoff:resting";

/// Mirror of resting orders in Redis.
#[derive(Clone)]
pub struct RedisStore {
    conn: Arc<RwLock<Option<ConnectionManager>>>,
}

impl RedisStore {
    /// Create a new RedisStore, connecting to Redis at the given URL.
    pub async fn new(redis_url: &str) -> Self {
        let conn = match Self::connect(redis_url).await {
            Ok(c) => {
                info!("Connected to Redis at {}", redis_url);
                Some(c)
            }
            Err(e) => {
                warn!(
                    "Failed to connect to Redis: {}. Running without the order fast path.",
                    e
                );
                None
            }
        };

        Self {
            conn: Arc::new(RwLock::new(conn)),
        }
    }

    async fn connect(redis_url: &str) -> RedisResult<ConnectionManager> {
        let client = redis::Client::open(redis_url)?;
        ConnectionManager::new(client).await
    }

    /// Check if Redis is connected.
    pub async fn is_connected(&self) -> bool {
        self.conn.read().await.is_some()
    }

    /// Mirror a resting (pending or triggered) order.
    pub async fn save_resting_order(&self, order: &Order) {
        let conn_guard = self.conn.read().await;
        let Some(ref conn) = *conn_guard else {
            return;
        };

        let json = match serde_json::to_string(order) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to encode order {}: {}", order.id, e);
                return;
            }
        };

        let key = format!("{}{}", ORDER_PREFIX, order.id);
        let mut conn = conn.clone();
        if let Err(e) = redis::pipe()
            .cmd("SET")
            .arg(&key)
            .arg(&json)
            .ignore()
            .cmd("SADD")
            .arg(RESTING_SET)
            .arg(&order.id)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await
        {
            error!("Failed to mirror order {}: {}", order.id, e);
        }
    }

    /// Drop an order from the mirror once it goes terminal.
    pub async fn remove_resting_order(&self, order_id: &str) {
        let conn_guard = self.conn.read().await;
        let Some(ref conn) = *conn_guard else {
            return;
        };

        let key = format!("{}{}", ORDER_PREFIX, order_id);
        let mut conn = conn.clone();
        if let Err(e) = redis::pipe()
            .cmd("DEL")
            .arg(&key)
            .ignore()
            .cmd("SREM")
            .arg(RESTING_SET)
            .arg(order_id)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await
        {
            error!("Failed to unmirror order {}: {}", order_id, e);
        }
    }

    /// Load every mirrored resting order, oldest first. Returns `None` when
    /// Redis is unavailable (caller falls back to SQLite).
    pub async fn load_resting_orders(&self) -> Option<Vec<Order>> {
        let conn_guard = self.conn.read().await;
        let conn = conn_guard.as_ref()?;

        let mut conn = conn.clone();
        let ids: Vec<String> = match redis::cmd("SMEMBERS")
            .arg(RESTING_SET)
            .query_async(&mut conn)
            .await
        {
            Ok(ids) => ids,
            Err(e) => {
                warn!("Failed to read resting order set: {}", e);
                return None;
            }
        };

        let mut orders = Vec::with_capacity(ids.len());
        for id in ids {
            let key = format!("{}{}", ORDER_PREFIX, id);
            let json: RedisResult<Option<String>> =
                redis::cmd("GET").arg(&key).query_async(&mut conn).await;
            match json {
                Ok(Some(json)) => match serde_json::from_str::<Order>(&json) {
                    Ok(order) => orders.push(order),
                    Err(e) => error!("Failed to decode mirrored order {}: {}", id, e),
                },
                Ok(None) => debug!("Mirrored order {} vanished", id),
                Err(e) => {
                    warn!("Failed to read mirrored order {}: {}", id, e);
                    return None;
                }
            }
        }

        orders.sort_by_key(|o| o.created_at);
        debug!("Loaded {} resting order(s) from Redis", orders.len());
        Some(orders)
    }

    /// Replace the whole mirror with the given resting set (startup
    /// reconciliation against SQLite).
    pub async fn sync_resting_orders(&self, orders: &[Order]) {
        let conn_guard = self.conn.read().await;
        let Some(ref conn) = *conn_guard else {
            return;
        };

        let mut conn = conn.clone();
        let ids: Vec<String> = match redis::cmd("SMEMBERS")
            .arg(RESTING_SET)
            .query_async(&mut conn)
            .await
        {
            Ok(ids) => ids,
            Err(e) => {
                warn!("Failed to clear order mirror: {}", e);
                return;
            }
        };
        for id in ids {
            let key = format!("{}{}", ORDER_PREFIX, id);
            let _: RedisResult<()> = redis::pipe()
                .cmd("DEL")
                .arg(&key)
                .ignore()
                .cmd("SREM")
                .arg(RESTING_SET)
                .arg(&id)
                .ignore()
                .query_async(&mut conn)
                .await;
        }
        drop(conn_guard);

        for order in orders {
            self.save_resting_order(order).await;
        }
        info!("Synced {} resting order(s) to Redis", orders.len());
    }
}
