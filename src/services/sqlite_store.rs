//! SQLite persistence layer for positions, orders, and holdings.
//!
//! Records are stored document-style: a handful of indexed filter columns
//! next to the full JSON document, so query shapes stay explicit while the
//! record schema can evolve with the types. SQLite is the source of truth;
//! the in-memory caches and the optional Redis mirror are rebuilt from it.

use crate::types::{Exchange, Holding, Instrument, Order, OrderStatus, Position, PositionType};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, error, info};

/// SQLite store for the settlement engine's durable state.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Create a new SQLite store at the given path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, rusqlite::Error> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        info!("SQLite store initialized");
        Ok(store)
    }

    /// Create an in-memory SQLite store (for testing).
    pub fn new_in_memory() -> Result<Self, rusqlite::Error> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        debug!("In-memory SQLite store initialized");
        Ok(store)
    }

    /// Initialize database schema.
    fn init_schema(&self) -> Result<(), rusqlite::Error> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS positions (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                symbol TEXT NOT NULL,
                exchange TEXT NOT NULL,
                position_type TEXT NOT NULL,
                quantity REAL NOT NULL,
                expires_at INTEGER NOT NULL,
                is_squared_off INTEGER NOT NULL DEFAULT 0,
                converted_to_holding INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                record_json TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_positions_user ON positions(user_id)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_positions_expiry
             ON positions(position_type, is_squared_off, expires_at)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS orders (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                symbol TEXT NOT NULL,
                exchange TEXT NOT NULL,
                position_type TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                record_json TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_orders_status ON orders(status)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_orders_user ON orders(user_id, created_at DESC)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS holdings (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                position_id TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                record_json TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_holdings_user ON holdings(user_id)",
            [],
        )?;

        info!("SQLite schema initialized");
        Ok(())
    }

    // ========== Position Methods ==========

    /// Insert or replace a position record.
    pub fn save_position(&self, position: &Position) -> Result<(), rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        let record_json = serde_json::to_string(position).unwrap_or_default();

        conn.execute(
            "INSERT INTO positions
                (id, user_id, symbol, exchange, position_type, quantity, expires_at,
                 is_squared_off, converted_to_holding, created_at, record_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(id) DO UPDATE SET
                quantity = excluded.quantity,
                expires_at = excluded.expires_at,
                is_squared_off = excluded.is_squared_off,
                converted_to_holding = excluded.converted_to_holding,
                record_json = excluded.record_json",
            params![
                position.id,
                position.user_id,
                position.symbol,
                position.exchange.to_string(),
                position.position_type.to_string(),
                position.quantity,
                position.expires_at,
                position.is_squared_off as i64,
                position.converted_to_holding as i64,
                position.created_at,
                record_json,
            ],
        )?;
        Ok(())
    }

    /// Get a position by ID.
    pub fn get_position(&self, id: &str) -> Option<Position> {
        let conn = self.conn.lock().unwrap();
        let result = conn.query_row(
            "SELECT record_json FROM positions WHERE id = ?1",
            params![id],
            |row| row.get::<_, String>(0),
        );
        Self::decode_row("position", result)
    }

    /// Get the open (active) position for a netting key, if any.
    pub fn get_open_position(
        &self,
        user_id: &str,
        symbol: &str,
        exchange: Exchange,
        position_type: PositionType,
    ) -> Option<Position> {
        let conn = self.conn.lock().unwrap();
        let result = conn.query_row(
            "SELECT record_json FROM positions
             WHERE user_id = ?1 AND symbol = ?2 AND exchange = ?3 AND position_type = ?4
               AND is_squared_off = 0 AND converted_to_holding = 0
             ORDER BY created_at DESC LIMIT 1",
            params![
                user_id,
                symbol,
                exchange.to_string(),
                position_type.to_string()
            ],
            |row| row.get::<_, String>(0),
        );
        Self::decode_row("position", result)
    }

    /// Active positions for a user, optionally filtered by type.
    /// Active means: not squared off, not converted, nonzero quantity.
    pub fn get_active_positions(
        &self,
        user_id: &str,
        position_type: Option<PositionType>,
    ) -> Vec<Position> {
        let conn = self.conn.lock().unwrap();
        let mut sql = String::from(
            "SELECT record_json FROM positions
             WHERE user_id = ?1 AND is_squared_off = 0 AND converted_to_holding = 0
               AND quantity != 0",
        );
        if position_type.is_some() {
            sql.push_str(" AND position_type = ?2");
        }
        sql.push_str(" ORDER BY created_at ASC");

        let mut stmt = match conn.prepare(&sql) {
            Ok(s) => s,
            Err(e) => {
                error!("Error preparing position query: {}", e);
                return Vec::new();
            }
        };

        let mapper = |row: &rusqlite::Row<'_>| row.get::<_, String>(0);
        let rows = match position_type {
            Some(pt) => stmt.query_map(params![user_id, pt.to_string()], mapper),
            None => stmt.query_map(params![user_id], mapper),
        };

        Self::decode_rows("positions", rows)
    }

    /// Intraday positions due for square-off at `now`: open, nonzero quantity,
    /// past the cutoff. This three-way filter is the only guard against
    /// re-processing an already-closed position.
    pub fn get_intraday_due_for_square_off(&self, now: i64) -> Vec<Position> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = match conn.prepare(
            "SELECT record_json FROM positions
             WHERE position_type = 'intraday' AND is_squared_off = 0
               AND quantity != 0 AND expires_at <= ?1
             ORDER BY expires_at ASC",
        ) {
            Ok(s) => s,
            Err(e) => {
                error!("Error preparing square-off query: {}", e);
                return Vec::new();
            }
        };
        let rows = stmt.query_map(params![now], |row| row.get::<_, String>(0));
        Self::decode_rows("positions", rows)
    }

    /// Delivery positions past expiry awaiting conversion to a holding.
    pub fn get_expired_delivery_positions(&self, now: i64) -> Vec<Position> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = match conn.prepare(
            "SELECT record_json FROM positions
             WHERE position_type = 'delivery' AND is_squared_off = 0
               AND converted_to_holding = 0 AND quantity != 0 AND expires_at <= ?1
             ORDER BY expires_at ASC",
        ) {
            Ok(s) => s,
            Err(e) => {
                error!("Error preparing delivery expiry query: {}", e);
                return Vec::new();
            }
        };
        let rows = stmt.query_map(params![now], |row| row.get::<_, String>(0));
        Self::decode_rows("positions", rows)
    }

    /// Paginated position history for a user over a creation-date range
    /// (`from` inclusive, `to` exclusive), newest first.
    pub fn get_position_history(
        &self,
        user_id: &str,
        from: i64,
        to: i64,
        limit: u32,
        offset: u32,
    ) -> Vec<Position> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = match conn.prepare(
            "SELECT record_json FROM positions
             WHERE user_id = ?1 AND created_at >= ?2 AND created_at < ?3
             ORDER BY created_at DESC LIMIT ?4 OFFSET ?5",
        ) {
            Ok(s) => s,
            Err(e) => {
                error!("Error preparing history query: {}", e);
                return Vec::new();
            }
        };
        let rows = stmt.query_map(params![user_id, from, to, limit, offset], |row| {
            row.get::<_, String>(0)
        });
        Self::decode_rows("positions", rows)
    }

    /// Instruments that have at least one active position.
    pub fn get_instruments_with_positions(&self) -> Vec<Instrument> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = match conn.prepare(
            "SELECT DISTINCT symbol, exchange FROM positions
             WHERE is_squared_off = 0 AND converted_to_holding = 0 AND quantity != 0",
        ) {
            Ok(s) => s,
            Err(e) => {
                error!("Error preparing instrument query: {}", e);
                return Vec::new();
            }
        };
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        });
        match rows {
            Ok(mapped) => mapped
                .filter_map(|r| r.ok())
                .filter_map(|(symbol, exchange)| {
                    parse_exchange(&exchange).map(|e| Instrument::new(symbol, e))
                })
                .collect(),
            Err(e) => {
                error!("Error querying instruments: {}", e);
                Vec::new()
            }
        }
    }

    // ========== Order Methods ==========

    /// Insert or replace an order record.
    pub fn save_order(&self, order: &Order) -> Result<(), rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        let record_json = serde_json::to_string(order).unwrap_or_default();

        conn.execute(
            "INSERT INTO orders
                (id, user_id, symbol, exchange, position_type, status, created_at, record_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                record_json = excluded.record_json",
            params![
                order.id,
                order.user_id,
                order.symbol,
                order.exchange.to_string(),
                order.position_type.to_string(),
                order.status.to_string(),
                order.created_at,
                record_json,
            ],
        )?;
        Ok(())
    }

    /// Get an order by ID.
    pub fn get_order(&self, id: &str) -> Option<Order> {
        let conn = self.conn.lock().unwrap();
        let result = conn.query_row(
            "SELECT record_json FROM orders WHERE id = ?1",
            params![id],
            |row| row.get::<_, String>(0),
        );
        Self::decode_row("order", result)
    }

    /// All resting (pending or triggered) orders, oldest first. Used to
    /// rebuild the conditional order book at startup.
    pub fn get_resting_orders(&self) -> Vec<Order> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = match conn.prepare(
            "SELECT record_json FROM orders
             WHERE status IN ('pending', 'triggered')
             ORDER BY created_at ASC",
        ) {
            Ok(s) => s,
            Err(e) => {
                error!("Error preparing resting order query: {}", e);
                return Vec::new();
            }
        };
        let rows = stmt.query_map([], |row| row.get::<_, String>(0));
        Self::decode_rows("orders", rows)
    }

    /// A user's orders, newest first.
    pub fn get_user_orders(&self, user_id: &str, limit: u32) -> Vec<Order> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = match conn.prepare(
            "SELECT record_json FROM orders
             WHERE user_id = ?1 ORDER BY created_at DESC LIMIT ?2",
        ) {
            Ok(s) => s,
            Err(e) => {
                error!("Error preparing user order query: {}", e);
                return Vec::new();
            }
        };
        let rows = stmt.query_map(params![user_id, limit], |row| row.get::<_, String>(0));
        Self::decode_rows("orders", rows)
    }

    /// Count orders by status (diagnostics).
    pub fn order_count(&self, status: OrderStatus) -> usize {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT COUNT(*) FROM orders WHERE status = ?1",
            params![status.to_string()],
            |row| row.get::<_, i64>(0),
        )
        .unwrap_or(0) as usize
    }

    // ========== Holding Methods ==========

    /// Insert a holding record.
    pub fn save_holding(&self, holding: &Holding) -> Result<(), rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        let record_json = serde_json::to_string(holding).unwrap_or_default();

        conn.execute(
            "INSERT OR REPLACE INTO holdings (id, user_id, position_id, created_at, record_json)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                holding.id,
                holding.user_id,
                holding.position_id,
                holding.created_at,
                record_json,
            ],
        )?;
        Ok(())
    }

    /// A user's holdings, newest first.
    pub fn get_user_holdings(&self, user_id: &str) -> Vec<Holding> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = match conn.prepare(
            "SELECT record_json FROM holdings
             WHERE user_id = ?1 ORDER BY created_at DESC",
        ) {
            Ok(s) => s,
            Err(e) => {
                error!("Error preparing holding query: {}", e);
                return Vec::new();
            }
        };
        let rows = stmt.query_map(params![user_id], |row| row.get::<_, String>(0));
        Self::decode_rows("holdings", rows)
    }

    // ========== Helpers ==========

    fn decode_row<T: serde::de::DeserializeOwned>(
        label: &str,
        result: Result<String, rusqlite::Error>,
    ) -> Option<T> {
        match result {
            Ok(json) => match serde_json::from_str(&json) {
                Ok(value) => Some(value),
                Err(e) => {
                    error!("Error decoding {} record: {}", label, e);
                    None
                }
            },
            Err(rusqlite::Error::QueryReturnedNoRows) => None,
            Err(e) => {
                error!("Error fetching {}: {}", label, e);
                None
            }
        }
    }

    fn decode_rows<T: serde::de::DeserializeOwned>(
        label: &str,
        rows: Result<
            rusqlite::MappedRows<'_, impl FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<String>>,
            rusqlite::Error,
        >,
    ) -> Vec<T> {
        match rows {
            Ok(mapped) => mapped
                .filter_map(|r| r.ok())
                .filter_map(|json| match serde_json::from_str(&json) {
                    Ok(value) => Some(value),
                    Err(e) => {
                        error!("Error decoding {} record: {}", label, e);
                        None
                    }
                })
                .collect(),
            Err(e) => {
                error!("Error querying {}: {}", label, e);
                Vec::new()
            }
        }
    }
}

fn parse_exchange(s: &str) -> Option<Exchange> {
    match s {
        "primary" => Some(Exchange::Primary),
        "secondary" => Some(Exchange::Secondary),
        "derivative" => Some(Exchange::Derivative),
        _ => None,
    }
}
