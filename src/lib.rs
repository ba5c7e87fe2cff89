//! Squareoff - retail trading simulator settlement engine
//!
//! Maintains netted positions as fills arrive, fires resting limit and
//! stop-loss orders off the live tick stream, and runs the time-based
//! lifecycle sweep (intraday auto square-off, delivery-to-holding
//! conversion).

pub mod api;
pub mod config;
pub mod error;
pub mod services;
pub mod sources;
pub mod types;

use config::Config;
use services::{Clock, ConditionalOrderBook, OrderExecutionCoordinator, PriceCache, SqliteStore};
use std::sync::Arc;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<SqliteStore>,
    pub book: Arc<ConditionalOrderBook>,
    pub price_cache: Arc<PriceCache>,
    pub coordinator: Arc<OrderExecutionCoordinator>,
    pub clock: Arc<dyn Clock>,
}

// Re-export commonly used types
pub use types::*;
