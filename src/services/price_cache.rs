//! Last-traded-price cache, one entry per instrument.
//!
//! Written by the feed router on every tick; read by market-order execution
//! and the lifecycle sweeper, which need a price outside the tick path.

use crate::types::{Instrument, PriceTick};
use dashmap::DashMap;
use std::sync::Arc;

/// Cached last trade for an instrument.
#[derive(Debug, Clone)]
struct LastTrade {
    price: f64,
    timestamp: i64,
}

/// Last-traded-price cache keyed by (symbol, exchange).
pub struct PriceCache {
    prices: DashMap<Instrument, LastTrade>,
}

impl PriceCache {
    /// Create a new price cache.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            prices: DashMap::new(),
        })
    }

    /// Record a tick.
    pub fn update(&self, tick: &PriceTick) {
        self.prices.insert(
            tick.instrument(),
            LastTrade {
                price: tick.last_traded_price,
                timestamp: tick.timestamp,
            },
        );
    }

    /// Last traded price for an instrument, if any tick has arrived.
    pub fn ltp(&self, instrument: &Instrument) -> Option<f64> {
        self.prices.get(instrument).map(|entry| entry.price)
    }

    /// Last traded price with its tick timestamp.
    pub fn ltp_with_timestamp(&self, instrument: &Instrument) -> Option<(f64, i64)> {
        self.prices
            .get(instrument)
            .map(|entry| (entry.price, entry.timestamp))
    }

    /// Number of instruments with a cached price.
    pub fn len(&self) -> usize {
        self.prices.len()
    }

    /// Whether any price has been cached.
    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }
}
