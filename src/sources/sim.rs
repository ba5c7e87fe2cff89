//! Simulated market feed.
//!
//! Random-walk tick generator for running the engine without an upstream
//! feed (FEED_MODE=sim). Produces the same `PriceTick` stream the WebSocket
//! client would, through the same router.

use crate::services::clock::Clock;
use crate::services::feed_router::FeedRouter;
use crate::types::{Instrument, PriceTick};
use rand::Rng;
use std::sync::Arc;
use tracing::info;

/// Per-tick price drift bound, as a fraction of the current price.
const MAX_STEP_PCT: f64 = 0.002;

/// Random-walk tick source.
pub struct SimFeed {
    router: Arc<FeedRouter>,
    clock: Arc<dyn Clock>,
    /// Instruments to generate ticks for, with their starting prices
    instruments: Vec<(Instrument, f64)>,
    /// Delay between tick rounds (ms)
    tick_interval_ms: u64,
}

impl SimFeed {
    pub fn new(
        router: Arc<FeedRouter>,
        clock: Arc<dyn Clock>,
        instruments: Vec<(Instrument, f64)>,
        tick_interval_ms: u64,
    ) -> Self {
        Self {
            router,
            clock,
            instruments,
            tick_interval_ms,
        }
    }

    /// Generate ticks forever.
    pub async fn run(mut self) {
        info!(
            "Simulated feed started for {} instrument(s)",
            self.instruments.len()
        );
        loop {
            for (instrument, price) in self.instruments.iter_mut() {
                let step = {
                    let mut rng = rand::thread_rng();
                    rng.gen_range(-MAX_STEP_PCT..=MAX_STEP_PCT)
                };
                *price *= 1.0 + step;

                let tick = PriceTick::new(
                    instrument.symbol.clone(),
                    instrument.exchange,
                    *price,
                    self.clock.now_ms(),
                );
                self.router.dispatch(tick).await;
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(self.tick_interval_ms)).await;
        }
    }
}
