//! Feed Router
//!
//! Fans the tick stream out to one bounded channel + worker task per
//! instrument. Within an instrument, ticks are processed strictly in arrival
//! order and every trigger an earlier tick fired is fully resolved before
//! the next tick is evaluated, so a later tick can never jump the queue past a
//! trigger that should have fired first. Across instruments the workers run
//! concurrently with no ordering guarantee.

use crate::services::coordinator::OrderExecutionCoordinator;
use crate::services::order_book::ConditionalOrderBook;
use crate::services::price_cache::PriceCache;
use crate::types::{Instrument, PriceTick};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, warn};

/// Per-instrument channel capacity.
const CHANNEL_CAPACITY: usize = 256;

/// Routes ticks into per-instrument workers.
pub struct FeedRouter {
    book: Arc<ConditionalOrderBook>,
    coordinator: Arc<OrderExecutionCoordinator>,
    price_cache: Arc<PriceCache>,
    channels: DashMap<Instrument, mpsc::Sender<PriceTick>>,
}

impl FeedRouter {
    pub fn new(
        book: Arc<ConditionalOrderBook>,
        coordinator: Arc<OrderExecutionCoordinator>,
        price_cache: Arc<PriceCache>,
    ) -> Arc<Self> {
        Arc::new(Self {
            book,
            coordinator,
            price_cache,
            channels: DashMap::new(),
        })
    }

    /// Route a tick to its instrument's worker, spawning the worker on first
    /// sight of the instrument. Applies backpressure when the worker is
    /// behind rather than dropping or reordering ticks.
    pub async fn dispatch(&self, tick: PriceTick) {
        let instrument = tick.instrument();
        let sender = self.sender_for(&instrument);
        if sender.send(tick).await.is_err() {
            // Worker died; drop the channel so the next tick respawns it.
            warn!("Worker for {} gone, respawning on next tick", instrument);
            self.channels.remove(&instrument);
        }
    }

    fn sender_for(&self, instrument: &Instrument) -> mpsc::Sender<PriceTick> {
        match self.channels.entry(instrument.clone()) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => {
                let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
                entry.insert(tx.clone());

                let book = self.book.clone();
                let coordinator = self.coordinator.clone();
                let price_cache = self.price_cache.clone();
                let instrument = instrument.clone();
                tokio::spawn(async move {
                    Self::run_worker(instrument, rx, book, coordinator, price_cache).await;
                });

                tx
            }
        }
    }

    /// Sequential tick loop for one instrument.
    async fn run_worker(
        instrument: Instrument,
        mut rx: mpsc::Receiver<PriceTick>,
        book: Arc<ConditionalOrderBook>,
        coordinator: Arc<OrderExecutionCoordinator>,
        price_cache: Arc<PriceCache>,
    ) {
        while let Some(tick) = rx.recv().await {
            price_cache.update(&tick);

            let events = book.evaluate_tick(&tick);
            for event in events {
                if let Err(e) = coordinator.handle_trigger(&event).await {
                    error!(
                        "Failed to execute triggered order {} on {}: {}",
                        event.order_id, instrument, e
                    );
                }
            }
        }
    }

    /// Number of live per-instrument workers.
    pub fn worker_count(&self) -> usize {
        self.channels.len()
    }
}
