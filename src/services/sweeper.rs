//! Lifecycle Sweeper
//!
//! Time-boundary transitions, independent of the tick stream:
//! - intraday positions past the square-off cutoff are force-closed through
//!   the coordinator (same per-position lock as tick-driven execution);
//! - resting intraday conditional orders past the cutoff are expired;
//! - delivery positions past their hold window are converted into holdings.
//!
//! Eligibility comes from store queries that require open + nonzero quantity
//! + past expiry in one filter, so a sweep cycle is idempotent: running it
//! again before the next state change selects nothing.

use crate::services::clock::Clock;
use crate::services::coordinator::{EngineError, LifecycleConfig, OrderExecutionCoordinator};
use crate::services::order_book::ConditionalOrderBook;
use crate::services::sqlite_store::SqliteStore;
use crate::types::PositionType;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Outcome of one sweep cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Intraday positions squared off
    pub intraday_closed: usize,
    /// Resting intraday orders expired
    pub orders_expired: usize,
    /// Delivery positions converted to holdings
    pub delivery_converted: usize,
}

/// Periodic lifecycle sweep over the position store.
pub struct LifecycleSweeper {
    store: Arc<SqliteStore>,
    coordinator: Arc<OrderExecutionCoordinator>,
    book: Arc<ConditionalOrderBook>,
    clock: Arc<dyn Clock>,
    lifecycle: LifecycleConfig,
}

impl LifecycleSweeper {
    pub fn new(
        store: Arc<SqliteStore>,
        coordinator: Arc<OrderExecutionCoordinator>,
        book: Arc<ConditionalOrderBook>,
        clock: Arc<dyn Clock>,
        lifecycle: LifecycleConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            coordinator,
            book,
            clock,
            lifecycle,
        })
    }

    /// Run one full sweep cycle.
    pub async fn run_once(&self) -> SweepReport {
        let now = self.clock.now_ms();
        let report = SweepReport {
            intraday_closed: self.sweep_intraday(now).await,
            orders_expired: self.expire_intraday_orders(now).await,
            delivery_converted: self.sweep_delivery(now).await,
        };
        if report != SweepReport::default() {
            info!(
                "Sweep: {} squared off, {} orders expired, {} converted",
                report.intraday_closed, report.orders_expired, report.delivery_converted
            );
        }
        report
    }

    /// Force-close intraday positions past the cutoff.
    async fn sweep_intraday(&self, now: i64) -> usize {
        let due = self.store.get_intraday_due_for_square_off(now);
        let mut closed = 0;
        for position in due {
            match self
                .coordinator
                .square_off_position(&position.id, "auto-square-off")
                .await
            {
                Ok(_) => closed += 1,
                // Lost the race to a manual square-off; already done.
                Err(EngineError::Conflict(msg)) => {
                    debug!("Skipping position {}: {}", position.id, msg)
                }
                Err(e) => error!("Failed to square off position {}: {}", position.id, e),
            }
        }
        closed
    }

    /// Expire resting intraday conditional orders whose trading day is over.
    async fn expire_intraday_orders(&self, now: i64) -> usize {
        let mut expired = 0;
        for order in self.book.resting_orders() {
            if order.position_type != PositionType::Intraday {
                continue;
            }
            let cutoff = self
                .lifecycle
                .expiry_for(PositionType::Intraday, order.created_at);
            if now < cutoff {
                continue;
            }
            match self.coordinator.expire_order(&order.id).await {
                Ok(_) => expired += 1,
                Err(EngineError::Conflict(msg)) => {
                    debug!("Skipping order {}: {}", order.id, msg)
                }
                Err(e) => error!("Failed to expire order {}: {}", order.id, e),
            }
        }
        expired
    }

    /// Convert delivery positions past their hold window into holdings.
    async fn sweep_delivery(&self, now: i64) -> usize {
        let expired = self.store.get_expired_delivery_positions(now);
        let mut converted = 0;
        for position in expired {
            match self.coordinator.convert_to_holding(&position.id).await {
                Ok(_) => converted += 1,
                Err(EngineError::Conflict(msg)) => {
                    debug!("Skipping position {}: {}", position.id, msg)
                }
                Err(e) => error!("Failed to convert position {}: {}", position.id, e),
            }
        }
        converted
    }

    /// Spawn the periodic sweep task.
    pub fn spawn(self: Arc<Self>, interval_secs: u64) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(tokio::time::Duration::from_secs(interval_secs));
            // First tick completes immediately; skip it so startup sequencing
            // (order reload before ticks) stays in main's hands.
            interval.tick().await;
            loop {
                interval.tick().await;
                self.run_once().await;
            }
        })
    }
}
