pub mod clock;
pub mod coordinator;
pub mod feed_router;
pub mod ledger;
pub mod order_book;
pub mod price_cache;
pub mod redis_store;
pub mod sqlite_store;
pub mod sweeper;

pub use clock::{Clock, ManualClock, SystemClock};
pub use coordinator::{EngineError, ExecutionConfig, LifecycleConfig, OrderExecutionCoordinator};
pub use feed_router::FeedRouter;
pub use ledger::LedgerError;
pub use order_book::{ConditionalOrderBook, TriggerEvent};
pub use price_cache::PriceCache;
pub use redis_store::RedisStore;
pub use sqlite_store::SqliteStore;
pub use sweeper::{LifecycleSweeper, SweepReport};
