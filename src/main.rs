use squareoff::config::Config;
use squareoff::services::{
    ConditionalOrderBook, ExecutionConfig, FeedRouter, LifecycleConfig, LifecycleSweeper,
    OrderExecutionCoordinator, PriceCache, RedisStore, SqliteStore, SystemClock,
};
use squareoff::sources::{MarketWs, SimFeed};
use squareoff::AppState;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "squareoff=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Arc::new(Config::from_env());
    info!("Starting squareoff server on {}:{}", config.host, config.port);

    // Durable store and engine services
    let store = Arc::new(SqliteStore::new(&config.sqlite_path)?);
    let clock = Arc::new(SystemClock);
    let book = ConditionalOrderBook::new();
    let price_cache = PriceCache::new();

    let coordinator = OrderExecutionCoordinator::new(
        store.clone(),
        book.clone(),
        price_cache.clone(),
        clock.clone(),
        ExecutionConfig {
            max_persist_attempts: config.max_persist_attempts,
            persist_backoff_ms: config.persist_backoff_ms,
        },
        LifecycleConfig {
            square_off_hour: config.lifecycle.square_off_hour,
            square_off_minute: config.lifecycle.square_off_minute,
            delivery_hold_ms: config.lifecycle.delivery_hold_ms,
        },
    );

    // Optional Redis fast path for resting orders
    let redis = match config.redis_url {
        Some(ref url) => {
            let redis = Arc::new(RedisStore::new(url).await);
            if redis.is_connected().await {
                coordinator.set_redis_store(redis.clone());
                Some(redis)
            } else {
                None
            }
        }
        None => None,
    };

    // Reload resting conditional orders BEFORE the feed is allowed to
    // deliver ticks: Redis fast path first, SQLite scan as the fallback and
    // source of truth.
    let resting = match redis {
        Some(ref redis) => match redis.load_resting_orders().await {
            Some(orders) if !orders.is_empty() => orders,
            _ => store.get_resting_orders(),
        },
        None => store.get_resting_orders(),
    };
    info!("Reloading {} resting order(s) into the book", resting.len());
    book.reindex(resting);
    if let Some(ref redis) = redis {
        redis.sync_resting_orders(&book.resting_orders()).await;
    }

    // Tick fan-out: one worker per instrument
    let router = FeedRouter::new(book.clone(), coordinator.clone(), price_cache.clone());

    // Start the market feed (upstream WebSocket, or the simulator)
    match config.feed.url {
        Some(ref url) => {
            info!("Starting market feed client for {}", url);
            // Subscribe to configured defaults plus every instrument that
            // still has an open position to mark.
            let mut default_instruments = config.feed.default_instruments.clone();
            for instrument in store.get_instruments_with_positions() {
                if !default_instruments.contains(&instrument) {
                    default_instruments.push(instrument);
                }
            }
            let feed = MarketWs::new(
                url.clone(),
                config.feed.mode,
                router.clone(),
                book.clone(),
                clock.clone(),
                default_instruments,
            );
            tokio::spawn(async move {
                if let Err(e) = feed.connect().await {
                    tracing::error!("Market feed error: {}", e);
                }
            });
        }
        None => {
            info!("No FEED_URL configured, starting simulated feed");
            let instruments = config
                .feed
                .default_instruments
                .iter()
                .cloned()
                .map(|i| (i, config.feed.sim_start_price))
                .collect();
            let sim = SimFeed::new(
                router.clone(),
                clock.clone(),
                instruments,
                config.feed.sim_tick_interval_ms,
            );
            tokio::spawn(sim.run());
        }
    }

    // Start the lifecycle sweeper
    let sweeper = LifecycleSweeper::new(
        store.clone(),
        coordinator.clone(),
        book.clone(),
        clock.clone(),
        LifecycleConfig {
            square_off_hour: config.lifecycle.square_off_hour,
            square_off_minute: config.lifecycle.square_off_minute,
            delivery_hold_ms: config.lifecycle.delivery_hold_ms,
        },
    );
    sweeper.spawn(config.lifecycle.sweep_interval_secs);

    // Create application state
    let state = AppState {
        config: config.clone(),
        store,
        book,
        price_cache,
        coordinator,
        clock,
    };

    // Build CORS layer
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Build the router
    let app = squareoff::api::router()
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start the server
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("squareoff server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
