//! Integration tests for the lifecycle sweep: intraday auto square-off,
//! resting-order expiry, and delivery-to-holding conversion, all driven by a
//! manual clock.

use chrono::{TimeZone, Utc};
use squareoff::services::{
    Clock, ConditionalOrderBook, ExecutionConfig, LifecycleConfig, LifecycleSweeper, ManualClock,
    OrderExecutionCoordinator, PriceCache, SqliteStore, SweepReport,
};
use squareoff::types::*;
use std::sync::Arc;

struct Engine {
    store: Arc<SqliteStore>,
    book: Arc<ConditionalOrderBook>,
    price_cache: Arc<PriceCache>,
    coordinator: Arc<OrderExecutionCoordinator>,
    sweeper: Arc<LifecycleSweeper>,
    clock: Arc<ManualClock>,
}

fn morning_ms() -> i64 {
    // 2024-01-10 10:00:00 UTC, well before the 15:15 cutoff.
    Utc.with_ymd_and_hms(2024, 1, 10, 10, 0, 0)
        .unwrap()
        .timestamp_millis()
}

fn cutoff_ms() -> i64 {
    Utc.with_ymd_and_hms(2024, 1, 10, 15, 15, 0)
        .unwrap()
        .timestamp_millis()
}

fn engine() -> Engine {
    let store = Arc::new(SqliteStore::new_in_memory().unwrap());
    let book = ConditionalOrderBook::new();
    let price_cache = PriceCache::new();
    let clock = ManualClock::new(morning_ms());
    let lifecycle = LifecycleConfig::default();
    let coordinator = OrderExecutionCoordinator::new(
        store.clone(),
        book.clone(),
        price_cache.clone(),
        clock.clone(),
        ExecutionConfig::default(),
        lifecycle.clone(),
    );
    let sweeper = LifecycleSweeper::new(
        store.clone(),
        coordinator.clone(),
        book.clone(),
        clock.clone(),
        lifecycle,
    );
    Engine {
        store,
        book,
        price_cache,
        coordinator,
        sweeper,
        clock,
    }
}

fn request(position_type: PositionType, variant: OrderVariant) -> PlaceOrderRequest {
    PlaceOrderRequest {
        user_id: "user-1".to_string(),
        wallet_id: "wallet-1".to_string(),
        symbol: "ACME".to_string(),
        exchange: Exchange::Primary,
        position_type,
        transaction_type: TransactionType::Buy,
        variant,
        quantity: 10.0,
        limit_price: match variant {
            OrderVariant::Market => None,
            _ => Some(90.0),
        },
        trigger_price: None,
        approval_id: "appr-1".to_string(),
    }
}

fn prime_price(engine: &Engine, price: f64) {
    engine.price_cache.update(&PriceTick::new(
        "ACME",
        Exchange::Primary,
        price,
        engine.clock.now_ms(),
    ));
}

async fn open_position(engine: &Engine, position_type: PositionType) -> Position {
    prime_price(engine, 100.0);
    engine
        .coordinator
        .place_order(request(position_type, OrderVariant::Market))
        .await
        .unwrap()
        .position
        .unwrap()
}

#[tokio::test]
async fn test_intraday_square_off_at_cutoff_boundary() {
    let engine = engine();
    let position = open_position(&engine, PositionType::Intraday).await;
    assert_eq!(position.expires_at, cutoff_ms());

    // One millisecond before the cutoff: nothing is due.
    engine.clock.set(cutoff_ms() - 1);
    assert_eq!(engine.sweeper.run_once().await, SweepReport::default());

    // Exactly at the cutoff (inclusive boundary) the position is closed.
    engine.clock.set(cutoff_ms());
    prime_price(&engine, 104.0);
    let report = engine.sweeper.run_once().await;
    assert_eq!(report.intraday_closed, 1);

    let closed = engine.store.get_position(&position.id).unwrap();
    assert!(closed.is_squared_off);
    assert_eq!(closed.quantity, 0.0);

    let close_order = engine
        .store
        .get_order(closed.square_off_order_id.as_ref().unwrap())
        .unwrap();
    assert_eq!(close_order.transaction_type, TransactionType::Sell);
    assert_eq!(close_order.fill_price, Some(104.0));
}

#[tokio::test]
async fn test_sweep_rerun_is_noop() {
    let engine = engine();
    open_position(&engine, PositionType::Intraday).await;

    engine.clock.set(cutoff_ms());
    let first = engine.sweeper.run_once().await;
    assert_eq!(first.intraday_closed, 1);

    // Second sweep with no new fills: the three-way filter selects nothing.
    let second = engine.sweeper.run_once().await;
    assert_eq!(second, SweepReport::default());
}

#[tokio::test]
async fn test_sweep_without_ltp_closes_at_entry_average() {
    let engine = engine();
    let position = open_position(&engine, PositionType::Intraday).await;

    // A fresh engine after restart would have an empty price cache; the
    // sweep must still close the position. We emulate it with a new engine
    // sharing nothing but the store.
    let book = ConditionalOrderBook::new();
    let price_cache = PriceCache::new();
    let clock = ManualClock::new(cutoff_ms());
    let coordinator = OrderExecutionCoordinator::new(
        engine.store.clone(),
        book.clone(),
        price_cache.clone(),
        clock.clone(),
        ExecutionConfig::default(),
        LifecycleConfig::default(),
    );
    let sweeper = LifecycleSweeper::new(
        engine.store.clone(),
        coordinator,
        book,
        clock,
        LifecycleConfig::default(),
    );

    let report = sweeper.run_once().await;
    assert_eq!(report.intraday_closed, 1);

    let closed = engine.store.get_position(&position.id).unwrap();
    let close_order = engine
        .store
        .get_order(closed.square_off_order_id.as_ref().unwrap())
        .unwrap();
    assert_eq!(close_order.fill_price, Some(100.0));
}

#[tokio::test]
async fn test_resting_intraday_orders_expire_at_cutoff() {
    let engine = engine();
    let response = engine
        .coordinator
        .place_order(request(PositionType::Intraday, OrderVariant::Limit))
        .await
        .unwrap();
    assert_eq!(engine.book.len(), 1);

    engine.clock.set(cutoff_ms());
    let report = engine.sweeper.run_once().await;
    assert_eq!(report.orders_expired, 1);

    let expired = engine.store.get_order(&response.order.id).unwrap();
    assert_eq!(expired.status, OrderStatus::Expired);
    assert!(engine.book.is_empty());
}

#[tokio::test]
async fn test_delivery_orders_survive_intraday_cutoff() {
    let engine = engine();
    engine
        .coordinator
        .place_order(request(PositionType::Delivery, OrderVariant::Limit))
        .await
        .unwrap();

    engine.clock.set(cutoff_ms());
    let report = engine.sweeper.run_once().await;
    assert_eq!(report.orders_expired, 0);
    assert_eq!(engine.book.len(), 1);
}

#[tokio::test]
async fn test_delivery_position_converts_to_holding() {
    let engine = engine();
    let position = open_position(&engine, PositionType::Delivery).await;
    assert_eq!(position.expires_at, morning_ms() + 24 * 60 * 60 * 1000);

    // Inside the hold window nothing converts.
    engine.clock.set(position.expires_at - 1);
    assert_eq!(engine.sweeper.run_once().await.delivery_converted, 0);

    // At the window boundary the position becomes a holding.
    engine.clock.set(position.expires_at);
    let report = engine.sweeper.run_once().await;
    assert_eq!(report.delivery_converted, 1);

    let converted = engine.store.get_position(&position.id).unwrap();
    assert!(converted.converted_to_holding);
    assert!(!converted.is_squared_off);
    // Quantity and entry stay on the record; the holding tracks it forward.
    assert_eq!(converted.quantity, 10.0);
    assert_eq!(converted.average_price, 100.0);

    let holdings = engine.store.get_user_holdings("user-1");
    assert_eq!(holdings.len(), 1);
    assert_eq!(holdings[0].id, *converted.holding_id.as_ref().unwrap());
    assert_eq!(holdings[0].quantity, 10.0);
    assert_eq!(holdings[0].average_price, 100.0);
    assert_eq!(holdings[0].position_id, position.id);

    // Converted positions leave the active query and never convert twice.
    assert!(engine.store.get_active_positions("user-1", None).is_empty());
    assert_eq!(engine.sweeper.run_once().await, SweepReport::default());
}

#[tokio::test]
async fn test_converted_position_rejects_square_off() {
    let engine = engine();
    let position = open_position(&engine, PositionType::Delivery).await;

    engine.clock.set(position.expires_at);
    engine.sweeper.run_once().await;

    let err = engine
        .coordinator
        .square_off_position(&position.id, "manual")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        squareoff::services::EngineError::Conflict(_)
    ));
}

#[tokio::test]
async fn test_mixed_sweep_handles_both_types() {
    let engine = engine();
    let intraday = open_position(&engine, PositionType::Intraday).await;
    let delivery = open_position(&engine, PositionType::Delivery).await;

    // Past both boundaries at once.
    engine.clock.set(delivery.expires_at.max(cutoff_ms()));
    let report = engine.sweeper.run_once().await;
    assert_eq!(report.intraday_closed, 1);
    assert_eq!(report.delivery_converted, 1);

    assert!(engine.store.get_position(&intraday.id).unwrap().is_squared_off);
    assert!(engine
        .store
        .get_position(&delivery.id)
        .unwrap()
        .converted_to_holding);
}
