//! Market-data WebSocket client.
//!
//! Connects to the upstream feed, subscribes with the (mode, exchange
//! tokens) protocol, and dispatches parsed ticks into the feed router.
//! Disconnection never touches resting orders: the client reconnects and
//! re-subscribes to every instrument that still has a resting conditional
//! order, plus any configured defaults, before ticks flow again.

use crate::services::clock::Clock;
use crate::services::feed_router::FeedRouter;
use crate::services::order_book::ConditionalOrderBook;
use crate::types::{Exchange, FeedMode, FeedRequest, FeedTickMessage, Instrument, PriceTick};
use futures_util::{SinkExt, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

/// Delay between reconnection attempts.
const RECONNECT_DELAY_SECS: u64 = 5;

/// Upstream market-data WebSocket client.
#[derive(Clone)]
pub struct MarketWs {
    url: String,
    mode: FeedMode,
    router: Arc<FeedRouter>,
    book: Arc<ConditionalOrderBook>,
    clock: Arc<dyn Clock>,
    /// Instruments always subscribed regardless of resting orders
    default_instruments: Vec<Instrument>,
    subscribed: Arc<RwLock<HashSet<Instrument>>>,
    pending_subscribe: Arc<RwLock<Vec<Instrument>>>,
    pending_unsubscribe: Arc<RwLock<Vec<Instrument>>>,
}

impl MarketWs {
    /// Create a new feed client.
    pub fn new(
        url: String,
        mode: FeedMode,
        router: Arc<FeedRouter>,
        book: Arc<ConditionalOrderBook>,
        clock: Arc<dyn Clock>,
        default_instruments: Vec<Instrument>,
    ) -> Self {
        Self {
            url,
            mode,
            router,
            book,
            clock,
            default_instruments,
            subscribed: Arc::new(RwLock::new(HashSet::new())),
            pending_subscribe: Arc::new(RwLock::new(Vec::new())),
            pending_unsubscribe: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Queue instruments for subscription.
    pub async fn subscribe(&self, instruments: &[Instrument]) {
        let mut pending = self.pending_subscribe.write().await;
        pending.extend(instruments.iter().cloned());
    }

    /// Queue instruments for unsubscription.
    pub async fn unsubscribe(&self, instruments: &[Instrument]) {
        let mut pending = self.pending_unsubscribe.write().await;
        pending.extend(instruments.iter().cloned());
    }

    /// Connect and keep receiving ticks, reconnecting forever. Resting
    /// orders are untouched by feed disruption.
    pub async fn connect(&self) -> anyhow::Result<()> {
        loop {
            match self.run_connection().await {
                Ok(_) => warn!("Market feed disconnected, reconnecting..."),
                Err(e) => error!("Market feed error: {}, reconnecting...", e),
            }
            tokio::time::sleep(tokio::time::Duration::from_secs(RECONNECT_DELAY_SECS)).await;
        }
    }

    async fn run_connection(&self) -> anyhow::Result<()> {
        info!("Connecting to market feed at {}", self.url);
        let (ws_stream, _) = connect_async(&self.url).await?;
        let (mut write, mut read) = ws_stream.split();
        info!("Connected to market feed");

        // Re-subscribe before consuming the first tick: defaults plus every
        // instrument the order book still has resting orders on.
        let mut initial: Vec<Instrument> = self.default_instruments.clone();
        for instrument in self.book.resting_instruments() {
            if !initial.contains(&instrument) {
                initial.push(instrument);
            }
        }

        if !initial.is_empty() {
            let request = FeedRequest::subscribe(self.mode, &initial);
            let json = serde_json::to_string(&request)?;
            write.send(Message::Text(json)).await?;
            let mut subscribed = self.subscribed.write().await;
            subscribed.clear();
            subscribed.extend(initial.iter().cloned());
            info!("Subscribed to {} instrument(s)", initial.len());
        }

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_message(&text).await;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            let _ = write.send(Message::Pong(data)).await;
                        }
                        Some(Ok(Message::Close(_))) => {
                            info!("Market feed closed the connection");
                            break;
                        }
                        Some(Err(e)) => {
                            error!("Market feed read error: {}", e);
                            break;
                        }
                        None => break,
                        _ => {}
                    }
                }
                _ = tokio::time::sleep(tokio::time::Duration::from_millis(100)) => {
                    let to_subscribe: Vec<Instrument> = {
                        let mut pending = self.pending_subscribe.write().await;
                        pending.drain(..).collect()
                    };
                    if !to_subscribe.is_empty() {
                        let request = FeedRequest::subscribe(self.mode, &to_subscribe);
                        if let Ok(json) = serde_json::to_string(&request) {
                            let _ = write.send(Message::Text(json)).await;
                            let mut subscribed = self.subscribed.write().await;
                            subscribed.extend(to_subscribe);
                        }
                    }

                    let to_unsubscribe: Vec<Instrument> = {
                        let mut pending = self.pending_unsubscribe.write().await;
                        pending.drain(..).collect()
                    };
                    if !to_unsubscribe.is_empty() {
                        let request = FeedRequest::unsubscribe(self.mode, &to_unsubscribe);
                        if let Ok(json) = serde_json::to_string(&request) {
                            let _ = write.send(Message::Text(json)).await;
                            let mut subscribed = self.subscribed.write().await;
                            for instrument in &to_unsubscribe {
                                subscribed.remove(instrument);
                            }
                        }
                    }
                }
            }
        }

        Ok(())
    }

    async fn handle_message(&self, text: &str) {
        let msg: FeedTickMessage = match serde_json::from_str(text) {
            Ok(m) => m,
            Err(_) => return,
        };

        let exchange = match Exchange::from_exchange_type(msg.exchange_type) {
            Some(e) => e,
            None => {
                debug!("Tick with unknown exchange type {}", msg.exchange_type);
                return;
            }
        };

        let timestamp = msg.timestamp.unwrap_or_else(|| self.clock.now_ms());
        let tick = PriceTick::new(msg.symbol, exchange, msg.last_traded_price, timestamp);

        debug!(
            "Tick: {} = {}",
            tick.instrument(),
            tick.last_traded_price
        );
        self.router.dispatch(tick).await;
    }
}
