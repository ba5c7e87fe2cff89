//! Market Data Types
//!
//! Exchange identifiers, price ticks, and the feed subscription protocol
//! spoken with the upstream market-data provider.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Exchange segment an instrument trades on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Exchange {
    /// Primary equity segment
    Primary,
    /// Secondary equity segment
    Secondary,
    /// Derivatives segment
    Derivative,
}

impl Exchange {
    /// Numeric code used by the feed subscription protocol.
    pub fn exchange_type(&self) -> u8 {
        match self {
            Exchange::Primary => 1,
            Exchange::Secondary => 2,
            Exchange::Derivative => 3,
        }
    }

    /// Parse the feed protocol's numeric code.
    pub fn from_exchange_type(code: u8) -> Option<Self> {
        match code {
            1 => Some(Exchange::Primary),
            2 => Some(Exchange::Secondary),
            3 => Some(Exchange::Derivative),
            _ => None,
        }
    }
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Exchange::Primary => write!(f, "primary"),
            Exchange::Secondary => write!(f, "secondary"),
            Exchange::Derivative => write!(f, "derivative"),
        }
    }
}

/// A (symbol, exchange) pair identifying one tradeable instrument.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instrument {
    pub symbol: String,
    pub exchange: Exchange,
}

impl Instrument {
    pub fn new(symbol: impl Into<String>, exchange: Exchange) -> Self {
        Self {
            symbol: symbol.into(),
            exchange,
        }
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.exchange, self.symbol)
    }
}

/// A single price update from the feed. Transient: consumed immediately,
/// never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceTick {
    /// Instrument symbol (e.g. "RELIANCE", "NIFTYFUT")
    pub symbol: String,
    /// Exchange segment
    pub exchange: Exchange,
    /// Last traded price
    pub last_traded_price: f64,
    /// Tick timestamp (ms)
    pub timestamp: i64,
}

impl PriceTick {
    pub fn new(symbol: impl Into<String>, exchange: Exchange, ltp: f64, timestamp: i64) -> Self {
        Self {
            symbol: symbol.into(),
            exchange,
            last_traded_price: ltp,
            timestamp,
        }
    }

    /// The instrument this tick belongs to.
    pub fn instrument(&self) -> Instrument {
        Instrument::new(self.symbol.clone(), self.exchange)
    }
}

// =============================================================================
// Feed subscription protocol
// =============================================================================

/// Tick granularity requested from the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedMode {
    /// Last traded price only
    Ltp,
    /// Price plus best bid/ask
    Quote,
    /// Full market depth
    Full,
}

impl Default for FeedMode {
    fn default() -> Self {
        FeedMode::Ltp
    }
}

impl fmt::Display for FeedMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedMode::Ltp => write!(f, "ltp"),
            FeedMode::Quote => write!(f, "quote"),
            FeedMode::Full => write!(f, "full"),
        }
    }
}

/// One exchange's token list inside a subscribe/unsubscribe request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenList {
    /// Numeric exchange code (see [`Exchange::exchange_type`])
    pub exchange_type: u8,
    /// Instrument symbols on that exchange
    pub tokens: Vec<String>,
}

/// Subscription request sent to the feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedRequest {
    /// "subscribe" or "unsubscribe"
    pub action: String,
    /// Tick granularity
    pub mode: FeedMode,
    /// Instruments grouped by exchange
    pub instruments: Vec<TokenList>,
}

impl FeedRequest {
    /// Build a subscribe request for a set of instruments.
    pub fn subscribe(mode: FeedMode, instruments: &[Instrument]) -> Self {
        Self {
            action: "subscribe".to_string(),
            mode,
            instruments: Self::group_tokens(instruments),
        }
    }

    /// Build an unsubscribe request for a set of instruments.
    pub fn unsubscribe(mode: FeedMode, instruments: &[Instrument]) -> Self {
        Self {
            action: "unsubscribe".to_string(),
            mode,
            instruments: Self::group_tokens(instruments),
        }
    }

    fn group_tokens(instruments: &[Instrument]) -> Vec<TokenList> {
        let mut lists: Vec<TokenList> = Vec::new();
        for instrument in instruments {
            let code = instrument.exchange.exchange_type();
            match lists.iter_mut().find(|l| l.exchange_type == code) {
                Some(list) => list.tokens.push(instrument.symbol.clone()),
                None => lists.push(TokenList {
                    exchange_type: code,
                    tokens: vec![instrument.symbol.clone()],
                }),
            }
        }
        lists
    }
}

/// Tick message as delivered by the feed.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedTickMessage {
    pub symbol: String,
    pub exchange_type: u8,
    pub last_traded_price: f64,
    #[serde(default)]
    pub timestamp: Option<i64>,
}
