use crate::types::{Exchange, FeedMode, Instrument};
use std::env;

/// Market feed configuration.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Upstream WebSocket URL; when absent the simulated feed runs instead.
    pub url: Option<String>,
    /// Tick granularity requested on subscribe.
    pub mode: FeedMode,
    /// Instruments subscribed regardless of resting orders.
    pub default_instruments: Vec<Instrument>,
    /// Simulated feed: delay between tick rounds (ms).
    pub sim_tick_interval_ms: u64,
    /// Simulated feed: starting price per instrument.
    pub sim_start_price: f64,
}

/// Lifecycle boundary configuration.
#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    /// Intraday square-off cutoff hour (UTC).
    pub square_off_hour: u32,
    /// Intraday square-off cutoff minute (UTC).
    pub square_off_minute: u32,
    /// Delivery hold window before holding conversion (ms).
    pub delivery_hold_ms: i64,
    /// Seconds between sweep cycles.
    pub sweep_interval_secs: u64,
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host address.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// SQLite database path.
    pub sqlite_path: String,
    /// Redis URL for the resting-order fast path (optional).
    pub redis_url: Option<String>,
    /// Market feed settings.
    pub feed: FeedConfig,
    /// Lifecycle boundaries.
    pub lifecycle: LifecycleSettings,
    /// Storage write attempts before an execution fails.
    pub max_persist_attempts: u32,
    /// First persistence retry backoff (ms).
    pub persist_backoff_ms: u64,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(3002),
            sqlite_path: env::var("SQLITE_PATH").unwrap_or_else(|_| "squareoff.db".to_string()),
            redis_url: env::var("REDIS_URL").ok(),
            feed: FeedConfig {
                url: env::var("FEED_URL").ok(),
                mode: match env::var("FEED_MODE").as_deref() {
                    Ok("quote") => FeedMode::Quote,
                    Ok("full") => FeedMode::Full,
                    _ => FeedMode::Ltp,
                },
                default_instruments: env::var("FEED_INSTRUMENTS")
                    .ok()
                    .map(|s| parse_instruments(&s))
                    .unwrap_or_default(),
                sim_tick_interval_ms: env::var("SIM_TICK_INTERVAL_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(500),
                sim_start_price: env::var("SIM_START_PRICE")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(100.0),
            },
            lifecycle: LifecycleSettings {
                square_off_hour: env::var("SQUARE_OFF_HOUR")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(15),
                square_off_minute: env::var("SQUARE_OFF_MINUTE")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(15),
                delivery_hold_ms: env::var("DELIVERY_HOLD_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(24 * 60 * 60 * 1000),
                sweep_interval_secs: env::var("SWEEP_INTERVAL_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(30),
            },
            max_persist_attempts: env::var("MAX_PERSIST_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3),
            persist_backoff_ms: env::var("PERSIST_BACKOFF_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(50),
        }
    }
}

/// Parse an instrument list of the form
/// `"primary:RELIANCE,derivative:NIFTYFUT"`.
fn parse_instruments(s: &str) -> Vec<Instrument> {
    s.split(',')
        .filter_map(|pair| {
            let mut parts = pair.splitn(2, ':');
            let exchange = match parts.next()?.trim().to_lowercase().as_str() {
                "primary" => Exchange::Primary,
                "secondary" => Exchange::Secondary,
                "derivative" => Exchange::Derivative,
                _ => return None,
            };
            let symbol = parts.next()?.trim();
            if symbol.is_empty() {
                return None;
            }
            Some(Instrument::new(symbol.to_uppercase(), exchange))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_instruments() {
        let instruments = parse_instruments("primary:RELIANCE, derivative:niftyfut");
        assert_eq!(instruments.len(), 2);
        assert_eq!(instruments[0].symbol, "RELIANCE");
        assert_eq!(instruments[0].exchange, Exchange::Primary);
        assert_eq!(instruments[1].symbol, "NIFTYFUT");
        assert_eq!(instruments[1].exchange, Exchange::Derivative);
    }

    #[test]
    fn test_parse_instruments_skips_malformed() {
        let instruments = parse_instruments("bogus:ACME,primary:,primary:GOOD");
        assert_eq!(instruments.len(), 1);
        assert_eq!(instruments[0].symbol, "GOOD");
    }
}
