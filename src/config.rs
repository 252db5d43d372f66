//! Configuration module for the market data mirror

use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{MarketDataError, Result};

/// API credentials for the private feeds and the REST collaborator
#[derive(Clone, Default)]
pub struct Credentials {
    pub api_key: String,
    pub api_secret: String,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.api_key.is_empty() || self.api_secret.is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .finish()
    }
}

/// Which private stream the client runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrivateFeedMode {
    /// Orders, trades and balances
    Full,
    /// Trades only (`filters: ["trade"]`)
    TradeReport,
    Off,
}

impl FromStr for PrivateFeedMode {
    type Err = MarketDataError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "full" => Ok(PrivateFeedMode::Full),
            "trade_report" | "trade-report" => Ok(PrivateFeedMode::TradeReport),
            "off" | "none" => Ok(PrivateFeedMode::Off),
            other => Err(MarketDataError::Config(format!(
                "unknown PRIVATE_FEED value: {}",
                other
            ))),
        }
    }
}

/// Heartbeat and read-deadline pair for one kind of feed
#[derive(Debug, Clone, Copy)]
pub struct FeedTimings {
    pub heartbeat_interval: Duration,
    pub read_timeout: Duration,
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Streaming endpoint shared by every feed
    pub ws_endpoint: String,

    /// REST endpoint for the order/account collaborator
    pub rest_endpoint: String,

    pub credentials: Credentials,

    /// Markets with a local order book (lowercase, e.g. "btctwd")
    pub book_markets: Vec<String>,

    /// Markets with a public trade feed
    pub trade_markets: Vec<String>,

    /// Depth requested by every order book subscription
    pub book_depth: u32,

    pub private_feed: PrivateFeedMode,

    /// Connection settings
    pub dial_timeout: Duration,
    pub retry_backoff: Duration,
    pub reconnect_jitter_min: Duration,
    pub reconnect_jitter_max: Duration,

    /// Book events older than this force a reconnect
    pub staleness_threshold: Duration,

    pub book_timings: FeedTimings,
    pub trade_timings: FeedTimings,
    pub private_timings: FeedTimings,
    pub report_timings: FeedTimings,

    pub hedge_interval: Duration,

    /// Port for the health/metrics server
    pub health_port: u16,
}

impl Config {
    /// Load configuration from environment variables
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        let private_feed = match env::var("PRIVATE_FEED") {
            Ok(value) => value.parse()?,
            Err(_) => defaults.private_feed,
        };

        let config = Self {
            ws_endpoint: env::var("MAX_WS_ENDPOINT").unwrap_or(defaults.ws_endpoint),
            rest_endpoint: env::var("MAX_REST_ENDPOINT").unwrap_or(defaults.rest_endpoint),
            credentials: Credentials::new(
                env::var("MAX_API_KEY").unwrap_or_default(),
                env::var("MAX_API_SECRET").unwrap_or_default(),
            ),
            book_markets: markets_var("BOOK_MARKETS", defaults.book_markets),
            trade_markets: markets_var("TRADE_MARKETS", defaults.trade_markets),
            book_depth: parsed_var("BOOK_DEPTH", defaults.book_depth),
            private_feed,
            dial_timeout: millis_var("DIAL_TIMEOUT_MS", defaults.dial_timeout),
            retry_backoff: millis_var("RETRY_BACKOFF_MS", defaults.retry_backoff),
            reconnect_jitter_min: millis_var("RECONNECT_JITTER_MIN_MS", defaults.reconnect_jitter_min),
            reconnect_jitter_max: millis_var("RECONNECT_JITTER_MAX_MS", defaults.reconnect_jitter_max),
            staleness_threshold: millis_var("STALENESS_THRESHOLD_MS", defaults.staleness_threshold),
            book_timings: timings_var("BOOK", defaults.book_timings),
            trade_timings: timings_var("TRADE", defaults.trade_timings),
            private_timings: timings_var("PRIVATE", defaults.private_timings),
            report_timings: timings_var("REPORT", defaults.report_timings),
            hedge_interval: millis_var("HEDGE_INTERVAL_MS", defaults.hedge_interval),
            health_port: parsed_var("HEALTH_PORT", defaults.health_port),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject durations that would spin or panic a timer
    pub fn validate(&self) -> Result<()> {
        let mut durations = vec![
            ("DIAL_TIMEOUT_MS".to_string(), self.dial_timeout),
            ("STALENESS_THRESHOLD_MS".to_string(), self.staleness_threshold),
            ("HEDGE_INTERVAL_MS".to_string(), self.hedge_interval),
        ];
        for (prefix, timings) in [
            ("BOOK", self.book_timings),
            ("TRADE", self.trade_timings),
            ("PRIVATE", self.private_timings),
            ("REPORT", self.report_timings),
        ] {
            durations.push((format!("{}_HEARTBEAT_SECS", prefix), timings.heartbeat_interval));
            durations.push((format!("{}_READ_TIMEOUT_SECS", prefix), timings.read_timeout));
        }

        match durations.into_iter().find(|(_, d)| d.is_zero()) {
            Some((key, _)) => Err(MarketDataError::Config(format!("{} must be greater than zero", key))),
            None => Ok(()),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ws_endpoint: "wss://max-stream.maicoin.com/ws".to_string(),
            rest_endpoint: "https://max-api.maicoin.com".to_string(),
            credentials: Credentials::default(),
            book_markets: vec!["usdttwd".to_string()],
            trade_markets: Vec::new(),
            book_depth: 10,
            private_feed: PrivateFeedMode::Full,
            dial_timeout: Duration::from_secs(5),
            retry_backoff: Duration::from_millis(1000),
            reconnect_jitter_min: Duration::from_millis(200),
            reconnect_jitter_max: Duration::from_millis(500),
            staleness_threshold: Duration::from_millis(5000),
            book_timings: FeedTimings {
                heartbeat_interval: Duration::from_secs(30),
                read_timeout: Duration::from_secs(30),
            },
            trade_timings: FeedTimings {
                heartbeat_interval: Duration::from_secs(30),
                read_timeout: Duration::from_secs(60),
            },
            private_timings: FeedTimings {
                heartbeat_interval: Duration::from_secs(60),
                read_timeout: Duration::from_secs(300),
            },
            report_timings: FeedTimings {
                heartbeat_interval: Duration::from_secs(120),
                read_timeout: Duration::from_secs(300),
            },
            hedge_interval: Duration::from_millis(1000),
            health_port: 9090,
        }
    }
}

fn parsed_var<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn millis_var(key: &str, default: Duration) -> Duration {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}

fn secs_var(key: &str, default: Duration) -> Duration {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

fn timings_var(prefix: &str, default: FeedTimings) -> FeedTimings {
    FeedTimings {
        heartbeat_interval: secs_var(&format!("{}_HEARTBEAT_SECS", prefix), default.heartbeat_interval),
        read_timeout: secs_var(&format!("{}_READ_TIMEOUT_SECS", prefix), default.read_timeout),
    }
}

fn markets_var(key: &str, default: Vec<String>) -> Vec<String> {
    match env::var(key) {
        Ok(raw) => parse_markets(&raw),
        Err(_) => default,
    }
}

/// Split a comma separated market list into lowercase market ids
pub fn parse_markets(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_markets() {
        assert_eq!(parse_markets(" BTCTWD, usdttwd ,,"), vec!["btctwd", "usdttwd"]);
        assert!(parse_markets("").is_empty());
    }

    #[test]
    fn test_private_feed_mode() {
        assert_eq!("full".parse::<PrivateFeedMode>().unwrap(), PrivateFeedMode::Full);
        assert_eq!(
            "Trade_Report".parse::<PrivateFeedMode>().unwrap(),
            PrivateFeedMode::TradeReport
        );
        assert!("sometimes".parse::<PrivateFeedMode>().is_err());
    }

    #[test]
    fn test_credentials_debug_redacts_secret() {
        let creds = Credentials::new("key", "very-secret");
        let printed = format!("{:?}", creds);
        assert!(printed.contains("key"));
        assert!(!printed.contains("very-secret"));
    }

    #[test]
    fn test_zero_durations_are_rejected() {
        assert!(Config::default().validate().is_ok());

        let mut config = Config::default();
        config.hedge_interval = Duration::ZERO;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("HEDGE_INTERVAL_MS"));

        let mut config = Config::default();
        config.trade_timings.heartbeat_interval = Duration::ZERO;
        let err = config.validate().unwrap_err();
        assert_eq!(err.kind(), "config");
        assert!(err.to_string().contains("TRADE_HEARTBEAT_SECS"));
    }

    #[test]
    fn test_defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.book_depth, 10);
        assert_eq!(config.dial_timeout, Duration::from_secs(5));
        assert_eq!(config.staleness_threshold, Duration::from_millis(5000));
        assert!(config.reconnect_jitter_min <= config.reconnect_jitter_max);
    }
}
