//! Error types for the market data mirror

use thiserror::Error;

/// Market data mirror errors
///
/// Every per-frame variant ends the current connection generation; the
/// reconnect loop is the only recovery path.
#[derive(Error, Debug)]
pub enum MarketDataError {
    #[error("Failed to dial {endpoint}: {reason}")]
    Dial { endpoint: String, reason: String },

    #[error("Failed to send subscription: {0}")]
    Subscribe(String),

    #[error("Failed to decode frame: {0}")]
    Decode(String),

    #[error("Unexpected frame: {0}")]
    Semantic(String),

    #[error("event not exist: {0}")]
    UnknownEvent(String),

    #[error("Stale book event: event time {event_ms} is {lag_ms}ms behind")]
    Stale { event_ms: i64, lag_ms: i64 },

    #[error("WebSocket connection closed: {0}")]
    ConnectionClosed(String),

    #[error("No frame received within {0}ms")]
    ReadTimeout(u64),

    #[error("Exchange reported error: {0}")]
    Exchange(String),

    #[error("Corrupt snapshot: {0}")]
    CorruptSnapshot(String),

    #[error("REST API error: {0}")]
    RestApi(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Signing error: {0}")]
    Signing(String),

    #[error("{0} is not ready")]
    NotReady(String),
}

impl MarketDataError {
    /// Transport-level connect failures get the longer retry backoff.
    pub fn is_dial(&self) -> bool {
        matches!(self, MarketDataError::Dial { .. })
    }

    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            MarketDataError::Dial { .. } => "dial",
            MarketDataError::Subscribe(_) => "subscribe",
            MarketDataError::Decode(_) => "decode",
            MarketDataError::Semantic(_) => "semantic",
            MarketDataError::UnknownEvent(_) => "unknown_event",
            MarketDataError::Stale { .. } => "stale",
            MarketDataError::ConnectionClosed(_) => "closed",
            MarketDataError::ReadTimeout(_) => "read_timeout",
            MarketDataError::Exchange(_) => "exchange",
            MarketDataError::CorruptSnapshot(_) => "corrupt_snapshot",
            MarketDataError::RestApi(_) => "rest",
            MarketDataError::Config(_) => "config",
            MarketDataError::Serialization(_) => "serialization",
            MarketDataError::Signing(_) => "signing",
            MarketDataError::NotReady(_) => "not_ready",
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for MarketDataError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        MarketDataError::ConnectionClosed(err.to_string())
    }
}

impl From<serde_json::Error> for MarketDataError {
    fn from(err: serde_json::Error) -> Self {
        MarketDataError::Decode(err.to_string())
    }
}

impl From<reqwest::Error> for MarketDataError {
    fn from(err: reqwest::Error) -> Self {
        MarketDataError::RestApi(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MarketDataError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dial_classification() {
        let err = MarketDataError::Dial {
            endpoint: "wss://example".to_string(),
            reason: "refused".to_string(),
        };
        assert!(err.is_dial());
        assert_eq!(err.kind(), "dial");
        assert!(!MarketDataError::ReadTimeout(30_000).is_dial());
    }

    #[test]
    fn test_json_errors_become_decode_errors() {
        let err: MarketDataError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert_eq!(err.kind(), "decode");
    }
}
