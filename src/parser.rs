//! Parser module for MAX websocket frames
//!
//! Each feed decodes a frame exactly once into a tagged union keyed on the
//! short `e` (event) field. Unknown tags land in an `Unknown` variant so
//! the router can report them as `event not exist`.

use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use std::str::FromStr;

use crate::account::{Order, Trade};
use crate::error::{MarketDataError, Result};
use crate::orderbook::Level;

/// Order book frame (`c` = "book")
#[derive(Debug, Clone, Deserialize)]
pub struct BookFrame {
    /// Channel
    #[serde(rename = "c")]
    pub channel: String,

    /// Market
    #[serde(rename = "M")]
    pub market: String,

    /// Asks to apply
    #[serde(rename = "a", default, deserialize_with = "deserialize_price_levels")]
    pub asks: Vec<Level>,

    /// Bids to apply
    #[serde(rename = "b", default, deserialize_with = "deserialize_price_levels")]
    pub bids: Vec<Level>,

    /// Event time (milliseconds)
    #[serde(rename = "T")]
    pub timestamp: i64,
}

/// Exchange error frame
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorFrame {
    #[serde(rename = "E", default)]
    pub errors: Vec<String>,

    #[serde(rename = "i", default)]
    pub id: String,
}

impl ErrorFrame {
    pub fn message(&self) -> String {
        if self.errors.is_empty() {
            "unspecified".to_string()
        } else {
            self.errors.join("; ")
        }
    }
}

/// Events on the order book channel
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "e", rename_all = "snake_case")]
pub enum BookEvent {
    Subscribed,
    Snapshot(BookFrame),
    Update(BookFrame),
    Error(ErrorFrame),
    #[serde(other)]
    Unknown,
}

/// One trade on the public trade channel
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PublicTrade {
    #[serde(rename = "p", deserialize_with = "deserialize_decimal")]
    pub price: Decimal,

    #[serde(rename = "v", deserialize_with = "deserialize_decimal")]
    pub volume: Decimal,

    #[serde(rename = "T")]
    pub timestamp: i64,

    /// Price trend relative to the previous trade ("up" / "down")
    #[serde(rename = "tr", default)]
    pub trend: String,
}

/// Public trade frame (`c` = "trade")
#[derive(Debug, Clone, Deserialize)]
pub struct PublicTradeFrame {
    #[serde(rename = "c")]
    pub channel: String,

    #[serde(rename = "M")]
    pub market: String,

    #[serde(rename = "t", default)]
    pub trades: Vec<PublicTrade>,

    #[serde(rename = "T")]
    pub timestamp: i64,
}

/// Events on the public trade channel
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "e", rename_all = "snake_case")]
pub enum TradeStreamEvent {
    Subscribed,
    Snapshot(PublicTradeFrame),
    Update(PublicTradeFrame),
    Error(ErrorFrame),
    #[serde(other)]
    Unknown,
}

/// Order snapshot/update payload
#[derive(Debug, Clone, Deserialize)]
pub struct OrderFrame {
    #[serde(rename = "o", default)]
    pub orders: Vec<Order>,

    #[serde(rename = "T", default)]
    pub timestamp: i64,
}

/// Trade snapshot/update payload
#[derive(Debug, Clone, Deserialize)]
pub struct TradeFrame {
    #[serde(rename = "t", default)]
    pub trades: Vec<Trade>,

    #[serde(rename = "T", default)]
    pub timestamp: i64,
}

/// One asset entry of an account event
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BalanceEntry {
    #[serde(rename = "cu")]
    pub currency: String,

    #[serde(rename = "av", deserialize_with = "deserialize_decimal")]
    pub available: Decimal,

    #[serde(rename = "l", deserialize_with = "deserialize_decimal")]
    pub locked: Decimal,
}

/// Account snapshot/update payload
#[derive(Debug, Clone, Deserialize)]
pub struct AccountFrame {
    #[serde(rename = "B", default)]
    pub balances: Vec<BalanceEntry>,

    #[serde(rename = "T", default)]
    pub timestamp: i64,
}

/// Events on the authenticated private stream
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "e", rename_all = "snake_case")]
pub enum PrivateEvent {
    Authenticated,
    OrderSnapshot(OrderFrame),
    OrderUpdate(OrderFrame),
    TradeSnapshot(TradeFrame),
    TradeUpdate(TradeFrame),
    AccountSnapshot(AccountFrame),
    AccountUpdate(AccountFrame),
    Error(ErrorFrame),
    #[serde(other)]
    Unknown,
}

/// Decode a raw frame in a single pass
pub fn decode<T: DeserializeOwned>(raw: &str) -> Result<T> {
    Ok(serde_json::from_str(raw)?)
}

/// Error for a frame whose `e` tag the feed does not handle
pub fn unknown_event(raw: &str) -> MarketDataError {
    let tag = serde_json::from_str::<serde_json::Value>(raw)
        .ok()
        .and_then(|v| v.get("e").and_then(|e| e.as_str()).map(str::to_string))
        .unwrap_or_default();
    MarketDataError::UnknownEvent(tag)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDecimal {
    Text(String),
    Number(serde_json::Number),
}

impl RawDecimal {
    fn into_text(self) -> String {
        match self {
            RawDecimal::Text(s) => s,
            RawDecimal::Number(n) => n.to_string(),
        }
    }
}

fn parse_decimal<E: serde::de::Error>(text: &str) -> std::result::Result<Decimal, E> {
    Decimal::from_str(text)
        .or_else(|_| Decimal::from_scientific(text))
        .map_err(E::custom)
}

/// Decimal from a JSON string (or a bare number)
pub(crate) fn deserialize_decimal<'de, D>(deserializer: D) -> std::result::Result<Decimal, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = RawDecimal::deserialize(deserializer)?;
    parse_decimal(&raw.into_text())
}

/// Optional decimal: null, a missing key and "" all mean "absent"
pub(crate) fn deserialize_optional_decimal<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<Decimal>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<RawDecimal>::deserialize(deserializer)? {
        None => Ok(None),
        Some(raw) => {
            let text = raw.into_text();
            if text.trim().is_empty() {
                Ok(None)
            } else {
                parse_decimal(&text).map(Some)
            }
        }
    }
}

/// Price levels from an array of `[price, size]` string pairs
fn deserialize_price_levels<'de, D>(deserializer: D) -> std::result::Result<Vec<Level>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Vec<Vec<String>> = Deserialize::deserialize(deserializer)?;
    raw.into_iter()
        .map(|pair| {
            if pair.len() != 2 {
                return Err(serde::de::Error::custom("Invalid price level format"));
            }
            Ok(Level {
                price: parse_decimal(&pair[0])?,
                size: parse_decimal(&pair[1])?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::{OrderState, Side};
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_book_snapshot() {
        let raw = r#"{
            "c": "book",
            "e": "snapshot",
            "M": "btctwd",
            "a": [["101.5", "3"], ["102", "1.25"]],
            "b": [["100", "2"]],
            "T": 1659417603000
        }"#;

        match decode::<BookEvent>(raw).unwrap() {
            BookEvent::Snapshot(frame) => {
                assert_eq!(frame.market, "btctwd");
                assert_eq!(frame.asks.len(), 2);
                assert_eq!(frame.asks[0].price, dec!(101.5));
                assert_eq!(frame.bids[0].size, dec!(2));
                assert_eq!(frame.timestamp, 1659417603000);
            }
            other => panic!("Expected snapshot, got {:?}", other),
        }
    }

    #[test]
    fn test_book_update_with_missing_side() {
        let raw = r#"{"c":"book","e":"update","M":"btctwd","b":[["100","0"]],"T":1}"#;
        match decode::<BookEvent>(raw).unwrap() {
            BookEvent::Update(frame) => {
                assert!(frame.asks.is_empty());
                assert_eq!(frame.bids[0].size, Decimal::ZERO);
            }
            other => panic!("Expected update, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_event_is_captured() {
        let raw = r#"{"c":"book","e":"mystery","M":"btctwd","T":1}"#;
        assert!(matches!(decode::<BookEvent>(raw).unwrap(), BookEvent::Unknown));
        assert_eq!(unknown_event(raw).to_string(), "event not exist: mystery");
    }

    #[test]
    fn test_missing_event_tag_is_decode_error() {
        let err = decode::<BookEvent>(r#"{"c":"book","M":"btctwd"}"#).unwrap_err();
        assert_eq!(err.kind(), "decode");
    }

    #[test]
    fn test_malformed_level_is_decode_error() {
        let raw = r#"{"c":"book","e":"update","M":"btctwd","b":[["100"]],"T":1}"#;
        assert!(decode::<BookEvent>(raw).is_err());
    }

    #[test]
    fn test_parse_error_frame() {
        let raw = r#"{"e":"error","E":["invalid market"],"i":"book-btctwd","T":1}"#;
        match decode::<BookEvent>(raw).unwrap() {
            BookEvent::Error(frame) => assert_eq!(frame.message(), "invalid market"),
            other => panic!("Expected error, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_order_update() {
        let raw = r#"{
            "c": "user",
            "e": "order_update",
            "o": [{
                "i": 87, "ci": "my-order", "sd": "bid", "ot": "limit",
                "p": "21499.0", "sp": null, "ap": "21499.0", "S": "wait",
                "M": "btctwd", "T": 1659419048000, "v": "0.2658",
                "rv": "0.0658", "ev": "0.2", "tc": 1
            }],
            "T": 1659419048406
        }"#;

        match decode::<PrivateEvent>(raw).unwrap() {
            PrivateEvent::OrderUpdate(frame) => {
                let order = &frame.orders[0];
                assert_eq!(order.id, 87);
                assert_eq!(order.client_id.as_deref(), Some("my-order"));
                assert_eq!(order.side, Side::Buy);
                assert_eq!(order.state, OrderState::Wait);
                assert_eq!(order.price, Some(dec!(21499.0)));
                assert_eq!(order.stop_price, None);
                assert_eq!(order.remaining_volume, dec!(0.0658));
            }
            other => panic!("Expected order update, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_trade_and_account_events() {
        let trade = r#"{"c":"user","e":"trade_update","t":[{
            "i": 68444, "oi": 87, "p": "21499.0", "v": "0.2658", "M": "btctwd",
            "T": 1659216151000, "sd": "ask", "f": "3.2", "fc": "twd", "m": true
        }],"T":1659216151000}"#;
        match decode::<PrivateEvent>(trade).unwrap() {
            PrivateEvent::TradeUpdate(frame) => {
                assert_eq!(frame.trades[0].id, 68444);
                assert_eq!(frame.trades[0].side, Side::Sell);
                assert!(frame.trades[0].maker);
            }
            other => panic!("Expected trade update, got {:?}", other),
        }

        let account = r#"{"c":"user","e":"account_update","B":[{"cu":"btc","av":"1.5","l":"0.25"}],"T":1}"#;
        match decode::<PrivateEvent>(account).unwrap() {
            PrivateEvent::AccountUpdate(frame) => {
                assert_eq!(frame.balances[0].currency, "btc");
                assert_eq!(frame.balances[0].locked, dec!(0.25));
            }
            other => panic!("Expected account update, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_public_trades() {
        let raw = r#"{"c":"trade","e":"update","M":"btctwd","t":[{"p":"5337.3","v":"0.1","T":123456789,"tr":"up"}],"T":123456789}"#;
        match decode::<TradeStreamEvent>(raw).unwrap() {
            TradeStreamEvent::Update(frame) => {
                assert_eq!(frame.trades.len(), 1);
                assert_eq!(frame.trades[0].volume, dec!(0.1));
                assert_eq!(frame.trades[0].trend, "up");
            }
            other => panic!("Expected trade update, got {:?}", other),
        }
    }
}
