//! Outbound `sub` / `auth` frames

use serde::Serialize;

use crate::config::Credentials;
use crate::error::{MarketDataError, Result};
use crate::signing;

/// One channel subscription
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Subscription {
    pub channel: String,
    pub market: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depth: Option<u32>,
}

#[derive(Debug, Serialize)]
struct SubscribeFrame<'a> {
    action: &'static str,
    subscriptions: &'a [Subscription],
    id: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AuthFrame<'a> {
    action: &'static str,
    api_key: &'a str,
    nonce: i64,
    signature: String,
    id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    filters: Option<&'a [&'a str]>,
}

fn encode<T: Serialize>(frame: &T) -> Result<String> {
    serde_json::to_string(frame).map_err(|e| MarketDataError::Serialization(e.to_string()))
}

/// `sub` frame for a single order book
pub fn book_subscription(market: &str, depth: u32) -> Result<String> {
    let subscriptions = [Subscription {
        channel: "book".to_string(),
        market: market.to_string(),
        depth: Some(depth),
    }];
    encode(&SubscribeFrame {
        action: "sub",
        subscriptions: &subscriptions,
        id: &format!("book-{}", market),
    })
}

/// `sub` frame for a market's public trades
pub fn trade_subscription(market: &str) -> Result<String> {
    let subscriptions = [Subscription {
        channel: "trade".to_string(),
        market: market.to_string(),
        depth: None,
    }];
    encode(&SubscribeFrame {
        action: "sub",
        subscriptions: &subscriptions,
        id: &format!("trade-{}", market),
    })
}

/// `auth` frame signed with a fresh nonce.
///
/// `filters` restricts the private stream to the named event families.
pub fn auth_frame(credentials: &Credentials, id: &str, filters: Option<&[&str]>) -> Result<String> {
    auth_frame_with_nonce(credentials, id, filters, signing::nonce_millis())
}

pub(crate) fn auth_frame_with_nonce(
    credentials: &Credentials,
    id: &str,
    filters: Option<&[&str]>,
    nonce: i64,
) -> Result<String> {
    if credentials.is_empty() {
        return Err(MarketDataError::Config(
            "private stream requires an API key and secret".to_string(),
        ));
    }
    let signature = signing::sign_nonce(&credentials.api_secret, nonce)?;
    encode(&AuthFrame {
        action: "auth",
        api_key: &credentials.api_key,
        nonce,
        signature,
        id,
        filters,
    })
}
