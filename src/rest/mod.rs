//! REST collaborator
//!
//! Order entry and account queries the feeds and the client facade rely on.

mod client;

pub use client::MaxRestClient;

use std::collections::HashMap;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::account::{Balance, Order, OrderState, Side};
use crate::error::Result;
use crate::parser::{deserialize_decimal, deserialize_optional_decimal};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Limit,
    Market,
    PostOnly,
    StopLimit,
    StopMarket,
}

/// Parameters of a new order
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub market: String,
    pub side: Side,
    pub volume: Decimal,
    pub price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub order_type: OrderType,
    pub client_id: Option<String>,
}

impl OrderRequest {
    pub fn limit(market: &str, side: Side, price: Decimal, volume: Decimal) -> Self {
        Self {
            market: market.to_lowercase(),
            side,
            volume,
            price: Some(price),
            stop_price: None,
            order_type: OrderType::Limit,
            client_id: None,
        }
    }

    pub fn post_only(market: &str, side: Side, price: Decimal, volume: Decimal) -> Self {
        Self {
            order_type: OrderType::PostOnly,
            ..Self::limit(market, side, price, volume)
        }
    }

    pub fn market(market: &str, side: Side, volume: Decimal) -> Self {
        Self {
            market: market.to_lowercase(),
            side,
            volume,
            price: None,
            stop_price: None,
            order_type: OrderType::Market,
            client_id: None,
        }
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }
}

/// Which order to cancel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelTarget {
    Id(i64),
    ClientId(String),
}

/// Scope of a bulk cancel; empty means every open order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CancelFilter {
    pub market: Option<String>,
    pub side: Option<Side>,
}

/// Market metadata from `/api/v2/markets`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MarketInfo {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub base_unit: String,
    #[serde(default)]
    pub base_unit_precision: u32,
    pub quote_unit: String,
    #[serde(default)]
    pub quote_unit_precision: u32,
}

/// Order as returned by the REST API
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RestOrder {
    id: i64,
    #[serde(default)]
    client_oid: Option<String>,
    side: Side,
    #[serde(default)]
    ord_type: String,
    #[serde(default, deserialize_with = "deserialize_optional_decimal")]
    price: Option<Decimal>,
    #[serde(default, deserialize_with = "deserialize_optional_decimal")]
    stop_price: Option<Decimal>,
    #[serde(default, deserialize_with = "deserialize_optional_decimal")]
    avg_price: Option<Decimal>,
    state: OrderState,
    market: String,
    #[serde(default)]
    created_at_in_ms: i64,
    #[serde(deserialize_with = "deserialize_decimal")]
    volume: Decimal,
    #[serde(deserialize_with = "deserialize_decimal")]
    remaining_volume: Decimal,
    #[serde(deserialize_with = "deserialize_decimal")]
    executed_volume: Decimal,
    #[serde(default)]
    trades_count: u64,
}

impl From<RestOrder> for Order {
    fn from(o: RestOrder) -> Self {
        Order {
            id: o.id,
            client_id: o.client_oid,
            side: o.side,
            order_type: o.ord_type,
            price: o.price,
            stop_price: o.stop_price,
            average_price: o.avg_price,
            state: o.state,
            market: o.market,
            created_at: o.created_at_in_ms,
            volume: o.volume,
            remaining_volume: o.remaining_volume,
            executed_volume: o.executed_volume,
            trades_count: o.trades_count,
        }
    }
}

/// Account entry from `/api/v2/members/accounts`
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RestAccount {
    currency: String,
    #[serde(deserialize_with = "deserialize_decimal")]
    balance: Decimal,
    #[serde(deserialize_with = "deserialize_decimal")]
    locked: Decimal,
}

pub(crate) fn balances_from_accounts(accounts: Vec<RestAccount>) -> HashMap<String, Balance> {
    accounts
        .into_iter()
        .map(|a| {
            (
                a.currency.to_lowercase(),
                Balance {
                    available: a.balance,
                    locked: a.locked,
                },
            )
        })
        .collect()
}

/// Exchange REST operations
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExchangeApi: Send + Sync {
    async fn place_order(&self, request: OrderRequest) -> Result<Order>;

    async fn cancel_order(&self, target: CancelTarget) -> Result<Order>;

    async fn cancel_orders(&self, filter: CancelFilter) -> Result<Vec<Order>>;

    async fn get_balances(&self) -> Result<HashMap<String, Balance>>;

    async fn get_markets(&self) -> Result<Vec<MarketInfo>>;

    /// Open orders, optionally of one market
    async fn get_open_orders(&self, market: Option<String>) -> Result<Vec<Order>>;
}
