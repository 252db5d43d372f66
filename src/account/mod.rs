//! Account state tracking
//!
//! Open orders, balances and own trades as reported by the private stream,
//! each behind its own lock.

mod balances;
mod feed;
mod orders;
mod trades;

pub use balances::{Balance, BalanceBook};
pub use feed::PrivateFeed;
pub use orders::{OrderCount, OrderTracker};
pub use trades::{TradeLedger, TradeReport, HISTORY_CAPACITY};

use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::parser::{deserialize_decimal, deserialize_optional_decimal};

/// Order side. The stream also reports `bid` / `ask`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    #[serde(alias = "bid")]
    Buy,
    #[serde(alias = "ask")]
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

/// Order lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderState {
    Wait,
    Done,
    Cancel,
    /// Stop order triggered
    Convert,
    /// Any other non-terminal state the exchange reports
    #[serde(other)]
    Other,
}

impl OrderState {
    /// `done` and `cancel` remove the order from the open set
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderState::Done | OrderState::Cancel)
    }
}

/// Open order as carried by `order_snapshot` / `order_update`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Order {
    #[serde(rename = "i")]
    pub id: i64,

    #[serde(rename = "ci", default)]
    pub client_id: Option<String>,

    #[serde(rename = "sd")]
    pub side: Side,

    #[serde(rename = "ot", default)]
    pub order_type: String,

    #[serde(rename = "p", default, deserialize_with = "deserialize_optional_decimal")]
    pub price: Option<Decimal>,

    #[serde(rename = "sp", default, deserialize_with = "deserialize_optional_decimal")]
    pub stop_price: Option<Decimal>,

    #[serde(rename = "ap", default, deserialize_with = "deserialize_optional_decimal")]
    pub average_price: Option<Decimal>,

    #[serde(rename = "S")]
    pub state: OrderState,

    #[serde(rename = "M")]
    pub market: String,

    /// Creation time (ms)
    #[serde(rename = "T", default)]
    pub created_at: i64,

    #[serde(rename = "v", deserialize_with = "deserialize_decimal")]
    pub volume: Decimal,

    #[serde(rename = "rv", deserialize_with = "deserialize_decimal")]
    pub remaining_volume: Decimal,

    #[serde(rename = "ev", deserialize_with = "deserialize_decimal")]
    pub executed_volume: Decimal,

    #[serde(rename = "tc", default)]
    pub trades_count: u64,
}

/// Own trade as carried by `trade_snapshot` / `trade_update`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Trade {
    #[serde(rename = "i")]
    pub id: i64,

    #[serde(rename = "oi")]
    pub order_id: i64,

    #[serde(rename = "p", deserialize_with = "deserialize_decimal")]
    pub price: Decimal,

    #[serde(rename = "v", deserialize_with = "deserialize_decimal")]
    pub volume: Decimal,

    #[serde(rename = "M")]
    pub market: String,

    /// Execution time (ms)
    #[serde(rename = "T")]
    pub timestamp: i64,

    #[serde(rename = "sd")]
    pub side: Side,

    #[serde(rename = "f", default, deserialize_with = "deserialize_decimal")]
    pub fee: Decimal,

    #[serde(rename = "fc", default)]
    pub fee_currency: String,

    #[serde(rename = "m", default)]
    pub maker: bool,
}

/// Shared account state, one lock per collection
#[derive(Debug, Clone, Default)]
pub struct AccountState {
    pub orders: Arc<RwLock<OrderTracker>>,
    pub balances: Arc<RwLock<BalanceBook>>,
    pub trades: Arc<RwLock<TradeLedger>>,
}

impl AccountState {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn open_orders(&self) -> Vec<Order> {
        self.orders.read().await.open_orders()
    }

    pub async fn order_count(&self, market: &str) -> OrderCount {
        self.orders.read().await.count(market)
    }

    pub async fn balances(&self) -> HashMap<String, Balance> {
        self.balances.read().await.all()
    }

    /// Optimistically move `amount` of `asset` from available to locked
    pub async fn lock_balance(&self, asset: &str, amount: Decimal) -> bool {
        self.balances.write().await.lock(asset, amount)
    }

    /// Optimistically move `amount` of `asset` from locked back to available
    pub async fn unlock_balance(&self, asset: &str, amount: Decimal) -> bool {
        self.balances.write().await.unlock(asset, amount)
    }

    /// Drain the unhedged queue into the trade history
    pub async fn take_unhedged_trades(&self) -> Vec<Trade> {
        self.trades.write().await.take_unhedged()
    }

    /// Drain the trade-report buffer
    pub async fn take_trade_reports(&self) -> Vec<TradeReport> {
        self.trades.write().await.take_reports()
    }

    pub async fn trade_history(&self) -> Vec<Trade> {
        self.trades.read().await.history()
    }
}
