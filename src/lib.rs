//! MAX Market Data Mirror - Library
//!
//! Keeps self-healing local copies of MAX exchange websocket data: per-market
//! order books, public trades, and the authenticated account's orders,
//! balances and fills.

pub mod account;
pub mod client;
pub mod config;
pub mod error;
pub mod hedging;
pub mod metrics;
pub mod orderbook;
pub mod parser;
pub mod rest;
pub mod signing;
pub mod stream;
pub mod subscription;
pub mod trades;

pub use account::{AccountState, Balance, Order, OrderCount, OrderState, Side, Trade, TradeReport};
pub use client::{FeedStatus, MaxClient};
pub use config::{Config, Credentials, PrivateFeedMode};
pub use error::{MarketDataError, Result};
pub use hedging::{ExposureDelta, HedgingPass, HedgingReport};
pub use orderbook::{Level, LocalOrderBook, OrderBook};
pub use rest::{CancelFilter, CancelTarget, ExchangeApi, MarketInfo, MaxRestClient, OrderRequest};
pub use stream::{ErrorFlag, FeedHandler, ReconnectingStream, StreamHandle, StreamSettings};
pub use trades::PublicTradeStream;
