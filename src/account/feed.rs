//! Authenticated private stream
//!
//! Full mode mirrors orders, balances and trades; trade-report mode only
//! subscribes to trades.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::AccountState;
use crate::config::Credentials;
use crate::error::{MarketDataError, Result};
use crate::parser::{self, PrivateEvent};
use crate::rest::{CancelFilter, ExchangeApi};
use crate::stream::FeedHandler;
use crate::subscription;

const TRADE_FILTER: &[&str] = &["trade"];

pub struct PrivateFeed {
    name: String,
    credentials: Credentials,
    trades_only: bool,
    state: AccountState,
    shutdown_api: Option<Arc<dyn ExchangeApi>>,
}

impl PrivateFeed {
    /// Orders, trades and balances
    pub fn full(credentials: Credentials, state: AccountState) -> Self {
        Self {
            name: "private".to_string(),
            credentials,
            trades_only: false,
            state,
            shutdown_api: None,
        }
    }

    /// Trades only, for trade reports
    pub fn trade_report(credentials: Credentials, state: AccountState) -> Self {
        Self {
            name: "trade-report".to_string(),
            credentials,
            trades_only: true,
            state,
            shutdown_api: None,
        }
    }

    /// Cancel every open order through `api` when the stream is stopped
    pub fn with_shutdown_api(mut self, api: Arc<dyn ExchangeApi>) -> Self {
        self.shutdown_api = Some(api);
        self
    }

    pub fn state(&self) -> AccountState {
        self.state.clone()
    }

    fn full_only(&self, raw: &str) -> Result<()> {
        if self.trades_only {
            Err(parser::unknown_event(raw))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl FeedHandler for PrivateFeed {
    fn name(&self) -> &str {
        &self.name
    }

    fn subscribe_frame(&self) -> Result<String> {
        let filters = self.trades_only.then_some(TRADE_FILTER);
        subscription::auth_frame(&self.credentials, &self.name, filters)
    }

    async fn route(&self, raw: &str) -> Result<()> {
        match parser::decode::<PrivateEvent>(raw)? {
            PrivateEvent::Authenticated => {
                info!(feed = %self.name, "Private stream authenticated");
            }
            PrivateEvent::OrderSnapshot(frame) => {
                self.full_only(raw)?;
                debug!(count = frame.orders.len(), "Order snapshot");
                self.state.orders.write().await.apply_snapshot(frame.orders);
            }
            PrivateEvent::OrderUpdate(frame) => {
                self.full_only(raw)?;
                let mut orders = self.state.orders.write().await;
                for order in frame.orders {
                    orders.apply_update(order);
                }
            }
            PrivateEvent::AccountSnapshot(frame) => {
                self.full_only(raw)?;
                self.state.balances.write().await.apply_snapshot(frame.balances);
            }
            PrivateEvent::AccountUpdate(frame) => {
                self.full_only(raw)?;
                self.state.balances.write().await.apply_update(frame.balances);
            }
            PrivateEvent::TradeSnapshot(frame) => {
                let emitted = self.state.trades.write().await.reconcile_snapshot(frame.trades);
                debug!(feed = %self.name, emitted = emitted.len(), "Trade snapshot reconciled");
            }
            PrivateEvent::TradeUpdate(frame) => {
                let emitted = self.state.trades.write().await.record_updates(frame.trades);
                for trade in &emitted {
                    info!(
                        trade_id = trade.id,
                        market = %trade.market,
                        side = trade.side.as_str(),
                        price = %trade.price,
                        volume = %trade.volume,
                        "Trade update"
                    );
                }
            }
            PrivateEvent::Error(frame) => return Err(MarketDataError::Exchange(frame.message())),
            PrivateEvent::Unknown => return Err(parser::unknown_event(raw)),
        }
        Ok(())
    }

    async fn on_disconnect(&self) {
        self.state.trades.write().await.stash_for_reconnect();
    }

    async fn on_shutdown(&self) {
        if let Some(api) = &self.shutdown_api {
            match api.cancel_orders(CancelFilter::default()).await {
                Ok(cancelled) => info!(count = cancelled.len(), "Cancelled open orders on shutdown"),
                Err(e) => warn!(error = %e, "Failed to cancel open orders on shutdown"),
            }
        }
    }
}
