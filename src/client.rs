//! Client facade
//!
//! Composes the order book, private and public trade feeds over shared
//! state and exposes read/write accessors plus coordinated shutdown.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::account::{AccountState, Balance, Order, OrderCount, PrivateFeed, Side, Trade, TradeReport};
use crate::config::{Config, PrivateFeedMode};
use crate::error::{MarketDataError, Result};
use crate::hedging::HedgingPass;
use crate::orderbook::{BookFeed, Level, LocalOrderBook};
use crate::parser::PublicTrade;
use crate::rest::{CancelFilter, CancelTarget, ExchangeApi, MarketInfo, OrderRequest};
use crate::stream::{ReconnectingStream, StreamHandle, StreamSettings};
use crate::trades::{PublicTradeStream, TradeStreamFeed};

/// Health of one running feed
#[derive(Debug, Clone, Serialize)]
pub struct FeedStatus {
    pub name: String,
    pub healthy: bool,
    pub generations: u64,
    pub frames: u64,
}

pub struct MaxClient {
    config: Config,
    api: Arc<dyn ExchangeApi>,
    account: AccountState,
    books: HashMap<String, LocalOrderBook>,
    public_trades: HashMap<String, PublicTradeStream>,
    markets: RwLock<HashMap<String, MarketInfo>>,
    cancel: CancellationToken,
    handles: Mutex<Vec<StreamHandle>>,
    started: AtomicBool,
    shut_down: AtomicBool,
}

impl MaxClient {
    /// Build the client state; no network I/O happens until [`start`](Self::start)
    pub fn new(config: Config, api: Arc<dyn ExchangeApi>) -> Self {
        let books = config
            .book_markets
            .iter()
            .map(|m| (m.clone(), LocalOrderBook::new(m, config.staleness_threshold)))
            .collect();
        let public_trades = config
            .trade_markets
            .iter()
            .map(|m| (m.clone(), PublicTradeStream::new(m)))
            .collect();

        Self {
            config,
            api,
            account: AccountState::new(),
            books,
            public_trades,
            markets: RwLock::new(HashMap::new()),
            cancel: CancellationToken::new(),
            handles: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Load market metadata and spawn every configured feed
    pub async fn start(&self) -> Result<()> {
        let private = self.config.private_feed != PrivateFeedMode::Off;
        if private && self.config.credentials.is_empty() {
            return Err(MarketDataError::Config(
                "private feed requires MAX_API_KEY and MAX_API_SECRET".to_string(),
            ));
        }
        if self.started.swap(true, Ordering::SeqCst) {
            warn!("Client already started");
            return Ok(());
        }

        match self.api.get_markets().await {
            Ok(markets) => {
                info!(count = markets.len(), "Market metadata loaded");
                *self.markets.write().await = markets.into_iter().map(|m| (m.id.clone(), m)).collect();
            }
            Err(e) => warn!(error = %e, "Failed to load market metadata"),
        }

        if private {
            match self.api.get_balances().await {
                Ok(balances) => {
                    let mut book = self.account.balances.write().await;
                    for (asset, balance) in balances {
                        book.set(&asset, balance);
                    }
                }
                Err(e) => warn!(error = %e, "Failed to load initial balances"),
            }
        }
        if self.config.private_feed == PrivateFeedMode::Full {
            match self.api.get_open_orders(None).await {
                Ok(orders) => self.account.orders.write().await.apply_snapshot(orders),
                Err(e) => warn!(error = %e, "Failed to load open orders"),
            }
        }

        let mut handles = self.handles.lock().await;

        for book in self.books.values() {
            let settings = StreamSettings::from_config(&self.config, self.config.book_timings);
            let feed = BookFeed::with_book(book.clone(), self.config.book_depth);
            handles.push(ReconnectingStream::new(settings, feed).spawn(&self.cancel)?);
        }

        for stream in self.public_trades.values() {
            let settings = StreamSettings::from_config(&self.config, self.config.trade_timings);
            let feed = TradeStreamFeed::with_stream(stream.clone());
            handles.push(ReconnectingStream::new(settings, feed).spawn(&self.cancel)?);
        }

        let credentials = self.config.credentials.clone();
        match self.config.private_feed {
            PrivateFeedMode::Full => {
                let settings = StreamSettings::from_config(&self.config, self.config.private_timings);
                let feed = PrivateFeed::full(credentials, self.account.clone());
                handles.push(ReconnectingStream::new(settings, feed).spawn(&self.cancel)?);
            }
            PrivateFeedMode::TradeReport => {
                let settings = StreamSettings::from_config(&self.config, self.config.report_timings);
                let feed = PrivateFeed::trade_report(credentials, self.account.clone());
                handles.push(ReconnectingStream::new(settings, feed).spawn(&self.cancel)?);
            }
            PrivateFeedMode::Off => {}
        }

        info!(feeds = handles.len(), "Client started");
        Ok(())
    }

    pub fn book(&self, market: &str) -> Option<LocalOrderBook> {
        self.books.get(&market.to_lowercase()).cloned()
    }

    pub async fn bids(&self, market: &str) -> Option<Vec<Level>> {
        self.book(market)?.bids().await
    }

    pub async fn asks(&self, market: &str) -> Option<Vec<Level>> {
        self.book(market)?.asks().await
    }

    pub fn account(&self) -> AccountState {
        self.account.clone()
    }

    pub async fn balances(&self) -> HashMap<String, Balance> {
        self.account.balances().await
    }

    pub async fn open_orders(&self) -> Vec<Order> {
        self.account.open_orders().await
    }

    pub async fn order_count(&self, market: &str) -> OrderCount {
        self.account.order_count(&market.to_lowercase()).await
    }

    /// Drain buffered trade reports
    pub async fn trade_reports(&self) -> Vec<TradeReport> {
        self.account.take_trade_reports().await
    }

    pub async fn take_unhedged_trades(&self) -> Vec<Trade> {
        self.account.take_unhedged_trades().await
    }

    /// Drain buffered public trades of `market`
    pub async fn public_trades(&self, market: &str) -> Vec<PublicTrade> {
        match self.public_trades.get(&market.to_lowercase()) {
            Some(stream) => stream.take_trades().await,
            None => Vec::new(),
        }
    }

    pub fn hedging_pass(&self) -> HedgingPass {
        HedgingPass::new(self.account.clone())
    }

    pub async fn market_info(&self, market: &str) -> Option<MarketInfo> {
        self.markets.read().await.get(&market.to_lowercase()).cloned()
    }

    /// Child token cancelled on shutdown, for caller-owned tasks
    pub fn child_token(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    pub async fn feed_status(&self) -> Vec<FeedStatus> {
        self.handles
            .lock()
            .await
            .iter()
            .map(|h| {
                let stats = h.stats();
                FeedStatus {
                    name: h.name().to_string(),
                    healthy: !h.error_flag().is_set() && !h.is_finished(),
                    generations: stats.generations(),
                    frames: stats.frames(),
                }
            })
            .collect()
    }

    /// Place an order and lock the funds it reserves
    pub async fn place_order(&self, request: OrderRequest) -> Result<Order> {
        self.ensure_running()?;
        let order = self.api.place_order(request.clone()).await?;

        if let Some(price) = request.price {
            if let Some((asset, amount)) = self.reserved(&request.market, request.side, price, request.volume).await {
                if !self.account.lock_balance(&asset, amount).await {
                    debug!(asset = %asset, "No local balance to lock");
                }
            }
        }
        Ok(order)
    }

    /// Cancel one order and release what it still reserves
    pub async fn cancel_order(&self, target: CancelTarget) -> Result<Order> {
        self.ensure_running()?;
        let order = self.api.cancel_order(target).await?;
        self.release(&order).await;
        Ok(order)
    }

    /// Cancel every order matching `filter`
    pub async fn cancel_orders(&self, filter: CancelFilter) -> Result<Vec<Order>> {
        self.ensure_running()?;
        let orders = self.api.cancel_orders(filter).await?;
        for order in &orders {
            self.release(order).await;
        }
        Ok(orders)
    }

    /// Order writes are refused once [`shutdown`](Self::shutdown) began;
    /// shutdown itself cancels everything through the API.
    fn ensure_running(&self) -> Result<()> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(MarketDataError::NotReady("client".to_string()));
        }
        Ok(())
    }

    async fn release(&self, order: &Order) {
        let Some(price) = order.price else { return };
        if let Some((asset, amount)) = self
            .reserved(&order.market, order.side, price, order.remaining_volume)
            .await
        {
            self.account.unlock_balance(&asset, amount).await;
        }
    }

    /// Asset and amount a resting order holds: quote for buys, base for sells
    async fn reserved(&self, market: &str, side: Side, price: Decimal, volume: Decimal) -> Option<(String, Decimal)> {
        let markets = self.markets.read().await;
        let info = markets.get(&market.to_lowercase())?;
        Some(match side {
            Side::Buy => (info.quote_unit.to_lowercase(), price * volume),
            Side::Sell => (info.base_unit.to_lowercase(), volume),
        })
    }

    /// Cancel open orders, stop every feed and wait for them. Idempotent.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Shutting down client");

        if self.config.private_feed != PrivateFeedMode::Off {
            match self.api.cancel_orders(CancelFilter::default()).await {
                Ok(cancelled) => info!(count = cancelled.len(), "Cancelled open orders"),
                Err(e) => warn!(error = %e, "Failed to cancel open orders on shutdown"),
            }
        }

        self.cancel.cancel();
        let handles: Vec<StreamHandle> = self.handles.lock().await.drain(..).collect();
        for handle in handles {
            handle.stop().await;
        }
        info!("Client stopped");
    }
}
