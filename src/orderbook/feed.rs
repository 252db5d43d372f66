//! Order book feed
//!
//! Routes `book` channel frames for one market into a shared local book.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::{Level, OrderBook};
use crate::error::{MarketDataError, Result};
use crate::metrics::feed_metrics;
use crate::parser::{self, BookEvent, BookFrame};
use crate::stream::FeedHandler;
use crate::subscription;

/// Shared, lock-protected order book of one market
#[derive(Debug, Clone)]
pub struct LocalOrderBook {
    market: String,
    book: Arc<RwLock<OrderBook>>,
    staleness_threshold_ms: i64,
}

impl LocalOrderBook {
    pub fn new(market: &str, staleness_threshold: Duration) -> Self {
        Self {
            market: market.to_lowercase(),
            book: Arc::new(RwLock::new(OrderBook::new())),
            staleness_threshold_ms: staleness_threshold.as_millis() as i64,
        }
    }

    pub fn market(&self) -> &str {
        &self.market
    }

    /// Bid levels, best first; `None` until the side has data
    pub async fn bids(&self) -> Option<Vec<Level>> {
        let bids = self.book.read().await.bids();
        (!bids.is_empty()).then_some(bids)
    }

    /// Ask levels, best first; `None` until the side has data
    pub async fn asks(&self) -> Option<Vec<Level>> {
        let asks = self.book.read().await.asks();
        (!asks.is_empty()).then_some(asks)
    }

    pub async fn mid_price(&self) -> Option<Decimal> {
        self.book.read().await.mid_price()
    }

    pub async fn last_update_timestamp(&self) -> i64 {
        self.book.read().await.last_update_ms()
    }

    /// Drop all levels
    pub async fn close(&self) {
        self.book.write().await.clear();
    }

    async fn apply_snapshot(&self, frame: BookFrame, now_ms: i64) -> Result<()> {
        self.book
            .write()
            .await
            .apply_snapshot(frame.bids, frame.asks, frame.timestamp)?;
        info!(market = %self.market, timestamp = frame.timestamp, "Order book snapshot applied");
        self.check_lag(frame.timestamp, now_ms)
    }

    async fn apply_update(&self, frame: BookFrame, now_ms: i64) -> Result<()> {
        let applied = self
            .book
            .write()
            .await
            .apply_update(&frame.bids, &frame.asks, frame.timestamp);

        if !applied {
            debug!(market = %self.market, timestamp = frame.timestamp, "Discarding out-of-order book update");
            return Ok(());
        }
        self.check_lag(frame.timestamp, now_ms)
    }

    /// Data is kept either way; a lagging event only forces a reconnect.
    fn check_lag(&self, event_ms: i64, now_ms: i64) -> Result<()> {
        let lag_ms = now_ms - event_ms;
        if lag_ms > self.staleness_threshold_ms {
            feed_metrics()
                .stale_events
                .with_label_values(&[self.market.as_str()])
                .inc();
            warn!(market = %self.market, lag_ms, "Book event is stale, forcing reconnect");
            return Err(MarketDataError::Stale { event_ms, lag_ms });
        }
        Ok(())
    }
}

/// Order book feed handler for one market
pub struct BookFeed {
    name: String,
    depth: u32,
    book: LocalOrderBook,
}

impl BookFeed {
    pub fn new(market: &str, depth: u32, staleness_threshold: Duration) -> Self {
        Self::with_book(LocalOrderBook::new(market, staleness_threshold), depth)
    }

    /// Feed an existing book handle
    pub fn with_book(book: LocalOrderBook, depth: u32) -> Self {
        Self {
            name: format!("book-{}", book.market()),
            depth,
            book,
        }
    }

    /// Handle to the book this feed maintains
    pub fn book(&self) -> LocalOrderBook {
        self.book.clone()
    }

    fn validate(&self, frame: &BookFrame) -> Result<()> {
        if frame.channel != "book" {
            return Err(MarketDataError::Semantic(format!(
                "expected channel book, got {}",
                frame.channel
            )));
        }
        if frame.market != self.book.market {
            return Err(MarketDataError::Semantic(format!(
                "expected market {}, got {}",
                self.book.market, frame.market
            )));
        }
        Ok(())
    }

    async fn route_at(&self, raw: &str, now_ms: i64) -> Result<()> {
        match parser::decode::<BookEvent>(raw)? {
            BookEvent::Subscribed => {
                info!(feed = %self.name, "Order book subscription confirmed");
                Ok(())
            }
            BookEvent::Snapshot(frame) => {
                self.validate(&frame)?;
                self.book.apply_snapshot(frame, now_ms).await
            }
            BookEvent::Update(frame) => {
                self.validate(&frame)?;
                self.book.apply_update(frame, now_ms).await
            }
            BookEvent::Error(frame) => Err(MarketDataError::Exchange(frame.message())),
            BookEvent::Unknown => Err(parser::unknown_event(raw)),
        }
    }
}

#[async_trait]
impl FeedHandler for BookFeed {
    fn name(&self) -> &str {
        &self.name
    }

    fn subscribe_frame(&self) -> Result<String> {
        subscription::book_subscription(&self.book.market, self.depth)
    }

    async fn route(&self, raw: &str) -> Result<()> {
        self.route_at(raw, chrono::Utc::now().timestamp_millis()).await
    }

    async fn on_shutdown(&self) {
        self.book.close().await;
    }
}
