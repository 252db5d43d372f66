//! Public trade feed
//!
//! Buffers the market's public trades between polls.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{MarketDataError, Result};
use crate::parser::{self, PublicTrade, PublicTradeFrame, TradeStreamEvent};
use crate::stream::FeedHandler;
use crate::subscription;

/// Trades kept between two `take_trades` calls
pub const TRADE_BUFFER_CAPACITY: usize = 10_000;

/// Shared buffer of one market's public trades
#[derive(Debug, Clone)]
pub struct PublicTradeStream {
    market: String,
    buffer: Arc<RwLock<VecDeque<PublicTrade>>>,
}

impl PublicTradeStream {
    pub fn new(market: &str) -> Self {
        Self {
            market: market.to_lowercase(),
            buffer: Arc::new(RwLock::new(VecDeque::new())),
        }
    }

    pub fn market(&self) -> &str {
        &self.market
    }

    /// Drain buffered trades, oldest first
    pub async fn take_trades(&self) -> Vec<PublicTrade> {
        self.buffer.write().await.drain(..).collect()
    }

    pub async fn len(&self) -> usize {
        self.buffer.read().await.len()
    }

    async fn push(&self, trades: Vec<PublicTrade>) {
        let mut buffer = self.buffer.write().await;
        buffer.extend(trades);
        let overflow = buffer.len().saturating_sub(TRADE_BUFFER_CAPACITY);
        if overflow > 0 {
            buffer.drain(..overflow);
            warn!(market = %self.market, dropped = overflow, "Public trade buffer full, dropping oldest");
        }
    }
}

/// Trade channel handler for one market
pub struct TradeStreamFeed {
    name: String,
    stream: PublicTradeStream,
}

impl TradeStreamFeed {
    pub fn new(market: &str) -> Self {
        Self::with_stream(PublicTradeStream::new(market))
    }

    pub fn with_stream(stream: PublicTradeStream) -> Self {
        Self {
            name: format!("trade-{}", stream.market()),
            stream,
        }
    }

    pub fn stream(&self) -> PublicTradeStream {
        self.stream.clone()
    }

    fn validate(&self, frame: &PublicTradeFrame) -> Result<()> {
        if frame.channel != "trade" || frame.market != self.stream.market {
            return Err(MarketDataError::Semantic(format!(
                "expected trade/{}, got {}/{}",
                self.stream.market, frame.channel, frame.market
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl FeedHandler for TradeStreamFeed {
    fn name(&self) -> &str {
        &self.name
    }

    fn subscribe_frame(&self) -> Result<String> {
        subscription::trade_subscription(&self.stream.market)
    }

    async fn route(&self, raw: &str) -> Result<()> {
        match parser::decode::<TradeStreamEvent>(raw)? {
            TradeStreamEvent::Subscribed => {
                info!(feed = %self.name, "Trade subscription confirmed");
                Ok(())
            }
            TradeStreamEvent::Snapshot(frame) => {
                self.validate(&frame)?;
                debug!(feed = %self.name, count = frame.trades.len(), "Skipping trade snapshot");
                Ok(())
            }
            TradeStreamEvent::Update(frame) => {
                self.validate(&frame)?;
                self.stream.push(frame.trades).await;
                Ok(())
            }
            TradeStreamEvent::Error(frame) => Err(MarketDataError::Exchange(frame.message())),
            TradeStreamEvent::Unknown => Err(parser::unknown_event(raw)),
        }
    }
}
