//! Core order book implementation
//!
//! Price levels are kept in sorted vectors (bids descending, asks ascending)
//! and updated in place through binary search.

use rust_decimal::Decimal;

use super::{BookSide, Level};
use crate::error::{MarketDataError, Result};

/// Order book for a single market
#[derive(Debug, Clone, Default)]
pub struct OrderBook {
    /// Bids sorted by price descending (highest first)
    bids: Vec<Level>,
    /// Asks sorted by price ascending (lowest first)
    asks: Vec<Level>,
    /// Event time of the last applied snapshot or update (ms)
    last_update_ms: i64,
}

impl OrderBook {
    /// Create a new empty order book
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace both sides wholesale.
    ///
    /// Sides delivered in the wrong orientation are reversed first. A side
    /// that is still not strictly monotonic afterwards is rejected and the
    /// book is left untouched.
    pub fn apply_snapshot(&mut self, bids: Vec<Level>, asks: Vec<Level>, timestamp: i64) -> Result<()> {
        let bids = normalize(BookSide::Bid, bids)?;
        let asks = normalize(BookSide::Ask, asks)?;

        self.bids = bids;
        self.asks = asks;
        self.last_update_ms = timestamp;
        Ok(())
    }

    /// Apply an incremental update.
    ///
    /// Returns false (book unchanged) if the event is older than the last
    /// applied one.
    pub fn apply_update(&mut self, bids: &[Level], asks: &[Level], timestamp: i64) -> bool {
        if timestamp < self.last_update_ms {
            return false;
        }

        for level in bids {
            self.upsert(BookSide::Bid, *level);
        }
        for level in asks {
            self.upsert(BookSide::Ask, *level);
        }

        self.last_update_ms = timestamp;
        true
    }

    /// Ordered upsert/delete of a single level
    pub fn upsert(&mut self, side: BookSide, level: Level) {
        let levels = match side {
            BookSide::Bid => &mut self.bids,
            BookSide::Ask => &mut self.asks,
        };

        let idx = match side {
            BookSide::Bid => levels.partition_point(|l| l.price > level.price),
            BookSide::Ask => levels.partition_point(|l| l.price < level.price),
        };
        let exists = levels.get(idx).map_or(false, |l| l.price == level.price);

        match (exists, level.size.is_zero()) {
            (true, true) => {
                levels.remove(idx);
            }
            (true, false) => levels[idx].size = level.size,
            (false, false) => levels.insert(idx, level),
            (false, true) => {}
        }
    }

    /// Copy of the bid side
    pub fn bids(&self) -> Vec<Level> {
        self.bids.clone()
    }

    /// Copy of the ask side
    pub fn asks(&self) -> Vec<Level> {
        self.asks.clone()
    }

    pub fn best_bid(&self) -> Option<Level> {
        self.bids.first().copied()
    }

    pub fn best_ask(&self) -> Option<Level> {
        self.asks.first().copied()
    }

    /// Get mid price
    pub fn mid_price(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid.price + ask.price) / Decimal::from(2)),
            _ => None,
        }
    }

    pub fn last_update_ms(&self) -> i64 {
        self.last_update_ms
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }

    pub fn clear(&mut self) {
        self.bids.clear();
        self.asks.clear();
        self.last_update_ms = 0;
    }
}

/// Orient a snapshot side, drop empty levels and check strict ordering
fn normalize(side: BookSide, mut levels: Vec<Level>) -> Result<Vec<Level>> {
    let reversed = match (levels.first(), levels.last()) {
        (Some(first), Some(last)) => match side {
            BookSide::Bid => first.price < last.price,
            BookSide::Ask => first.price > last.price,
        },
        _ => false,
    };
    if reversed {
        levels.reverse();
    }

    levels.retain(|l| !l.size.is_zero());

    let ordered = levels.windows(2).all(|pair| match side {
        BookSide::Bid => pair[0].price > pair[1].price,
        BookSide::Ask => pair[0].price < pair[1].price,
    });
    if !ordered {
        return Err(MarketDataError::CorruptSnapshot(format!(
            "{:?} side is not strictly ordered by price",
            side
        )));
    }

    Ok(levels)
}
