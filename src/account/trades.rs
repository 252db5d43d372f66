//! Own-trade ledger
//!
//! Keeps a bounded history, the queue of trades not yet hedged, a stash of
//! the history taken at disconnect time, and a buffer of trade reports.
//! Reconciling a post-reconnect snapshot against the stash makes sure every
//! trade reaches the unhedged queue exactly once.

use std::collections::{HashSet, VecDeque};

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::info;

use super::Trade;

/// Trades kept in the recent history
pub const HISTORY_CAPACITY: usize = 105;

/// Flattened fill report for downstream consumers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeReport {
    pub order_id: i64,
    pub market: String,
    pub product: &'static str,
    pub price: Decimal,
    pub volume: Decimal,
    pub side: &'static str,
    /// "limit" for maker fills, "market" for taker fills
    pub exec_type: &'static str,
    pub fee: Decimal,
    pub fee_currency: String,
    pub filled_volume: Decimal,
    pub timestamp: i64,
    pub maker: bool,
}

impl From<&Trade> for TradeReport {
    fn from(trade: &Trade) -> Self {
        Self {
            order_id: trade.order_id,
            market: trade.market.clone(),
            product: "spot",
            price: trade.price,
            volume: trade.volume,
            side: trade.side.as_str(),
            exec_type: if trade.maker { "limit" } else { "market" },
            fee: trade.fee,
            fee_currency: trade.fee_currency.clone(),
            filled_volume: trade.volume,
            timestamp: trade.timestamp,
            maker: trade.maker,
        }
    }
}

#[derive(Debug, Default)]
pub struct TradeLedger {
    history: VecDeque<Trade>,
    unhedged: Vec<Trade>,
    stash: Vec<Trade>,
    reports: Vec<TradeReport>,
    /// Set by the first snapshot; until then there is nothing to reconcile
    seeded: bool,
    /// Set once a seeded connection was lost; the next snapshot must be
    /// reconciled
    reconnecting: bool,
}

impl TradeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember what we already know before the connection is rebuilt.
    /// A no-op until the first snapshot has seeded the history.
    pub fn stash_for_reconnect(&mut self) {
        if !self.seeded {
            return;
        }
        self.stash = self.history.iter().cloned().collect();
        self.reconnecting = true;
    }

    /// Apply a `trade_snapshot`.
    ///
    /// The first snapshot just seeds the history. After a reconnect, trades
    /// already in the stash, the unhedged queue or the current history are
    /// tracked and only refresh the history; the rest are emitted. Returns
    /// the emitted trades.
    pub fn reconcile_snapshot(&mut self, snapshot: Vec<Trade>) -> Vec<Trade> {
        let stash = std::mem::take(&mut self.stash);
        let reconnecting = std::mem::replace(&mut self.reconnecting, false);

        if !reconnecting {
            self.seeded = true;
            self.replace_history(snapshot);
            return Vec::new();
        }

        // Trades hedged during the reconnect delay moved from the unhedged
        // queue into history after the stash was taken.
        let known: HashSet<i64> = stash
            .iter()
            .chain(self.unhedged.iter())
            .chain(self.history.iter())
            .map(|t| t.id)
            .collect();

        let (tracked, untracked): (Vec<Trade>, Vec<Trade>) =
            snapshot.into_iter().partition(|t| known.contains(&t.id));

        self.replace_history(tracked);
        if !untracked.is_empty() {
            info!(count = untracked.len(), "Trades missed during disconnect");
            self.emit(&untracked);
        }
        untracked
    }

    /// Apply a `trade_update`; trades already seen are dropped. Returns the
    /// emitted trades.
    pub fn record_updates(&mut self, trades: Vec<Trade>) -> Vec<Trade> {
        let mut seen: HashSet<i64> = self
            .unhedged
            .iter()
            .chain(self.history.iter())
            .map(|t| t.id)
            .collect();

        let fresh: Vec<Trade> = trades.into_iter().filter(|t| seen.insert(t.id)).collect();
        self.emit(&fresh);
        fresh
    }

    /// Drain the unhedged queue, moving the trades into history
    pub fn take_unhedged(&mut self) -> Vec<Trade> {
        let taken = std::mem::take(&mut self.unhedged);
        self.history.extend(taken.iter().cloned());
        self.trim_history();
        taken
    }

    pub fn take_reports(&mut self) -> Vec<TradeReport> {
        std::mem::take(&mut self.reports)
    }

    pub fn unhedged(&self) -> Vec<Trade> {
        self.unhedged.clone()
    }

    pub fn history(&self) -> Vec<Trade> {
        self.history.iter().cloned().collect()
    }

    fn emit(&mut self, trades: &[Trade]) {
        self.unhedged.extend(trades.iter().cloned());
        self.reports.extend(trades.iter().map(TradeReport::from));
    }

    fn replace_history(&mut self, trades: Vec<Trade>) {
        self.history = trades.into();
        self.trim_history();
    }

    fn trim_history(&mut self) {
        while self.history.len() > HISTORY_CAPACITY {
            self.history.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::Side;
    use rust_decimal_macros::dec;

    fn trade(id: i64) -> Trade {
        Trade {
            id,
            order_id: id * 10,
            price: dec!(100),
            volume: dec!(0.5),
            market: "btctwd".to_string(),
            timestamp: 1_000 + id,
            side: Side::Buy,
            fee: dec!(0.01),
            fee_currency: "twd".to_string(),
            maker: true,
        }
    }

    fn ids(trades: &[Trade]) -> Vec<i64> {
        trades.iter().map(|t| t.id).collect()
    }

    #[test]
    fn test_first_snapshot_seeds_history() {
        let mut ledger = TradeLedger::new();
        let emitted = ledger.reconcile_snapshot(vec![trade(1), trade(2)]);

        assert!(emitted.is_empty());
        assert_eq!(ids(&ledger.history()), vec![1, 2]);
        assert!(ledger.unhedged().is_empty());
    }

    #[test]
    fn test_reconnect_emits_only_untracked() {
        let mut ledger = TradeLedger::new();
        ledger.reconcile_snapshot(vec![trade(5)]);
        ledger.stash_for_reconnect();

        let emitted = ledger.reconcile_snapshot(vec![trade(5), trade(6)]);

        assert_eq!(ids(&emitted), vec![6]);
        assert_eq!(ids(&ledger.unhedged()), vec![6]);
        assert_eq!(ids(&ledger.history()), vec![5]);
        assert_eq!(ledger.take_reports().len(), 1);
    }

    #[test]
    fn test_disconnect_before_first_snapshot_still_seeds() {
        let mut ledger = TradeLedger::new();
        ledger.stash_for_reconnect();

        let emitted = ledger.reconcile_snapshot(vec![trade(1), trade(2), trade(3)]);

        assert!(emitted.is_empty());
        assert!(ledger.unhedged().is_empty());
        assert!(ledger.take_reports().is_empty());
        assert_eq!(ids(&ledger.history()), vec![1, 2, 3]);

        ledger.stash_for_reconnect();
        let emitted = ledger.reconcile_snapshot(vec![trade(1), trade(2), trade(3), trade(4)]);
        assert_eq!(ids(&emitted), vec![4]);
    }

    #[test]
    fn test_trade_hedged_during_reconnect_is_not_emitted_again() {
        let mut ledger = TradeLedger::new();
        ledger.reconcile_snapshot(Vec::new());
        assert_eq!(ids(&ledger.record_updates(vec![trade(8)])), vec![8]);
        ledger.stash_for_reconnect();

        assert_eq!(ids(&ledger.take_unhedged()), vec![8]);
        let emitted = ledger.reconcile_snapshot(vec![trade(1), trade(8)]);

        assert_eq!(ids(&emitted), vec![1]);
        assert_eq!(ids(&ledger.unhedged()), vec![1]);
        assert_eq!(ledger.take_reports().len(), 2);
    }

    #[test]
    fn test_unhedged_trades_count_as_tracked() {
        let mut ledger = TradeLedger::new();
        ledger.reconcile_snapshot(Vec::new());
        ledger.record_updates(vec![trade(8)]);
        ledger.stash_for_reconnect();

        let emitted = ledger.reconcile_snapshot(vec![trade(8), trade(9)]);

        assert_eq!(ids(&emitted), vec![9]);
        assert_eq!(ids(&ledger.unhedged()), vec![8, 9]);
    }

    #[test]
    fn test_reconnect_with_empty_history_emits_everything_new() {
        let mut ledger = TradeLedger::new();
        ledger.reconcile_snapshot(Vec::new());
        ledger.stash_for_reconnect();

        let emitted = ledger.reconcile_snapshot(vec![trade(1)]);
        assert_eq!(ids(&emitted), vec![1]);
    }

    #[test]
    fn test_duplicate_updates_are_dropped() {
        let mut ledger = TradeLedger::new();
        assert_eq!(ledger.record_updates(vec![trade(1), trade(1)]).len(), 1);
        assert!(ledger.record_updates(vec![trade(1)]).is_empty());

        ledger.take_unhedged();
        assert!(ledger.record_updates(vec![trade(1)]).is_empty());
        assert_eq!(ledger.take_reports().len(), 1);
    }

    #[test]
    fn test_take_unhedged_moves_into_history() {
        let mut ledger = TradeLedger::new();
        ledger.record_updates(vec![trade(1), trade(2)]);

        assert_eq!(ids(&ledger.take_unhedged()), vec![1, 2]);
        assert!(ledger.unhedged().is_empty());
        assert_eq!(ids(&ledger.history()), vec![1, 2]);
        assert!(ledger.take_unhedged().is_empty());
    }

    #[test]
    fn test_history_is_capped() {
        let mut ledger = TradeLedger::new();
        ledger.record_updates((0..200).map(trade).collect());
        ledger.take_unhedged();

        let history = ledger.history();
        assert_eq!(history.len(), HISTORY_CAPACITY);
        assert_eq!(history[0].id, 200 - HISTORY_CAPACITY as i64);
    }

    #[test]
    fn test_trade_report_fields() {
        let mut taker = trade(3);
        taker.maker = false;
        taker.side = Side::Sell;
        let report = TradeReport::from(&taker);

        assert_eq!(report.order_id, 30);
        assert_eq!(report.exec_type, "market");
        assert_eq!(report.side, "sell");
        assert_eq!(report.filled_volume, dec!(0.5));
    }
}
