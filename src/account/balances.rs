//! Per-asset balances

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::Serialize;

use crate::parser::BalanceEntry;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Balance {
    pub available: Decimal,
    pub locked: Decimal,
}

/// Balances keyed by lowercase asset name.
///
/// Account events are authoritative; `lock` / `unlock` only bridge the gap
/// until the next one arrives.
#[derive(Debug, Default)]
pub struct BalanceBook {
    balances: HashMap<String, Balance>,
}

impl BalanceBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// `account_snapshot`: replace everything
    pub fn apply_snapshot(&mut self, entries: Vec<BalanceEntry>) {
        self.balances.clear();
        self.apply_update(entries);
    }

    /// `account_update`: overwrite the named assets
    pub fn apply_update(&mut self, entries: Vec<BalanceEntry>) {
        for entry in entries {
            self.balances.insert(
                entry.currency.to_lowercase(),
                Balance {
                    available: entry.available,
                    locked: entry.locked,
                },
            );
        }
    }

    /// Set a balance directly (REST refresh)
    pub fn set(&mut self, asset: &str, balance: Balance) {
        self.balances.insert(asset.to_lowercase(), balance);
    }

    /// Move `amount` from available to locked. False if the asset is unknown.
    pub fn lock(&mut self, asset: &str, amount: Decimal) -> bool {
        match self.balances.get_mut(&asset.to_lowercase()) {
            Some(balance) => {
                balance.available -= amount;
                balance.locked += amount;
                true
            }
            None => false,
        }
    }

    /// Move up to `amount` from locked back to available
    pub fn unlock(&mut self, asset: &str, amount: Decimal) -> bool {
        match self.balances.get_mut(&asset.to_lowercase()) {
            Some(balance) => {
                let released = amount.min(balance.locked).max(Decimal::ZERO);
                balance.locked -= released;
                balance.available += released;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, asset: &str) -> Option<Balance> {
        self.balances.get(&asset.to_lowercase()).copied()
    }

    pub fn all(&self) -> HashMap<String, Balance> {
        self.balances.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn entry(currency: &str, available: Decimal, locked: Decimal) -> BalanceEntry {
        BalanceEntry {
            currency: currency.to_string(),
            available,
            locked,
        }
    }

    #[test]
    fn test_update_overwrites_named_asset_only() {
        let mut book = BalanceBook::new();
        book.apply_snapshot(vec![entry("btc", dec!(1), dec!(0)), entry("twd", dec!(1000), dec!(0))]);
        book.apply_update(vec![entry("BTC", dec!(0.5), dec!(0.5))]);

        assert_eq!(book.get("btc").unwrap(), Balance { available: dec!(0.5), locked: dec!(0.5) });
        assert_eq!(book.get("twd").unwrap().available, dec!(1000));
    }

    #[test]
    fn test_snapshot_replaces_everything() {
        let mut book = BalanceBook::new();
        book.apply_update(vec![entry("eth", dec!(3), dec!(0))]);
        book.apply_snapshot(vec![entry("btc", dec!(1), dec!(0))]);
        assert!(book.get("eth").is_none());
    }

    #[test]
    fn test_lock_and_unlock() {
        let mut book = BalanceBook::new();
        book.apply_update(vec![entry("twd", dec!(1000), dec!(0))]);

        assert!(book.lock("twd", dec!(300)));
        assert_eq!(book.get("twd").unwrap(), Balance { available: dec!(700), locked: dec!(300) });

        assert!(book.unlock("twd", dec!(500)));
        assert_eq!(book.get("twd").unwrap(), Balance { available: dec!(1000), locked: dec!(0) });
    }

    #[test]
    fn test_unknown_asset_is_not_adjusted() {
        let mut book = BalanceBook::new();
        assert!(!book.lock("usdt", dec!(1)));
        assert!(book.get("usdt").is_none());
    }

    #[test]
    fn test_authoritative_event_overrides_optimistic_lock() {
        let mut book = BalanceBook::new();
        book.apply_update(vec![entry("btc", dec!(1), dec!(0))]);
        book.lock("btc", dec!(0.2));
        book.apply_update(vec![entry("btc", dec!(0.9), dec!(0.1))]);
        assert_eq!(book.get("btc").unwrap(), Balance { available: dec!(0.9), locked: dec!(0.1) });
    }
}
