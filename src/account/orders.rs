//! Open order map with per-market open-order counts

use std::collections::HashMap;

use serde::Serialize;
use tracing::debug;

use super::{Order, Side};

/// Open orders of one market, per side
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OrderCount {
    pub bids: u32,
    pub asks: u32,
}

impl OrderCount {
    fn increment(&mut self, side: Side) {
        match side {
            Side::Buy => self.bids += 1,
            Side::Sell => self.asks += 1,
        }
    }

    fn decrement(&mut self, side: Side) {
        match side {
            Side::Buy => self.bids = self.bids.saturating_sub(1),
            Side::Sell => self.asks = self.asks.saturating_sub(1),
        }
    }
}

#[derive(Debug, Default)]
pub struct OrderTracker {
    orders: HashMap<i64, Order>,
    counts: HashMap<String, OrderCount>,
}

impl OrderTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the order map and recount from scratch
    pub fn apply_snapshot(&mut self, orders: Vec<Order>) {
        self.orders.clear();
        self.counts.clear();
        for order in orders.into_iter().filter(|o| !o.state.is_terminal()) {
            self.counts
                .entry(order.market.clone())
                .or_default()
                .increment(order.side);
            self.orders.insert(order.id, order);
        }
    }

    pub fn apply_update(&mut self, order: Order) {
        let known = self.orders.contains_key(&order.id);

        match (known, order.state.is_terminal()) {
            (true, true) => {
                if let Some(removed) = self.orders.remove(&order.id) {
                    if let Some(count) = self.counts.get_mut(&removed.market) {
                        count.decrement(removed.side);
                    }
                }
            }
            (true, false) => {
                self.orders.insert(order.id, order);
            }
            (false, true) => {
                debug!(order_id = order.id, state = ?order.state, "Ignoring terminal update for unknown order");
            }
            (false, false) => {
                self.counts
                    .entry(order.market.clone())
                    .or_default()
                    .increment(order.side);
                self.orders.insert(order.id, order);
            }
        }
    }

    /// Open orders sorted by id
    pub fn open_orders(&self) -> Vec<Order> {
        let mut orders: Vec<Order> = self.orders.values().cloned().collect();
        orders.sort_by_key(|o| o.id);
        orders
    }

    pub fn get(&self, id: i64) -> Option<&Order> {
        self.orders.get(&id)
    }

    pub fn find_by_client_id(&self, client_id: &str) -> Option<&Order> {
        self.orders
            .values()
            .find(|o| o.client_id.as_deref() == Some(client_id))
    }

    pub fn count(&self, market: &str) -> OrderCount {
        self.counts.get(market).copied().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }
}
