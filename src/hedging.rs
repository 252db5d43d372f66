//! Hedging pass
//!
//! Periodically drains unhedged fills and folds them into per-market
//! exposure deltas for an external strategy.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::account::{AccountState, Order, Side, Trade};

/// `tokio::time::interval` panics on a zero period
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Net exposure change of one market since the previous pass
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExposureDelta {
    pub market: String,
    /// Base units bought minus base units sold
    pub net_base: Decimal,
    /// Quote received minus quote spent
    pub net_quote: Decimal,
    pub gross_volume: Decimal,
    /// Volume-weighted average fill price
    pub vwap: Option<Decimal>,
    pub maker_volume: Decimal,
    pub fees: HashMap<String, Decimal>,
    pub trade_count: usize,
    pub latest_timestamp: i64,
    /// Remaining volume of resting buy orders
    pub open_bid_volume: Decimal,
    /// Remaining volume of resting sell orders
    pub open_ask_volume: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HedgingReport {
    pub deltas: Vec<ExposureDelta>,
    pub generated_at: i64,
}

impl HedgingReport {
    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty()
    }
}

/// Fold fills into per-market deltas, sorted by market
pub fn fold_trades(trades: &[Trade], open_orders: &[Order]) -> Vec<ExposureDelta> {
    let mut deltas: BTreeMap<String, ExposureDelta> = BTreeMap::new();
    let mut notional: HashMap<String, Decimal> = HashMap::new();

    for trade in trades {
        let delta = deltas.entry(trade.market.clone()).or_insert_with(|| ExposureDelta {
            market: trade.market.clone(),
            ..Default::default()
        });
        let quote = trade.price * trade.volume;
        match trade.side {
            Side::Buy => {
                delta.net_base += trade.volume;
                delta.net_quote -= quote;
            }
            Side::Sell => {
                delta.net_base -= trade.volume;
                delta.net_quote += quote;
            }
        }
        delta.gross_volume += trade.volume;
        if trade.maker {
            delta.maker_volume += trade.volume;
        }
        if !trade.fee.is_zero() {
            *delta.fees.entry(trade.fee_currency.clone()).or_default() += trade.fee;
        }
        delta.trade_count += 1;
        delta.latest_timestamp = delta.latest_timestamp.max(trade.timestamp);
        *notional.entry(trade.market.clone()).or_default() += quote;
    }

    for delta in deltas.values_mut() {
        if !delta.gross_volume.is_zero() {
            delta.vwap = notional
                .get(&delta.market)
                .map(|n| *n / delta.gross_volume);
        }
    }

    for order in open_orders {
        if let Some(delta) = deltas.get_mut(&order.market) {
            match order.side {
                Side::Buy => delta.open_bid_volume += order.remaining_volume,
                Side::Sell => delta.open_ask_volume += order.remaining_volume,
            }
        }
    }

    deltas.into_values().collect()
}

/// Drains the unhedged queue of an [`AccountState`]
#[derive(Debug, Clone)]
pub struct HedgingPass {
    state: AccountState,
}

impl HedgingPass {
    pub fn new(state: AccountState) -> Self {
        Self { state }
    }

    /// One pass: take every unhedged trade and fold it
    pub async fn run_once(&self) -> HedgingReport {
        let trades = self.state.take_unhedged_trades().await;
        let open_orders = self.state.open_orders().await;
        let deltas = fold_trades(&trades, &open_orders);
        debug!(trades = trades.len(), markets = deltas.len(), "Hedging pass");

        HedgingReport {
            deltas,
            generated_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Run every `interval` until cancelled, sending non-empty reports
    pub fn spawn(
        self,
        interval: Duration,
        cancel: CancellationToken,
    ) -> (mpsc::Receiver<HedgingReport>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(64);
        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(MIN_INTERVAL));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let report = self.run_once().await;
                if report.is_empty() {
                    continue;
                }
                if tx.send(report).await.is_err() {
                    break;
                }
            }
            info!("Hedging pass stopped");
        });
        (rx, join)
    }
}
