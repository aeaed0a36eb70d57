//! In-memory trade analytics
//!
//! Records every buy/sell and derives a realized-profit figure for logs.
//! Nothing persists beyond the process.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;

/// Trade direction
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Serialize)]
pub struct TradeRecord {
    pub mint: String,
    pub side: TradeSide,
    pub amount: u64,
    pub price: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub total_trades: usize,
    pub profit: f64,
    pub recent: Vec<TradeRecord>,
}

/// Process-wide trade log
#[derive(Default)]
pub struct TradeAnalytics {
    trades: Mutex<Vec<TradeRecord>>,
}

impl TradeAnalytics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log_trade(&self, mint: &str, side: TradeSide, amount: u64, price: f64) {
        let mut trades = self.trades.lock().expect("trade log poisoned");
        trades.push(TradeRecord {
            mint: mint.to_string(),
            side,
            amount,
            price,
            timestamp: Utc::now(),
        });
    }

    /// Sell proceeds minus buy cost across all recorded trades
    pub fn realized_profit(&self) -> f64 {
        let trades = self.trades.lock().expect("trade log poisoned");
        let mut buys: HashMap<String, f64> = HashMap::new();
        let mut proceeds = 0.0;
        for t in trades.iter() {
            match t.side {
                TradeSide::Buy => {
                    *buys.entry(t.mint.clone()).or_insert(0.0) += t.amount as f64 * t.price;
                }
                TradeSide::Sell => proceeds += t.amount as f64 * t.price,
            }
        }
        proceeds - buys.values().sum::<f64>()
    }

    /// Totals plus the last ten trades
    pub fn summary(&self) -> Summary {
        let profit = self.realized_profit();
        let trades = self.trades.lock().expect("trade log poisoned");
        let recent = trades.iter().rev().take(10).rev().cloned().collect();
        Summary {
            total_trades: trades.len(),
            profit,
            recent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_realized_profit() {
        let analytics = TradeAnalytics::new();
        analytics.log_trade("MintA", TradeSide::Buy, 10, 2.0);
        analytics.log_trade("MintA", TradeSide::Sell, 10, 3.0);
        assert!((analytics.realized_profit() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_summary_keeps_last_ten() {
        let analytics = TradeAnalytics::new();
        for i in 0..15 {
            analytics.log_trade("MintA", TradeSide::Buy, i, 1.0);
        }
        let summary = analytics.summary();
        assert_eq!(summary.total_trades, 15);
        assert_eq!(summary.recent.len(), 10);
        assert_eq!(summary.recent.last().unwrap().amount, 14);
    }
}
