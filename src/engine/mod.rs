//! Trade lifecycle engine
//!
//! - `coordinator`: candidate admission and buy dispatch (classic mode)
//! - `seller`: delayed sell queue with bounded retry schedule
//! - `mcap`: market-cap estimation from spot quotes
//! - `milestone` / `ladder`: exit decision state machines
//! - `stairs`: spike-gated per-token trading tasks

pub mod coordinator;
pub mod ladder;
pub mod mcap;
pub mod milestone;
pub mod seller;
pub mod stairs;

use std::sync::Arc;

use crate::analytics::TradeAnalytics;
use crate::config::{Config, TradingConfig};
use crate::constants::LAMPORTS_PER_SOL;
use crate::janitor::ActivityMarker;
use crate::price::PriceOracle;
use crate::swap::SwapClient;
use crate::wallet::Wallet;

/// Shared handles every trading task needs
pub struct TradeContext {
    pub config: Config,
    pub wallet: Arc<Wallet>,
    pub swap: Arc<SwapClient>,
    pub oracle: Arc<PriceOracle>,
    pub analytics: Arc<TradeAnalytics>,
    pub activity: Arc<ActivityMarker>,
}

/// Buy-side priority fee: pinned lamports win, else derived from the
/// configured USD amount at the current reference price.
pub fn buy_priority_fee(config: &TradingConfig, sol_usd: f64) -> u64 {
    if config.priority_fee_lamports > 0 {
        return config.priority_fee_lamports;
    }
    let sol = config.priority_fee_usd / sol_usd.max(0.01);
    (sol * LAMPORTS_PER_SOL as f64) as u64
}

/// Sell-side priority fee: sell override, then the buy-side value
pub fn sell_priority_fee(config: &TradingConfig, sol_usd: f64) -> u64 {
    if config.priority_fee_lamports_sell > 0 {
        return config.priority_fee_lamports_sell;
    }
    buy_priority_fee(config, sol_usd)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TradingConfig;

    #[test]
    fn test_priority_fee_prefers_pinned_lamports() {
        let mut config = TradingConfig::default();
        config.priority_fee_lamports = 500_000;
        config.priority_fee_usd = 1.0;
        assert_eq!(buy_priority_fee(&config, 150.0), 500_000);
    }

    #[test]
    fn test_priority_fee_derives_from_usd() {
        let mut config = TradingConfig::default();
        config.priority_fee_lamports = 0;
        config.priority_fee_usd = 0.75;
        // 0.75 USD at 150 USD/SOL = 0.005 SOL
        assert_eq!(buy_priority_fee(&config, 150.0), 5_000_000);
    }

    #[test]
    fn test_sell_fee_override_wins() {
        let mut config = TradingConfig::default();
        config.priority_fee_lamports = 500_000;
        config.priority_fee_lamports_sell = 200_000;
        assert_eq!(sell_priority_fee(&config, 150.0), 200_000);
        config.priority_fee_lamports_sell = 0;
        assert_eq!(sell_priority_fee(&config, 150.0), 500_000);
    }
}
