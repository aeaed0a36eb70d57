//! Market-cap estimation from spot quotes
//!
//! Mcap is derived, never queried: quote one whole token into SOL, convert
//! through the cached SOL/USD reference price, multiply by total supply.
//! Per-mint quote results are cached briefly so many concurrent monitors
//! stay within the aggregator pacing budget.

use dashmap::DashMap;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use crate::config::{JumpConfig, McapConfig};
use crate::constants::{LAMPORTS_PER_SOL, SOL_MINT};
use crate::price::PriceOracle;
use crate::swap::SwapClient;

/// Cached per-token USD price derived from quotes
pub struct McapEstimator {
    config: McapConfig,
    cache: DashMap<String, (Instant, f64)>,
}

impl McapEstimator {
    pub fn new(config: McapConfig) -> Self {
        Self {
            config,
            cache: DashMap::new(),
        }
    }

    /// USD price of one whole token; 0.0 when no route exists yet
    pub async fn price_usd_per_token(
        &self,
        swap: &SwapClient,
        oracle: &PriceOracle,
        mint: &str,
    ) -> f64 {
        let min_gap = Duration::from_millis(self.config.quote_min_interval_ms.max(50));
        if let Some(entry) = self.cache.get(mint) {
            let (fetched_at, value) = *entry;
            if fetched_at.elapsed() < min_gap {
                return value;
            }
        }

        let one_token = 10u64.pow(self.config.token_decimals);
        let price = match swap.quote(mint, SOL_MINT, one_token, 500).await {
            Ok(quote) => {
                let sol = quote.out_amount() as f64 / LAMPORTS_PER_SOL as f64;
                sol * oracle.sol_usd(swap).await
            }
            Err(_) => 0.0,
        };

        self.cache
            .insert(mint.to_string(), (Instant::now(), price));
        price
    }

    /// Estimated market capitalization in USD
    pub async fn mcap_usd(&self, swap: &SwapClient, oracle: &PriceOracle, mint: &str) -> f64 {
        let price = self.price_usd_per_token(swap, oracle, mint).await;
        price * self.config.token_total_supply as f64
    }

    /// Drop the cached price for a token once its task finishes
    pub fn forget(&self, mint: &str) {
        self.cache.remove(mint);
    }
}

/// Entry trigger: watch early mcap readings for a low-to-high jump or a
/// large absolute delta within the window.
pub async fn wait_for_mcap_jump(
    estimator: &McapEstimator,
    swap: &SwapClient,
    oracle: &PriceOracle,
    config: &JumpConfig,
    mint: &str,
) -> bool {
    let check_interval = Duration::from_millis(config.check_ms.max(50));
    let deadline = Instant::now() + Duration::from_secs_f64(config.window_seconds);

    let mut baseline: Option<f64> = None;

    info!(
        "watching mcap jump on {mint} for {:.0}s (lo={:.0} hi={:.0} delta={:.0})",
        config.window_seconds, config.lo_usd, config.hi_usd, config.require_delta_usd
    );

    while Instant::now() < deadline {
        let mcap = estimator.mcap_usd(swap, oracle, mint).await;
        if mcap <= 0.0 {
            sleep(check_interval).await;
            continue;
        }

        match baseline {
            None => {
                baseline = Some(mcap);
                debug!("initial mcap ~ {mcap:.0}");
            }
            Some(m0) => {
                let delta = mcap - m0;
                if (m0 <= config.lo_usd && mcap >= config.hi_usd)
                    || delta >= config.require_delta_usd
                {
                    info!("mcap jump detected: {m0:.0} -> {mcap:.0} (delta={delta:.0})");
                    return true;
                }
            }
        }

        sleep(check_interval).await;
    }

    info!("no mcap jump within window for {mint}");
    false
}
