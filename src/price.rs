//! Reference price oracle: SOL/USD via a 1-SOL quote to USDC
//!
//! The price is only used for sizing trades, never for settlement, so
//! staleness is acceptable and total unavailability is not fatal: on a
//! cold-cache failure a fixed fallback is returned instead of an error.

use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::constants::{LAMPORTS_PER_SOL, SOL_MINT, USDC_DECIMALS, USDC_MINT};
use crate::swap::SwapClient;

/// Returned when the upstream is down and nothing is cached yet
const FALLBACK_USD: f64 = 150.0;

struct CacheEntry {
    fetched_at: Instant,
    value: f64,
}

/// Short-TTL cached SOL/USD price
pub struct PriceOracle {
    ttl: Duration,
    cache: Mutex<Option<CacheEntry>>,
}

impl PriceOracle {
    pub fn new(ttl_secs: f64) -> Self {
        Self {
            ttl: Duration::from_secs_f64(ttl_secs.max(0.0)),
            cache: Mutex::new(None),
        }
    }

    /// Current SOL price in USD, floored at a sane minimum.
    ///
    /// Serves from cache within the TTL; on upstream failure serves the
    /// stale value when one exists, else the fixed fallback.
    pub async fn sol_usd(&self, swap: &SwapClient) -> f64 {
        if let Some(cached) = self.cached_fresh() {
            return cached;
        }

        match swap.quote(SOL_MINT, USDC_MINT, LAMPORTS_PER_SOL, 50).await {
            Ok(quote) => {
                let out = quote.out_amount();
                if out == 0 {
                    return self.stale_or_fallback();
                }
                let usd = out as f64 / 10f64.powi(USDC_DECIMALS as i32);
                let usd = usd.max(0.01);
                let mut cache = self.cache.lock().expect("price cache poisoned");
                *cache = Some(CacheEntry {
                    fetched_at: Instant::now(),
                    value: usd,
                });
                usd
            }
            Err(e) => {
                debug!("reference price fetch failed: {e}");
                self.stale_or_fallback()
            }
        }
    }

    /// Convert a USD amount into lamports at the current reference price
    pub async fn lamports_for_usd(&self, swap: &SwapClient, usd: f64) -> u64 {
        let price = self.sol_usd(swap).await;
        let lamports = (usd / price.max(0.01)) * LAMPORTS_PER_SOL as f64;
        (lamports as u64).max(1)
    }

    fn cached_fresh(&self) -> Option<f64> {
        let cache = self.cache.lock().expect("price cache poisoned");
        cache
            .as_ref()
            .filter(|e| e.fetched_at.elapsed() < self.ttl)
            .map(|e| e.value)
    }

    fn stale_or_fallback(&self) -> f64 {
        let cache = self.cache.lock().expect("price cache poisoned");
        cache
            .as_ref()
            .map(|e| e.value)
            .unwrap_or(FALLBACK_USD)
            .max(0.01)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cold_cache_falls_back() {
        let oracle = PriceOracle::new(15.0);
        assert_eq!(oracle.stale_or_fallback(), FALLBACK_USD);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry() {
        let oracle = PriceOracle::new(15.0);
        {
            let mut cache = oracle.cache.lock().unwrap();
            *cache = Some(CacheEntry {
                fetched_at: Instant::now(),
                value: 182.5,
            });
        }
        assert_eq!(oracle.cached_fresh(), Some(182.5));

        tokio::time::advance(Duration::from_secs(16)).await;
        assert_eq!(oracle.cached_fresh(), None);
        // stale value still preferred over the hard fallback
        assert_eq!(oracle.stale_or_fallback(), 182.5);
    }
}
