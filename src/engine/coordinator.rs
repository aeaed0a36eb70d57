//! Candidate admission and buy dispatch (classic mode)
//!
//! Filters run in a fixed order and short-circuit on the first rejection,
//! each producing only a log line: slot age, optional true on-chain mint
//! age, duplicate suppression, then the non-blocking buy-rate bucket.
//! Accepted candidates get an independent buy-attempt task bounded by a
//! wall-clock window measured from first detection. One candidate's
//! failure never touches the coordinator or other in-flight tasks.

use std::collections::HashSet;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::analytics::TradeSide;
use crate::constants::{LAMPORTS_PER_SOL, SOL_MINT};
use crate::engine::seller::SellScheduler;
use crate::engine::{buy_priority_fee, TradeContext};
use crate::error::{short_error, Error, Result};
use crate::limiter::TokenBucket;
use crate::stream::Candidate;

/// A route is tradable only when its price impact stays under the ceiling.
/// Quotes without the field are trusted.
fn looks_liquid_enough(price_impact: Option<f64>, ceiling: f64) -> bool {
    match price_impact {
        Some(impact) => impact <= ceiling,
        None => true,
    }
}

/// Implied pool depth from price impact: a trade of `trade_usd` moving the
/// price by fraction `impact` suggests roughly `trade_usd / impact` of
/// depth. No impact reads as unbounded depth.
fn estimate_liquidity_usd(price_impact: Option<f64>, trade_usd: f64) -> f64 {
    match price_impact {
        Some(impact) if impact > 0.0 => trade_usd / impact.max(1e-6),
        _ => f64::INFINITY,
    }
}

pub struct Coordinator {
    ctx: Arc<TradeContext>,
    seen: Mutex<HashSet<String>>,
    buy_limiter: TokenBucket,
}

impl Coordinator {
    pub fn new(ctx: Arc<TradeContext>) -> Self {
        let rate = ctx.config.trading.max_buys_per_sec;
        Self {
            ctx,
            seen: Mutex::new(HashSet::new()),
            buy_limiter: TokenBucket::new(rate, rate.max(1.0)),
        }
    }

    /// Consume candidates until the channel closes
    pub async fn run(
        self: Arc<Self>,
        mut candidates: mpsc::Receiver<Candidate>,
        scheduler: SellScheduler,
    ) {
        let mut buy_tasks: JoinSet<()> = JoinSet::new();

        while let Some(candidate) = candidates.recv().await {
            // reap finished buy attempts; panics stay isolated
            while let Some(result) = buy_tasks.try_join_next() {
                if let Err(e) = result {
                    if e.is_panic() {
                        warn!("buy task panicked: {e}");
                    }
                }
            }

            let age = candidate.first_seen.elapsed().as_secs_f64();
            info!("evaluating {} | age={age:.2}s", candidate.mint);

            if !self.passes_slot_age(&candidate).await {
                continue;
            }
            if !self.passes_mint_age(&candidate.mint).await {
                continue;
            }
            if !self.admit_unseen(&candidate.mint) {
                debug!("skipped {} (already seen)", candidate.mint);
                continue;
            }
            if !self.buy_limiter.try_take() {
                debug!("skipped {} (rate limited)", candidate.mint);
                continue;
            }

            let ctx = self.ctx.clone();
            let scheduler = scheduler.clone();
            buy_tasks.spawn(async move {
                attempt_buy_until_window(ctx, scheduler, candidate).await;
            });
        }

        info!("coordinator shutting down, aborting in-flight buy attempts");
        buy_tasks.abort_all();
    }

    async fn passes_slot_age(&self, candidate: &Candidate) -> bool {
        let max_slots = self.ctx.config.trading.entry_max_age_slots;
        if max_slots == 0 || candidate.slot == 0 {
            return true;
        }
        match self.ctx.wallet.current_slot().await {
            Ok(current) => {
                let slot_age = current.saturating_sub(candidate.slot);
                if slot_age > max_slots {
                    debug!("skipped {} (slot age {slot_age} > {max_slots})", candidate.mint);
                    return false;
                }
                true
            }
            Err(e) => {
                warn!("getSlot failed, skipping slot-age check: {}", short_error(&e));
                true
            }
        }
    }

    async fn passes_mint_age(&self, mint: &str) -> bool {
        let trading = &self.ctx.config.trading;
        if trading.mint_age_min_seconds <= 0.0 && trading.mint_age_max_seconds <= 0.0 {
            return true;
        }
        let Ok(mint_pk) = solana_sdk::pubkey::Pubkey::from_str(mint) else {
            return false;
        };

        let threshold = (trading.mint_age_max_seconds > 0.0).then_some(trading.mint_age_max_seconds);
        let age = self
            .ctx
            .wallet
            .account_age_seconds(
                &mint_pk,
                threshold,
                trading.mint_age_page_limit,
                trading.mint_age_max_pages,
            )
            .await
            .ok()
            .flatten();

        // unknown age passes; the gate only rejects confirmed violations
        let Some(age) = age else { return true };

        if trading.mint_age_min_seconds > 0.0 && age < trading.mint_age_min_seconds {
            info!("skipped {mint} (on-chain age {age:.2}s < {}s)", trading.mint_age_min_seconds);
            return false;
        }
        if trading.mint_age_max_seconds > 0.0 && age > trading.mint_age_max_seconds {
            info!("skipped {mint} (on-chain age {age:.2}s > {}s)", trading.mint_age_max_seconds);
            return false;
        }
        true
    }

    /// Insert into the admission dedup set; false when already admitted.
    /// The set is append-only for the life of the process.
    fn admit_unseen(&self, mint: &str) -> bool {
        self.seen
            .lock()
            .expect("seen set poisoned")
            .insert(mint.to_string())
    }
}

/// Retry the full buy operation with a short fixed pause until it succeeds
/// or the entry window (measured from first detection) expires.
async fn attempt_buy_until_window(
    ctx: Arc<TradeContext>,
    scheduler: SellScheduler,
    candidate: Candidate,
) {
    let window = Duration::from_secs_f64(ctx.config.trading.entry_max_age_seconds);
    let mut attempt = 0u32;

    while candidate.first_seen.elapsed() <= window {
        attempt += 1;
        info!("attempting buy (attempt {attempt}) for {}", candidate.mint);
        match snipe_once(&ctx, &scheduler, &candidate.mint).await {
            Ok(()) => return,
            Err(e) => {
                warn!(
                    "buy attempt {attempt} failed for {}: {}",
                    candidate.mint,
                    short_error(&e)
                );
                sleep(Duration::from_millis(200)).await;
            }
        }
    }
    warn!("window expired without buy for {}", candidate.mint);
}

/// One full buy operation: size, gate on route quality, swap, confirm
/// best-effort, and schedule the exit.
pub async fn snipe_once(
    ctx: &TradeContext,
    scheduler: &SellScheduler,
    mint: &str,
) -> Result<()> {
    let trading = &ctx.config.trading;
    let mint_pk = solana_sdk::pubkey::Pubkey::from_str(mint)
        .map_err(|e| Error::Internal(format!("bad mint {mint}: {e}")))?;

    let lamports_in = ctx.oracle.lamports_for_usd(&ctx.swap, trading.buy_usd).await;
    let sol_usd = ctx.oracle.sol_usd(&ctx.swap).await;
    let tip_lamports = buy_priority_fee(trading, sol_usd);

    // create only if missing; failure is non-fatal, the swap itself can
    // still create the account
    if let Err(e) = ctx.wallet.ensure_token_account(&mint_pk).await {
        warn!("token account ensure failed for {mint}: {}", short_error(&e));
    }

    let mut quote = None;
    let mut last_err: Option<Error> = None;
    for attempt in 1..=3u32 {
        match ctx
            .swap
            .quote(SOL_MINT, mint, lamports_in, trading.slippage_bps_buy)
            .await
        {
            Ok(q) => {
                let impact = q.price_impact();
                if !looks_liquid_enough(impact, trading.max_price_impact) {
                    debug!("illiquid route attempt {attempt}/3 for {mint}");
                    last_err = Some(Error::IlliquidRoute {
                        impact_pct: impact.unwrap_or(1.0),
                    });
                    sleep(Duration::from_millis(200)).await;
                    continue;
                }
                let depth = estimate_liquidity_usd(impact, trading.buy_usd);
                if depth < trading.min_liquidity_usd {
                    debug!(
                        "skip {mint}: est_liquidity ~ {depth:.2} USD < {:.2} USD",
                        trading.min_liquidity_usd
                    );
                    last_err = Some(Error::PoolTooShallow {
                        estimated_usd: depth,
                        floor_usd: trading.min_liquidity_usd,
                    });
                    sleep(Duration::from_millis(200)).await;
                    continue;
                }
                quote = Some(q);
                break;
            }
            Err(e) => {
                warn!(
                    "quote fetch failed attempt {attempt}/3 for {mint}: {}",
                    short_error(&e)
                );
                last_err = Some(e);
                sleep(Duration::from_millis(200)).await;
            }
        }
    }

    let Some(quote) = quote else {
        let err = last_err.unwrap_or_else(|| Error::NoQuote(mint.to_string()));
        warn!("no usable quote for {mint} ({})", short_error(&err));
        return Err(err);
    };

    info!(
        "BUY ${} -> {mint} (~{:.6} SOL, tip~{tip_lamports} lamports)",
        trading.buy_usd,
        lamports_in as f64 / LAMPORTS_PER_SOL as f64
    );

    let tx_b64 = ctx
        .swap
        .swap_transaction(
            &quote,
            &ctx.wallet.pubkey().to_string(),
            tip_lamports,
            trading.slippage_bps_buy,
        )
        .await?;
    let sig = ctx.wallet.send_serialized_tx(&tx_b64).await?;
    info!("  buy sig: {sig}");
    ctx.analytics
        .log_trade(mint, TradeSide::Buy, lamports_in, sol_usd);
    ctx.activity.note();

    // best-effort: a failed confirm does not abort the flow
    let _ = ctx.wallet.confirm(&sig, Duration::from_secs_f64(2.5)).await;

    // poll for the bought balance to decide whether the first sell needs
    // a settlement buffer
    let mut balance_seen = false;
    let poll_deadline = Instant::now() + Duration::from_secs_f64(2.5);
    while Instant::now() < poll_deadline {
        if let Ok(Some(balance)) = ctx.wallet.token_balance(&mint_pk).await {
            if balance > 0 {
                balance_seen = true;
                break;
            }
        }
        sleep(Duration::from_millis(250)).await;
    }

    let settle_buf = if balance_seen {
        0.0
    } else {
        trading.settle_buffer_seconds
    };
    let delay = Duration::from_secs_f64(trading.exit_after_seconds + settle_buf);
    scheduler.schedule(mint.to_string(), delay).await;
    info!(
        "scheduled sell for {mint} at +{:.1}s (balance_ready={balance_seen})",
        delay.as_secs_f64()
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_liquidity_gate_trusts_missing_impact() {
        assert!(looks_liquid_enough(None, 0.95));
        assert!(looks_liquid_enough(Some(0.5), 0.95));
        assert!(!looks_liquid_enough(Some(0.96), 0.95));
    }

    #[test]
    fn test_depth_estimate_from_impact() {
        // $10 trade moving price 1% implies ~$1000 of depth
        let depth = estimate_liquidity_usd(Some(0.01), 10.0);
        assert!((depth - 1000.0).abs() < 1e-9);
        assert!(estimate_liquidity_usd(Some(0.0), 10.0).is_infinite());
        assert!(estimate_liquidity_usd(None, 10.0).is_infinite());
    }

    #[test]
    fn test_admission_dedup_is_once_per_process() {
        let seen: Mutex<HashSet<String>> = Mutex::new(HashSet::new());
        let admit = |mint: &str| seen.lock().unwrap().insert(mint.to_string());

        assert!(admit("MintA"));
        assert!(!admit("MintA"));
        assert!(admit("MintB"));
        // no eviction, ever
        assert!(!admit("MintA"));
    }
}
