//! Spike-gated per-token trading tasks ("stairs" mode)
//!
//! Each admitted mint gets its own task: wait for an entry trigger (trade
//! rush or mcap jump), then run one of the mcap-driven exit rounds. The
//! dispatcher bounds concurrency with a semaphore and an active-mint set;
//! a losing round stops the task and holds the mint in a cooldown before
//! the task exits.

use std::collections::HashSet;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{sleep, Instant};
use tracing::{info, warn};

use crate::analytics::TradeSide;
use crate::constants::SOL_MINT;
use crate::engine::ladder::{DynamicLadderState, LadderAction};
use crate::engine::mcap::{wait_for_mcap_jump, McapEstimator};
use crate::engine::milestone::{ExitAction, ExitReason, MilestoneState};
use crate::engine::{buy_priority_fee, sell_priority_fee, TradeContext};
use crate::error::{short_error, Error, Result};
use crate::limiter::TokenBucket;
use crate::rug::check_rug_pull;
use crate::stream::spike::{monitor_spikes, wait_for_next_pop};
use crate::stream::Candidate;

/// Consumes candidates and runs bounded-concurrency stairs tasks
pub struct StairsDispatcher {
    ctx: Arc<TradeContext>,
    estimator: Arc<McapEstimator>,
    ws_url: String,
}

impl StairsDispatcher {
    pub fn new(ctx: Arc<TradeContext>, estimator: Arc<McapEstimator>, ws_url: String) -> Self {
        Self {
            ctx,
            estimator,
            ws_url,
        }
    }

    pub async fn run(self, mut candidates: mpsc::Receiver<Candidate>) {
        let permits = self.ctx.config.stairs.max_concurrent.max(1);
        let semaphore = Arc::new(Semaphore::new(permits));
        let active: Arc<Mutex<HashSet<String>>> = Arc::new(Mutex::new(HashSet::new()));
        let mut tasks: JoinSet<()> = JoinSet::new();

        while let Some(candidate) = candidates.recv().await {
            while let Some(result) = tasks.try_join_next() {
                if let Err(e) = result {
                    if e.is_panic() {
                        warn!("stairs task panicked: {e}");
                    }
                }
            }

            let mint = candidate.mint;
            if !active.lock().expect("active set poisoned").insert(mint.clone()) {
                continue;
            }

            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };

            let ctx = self.ctx.clone();
            let estimator = self.estimator.clone();
            let ws_url = self.ws_url.clone();
            let active = active.clone();
            tasks.spawn(async move {
                run_stairs_for_mint(ctx, estimator, &ws_url, &mint).await;
                active.lock().expect("active set poisoned").remove(&mint);
                drop(permit);
            });
        }

        info!("stairs dispatcher shutting down");
        tasks.abort_all();
    }
}

/// One token's full stairs lifecycle: gate, trade rounds, cooldown
pub async fn run_stairs_for_mint(
    ctx: Arc<TradeContext>,
    estimator: Arc<McapEstimator>,
    ws_url: &str,
    mint: &str,
) {
    let stairs = ctx.config.stairs.clone();

    if ctx.config.trading.rug_check_enabled {
        match check_rug_pull(&ctx.wallet.client(), mint).await {
            Ok(true) => {
                warn!("rug signal for {mint}, skipping entry");
                return;
            }
            Ok(false) => {}
            Err(e) => warn!("rug check failed for {mint}: {}", short_error(&e)),
        }
    }

    let triggered = if ctx.config.jump.enabled {
        wait_for_mcap_jump(&estimator, &ctx.swap, &ctx.oracle, &ctx.config.jump, mint).await
    } else {
        monitor_spikes(ws_url, mint, &ctx.config.spike).await
    };

    if !triggered {
        warn!("no step pattern for {mint}");
        return;
    }

    info!("stairs active on {mint}");
    let limiter = TokenBucket::new(ctx.config.trading.max_buys_per_sec, 1.0);

    if ctx.config.dynamic_bag.enabled {
        if !limiter.try_take() {
            sleep(Duration::from_millis(200)).await;
        }
        match dynamic_bag_round(&ctx, &estimator, ws_url, mint, stairs.entry_clip_usd).await {
            Ok(pnl) => info!("finished stairs for {mint} (dynamic ladder, pnl={pnl} lamports)"),
            Err(e) => warn!("dynamic ladder round failed for {mint}: {}", short_error(&e)),
        }
        estimator.forget(mint);
        return;
    }

    loop {
        if !limiter.try_take() {
            sleep(Duration::from_millis(200)).await;
            continue;
        }

        let pnl = match milestone_scalp_round(&ctx, &estimator, mint, stairs.entry_clip_usd).await {
            Ok(pnl) => pnl,
            Err(e) => {
                warn!("scalp round failed for {mint}: {}", short_error(&e));
                break;
            }
        };

        if pnl < 0 {
            warn!("losing round on {mint} ({pnl} lamports), stopping and cooling down");
            sleep(Duration::from_secs_f64(stairs.blacklist_cooldown_seconds)).await;
            break;
        }

        if stairs.reenter_needs_next_pop {
            let fresh = wait_for_next_pop(ws_url, mint, stairs.reenter_pop_timeout_ms).await;
            if !fresh {
                info!("no fresh flow for re-entry, stopping {mint}");
                break;
            }
        }

        if !stairs.reenter_until_loss {
            break;
        }
        sleep(Duration::from_secs_f64(stairs.cooldown_seconds)).await;
    }

    estimator.forget(mint);
    info!("finished stairs for {mint}");
}

/// Buy `usd` worth of `mint` through the aggregator
async fn buy_once(ctx: &TradeContext, mint: &str, usd: f64) -> Result<String> {
    let trading = &ctx.config.trading;
    let lamports_in = ctx.oracle.lamports_for_usd(&ctx.swap, usd).await;
    let sol_usd = ctx.oracle.sol_usd(&ctx.swap).await;
    let tip = buy_priority_fee(trading, sol_usd);

    let quote = ctx
        .swap
        .quote(SOL_MINT, mint, lamports_in, trading.slippage_bps_buy)
        .await?;
    let tx_b64 = ctx
        .swap
        .swap_transaction(
            &quote,
            &ctx.wallet.pubkey().to_string(),
            tip,
            trading.slippage_bps_buy,
        )
        .await?;
    let sig = ctx.wallet.send_serialized_tx(&tx_b64).await?;
    ctx.analytics
        .log_trade(mint, TradeSide::Buy, lamports_in, sol_usd);
    ctx.activity.note();
    Ok(sig)
}

/// Sell a fraction of the current bag; Ok(None) when the balance is zero
pub async fn sell_bag_fraction(ctx: &TradeContext, mint: &str, fraction: f64) -> Result<Option<String>> {
    let trading = &ctx.config.trading;
    let mint_pk = solana_sdk::pubkey::Pubkey::from_str(mint)
        .map_err(|e| Error::Internal(format!("bad mint {mint}: {e}")))?;

    let balance = ctx.wallet.token_balance(&mint_pk).await?.unwrap_or(0);
    if balance == 0 {
        return Ok(None);
    }

    let amount = ((balance as f64 * fraction.clamp(0.0, 1.0)) as u64).max(1);
    let sol_usd = ctx.oracle.sol_usd(&ctx.swap).await;
    let tip = sell_priority_fee(trading, sol_usd);

    let quote = ctx
        .swap
        .quote(mint, SOL_MINT, amount, trading.slippage_bps_sell)
        .await?;
    let tx_b64 = ctx
        .swap
        .swap_transaction(
            &quote,
            &ctx.wallet.pubkey().to_string(),
            tip,
            trading.slippage_bps_sell,
        )
        .await?;
    let sig = ctx.wallet.send_serialized_tx(&tx_b64).await?;
    ctx.analytics.log_trade(mint, TradeSide::Sell, amount, 0.0);
    ctx.activity.note();
    Ok(Some(sig))
}

fn log_exit(mint: &str, reason: ExitReason) {
    match reason {
        ExitReason::InstantDrop { drop_pct } => {
            info!("instant drop {drop_pct:.2}% on {mint} -> EXIT ALL")
        }
        ExitReason::StopLoss => info!("mcap stop hit on {mint} -> EXIT ALL"),
        ExitReason::SellAllLevel => info!("top ladder level on {mint} -> EXIT ALL"),
        ExitReason::MaxMcap => info!("mcap ceiling on {mint} -> EXIT ALL"),
        ExitReason::HoldExpired => info!("hold budget expired on {mint} -> EXIT ALL"),
        ExitReason::IdleFlow => info!("no fresh flow on {mint} -> EXIT ALL"),
        ExitReason::MaxDuration => info!("max duration on {mint} -> EXIT ALL"),
    }
}

/// One milestone round: buy, poll mcap against the ladder/stops within the
/// hold budget, exit fully on any trigger or on expiry. Returns realized
/// PnL in lamports.
pub async fn milestone_scalp_round(
    ctx: &TradeContext,
    estimator: &McapEstimator,
    mint: &str,
    usd: f64,
) -> Result<i64> {
    let pre_lamports = ctx.wallet.lamports().await? as i64;
    let sig = buy_once(ctx, mint, usd).await?;
    info!("BUY ${usd:.2} {mint} | {sig}");

    let mut state = MilestoneState::new(&ctx.config.mcap);
    let interval = Duration::from_millis(ctx.config.mcap.check_interval_ms.max(50));
    let deadline = Instant::now() + Duration::from_secs_f64(ctx.config.stairs.hold_seconds);

    loop {
        if Instant::now() >= deadline {
            log_exit(mint, ExitReason::HoldExpired);
            sell_bag_fraction(ctx, mint, 1.0).await?;
            break;
        }

        let mcap = estimator.mcap_usd(&ctx.swap, &ctx.oracle, mint).await;
        if mcap <= 0.0 {
            sleep(interval).await;
            continue;
        }

        match state.observe(mcap) {
            ExitAction::ExitAll(reason) => {
                log_exit(mint, reason);
                sell_bag_fraction(ctx, mint, 1.0).await?;
                break;
            }
            ExitAction::TakeProfit { level, fraction } => {
                info!("hit {level:.0} on {mint} -> SELL {:.0}%", fraction * 100.0);
                sell_bag_fraction(ctx, mint, fraction).await?;
            }
            ExitAction::Hold => {}
        }

        sleep(interval).await;
    }

    let post_lamports = ctx.wallet.lamports().await? as i64;
    Ok(post_lamports - pre_lamports)
}

/// One dynamic-bag round: buy, then follow an open-ended ladder with
/// idle/duration timeouts and the usual stops. Returns realized PnL.
pub async fn dynamic_bag_round(
    ctx: &TradeContext,
    estimator: &McapEstimator,
    ws_url: &str,
    mint: &str,
    usd: f64,
) -> Result<i64> {
    let bag = &ctx.config.dynamic_bag;
    let pre_lamports = ctx.wallet.lamports().await? as i64;
    let sig = buy_once(ctx, mint, usd).await?;
    info!("BUY ${usd:.2} {mint} | {sig}");

    let mut state = DynamicLadderState::new(bag, &ctx.config.mcap);
    let interval = Duration::from_millis(ctx.config.mcap.check_interval_ms.max(50));
    let mut idle_deadline = Instant::now() + Duration::from_secs_f64(bag.idle_timeout_seconds);
    let absolute_deadline = Instant::now() + Duration::from_secs_f64(bag.max_duration_seconds);

    loop {
        if Instant::now() >= absolute_deadline {
            log_exit(mint, ExitReason::MaxDuration);
            sell_bag_fraction(ctx, mint, 1.0).await?;
            break;
        }

        let mcap = estimator.mcap_usd(&ctx.swap, &ctx.oracle, mint).await;
        if mcap <= 0.0 {
            sleep(interval).await;
            continue;
        }

        match state.observe(mcap) {
            LadderAction::ExitAll(reason) => {
                log_exit(mint, reason);
                sell_bag_fraction(ctx, mint, 1.0).await?;
                break;
            }
            LadderAction::LadderSteps { fraction, steps } => {
                for _ in 0..steps {
                    info!(
                        "dynamic ladder level on {mint} -> SELL {:.0}% of remaining",
                        fraction * 100.0
                    );
                    sell_bag_fraction(ctx, mint, fraction).await?;
                }
            }
            LadderAction::Hold => {}
        }

        // a fresh-flow signal pushes the idle deadline out
        if ctx.config.stairs.reenter_needs_next_pop {
            let fresh =
                wait_for_next_pop(ws_url, mint, ctx.config.mcap.check_interval_ms).await;
            if fresh {
                idle_deadline =
                    Instant::now() + Duration::from_secs_f64(bag.idle_timeout_seconds);
            }
        }

        if Instant::now() >= idle_deadline {
            log_exit(mint, ExitReason::IdleFlow);
            sell_bag_fraction(ctx, mint, 1.0).await?;
            break;
        }

        sleep(interval).await;
    }

    let post_lamports = ctx.wallet.lamports().await? as i64;
    let pnl = post_lamports - pre_lamports;
    info!("round PnL: {pnl} lamports");
    Ok(pnl)
}
