//! CLI command implementations

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::analytics::TradeAnalytics;
use crate::config::Config;
use crate::engine::coordinator::Coordinator;
use crate::engine::mcap::McapEstimator;
use crate::engine::seller::SellerLoop;
use crate::engine::stairs::{sell_bag_fraction, StairsDispatcher};
use crate::engine::TradeContext;
use crate::janitor::{janitor_loop, ActivityMarker};
use crate::limiter::TokenBucket;
use crate::price::PriceOracle;
use crate::stream::{Candidate, EventWatcher};
use crate::swap::SwapClient;
use crate::wallet::Wallet;

/// Build the shared trading context
fn build_context(config: &Config) -> Result<Arc<TradeContext>> {
    let wallet = Arc::new(Wallet::load(&config.rpc)?);
    info!("loaded wallet: {}", wallet.pubkey());

    let limiter = Arc::new(TokenBucket::new(
        config.aggregator.max_rps,
        config.aggregator.max_burst,
    ));
    let swap = Arc::new(SwapClient::new(&config.aggregator, limiter)?);
    let oracle = Arc::new(PriceOracle::new(config.aggregator.price_ttl_secs));

    Ok(Arc::new(TradeContext {
        config: config.clone(),
        wallet,
        swap,
        oracle,
        analytics: Arc::new(TradeAnalytics::new()),
        activity: Arc::new(ActivityMarker::new()),
    }))
}

/// Start the sniper
pub async fn start(config: &Config, dry_run: bool) -> Result<()> {
    info!("=== sniper startup ===");
    print!("{}", config.masked_display());

    let (candidate_tx, mut candidate_rx) = mpsc::channel::<Candidate>(1024);
    let watcher = EventWatcher::new(
        config.watch.clone(),
        config.rpc.ws_endpoint.clone(),
        config.rpc.endpoint.clone(),
        candidate_tx,
    );

    if dry_run {
        warn!("DRY-RUN: detection only, no trades will be executed");
        tokio::spawn(watcher.run());
        loop {
            tokio::select! {
                candidate = candidate_rx.recv() => {
                    match candidate {
                        Some(c) => info!(
                            "would evaluate {} (sig {} slot {})",
                            c.mint, c.signature, c.slot
                        ),
                        None => break,
                    }
                }
                _ = tokio::signal::ctrl_c() => break,
            }
        }
        info!("stopped by user");
        return Ok(());
    }

    let ctx = build_context(config)?;

    tokio::spawn(watcher.run());
    tokio::spawn(janitor_loop(
        ctx.wallet.clone(),
        config.janitor.clone(),
        ctx.activity.clone(),
    ));

    if config.stairs.enabled {
        info!("mode: STAIRS (spike-gated mcap exits)");
        let estimator = Arc::new(McapEstimator::new(config.mcap.clone()));
        let dispatcher = StairsDispatcher::new(
            ctx.clone(),
            estimator,
            config.rpc.ws_endpoint.clone(),
        );
        tokio::spawn(dispatcher.run(candidate_rx));
    } else {
        info!("mode: CLASSIC (fixed-delay exits)");
        let (seller, scheduler) = SellerLoop::new(ctx.clone());
        tokio::spawn(seller.run());
        let coordinator = Arc::new(Coordinator::new(ctx.clone()));
        tokio::spawn(coordinator.run(candidate_rx, scheduler));
    }

    // the whole task tree dies with the process; per-task cleanup is
    // best-effort and never blocks shutdown
    tokio::signal::ctrl_c().await?;
    let summary = ctx.analytics.summary();
    info!(
        "stopped by user; {} trades, realized profit {:.4}",
        summary.total_trades, summary.profit
    );
    Ok(())
}

/// Manually sell a fraction of a held token
pub async fn sell(config: &Config, mint: &str, amount: &str) -> Result<()> {
    let fraction = parse_fraction(amount)?;
    let ctx = build_context(config)?;

    info!("manual sell: {:.1}% of {mint}", fraction * 100.0);
    match sell_bag_fraction(&ctx, mint, fraction).await? {
        Some(sig) => info!("sell sig: {sig}"),
        None => warn!("no balance held for {mint}"),
    }
    Ok(())
}

/// Show current configuration (secrets masked)
pub fn show_config(config: &Config) -> Result<()> {
    print!("{}", config.masked_display());
    Ok(())
}

/// Check RPC and aggregator reachability
pub async fn health(config: &Config) -> Result<()> {
    let client = solana_client::nonblocking::rpc_client::RpcClient::new(config.rpc.endpoint.clone());
    match client.get_slot().await {
        Ok(slot) => info!("RPC ok, slot {slot}"),
        Err(e) => warn!("RPC check failed: {e}"),
    }

    let limiter = Arc::new(TokenBucket::new(
        config.aggregator.max_rps,
        config.aggregator.max_burst,
    ));
    let swap = SwapClient::new(&config.aggregator, limiter)?;
    let oracle = PriceOracle::new(config.aggregator.price_ttl_secs);
    let price = oracle.sol_usd(&swap).await;
    info!("aggregator ok, 1 SOL ~ {price:.2} USD");
    Ok(())
}

/// Accepts "75%", "0.75", or "75"
fn parse_fraction(amount: &str) -> Result<f64> {
    let trimmed = amount.trim();
    let value: f64 = trimmed.trim_end_matches('%').trim().parse()?;
    let fraction = if trimmed.ends_with('%') || value > 1.0 {
        value / 100.0
    } else {
        value
    };
    if !(0.0..=1.0).contains(&fraction) {
        anyhow::bail!("sell fraction out of range: {amount}");
    }
    Ok(fraction)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fraction_forms() {
        assert!((parse_fraction("100%").unwrap() - 1.0).abs() < 1e-9);
        assert!((parse_fraction("50%").unwrap() - 0.5).abs() < 1e-9);
        assert!((parse_fraction("0.25").unwrap() - 0.25).abs() < 1e-9);
        assert!((parse_fraction("75").unwrap() - 0.75).abs() < 1e-9);
        assert!(parse_fraction("150%").is_err());
        assert!(parse_fraction("abc").is_err());
    }
}
