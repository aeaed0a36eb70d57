//! Delayed sell queue and its single consumer
//!
//! Intents sit in a time-ordered delay queue (min-heap on scheduled time,
//! so an early retry never waits behind a later intent). The consumer is
//! strictly sequential: one sell in flight system-wide, which keeps
//! balance reasoning simple at the cost of head-of-line latency when a
//! sell is slow.
//!
//! Failure handling is a bounded retry schedule, not an error path: zero
//! balance, no usable quote after three immediate attempts, and
//! build/submit failures all re-enqueue with the next configured delay
//! until the try budget runs out, after which the intent is abandoned
//! with a log line.

use std::future::poll_fn;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::time::DelayQueue;
use tracing::{debug, info, warn};

use crate::analytics::TradeSide;
use crate::constants::SOL_MINT;
use crate::engine::{sell_priority_fee, TradeContext};
use crate::error::{short_error, Error, Result};

/// A scheduled sell for one token
#[derive(Debug, Clone)]
pub struct SellIntent {
    pub mint: String,
    pub tries: u32,
}

/// Producer side of the sell queue
#[derive(Clone)]
pub struct SellScheduler {
    tx: mpsc::Sender<(SellIntent, Duration)>,
}

impl SellScheduler {
    /// Schedule the first sell for `mint` after `delay`
    pub async fn schedule(&self, mint: String, delay: Duration) {
        let intent = SellIntent { mint, tries: 0 };
        if self.tx.send((intent, delay)).await.is_err() {
            warn!("sell queue closed; dropping intent");
        }
    }
}

/// Delay for a 1-based retry count: walk the schedule, the last entry
/// repeats for overflow tries.
pub fn retry_delay(schedule: &[f64], tries: u32) -> Duration {
    let idx = (tries.max(1) as usize - 1).min(schedule.len().saturating_sub(1));
    Duration::from_secs_f64(schedule.get(idx).copied().unwrap_or(0.6))
}

/// Decide the next step after a failed attempt: `Some(delay)` to
/// re-enqueue, `None` once the try budget is spent.
pub fn next_retry(schedule: &[f64], tries_after_failure: u32, max_tries: u32) -> Option<Duration> {
    if tries_after_failure < max_tries {
        Some(retry_delay(schedule, tries_after_failure))
    } else {
        None
    }
}

/// The seller loop; owns the delay queue
pub struct SellerLoop {
    ctx: Arc<TradeContext>,
    rx: mpsc::Receiver<(SellIntent, Duration)>,
    requeue: mpsc::Sender<(SellIntent, Duration)>,
}

impl SellerLoop {
    pub fn new(ctx: Arc<TradeContext>) -> (Self, SellScheduler) {
        let (tx, rx) = mpsc::channel(1024);
        let scheduler = SellScheduler { tx: tx.clone() };
        (
            Self {
                ctx,
                rx,
                requeue: tx,
            },
            scheduler,
        )
    }

    pub async fn run(mut self) {
        let mut queue: DelayQueue<SellIntent> = DelayQueue::new();

        loop {
            tokio::select! {
                incoming = self.rx.recv() => {
                    match incoming {
                        Some((intent, delay)) => {
                            debug!("queued sell for {} in {:.2}s (try {})",
                                intent.mint, delay.as_secs_f64(), intent.tries);
                            queue.insert(intent, delay);
                        }
                        None => break,
                    }
                }
                expired = poll_fn(|cx| queue.poll_expired(cx)), if !queue.is_empty() => {
                    if let Some(expired) = expired {
                        // sequential by construction: nothing else is
                        // polled while this sell runs
                        self.attempt_sell(expired.into_inner()).await;
                    }
                }
            }
        }
    }

    async fn attempt_sell(&self, mut intent: SellIntent) {
        let ctx = &self.ctx;
        let schedule = &ctx.config.sell_retry.schedule;
        let max_tries = ctx.config.sell_retry.max_tries;
        let mint = intent.mint.clone();

        let Ok(mint_pk) = solana_sdk::pubkey::Pubkey::from_str(&mint) else {
            warn!("dropping sell intent with bad mint {mint}");
            return;
        };

        if let Err(e) = ctx.wallet.ensure_token_account(&mint_pk).await {
            warn!("token account ensure failed for {mint}: {}", short_error(&e));
        }

        let balance = ctx
            .wallet
            .token_balance(&mint_pk)
            .await
            .ok()
            .flatten()
            .unwrap_or(0);

        if balance == 0 {
            intent.tries += 1;
            match next_retry(schedule, intent.tries, max_tries) {
                Some(delay) => {
                    info!(
                        "no balance yet for {mint}, retrying {}/{} in {:.2}s",
                        intent.tries,
                        max_tries,
                        delay.as_secs_f64()
                    );
                    self.reenqueue(intent, delay).await;
                }
                None => warn!("gave up selling {mint} (no balance after {} tries)", intent.tries),
            }
            return;
        }

        let fraction = ctx.config.trading.sell_fraction.clamp(0.0, 1.0);
        let mut sell_amount = if fraction < 0.999_999 {
            (balance as f64 * fraction) as u64
        } else {
            balance
        };
        if sell_amount == 0 {
            sell_amount = 1;
        }

        match self.execute_sell(&mint, sell_amount).await {
            Ok(sig) => {
                info!("sell {mint} sig: {sig}");
                ctx.analytics.log_trade(&mint, TradeSide::Sell, sell_amount, 0.0);
                ctx.activity.note();
            }
            Err(e) => {
                intent.tries += 1;
                match next_retry(schedule, intent.tries, max_tries) {
                    Some(delay) => {
                        info!(
                            "sell retry {}/{} for {mint} in {:.2}s: {}",
                            intent.tries,
                            max_tries,
                            delay.as_secs_f64(),
                            short_error(&e)
                        );
                        self.reenqueue(intent, delay).await;
                    }
                    None => warn!("giving up selling {mint}: {}", short_error(&e)),
                }
            }
        }
    }

    async fn execute_sell(&self, mint: &str, amount: u64) -> Result<String> {
        let ctx = &self.ctx;
        let sol_usd = ctx.oracle.sol_usd(&ctx.swap).await;
        let tip = sell_priority_fee(&ctx.config.trading, sol_usd);
        let slippage = ctx.config.trading.slippage_bps_sell;

        // three immediate quote attempts before falling back to the
        // scheduled retry path
        let mut quote = None;
        let mut last_err: Option<Error> = None;
        for attempt in 1..=3u32 {
            match ctx.swap.quote(mint, SOL_MINT, amount, slippage).await {
                Ok(q) => {
                    quote = Some(q);
                    break;
                }
                Err(e) => {
                    warn!(
                        "sell quote fetch failed attempt {attempt}/3 for {mint}: {}",
                        short_error(&e)
                    );
                    last_err = Some(e);
                    sleep(Duration::from_millis(500)).await;
                }
            }
        }
        let quote =
            quote.ok_or_else(|| last_err.unwrap_or_else(|| Error::NoQuote(mint.to_string())))?;

        let tx_b64 = ctx
            .swap
            .swap_transaction(&quote, &ctx.wallet.pubkey().to_string(), tip, slippage)
            .await?;
        ctx.wallet.send_serialized_tx(&tx_b64).await
    }

    async fn reenqueue(&self, intent: SellIntent, delay: Duration) {
        if self.requeue.send((intent, delay)).await.is_err() {
            warn!("sell queue closed during re-enqueue");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEDULE: &[f64] = &[0.6, 1.3, 2.1, 3.0, 4.0];

    #[test]
    fn test_retry_delays_follow_schedule() {
        assert_eq!(retry_delay(SCHEDULE, 1), Duration::from_secs_f64(0.6));
        assert_eq!(retry_delay(SCHEDULE, 3), Duration::from_secs_f64(2.1));
        assert_eq!(retry_delay(SCHEDULE, 5), Duration::from_secs_f64(4.0));
    }

    #[test]
    fn test_overflow_tries_clamp_to_last_entry() {
        assert_eq!(retry_delay(SCHEDULE, 9), Duration::from_secs_f64(4.0));
        let short = [0.5];
        assert_eq!(retry_delay(&short, 7), Duration::from_secs_f64(0.5));
    }

    #[test]
    fn test_budget_exhausts_after_max_tries() {
        let max_tries = 5;
        // failures 1..4 re-enqueue with the scheduled delays
        for tries in 1..max_tries {
            let delay = next_retry(SCHEDULE, tries, max_tries).expect("should retry");
            assert_eq!(delay, retry_delay(SCHEDULE, tries));
        }
        // the 5th failed attempt is abandoned, not re-enqueued
        assert_eq!(next_retry(SCHEDULE, max_tries, max_tries), None);
    }
}
