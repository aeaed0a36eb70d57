//! Background rent reclamation for empty token accounts
//!
//! Every buy leaves an associated token account behind; once a mint has
//! sat empty past its cooldown the account is closed and the rent comes
//! back. The loop defers to trading: it pauses inside the activity idle
//! window, keeps a SOL reserve, and caps closes per rolling minute.

use std::collections::{HashMap, VecDeque};
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::config::JanitorConfig;
use crate::constants::LAMPORTS_PER_SOL;
use crate::error::short_error;
use crate::wallet::Wallet;

/// Shared marker the buy/sell paths bump so the janitor stays out of the
/// way while trading is hot
#[derive(Default)]
pub struct ActivityMarker {
    // None until the first trade: the janitor starts out unconstrained
    last: Mutex<Option<Instant>>,
}

impl ActivityMarker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn note(&self) {
        *self.last.lock().expect("activity marker poisoned") = Some(Instant::now());
    }

    pub fn idle_for(&self) -> Duration {
        self.last
            .lock()
            .expect("activity marker poisoned")
            .map(|t| t.elapsed())
            .unwrap_or(Duration::MAX)
    }
}

/// Rolling per-minute close cap
struct CloseRate {
    recent: VecDeque<Instant>,
    max_per_minute: usize,
}

impl CloseRate {
    fn new(max_per_minute: usize) -> Self {
        Self {
            recent: VecDeque::new(),
            max_per_minute,
        }
    }

    fn saturated(&mut self) -> bool {
        let now = Instant::now();
        while self
            .recent
            .front()
            .is_some_and(|t| now.duration_since(*t) > Duration::from_secs(60))
        {
            self.recent.pop_front();
        }
        self.recent.len() >= self.max_per_minute
    }

    fn record(&mut self) {
        self.recent.push_back(Instant::now());
    }
}

pub async fn janitor_loop(wallet: Arc<Wallet>, config: JanitorConfig, activity: Arc<ActivityMarker>) {
    if !config.enabled {
        info!("token-account janitor disabled");
        return;
    }

    info!("token-account janitor started");
    let interval = Duration::from_secs_f64(config.interval_seconds.max(1.0));
    let mut zero_since: HashMap<String, Instant> = HashMap::new();
    let mut close_rate = CloseRate::new(config.max_closes_per_minute);

    loop {
        // stand down while trading is active
        if config.idle_window_seconds > 0.0
            && activity.idle_for().as_secs_f64() < config.idle_window_seconds
        {
            sleep(Duration::from_secs(1)).await;
            continue;
        }

        let lamports = match wallet.lamports().await {
            Ok(v) => v,
            Err(e) => {
                warn!("janitor balance check failed: {}", short_error(&e));
                sleep(interval).await;
                continue;
            }
        };
        if (lamports as f64) < config.min_sol_reserve * LAMPORTS_PER_SOL as f64 {
            sleep(interval).await;
            continue;
        }

        if close_rate.saturated() {
            sleep(Duration::from_secs(2)).await;
            continue;
        }

        let accounts = match wallet.token_accounts().await {
            Ok(accounts) => accounts,
            Err(e) => {
                debug!("janitor account scan failed: {}", short_error(&e));
                sleep(interval).await;
                continue;
            }
        };

        let empties: Vec<String> = accounts
            .into_iter()
            .filter(|(_, mint, amount)| *amount == 0 && !config.exclude_mints.contains(mint))
            .map(|(_, mint, _)| mint)
            .collect();

        if empties.is_empty() {
            zero_since.clear();
            sleep(interval).await;
            continue;
        }

        let now = Instant::now();
        let mut did_close = false;
        for mint in empties {
            let first_empty = *zero_since.entry(mint.clone()).or_insert(now);
            if now.duration_since(first_empty).as_secs_f64() < config.cooldown_seconds {
                continue;
            }

            let Ok(mint_pk) = solana_sdk::pubkey::Pubkey::from_str(&mint) else {
                zero_since.remove(&mint);
                continue;
            };

            match wallet.try_close_token_account(&mint_pk).await {
                Ok(true) => {
                    info!("closed empty token account for {mint}");
                    close_rate.record();
                    zero_since.remove(&mint);
                    did_close = true;
                    if close_rate.saturated() {
                        break;
                    }
                }
                Ok(false) => {}
                Err(e) => debug!("close failed for {mint}: {}", short_error(&e)),
            }
        }

        sleep(if did_close {
            Duration::from_secs(1)
        } else {
            interval
        })
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_activity_marker_tracks_idle_time() {
        let marker = ActivityMarker::new();
        // no activity yet: fully idle
        assert_eq!(marker.idle_for(), Duration::MAX);

        marker.note();
        assert!(marker.idle_for() < Duration::from_secs(1));

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(marker.idle_for() >= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_rate_rolls_over() {
        let mut rate = CloseRate::new(2);
        assert!(!rate.saturated());
        rate.record();
        rate.record();
        assert!(rate.saturated());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(!rate.saturated());
    }
}
