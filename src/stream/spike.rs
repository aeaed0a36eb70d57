//! Trade-flow intensity classification for a single token
//!
//! Each non-empty log batch mentioning the mint counts as one trade event
//! ("pop"). Two interchangeable classifiers turn the event stream into a
//! boolean rush signal inside a bounded window: a consecutive-gap chain,
//! or fixed-size time buckets. A third probe just waits for the first
//! event as a liveness check for re-entry gating.

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{timeout, Instant};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::config::SpikeConfig;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Consecutive-gap chain: pops only extend the chain while the gap to the
/// previous pop stays within `[gap_min_ms, gap_max_ms]`; anything outside
/// resets the chain to length 1.
#[derive(Debug)]
pub struct PopChain {
    gap_min_ms: u64,
    gap_max_ms: u64,
    required: usize,
    len: usize,
    last_ms: Option<u64>,
}

impl PopChain {
    pub fn new(gap_min_ms: u64, gap_max_ms: u64, required: usize) -> Self {
        Self {
            gap_min_ms,
            gap_max_ms,
            required: required.max(1),
            len: 0,
            last_ms: None,
        }
    }

    /// Record a pop at `at_ms` (milliseconds on any monotonic scale).
    /// Returns the chain length after the pop.
    pub fn record(&mut self, at_ms: u64) -> usize {
        match self.last_ms {
            None => self.len = 1,
            Some(last) => {
                let gap = at_ms.saturating_sub(last);
                if gap >= self.gap_min_ms && gap <= self.gap_max_ms {
                    self.len += 1;
                } else {
                    self.len = 1;
                }
            }
        }
        self.last_ms = Some(at_ms);
        self.len
    }

    pub fn triggered(&self) -> bool {
        self.len >= self.required
    }
}

/// Fixed-size bucket tally: a bucket qualifies with at least one event;
/// the detector triggers once `required` buckets (consecutive or not)
/// have qualified.
#[derive(Debug)]
pub struct BucketTally {
    bucket_ms: u64,
    required: usize,
    bucket_start_ms: u64,
    bucket_events: usize,
    qualified: usize,
}

impl BucketTally {
    pub fn new(bucket_secs: u64, required: usize) -> Self {
        Self {
            bucket_ms: bucket_secs.max(1) * 1000,
            required: required.max(1),
            bucket_start_ms: 0,
            bucket_events: 0,
            qualified: 0,
        }
    }

    /// Roll the current bucket if its span elapsed; returns true once the
    /// qualified count reaches the requirement.
    pub fn roll(&mut self, now_ms: u64) -> bool {
        if now_ms.saturating_sub(self.bucket_start_ms) >= self.bucket_ms {
            if self.bucket_events > 0 {
                self.qualified += 1;
            }
            self.bucket_start_ms = now_ms;
            self.bucket_events = 0;
        }
        self.qualified >= self.required
    }

    pub fn record(&mut self) {
        self.bucket_events += 1;
    }

    /// Close out the in-progress bucket at window end
    pub fn finalize(&mut self) -> bool {
        if self.bucket_events > 0 {
            self.qualified += 1;
            self.bucket_events = 0;
        }
        self.qualified >= self.required
    }

    pub fn qualified(&self) -> usize {
        self.qualified
    }
}

fn subscribe_body(mint: &str) -> String {
    json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "logsSubscribe",
        "params": [
            { "mentions": [mint] },
            { "commitment": "processed" },
        ],
    })
    .to_string()
}

async fn open_subscribed(ws_url: &str, mint: &str) -> anyhow::Result<WsStream> {
    let (mut ws, _) = connect_async(ws_url).await?;
    ws.send(Message::Text(subscribe_body(mint))).await?;
    Ok(ws)
}

/// True when the frame is a notification carrying at least one log line
fn batch_has_logs(msg: &Message) -> bool {
    let Message::Text(text) = msg else {
        return false;
    };
    let Ok(value) = serde_json::from_str::<Value>(text) else {
        return false;
    };
    value["params"]["result"]["value"]["logs"]
        .as_array()
        .is_some_and(|logs| !logs.is_empty())
}

/// Classify trade flow on `mint` within the configured window.
/// Returns true when a qualifying rush is detected.
pub async fn monitor_spikes(ws_url: &str, mint: &str, config: &SpikeConfig) -> bool {
    let result = if config.use_buckets {
        detect_by_buckets(ws_url, mint, config).await
    } else {
        detect_by_pops(ws_url, mint, config).await
    };
    match result {
        Ok(hit) => hit,
        Err(e) => {
            warn!("spike monitor error for {mint}: {e}");
            false
        }
    }
}

async fn detect_by_pops(ws_url: &str, mint: &str, config: &SpikeConfig) -> anyhow::Result<bool> {
    let mut ws = open_subscribed(ws_url, mint).await?;
    let window = Duration::from_secs_f64(config.window_secs);
    let start = Instant::now();
    let mut chain = PopChain::new(config.gap_min_ms, config.gap_max_ms, config.required);

    while start.elapsed() <= window {
        let remaining = window
            .saturating_sub(start.elapsed())
            .max(Duration::from_millis(50));
        let msg = match timeout(remaining, ws.next()).await {
            Ok(Some(Ok(msg))) => msg,
            Ok(Some(Err(_))) | Ok(None) => break,
            Err(_) => break, // window elapsed without enough pops
        };
        if !batch_has_logs(&msg) {
            continue;
        }
        let len = chain.record(start.elapsed().as_millis() as u64);
        debug!("pop {len}/{} for {mint}", config.required);
        if chain.triggered() {
            return Ok(true);
        }
    }
    Ok(false)
}

async fn detect_by_buckets(ws_url: &str, mint: &str, config: &SpikeConfig) -> anyhow::Result<bool> {
    let mut ws = open_subscribed(ws_url, mint).await?;
    let window = Duration::from_secs_f64(config.window_secs);
    let start = Instant::now();
    let mut tally = BucketTally::new(config.bucket_secs, config.required);
    let mut events_in_window = 0usize;

    // short receive timeout keeps buckets rolling during quiet stretches
    let per_iter = Duration::from_secs_f64((config.bucket_secs as f64 / 4.0).clamp(0.05, 0.5));

    while start.elapsed() <= window {
        if tally.roll(start.elapsed().as_millis() as u64) {
            debug!("bucket qualified ({}/{}) for {mint}", tally.qualified(), config.required);
            return Ok(true);
        }

        let msg = match timeout(per_iter, ws.next()).await {
            Ok(Some(Ok(msg))) => msg,
            Ok(Some(Err(_))) | Ok(None) => break,
            Err(_) => continue,
        };
        if !batch_has_logs(&msg) {
            continue;
        }

        tally.record();
        events_in_window += 1;

        // heuristic fast-path: several events early means continuous
        // buying pressure, no need to wait out the buckets
        if config.cum_window_secs > 0.0
            && start.elapsed().as_secs_f64() <= config.cum_window_secs
            && events_in_window >= config.cum_min_events
        {
            debug!("cumulative early trigger for {mint} (events={events_in_window})");
            return Ok(true);
        }
    }

    Ok(tally.finalize())
}

/// Re-entry gate: return true on the first non-empty batch within the
/// timeout, else false. A single event is enough to call the flow fresh.
pub async fn wait_for_next_pop(ws_url: &str, mint: &str, timeout_ms: u64) -> bool {
    let deadline = Instant::now() + Duration::from_millis(timeout_ms.max(100));
    let mut ws = match open_subscribed(ws_url, mint).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("wait_for_next_pop error for {mint}: {e}");
            return false;
        }
    };

    while Instant::now() < deadline {
        match timeout(Duration::from_millis(500), ws.next()).await {
            Ok(Some(Ok(msg))) => {
                if batch_has_logs(&msg) {
                    return true;
                }
            }
            Ok(Some(Err(_))) | Ok(None) => return false,
            Err(_) => continue,
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pop_chain_triggers_on_consecutive_valid_gaps() {
        let mut chain = PopChain::new(800, 6000, 4);
        assert_eq!(chain.record(0), 1);
        assert_eq!(chain.record(1000), 2);
        assert_eq!(chain.record(2500), 3);
        assert_eq!(chain.record(4000), 4);
        assert!(chain.triggered());
    }

    #[test]
    fn test_pop_chain_resets_on_gap_violation() {
        let mut chain = PopChain::new(800, 6000, 4);
        chain.record(0);
        chain.record(1000);
        chain.record(2000);
        // 100ms gap is below gap_min: chain restarts at this pop
        assert_eq!(chain.record(2100), 1);
        assert!(!chain.triggered());
        // gap above gap_max also resets
        chain.record(3000);
        assert_eq!(chain.record(20_000), 1);
    }

    #[test]
    fn test_bucket_tally_qualifies_nonempty_buckets() {
        let mut tally = BucketTally::new(2, 2);
        tally.record();
        assert!(!tally.roll(2000)); // first bucket qualifies, 1/2
        assert_eq!(tally.qualified(), 1);
        assert!(!tally.roll(3000)); // same bucket still open
        tally.record();
        assert!(tally.roll(4000)); // second qualifies, 2/2
    }

    #[test]
    fn test_bucket_tally_empty_buckets_do_not_qualify() {
        let mut tally = BucketTally::new(2, 2);
        assert!(!tally.roll(2000));
        assert!(!tally.roll(4000));
        assert_eq!(tally.qualified(), 0);
        assert!(!tally.finalize());
    }

    #[test]
    fn test_bucket_finalize_counts_partial_bucket() {
        let mut tally = BucketTally::new(2, 1);
        tally.record();
        // window ends mid-bucket
        assert!(tally.finalize());
    }
}
