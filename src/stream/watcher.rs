//! New-token detection feed
//!
//! Subscribes to log notifications for the watched programs, filters for
//! launch-program creation events, and pushes candidates onto the queue
//! before any network validation happens. Candidates are extracted from
//! the raw log text; when the logs surface nothing, a slower transaction
//! lookup runs off the hot path. Connection errors reconnect after a fixed
//! short pause with no backoff growth: the feed is latency-critical.

use futures_util::{SinkExt, StreamExt};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::config::WatchConfig;
use crate::constants::{
    AGGREGATOR_PROGRAM, ATA_PROGRAM, COMPUTE_BUDGET_PROGRAM, RENT_SYSVAR, SOL_MINT,
    SYSTEM_PROGRAM, TOKEN_2022_PROGRAM, TOKEN_PROGRAM, USDC_MINT,
};
use crate::error::short_error;

/// A detected, not-yet-validated token
#[derive(Debug, Clone)]
pub struct Candidate {
    pub signature: String,
    pub mint: String,
    /// Monotonic detection time; the buy window is measured from here
    pub first_seen: Instant,
    pub slot: u64,
}

impl Candidate {
    fn new(signature: String, mint: String, slot: u64) -> Self {
        Self {
            signature,
            mint,
            first_seen: Instant::now(),
            slot,
        }
    }
}

/// Log markers that identify a creation event from the launch program
const CREATION_MARKERS: &[&str] = &[
    "Initialize",
    "initialize",
    "Create",
    "create",
    "Deploy",
    "deploy",
    "bonding",
    "Bonding",
];

lazy_static! {
    /// Base58-shaped strings of plausible address length
    static ref ADDRESS_RE: Regex = Regex::new(r"[1-9A-HJ-NP-Za-km-z]{32,44}").unwrap();

    /// Well-known infrastructure addresses that are never buy candidates
    static ref SKIP_LIST: HashSet<&'static str> = [
        SOL_MINT,
        USDC_MINT,
        SYSTEM_PROGRAM,
        COMPUTE_BUDGET_PROGRAM,
        ATA_PROGRAM,
        RENT_SYSVAR,
        TOKEN_PROGRAM,
        TOKEN_2022_PROGRAM,
        AGGREGATOR_PROGRAM,
    ]
    .into_iter()
    .collect();
}

/// Token programs whose initialize instructions carry the mint first
fn is_token_program(key: &str) -> bool {
    key == TOKEN_PROGRAM || key == TOKEN_2022_PROGRAM
}

/// A message qualifies only if it comes from the launch program and its
/// log text contains a creation marker. Some RPCs omit the program id on
/// mention-filtered notifications; markers alone are trusted only when
/// the launch program is the sole subscription.
fn is_creation_event(
    program_id: Option<&str>,
    logs: &[String],
    launch_program: &str,
    watch_programs: &[String],
) -> bool {
    let blob = logs.join(" ");
    let has_marker = CREATION_MARKERS.iter().any(|m| blob.contains(m));

    match program_id {
        Some(pid) => pid == launch_program && has_marker,
        None => {
            watch_programs.len() == 1 && watch_programs[0] == launch_program && has_marker
        }
    }
}

/// Extract candidate mints from raw log lines, cheapest checks only
fn extract_candidates(logs: &[String]) -> Vec<String> {
    let mut out = Vec::new();
    for line in logs {
        for m in ADDRESS_RE.find_iter(line) {
            out.push(m.as_str().to_string());
        }
    }
    out
}

/// Recover the mint from a fetched transaction's message: the first
/// account of a token-program instruction is the mint on initialize.
/// Falls back to the first non-program account key.
fn extract_mint_from_tx(tx: &Value) -> Option<String> {
    let msg = &tx["result"]["transaction"]["message"];

    let mut keys: Vec<String> = Vec::new();
    if let Some(account_keys) = msg["accountKeys"].as_array() {
        keys.extend(
            account_keys
                .iter()
                .filter_map(|k| k.as_str().map(str::to_string)),
        );
    } else {
        for source in [
            &msg["staticAccountKeys"],
            &msg["loadedAddresses"]["writable"],
            &msg["loadedAddresses"]["readonly"],
        ] {
            if let Some(arr) = source.as_array() {
                keys.extend(arr.iter().filter_map(|k| k.as_str().map(str::to_string)));
            }
        }
    }

    if let Some(ixs) = msg["instructions"].as_array() {
        for ix in ixs {
            let Some(prog_idx) = ix["programIdIndex"].as_u64().map(|i| i as usize) else {
                continue;
            };
            if prog_idx >= keys.len() || !is_token_program(&keys[prog_idx]) {
                continue;
            }
            if let Some(first) = ix["accounts"]
                .as_array()
                .and_then(|a| a.first())
                .and_then(Value::as_u64)
            {
                let idx = first as usize;
                if idx < keys.len() {
                    return Some(keys[idx].clone());
                }
            }
        }
    }

    keys.into_iter().find(|k| !is_token_program(k))
}

/// Watches the chain log feed and emits buy candidates
pub struct EventWatcher {
    config: WatchConfig,
    ws_endpoint: String,
    rpc_endpoint: String,
    out: mpsc::Sender<Candidate>,
    seen: Arc<Mutex<HashSet<String>>>,
    http: reqwest::Client,
}

impl EventWatcher {
    pub fn new(
        config: WatchConfig,
        ws_endpoint: String,
        rpc_endpoint: String,
        out: mpsc::Sender<Candidate>,
    ) -> Self {
        Self {
            config,
            ws_endpoint,
            rpc_endpoint,
            out,
            seen: Arc::new(Mutex::new(HashSet::new())),
            http: reqwest::Client::new(),
        }
    }

    /// Run until the output queue closes. Reconnects forever on errors.
    pub async fn run(self) {
        // optional smoke test: inject a fixed mint at startup
        if let Some(mint) = &self.config.force_mint {
            info!("forced candidate injection: {mint}");
            let _ = self
                .out
                .send(Candidate::new("manual".to_string(), mint.clone(), 0))
                .await;
        }

        if self.config.program_ids.is_empty() {
            warn!("no watch programs configured; detection feed idle");
            return;
        }

        loop {
            match self.connect_and_listen().await {
                Ok(()) => {
                    // queue closed, we are shutting down
                    return;
                }
                Err(e) => {
                    warn!(
                        "watcher connection error, reconnecting in {}ms ({})",
                        self.config.reconnect_delay_ms,
                        short_error(&e)
                    );
                    sleep(Duration::from_millis(self.config.reconnect_delay_ms)).await;
                }
            }
        }
    }

    async fn connect_and_listen(&self) -> anyhow::Result<()> {
        info!(
            "opening log feed to {} for {} program(s)",
            self.ws_endpoint,
            self.config.program_ids.len()
        );
        let (ws, _) = connect_async(self.ws_endpoint.as_str()).await?;
        let (mut sink, mut stream) = ws.split();

        // one subscription per program, ack awaited before the stream
        // counts as ready
        for (i, pid) in self.config.program_ids.iter().enumerate() {
            let req = json!({
                "jsonrpc": "2.0",
                "id": i + 1,
                "method": "logsSubscribe",
                "params": [
                    { "mentions": [pid] },
                    { "commitment": "processed" },
                ],
            });
            sink.send(Message::Text(req.to_string())).await?;
            match stream.next().await {
                Some(Ok(ack)) => {
                    debug!("subscribed program={pid} ack={:?}", ack.to_text().ok())
                }
                other => anyhow::bail!("no subscription ack for {pid}: {other:?}"),
            }
        }
        info!("all subscriptions acknowledged, listening for logs");

        let mut heartbeat =
            tokio::time::interval(Duration::from_secs(self.config.heartbeat_secs.max(1)));
        heartbeat.tick().await; // first tick is immediate

        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    debug!("watcher heartbeat, connected and listening");
                }
                msg = stream.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            if self.handle_notification(&text).await.is_err() {
                                // output queue closed
                                return Ok(());
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            let _ = sink.send(Message::Pong(data)).await;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => anyhow::bail!("stream error: {e}"),
                        None => anyhow::bail!("stream closed"),
                    }
                }
            }
        }
    }

    /// Returns Err only when the output queue is closed
    async fn handle_notification(&self, text: &str) -> std::result::Result<(), ()> {
        let received = Instant::now();
        let Ok(msg) = serde_json::from_str::<Value>(text) else {
            return Ok(());
        };
        if msg["method"].as_str() != Some("logsNotification") {
            return Ok(());
        }

        let result = &msg["params"]["result"];
        let value = &result["value"];
        let signature = value["signature"].as_str().unwrap_or_default().to_string();
        let slot = result["context"]["slot"].as_u64().unwrap_or(0);
        let logs: Vec<String> = value["logs"]
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|l| l.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        let program_id = value["programId"]
            .as_str()
            .or_else(|| value["program"].as_str());

        if signature.is_empty() || logs.is_empty() {
            return Ok(());
        }

        // launch-only gate; unrelated activity from the same program is noise
        if !is_creation_event(
            program_id,
            &logs,
            &self.config.launch_program_id,
            &self.config.program_ids,
        ) {
            return Ok(());
        }

        // enqueue first, validate later: no HTTP before the queue
        let mut enqueued = 0usize;
        for cand in extract_candidates(&logs) {
            if SKIP_LIST.contains(cand.as_str()) || !self.mark_seen(&cand) {
                continue;
            }
            if self
                .out
                .send(Candidate::new(signature.clone(), cand.clone(), slot))
                .await
                .is_err()
            {
                return Err(());
            }
            enqueued += 1;
            if enqueued == 1 {
                let dt_ms = received.elapsed().as_secs_f64() * 1000.0;
                info!("queued mint fast: {cand} | slot={slot} | ws->enqueue {dt_ms:.1} ms");
            } else {
                debug!("queued extra candidate: {cand} | slot={slot}");
            }
        }

        // logs surfaced nothing: resolve the mint from the transaction,
        // off the hot path so the receive loop never blocks
        if enqueued == 0 {
            debug!("scheduling tx fallback for sig {}...", &signature[..8.min(signature.len())]);
            let out = self.out.clone();
            let seen = self.seen.clone();
            let http = self.http.clone();
            let rpc = self.rpc_endpoint.clone();
            tokio::spawn(async move {
                if let Some(mint) = fetch_mint_from_tx(&http, &rpc, &signature).await {
                    if SKIP_LIST.contains(mint.as_str()) {
                        return;
                    }
                    if !seen.lock().expect("seen set poisoned").insert(mint.clone()) {
                        return;
                    }
                    if out
                        .send(Candidate::new(signature, mint.clone(), slot))
                        .await
                        .is_ok()
                    {
                        info!("queued via tx fallback: {mint} | slot={slot}");
                    }
                }
            });
        }

        Ok(())
    }

    /// Insert into the dedup set; false when already present
    fn mark_seen(&self, mint: &str) -> bool {
        self.seen
            .lock()
            .expect("seen set poisoned")
            .insert(mint.to_string())
    }
}

/// Fetch the transaction and inspect its instruction list for the mint
async fn fetch_mint_from_tx(
    http: &reqwest::Client,
    rpc_endpoint: &str,
    signature: &str,
) -> Option<String> {
    let payload = json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "getTransaction",
        "params": [signature, { "encoding": "json", "maxSupportedTransactionVersion": 0 }],
    });
    let resp = http
        .post(rpc_endpoint)
        .json(&payload)
        .timeout(Duration::from_secs(3))
        .send()
        .await
        .ok()?;
    if !resp.status().is_success() {
        return None;
    }
    let data: Value = resp.json().await.ok()?;
    extract_mint_from_tx(&data)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn logs(lines: &[&str]) -> Vec<String> {
        lines.iter().map(|s| s.to_string()).collect()
    }

    const LAUNCH: &str = "DezXAZ8z7PfnVsKXcE4cYGP33aDDoa5zQPKcTgUX5bC9";

    #[test]
    fn test_creation_filter_requires_launch_program() {
        let watch = vec![LAUNCH.to_string()];
        let create_logs = logs(&["Program log: Instruction: Create"]);

        assert!(is_creation_event(Some(LAUNCH), &create_logs, LAUNCH, &watch));
        assert!(!is_creation_event(
            Some("SomeOtherProgram1111111111111111111111111111"),
            &create_logs,
            LAUNCH,
            &watch
        ));
        // marker missing
        assert!(!is_creation_event(
            Some(LAUNCH),
            &logs(&["Program log: Instruction: Swap"]),
            LAUNCH,
            &watch
        ));
    }

    #[test]
    fn test_creation_filter_missing_program_id() {
        let create_logs = logs(&["Program log: Instruction: Create"]);
        // allowed only when the launch program is the sole subscription
        assert!(is_creation_event(
            None,
            &create_logs,
            LAUNCH,
            &[LAUNCH.to_string()]
        ));
        assert!(!is_creation_event(
            None,
            &create_logs,
            LAUNCH,
            &[LAUNCH.to_string(), "other".to_string()]
        ));
    }

    #[test]
    fn test_extract_candidates_matches_base58_lengths() {
        let lines = logs(&[
            "Program log: mint 4Nd1mYvNQv1qcB3dJrzK5W8nJf7F3XhBQsUsDDrW7xUv created",
            "short abc123",
        ]);
        let cands = extract_candidates(&lines);
        assert_eq!(cands, vec!["4Nd1mYvNQv1qcB3dJrzK5W8nJf7F3XhBQsUsDDrW7xUv"]);
    }

    #[test]
    fn test_skip_list_contains_infrastructure() {
        assert!(SKIP_LIST.contains(SOL_MINT));
        assert!(SKIP_LIST.contains(TOKEN_PROGRAM));
    }

    #[test]
    fn test_extract_mint_from_tx_token_instruction() {
        let tx = json!({
            "result": {
                "transaction": {
                    "message": {
                        "accountKeys": [
                            "PayerAccount11111111111111111111111111111111",
                            "MintAccount111111111111111111111111111111111",
                            TOKEN_PROGRAM,
                        ],
                        "instructions": [
                            { "programIdIndex": 2, "accounts": [1, 0] }
                        ],
                    }
                }
            }
        });
        assert_eq!(
            extract_mint_from_tx(&tx),
            Some("MintAccount111111111111111111111111111111111".to_string())
        );
    }

    #[test]
    fn test_extract_mint_from_tx_fallback_first_key() {
        let tx = json!({
            "result": {
                "transaction": {
                    "message": {
                        "accountKeys": [
                            "SomeAccount11111111111111111111111111111111",
                        ],
                        "instructions": [],
                    }
                }
            }
        });
        assert_eq!(
            extract_mint_from_tx(&tx),
            Some("SomeAccount11111111111111111111111111111111".to_string())
        );
    }
}
