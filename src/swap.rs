//! Aggregator client for quote and swap-transaction calls
//!
//! Every logical call takes one token from the shared process-wide bucket
//! before touching the network. Retries stay local to one call: rate-limit
//! and transient upstream failures back off and retry up to the configured
//! attempt count, while a 200 with an unparseable body is a permanent fault
//! for that attempt and is surfaced immediately.

use rand::Rng;
use reqwest::{Client, Method, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::AggregatorConfig;
use crate::error::{Error, Result};
use crate::limiter::TokenBucket;

/// Route description returned by the aggregator quote endpoint.
///
/// The raw payload is kept intact because the swap-build call echoes it
/// back verbatim; typed accessors cover the fields the sniper inspects.
#[derive(Debug, Clone)]
pub struct Quote {
    raw: Value,
}

impl Quote {
    pub fn from_value(raw: Value) -> Self {
        Self { raw }
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }

    /// Output amount in base units, 0 when absent or unparseable
    pub fn out_amount(&self) -> u64 {
        match &self.raw["outAmount"] {
            Value::String(s) => s.parse().unwrap_or(0),
            Value::Number(n) => n.as_u64().unwrap_or(0),
            _ => 0,
        }
    }

    /// Price impact as a fraction (0.01 = 1%); None when the field is absent
    pub fn price_impact(&self) -> Option<f64> {
        match &self.raw["priceImpactPct"] {
            Value::String(s) => s.parse().ok(),
            Value::Number(n) => n.as_f64(),
            _ => None,
        }
    }
}

/// Local retry policy for one logical aggregator call
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub base_ms: u64,
    pub max_retries: u32,
}

impl RetryPolicy {
    /// Deterministic part of the backoff delay for a 1-based attempt index
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.base_ms.saturating_mul(1u64 << exp))
    }

    /// Whether a failed 1-based attempt leaves budget for another try
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt <= self.max_retries
    }
}

fn jitter() -> Duration {
    Duration::from_millis(rand::thread_rng().gen_range(0..200))
}

/// HTTP client for the swap aggregator
pub struct SwapClient {
    http: Client,
    limiter: Arc<TokenBucket>,
    base_url: String,
    policy: RetryPolicy,
}

impl SwapClient {
    pub fn new(config: &AggregatorConfig, limiter: Arc<TokenBucket>) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()
            .map_err(|e| Error::Internal(format!("http client build failed: {e}")))?;
        Ok(Self {
            http,
            limiter,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            policy: RetryPolicy {
                base_ms: config.backoff_base_ms,
                max_retries: config.max_retries,
            },
        })
    }

    /// Fetch a quote for swapping `amount` base units of `input_mint`
    /// into `output_mint`.
    pub async fn quote(
        &self,
        input_mint: &str,
        output_mint: &str,
        amount: u64,
        slippage_bps: u32,
    ) -> Result<Quote> {
        let url = format!("{}/quote", self.base_url);
        let params = [
            ("inputMint", input_mint.to_string()),
            ("outputMint", output_mint.to_string()),
            ("amount", amount.to_string()),
            ("slippageBps", slippage_bps.to_string()),
            ("onlyDirectRoutes", "false".to_string()),
            ("asLegacyTransaction", "false".to_string()),
            ("restrictIntermediateTokens", "true".to_string()),
            ("swapMode", "ExactIn".to_string()),
        ];
        let value = self
            .request_json(Method::GET, &url, Some(&params), None)
            .await?;
        Ok(Quote::from_value(value))
    }

    /// Ask the aggregator to build a swap transaction for `quote`.
    /// Returns the base64-encoded serialized transaction.
    pub async fn swap_transaction(
        &self,
        quote: &Quote,
        user_pubkey: &str,
        tip_lamports: u64,
        slippage_bps: u32,
    ) -> Result<String> {
        let url = format!("{}/swap", self.base_url);
        let body = json!({
            "userPublicKey": user_pubkey,
            "quoteResponse": quote.raw(),
            "dynamicSlippage": { "maxBps": slippage_bps },
            "asLegacyTransaction": false,
            "wrapAndUnwrapSol": true,
            "useSharedAccounts": false,
            "useTokenLedger": false,
            "prioritizationFeeLamports": tip_lamports,
        });
        let value = self
            .request_json(Method::POST, &url, None, Some(body))
            .await?;
        match value.get("swapTransaction").and_then(Value::as_str) {
            Some(tx) => Ok(tx.to_string()),
            None => Err(Error::MalformedResponse(
                "no swapTransaction in response".to_string(),
            )),
        }
    }

    async fn request_json(
        &self,
        method: Method,
        url: &str,
        params: Option<&[(&str, String)]>,
        body: Option<Value>,
    ) -> Result<Value> {
        // one token per logical call; retries below do not re-acquire
        self.limiter.take(1.0).await;

        let mut attempt = 0u32;
        loop {
            attempt += 1;

            let mut req = self.http.request(method.clone(), url);
            if let Some(params) = params {
                req = req.query(params);
            }
            if let Some(body) = &body {
                req = req.json(body);
            }

            let resp = match req.send().await {
                Ok(resp) => resp,
                Err(e) => {
                    // network blip
                    if self.policy.should_retry(attempt) {
                        let delay = self.policy.delay_for(attempt) + jitter();
                        debug!("aggregator network error (attempt {attempt}), retrying in {delay:?}: {e}");
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Err(Error::UpstreamUnavailable {
                        attempts: attempt,
                        detail: e.to_string(),
                    });
                }
            };

            let status = resp.status();
            if status == StatusCode::TOO_MANY_REQUESTS {
                let server_delay = resp
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<f64>().ok())
                    .map(Duration::from_secs_f64);
                let text = resp.text().await.unwrap_or_default();
                if self.policy.should_retry(attempt) {
                    let delay =
                        server_delay.unwrap_or_else(|| self.policy.delay_for(attempt) + jitter());
                    warn!("aggregator 429 (attempt {attempt}), retrying in {delay:?}");
                    tokio::time::sleep(delay).await;
                    continue;
                }
                return Err(Error::RateLimitExhausted {
                    attempts: attempt,
                    detail: truncate(&text, 200),
                });
            }

            if status.is_server_error() {
                let text = resp.text().await.unwrap_or_default();
                if self.policy.should_retry(attempt) {
                    let delay = self.policy.delay_for(attempt) + jitter();
                    warn!(
                        "aggregator {} (attempt {attempt}), retrying in {delay:?}",
                        status.as_u16()
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
                return Err(Error::UpstreamUnavailable {
                    attempts: attempt,
                    detail: format!("{}: {}", status.as_u16(), truncate(&text, 200)),
                });
            }

            let text = resp.text().await.unwrap_or_default();
            if !status.is_success() {
                return Err(Error::AggregatorStatus {
                    status: status.as_u16(),
                    detail: truncate(&text, 200),
                });
            }

            // 2xx but unparseable: permanent for this attempt, never retried
            return serde_json::from_str(&text)
                .map_err(|_| Error::MalformedResponse(truncate(&text, 200)));
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_sequence_is_non_decreasing() {
        let policy = RetryPolicy {
            base_ms: 200,
            max_retries: 5,
        };
        let delays: Vec<Duration> = (1..=5).map(|a| policy.delay_for(a)).collect();
        assert_eq!(delays[0], Duration::from_millis(200));
        assert_eq!(delays[1], Duration::from_millis(400));
        assert_eq!(delays[4], Duration::from_millis(3200));
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_retry_budget_exhausts_exactly_after_max_retries() {
        let policy = RetryPolicy {
            base_ms: 200,
            max_retries: 5,
        };
        for attempt in 1..=5 {
            assert!(policy.should_retry(attempt), "attempt {attempt}");
        }
        // the 6th consecutive failure must fail permanently, no 6th sleep
        assert!(!policy.should_retry(6));
    }

    #[test]
    fn test_backoff_exponent_is_capped() {
        let policy = RetryPolicy {
            base_ms: 200,
            max_retries: 100,
        };
        // no overflow even for absurd attempt counts
        let d = policy.delay_for(90);
        assert!(d >= policy.delay_for(89));
    }

    #[test]
    fn test_quote_accessors() {
        let quote = Quote::from_value(serde_json::json!({
            "outAmount": "1500000",
            "priceImpactPct": "0.0123",
        }));
        assert_eq!(quote.out_amount(), 1_500_000);
        assert!((quote.price_impact().unwrap() - 0.0123).abs() < 1e-12);

        let empty = Quote::from_value(serde_json::json!({}));
        assert_eq!(empty.out_amount(), 0);
        assert!(empty.price_impact().is_none());
    }
}
