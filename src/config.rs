//! Configuration loading and validation

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use crate::constants;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub rpc: RpcConfig,
    #[serde(default)]
    pub watch: WatchConfig,
    #[serde(default)]
    pub trading: TradingConfig,
    #[serde(default)]
    pub aggregator: AggregatorConfig,
    #[serde(default)]
    pub sell_retry: SellRetryConfig,
    #[serde(default)]
    pub stairs: StairsConfig,
    #[serde(default)]
    pub spike: SpikeConfig,
    #[serde(default)]
    pub mcap: McapConfig,
    #[serde(default)]
    pub dynamic_bag: DynamicBagConfig,
    #[serde(default)]
    pub jump: JumpConfig,
    #[serde(default)]
    pub janitor: JanitorConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcConfig {
    #[serde(default = "default_rpc_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_ws_endpoint")]
    pub ws_endpoint: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            endpoint: default_rpc_endpoint(),
            ws_endpoint: default_ws_endpoint(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

/// New-token detection feed
#[derive(Debug, Clone, Deserialize)]
pub struct WatchConfig {
    /// Programs whose log mentions we subscribe to
    #[serde(default = "default_watch_programs")]
    pub program_ids: Vec<String>,
    /// The token-launch program; creation markers only count from here
    #[serde(default = "default_launch_program")]
    pub launch_program_id: String,
    /// Optional smoke test: inject this mint as a candidate at startup
    #[serde(default)]
    pub force_mint: Option<String>,
    /// Fixed reconnect pause; the feed is latency-critical so no backoff growth
    #[serde(default = "default_reconnect_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            program_ids: default_watch_programs(),
            launch_program_id: default_launch_program(),
            force_mint: None,
            reconnect_delay_ms: default_reconnect_ms(),
            heartbeat_secs: default_heartbeat_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TradingConfig {
    /// USD spent per buy in classic mode
    #[serde(default = "default_buy_usd")]
    pub buy_usd: f64,
    /// Wall-clock buy window measured from first detection
    #[serde(default = "default_entry_max_age_seconds")]
    pub entry_max_age_seconds: f64,
    /// Reject candidates older than this many slots at admission (0 disables)
    #[serde(default = "default_entry_max_age_slots")]
    pub entry_max_age_slots: u64,
    /// Fixed-delay exit: sell this long after the buy
    #[serde(default = "default_exit_after_seconds")]
    pub exit_after_seconds: f64,
    /// Fraction of balance sold by the seller loop, 0..1
    #[serde(default = "default_sell_fraction")]
    pub sell_fraction: f64,
    /// Buy-admission pacing (non-blocking token bucket)
    #[serde(default = "default_max_buys_per_sec")]
    pub max_buys_per_sec: f64,
    #[serde(default = "default_slippage_bps_buy")]
    pub slippage_bps_buy: u32,
    #[serde(default = "default_slippage_bps_sell")]
    pub slippage_bps_sell: u32,
    /// Priority fee in lamports; 0 means derive from priority_fee_usd
    #[serde(default = "default_priority_fee_lamports")]
    pub priority_fee_lamports: u64,
    /// Sell-side override; 0 falls back to the buy-side value
    #[serde(default)]
    pub priority_fee_lamports_sell: u64,
    #[serde(default)]
    pub priority_fee_usd: f64,
    /// Reject quotes whose implied pool depth is below this
    #[serde(default)]
    pub min_liquidity_usd: f64,
    /// Reject quotes whose price impact fraction exceeds this
    #[serde(default = "default_max_price_impact")]
    pub max_price_impact: f64,
    /// Extra delay before the first scheduled sell when the balance
    /// was not yet visible after the buy
    #[serde(default = "default_settle_buffer_seconds")]
    pub settle_buffer_seconds: f64,
    /// True on-chain mint age gate, 0 disables either bound
    #[serde(default)]
    pub mint_age_min_seconds: f64,
    #[serde(default)]
    pub mint_age_max_seconds: f64,
    #[serde(default = "default_mint_age_page_limit")]
    pub mint_age_page_limit: usize,
    #[serde(default = "default_mint_age_max_pages")]
    pub mint_age_max_pages: usize,
    /// Check mint authority before stairs entries
    #[serde(default)]
    pub rug_check_enabled: bool,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            buy_usd: default_buy_usd(),
            entry_max_age_seconds: default_entry_max_age_seconds(),
            entry_max_age_slots: default_entry_max_age_slots(),
            exit_after_seconds: default_exit_after_seconds(),
            sell_fraction: default_sell_fraction(),
            max_buys_per_sec: default_max_buys_per_sec(),
            slippage_bps_buy: default_slippage_bps_buy(),
            slippage_bps_sell: default_slippage_bps_sell(),
            priority_fee_lamports: default_priority_fee_lamports(),
            priority_fee_lamports_sell: 0,
            priority_fee_usd: 0.0,
            min_liquidity_usd: 0.0,
            max_price_impact: default_max_price_impact(),
            settle_buffer_seconds: default_settle_buffer_seconds(),
            mint_age_min_seconds: 0.0,
            mint_age_max_seconds: 0.0,
            mint_age_page_limit: default_mint_age_page_limit(),
            mint_age_max_pages: default_mint_age_max_pages(),
            rug_check_enabled: false,
        }
    }
}

/// Jupiter-style quote/swap API pacing and retry policy
#[derive(Debug, Clone, Deserialize)]
pub struct AggregatorConfig {
    #[serde(default = "default_aggregator_base_url")]
    pub base_url: String,
    #[serde(default = "default_aggregator_rps")]
    pub max_rps: f64,
    #[serde(default = "default_aggregator_burst")]
    pub max_burst: f64,
    #[serde(default = "default_aggregator_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
    /// SOL/USD reference price cache TTL
    #[serde(default = "default_price_ttl_secs")]
    pub price_ttl_secs: f64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            base_url: default_aggregator_base_url(),
            max_rps: default_aggregator_rps(),
            max_burst: default_aggregator_burst(),
            max_retries: default_aggregator_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            http_timeout_secs: default_http_timeout_secs(),
            price_ttl_secs: default_price_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SellRetryConfig {
    /// Delay schedule in seconds; the last entry repeats for overflow tries
    #[serde(default = "default_sell_retry_schedule")]
    pub schedule: Vec<f64>,
    #[serde(default = "default_sell_retry_max_tries")]
    pub max_tries: u32,
}

impl Default for SellRetryConfig {
    fn default() -> Self {
        Self {
            schedule: default_sell_retry_schedule(),
            max_tries: default_sell_retry_max_tries(),
        }
    }
}

/// Stairs mode: spike-gated entries with mcap-driven exits
#[derive(Debug, Clone, Deserialize)]
pub struct StairsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_stairs_max_concurrent")]
    pub max_concurrent: usize,
    /// USD per stairs entry
    #[serde(default = "default_entry_clip_usd")]
    pub entry_clip_usd: f64,
    /// Milestone round hold budget
    #[serde(default = "default_scalp_hold_secs")]
    pub hold_seconds: f64,
    #[serde(default = "default_true")]
    pub reenter_until_loss: bool,
    #[serde(default = "default_scalp_cooldown_secs")]
    pub cooldown_seconds: f64,
    /// Cooldown after a losing round before the task exits
    #[serde(default = "default_blacklist_cooldown_secs")]
    pub blacklist_cooldown_seconds: f64,
    #[serde(default = "default_true")]
    pub reenter_needs_next_pop: bool,
    #[serde(default = "default_reenter_pop_timeout_ms")]
    pub reenter_pop_timeout_ms: u64,
}

impl Default for StairsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_concurrent: default_stairs_max_concurrent(),
            entry_clip_usd: default_entry_clip_usd(),
            hold_seconds: default_scalp_hold_secs(),
            reenter_until_loss: true,
            cooldown_seconds: default_scalp_cooldown_secs(),
            blacklist_cooldown_seconds: default_blacklist_cooldown_secs(),
            reenter_needs_next_pop: true,
            reenter_pop_timeout_ms: default_reenter_pop_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpikeConfig {
    #[serde(default = "default_spike_window_secs")]
    pub window_secs: f64,
    /// Qualifying pops (or buckets) needed inside the window
    #[serde(default = "default_spike_required")]
    pub required: usize,
    #[serde(default = "default_spike_gap_min_ms")]
    pub gap_min_ms: u64,
    #[serde(default = "default_spike_gap_max_ms")]
    pub gap_max_ms: u64,
    /// Select the bucket algorithm instead of pop-gap chains
    #[serde(default)]
    pub use_buckets: bool,
    #[serde(default = "default_spike_bucket_secs")]
    pub bucket_secs: u64,
    /// Early cumulative fast-path window; 0 disables
    #[serde(default = "default_cum_window_secs")]
    pub cum_window_secs: f64,
    #[serde(default = "default_cum_min_events")]
    pub cum_min_events: usize,
}

impl Default for SpikeConfig {
    fn default() -> Self {
        Self {
            window_secs: default_spike_window_secs(),
            required: default_spike_required(),
            gap_min_ms: default_spike_gap_min_ms(),
            gap_max_ms: default_spike_gap_max_ms(),
            use_buckets: false,
            bucket_secs: default_spike_bucket_secs(),
            cum_window_secs: default_cum_window_secs(),
            cum_min_events: default_cum_min_events(),
        }
    }
}

/// Market-cap estimation and milestone ladder
#[derive(Debug, Clone, Deserialize)]
pub struct McapConfig {
    #[serde(default = "default_tp_levels")]
    pub tp_levels: Vec<f64>,
    #[serde(default = "default_tp_fractions")]
    pub tp_fractions: Vec<f64>,
    #[serde(default = "default_sell_all_level")]
    pub sell_all_level: f64,
    /// Stop-loss arms once mcap first reaches this
    #[serde(default = "default_arm_stop_after")]
    pub arm_stop_after: f64,
    #[serde(default = "default_stop_loss")]
    pub stop_loss: f64,
    /// Full exit when a single poll-to-poll drop reaches this percent
    #[serde(default = "default_instant_drop_stop_pct")]
    pub instant_drop_stop_pct: f64,
    #[serde(default = "default_token_total_supply")]
    pub token_total_supply: u64,
    #[serde(default = "default_token_decimals")]
    pub token_decimals: u32,
    #[serde(default = "default_mcap_check_interval_ms")]
    pub check_interval_ms: u64,
    /// Per-mint quote cache: do not requote more often than this
    #[serde(default = "default_quote_min_interval_ms")]
    pub quote_min_interval_ms: u64,
}

impl Default for McapConfig {
    fn default() -> Self {
        Self {
            tp_levels: default_tp_levels(),
            tp_fractions: default_tp_fractions(),
            sell_all_level: default_sell_all_level(),
            arm_stop_after: default_arm_stop_after(),
            stop_loss: default_stop_loss(),
            instant_drop_stop_pct: default_instant_drop_stop_pct(),
            token_total_supply: default_token_total_supply(),
            token_decimals: default_token_decimals(),
            check_interval_ms: default_mcap_check_interval_ms(),
            quote_min_interval_ms: default_quote_min_interval_ms(),
        }
    }
}

/// Open-ended ladder stepping by a fixed USD increment
#[derive(Debug, Clone, Deserialize)]
pub struct DynamicBagConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_bag_start_usd")]
    pub start_usd: f64,
    #[serde(default = "default_bag_step_usd")]
    pub step_usd: f64,
    #[serde(default = "default_bag_sell_fraction")]
    pub sell_fraction: f64,
    #[serde(default = "default_bag_max_usd")]
    pub max_usd: f64,
    #[serde(default = "default_bag_idle_timeout_secs")]
    pub idle_timeout_seconds: f64,
    #[serde(default = "default_bag_max_duration_secs")]
    pub max_duration_seconds: f64,
}

impl Default for DynamicBagConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            start_usd: default_bag_start_usd(),
            step_usd: default_bag_step_usd(),
            sell_fraction: default_bag_sell_fraction(),
            max_usd: default_bag_max_usd(),
            idle_timeout_seconds: default_bag_idle_timeout_secs(),
            max_duration_seconds: default_bag_max_duration_secs(),
        }
    }
}

/// Entry trigger watching for a low-to-high mcap jump.
///
/// Every threshold is validated when the mode is enabled; there is no
/// silent defaulting of missing values at use sites.
#[derive(Debug, Clone, Deserialize)]
pub struct JumpConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub lo_usd: f64,
    #[serde(default)]
    pub hi_usd: f64,
    #[serde(default)]
    pub require_delta_usd: f64,
    #[serde(default)]
    pub window_seconds: f64,
    #[serde(default = "default_jump_check_ms")]
    pub check_ms: u64,
}

impl Default for JumpConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            lo_usd: 0.0,
            hi_usd: 0.0,
            require_delta_usd: 0.0,
            window_seconds: 0.0,
            check_ms: default_jump_check_ms(),
        }
    }
}

/// Background rent reclamation for long-empty token accounts
#[derive(Debug, Clone, Deserialize)]
pub struct JanitorConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// An account must sit empty this long before it is closed
    #[serde(default = "default_janitor_cooldown_secs")]
    pub cooldown_seconds: f64,
    #[serde(default = "default_janitor_interval_secs")]
    pub interval_seconds: f64,
    #[serde(default = "default_janitor_max_per_min")]
    pub max_closes_per_minute: usize,
    /// Skip cycles while the wallet is below this SOL reserve
    #[serde(default = "default_janitor_min_reserve")]
    pub min_sol_reserve: f64,
    /// Pause while trading activity happened within this window
    #[serde(default = "default_janitor_idle_window_secs")]
    pub idle_window_seconds: f64,
    #[serde(default = "default_janitor_excludes")]
    pub exclude_mints: Vec<String>,
}

impl Default for JanitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cooldown_seconds: default_janitor_cooldown_secs(),
            interval_seconds: default_janitor_interval_secs(),
            max_closes_per_minute: default_janitor_max_per_min(),
            min_sol_reserve: default_janitor_min_reserve(),
            idle_window_seconds: default_janitor_idle_window_secs(),
            exclude_mints: default_janitor_excludes(),
        }
    }
}

// Default value functions
fn default_rpc_endpoint() -> String {
    std::env::var("RPC_ENDPOINT").unwrap_or_else(|_| "https://api.mainnet-beta.solana.com".into())
}

fn default_ws_endpoint() -> String {
    std::env::var("RPC_WS_ENDPOINT").unwrap_or_else(|_| "wss://api.mainnet-beta.solana.com".into())
}

fn default_timeout_ms() -> u64 {
    30000
}

fn default_launch_program() -> String {
    "DezXAZ8z7PfnVsKXcE4cYGP33aDDoa5zQPKcTgUX5bC9".into()
}

fn default_watch_programs() -> Vec<String> {
    vec![default_launch_program()]
}

fn default_reconnect_ms() -> u64 {
    500
}

fn default_heartbeat_secs() -> u64 {
    5
}

fn default_buy_usd() -> f64 {
    10.0
}

fn default_entry_max_age_seconds() -> f64 {
    60.0
}

fn default_entry_max_age_slots() -> u64 {
    3
}

fn default_exit_after_seconds() -> f64 {
    5.0
}

fn default_sell_fraction() -> f64 {
    0.995
}

fn default_max_buys_per_sec() -> f64 {
    0.1
}

fn default_slippage_bps_buy() -> u32 {
    9000
}

fn default_slippage_bps_sell() -> u32 {
    800
}

fn default_priority_fee_lamports() -> u64 {
    1_100_000
}

fn default_max_price_impact() -> f64 {
    0.95
}

fn default_settle_buffer_seconds() -> f64 {
    0.5
}

fn default_mint_age_page_limit() -> usize {
    1000
}

fn default_mint_age_max_pages() -> usize {
    6
}

fn default_aggregator_base_url() -> String {
    "https://quote-api.jup.ag/v6".into()
}

fn default_aggregator_rps() -> f64 {
    6.0
}

fn default_aggregator_burst() -> f64 {
    6.0
}

fn default_aggregator_retries() -> u32 {
    5
}

fn default_backoff_base_ms() -> u64 {
    200
}

fn default_http_timeout_secs() -> u64 {
    8
}

fn default_price_ttl_secs() -> f64 {
    15.0
}

fn default_sell_retry_schedule() -> Vec<f64> {
    vec![0.6, 1.3, 2.1, 3.0, 4.0]
}

fn default_sell_retry_max_tries() -> u32 {
    5
}

fn default_stairs_max_concurrent() -> usize {
    3
}

fn default_entry_clip_usd() -> f64 {
    10.0
}

fn default_scalp_hold_secs() -> f64 {
    3.0
}

fn default_scalp_cooldown_secs() -> f64 {
    1.0
}

fn default_blacklist_cooldown_secs() -> f64 {
    120.0
}

fn default_reenter_pop_timeout_ms() -> u64 {
    6000
}

fn default_spike_window_secs() -> f64 {
    60.0
}

fn default_spike_required() -> usize {
    4
}

fn default_spike_gap_min_ms() -> u64 {
    800
}

fn default_spike_gap_max_ms() -> u64 {
    6000
}

fn default_spike_bucket_secs() -> u64 {
    2
}

fn default_cum_window_secs() -> f64 {
    12.0
}

fn default_cum_min_events() -> usize {
    3
}

fn default_tp_levels() -> Vec<f64> {
    vec![120_000.0, 130_000.0, 140_000.0, 150_000.0]
}

fn default_tp_fractions() -> Vec<f64> {
    vec![0.30, 0.25, 0.20, 0.15]
}

fn default_sell_all_level() -> f64 {
    160_000.0
}

fn default_arm_stop_after() -> f64 {
    115_000.0
}

fn default_stop_loss() -> f64 {
    110_000.0
}

fn default_instant_drop_stop_pct() -> f64 {
    3.5
}

fn default_token_total_supply() -> u64 {
    1_000_000_000
}

fn default_token_decimals() -> u32 {
    6
}

fn default_mcap_check_interval_ms() -> u64 {
    250
}

fn default_quote_min_interval_ms() -> u64 {
    750
}

fn default_bag_start_usd() -> f64 {
    120_000.0
}

fn default_bag_step_usd() -> f64 {
    10_000.0
}

fn default_bag_sell_fraction() -> f64 {
    0.10
}

fn default_bag_max_usd() -> f64 {
    2_000_000.0
}

fn default_bag_idle_timeout_secs() -> f64 {
    10.0
}

fn default_bag_max_duration_secs() -> f64 {
    600.0
}

fn default_jump_check_ms() -> u64 {
    250
}

fn default_janitor_cooldown_secs() -> f64 {
    172_800.0
}

fn default_janitor_interval_secs() -> f64 {
    12.0
}

fn default_janitor_max_per_min() -> usize {
    5
}

fn default_janitor_min_reserve() -> f64 {
    0.5
}

fn default_janitor_idle_window_secs() -> f64 {
    20.0
}

fn default_janitor_excludes() -> Vec<String> {
    vec![constants::SOL_MINT.to_string()]
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let settings = config::Config::builder()
            // Load from file if exists
            .add_source(config::File::from(path).required(false))
            // Override with environment variables (prefix SNIPER_)
            .add_source(
                config::Environment::with_prefix("SNIPER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        if self.watch.program_ids.is_empty() && self.watch.force_mint.is_none() {
            anyhow::bail!("watch.program_ids is empty and no force_mint set; nothing to watch");
        }

        if self.trading.buy_usd <= 0.0 {
            anyhow::bail!("trading.buy_usd must be positive");
        }

        if self.trading.slippage_bps_buy > 10000 || self.trading.slippage_bps_sell > 10000 {
            anyhow::bail!("slippage_bps cannot exceed 10000 (100%)");
        }

        if !(0.0..=1.0).contains(&self.trading.sell_fraction) {
            anyhow::bail!("trading.sell_fraction must be between 0 and 1");
        }

        if self.trading.max_buys_per_sec <= 0.0 {
            anyhow::bail!("trading.max_buys_per_sec must be positive");
        }

        if self.sell_retry.schedule.is_empty() {
            anyhow::bail!("sell_retry.schedule must have at least one delay");
        }

        if self.sell_retry.schedule.iter().any(|d| *d < 0.0) {
            anyhow::bail!("sell_retry.schedule delays must be non-negative");
        }

        if self.aggregator.max_rps <= 0.0 || self.aggregator.max_burst < 1.0 {
            anyhow::bail!("aggregator pacing must allow at least 1 request");
        }

        if self.mcap.tp_levels.len() != self.mcap.tp_fractions.len() {
            anyhow::bail!(
                "mcap.tp_levels and mcap.tp_fractions lengths differ ({} vs {})",
                self.mcap.tp_levels.len(),
                self.mcap.tp_fractions.len()
            );
        }

        if self
            .mcap
            .tp_fractions
            .iter()
            .any(|f| !(0.0..=1.0).contains(f))
        {
            anyhow::bail!("mcap.tp_fractions must all be within 0..1");
        }

        if self.mcap.tp_levels.windows(2).any(|w| w[0] >= w[1]) {
            anyhow::bail!("mcap.tp_levels must be strictly increasing");
        }

        if !(0.0..=1.0).contains(&self.dynamic_bag.sell_fraction) {
            anyhow::bail!("dynamic_bag.sell_fraction must be between 0 and 1");
        }

        if self.stairs.max_concurrent == 0 {
            anyhow::bail!("stairs.max_concurrent must be at least 1");
        }

        if self.spike.gap_min_ms > self.spike.gap_max_ms {
            anyhow::bail!("spike.gap_min_ms exceeds spike.gap_max_ms");
        }

        // Jump thresholds are required, not defaulted, when the mode is on
        if self.jump.enabled {
            if self.jump.lo_usd <= 0.0 || self.jump.hi_usd <= self.jump.lo_usd {
                anyhow::bail!("jump mode requires 0 < lo_usd < hi_usd");
            }
            if self.jump.require_delta_usd <= 0.0 {
                anyhow::bail!("jump.require_delta_usd must be positive");
            }
            if self.jump.window_seconds <= 0.0 {
                anyhow::bail!("jump.window_seconds must be positive");
            }
        }

        Ok(())
    }

    /// Get masked configuration for display (hide secrets)
    pub fn masked_display(&self) -> String {
        format!(
            r#"Configuration:
  RPC:
    endpoint: {}
    ws: {}
  Watch:
    programs: {}
    launch_program: {}
  Trading:
    buy_usd: {}
    entry_window: {}s ({} slots)
    exit_after: {}s
    sell_fraction: {}
    max_buys_per_sec: {}
    slippage: buy {}bps / sell {}bps
    min_liquidity_usd: {}
  Aggregator:
    base_url: {}
    pacing: {} rps, burst {}
    retries: {} (base {}ms)
  Mode: {}
"#,
            mask_url(&self.rpc.endpoint),
            mask_url(&self.rpc.ws_endpoint),
            self.watch.program_ids.len(),
            self.watch.launch_program_id,
            self.trading.buy_usd,
            self.trading.entry_max_age_seconds,
            self.trading.entry_max_age_slots,
            self.trading.exit_after_seconds,
            self.trading.sell_fraction,
            self.trading.max_buys_per_sec,
            self.trading.slippage_bps_buy,
            self.trading.slippage_bps_sell,
            self.trading.min_liquidity_usd,
            self.aggregator.base_url,
            self.aggregator.max_rps,
            self.aggregator.max_burst,
            self.aggregator.max_retries,
            self.aggregator.backoff_base_ms,
            if self.stairs.enabled { "STAIRS" } else { "CLASSIC" },
        )
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rpc: RpcConfig::default(),
            watch: WatchConfig::default(),
            trading: TradingConfig::default(),
            aggregator: AggregatorConfig::default(),
            sell_retry: SellRetryConfig::default(),
            stairs: StairsConfig::default(),
            spike: SpikeConfig::default(),
            mcap: McapConfig::default(),
            dynamic_bag: DynamicBagConfig::default(),
            jump: JumpConfig::default(),
            janitor: JanitorConfig::default(),
        }
    }
}

/// Mask URL for display (hide API keys in query params)
fn mask_url(url: &str) -> String {
    if let Some(idx) = url.find('?') {
        format!("{}?***", &url[..idx])
    } else {
        url.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sell_retry.schedule, vec![0.6, 1.3, 2.1, 3.0, 4.0]);
        assert_eq!(config.trading.entry_max_age_slots, 3);
    }

    #[test]
    fn test_jump_mode_requires_thresholds() {
        let mut config = Config::default();
        config.jump.enabled = true;
        assert!(config.validate().is_err());

        config.jump.lo_usd = 15_000.0;
        config.jump.hi_usd = 60_000.0;
        config.jump.require_delta_usd = 30_000.0;
        config.jump.window_seconds = 45.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_ladder_lengths_must_match() {
        let mut config = Config::default();
        config.mcap.tp_fractions.pop();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_mask_url() {
        assert_eq!(
            mask_url("https://api.example.com?key=secret"),
            "https://api.example.com?***"
        );
        assert_eq!(
            mask_url("https://api.example.com"),
            "https://api.example.com"
        );
    }
}
