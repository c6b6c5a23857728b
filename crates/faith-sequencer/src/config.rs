//! Sequencer configuration.
//!
//! [`SequencerConfig`] has working defaults for every field. [`SequencerConfig::load`]
//! layers an optional TOML file and `FAITH_*` environment variables on top
//! (`FAITH_BACKOFF__MAX_WAIT_MS=60000` sets `backoff.max_wait_ms`).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use faith_alloc::{FeeSchedule, LiquidityCurve};
use faith_core::constants::SATS_PER_BTC;
use faith_core::error::FaithError;

/// Settlement polling schedule for one activation.
///
/// Poll delays start at `initial_delay_ms` and grow by `multiplier`, each
/// capped at `max_delay_ms`. Once the cumulative wait reaches `max_wait_ms`
/// the settlement resolves to a timeout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    pub max_wait_ms: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: 250,
            max_delay_ms: 10_000,
            multiplier: 2.0,
            max_wait_ms: 120_000,
        }
    }
}

impl BackoffPolicy {
    /// Delay before poll number `attempt` (zero-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(attempt.min(64) as i32);
        let ms = (self.initial_delay_ms as f64 * factor).min(self.max_delay_ms as f64);
        Duration::from_millis(ms as u64)
    }

    /// Hard ceiling on the total wait.
    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }

    pub fn validate(&self) -> Result<(), FaithError> {
        if self.initial_delay_ms == 0 || self.max_delay_ms < self.initial_delay_ms {
            return Err(FaithError::Config(format!(
                "backoff delays {}..{} ms out of order",
                self.initial_delay_ms, self.max_delay_ms
            )));
        }
        if self.multiplier.is_nan() || self.multiplier < 1.0 {
            return Err(FaithError::Config(format!(
                "backoff multiplier {} below 1",
                self.multiplier
            )));
        }
        Ok(())
    }
}

/// Exchange rates used by [`crate::feed::FixedRateFeed`], keyed by lowercase
/// asset name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub rates: HashMap<String, FeedRate>,
}

/// Sats paid for `per_units` smallest units of an asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedRate {
    pub sats: u64,
    pub per_units: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        let rates = [
            ("btc", FeedRate { sats: 1, per_units: 1 }),
            // 1 ETH (1e18 wei) = 0.05 BTC.
            ("eth", FeedRate { sats: SATS_PER_BTC / 20, per_units: 1_000_000_000_000_000_000 }),
            // 1 SOL (1e9 lamports) = 0.002 BTC.
            ("sol", FeedRate { sats: SATS_PER_BTC / 500, per_units: 1_000_000_000 }),
            // Stablecoins at 6 decimals, 1 USD = 1_000 sats.
            ("usdc", FeedRate { sats: 1_000, per_units: 1_000_000 }),
            ("usdt", FeedRate { sats: 1_000, per_units: 1_000_000 }),
        ];
        Self {
            rates: rates
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        }
    }
}

/// Configuration for a sequencer instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequencerConfig {
    /// Root directory for all persistent data.
    pub data_dir: PathBuf,
    pub backoff: BackoffPolicy,
    pub fees: FeeSchedule,
    pub curve: LiquidityCurve,
    pub feed: FeedConfig,
    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
    /// Log level filter string (e.g. "info", "debug", "faith_sequencer=trace").
    pub log_level: String,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("faith");

        Self {
            data_dir,
            backoff: BackoffPolicy::default(),
            fees: FeeSchedule::default(),
            curve: LiquidityCurve::default(),
            feed: FeedConfig::default(),
            event_capacity: 1024,
            log_level: "info".to_string(),
        }
    }
}

impl SequencerConfig {
    /// Build a configuration from defaults, an optional TOML file, then
    /// `FAITH_*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, FaithError> {
        let defaults = config::Config::try_from(&Self::default())
            .map_err(|e| FaithError::Config(e.to_string()))?;
        let mut builder = config::Config::builder().add_source(defaults);
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let cfg: Self = builder
            .add_source(
                config::Environment::with_prefix("FAITH")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| FaithError::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), FaithError> {
        self.backoff.validate()?;
        self.fees.validate()?;
        self.curve.validate()?;
        if self.event_capacity == 0 {
            return Err(FaithError::Config("zero event capacity".into()));
        }
        Ok(())
    }

    /// Path to the RocksDB data directory.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("sequencer")
    }
}
