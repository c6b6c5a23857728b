//! Faith sequencer node binary.
//!
//! Opens RocksDB storage, resumes any queued activations, ingests deposits
//! from a JSON-lines file and settles them over the simulated bridge.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use faith_core::error::FaithError;
use faith_core::traits::DepositSource;
use faith_sequencer::feed::FixedRateFeed;
use faith_sequencer::source::JsonLinesSource;
use faith_sequencer::transport::{SimulatedBridge, SimulatedBridgeConfig};
use faith_sequencer::{RocksStore, Sequencer, SequencerConfig, SequencerOptions};

#[derive(Parser, Debug)]
#[command(
    name = "faith-node",
    version,
    about = "Faith activation sequencer with RocksDB storage"
)]
struct Args {
    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Data directory for sequencer storage
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// JSON-lines file of deposit facts to ingest
    #[arg(long)]
    deposits: Option<PathBuf>,

    /// Keep running after the queue drains (until Ctrl+C)
    #[arg(long)]
    keep_running: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Log output format ("text" or "json")
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Minimum simulated settlement latency in milliseconds
    #[arg(long, default_value_t = 50)]
    sim_min_latency_ms: u64,

    /// Maximum simulated settlement latency in milliseconds
    #[arg(long, default_value_t = 500)]
    sim_max_latency_ms: u64,

    /// Probability in [0, 1] that a simulated settlement is rejected
    #[arg(long, default_value_t = 0.0)]
    sim_failure_rate: f64,

    /// Seed for the simulated bridge
    #[arg(long)]
    seed: Option<u64>,
}

impl Args {
    fn into_config(self) -> Result<(SequencerConfig, RunOptions)> {
        let mut config = SequencerConfig::load(self.config.as_deref())
            .context("failed to load configuration")?;
        if let Some(dir) = self.data_dir {
            config.data_dir = dir;
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }
        let bridge = SimulatedBridgeConfig {
            min_latency: Duration::from_millis(self.sim_min_latency_ms),
            max_latency: Duration::from_millis(self.sim_max_latency_ms),
            failure_probability: self.sim_failure_rate,
        };
        let run = RunOptions {
            deposits: self.deposits,
            keep_running: self.keep_running,
            log_format: self.log_format,
            bridge,
            seed: self.seed,
        };
        Ok((config, run))
    }
}

struct RunOptions {
    deposits: Option<PathBuf>,
    keep_running: bool,
    log_format: String,
    bridge: SimulatedBridgeConfig,
    seed: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let (config, run) = Args::parse().into_config()?;
    init_logging(&config.log_level, &run.log_format);

    info!("Faith sequencer v{}", env!("CARGO_PKG_VERSION"));
    info!("data_dir: {:?}", config.data_dir);

    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("failed to create {}", config.data_dir.display()))?;
    let store = RocksStore::open(config.db_path()).context("failed to open storage")?;

    let bridge = match run.seed {
        Some(seed) => SimulatedBridge::with_seed(run.bridge.clone(), seed),
        None => SimulatedBridge::new(run.bridge.clone()),
    };
    let sequencer = Sequencer::open(
        Box::new(store),
        Arc::new(bridge),
        SequencerOptions::from_config(&config)?,
    )?;

    let snap = sequencer.snapshot();
    info!(
        tokens_minted = snap.state.tokens_minted,
        next_price = snap.state.next_price,
        queued = sequencer.queue_depth(),
        "sequencer opened"
    );

    let worker = tokio::spawn(Arc::clone(&sequencer).run());

    if let Some(path) = &run.deposits {
        let feed = FixedRateFeed::new(&config.feed);
        let mut source = JsonLinesSource::open(path).await?;
        let (mut accepted, mut rejected) = (0u64, 0u64);
        while let Some(fact) = source.next_deposit().await? {
            match sequencer.submit_deposit(&fact, &feed) {
                Ok(_) => accepted += 1,
                Err(
                    e @ (FaithError::Validation(_)
                    | FaithError::Allocation(_)
                    | FaithError::PriceFeed(_)),
                ) => {
                    rejected += 1;
                    warn!(key = %fact.key(), "rejected deposit: {e}");
                }
                Err(e) => return Err(e.into()),
            }
        }
        info!(accepted, rejected, "deposit file ingested");
    }

    let drained = async {
        if run.keep_running {
            std::future::pending::<()>().await;
        }
        sequencer.wait_idle().await;
    };

    tokio::select! {
        _ = drained => info!("queue drained"),
        res = tokio::signal::ctrl_c() => {
            res.context("failed to listen for Ctrl+C")?;
            info!("received Ctrl+C, finishing in-flight activation");
        }
    }

    sequencer.shutdown();
    worker.await.context("worker panicked")??;

    let snap = sequencer.snapshot();
    info!(
        tokens_minted = snap.state.tokens_minted,
        next_price = snap.state.next_price,
        proof_of_faith = snap.state.proof_of_faith,
        coins_released = snap.state.coins_released,
        system_total_btc = snap.totals.system_total_btc,
        development_sats = snap.totals.development_sats,
        liquidity_sats = snap.totals.liquidity_sats,
        "Faith sequencer shutdown complete"
    );
    Ok(())
}

/// Initialize tracing with the given level and output format.
///
/// `RUST_LOG` takes precedence over `level_str`. Pass `format = "json"` for
/// structured output; anything else gives human-readable text.
fn init_logging(level_str: &str, format: &str) {
    use tracing_subscriber::filter::EnvFilter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level_str));

    if format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_level(true))
            .init();
    }
}
