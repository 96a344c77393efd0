//! Backtest Binary
//!
//! Replays a recorded price stream through the simulator and writes the
//! resulting trade log. Repeated runs over the same replay file are
//! byte-identical.
//!
//! Usage:
//!   cargo run --bin backtest -- --config poolmaker.toml \
//!       --replay prices.jsonl --end-time 2021-11-20T00:00:00Z

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use clap::Parser;
use poolmaker::config::BotConfig;
use poolmaker::replay::JsonlReplayReader;
use poolmaker::simulator::Simulator;
use poolmaker::trade_logger::{StateLogger, TradeLogger};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "backtest", about = "Deterministic backtest over a replay file")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "poolmaker.toml")]
    config: String,
    /// Replay file (JSONL of price updates, monotone in time)
    #[arg(long)]
    replay: String,
    /// Stop the simulation at this time (RFC 3339)
    #[arg(long)]
    end_time: DateTime<Utc>,
    /// Simulated seconds between trade ticks
    #[arg(long, default_value_t = 300)]
    step_seconds: u32,
    /// Hours of price history fed to the signals before trading starts
    #[arg(long, default_value_t = 24)]
    seed_hours: i64,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    let config = BotConfig::load(&args.config)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.general.log_level.clone())),
        )
        .with_target(false)
        .init();

    info!("Backtest starting");
    info!("  Replay: {}", args.replay);
    info!("  End time: {}", args.end_time);
    info!("  Step: {}s, seed: {}h", args.step_seconds, args.seed_hours);

    let feed = JsonlReplayReader::open(&args.replay)?;
    let mut simulator = Simulator::new(
        config.build_trade_logic(),
        feed,
        args.step_seconds,
        Duration::hours(args.seed_hours),
    );

    let mut trade_logger = config
        .general
        .trade_log_dir
        .as_deref()
        .map(TradeLogger::new);
    let mut state_logger = config
        .general
        .trade_log_dir
        .as_deref()
        .map(StateLogger::new);
    let mut n_trades = 0u64;

    simulator
        .run(
            args.end_time,
            &mut |trade| {
                n_trades += 1;
                info!("trade: {trade:?}");
                if let Some(logger) = trade_logger.as_mut() {
                    logger.log_trade(&trade);
                }
            },
            &mut |state| {
                if let Some(logger) = state_logger.as_mut() {
                    logger.log_state(&state);
                }
            },
        )
        .await?;

    info!("Backtest finished: {n_trades} trades");
    Ok(())
}
