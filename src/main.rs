//! Live market-making engine entry point.
//!
//! Streams pool state from the chain indexer and runs the trading loop.
//! Fills are simulated (dry run) unless a venue adapter is wired in; the
//! engine itself is identical either way.

use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use poolmaker::clock::SystemClock;
use poolmaker::config::BotConfig;
use poolmaker::engine::Engine;
use poolmaker::indexer::{DataStream, IndexerClient, LiveMarketSource, PriceVolumeStream, QueryParams};
use poolmaker::swapper::SimulationSwapper;
use poolmaker::trade_logger::{StateLogger, TradeLogger};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "poolmaker", about = "AMM market-making engine")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "poolmaker.toml")]
    config: String,
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

    info!("AMM Market-Making Engine starting");
    info!("  Indexer: {}", config.indexer_url());
    info!("  Pairs: {:?}", config.pairs());
    info!("  Risk coef: {}", config.engine.risk_coef);

    let client = IndexerClient::new(config.indexer_url());
    // Seed signals from the start of the current day, then stream.
    let params = QueryParams {
        after_time: Some(
            Utc::now()
                .date_naive()
                .and_hms_opt(0, 0, 0)
                .unwrap_or_default()
                .and_utc(),
        ),
        ..QueryParams::default()
    };
    let stream = DataStream::new(client, config.pool_map(), params);
    let source = LiveMarketSource::new(PriceVolumeStream::new(
        stream,
        config.engine.swap_fee_micro,
        config.engine.skip_same_time,
    ));

    let swappers: HashMap<_, _> = config
        .pairs()
        .into_iter()
        .map(|pair| (pair, SimulationSwapper))
        .collect();
    info!("running with simulated fills (no venue adapter configured)");

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

    let mut engine = Engine::new(
        config.build_trade_logic(),
        swappers,
        source,
        Arc::new(SystemClock),
        config.engine_settings(),
    );

    engine
        .run(
            &mut |trade| {
                if let Some(logger) = trade_logger.as_mut() {
                    logger.log_trade(&trade);
                }
            },
            &mut |state| {
                info!("position snapshot: {state:?}");
                if let Some(logger) = state_logger.as_mut() {
                    logger.log_state(&state);
                }
            },
        )
        .await
}
