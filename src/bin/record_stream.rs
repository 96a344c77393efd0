//! Stream Recorder Binary
//!
//! Subscribes the live price/volume stream and writes pool-state updates
//! to a JSONL replay file for later backtesting. Swap volume events are
//! counted but not recorded; the replay format carries prices only.
//!
//! Usage:
//!   cargo run --bin record-stream -- --config poolmaker.toml --out prices.jsonl

use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use poolmaker::config::BotConfig;
use poolmaker::indexer::{
    DataStream, IndexerClient, LastPriceFilter, PriceVolumeStream, QueryParams,
};
use poolmaker::replay::JsonlReplayWriter;
use poolmaker::types::{MarketUpdate, PriceUpdate};
use std::time::Duration;
use tokio_stream::wrappers::IntervalStream;
use tokio_stream::StreamExt;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "record-stream", about = "Record the live price stream to a replay file")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "poolmaker.toml")]
    config: String,
    /// Output replay file (JSONL)
    #[arg(long)]
    out: String,
    /// Poll cadence in seconds
    #[arg(long, default_value_t = 2)]
    poll_seconds: u64,
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

    info!("Stream recorder starting");
    info!("  Indexer: {}", config.indexer_url());
    info!("  Pools: {}", config.pairs.len());
    info!("  Output: {}", args.out);

    let client = IndexerClient::new(config.indexer_url());
    let params = QueryParams {
        after_time: Some(Utc::now()),
        ..QueryParams::default()
    };
    let stream = DataStream::new(client, config.pool_map(), params);
    let mut stream = PriceVolumeStream::new(
        stream,
        config.engine.swap_fee_micro,
        config.engine.skip_same_time,
    );

    let mut writer = JsonlReplayWriter::create(&args.out)?;
    let mut filter = LastPriceFilter::new();
    let mut n_prices = 0u64;
    let mut n_swaps = 0u64;

    let mut ticks = IntervalStream::new(tokio::time::interval(Duration::from_secs(
        args.poll_seconds,
    )));

    while ticks.next().await.is_some() {
        let updates = match stream.poll().await {
            Ok(updates) => updates,
            Err(e) => {
                error!("stream poll failed, retrying next tick: {e}");
                continue;
            }
        };

        for update in updates {
            for compacted in filter.push(update) {
                match compacted.update {
                    MarketUpdate::Price(state) => {
                        writer.append(&PriceUpdate::new(compacted.pair, state))?;
                        n_prices += 1;
                    }
                    MarketUpdate::Volume(_) => n_swaps += 1,
                }
            }
        }
        writer.flush()?;

        if (n_prices + n_swaps) % 1000 == 0 && n_prices + n_swaps > 0 {
            info!("recorded {n_prices} price updates, observed {n_swaps} swaps");
        }
    }
    Ok(())
}
