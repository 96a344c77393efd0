//! Configuration management
//!
//! Engine configuration lives in a TOML file; the indexer endpoint can
//! be overridden through the environment (loaded via dotenv in the
//! binaries).

use crate::engine::{EngineSettings, TradeLogic};
use crate::signal::{DummySignalProvider, EmaSignalParam, EmaSignalProvider, PriceSignalProvider};
use crate::types::{AssetId, Micro, Pair};
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Top-level TOML configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    pub general: GeneralConfig,
    pub engine: EngineConfig,
    pub signal: SignalConfig,
    #[serde(rename = "pairs")]
    pub pairs: Vec<PairConfig>,
}

/// General settings
#[derive(Debug, Clone, Deserialize)]
pub struct GeneralConfig {
    pub indexer_url: String,
    #[serde(default)]
    pub trade_log_dir: Option<String>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String { "info".to_string() }

/// Engine cadences and trading parameters
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_trading_step")]
    pub trading_step_seconds: u64,
    #[serde(default = "default_market_update_step")]
    pub market_update_step_seconds: u64,
    #[serde(default = "default_sync_positions_step")]
    pub sync_positions_step_seconds: u64,
    pub risk_coef: f64,
    pub impact_decay_seconds: u32,
    #[serde(default)]
    pub slippage_bps: f64,
    #[serde(default = "default_lag_trade_limit")]
    pub lag_trade_limit_seconds: u64,
    #[serde(default = "default_swap_fee")]
    pub swap_fee_micro: u64,
    #[serde(default)]
    pub initial_b_position_micro: u64,
    /// Re-read pool reserves before each live submission.
    #[serde(default)]
    pub refresh_reserves: bool,
    /// Drop repeated identical pool states within one round time.
    #[serde(default)]
    pub skip_same_time: bool,
}

fn default_trading_step() -> u64 { 10 }
fn default_market_update_step() -> u64 { 2 }
fn default_sync_positions_step() -> u64 { 100 }
fn default_lag_trade_limit() -> u64 { 60 }
fn default_swap_fee() -> u64 { 2000 }

/// Signal family configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SignalConfig {
    /// Cap on the emitted signal, fractional bps in (0, 1].
    pub cap: f64,
    #[serde(default)]
    pub ema: Vec<EmaSignalParam>,
}

/// One tradable pair and its pool
#[derive(Debug, Clone, Deserialize)]
pub struct PairConfig {
    pub r_id: AssetId,
    #[serde(default)]
    pub b_id: AssetId,
    /// On-chain pool address, used to filter the transaction stream.
    pub address: String,
    #[serde(default)]
    pub initial_r_position_micro: u64,
}

impl BotConfig {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        let config: Self =
            toml::from_str(&content).with_context(|| "Failed to parse TOML configuration")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.pairs.is_empty() {
            bail!("no pairs configured");
        }
        if !(self.signal.cap > 0.0 && self.signal.cap <= 1.0) {
            bail!("signal cap must be in (0, 1]");
        }
        for pair in &self.pairs {
            if pair.r_id == pair.b_id {
                bail!("pair {} trades against itself", pair.r_id);
            }
        }
        Ok(())
    }

    /// Indexer endpoint, overridable through the environment.
    pub fn indexer_url(&self) -> String {
        std::env::var("INDEXER_URL").unwrap_or_else(|_| self.general.indexer_url.clone())
    }

    pub fn pairs(&self) -> Vec<Pair> {
        self.pairs.iter().map(|p| Pair::new(p.r_id, p.b_id)).collect()
    }

    /// Pool address to pair mapping for the transaction stream.
    pub fn pool_map(&self) -> HashMap<String, Pair> {
        self.pairs
            .iter()
            .map(|p| (p.address.clone(), Pair::new(p.r_id, p.b_id)))
            .collect()
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            trading_step: Duration::from_secs(self.engine.trading_step_seconds),
            market_update_step: Duration::from_secs(self.engine.market_update_step_seconds),
            sync_positions_step: Duration::from_secs(self.engine.sync_positions_step_seconds),
            lag_trade_limit: Duration::from_secs(self.engine.lag_trade_limit_seconds),
        }
    }

    /// One signal provider per pair, from the configured EMA family.
    pub fn make_signal_provider(&self) -> Box<dyn PriceSignalProvider> {
        if self.signal.ema.is_empty() {
            Box::new(DummySignalProvider::zero())
        } else {
            Box::new(EmaSignalProvider::new(&self.signal.ema, self.signal.cap))
        }
    }

    /// Assemble the engine's trade logic from this configuration.
    pub fn build_trade_logic(&self) -> TradeLogic {
        let pairs = self
            .pairs
            .iter()
            .map(|p| {
                (
                    Pair::new(p.r_id, p.b_id),
                    Micro(p.initial_r_position_micro),
                    self.make_signal_provider(),
                )
            })
            .collect();
        TradeLogic::new(
            pairs,
            self.engine.risk_coef,
            self.engine.impact_decay_seconds,
            Micro(self.engine.initial_b_position_micro),
            self.engine.slippage_bps,
        )
    }
}
