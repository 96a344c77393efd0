//! AMM Market-Making Engine Library
//!
//! Provides components for automated market making on constant-product
//! pools. Includes the live trading engine and a deterministic
//! backtesting simulator that share one trade-logic code path.

pub mod clock;
pub mod config;
pub mod costs;
pub mod engine;
pub mod impact;
pub mod indexer;
pub mod optimizer;
pub mod replay;
pub mod signal;
pub mod simulator;
pub mod swapper;
pub mod trade_logger;
pub mod trades;
pub mod types;
pub mod venue;

// Re-export commonly used types
pub use config::BotConfig;
pub use engine::{Engine, EngineSettings, TradeLogic};
pub use impact::{ImpactState, Position};
pub use optimizer::{Optimizer, SwapQuote};
pub use simulator::Simulator;
pub use swapper::{ProductionSwapper, SimulationSwapper, Swapper};
pub use trade_logger::{StateLogger, TradeLogger};
pub use types::{Micro, Pair, PoolState, PriceUpdate, Swap};
