//! The concurrent trading engine and its shared trade logic.

pub mod live;
pub mod logic;

pub use live::{Engine, EngineSettings};
pub use logic::{validate_swap, TradeLogic};
