//! Chain indexer access: HTTP client, typed transactions, and the
//! reconstruction of pool-state and swap events.

pub mod client;
pub mod reconstruct;
pub mod stream;
pub mod tx;

pub use client::{AccountInfo, IndexerClient, IndexerError, QueryParams};
pub use reconstruct::{PoolStateTracker, PoolTransaction, SwapReconstructor};
pub use stream::{DataStream, LastPriceFilter, LiveMarketSource, MarketSource, PriceVolumeStream};
pub use tx::{Transaction, TransactionRecord};
