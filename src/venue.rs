//! Abstract AMM venue boundary.
//!
//! The engine only ever talks to the venue through [`VenueClient`]; the
//! concrete SDK adapter (transaction assembly, signing, node submission)
//! lives behind this trait and outside the core. The venue owns the
//! account address and signing key.

use crate::optimizer::SwapQuote;
use crate::types::{AssetId, Micro, Pair};
use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VenueError {
    #[error("venue transport error: {0}")]
    Transport(String),
    #[error("pool does not exist for pair {0}")]
    NonExistentPool(Pair),
    #[error("venue rejected the transaction group: {0}")]
    Rejected(String),
}

/// A pool as the venue reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pool {
    pub exists: bool,
    pub address: String,
    pub r_reserves: u64,
    pub b_reserves: u64,
    pub liquidity_asset_id: AssetId,
}

/// Opaque handle to a prepared (and venue-side signable) transaction
/// group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionGroup {
    pub group_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitResult {
    pub txid: String,
    /// Non-empty on a venue-side rejection.
    pub pool_error: String,
}

/// Operations the engine requires of an AMM venue, per pool.
#[async_trait]
pub trait VenueClient: Send {
    /// Look up the pool backing a pair.
    async fn fetch_pool(&mut self, pair: Pair) -> Result<Pool, VenueError>;

    /// Re-read the bound pool's reserves.
    async fn refresh(&mut self) -> Result<Pool, VenueError>;

    async fn is_opted_in(&self, asset: AssetId) -> Result<bool, VenueError>;

    async fn prepare_asset_optin(&self, asset: AssetId) -> Result<TransactionGroup, VenueError>;

    async fn prepare_swap_from_quote(
        &self,
        quote: &SwapQuote,
    ) -> Result<TransactionGroup, VenueError>;

    async fn prepare_redeem(
        &self,
        asset: AssetId,
        amount: Micro,
    ) -> Result<TransactionGroup, VenueError>;

    /// Sign and submit a prepared group.
    async fn submit(
        &mut self,
        group: TransactionGroup,
        wait: bool,
    ) -> Result<SubmitResult, VenueError>;

    /// Excess amounts credited to the account's pool-side buckets.
    async fn fetch_excess_amounts(&self) -> Result<HashMap<AssetId, i64>, VenueError>;
}
