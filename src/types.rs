//! Core data structures for the market-making engine.
//!
//! All amounts are integer micro-units (1e-6 of nominal) wrapped in the
//! [`Micro`] newtype so nominal and micro quantities cannot be mixed by
//! accident. Prices are derived quantities: for a pair with reserves
//! (r, b), price(R in B) = b / r.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};

/// On-chain asset identifier. Asset id 0 is the chain's native asset.
pub type AssetId = u64;

/// An integer amount in micro-units (1e-6 of nominal).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Micro(pub u64);

impl Micro {
    /// Micro-units per nominal unit.
    pub const PER_UNIT: u64 = 1_000_000;

    pub const ZERO: Micro = Micro(0);

    /// Convert a nominal amount to micro-units (truncating).
    pub fn from_nominal(nominal: f64) -> Self {
        Micro((nominal * Self::PER_UNIT as f64) as u64)
    }

    /// Nominal value as a float. Lossy above 2^53; display/report use only.
    pub fn to_nominal(self) -> f64 {
        self.0 as f64 / Self::PER_UNIT as f64
    }

    pub fn as_f64(self) -> f64 {
        self.0 as f64
    }

    pub fn checked_sub(self, rhs: Micro) -> Option<Micro> {
        self.0.checked_sub(rhs.0).map(Micro)
    }

    pub fn saturating_sub(self, rhs: Micro) -> Micro {
        Micro(self.0.saturating_sub(rhs.0))
    }

    pub fn min(self, rhs: Micro) -> Micro {
        Micro(self.0.min(rhs.0))
    }
}

impl Add for Micro {
    type Output = Micro;
    fn add(self, rhs: Micro) -> Micro {
        Micro(self.0 + rhs.0)
    }
}

impl AddAssign for Micro {
    fn add_assign(&mut self, rhs: Micro) {
        self.0 += rhs.0;
    }
}

impl Sub for Micro {
    type Output = Micro;
    fn sub(self, rhs: Micro) -> Micro {
        Micro(self.0 - rhs.0)
    }
}

impl SubAssign for Micro {
    fn sub_assign(&mut self, rhs: Micro) {
        self.0 -= rhs.0;
    }
}

impl fmt::Display for Micro {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}u", self.0)
    }
}

/// A trading pair: reserve asset against the base (numeraire) asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Pair {
    pub r_id: AssetId,
    pub b_id: AssetId,
}

impl Pair {
    pub fn new(r_id: AssetId, b_id: AssetId) -> Self {
        Self { r_id, b_id }
    }

    pub fn contains(&self, asset: AssetId) -> bool {
        asset == self.r_id || asset == self.b_id
    }

    /// The other asset of the pair.
    pub fn other(&self, asset: AssetId) -> AssetId {
        if asset == self.r_id {
            self.b_id
        } else {
            self.r_id
        }
    }
}

impl fmt::Display for Pair {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.r_id, self.b_id)
    }
}

/// Which side of the pool a trade buys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuySide {
    Base,
    Reserve,
}

/// Pool reserves snapshot, produced once per state-changing application
/// call observed on chain.
///
/// `intra_block_order` strictly increases within a single `t` for a given
/// pair and resets to 0 on a new `t`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolState {
    /// Round time, integer epoch seconds UTC.
    pub t: u64,
    pub r_reserves: u64,
    pub b_reserves: u64,
    pub intra_block_order: u16,
}

impl PoolState {
    /// Price of the reserve asset in base units.
    pub fn price(&self) -> f64 {
        self.b_reserves as f64 / self.r_reserves as f64
    }

    pub fn time(&self) -> DateTime<Utc> {
        epoch_to_datetime(self.t)
    }
}

/// A completed swap against a pool. Positive amounts enter the pool,
/// negative amounts leave it; the two legs always have opposite signs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Swap {
    pub t: u64,
    pub r_amount: i64,
    pub b_amount: i64,
    pub counterparty: String,
    pub block: u64,
}

/// One market event for a pair: either a reserves snapshot or a swap.
#[derive(Debug, Clone, PartialEq)]
pub enum MarketUpdate {
    Price(PoolState),
    Volume(Swap),
}

/// A market event tagged with its pair.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceOrVolumeUpdate {
    pub pair: Pair,
    pub update: MarketUpdate,
}

/// A pool-state update tagged with its pair; the replay-file record shape.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceUpdate {
    pub r_id: AssetId,
    pub b_id: AssetId,
    pub t_seconds: u64,
    pub r_reserves: u64,
    pub b_reserves: u64,
    pub intra_block_order: u16,
}

impl PriceUpdate {
    pub fn new(pair: Pair, state: PoolState) -> Self {
        Self {
            r_id: pair.r_id,
            b_id: pair.b_id,
            t_seconds: state.t,
            r_reserves: state.r_reserves,
            b_reserves: state.b_reserves,
            intra_block_order: state.intra_block_order,
        }
    }

    pub fn pair(&self) -> Pair {
        Pair::new(self.r_id, self.b_id)
    }

    pub fn state(&self) -> PoolState {
        PoolState {
            t: self.t_seconds,
            r_reserves: self.r_reserves,
            b_reserves: self.b_reserves,
            intra_block_order: self.intra_block_order,
        }
    }
}

/// An amount of a specific asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetAmount {
    pub asset: AssetId,
    pub amount: Micro,
}

impl AssetAmount {
    pub fn new(asset: AssetId, amount: u64) -> Self {
        Self {
            asset,
            amount: Micro(amount),
        }
    }
}

pub fn epoch_to_datetime(t: u64) -> DateTime<Utc> {
    Utc.timestamp_opt(t as i64, 0).unwrap()
}
