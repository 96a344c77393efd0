//! Self-impact tracking and inventory positions.
//!
//! Each pair carries an exponentially decaying record of the price
//! deflection caused by the engine's own trades, plus the reserve-asset
//! inventory. The base-asset balance is global. Positions can never go
//! negative: shorting is an invariant violation and aborts the process.

use crate::trades::{PairStateLog, PoolSwap, StateLog};
use crate::types::{BuySide, Micro, Pair};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Instantaneous price deflection of the bought asset, in units of the
/// sold asset, when taking `fraction` of the bought asset's reserves out
/// of a constant-product pool.
pub fn impact_deflection(fraction: f64) -> f64 {
    assert!((0.0..=1.0).contains(&fraction), "fraction out of range");
    1.0 / (1.0 - fraction).powi(2) - 1.0
}

/// Average deflection paid per unit bought over a single transaction.
pub fn avg_impact_deflection(fraction: f64) -> f64 {
    assert!((0.0..=1.0).contains(&fraction), "fraction out of range");
    1.0 / (1.0 - fraction) - 1.0
}

/// Exponentially decaying record of self-inflicted price deflection for
/// one pair, in fractional bps of the reserve-asset price.
#[derive(Debug, Clone)]
pub struct ImpactState {
    last_update: Option<DateTime<Utc>>,
    value_bps: f64,
    decay_seconds: u32,
}

impl ImpactState {
    pub fn new(decay_seconds: u32) -> Self {
        assert!(decay_seconds > 0);
        Self {
            last_update: None,
            value_bps: 0.0,
            decay_seconds,
        }
    }

    pub fn decay_seconds(&self) -> u32 {
        self.decay_seconds
    }

    /// Residual impact at time `t`. Zero before the first update.
    pub fn value(&self, t: DateTime<Utc>) -> f64 {
        match self.last_update {
            None => 0.0,
            Some(t0) => self.value_bps * self.decay_factor(t0, t),
        }
    }

    /// Fold a fill into the state: decay the previous value to `t`, then
    /// add the deflection caused by this trade.
    pub fn update(
        &mut self,
        side: BuySide,
        amount_buy: Micro,
        r_reserves: u64,
        b_reserves: u64,
        t: DateTime<Utc>,
    ) {
        let decayed = match self.last_update {
            None => 0.0,
            Some(t0) => self.value_bps * self.decay_factor(t0, t),
        };

        let increment = match side {
            BuySide::Base => {
                assert!(amount_buy.0 <= b_reserves, "buy amount exceeds base reserves");
                let deflection = impact_deflection(amount_buy.as_f64() / b_reserves as f64);
                1.0 / (1.0 + deflection) - 1.0
            }
            BuySide::Reserve => {
                assert!(
                    amount_buy.0 <= r_reserves,
                    "buy amount exceeds reserve-asset reserves"
                );
                impact_deflection(amount_buy.as_f64() / r_reserves as f64)
            }
        };

        self.value_bps = decayed + increment;
        self.last_update = Some(t);
        assert!(self.value_bps.abs() < 1.0, "impact state out of bounds");
    }

    fn decay_factor(&self, t0: DateTime<Utc>, t1: DateTime<Utc>) -> f64 {
        let dt = (t1 - t0).num_microseconds().unwrap_or(i64::MAX) as f64 / 1e6;
        (-dt / self.decay_seconds as f64).exp()
    }
}

/// Inventory and impact for a single pair.
#[derive(Debug, Clone)]
pub struct PairPosition {
    pub impact: ImpactState,
    pub r_position: Micro,
}

impl PairPosition {
    pub fn new(impact_decay_seconds: u32, r_position: Micro) -> Self {
        Self {
            impact: ImpactState::new(impact_decay_seconds),
            r_position,
        }
    }
}

/// All inventory owned by the engine: per-pair reserve-asset positions
/// plus the global base-asset balance.
#[derive(Debug, Clone)]
pub struct Position {
    pairs: BTreeMap<Pair, PairPosition>,
    pub b_position: Micro,
}

impl Position {
    pub fn new(
        pairs: impl IntoIterator<Item = (Pair, Micro)>,
        impact_decay_seconds: u32,
        b_position: Micro,
    ) -> Self {
        let pairs = pairs
            .into_iter()
            .map(|(pair, r)| (pair, PairPosition::new(impact_decay_seconds, r)))
            .collect();
        Self { pairs, b_position }
    }

    pub fn pair(&self, pair: Pair) -> &PairPosition {
        self.pairs.get(&pair).unwrap_or_else(|| {
            panic!("pair {pair} not tracked in position");
        })
    }

    pub fn pair_mut(&mut self, pair: Pair) -> &mut PairPosition {
        self.pairs.get_mut(&pair).unwrap_or_else(|| {
            panic!("pair {pair} not tracked in position");
        })
    }

    /// Fold a fill into impact and inventory. The base balance moves by
    /// the base leg, the pair inventory by the reserve leg; going negative
    /// on either side aborts.
    pub fn apply_fill(
        &mut self,
        pair: Pair,
        swap: &PoolSwap,
        r_reserves: u64,
        b_reserves: u64,
        t: DateTime<Utc>,
    ) {
        let side = swap.side(pair);
        match side {
            BuySide::Base => {
                self.b_position += swap.amount_buy;
                let state = self.pair_mut(pair);
                state.r_position = state
                    .r_position
                    .checked_sub(swap.amount_sell)
                    .unwrap_or_else(|| panic!("reserve position for {pair} went negative"));
            }
            BuySide::Reserve => {
                self.b_position = self
                    .b_position
                    .checked_sub(swap.amount_sell)
                    .unwrap_or_else(|| panic!("base position went negative on {pair}"));
                self.pair_mut(pair).r_position += swap.amount_buy;
            }
        }
        self.pair_mut(pair)
            .impact
            .update(side, swap.amount_buy, r_reserves, b_reserves, t);
    }

    /// Fold redeemed excess back into the position. Redemption only ever
    /// adds.
    pub fn apply_redeem(&mut self, pair: Pair, r_amount: Micro, b_amount: Micro) {
        self.pair_mut(pair).r_position += r_amount;
        self.b_position += b_amount;
    }

    pub fn state_log(&self, time: DateTime<Utc>) -> StateLog {
        StateLog {
            time,
            b_position: self.b_position,
            pairs: self
                .pairs
                .iter()
                .map(|(pair, state)| PairStateLog {
                    r_id: pair.r_id,
                    r_position: state.r_position,
                    impact_bps: state.impact.value(time),
                })
                .collect(),
        }
    }
}
