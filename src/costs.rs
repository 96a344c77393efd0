//! Trade cost accounting.
//!
//! Costs are first computed in the bought asset's pricing terms and then
//! converted to base-unit basis for logging and comparison.

use crate::types::BuySide;
use serde::{Deserialize, Serialize};

/// Fixed base-asset fee paid per swap group, in micro-units.
pub const FIXED_FEE_MICRO: u64 = 3000;

/// Proportional pool fee rate: inputs are grossed up by 1000/997.
pub const FEE_BPS: f64 = 1000.0 / 997.0 - 1.0;

/// Expected execution slippage, in fractional bps.
pub const EXPECTED_SLIPPAGE_BPS: f64 = 0.0;

/// Relative tolerance for price-invariant trade comparisons.
pub const REL_TOL: f64 = 1e-9;

/// Average impact cost per unit bought squared, for a pool holding
/// `reserves` of the bought asset. Fees multiply the impact too.
pub fn avg_impact_cost_coef(reserves: u64) -> f64 {
    (1.0 + FEE_BPS) / reserves as f64
}

pub fn rel_close(a: f64, b: f64, rel_tol: f64) -> bool {
    (a - b).abs() <= rel_tol * a.abs().max(b.abs())
}

/// Costs of a single buy, in units of the asset paid (the "other" asset).
#[derive(Debug, Clone, Copy)]
pub struct TradeCostsOther {
    pub quadratic_impact_cost: f64,
    pub linear_impact_cost: f64,
    pub fees: f64,
    pub fixed_fees: f64,
    side: BuySide,
    buy_price_other: f64,
}

impl TradeCostsOther {
    /// `pair_impact` is the pair's impact-state value before the trade; the
    /// buy-base direction sees it through the reciprocal transform.
    pub fn new(
        side: BuySide,
        buy_amount: u64,
        buy_reserves: u64,
        buy_price_other: f64,
        pair_impact: f64,
    ) -> Self {
        let amount = buy_amount as f64;
        let quadratic_impact_cost =
            amount * amount * buy_price_other * avg_impact_cost_coef(buy_reserves);

        let impact_bps = match side {
            BuySide::Base => 1.0 / (1.0 + pair_impact) - 1.0,
            BuySide::Reserve => pair_impact,
        };
        // A favourable residual impact is not a cost
        let linear_impact_cost = if impact_bps < 0.0 {
            0.0
        } else {
            amount * buy_price_other * impact_bps
        };

        let fees = FEE_BPS * amount * buy_price_other;
        let fixed_fees = match side {
            BuySide::Reserve => FIXED_FEE_MICRO as f64,
            BuySide::Base => FIXED_FEE_MICRO as f64 / buy_price_other,
        };

        Self {
            quadratic_impact_cost,
            linear_impact_cost,
            fees,
            fixed_fees,
            side,
            buy_price_other,
        }
    }

    /// Convert to base-unit basis. Buying the reserve asset pays base, so
    /// those costs already are base amounts; buying base pays the reserve
    /// asset, whose price in base is the reciprocal of `buy_price_other`.
    pub fn to_base_basis(&self) -> TradeCosts {
        let price = match self.side {
            BuySide::Reserve => 1.0,
            BuySide::Base => 1.0 / self.buy_price_other,
        };
        TradeCosts {
            quadratic_impact_cost: self.quadratic_impact_cost * price,
            linear_impact_cost: self.linear_impact_cost * price,
            fees: self.fees * price,
            fixed_fees: FIXED_FEE_MICRO as f64,
        }
    }
}

/// Trade costs in base micro-units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TradeCosts {
    pub quadratic_impact_cost: f64,
    pub linear_impact_cost: f64,
    pub fees: f64,
    pub fixed_fees: f64,
}

impl TradeCosts {
    pub fn approx_eq_to(&self, right: &TradeCosts) -> bool {
        rel_close(
            self.quadratic_impact_cost,
            right.quadratic_impact_cost,
            REL_TOL,
        ) && rel_close(self.linear_impact_cost, right.linear_impact_cost, REL_TOL)
            && rel_close(self.fees, right.fees, REL_TOL)
            && rel_close(self.fixed_fees, right.fixed_fees, REL_TOL)
    }

    pub fn total(&self) -> f64 {
        self.quadratic_impact_cost + self.linear_impact_cost + self.fees + self.fixed_fees
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fee_rate() {
        // 0.3% pool fee expressed as a gross-up
        assert!((FEE_BPS - 0.003009).abs() < 1e-6);
    }

    #[test]
    fn test_buy_reserve_costs_to_base() {
        // Buy 1000 units of the reserve asset priced at 2 base per reserve
        // from a pool holding 1e9 of it.
        let costs = TradeCostsOther::new(BuySide::Reserve, 1000, 1_000_000_000, 2.0, 0.001);
        let base = costs.to_base_basis();

        let expected_quad = 1000.0f64.powi(2) * 2.0 * (1.0 + FEE_BPS) / 1e9;
        assert!(rel_close(base.quadratic_impact_cost, expected_quad, 1e-12));
        assert!(rel_close(base.linear_impact_cost, 1000.0 * 2.0 * 0.001, 1e-12));
        assert!(rel_close(base.fees, FEE_BPS * 1000.0 * 2.0, 1e-12));
        assert_eq!(base.fixed_fees, FIXED_FEE_MICRO as f64);
    }

    #[test]
    fn test_negative_impact_is_free() {
        let costs = TradeCostsOther::new(BuySide::Reserve, 1000, 1_000_000_000, 2.0, -0.5);
        assert_eq!(costs.linear_impact_cost, 0.0);
    }

    #[test]
    fn test_buy_base_sees_reciprocal_impact() {
        // Positive reserve-asset impact makes buying base cheaper, not dearer.
        let costs = TradeCostsOther::new(BuySide::Base, 1000, 1_000_000_000, 0.5, 0.01);
        assert_eq!(costs.linear_impact_cost, 0.0);

        let costs = TradeCostsOther::new(BuySide::Base, 1000, 1_000_000_000, 0.5, -0.01);
        assert!(costs.linear_impact_cost > 0.0);
    }
}
