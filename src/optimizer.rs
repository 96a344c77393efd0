//! Per-pair trade-size optimisation.
//!
//! For each tick the optimizer solves two independent directional
//! problems (buy the reserve asset, buy the base asset) and emits a
//! fixed-input quote for the profitable one, if any. The objective is
//! quadratic in the buy amount: expected edge net of fees and residual
//! impact, minus average pool impact, minus inventory-risk penalties.
//!
//! At most one direction can be profitable for any input; this is
//! asserted, a violation is a logic bug.

use crate::costs::{EXPECTED_SLIPPAGE_BPS, FEE_BPS, FIXED_FEE_MICRO};
use crate::types::{AssetAmount, BuySide, Micro, Pair};
use serde::{Deserialize, Serialize};

/// Hard cap on the bought fraction of the out-side reserves.
pub const RESERVE_FRACTION_CAP: f64 = 0.10;

/// Quote kind marker: `amount_in` is exact, `amount_out` is the
/// venue-computed consequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuoteKind {
    FixedInput,
}

/// A fully specified, signable trade request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapQuote {
    pub kind: QuoteKind,
    pub amount_in: AssetAmount,
    pub amount_out: AssetAmount,
    pub fees: AssetAmount,
    /// Fractional bps, e.g. 0.01 for 1%.
    pub slippage_bps: f64,
}

impl SwapQuote {
    pub fn amount_out_with_slippage(&self) -> Micro {
        Micro((self.amount_out.amount.as_f64() * (1.0 - self.slippage_bps)).floor() as u64)
    }

    /// Fixed-input quotes never pay in more than quoted.
    pub fn amount_in_with_slippage(&self) -> Micro {
        self.amount_in.amount
    }
}

/// Result of one directional optimisation, amounts in the bought asset.
#[derive(Debug, Clone, Copy)]
pub struct OptimizedBuy {
    pub amount: u64,
    /// Extra slippage the trade can absorb before expected profit hits 0.
    pub max_profitable_slippage_bps: f64,
}

#[derive(Debug, Clone, Copy)]
struct OptimizedBuyInfo {
    buy: OptimizedBuy,
    quadratic_impact_cost_other: f64,
    linear_impact_cost_other: f64,
}

/// Costs of the winning direction converted to base micro-units.
#[derive(Debug, Clone, Copy)]
pub struct OptimalSwapCosts {
    pub quadratic_impact_cost: f64,
    pub linear_impact_cost: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct OptimalSwap {
    pub buy_side: BuySide,
    pub buy: OptimizedBuy,
}

#[derive(Debug, Clone, Copy)]
pub struct OptimalSwapInfo {
    pub swap: OptimalSwap,
    pub costs: OptimalSwapCosts,
}

struct DirectionalProblem {
    signal_bps: f64,
    impact_bps: f64,
    /// Reserves of the bought asset (the out side).
    asset_reserves: u64,
    /// Reserves of the paid asset (the in side).
    other_reserves: u64,
    quadratic_risk_penalty: f64,
    linear_risk_penalty: f64,
    /// Round-trip fixed fee, in units of the paid asset.
    fixed_fee_other: f64,
    /// Largest buy the sell-side position can afford, in out-asset units.
    sell_cap: f64,
}

/// Solve one directional problem. `None` means no profitable trade.
fn optimal_amount_buy(problem: &DirectionalProblem) -> Option<OptimizedBuyInfo> {
    // A favourable residual impact must not trade us more.
    let impact_bps = problem.impact_bps.max(0.0);

    let price_other = problem.other_reserves as f64 / problem.asset_reserves as f64;

    let f_bps = problem.signal_bps
        - impact_bps
        - FEE_BPS
        - EXPECTED_SLIPPAGE_BPS
        - problem.linear_risk_penalty;
    if f_bps <= 0.0 {
        return None;
    }

    // Average impact paid per unit bought, fees included.
    let avg_impact_cost_coef = (1.0 + FEE_BPS) / problem.asset_reserves as f64;

    // <profit> = A * price * (f - avg_impact_cost_coef * A)
    //          - quadratic_risk_penalty * A^2 - fixed_fee_other
    let amount_argmax = f_bps
        / (2.0 * (avg_impact_cost_coef + problem.quadratic_risk_penalty / price_other));

    // Smallest amount whose expected profit covers the fixed fee: the
    // smaller root of -rho_q A^2 + price f A - F = 0.
    let amount_min = if problem.quadratic_risk_penalty > 0.0 {
        let discriminant = (price_other * f_bps).powi(2)
            - 4.0 * problem.quadratic_risk_penalty * problem.fixed_fee_other;
        if discriminant < 0.0 {
            return None;
        }
        (price_other * f_bps - discriminant.sqrt()) / (2.0 * problem.quadratic_risk_penalty)
    } else {
        problem.fixed_fee_other / (price_other * f_bps)
    };

    let amount_cap = (RESERVE_FRACTION_CAP * problem.asset_reserves as f64).floor();
    if amount_cap < amount_min || amount_min > problem.sell_cap {
        return None;
    }

    let amount = amount_argmax.min(amount_cap).min(problem.sell_cap).floor();
    if amount < amount_min || amount < 1.0 {
        return None;
    }

    let max_profit_other = amount_argmax * price_other * f_bps / 2.0 - problem.fixed_fee_other;
    if max_profit_other <= 0.0 {
        return None;
    }

    let max_profitable_slippage_bps =
        f_bps - 2.0 * problem.fixed_fee_other / (amount * price_other);

    Some(OptimizedBuyInfo {
        buy: OptimizedBuy {
            amount: amount as u64,
            max_profitable_slippage_bps,
        },
        quadratic_impact_cost_other: amount * amount * price_other * avg_impact_cost_coef,
        linear_impact_cost_other: amount * price_other * impact_bps,
    })
}

/// Reciprocal transform of a fractional return: the forward return of
/// the opposite direction.
fn reciprocal_bps(bps: f64) -> f64 {
    1.0 / (1.0 + bps) - 1.0
}

pub struct Optimizer {
    pair: Pair,
    risk_coef: f64,
}

impl Optimizer {
    pub fn new(pair: Pair, risk_coef: f64) -> Self {
        assert_ne!(pair.r_id, pair.b_id);
        assert!(risk_coef >= 0.0);
        Self { pair, risk_coef }
    }

    pub fn pair(&self) -> Pair {
        self.pair
    }

    /// Solve both directions and return the profitable one, if any.
    pub fn optimal_swap(
        &self,
        signal_bps: f64,
        impact_bps: f64,
        r_position: Micro,
        b_position: Micro,
        r_reserves: u64,
        b_reserves: u64,
    ) -> Option<OptimalSwapInfo> {
        assert!(r_reserves > 0 && b_reserves > 0);
        let asa_price = b_reserves as f64 / r_reserves as f64;

        // The linear inventory term is proportional to the base notional
        // of the inventory, signed to push the book toward flat.
        let inventory_notional = 2.0 * self.risk_coef * r_position.as_f64() * asa_price;

        let buy_reserve = optimal_amount_buy(&DirectionalProblem {
            signal_bps,
            impact_bps,
            asset_reserves: r_reserves,
            other_reserves: b_reserves,
            quadratic_risk_penalty: self.risk_coef * asa_price * asa_price,
            linear_risk_penalty: inventory_notional,
            // If we buy now we have to exit later, so pay the fixed fee twice.
            fixed_fee_other: 2.0 * FIXED_FEE_MICRO as f64,
            sell_cap: b_position.as_f64() / asa_price,
        });

        let buy_base = optimal_amount_buy(&DirectionalProblem {
            signal_bps: reciprocal_bps(signal_bps),
            impact_bps: reciprocal_bps(impact_bps),
            asset_reserves: b_reserves,
            other_reserves: r_reserves,
            quadratic_risk_penalty: self.risk_coef / asa_price,
            linear_risk_penalty: -inventory_notional,
            fixed_fee_other: 2.0 * FIXED_FEE_MICRO as f64 / asa_price,
            sell_cap: r_position.as_f64() * asa_price,
        });

        assert!(
            buy_reserve.is_none() || buy_base.is_none(),
            "both optimizer directions returned a trade"
        );

        if let Some(info) = buy_reserve {
            // Costs in the paid asset are base amounts already.
            Some(OptimalSwapInfo {
                swap: OptimalSwap {
                    buy_side: BuySide::Reserve,
                    buy: info.buy,
                },
                costs: OptimalSwapCosts {
                    quadratic_impact_cost: info.quadratic_impact_cost_other,
                    linear_impact_cost: info.linear_impact_cost_other,
                },
            })
        } else {
            buy_base.map(|info| OptimalSwapInfo {
                swap: OptimalSwap {
                    buy_side: BuySide::Base,
                    buy: info.buy,
                },
                costs: OptimalSwapCosts {
                    quadratic_impact_cost: info.quadratic_impact_cost_other * asa_price,
                    linear_impact_cost: info.linear_impact_cost_other * asa_price,
                },
            })
        }
    }

    /// Optimal swap assembled into a signable fixed-input quote.
    #[allow(clippy::too_many_arguments)]
    pub fn fixed_input_quote(
        &self,
        signal_bps: f64,
        impact_bps: f64,
        r_position: Micro,
        b_position: Micro,
        r_reserves: u64,
        b_reserves: u64,
        slippage_bps: f64,
    ) -> Option<SwapQuote> {
        let info = self.optimal_swap(
            signal_bps,
            impact_bps,
            r_position,
            b_position,
            r_reserves,
            b_reserves,
        )?;

        let (asset_out, asset_in, out_reserves, in_reserves, sell_position) =
            match info.swap.buy_side {
                BuySide::Reserve => (self.pair.r_id, self.pair.b_id, r_reserves, b_reserves, b_position),
                BuySide::Base => (self.pair.b_id, self.pair.r_id, b_reserves, r_reserves, r_position),
            };

        let amount_out = info.swap.buy.amount;
        assert!(
            amount_out as f64 <= RESERVE_FRACTION_CAP * out_reserves as f64,
            "quote exceeds the reserve fraction cap"
        );

        // amount_in = ceil((k / (R_out - A) - R_in) * 1000/997)
        //           = ceil(R_in * A * 1000 / ((R_out - A) * 997))
        let numerator = in_reserves as u128 * amount_out as u128 * 1000;
        let denominator = (out_reserves - amount_out) as u128 * 997;
        let amount_in = (numerator.div_ceil(denominator)) as u64;
        let amount_in = amount_in.min(sell_position.0);
        let fees = amount_in - amount_in * 997 / 1000;

        Some(SwapQuote {
            kind: QuoteKind::FixedInput,
            amount_in: AssetAmount::new(asset_in, amount_in),
            amount_out: AssetAmount::new(asset_out, amount_out),
            fees: AssetAmount::new(asset_in, fees),
            slippage_bps,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const R: u64 = 1_000_000_000_000;
    const B: u64 = 1_000_000_000_000;

    fn optimizer(risk_coef: f64) -> Optimizer {
        Optimizer::new(Pair::new(7, 0), risk_coef)
    }

    #[test]
    fn test_flat_inputs_yield_no_trade() {
        let opt = optimizer(1e-15);
        assert!(opt
            .optimal_swap(0.0, 0.0, Micro::ZERO, Micro(10u64.pow(9)), R, B)
            .is_none());
    }

    #[test]
    fn test_positive_signal_buys_reserve_only() {
        let opt = optimizer(1e-15);
        let info = opt
            .optimal_swap(0.01, 0.0, Micro::ZERO, Micro(10u64.pow(12)), R, B)
            .unwrap();
        assert_eq!(info.swap.buy_side, BuySide::Reserve);
    }

    #[test]
    fn test_large_inventory_liquidates_into_base() {
        // Position worth ten pools forces the liquidation direction even
        // with zero signal.
        let opt = optimizer(1e-15);
        let info = opt
            .optimal_swap(0.0, 0.0, Micro(10 * R), Micro(10u64.pow(9)), R, B)
            .unwrap();
        assert_eq!(info.swap.buy_side, BuySide::Base);
    }

    #[test]
    fn test_amount_monotone_in_signal() {
        let opt = optimizer(1e-15);
        let mut prev = 0u64;
        for i in 0..=10 {
            let signal = 0.001 * i as f64;
            let amount = opt
                .optimal_swap(signal, 0.0, Micro::ZERO, Micro(10u64.pow(12)), R, B)
                .map(|info| info.swap.buy.amount)
                .unwrap_or(0);
            assert!(amount >= prev, "amount not monotone at signal {signal}");
            prev = amount;
        }
    }

    #[test]
    fn test_reserve_fraction_cap_binds() {
        // A huge edge with negligible risk penalty wants more than 10% of
        // the pool; the cap clips it.
        let opt = optimizer(1e-30);
        let quote = opt
            .fixed_input_quote(0.5, 0.0, Micro::ZERO, Micro(u64::MAX / 2), R, B, 0.01)
            .unwrap();
        let cap = (RESERVE_FRACTION_CAP * R as f64).floor() as u64;
        assert_eq!(quote.amount_out.amount.0, cap);
    }

    #[test]
    fn test_small_pool_rejects_on_min_amount() {
        // The fixed fee cannot be recovered inside 10% of a tiny pool.
        let opt = optimizer(1e-15);
        assert!(opt
            .optimal_swap(0.004, 0.0, Micro::ZERO, Micro(10u64.pow(12)), 1_000_000, 1_000_000)
            .is_none());
    }

    #[test]
    fn test_impact_penalises_repeat_buys() {
        let opt = optimizer(1e-15);
        let fresh = opt
            .optimal_swap(0.01, 0.0, Micro::ZERO, Micro(10u64.pow(12)), R, B)
            .unwrap();
        let worked = opt
            .optimal_swap(0.01, 0.004, Micro::ZERO, Micro(10u64.pow(12)), R, B)
            .unwrap();
        assert!(worked.swap.buy.amount < fresh.swap.buy.amount);
    }

    #[test]
    fn test_quote_assembly() {
        let opt = optimizer(1e-15);
        let quote = opt
            .fixed_input_quote(0.01, 0.0, Micro::ZERO, Micro(10u64.pow(12)), R, B, 0.02)
            .unwrap();

        assert_eq!(quote.kind, QuoteKind::FixedInput);
        assert_eq!(quote.amount_out.asset, 7);
        assert_eq!(quote.amount_in.asset, 0);
        assert_eq!(quote.fees.asset, 0);

        let amount_in = quote.amount_in.amount.0;
        let amount_out = quote.amount_out.amount.0;

        // The grossed-up input covers the constant-product requirement.
        let required = (B as u128 * amount_out as u128).div_ceil((R - amount_out) as u128);
        assert!(amount_in as u128 * 997 / 1000 >= required - 1);

        assert_eq!(quote.fees.amount.0, amount_in - amount_in * 997 / 1000);
        assert_eq!(
            quote.amount_out_with_slippage().0,
            (amount_out as f64 * 0.98).floor() as u64
        );
        assert_eq!(quote.amount_in_with_slippage().0, amount_in);
    }

    #[test]
    fn test_sell_position_truncates_input() {
        let opt = optimizer(1e-15);
        // Plenty of edge but almost no base to sell.
        let quote = opt
            .fixed_input_quote(0.01, 0.0, Micro::ZERO, Micro(50_000_000), R, B, 0.0)
            .unwrap();
        assert!(quote.amount_in.amount.0 <= 50_000_000);
    }

    #[test]
    fn test_exclusivity_holds_across_inputs() {
        // Directional mutual exclusion over a grid of signals/positions.
        let opt = optimizer(1e-12);
        for signal in [-0.02, -0.005, 0.0, 0.005, 0.02] {
            for position in [0u64, 10u64.pow(9), 10u64.pow(11)] {
                // optimal_swap asserts internally that at most one
                // direction trades.
                let _ = opt.optimal_swap(
                    signal,
                    0.0,
                    Micro(position),
                    Micro(10u64.pow(12)),
                    R,
                    B,
                );
            }
        }
    }
}
