//! Trade records and fills.
//!
//! A [`PoolSwap`] is a filled trade as reported by a swapper; TradeRecord
//! and TradeInfo are the logging artifacts emitted by the engine. The
//! price-invariant projection rescales reserve-asset amounts into base
//! notionals so runs at different price levels can be compared.

use crate::costs::{rel_close, TradeCosts, TradeCostsOther, REL_TOL};
use crate::types::{AssetId, BuySide, Micro, Pair};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A filled swap against a pool, from the engine's point of view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSwap {
    pub asset_buy: AssetId,
    pub amount_buy: Micro,
    pub amount_sell: Micro,
    pub amount_buy_with_slippage: Micro,
    pub amount_sell_with_slippage: Micro,
    /// Empty for simulated fills.
    pub txid: String,
}

impl PoolSwap {
    pub fn side(&self, pair: Pair) -> BuySide {
        if self.asset_buy == pair.b_id {
            BuySide::Base
        } else {
            assert_eq!(self.asset_buy, pair.r_id, "fill asset not in pair");
            BuySide::Reserve
        }
    }

    /// Costs of this fill in base basis, using the reserves and the pair
    /// impact value observed before the trade.
    pub fn make_costs(
        &self,
        pair: Pair,
        r_reserves: u64,
        b_reserves: u64,
        impact_before_trade: f64,
    ) -> TradeCosts {
        let side = self.side(pair);
        let (buy_reserves, price_other) = match side {
            BuySide::Base => (b_reserves, r_reserves as f64 / b_reserves as f64),
            BuySide::Reserve => (r_reserves, b_reserves as f64 / r_reserves as f64),
        };
        TradeCostsOther::new(
            side,
            self.amount_buy.0,
            buy_reserves,
            price_other,
            impact_before_trade,
        )
        .to_base_basis()
    }

    pub fn make_record(&self, time: DateTime<Utc>, pair: Pair) -> TradeRecord {
        let asset_sell = pair.other(self.asset_buy);
        TradeRecord {
            time,
            asset_buy_id: self.asset_buy,
            asset_sell_id: asset_sell,
            asset_buy_amount: self.amount_buy,
            asset_sell_amount: self.amount_sell,
            asset_buy_amount_with_slippage: self.amount_buy_with_slippage,
            asset_sell_amount_with_slippage: self.amount_sell_with_slippage,
            txid: self.txid.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub time: DateTime<Utc>,
    pub asset_buy_id: AssetId,
    pub asset_sell_id: AssetId,
    pub asset_buy_amount: Micro,
    pub asset_sell_amount: Micro,
    pub asset_buy_amount_with_slippage: Micro,
    pub asset_sell_amount_with_slippage: Micro,
    pub txid: String,
}

impl TradeRecord {
    /// Project amounts into price-invariant form: reserve-asset legs are
    /// rescaled by the pair price into base notionals.
    pub fn to_price_invariant(&self, base_id: AssetId, asa_price: f64) -> PriceInvariantTradeRecord {
        let scale = |asset: AssetId, amount: Micro| -> f64 {
            if asset == base_id {
                amount.as_f64()
            } else {
                amount.as_f64() * asa_price
            }
        };
        PriceInvariantTradeRecord {
            time: self.time,
            buy_is_base: self.asset_buy_id == base_id,
            asset_buy_amount: scale(self.asset_buy_id, self.asset_buy_amount),
            asset_sell_amount: scale(self.asset_sell_id, self.asset_sell_amount),
        }
    }
}

/// A trade record with amounts projected into base notionals.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceInvariantTradeRecord {
    pub time: DateTime<Utc>,
    pub buy_is_base: bool,
    pub asset_buy_amount: f64,
    pub asset_sell_amount: f64,
}

impl PriceInvariantTradeRecord {
    pub fn approx_eq_to(&self, right: &PriceInvariantTradeRecord) -> bool {
        self.time == right.time
            && self.buy_is_base == right.buy_is_base
            && rel_close(self.asset_buy_amount, right.asset_buy_amount, REL_TOL)
            && rel_close(self.asset_sell_amount, right.asset_sell_amount, REL_TOL)
    }
}

/// Everything the engine knows about a fill, emitted to the trade log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeInfo {
    pub trade: TradeRecord,
    pub costs: TradeCosts,
    /// Pair price (base per reserve unit) at optimisation time.
    pub asa_price: f64,
    pub signal_bps: f64,
}

impl TradeInfo {
    pub fn price_covariant(&self, right: &TradeInfo, base_id: AssetId) -> bool {
        self.trade
            .to_price_invariant(base_id, self.asa_price)
            .approx_eq_to(&right.trade.to_price_invariant(base_id, right.asa_price))
            && self.costs.approx_eq_to(&right.costs)
    }
}

/// Per-pair slice of a position snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PairStateLog {
    pub r_id: AssetId,
    pub r_position: Micro,
    pub impact_bps: f64,
}

/// Wealth snapshot emitted at every trade tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateLog {
    pub time: DateTime<Utc>,
    pub b_position: Micro,
    pub pairs: Vec<PairStateLog>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fill(asset_buy: AssetId, buy: u64, sell: u64) -> PoolSwap {
        PoolSwap {
            asset_buy,
            amount_buy: Micro(buy),
            amount_sell: Micro(sell),
            amount_buy_with_slippage: Micro(buy),
            amount_sell_with_slippage: Micro(sell),
            txid: String::new(),
        }
    }

    #[test]
    fn test_side() {
        let pair = Pair::new(7, 0);
        assert_eq!(fill(0, 10, 20).side(pair), BuySide::Base);
        assert_eq!(fill(7, 10, 20).side(pair), BuySide::Reserve);
    }

    #[test]
    fn test_price_invariant_projection() {
        let pair = Pair::new(7, 0);
        let t = Utc.timestamp_opt(1_700_000_000, 0).unwrap();

        // Buy 100 reserve units at price 2.0 vs buy 200 at price 1.0:
        // identical base notionals.
        let a = fill(7, 100, 200).make_record(t, pair).to_price_invariant(0, 2.0);
        let b = fill(7, 200, 200).make_record(t, pair).to_price_invariant(0, 1.0);
        assert!(a.approx_eq_to(&b));

        // Different base notional is not covariant.
        let c = fill(7, 100, 200).make_record(t, pair).to_price_invariant(0, 1.0);
        assert!(!a.approx_eq_to(&c));
    }
}
