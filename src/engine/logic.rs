//! Trade logic shared by the live engine and the simulator.
//!
//! Everything that decides and applies a trade lives here so the
//! backtesting twin exercises the identical code path; the engine and
//! simulator differ only in clock, market source, and swapper.

use crate::impact::Position;
use crate::optimizer::Optimizer;
use crate::signal::PriceSignalProvider;
use crate::swapper::{Swapper, TimedSwapQuote};
use crate::trades::{StateLog, TradeInfo};
use crate::types::{BuySide, Micro, Pair, PoolState};
use crate::venue::VenueError;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::{debug, info};

/// Abort-on-violation checks applied to every quote before submission.
pub fn validate_swap(quote: &TimedSwapQuote, pair: Pair, position: &Position) {
    let side = if quote.quote.amount_out.asset == pair.b_id {
        BuySide::Base
    } else {
        BuySide::Reserve
    };
    let (out_reserves, sell_position) = match side {
        BuySide::Base => (
            quote.b_reserves_at_opt,
            position.pair(pair).r_position,
        ),
        BuySide::Reserve => (quote.r_reserves_at_opt, position.b_position),
    };

    assert!(
        quote.quote.amount_out.amount.0 <= out_reserves,
        "buy amount {} exceeds pool reserves {} for pair {} at {}",
        quote.quote.amount_out.amount,
        out_reserves,
        pair,
        quote.time,
    );
    assert!(
        quote.quote.amount_in.amount <= sell_position,
        "sell amount {} exceeds position {} for pair {}",
        quote.quote.amount_in.amount,
        sell_position,
        pair,
    );
}

/// Per-pair market and decision state for the whole universe.
pub struct TradeLogic {
    pairs: Vec<Pair>,
    optimizers: HashMap<Pair, Optimizer>,
    signal_providers: HashMap<Pair, Box<dyn PriceSignalProvider>>,
    prices: HashMap<Pair, PoolState>,
    pub position: Position,
    slippage_bps: f64,
}

impl TradeLogic {
    pub fn new(
        pairs: Vec<(Pair, Micro, Box<dyn PriceSignalProvider>)>,
        risk_coef: f64,
        impact_decay_seconds: u32,
        initial_b_position: Micro,
        slippage_bps: f64,
    ) -> Self {
        let pair_ids: Vec<Pair> = pairs.iter().map(|(pair, _, _)| *pair).collect();
        let optimizers = pair_ids
            .iter()
            .map(|&pair| (pair, Optimizer::new(pair, risk_coef)))
            .collect();
        let position = Position::new(
            pairs.iter().map(|(pair, r, _)| (*pair, *r)),
            impact_decay_seconds,
            initial_b_position,
        );
        let signal_providers = pairs
            .into_iter()
            .map(|(pair, _, provider)| (pair, provider))
            .collect();
        Self {
            pairs: pair_ids,
            optimizers,
            signal_providers,
            prices: HashMap::new(),
            position,
            slippage_bps,
        }
    }

    pub fn pairs(&self) -> Vec<Pair> {
        self.pairs.clone()
    }

    pub fn price(&self, pair: Pair) -> Option<&PoolState> {
        self.prices.get(&pair)
    }

    pub fn signal_value(&self, pair: Pair) -> f64 {
        self.signal_providers[&pair].value()
    }

    /// Store new reserves and push the mid price into the pair's signal.
    pub fn apply_price_update(&mut self, pair: Pair, state: PoolState) {
        let provider = self
            .signal_providers
            .get_mut(&pair)
            .unwrap_or_else(|| panic!("price update for unknown pair {pair}"));
        provider.update(state.time(), state.price());
        self.prices.insert(pair, state);
    }

    pub fn state_log(&self, time: DateTime<Utc>) -> StateLog {
        self.position.state_log(time)
    }

    /// Ask the optimizer for this pair's quote at `now`, validated and
    /// stamped with the reserves it was computed against.
    pub fn quote_for_pair(&self, pair: Pair, now: DateTime<Utc>) -> Option<TimedSwapQuote> {
        let state = self.prices.get(&pair)?;
        let signal_bps = self.signal_providers[&pair].value();
        let impact_bps = self.position.pair(pair).impact.value(now);

        let quote = self.optimizers[&pair].fixed_input_quote(
            signal_bps,
            impact_bps,
            self.position.pair(pair).r_position,
            self.position.b_position,
            state.r_reserves,
            state.b_reserves,
            self.slippage_bps,
        )?;

        let timed = TimedSwapQuote {
            time: now,
            quote,
            r_reserves_at_opt: state.r_reserves,
            b_reserves_at_opt: state.b_reserves,
        };
        validate_swap(&timed, pair, &self.position);
        Some(timed)
    }

    /// One pair's full trade step: quote, submit, and on a fill emit the
    /// trade info and atomically update impact and position.
    pub async fn trade_pair<W: Swapper>(
        &mut self,
        pair: Pair,
        swapper: &mut W,
        now: DateTime<Utc>,
        log_trade: &mut dyn FnMut(TradeInfo),
    ) -> Result<(), VenueError> {
        debug!(%pair, "entering trade logic");

        let Some(timed) = self.quote_for_pair(pair, now) else {
            return Ok(());
        };
        let signal_bps = self.signal_providers[&pair].value();
        let impact_bps = self.position.pair(pair).impact.value(now);
        let (r_reserves, b_reserves) = (timed.r_reserves_at_opt, timed.b_reserves_at_opt);
        let asa_price = b_reserves as f64 / r_reserves as f64;

        let maybe = swapper.attempt(timed.clone()).await?;
        match maybe.swap {
            Some(fill) => {
                let costs = fill.make_costs(pair, r_reserves, b_reserves, impact_bps);
                let record = fill.make_record(maybe.time, pair);
                info!(
                    %pair,
                    lag_ms = (maybe.time - timed.time).num_milliseconds(),
                    "traded {:?}",
                    record,
                );
                log_trade(TradeInfo {
                    trade: record,
                    costs,
                    asa_price,
                    signal_bps,
                });
                self.position
                    .apply_fill(pair, &fill, r_reserves, b_reserves, maybe.time);
            }
            None => {
                info!(
                    %pair,
                    lag_ms = (maybe.time - timed.time).num_milliseconds(),
                    "swapper rejected trade",
                );
            }
        }
        Ok(())
    }
}
