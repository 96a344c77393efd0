//! Live trading engine.
//!
//! Three cooperative tasks share a single-threaded runtime: market sync
//! drains the price stream, the trade loop quotes and executes per pair,
//! and the position sync redeems pool-side excess. Suspension points are
//! network I/O and the inter-tick sleeps only, so each task always sees
//! a consistent snapshot.

use crate::clock::Clock;
use crate::engine::logic::TradeLogic;
use crate::indexer::MarketSource;
use crate::swapper::Swapper;
use crate::trades::{StateLog, TradeInfo};
use crate::types::{Pair, PoolState};
use anyhow::Result;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Tick cadences and the stale-data bound.
#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    pub trading_step: Duration,
    pub market_update_step: Duration,
    pub sync_positions_step: Duration,
    /// Suspend trading when the last successful market sync is older.
    pub lag_trade_limit: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            trading_step: Duration::from_secs(10),
            market_update_step: Duration::from_secs(2),
            sync_positions_step: Duration::from_secs(100),
            lag_trade_limit: Duration::from_secs(60),
        }
    }
}

pub struct Engine<W: Swapper, S: MarketSource> {
    logic: TradeLogic,
    swappers: HashMap<Pair, W>,
    source: S,
    clock: Arc<dyn Clock>,
    settings: EngineSettings,
    last_update_times: HashMap<Pair, DateTime<Utc>>,
    last_market_state_update: Option<DateTime<Utc>>,
}

impl<W: Swapper, S: MarketSource> Engine<W, S> {
    pub fn new(
        logic: TradeLogic,
        swappers: HashMap<Pair, W>,
        source: S,
        clock: Arc<dyn Clock>,
        settings: EngineSettings,
    ) -> Self {
        for pair in logic.pairs() {
            assert!(swappers.contains_key(&pair), "no swapper for pair {pair}");
        }
        Self {
            logic,
            swappers,
            source,
            clock,
            settings,
            last_update_times: HashMap::new(),
            last_market_state_update: None,
        }
    }

    pub fn logic(&self) -> &TradeLogic {
        &self.logic
    }

    /// Drain the price stream and fold every pool-state update into
    /// reserves and signals. Network errors log and leave this cycle's
    /// work to the next tick.
    pub async fn sync_market_state(&mut self) {
        let start = self.clock.now();

        let updates = match self.source.poll().await {
            Ok(updates) => updates,
            Err(e) => {
                error!("market sync failed, skipping cycle: {e}");
                return;
            }
        };

        let mut market_span: Option<(DateTime<Utc>, DateTime<Utc>)> = None;
        for update in updates {
            let pair = update.pair();
            let state = update.state();
            let time = state.time();

            self.assert_monotone(pair, &state);
            self.last_update_times.insert(pair, time);
            self.logic.apply_price_update(pair, state);

            market_span = Some(match market_span {
                None => (time, time),
                Some((min, _)) => (min, time),
            });
        }

        self.last_market_state_update = Some(self.clock.now());
        let dt_run = (self.clock.now() - start).num_milliseconds();
        let dt_market = market_span
            .map(|(min, max)| (max - min).num_milliseconds())
            .unwrap_or(0);
        debug!("scraped {dt_market} ms worth of market data in {dt_run} ms");
    }

    fn assert_monotone(&self, pair: Pair, state: &PoolState) {
        if let Some(prev) = self.last_update_times.get(&pair) {
            assert!(
                state.time() >= *prev,
                "pool state time went backwards for pair {pair}",
            );
        }
        if let Some(prev) = self.logic.price(pair) {
            if prev.t == state.t {
                assert!(
                    state.intra_block_order > prev.intra_block_order,
                    "intra-block order not increasing for pair {pair} at t={}",
                    state.t,
                );
            }
        }
    }

    /// One pass over the universe: snapshot, stale guard, then quote and
    /// execute per pair.
    pub async fn trade_loop(
        &mut self,
        log_trade: &mut dyn FnMut(TradeInfo),
        log_state: &mut dyn FnMut(StateLog),
    ) {
        let time_start = self.clock.now();
        debug!("entering trade loop at {time_start}");

        log_state(self.logic.state_log(time_start));

        let lag_limit = ChronoDuration::from_std(self.settings.lag_trade_limit)
            .unwrap_or_else(|_| ChronoDuration::seconds(60));
        let fresh = self
            .last_market_state_update
            .map(|last| time_start - last <= lag_limit)
            .unwrap_or(false);
        if !fresh {
            error!("market data is stale, skipping trade loop entirely");
            return;
        }

        for pair in self.logic.pairs() {
            let Some(last_update) = self.last_update_times.get(&pair) else {
                warn!(%pair, "price never observed, skipping trade logic");
                continue;
            };
            let now = self.clock.now();
            debug!(
                %pair,
                market_age_ms = (now - *last_update).num_milliseconds(),
                "entering trade logic",
            );

            let swapper = self
                .swappers
                .get_mut(&pair)
                .unwrap_or_else(|| panic!("no swapper for pair {pair}"));
            if let Err(e) = self.logic.trade_pair(pair, swapper, now, log_trade).await {
                error!(%pair, "trade attempt failed: {e}");
            }
        }

        let dt = (self.clock.now() - time_start).num_milliseconds();
        debug!("exiting trade loop {dt} ms after entering");
    }

    /// Redeem pool-side excess for every pair and fold it back into the
    /// position. Only ever adds.
    pub async fn sync_positions_and_redeem(&mut self) {
        let time = self.clock.now();
        info!("entering sync position loop at {time}");

        for pair in self.logic.pairs() {
            let Some(state) = self.logic.price(pair) else {
                continue;
            };
            let asa_price = state.price();
            let swapper = self
                .swappers
                .get_mut(&pair)
                .unwrap_or_else(|| panic!("no swapper for pair {pair}"));

            match swapper.fetch_excess(asa_price).await {
                Ok(redeemed) => {
                    if redeemed.r_amount.0 > 0 || redeemed.b_amount.0 > 0 {
                        info!(%pair, ?redeemed, "applying redeemed excess");
                        self.logic
                            .position
                            .apply_redeem(pair, redeemed.r_amount, redeemed.b_amount);
                    }
                }
                Err(e) => error!(%pair, "fetch_excess failed: {e}"),
            }
        }
    }

    /// Run the three engine tasks forever on the current task.
    pub async fn run(
        &mut self,
        log_trade: &mut dyn FnMut(TradeInfo),
        log_state: &mut dyn FnMut(StateLog),
    ) -> Result<()> {
        info!("syncing market state at start");
        let start = self.clock.now();
        self.sync_market_state().await;
        let dt = (self.clock.now() - start).num_milliseconds();
        info!("synced market state at start in {dt} ms");

        let mut market_tick = tokio::time::interval(self.settings.market_update_step);
        let mut trade_tick = tokio::time::interval(self.settings.trading_step);
        let mut sync_tick = tokio::time::interval(self.settings.sync_positions_step);
        market_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        trade_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        sync_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = market_tick.tick() => self.sync_market_state().await,
                _ = trade_tick.tick() => self.trade_loop(log_trade, log_state).await,
                _ = sync_tick.tick() => self.sync_positions_and_redeem().await,
            }
        }
    }
}
