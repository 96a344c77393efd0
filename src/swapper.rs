//! Quote execution.
//!
//! Two swappers share one interface: the production swapper prepares,
//! signs, and submits the quote's transaction group through the venue
//! client and periodically redeems excess; the simulation swapper fills
//! every quote exactly as quoted.

use crate::clock::Clock;
use crate::optimizer::SwapQuote;
use crate::trades::PoolSwap;
use crate::types::{Micro, Pair};
use crate::venue::{Pool, VenueClient, VenueError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Base value below which pool-side excess is left alone, in micro-units
/// (one base unit nominal).
pub const MAX_VALUE_LOCKED_MICRO: u64 = Micro::PER_UNIT;

/// A quote stamped with its optimisation time and the reserves it was
/// computed against.
#[derive(Debug, Clone, PartialEq)]
pub struct TimedSwapQuote {
    pub time: DateTime<Utc>,
    pub quote: SwapQuote,
    pub r_reserves_at_opt: u64,
    pub b_reserves_at_opt: u64,
}

/// Outcome of an execution attempt: the fill, if any, and the time it
/// was observed.
#[derive(Debug, Clone, PartialEq)]
pub struct MaybeTradedSwap {
    pub swap: Option<PoolSwap>,
    pub time: DateTime<Utc>,
}

/// Amounts pulled back from the pool's excess buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RedeemedAmounts {
    pub r_amount: Micro,
    pub b_amount: Micro,
}

#[async_trait]
pub trait Swapper: Send {
    async fn attempt(&mut self, quote: TimedSwapQuote) -> Result<MaybeTradedSwap, VenueError>;

    /// Redeem pool-side excess worth more than the locked-value bound.
    async fn fetch_excess(&mut self, asa_price: f64) -> Result<RedeemedAmounts, VenueError>;
}

fn fill_from_quote(quote: &SwapQuote, txid: String) -> PoolSwap {
    PoolSwap {
        asset_buy: quote.amount_out.asset,
        amount_buy: quote.amount_out.amount,
        amount_sell: quote.amount_in.amount,
        amount_buy_with_slippage: quote.amount_out_with_slippage(),
        amount_sell_with_slippage: quote.amount_in_with_slippage(),
        txid,
    }
}

/// Live execution against a venue.
pub struct ProductionSwapper<V: VenueClient> {
    venue: V,
    pair: Pair,
    pool: Pool,
    refresh_reserves: bool,
    clock: Arc<dyn Clock>,
}

impl<V: VenueClient> ProductionSwapper<V> {
    /// Binds the venue to the pair's pool and opts the account into the
    /// reserve and liquidity assets if it is not already.
    pub async fn new(
        mut venue: V,
        pair: Pair,
        refresh_reserves: bool,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, VenueError> {
        let pool = venue.fetch_pool(pair).await?;
        if !pool.exists {
            return Err(VenueError::NonExistentPool(pair));
        }

        for asset in [pair.r_id, pool.liquidity_asset_id] {
            if !venue.is_opted_in(asset).await? {
                info!(asset, "account not opted into asset, opting in now");
                let group = venue.prepare_asset_optin(asset).await?;
                let result = venue.submit(group, true).await?;
                info!(asset, txid = %result.txid, "opted into asset");
            }
        }

        Ok(Self {
            venue,
            pair,
            pool,
            refresh_reserves,
            clock,
        })
    }
}

#[async_trait]
impl<V: VenueClient> Swapper for ProductionSwapper<V> {
    async fn attempt(&mut self, quote: TimedSwapQuote) -> Result<MaybeTradedSwap, VenueError> {
        if self.refresh_reserves {
            self.pool = self.venue.refresh().await?;
            if self.pool.r_reserves != quote.r_reserves_at_opt
                || self.pool.b_reserves != quote.b_reserves_at_opt
            {
                warn!(
                    "refreshed reserves ({}, {}) differ from optimisation-time ({}, {})",
                    self.pool.r_reserves,
                    self.pool.b_reserves,
                    quote.r_reserves_at_opt,
                    quote.b_reserves_at_opt,
                );
            }
        }

        let group = self.venue.prepare_swap_from_quote(&quote.quote).await?;
        let result = self.venue.submit(group, false).await?;
        let time = self.clock.now();

        if !result.pool_error.is_empty() {
            error!(
                pair = %self.pair,
                pool_error = result.pool_error,
                "venue rejected swap"
            );
            return Ok(MaybeTradedSwap { swap: None, time });
        }

        Ok(MaybeTradedSwap {
            swap: Some(fill_from_quote(&quote.quote, result.txid)),
            time,
        })
    }

    async fn fetch_excess(&mut self, asa_price: f64) -> Result<RedeemedAmounts, VenueError> {
        debug!(pair = %self.pair, "fetching excess amounts");
        let excess = self.venue.fetch_excess_amounts().await?;

        let mut redeemed = RedeemedAmounts::default();
        for (asset, amount) in excess {
            if amount <= 0 {
                continue;
            }
            let amount = amount as u64;
            let base_value = if asset == self.pair.b_id {
                amount as f64
            } else if asset == self.pair.r_id {
                amount as f64 * asa_price
            } else {
                warn!(asset, "excess in an asset outside the pair");
                continue;
            };

            if base_value <= MAX_VALUE_LOCKED_MICRO as f64 {
                continue;
            }

            let group = self.venue.prepare_redeem(asset, Micro(amount)).await?;
            let result = self.venue.submit(group, true).await?;
            if !result.pool_error.is_empty() {
                error!(
                    asset,
                    pool_error = result.pool_error,
                    "redemption may have failed"
                );
                continue;
            }
            info!(asset, amount, txid = %result.txid, "redeemed excess");

            if asset == self.pair.b_id {
                redeemed.b_amount += Micro(amount);
            } else {
                redeemed.r_amount += Micro(amount);
            }
        }
        Ok(redeemed)
    }
}

/// Backtest execution: every quote fills exactly as quoted with zero
/// slippage, stamped with the quote's own time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimulationSwapper;

#[async_trait]
impl Swapper for SimulationSwapper {
    async fn attempt(&mut self, quote: TimedSwapQuote) -> Result<MaybeTradedSwap, VenueError> {
        Ok(MaybeTradedSwap {
            swap: Some(fill_from_quote(&quote.quote, String::new())),
            time: quote.time,
        })
    }

    async fn fetch_excess(&mut self, _asa_price: f64) -> Result<RedeemedAmounts, VenueError> {
        Ok(RedeemedAmounts::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::optimizer::QuoteKind;
    use crate::types::{AssetAmount, AssetId};
    use crate::venue::{SubmitResult, TransactionGroup};
    use chrono::TimeZone;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct MockVenue {
        pool: Pool,
        opted_in: Mutex<Vec<AssetId>>,
        submitted: Mutex<Vec<TransactionGroup>>,
        excess: HashMap<AssetId, i64>,
        pool_error: Option<String>,
    }

    impl MockVenue {
        fn new() -> Self {
            Self {
                pool: Pool {
                    exists: true,
                    address: "POOL".to_string(),
                    r_reserves: 1_000_000_000,
                    b_reserves: 2_000_000_000,
                    liquidity_asset_id: 99,
                },
                opted_in: Mutex::new(vec![0]),
                submitted: Mutex::new(Vec::new()),
                excess: HashMap::new(),
                pool_error: None,
            }
        }
    }

    #[async_trait]
    impl VenueClient for MockVenue {
        async fn fetch_pool(&mut self, _pair: Pair) -> Result<Pool, VenueError> {
            Ok(self.pool.clone())
        }

        async fn refresh(&mut self) -> Result<Pool, VenueError> {
            Ok(self.pool.clone())
        }

        async fn is_opted_in(&self, asset: AssetId) -> Result<bool, VenueError> {
            Ok(self.opted_in.lock().unwrap().contains(&asset))
        }

        async fn prepare_asset_optin(
            &self,
            asset: AssetId,
        ) -> Result<TransactionGroup, VenueError> {
            self.opted_in.lock().unwrap().push(asset);
            Ok(TransactionGroup {
                group_id: format!("optin-{asset}"),
            })
        }

        async fn prepare_swap_from_quote(
            &self,
            _quote: &SwapQuote,
        ) -> Result<TransactionGroup, VenueError> {
            Ok(TransactionGroup {
                group_id: "swap".to_string(),
            })
        }

        async fn prepare_redeem(
            &self,
            asset: AssetId,
            _amount: Micro,
        ) -> Result<TransactionGroup, VenueError> {
            Ok(TransactionGroup {
                group_id: format!("redeem-{asset}"),
            })
        }

        async fn submit(
            &mut self,
            group: TransactionGroup,
            _wait: bool,
        ) -> Result<SubmitResult, VenueError> {
            self.submitted.lock().unwrap().push(group.clone());
            Ok(SubmitResult {
                txid: format!("tx-{}", group.group_id),
                pool_error: self.pool_error.clone().unwrap_or_default(),
            })
        }

        async fn fetch_excess_amounts(&self) -> Result<HashMap<AssetId, i64>, VenueError> {
            Ok(self.excess.clone())
        }
    }

    fn quote() -> TimedSwapQuote {
        TimedSwapQuote {
            time: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            quote: SwapQuote {
                kind: QuoteKind::FixedInput,
                amount_in: AssetAmount::new(0, 2_000_000),
                amount_out: AssetAmount::new(7, 990_000),
                fees: AssetAmount::new(0, 6_000),
                slippage_bps: 0.01,
            },
            r_reserves_at_opt: 1_000_000_000,
            b_reserves_at_opt: 2_000_000_000,
        }
    }

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(
            Utc.timestamp_opt(1_700_000_100, 0).unwrap(),
        ))
    }

    #[tokio::test]
    async fn test_construction_opts_into_missing_assets() {
        let venue = MockVenue::new();
        let swapper = ProductionSwapper::new(venue, Pair::new(7, 0), false, clock())
            .await
            .unwrap();
        let opted = swapper.venue.opted_in.lock().unwrap().clone();
        assert!(opted.contains(&7));
        assert!(opted.contains(&99));
    }

    #[tokio::test]
    async fn test_missing_pool_fails_construction() {
        let mut venue = MockVenue::new();
        venue.pool.exists = false;
        let result = ProductionSwapper::new(venue, Pair::new(7, 0), false, clock()).await;
        assert!(matches!(result, Err(VenueError::NonExistentPool(_))));
    }

    #[tokio::test]
    async fn test_attempt_returns_fill_with_submission_time() {
        let venue = MockVenue::new();
        let clock = clock();
        let mut swapper = ProductionSwapper::new(venue, Pair::new(7, 0), true, clock.clone())
            .await
            .unwrap();

        let result = swapper.attempt(quote()).await.unwrap();
        let fill = result.swap.unwrap();
        assert_eq!(fill.asset_buy, 7);
        assert_eq!(fill.amount_buy, Micro(990_000));
        assert_eq!(fill.amount_sell, Micro(2_000_000));
        assert_eq!(fill.txid, "tx-swap");
        // Time is the engine-observed submission time, not the quote time.
        assert_eq!(result.time, clock.now());
    }

    #[tokio::test]
    async fn test_venue_reject_returns_no_fill() {
        let mut venue = MockVenue::new();
        venue.pool_error = Some("exceeds slippage".to_string());
        let mut swapper = ProductionSwapper::new(venue, Pair::new(7, 0), false, clock())
            .await
            .unwrap();

        let result = swapper.attempt(quote()).await.unwrap();
        assert!(result.swap.is_none());
    }

    #[tokio::test]
    async fn test_fetch_excess_redeems_above_threshold_only() {
        let mut venue = MockVenue::new();
        // Base excess above one unit, reserve excess below it at price 2.
        venue.excess = HashMap::from([(0, 3_000_000i64), (7, 100_000i64)]);
        let mut swapper = ProductionSwapper::new(venue, Pair::new(7, 0), false, clock())
            .await
            .unwrap();

        let redeemed = swapper.fetch_excess(2.0).await.unwrap();
        assert_eq!(redeemed.b_amount, Micro(3_000_000));
        assert_eq!(redeemed.r_amount, Micro::ZERO);

        let submitted = swapper.venue.submitted.lock().unwrap().clone();
        assert!(submitted.iter().any(|g| g.group_id == "redeem-0"));
        assert!(!submitted.iter().any(|g| g.group_id == "redeem-7"));
    }

    #[tokio::test]
    async fn test_simulation_swapper_fills_at_quote_time() {
        let mut swapper = SimulationSwapper;
        let q = quote();
        let result = swapper.attempt(q.clone()).await.unwrap();
        assert_eq!(result.time, q.time);
        let fill = result.swap.unwrap();
        assert_eq!(fill.txid, "");
        assert_eq!(fill.amount_buy, q.quote.amount_out.amount);
        assert_eq!(
            swapper.fetch_excess(1.0).await.unwrap(),
            RedeemedAmounts::default()
        );
    }
}
