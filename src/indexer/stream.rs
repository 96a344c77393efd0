//! Multiplexed price/volume stream.
//!
//! One underlying transaction query serves every configured pool: each
//! matched transaction is routed to that pool's reconstruction machines.
//! The stream is pull-driven; `poll` drains whatever the indexer has
//! produced since the previous drain.

use crate::indexer::client::{IndexerClient, IndexerError, QueryParams};
use crate::indexer::reconstruct::{
    pool_transaction, PoolStateTracker, SwapReconstructor,
};
use crate::indexer::tx::Transaction;
use crate::types::{MarketUpdate, Pair, PoolState, PriceOrVolumeUpdate, PriceUpdate};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// Pull-driven stream of decoded transactions matching any configured
/// pool, in chain order. Draining advances an internal `min-round`
/// cursor so the next poll only sees new rounds.
pub struct DataStream {
    client: IndexerClient,
    params: QueryParams,
    next_token: Option<String>,
    pools: HashMap<String, Pair>,
}

impl DataStream {
    pub fn new(client: IndexerClient, pools: HashMap<String, Pair>, params: QueryParams) -> Self {
        Self {
            client,
            params,
            next_token: None,
            pools,
        }
    }

    pub fn pools(&self) -> &HashMap<String, Pair> {
        &self.pools
    }

    fn match_pool(&self, tx: &Transaction) -> Option<String> {
        if self.pools.contains_key(tx.sender()) {
            return Some(tx.sender().to_string());
        }
        match tx {
            Transaction::Pay(pay) if self.pools.contains_key(&pay.receiver) => {
                Some(pay.receiver.clone())
            }
            Transaction::Axfer(axfer) if self.pools.contains_key(&axfer.receiver) => {
                Some(axfer.receiver.clone())
            }
            _ => None,
        }
    }

    /// Drain all currently available pages. On a transport error after
    /// the first page the partial drain is returned and the pagination
    /// token is kept, so the next poll retries from the failed page.
    pub async fn poll(&mut self) -> Result<Vec<(String, Transaction)>, IndexerError> {
        let mut out = Vec::new();
        let mut max_round: Option<u64> = None;

        loop {
            let page = match self
                .client
                .transactions_page(&self.params, self.next_token.as_deref())
                .await
            {
                Ok(page) => page,
                Err(e) if !out.is_empty() => {
                    warn!("transaction page fetch failed mid-drain, retrying next tick: {e}");
                    return Ok(out);
                }
                Err(e) => return Err(e),
            };

            for record in page.transactions {
                let decoded = match Transaction::decode(record) {
                    Ok(decoded) => decoded,
                    Err(e) => {
                        warn!("skipping malformed transaction: {e}");
                        continue;
                    }
                };
                let Some(tx) = decoded else { continue };
                max_round = Some(max_round.unwrap_or(0).max(tx.confirmed_round()));
                if let Some(pool) = self.match_pool(&tx) {
                    out.push((pool, tx));
                }
            }

            match page.next_token {
                Some(token) => self.next_token = Some(token),
                None => break,
            }
        }

        if let Some(round) = max_round {
            self.params.min_round = Some(round + 1);
            self.next_token = None;
        }
        Ok(out)
    }
}

struct PoolMachines {
    pair: Pair,
    tracker: PoolStateTracker,
    reconstructor: SwapReconstructor,
}

/// Routes the multiplexed transaction stream through the per-pool
/// reconstruction machines, yielding pool-state and swap updates.
pub struct PriceVolumeStream {
    stream: DataStream,
    machines: HashMap<String, PoolMachines>,
    /// Pools whose history ran past `timestamp_min`.
    finished: HashSet<String>,
    timestamp_min: Option<u64>,
}

impl PriceVolumeStream {
    pub fn new(stream: DataStream, fee_payment_micro: u64, skip_same_time: bool) -> Self {
        let machines = stream
            .pools()
            .iter()
            .map(|(address, &pair)| {
                (
                    address.clone(),
                    PoolMachines {
                        pair,
                        tracker: PoolStateTracker::new(skip_same_time),
                        reconstructor: SwapReconstructor::new(pair, fee_payment_micro),
                    },
                )
            })
            .collect();
        Self {
            stream,
            machines,
            finished: HashSet::new(),
            timestamp_min: None,
        }
    }

    /// Terminate each pool's stream at the first transaction older than
    /// this epoch-seconds bound.
    pub fn with_timestamp_min(mut self, timestamp_min: u64) -> Self {
        self.timestamp_min = Some(timestamp_min);
        self
    }

    pub async fn poll(&mut self) -> Result<Vec<PriceOrVolumeUpdate>, IndexerError> {
        let transactions = self.stream.poll().await?;
        let mut out = Vec::new();
        for (pool, tx) in transactions {
            out.extend(self.route(&pool, &tx));
        }
        Ok(out)
    }

    /// Feed one matched transaction through its pool's machines.
    fn route(&mut self, pool: &str, tx: &Transaction) -> Vec<PriceOrVolumeUpdate> {
        if self.finished.contains(pool) {
            return Vec::new();
        }
        if let Some(timestamp_min) = self.timestamp_min {
            if tx.round_time() < timestamp_min {
                debug!(pool, "pool stream reached its time bound");
                self.finished.insert(pool.to_string());
                return Vec::new();
            }
        }
        let Some(machines) = self.machines.get_mut(pool) else {
            return Vec::new();
        };

        let mut out = Vec::new();
        match tx {
            Transaction::Appl(appl) => {
                if let Some(state) = machines.tracker.on_appl(appl) {
                    out.push(PriceOrVolumeUpdate {
                        pair: machines.pair,
                        update: MarketUpdate::Price(state),
                    });
                }
            }
            _ => match pool_transaction(tx, pool) {
                Ok(Some(pt)) => {
                    if let Some(swap) = machines.reconstructor.on_transaction(&pt) {
                        out.push(PriceOrVolumeUpdate {
                            pair: machines.pair,
                            update: MarketUpdate::Volume(swap),
                        });
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(pool, "skipping malformed transfer: {e}"),
            },
        }
        out
    }
}

/// Single-pass last-price compaction: keeps one pending pool state per
/// pair and emits it once a strictly greater time is seen for that pair.
/// Swap updates pass through unfiltered.
#[derive(Default)]
pub struct LastPriceFilter {
    pending: HashMap<Pair, PoolState>,
}

impl LastPriceFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, update: PriceOrVolumeUpdate) -> Vec<PriceOrVolumeUpdate> {
        match update.update {
            MarketUpdate::Volume(_) => vec![update],
            MarketUpdate::Price(state) => {
                let mut out = Vec::new();
                match self.pending.get_mut(&update.pair) {
                    Some(pending) if state.t > pending.t => {
                        out.push(PriceOrVolumeUpdate {
                            pair: update.pair,
                            update: MarketUpdate::Price(*pending),
                        });
                        *pending = state;
                    }
                    Some(pending) => {
                        // Same time coordinate: the later state wins.
                        *pending = state;
                    }
                    None => {
                        self.pending.insert(update.pair, state);
                    }
                }
                out
            }
        }
    }

    /// Flush all pending states, in pair order for determinism.
    pub fn finish(&mut self) -> Vec<PriceOrVolumeUpdate> {
        let mut pending: Vec<_> = self.pending.drain().collect();
        pending.sort_by_key(|(pair, state)| (state.t, state.intra_block_order, pair.r_id));
        pending
            .into_iter()
            .map(|(pair, state)| PriceOrVolumeUpdate {
                pair,
                update: MarketUpdate::Price(state),
            })
            .collect()
    }
}

/// Source of pool-state updates for the engine's market sync.
#[async_trait]
pub trait MarketSource: Send {
    async fn poll(&mut self) -> Result<Vec<PriceUpdate>, IndexerError>;
}

/// Live market source: the multiplexed stream compacted to the last
/// price per `(pair, t)` within each drain, swaps dropped.
pub struct LiveMarketSource {
    stream: PriceVolumeStream,
}

impl LiveMarketSource {
    pub fn new(stream: PriceVolumeStream) -> Self {
        Self { stream }
    }
}

#[async_trait]
impl MarketSource for LiveMarketSource {
    async fn poll(&mut self) -> Result<Vec<PriceUpdate>, IndexerError> {
        let updates = self.stream.poll().await?;
        let mut filter = LastPriceFilter::new();
        let mut compacted = Vec::new();
        for update in updates {
            compacted.extend(filter.push(update));
        }
        compacted.extend(filter.finish());

        Ok(compacted
            .into_iter()
            .filter_map(|u| match u.update {
                MarketUpdate::Price(state) => Some(PriceUpdate::new(u.pair, state)),
                MarketUpdate::Volume(_) => None,
            })
            .collect())
    }
}
