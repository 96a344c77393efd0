//! Chain indexer HTTP client.
//!
//! One pooled reqwest client is shared across all queries. Rate-limit
//! responses back off 5 seconds and retry; transient transport errors
//! surface to the caller, which retries on its next tick.

use crate::indexer::tx::{KeyValue, TransactionRecord};
use crate::types::AssetId;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Back-off applied when the indexer reports a rate limit.
const RATE_LIMIT_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("indexer transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("indexer returned status {0}")]
    Status(u16),
    #[error("malformed indexer response: {0}")]
    Malformed(String),
}

/// Query filters for the transactions endpoint.
#[derive(Debug, Clone, Default)]
pub struct QueryParams {
    pub address: Option<String>,
    pub tx_type: Option<String>,
    pub after_time: Option<DateTime<Utc>>,
    pub before_time: Option<DateTime<Utc>>,
    pub min_round: Option<u64>,
}

impl QueryParams {
    fn to_query(&self) -> Vec<(String, String)> {
        let mut query = Vec::new();
        if let Some(address) = &self.address {
            query.push(("address".to_string(), address.clone()));
        }
        if let Some(tx_type) = &self.tx_type {
            query.push(("tx-type".to_string(), tx_type.clone()));
        }
        if let Some(after) = self.after_time {
            query.push((
                "after-time".to_string(),
                after.to_rfc3339_opts(SecondsFormat::Secs, true),
            ));
        }
        if let Some(before) = self.before_time {
            query.push((
                "before-time".to_string(),
                before.to_rfc3339_opts(SecondsFormat::Secs, true),
            ));
        }
        if let Some(min_round) = self.min_round {
            query.push(("min-round".to_string(), min_round.to_string()));
        }
        query
    }
}

/// One page of the transactions endpoint.
#[derive(Debug, Deserialize)]
pub struct TransactionsPage {
    #[serde(default)]
    pub transactions: Vec<TransactionRecord>,
    #[serde(rename = "next-token", default)]
    pub next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AccountResponse {
    account: AccountBody,
}

#[derive(Debug, Deserialize)]
struct AccountBody {
    #[serde(rename = "apps-local-state", default)]
    apps_local_state: Vec<AppLocalState>,
    #[serde(default)]
    assets: Vec<AccountAsset>,
}

#[derive(Debug, Deserialize)]
struct AppLocalState {
    #[serde(rename = "key-value", default)]
    key_value: Vec<KeyValue>,
}

#[derive(Debug, Deserialize)]
struct AccountAsset {
    #[serde(rename = "asset-id")]
    asset_id: AssetId,
}

/// Current state of an account as seen by the indexer.
#[derive(Debug)]
pub struct AccountInfo {
    /// Key/value entries of the first application's local state.
    pub app_state: Vec<KeyValue>,
    /// Assets the account is opted into.
    pub opted_in_assets: Vec<AssetId>,
}

#[derive(Debug, Deserialize)]
struct BlockResponse {
    timestamp: u64,
}

pub struct IndexerClient {
    http: reqwest::Client,
    base_url: String,
}

impl IndexerClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    /// Fetch one transactions page. Retries internally on rate limits.
    pub async fn transactions_page(
        &self,
        params: &QueryParams,
        next_token: Option<&str>,
    ) -> Result<TransactionsPage, IndexerError> {
        let url = format!("{}/v2/transactions", self.base_url);
        let mut query = params.to_query();
        if let Some(token) = next_token {
            query.push(("next".to_string(), token.to_string()));
        }

        loop {
            let response = self.http.get(&url).query(&query).send().await?;
            let status = response.status();

            if status.as_u16() == 429 {
                warn!("indexer rate limited, backing off {:?}", RATE_LIMIT_BACKOFF);
                tokio::time::sleep(RATE_LIMIT_BACKOFF).await;
                continue;
            }
            if !status.is_success() {
                return Err(IndexerError::Status(status.as_u16()));
            }

            let page: TransactionsPage = response.json().await?;
            debug!(
                transactions = page.transactions.len(),
                has_next = page.next_token.is_some(),
                "fetched transactions page"
            );
            return Ok(page);
        }
    }

    /// Current account state: application local state plus opt-ins.
    pub async fn account(&self, address: &str) -> Result<AccountInfo, IndexerError> {
        let url = format!("{}/v2/accounts/{}", self.base_url, address);
        let response = self.http.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(IndexerError::Status(status.as_u16()));
        }
        let body: AccountResponse = response.json().await?;
        let app_state = body
            .account
            .apps_local_state
            .into_iter()
            .next()
            .map(|s| s.key_value)
            .unwrap_or_default();
        Ok(AccountInfo {
            app_state,
            opted_in_assets: body.account.assets.into_iter().map(|a| a.asset_id).collect(),
        })
    }

    /// Timestamp of a block, seconds UTC.
    pub async fn block_timestamp(&self, round: u64) -> Result<u64, IndexerError> {
        let url = format!("{}/v2/blocks/{}", self.base_url, round);
        let response = self.http.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(IndexerError::Status(status.as_u16()));
        }
        let body: BlockResponse = response.json().await?;
        Ok(body.timestamp)
    }
}
