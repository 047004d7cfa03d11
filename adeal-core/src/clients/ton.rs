//! TON blockchain observation through the TonAPI explorer.

use crate::config::TonConfig;
use crate::matching::ObservedTransaction;
use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum ObserverError {
    #[error("API request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("invalid API url: {0}")]
    InvalidUrl(String),
}

/// Read-only view of the transactions arriving at an account.
#[async_trait]
pub trait TransactionSource: Send + Sync {
    /// The most recent `limit` transactions of `address`, newest first.
    async fn account_transactions(
        &self,
        address: &str,
        limit: u32,
    ) -> Result<Vec<ObservedTransaction>, ObserverError>;
}

#[derive(Debug, Deserialize)]
struct TransactionsResponse {
    transactions: Vec<RawTransaction>,
}

#[derive(Debug, Deserialize)]
struct RawTransaction {
    hash: String,
    success: bool,
    utime: i64,
    in_msg: Option<RawMessage>,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(default)]
    value: i64,
    source: Option<RawAccount>,
    decoded_body: Option<DecodedBody>,
}

#[derive(Debug, Deserialize)]
struct RawAccount {
    address: String,
}

#[derive(Debug, Deserialize)]
struct DecodedBody {
    text: Option<String>,
}

impl From<RawTransaction> for ObservedTransaction {
    fn from(raw: RawTransaction) -> Self {
        let (value, comment, source_address) = match raw.in_msg {
            Some(msg) => (
                msg.value,
                msg.decoded_body.and_then(|b| b.text),
                msg.source.map(|s| s.address),
            ),
            None => (0, None, None),
        };
        ObservedTransaction {
            hash: raw.hash,
            success: raw.success,
            value,
            comment,
            source_address,
            timestamp: raw.utime,
        }
    }
}

pub struct TonApiClient {
    api_url: Url,
    api_key: Option<String>,
    http_client: reqwest::Client,
}

impl TonApiClient {
    pub fn new(config: &TonConfig) -> Self {
        Self {
            api_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
            http_client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }

    fn transactions_url(&self, address: &str) -> Result<Url, ObserverError> {
        let mut url = self.api_url.clone();
        url.path_segments_mut()
            .map_err(|_| ObserverError::InvalidUrl(self.api_url.to_string()))?
            .pop_if_empty()
            .extend(["v2", "blockchain", "accounts", address, "transactions"]);
        Ok(url)
    }
}

#[async_trait]
impl TransactionSource for TonApiClient {
    #[tracing::instrument(skip(self), err)]
    async fn account_transactions(
        &self,
        address: &str,
        limit: u32,
    ) -> Result<Vec<ObservedTransaction>, ObserverError> {
        let mut request = self
            .http_client
            .get(self.transactions_url(address)?)
            .query(&[("limit", limit.to_string())]);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ObserverError::RateLimited);
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ObserverError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: TransactionsResponse = response.json().await?;
        Ok(body
            .transactions
            .into_iter()
            .map(ObservedTransaction::from)
            .collect())
    }
}
