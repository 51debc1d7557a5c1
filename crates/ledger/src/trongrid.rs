use super::{Balance, Deposit, LedgerClient, LedgerError};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::{header::RETRY_AFTER, Response, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tronpay_core::{Network, Token};

const API_KEY_HEADER: &str = "TRON-PRO-API-KEY";
const TRANSFER_CONTRACT: &str = "TransferContract";
const DEPOSIT_PAGE: usize = 20;

#[derive(Debug, Deserialize)]
struct AccountsResponse {
    #[serde(default)]
    data: Vec<AccountEntry>,
}

#[derive(Debug, Deserialize)]
struct AccountEntry {
    #[serde(default)]
    balance: i64,
    #[serde(default)]
    trc20: Vec<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct TransactionsResponse {
    #[serde(default)]
    data: Vec<TransactionEntry>,
}

#[derive(Debug, Deserialize)]
struct TransactionEntry {
    #[serde(rename = "txID")]
    tx_id: String,
    #[serde(rename = "blockNumber")]
    block_number: Option<i64>,
    #[serde(default)]
    block_timestamp: i64,
    raw_data: Option<RawData>,
}

#[derive(Debug, Deserialize)]
struct RawData {
    #[serde(default)]
    contract: Vec<Contract>,
}

#[derive(Debug, Deserialize)]
struct Contract {
    #[serde(rename = "type")]
    kind: String,
    parameter: ContractParameter,
}

#[derive(Debug, Deserialize)]
struct ContractParameter {
    value: TransferValue,
}

#[derive(Debug, Deserialize)]
struct TransferValue {
    #[serde(default)]
    amount: i64,
}

#[derive(Debug, Deserialize)]
struct Trc20Response {
    #[serde(default)]
    data: Vec<Trc20Transfer>,
}

#[derive(Debug, Deserialize)]
struct Trc20Transfer {
    transaction_id: String,
    #[serde(default)]
    block_timestamp: i64,
    value: String,
}

/// Balance and transfer lookups against the TronGrid REST API.
#[derive(Clone)]
pub struct TronGridClient {
    pub base_url: String,
    pub token: Token,
    pub usdt_contract: String,
    api_key: Option<String>,
    http_client: reqwest::Client,
}

impl TronGridClient {
    pub fn new(
        network: Network,
        token: Token,
        usdt_contract: String,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Arc<Self>, LedgerError> {
        Self::with_base_url(
            network.trongrid_url().to_string(),
            token,
            usdt_contract,
            api_key,
            timeout,
        )
    }

    pub fn with_base_url(
        base_url: String,
        token: Token,
        usdt_contract: String,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Arc<Self>, LedgerError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LedgerError::Unexpected(format!("failed to build HTTP client: {e}")))?;

        Ok(Arc::new(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            usdt_contract,
            api_key: api_key.filter(|k| !k.is_empty()),
            http_client,
        }))
    }

    async fn get_json<T>(&self, url: &str, address: &str) -> Result<T, LedgerError>
    where
        T: for<'de> Deserialize<'de>,
    {
        let mut req = self.http_client.get(url);
        if let Some(key) = &self.api_key {
            req = req.header(API_KEY_HEADER, key);
        }

        let resp = req.send().await.map_err(transport_error)?;
        let resp = check_status(resp, address)?;
        let body = resp.text().await.map_err(transport_error)?;
        tracing::debug!(address = %address, bytes = body.len(), "TronGrid response received");

        serde_json::from_str(&body)
            .map_err(|e| LedgerError::Unexpected(format!("failed to decode response: {e}")))
    }

    async fn latest_trx_deposit(
        &self,
        address: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<Deposit>, LedgerError> {
        let url = format!(
            "{}/v1/accounts/{}/transactions?only_to=true&only_confirmed=true&limit={}&min_timestamp={}&order_by=block_timestamp,desc",
            self.base_url,
            address,
            DEPOSIT_PAGE,
            since.timestamp_millis()
        );
        let resp: TransactionsResponse = self.get_json(&url, address).await?;
        Ok(pick_trx_deposit(resp))
    }

    async fn latest_usdt_deposit(
        &self,
        address: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<Deposit>, LedgerError> {
        let url = format!(
            "{}/v1/accounts/{}/transactions/trc20?only_to=true&only_confirmed=true&limit={}&min_timestamp={}&contract_address={}&order_by=block_timestamp,desc",
            self.base_url,
            address,
            DEPOSIT_PAGE,
            since.timestamp_millis(),
            self.usdt_contract
        );
        let resp: Trc20Response = self.get_json(&url, address).await?;
        pick_trc20_deposit(resp)
    }
}

#[async_trait]
impl LedgerClient for TronGridClient {
    async fn get_balance(&self, address: &str) -> Result<Balance, LedgerError> {
        let url = format!("{}/v1/accounts/{}", self.base_url, address);
        let resp: AccountsResponse = self.get_json(&url, address).await?;
        let amount = account_balance(resp, address, self.token, &self.usdt_contract)?;

        Ok(Balance {
            amount,
            as_of: Utc::now(),
        })
    }

    async fn latest_deposit(
        &self,
        address: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<Deposit>, LedgerError> {
        match self.token {
            Token::Trx => self.latest_trx_deposit(address, since).await,
            Token::Usdt => self.latest_usdt_deposit(address, since).await,
        }
    }
}

fn transport_error(err: reqwest::Error) -> LedgerError {
    if err.is_timeout() {
        LedgerError::Transient(format!("request timed out: {err}"))
    } else if err.is_decode() {
        LedgerError::Unexpected(err.to_string())
    } else {
        LedgerError::Transient(err.to_string())
    }
}

fn check_status(resp: Response, address: &str) -> Result<Response, LedgerError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    match status {
        StatusCode::TOO_MANY_REQUESTS => {
            let retry_after = resp
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            Err(LedgerError::RateLimited { retry_after })
        }
        StatusCode::NOT_FOUND => Err(LedgerError::NotFound(address.to_string())),
        s if s.is_server_error() => Err(LedgerError::Transient(format!("ledger returned {s}"))),
        s => Err(LedgerError::Unexpected(format!("ledger returned {s}"))),
    }
}

fn account_balance(
    resp: AccountsResponse,
    address: &str,
    token: Token,
    usdt_contract: &str,
) -> Result<i64, LedgerError> {
    // Never-activated accounts come back with an empty data array.
    let account = resp
        .data
        .into_iter()
        .next()
        .ok_or_else(|| LedgerError::NotFound(address.to_string()))?;

    match token {
        Token::Trx => Ok(account.balance),
        Token::Usdt => {
            let raw = account
                .trc20
                .iter()
                .find_map(|entry| entry.get(usdt_contract));
            match raw {
                Some(v) => v.parse::<i64>().map_err(|e| {
                    LedgerError::Unexpected(format!("bad trc20 balance {v:?}: {e}"))
                }),
                None => Ok(0),
            }
        }
    }
}

fn pick_trx_deposit(resp: TransactionsResponse) -> Option<Deposit> {
    resp.data.into_iter().find_map(|tx| {
        let amount = tx
            .raw_data
            .as_ref()?
            .contract
            .iter()
            .find(|c| c.kind == TRANSFER_CONTRACT)?
            .parameter
            .value
            .amount;
        Some(Deposit {
            tx_id: tx.tx_id,
            amount,
            block_number: tx.block_number,
            timestamp: millis_to_datetime(tx.block_timestamp),
        })
    })
}

fn pick_trc20_deposit(resp: Trc20Response) -> Result<Option<Deposit>, LedgerError> {
    let Some(transfer) = resp.data.into_iter().next() else {
        return Ok(None);
    };
    let amount = transfer.value.parse::<i64>().map_err(|e| {
        LedgerError::Unexpected(format!("bad trc20 value {:?}: {e}", transfer.value))
    })?;
    Ok(Some(Deposit {
        tx_id: transfer.transaction_id,
        amount,
        block_number: None,
        timestamp: millis_to_datetime(transfer.block_timestamp),
    }))
}

fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}
