//! Read access to the Solana cluster.
//!
//! [`ChainClient`] is the seam between payment logic and the network. The
//! production implementation speaks JSON-RPC 2.0 over `reqwest`; tests plug
//! in scripted chains.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use mastermind_shared::address::normalize;
use mastermind_shared::constants::PAYMENT_COMMITMENT;
use mastermind_shared::{TransactionSignature, WalletAddress};

use crate::error::{PaymentError, Result};
use crate::transaction::{Blockhash, TransferLeg};

/// Where a signature stands on-chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationStatus {
    /// Reached `confirmed` (or `finalized`) without error.
    Confirmed,
    /// Known to the cluster but not yet at `confirmed`.
    Pending,
    /// Landed but the transaction itself failed.
    Failed(String),
    /// Unknown to the cluster.
    NotFound,
}

/// The system transfers a confirmed transaction performed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmedTransfers {
    pub fee_payer: WalletAddress,
    pub legs: Vec<TransferLeg>,
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    /// A blockhash fresh enough to sign against right now.
    async fn latest_blockhash(&self) -> Result<Blockhash>;

    /// Confirmation status of a signature at commitment `confirmed`.
    async fn confirmation_status(&self, signature: &TransactionSignature) -> Result<ConfirmationStatus>;

    /// Transfers performed by a confirmed, successful transaction.
    /// `None` if the transaction is unknown, unconfirmed or failed.
    async fn confirmed_transfers(&self, signature: &TransactionSignature) -> Result<Option<ConfirmedTransfers>>;
}

// ---------------------------------------------------------------------------
// JSON-RPC implementation
// ---------------------------------------------------------------------------

/// Solana JSON-RPC client.
#[derive(Clone)]
pub struct RpcChainClient {
    http: reqwest::Client,
    url: String,
}

#[derive(Deserialize)]
struct RpcEnvelope<T> {
    result: Option<T>,
    error: Option<RpcErrorBody>,
}

#[derive(Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
struct WithContext<T> {
    value: T,
}

#[derive(Deserialize)]
struct BlockhashValue {
    blockhash: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignatureStatus {
    #[serde(default)]
    confirmation_status: Option<String>,
    #[serde(default)]
    err: Option<Value>,
}

#[derive(Deserialize)]
struct ParsedTransaction {
    meta: Option<ParsedMeta>,
    transaction: ParsedTxBody,
}

#[derive(Deserialize)]
struct ParsedMeta {
    #[serde(default)]
    err: Option<Value>,
}

#[derive(Deserialize)]
struct ParsedTxBody {
    message: ParsedMessage,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ParsedMessage {
    account_keys: Vec<ParsedAccountKey>,
    instructions: Vec<Value>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ParsedAccountKey {
    Object { pubkey: String },
    Plain(String),
}

impl ParsedAccountKey {
    fn pubkey(&self) -> &str {
        match self {
            ParsedAccountKey::Object { pubkey } => pubkey,
            ParsedAccountKey::Plain(s) => s,
        }
    }
}

impl RpcChainClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, url: url.into() })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<Option<T>> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        debug!(method, url = %self.url, "Solana RPC call");

        let resp = self.http.post(&self.url).json(&body).send().await?;
        if !resp.status().is_success() {
            return Err(PaymentError::Rpc(format!("{method}: HTTP {}", resp.status())));
        }

        let envelope: RpcEnvelope<T> = resp.json().await?;
        if let Some(err) = envelope.error {
            return Err(PaymentError::Rpc(format!("{method}: {} ({})", err.message, err.code)));
        }
        Ok(envelope.result)
    }
}

#[async_trait]
impl ChainClient for RpcChainClient {
    async fn latest_blockhash(&self) -> Result<Blockhash> {
        let result: Option<WithContext<BlockhashValue>> = self
            .call("getLatestBlockhash", json!([{ "commitment": PAYMENT_COMMITMENT }]))
            .await?;
        let value = result.ok_or_else(|| PaymentError::Rpc("getLatestBlockhash: empty result".into()))?;
        value.value.blockhash.parse()
    }

    async fn confirmation_status(&self, signature: &TransactionSignature) -> Result<ConfirmationStatus> {
        let result: Option<WithContext<Vec<Option<SignatureStatus>>>> = self
            .call(
                "getSignatureStatuses",
                json!([[signature.as_str()], { "searchTransactionHistory": true }]),
            )
            .await?;

        let status = result.and_then(|r| r.value.into_iter().next().flatten());
        Ok(match status {
            None => ConfirmationStatus::NotFound,
            Some(SignatureStatus { err: Some(err), .. }) if !err.is_null() => {
                ConfirmationStatus::Failed(err.to_string())
            }
            Some(SignatureStatus { confirmation_status, .. }) => match confirmation_status.as_deref() {
                Some("confirmed") | Some("finalized") => ConfirmationStatus::Confirmed,
                _ => ConfirmationStatus::Pending,
            },
        })
    }

    async fn confirmed_transfers(&self, signature: &TransactionSignature) -> Result<Option<ConfirmedTransfers>> {
        let result: Option<ParsedTransaction> = self
            .call(
                "getTransaction",
                json!([
                    signature.as_str(),
                    {
                        "encoding": "jsonParsed",
                        "commitment": PAYMENT_COMMITMENT,
                        "maxSupportedTransactionVersion": 0
                    }
                ]),
            )
            .await?;

        let Some(tx) = result else {
            return Ok(None);
        };
        if tx.meta.as_ref().and_then(|m| m.err.as_ref()).is_some_and(|e| !e.is_null()) {
            return Ok(None);
        }

        let fee_payer = tx
            .transaction
            .message
            .account_keys
            .first()
            .ok_or_else(|| PaymentError::Rpc("getTransaction: no account keys".into()))
            .and_then(|k| normalize(k.pubkey()).map_err(PaymentError::from))?;

        let legs = tx
            .transaction
            .message
            .instructions
            .iter()
            .filter_map(parse_system_transfer)
            .collect();

        Ok(Some(ConfirmedTransfers { fee_payer, legs }))
    }
}

/// Extract a system transfer from a `jsonParsed` instruction.
fn parse_system_transfer(ix: &Value) -> Option<TransferLeg> {
    if ix.get("program")?.as_str()? != "system" {
        return None;
    }
    let parsed = ix.get("parsed")?;
    if parsed.get("type")?.as_str()? != "transfer" {
        return None;
    }
    let info = parsed.get("info")?;
    Some(TransferLeg {
        from: normalize(info.get("source")?.as_str()?).ok()?,
        to: normalize(info.get("destination")?.as_str()?).ok()?,
        lamports: info.get("lamports")?.as_u64()?,
    })
}
