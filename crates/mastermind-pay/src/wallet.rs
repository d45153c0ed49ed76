//! Mobile wallet session.
//!
//! The wallet is an external app: it authorizes an account, signs and
//! broadcasts what we hand it, and answers in whatever shape it likes. The
//! answer and the broadcast are loosely coupled: the session can fail after
//! funds already moved. This module only gathers what came back;
//! [`crate::reconcile`] decides what it means.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use mastermind_shared::address::normalize;
use mastermind_shared::WalletAddress;

use crate::error::{PaymentError, Result};
use crate::transaction::{TransferLeg, UnsignedTransaction};

/// An error raised by the wallet transport.
///
/// `payload` carries whatever structured data accompanied the failure; it
/// may embed the signature of a transaction that did go through.
#[derive(Debug, Clone, PartialEq)]
pub struct WalletFault {
    pub message: String,
    pub payload: Option<Value>,
}

impl WalletFault {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            payload: None,
        }
    }

    pub fn with_payload(message: impl Into<String>, payload: Value) -> Self {
        Self {
            message: message.into(),
            payload: Some(payload),
        }
    }

    /// Stringified form: message plus serialized payload.
    pub fn stringified(&self) -> String {
        match &self.payload {
            Some(payload) => format!("{}: {}", self.message, payload),
            None => self.message.clone(),
        }
    }
}

impl fmt::Display for WalletFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Result of a wallet authorization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authorization {
    /// Accounts as the wallet reported them (base58 or base64).
    pub accounts: Vec<String>,
    pub auth_token: Option<String>,
}

/// Platform wallet adapter.
#[async_trait]
pub trait WalletTransport: Send + Sync {
    /// Whether this runtime can open a wallet session at all.
    fn is_supported(&self) -> bool;

    async fn authorize(&self, cluster: &str) -> std::result::Result<Authorization, WalletFault>;

    /// Ask the wallet to sign and broadcast base64 transactions. The
    /// response is returned unparsed.
    async fn sign_and_send(&self, payloads: &[String]) -> std::result::Result<Value, WalletFault>;

    /// End the session.
    async fn close(&self) -> std::result::Result<(), WalletFault> {
        Ok(())
    }

    /// Sign an arbitrary message with the authorized account, if the wallet
    /// supports it.
    async fn sign_message(
        &self,
        _address: &WalletAddress,
        _message: &[u8],
    ) -> std::result::Result<Vec<u8>, WalletFault> {
        Err(WalletFault::new("message signing is not supported by this wallet"))
    }
}

/// Transport for runtimes without a wallet adapter.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedPlatformTransport;

#[async_trait]
impl WalletTransport for UnsupportedPlatformTransport {
    fn is_supported(&self) -> bool {
        false
    }

    async fn authorize(&self, _cluster: &str) -> std::result::Result<Authorization, WalletFault> {
        Err(WalletFault::new("wallet adapter unavailable on this platform"))
    }

    async fn sign_and_send(&self, _payloads: &[String]) -> std::result::Result<Value, WalletFault> {
        Err(WalletFault::new("wallet adapter unavailable on this platform"))
    }
}

/// One wallet round trip for one payment. Not persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentAttempt {
    pub payer: WalletAddress,
    pub legs: Vec<TransferLeg>,
    /// What the wallet returned when the session completed normally.
    pub response: Option<Value>,
    /// What the session threw, if it threw.
    pub fault: Option<WalletFault>,
    /// A response that arrived before a later step of the session threw.
    pub captured: Option<Value>,
}

impl PaymentAttempt {
    pub fn threw(&self) -> bool {
        self.fault.is_some()
    }
}

/// Opens wallet sessions against a cluster.
#[derive(Clone)]
pub struct WalletSessionClient {
    transport: Arc<dyn WalletTransport>,
    cluster: String,
}

impl WalletSessionClient {
    pub fn new(transport: Arc<dyn WalletTransport>, cluster: impl Into<String>) -> Self {
        Self {
            transport,
            cluster: cluster.into(),
        }
    }

    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    pub fn is_supported(&self) -> bool {
        self.transport.is_supported()
    }

    fn ensure_supported(&self) -> Result<()> {
        if self.transport.is_supported() {
            Ok(())
        } else {
            Err(PaymentError::PlatformUnsupported)
        }
    }

    /// Authorize and return the first account, normalized.
    pub async fn connect(&self) -> Result<WalletAddress> {
        self.ensure_supported()?;
        let auth = self
            .transport
            .authorize(&self.cluster)
            .await
            .map_err(|f| PaymentError::Wallet(f.message))?;
        let first = auth.accounts.first().ok_or(PaymentError::NoAccounts)?;
        let address = normalize(first)?;
        info!(address = %address.short(), cluster = %self.cluster, "Wallet connected");
        Ok(address)
    }

    /// Re-authorize and require the authorized account to be `expected`.
    pub async fn verify_owner(&self, expected: &WalletAddress) -> Result<WalletAddress> {
        let actual = self.connect().await?;
        check_expected(expected, &actual)?;
        Ok(actual)
    }

    /// Sign a message with the authorized account. Returns `None` when the
    /// wallet cannot sign messages.
    pub async fn sign_message(&self, address: &WalletAddress, message: &[u8]) -> Option<Vec<u8>> {
        match self.transport.sign_message(address, message).await {
            Ok(sig) => Some(sig),
            Err(fault) => {
                debug!(error = %fault, "Wallet did not sign message");
                None
            }
        }
    }

    /// Authorize, optionally check the account, then hand `tx` to the
    /// wallet to sign and broadcast.
    ///
    /// Errors are returned only for failures that happen before anything
    /// could have been broadcast (unsupported platform, no accounts, wrong
    /// account). Everything after that is recorded in the
    /// [`PaymentAttempt`] for reconciliation, including a thrown fault.
    pub async fn authorize_and_send(
        &self,
        tx: &UnsignedTransaction,
        expected_payer: Option<&WalletAddress>,
    ) -> Result<PaymentAttempt> {
        self.ensure_supported()?;

        let mut attempt = PaymentAttempt {
            payer: *tx.fee_payer(),
            legs: tx.transfer_legs(),
            response: None,
            fault: None,
            captured: None,
        };

        let auth = match self.transport.authorize(&self.cluster).await {
            Ok(auth) => auth,
            Err(fault) => {
                warn!(error = %fault, "Wallet authorization failed");
                attempt.fault = Some(fault);
                return Ok(attempt);
            }
        };
        let first = auth.accounts.first().ok_or(PaymentError::NoAccounts)?;
        let authorized = normalize(first)?;
        if let Some(expected) = expected_payer {
            check_expected(expected, &authorized)?;
        }

        let payload = tx.to_base64();
        debug!(
            payer = %authorized.short(),
            legs = attempt.legs.len(),
            bytes = payload.len(),
            "Submitting transaction to wallet"
        );

        match self.transport.sign_and_send(std::slice::from_ref(&payload)).await {
            Ok(response) => {
                // Keep it before the session is torn down; close can throw.
                attempt.captured = Some(response.clone());
                match self.transport.close().await {
                    Ok(()) => attempt.response = Some(response),
                    Err(fault) => {
                        warn!(error = %fault, "Wallet session failed after responding");
                        attempt.fault = Some(fault);
                    }
                }
            }
            Err(fault) => {
                warn!(error = %fault, "Wallet session threw during sign and send");
                attempt.fault = Some(fault);
            }
        }

        if attempt.fault.is_none() {
            attempt.captured = None;
        }
        Ok(attempt)
    }
}

fn check_expected(expected: &WalletAddress, actual: &WalletAddress) -> Result<()> {
    if expected == actual {
        return Ok(());
    }
    warn!(expected = %expected.short(), actual = %actual.short(), "Authorized wallet mismatch");
    Err(PaymentError::WalletMismatch {
        expected: *expected,
        actual: *actual,
    })
}
