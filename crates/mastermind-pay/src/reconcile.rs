//! Deciding whether a payment really happened.
//!
//! A wallet session can throw after the transaction was broadcast, so a
//! thrown error is never proof of failure. Candidates come from three
//! sources, tried in order:
//!
//! 1. the normal response,
//! 2. the thrown fault (stringified payload, then message),
//! 3. a response captured before the throw.
//!
//! A candidate is only trusted once the chain confirms it at `confirmed`.
//! If nothing confirms right away, every candidate is re-checked once after
//! `recheck_delay`. The payment itself is never retried here.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use regex::Regex;
use serde_json::Value;
use tracing::{debug, info, warn};

use mastermind_shared::signature::to_canonical;
use mastermind_shared::{CodecError, TransactionSignature, WalletAddress};

use crate::chain::{ChainClient, ConfirmationStatus};
use crate::error::{PaymentError, Result};
use crate::wallet::PaymentAttempt;

/// Where a candidate signature was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureSource {
    Response,
    ErrorPayload,
    CapturedResponse,
}

impl std::fmt::Display for SignatureSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            SignatureSource::Response => "response",
            SignatureSource::ErrorPayload => "error-payload",
            SignatureSource::CapturedResponse => "captured-response",
        })
    }
}

/// A signature the chain has confirmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmedPayment {
    pub signature: TransactionSignature,
    pub source: SignatureSource,
}

// ---------------------------------------------------------------------------
// Signature extraction
// ---------------------------------------------------------------------------

/// Pull a signature out of a wallet response of unknown shape.
///
/// Accepts `{ signatures: [..] }`, `{ signature }`, a bare array (of strings,
/// `{ signature }` objects or byte arrays), a bare string, and a raw 64-byte
/// array.
pub fn extract_signature(response: &Value) -> Option<String> {
    match response {
        Value::String(s) => non_empty(s),
        Value::Array(items) => {
            if let Some(bytes) = as_signature_bytes(items) {
                return Some(bs58::encode(bytes).into_string());
            }
            items.first().and_then(extract_signature)
        }
        Value::Object(map) => {
            if let Some(sigs) = map.get("signatures") {
                if let Some(found) = extract_signature(sigs) {
                    return Some(found);
                }
            }
            map.get("signature").and_then(extract_signature)
        }
        _ => None,
    }
}

fn non_empty(s: &str) -> Option<String> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn as_signature_bytes(items: &[Value]) -> Option<Vec<u8>> {
    if items.len() != mastermind_shared::constants::SIGNATURE_SIZE {
        return None;
    }
    items
        .iter()
        .map(|v| v.as_u64().and_then(|n| u8::try_from(n).ok()))
        .collect()
}

fn field_pattern() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#""signatures?"\s*:\s*\[?\s*"([A-Za-z0-9+/]{40,}={0,2})""#).ok())
        .as_ref()
}

fn adjacent_pattern() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)signatures?[^A-Za-z0-9+/]{1,16}([A-Za-z0-9+/]{40,}={0,2})").ok())
        .as_ref()
}

/// Find a signature embedded in free text: a JSON `signature` field first,
/// then a long token right after the word "signature".
pub fn scan_for_signature(text: &str) -> Option<String> {
    field_pattern()
        .and_then(|re| re.captures(text))
        .or_else(|| adjacent_pattern().and_then(|re| re.captures(text)))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Ordered, de-duplicated candidates from an attempt.
pub fn candidates(attempt: &PaymentAttempt) -> Vec<(SignatureSource, String)> {
    let mut found: Vec<(SignatureSource, String)> = Vec::new();
    let mut push = |source: SignatureSource, raw: Option<String>| {
        if let Some(raw) = raw {
            if !found.iter().any(|(_, r)| *r == raw) {
                found.push((source, raw));
            }
        }
    };

    push(SignatureSource::Response, attempt.response.as_ref().and_then(extract_signature));
    if let Some(fault) = &attempt.fault {
        push(SignatureSource::ErrorPayload, scan_for_signature(&fault.stringified()));
        push(SignatureSource::ErrorPayload, scan_for_signature(&fault.message));
    }
    push(
        SignatureSource::CapturedResponse,
        attempt.captured.as_ref().and_then(extract_signature),
    );
    found
}

// ---------------------------------------------------------------------------
// Reconciler
// ---------------------------------------------------------------------------

/// Turns a [`PaymentAttempt`] into a confirmed signature or a typed error.
#[derive(Clone)]
pub struct Reconciler {
    chain: Arc<dyn ChainClient>,
    recheck_delay: Duration,
}

impl Reconciler {
    pub fn new(chain: Arc<dyn ChainClient>, recheck_delay: Duration) -> Self {
        Self { chain, recheck_delay }
    }

    pub async fn reconcile(&self, attempt: &PaymentAttempt) -> Result<ConfirmedPayment> {
        let found = candidates(attempt);
        if found.is_empty() {
            info!(threw = attempt.threw(), "No signature recovered from wallet session");
            return Err(PaymentError::NoSignature {
                fault: attempt.fault.as_ref().map(|f| f.message.clone()),
            });
        }

        let canonical: Vec<(SignatureSource, TransactionSignature)> = found
            .into_iter()
            .map(|(source, raw)| (source, to_canonical(&raw)))
            .collect();

        let mut last_reason = String::new();
        for (source, signature) in &canonical {
            debug!(source = %source, signature = %signature, "Checking candidate signature");
            match self.check(signature).await {
                Ok(()) => return Ok(self.confirmed(signature, *source)),
                Err(reason) => last_reason = reason,
            }
        }

        debug!(delay_ms = self.recheck_delay.as_millis() as u64, "Re-checking candidates after delay");
        tokio::time::sleep(self.recheck_delay).await;

        for (source, signature) in &canonical {
            match self.check(signature).await {
                Ok(()) => return Ok(self.confirmed(signature, *source)),
                Err(reason) => last_reason = reason,
            }
        }

        let (source, signature) = canonical[0].clone();
        warn!(
            source = %source,
            signature = %signature,
            reason = %last_reason,
            "Candidate signature could not be confirmed"
        );
        Err(PaymentError::UnconfirmedSignature {
            signature,
            reason: last_reason,
        })
    }

    fn confirmed(&self, signature: &TransactionSignature, source: SignatureSource) -> ConfirmedPayment {
        info!(source = %source, signature = %signature, "Payment confirmed on-chain");
        ConfirmedPayment {
            signature: signature.clone(),
            source,
        }
    }

    async fn check(&self, signature: &TransactionSignature) -> std::result::Result<(), String> {
        if let Err(e) = signature.to_bytes() {
            return Err(e.to_string());
        }
        match self.chain.confirmation_status(signature).await {
            Ok(ConfirmationStatus::Confirmed) => Ok(()),
            Ok(ConfirmationStatus::Pending) => Err("transaction not yet confirmed".into()),
            Ok(ConfirmationStatus::NotFound) => Err("signature not found on-chain".into()),
            Ok(ConfirmationStatus::Failed(e)) => Err(format!("transaction failed: {e}")),
            Err(e) => Err(e.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// What the user is told after reconciliation has definitively failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentFailure {
    Cancelled,
    PlatformUnsupported,
    WalletMismatch {
        expected: WalletAddress,
        actual: WalletAddress,
    },
    TransactionFormat(String),
    NoSignature,
    UnconfirmedSignature { signature: TransactionSignature },
    Failed(String),
}

const CANCEL_KEYWORDS: &[&str] = &["cancel", "reject", "declin", "denied", "abort"];
const FORMAT_KEYWORDS: &[&str] = &[
    "invalid transaction",
    "failed to deserialize",
    "malformed",
    "transaction format",
    "invalid payload",
];

fn mentions(text: &str, keywords: &[&str]) -> bool {
    let lower = text.to_lowercase();
    keywords.iter().any(|k| lower.contains(k))
}

/// Map a reconciliation or session error to a user-facing category.
pub fn classify(error: &PaymentError, attempt: Option<&PaymentAttempt>) -> PaymentFailure {
    let fault_text = attempt
        .and_then(|a| a.fault.as_ref())
        .map(|f| f.stringified())
        .unwrap_or_default();

    match error {
        PaymentError::PlatformUnsupported => PaymentFailure::PlatformUnsupported,
        PaymentError::WalletMismatch { expected, actual } => PaymentFailure::WalletMismatch {
            expected: *expected,
            actual: *actual,
        },
        PaymentError::UnconfirmedSignature { signature, .. } => PaymentFailure::UnconfirmedSignature {
            signature: signature.clone(),
        },
        PaymentError::TransactionFormat(m) => PaymentFailure::TransactionFormat(m.clone()),
        PaymentError::Codec(CodecError::InvalidAmount(m)) => PaymentFailure::TransactionFormat(m.clone()),
        PaymentError::NoSignature { fault } => {
            let text = format!("{} {}", fault.as_deref().unwrap_or_default(), fault_text);
            if mentions(&text, CANCEL_KEYWORDS) {
                PaymentFailure::Cancelled
            } else if mentions(&text, FORMAT_KEYWORDS) {
                PaymentFailure::TransactionFormat(fault.clone().unwrap_or_default())
            } else {
                PaymentFailure::NoSignature
            }
        }
        PaymentError::Wallet(m) if mentions(m, CANCEL_KEYWORDS) => PaymentFailure::Cancelled,
        other => PaymentFailure::Failed(other.to_string()),
    }
}

impl PaymentFailure {
    /// Whether funds might have moved despite the failure.
    pub fn may_have_paid(&self) -> bool {
        matches!(
            self,
            PaymentFailure::NoSignature | PaymentFailure::UnconfirmedSignature { .. } | PaymentFailure::Failed(_)
        )
    }

    pub fn user_message(&self) -> String {
        match self {
            PaymentFailure::Cancelled => "Payment was cancelled in the wallet. No funds were moved.".into(),
            PaymentFailure::PlatformUnsupported => {
                "Wallet payments are not available on this device. Use the mobile app with a Solana wallet installed."
                    .into()
            }
            PaymentFailure::WalletMismatch { expected, actual } => format!(
                "The wallet authorized {} but you are connected as {}. Switch accounts in your wallet and try again.",
                actual.short(),
                expected.short()
            ),
            PaymentFailure::TransactionFormat(detail) => {
                format!("The wallet rejected the transaction before signing ({detail}). No funds were moved.")
            }
            PaymentFailure::NoSignature => "The transaction was not confirmed as submitted and was likely cancelled. \
                 Check your wallet's transaction history before trying again to avoid paying twice."
                .into(),
            PaymentFailure::UnconfirmedSignature { signature } => format!(
                "We could not confirm transaction {signature} on-chain yet. \
                 Check your wallet's transaction history before trying again to avoid paying twice."
            ),
            PaymentFailure::Failed(detail) => format!(
                "Payment failed: {detail}. Check your wallet's transaction history before trying again."
            ),
        }
    }
}
