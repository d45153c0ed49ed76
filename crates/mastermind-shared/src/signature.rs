//! Canonical transaction signatures.
//!
//! Some wallet adapters return the 64-byte transaction signature base64
//! encoded. Chain lookups and the backend want base58.

use std::fmt;

use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::warn;

use crate::address::LENIENT_BASE64;
use crate::constants::SIGNATURE_SIZE;
use crate::error::CodecError;

/// A transaction signature in the form it was canonicalized to.
///
/// Construction through [`to_canonical`] never fails; a value that is not a
/// real signature is caught later by on-chain confirmation. Use
/// [`TransactionSignature::parse_strict`] where a malformed value must be
/// rejected up front.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionSignature(String);

/// Characters that appear in base64 but never in base58.
fn has_base64_only_chars(s: &str) -> bool {
    s.contains(&['+', '/', '='][..])
}

/// Convert a signature to base58 if it is recognizably base64.
///
/// Strings without `+`, `/` or `=` are assumed to be base58 already and are
/// returned untouched. If decoding fails the input is kept as-is.
pub fn to_canonical(sig: &str) -> TransactionSignature {
    if !has_base64_only_chars(sig) {
        return TransactionSignature(sig.to_string());
    }

    match LENIENT_BASE64.decode(sig.as_bytes()) {
        Ok(bytes) => TransactionSignature(bs58::encode(bytes).into_string()),
        Err(e) => {
            warn!(error = %e, "Signature looked base64 but did not decode, keeping as-is");
            TransactionSignature(sig.to_string())
        }
    }
}

impl TransactionSignature {
    /// Canonicalize, then require exactly 64 bytes of base58.
    pub fn parse_strict(sig: &str) -> Result<Self, CodecError> {
        let canonical = to_canonical(sig.trim());
        canonical.to_bytes()?;
        Ok(canonical)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn to_bytes(&self) -> Result<[u8; SIGNATURE_SIZE], CodecError> {
        let bytes = bs58::decode(&self.0)
            .into_vec()
            .map_err(|e| CodecError::InvalidSignatureFormat(format!("not base58: {e}")))?;
        <[u8; SIGNATURE_SIZE]>::try_from(bytes.as_slice()).map_err(|_| {
            CodecError::InvalidSignatureFormat(format!(
                "expected {SIGNATURE_SIZE} bytes, got {}",
                bytes.len()
            ))
        })
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for TransactionSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for TransactionSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransactionSignature({})", self.0)
    }
}

impl Serialize for TransactionSignature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for TransactionSignature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(to_canonical(&raw))
    }
}
