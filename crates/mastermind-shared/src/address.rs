//! Canonical wallet addresses.
//!
//! Wallet adapters hand back account identifiers either as base58 (the
//! Solana display form) or as base64 of the raw 32 key bytes. Everything past
//! this module only ever sees the canonical base58 form.

use std::fmt;
use std::str::FromStr;

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::constants::PUBKEY_SIZE;
use crate::error::CodecError;

/// Standard-alphabet base64 that tolerates missing padding.
pub(crate) const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// A Solana account address (Ed25519 public key, 32 bytes).
///
/// Equality, ordering and hashing are over the key bytes, so two textual
/// encodings of the same key compare equal once normalized.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WalletAddress([u8; PUBKEY_SIZE]);

impl WalletAddress {
    pub fn from_bytes(bytes: [u8; PUBKEY_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; PUBKEY_SIZE] {
        &self.0
    }

    /// Canonical base58 form.
    pub fn to_base58(&self) -> String {
        bs58::encode(self.0).into_string()
    }

    /// First and last four characters, for logs.
    pub fn short(&self) -> String {
        let s = self.to_base58();
        if s.len() <= 8 {
            return s;
        }
        format!("{}..{}", &s[..4], &s[s.len() - 4..])
    }
}

/// Normalize a wallet-supplied account identifier into a [`WalletAddress`].
///
/// 1. A base58 string that decodes to exactly 32 bytes is already canonical.
/// 2. Otherwise every non-base64 character is stripped and the remainder is
///    base64-decoded; 32 bytes is accepted.
/// 3. Anything else is [`CodecError::InvalidAddress`].
pub fn normalize(input: &str) -> Result<WalletAddress, CodecError> {
    if let Some(bytes) = decode_base58_key(input) {
        return Ok(WalletAddress(bytes));
    }

    let cleaned: String = input
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '='))
        .collect();

    if !cleaned.is_empty() {
        if let Ok(bytes) = LENIENT_BASE64.decode(cleaned.as_bytes()) {
            if let Ok(key) = <[u8; PUBKEY_SIZE]>::try_from(bytes.as_slice()) {
                return Ok(WalletAddress(key));
            }
        }
    }

    Err(CodecError::InvalidAddress(truncate_for_error(input)))
}

fn decode_base58_key(input: &str) -> Option<[u8; PUBKEY_SIZE]> {
    let bytes = bs58::decode(input).into_vec().ok()?;
    <[u8; PUBKEY_SIZE]>::try_from(bytes.as_slice()).ok()
}

fn truncate_for_error(input: &str) -> String {
    const MAX: usize = 64;
    if input.chars().count() <= MAX {
        input.to_string()
    } else {
        let head: String = input.chars().take(MAX).collect();
        format!("{head}...")
    }
}

impl FromStr for WalletAddress {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        normalize(s)
    }
}

impl fmt::Display for WalletAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base58())
    }
}

impl fmt::Debug for WalletAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WalletAddress({})", self.to_base58())
    }
}

impl Serialize for WalletAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base58())
    }
}

impl<'de> Deserialize<'de> for WalletAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        normalize(&raw).map_err(serde::de::Error::custom)
    }
}
