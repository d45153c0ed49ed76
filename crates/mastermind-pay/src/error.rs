use thiserror::Error;

use mastermind_shared::{CodecError, TransactionSignature, WalletAddress};

/// Everything that can go wrong between building a payment and holding a
/// confirmed signature for it.
#[derive(Error, Debug, Clone)]
pub enum PaymentError {
    #[error("Wallet payments are not supported on this platform")]
    PlatformUnsupported,

    #[error("Wallet authorized {actual} but the connected wallet is {expected}")]
    WalletMismatch {
        expected: WalletAddress,
        actual: WalletAddress,
    },

    #[error("Wallet returned no accounts")]
    NoAccounts,

    #[error("Transaction was not confirmed submitted; it was likely cancelled")]
    NoSignature { fault: Option<String> },

    #[error("Signature {signature} could not be confirmed on-chain: {reason}")]
    UnconfirmedSignature {
        signature: TransactionSignature,
        reason: String,
    },

    #[error("Transaction format error: {0}")]
    TransactionFormat(String),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("Solana RPC error: {0}")]
    Rpc(String),

    #[error("Wallet error: {0}")]
    Wallet(String),

    #[error("Payment verification failed: {0}")]
    VerificationFailed(String),
}

impl From<reqwest::Error> for PaymentError {
    fn from(e: reqwest::Error) -> Self {
        PaymentError::Rpc(e.to_string())
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PaymentError>;
