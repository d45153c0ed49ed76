//! # mastermind-pay
//!
//! Solana payment plumbing for Masterminds: unsigned transfer transactions,
//! a JSON-RPC chain client, the mobile wallet session and the reconciler
//! that decides whether a payment really happened.

pub mod chain;
pub mod error;
pub mod reconcile;
pub mod transaction;
pub mod verify;
pub mod wallet;

pub use chain::{ChainClient, ConfirmationStatus, ConfirmedTransfers, RpcChainClient};
pub use error::PaymentError;
pub use reconcile::{classify, ConfirmedPayment, PaymentFailure, Reconciler, SignatureSource};
pub use transaction::{
    build_create_fee_transfer, build_join_fee_transfer, Blockhash, TransferLeg, UnsignedTransaction,
};
pub use verify::{verify_payment, ExpectedLeg};
pub use wallet::{
    Authorization, PaymentAttempt, UnsupportedPlatformTransport, WalletFault, WalletSessionClient,
    WalletTransport,
};
