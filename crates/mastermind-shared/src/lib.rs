//! # mastermind-shared
//!
//! Types and rules shared by the Masterminds client and backend: canonical
//! wallet addresses and transaction signatures, SOL/lamport arithmetic, the
//! REST wire models, the membership state machine and group ownership
//! proofs.

pub mod address;
pub mod amount;
pub mod constants;
pub mod error;
pub mod membership;
pub mod ownership;
pub mod protocol;
pub mod signature;
pub mod types;

pub use address::WalletAddress;
pub use error::{CodecError, MembershipError};
pub use signature::TransactionSignature;
