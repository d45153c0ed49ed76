use thiserror::Error;

/// Malformed identifiers or amounts. Always an input error, never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Invalid wallet address: {0}")]
    InvalidAddress(String),

    #[error("Invalid transaction signature: {0}")]
    InvalidSignatureFormat(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
}

/// Business-rule rejections from the membership rules.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MembershipError {
    #[error("Only the group owner can do this")]
    NotOwner,

    #[error("Not a member of this group")]
    NotMember,

    #[error("Already a member of this group")]
    AlreadyMember,

    #[error("The owner cannot leave their own group; delete it instead")]
    OwnerCannotLeave,
}
