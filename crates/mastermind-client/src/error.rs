use thiserror::Error;

use mastermind_pay::{classify, PaymentError, PaymentFailure};
use mastermind_shared::{CodecError, MembershipError, TransactionSignature};

/// Failure of a backend call that must not be swallowed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// Connection refused, DNS failure or timeout: the backend is not set up
    /// or not reachable.
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// The backend answered and said no.
    #[error("Backend rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Unexpected backend response: {0}")]
    Decode(String),
}

impl BackendError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, BackendError::Unavailable(_))
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            BackendError::Rejected { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            BackendError::Decode(e.to_string())
        } else {
            BackendError::Unavailable(e.to_string())
        }
    }
}

/// Outcome of a user action that did not complete.
#[derive(Error, Debug, Clone)]
pub enum FlowError {
    #[error("{}", .0.user_message())]
    Payment(PaymentFailure),

    /// Paid and confirmed, but the backend did not record it. Retry the
    /// record with `signature`; do not pay again.
    #[error("Payment {signature} went through but could not be recorded: {source}")]
    RecordFailed {
        signature: TransactionSignature,
        source: BackendError,
    },

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Membership(#[from] MembershipError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("An action for {0} is already in progress")]
    AlreadyInFlight(String),

    #[error("No wallet connected")]
    NotConnected,

    #[error("Group not found: {0}")]
    GroupNotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl From<PaymentError> for FlowError {
    /// For errors raised before a wallet attempt exists.
    fn from(e: PaymentError) -> Self {
        FlowError::Payment(classify(&e, None))
    }
}

impl FlowError {
    /// Whether the user may have been charged, so a blind retry could pay twice.
    pub fn may_have_paid(&self) -> bool {
        match self {
            FlowError::Payment(failure) => failure.may_have_paid(),
            FlowError::RecordFailed { .. } => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, FlowError>;
