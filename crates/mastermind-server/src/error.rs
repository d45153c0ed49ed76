use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use mastermind_pay::PaymentError;
use mastermind_shared::{CodecError, MembershipError};
use mastermind_store::StoreError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Payment verification failed: {0}")]
    PaymentRequired(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for ServerError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => ServerError::NotFound("No such record".into()),
            StoreError::SignatureReused(_) | StoreError::UsernameTaken(_) | StoreError::UsernameAlreadySet(_) => {
                ServerError::Conflict(e.to_string())
            }
            StoreError::Codec(c) => ServerError::BadRequest(c.to_string()),
            other => {
                tracing::error!(error = %other, "Store failure");
                ServerError::Internal(other.to_string())
            }
        }
    }
}

impl From<MembershipError> for ServerError {
    fn from(e: MembershipError) -> Self {
        match e {
            MembershipError::NotOwner | MembershipError::NotMember => ServerError::Forbidden(e.to_string()),
            MembershipError::AlreadyMember => ServerError::Conflict(e.to_string()),
            MembershipError::OwnerCannotLeave => ServerError::BadRequest(e.to_string()),
        }
    }
}

impl From<CodecError> for ServerError {
    fn from(e: CodecError) -> Self {
        ServerError::BadRequest(e.to_string())
    }
}

impl From<PaymentError> for ServerError {
    fn from(e: PaymentError) -> Self {
        match e {
            PaymentError::Rpc(m) => ServerError::Unavailable(format!("Solana RPC unreachable: {m}")),
            PaymentError::Codec(c) => ServerError::BadRequest(c.to_string()),
            PaymentError::VerificationFailed(m) => ServerError::PaymentRequired(m),
            other => ServerError::PaymentRequired(other.to_string()),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
            ServerError::Forbidden(m) => (StatusCode::FORBIDDEN, m.clone()),
            ServerError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            ServerError::Conflict(m) => (StatusCode::CONFLICT, m.clone()),
            ServerError::PaymentRequired(_) => (StatusCode::PAYMENT_REQUIRED, self.to_string()),
            ServerError::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, self.to_string()),
            ServerError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}
