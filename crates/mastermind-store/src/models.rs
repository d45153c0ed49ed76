//! Inputs to the store and the row conversions shared by every table.
//!
//! Reads return the canonical records from `mastermind_shared::types`; this
//! module holds what the store needs beyond them.

use chrono::{DateTime, Utc};
use rusqlite::types::Type;

use mastermind_shared::address::normalize;
use mastermind_shared::amount::{lamports_to_sol, sol_to_lamports};
use mastermind_shared::{CodecError, TransactionSignature, WalletAddress};

// ---------------------------------------------------------------------------
// NewGroup
// ---------------------------------------------------------------------------

/// A group about to be created. The id is assigned by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct NewGroup {
    pub name: String,
    pub owner_address: WalletAddress,
    pub join_price: f64,
    pub payment_address: WalletAddress,
    pub description: Option<String>,
    pub background_image: Option<String>,
    pub category: String,
}

// ---------------------------------------------------------------------------
// Payments
// ---------------------------------------------------------------------------

/// What a payment signature was spent on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentPurpose {
    CreateGroup,
    JoinGroup,
}

impl PaymentPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentPurpose::CreateGroup => "create",
            PaymentPurpose::JoinGroup => "join",
        }
    }
}

/// A verified payment about to be consumed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRecord {
    pub signature: TransactionSignature,
    pub payer: WalletAddress,
    pub purpose: PaymentPurpose,
}

/// A registered user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub address: WalletAddress,
    pub username: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

pub(crate) fn to_lamports_column(sol: f64) -> Result<i64, CodecError> {
    let lamports = sol_to_lamports(sol)?;
    i64::try_from(lamports).map_err(|_| CodecError::InvalidAmount(format!("{sol} SOL is too large to store")))
}

pub(crate) fn from_lamports_column(lamports: i64) -> f64 {
    lamports_to_sol(lamports.max(0) as u64)
}

fn conversion_error<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

pub(crate) fn address_at(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<WalletAddress> {
    let raw: String = row.get(idx)?;
    normalize(&raw).map_err(|e| conversion_error(idx, e))
}

pub(crate) fn timestamp_at(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

pub(crate) fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}
