//! Spent payment signatures.
//!
//! A signature may pay for exactly one create or join. Consumption happens
//! inside the transaction that records what it paid for.

use rusqlite::{params, Connection, ErrorCode};

use mastermind_shared::TransactionSignature;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{now_rfc3339, PaymentRecord};

impl Database {
    /// Whether `signature` has already paid for something.
    pub fn is_signature_used(&self, signature: &TransactionSignature) -> Result<bool> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM payment_signatures WHERE signature = ?1",
            params![signature.as_str()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }
}

/// Record `payment` as spent on `group_id`. Fails with
/// [`StoreError::SignatureReused`] if it was spent before.
pub(crate) fn consume_signature(conn: &Connection, payment: &PaymentRecord, group_id: &str) -> Result<()> {
    let inserted = conn.execute(
        "INSERT INTO payment_signatures (signature, purpose, payer, group_id, used_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            payment.signature.as_str(),
            payment.purpose.as_str(),
            payment.payer.to_base58(),
            group_id,
            now_rfc3339(),
        ],
    );

    match inserted {
        Ok(_) => Ok(()),
        Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
            tracing::warn!(signature = %payment.signature, group_id, "rejected reused payment signature");
            Err(StoreError::SignatureReused(payment.signature.to_string()))
        }
        Err(e) => Err(e.into()),
    }
}
