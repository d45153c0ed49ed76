//! Usernames, keyed by wallet address.
//!
//! A username is set once and is unique regardless of case.

use rusqlite::{params, OptionalExtension};

use mastermind_shared::WalletAddress;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{address_at, now_rfc3339, timestamp_at, UserRecord};

impl Database {
    pub fn get_user(&self, address: &WalletAddress) -> Result<Option<UserRecord>> {
        let user = self
            .conn()
            .query_row(
                "SELECT address, username, created_at FROM users WHERE address = ?1",
                params![address.to_base58()],
                |row| {
                    Ok(UserRecord {
                        address: address_at(row, 0)?,
                        username: row.get(1)?,
                        created_at: timestamp_at(row, 2)?,
                    })
                },
            )
            .optional()?;
        Ok(user)
    }

    pub fn is_username_available(&self, username: &str) -> Result<bool> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM users WHERE username = ?1 COLLATE NOCASE",
            params![username],
            |row| row.get(0),
        )?;
        Ok(count == 0)
    }

    /// Give `address` its username. Registering the same name again is a
    /// no-op; a different name is rejected.
    pub fn register_username(&self, address: &WalletAddress, username: &str) -> Result<String> {
        if let Some(existing) = self.get_user(address)?.and_then(|u| u.username) {
            if existing.eq_ignore_ascii_case(username) {
                return Ok(existing);
            }
            return Err(StoreError::UsernameAlreadySet(existing));
        }

        if !self.is_username_available(username)? {
            return Err(StoreError::UsernameTaken(username.to_string()));
        }

        self.conn().execute(
            "INSERT INTO users (address, username, created_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(address) DO UPDATE SET username = excluded.username",
            params![address.to_base58(), username, now_rfc3339()],
        )?;

        tracing::info!(address = %address.short(), username, "username registered");
        Ok(username.to_string())
    }
}
