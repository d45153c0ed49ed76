//! Group membership rows.
//!
//! Leaving hard-deletes the row. A later join is recorded from scratch at
//! whatever price is paid then.

use rusqlite::{params, OptionalExtension};

use mastermind_shared::types::Member;
use mastermind_shared::WalletAddress;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{address_at, from_lamports_column, now_rfc3339, timestamp_at, to_lamports_column, PaymentRecord};
use crate::payments::consume_signature;

const MEMBER_SELECT: &str = "SELECT m.group_id, m.user_address, u.username, m.join_price_paid_lamports, m.joined_at
     FROM members m
     LEFT JOIN users u ON u.address = m.user_address";

impl Database {
    pub fn get_member(&self, group_id: &str, address: &WalletAddress) -> Result<Option<Member>> {
        let member = self
            .conn()
            .query_row(
                &format!("{MEMBER_SELECT} WHERE m.group_id = ?1 AND m.user_address = ?2"),
                params![group_id, address.to_base58()],
                row_to_member,
            )
            .optional()?;
        Ok(member)
    }

    pub fn is_member(&self, group_id: &str, address: &WalletAddress) -> Result<bool> {
        Ok(self.get_member(group_id, address)?.is_some())
    }

    /// Members of a group in join order.
    pub fn list_members(&self, group_id: &str) -> Result<Vec<Member>> {
        let mut stmt = self
            .conn()
            .prepare(&format!("{MEMBER_SELECT} WHERE m.group_id = ?1 ORDER BY m.joined_at ASC"))?;

        let rows = stmt.query_map(params![group_id], row_to_member)?;

        let mut members = Vec::new();
        for row in rows {
            members.push(row?);
        }
        Ok(members)
    }

    /// Record a join at `price_paid`, consuming `payment` if given.
    ///
    /// Any existing row for the pair is deleted first; the delete, the
    /// insert and the signature consumption commit together or not at all.
    pub fn record_join(
        &mut self,
        group_id: &str,
        address: &WalletAddress,
        price_paid: f64,
        payment: Option<&PaymentRecord>,
    ) -> Result<Member> {
        let price = to_lamports_column(price_paid)?;

        let tx = self.conn_mut().transaction()?;
        let exists: Option<i64> = tx
            .query_row("SELECT 1 FROM groups WHERE id = ?1", params![group_id], |row| row.get(0))
            .optional()?;
        if exists.is_none() {
            return Err(StoreError::NotFound);
        }

        if let Some(payment) = payment {
            consume_signature(&tx, payment, group_id)?;
        }
        let replaced = tx.execute(
            "DELETE FROM members WHERE group_id = ?1 AND user_address = ?2",
            params![group_id, address.to_base58()],
        )?;
        tx.execute(
            "INSERT INTO members (group_id, user_address, join_price_paid_lamports, joined_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![group_id, address.to_base58(), price, now_rfc3339()],
        )?;
        tx.commit()?;

        tracing::info!(
            group_id,
            member = %address.short(),
            price_paid,
            replaced = replaced > 0,
            "membership recorded"
        );
        self.get_member(group_id, address)?.ok_or(StoreError::NotFound)
    }

    /// Hard-delete a membership. Returns `true` if a row was deleted.
    pub fn remove_member(&self, group_id: &str, address: &WalletAddress) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM members WHERE group_id = ?1 AND user_address = ?2",
            params![group_id, address.to_base58()],
        )?;
        Ok(affected > 0)
    }
}

fn row_to_member(row: &rusqlite::Row<'_>) -> rusqlite::Result<Member> {
    Ok(Member {
        group_id: row.get(0)?,
        user_address: address_at(row, 1)?,
        username: row.get(2)?,
        join_price_paid: from_lamports_column(row.get(3)?),
        joined_at: Some(timestamp_at(row, 4)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::groups::tests::{addr, payment, seeded};
    use crate::models::PaymentPurpose;

    #[test]
    fn free_join_then_leave_is_a_hard_delete() {
        let mut db = Database::open_in_memory().unwrap();
        let group = seeded(&mut db, 1, 0.0, "Health");

        let member = db.record_join(&group.id, &addr(7), 0.0, None).unwrap();
        assert_eq!(member.join_price_paid, 0.0);
        assert!(db.is_member(&group.id, &addr(7)).unwrap());
        assert_eq!(db.get_group(&group.id).unwrap().member_count, 2);

        assert!(db.remove_member(&group.id, &addr(7)).unwrap());
        assert!(db.get_member(&group.id, &addr(7)).unwrap().is_none());
        assert!(!db.remove_member(&group.id, &addr(7)).unwrap());
    }

    #[test]
    fn repay_replaces_the_old_row() {
        let mut db = Database::open_in_memory().unwrap();
        let group = seeded(&mut db, 1, 0.0, "Health");
        db.record_join(&group.id, &addr(7), 0.0, None).unwrap();
        db.update_join_price(&group.id, 2.0).unwrap();

        let member = db
            .record_join(&group.id, &addr(7), 2.0, Some(&payment(7, addr(7), PaymentPurpose::JoinGroup)))
            .unwrap();
        assert_eq!(member.join_price_paid, 2.0);
        assert_eq!(db.list_members(&group.id).unwrap().len(), 2);
    }

    #[test]
    fn reused_join_signature_leaves_old_row_intact() {
        let mut db = Database::open_in_memory().unwrap();
        let group = seeded(&mut db, 1, 1.0, "Health");
        let pay = payment(7, addr(7), PaymentPurpose::JoinGroup);
        db.record_join(&group.id, &addr(7), 1.0, Some(&pay)).unwrap();
        db.update_join_price(&group.id, 2.0).unwrap();

        let err = db.record_join(&group.id, &addr(7), 2.0, Some(&pay)).unwrap_err();
        assert!(matches!(err, StoreError::SignatureReused(_)));
        let member = db.get_member(&group.id, &addr(7)).unwrap().unwrap();
        assert_eq!(member.join_price_paid, 1.0);
    }

    #[test]
    fn join_unknown_group_is_not_found() {
        let mut db = Database::open_in_memory().unwrap();
        assert!(matches!(
            db.record_join("nope", &addr(7), 0.0, None),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn member_carries_registered_username() {
        let mut db = Database::open_in_memory().unwrap();
        let group = seeded(&mut db, 1, 0.0, "Health");
        db.register_username(&addr(7), "stoic_sam").unwrap();
        db.record_join(&group.id, &addr(7), 0.0, None).unwrap();

        let members = db.list_members(&group.id).unwrap();
        let sam = members.iter().find(|m| m.user_address == addr(7)).unwrap();
        assert_eq!(sam.username.as_deref(), Some("stoic_sam"));
    }
}
