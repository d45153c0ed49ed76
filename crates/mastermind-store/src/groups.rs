//! CRUD operations for groups.

use rusqlite::params;
use uuid::Uuid;

use mastermind_shared::types::Group;

use crate::database::{not_found, Database};
use crate::error::{Result, StoreError};
use crate::models::{
    address_at, from_lamports_column, now_rfc3339, timestamp_at, to_lamports_column, NewGroup, PaymentRecord,
};
use crate::payments::consume_signature;

const GROUP_SELECT: &str = "SELECT g.id, g.name, g.owner_address, u.username, g.join_price_lamports,
            g.payment_address, g.description, g.background_image, g.category, g.created_at,
            (SELECT COUNT(*) FROM members m WHERE m.group_id = g.id)
     FROM groups g
     LEFT JOIN users u ON u.address = g.owner_address";

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Insert a group paid for by `payment`, with its owner as first member.
    ///
    /// The signature, the group and the owner's membership are written in
    /// one transaction.
    pub fn create_group(&mut self, group: &NewGroup, payment: &PaymentRecord) -> Result<Group> {
        let id = Uuid::new_v4().to_string();
        let price = to_lamports_column(group.join_price)?;
        let now = now_rfc3339();

        let tx = self.conn_mut().transaction()?;
        consume_signature(&tx, payment, &id)?;
        tx.execute(
            "INSERT INTO groups (id, name, owner_address, join_price_lamports, payment_address,
                                 description, background_image, category,
                                 create_payment_signature, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                id,
                group.name,
                group.owner_address.to_base58(),
                price,
                group.payment_address.to_base58(),
                group.description,
                group.background_image,
                group.category,
                payment.signature.as_str(),
                now,
            ],
        )?;
        tx.execute(
            "INSERT INTO members (group_id, user_address, join_price_paid_lamports, joined_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![id, group.owner_address.to_base58(), price, now],
        )?;
        tx.commit()?;

        tracing::info!(group_id = %id, owner = %group.owner_address.short(), "group created");
        self.get_group(&id)
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    pub fn get_group(&self, id: &str) -> Result<Group> {
        self.conn()
            .query_row(&format!("{GROUP_SELECT} WHERE g.id = ?1"), params![id], row_to_group)
            .map_err(not_found)
    }

    /// List groups, newest first, optionally restricted to one category.
    pub fn list_groups(&self, category: Option<&str>) -> Result<Vec<Group>> {
        let mut stmt = self.conn().prepare(&format!(
            "{GROUP_SELECT}
             WHERE (?1 IS NULL OR g.category = ?1)
             ORDER BY g.created_at DESC"
        ))?;

        let rows = stmt.query_map(params![category], row_to_group)?;

        let mut groups = Vec::new();
        for row in rows {
            groups.push(row?);
        }
        Ok(groups)
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    pub fn update_background_image(&self, id: &str, image: &str) -> Result<Group> {
        let affected = self.conn().execute(
            "UPDATE groups SET background_image = ?2 WHERE id = ?1",
            params![id, image],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        self.get_group(id)
    }

    /// Change the join price. Member rows keep the price they paid.
    pub fn update_join_price(&self, id: &str, join_price: f64) -> Result<Group> {
        let affected = self.conn().execute(
            "UPDATE groups SET join_price_lamports = ?2 WHERE id = ?1",
            params![id, to_lamports_column(join_price)?],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        self.get_group(id)
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Delete a group with its members and messages. Returns `true` if a
    /// row was deleted.
    pub fn delete_group(&self, id: &str) -> Result<bool> {
        let affected = self.conn().execute("DELETE FROM groups WHERE id = ?1", params![id])?;
        Ok(affected > 0)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn row_to_group(row: &rusqlite::Row<'_>) -> rusqlite::Result<Group> {
    let member_count: i64 = row.get(10)?;

    Ok(Group {
        id: row.get(0)?,
        name: row.get(1)?,
        owner_address: address_at(row, 2)?,
        owner_username: row.get(3)?,
        join_price: from_lamports_column(row.get(4)?),
        payment_address: address_at(row, 5)?,
        description: row.get(6)?,
        background_image: row.get(7)?,
        category: row.get(8)?,
        created_at: Some(timestamp_at(row, 9)?),
        member_count: u32::try_from(member_count).unwrap_or(u32::MAX),
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::PaymentPurpose;
    use mastermind_shared::signature::to_canonical;
    use mastermind_shared::WalletAddress;

    pub(crate) fn addr(last: u8) -> WalletAddress {
        let mut bytes = [0u8; 32];
        bytes[0] = 0x55;
        bytes[31] = last;
        WalletAddress::from_bytes(bytes)
    }

    pub(crate) fn payment(seed: u8, payer: WalletAddress, purpose: PaymentPurpose) -> PaymentRecord {
        PaymentRecord {
            signature: to_canonical(&bs58_sig(seed)),
            payer,
            purpose,
        }
    }

    fn bs58_sig(seed: u8) -> String {
        // Distinct, well-formed 64-byte signatures per seed.
        let mut bytes = [seed; 64];
        bytes[0] = 0xEE;
        mastermind_shared::ownership::encode_proof(&bytes)
    }

    pub(crate) fn new_group(owner: WalletAddress, price: f64, category: &str) -> NewGroup {
        NewGroup {
            name: format!("{category} circle"),
            owner_address: owner,
            join_price: price,
            payment_address: owner,
            description: Some("weekly accountability".into()),
            background_image: None,
            category: category.into(),
        }
    }

    pub(crate) fn seeded(db: &mut Database, seed: u8, price: f64, category: &str) -> Group {
        let owner = addr(seed);
        db.create_group(
            &new_group(owner, price, category),
            &payment(seed, owner, PaymentPurpose::CreateGroup),
        )
        .unwrap()
    }

    #[test]
    fn create_inserts_owner_as_member() {
        let mut db = Database::open_in_memory().unwrap();
        let group = seeded(&mut db, 1, 2.0, "Health");

        assert_eq!(group.join_price, 2.0);
        assert_eq!(group.member_count, 1);
        assert_eq!(group.category, "Health");
        assert!(group.created_at.is_some());

        let owner = db.get_member(&group.id, &addr(1)).unwrap().unwrap();
        assert_eq!(owner.join_price_paid, 2.0);
    }

    #[test]
    fn create_signature_cannot_be_reused() {
        let mut db = Database::open_in_memory().unwrap();
        seeded(&mut db, 1, 0.0, "Health");

        let err = db
            .create_group(
                &new_group(addr(1), 0.0, "Health"),
                &payment(1, addr(1), PaymentPurpose::CreateGroup),
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::SignatureReused(_)));
        assert_eq!(db.list_groups(None).unwrap().len(), 1);
    }

    #[test]
    fn list_filters_by_category() {
        let mut db = Database::open_in_memory().unwrap();
        seeded(&mut db, 1, 0.0, "Health");
        seeded(&mut db, 2, 1.0, "Financial");

        assert_eq!(db.list_groups(None).unwrap().len(), 2);
        let health = db.list_groups(Some("Health")).unwrap();
        assert_eq!(health.len(), 1);
        assert_eq!(health[0].category, "Health");
        assert!(db.list_groups(Some("Spiritual")).unwrap().is_empty());
    }

    #[test]
    fn price_update_keeps_member_price() {
        let mut db = Database::open_in_memory().unwrap();
        let group = seeded(&mut db, 1, 1.0, "Health");
        db.record_join(&group.id, &addr(9), 1.0, Some(&payment(9, addr(9), PaymentPurpose::JoinGroup)))
            .unwrap();

        let updated = db.update_join_price(&group.id, 2.0).unwrap();
        assert_eq!(updated.join_price, 2.0);
        let member = db.get_member(&group.id, &addr(9)).unwrap().unwrap();
        assert_eq!(member.join_price_paid, 1.0);
    }

    #[test]
    fn background_image_update_and_missing_group() {
        let mut db = Database::open_in_memory().unwrap();
        let group = seeded(&mut db, 1, 0.0, "Health");

        let updated = db.update_background_image(&group.id, "https://cdn.example/bg.png").unwrap();
        assert_eq!(updated.background_image.as_deref(), Some("https://cdn.example/bg.png"));
        assert!(matches!(
            db.update_background_image("missing", "x"),
            Err(StoreError::NotFound)
        ));
        assert!(matches!(db.get_group("missing"), Err(StoreError::NotFound)));
    }

    #[test]
    fn delete_cascades_to_members_and_messages() {
        let mut db = Database::open_in_memory().unwrap();
        let group = seeded(&mut db, 1, 0.0, "Health");
        db.insert_message(&group.id, &addr(1), None, "hello").unwrap();

        assert!(db.delete_group(&group.id).unwrap());
        assert!(!db.delete_group(&group.id).unwrap());
        assert!(db.list_members(&group.id).unwrap().is_empty());
        assert!(db.list_messages(&group.id, 50).unwrap().is_empty());
        // The spent signature outlives the group.
        assert!(db
            .is_signature_used(&payment(1, addr(1), PaymentPurpose::CreateGroup).signature)
            .unwrap());
    }
}
