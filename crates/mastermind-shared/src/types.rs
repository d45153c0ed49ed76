//! Canonical domain records exchanged with the backend.
//!
//! The backend may spell a field `ownerAddress` or `owner_address`, send ids
//! as numbers or strings and numeric columns as strings. All of that is
//! absorbed here by the `Raw*` adapters; the public structs only ever carry
//! the canonical camelCase shape.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::address::{normalize, WalletAddress};
use crate::amount::is_free;

// ---------------------------------------------------------------------------
// Group
// ---------------------------------------------------------------------------

/// A paid discussion group ("Mastermind").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawGroup")]
pub struct Group {
    /// Backend-assigned id.
    pub id: String,
    pub name: String,
    pub owner_address: WalletAddress,
    pub owner_username: Option<String>,
    /// Current join price in SOL. Owner-mutable.
    pub join_price: f64,
    /// Destination of the owner leg of join fees.
    pub payment_address: WalletAddress,
    pub description: Option<String>,
    pub background_image: Option<String>,
    pub category: String,
    pub member_count: u32,
    pub created_at: Option<DateTime<Utc>>,
}

impl Group {
    pub fn is_free(&self) -> bool {
        is_free(self.join_price)
    }

    pub fn is_owned_by(&self, address: &WalletAddress) -> bool {
        self.owner_address == *address
    }
}

// ---------------------------------------------------------------------------
// Member
// ---------------------------------------------------------------------------

/// Membership of one address in one group.
///
/// `join_price_paid` is the price in effect when the member joined, not the
/// group's current price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawMember")]
pub struct Member {
    pub group_id: String,
    pub user_address: WalletAddress,
    pub username: Option<String>,
    pub join_price_paid: f64,
    pub joined_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A group chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawMessage")]
pub struct Message {
    pub id: String,
    pub group_id: String,
    pub sender_address: WalletAddress,
    pub username: Option<String>,
    pub content: String,
    pub created_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// User profile
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default, alias = "x_handle")]
    pub x_handle: Option<String>,
    #[serde(default)]
    pub verified: Option<bool>,
}

// ---------------------------------------------------------------------------
// Tolerant adapters
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(untagged)]
enum IdValue {
    Text(String),
    Int(i64),
}

impl IdValue {
    fn into_string(self) -> String {
        match self {
            IdValue::Text(s) => s,
            IdValue::Int(n) => n.to_string(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberLike {
    Float(f64),
    Text(String),
}

impl NumberLike {
    fn to_f64(&self, field: &str) -> Result<f64, String> {
        match self {
            NumberLike::Float(v) => Ok(*v),
            NumberLike::Text(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| format!("{field}: {s:?} is not a number")),
        }
    }
}

fn parse_timestamp(raw: Option<String>) -> Option<DateTime<Utc>> {
    let raw = raw?;
    if let Ok(dt) = DateTime::parse_from_rfc3339(&raw) {
        return Some(dt.with_timezone(&Utc));
    }
    // SQL-style timestamps without a zone are taken as UTC.
    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

fn parse_address(field: &str, raw: &str) -> Result<WalletAddress, String> {
    normalize(raw).map_err(|e| format!("{field}: {e}"))
}

#[derive(Deserialize)]
struct RawGroup {
    #[serde(alias = "groupId", alias = "group_id")]
    id: IdValue,
    name: String,
    #[serde(rename = "ownerAddress", alias = "owner_address")]
    owner_address: String,
    #[serde(default, rename = "ownerUsername", alias = "owner_username")]
    owner_username: Option<String>,
    #[serde(default, rename = "joinPrice", alias = "join_price")]
    join_price: Option<NumberLike>,
    #[serde(default, rename = "paymentAddress", alias = "payment_address")]
    payment_address: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default, rename = "backgroundImage", alias = "background_image")]
    background_image: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default, rename = "memberCount", alias = "member_count")]
    member_count: Option<NumberLike>,
    #[serde(default, rename = "createdAt", alias = "created_at")]
    created_at: Option<String>,
}

impl TryFrom<RawGroup> for Group {
    type Error = String;

    fn try_from(raw: RawGroup) -> Result<Self, Self::Error> {
        let owner_address = parse_address("ownerAddress", &raw.owner_address)?;
        let payment_address = match raw.payment_address.as_deref() {
            Some(addr) if !addr.is_empty() => parse_address("paymentAddress", addr)?,
            _ => owner_address,
        };
        // A group without a price must not read as free.
        let join_price = raw
            .join_price
            .ok_or_else(|| "joinPrice is missing".to_string())?
            .to_f64("joinPrice")?;
        let member_count = match raw.member_count {
            Some(v) => v.to_f64("memberCount")?.max(0.0) as u32,
            None => 0,
        };

        Ok(Group {
            id: raw.id.into_string(),
            name: raw.name,
            owner_address,
            owner_username: raw.owner_username,
            join_price,
            payment_address,
            description: raw.description,
            background_image: raw.background_image,
            category: raw.category.unwrap_or_else(|| "General".to_string()),
            member_count,
            created_at: parse_timestamp(raw.created_at),
        })
    }
}

#[derive(Deserialize)]
struct RawMember {
    #[serde(rename = "groupId", alias = "group_id")]
    group_id: IdValue,
    #[serde(rename = "userAddress", alias = "user_address")]
    user_address: String,
    #[serde(default)]
    username: Option<String>,
    #[serde(default, rename = "joinPricePaid", alias = "join_price_paid")]
    join_price_paid: Option<NumberLike>,
    #[serde(default, rename = "joinedAt", alias = "joined_at")]
    joined_at: Option<String>,
}

impl TryFrom<RawMember> for Member {
    type Error = String;

    fn try_from(raw: RawMember) -> Result<Self, Self::Error> {
        Ok(Member {
            group_id: raw.group_id.into_string(),
            user_address: parse_address("userAddress", &raw.user_address)?,
            username: raw.username,
            join_price_paid: match raw.join_price_paid {
                Some(v) => v.to_f64("joinPricePaid")?,
                None => 0.0,
            },
            joined_at: parse_timestamp(raw.joined_at),
        })
    }
}

#[derive(Deserialize)]
struct RawMessage {
    id: IdValue,
    #[serde(rename = "groupId", alias = "group_id")]
    group_id: IdValue,
    #[serde(rename = "senderAddress", alias = "sender_address")]
    sender_address: String,
    #[serde(default)]
    username: Option<String>,
    content: String,
    #[serde(default, rename = "createdAt", alias = "created_at")]
    created_at: Option<String>,
}

impl TryFrom<RawMessage> for Message {
    type Error = String;

    fn try_from(raw: RawMessage) -> Result<Self, Self::Error> {
        Ok(Message {
            id: raw.id.into_string(),
            group_id: raw.group_id.into_string(),
            sender_address: parse_address("senderAddress", &raw.sender_address)?,
            username: raw.username,
            content: raw.content,
            created_at: parse_timestamp(raw.created_at),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const OWNER: &str = "11111111111111111111111111111112";

    #[test]
    fn group_parses_camel_case() {
        let g: Group = serde_json::from_value(json!({
            "id": "g-1",
            "name": "Founders",
            "ownerAddress": OWNER,
            "joinPrice": 2.0,
            "paymentAddress": OWNER,
            "category": "Financial",
            "memberCount": 4,
            "createdAt": "2024-05-01T10:00:00Z"
        }))
        .unwrap();
        assert_eq!(g.id, "g-1");
        assert_eq!(g.join_price, 2.0);
        assert_eq!(g.member_count, 4);
        assert!(g.created_at.is_some());
    }

    #[test]
    fn group_parses_snake_case_and_loose_types() {
        let g: Group = serde_json::from_value(json!({
            "id": 42,
            "name": "Runners",
            "owner_address": OWNER,
            "join_price": "0.50",
            "background_image": "https://cdn.example/img.png",
            "category": "Health",
            "member_count": "7",
            "created_at": "2024-05-01 10:00:00.123"
        }))
        .unwrap();
        assert_eq!(g.id, "42");
        assert_eq!(g.join_price, 0.5);
        assert_eq!(g.member_count, 7);
        // Missing payment address falls back to the owner.
        assert_eq!(g.payment_address, g.owner_address);
        assert_eq!(g.background_image.as_deref(), Some("https://cdn.example/img.png"));
        assert!(g.created_at.is_some());
    }

    #[test]
    fn group_serializes_camel_case_only() {
        let g: Group = serde_json::from_value(json!({
            "id": "1", "name": "x", "owner_address": OWNER, "join_price": 0, "category": "Health"
        }))
        .unwrap();
        let out = serde_json::to_value(&g).unwrap();
        assert!(out.get("ownerAddress").is_some());
        assert!(out.get("owner_address").is_none());
        assert!(g.is_free());

        // And the canonical form reads back.
        let again: Group = serde_json::from_value(out).unwrap();
        assert_eq!(again, g);
    }

    #[test]
    fn group_without_price_is_rejected_not_free() {
        let res: Result<Group, _> = serde_json::from_value(json!({
            "id": "1", "name": "x", "ownerAddress": OWNER, "category": "Health"
        }));
        let err = res.unwrap_err().to_string();
        assert!(err.contains("joinPrice"), "{err}");
    }

    #[test]
    fn group_rejects_bad_owner() {
        let res: Result<Group, _> = serde_json::from_value(json!({
            "id": "1", "name": "x", "ownerAddress": "nope"
        }));
        assert!(res.is_err());
    }

    #[test]
    fn member_and_message_accept_both_spellings() {
        let m: Member = serde_json::from_value(json!({
            "group_id": 3, "user_address": OWNER, "join_price_paid": "1.5"
        }))
        .unwrap();
        assert_eq!(m.group_id, "3");
        assert_eq!(m.join_price_paid, 1.5);

        let msg: Message = serde_json::from_value(json!({
            "id": 9, "groupId": "3", "senderAddress": OWNER, "content": "hi"
        }))
        .unwrap();
        assert_eq!(msg.id, "9");
        assert_eq!(msg.content, "hi");
    }

    #[test]
    fn profile_accepts_snake_handle() {
        let p: UserProfile =
            serde_json::from_value(json!({ "username": "ana", "x_handle": "ana_x" })).unwrap();
        assert_eq!(p.x_handle.as_deref(), Some("ana_x"));
        assert_eq!(p.verified, None);
    }
}
