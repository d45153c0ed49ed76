//! Device-local shadow of backend state.
//!
//! Background refreshes merge by id so optimistic local updates survive.
//! The one exception is the unfiltered group fetch, which is authoritative:
//! it replaces the group list and drops groups that no longer exist upstream.

use std::collections::{BTreeMap, HashMap};

use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use mastermind_shared::membership::{plan_join, JoinPlan};
use mastermind_shared::types::{Group, Member, Message};
use mastermind_shared::WalletAddress;

/// Prefix of ids given to messages not yet acknowledged by the backend.
pub const LOCAL_MESSAGE_PREFIX: &str = "local-";

// ---------------------------------------------------------------------------
// Groups
// ---------------------------------------------------------------------------

/// A backend group plus the id this device knows it by.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedGroup {
    pub local_id: Uuid,
    pub group: Group,
}

#[derive(Debug, Default)]
pub struct GroupCache {
    entries: BTreeMap<String, CachedGroup>,
}

impl GroupCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or refresh one group, keeping its local id if already known.
    pub fn upsert(&mut self, group: Group) -> Uuid {
        match self.entries.get_mut(&group.id) {
            Some(entry) => {
                entry.group = group;
                entry.local_id
            }
            None => {
                let local_id = Uuid::new_v4();
                self.entries.insert(group.id.clone(), CachedGroup { local_id, group });
                local_id
            }
        }
    }

    /// Apply the result of `GET /api/groups/public`.
    ///
    /// With a category the result only covers that category and is merged.
    /// Without one it covers everything and replaces the cache.
    pub fn apply_fetch(&mut self, category: Option<&str>, groups: Vec<Group>) {
        if category.is_none() {
            let upstream: std::collections::HashSet<&str> = groups.iter().map(|g| g.id.as_str()).collect();
            let before = self.entries.len();
            self.entries.retain(|id, _| upstream.contains(id.as_str()));
            let dropped = before - self.entries.len();
            if dropped > 0 {
                debug!(dropped, "Dropped groups no longer listed upstream");
            }
        }
        for group in groups {
            self.upsert(group);
        }
    }

    pub fn get(&self, id: &str) -> Option<&CachedGroup> {
        self.entries.get(id)
    }

    pub fn by_local_id(&self, local_id: Uuid) -> Option<&CachedGroup> {
        self.entries.values().find(|e| e.local_id == local_id)
    }

    pub fn remove(&mut self, id: &str) -> Option<CachedGroup> {
        self.entries.remove(id)
    }

    /// Groups, optionally restricted to one category, newest first.
    pub fn list(&self, category: Option<&str>) -> Vec<&CachedGroup> {
        let mut out: Vec<&CachedGroup> = self
            .entries
            .values()
            .filter(|e| category.map_or(true, |c| e.group.category == c))
            .collect();
        out.sort_by(|a, b| b.group.created_at.cmp(&a.group.created_at));
        out
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MessageCache {
    by_group: HashMap<String, Vec<Message>>,
}

impl MessageCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge fetched messages by id. Nothing is removed.
    pub fn merge(&mut self, group_id: &str, messages: Vec<Message>) -> usize {
        let thread = self.by_group.entry(group_id.to_string()).or_default();
        let mut added = 0;
        for message in messages {
            match thread.iter_mut().find(|m| m.id == message.id) {
                Some(existing) => *existing = message,
                None => {
                    thread.push(message);
                    added += 1;
                }
            }
        }
        sort_thread(thread);
        added
    }

    /// Show a message before the backend has acknowledged it.
    pub fn push_pending(
        &mut self,
        group_id: &str,
        sender: WalletAddress,
        username: Option<String>,
        content: &str,
    ) -> String {
        let id = format!("{LOCAL_MESSAGE_PREFIX}{}", Uuid::new_v4());
        let thread = self.by_group.entry(group_id.to_string()).or_default();
        thread.push(Message {
            id: id.clone(),
            group_id: group_id.to_string(),
            sender_address: sender,
            username,
            content: content.to_string(),
            created_at: Some(Utc::now()),
        });
        sort_thread(thread);
        id
    }

    /// Swap a pending message for the stored one, or drop it if sending failed.
    pub fn resolve_pending(&mut self, group_id: &str, local_id: &str, stored: Option<Message>) {
        let Some(thread) = self.by_group.get_mut(group_id) else {
            return;
        };
        thread.retain(|m| m.id != local_id);
        if let Some(message) = stored {
            if !thread.iter().any(|m| m.id == message.id) {
                thread.push(message);
            }
            sort_thread(thread);
        }
    }

    pub fn thread(&self, group_id: &str) -> &[Message] {
        self.by_group.get(group_id).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn remove_group(&mut self, group_id: &str) {
        self.by_group.remove(group_id);
    }
}

fn sort_thread(thread: &mut [Message]) {
    // Undated messages sort last.
    thread.sort_by(|a, b| (a.created_at.is_none(), a.created_at).cmp(&(b.created_at.is_none(), b.created_at)));
}

// ---------------------------------------------------------------------------
// Memberships
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MembershipCache {
    members: HashMap<(String, WalletAddress), Member>,
}

impl MembershipCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, group_id: &str, address: &WalletAddress) -> Option<&Member> {
        self.members.get(&(group_id.to_string(), *address))
    }

    pub fn is_member(&self, group_id: &str, address: &WalletAddress) -> bool {
        self.get(group_id, address).is_some()
    }

    pub fn insert(&mut self, member: Member) {
        self.members
            .insert((member.group_id.clone(), member.user_address), member);
    }

    /// Leaving is a hard delete, same as on the backend.
    pub fn remove(&mut self, group_id: &str, address: &WalletAddress) -> Option<Member> {
        self.members.remove(&(group_id.to_string(), *address))
    }

    /// Replace one group's members with the backend's authoritative list.
    pub fn replace_group(&mut self, group_id: &str, members: Vec<Member>) {
        self.remove_group(group_id);
        for member in members {
            self.insert(member);
        }
    }

    pub fn remove_group(&mut self, group_id: &str) {
        self.members.retain(|(gid, _), _| gid != group_id);
    }

    /// Local mirror of the backend's join decision.
    pub fn plan_join(&self, group: &Group, address: &WalletAddress) -> JoinPlan {
        plan_join(self.get(&group.id, address), group)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn addr(last: u8) -> WalletAddress {
        let mut bytes = [0u8; 32];
        bytes[0] = 0x11;
        bytes[31] = last;
        WalletAddress::from_bytes(bytes)
    }

    fn group(id: &str, category: &str, price: f64) -> Group {
        Group {
            id: id.into(),
            name: format!("group {id}"),
            owner_address: addr(1),
            owner_username: None,
            join_price: price,
            payment_address: addr(1),
            description: None,
            background_image: None,
            category: category.into(),
            member_count: 1,
            created_at: None,
        }
    }

    fn message(id: &str, minute: i64) -> Message {
        let base = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        Message {
            id: id.into(),
            group_id: "g".into(),
            sender_address: addr(2),
            username: None,
            content: format!("msg {id}"),
            created_at: Some(base + Duration::minutes(minute)),
        }
    }

    #[test]
    fn category_fetch_merges_and_keeps_other_categories() {
        let mut cache = GroupCache::new();
        cache.apply_fetch(None, vec![group("a", "Health", 0.0), group("b", "Financial", 1.0)]);
        let local_a = cache.get("a").unwrap().local_id;

        let mut renamed = group("a", "Health", 0.0);
        renamed.name = "Runners".into();
        cache.apply_fetch(Some("Health"), vec![renamed, group("c", "Health", 2.0)]);

        assert_eq!(cache.len(), 3);
        assert!(cache.get("b").is_some());
        assert_eq!(cache.get("a").unwrap().group.name, "Runners");
        assert_eq!(cache.get("a").unwrap().local_id, local_a);
        assert_eq!(cache.list(Some("Health")).len(), 2);
    }

    #[test]
    fn unfiltered_fetch_drops_deleted_groups() {
        let mut cache = GroupCache::new();
        cache.apply_fetch(None, vec![group("a", "Health", 0.0), group("b", "Financial", 1.0)]);
        let local_b = cache.get("b").unwrap().local_id;

        cache.apply_fetch(None, vec![group("b", "Financial", 1.5)]);

        assert_eq!(cache.len(), 1);
        assert!(cache.get("a").is_none());
        assert_eq!(cache.by_local_id(local_b).unwrap().group.join_price, 1.5);
    }

    #[test]
    fn message_merge_keeps_pending_and_orders_by_time() {
        let mut cache = MessageCache::new();
        cache.merge("g", vec![message("2", 2), message("1", 1)]);
        let pending = cache.push_pending("g", addr(3), None, "hello");

        // A poll that does not yet include the pending message.
        let added = cache.merge("g", vec![message("1", 1), message("3", 3)]);
        assert_eq!(added, 1);

        let ids: Vec<&str> = cache.thread("g").iter().map(|m| m.id.as_str()).collect();
        assert_eq!(&ids[..3], &["1", "2", "3"]);
        assert!(ids.contains(&pending.as_str()));
    }

    #[test]
    fn resolving_pending_swaps_in_stored_message() {
        let mut cache = MessageCache::new();
        let pending = cache.push_pending("g", addr(3), None, "hello");
        cache.resolve_pending("g", &pending, Some(message("9", 0)));
        let ids: Vec<&str> = cache.thread("g").iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["9"]);

        let failed = cache.push_pending("g", addr(3), None, "lost");
        cache.resolve_pending("g", &failed, None);
        assert_eq!(cache.thread("g").len(), 1);
    }

    #[test]
    fn membership_mirrors_join_rules() {
        let mut cache = MembershipCache::new();
        let g = group("g", "Health", 2.0);
        let me = addr(5);

        assert_eq!(cache.plan_join(&g, &me), JoinPlan::Paid { price: 2.0 });

        cache.insert(Member {
            group_id: "g".into(),
            user_address: me,
            username: None,
            join_price_paid: 2.0,
            joined_at: None,
        });
        assert_eq!(cache.plan_join(&g, &me), JoinPlan::AlreadyMember);

        cache.remove("g", &me);
        assert!(!cache.is_member("g", &me));
        assert_eq!(cache.plan_join(&g, &me), JoinPlan::Paid { price: 2.0 });
    }

    #[test]
    fn replace_group_is_authoritative_for_that_group_only() {
        let mut cache = MembershipCache::new();
        let m = |gid: &str, who: u8| Member {
            group_id: gid.into(),
            user_address: addr(who),
            username: None,
            join_price_paid: 0.0,
            joined_at: None,
        };
        cache.insert(m("g", 1));
        cache.insert(m("g", 2));
        cache.insert(m("h", 2));

        cache.replace_group("g", vec![m("g", 3)]);

        assert!(!cache.is_member("g", &addr(1)));
        assert!(cache.is_member("g", &addr(3)));
        assert!(cache.is_member("h", &addr(2)));
    }
}
