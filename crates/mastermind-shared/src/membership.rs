//! Membership state machine.
//!
//! Per `(group, address)` pair: `NonMember -> Member(paid) -> NonMember`.
//! Leaving is a hard delete, so a returning member is priced exactly like a
//! first-time joiner: whatever the group costs now. Members are never
//! re-priced while they stay.

use crate::address::WalletAddress;
use crate::amount::{is_free, prices_match};
use crate::error::MembershipError;
use crate::types::{Group, Member};

/// Shown whenever a member leaves.
pub const LEAVE_WARNING: &str = "You have left the group. If it is or becomes a paid group, \
rejoining will require paying the full current join price.";

/// True when there is no membership row standing in the way, or the member
/// joined for free and the group is still free.
pub fn can_join_free(existing: Option<&Member>, current_join_price: f64) -> bool {
    match existing {
        None => true,
        Some(member) => is_free(member.join_price_paid) && is_free(current_join_price),
    }
}

/// True when a membership row exists at a price other than the current one.
/// The old row must go before a new paid join is recorded; no credit is
/// carried over.
pub fn requires_rejoin_payment(existing: Option<&Member>, current_join_price: f64) -> bool {
    match existing {
        None => false,
        Some(member) => !prices_match(member.join_price_paid, current_join_price),
    }
}

/// What a join request for `group` has to satisfy.
#[derive(Debug, Clone, PartialEq)]
pub enum JoinPlan {
    /// Already a member at the current price; nothing to record.
    AlreadyMember,
    /// Free group: ownership of the address is enough.
    Free,
    /// First paid join.
    Paid { price: f64 },
    /// Existing row at a stale price: delete it, then record a full-price join.
    Repay { price: f64, previous_paid: f64 },
}

impl JoinPlan {
    pub fn requires_payment(&self) -> bool {
        matches!(self, JoinPlan::Paid { .. } | JoinPlan::Repay { .. })
    }

    /// Price to record as `join_price_paid` if the join goes through.
    pub fn recorded_price(&self) -> f64 {
        match self {
            JoinPlan::Paid { price } | JoinPlan::Repay { price, .. } => *price,
            JoinPlan::Free | JoinPlan::AlreadyMember => 0.0,
        }
    }
}

pub fn plan_join(existing: Option<&Member>, group: &Group) -> JoinPlan {
    let price = group.join_price;

    if let Some(member) = existing {
        if !requires_rejoin_payment(existing, price) {
            return JoinPlan::AlreadyMember;
        }
        if is_free(price) {
            // Price dropped to zero since they paid; they already hold a row
            // that grants access, so this is still a no-op join.
            return JoinPlan::AlreadyMember;
        }
        return JoinPlan::Repay {
            price,
            previous_paid: member.join_price_paid,
        };
    }

    if is_free(price) {
        JoinPlan::Free
    } else {
        JoinPlan::Paid { price }
    }
}

/// Only the owner may change a group's join price. Existing members keep
/// their recorded `join_price_paid`.
pub fn authorize_price_update(group: &Group, requester: &WalletAddress) -> Result<(), MembershipError> {
    if group.is_owned_by(requester) {
        Ok(())
    } else {
        Err(MembershipError::NotOwner)
    }
}

/// Owners hold their group; they delete it rather than leave it.
pub fn authorize_leave(
    group: &Group,
    existing: Option<&Member>,
    requester: &WalletAddress,
) -> Result<(), MembershipError> {
    if group.is_owned_by(requester) {
        return Err(MembershipError::OwnerCannotLeave);
    }
    if existing.is_none() {
        return Err(MembershipError::NotMember);
    }
    Ok(())
}
