//! Notifications for the view layer.
//!
//! Flows and the poller publish on a `tokio::sync::broadcast` channel; a view
//! subscribes while it is mounted. Nothing is buffered for absent listeners.

use serde::Serialize;
use tokio::sync::broadcast;

pub const EVENT_GROUPS_CHANGED: &str = "groups-changed";
pub const EVENT_MESSAGES_CHANGED: &str = "messages-changed";
pub const EVENT_MEMBERSHIP_CHANGED: &str = "membership-changed";
pub const EVENT_PAYMENT_CONFIRMED: &str = "payment-confirmed";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ClientEvent {
    GroupsChanged,
    #[serde(rename_all = "camelCase")]
    MessagesChanged { group_id: String, added: usize },
    #[serde(rename_all = "camelCase")]
    MembershipChanged { group_id: String, is_member: bool },
    #[serde(rename_all = "camelCase")]
    PaymentConfirmed { signature: String },
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::GroupsChanged => EVENT_GROUPS_CHANGED,
            ClientEvent::MessagesChanged { .. } => EVENT_MESSAGES_CHANGED,
            ClientEvent::MembershipChanged { .. } => EVENT_MEMBERSHIP_CHANGED,
            ClientEvent::PaymentConfirmed { .. } => EVENT_PAYMENT_CONFIRMED,
        }
    }
}

pub fn emit_event(tx: &broadcast::Sender<ClientEvent>, event: ClientEvent) {
    let name = event.name();
    if tx.send(event).is_err() {
        tracing::trace!(event = name, "No listeners for event");
    }
}
