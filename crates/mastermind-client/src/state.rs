//! Client state shared by the flows, the poller and the view layer.
//!
//! [`ClientState`] sits behind one `std::sync::Mutex` inside
//! [`MastermindService`](crate::flows::MastermindService). The lock is only
//! taken between awaits, never across a wallet or backend call.

use mastermind_shared::protocol::PlatformConfigResponse;
use mastermind_shared::WalletAddress;

use crate::cache::{GroupCache, MembershipCache, MessageCache};

pub struct ClientState {
    /// The connected wallet account, canonical base58.
    /// `None` until the user connects a wallet.
    pub wallet: Option<WalletAddress>,

    /// Username registered for `wallet`, if any.
    pub username: Option<String>,

    /// Fee parameters, as advertised by the backend or configured locally.
    pub platform: Option<PlatformConfigResponse>,

    pub groups: GroupCache,
    pub messages: MessageCache,
    pub memberships: MembershipCache,
}

impl ClientState {
    pub fn new() -> Self {
        Self {
            wallet: None,
            username: None,
            platform: None,
            groups: GroupCache::new(),
            messages: MessageCache::new(),
            memberships: MembershipCache::new(),
        }
    }
}

impl Default for ClientState {
    fn default() -> Self {
        Self::new()
    }
}
