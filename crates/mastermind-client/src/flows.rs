//! User actions: create, join, leave, delete and owner edits.
//!
//! A paid action runs build → wallet → reconcile → record. The backend is
//! only called once the chain has confirmed the payment, and it verifies the
//! payment again on its side. If recording fails after a confirmed payment
//! the caller gets [`FlowError::RecordFailed`] with the signature, and can
//! retry the record alone through [`MastermindService::record_create`] or
//! [`MastermindService::record_join`].

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use mastermind_pay::{
    build_create_fee_transfer, build_join_fee_transfer, classify, ChainClient, Reconciler, RpcChainClient,
    UnsignedTransaction, WalletSessionClient, WalletTransport,
};
use mastermind_shared::amount::{prices_match, sol_to_lamports};
use mastermind_shared::membership::{authorize_leave, authorize_price_update, JoinPlan, LEAVE_WARNING};
use mastermind_shared::ownership::{delete_proof_message, encode_proof};
use mastermind_shared::protocol::{
    CreateGroupRequest, DeleteGroupRequest, JoinGroupRequest, PlatformConfigResponse, UpdateJoinPriceRequest,
};
use mastermind_shared::types::{Group, Member, Message};
use mastermind_shared::{MembershipError, TransactionSignature, WalletAddress};

use crate::backend::GroupBackendClient;
use crate::cache::CachedGroup;
use crate::config::ClientConfig;
use crate::error::{BackendError, FlowError, Result};
use crate::events::{emit_event, ClientEvent};
use crate::inflight::{spawn_message_poller, InFlight, PollerHandle};
use crate::state::ClientState;

/// What the user fills in to create a group.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupDraft {
    pub name: String,
    pub description: Option<String>,
    pub category: String,
    pub join_price: f64,
    /// Where join fees go. Defaults to the owner.
    pub payment_address: Option<WalletAddress>,
    pub background_image: Option<String>,
}

/// Result of a successful join.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinOutcome {
    pub plan: JoinPlan,
    pub signature: Option<TransactionSignature>,
    pub message: Option<String>,
}

pub struct MastermindService {
    config: ClientConfig,
    backend: GroupBackendClient,
    wallet: WalletSessionClient,
    chain: Arc<dyn ChainClient>,
    reconciler: Reconciler,
    state: Mutex<ClientState>,
    inflight: InFlight,
    events: broadcast::Sender<ClientEvent>,
}

impl MastermindService {
    pub fn new(
        config: ClientConfig,
        backend: GroupBackendClient,
        wallet: WalletSessionClient,
        chain: Arc<dyn ChainClient>,
    ) -> Self {
        let reconciler = Reconciler::new(chain.clone(), config.confirm_recheck_delay);
        let (events, _) = broadcast::channel(64);
        Self {
            config,
            backend,
            wallet,
            chain,
            reconciler,
            state: Mutex::new(ClientState::new()),
            inflight: InFlight::new(),
            events,
        }
    }

    /// Wire up the production backend and RPC clients.
    pub fn from_config(config: ClientConfig, transport: Arc<dyn WalletTransport>) -> Result<Self> {
        let backend = GroupBackendClient::new(config.api_base_url.clone(), config.http_timeout)?;
        let chain = RpcChainClient::new(config.solana_rpc_url.clone(), config.http_timeout)?;
        let wallet = WalletSessionClient::new(transport, config.cluster.clone());
        info!(api = %config.api_base_url, cluster = %config.cluster, "Masterminds client ready");
        Ok(Self::new(config, backend, wallet, Arc::new(chain)))
    }

    pub fn backend(&self) -> &GroupBackendClient {
        &self.backend
    }

    pub fn in_flight(&self) -> &InFlight {
        &self.inflight
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    fn state(&self) -> MutexGuard<'_, ClientState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Read or update the client state. Do not call across an await.
    pub fn with_state<R>(&self, f: impl FnOnce(&mut ClientState) -> R) -> R {
        f(&mut self.state())
    }

    // -----------------------------------------------------------------------
    // Wallet & platform
    // -----------------------------------------------------------------------

    pub async fn connect_wallet(&self) -> Result<WalletAddress> {
        let address = self.wallet.connect().await?;
        let profile = self.backend.get_user_profile(&address).await;
        let mut state = self.state();
        state.wallet = Some(address);
        state.username = profile.and_then(|p| p.username);
        Ok(address)
    }

    pub fn wallet_address(&self) -> Result<WalletAddress> {
        self.state().wallet.ok_or(FlowError::NotConnected)
    }

    /// Fee parameters as the backend advertises them. Only an advertised
    /// answer is cached. A backend without `/api/config` falls back to local
    /// configuration for this call; any other failure refuses, so nothing is
    /// paid on guessed amounts. A configured platform address always wins.
    pub async fn platform(&self) -> Result<PlatformConfigResponse> {
        if let Some(platform) = self.state().platform.clone() {
            return Ok(platform);
        }

        match self.backend.try_platform_config().await {
            Ok(mut advertised) => {
                if let Some(addr) = self.config.platform_address {
                    advertised.platform_address = addr;
                }
                self.state().platform = Some(advertised.clone());
                Ok(advertised)
            }
            Err(BackendError::Rejected { status: 404, .. }) => {
                warn!("Backend does not advertise fees, using local configuration");
                Ok(PlatformConfigResponse {
                    platform_address: self
                        .config
                        .platform_address
                        .ok_or_else(|| FlowError::InvalidInput("platform address is not configured".into()))?,
                    create_price: self.config.create_price,
                    platform_fee_fraction: self.config.platform_fee_fraction,
                })
            }
            Err(e) => {
                warn!(error = %e, "Fee parameters unavailable");
                Err(e.into())
            }
        }
    }

    // -----------------------------------------------------------------------
    // Refreshes
    // -----------------------------------------------------------------------

    /// Refresh the group list. A category fetch merges; a full fetch replaces.
    /// An unreachable backend leaves the cache untouched.
    pub async fn refresh_groups(&self, category: Option<&str>) -> usize {
        match self.backend.try_list_groups(category).await {
            Ok(groups) => {
                let count = groups.len();
                self.state().groups.apply_fetch(category, groups);
                emit_event(&self.events, ClientEvent::GroupsChanged);
                count
            }
            Err(e) => {
                warn!(category = ?category, error = %e, "Group refresh failed, keeping cache");
                0
            }
        }
    }

    pub fn groups(&self, category: Option<&str>) -> Vec<CachedGroup> {
        self.state().groups.list(category).into_iter().cloned().collect()
    }

    /// Replace the cached members of `group_id` with the backend's list and
    /// report whether the connected wallet is among them.
    pub async fn refresh_membership(&self, group_id: &str) -> bool {
        let me = self.state().wallet;
        match self.backend.try_list_members(group_id).await {
            Ok(members) => {
                let mut state = self.state();
                state.memberships.replace_group(group_id, members);
                me.is_some_and(|me| state.memberships.is_member(group_id, &me))
            }
            Err(e) => {
                warn!(group_id, error = %e, "Membership refresh failed, keeping cache");
                let state = self.state();
                me.is_some_and(|me| state.memberships.is_member(group_id, &me))
            }
        }
    }

    /// Merge the latest messages of `group_id`. Returns how many were new.
    pub async fn refresh_messages(&self, group_id: &str) -> usize {
        let messages = self.backend.get_messages(group_id).await;
        if messages.is_empty() {
            return 0;
        }
        let added = self.state().messages.merge(group_id, messages);
        if added > 0 {
            emit_event(
                &self.events,
                ClientEvent::MessagesChanged {
                    group_id: group_id.to_string(),
                    added,
                },
            );
        }
        added
    }

    pub fn messages(&self, group_id: &str) -> Vec<Message> {
        self.state().messages.thread(group_id).to_vec()
    }

    /// Poll `group_id` while the returned handle is alive.
    pub fn watch_messages(self: &Arc<Self>, group_id: &str) -> PollerHandle {
        spawn_message_poller(self.clone(), group_id.to_string(), self.config.message_poll_interval)
    }

    async fn group(&self, group_id: &str) -> Result<Group> {
        if let Some(cached) = self.state().groups.get(group_id) {
            return Ok(cached.group.clone());
        }
        let group = self
            .backend
            .get_group(group_id)
            .await
            .ok_or_else(|| FlowError::GroupNotFound(group_id.to_string()))?;
        self.state().groups.upsert(group.clone());
        Ok(group)
    }

    /// The backend's current copy of `group_id`, for anything about to be
    /// paid for. Fails if the backend cannot be asked.
    async fn fresh_group(&self, group_id: &str) -> Result<Group> {
        match self.backend.try_get_group(group_id).await {
            Ok(group) => {
                let cached_price = {
                    let mut state = self.state();
                    let cached = state.groups.get(group_id).map(|c| c.group.join_price);
                    state.groups.upsert(group.clone());
                    cached
                };
                if cached_price.is_some_and(|p| !prices_match(p, group.join_price)) {
                    info!(group_id, from = ?cached_price, to = group.join_price, "Join price changed upstream");
                    emit_event(&self.events, ClientEvent::GroupsChanged);
                }
                Ok(group)
            }
            Err(BackendError::Rejected { status: 404, .. }) => {
                self.state().groups.remove(group_id);
                Err(FlowError::GroupNotFound(group_id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    // -----------------------------------------------------------------------
    // Payments
    // -----------------------------------------------------------------------

    /// Hand `tx` to the wallet and return the signature the chain confirmed.
    async fn pay(&self, tx: &UnsignedTransaction, payer: &WalletAddress) -> Result<TransactionSignature> {
        let attempt = self.wallet.authorize_and_send(tx, Some(payer)).await?;

        match self.reconciler.reconcile(&attempt).await {
            Ok(confirmed) => {
                emit_event(
                    &self.events,
                    ClientEvent::PaymentConfirmed {
                        signature: confirmed.signature.to_string(),
                    },
                );
                Ok(confirmed.signature)
            }
            Err(e) => {
                let failure = classify(&e, Some(&attempt));
                warn!(failure = ?failure, threw = attempt.threw(), "Payment not confirmed");
                Err(FlowError::Payment(failure))
            }
        }
    }

    // -----------------------------------------------------------------------
    // Create
    // -----------------------------------------------------------------------

    /// Pay the creation fee and create the group.
    pub async fn create_group(&self, draft: &GroupDraft) -> Result<Group> {
        let owner = self.wallet_address()?;
        validate_draft(draft)?;
        let _guard = self.inflight.try_begin("create-group")?;

        let platform = self.platform().await?;
        let blockhash = self.chain.latest_blockhash().await?;
        let tx = build_create_fee_transfer(&owner, &platform.platform_address, platform.create_price, blockhash)?;

        info!(name = %draft.name, price = platform.create_price, "Paying creation fee");
        let signature = self.pay(&tx, &owner).await?;

        self.record_create(draft, &signature).await
    }

    /// Record a group whose creation fee is already confirmed as `signature`.
    pub async fn record_create(&self, draft: &GroupDraft, signature: &TransactionSignature) -> Result<Group> {
        let owner = self.wallet_address()?;
        let platform = self.platform().await?;
        let username = self.state().username.clone();

        let request = CreateGroupRequest {
            name: draft.name.trim().to_string(),
            owner_address: owner,
            owner_username: username,
            join_price: draft.join_price,
            payment_address: draft.payment_address.unwrap_or(owner),
            description: draft.description.clone(),
            create_payment_signature: signature.to_string(),
            create_price: platform.create_price,
            background_image: draft.background_image.clone(),
            category: draft.category.clone(),
        };

        let group = self
            .backend
            .create_group(&request)
            .await
            .map_err(|source| record_failed(signature, source))?;

        {
            let mut state = self.state();
            state.groups.upsert(group.clone());
            state.memberships.insert(Member {
                group_id: group.id.clone(),
                user_address: owner,
                username: request.owner_username.clone(),
                join_price_paid: group.join_price,
                joined_at: Some(Utc::now()),
            });
        }
        emit_event(&self.events, ClientEvent::GroupsChanged);
        info!(group_id = %group.id, "Group created");
        Ok(group)
    }

    // -----------------------------------------------------------------------
    // Join / leave
    // -----------------------------------------------------------------------

    pub async fn join_group(&self, group_id: &str) -> Result<JoinOutcome> {
        let me = self.wallet_address()?;
        let _guard = self.inflight.try_begin(format!("join:{group_id}"))?;

        let group = self.fresh_group(group_id).await?;
        self.refresh_membership(group_id).await;
        let plan = self.state().memberships.plan_join(&group, &me);
        debug!(group_id, plan = ?plan, "Join planned");

        match plan {
            JoinPlan::AlreadyMember => Ok(JoinOutcome {
                plan,
                signature: None,
                message: None,
            }),
            JoinPlan::Free => {
                self.wallet.verify_owner(&me).await?;
                let message = self.submit_join(&group, &me, "").await.map_err(FlowError::Backend)?;
                self.joined(&group, me, plan.recorded_price());
                Ok(JoinOutcome {
                    plan,
                    signature: None,
                    message,
                })
            }
            JoinPlan::Paid { price } | JoinPlan::Repay { price, .. } => {
                let platform = self.platform().await?;
                let blockhash = self.chain.latest_blockhash().await?;
                let tx = build_join_fee_transfer(
                    &me,
                    &group.payment_address,
                    &platform.platform_address,
                    price,
                    platform.platform_fee_fraction,
                    blockhash,
                )?;

                info!(group_id, price, "Paying join fee");
                let signature = self.pay(&tx, &me).await?;
                let message = self.record_join_inner(&group, &me, &signature, price).await?;
                Ok(JoinOutcome {
                    plan,
                    signature: Some(signature),
                    message,
                })
            }
        }
    }

    /// Record a join whose payment is already confirmed as `signature`.
    pub async fn record_join(&self, group_id: &str, signature: &TransactionSignature) -> Result<Option<String>> {
        let me = self.wallet_address()?;
        let group = self.fresh_group(group_id).await?;
        self.record_join_inner(&group, &me, signature, group.join_price).await
    }

    async fn record_join_inner(
        &self,
        group: &Group,
        me: &WalletAddress,
        signature: &TransactionSignature,
        price: f64,
    ) -> Result<Option<String>> {
        let message = self
            .submit_join(group, me, signature.as_str())
            .await
            .map_err(|source| record_failed(signature, source))?;
        self.joined(group, *me, price);
        Ok(message)
    }

    async fn submit_join(
        &self,
        group: &Group,
        me: &WalletAddress,
        signature: &str,
    ) -> std::result::Result<Option<String>, BackendError> {
        let request = JoinGroupRequest {
            user_address: *me,
            username: self.state().username.clone(),
            payment_signature: signature.to_string(),
        };
        let resp = self.backend.join_group(&group.id, &request).await?;
        Ok(resp.message)
    }

    fn joined(&self, group: &Group, me: WalletAddress, price_paid: f64) {
        {
            let mut state = self.state();
            let username = state.username.clone();
            state.memberships.insert(Member {
                group_id: group.id.clone(),
                user_address: me,
                username,
                join_price_paid: price_paid,
                joined_at: Some(Utc::now()),
            });
            let mut updated = group.clone();
            updated.member_count = updated.member_count.saturating_add(1);
            state.groups.upsert(updated);
        }
        emit_event(
            &self.events,
            ClientEvent::MembershipChanged {
                group_id: group.id.clone(),
                is_member: true,
            },
        );
        info!(group_id = %group.id, price_paid, "Joined group");
    }

    /// Leave `group_id`. The returned text warns that rejoining a paid group
    /// costs the full current price.
    pub async fn leave_group(&self, group_id: &str) -> Result<String> {
        let me = self.wallet_address()?;
        let _guard = self.inflight.try_begin(format!("leave:{group_id}"))?;

        let group = self.group(group_id).await?;
        self.refresh_membership(group_id).await;
        {
            let state = self.state();
            authorize_leave(&group, state.memberships.get(group_id, &me), &me)?;
        }

        let resp = self.backend.leave_group(group_id, &me).await?;

        {
            let mut state = self.state();
            state.memberships.remove(group_id, &me);
            let mut updated = group;
            updated.member_count = updated.member_count.saturating_sub(1);
            state.groups.upsert(updated);
        }
        emit_event(
            &self.events,
            ClientEvent::MembershipChanged {
                group_id: group_id.to_string(),
                is_member: false,
            },
        );
        info!(group_id, "Left group");
        Ok(resp.message.unwrap_or_else(|| LEAVE_WARNING.to_string()))
    }

    // -----------------------------------------------------------------------
    // Owner actions
    // -----------------------------------------------------------------------

    /// Delete a group after re-verifying the owner through the wallet.
    pub async fn delete_group(&self, group_id: &str) -> Result<()> {
        let me = self.wallet_address()?;
        let group = self.group(group_id).await?;
        if !group.is_owned_by(&me) {
            return Err(MembershipError::NotOwner.into());
        }
        let _guard = self.inflight.try_begin(format!("delete:{group_id}"))?;

        self.wallet.verify_owner(&group.owner_address).await?;

        // Wallets that cannot sign messages fall back to the bare address.
        let verification_signature = match self.wallet.sign_message(&me, &delete_proof_message(group_id)).await {
            Some(sig) => encode_proof(&sig),
            None => me.to_base58(),
        };

        let resp = self
            .backend
            .delete_group(
                group_id,
                &DeleteGroupRequest {
                    owner_address: me,
                    verification_signature,
                },
            )
            .await?;
        if !resp.success {
            return Err(BackendError::Rejected {
                status: 200,
                message: resp.message.unwrap_or_else(|| "delete was not accepted".into()),
            }
            .into());
        }

        {
            let mut state = self.state();
            state.groups.remove(group_id);
            state.memberships.remove_group(group_id);
            state.messages.remove_group(group_id);
        }
        emit_event(&self.events, ClientEvent::GroupsChanged);
        info!(group_id, "Group deleted");
        Ok(())
    }

    /// Change the join price. Existing members keep what they paid.
    pub async fn update_join_price(&self, group_id: &str, join_price: f64) -> Result<Group> {
        let me = self.wallet_address()?;
        let group = self.group(group_id).await?;
        authorize_price_update(&group, &me)?;
        sol_to_lamports(join_price)?;

        let updated = self
            .backend
            .update_join_price(
                group_id,
                &UpdateJoinPriceRequest {
                    owner_address: me,
                    join_price,
                },
            )
            .await?;
        self.state().groups.upsert(updated.clone());
        emit_event(&self.events, ClientEvent::GroupsChanged);
        Ok(updated)
    }

    pub async fn update_background_image(&self, group_id: &str, url: &str) -> Result<Group> {
        let me = self.wallet_address()?;
        let group = self.group(group_id).await?;
        if !group.is_owned_by(&me) {
            return Err(MembershipError::NotOwner.into());
        }

        let updated = self
            .backend
            .update_background_image(group_id, &me, url)
            .await
            .ok_or_else(|| BackendError::Unavailable("background image was not updated".into()))?;
        self.state().groups.upsert(updated.clone());
        emit_event(&self.events, ClientEvent::GroupsChanged);
        Ok(updated)
    }

    // -----------------------------------------------------------------------
    // Chat & profile
    // -----------------------------------------------------------------------

    /// Show the message immediately and confirm it once the backend stores it.
    pub async fn send_message(&self, group_id: &str, content: &str) -> Result<Message> {
        let me = self.wallet_address()?;
        let content = content.trim();
        if content.is_empty() {
            return Err(FlowError::InvalidInput("message is empty".into()));
        }

        let (pending, username) = {
            let mut state = self.state();
            let username = state.username.clone();
            (state.messages.push_pending(group_id, me, username.clone(), content), username)
        };

        let stored = self
            .backend
            .send_message(group_id, &me, content, username.as_deref())
            .await;
        self.state()
            .messages
            .resolve_pending(group_id, &pending, stored.clone());

        stored.ok_or_else(|| BackendError::Unavailable("message was not delivered".into()).into())
    }

    pub async fn register_username(&self, username: &str) -> Result<String> {
        let me = self.wallet_address()?;
        let resp = self.backend.register_username(&me, username.trim()).await?;
        self.state().username = Some(resp.username.clone());
        Ok(resp.username)
    }
}

fn record_failed(signature: &TransactionSignature, source: BackendError) -> FlowError {
    warn!(signature = %signature, error = %source, "Payment confirmed but backend record failed");
    FlowError::RecordFailed {
        signature: signature.clone(),
        source,
    }
}

fn validate_draft(draft: &GroupDraft) -> Result<()> {
    if draft.name.trim().is_empty() {
        return Err(FlowError::InvalidInput("group name is required".into()));
    }
    if draft.category.trim().is_empty() {
        return Err(FlowError::InvalidInput("category is required".into()));
    }
    if draft.join_price < 0.0 {
        return Err(FlowError::InvalidInput("join price cannot be negative".into()));
    }
    sol_to_lamports(draft.join_price)?;
    Ok(())
}
