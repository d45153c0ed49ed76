//! Group registry: the business rules behind every route.
//!
//! The store is guarded by one `tokio::sync::Mutex`. It is never held across
//! an on-chain lookup: a request reads what it needs, releases the lock,
//! verifies the payment, then locks again to write.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use mastermind_pay::{verify_payment, ChainClient, ExpectedLeg};
use mastermind_shared::amount::{lamports_to_sol, prices_match, sol_to_lamports, split_join_amount};
use mastermind_shared::constants::{MAX_GROUP_NAME_LEN, MAX_MESSAGE_LEN, USERNAME_MAX_LEN, USERNAME_MIN_LEN};
use mastermind_shared::membership::{authorize_leave, authorize_price_update, plan_join, JoinPlan, LEAVE_WARNING};
use mastermind_shared::ownership::{verify_delete_proof, OwnershipProof};
use mastermind_shared::protocol::{
    CreateGroupRequest, DeleteGroupRequest, JoinGroupRequest, PlatformConfigResponse, SuccessResponse,
    UpdateBackgroundImageRequest, UpdateJoinPriceRequest, UsernameAvailability,
};
use mastermind_shared::types::{Group, Member, Message, UserProfile};
use mastermind_shared::{MembershipError, TransactionSignature, WalletAddress};
use mastermind_store::{Database, NewGroup, PaymentPurpose, PaymentRecord};

use crate::error::ServerError;

/// Messages returned by `GET /api/groups/:id/messages`.
const MESSAGE_PAGE: usize = 200;

pub struct GroupService {
    db: Mutex<Database>,
    chain: Arc<dyn ChainClient>,
    platform_address: WalletAddress,
    create_price: f64,
    platform_fee_fraction: f64,
}

impl GroupService {
    pub fn new(
        db: Database,
        chain: Arc<dyn ChainClient>,
        platform_address: WalletAddress,
        create_price: f64,
        platform_fee_fraction: f64,
    ) -> Self {
        Self {
            db: Mutex::new(db),
            chain,
            platform_address,
            create_price,
            platform_fee_fraction,
        }
    }

    pub fn platform_config(&self) -> PlatformConfigResponse {
        PlatformConfigResponse {
            platform_address: self.platform_address,
            create_price: self.create_price,
            platform_fee_fraction: self.platform_fee_fraction,
        }
    }

    // -----------------------------------------------------------------------
    // Groups
    // -----------------------------------------------------------------------

    pub async fn list_groups(&self, category: Option<&str>) -> Result<Vec<Group>, ServerError> {
        let category = category.map(str::trim).filter(|c| !c.is_empty());
        Ok(self.db.lock().await.list_groups(category)?)
    }

    pub async fn get_group(&self, id: &str) -> Result<Group, ServerError> {
        self.db.lock().await.get_group(id).map_err(|e| not_found(e, "Group not found"))
    }

    /// Create a group after checking its creation fee reached the platform.
    pub async fn create_group(&self, req: CreateGroupRequest) -> Result<Group, ServerError> {
        let name = req.name.trim();
        if name.is_empty() || name.chars().count() > MAX_GROUP_NAME_LEN {
            return Err(ServerError::BadRequest(format!(
                "Group name must be 1-{MAX_GROUP_NAME_LEN} characters"
            )));
        }
        let category = req.category.trim();
        if category.is_empty() {
            return Err(ServerError::BadRequest("Category is required".into()));
        }
        sol_to_lamports(req.join_price)?;

        let required = sol_to_lamports(self.create_price)?;
        if sol_to_lamports(req.create_price)? < required {
            return Err(ServerError::BadRequest(format!(
                "Creation price must be at least {} SOL",
                self.create_price
            )));
        }

        let signature = self.fresh_signature(&req.create_payment_signature).await?;
        let expected = [ExpectedLeg {
            to: self.platform_address,
            min_lamports: required,
        }];
        verify_payment(self.chain.as_ref(), &signature, &req.owner_address, &expected).await?;

        let new_group = NewGroup {
            name: name.to_string(),
            owner_address: req.owner_address,
            join_price: req.join_price,
            payment_address: req.payment_address,
            description: req.description.filter(|d| !d.trim().is_empty()),
            background_image: req.background_image.filter(|b| !b.trim().is_empty()),
            category: category.to_string(),
        };
        let payment = PaymentRecord {
            signature,
            payer: req.owner_address,
            purpose: PaymentPurpose::CreateGroup,
        };

        let mut db = self.db.lock().await;
        if let Some(username) = req.owner_username.as_deref() {
            adopt_username(&db, &req.owner_address, username);
        }
        let group = db.create_group(&new_group, &payment)?;
        info!(group_id = %group.id, join_price = group.join_price, "Group created");
        Ok(group)
    }

    pub async fn delete_group(&self, id: &str, req: DeleteGroupRequest) -> Result<SuccessResponse, ServerError> {
        let group = self.get_group(id).await?;
        if req.owner_address != group.owner_address {
            return Err(MembershipError::NotOwner.into());
        }

        match verify_delete_proof(&group.owner_address, id, &req.verification_signature)? {
            OwnershipProof::BareAddress => {
                warn!(group_id = id, "Group deleted with bare-address ownership proof")
            }
            OwnershipProof::Signed => debug!(group_id = id, "Signed ownership proof verified"),
        }

        if !self.db.lock().await.delete_group(id)? {
            return Err(ServerError::NotFound("Group not found".into()));
        }
        info!(group_id = id, "Group deleted");
        Ok(SuccessResponse {
            success: true,
            message: Some("Group deleted".into()),
        })
    }

    pub async fn update_background_image(
        &self,
        id: &str,
        req: UpdateBackgroundImageRequest,
    ) -> Result<Group, ServerError> {
        let group = self.get_group(id).await?;
        if !group.is_owned_by(&req.owner_address) {
            return Err(MembershipError::NotOwner.into());
        }
        let image = req.background_image.trim();
        if image.is_empty() {
            return Err(ServerError::BadRequest("Background image is required".into()));
        }
        Ok(self.db.lock().await.update_background_image(id, image)?)
    }

    /// Change the join price. Existing members keep what they paid.
    pub async fn update_join_price(&self, id: &str, req: UpdateJoinPriceRequest) -> Result<Group, ServerError> {
        let group = self.get_group(id).await?;
        authorize_price_update(&group, &req.owner_address)?;
        sol_to_lamports(req.join_price)?;

        let updated = self.db.lock().await.update_join_price(id, req.join_price)?;
        info!(group_id = id, from = group.join_price, to = updated.join_price, "Join price updated");
        Ok(updated)
    }

    // -----------------------------------------------------------------------
    // Membership
    // -----------------------------------------------------------------------

    pub async fn list_members(&self, id: &str) -> Result<Vec<Member>, ServerError> {
        let db = self.db.lock().await;
        db.get_group(id).map_err(|e| not_found(e, "Group not found"))?;
        Ok(db.list_members(id)?)
    }

    pub async fn is_member(&self, id: &str, address: &WalletAddress) -> Result<bool, ServerError> {
        Ok(self.db.lock().await.is_member(id, address)?)
    }

    /// Join a group. Paid plans are verified on-chain before anything is
    /// written; a stale membership row is replaced in the same transaction
    /// that records the new one.
    pub async fn join_group(&self, id: &str, req: JoinGroupRequest) -> Result<String, ServerError> {
        let (group, plan) = {
            let db = self.db.lock().await;
            let group = db.get_group(id).map_err(|e| not_found(e, "Group not found"))?;
            let existing = db.get_member(id, &req.user_address)?;
            let plan = plan_join(existing.as_ref(), &group);
            (group, plan)
        };

        debug!(group_id = id, user = %req.user_address.short(), ?plan, "Join planned");

        let payment = match &plan {
            JoinPlan::AlreadyMember => return Err(MembershipError::AlreadyMember.into()),
            JoinPlan::Free => None,
            JoinPlan::Paid { price } | JoinPlan::Repay { price, .. } => {
                if req.payment_signature.trim().is_empty() {
                    return Err(ServerError::PaymentRequired(format!(
                        "This group costs {price} SOL to join; paymentSignature is required"
                    )));
                }
                let signature = self.fresh_signature(&req.payment_signature).await?;
                let expected = self.join_legs(&group, *price)?;
                verify_payment(self.chain.as_ref(), &signature, &req.user_address, &expected).await?;
                Some(PaymentRecord {
                    signature,
                    payer: req.user_address,
                    purpose: PaymentPurpose::JoinGroup,
                })
            }
        };

        let mut db = self.db.lock().await;

        // The price may have moved while the payment was being verified.
        let current = db.get_group(id).map_err(|e| not_found(e, "Group not found"))?;
        if !prices_match(current.join_price, group.join_price) {
            warn!(group_id = id, "Join price changed during verification");
            return Err(ServerError::Conflict(format!(
                "The join price changed to {} SOL; please try again",
                current.join_price
            )));
        }

        if let Some(username) = req.username.as_deref() {
            adopt_username(&db, &req.user_address, username);
        }
        let member = db.record_join(id, &req.user_address, plan.recorded_price(), payment.as_ref())?;

        Ok(match plan {
            JoinPlan::Repay { previous_paid, .. } => format!(
                "Rejoined for {} SOL (previous membership at {previous_paid} SOL replaced)",
                member.join_price_paid
            ),
            JoinPlan::Paid { .. } => format!("Joined for {} SOL", member.join_price_paid),
            _ => "Joined group".to_string(),
        })
    }

    /// Leave a group. The row is hard-deleted.
    pub async fn leave_group(&self, id: &str, address: &WalletAddress) -> Result<SuccessResponse, ServerError> {
        let db = self.db.lock().await;
        let group = db.get_group(id).map_err(|e| not_found(e, "Group not found"))?;
        let existing = db.get_member(id, address)?;
        authorize_leave(&group, existing.as_ref(), address)?;

        db.remove_member(id, address)?;
        info!(group_id = id, member = %address.short(), "Member left");
        Ok(SuccessResponse {
            success: true,
            message: Some(LEAVE_WARNING.to_string()),
        })
    }

    // -----------------------------------------------------------------------
    // Messages
    // -----------------------------------------------------------------------

    pub async fn get_messages(&self, id: &str) -> Result<Vec<Message>, ServerError> {
        let db = self.db.lock().await;
        db.get_group(id).map_err(|e| not_found(e, "Group not found"))?;
        Ok(db.list_messages(id, MESSAGE_PAGE)?)
    }

    pub async fn send_message(
        &self,
        id: &str,
        sender: &WalletAddress,
        content: &str,
        username: Option<&str>,
    ) -> Result<Message, ServerError> {
        let content = content.trim();
        if content.is_empty() || content.chars().count() > MAX_MESSAGE_LEN {
            return Err(ServerError::BadRequest(format!(
                "Message must be 1-{MAX_MESSAGE_LEN} characters"
            )));
        }

        let db = self.db.lock().await;
        db.get_group(id).map_err(|e| not_found(e, "Group not found"))?;
        if !db.is_member(id, sender)? {
            return Err(MembershipError::NotMember.into());
        }
        let username = username.map(str::trim).filter(|u| !u.is_empty());
        Ok(db.insert_message(id, sender, username, content)?)
    }

    // -----------------------------------------------------------------------
    // Users
    // -----------------------------------------------------------------------

    pub async fn register_username(&self, address: &WalletAddress, username: &str) -> Result<String, ServerError> {
        let username = username.trim();
        validate_username(username).map_err(ServerError::BadRequest)?;
        Ok(self.db.lock().await.register_username(address, username)?)
    }

    pub async fn username_availability(&self, username: &str) -> Result<UsernameAvailability, ServerError> {
        let username = username.trim();
        if let Err(reason) = validate_username(username) {
            return Ok(UsernameAvailability {
                available: false,
                message: Some(reason),
            });
        }
        let available = self.db.lock().await.is_username_available(username)?;
        Ok(UsernameAvailability {
            available,
            message: (!available).then(|| "Username is already taken".to_string()),
        })
    }

    pub async fn user_profile(&self, address: &WalletAddress) -> Result<UserProfile, ServerError> {
        let user = self
            .db
            .lock()
            .await
            .get_user(address)?
            .ok_or_else(|| ServerError::NotFound("User not found".into()))?;
        Ok(UserProfile {
            username: user.username,
            x_handle: None,
            verified: None,
        })
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    /// Parse a payment signature and reject one that already paid for
    /// something. The store re-checks atomically on write.
    async fn fresh_signature(&self, raw: &str) -> Result<TransactionSignature, ServerError> {
        let signature = TransactionSignature::parse_strict(raw)?;
        if self.db.lock().await.is_signature_used(&signature)? {
            return Err(ServerError::Conflict(format!(
                "Payment signature {signature} has already been used"
            )));
        }
        Ok(signature)
    }

    /// The two legs a join payment of `price` must contain.
    fn join_legs(&self, group: &Group, price: f64) -> Result<[ExpectedLeg; 2], ServerError> {
        let total = sol_to_lamports(price)?;
        let (platform, owner) = split_join_amount(total, self.platform_fee_fraction)?;
        debug!(
            total_sol = lamports_to_sol(total),
            platform_lamports = platform,
            owner_lamports = owner,
            "Expected join split"
        );
        Ok([
            ExpectedLeg {
                to: self.platform_address,
                min_lamports: platform,
            },
            ExpectedLeg {
                to: group.payment_address,
                min_lamports: owner,
            },
        ])
    }
}

/// 3-20 characters of ASCII letters, digits and underscores.
pub fn validate_username(username: &str) -> Result<(), String> {
    let len = username.chars().count();
    if !(USERNAME_MIN_LEN..=USERNAME_MAX_LEN).contains(&len) {
        return Err(format!(
            "Username must be {USERNAME_MIN_LEN}-{USERNAME_MAX_LEN} characters"
        ));
    }
    if !username.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err("Username may only contain letters, numbers and underscores".into());
    }
    Ok(())
}

/// Register a username sent along with another request, if the address has
/// none yet. Failure never blocks the request itself.
fn adopt_username(db: &Database, address: &WalletAddress, username: &str) {
    let username = username.trim();
    if validate_username(username).is_err() {
        return;
    }
    if let Err(e) = db.register_username(address, username) {
        debug!(error = %e, "Username not adopted");
    }
}

fn not_found(e: mastermind_store::StoreError, what: &str) -> ServerError {
    match e {
        mastermind_store::StoreError::NotFound => ServerError::NotFound(what.to_string()),
        other => other.into(),
    }
}
