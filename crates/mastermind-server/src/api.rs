use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::Method,
    middleware,
    routing::{get, patch, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use mastermind_shared::address::normalize;
use mastermind_shared::protocol::{
    CreateGroupRequest, DeleteGroupRequest, GroupResponse, GroupsResponse, JoinGroupRequest, JoinGroupResponse,
    LeaveGroupRequest, MembersResponse, MembershipResponse, MessageResponse, MessagesResponse,
    PlatformConfigResponse, RegisterUsernameRequest, RegisterUsernameResponse, SendMessageRequest,
    SuccessResponse, UpdateBackgroundImageRequest, UpdateJoinPriceRequest, UsernameAvailability,
};
use mastermind_shared::types::UserProfile;
use mastermind_shared::WalletAddress;

use crate::error::ServerError;
use crate::rate_limit::{rate_limit_middleware, RateLimiter};
use crate::service::GroupService;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<GroupService>,
    pub rate_limiter: RateLimiter,
    pub cors_allow_any: bool,
}

pub fn build_router(state: AppState) -> Router {
    let cors = if state.cors_allow_any {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE, Method::OPTIONS])
            .allow_headers(Any)
    } else {
        CorsLayer::new()
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/api/config", get(platform_config))
        .route("/api/groups/public", get(list_groups))
        .route("/api/groups", post(create_group))
        .route("/api/groups/:id", get(get_group).delete(delete_group))
        .route("/api/groups/:id/join", post(join_group))
        .route("/api/groups/:id/leave", post(leave_group))
        .route("/api/groups/:id/join-price", patch(update_join_price))
        .route("/api/groups/:id/background-image", patch(update_background_image))
        .route("/api/groups/:id/messages", get(get_messages).post(send_message))
        .route("/api/groups/:id/members", get(list_members))
        .route("/api/groups/:id/members/:address", get(check_membership))
        .route("/api/users/username", post(register_username))
        .route("/api/users/username/check", get(check_username))
        .route("/api/users/:address", get(user_profile))
        .layer(middleware::from_fn_with_state(
            state.rate_limiter.clone(),
            rate_limit_middleware,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Deserialize)]
struct CategoryQuery {
    category: Option<String>,
}

#[derive(Deserialize)]
struct UsernameQuery {
    username: String,
}

fn parse_address(raw: &str) -> Result<WalletAddress, ServerError> {
    Ok(normalize(raw)?)
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn platform_config(State(state): State<AppState>) -> Json<PlatformConfigResponse> {
    Json(state.service.platform_config())
}

// ─── Groups ───

async fn list_groups(
    State(state): State<AppState>,
    Query(query): Query<CategoryQuery>,
) -> Result<Json<GroupsResponse>, ServerError> {
    let groups = state.service.list_groups(query.category.as_deref()).await?;
    Ok(Json(GroupsResponse { groups }))
}

async fn get_group(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<GroupResponse>, ServerError> {
    let group = state.service.get_group(&id).await?;
    Ok(Json(GroupResponse { group }))
}

async fn create_group(
    State(state): State<AppState>,
    Json(req): Json<CreateGroupRequest>,
) -> Result<Json<GroupResponse>, ServerError> {
    let group = state.service.create_group(req).await?;
    Ok(Json(GroupResponse { group }))
}

async fn delete_group(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<DeleteGroupRequest>,
) -> Result<Json<SuccessResponse>, ServerError> {
    Ok(Json(state.service.delete_group(&id, req).await?))
}

async fn update_background_image(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateBackgroundImageRequest>,
) -> Result<Json<GroupResponse>, ServerError> {
    let group = state.service.update_background_image(&id, req).await?;
    Ok(Json(GroupResponse { group }))
}

async fn update_join_price(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateJoinPriceRequest>,
) -> Result<Json<GroupResponse>, ServerError> {
    let group = state.service.update_join_price(&id, req).await?;
    Ok(Json(GroupResponse { group }))
}

// ─── Membership ───

async fn join_group(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<JoinGroupRequest>,
) -> Result<Json<JoinGroupResponse>, ServerError> {
    let user = req.user_address;
    let message = state.service.join_group(&id, req).await?;
    info!(group_id = %id, user = %user.short(), "Join recorded");
    Ok(Json(JoinGroupResponse { message: Some(message) }))
}

async fn leave_group(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<LeaveGroupRequest>,
) -> Result<Json<SuccessResponse>, ServerError> {
    Ok(Json(state.service.leave_group(&id, &req.user_address).await?))
}

async fn list_members(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MembersResponse>, ServerError> {
    let members = state.service.list_members(&id).await?;
    Ok(Json(MembersResponse { members }))
}

async fn check_membership(
    State(state): State<AppState>,
    Path((id, address)): Path<(String, String)>,
) -> Result<Json<MembershipResponse>, ServerError> {
    let address = parse_address(&address)?;
    let is_member = state.service.is_member(&id, &address).await?;
    Ok(Json(MembershipResponse { is_member }))
}

// ─── Messages ───

async fn get_messages(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MessagesResponse>, ServerError> {
    let messages = state.service.get_messages(&id).await?;
    Ok(Json(MessagesResponse { messages }))
}

async fn send_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<SendMessageRequest>,
) -> Result<Json<MessageResponse>, ServerError> {
    let message = state
        .service
        .send_message(&id, &req.sender_address, &req.content, req.username.as_deref())
        .await?;
    Ok(Json(MessageResponse { message }))
}

// ─── Users ───

async fn register_username(
    State(state): State<AppState>,
    Json(req): Json<RegisterUsernameRequest>,
) -> Result<Json<RegisterUsernameResponse>, ServerError> {
    let username = state.service.register_username(&req.user_address, &req.username).await?;
    Ok(Json(RegisterUsernameResponse {
        username,
        message: Some("Username registered".into()),
    }))
}

async fn check_username(
    State(state): State<AppState>,
    Query(query): Query<UsernameQuery>,
) -> Result<Json<UsernameAvailability>, ServerError> {
    Ok(Json(state.service.username_availability(&query.username).await?))
}

async fn user_profile(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<Json<UserProfile>, ServerError> {
    let address = parse_address(&address)?;
    Ok(Json(state.service.user_profile(&address).await?))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::Budget;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use ed25519_dalek::{Signer, SigningKey};
    use rand::rngs::OsRng;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use mastermind_pay::{Blockhash, ChainClient, ConfirmationStatus, ConfirmedTransfers, PaymentError, TransferLeg};
    use mastermind_shared::membership::LEAVE_WARNING;
    use mastermind_shared::ownership::{delete_proof_message, encode_proof};
    use mastermind_shared::TransactionSignature;
    use mastermind_store::Database;

    const LAMPORTS: u64 = 1_000_000_000;

    /// Chain holding whatever payments a test says were made.
    #[derive(Default)]
    struct FakeChain {
        paid: Mutex<HashMap<String, ConfirmedTransfers>>,
        down: bool,
    }

    impl FakeChain {
        fn pay(&self, sig: &str, payer: WalletAddress, legs: &[(WalletAddress, u64)]) {
            let legs = legs
                .iter()
                .map(|(to, lamports)| TransferLeg { from: payer, to: *to, lamports: *lamports })
                .collect();
            self.paid
                .lock()
                .unwrap()
                .insert(sig.to_string(), ConfirmedTransfers { fee_payer: payer, legs });
        }
    }

    #[async_trait]
    impl ChainClient for FakeChain {
        async fn latest_blockhash(&self) -> Result<Blockhash, PaymentError> {
            Ok(Blockhash::new([1u8; 32]))
        }

        async fn confirmation_status(&self, sig: &TransactionSignature) -> Result<ConfirmationStatus, PaymentError> {
            Ok(match self.paid.lock().unwrap().contains_key(sig.as_str()) {
                true => ConfirmationStatus::Confirmed,
                false => ConfirmationStatus::NotFound,
            })
        }

        async fn confirmed_transfers(
            &self,
            sig: &TransactionSignature,
        ) -> Result<Option<ConfirmedTransfers>, PaymentError> {
            if self.down {
                return Err(PaymentError::Rpc("connection refused".into()));
            }
            Ok(self.paid.lock().unwrap().get(sig.as_str()).cloned())
        }
    }

    struct Harness {
        app: Router,
        chain: Arc<FakeChain>,
        platform: WalletAddress,
    }

    fn addr(last: u8) -> WalletAddress {
        let mut bytes = [0u8; 32];
        bytes[0] = 0x77;
        bytes[31] = last;
        WalletAddress::from_bytes(bytes)
    }

    fn sig(seed: u8) -> String {
        bs58::encode([seed; 64]).into_string()
    }

    fn harness_with(chain: FakeChain) -> Harness {
        let chain = Arc::new(chain);
        let platform = addr(200);
        let service = GroupService::new(Database::open_in_memory().unwrap(), chain.clone(), platform, 6.9, 0.01);
        let app = build_router(AppState {
            service: Arc::new(service),
            rate_limiter: {
                let open = Budget::per_sec(1000.0, 1000.0);
                RateLimiter::new(open, open, open)
            },
            cors_allow_any: true,
        });
        Harness { app, chain, platform }
    }

    fn harness() -> Harness {
        harness_with(FakeChain::default())
    }

    impl Harness {
        async fn call(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
            let builder = Request::builder().method(method).uri(uri);
            let request = match body {
                Some(v) => builder
                    .header("content-type", "application/json")
                    .body(Body::from(v.to_string()))
                    .unwrap(),
                None => builder.body(Body::empty()).unwrap(),
            };
            let response = self.app.clone().oneshot(request).await.unwrap();
            let status = response.status();
            let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
            (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
        }

        /// Pay the creation fee and create a group.
        async fn create(&self, owner: WalletAddress, join_price: f64, category: &str, seed: u8) -> Value {
            self.chain.pay(&sig(seed), owner, &[(self.platform, 6_900_000_000)]);
            let (status, body) = self.call(Method::POST, "/api/groups", Some(create_body(owner, join_price, category, seed))).await;
            assert_eq!(status, StatusCode::OK, "{body}");
            body["group"].clone()
        }

        /// Pay the split join fee and join.
        async fn paid_join(&self, group: &Value, user: WalletAddress, price_sol: f64, seed: u8) -> (StatusCode, Value) {
            let total = (price_sol * LAMPORTS as f64).round() as u64;
            let platform_leg = (total as f64 * 0.01).round() as u64;
            let owner = group["paymentAddress"].as_str().unwrap().parse::<WalletAddress>().unwrap();
            self.chain.pay(&sig(seed), user, &[(self.platform, platform_leg), (owner, total - platform_leg)]);
            self.join(group, user, &sig(seed)).await
        }

        async fn join(&self, group: &Value, user: WalletAddress, signature: &str) -> (StatusCode, Value) {
            let uri = format!("/api/groups/{}/join", group["id"].as_str().unwrap());
            self.call(
                Method::POST,
                &uri,
                Some(json!({ "userAddress": user.to_base58(), "paymentSignature": signature })),
            )
            .await
        }

        async fn is_member(&self, group: &Value, user: WalletAddress) -> bool {
            let uri = format!("/api/groups/{}/members/{}", group["id"].as_str().unwrap(), user);
            let (status, body) = self.call(Method::GET, &uri, None).await;
            assert_eq!(status, StatusCode::OK);
            body["isMember"].as_bool().unwrap()
        }
    }

    fn create_body(owner: WalletAddress, join_price: f64, category: &str, seed: u8) -> Value {
        json!({
            "name": format!("{category} mastermind"),
            "ownerAddress": owner.to_base58(),
            "joinPrice": join_price,
            "paymentAddress": owner.to_base58(),
            "createPaymentSignature": sig(seed),
            "createPrice": 6.9,
            "category": category,
        })
    }

    #[tokio::test]
    async fn create_requires_confirmed_creation_fee() {
        let h = harness();
        let owner = addr(1);

        let (status, body) = h.call(Method::POST, "/api/groups", Some(create_body(owner, 0.0, "Health", 1))).await;
        assert_eq!(status, StatusCode::PAYMENT_REQUIRED, "{body}");

        let group = h.create(owner, 0.0, "Health", 1).await;
        assert_eq!(group["joinPrice"].as_f64(), Some(0.0));
        assert_eq!(group["memberCount"].as_u64(), Some(1));
        assert!(h.is_member(&group, owner).await);

        // The same creation payment cannot pay twice.
        let (status, _) = h.call(Method::POST, "/api/groups", Some(create_body(owner, 0.0, "Health", 1))).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn create_rejects_underpayment_and_low_price() {
        let h = harness();
        let owner = addr(1);

        h.chain.pay(&sig(2), owner, &[(h.platform, 1_000_000_000)]);
        let (status, _) = h.call(Method::POST, "/api/groups", Some(create_body(owner, 0.0, "Health", 2))).await;
        assert_eq!(status, StatusCode::PAYMENT_REQUIRED);

        let mut body = create_body(owner, 0.0, "Health", 3);
        body["createPrice"] = json!(1.0);
        let (status, _) = h.call(Method::POST, "/api/groups", Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let mut body = create_body(owner, 0.0, "Health", 4);
        body["createPaymentSignature"] = json!("not-a-signature");
        let (status, _) = h.call(Method::POST, "/api/groups", Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn paid_join_records_price_and_split() {
        let h = harness();
        let owner = addr(1);
        let user = addr(2);
        let group = h.create(owner, 2.0, "Financial", 1).await;

        let (status, _) = h.join(&group, user, "").await;
        assert_eq!(status, StatusCode::PAYMENT_REQUIRED);

        // Owner leg short by one lamport.
        h.chain.pay(&sig(9), user, &[(h.platform, 20_000_000), (owner, 1_979_999_999)]);
        let (status, _) = h.join(&group, user, &sig(9)).await;
        assert_eq!(status, StatusCode::PAYMENT_REQUIRED);

        let (status, body) = h.paid_join(&group, user, 2.0, 10).await;
        assert_eq!(status, StatusCode::OK, "{body}");

        let uri = format!("/api/groups/{}/members", group["id"].as_str().unwrap());
        let (_, body) = h.call(Method::GET, &uri, None).await;
        let member = body["members"]
            .as_array()
            .unwrap()
            .iter()
            .find(|m| m["userAddress"] == json!(user.to_base58()))
            .cloned()
            .unwrap();
        assert_eq!(member["joinPricePaid"].as_f64(), Some(2.0));

        let (status, _) = h.paid_join(&group, user, 2.0, 11).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn free_member_must_pay_full_price_after_leaving() {
        let h = harness();
        let owner = addr(1);
        let user = addr(2);
        let group = h.create(owner, 0.0, "Health", 1).await;
        let id = group["id"].as_str().unwrap().to_string();

        let (status, _) = h.join(&group, user, "").await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = h
            .call(
                Method::PATCH,
                &format!("/api/groups/{id}/join-price"),
                Some(json!({ "ownerAddress": owner.to_base58(), "joinPrice": 2.0 })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert!(h.is_member(&group, user).await);

        let (status, body) = h
            .call(
                Method::POST,
                &format!("/api/groups/{id}/leave"),
                Some(json!({ "userAddress": user.to_base58() })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], json!(LEAVE_WARNING));
        assert!(!h.is_member(&group, user).await);

        let (status, _) = h.join(&group, user, "").await;
        assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
        let (status, _) = h.join(&group, user, &sig(42)).await;
        assert_eq!(status, StatusCode::PAYMENT_REQUIRED);

        let (_, group) = h.call(Method::GET, &format!("/api/groups/{id}"), None).await;
        let (status, _) = h.paid_join(&group["group"], user, 2.0, 43).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn price_raise_grandfathers_members() {
        let h = harness();
        let owner = addr(1);
        let user = addr(2);
        let group = h.create(owner, 1.0, "Health", 1).await;
        let id = group["id"].as_str().unwrap().to_string();
        h.paid_join(&group, user, 1.0, 5).await;

        let (status, _) = h
            .call(
                Method::PATCH,
                &format!("/api/groups/{id}/join-price"),
                Some(json!({ "ownerAddress": user.to_base58(), "joinPrice": 0.5 })),
            )
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = h
            .call(
                Method::PATCH,
                &format!("/api/groups/{id}/join-price"),
                Some(json!({ "ownerAddress": owner.to_base58(), "joinPrice": 2.0 })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["group"]["joinPrice"].as_f64(), Some(2.0));

        assert!(h.is_member(&group, user).await);
        let (_, body) = h.call(Method::GET, &format!("/api/groups/{id}/members"), None).await;
        let paid: Vec<f64> = body["members"]
            .as_array()
            .unwrap()
            .iter()
            .filter(|m| m["userAddress"] == json!(user.to_base58()))
            .filter_map(|m| m["joinPricePaid"].as_f64())
            .collect();
        assert_eq!(paid, vec![1.0]);
    }

    #[tokio::test]
    async fn owners_cannot_leave_and_strangers_are_not_members() {
        let h = harness();
        let owner = addr(1);
        let group = h.create(owner, 0.0, "Health", 1).await;
        let uri = format!("/api/groups/{}/leave", group["id"].as_str().unwrap());

        let (status, _) = h.call(Method::POST, &uri, Some(json!({ "userAddress": owner.to_base58() }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = h.call(Method::POST, &uri, Some(json!({ "userAddress": addr(3).to_base58() }))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn delete_accepts_bare_address_and_signed_proof() {
        let h = harness();
        let key = SigningKey::generate(&mut OsRng);
        let owner = WalletAddress::from_bytes(key.verifying_key().to_bytes());

        let legacy = h.create(owner, 0.0, "Health", 1).await;
        let uri = format!("/api/groups/{}", legacy["id"].as_str().unwrap());
        let (status, _) = h
            .call(
                Method::DELETE,
                &uri,
                Some(json!({ "ownerAddress": addr(9).to_base58(), "verificationSignature": addr(9).to_base58() })),
            )
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, body) = h
            .call(
                Method::DELETE,
                &uri,
                Some(json!({ "ownerAddress": owner.to_base58(), "verificationSignature": owner.to_base58() })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], json!(true));
        let (status, _) = h.call(Method::GET, &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let signed = h.create(owner, 0.0, "Health", 2).await;
        let id = signed["id"].as_str().unwrap();
        let forged = encode_proof(&key.sign(&delete_proof_message("other-group")).to_bytes());
        let (status, _) = h
            .call(
                Method::DELETE,
                &format!("/api/groups/{id}"),
                Some(json!({ "ownerAddress": owner.to_base58(), "verificationSignature": forged })),
            )
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let proof = encode_proof(&key.sign(&delete_proof_message(id)).to_bytes());
        let (status, _) = h
            .call(
                Method::DELETE,
                &format!("/api/groups/{id}"),
                Some(json!({ "ownerAddress": owner.to_base58(), "verificationSignature": proof })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn only_members_can_post_messages() {
        let h = harness();
        let owner = addr(1);
        let group = h.create(owner, 0.0, "Health", 1).await;
        let uri = format!("/api/groups/{}/messages", group["id"].as_str().unwrap());

        let (status, _) = h
            .call(
                Method::POST,
                &uri,
                Some(json!({ "senderAddress": addr(5).to_base58(), "content": "hello" })),
            )
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = h
            .call(
                Method::POST,
                &uri,
                Some(json!({ "senderAddress": owner.to_base58(), "content": "  welcome  ", "username": "Coach" })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"]["content"], json!("welcome"));

        let (status, _) = h
            .call(Method::POST, &uri, Some(json!({ "senderAddress": owner.to_base58(), "content": "   " })))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, body) = h.call(Method::GET, &uri, None).await;
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["messages"][0]["username"], json!("Coach"));
    }

    #[tokio::test]
    async fn usernames_are_unique_and_validated() {
        let h = harness();

        let (status, body) = h
            .call(
                Method::POST,
                "/api/users/username",
                Some(json!({ "userAddress": addr(1).to_base58(), "username": "alice_1" })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["username"], json!("alice_1"));

        let (_, body) = h.call(Method::GET, "/api/users/username/check?username=ALICE_1", None).await;
        assert_eq!(body["available"], json!(false));
        let (_, body) = h.call(Method::GET, "/api/users/username/check?username=bob", None).await;
        assert_eq!(body["available"], json!(true));
        let (_, body) = h.call(Method::GET, "/api/users/username/check?username=no", None).await;
        assert_eq!(body["available"], json!(false));

        let (status, _) = h
            .call(
                Method::POST,
                "/api/users/username",
                Some(json!({ "userAddress": addr(2).to_base58(), "username": "Alice_1" })),
            )
            .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = h
            .call(
                Method::POST,
                "/api/users/username",
                Some(json!({ "userAddress": addr(2).to_base58(), "username": "bad name!" })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = h.call(Method::GET, &format!("/api/users/{}", addr(1)), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["username"], json!("alice_1"));

        let (status, _) = h.call(Method::GET, &format!("/api/users/{}", addr(3)), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn category_filter_and_config() {
        let h = harness();
        h.create(addr(1), 0.0, "Health", 1).await;
        h.create(addr(2), 1.0, "Financial", 2).await;

        let (_, body) = h.call(Method::GET, "/api/groups/public", None).await;
        assert_eq!(body["groups"].as_array().unwrap().len(), 2);
        let (_, body) = h.call(Method::GET, "/api/groups/public?category=Health", None).await;
        let groups = body["groups"].as_array().unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0]["category"], json!("Health"));

        let (status, body) = h.call(Method::GET, "/api/config", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["platformAddress"], json!(h.platform.to_base58()));
        assert_eq!(body["createPrice"].as_f64(), Some(6.9));

        let (status, body) = h.call(Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], json!("ok"));
    }

    #[tokio::test]
    async fn unreachable_rpc_is_service_unavailable() {
        let h = harness_with(FakeChain { down: true, ..FakeChain::default() });
        let (status, body) = h.call(Method::POST, "/api/groups", Some(create_body(addr(1), 0.0, "Health", 1))).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body["error"].as_str().unwrap().contains("RPC"));
    }
}
