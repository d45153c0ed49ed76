//! Typed client for the group backend REST API.
//!
//! Reads degrade: an unreachable backend yields an empty list, `false` or
//! `None` and a warning in the log. Mutations that move the user's state
//! forward (create, join, leave, delete, username, join price) return a
//! [`BackendError`] instead, so "backend not set up" can be told apart from
//! a business-rule rejection.

use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use mastermind_shared::protocol::{
    CreateGroupRequest, DeleteGroupRequest, ErrorBody, GroupResponse, GroupsResponse, JoinGroupRequest,
    JoinGroupResponse, LeaveGroupRequest, MembersResponse, MembershipResponse, MessageResponse,
    MessagesResponse, PlatformConfigResponse, RegisterUsernameRequest, RegisterUsernameResponse,
    SendMessageRequest, SuccessResponse, UpdateBackgroundImageRequest, UpdateJoinPriceRequest,
    UsernameAvailability, XAuthorizeResponse, XVerifyPinRequest, XVerifyPinResponse,
};
use mastermind_shared::types::{Group, Member, Message, UserProfile};
use mastermind_shared::WalletAddress;

use crate::error::BackendError;

type BackendResult<T> = std::result::Result<T, BackendError>;

#[derive(Clone)]
pub struct GroupBackendClient {
    http: Client,
    base_url: String,
}

impl GroupBackendClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> BackendResult<Self> {
        let http = Client::builder().timeout(timeout).build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> BackendResult<T> {
        let resp = request.send().await?;
        decode(resp).await
    }

    /// Run a read; any failure is logged and becomes `None`.
    async fn degrade<T: DeserializeOwned>(&self, what: &str, request: RequestBuilder) -> Option<T> {
        match self.send(request).await {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(call = what, error = %e, "Backend read failed, degrading");
                None
            }
        }
    }

    // -----------------------------------------------------------------------
    // Platform
    // -----------------------------------------------------------------------

    /// Fee parameters the backend advertises. A backend without the route
    /// answers `Rejected { status: 404, .. }`.
    pub async fn try_platform_config(&self) -> BackendResult<PlatformConfigResponse> {
        let req = self.http.get(self.url("/api/config"));
        self.send(req).await
    }

    pub async fn platform_config(&self) -> Option<PlatformConfigResponse> {
        let req = self.http.get(self.url("/api/config"));
        self.degrade("platform_config", req).await
    }

    // -----------------------------------------------------------------------
    // Groups
    // -----------------------------------------------------------------------

    /// Like [`list_groups`](Self::list_groups) but reports failures, for
    /// callers that replace local state with the result.
    pub async fn try_list_groups(&self, category: Option<&str>) -> BackendResult<Vec<Group>> {
        let mut req = self.http.get(self.url("/api/groups/public"));
        if let Some(category) = category {
            req = req.query(&[("category", category)]);
        }
        debug!(category = ?category, "Listing groups");
        let body: GroupsResponse = self.send(req).await?;
        Ok(body.groups)
    }

    pub async fn list_groups(&self, category: Option<&str>) -> Vec<Group> {
        match self.try_list_groups(category).await {
            Ok(groups) => groups,
            Err(e) => {
                warn!(category = ?category, error = %e, "Could not list groups");
                Vec::new()
            }
        }
    }

    /// The backend's current copy of one group, failures reported.
    pub async fn try_get_group(&self, group_id: &str) -> BackendResult<Group> {
        let req = self.http.get(self.url(&format!("/api/groups/{group_id}")));
        let body: GroupResponse = self.send(req).await?;
        Ok(body.group)
    }

    pub async fn get_group(&self, group_id: &str) -> Option<Group> {
        let req = self.http.get(self.url(&format!("/api/groups/{group_id}")));
        let body: Option<GroupResponse> = self.degrade("get_group", req).await;
        body.map(|b| b.group)
    }

    pub async fn create_group(&self, request: &CreateGroupRequest) -> BackendResult<Group> {
        debug!(name = %request.name, owner = %request.owner_address.short(), "Creating group");
        let req = self.http.post(self.url("/api/groups")).json(request);
        let body: GroupResponse = self.send(req).await?;
        Ok(body.group)
    }

    pub async fn join_group(&self, group_id: &str, request: &JoinGroupRequest) -> BackendResult<JoinGroupResponse> {
        debug!(group_id, user = %request.user_address.short(), paid = !request.payment_signature.is_empty(), "Joining group");
        let req = self
            .http
            .post(self.url(&format!("/api/groups/{group_id}/join")))
            .json(request);
        self.send(req).await
    }

    pub async fn leave_group(&self, group_id: &str, user: &WalletAddress) -> BackendResult<SuccessResponse> {
        let req = self
            .http
            .post(self.url(&format!("/api/groups/{group_id}/leave")))
            .json(&LeaveGroupRequest { user_address: *user });
        self.send(req).await
    }

    pub async fn delete_group(&self, group_id: &str, request: &DeleteGroupRequest) -> BackendResult<SuccessResponse> {
        debug!(group_id, owner = %request.owner_address.short(), "Deleting group");
        let req = self
            .http
            .delete(self.url(&format!("/api/groups/{group_id}")))
            .json(request);
        self.send(req).await
    }

    pub async fn update_join_price(&self, group_id: &str, request: &UpdateJoinPriceRequest) -> BackendResult<Group> {
        let req = self
            .http
            .patch(self.url(&format!("/api/groups/{group_id}/join-price")))
            .json(request);
        let body: GroupResponse = self.send(req).await?;
        Ok(body.group)
    }

    pub async fn update_background_image(
        &self,
        group_id: &str,
        owner: &WalletAddress,
        background_image: &str,
    ) -> Option<Group> {
        let req = self
            .http
            .patch(self.url(&format!("/api/groups/{group_id}/background-image")))
            .json(&UpdateBackgroundImageRequest {
                owner_address: *owner,
                background_image: background_image.to_string(),
            });
        let body: Option<GroupResponse> = self.degrade("update_background_image", req).await;
        body.map(|b| b.group)
    }

    // -----------------------------------------------------------------------
    // Members
    // -----------------------------------------------------------------------

    pub async fn try_list_members(&self, group_id: &str) -> BackendResult<Vec<Member>> {
        let req = self.http.get(self.url(&format!("/api/groups/{group_id}/members")));
        let body: MembersResponse = self.send(req).await?;
        Ok(body.members)
    }

    pub async fn list_members(&self, group_id: &str) -> Vec<Member> {
        match self.try_list_members(group_id).await {
            Ok(members) => members,
            Err(e) => {
                warn!(group_id, error = %e, "Could not list members");
                Vec::new()
            }
        }
    }

    pub async fn check_membership(&self, group_id: &str, address: &WalletAddress) -> bool {
        let req = self
            .http
            .get(self.url(&format!("/api/groups/{group_id}/members/{address}")));
        let body: Option<MembershipResponse> = self.degrade("check_membership", req).await;
        body.is_some_and(|b| b.is_member)
    }

    // -----------------------------------------------------------------------
    // Messages
    // -----------------------------------------------------------------------

    pub async fn get_messages(&self, group_id: &str) -> Vec<Message> {
        let req = self.http.get(self.url(&format!("/api/groups/{group_id}/messages")));
        let body: Option<MessagesResponse> = self.degrade("get_messages", req).await;
        body.map(|b| b.messages).unwrap_or_default()
    }

    pub async fn send_message(
        &self,
        group_id: &str,
        sender: &WalletAddress,
        content: &str,
        username: Option<&str>,
    ) -> Option<Message> {
        let req = self
            .http
            .post(self.url(&format!("/api/groups/{group_id}/messages")))
            .json(&SendMessageRequest {
                sender_address: *sender,
                content: content.to_string(),
                username: username.map(str::to_string),
            });
        let body: Option<MessageResponse> = self.degrade("send_message", req).await;
        body.map(|b| b.message)
    }

    // -----------------------------------------------------------------------
    // Users
    // -----------------------------------------------------------------------

    pub async fn register_username(
        &self,
        user: &WalletAddress,
        username: &str,
    ) -> BackendResult<RegisterUsernameResponse> {
        let req = self
            .http
            .post(self.url("/api/users/username"))
            .json(&RegisterUsernameRequest {
                user_address: *user,
                username: username.to_string(),
            });
        self.send(req).await
    }

    pub async fn check_username_availability(&self, username: &str) -> Option<UsernameAvailability> {
        let req = self
            .http
            .get(self.url("/api/users/username/check"))
            .query(&[("username", username)]);
        self.degrade("check_username_availability", req).await
    }

    /// `None` when the address has no profile or the backend is unreachable.
    pub async fn get_user_profile(&self, address: &WalletAddress) -> Option<UserProfile> {
        let req = self.http.get(self.url(&format!("/api/users/{address}")));
        self.degrade("get_user_profile", req).await
    }

    // -----------------------------------------------------------------------
    // X account linking
    // -----------------------------------------------------------------------

    pub async fn x_authorize_url(&self, redirect_uri: &str, user: &WalletAddress) -> Option<XAuthorizeResponse> {
        let address = user.to_base58();
        let req = self
            .http
            .get(self.url("/api/auth/x/authorize"))
            .query(&[("redirect_uri", redirect_uri), ("userAddress", address.as_str())]);
        self.degrade("x_authorize_url", req).await
    }

    pub async fn sync_x_account(&self, request: &XVerifyPinRequest) -> Option<XVerifyPinResponse> {
        let req = self.http.post(self.url("/api/auth/x/verify-pin")).json(request);
        self.degrade("sync_x_account", req).await
    }
}

async fn decode<T: DeserializeOwned>(resp: Response) -> BackendResult<T> {
    let status = resp.status();
    if status.is_success() {
        let bytes = resp.bytes().await?;
        return serde_json::from_slice(&bytes).map_err(|e| BackendError::Decode(e.to_string()));
    }

    let text = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text)
        .map(|b| b.error)
        .ok()
        .filter(|m| !m.is_empty())
        .or_else(|| status.canonical_reason().map(str::to_string))
        .unwrap_or_else(|| status.to_string());

    debug!(status = status.as_u16(), message = %message, "Backend rejected request");
    Err(BackendError::Rejected {
        status: status.as_u16(),
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        extract::{Path, Query},
        http::StatusCode,
        routing::{get, post},
        Json, Router,
    };
    use serde_json::{json, Value};
    use std::collections::HashMap;

    const OWNER: &str = "11111111111111111111111111111112";

    async fn stub(app: Router) -> GroupBackendClient {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        GroupBackendClient::new(format!("http://{addr}/"), Duration::from_secs(5)).unwrap()
    }

    /// A base URL nothing listens on.
    async fn dead_backend() -> GroupBackendClient {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        GroupBackendClient::new(format!("http://{addr}"), Duration::from_secs(2)).unwrap()
    }

    fn owner() -> WalletAddress {
        OWNER.parse().unwrap()
    }

    #[tokio::test]
    async fn lists_groups_with_mixed_casing() {
        let app = Router::new().route(
            "/api/groups/public",
            get(|Query(q): Query<HashMap<String, String>>| async move {
                assert_eq!(q.get("category").map(String::as_str), Some("Health"));
                Json(json!({ "groups": [
                    { "id": "a", "name": "Runners", "ownerAddress": OWNER, "joinPrice": 1.0, "category": "Health" },
                    { "id": 7, "name": "Lifters", "owner_address": OWNER, "join_price": "0", "category": "Health" }
                ]}))
            }),
        );
        let client = stub(app).await;

        let groups = client.list_groups(Some("Health")).await;
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[1].id, "7");
        assert!(groups[1].is_free());
    }

    #[tokio::test]
    async fn reads_degrade_when_unreachable() {
        let client = dead_backend().await;

        assert!(client.list_groups(None).await.is_empty());
        assert!(client.get_messages("g").await.is_empty());
        assert!(!client.check_membership("g", &owner()).await);
        assert!(client.get_user_profile(&owner()).await.is_none());
        assert!(client.platform_config().await.is_none());
        assert!(client.try_list_groups(None).await.unwrap_err().is_unavailable());
        assert!(client.try_get_group("g").await.unwrap_err().is_unavailable());
        assert!(client.try_platform_config().await.unwrap_err().is_unavailable());
    }

    #[tokio::test]
    async fn missing_routes_are_rejections_not_outages() {
        let client = stub(Router::new()).await;

        assert_eq!(client.try_platform_config().await.unwrap_err().status(), Some(404));
        assert_eq!(client.try_get_group("gone").await.unwrap_err().status(), Some(404));
    }

    #[tokio::test]
    async fn mutations_report_unavailable() {
        let client = dead_backend().await;

        let join = JoinGroupRequest {
            user_address: owner(),
            username: None,
            payment_signature: String::new(),
        };
        let err = client.join_group("g", &join).await.unwrap_err();
        assert!(err.is_unavailable());

        let err = client.register_username(&owner(), "ana").await.unwrap_err();
        assert!(err.is_unavailable());

        let delete = DeleteGroupRequest {
            owner_address: owner(),
            verification_signature: OWNER.into(),
        };
        assert!(client.delete_group("g", &delete).await.unwrap_err().is_unavailable());
    }

    #[tokio::test]
    async fn rejection_carries_status_and_message() {
        let app = Router::new().route(
            "/api/groups/:id/join",
            post(|Path(id): Path<String>, Json(body): Json<Value>| async move {
                assert_eq!(id, "g-1");
                assert_eq!(body["paymentSignature"], "");
                (StatusCode::CONFLICT, Json(json!({ "error": "Already a member of this group" })))
            }),
        );
        let client = stub(app).await;

        let join = JoinGroupRequest {
            user_address: owner(),
            username: Some("ana".into()),
            payment_signature: String::new(),
        };
        let err = client.join_group("g-1", &join).await.unwrap_err();
        assert_eq!(
            err,
            BackendError::Rejected {
                status: 409,
                message: "Already a member of this group".into()
            }
        );
        assert!(!err.is_unavailable());
    }

    #[tokio::test]
    async fn missing_profile_is_none_and_membership_parses() {
        let app = Router::new()
            .route("/api/users/:address", get(|| async { StatusCode::NOT_FOUND }))
            .route(
                "/api/groups/:id/members/:address",
                get(|| async { Json(json!({ "isMember": true })) }),
            );
        let client = stub(app).await;

        assert!(client.get_user_profile(&owner()).await.is_none());
        assert!(client.check_membership("g", &owner()).await);
    }

    #[tokio::test]
    async fn x_linking_round_trip() {
        let app = Router::new()
            .route(
                "/api/auth/x/authorize",
                get(|Query(q): Query<HashMap<String, String>>| async move {
                    assert_eq!(q.get("userAddress").map(String::as_str), Some(OWNER));
                    assert_eq!(q.get("redirect_uri").map(String::as_str), Some("oob"));
                    Json(json!({ "authUrl": "https://x.example/auth?t=abc", "oauthToken": "abc" }))
                }),
            )
            .route(
                "/api/auth/x/verify-pin",
                post(|Json(body): Json<Value>| async move {
                    assert_eq!(body["oauth_verifier"], "1234");
                    Json(json!({ "screenName": "ana_x", "userId": "99", "verified": true, "synced": true }))
                }),
            );
        let client = stub(app).await;

        let auth = client.x_authorize_url("oob", &owner()).await.unwrap();
        assert_eq!(auth.oauth_token, "abc");

        let linked = client
            .sync_x_account(&XVerifyPinRequest {
                oauth_token: auth.oauth_token,
                oauth_verifier: "1234".into(),
                user_address: owner(),
            })
            .await
            .unwrap();
        assert_eq!(linked.screen_name, "ana_x");
        assert!(linked.synced);
    }
}
