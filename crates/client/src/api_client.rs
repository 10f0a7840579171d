//! REST transport for the one-shot API calls.
//!
//! The client treats REST as an opaque collaborator: [`RestTransport`] is the
//! seam, [`ApiClient`] the `reqwest` implementation. Rate limiting is left to
//! the server's 429 responses, which surface as [`ApiError::Http`].

use async_trait::async_trait;
use hearth_shared::{
    ApiError, AppInfo, CreateGuildRequest, Guild, Invite, Snowflake, Template, User, UserProfile,
    Webhook,
};
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// One-shot request/response calls the client forwards.
#[async_trait]
pub trait RestTransport: Send + Sync {
    async fn create_guild(&self, request: &CreateGuildRequest) -> Result<Guild, ApiError>;
    async fn get_invite(&self, code: &str, with_counts: bool) -> Result<Invite, ApiError>;
    async fn delete_invite(&self, code: &str) -> Result<Invite, ApiError>;
    async fn application_info(&self) -> Result<AppInfo, ApiError>;
    async fn get_user_info(&self, user_id: Snowflake) -> Result<User, ApiError>;
    async fn get_user_profile(&self, user_id: Snowflake) -> Result<UserProfile, ApiError>;
    async fn get_webhook_info(&self, webhook_id: Snowflake) -> Result<Webhook, ApiError>;
    async fn fetch_template(&self, code: &str) -> Result<Template, ApiError>;
    async fn create_guild_from_template(
        &self,
        code: &str,
        request: &CreateGuildRequest,
    ) -> Result<Guild, ApiError>;
}

/// Strip an invite URL (`https://discord.gg/abc`, `discord.com/invite/abc`)
/// down to its code. Bare codes pass through.
pub fn resolve_invite(invite: &str) -> &str {
    resolve_code(invite, "invite")
}

/// Strip a template URL (`https://discord.new/abc`,
/// `discord.com/template/abc`) down to its code.
pub fn resolve_template(template: &str) -> &str {
    resolve_code(template, "template")
}

fn resolve_code<'a>(input: &'a str, segment: &str) -> &'a str {
    let trimmed = input.trim().trim_end_matches('/');
    let without_scheme = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"))
        .unwrap_or(trimmed);

    match without_scheme.rsplit_once('/') {
        Some((host, code)) if host.contains('.') || host.ends_with(segment) => code,
        _ => without_scheme,
    }
}

/// HTTP client for the REST API, authenticated with a bot token.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    token: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            token: token.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        let base = self.base_url.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        format!("{base}/{path}")
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, self.url(path))
            .header("Authorization", format!("Bot {}", self.token))
            .header("User-Agent", concat!("hearth (", env!("CARGO_PKG_VERSION"), ")"))
    }

    async fn send<TRes: DeserializeOwned>(&self, rb: RequestBuilder) -> Result<TRes, ApiError> {
        let resp = rb.send().await.map_err(|e| ApiError::Network(e.to_string()))?;

        let status = resp.status().as_u16();
        let is_success = resp.status().is_success();
        let text = resp
            .text()
            .await
            .map_err(|e| ApiError::Network(format!("failed to read body: {e}")))?;

        if !is_success {
            tracing::debug!(status, body = %text, "REST request failed");
            return Err(ApiError::Http { status, body: text });
        }

        if text.is_empty() {
            serde_json::from_str("null").map_err(|e| ApiError::Deserialize(e.to_string()))
        } else {
            serde_json::from_str(&text).map_err(|e| ApiError::Deserialize(e.to_string()))
        }
    }

    pub async fn get_json<TRes: DeserializeOwned>(&self, path: &str) -> Result<TRes, ApiError> {
        self.send(self.request(Method::GET, path)).await
    }

    pub async fn post_json<TReq: Serialize, TRes: DeserializeOwned>(
        &self,
        path: &str,
        body: &TReq,
    ) -> Result<TRes, ApiError> {
        let body_bytes =
            serde_json::to_vec(body).map_err(|e| ApiError::Deserialize(e.to_string()))?;
        let rb = self
            .request(Method::POST, path)
            .header("Content-Type", "application/json")
            .body(body_bytes);
        self.send(rb).await
    }

    pub async fn delete_json<TRes: DeserializeOwned>(&self, path: &str) -> Result<TRes, ApiError> {
        self.send(self.request(Method::DELETE, path)).await
    }
}

#[async_trait]
impl RestTransport for ApiClient {
    async fn create_guild(&self, request: &CreateGuildRequest) -> Result<Guild, ApiError> {
        self.post_json("/guilds", request).await
    }

    async fn get_invite(&self, code: &str, with_counts: bool) -> Result<Invite, ApiError> {
        let code = urlencoding::encode(resolve_invite(code));
        self.get_json(&format!("/invites/{code}?with_counts={with_counts}"))
            .await
    }

    async fn delete_invite(&self, code: &str) -> Result<Invite, ApiError> {
        let code = urlencoding::encode(resolve_invite(code));
        self.delete_json(&format!("/invites/{code}")).await
    }

    async fn application_info(&self) -> Result<AppInfo, ApiError> {
        self.get_json("/oauth2/applications/@me").await
    }

    async fn get_user_info(&self, user_id: Snowflake) -> Result<User, ApiError> {
        self.get_json(&format!("/users/{user_id}")).await
    }

    async fn get_user_profile(&self, user_id: Snowflake) -> Result<UserProfile, ApiError> {
        self.get_json(&format!("/users/{user_id}/profile")).await
    }

    async fn get_webhook_info(&self, webhook_id: Snowflake) -> Result<Webhook, ApiError> {
        self.get_json(&format!("/webhooks/{webhook_id}")).await
    }

    async fn fetch_template(&self, code: &str) -> Result<Template, ApiError> {
        let code = urlencoding::encode(resolve_template(code));
        self.get_json(&format!("/guilds/templates/{code}")).await
    }

    async fn create_guild_from_template(
        &self,
        code: &str,
        request: &CreateGuildRequest,
    ) -> Result<Guild, ApiError> {
        let code = urlencoding::encode(resolve_template(code));
        self.post_json(&format!("/guilds/templates/{code}"), request)
            .await
    }
}
