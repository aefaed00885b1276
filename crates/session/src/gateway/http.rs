//! JSON-over-HTTP identity gateway.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{RequestBuilder, StatusCode};
use serde::Deserialize;

use stockdesk_auth::User;

use super::{GatewayError, IdentityGateway};
use crate::types::{Credentials, LoginResponse, PasswordChange, ProfileUpdate, Token};

/// Response envelope used by every auth endpoint:
/// `{ "success": bool, "token"?: string, "user"?: User, "message"?: string }`.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default = "default_success")]
    success: bool,
    #[serde(default)]
    token: Option<Token>,
    #[serde(default)]
    user: Option<User>,
    #[serde(default)]
    message: Option<String>,
}

fn default_success() -> bool {
    true
}

impl Envelope {
    fn empty() -> Self {
        Self {
            success: true,
            token: None,
            user: None,
            message: None,
        }
    }

    fn require_user(self) -> Result<User, GatewayError> {
        self.user
            .ok_or_else(|| GatewayError::server("response is missing the user record"))
    }
}

/// Client for the identity endpoints of the console API.
#[derive(Debug, Clone)]
pub struct HttpGateway {
    api_url: String,
    client: reqwest::Client,
}

impl HttpGateway {
    /// Build a gateway with a per-request timeout (the only timeout in the
    /// session core).
    pub fn new(api_url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(api_url, client))
    }

    pub fn with_client(api_url: impl Into<String>, client: reqwest::Client) -> Self {
        let api_url = api_url.into().trim_end_matches('/').to_string();
        Self { api_url, client }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_url, path)
    }

    async fn send(&self, req: RequestBuilder) -> Result<Envelope, GatewayError> {
        let resp = req
            .send()
            .await
            .map_err(|e| GatewayError::network(e.to_string()))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| GatewayError::network(e.to_string()))?;

        if !status.is_success() {
            let message = serde_json::from_str::<Envelope>(&body)
                .ok()
                .and_then(|env| env.message)
                .unwrap_or_else(|| {
                    status
                        .canonical_reason()
                        .unwrap_or("request failed")
                        .to_string()
                });
            return Err(error_for_status(status, message));
        }

        let envelope = if body.trim().is_empty() {
            Envelope::empty()
        } else {
            serde_json::from_str::<Envelope>(&body)
                .map_err(|e| GatewayError::server(format!("malformed gateway response: {e}")))?
        };

        if !envelope.success {
            return Err(GatewayError::validation(
                envelope
                    .message
                    .unwrap_or_else(|| "request was rejected".to_string()),
            ));
        }

        Ok(envelope)
    }
}

fn error_for_status(status: StatusCode, message: String) -> GatewayError {
    match status {
        // 403 means the request was refused, not that the token is dead.
        StatusCode::UNAUTHORIZED => GatewayError::unauthorized(message),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            GatewayError::validation(message)
        }
        _ => GatewayError::server(format!("{} ({})", message, status.as_u16())),
    }
}

#[async_trait]
impl IdentityGateway for HttpGateway {
    async fn login(&self, credentials: &Credentials) -> Result<LoginResponse, GatewayError> {
        tracing::debug!(identifier = %credentials.identifier, "gateway login");
        let envelope = self
            .send(self.client.post(self.url("/auth/login")).json(credentials))
            .await?;

        let token = envelope
            .token
            .clone()
            .ok_or_else(|| GatewayError::server("login response is missing the token"))?;
        let user = envelope.require_user()?;

        Ok(LoginResponse { token, user })
    }

    async fn current_user(&self, token: &Token) -> Result<User, GatewayError> {
        self.send(
            self.client
                .get(self.url("/auth/me"))
                .bearer_auth(token.as_str()),
        )
        .await?
        .require_user()
    }

    async fn logout(&self, token: &Token) -> Result<(), GatewayError> {
        self.send(
            self.client
                .post(self.url("/auth/logout"))
                .bearer_auth(token.as_str()),
        )
        .await
        .map(|_| ())
    }

    async fn update_profile(
        &self,
        token: &Token,
        update: &ProfileUpdate,
    ) -> Result<User, GatewayError> {
        self.send(
            self.client
                .put(self.url("/auth/profile"))
                .bearer_auth(token.as_str())
                .json(update),
        )
        .await?
        .require_user()
    }

    async fn change_password(
        &self,
        token: &Token,
        change: &PasswordChange,
    ) -> Result<(), GatewayError> {
        self.send(
            self.client
                .put(self.url("/auth/password"))
                .bearer_auth(token.as_str())
                .json(change),
        )
        .await
        .map(|_| ())
    }
}
