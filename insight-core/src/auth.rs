//! Bearer credential resolution.
//!
//! Sessions are issued elsewhere; this module only asks the identity
//! endpoint which user a token belongs to.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::models::TenantId;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Authorization token required")]
    MissingCredential,

    #[error("Unauthorized user")]
    InvalidCredential,

    #[error("Identity service error: {0}")]
    Upstream(String),
}

/// Resolves a bearer token into the tenant it belongs to.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn resolve(&self, token: &str) -> Result<TenantId, AuthError>;
}

/// Extract the token from an `Authorization` header value.
///
/// Accepts `Bearer <token>` (any case) and rejects empty tokens.
pub fn bearer_token(header: Option<&str>) -> Result<&str, AuthError> {
    let header = header.map(str::trim).filter(|h| !h.is_empty());
    let Some(header) = header else {
        return Err(AuthError::MissingCredential);
    };

    let token = match header.split_once(' ') {
        Some((scheme, rest)) if scheme.eq_ignore_ascii_case("bearer") => rest.trim(),
        None if header.eq_ignore_ascii_case("bearer") => "",
        _ => header,
    };

    if token.is_empty() {
        return Err(AuthError::MissingCredential);
    }
    Ok(token)
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    id: Uuid,
}

/// Asks `GET {url}/auth/v1/user` who owns the token.
#[derive(Debug, Clone)]
pub struct RemoteAuthenticator {
    client: Client,
    base_url: String,
    service_key: String,
}

impl RemoteAuthenticator {
    pub fn new(config: &AuthConfig) -> Result<Self, AuthError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AuthError::Upstream(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            service_key: config.service_key.clone(),
        })
    }
}

#[async_trait]
impl Authenticator for RemoteAuthenticator {
    async fn resolve(&self, token: &str) -> Result<TenantId, AuthError> {
        let url = format!("{}/auth/v1/user", self.base_url);

        let response = self
            .client
            .get(&url)
            .header("apikey", &self.service_key)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| AuthError::Upstream(e.to_string()))?;

        let status = response.status();
        if status.is_client_error() {
            tracing::debug!(status = status.as_u16(), "Token rejected by identity service");
            return Err(AuthError::InvalidCredential);
        }
        if !status.is_success() {
            return Err(AuthError::Upstream(format!("status {}", status.as_u16())));
        }

        let user: UserResponse = response
            .json()
            .await
            .map_err(|_| AuthError::InvalidCredential)?;

        Ok(TenantId(user.id))
    }
}
