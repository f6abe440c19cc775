//! API authentication strategies.
//!
//! The game API takes a token in `X-Token` plus `X-Username` on every
//! request. Servers with a steam-key style token use [`StaticToken`];
//! private servers with a screepsmod-auth password use [`Password`], which
//! trades the password for a short lived token.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use log::{debug, info};
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use reqwest::{Client, Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use url::Url;

use crate::domain::{AuthError, TransportError};

pub const TOKEN_HEADER: &str = "X-Token";
pub const USERNAME_HEADER: &str = "X-Username";

/// Token reuse window before signing in again
pub const TOKEN_TTL: Duration = Duration::from_secs(60 * 60);

const SIGN_IN_PATH: &str = "/api/auth/signin";

#[async_trait]
pub trait AuthMethod: Send + Sync {
    fn username(&self) -> &str;

    /// Attach credentials to `request` and send it.
    async fn authenticated_request(
        &self,
        http: &Client,
        request: Request,
    ) -> Result<Response, TransportError>;

    /// A token valid against `base`, for the websocket handshake.
    async fn token(&self, http: &Client, base: &Url) -> Result<String, AuthError>;
}

fn set_credentials(request: &mut Request, username: &str, token: &str) -> Result<(), AuthError> {
    let headers = request.headers_mut();
    headers.insert(TOKEN_HEADER, HeaderValue::from_str(token)?);
    headers.insert(USERNAME_HEADER, HeaderValue::from_str(username)?);
    Ok(())
}

// ============================================================================
// Static Token
// ============================================================================

/// Fixed API token.
#[derive(Debug, Clone)]
pub struct StaticToken {
    username: String,
    token: String,
}

impl StaticToken {
    pub fn new(username: impl Into<String>, token: impl Into<String>) -> Self {
        Self { username: username.into(), token: token.into() }
    }
}

#[async_trait]
impl AuthMethod for StaticToken {
    fn username(&self) -> &str {
        &self.username
    }

    async fn authenticated_request(
        &self,
        http: &Client,
        mut request: Request,
    ) -> Result<Response, TransportError> {
        set_credentials(&mut request, &self.username, &self.token)?;
        Ok(http.execute(request).await?)
    }

    async fn token(&self, _http: &Client, _base: &Url) -> Result<String, AuthError> {
        Ok(self.token.clone())
    }
}

// ============================================================================
// Password
// ============================================================================

#[derive(Serialize)]
struct SignInRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct SignInResponse {
    #[serde(default)]
    token: String,
}

struct CachedToken {
    token: String,
    obtained: Instant,
}

/// Username/password sign-in with a cached token.
///
/// The cache lock is held across a sign-in so concurrent tasks wait for one
/// request instead of each signing in.
pub struct Password {
    username: String,
    password: String,
    cached: Mutex<Option<CachedToken>>,
}

impl Password {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self { username: username.into(), password: password.into(), cached: Mutex::new(None) }
    }

    /// Cached token, signing in when there is none or it is older than
    /// [`TOKEN_TTL`]. `force` ignores the cache.
    async fn current_token(
        &self,
        http: &Client,
        base: &Url,
        force: bool,
    ) -> Result<String, AuthError> {
        let mut cached = self.cached.lock().await;
        if let Some(entry) = cached.as_ref() {
            if !force && entry.obtained.elapsed() < TOKEN_TTL {
                return Ok(entry.token.clone());
            }
        }

        let token = self.sign_in(http, base).await?;
        *cached = Some(CachedToken { token: token.clone(), obtained: Instant::now() });
        Ok(token)
    }

    async fn sign_in(&self, http: &Client, base: &Url) -> Result<String, AuthError> {
        let url = base.join(SIGN_IN_PATH)?;
        debug!("Signing in to {url} as {}", self.username);

        let response = http
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .json(&SignInRequest { email: &self.username, password: &self.password })
            .send()
            .await?;

        let server = base.origin().ascii_serialization();
        if !response.status().is_success() {
            return Err(AuthError::Rejected(server));
        }

        let body: SignInResponse = response.json().await?;
        if body.token.is_empty() {
            return Err(AuthError::Rejected(server));
        }

        info!("Signed in to {server} as {}", self.username);
        Ok(body.token)
    }
}

#[async_trait]
impl AuthMethod for Password {
    fn username(&self) -> &str {
        &self.username
    }

    async fn authenticated_request(
        &self,
        http: &Client,
        mut request: Request,
    ) -> Result<Response, TransportError> {
        let base = request.url().clone();
        let token = self.current_token(http, &base, false).await?;
        // Bodies that cannot be cloned get no second attempt
        let retry = request.try_clone();

        set_credentials(&mut request, &self.username, &token)?;
        let response = http.execute(request).await?;

        match retry {
            Some(mut retry) if response.status() == StatusCode::UNAUTHORIZED => {
                debug!("Token for {} expired early, signing in again", self.username);
                let token = self.current_token(http, &base, true).await?;
                set_credentials(&mut retry, &self.username, &token)?;
                Ok(http.execute(retry).await?)
            }
            _ => Ok(response),
        }
    }

    async fn token(&self, http: &Client, base: &Url) -> Result<String, AuthError> {
        self.current_token(http, base, false).await
    }
}
