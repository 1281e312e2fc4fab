//! OAuth2 (authorization code + PKCE) login with X, used to prove ownership
//! of an X account.

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::RngCore;
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::errors::ServiceError;

pub const X_SCOPES: &str = "users.read tweet.read";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationLink {
    pub url: String,
    pub code_verifier: String,
    pub state: String,
}

#[async_trait]
pub trait XOAuthClient: Send + Sync {
    /// Build the provider URL the user is sent to, with a fresh verifier and state.
    fn authorization_link(&self, redirect_uri: &str) -> Result<AuthorizationLink, ServiceError>;
    /// Trade the callback code for a token and return the authenticated username.
    async fn exchange(&self, code: &str, code_verifier: &str, redirect_uri: &str) -> Result<String, ServiceError>;
}

#[derive(Debug, Clone)]
pub struct XEndpoints {
    pub authorize_url: String,
    pub token_url: String,
    pub me_url: String,
}

impl Default for XEndpoints {
    fn default() -> Self {
        Self {
            authorize_url: "https://twitter.com/i/oauth2/authorize".into(),
            token_url: "https://api.twitter.com/2/oauth2/token".into(),
            me_url: "https://api.twitter.com/2/users/me".into(),
        }
    }
}

pub struct XOAuth2Client {
    client: reqwest::Client,
    client_id: String,
    client_secret: String,
    endpoints: XEndpoints,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct MeResponse {
    data: MeData,
}

#[derive(Deserialize)]
struct MeData {
    username: String,
}

fn random_token(len: usize) -> String {
    let mut buf = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}

/// S256 code challenge for a PKCE verifier.
pub fn code_challenge(code_verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(code_verifier.as_bytes()))
}

impl XOAuth2Client {
    pub fn new(client: reqwest::Client, client_id: String, client_secret: String, endpoints: XEndpoints) -> Self {
        Self { client, client_id, client_secret, endpoints }
    }
}

#[async_trait]
impl XOAuthClient for XOAuth2Client {
    fn authorization_link(&self, redirect_uri: &str) -> Result<AuthorizationLink, ServiceError> {
        let code_verifier = random_token(32);
        let state = random_token(24);
        let challenge = code_challenge(&code_verifier);
        let url = reqwest::Url::parse_with_params(
            &self.endpoints.authorize_url,
            &[
                ("response_type", "code"),
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", redirect_uri),
                ("scope", X_SCOPES),
                ("state", state.as_str()),
                ("code_challenge", challenge.as_str()),
                ("code_challenge_method", "S256"),
            ],
        )
        .map_err(|e| ServiceError::Internal(format!("bad authorize url: {e}")))?;
        Ok(AuthorizationLink { url: url.to_string(), code_verifier, state })
    }

    async fn exchange(&self, code: &str, code_verifier: &str, redirect_uri: &str) -> Result<String, ServiceError> {
        let token = self
            .client
            .post(&self.endpoints.token_url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", redirect_uri),
                ("code_verifier", code_verifier),
                ("client_id", self.client_id.as_str()),
            ])
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ServiceError::Unauthorized(format!("token exchange failed: {e}")))?
            .json::<TokenResponse>()
            .await
            .map_err(|e| ServiceError::Upstream(e.to_string()))?;

        let me = self
            .client
            .get(&self.endpoints.me_url)
            .query(&[("user.fields", "username")])
            .bearer_auth(&token.access_token)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ServiceError::Upstream(e.to_string()))?
            .json::<MeResponse>()
            .await
            .map_err(|e| ServiceError::Upstream(e.to_string()))?;
        Ok(me.data.username)
    }
}
