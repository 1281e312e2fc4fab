//! Signature verification against redundant chain oracles.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::ServiceError;
use crate::giveaway::domain::Address;
use crate::storage::codec::hex_bytes;

/// Checks that `signature` over `message` was produced by `address`.
#[async_trait]
pub trait SignatureVerifier: Send + Sync {
    async fn verify(&self, address: &Address, message: &str, signature: &[u8]) -> Result<bool, ServiceError>;
}

/// Accepts when any one verifier accepts. A verifier that errors counts as
/// not accepting.
pub struct AnyOfVerifiers {
    verifiers: Vec<(String, Arc<dyn SignatureVerifier>)>,
}

impl AnyOfVerifiers {
    pub fn new(verifiers: Vec<(String, Arc<dyn SignatureVerifier>)>) -> Self {
        Self { verifiers }
    }

    pub fn len(&self) -> usize {
        self.verifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.verifiers.is_empty()
    }
}

#[async_trait]
impl SignatureVerifier for AnyOfVerifiers {
    async fn verify(&self, address: &Address, message: &str, signature: &[u8]) -> Result<bool, ServiceError> {
        let checks = self.verifiers.iter().map(|(name, v)| async move {
            match v.verify(address, message, signature).await {
                Ok(valid) => {
                    debug!(verifier = %name, %address, valid, "signature checked");
                    valid
                }
                Err(e) => {
                    warn!(verifier = %name, %address, error = %e, "verifier unavailable");
                    false
                }
            }
        });
        Ok(join_all(checks).await.into_iter().any(|valid| valid))
    }
}

#[derive(Serialize)]
struct VerifyRequest<'a> {
    address: String,
    message: &'a str,
    signature: String,
}

#[derive(Deserialize)]
struct VerifyResponse {
    valid: bool,
}

/// Asks one chain's verification oracle over HTTP.
///
/// POSTs `{address, message, signature}` and expects `{"valid": bool}`.
pub struct HttpSignatureVerifier {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpSignatureVerifier {
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self { client, endpoint: endpoint.into() }
    }
}

#[async_trait]
impl SignatureVerifier for HttpSignatureVerifier {
    async fn verify(&self, address: &Address, message: &str, signature: &[u8]) -> Result<bool, ServiceError> {
        let body = VerifyRequest { address: address.to_string(), message, signature: hex_bytes::encode(signature) };
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ServiceError::Upstream(e.to_string()))?;
        let parsed = resp
            .json::<VerifyResponse>()
            .await
            .map_err(|e| ServiceError::Upstream(e.to_string()))?;
        Ok(parsed.valid)
    }
}
