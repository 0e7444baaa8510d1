//! Bot verification against Cloudflare Turnstile.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("verification request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("verification service answered {0}")]
    Status(u16),
}

#[async_trait]
pub trait BotVerifier: Send + Sync {
    /// True only when the challenge service explicitly reports success.
    async fn verify(&self, token: &str, remote_ip: &str) -> Result<bool, VerifyError>;
}

#[derive(Serialize)]
struct SiteverifyRequest<'a> {
    secret: &'a str,
    response: &'a str,
    remoteip: &'a str,
}

pub struct TurnstileVerifier {
    client: reqwest::Client,
    url: String,
    secret: String,
}

impl TurnstileVerifier {
    pub fn new(client: reqwest::Client, url: String, secret: String) -> Self {
        Self { client, url, secret }
    }
}

#[async_trait]
impl BotVerifier for TurnstileVerifier {
    async fn verify(&self, token: &str, remote_ip: &str) -> Result<bool, VerifyError> {
        let res = self
            .client
            .post(&self.url)
            .json(&SiteverifyRequest {
                secret: &self.secret,
                response: token,
                remoteip: remote_ip,
            })
            .send()
            .await?;

        if !res.status().is_success() {
            return Err(VerifyError::Status(res.status().as_u16()));
        }

        let body: Value = res.json().await?;
        if body.get("success") != Some(&Value::Bool(true)) {
            tracing::debug!(error_codes = ?body.get("error-codes"), "turnstile rejected token");
            return Ok(false);
        }
        Ok(true)
    }
}
