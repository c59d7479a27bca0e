use std::future::Future;

use reqwest::{Client, Response};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::{
    config::BackendConfig,
    error::{AppError, Result},
    services::auth::{ChallengeTemplate, Token},
};

/// Backend operations the binding flow depends on.
pub trait AuthBackend: Send + Sync {
    fn request_nonce(
        &self,
        wallet_address: &str,
    ) -> impl Future<Output = Result<ChallengeTemplate>> + Send;

    fn exchange_signature(
        &self,
        wallet_address: &str,
        nonce: &str,
        signature: &str,
    ) -> impl Future<Output = Result<Token>> + Send;
}

#[derive(Serialize)]
struct NonceRequest<'a> {
    wallet_address: &'a str,
}

#[derive(Serialize)]
struct ExchangeRequest<'a> {
    wallet_address: &'a str,
    nonce: &'a str,
    signature: &'a str,
}

#[derive(Debug, Clone)]
pub struct BackendAuthClient {
    client: Client,
    nonce_url: String,
    token_url: String,
}

impl BackendAuthClient {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let client = Client::builder().timeout(config.request_timeout).build()?;

        let base_url = config.base_url.trim_end_matches('/');

        Ok(Self {
            client,
            nonce_url: format!("{base_url}{}", config.nonce_path),
            token_url: format!("{base_url}{}", config.token_path),
        })
    }

    async fn post_json<T: Serialize>(&self, url: &str, body: &T) -> Result<Value> {
        let response = self.client.post(url).json(body).send().await?;
        read_payload(response).await
    }
}

impl AuthBackend for BackendAuthClient {
    async fn request_nonce(&self, wallet_address: &str) -> Result<ChallengeTemplate> {
        info!(wallet = %wallet_address, "Requesting bind nonce");

        let payload = self
            .post_json(&self.nonce_url, &NonceRequest { wallet_address })
            .await?;

        serde_json::from_value(payload).map_err(|e| AppError::Parse(e.to_string()))
    }

    async fn exchange_signature(
        &self,
        wallet_address: &str,
        nonce: &str,
        signature: &str,
    ) -> Result<Token> {
        info!(wallet = %wallet_address, "Exchanging wallet signature for token");

        let payload = self
            .post_json(
                &self.token_url,
                &ExchangeRequest {
                    wallet_address,
                    nonce,
                    signature,
                },
            )
            .await?;

        Token::from_value(payload)
    }
}

/// Maps an HTTP response to its payload, turning non-2xx statuses and
/// application-level failure envelopes into [`AppError::Server`].
async fn read_payload(response: Response) -> Result<Value> {
    let status = response.status();
    let text = response.text().await?;
    debug!(status = %status, "Backend responded");

    let body: Option<Value> = serde_json::from_str(&text).ok();

    if !status.is_success() {
        let (code, message) = body
            .as_ref()
            .map(error_fields)
            .unwrap_or((None, None));

        warn!(status = %status, code = ?code, "Backend rejected request");

        return Err(AppError::Server {
            status: status.as_u16(),
            code,
            message: message.unwrap_or_else(|| {
                status
                    .canonical_reason()
                    .unwrap_or("request failed")
                    .to_string()
            }),
        });
    }

    let body = body.ok_or_else(|| AppError::Parse("Backend response is not JSON".into()))?;
    unwrap_envelope(status.as_u16(), body)
}

fn unwrap_envelope(status: u16, body: Value) -> Result<Value> {
    let Value::Object(mut map) = body else {
        return Ok(body);
    };

    let is_envelope = map.contains_key("data")
        && (map.contains_key("code") || map.contains_key("success"));
    if !is_envelope {
        return Ok(Value::Object(map));
    }

    let failed = match (map.get("success"), map.get("code")) {
        (Some(Value::Bool(false)), _) => true,
        (_, Some(code)) => !is_ok_code(code),
        _ => false,
    };

    if failed {
        let (code, message) = error_fields(&Value::Object(map));
        return Err(AppError::Server {
            status,
            code,
            message: message.unwrap_or_else(|| "request failed".to_string()),
        });
    }

    Ok(map.remove("data").unwrap_or(Value::Null))
}

fn is_ok_code(code: &Value) -> bool {
    match code {
        Value::Number(n) => matches!(n.as_i64(), Some(0) | Some(200)),
        Value::String(s) => matches!(s.as_str(), "0" | "200" | "ok" | "OK" | "success"),
        Value::Null => true,
        _ => false,
    }
}

fn error_fields(body: &Value) -> (Option<String>, Option<String>) {
    let text = |key: &str| match body.get(key) {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    };

    let code = text("code").or_else(|| text("error"));
    let message = text("message")
        .or_else(|| text("error_description"))
        .or_else(|| text("error"));

    (code, message)
}
