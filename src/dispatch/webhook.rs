use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::signing::sign_body;
use super::{Dispatcher, Notifier};
use crate::error::DispatchError;
use crate::logging::ts_epoch_ms;
use crate::model::{Campaign, Target};
use crate::retry::{is_retryable_http_error, retry_async, RetryConfig};

/// Forwards grant/revoke/announce requests to an HTTP endpoint that owns
/// the real platform binding. Bodies are signed with `X-Signature`.
#[derive(Clone)]
pub struct WebhookDispatcher {
    client: Client,
    url: String,
    secret: Option<String>,
    retry: RetryConfig,
}

impl WebhookDispatcher {
    pub fn new(url: String, secret: Option<String>) -> Self {
        Self {
            client: Client::new(),
            url,
            secret,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    async fn post_once(&self, body: &[u8]) -> Result<(), DispatchError> {
        let mut req = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .body(body.to_vec());
        if let Some(secret) = &self.secret {
            let sig = sign_body(body, secret).map_err(DispatchError::Unavailable)?;
            req = req.header("X-Signature", sig);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| DispatchError::Unavailable(format!("request failed: {}", e)))?;
        let status = resp.status().as_u16();
        if resp.status().is_success() {
            return Ok(());
        }
        let text = resp.text().await.unwrap_or_default();
        Err(classify_status(status, &text))
    }

    async fn post(&self, op: &str, payload: Value) -> Result<(), DispatchError> {
        let bytes = payload.to_string().into_bytes();
        let body: &[u8] = &bytes;
        retry_async(
            &self.retry,
            op,
            |e: &DispatchError| matches!(e, DispatchError::Unavailable(_)),
            || self.post_once(body),
        )
        .await
    }
}

/// Map a non-success HTTP status onto the dispatcher taxonomy.
pub(crate) fn classify_status(status: u16, body: &str) -> DispatchError {
    let detail = if body.is_empty() {
        format!("HTTP {}", status)
    } else {
        format!("HTTP {}: {}", status, body)
    };
    match status {
        401 | 403 => DispatchError::PermissionDenied(detail),
        404 | 410 => DispatchError::TargetMissing(detail),
        s if is_retryable_http_error(s) => DispatchError::Unavailable(detail),
        _ => DispatchError::PermissionDenied(detail),
    }
}

fn capability_payload(op: &str, capability_id: &str, target: &Target) -> Value {
    json!({
        "op": op,
        "capability_id": capability_id,
        "scope_id": target.scope_id,
        "member_id": target.member_id,
        "ts_ms": ts_epoch_ms(),
    })
}

#[async_trait]
impl Dispatcher for WebhookDispatcher {
    async fn grant(&self, capability_id: &str, target: &Target) -> Result<(), DispatchError> {
        self.post("grant", capability_payload("grant", capability_id, target)).await
    }

    async fn revoke(&self, capability_id: &str, target: &Target) -> Result<(), DispatchError> {
        self.post("revoke", capability_payload("revoke", capability_id, target)).await
    }
}

#[async_trait]
impl Notifier for WebhookDispatcher {
    async fn announce(&self, campaign: &Campaign, winners: &[String]) -> Result<(), DispatchError> {
        self.post(
            "announce",
            json!({
                "op": "announce",
                "campaign_id": campaign.id,
                "scope_id": campaign.scope_id,
                "channel_id": campaign.channel_id,
                "message_id": campaign.message_id,
                "prize": campaign.prize,
                "winners": winners,
                "ts_ms": ts_epoch_ms(),
            }),
        )
        .await
    }
}
