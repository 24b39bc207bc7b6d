//! Outbound calls to the automation service.
//!
//! [`WebhookForwarder`] POSTs a JSON body to the URL configured for a step and
//! relays the JSON reply untouched. [`ApiTrigger`] reaches the same webhooks
//! through a running server's proxy routes. Both implement [`Trigger`], the
//! seam the coordinator uses to start a step.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::{error, info};

use crate::config::WebhookConfig;
use crate::error::{FlowError, Result};
use crate::pipeline::StepSpec;

// ---------------------------------------------------------------------------
// ForwardError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("{0}")]
    NotConfigured(&'static str),

    #[error("Webhook request timed out after {0} seconds")]
    Timeout(u64),

    #[error("Webhook request failed with status {status}")]
    Upstream { status: u16, body: String },

    #[error("Failed to reach webhook: {0}")]
    Transport(String),

    #[error("Webhook returned invalid JSON: {0}")]
    InvalidJson(String),
}

impl From<ForwardError> for FlowError {
    fn from(e: ForwardError) -> Self {
        match e {
            ForwardError::NotConfigured(msg) => FlowError::WebhookNotConfigured(msg.to_string()),
            other => FlowError::Upstream(other.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// WebhookForwarder
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct WebhookForwarder {
    client: reqwest::Client,
    targets: WebhookConfig,
    timeout: Duration,
}

impl WebhookForwarder {
    pub fn new(client: reqwest::Client, targets: WebhookConfig, timeout: Duration) -> Self {
        Self {
            client,
            targets,
            timeout,
        }
    }

    pub fn is_configured(&self, spec: &StepSpec) -> bool {
        self.targets.url_for(spec.number).is_some()
    }

    /// Forward `body` verbatim to the step's webhook and return its JSON reply.
    pub async fn forward(&self, spec: &StepSpec, body: &Value) -> std::result::Result<Value, ForwardError> {
        let Some(url) = self.targets.url_for(spec.number) else {
            error!(step = spec.number.get(), env = spec.env_var, "webhook URL not configured");
            return Err(ForwardError::NotConfigured(spec.not_configured_message));
        };

        info!(step = spec.number.get(), url = %url, "forwarding to webhook");
        let resp = self
            .client
            .post(url)
            .json(body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    error!(url = %url, timeout_secs = self.timeout.as_secs(), "webhook timed out");
                    ForwardError::Timeout(self.timeout.as_secs())
                } else {
                    error!(url = %url, error = %e, "webhook transport failure");
                    ForwardError::Transport(e.to_string())
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            let headers = format!("{:?}", resp.headers());
            let body = resp.text().await.unwrap_or_default();
            error!(
                url = %url,
                status = status.as_u16(),
                headers = %headers,
                body = %body,
                "webhook returned an error status"
            );
            return Err(ForwardError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        let text = resp.text().await.map_err(|e| {
            if e.is_timeout() {
                ForwardError::Timeout(self.timeout.as_secs())
            } else {
                ForwardError::Transport(e.to_string())
            }
        })?;
        let reply: Value = serde_json::from_str(&text).map_err(|e| {
            error!(url = %url, body = %text, "webhook returned invalid JSON");
            ForwardError::InvalidJson(e.to_string())
        })?;

        info!(
            step = spec.number.get(),
            cost = ?reply.get("cost"),
            processing_cost = ?reply.get("processing_cost"),
            price = ?reply.get("price"),
            "webhook succeeded"
        );
        Ok(reply)
    }
}

// ---------------------------------------------------------------------------
// Trigger
// ---------------------------------------------------------------------------

/// Starts a step's external job and returns the acknowledgement body.
#[async_trait]
pub trait Trigger: Send + Sync {
    async fn trigger(&self, spec: &'static StepSpec, payload: &Value) -> Result<Value>;
}

#[async_trait]
impl Trigger for WebhookForwarder {
    async fn trigger(&self, spec: &'static StepSpec, payload: &Value) -> Result<Value> {
        Ok(self.forward(spec, payload).await?)
    }
}

/// Triggers through a running server's `/api/webhook/*` proxy routes.
pub struct ApiTrigger {
    client: reqwest::Client,
    base: String,
}

impl ApiTrigger {
    pub fn new(client: reqwest::Client, base: impl Into<String>) -> Self {
        Self {
            client,
            base: base.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl Trigger for ApiTrigger {
    async fn trigger(&self, spec: &'static StepSpec, payload: &Value) -> Result<Value> {
        let url = format!("{}{}", self.base, spec.trigger_path());
        let resp = self
            .client
            .post(&url)
            .json(payload)
            .send()
            .await
            .map_err(|e| FlowError::Upstream(e.to_string()))?;
        let status = resp.status();
        let body: Value = resp
            .json()
            .await
            .map_err(|e| FlowError::Upstream(e.to_string()))?;
        if status.is_success() {
            return Ok(body);
        }
        let message = body
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("webhook request failed")
            .to_string();
        if message == spec.not_configured_message {
            return Err(FlowError::WebhookNotConfigured(message));
        }
        Err(FlowError::Upstream(message))
    }
}
