//! Messaging provider: "send message" and "place call" as a capability.
//!
//! `TwilioMessenger` speaks the Twilio REST API directly over `reqwest`.
//! Each call is a single attempt; delivery retries are the provider's job.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

/// Provider acknowledgement for an accepted message or call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderReceipt {
    pub sid: String,
}

/// Provider-level rejection or transport failure for one recipient.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct ProviderError {
    pub message: String,
    pub code: Option<i64>,
}

impl ProviderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    pub fn with_code(mut self, code: i64) -> Self {
        self.code = Some(code);
        self
    }
}

pub type SharedMessenger = Arc<dyn Messenger>;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send_sms(&self, to: &str, body: &str) -> Result<ProviderReceipt, ProviderError>;

    /// Place a voice call whose script is fetched from `script_url`.
    async fn place_call(&self, to: &str, script_url: &str)
        -> Result<ProviderReceipt, ProviderError>;
}

/// Credentials and sender number for the Twilio account.
#[derive(Debug, Clone)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: String,
    pub from_number: String,
    pub api_base: String,
}

impl TwilioConfig {
    /// Account SIDs always start with `AC`; anything else is a placeholder.
    pub fn is_valid(&self) -> bool {
        self.account_sid.starts_with("AC")
            && !self.auth_token.is_empty()
            && !self.from_number.is_empty()
    }
}

/// Body Twilio returns on success (only the SID matters here).
#[derive(Debug, Deserialize)]
struct TwilioResource {
    sid: String,
}

/// Body Twilio returns on a 4xx/5xx.
#[derive(Debug, Deserialize)]
struct TwilioErrorBody {
    message: Option<String>,
    code: Option<i64>,
}

pub struct TwilioMessenger {
    config: TwilioConfig,
    client: reqwest::Client,
}

impl TwilioMessenger {
    pub fn new(config: TwilioConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self { config, client })
    }

    /// Build a messenger only when the credentials look real.
    pub fn from_config(config: TwilioConfig) -> Option<Self> {
        if !config.is_valid() {
            return None;
        }
        match Self::new(config) {
            Ok(m) => Some(m),
            Err(e) => {
                tracing::warn!("Failed to build provider HTTP client: {e}");
                None
            }
        }
    }

    fn resource_url(&self, resource: &str) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/{}.json",
            self.config.api_base.trim_end_matches('/'),
            self.config.account_sid,
            resource
        )
    }

    async fn create(
        &self,
        resource: &str,
        form: &[(&str, &str)],
    ) -> Result<ProviderReceipt, ProviderError> {
        let resp = self
            .client
            .post(self.resource_url(resource))
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .form(form)
            .send()
            .await
            .map_err(|e| ProviderError::new(format!("provider request failed: {e}")))?;

        let status = resp.status();
        if status.is_success() {
            let body: TwilioResource = resp
                .json()
                .await
                .map_err(|e| ProviderError::new(format!("invalid provider response: {e}")))?;
            return Ok(ProviderReceipt { sid: body.sid });
        }

        let err = match resp.json::<TwilioErrorBody>().await {
            Ok(TwilioErrorBody { message, code }) => ProviderError {
                message: message.unwrap_or_else(|| format!("provider returned {status}")),
                code,
            },
            Err(_) => ProviderError::new(format!("provider returned {status}")),
        };
        Err(err)
    }
}

#[async_trait]
impl Messenger for TwilioMessenger {
    async fn send_sms(&self, to: &str, body: &str) -> Result<ProviderReceipt, ProviderError> {
        self.create(
            "Messages",
            &[("To", to), ("From", &self.config.from_number), ("Body", body)],
        )
        .await
    }

    async fn place_call(
        &self,
        to: &str,
        script_url: &str,
    ) -> Result<ProviderReceipt, ProviderError> {
        self.create(
            "Calls",
            &[("To", to), ("From", &self.config.from_number), ("Url", script_url)],
        )
        .await
    }
}
