//! HTTP adapters for the dispatch service.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use dispatch::{AttemptKind, Contact, ContactsResponse, DispatchResponse, MessageResponse, NewContact};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};

use crate::capabilities::{DispatchRequest, Dispatcher};
use crate::errors::DispatchError;

const AUDIO_FILENAME: &str = "sos.wav";

fn build_client(timeout: Duration) -> reqwest::Result<Client> {
    Client::builder().timeout(timeout).build()
}

/// Posts each attempt to `/api/sos` or `/api/sos-delayed`.
#[derive(Debug, Clone)]
pub struct HttpDispatcher {
    client: Client,
    base_url: String,
}

impl HttpDispatcher {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, DispatchError> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, kind: AttemptKind) -> String {
        match kind {
            AttemptKind::Immediate => format!("{}/api/sos", self.base_url),
            AttemptKind::Delayed => format!("{}/api/sos-delayed", self.base_url),
        }
    }

    fn form(request: DispatchRequest) -> Result<Form, DispatchError> {
        let mut form = Form::new()
            .text("lat", request.coordinates.lat.to_string())
            .text("lng", request.coordinates.lng.to_string());

        match request.kind {
            AttemptKind::Immediate => form = form.text("messageType", AttemptKind::Immediate.as_str()),
            AttemptKind::Delayed => {
                if let Some(url) = request.prior_recording_url {
                    form = form.text("originalRecordingUrl", url);
                }
            }
        }

        if let Some(clip) = request.audio {
            let part = Part::bytes(clip.bytes)
                .file_name(AUDIO_FILENAME)
                .mime_str(&clip.content_type)
                .map_err(|e| {
                    DispatchError::Rejected(format!(
                        "invalid audio content type {}: {e}",
                        clip.content_type
                    ))
                })?;
            form = form.part("audio", part);
        }
        Ok(form)
    }
}

#[async_trait]
impl Dispatcher for HttpDispatcher {
    async fn dispatch(&self, request: DispatchRequest) -> Result<DispatchResponse, DispatchError> {
        let url = self.endpoint(request.kind);
        let attempt = request.attempt;
        let form = Self::form(request)?;

        tracing::debug!(%url, attempt, "Posting SOS");
        let response = self.client.post(&url).multipart(form).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DispatchError::Status {
                status: status.as_u16(),
                message: error_message(response).await,
            });
        }

        let body: DispatchResponse = response
            .json()
            .await
            .map_err(|e| DispatchError::Decode(e.to_string()))?;
        if !body.success {
            return Err(DispatchError::Rejected(body.message));
        }
        Ok(body)
    }
}

/// `message` of a `{success:false, message}` body, or the status reason.
async fn error_message(response: Response) -> String {
    let reason = response
        .status()
        .canonical_reason()
        .unwrap_or("request failed")
        .to_string();
    match response.json::<MessageResponse>().await {
        Ok(body) if !body.message.is_empty() => body.message,
        _ => reason,
    }
}

/// Client for the contact endpoints.
#[derive(Debug, Clone)]
pub struct ContactsClient {
    client: Client,
    base_url: String,
}

impl ContactsClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout).context("Failed to build HTTP client")?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub async fn list(&self) -> Result<Vec<Contact>> {
        let response = self
            .client
            .get(format!("{}/api/contacts", self.base_url))
            .send()
            .await
            .context("Failed to reach dispatch service")?;
        let response = ensure_success(response).await?;
        let body: ContactsResponse = response
            .json()
            .await
            .context("Failed to parse contacts response")?;
        Ok(body.contacts)
    }

    pub async fn add(&self, name: &str, phone: &str) -> Result<String> {
        let body = NewContact {
            name: name.to_string(),
            phone: phone.to_string(),
        };
        let response = self
            .client
            .post(format!("{}/api/add-contact", self.base_url))
            .json(&body)
            .send()
            .await
            .context("Failed to reach dispatch service")?;
        message_of(response).await
    }

    pub async fn delete(&self, id: &str) -> Result<String> {
        let response = self
            .client
            .delete(format!("{}/api/contacts/{id}", self.base_url))
            .send()
            .await
            .context("Failed to reach dispatch service")?;
        message_of(response).await
    }

    pub async fn clear(&self) -> Result<String> {
        let response = self
            .client
            .delete(format!("{}/api/contacts", self.base_url))
            .send()
            .await
            .context("Failed to reach dispatch service")?;
        message_of(response).await
    }
}

async fn ensure_success(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = error_message(response).await;
    bail!("{message} ({status})")
}

async fn message_of(response: Response) -> Result<String> {
    let response = ensure_success(response).await?;
    let body: MessageResponse = response
        .json()
        .await
        .context("Failed to parse response")?;
    Ok(body.message)
}
