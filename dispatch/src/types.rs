//! Wire types shared by the dispatch service and its clients.
//!
//! Field names follow the JSON the HTTP surface has always spoken
//! (`smsResults`, `recordingUrl`, `_id`), so existing callers keep working.

use serde::{Deserialize, Serialize};

/// A position in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinates {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Link that opens the position in a map viewer.
    pub fn maps_link(&self) -> String {
        format!("https://www.google.com/maps?q={},{}", self.lat, self.lng)
    }
}

/// Whether a dispatch is the user-triggered alert or an automatic follow-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AttemptKind {
    #[default]
    Immediate,
    Delayed,
}

impl AttemptKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Immediate => "immediate",
            Self::Delayed => "delayed",
        }
    }
}

impl std::fmt::Display for AttemptKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An emergency contact as held by the contact store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    pub phone: String,
}

/// Body of `POST /api/add-contact`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewContact {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub phone: String,
}

/// Notification channel used for one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Sms,
    Call,
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sms => write!(f, "sms"),
            Self::Call => write!(f, "call"),
        }
    }
}

/// Provider outcome for one contact on one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DeliveryOutcome {
    /// Accepted by the provider.
    Queued {
        sid: String,
        status: String,
        #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
        template: Option<String>,
    },
    /// Rejected by the provider or never reached it.
    Failed {
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<i64>,
    },
}

/// Per-contact result of a dispatch, reported in-band.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryResult {
    pub to: String,
    pub channel: Channel,
    #[serde(flatten)]
    pub outcome: DeliveryOutcome,
}

impl DeliveryResult {
    pub fn is_queued(&self) -> bool {
        matches!(self.outcome, DeliveryOutcome::Queued { .. })
    }

    pub fn provider_ref(&self) -> Option<&str> {
        match &self.outcome {
            DeliveryOutcome::Queued { sid, .. } => Some(sid),
            DeliveryOutcome::Failed { .. } => None,
        }
    }
}

/// Response of the two SOS endpoints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchResponse {
    pub success: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub sms_results: Vec<DeliveryResult>,
    #[serde(default)]
    pub call_results: Vec<DeliveryResult>,
    #[serde(default)]
    pub recording_url: Option<String>,
}

impl DispatchResponse {
    /// Deliveries that did not reach the provider, across both channels.
    pub fn failures(&self) -> impl Iterator<Item = &DeliveryResult> {
        self.sms_results
            .iter()
            .chain(self.call_results.iter())
            .filter(|r| !r.is_queued())
    }
}

/// Response of `GET /api/contacts`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContactsResponse {
    pub success: bool,
    #[serde(default)]
    pub contacts: Vec<Contact>,
}

/// Generic `{success, message}` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
}

impl MessageResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}
