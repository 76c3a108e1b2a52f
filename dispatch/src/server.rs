//! HTTP surface of the dispatch service.
//!
//! | Route                         | Handler              |
//! |-------------------------------|----------------------|
//! | `GET /api/health`             | [`health`]           |
//! | `GET /api/contacts`           | [`list_contacts`]    |
//! | `DELETE /api/contacts`        | [`clear_contacts`]   |
//! | `POST /api/add-contact`       | [`add_contact`]      |
//! | `DELETE /api/contacts/:id`    | [`delete_contact`]   |
//! | `POST /api/sos`               | [`send_sos`]         |
//! | `POST /api/sos-delayed`       | [`send_delayed_sos`] |
//! | `GET /api/audio/:filename`    | [`get_recording`]    |

use std::sync::Arc;

use axum::extract::multipart::Field;
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::contacts::SharedContactStore;
use crate::dispatcher::{AlertDispatcher, AlertRequest, AudioUpload};
use crate::error::ApiError;
use crate::recordings::SharedRecordingStore;
use crate::types::{
    AttemptKind, ContactsResponse, Coordinates, DispatchResponse, MessageResponse, NewContact,
};

/// Content type assumed for uploads that do not declare one.
const DEFAULT_AUDIO_CONTENT_TYPE: &str = "audio/webm";
/// Headroom over the clip limit for the other form fields.
const FORM_OVERHEAD_BYTES: usize = 64 * 1024;

/// Shared state for request handlers.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<AlertDispatcher>,
    pub contacts: SharedContactStore,
    pub recordings: SharedRecordingStore,
    pub max_upload_bytes: usize,
}

impl AppState {
    pub fn new(
        dispatcher: AlertDispatcher,
        contacts: SharedContactStore,
        recordings: SharedRecordingStore,
        max_upload_bytes: usize,
    ) -> Self {
        Self {
            dispatcher: Arc::new(dispatcher),
            contacts,
            recordings,
            max_upload_bytes,
        }
    }
}

pub fn router(state: AppState) -> Router {
    let body_limit = state.max_upload_bytes + FORM_OVERHEAD_BYTES;

    Router::new()
        .route("/api/health", get(health))
        .route("/api/contacts", get(list_contacts).delete(clear_contacts))
        .route("/api/add-contact", post(add_contact))
        .route("/api/contacts/:id", delete(delete_contact))
        .route("/api/sos", post(send_sos))
        .route("/api/sos-delayed", post(send_delayed_sos))
        .route("/api/audio/:filename", get(get_recording))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "ok": true }))
}

pub async fn list_contacts(
    State(state): State<AppState>,
) -> Result<Json<ContactsResponse>, ApiError> {
    let contacts = state.contacts.list().await?;
    Ok(Json(ContactsResponse {
        success: true,
        contacts,
    }))
}

pub async fn add_contact(
    State(state): State<AppState>,
    Json(body): Json<NewContact>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.contacts.add(&body.name, &body.phone).await?;
    Ok(Json(MessageResponse::ok("Contact added successfully!")))
}

pub async fn delete_contact(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.contacts.delete(&id).await?;
    Ok(Json(MessageResponse::ok("Contact deleted successfully!")))
}

pub async fn clear_contacts(
    State(state): State<AppState>,
) -> Result<Json<MessageResponse>, ApiError> {
    let removed = state.contacts.clear().await?;
    tracing::info!(removed, "All contacts cleared");
    Ok(Json(MessageResponse::ok(format!(
        "Deleted {removed} contact(s)"
    ))))
}

pub async fn send_sos(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<DispatchResponse>, ApiError> {
    let form = SosForm::read(multipart, state.max_upload_bytes).await?;
    // The immediate endpoint also accepts `messageType=delayed`.
    let kind = form.message_type.unwrap_or(AttemptKind::Immediate);
    let request = form.into_request(kind)?;
    Ok(Json(state.dispatcher.dispatch(request).await?))
}

pub async fn send_delayed_sos(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<DispatchResponse>, ApiError> {
    let form = SosForm::read(multipart, state.max_upload_bytes).await?;
    let request = form.into_request(AttemptKind::Delayed)?;
    Ok(Json(state.dispatcher.dispatch(request).await?))
}

pub async fn get_recording(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let recording = state
        .recordings
        .get(&filename)
        .await?
        .ok_or_else(|| ApiError::NotFound("File not found".to_string()))?;

    Ok((
        [
            (header::CONTENT_TYPE, recording.content_type),
            (
                header::CONTENT_DISPOSITION,
                format!("inline; filename=\"{}\"", recording.filename),
            ),
        ],
        recording.bytes,
    ))
}

/// Fields of the two SOS multipart forms.
#[derive(Debug, Default)]
struct SosForm {
    audio: Option<AudioUpload>,
    lat: Option<String>,
    lng: Option<String>,
    message_type: Option<AttemptKind>,
    original_recording_url: Option<String>,
}

impl SosForm {
    async fn read(mut multipart: Multipart, max_audio_bytes: usize) -> Result<Self, ApiError> {
        let mut form = Self::default();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ApiError::BadRequest(format!("Malformed form: {e}")))?
        {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                "audio" => {
                    let content_type = field
                        .content_type()
                        .unwrap_or(DEFAULT_AUDIO_CONTENT_TYPE)
                        .to_string();
                    let bytes = field
                        .bytes()
                        .await
                        .map_err(|e| ApiError::BadRequest(format!("Malformed audio: {e}")))?;
                    if bytes.len() > max_audio_bytes {
                        return Err(ApiError::BadRequest(format!(
                            "Audio exceeds {max_audio_bytes} bytes"
                        )));
                    }
                    if !bytes.is_empty() {
                        form.audio = Some(AudioUpload {
                            bytes: bytes.to_vec(),
                            content_type,
                        });
                    }
                }
                "lat" => form.lat = Some(text(field).await?),
                "lng" => form.lng = Some(text(field).await?),
                "messageType" => {
                    form.message_type = match text(field).await?.trim() {
                        "delayed" => Some(AttemptKind::Delayed),
                        _ => Some(AttemptKind::Immediate),
                    }
                }
                "originalRecordingUrl" => {
                    let url = text(field).await?;
                    // Browsers serialise a missing value as the string "null".
                    if !url.trim().is_empty() && url.trim() != "null" {
                        form.original_recording_url = Some(url.trim().to_string());
                    }
                }
                other => tracing::debug!(field = other, "Ignoring unknown form field"),
            }
        }
        Ok(form)
    }

    fn into_request(self, kind: AttemptKind) -> Result<AlertRequest, ApiError> {
        let coordinates = Coordinates::new(
            parse_degrees("lat", self.lat.as_deref(), 90.0)?,
            parse_degrees("lng", self.lng.as_deref(), 180.0)?,
        );
        Ok(AlertRequest {
            kind,
            coordinates,
            audio: self.audio,
            prior_recording_url: match kind {
                AttemptKind::Immediate => None,
                AttemptKind::Delayed => self.original_recording_url,
            },
        })
    }
}

async fn text(field: Field<'_>) -> Result<String, ApiError> {
    field
        .text()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Malformed form field: {e}")))
}

fn parse_degrees(name: &str, raw: Option<&str>, limit: f64) -> Result<f64, ApiError> {
    let raw = raw
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::BadRequest(format!("{name} is required")))?;
    let value: f64 = raw
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("{name} is not a number: {raw}")))?;
    if !value.is_finite() || value.abs() > limit {
        return Err(ApiError::BadRequest(format!("{name} out of range: {raw}")));
    }
    Ok(value)
}
