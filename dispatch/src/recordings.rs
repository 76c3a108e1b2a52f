//! Recording store. Keeps uploaded voice clips retrievable by filename.
//!
//! Clips are stored exactly as uploaded; no transcoding happens here.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum RecordingError {
    #[error("Recording is empty")]
    Empty,

    #[error("Recording storage unavailable: {0}")]
    Storage(String),
}

/// A stored clip with the metadata needed to serve it back.
#[derive(Debug, Clone)]
pub struct StoredRecording {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
    pub uploaded_at: DateTime<Utc>,
}

pub type SharedRecordingStore = Arc<dyn RecordingStore>;

#[async_trait]
pub trait RecordingStore: Send + Sync {
    /// Persist a clip and return the filename it can be fetched under.
    async fn put(&self, bytes: Vec<u8>, content_type: &str) -> Result<String, RecordingError>;

    async fn get(&self, filename: &str) -> Result<Option<StoredRecording>, RecordingError>;
}

/// File extension for an audio content type.
pub fn extension_for(content_type: &str) -> &'static str {
    let base = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    match base.as_str() {
        "audio/mpeg" | "audio/mp3" => "mp3",
        "audio/webm" => "webm",
        "audio/wav" | "audio/x-wav" | "audio/wave" => "wav",
        "audio/ogg" => "ogg",
        _ => "bin",
    }
}

/// `recording-<unix_ms>-<9 digits>.<ext>`
pub fn generate_filename(content_type: &str, now: DateTime<Utc>) -> String {
    let suffix = uuid::Uuid::new_v4().as_u128() % 1_000_000_000;
    format!(
        "recording-{}-{:09}.{}",
        now.timestamp_millis(),
        suffix,
        extension_for(content_type)
    )
}

/// Public URL a recipient can open to hear the clip.
pub fn recording_url(public_base: &str, filename: &str) -> String {
    format!("{}/api/audio/{}", public_base.trim_end_matches('/'), filename)
}

/// Clips kept before the oldest is evicted.
pub const DEFAULT_MAX_RECORDINGS: usize = 200;

/// Bounded in-memory store; evicts the oldest clip once `capacity` is reached.
pub struct InMemoryRecordingStore {
    capacity: usize,
    inner: RwLock<Clips>,
}

#[derive(Default)]
struct Clips {
    by_name: HashMap<String, StoredRecording>,
    /// Insertion order, oldest first.
    order: VecDeque<String>,
}

impl Default for InMemoryRecordingStore {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_MAX_RECORDINGS)
    }
}

impl InMemoryRecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: RwLock::new(Clips::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn shared(self) -> SharedRecordingStore {
        Arc::new(self)
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.by_name.len()
    }
}

#[async_trait]
impl RecordingStore for InMemoryRecordingStore {
    async fn put(&self, bytes: Vec<u8>, content_type: &str) -> Result<String, RecordingError> {
        if bytes.is_empty() {
            return Err(RecordingError::Empty);
        }
        let now = Utc::now();
        let filename = generate_filename(content_type, now);
        let recording = StoredRecording {
            filename: filename.clone(),
            content_type: content_type.to_string(),
            bytes,
            uploaded_at: now,
        };
        let mut clips = self.inner.write().await;
        while clips.order.len() >= self.capacity {
            let Some(oldest) = clips.order.pop_front() else {
                break;
            };
            clips.by_name.remove(&oldest);
            tracing::debug!(filename = %oldest, "Recording evicted");
        }
        clips.order.push_back(filename.clone());
        clips.by_name.insert(filename.clone(), recording);
        tracing::info!(filename = %filename, stored = clips.order.len(), "Recording stored");
        Ok(filename)
    }

    async fn get(&self, filename: &str) -> Result<Option<StoredRecording>, RecordingError> {
        Ok(self.inner.read().await.by_name.get(filename).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_for() {
        assert_eq!(extension_for("audio/mpeg"), "mp3");
        assert_eq!(extension_for("audio/webm;codecs=opus"), "webm");
        assert_eq!(extension_for("audio/x-wav"), "wav");
        assert_eq!(extension_for("application/octet-stream"), "bin");
    }

    #[test]
    fn test_generate_filename_shape() {
        let now = DateTime::from_timestamp_millis(1_700_000_000_123).unwrap();
        let name = generate_filename("audio/wav", now);
        assert!(name.starts_with("recording-1700000000123-"), "{name}");
        assert!(name.ends_with(".wav"));
        let digits = name
            .trim_start_matches("recording-1700000000123-")
            .trim_end_matches(".wav");
        assert_eq!(digits.len(), 9);
        assert!(digits.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_recording_url_trims_slash() {
        assert_eq!(
            recording_url("https://sos.example.com/", "recording-1.wav"),
            "https://sos.example.com/api/audio/recording-1.wav"
        );
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let store = InMemoryRecordingStore::new();
        let name = store.put(vec![1, 2, 3], "audio/webm").await.unwrap();
        let got = store.get(&name).await.unwrap().unwrap();
        assert_eq!(got.bytes, vec![1, 2, 3]);
        assert_eq!(got.content_type, "audio/webm");
        assert!(store.get("missing.mp3").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_rejects_empty_clip() {
        let store = InMemoryRecordingStore::new();
        assert!(matches!(
            store.put(Vec::new(), "audio/wav").await,
            Err(RecordingError::Empty)
        ));
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn test_oldest_clip_evicted_at_capacity() {
        let store = InMemoryRecordingStore::with_capacity(2);
        let first = store.put(vec![1], "audio/wav").await.unwrap();
        let second = store.put(vec![2], "audio/wav").await.unwrap();
        let third = store.put(vec![3], "audio/wav").await.unwrap();

        assert_eq!(store.len().await, 2);
        assert!(store.get(&first).await.unwrap().is_none());
        assert_eq!(store.get(&second).await.unwrap().unwrap().bytes, vec![2]);
        assert_eq!(store.get(&third).await.unwrap().unwrap().bytes, vec![3]);
    }

    #[test]
    fn test_zero_capacity_keeps_one_clip() {
        assert_eq!(InMemoryRecordingStore::with_capacity(0).capacity(), 1);
    }
}
