//! Capabilities injected into the escalation controller.
//!
//! The controller never touches a timer, microphone, GPS or socket directly;
//! each is a trait object so tests can substitute fakes and virtual time.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dispatch::{AttemptKind, Coordinates, DispatchResponse};

use crate::errors::{CaptureError, DispatchError, LocationError};

#[async_trait]
pub trait Clock: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Clock backed by `tokio::time`; honours paused test time.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// A finished voice clip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioClip {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// Microphone access.
#[async_trait]
pub trait Recorder: Send + Sync {
    /// Acquire the microphone and begin recording.
    async fn start(&self) -> Result<Box<dyn ActiveRecording>, CaptureError>;
}

/// A recording in progress. Dropping it stops the recording and discards the audio.
#[async_trait]
pub trait ActiveRecording: Send {
    /// Stop recording and return the captured clip.
    async fn finish(self: Box<Self>) -> Result<AudioClip, CaptureError>;
}

#[async_trait]
pub trait LocationProvider: Send + Sync {
    /// One-shot fetch of the current position.
    async fn locate(&self) -> Result<Coordinates, LocationError>;
}

/// One attempt's payload for the alert dispatcher.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub kind: AttemptKind,
    pub attempt: u32,
    pub coordinates: Coordinates,
    pub audio: Option<AudioClip>,
    pub prior_recording_url: Option<String>,
}

#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(&self, request: DispatchRequest) -> Result<DispatchResponse, DispatchError>;
}

/// The full set of capabilities one controller runs against.
#[derive(Clone)]
pub struct Capabilities {
    pub clock: Arc<dyn Clock>,
    pub recorder: Arc<dyn Recorder>,
    pub location: Arc<dyn LocationProvider>,
    pub dispatcher: Arc<dyn Dispatcher>,
}

impl Capabilities {
    /// Capabilities using the tokio clock.
    pub fn new(
        recorder: Arc<dyn Recorder>,
        location: Arc<dyn LocationProvider>,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Self {
        Self {
            clock: Arc::new(TokioClock),
            recorder,
            location,
            dispatcher,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}
