//! Client side of the SOS system.
//!
//! [`EscalationController`] runs one escalation: a user-triggered alert plus up
//! to three automatic follow-ups five minutes apart, each with a fresh voice
//! clip and location, cancellable at any point. Timers, microphone, location
//! and transport are injected through [`capabilities`].

pub mod capabilities;
pub mod config;
pub mod controller;
pub mod errors;
pub mod http;
pub mod location;
pub mod recorder;
pub mod state_machine;

pub use capabilities::{
    ActiveRecording, AudioClip, Capabilities, Clock, DispatchRequest, Dispatcher,
    LocationProvider, Recorder, TokioClock,
};
pub use config::{ClientConfig, EscalationPolicy};
pub use controller::{EscalationController, Notice, NoticeLevel};
pub use errors::{CaptureError, DispatchError, EscalationError, LocationError};
pub use http::{ContactsClient, HttpDispatcher};
pub use location::StaticLocation;
pub use recorder::CommandRecorder;
pub use state_machine::{EscalationState, Phase, TransitionRecord};
