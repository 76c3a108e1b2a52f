//! Client configuration and escalation timing.
//!
//! `ClientConfig` is read from the environment; command-line flags applied by
//! the binary take precedence. `EscalationPolicy` is fixed at compile time but
//! can be replaced programmatically.

use std::env;
use std::time::Duration;

use dispatch::Coordinates;

const DEFAULT_API_URL: &str = "http://localhost:5000";
const DEFAULT_RECORD_COMMAND: &str = "arecord -q -f S16_LE -r 16000 -c 1 -t wav -";
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

const ENV_API_URL: &str = "SOS_API_URL";
const ENV_LAT: &str = "SOS_LAT";
const ENV_LNG: &str = "SOS_LNG";
const ENV_RECORD_COMMAND: &str = "SOS_RECORD_COMMAND";
const ENV_HTTP_TIMEOUT_SECS: &str = "SOS_HTTP_TIMEOUT_SECS";

/// Timing and bounds of one escalation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscalationPolicy {
    /// Attempts per escalation, the first one included.
    pub max_attempts: u32,
    /// Countdown between attempts, in ticks.
    pub countdown_secs: u32,
    pub tick: Duration,
    /// Capture window of the user-triggered attempt.
    pub first_capture: Duration,
    /// Capture window of each automatic attempt.
    pub follow_up_capture: Duration,
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            countdown_secs: 300,
            tick: Duration::from_secs(1),
            first_capture: Duration::from_secs(25),
            follow_up_capture: Duration::from_secs(10),
        }
    }
}

impl EscalationPolicy {
    pub fn capture_window(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            self.first_capture
        } else {
            self.follow_up_capture
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the dispatch service.
    pub api_url: String,
    /// Fixed coordinates reported for every attempt, if known.
    pub location: Option<Coordinates>,
    /// Shell-style command whose stdout is the recorded clip.
    pub record_command: String,
    pub http_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            location: None,
            record_command: DEFAULT_RECORD_COMMAND.to_string(),
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let non_empty = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let location = match (non_empty(ENV_LAT), non_empty(ENV_LNG)) {
            (Some(lat), Some(lng)) => parse_coordinates(&lat, &lng),
            (None, None) => None,
            _ => {
                tracing::warn!("Both {ENV_LAT} and {ENV_LNG} are required; ignoring location");
                None
            }
        };

        Self {
            api_url: non_empty(ENV_API_URL)
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or(defaults.api_url),
            location,
            record_command: non_empty(ENV_RECORD_COMMAND).unwrap_or(defaults.record_command),
            http_timeout: non_empty(ENV_HTTP_TIMEOUT_SECS)
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.http_timeout),
        }
    }
}

/// Parse a decimal-degree pair, rejecting out-of-range values.
pub fn parse_coordinates(lat: &str, lng: &str) -> Option<Coordinates> {
    let lat: f64 = lat.trim().parse().ok()?;
    let lng: f64 = lng.trim().parse().ok()?;
    if !(lat.is_finite() && lng.is_finite()) || lat.abs() > 90.0 || lng.abs() > 180.0 {
        tracing::warn!(lat, lng, "Coordinates out of range; ignoring");
        return None;
    }
    Some(Coordinates::new(lat, lng))
}
