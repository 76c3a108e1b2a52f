//! Dispatch service configuration.
//!
//! ## Precedence (highest to lowest)
//!
//! 1. Command-line flags (applied by the binary)
//! 2. Environment variables
//! 3. Built-in defaults

use std::env;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use crate::messenger::TwilioConfig;
use crate::recordings::DEFAULT_MAX_RECORDINGS;

const DEFAULT_PORT: u16 = 5000;
const DEFAULT_TWILIO_API_BASE: &str = "https://api.twilio.com";
/// Upload ceiling for one voice clip (10 MiB).
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

const ENV_PORT: &str = "PORT";
const ENV_BIND_ADDR: &str = "BIND_ADDR";
const ENV_PUBLIC_BASE_URL: &str = "PUBLIC_BASE_URL";
const ENV_VERCEL_URL: &str = "VERCEL_URL";
const ENV_TWILIO_SID: &str = "TWILIO_SID";
const ENV_TWILIO_AUTH_TOKEN: &str = "TWILIO_AUTH_TOKEN";
const ENV_TWILIO_PHONE: &str = "TWILIO_PHONE";
const ENV_TWILIO_API_BASE: &str = "TWILIO_API_BASE";
const ENV_MAX_UPLOAD_BYTES: &str = "SOS_MAX_UPLOAD_BYTES";
const ENV_MAX_RECORDINGS: &str = "SOS_MAX_RECORDINGS";

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub bind_addr: IpAddr,
    pub port: u16,
    /// Base for recording links; without it alerts go out with no link.
    pub public_base_url: Option<String>,
    pub twilio: TwilioConfig,
    pub max_upload_bytes: usize,
    /// Clips held in memory before the oldest is evicted.
    pub max_recordings: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            public_base_url: None,
            twilio: TwilioConfig {
                account_sid: String::new(),
                auth_token: String::new(),
                from_number: String::new(),
                api_base: DEFAULT_TWILIO_API_BASE.to_string(),
            },
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            max_recordings: DEFAULT_MAX_RECORDINGS,
        }
    }
}

impl DispatchConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unparsable values fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let port = non_empty(ENV_PORT)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(defaults.port);
        let bind_addr = non_empty(ENV_BIND_ADDR)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(defaults.bind_addr);
        let public_base_url = non_empty(ENV_PUBLIC_BASE_URL)
            .or_else(|| non_empty(ENV_VERCEL_URL))
            .map(|v| normalize_base_url(&v));
        let max_upload_bytes = non_empty(ENV_MAX_UPLOAD_BYTES)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(defaults.max_upload_bytes);
        let max_recordings = non_empty(ENV_MAX_RECORDINGS)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(defaults.max_recordings);

        Self {
            bind_addr,
            port,
            public_base_url,
            twilio: TwilioConfig {
                account_sid: non_empty(ENV_TWILIO_SID).unwrap_or_default(),
                auth_token: non_empty(ENV_TWILIO_AUTH_TOKEN).unwrap_or_default(),
                from_number: non_empty(ENV_TWILIO_PHONE).unwrap_or_default(),
                api_base: non_empty(ENV_TWILIO_API_BASE)
                    .unwrap_or_else(|| DEFAULT_TWILIO_API_BASE.to_string()),
            },
            max_upload_bytes,
            max_recordings,
        }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.port)
    }
}

/// Hosting platforms hand out bare hostnames (`app.vercel.app`); links need a scheme.
fn normalize_base_url(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    }
}
