//! Message templates for SMS bodies and voice call scripts.
//!
//! Some carriers drop messages with emoji or long bodies, so recipients on
//! those networks (selected by their country calling prefix) get a plain
//! variant. The call script is delivered through a TwiML "message" twimlet
//! that speaks the given text.

use reqwest::Url;

use crate::types::{AttemptKind, Coordinates};

/// Calling prefixes that receive the plain variant.
const PLAIN_PREFIXES: &[&str] = &["+91"];

const TWIMLET_MESSAGE_URL: &str = "http://twimlets.com/message";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateVariant {
    Full,
    Plain,
}

impl TemplateVariant {
    pub fn for_phone(phone: &str) -> Self {
        if PLAIN_PREFIXES.iter().any(|p| phone.starts_with(p)) {
            Self::Plain
        } else {
            Self::Full
        }
    }
}

/// Everything a template needs to render one alert.
#[derive(Debug, Clone, Copy)]
pub struct AlertContext<'a> {
    pub kind: AttemptKind,
    pub coordinates: Coordinates,
    pub recording_url: Option<&'a str>,
    pub prior_recording_url: Option<&'a str>,
}

/// Tag reported back in delivery results so callers can tell which body went out.
pub fn template_tag(kind: AttemptKind, variant: TemplateVariant) -> &'static str {
    match (kind, variant) {
        (AttemptKind::Immediate, TemplateVariant::Full) => "full",
        (AttemptKind::Immediate, TemplateVariant::Plain) => "plain",
        (AttemptKind::Delayed, TemplateVariant::Full) => "delayed-full",
        (AttemptKind::Delayed, TemplateVariant::Plain) => "delayed-plain",
    }
}

pub fn sms_body(ctx: &AlertContext<'_>, variant: TemplateVariant) -> String {
    let maps = ctx.coordinates.maps_link();
    match (ctx.kind, variant) {
        (AttemptKind::Immediate, TemplateVariant::Full) => {
            let mut body = format!("🚨 EMERGENCY SOS! ATTENTION NEEDED NOW 🚨\nLocation: {maps}");
            if let Some(url) = ctx.recording_url {
                body.push_str(&format!("\nRecording: {url}"));
            }
            body
        }
        (AttemptKind::Immediate, TemplateVariant::Plain) => format!(
            "SOS ALERT EMERGENCY!!\nLocation: {maps}\nRecording: {}",
            ctx.recording_url.unwrap_or("Not available")
        ),
        (AttemptKind::Delayed, TemplateVariant::Full) => {
            let mut body = format!(
                "🚨 FOLLOW-UP EMERGENCY SOS! 🚨\nThis is a 5-minute follow-up message.\nLocation: {maps}"
            );
            if let Some(url) = ctx.recording_url {
                body.push_str(&format!("\nNew Recording: {url}"));
            }
            if let Some(url) = ctx.prior_recording_url {
                body.push_str(&format!("\nOriginal Recording: {url}"));
            }
            body.push_str(
                "\n\nIf you haven't responded yet, please check on this person immediately!",
            );
            body
        }
        (AttemptKind::Delayed, TemplateVariant::Plain) => format!(
            "FOLLOW-UP SOS ALERT! 5-minute check-in.\nLocation: {maps}\nRecording: {}\nPlease respond if you haven't already!",
            ctx.recording_url.unwrap_or("Not available")
        ),
    }
}

/// Text spoken to a contact who answers the call.
pub fn call_message(ctx: &AlertContext<'_>) -> String {
    let Coordinates { lat, lng } = ctx.coordinates;
    match (ctx.kind, ctx.recording_url) {
        (AttemptKind::Immediate, Some(url)) => format!(
            "Emergency SOS alert. Please listen to the recording and check the location. Recording URL: {url}"
        ),
        (AttemptKind::Immediate, None) => format!(
            "Emergency SOS alert. Location: {lat} comma {lng}. Please respond immediately."
        ),
        (AttemptKind::Delayed, Some(url)) => format!(
            "This is a follow-up emergency SOS alert after 5 minutes. Please listen to the recording and check the location. Recording URL: {url}"
        ),
        (AttemptKind::Delayed, None) => format!(
            "Follow-up emergency SOS alert after 5 minutes. Location: {lat} comma {lng}. Please respond immediately if you haven't already."
        ),
    }
}

/// URL the provider fetches to obtain the call script.
pub fn call_script_url(ctx: &AlertContext<'_>) -> String {
    let message = call_message(ctx);
    match Url::parse_with_params(TWIMLET_MESSAGE_URL, &[("Message[0]", message.as_str())]) {
        Ok(url) => url.to_string(),
        // The base is a constant, so parsing cannot fail in practice.
        Err(_) => TWIMLET_MESSAGE_URL.to_string(),
    }
}
