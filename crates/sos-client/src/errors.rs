//! Error taxonomy for the client side of an escalation.
//!
//! | Error             | Raised by                | Fatal to escalation           |
//! |-------------------|--------------------------|-------------------------------|
//! | `CaptureError`    | microphone recorder      | yes                           |
//! | `LocationError`   | location provider        | yes                           |
//! | `DispatchError`   | alert dispatcher         | attempt 1 only                |
//! | `EscalationError` | `EscalationController`   | returned from `trigger()`     |

use thiserror::Error;

use crate::state_machine::Phase;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CaptureError {
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),

    #[error("recording device failed: {0}")]
    Device(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LocationError {
    #[error("location permission denied")]
    PermissionDenied,

    #[error("location is not supported on this device")]
    Unsupported,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("dispatch request failed: {0}")]
    Transport(String),

    #[error("dispatch service returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("could not decode dispatch response: {0}")]
    Decode(String),

    #[error("dispatch rejected: {0}")]
    Rejected(String),
}

impl From<reqwest::Error> for DispatchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EscalationError {
    #[error("an emergency is already active ({0})")]
    AlreadyActive(Phase),

    #[error(transparent)]
    PermissionDenied(#[from] CaptureError),

    #[error(transparent)]
    Location(#[from] LocationError),

    #[error(transparent)]
    DispatchFailed(#[from] DispatchError),

    #[error("escalation cancelled")]
    Cancelled,
}

impl EscalationError {
    /// Whether an automatic attempt failing this way still lets the cadence continue.
    pub fn keeps_cadence(&self) -> bool {
        matches!(self, Self::DispatchFailed(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_dispatch_failures_keep_cadence() {
        assert!(EscalationError::from(DispatchError::Transport("timeout".into())).keeps_cadence());
        assert!(!EscalationError::from(CaptureError::PermissionDenied("denied".into()))
            .keeps_cadence());
        assert!(!EscalationError::from(LocationError::Unsupported).keeps_cadence());
        assert!(!EscalationError::Cancelled.keeps_cadence());
    }

    #[test]
    fn test_messages() {
        assert_eq!(
            EscalationError::AlreadyActive(Phase::CountingDown).to_string(),
            "an emergency is already active (CountingDown)"
        );
        assert_eq!(
            EscalationError::from(DispatchError::Status {
                status: 500,
                message: "Something went wrong!".into()
            })
            .to_string(),
            "dispatch service returned 500: Something went wrong!"
        );
    }
}
