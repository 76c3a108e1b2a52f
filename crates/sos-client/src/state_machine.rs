//! Escalation state machine: explicit phases and legal transition guards.
//!
//! All mutation of [`EscalationState`] flows through [`EscalationMachine::apply`],
//! which validates the event against the current phase, computes the next
//! state, and records phase changes in an audit log.
//!
//! ```text
//! Idle | Completed ──Triggered──────────────▶ AttemptInFlight(1)
//! AttemptInFlight(n) ──DispatchSucceeded────▶ CountingDown(n) | Completed (n = max)
//! AttemptInFlight(1) ──DispatchFailed───────▶ Idle
//! AttemptInFlight(n>1) ──DispatchFailed─────▶ CountingDown(n) | Completed (n = max)
//! AttemptInFlight(n) ──Aborted──────────────▶ Idle
//! CountingDown(n) ──Tick (remaining = 0)────▶ AttemptInFlight(n + 1)
//! any non-Idle ──Cancelled──────────────────▶ Idle
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Oldest transition records are dropped past this length.
pub const MAX_TRANSITION_RECORDS: usize = 256;

/// Phase of one escalation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Nothing active; ready for a trigger.
    Idle,
    /// Recording, locating or dispatching one attempt.
    AttemptInFlight,
    /// Waiting for the next automatic attempt.
    CountingDown,
    /// Every attempt has been made.
    Completed,
}

impl Phase {
    /// Whether a new escalation may start from this phase.
    pub fn accepts_trigger(self) -> bool {
        matches!(self, Self::Idle | Self::Completed)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::AttemptInFlight => write!(f, "AttemptInFlight"),
            Self::CountingDown => write!(f, "CountingDown"),
            Self::Completed => write!(f, "Completed"),
        }
    }
}

/// Snapshot of the controller's escalation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationState {
    pub phase: Phase,
    /// Current attempt, 1-based; 0 while Idle.
    pub attempt_number: u32,
    /// Nonzero only while counting down.
    pub seconds_remaining: u32,
    /// Recording URL returned by the first successful dispatch.
    pub prior_recording: Option<String>,
    /// Attempts of this escalation whose dispatch succeeded.
    #[serde(default)]
    pub dispatched: u32,
}

impl EscalationState {
    pub fn idle() -> Self {
        Self {
            phase: Phase::Idle,
            attempt_number: 0,
            seconds_remaining: 0,
            prior_recording: None,
            dispatched: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.phase, Phase::AttemptInFlight | Phase::CountingDown)
    }

    /// The attempt the running countdown leads to.
    pub fn next_attempt(&self) -> Option<u32> {
        (self.phase == Phase::CountingDown).then_some(self.attempt_number + 1)
    }
}

impl Default for EscalationState {
    fn default() -> Self {
        Self::idle()
    }
}

/// Inputs to the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EscalationEvent {
    /// User pressed SOS.
    Triggered,
    /// The in-flight attempt's dispatch returned.
    DispatchSucceeded { recording_url: Option<String> },
    /// The in-flight attempt's dispatch failed outright.
    DispatchFailed,
    /// Microphone or location could not be acquired for the in-flight attempt.
    Aborted,
    /// One countdown tick elapsed.
    Tick,
    /// User cancelled.
    Cancelled,
}

impl EscalationEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Triggered => "triggered",
            Self::DispatchSucceeded { .. } => "dispatch_succeeded",
            Self::DispatchFailed => "dispatch_failed",
            Self::Aborted => "aborted",
            Self::Tick => "tick",
            Self::Cancelled => "cancelled",
        }
    }
}

/// A single recorded phase change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: Phase,
    pub to: Phase,
    /// Attempt number after the transition.
    pub attempt: u32,
    /// Milliseconds since the machine was created.
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Error returned when an event is not valid in the current phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IllegalTransition {
    pub from: Phase,
    pub event: &'static str,
}

impl fmt::Display for IllegalTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Illegal escalation transition: {} on {}",
            self.from, self.event
        )
    }
}

impl std::error::Error for IllegalTransition {}

/// The escalation state machine.
#[derive(Debug)]
pub struct EscalationMachine {
    state: EscalationState,
    max_attempts: u32,
    countdown_secs: u32,
    created_at: Instant,
    transitions: Vec<TransitionRecord>,
}

impl EscalationMachine {
    pub fn new(max_attempts: u32, countdown_secs: u32) -> Self {
        Self {
            state: EscalationState::idle(),
            max_attempts: max_attempts.max(1),
            countdown_secs: countdown_secs.max(1),
            created_at: Instant::now(),
            transitions: Vec::new(),
        }
    }

    pub fn state(&self) -> &EscalationState {
        &self.state
    }

    pub fn phase(&self) -> Phase {
        self.state.phase
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }

    /// Apply an event, returning the new state.
    ///
    /// The state is left untouched when the event is illegal in the current phase.
    pub fn apply(
        &mut self,
        event: EscalationEvent,
        reason: Option<&str>,
    ) -> Result<&EscalationState, IllegalTransition> {
        let next = self.next_state(&event).ok_or(IllegalTransition {
            from: self.state.phase,
            event: event.name(),
        })?;

        if next.phase != self.state.phase || next.attempt_number != self.state.attempt_number {
            tracing::debug!(
                from = %self.state.phase,
                to = %next.phase,
                attempt = next.attempt_number,
                event = event.name(),
                "State transition"
            );
            self.transitions.push(TransitionRecord {
                from: self.state.phase,
                to: next.phase,
                attempt: next.attempt_number,
                elapsed_ms: self.created_at.elapsed().as_millis() as u64,
                reason: reason.map(String::from),
            });
            if self.transitions.len() > MAX_TRANSITION_RECORDS {
                let excess = self.transitions.len() - MAX_TRANSITION_RECORDS;
                self.transitions.drain(..excess);
            }
        }

        self.state = next;
        Ok(&self.state)
    }

    fn next_state(&self, event: &EscalationEvent) -> Option<EscalationState> {
        use EscalationEvent::*;
        use Phase::*;

        let current = &self.state;
        match (current.phase, event) {
            (Idle | Completed, Triggered) => Some(EscalationState {
                phase: AttemptInFlight,
                attempt_number: 1,
                seconds_remaining: 0,
                prior_recording: None,
                dispatched: 0,
            }),
            (AttemptInFlight, DispatchSucceeded { recording_url }) => {
                let mut next = self.after_attempt();
                next.dispatched += 1;
                if current.attempt_number == 1 && next.prior_recording.is_none() {
                    next.prior_recording = recording_url.clone();
                }
                Some(next)
            }
            // No alert has gone out yet, so the cadence never starts.
            (AttemptInFlight, DispatchFailed) if current.attempt_number <= 1 => {
                Some(EscalationState::idle())
            }
            (AttemptInFlight, DispatchFailed) => Some(self.after_attempt()),
            (AttemptInFlight, Aborted) => Some(EscalationState::idle()),
            (CountingDown, Tick) => {
                let remaining = current.seconds_remaining.saturating_sub(1);
                if remaining == 0 {
                    Some(EscalationState {
                        phase: AttemptInFlight,
                        attempt_number: current.attempt_number + 1,
                        seconds_remaining: 0,
                        prior_recording: current.prior_recording.clone(),
                        dispatched: current.dispatched,
                    })
                } else {
                    Some(EscalationState {
                        seconds_remaining: remaining,
                        ..current.clone()
                    })
                }
            }
            (AttemptInFlight | CountingDown | Completed, Cancelled) => {
                Some(EscalationState::idle())
            }
            _ => None,
        }
    }

    /// State once the in-flight attempt has finished either way.
    fn after_attempt(&self) -> EscalationState {
        let current = &self.state;
        if current.attempt_number >= self.max_attempts {
            EscalationState {
                phase: Phase::Completed,
                seconds_remaining: 0,
                ..current.clone()
            }
        } else {
            EscalationState {
                phase: Phase::CountingDown,
                seconds_remaining: self.countdown_secs,
                ..current.clone()
            }
        }
    }

    /// One-line history, e.g. `Idle → Idle (3 transitions) [AttemptInFlight → CountingDown → Idle]`.
    pub fn summary(&self) -> String {
        let path: Vec<String> = self.transitions.iter().map(|t| t.to.to_string()).collect();
        let mut summary = format!(
            "{} → {} ({} transitions)",
            Phase::Idle,
            self.state.phase,
            self.transitions.len()
        );
        if !path.is_empty() {
            summary.push_str(&format!(" [{}]", path.join(" → ")));
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> EscalationMachine {
        EscalationMachine::new(4, 300)
    }

    fn succeed(sm: &mut EscalationMachine, url: Option<&str>) {
        sm.apply(
            EscalationEvent::DispatchSucceeded {
                recording_url: url.map(String::from),
            },
            None,
        )
        .unwrap();
    }

    fn count_down(sm: &mut EscalationMachine) {
        while sm.phase() == Phase::CountingDown {
            sm.apply(EscalationEvent::Tick, None).unwrap();
        }
    }

    #[test]
    fn test_initial_state() {
        let sm = machine();
        assert_eq!(sm.state(), &EscalationState::idle());
        assert!(sm.transitions().is_empty());
    }

    #[test]
    fn test_full_escalation_reaches_completed() {
        let mut sm = machine();
        sm.apply(EscalationEvent::Triggered, Some("user")).unwrap();
        let mut attempts = vec![sm.state().attempt_number];

        for _ in 0..3 {
            succeed(&mut sm, Some("https://h/api/audio/a.wav"));
            assert_eq!(sm.phase(), Phase::CountingDown);
            assert_eq!(sm.state().seconds_remaining, 300);
            count_down(&mut sm);
            assert_eq!(sm.phase(), Phase::AttemptInFlight);
            attempts.push(sm.state().attempt_number);
        }
        succeed(&mut sm, Some("https://h/api/audio/d.wav"));

        assert_eq!(attempts, vec![1, 2, 3, 4]);
        assert_eq!(sm.phase(), Phase::Completed);
        assert_eq!(sm.state().attempt_number, 4);
        assert_eq!(sm.state().seconds_remaining, 0);
        assert_eq!(sm.state().dispatched, 4);
        assert!(sm.apply(EscalationEvent::Tick, None).is_err());
    }

    #[test]
    fn test_countdown_takes_exactly_countdown_ticks() {
        let mut sm = machine();
        sm.apply(EscalationEvent::Triggered, None).unwrap();
        succeed(&mut sm, None);

        for expected in (1..300).rev() {
            sm.apply(EscalationEvent::Tick, None).unwrap();
            assert_eq!(sm.state().seconds_remaining, expected);
            assert_eq!(sm.phase(), Phase::CountingDown);
        }
        sm.apply(EscalationEvent::Tick, None).unwrap();
        assert_eq!(sm.phase(), Phase::AttemptInFlight);
        assert_eq!(sm.state().attempt_number, 2);
        assert_eq!(sm.state().seconds_remaining, 0);
    }

    #[test]
    fn test_only_first_recording_is_kept() {
        let mut sm = machine();
        sm.apply(EscalationEvent::Triggered, None).unwrap();
        succeed(&mut sm, Some("https://h/first.wav"));
        count_down(&mut sm);
        succeed(&mut sm, Some("https://h/second.wav"));
        assert_eq!(sm.state().prior_recording.as_deref(), Some("https://h/first.wav"));
    }

    #[test]
    fn test_first_dispatch_failure_returns_to_idle() {
        let mut sm = machine();
        sm.apply(EscalationEvent::Triggered, None).unwrap();
        sm.apply(EscalationEvent::DispatchFailed, Some("network down"))
            .unwrap();
        assert_eq!(sm.state(), &EscalationState::idle());
    }

    #[test]
    fn test_later_dispatch_failure_keeps_cadence() {
        let mut sm = machine();
        sm.apply(EscalationEvent::Triggered, None).unwrap();
        succeed(&mut sm, Some("https://h/first.wav"));
        count_down(&mut sm);
        sm.apply(EscalationEvent::DispatchFailed, None).unwrap();

        assert_eq!(sm.phase(), Phase::CountingDown);
        assert_eq!(sm.state().attempt_number, 2);
        assert_eq!(sm.state().seconds_remaining, 300);
        count_down(&mut sm);
        assert_eq!(sm.state().attempt_number, 3);
        assert_eq!(sm.state().dispatched, 1);
        assert_eq!(sm.state().prior_recording.as_deref(), Some("https://h/first.wav"));
    }

    #[test]
    fn test_failed_final_attempt_still_completes() {
        let mut sm = machine();
        sm.apply(EscalationEvent::Triggered, None).unwrap();
        succeed(&mut sm, Some("https://h/first.wav"));
        for _ in 0..2 {
            count_down(&mut sm);
            succeed(&mut sm, None);
        }
        count_down(&mut sm);
        assert_eq!(sm.state().attempt_number, 4);

        sm.apply(EscalationEvent::DispatchFailed, Some("provider down"))
            .unwrap();
        assert_eq!(sm.phase(), Phase::Completed);
        assert_eq!(sm.state().attempt_number, 4);
        assert_eq!(sm.state().dispatched, 3);
        assert!(sm.apply(EscalationEvent::Tick, None).is_err());
    }

    #[test]
    fn test_abort_returns_to_idle() {
        let mut sm = machine();
        sm.apply(EscalationEvent::Triggered, None).unwrap();
        succeed(&mut sm, Some("https://h/first.wav"));
        count_down(&mut sm);
        sm.apply(EscalationEvent::Aborted, Some("microphone denied"))
            .unwrap();
        assert_eq!(sm.state(), &EscalationState::idle());
    }

    #[test]
    fn test_cancel_from_every_active_phase() {
        let mut in_flight = machine();
        in_flight.apply(EscalationEvent::Triggered, None).unwrap();

        let mut counting = machine();
        counting.apply(EscalationEvent::Triggered, None).unwrap();
        succeed(&mut counting, Some("https://h/a.wav"));
        counting.apply(EscalationEvent::Tick, None).unwrap();

        let mut completed = EscalationMachine::new(1, 300);
        completed.apply(EscalationEvent::Triggered, None).unwrap();
        succeed(&mut completed, None);
        assert_eq!(completed.phase(), Phase::Completed);

        for mut sm in [in_flight, counting, completed] {
            sm.apply(EscalationEvent::Cancelled, Some("user")).unwrap();
            assert_eq!(sm.state(), &EscalationState::idle());
        }
    }

    #[test]
    fn test_illegal_events_leave_state_untouched() {
        let mut sm = machine();
        let err = sm.apply(EscalationEvent::Tick, None).unwrap_err();
        assert_eq!(err.from, Phase::Idle);
        assert_eq!(err.event, "tick");
        assert!(sm.apply(EscalationEvent::Cancelled, None).is_err());
        assert!(sm.apply(EscalationEvent::DispatchFailed, None).is_err());

        sm.apply(EscalationEvent::Triggered, None).unwrap();
        let before = sm.state().clone();
        assert!(sm.apply(EscalationEvent::Triggered, None).is_err());
        assert!(sm.apply(EscalationEvent::Tick, None).is_err());
        assert_eq!(sm.state(), &before);
    }

    #[test]
    fn test_completed_accepts_new_trigger() {
        let mut sm = EscalationMachine::new(1, 300);
        sm.apply(EscalationEvent::Triggered, None).unwrap();
        succeed(&mut sm, Some("https://h/a.wav"));
        assert!(sm.phase().accepts_trigger());

        sm.apply(EscalationEvent::Triggered, None).unwrap();
        assert_eq!(sm.state().attempt_number, 1);
        assert_eq!(sm.state().dispatched, 0);
        assert!(sm.state().prior_recording.is_none());
    }

    #[test]
    fn test_transition_log_is_bounded() {
        let mut sm = EscalationMachine::new(1, 300);
        for _ in 0..MAX_TRANSITION_RECORDS {
            sm.apply(EscalationEvent::Triggered, None).unwrap();
            succeed(&mut sm, None);
        }
        sm.apply(EscalationEvent::Triggered, Some("latest")).unwrap();

        let log = sm.transitions();
        assert_eq!(log.len(), MAX_TRANSITION_RECORDS);
        assert_eq!(log[log.len() - 1].reason.as_deref(), Some("latest"));
        assert_eq!(log[0].from, Phase::AttemptInFlight);
        assert_eq!(log[0].to, Phase::Completed);
    }

    #[test]
    fn test_ticks_are_not_logged_as_transitions() {
        let mut sm = machine();
        sm.apply(EscalationEvent::Triggered, Some("user pressed SOS"))
            .unwrap();
        succeed(&mut sm, None);
        sm.apply(EscalationEvent::Tick, None).unwrap();
        sm.apply(EscalationEvent::Cancelled, None).unwrap();

        let log = sm.transitions();
        assert_eq!(log.len(), 3);
        assert_eq!(log[0].from, Phase::Idle);
        assert_eq!(log[0].to, Phase::AttemptInFlight);
        assert_eq!(log[0].reason.as_deref(), Some("user pressed SOS"));
        assert_eq!(log[2].to, Phase::Idle);
        assert!(sm.summary().contains("3 transitions"));
    }

    #[test]
    fn test_transition_record_serde() {
        let record = TransitionRecord {
            from: Phase::CountingDown,
            to: Phase::AttemptInFlight,
            attempt: 3,
            elapsed_ms: 600_000,
            reason: None,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["from"], "counting_down");
        assert_eq!(json["to"], "attempt_in_flight");
        assert!(json.get("reason").is_none());
    }
}
