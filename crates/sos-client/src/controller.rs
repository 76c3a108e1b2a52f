//! Escalation controller: one user-triggered SOS plus automatic follow-ups.
//!
//! ## Lifecycle
//!
//! ```text
//! trigger()
//!   → attempt 1: record 25 s → locate → dispatch (immediate)
//!   → spawn follow-up task:
//!       loop:
//!         count down 300 ticks
//!         attempt n: record 10 s → locate → dispatch (delayed, prior recording)
//!         until Completed or aborted
//! cancel()
//!   → cancels the escalation token, bumps the generation, returns to Idle
//! ```
//!
//! Every async continuation carries the generation it was started under and
//! drops its result if the generation has moved on, so a late result from a
//! cancelled escalation never changes state.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dispatch::{AttemptKind, DispatchResponse};
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::capabilities::{Capabilities, DispatchRequest};
use crate::config::EscalationPolicy;
use crate::errors::EscalationError;
use crate::state_machine::{
    EscalationEvent, EscalationMachine, EscalationState, IllegalTransition, Phase,
    TransitionRecord,
};

const NOTICE_CAPACITY: usize = 64;

// ── Notices ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Success,
    Error,
    Info,
}

/// Transient user-facing message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Success,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            message: message.into(),
        }
    }
}

// ── Controller ───────────────────────────────────────────────────────────────

/// Drives escalations against injected capabilities.
///
/// Cheap to clone; clones share the same escalation.
#[derive(Clone)]
pub struct EscalationController {
    inner: Arc<Inner>,
}

struct Inner {
    policy: EscalationPolicy,
    caps: Capabilities,
    core: Mutex<Core>,
    state_tx: watch::Sender<EscalationState>,
    notice_tx: broadcast::Sender<Notice>,
}

struct Core {
    machine: EscalationMachine,
    /// Bumped on every trigger and cancel.
    generation: u64,
    cancel: CancellationToken,
}

impl EscalationController {
    pub fn new(policy: EscalationPolicy, caps: Capabilities) -> Self {
        let machine = EscalationMachine::new(policy.max_attempts, policy.countdown_secs);
        let (state_tx, _) = watch::channel(machine.state().clone());
        let (notice_tx, _) = broadcast::channel(NOTICE_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                policy,
                caps,
                core: Mutex::new(Core {
                    machine,
                    generation: 0,
                    cancel: CancellationToken::new(),
                }),
                state_tx,
                notice_tx,
            }),
        }
    }

    pub fn policy(&self) -> &EscalationPolicy {
        &self.inner.policy
    }

    pub fn state(&self) -> EscalationState {
        self.inner.state_tx.borrow().clone()
    }

    /// Receiver updated on every state change, countdown ticks included.
    pub fn subscribe_state(&self) -> watch::Receiver<EscalationState> {
        self.inner.state_tx.subscribe()
    }

    pub fn subscribe_notices(&self) -> broadcast::Receiver<Notice> {
        self.inner.notice_tx.subscribe()
    }

    /// Audit log of phase changes.
    pub fn transitions(&self) -> Vec<TransitionRecord> {
        self.inner.core().machine.transitions().to_vec()
    }

    /// Start an escalation and run its first attempt to completion.
    ///
    /// On success the automatic follow-ups continue in a background task and
    /// the first attempt's dispatch response is returned.
    ///
    /// # Errors
    ///
    /// - `AlreadyActive` if an attempt is in flight or counting down.
    /// - `PermissionDenied` / `Location` / `DispatchFailed` if attempt 1 fails;
    ///   the controller is back in Idle and no countdown is scheduled.
    /// - `Cancelled` if `cancel()` was called before attempt 1 finished.
    ///
    /// Dropping the returned future before it resolves aborts the escalation
    /// and returns the controller to Idle.
    pub async fn trigger(&self) -> Result<DispatchResponse, EscalationError> {
        let inner = &self.inner;
        let (generation, token) = {
            let mut core = inner.core();
            let phase = core.machine.phase();
            if !phase.accepts_trigger() {
                warn!(%phase, "Ignoring SOS trigger while an emergency is active");
                return Err(EscalationError::AlreadyActive(phase));
            }
            core.generation += 1;
            core.cancel = CancellationToken::new();
            inner
                .apply(&mut core, EscalationEvent::Triggered, "user triggered SOS")
                .map_err(|_| EscalationError::AlreadyActive(phase))?;
            (core.generation, core.cancel.clone())
        };
        info!(generation, "SOS triggered");

        let guard = FirstAttemptGuard {
            inner,
            generation,
            token: token.clone(),
            armed: true,
        };
        let result = inner
            .run_attempt(generation, &token, 1, AttemptKind::Immediate, None)
            .await;
        guard.disarm();
        if matches!(result, Err(EscalationError::Cancelled)) {
            return Err(EscalationError::Cancelled);
        }

        match inner.conclude_attempt(generation, 1, &result) {
            None => Err(EscalationError::Cancelled),
            Some(phase) => {
                if phase == Phase::CountingDown {
                    tokio::spawn(Arc::clone(inner).follow_up(generation, token));
                }
                result
            }
        }
    }

    /// Stop the escalation from any state. Idempotent.
    pub fn cancel(&self) {
        let inner = &self.inner;
        let was_active = {
            let mut core = inner.core();
            core.cancel.cancel();
            core.generation += 1;
            if core.machine.phase() == Phase::Idle {
                false
            } else {
                let _ = inner.apply(&mut core, EscalationEvent::Cancelled, "user cancelled");
                true
            }
        };

        if was_active {
            info!("Emergency cancelled");
            inner.notify(Notice::success("Emergency stopped immediately. You are safe!"));
        } else {
            debug!("Cancel requested with no active emergency");
            inner.notify(Notice::success("You are safe! No emergency active."));
        }
    }
}

/// Aborts attempt 1 when the `trigger()` future is dropped before it returns.
struct FirstAttemptGuard<'a> {
    inner: &'a Inner,
    generation: u64,
    token: CancellationToken,
    armed: bool,
}

impl FirstAttemptGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for FirstAttemptGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.token.cancel();
        let reason = "trigger dropped before attempt 1 finished";
        if self
            .inner
            .advance(self.generation, EscalationEvent::Aborted, reason)
            .is_some()
        {
            warn!(generation = self.generation, "SOS interrupted before it was sent");
            self.inner
                .notify(Notice::error("SOS interrupted before it was sent"));
        }
    }
}

impl Inner {
    fn core(&self) -> MutexGuard<'_, Core> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, notice: Notice) {
        // Err only means nobody is listening.
        let _ = self.notice_tx.send(notice);
    }

    fn apply(
        &self,
        core: &mut Core,
        event: EscalationEvent,
        reason: &str,
    ) -> Result<EscalationState, IllegalTransition> {
        match core.machine.apply(event, Some(reason)) {
            Ok(state) => {
                let state = state.clone();
                self.state_tx.send_replace(state.clone());
                Ok(state)
            }
            Err(e) => {
                warn!("{e}");
                Err(e)
            }
        }
    }

    /// Apply `event` if `generation` is still current.
    fn advance(
        &self,
        generation: u64,
        event: EscalationEvent,
        reason: &str,
    ) -> Option<EscalationState> {
        let mut core = self.core();
        if core.generation != generation {
            debug!(
                generation,
                current = core.generation,
                event = event.name(),
                "Discarding stale escalation event"
            );
            return None;
        }
        self.apply(&mut core, event, reason).ok()
    }

    fn ensure_current(&self, generation: u64) -> Result<(), EscalationError> {
        if self.core().generation == generation {
            Ok(())
        } else {
            Err(EscalationError::Cancelled)
        }
    }

    /// Record, locate and dispatch one attempt.
    async fn run_attempt(
        &self,
        generation: u64,
        token: &CancellationToken,
        attempt: u32,
        kind: AttemptKind,
        prior_recording_url: Option<String>,
    ) -> Result<DispatchResponse, EscalationError> {
        let window = self.policy.capture_window(attempt);

        let recording = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(EscalationError::Cancelled),
            started = self.caps.recorder.start() => started?,
        };
        debug!(attempt, window_secs = window.as_secs(), "Recording started");

        tokio::select! {
            biased;
            _ = token.cancelled() => return Err(EscalationError::Cancelled),
            _ = self.caps.clock.sleep(window) => {}
        }
        let clip = recording.finish().await?;
        self.ensure_current(generation)?;
        debug!(attempt, bytes = clip.bytes.len(), "Recording finished");

        // Fresh fix every attempt; the subject may have moved.
        let coordinates = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(EscalationError::Cancelled),
            located = self.caps.location.locate() => located?,
        };

        let request = DispatchRequest {
            kind,
            attempt,
            coordinates,
            audio: (!clip.bytes.is_empty()).then_some(clip),
            prior_recording_url,
        };
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(EscalationError::Cancelled),
            sent = self.caps.dispatcher.dispatch(request) => Ok(sent?),
        }
    }

    /// Feed an attempt's outcome to the state machine and report it.
    ///
    /// Returns the resulting phase, or `None` if the escalation was cancelled meanwhile.
    fn conclude_attempt(
        &self,
        generation: u64,
        attempt: u32,
        result: &Result<DispatchResponse, EscalationError>,
    ) -> Option<Phase> {
        let (event, reason) = match result {
            Ok(response) => (
                EscalationEvent::DispatchSucceeded {
                    recording_url: response.recording_url.clone(),
                },
                "dispatch completed".to_string(),
            ),
            Err(err) if err.keeps_cadence() => (EscalationEvent::DispatchFailed, err.to_string()),
            Err(err) => (EscalationEvent::Aborted, err.to_string()),
        };
        let state = self.advance(generation, event, &reason)?;

        match result {
            Ok(response) => {
                for failure in response.failures() {
                    warn!(attempt, contact = %failure.to, channel = %failure.channel, "Delivery failed");
                }
                info!(
                    attempt,
                    sms = response.sms_results.len(),
                    calls = response.call_results.len(),
                    recording = response.recording_url.as_deref().unwrap_or("none"),
                    "SOS dispatched"
                );
                self.notify(Notice::success(format!("SOS #{attempt} sent successfully!")));
            }
            Err(err) if attempt == 1 => {
                error!(attempt, "SOS failed: {err}");
                self.notify(Notice::error(format!("Failed to send SOS: {err}")));
            }
            Err(err) if err.keeps_cadence() => {
                warn!(attempt, "Automatic SOS failed; continuing: {err}");
                self.notify(Notice::error(format!("Failed to send SOS #{attempt}: {err}")));
            }
            Err(err) => {
                error!(attempt, "Automatic SOS aborted: {err}");
                self.notify(Notice::error(format!(
                    "Automatic SOS #{attempt} aborted: {err}"
                )));
            }
        }

        if state.phase == Phase::Completed {
            let max = state.attempt_number;
            info!(attempts = max, dispatched = state.dispatched, "Escalation completed");
            if state.dispatched == max {
                self.notify(Notice::success(format!("All {max} SOS messages sent!")));
            } else {
                self.notify(Notice::info(format!(
                    "Escalation completed ({} of {max} SOS messages sent)",
                    state.dispatched
                )));
            }
        } else if state.phase == Phase::CountingDown {
            self.notify(Notice::info(format!(
                "Next SOS in {} seconds",
                state.seconds_remaining
            )));
        }
        Some(state.phase)
    }

    /// Automatic attempts 2..=max of one escalation.
    async fn follow_up(self: Arc<Self>, generation: u64, token: CancellationToken) {
        loop {
            let Some(state) = self.count_down(generation, &token).await else {
                return;
            };
            let attempt = state.attempt_number;
            info!(attempt, "Countdown elapsed; sending automatic SOS");

            let result = self
                .run_attempt(
                    generation,
                    &token,
                    attempt,
                    AttemptKind::Delayed,
                    state.prior_recording,
                )
                .await;
            if matches!(result, Err(EscalationError::Cancelled)) {
                return;
            }
            if self.conclude_attempt(generation, attempt, &result) != Some(Phase::CountingDown) {
                return;
            }
        }
    }

    /// Tick until the countdown reaches zero; returns the new in-flight state.
    async fn count_down(
        &self,
        generation: u64,
        token: &CancellationToken,
    ) -> Option<EscalationState> {
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => return None,
                _ = self.caps.clock.sleep(self.policy.tick) => {}
            }
            let state = self.advance(generation, EscalationEvent::Tick, "countdown elapsed")?;
            if state.phase == Phase::AttemptInFlight {
                return Some(state);
            }
        }
    }
}
