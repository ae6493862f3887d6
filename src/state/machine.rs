//! Capture state machine
//!
//! Two states, `Off` and `On`. Every entry into `On` starts a new capture
//! generation so work issued under an earlier period can be recognised
//! and dropped when it completes late.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::events::{OverlayEvent, StopReason};

/// Whether the camera stream is being acquired and displayed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureState {
    #[default]
    Off,
    On,
}

impl CaptureState {
    /// Label for the toggle control in this state
    pub fn toggle_label(&self) -> &'static str {
        match self {
            CaptureState::Off => "Enable Webcam",
            CaptureState::On => "Disable Webcam",
        }
    }
}

impl std::fmt::Display for CaptureState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureState::Off => write!(f, "Off"),
            CaptureState::On => write!(f, "On"),
        }
    }
}

/// Tracks capture state, its generation, and emits transition events
pub struct CaptureMachine {
    state: CaptureState,
    generation: u64,
    /// Time when the current `On` period began
    entered_at: Option<Instant>,
    event_tx: broadcast::Sender<OverlayEvent>,
}

impl CaptureMachine {
    pub fn new(event_tx: broadcast::Sender<OverlayEvent>) -> Self {
        Self {
            state: CaptureState::Off,
            generation: 0,
            entered_at: None,
            event_tx,
        }
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn is_on(&self) -> bool {
        self.state == CaptureState::On
    }

    /// Generation of the current (or most recent) `On` period
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// True when `generation` names the capture period that is still on
    pub fn is_current(&self, generation: u64) -> bool {
        self.is_on() && self.generation == generation
    }

    /// Enter `On`, returning the new generation.
    ///
    /// Calling this while already on is a no-op that returns the running
    /// generation.
    pub fn turn_on(&mut self) -> u64 {
        if self.is_on() {
            return self.generation;
        }

        self.generation += 1;
        self.state = CaptureState::On;
        self.entered_at = Some(Instant::now());

        info!(
            from = %CaptureState::Off,
            to = %CaptureState::On,
            generation = self.generation,
            "capture transition"
        );
        self.emit(OverlayEvent::CaptureStarted {
            generation: self.generation,
        });

        self.generation
    }

    /// Leave `On`. Returns false if capture was already off.
    pub fn turn_off(&mut self, reason: StopReason, tracks_stopped: usize) -> bool {
        if !self.is_on() {
            return false;
        }

        let duration_ms = self
            .entered_at
            .take()
            .map(|t| t.elapsed().as_millis() as u64)
            .unwrap_or(0);
        self.state = CaptureState::Off;

        info!(
            from = %CaptureState::On,
            to = %CaptureState::Off,
            %reason,
            duration_ms,
            tracks_stopped,
            "capture transition"
        );
        self.emit(OverlayEvent::CaptureStopped {
            duration_ms,
            tracks_stopped,
            reason,
        });

        true
    }

    fn emit(&self, event: OverlayEvent) {
        debug!(%event, "emitting capture event");
        // No subscribers is fine.
        let _ = self.event_tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_machine() -> (CaptureMachine, broadcast::Receiver<OverlayEvent>) {
        let (tx, rx) = broadcast::channel(16);
        (CaptureMachine::new(tx), rx)
    }

    #[test]
    fn test_initial_state() {
        let (machine, _) = create_machine();
        assert_eq!(machine.state(), CaptureState::Off);
        assert_eq!(machine.generation(), 0);
        assert!(!machine.is_current(0));
    }

    #[test]
    fn test_turn_on_bumps_generation() {
        let (mut machine, mut rx) = create_machine();

        assert_eq!(machine.turn_on(), 1);
        assert!(machine.is_on());
        assert!(machine.is_current(1));
        assert_eq!(
            rx.try_recv().unwrap(),
            OverlayEvent::CaptureStarted { generation: 1 }
        );

        // Already on: same generation, no event
        assert_eq!(machine.turn_on(), 1);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_turn_off_emits_reason() {
        let (mut machine, mut rx) = create_machine();
        machine.turn_on();
        let _ = rx.try_recv();

        assert!(machine.turn_off(StopReason::FullscreenExit, 1));
        assert_eq!(machine.state(), CaptureState::Off);
        assert!(!machine.is_current(1));

        match rx.try_recv().unwrap() {
            OverlayEvent::CaptureStopped {
                tracks_stopped,
                reason,
                ..
            } => {
                assert_eq!(tracks_stopped, 1);
                assert_eq!(reason, StopReason::FullscreenExit);
            }
            other => panic!("unexpected event {other:?}"),
        }

        // Already off
        assert!(!machine.turn_off(StopReason::User, 0));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_old_generation_is_not_current() {
        let (mut machine, _) = create_machine();
        let first = machine.turn_on();
        machine.turn_off(StopReason::User, 0);
        let second = machine.turn_on();

        assert_ne!(first, second);
        assert!(!machine.is_current(first));
        assert!(machine.is_current(second));
    }

    #[test]
    fn test_toggle_labels() {
        assert_eq!(CaptureState::Off.toggle_label(), "Enable Webcam");
        assert_eq!(CaptureState::On.toggle_label(), "Disable Webcam");
    }
}
