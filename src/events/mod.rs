//! Events module for controller inputs and outputs
//!
//! `ControlEvent` is everything that can drive the controller from the
//! outside (the toggle control, fullscreen notifications, status and
//! snapshot queries). `OverlayEvent` is what the controller broadcasts
//! back as capture and engine state changes.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::render::RenderError;
use crate::state::CaptureStatus;

/// Inputs delivered to the controller task
#[derive(Debug)]
pub enum ControlEvent {
    /// The capture toggle was pressed
    Toggle,

    /// The presentation layer entered or left fullscreen
    FullscreenChanged { fullscreen: bool },

    /// Write the current frame with its overlay to a PNG file
    Snapshot {
        path: PathBuf,
        reply: oneshot::Sender<Result<PathBuf, RenderError>>,
    },

    /// Report a snapshot of controller state
    Status { reply: oneshot::Sender<CaptureStatus> },
}

/// Why a capture period ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The toggle control was pressed
    User,
    /// Fullscreen was left while capturing
    FullscreenExit,
    /// The camera could not be acquired
    DeviceError,
    /// The controller is shutting down
    Shutdown,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::User => write!(f, "user"),
            StopReason::FullscreenExit => write!(f, "fullscreen_exit"),
            StopReason::DeviceError => write!(f, "device_error"),
            StopReason::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// Events broadcast by the controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OverlayEvent {
    /// Capture turned on; a camera stream has been requested
    CaptureStarted {
        /// Identifies this capture period
        generation: u64,
    },

    /// A granted camera stream was attached to the video source
    StreamAttached {
        width: u32,
        height: u32,
        /// Negotiated frame rate, when the device reports one
        frame_rate: Option<f64>,
    },

    /// The camera could not be acquired
    CaptureFailed { message: String },

    /// Capture turned off
    CaptureStopped {
        /// Duration in milliseconds that capture was on
        duration_ms: u64,
        /// Number of media tracks stopped
        tracks_stopped: usize,
        reason: StopReason,
    },

    /// The pose engine finished loading
    EngineReady { backend: String },

    /// The pose engine failed to load and will stay uninitialized
    EngineFailed { message: String },
}

impl fmt::Display for OverlayEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverlayEvent::CaptureStarted { generation } => {
                write!(f, "CAPTURE_STARTED (#{})", generation)
            }
            OverlayEvent::StreamAttached {
                width,
                height,
                frame_rate,
            } => match frame_rate {
                Some(fps) => write!(f, "STREAM_ATTACHED ({}x{}@{:.0})", width, height, fps),
                None => write!(f, "STREAM_ATTACHED ({}x{})", width, height),
            },
            OverlayEvent::CaptureFailed { message } => write!(f, "CAPTURE_FAILED ({})", message),
            OverlayEvent::CaptureStopped {
                duration_ms,
                reason,
                ..
            } => write!(f, "CAPTURE_STOPPED ({}ms, {})", duration_ms, reason),
            OverlayEvent::EngineReady { backend } => write!(f, "ENGINE_READY ({})", backend),
            OverlayEvent::EngineFailed { message } => write!(f, "ENGINE_FAILED ({})", message),
        }
    }
}
