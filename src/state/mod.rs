//! Controller state
//!
//! - `CaptureMachine`: the `Off`/`On` capture toggle and its generations
//! - `EngineSlot`: the pose engine, uninitialized until loading completes
//! - `CaptureStatus`: a serializable snapshot of both

mod engine;
mod machine;

use serde::{Deserialize, Serialize};

pub use engine::{EngineSlot, SharedLandmarker};
pub use machine::{CaptureMachine, CaptureState};

use crate::platform::TrackSettings;

/// Snapshot of controller state, as reported to status queries
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaptureStatus {
    pub capture: CaptureState,
    /// Label the toggle control should show
    pub toggle_label: String,
    pub engine_ready: bool,
    pub fullscreen: bool,
    /// Settings of the attached stream, if any
    pub stream: Option<TrackSettings>,
    pub generation: u64,
    pub frames_rendered: u64,
    pub frames_without_pose: u64,
    pub frames_not_ready: u64,
    pub stale_results: u64,
}
