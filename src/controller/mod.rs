//! Capture/render controller
//!
//! A single task owns all overlay state: the capture machine, the engine
//! slot, the video element, and the overlay canvas. Everything else talks
//! to it through channels:
//!
//! - `ControlEvent`s from the control surface and the presentation layer
//! - completions from work it spawned (camera grants, engine loading,
//!   detections), tagged with the capture generation they belong to
//! - frame clock ticks, each running one iteration of the frame loop
//!
//! Nothing is shared with other tasks except through those channels, so
//! state is only ever touched from this task.

mod frame_loop;
mod toggle;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info};

pub use frame_loop::FrameClock;

use crate::engine::{EngineError, EngineLoader, LandmarkerOptions, PoseLandmarker, PoseLandmarkerResult};
use crate::events::{ControlEvent, OverlayEvent};
use crate::platform::{
    MediaDevices, MediaError, MediaStream, Presentation, VideoConstraints, VideoElement,
    VideoFrame,
};
use crate::render::{self, Canvas, DrawingStyle, LandmarkPainter, RenderError};
use crate::state::{CaptureMachine, CaptureStatus, EngineSlot};

/// Results of work the controller spawned
enum Completion {
    StreamGranted {
        generation: u64,
        result: Result<Box<dyn MediaStream>, MediaError>,
    },
    EngineLoaded(Result<Box<dyn PoseLandmarker>, EngineError>),
    Detection {
        generation: u64,
        result: Result<PoseLandmarkerResult, EngineError>,
    },
}

/// Per-frame outcome counters
#[derive(Debug, Default, Clone, Copy)]
struct FrameStats {
    rendered: u64,
    without_pose: u64,
    not_ready: u64,
    stale_results: u64,
}

pub struct Controller {
    capture: CaptureMachine,
    engine: EngineSlot,
    video: VideoElement,
    canvas: Canvas,
    painter: Box<dyn LandmarkPainter>,
    style: DrawingStyle,
    constraints: VideoConstraints,
    media: Arc<dyn MediaDevices>,
    presentation: Arc<dyn Presentation>,
    event_tx: broadcast::Sender<OverlayEvent>,
    completion_tx: mpsc::UnboundedSender<Completion>,
    completion_rx: mpsc::UnboundedReceiver<Completion>,
    /// At most one detection runs at a time
    detection_in_flight: bool,
    /// Frame the canvas currently overlays
    last_frame: Option<VideoFrame>,
    /// Origin of detection timestamps
    started_at: Instant,
    stats: FrameStats,
}

impl Controller {
    pub fn new(
        media: Arc<dyn MediaDevices>,
        presentation: Arc<dyn Presentation>,
        painter: Box<dyn LandmarkPainter>,
        constraints: VideoConstraints,
        style: DrawingStyle,
        event_tx: broadcast::Sender<OverlayEvent>,
    ) -> Self {
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        Self {
            capture: CaptureMachine::new(event_tx.clone()),
            engine: EngineSlot::default(),
            video: VideoElement::new(),
            canvas: Canvas::new(),
            painter,
            style,
            constraints,
            media,
            presentation,
            event_tx,
            completion_tx,
            completion_rx,
            detection_in_flight: false,
            last_frame: None,
            started_at: Instant::now(),
            stats: FrameStats::default(),
        }
    }

    /// Load the pose engine in the background. Its result arrives through
    /// the controller's own queue; there is no retry.
    pub fn start_engine(&self, loader: Arc<dyn EngineLoader>, options: LandmarkerOptions) {
        let completion_tx = self.completion_tx.clone();
        tokio::spawn(async move {
            let result = loader.load(options).await;
            let _ = completion_tx.send(Completion::EngineLoaded(result));
        });
    }

    /// Run until the control channel closes
    pub async fn run(
        &mut self,
        control_rx: &mut mpsc::Receiver<ControlEvent>,
        mut clock: FrameClock,
    ) {
        info!(
            period_ms = clock.period().as_secs_f64() * 1000.0,
            "controller started with capture off"
        );

        loop {
            tokio::select! {
                event = control_rx.recv() => match event {
                    Some(event) => self.handle_control(event).await,
                    None => break,
                },
                Some(completion) = self.completion_rx.recv() => {
                    self.handle_completion(completion).await;
                }
                _ = clock.tick() => self.on_animation_frame(),
            }
        }

        info!("controller stopped");
    }

    pub(crate) async fn handle_control(&mut self, event: ControlEvent) {
        match event {
            ControlEvent::Toggle => self.toggle().await,
            ControlEvent::FullscreenChanged { fullscreen } => {
                self.on_fullscreen_change(fullscreen).await;
            }
            ControlEvent::Snapshot { path, reply } => self.snapshot(path, reply),
            ControlEvent::Status { reply } => {
                let _ = reply.send(self.status());
            }
        }
    }

    async fn handle_completion(&mut self, completion: Completion) {
        match completion {
            Completion::StreamGranted { generation, result } => {
                self.on_stream_granted(generation, result).await;
            }
            Completion::EngineLoaded(result) => self.on_engine_loaded(result),
            Completion::Detection { generation, result } => self.on_detection(generation, result),
        }
    }

    fn on_engine_loaded(&mut self, result: Result<Box<dyn PoseLandmarker>, EngineError>) {
        match result {
            Ok(landmarker) => {
                let backend = landmarker.backend();
                if self.engine.install(landmarker) {
                    info!(%backend, "pose engine ready");
                    self.emit(OverlayEvent::EngineReady { backend });
                }
            }
            Err(e) => {
                error!(error = %e, "pose engine failed to load");
                self.emit(OverlayEvent::EngineFailed {
                    message: e.to_string(),
                });
            }
        }
    }

    /// Snapshot of controller state
    pub fn status(&self) -> CaptureStatus {
        let capture = self.capture.state();
        CaptureStatus {
            capture,
            toggle_label: capture.toggle_label().to_string(),
            engine_ready: self.engine.is_ready(),
            fullscreen: self.presentation.is_fullscreen(),
            stream: self.video.settings(),
            generation: self.capture.generation(),
            frames_rendered: self.stats.rendered,
            frames_without_pose: self.stats.without_pose,
            frames_not_ready: self.stats.not_ready,
            stale_results: self.stats.stale_results,
        }
    }

    /// Encode the current frame and overlay off the controller task
    fn snapshot(&self, path: PathBuf, reply: oneshot::Sender<Result<PathBuf, RenderError>>) {
        let Some(frame) = self.last_frame.clone() else {
            let _ = reply.send(Err(RenderError::NothingToCapture));
            return;
        };
        let canvas = self.canvas.clone();

        tokio::task::spawn_blocking(move || {
            let result = render::save_snapshot(&frame, &canvas, &path).map(|()| path);
            match &result {
                Ok(path) => info!(path = %path.display(), "snapshot saved"),
                Err(e) => debug!(error = %e, "snapshot failed"),
            }
            let _ = reply.send(result);
        });
    }

    /// Release the camera before the process exits
    pub async fn unmount(&mut self) {
        if self.capture.is_on() {
            self.toggle_for(crate::events::StopReason::Shutdown).await;
        }
    }

    fn emit(&self, event: OverlayEvent) {
        debug!(%event, "emitting controller event");
        let _ = self.event_tx.send(event);
    }

    /// Wait for one spawned task to report back and handle it
    #[cfg(test)]
    pub(crate) async fn pump(&mut self) {
        if let Some(completion) = self.completion_rx.recv().await {
            self.handle_completion(completion).await;
        }
    }
}
