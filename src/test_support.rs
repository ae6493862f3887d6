//! Fakes for the platform, engine and painter seams

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use image::RgbImage;
use tokio::sync::{mpsc, Notify};

use crate::engine::{
    EngineError, EngineLoader, LandmarkerOptions, NormalizedLandmark, PoseLandmarker,
    PoseLandmarkerResult,
};
use crate::events::ControlEvent;
use crate::platform::{
    MediaDevices, MediaError, MediaStream, Presentation, PresentationError, ReadyState,
    TrackSettings, VideoConstraints, VideoFrame,
};
use crate::render::{Canvas, DrawingStyle, LandmarkPainter};

pub fn landmark(x: f32, y: f32) -> NormalizedLandmark {
    NormalizedLandmark {
        x,
        y,
        z: 0.0,
        visibility: 1.0,
    }
}

struct StreamState {
    live_tracks: usize,
    ready_state: ReadyState,
    frame: VideoFrame,
}

/// Observes a `FakeStream` after it has been handed to the controller
#[derive(Clone)]
pub struct StreamProbe {
    state: Arc<Mutex<StreamState>>,
}

impl StreamProbe {
    pub fn live_tracks(&self) -> usize {
        self.state.lock().unwrap().live_tracks
    }

    pub fn set_ready_state(&self, ready_state: ReadyState) {
        self.state.lock().unwrap().ready_state = ready_state;
    }

    pub fn set_frame_size(&self, width: u32, height: u32) {
        self.state.lock().unwrap().frame = VideoFrame::new(RgbImage::new(width, height));
    }
}

pub struct FakeStream {
    settings: TrackSettings,
    state: Arc<Mutex<StreamState>>,
}

impl FakeStream {
    pub fn new(width: u32, height: u32) -> (Self, StreamProbe) {
        let state = Arc::new(Mutex::new(StreamState {
            live_tracks: 1,
            ready_state: ReadyState::HaveEnoughData,
            frame: VideoFrame::new(RgbImage::new(width, height)),
        }));
        let stream = Self {
            settings: TrackSettings {
                label: "Fake Camera".to_string(),
                width,
                height,
                frame_rate: Some(60.0),
            },
            state: Arc::clone(&state),
        };
        (stream, StreamProbe { state })
    }

    pub fn set_ready_state(&self, ready_state: ReadyState) {
        self.state.lock().unwrap().ready_state = ready_state;
    }
}

impl MediaStream for FakeStream {
    fn id(&self) -> &str {
        "fake"
    }

    fn settings(&self) -> TrackSettings {
        self.settings.clone()
    }

    fn live_tracks(&self) -> usize {
        self.state.lock().unwrap().live_tracks
    }

    fn stop_tracks(&mut self) -> usize {
        std::mem::take(&mut self.state.lock().unwrap().live_tracks)
    }

    fn ready_state(&self) -> ReadyState {
        self.state.lock().unwrap().ready_state
    }

    fn current_frame(&mut self) -> Option<VideoFrame> {
        Some(self.state.lock().unwrap().frame.clone())
    }
}

/// Media devices that hand out queued grants or errors, optionally held
/// until released
#[derive(Default)]
pub struct FakeDevices {
    outcomes: Mutex<VecDeque<Result<FakeStream, MediaError>>>,
    requests: Mutex<Vec<VideoConstraints>>,
    gate: Option<Arc<Notify>>,
}

impl FakeDevices {
    pub fn granting(streams: Vec<FakeStream>) -> Self {
        Self {
            outcomes: Mutex::new(streams.into_iter().map(Ok).collect()),
            ..Default::default()
        }
    }

    pub fn failing(error: MediaError) -> Self {
        Self {
            outcomes: Mutex::new(VecDeque::from([Err(error)])),
            ..Default::default()
        }
    }

    /// Hold every grant until the returned gate is notified
    pub fn gated(mut self) -> (Self, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        self.gate = Some(Arc::clone(&gate));
        (self, gate)
    }

    pub fn requests(&self) -> Vec<VideoConstraints> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaDevices for FakeDevices {
    async fn get_user_media(
        &self,
        constraints: VideoConstraints,
    ) -> Result<Box<dyn MediaStream>, MediaError> {
        self.requests.lock().unwrap().push(constraints);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        let outcome = self
            .outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(MediaError::NotFound("no fake stream queued".to_string())));
        outcome.map(|stream| Box::new(stream) as Box<dyn MediaStream>)
    }
}

/// Presentation that records calls and reports changes like a real one
pub struct FakePresentation {
    fullscreen: AtomicBool,
    refuse_requests: bool,
    requests: AtomicUsize,
    exits: AtomicUsize,
    notify_tx: Option<mpsc::Sender<ControlEvent>>,
}

impl FakePresentation {
    pub fn new() -> Self {
        Self {
            fullscreen: AtomicBool::new(false),
            refuse_requests: false,
            requests: AtomicUsize::new(0),
            exits: AtomicUsize::new(0),
            notify_tx: None,
        }
    }

    pub fn refusing() -> Self {
        Self {
            refuse_requests: true,
            ..Self::new()
        }
    }

    pub fn notifying(notify_tx: mpsc::Sender<ControlEvent>) -> Self {
        Self {
            notify_tx: Some(notify_tx),
            ..Self::new()
        }
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn exits(&self) -> usize {
        self.exits.load(Ordering::SeqCst)
    }

    /// Leave fullscreen without going through `exit_fullscreen`, as when
    /// the user presses Escape
    pub fn user_exit(&self) {
        self.set(false);
    }

    fn set(&self, fullscreen: bool) {
        if self.fullscreen.swap(fullscreen, Ordering::SeqCst) != fullscreen {
            if let Some(tx) = &self.notify_tx {
                let _ = tx.try_send(ControlEvent::FullscreenChanged { fullscreen });
            }
        }
    }
}

#[async_trait]
impl Presentation for FakePresentation {
    async fn request_fullscreen(&self) -> Result<(), PresentationError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if self.refuse_requests {
            return Err(PresentationError::NotAllowed("denied by test".to_string()));
        }
        self.set(true);
        Ok(())
    }

    async fn exit_fullscreen(&self) -> Result<(), PresentationError> {
        self.exits.fetch_add(1, Ordering::SeqCst);
        self.set(false);
        Ok(())
    }

    fn is_fullscreen(&self) -> bool {
        self.fullscreen.load(Ordering::SeqCst)
    }
}

/// Landmarker returning a fixed result and counting calls
pub struct FakeLandmarker {
    result: PoseLandmarkerResult,
    calls: Arc<AtomicUsize>,
    timestamps: Arc<Mutex<Vec<f64>>>,
}

impl FakeLandmarker {
    pub fn returning(result: PoseLandmarkerResult) -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let landmarker = Self {
            result,
            calls: Arc::clone(&calls),
            timestamps: Arc::new(Mutex::new(Vec::new())),
        };
        (landmarker, calls)
    }

    pub fn empty() -> (Self, Arc<AtomicUsize>) {
        Self::returning(PoseLandmarkerResult::default())
    }

    pub fn timestamps(&self) -> Arc<Mutex<Vec<f64>>> {
        Arc::clone(&self.timestamps)
    }
}

impl PoseLandmarker for FakeLandmarker {
    fn detect_for_video(
        &mut self,
        _frame: &VideoFrame,
        timestamp_ms: f64,
    ) -> Result<PoseLandmarkerResult, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.timestamps.lock().unwrap().push(timestamp_ms);
        Ok(self.result.clone())
    }

    fn backend(&self) -> String {
        "fake".to_string()
    }
}

/// Loader handing out one prepared landmarker, or failing
pub struct FakeLoader {
    landmarker: Mutex<Option<FakeLandmarker>>,
}

impl FakeLoader {
    pub fn with(landmarker: FakeLandmarker) -> Self {
        Self {
            landmarker: Mutex::new(Some(landmarker)),
        }
    }

    pub fn failing() -> Self {
        Self {
            landmarker: Mutex::new(None),
        }
    }
}

#[async_trait]
impl EngineLoader for FakeLoader {
    async fn load(
        &self,
        options: LandmarkerOptions,
    ) -> Result<Box<dyn PoseLandmarker>, EngineError> {
        match self.landmarker.lock().unwrap().take() {
            Some(landmarker) => Ok(Box::new(landmarker)),
            None => Err(EngineError::ModelLoad {
                path: options.model.to_string().into(),
                message: "fake load failure".to_string(),
            }),
        }
    }
}

/// One recorded `draw_landmarks` call
#[derive(Debug, Clone, PartialEq)]
pub struct DrawCall {
    pub canvas_size: (u32, u32),
    pub landmarks: Vec<NormalizedLandmark>,
    pub style: DrawingStyle,
}

/// Painter that records what it was asked to draw
#[derive(Default)]
pub struct RecordingPainter {
    calls: Arc<Mutex<Vec<DrawCall>>>,
}

impl RecordingPainter {
    pub fn new() -> (Self, Arc<Mutex<Vec<DrawCall>>>) {
        let painter = Self::default();
        let calls = Arc::clone(&painter.calls);
        (painter, calls)
    }
}

impl LandmarkPainter for RecordingPainter {
    fn draw_landmarks(
        &mut self,
        canvas: &mut Canvas,
        landmarks: &[NormalizedLandmark],
        style: &DrawingStyle,
    ) {
        self.calls.lock().unwrap().push(DrawCall {
            canvas_size: (canvas.width(), canvas.height()),
            landmarks: landmarks.to_vec(),
            style: style.clone(),
        });
    }
}
