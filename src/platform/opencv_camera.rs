//! Camera capture through OpenCV `VideoCapture`
//!
//! Each granted stream owns a dedicated reader thread that pulls frames
//! from the device and keeps only the latest one. Stopping the stream's
//! track clears the running flag; the thread exits on its next read and
//! releases the device.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use async_trait::async_trait;
use image::RgbImage;
use opencv::{
    core::Mat,
    imgproc,
    prelude::*,
    videoio::{self, VideoCapture},
};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::media::{
    MediaDevices, MediaError, MediaStream, ReadyState, TrackSettings, VideoConstraints,
    VideoFrame,
};

type LatestFrame = Arc<Mutex<Option<VideoFrame>>>;

/// Camera devices reachable through OpenCV
pub struct OpenCvDevices {
    device_index: i32,
}

impl OpenCvDevices {
    pub fn new(device_index: i32) -> Self {
        Self { device_index }
    }
}

#[async_trait]
impl MediaDevices for OpenCvDevices {
    async fn get_user_media(
        &self,
        constraints: VideoConstraints,
    ) -> Result<Box<dyn MediaStream>, MediaError> {
        let device_index = self.device_index;
        let running = Arc::new(AtomicBool::new(true));
        let latest: LatestFrame = Arc::new(Mutex::new(None));
        let (opened_tx, opened_rx) = oneshot::channel();

        let thread_running = Arc::clone(&running);
        let thread_latest = Arc::clone(&latest);
        thread::Builder::new()
            .name(format!("camera-{device_index}"))
            .spawn(move || {
                let mut capture = match open_capture(device_index, &constraints) {
                    Ok((capture, settings)) => {
                        let _ = opened_tx.send(Ok(settings));
                        capture
                    }
                    Err(e) => {
                        let _ = opened_tx.send(Err(e));
                        return;
                    }
                };

                info!(device_index, "camera reader thread started");
                read_frames(&mut capture, &thread_running, &thread_latest);

                if let Err(e) = capture.release() {
                    warn!(error = %e, "failed to release camera");
                }
                info!(device_index, "camera reader thread stopped");
            })
            .map_err(|e| MediaError::Device(format!("failed to spawn reader thread: {e}")))?;

        let settings = opened_rx
            .await
            .map_err(|_| MediaError::Device("camera reader thread exited".to_string()))??;

        Ok(Box::new(OpenCvStream {
            id: format!("opencv-{device_index}"),
            settings,
            running,
            latest,
        }))
    }
}

fn open_capture(
    device_index: i32,
    constraints: &VideoConstraints,
) -> Result<(VideoCapture, TrackSettings), MediaError> {
    let device = |e: opencv::Error| MediaError::Device(e.to_string());

    let mut capture = VideoCapture::new(device_index, videoio::CAP_ANY).map_err(device)?;
    if !capture.is_opened().map_err(device)? {
        return Err(MediaError::NotFound(format!("camera {device_index}")));
    }

    // Preferences only: the device picks the closest mode it supports
    capture
        .set(videoio::CAP_PROP_FRAME_WIDTH, constraints.ideal_width as f64)
        .map_err(device)?;
    capture
        .set(videoio::CAP_PROP_FRAME_HEIGHT, constraints.ideal_height() as f64)
        .map_err(device)?;
    capture
        .set(videoio::CAP_PROP_FPS, constraints.ideal_frame_rate)
        .map_err(device)?;

    let width = capture.get(videoio::CAP_PROP_FRAME_WIDTH).map_err(device)? as u32;
    let height = capture.get(videoio::CAP_PROP_FRAME_HEIGHT).map_err(device)? as u32;
    let fps = capture.get(videoio::CAP_PROP_FPS).map_err(device)?;

    Ok((
        capture,
        TrackSettings {
            label: format!("OpenCV camera {device_index}"),
            width,
            height,
            frame_rate: (fps > 0.0).then_some(fps),
        },
    ))
}

fn read_frames(capture: &mut VideoCapture, running: &AtomicBool, latest: &Mutex<Option<VideoFrame>>) {
    let mut bgr = Mat::default();
    let mut rgb = Mat::default();

    while running.load(Ordering::SeqCst) {
        match capture.read(&mut bgr) {
            Ok(true) if !bgr.empty() => {}
            Ok(_) => {
                debug!("camera returned no frame");
                continue;
            }
            Err(e) => {
                warn!(error = %e, "camera read failed");
                break;
            }
        }

        match to_rgb_image(&bgr, &mut rgb) {
            Ok(image) => {
                if let Ok(mut slot) = latest.lock() {
                    *slot = Some(VideoFrame::new(image));
                }
            }
            Err(e) => warn!(error = %e, "failed to convert camera frame"),
        }
    }

    running.store(false, Ordering::SeqCst);
}

fn to_rgb_image(bgr: &Mat, rgb: &mut Mat) -> opencv::Result<RgbImage> {
    imgproc::cvt_color(bgr, rgb, imgproc::COLOR_BGR2RGB, 0)?;
    let width = rgb.cols() as u32;
    let height = rgb.rows() as u32;
    let bytes = rgb.data_bytes()?.to_vec();
    RgbImage::from_raw(width, height, bytes).ok_or_else(|| {
        opencv::Error::new(opencv::core::StsBadSize, "frame buffer size mismatch")
    })
}

struct OpenCvStream {
    id: String,
    settings: TrackSettings,
    running: Arc<AtomicBool>,
    latest: LatestFrame,
}

impl MediaStream for OpenCvStream {
    fn id(&self) -> &str {
        &self.id
    }

    fn settings(&self) -> TrackSettings {
        self.settings.clone()
    }

    fn live_tracks(&self) -> usize {
        usize::from(self.running.load(Ordering::SeqCst))
    }

    fn stop_tracks(&mut self) -> usize {
        let was_running = self.running.swap(false, Ordering::SeqCst);
        if let Ok(mut slot) = self.latest.lock() {
            *slot = None;
        }
        usize::from(was_running)
    }

    fn ready_state(&self) -> ReadyState {
        if !self.running.load(Ordering::SeqCst) {
            return ReadyState::HaveNothing;
        }
        match self.latest.lock() {
            Ok(slot) if slot.is_some() => ReadyState::HaveEnoughData,
            _ => ReadyState::HaveMetadata,
        }
    }

    fn current_frame(&mut self) -> Option<VideoFrame> {
        self.latest.lock().ok()?.clone()
    }
}

impl Drop for OpenCvStream {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}
