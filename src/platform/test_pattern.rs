//! Synthetic camera producing a moving test pattern
//!
//! Used when no capture backend is compiled in. Negotiates constraints the
//! way a typical webcam does: honours the requested size, caps the frame
//! rate at what the "sensor" supports, and reports no data until a short
//! warm-up has passed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use image::{Rgb, RgbImage};
use tracing::debug;

use super::media::{
    MediaDevices, MediaError, MediaStream, ReadyState, TrackSettings, VideoConstraints,
    VideoFrame,
};

/// Width of the sweeping bar, as a fraction of frame width
const BAR_FRACTION: u32 = 16;

pub struct TestPatternCamera {
    max_frame_rate: f64,
    warmup: Duration,
    next_id: AtomicU64,
}

impl TestPatternCamera {
    pub fn new(max_frame_rate: f64, warmup: Duration) -> Self {
        Self {
            max_frame_rate,
            warmup,
            next_id: AtomicU64::new(1),
        }
    }
}

#[async_trait]
impl MediaDevices for TestPatternCamera {
    async fn get_user_media(
        &self,
        constraints: VideoConstraints,
    ) -> Result<Box<dyn MediaStream>, MediaError> {
        let width = constraints.ideal_width;
        let height = constraints.ideal_height();
        if width == 0 || height == 0 {
            return Err(MediaError::NotFound(format!(
                "cannot produce {}x{} frames",
                width, height
            )));
        }

        let frame_rate = constraints.ideal_frame_rate.min(self.max_frame_rate);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(id, width, height, frame_rate, "test pattern stream opened");

        Ok(Box::new(TestPatternStream {
            id: format!("test-pattern-{id}"),
            settings: TrackSettings {
                label: "Test Pattern".to_string(),
                width,
                height,
                frame_rate: Some(frame_rate),
            },
            started: Instant::now(),
            warmup: self.warmup,
            live: true,
            cached: None,
        }))
    }
}

struct TestPatternStream {
    id: String,
    settings: TrackSettings,
    started: Instant,
    warmup: Duration,
    live: bool,
    /// Last rendered frame and its index
    cached: Option<(u64, VideoFrame)>,
}

impl TestPatternStream {
    fn frame_index(&self) -> Option<u64> {
        let elapsed = self.started.elapsed().checked_sub(self.warmup)?;
        let fps = self.settings.frame_rate.unwrap_or(30.0).max(1.0);
        Some((elapsed.as_secs_f64() * fps) as u64)
    }
}

impl MediaStream for TestPatternStream {
    fn id(&self) -> &str {
        &self.id
    }

    fn settings(&self) -> TrackSettings {
        self.settings.clone()
    }

    fn live_tracks(&self) -> usize {
        usize::from(self.live)
    }

    fn stop_tracks(&mut self) -> usize {
        let stopped = self.live_tracks();
        self.live = false;
        self.cached = None;
        stopped
    }

    fn ready_state(&self) -> ReadyState {
        if !self.live {
            ReadyState::HaveNothing
        } else if self.frame_index().is_none() {
            ReadyState::HaveMetadata
        } else {
            ReadyState::HaveEnoughData
        }
    }

    fn current_frame(&mut self) -> Option<VideoFrame> {
        if !self.live {
            return None;
        }
        let index = self.frame_index()?;
        if let Some((cached_index, frame)) = &self.cached {
            if *cached_index == index {
                return Some(frame.clone());
            }
        }

        let frame = VideoFrame::new(render_pattern(
            self.settings.width,
            self.settings.height,
            index,
        ));
        self.cached = Some((index, frame.clone()));
        Some(frame)
    }
}

/// Gradient background with a bright bar sweeping left to right
fn render_pattern(width: u32, height: u32, index: u64) -> RgbImage {
    let bar_width = (width / BAR_FRACTION).max(1);
    let bar_x = (index * 8 % width as u64) as u32;

    RgbImage::from_fn(width, height, |x, y| {
        if x >= bar_x && x < bar_x + bar_width {
            return Rgb([240, 240, 240]);
        }
        let r = (x * 255 / width.max(1)) as u8;
        let g = (y * 255 / height.max(1)) as u8;
        Rgb([r, g, 96])
    })
}
