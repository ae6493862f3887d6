//! Camera media seam
//!
//! Mirrors the shape of a browser media pipeline: a device layer that
//! negotiates a stream from constraints, streams that own their tracks,
//! and a video element that a stream is attached to and frames are read
//! from.

use std::sync::Arc;

use async_trait::async_trait;
use image::RgbImage;
use serde::{Deserialize, Serialize};

/// Constraints for requesting a camera video stream
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConstraints {
    /// Width divided by height
    pub aspect_ratio: f64,
    /// Preferred frame width in pixels
    pub ideal_width: u32,
    /// Preferred frame rate; devices may negotiate lower
    pub ideal_frame_rate: f64,
}

impl Default for VideoConstraints {
    fn default() -> Self {
        Self {
            aspect_ratio: 16.0 / 9.0,
            ideal_width: 1280,
            ideal_frame_rate: 60.0,
        }
    }
}

impl VideoConstraints {
    /// Height implied by the ideal width and aspect ratio
    pub fn ideal_height(&self) -> u32 {
        (self.ideal_width as f64 / self.aspect_ratio).round() as u32
    }
}

/// Settings of a negotiated video track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackSettings {
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub frame_rate: Option<f64>,
}

/// How much media a video source has buffered, in increasing order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReadyState {
    HaveNothing,
    HaveMetadata,
    HaveCurrentData,
    HaveFutureData,
    HaveEnoughData,
}

/// A single decoded camera frame, shareable across threads
#[derive(Debug, Clone)]
pub struct VideoFrame {
    image: Arc<RgbImage>,
}

impl VideoFrame {
    pub fn new(image: RgbImage) -> Self {
        Self {
            image: Arc::new(image),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }
}

/// Errors raised while acquiring camera media
#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("media devices are not available on this platform")]
    Unsupported,

    #[error("camera permission denied")]
    PermissionDenied,

    #[error("no camera satisfies the requested constraints: {0}")]
    NotFound(String),

    #[error("camera device error: {0}")]
    Device(String),
}

/// Source of camera streams
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Request a camera stream. Suspends until the device grants or refuses.
    async fn get_user_media(
        &self,
        constraints: VideoConstraints,
    ) -> Result<Box<dyn MediaStream>, MediaError>;
}

/// A live camera stream and its tracks
pub trait MediaStream: Send {
    fn id(&self) -> &str;

    /// Settings of the first video track
    fn settings(&self) -> TrackSettings;

    /// Number of tracks that have not been stopped
    fn live_tracks(&self) -> usize;

    /// Stop every live track, releasing the device. Returns how many were
    /// stopped.
    fn stop_tracks(&mut self) -> usize;

    fn ready_state(&self) -> ReadyState;

    /// The most recent decoded frame, if one is available
    fn current_frame(&mut self) -> Option<VideoFrame>;
}

/// Display target for a camera stream
#[derive(Default)]
pub struct VideoElement {
    source: Option<Box<dyn MediaStream>>,
}

impl VideoElement {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a stream, returning any stream it replaced
    pub fn attach(&mut self, stream: Box<dyn MediaStream>) -> Option<Box<dyn MediaStream>> {
        self.source.replace(stream)
    }

    pub fn detach(&mut self) -> Option<Box<dyn MediaStream>> {
        self.source.take()
    }

    pub fn has_source(&self) -> bool {
        self.source.is_some()
    }

    pub fn settings(&self) -> Option<TrackSettings> {
        self.source.as_ref().map(|s| s.settings())
    }

    pub fn ready_state(&self) -> ReadyState {
        self.source
            .as_ref()
            .map(|s| s.ready_state())
            .unwrap_or(ReadyState::HaveNothing)
    }

    /// The current frame, if the source has decodable data and the frame
    /// has a non-zero size
    pub fn ready_frame(&mut self) -> Option<VideoFrame> {
        if self.ready_state() < ReadyState::HaveCurrentData {
            return None;
        }
        let frame = self.source.as_mut()?.current_frame()?;
        if frame.width() == 0 || frame.height() == 0 {
            return None;
        }
        Some(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeStream;

    #[test]
    fn test_default_constraints() {
        let constraints = VideoConstraints::default();
        assert_eq!(constraints.ideal_width, 1280);
        assert_eq!(constraints.ideal_height(), 720);
        assert_eq!(constraints.ideal_frame_rate, 60.0);
    }

    #[test]
    fn test_ready_state_ordering() {
        assert!(ReadyState::HaveMetadata < ReadyState::HaveCurrentData);
        assert!(ReadyState::HaveEnoughData >= ReadyState::HaveCurrentData);
    }

    #[test]
    fn test_empty_element_not_ready() {
        let mut element = VideoElement::new();
        assert_eq!(element.ready_state(), ReadyState::HaveNothing);
        assert!(element.ready_frame().is_none());
    }

    #[test]
    fn test_metadata_only_is_not_ready() {
        let (stream, _) = FakeStream::new(640, 480);
        stream.set_ready_state(ReadyState::HaveMetadata);
        let mut element = VideoElement::new();
        element.attach(Box::new(stream));

        assert!(element.ready_frame().is_none());
    }

    #[test]
    fn test_zero_sized_frame_is_not_ready() {
        let (stream, _) = FakeStream::new(0, 0);
        let mut element = VideoElement::new();
        element.attach(Box::new(stream));

        assert!(element.ready_frame().is_none());
    }

    #[test]
    fn test_ready_frame() {
        let (stream, _) = FakeStream::new(640, 480);
        let mut element = VideoElement::new();
        element.attach(Box::new(stream));

        let frame = element.ready_frame().unwrap();
        assert_eq!((frame.width(), frame.height()), (640, 480));
    }
}
