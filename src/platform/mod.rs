//! Platform seams: camera media and fullscreen presentation
//!
//! The controller only talks to the traits defined here. Concrete
//! backends:
//! - `TestPatternCamera`: synthetic camera, always available
//! - `OpenCvDevices`: real cameras through OpenCV (`camera-opencv` feature)
//! - `HeadlessPresentation`: fullscreen state without a display

mod media;
#[cfg(feature = "camera-opencv")]
mod opencv_camera;
mod presentation;
mod test_pattern;

use std::sync::Arc;

pub use media::{
    MediaDevices, MediaError, MediaStream, ReadyState, TrackSettings, VideoConstraints,
    VideoElement, VideoFrame,
};
#[cfg(feature = "camera-opencv")]
pub use opencv_camera::OpenCvDevices;
pub use presentation::{HeadlessPresentation, Presentation, PresentationError};
pub use test_pattern::TestPatternCamera;

use crate::config::CaptureConfig;

/// Pick the camera backend compiled into this build
pub fn default_media_devices(config: &CaptureConfig) -> Arc<dyn MediaDevices> {
    #[cfg(feature = "camera-opencv")]
    {
        tracing::info!(device = config.device_index, "using OpenCV camera");
        Arc::new(OpenCvDevices::new(config.device_index))
    }

    #[cfg(not(feature = "camera-opencv"))]
    {
        tracing::info!("no camera backend compiled in, using test pattern");
        Arc::new(TestPatternCamera::new(
            config.test_pattern_max_frame_rate,
            std::time::Duration::from_millis(config.test_pattern_warmup_ms),
        ))
    }
}
