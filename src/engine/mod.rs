//! Pose landmark engine
//!
//! Defines the landmarker seam the frame loop drives, the options it is
//! constructed with, and the default loader that resolves the model asset
//! and builds whichever inference backend this binary was compiled with.

mod assets;
#[cfg(feature = "ml-onnx")]
mod onnx;

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

pub use assets::{AssetCache, AssetError, ModelAsset};
#[cfg(feature = "ml-onnx")]
pub use onnx::OnnxPoseLandmarker;

use crate::platform::VideoFrame;

/// One estimated body keypoint.
///
/// `x` and `y` are normalized to the frame (0.0 at the left/top edge, 1.0
/// at the right/bottom edge); `z` is depth relative to the hips in the same
/// scale as `x`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct NormalizedLandmark {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    /// Likelihood the point is visible, 0.0 to 1.0
    pub visibility: f32,
}

/// Poses detected in one frame, each an ordered list of landmarks
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PoseLandmarkerResult {
    pub landmarks: Vec<Vec<NormalizedLandmark>>,
}

impl PoseLandmarkerResult {
    /// The first detected pose, if it has at least one landmark
    pub fn first_pose(&self) -> Option<&[NormalizedLandmark]> {
        self.landmarks
            .first()
            .map(Vec::as_slice)
            .filter(|pose| !pose.is_empty())
    }
}

/// Hardware preference for inference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Delegate {
    Cpu,
    #[default]
    Gpu,
}

/// How to construct a landmarker for continuous video input
#[derive(Debug, Clone, PartialEq)]
pub struct LandmarkerOptions {
    pub model: ModelAsset,
    pub delegate: Delegate,
    /// Maximum number of poses tracked at once
    pub num_poses: usize,
}

/// Errors from loading or running the engine
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Asset(#[from] AssetError),

    #[error("no inference backend compiled in (enable the `ml-onnx` feature)")]
    BackendUnavailable,

    #[error("failed to load model {path}: {message}")]
    ModelLoad { path: PathBuf, message: String },

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("timestamp {timestamp_ms}ms is not after the previous frame ({previous_ms}ms)")]
    NonMonotonicTimestamp { timestamp_ms: f64, previous_ms: f64 },
}

/// A pose landmarker in video mode.
///
/// Calls are blocking and are made from the blocking thread pool.
/// Timestamps must increase from one call to the next.
pub trait PoseLandmarker: Send {
    fn detect_for_video(
        &mut self,
        frame: &VideoFrame,
        timestamp_ms: f64,
    ) -> Result<PoseLandmarkerResult, EngineError>;

    /// Human readable backend description, for logs and status
    fn backend(&self) -> String;
}

/// Builds a landmarker. Loading may download assets and is slow.
#[async_trait]
pub trait EngineLoader: Send + Sync {
    async fn load(&self, options: LandmarkerOptions)
        -> Result<Box<dyn PoseLandmarker>, EngineError>;
}

/// Resolves the model asset, then builds the compiled-in backend
pub struct DefaultEngineLoader {
    assets: AssetCache,
}

impl DefaultEngineLoader {
    pub fn new(assets: AssetCache) -> Self {
        Self { assets }
    }
}

#[async_trait]
impl EngineLoader for DefaultEngineLoader {
    async fn load(
        &self,
        options: LandmarkerOptions,
    ) -> Result<Box<dyn PoseLandmarker>, EngineError> {
        let model_path = self.assets.resolve(&options.model).await?;
        info!(
            model = %model_path.display(),
            delegate = ?options.delegate,
            num_poses = options.num_poses,
            "loading pose landmarker"
        );

        #[cfg(feature = "ml-onnx")]
        {
            let delegate = options.delegate;
            let num_poses = options.num_poses;
            let landmarker = tokio::task::spawn_blocking(move || {
                OnnxPoseLandmarker::load(&model_path, delegate, num_poses)
            })
            .await
            .map_err(|e| EngineError::Inference(format!("loader task failed: {e}")))??;
            Ok(Box::new(landmarker))
        }

        #[cfg(not(feature = "ml-onnx"))]
        {
            let _ = model_path;
            Err(EngineError::BackendUnavailable)
        }
    }
}

/// Rejects timestamps that do not move forward, as video mode requires
#[cfg_attr(not(feature = "ml-onnx"), allow(dead_code))]
#[derive(Debug, Default)]
pub struct VideoClock {
    previous_ms: Option<f64>,
}

impl VideoClock {
    pub fn advance(&mut self, timestamp_ms: f64) -> Result<(), EngineError> {
        if let Some(previous_ms) = self.previous_ms {
            if timestamp_ms <= previous_ms {
                return Err(EngineError::NonMonotonicTimestamp {
                    timestamp_ms,
                    previous_ms,
                });
            }
        }
        self.previous_ms = Some(timestamp_ms);
        Ok(())
    }
}
