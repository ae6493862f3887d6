//! ONNX Runtime backend for BlazePose-style landmark models
//!
//! Expects a full-body landmark model taking a `[1, S, S, 3]` RGB tensor in
//! `[0, 1]` and producing:
//! - output 0: `[1, 39 * 5]` landmarks as (x, y, z, visibility, presence)
//!   in input pixel units, the first 33 of which are body keypoints
//! - output 1: `[1, 1]` pose presence score
//!
//! The model sees the whole frame, so it tracks a single pose no matter
//! how many are requested.

use std::path::Path;

use image::imageops::{self, FilterType};
use ort::execution_providers as ep;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use tracing::{debug, info};

use super::{
    Delegate, EngineError, NormalizedLandmark, PoseLandmarker, PoseLandmarkerResult, VideoClock,
};
use crate::platform::VideoFrame;

/// Body keypoints reported per pose
const BODY_LANDMARKS: usize = 33;
/// Values per landmark in the model output
const VALUES_PER_LANDMARK: usize = 5;
/// Minimum presence score to report a pose
const PRESENCE_THRESHOLD: f32 = 0.5;
/// Edge length of the square model input
const INPUT_SIZE: u32 = 256;

pub struct OnnxPoseLandmarker {
    session: Session,
    input_name: String,
    landmarks_output: String,
    presence_output: String,
    input_size: u32,
    num_poses: usize,
    delegate: Delegate,
    clock: VideoClock,
}

impl OnnxPoseLandmarker {
    pub fn load(model_path: &Path, delegate: Delegate, num_poses: usize) -> Result<Self, EngineError> {
        let load_error = |message: String| EngineError::ModelLoad {
            path: model_path.to_path_buf(),
            message,
        };

        let mut builder = Session::builder()
            .map_err(|e| load_error(e.to_string()))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| load_error(e.to_string()))?;
        if delegate == Delegate::Gpu {
            // Registration failures fall back to the CPU provider
            builder = builder
                .with_execution_providers([
                    ep::CUDAExecutionProvider::default().build(),
                    ep::CoreMLExecutionProvider::default().build(),
                ])
                .map_err(|e| load_error(e.to_string()))?;
        }
        let session = builder
            .commit_from_file(model_path)
            .map_err(|e| load_error(e.to_string()))?;

        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .ok_or_else(|| load_error("model has no inputs".to_string()))?;
        let (landmarks_output, presence_output) = match session.outputs.as_slice() {
            [landmarks, presence, ..] => (landmarks.name.clone(), presence.name.clone()),
            _ => {
                return Err(load_error(
                    "expected landmark and presence outputs".to_string(),
                ))
            }
        };

        info!(
            model = %model_path.display(),
            input = %input_name,
            ?delegate,
            "ONNX pose landmarker ready"
        );

        Ok(Self {
            session,
            input_name,
            landmarks_output,
            presence_output,
            input_size: INPUT_SIZE,
            num_poses,
            delegate,
            clock: VideoClock::default(),
        })
    }

    fn preprocess(&self, frame: &VideoFrame) -> Result<Tensor<f32>, EngineError> {
        let size = self.input_size;
        let resized = imageops::resize(frame.image(), size, size, FilterType::Triangle);
        let data: Vec<f32> = resized
            .into_raw()
            .into_iter()
            .map(|v| v as f32 / 255.0)
            .collect();

        let shape = [1usize, size as usize, size as usize, 3];
        Tensor::from_array((shape, data.into_boxed_slice()))
            .map_err(|e| EngineError::Inference(e.to_string()))
    }
}

impl PoseLandmarker for OnnxPoseLandmarker {
    fn detect_for_video(
        &mut self,
        frame: &VideoFrame,
        timestamp_ms: f64,
    ) -> Result<PoseLandmarkerResult, EngineError> {
        self.clock.advance(timestamp_ms)?;
        if self.num_poses == 0 {
            return Ok(PoseLandmarkerResult::default());
        }

        let input = self.preprocess(frame)?;
        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => input])
            .map_err(|e| EngineError::Inference(e.to_string()))?;

        let (_, presence) = outputs[self.presence_output.as_str()]
            .try_extract_tensor::<f32>()
            .map_err(|e| EngineError::Inference(e.to_string()))?;
        let score = presence.first().copied().map(sigmoid).unwrap_or(0.0);
        if score < PRESENCE_THRESHOLD {
            debug!(score, "no pose present");
            return Ok(PoseLandmarkerResult::default());
        }

        let (_, raw) = outputs[self.landmarks_output.as_str()]
            .try_extract_tensor::<f32>()
            .map_err(|e| EngineError::Inference(e.to_string()))?;
        if raw.len() < BODY_LANDMARKS * VALUES_PER_LANDMARK {
            return Err(EngineError::Inference(format!(
                "landmark output too short: {} values",
                raw.len()
            )));
        }

        let scale = self.input_size as f32;
        let pose = raw
            .chunks_exact(VALUES_PER_LANDMARK)
            .take(BODY_LANDMARKS)
            .map(|v| NormalizedLandmark {
                x: v[0] / scale,
                y: v[1] / scale,
                z: v[2] / scale,
                visibility: sigmoid(v[3]),
            })
            .collect();

        Ok(PoseLandmarkerResult {
            landmarks: vec![pose],
        })
    }

    fn backend(&self) -> String {
        format!("onnxruntime ({:?})", self.delegate).to_lowercase()
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}
