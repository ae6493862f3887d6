//! Per-frame detection and overlay drawing

use std::time::Duration;

use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, trace, warn};

use super::{Completion, Controller};
use crate::engine::{EngineError, PoseLandmarkerResult};

/// Paces the frame loop at the display refresh rate
pub struct FrameClock {
    interval: Interval,
}

impl FrameClock {
    pub fn new(refresh_hz: f64) -> Self {
        let period = Duration::from_secs_f64(1.0 / refresh_hz).max(Duration::from_millis(1));
        let mut interval = tokio::time::interval(period);
        // A slow frame delays the next one instead of bunching ticks up
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self { interval }
    }

    pub fn period(&self) -> Duration {
        self.interval.period()
    }

    pub async fn tick(&mut self) {
        self.interval.tick().await;
    }
}

impl Controller {
    /// One frame loop iteration.
    ///
    /// Starts a detection on the current video frame when the engine is
    /// ready, capture is on, and the video has a frame to show. The canvas
    /// is sized to the frame and cleared before the detection is issued.
    pub(super) fn on_animation_frame(&mut self) {
        if self.detection_in_flight {
            trace!("detection still running, skipping frame");
            return;
        }
        let Some(landmarker) = self.engine.landmarker() else {
            return;
        };
        if !self.capture.is_on() {
            return;
        }

        let Some(frame) = self.video.ready_frame() else {
            self.stats.not_ready += 1;
            debug!(ready_state = ?self.video.ready_state(), "video not ready");
            return;
        };

        self.canvas.set_size(frame.width(), frame.height());
        self.canvas.clear();
        self.last_frame = Some(frame.clone());

        let timestamp_ms = self.started_at.elapsed().as_secs_f64() * 1000.0;
        let generation = self.capture.generation();
        let completion_tx = self.completion_tx.clone();
        self.detection_in_flight = true;

        tokio::spawn(async move {
            let result = tokio::task::spawn_blocking(move || {
                let mut landmarker = landmarker
                    .lock()
                    .map_err(|_| EngineError::Inference("landmarker lock poisoned".to_string()))?;
                landmarker.detect_for_video(&frame, timestamp_ms)
            })
            .await
            .unwrap_or_else(|e| Err(EngineError::Inference(format!("detection task failed: {}", e))));

            let _ = completion_tx.send(Completion::Detection { generation, result });
        });
    }

    pub(super) fn on_detection(
        &mut self,
        generation: u64,
        result: Result<PoseLandmarkerResult, EngineError>,
    ) {
        self.detection_in_flight = false;

        if !self.capture.is_current(generation) {
            self.stats.stale_results += 1;
            debug!(generation, "dropping detection result from an ended capture");
            return;
        }

        let result = match result {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "pose detection failed");
                return;
            }
        };

        trace!(poses = result.landmarks.len(), "detection finished");
        match result.first_pose() {
            Some(landmarks) => {
                self.painter
                    .draw_landmarks(&mut self.canvas, landmarks, &self.style);
                self.stats.rendered += 1;
            }
            None => {
                self.stats.without_pose += 1;
                debug!("no landmarks detected");
            }
        }
    }

    /// Run one frame loop iteration and wait for its detection to finish
    #[cfg(test)]
    pub(crate) async fn step_frame(&mut self) {
        self.on_animation_frame();
        while self.detection_in_flight {
            self.pump().await;
        }
    }
}
