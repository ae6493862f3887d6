//! Capture toggling: camera acquisition, release, and fullscreen coupling

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::{Completion, Controller};
use crate::events::{OverlayEvent, StopReason};
use crate::platform::{MediaError, MediaStream};

impl Controller {
    /// Flip capture state as the toggle control does
    pub async fn toggle(&mut self) {
        self.toggle_for(StopReason::User).await;
    }

    /// Flip capture state. `reason` is recorded when this turns capture off.
    pub(super) async fn toggle_for(&mut self, reason: StopReason) {
        if self.capture.is_on() {
            self.stop_capture(reason).await;
        } else {
            self.start_capture().await;
        }
    }

    async fn start_capture(&mut self) {
        // Capture goes on whether or not fullscreen is granted
        if let Err(e) = self.presentation.request_fullscreen().await {
            warn!(error = %e, "error attempting to enable fullscreen");
        }

        let generation = self.capture.turn_on();
        let media = Arc::clone(&self.media);
        let constraints = self.constraints;
        let completion_tx = self.completion_tx.clone();

        debug!(
            generation,
            width = constraints.ideal_width,
            height = constraints.ideal_height(),
            frame_rate = constraints.ideal_frame_rate,
            "requesting camera"
        );
        tokio::spawn(async move {
            let result = media.get_user_media(constraints).await;
            let _ = completion_tx.send(Completion::StreamGranted { generation, result });
        });
    }

    async fn stop_capture(&mut self, reason: StopReason) {
        let tracks_stopped = self.release_stream();
        self.last_frame = None;
        self.canvas.clear();

        if self.presentation.is_fullscreen() {
            if let Err(e) = self.presentation.exit_fullscreen().await {
                warn!(error = %e, "error exiting fullscreen");
            }
        }

        self.capture.turn_off(reason, tracks_stopped);
    }

    /// Detach the video source and stop its tracks
    fn release_stream(&mut self) -> usize {
        match self.video.detach() {
            Some(mut stream) => {
                let stopped = stream.stop_tracks();
                debug!(stream = stream.id(), tracks = stopped, "camera stream released");
                stopped
            }
            None => 0,
        }
    }

    /// Leaving fullscreen while capturing turns capture off.
    ///
    /// Notifications queue behind toggles, so the reported value may
    /// already be outdated; the live presentation state decides.
    pub(super) async fn on_fullscreen_change(&mut self, fullscreen: bool) {
        let now_fullscreen = self.presentation.is_fullscreen();
        debug!(
            fullscreen,
            now_fullscreen,
            capture = %self.capture.state(),
            "fullscreen changed"
        );
        if !now_fullscreen && self.capture.is_on() {
            info!("fullscreen exited while capturing");
            self.toggle_for(StopReason::FullscreenExit).await;
        }
    }

    pub(super) async fn on_stream_granted(
        &mut self,
        generation: u64,
        result: Result<Box<dyn MediaStream>, MediaError>,
    ) {
        let current = self.capture.is_current(generation);

        match result {
            Ok(mut stream) if !current => {
                let stopped = stream.stop_tracks();
                info!(
                    generation,
                    tracks = stopped,
                    "camera granted after its capture ended, stopping it"
                );
            }
            Ok(stream) => {
                let settings = stream.settings();
                info!(
                    device = %settings.label,
                    width = settings.width,
                    height = settings.height,
                    frame_rate = ?settings.frame_rate,
                    tracks = stream.live_tracks(),
                    "camera stream attached"
                );

                if let Some(mut replaced) = self.video.attach(stream) {
                    replaced.stop_tracks();
                }
                self.emit(OverlayEvent::StreamAttached {
                    width: settings.width,
                    height: settings.height,
                    frame_rate: settings.frame_rate,
                });
            }
            Err(e) if !current => {
                debug!(generation, error = %e, "ignoring camera error from an ended capture");
            }
            Err(e) => {
                error!(error = %e, "error accessing the camera");
                self.emit(OverlayEvent::CaptureFailed {
                    message: e.to_string(),
                });
                self.toggle_for(StopReason::DeviceError).await;
            }
        }
    }
}
