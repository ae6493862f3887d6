//! Fullscreen presentation seam

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::events::ControlEvent;

/// Errors from fullscreen requests
#[derive(Debug, thiserror::Error)]
pub enum PresentationError {
    #[error("fullscreen request was refused: {0}")]
    NotAllowed(String),

    #[error("not in fullscreen")]
    NotFullscreen,
}

/// Fullscreen control for the view containing the video and overlay.
///
/// Implementations report every change of fullscreen state as a
/// `ControlEvent::FullscreenChanged`, whether it was requested through this
/// trait or initiated by the user.
#[async_trait]
pub trait Presentation: Send + Sync {
    async fn request_fullscreen(&self) -> Result<(), PresentationError>;

    async fn exit_fullscreen(&self) -> Result<(), PresentationError>;

    fn is_fullscreen(&self) -> bool;
}

/// Presentation without a display: tracks the fullscreen flag and emits
/// change notifications
pub struct HeadlessPresentation {
    fullscreen: AtomicBool,
    notify_tx: mpsc::Sender<ControlEvent>,
}

impl HeadlessPresentation {
    pub fn new(notify_tx: mpsc::Sender<ControlEvent>) -> Self {
        Self {
            fullscreen: AtomicBool::new(false),
            notify_tx,
        }
    }

    fn set(&self, fullscreen: bool) -> bool {
        let changed = self.fullscreen.swap(fullscreen, Ordering::SeqCst) != fullscreen;
        if changed {
            debug!(fullscreen, "fullscreen changed");
            // The controller may be the caller, so never wait on its queue
            if self
                .notify_tx
                .try_send(ControlEvent::FullscreenChanged { fullscreen })
                .is_err()
            {
                warn!(fullscreen, "failed to deliver fullscreen change notification");
            }
        }
        changed
    }
}

#[async_trait]
impl Presentation for HeadlessPresentation {
    async fn request_fullscreen(&self) -> Result<(), PresentationError> {
        self.set(true);
        Ok(())
    }

    async fn exit_fullscreen(&self) -> Result<(), PresentationError> {
        if !self.set(false) {
            return Err(PresentationError::NotFullscreen);
        }
        Ok(())
    }

    fn is_fullscreen(&self) -> bool {
        self.fullscreen.load(Ordering::SeqCst)
    }
}
