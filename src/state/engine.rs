//! Engine handle slot

use std::sync::{Arc, Mutex};

use crate::engine::PoseLandmarker;

/// A landmarker shared with the blocking pool while a detection runs
pub type SharedLandmarker = Arc<Mutex<Box<dyn PoseLandmarker>>>;

/// The pose engine handle. Moves from `Uninitialized` to `Ready` once and
/// never back.
#[derive(Default)]
pub enum EngineSlot {
    #[default]
    Uninitialized,
    Ready(SharedLandmarker),
}

impl EngineSlot {
    pub fn is_ready(&self) -> bool {
        matches!(self, EngineSlot::Ready(_))
    }

    /// The landmarker, if loading has completed
    pub fn landmarker(&self) -> Option<SharedLandmarker> {
        match self {
            EngineSlot::Ready(landmarker) => Some(Arc::clone(landmarker)),
            EngineSlot::Uninitialized => None,
        }
    }

    /// Install a loaded landmarker. Returns false, leaving the slot
    /// untouched, if one was already installed.
    pub fn install(&mut self, landmarker: Box<dyn PoseLandmarker>) -> bool {
        if self.is_ready() {
            return false;
        }
        *self = EngineSlot::Ready(Arc::new(Mutex::new(landmarker)));
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeLandmarker;

    #[test]
    fn test_slot_starts_uninitialized() {
        let slot = EngineSlot::default();
        assert!(!slot.is_ready());
        assert!(slot.landmarker().is_none());
    }

    #[test]
    fn test_install_once() {
        let mut slot = EngineSlot::default();
        let (first, _) = FakeLandmarker::empty();
        let (second, _) = FakeLandmarker::empty();

        assert!(slot.install(Box::new(first)));
        assert!(slot.is_ready());
        assert!(!slot.install(Box::new(second)));
        assert!(slot.landmarker().is_some());
    }
}
