use crate::frame::FrameData;
use parking_lot::Mutex;

#[derive(Debug, Default)]
struct Slot {
    frame: Option<FrameData>,
    ready: bool,
}

/// Single-slot "latest frame" cell shared between a decode task and its
/// readers.
///
/// Writers replace the slot, readers clone it; the lock is held for exactly
/// one of those operations and never across decoding or analysis.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    slot: Mutex<Slot>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the stored frame, dropping whatever was there
    pub fn publish(&self, frame: FrameData) {
        let previous = {
            let mut slot = self.slot.lock();
            slot.ready = true;
            slot.frame.replace(frame)
        };
        // Last reference to an old image may be freed here, outside the lock
        drop(previous);
    }

    /// Copy of the latest frame, or `None` before the first decode
    pub fn snapshot(&self) -> Option<FrameData> {
        let slot = self.slot.lock();
        if slot.ready {
            slot.frame.clone()
        } else {
            None
        }
    }

    pub fn is_ready(&self) -> bool {
        self.slot.lock().ready
    }

    pub fn latest_id(&self) -> Option<u64> {
        self.slot.lock().frame.as_ref().map(|frame| frame.id)
    }
}
