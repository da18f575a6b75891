use image::RgbImage;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// A decoded frame together with its capture metadata.
///
/// Pixel data is immutable and shared, so cloning a `FrameData` hands out
/// the same generation without copying pixels and without any way for the
/// holder to observe a later write.
#[derive(Debug, Clone)]
pub struct FrameData {
    /// Generation id, strictly increasing per source
    pub id: u64,
    /// Time the frame was decoded
    pub timestamp: SystemTime,
    pub image: Arc<RgbImage>,
}

impl FrameData {
    pub fn new(id: u64, timestamp: SystemTime, image: RgbImage) -> Self {
        Self {
            id,
            timestamp,
            image: Arc::new(image),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Get frame age in milliseconds
    pub fn age_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(self.timestamp)
            .unwrap_or_default()
            .as_millis() as u64
    }

    /// Check if frame is older than specified duration
    pub fn is_older_than(&self, duration: Duration) -> bool {
        SystemTime::now()
            .duration_since(self.timestamp)
            .map(|age| age > duration)
            .unwrap_or(false)
    }
}
