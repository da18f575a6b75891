mod background;
mod classifier;
mod heatmap;
mod motion;
mod regions;
#[cfg(test)]
mod tests;

pub use background::BackgroundModel;
pub use classifier::{Capabilities, Classification, FrameClassifier};
pub use heatmap::MotionHeatmap;
pub use motion::{DetectionOutcome, FrameProvider, MotionDetector, TimestampZone};
pub use regions::{connected_regions, open_mask, Region};
