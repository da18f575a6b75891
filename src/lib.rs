pub mod app;
pub mod config;
pub mod detector;
pub mod error;
pub mod filter;
pub mod frame;
pub mod registry;
pub mod source;
pub mod storage;

pub use app::{CamwatchOrchestrator, ComponentState, ShutdownReason};
pub use config::CamwatchConfig;
pub use detector::{DetectionOutcome, MotionDetector};
pub use error::{CamwatchError, Result};
pub use filter::{FilterOutcome, SimilarityFilter};
pub use frame::FrameData;
pub use registry::{Camera, CameraRegistry, FileCameraRegistry};
pub use source::{FrameBuffer, FrameSource, SourceUri};
pub use storage::{EvictionBudget, EvictionOutcome, Pressure, StorageManager};
