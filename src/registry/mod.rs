mod file;

use crate::error::RegistryError;
use serde::{Deserialize, Serialize};

pub use file::FileCameraRegistry;

/// A registered camera; the name doubles as its working subdirectory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Camera {
    pub name: String,
    pub source: String,
}

impl Camera {
    /// Validated entry with surrounding whitespace trimmed
    pub fn new(name: &str, source: &str) -> Result<Self, RegistryError> {
        let name = name.trim();
        let source = source.trim();

        if name.is_empty() {
            return Err(RegistryError::Invalid {
                details: "camera name must not be empty".to_string(),
            });
        }
        if name == "." || name == ".." || name.contains(['/', '\\']) {
            return Err(RegistryError::Invalid {
                details: format!("camera name '{}' is not a valid directory name", name),
            });
        }
        if source.is_empty() {
            return Err(RegistryError::Invalid {
                details: format!("camera '{}' has an empty source", name),
            });
        }

        Ok(Self {
            name: name.to_string(),
            source: source.to_string(),
        })
    }
}

/// Persistent name → source mapping of the cameras to run
#[async_trait::async_trait]
pub trait CameraRegistry: Send + Sync {
    /// Cameras in registration order
    async fn list(&self) -> Result<Vec<Camera>, RegistryError>;

    /// Register `name`, or point an existing `name` at a new source.
    ///
    /// Rejected when any camera, including `name` itself, already uses
    /// `source`.
    async fn save(&self, name: &str, source: &str) -> Result<(), RegistryError>;

    async fn delete(&self, name: &str) -> Result<(), RegistryError>;
}
