use super::{Camera, CameraRegistry};
use crate::error::RegistryError;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryFile {
    #[serde(default, rename = "camera")]
    cameras: Vec<Camera>,
}

/// Camera registry persisted as `[[camera]]` tables in a TOML file.
///
/// Writes go to a sibling temp file that is then renamed into place.
#[derive(Debug)]
pub struct FileCameraRegistry {
    path: PathBuf,
    write_lock: Mutex<()>,
    missing_reported: AtomicBool,
}

impl FileCameraRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
            missing_reported: AtomicBool::new(false),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn file_error(&self, details: impl std::fmt::Display) -> RegistryError {
        RegistryError::File {
            path: self.path.clone(),
            details: details.to_string(),
        }
    }

    async fn load(&self) -> Result<RegistryFile, RegistryError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                if !self.missing_reported.swap(true, Ordering::Relaxed) {
                    info!(
                        "Camera registry {} not found, starting with no cameras",
                        self.path.display()
                    );
                }
                return Ok(RegistryFile::default());
            }
            Err(e) => return Err(self.file_error(e)),
        };

        toml::from_str(&contents).map_err(|e| self.file_error(e))
    }

    async fn store(&self, file: &RegistryFile) -> Result<(), RegistryError> {
        let contents = toml::to_string_pretty(file).map_err(|e| self.file_error(e))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.file_error(e))?;
        }

        let mut temp = self.path.clone().into_os_string();
        temp.push(".tmp");
        let temp = PathBuf::from(temp);

        tokio::fs::write(&temp, contents)
            .await
            .map_err(|e| self.file_error(e))?;
        tokio::fs::rename(&temp, &self.path)
            .await
            .map_err(|e| self.file_error(e))?;

        self.missing_reported.store(false, Ordering::Relaxed);
        Ok(())
    }
}

#[async_trait::async_trait]
impl CameraRegistry for FileCameraRegistry {
    async fn list(&self) -> Result<Vec<Camera>, RegistryError> {
        let file = self.load().await?;

        // Hand-edited entries get the same checks as `save`
        let mut cameras = Vec::with_capacity(file.cameras.len());
        for entry in file.cameras {
            match Camera::new(&entry.name, &entry.source) {
                Ok(camera) => cameras.push(camera),
                Err(e) => warn!(
                    "Ignoring registry entry '{}' in {}: {}",
                    entry.name,
                    self.path.display(),
                    e
                ),
            }
        }
        Ok(cameras)
    }

    async fn save(&self, name: &str, source: &str) -> Result<(), RegistryError> {
        let camera = Camera::new(name, source)?;
        let _guard = self.write_lock.lock().await;
        let mut file = self.load().await?;

        if let Some(existing) = file.cameras.iter().find(|c| c.source == camera.source) {
            return Err(RegistryError::DuplicateSource {
                source_uri: camera.source.clone(),
                existing: existing.name.clone(),
            });
        }

        match file.cameras.iter_mut().find(|c| c.name == camera.name) {
            Some(entry) => {
                debug!("Updating source of camera '{}'", camera.name);
                entry.source = camera.source;
            }
            None => {
                debug!("Registering camera '{}'", camera.name);
                file.cameras.push(camera);
            }
        }

        self.store(&file).await
    }

    async fn delete(&self, name: &str) -> Result<(), RegistryError> {
        let _guard = self.write_lock.lock().await;
        let mut file = self.load().await?;

        let before = file.cameras.len();
        file.cameras.retain(|c| c.name != name);
        if file.cameras.len() == before {
            return Err(RegistryError::NotFound {
                name: name.to_string(),
            });
        }

        debug!("Removed camera '{}'", name);
        self.store(&file).await
    }
}
