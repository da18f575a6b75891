use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CamwatchError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Detector error: {0}")]
    Detector(#[from] DetectorError),

    #[error("Filter error: {0}")]
    Filter(#[from] FilterError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("System error: {message}")]
    System { message: String },

    #[error("Component error in {component}: {message}")]
    Component { component: String, message: String },
}

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Failed to connect to {uri}: {details}")]
    Connection { uri: String, details: String },

    #[error("Frame decode failed: {details}")]
    Decode { details: String },

    #[error("Unsupported source {uri}: {details}")]
    Unsupported { uri: String, details: String },

    #[error("Stream ended")]
    EndOfStream,
}

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("Failed to save frame to {path}: {details}")]
    Save { path: PathBuf, details: String },
}

#[derive(Error, Debug)]
pub enum FilterError {
    #[error("Failed to load {path}: {details}")]
    Load { path: PathBuf, details: String },

    #[error("Failed to move {from} to {to}: {details}")]
    Move {
        from: PathBuf,
        to: PathBuf,
        details: String,
    },
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Free space query failed for {path}: {details}")]
    SpaceQuery { path: PathBuf, details: String },

    #[error("Content protection check failed: {details}")]
    Protection { details: String },

    #[error("Failed to evict {path}: {details}")]
    Evict { path: PathBuf, details: String },
}

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("A camera with source '{source_uri}' is already registered as '{existing}'")]
    DuplicateSource { source_uri: String, existing: String },

    #[error("No camera named '{name}'")]
    NotFound { name: String },

    #[error("Invalid camera entry: {details}")]
    Invalid { details: String },

    #[error("Registry file {path}: {details}")]
    File { path: PathBuf, details: String },
}

impl CamwatchError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn component<S: Into<String>>(component: S, message: S) -> Self {
        Self::Component {
            component: component.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CamwatchError>;
