use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct CamwatchConfig {
    pub paths: PathsConfig,
    pub source: SourceConfig,
    pub detector: DetectorConfig,
    pub filter: FilterConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PathsConfig {
    /// Root of the per-camera candidate directories
    #[serde(default = "default_working_dir")]
    pub working_dir: String,

    /// Directory holding deduplicated images subject to eviction
    #[serde(default = "default_cold_storage_dir")]
    pub cold_storage_dir: String,

    /// TOML file with the registered cameras
    #[serde(default = "default_registry_path")]
    pub registry_path: String,

    /// Where per-camera heat maps are written on shutdown
    pub heatmap_dir: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SourceConfig {
    /// Pause between tearing down and re-opening a decoder
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Reconnect when no frame has been decoded for this long
    #[serde(default = "default_stall_timeout_seconds")]
    pub stall_timeout_seconds: u64,

    /// Frame rate of `stub://` sources
    #[serde(default = "default_synthetic_fps")]
    pub synthetic_fps: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DetectorConfig {
    /// Minimum connected region area (downsampled pixels) that counts as motion
    #[serde(default = "default_min_area")]
    pub min_area: u32,

    /// Width frames are resized to before background subtraction
    #[serde(default = "default_downsample_width")]
    pub downsample_width: u32,

    /// Frames fed to the background model before motion can be flagged
    #[serde(default = "default_initial_frame_skip")]
    pub initial_frame_skip: u32,

    /// Minimum time between two processed frames
    #[serde(default = "default_sample_interval_seconds")]
    pub sample_interval_seconds: f64,

    /// Period of the decoder refresh that re-syncs to the live edge
    #[serde(default = "default_refresh_interval_seconds")]
    pub refresh_interval_seconds: f64,

    /// Cadence of the outer detection loop
    #[serde(default = "default_detector_poll_ms")]
    pub poll_interval_ms: u64,

    /// Background model adaptation rate (0..1)
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f32,

    /// Squared distance, in variances, beyond which a pixel is foreground
    #[serde(default = "default_variance_threshold")]
    pub variance_threshold: f32,

    /// Absolute intensity difference below which a pixel is never foreground
    #[serde(default = "default_min_delta")]
    pub min_delta: u8,

    /// Radius of the opening kernel
    #[serde(default = "default_noise_kernel_radius")]
    pub noise_kernel_radius: u8,

    #[serde(default = "default_true")]
    pub rate_limiting: bool,

    #[serde(default = "default_true")]
    pub noise_filtering: bool,

    /// Accumulate a per-camera motion heat map
    #[serde(default)]
    pub heatmap: bool,

    /// chrono format used in saved file names
    #[serde(default = "default_timestamp_format")]
    pub timestamp_format: String,

    /// "Local" or an IANA timezone name
    #[serde(default = "default_timestamp_timezone")]
    pub timestamp_timezone: String,

    /// Per-camera `min_area` values keyed by camera name
    #[serde(default)]
    pub min_area_overrides: HashMap<String, u32>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct FilterConfig {
    /// Minimum time between two deduplication passes
    #[serde(default = "default_filter_interval_seconds")]
    pub interval_seconds: f64,

    /// Scores strictly above this (0-100) are treated as duplicates
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,

    /// Width both images are resized to before comparison
    #[serde(default = "default_compare_width")]
    pub compare_width: u32,

    #[serde(default = "default_filter_poll_ms")]
    pub poll_interval_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StorageConfig {
    /// Minimum time between two eviction passes when not under pressure
    #[serde(default = "default_storage_interval_seconds")]
    pub interval_seconds: f64,

    #[serde(default = "default_required_free_gb")]
    pub required_free_gb: f64,

    /// Below this, protected images are evicted too
    #[serde(default = "default_critical_free_gb")]
    pub critical_free_gb: f64,

    /// Eviction only happens when more files than this are present
    #[serde(default = "default_min_files")]
    pub min_files: usize,

    #[serde(default = "default_storage_poll_ms")]
    pub poll_interval_ms: u64,

    /// ONNX person classifier; without it no image is protected
    pub person_model_path: Option<String>,

    /// Classifier input size (width, height)
    #[serde(default = "default_person_model_input")]
    pub person_model_input: (u32, u32),

    #[serde(default = "default_person_confidence")]
    pub person_confidence: f32,

    /// Flat index of the person score in the model's first output; unset
    /// means the model emits exactly one score
    pub person_class_index: Option<usize>,
}

impl CamwatchConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("camwatch.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default("paths.working_dir", default_working_dir())?
            .set_default("paths.cold_storage_dir", default_cold_storage_dir())?
            .set_default("paths.registry_path", default_registry_path())?
            .set_default("source.reconnect_delay_ms", default_reconnect_delay_ms())?
            .set_default(
                "source.stall_timeout_seconds",
                default_stall_timeout_seconds(),
            )?
            .set_default("source.synthetic_fps", default_synthetic_fps())?
            .set_default("detector.min_area", default_min_area())?
            .set_default("detector.downsample_width", default_downsample_width())?
            .set_default("detector.initial_frame_skip", default_initial_frame_skip())?
            .set_default(
                "detector.sample_interval_seconds",
                default_sample_interval_seconds(),
            )?
            .set_default(
                "detector.refresh_interval_seconds",
                default_refresh_interval_seconds(),
            )?
            .set_default("detector.poll_interval_ms", default_detector_poll_ms())?
            .set_default("detector.learning_rate", default_learning_rate() as f64)?
            .set_default(
                "detector.variance_threshold",
                default_variance_threshold() as f64,
            )?
            .set_default("detector.min_delta", default_min_delta() as i64)?
            .set_default(
                "detector.noise_kernel_radius",
                default_noise_kernel_radius() as i64,
            )?
            .set_default("detector.rate_limiting", true)?
            .set_default("detector.noise_filtering", true)?
            .set_default("detector.heatmap", false)?
            .set_default("detector.timestamp_format", default_timestamp_format())?
            .set_default("detector.timestamp_timezone", default_timestamp_timezone())?
            .set_default("filter.interval_seconds", default_filter_interval_seconds())?
            .set_default(
                "filter.similarity_threshold",
                default_similarity_threshold(),
            )?
            .set_default("filter.compare_width", default_compare_width())?
            .set_default("filter.poll_interval_ms", default_filter_poll_ms())?
            .set_default(
                "storage.interval_seconds",
                default_storage_interval_seconds(),
            )?
            .set_default("storage.required_free_gb", default_required_free_gb())?
            .set_default("storage.critical_free_gb", default_critical_free_gb())?
            .set_default("storage.min_files", default_min_files() as i64)?
            .set_default("storage.poll_interval_ms", default_storage_poll_ms())?
            .set_default(
                "storage.person_model_input",
                vec![
                    default_person_model_input().0,
                    default_person_model_input().1,
                ],
            )?
            .set_default(
                "storage.person_confidence",
                default_person_confidence() as f64,
            )?
            // Add configuration file (optional)
            .add_source(File::with_name(&path_str).required(false))
            // CAMWATCH_DETECTOR__MIN_AREA=900 etc.
            .add_source(
                Environment::with_prefix("CAMWATCH")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: CamwatchConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.detector.downsample_width == 0 {
            return Err(ConfigError::Message(
                "Detector downsample_width must be greater than 0".to_string(),
            ));
        }

        if self.detector.min_area == 0 {
            return Err(ConfigError::Message(
                "Detector min_area must be greater than 0".to_string(),
            ));
        }

        if let Some((name, _)) = self
            .detector
            .min_area_overrides
            .iter()
            .find(|(_, area)| **area == 0)
        {
            return Err(ConfigError::Message(format!(
                "min_area override for camera '{}' must be greater than 0",
                name
            )));
        }

        if !(self.detector.learning_rate > 0.0 && self.detector.learning_rate <= 1.0) {
            return Err(ConfigError::Message(
                "Detector learning_rate must be in (0, 1]".to_string(),
            ));
        }

        // NaN and infinity would panic when turned into a Duration
        for (name, seconds) in [
            (
                "detector.sample_interval_seconds",
                self.detector.sample_interval_seconds,
            ),
            (
                "detector.refresh_interval_seconds",
                self.detector.refresh_interval_seconds,
            ),
            ("filter.interval_seconds", self.filter.interval_seconds),
            ("storage.interval_seconds", self.storage.interval_seconds),
        ] {
            if !(seconds.is_finite() && seconds >= 0.0) {
                return Err(ConfigError::Message(format!(
                    "{} must be a finite, non-negative number of seconds",
                    name
                )));
            }
        }

        if !(self.detector.variance_threshold.is_finite() && self.detector.variance_threshold > 0.0)
        {
            return Err(ConfigError::Message(
                "Detector variance_threshold must be greater than 0".to_string(),
            ));
        }

        if !(self.storage.required_free_gb.is_finite()
            && self.storage.critical_free_gb.is_finite()
            && self.storage.critical_free_gb >= 0.0)
        {
            return Err(ConfigError::Message(
                "Storage free space thresholds must be finite and non-negative".to_string(),
            ));
        }

        if self.detector.poll_interval_ms == 0
            || self.filter.poll_interval_ms == 0
            || self.storage.poll_interval_ms == 0
        {
            return Err(ConfigError::Message(
                "Poll intervals must be greater than 0".to_string(),
            ));
        }

        if !(0.0..=100.0).contains(&self.filter.similarity_threshold) {
            return Err(ConfigError::Message(
                "Filter similarity_threshold must be between 0 and 100".to_string(),
            ));
        }

        if self.filter.compare_width == 0 {
            return Err(ConfigError::Message(
                "Filter compare_width must be greater than 0".to_string(),
            ));
        }

        if self.storage.critical_free_gb > self.storage.required_free_gb {
            return Err(ConfigError::Message(
                "Storage critical_free_gb must not exceed required_free_gb".to_string(),
            ));
        }

        if self.source.synthetic_fps == 0 {
            return Err(ConfigError::Message(
                "Source synthetic_fps must be greater than 0".to_string(),
            ));
        }

        if self.paths.working_dir == self.paths.cold_storage_dir {
            return Err(ConfigError::Message(
                "working_dir and cold_storage_dir must differ".to_string(),
            ));
        }

        Ok(())
    }
}

impl PathsConfig {
    pub fn working_dir(&self) -> PathBuf {
        PathBuf::from(&self.working_dir)
    }

    pub fn cold_storage_dir(&self) -> PathBuf {
        PathBuf::from(&self.cold_storage_dir)
    }

    pub fn registry_path(&self) -> PathBuf {
        PathBuf::from(&self.registry_path)
    }

    /// Candidate directory of a single camera
    pub fn camera_dir(&self, camera_name: &str) -> PathBuf {
        self.working_dir().join(camera_name)
    }
}

impl SourceConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_secs(self.stall_timeout_seconds)
    }
}

impl DetectorConfig {
    /// `min_area` for a camera, honouring overrides
    pub fn min_area_for(&self, camera_name: &str) -> u32 {
        self.min_area_overrides
            .get(camera_name)
            .copied()
            .unwrap_or(self.min_area)
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_secs_f64(self.sample_interval_seconds)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs_f64(self.refresh_interval_seconds)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl FilterConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(self.interval_seconds)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl StorageConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(self.interval_seconds)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            working_dir: default_working_dir(),
            cold_storage_dir: default_cold_storage_dir(),
            registry_path: default_registry_path(),
            heatmap_dir: None,
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: default_reconnect_delay_ms(),
            stall_timeout_seconds: default_stall_timeout_seconds(),
            synthetic_fps: default_synthetic_fps(),
        }
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_filter_interval_seconds(),
            similarity_threshold: default_similarity_threshold(),
            compare_width: default_compare_width(),
            poll_interval_ms: default_filter_poll_ms(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_storage_interval_seconds(),
            required_free_gb: default_required_free_gb(),
            critical_free_gb: default_critical_free_gb(),
            min_files: default_min_files(),
            poll_interval_ms: default_storage_poll_ms(),
            person_model_path: None,
            person_model_input: default_person_model_input(),
            person_confidence: default_person_confidence(),
            person_class_index: None,
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            min_area: default_min_area(),
            downsample_width: default_downsample_width(),
            initial_frame_skip: default_initial_frame_skip(),
            sample_interval_seconds: default_sample_interval_seconds(),
            refresh_interval_seconds: default_refresh_interval_seconds(),
            poll_interval_ms: default_detector_poll_ms(),
            learning_rate: default_learning_rate(),
            variance_threshold: default_variance_threshold(),
            min_delta: default_min_delta(),
            noise_kernel_radius: default_noise_kernel_radius(),
            rate_limiting: true,
            noise_filtering: true,
            heatmap: false,
            timestamp_format: default_timestamp_format(),
            timestamp_timezone: default_timestamp_timezone(),
            min_area_overrides: HashMap::new(),
        }
    }
}

// Default value functions
fn default_working_dir() -> String {
    "./data/working".to_string()
}
fn default_cold_storage_dir() -> String {
    "./data/storage".to_string()
}
fn default_registry_path() -> String {
    "./data/cameras.toml".to_string()
}

fn default_reconnect_delay_ms() -> u64 {
    2000
}
fn default_stall_timeout_seconds() -> u64 {
    10
}
fn default_synthetic_fps() -> u32 {
    10
}

fn default_min_area() -> u32 {
    1250
}
fn default_downsample_width() -> u32 {
    800
}
fn default_initial_frame_skip() -> u32 {
    20
}
fn default_sample_interval_seconds() -> f64 {
    1.0
}
fn default_refresh_interval_seconds() -> f64 {
    240.0
}
fn default_detector_poll_ms() -> u64 {
    250
}
fn default_learning_rate() -> f32 {
    0.02
}
fn default_variance_threshold() -> f32 {
    16.0
}
fn default_min_delta() -> u8 {
    25
}
fn default_noise_kernel_radius() -> u8 {
    2
}
fn default_true() -> bool {
    true
}
fn default_timestamp_format() -> String {
    "%A %d %B %Y %I:%M:%S%p".to_string()
}
fn default_timestamp_timezone() -> String {
    "Local".to_string()
}

fn default_filter_interval_seconds() -> f64 {
    600.0
}
fn default_similarity_threshold() -> f64 {
    93.0
}
fn default_compare_width() -> u32 {
    700
}
fn default_filter_poll_ms() -> u64 {
    1000
}

fn default_storage_interval_seconds() -> f64 {
    180.0
}
fn default_required_free_gb() -> f64 {
    5.0
}
fn default_critical_free_gb() -> f64 {
    2.0
}
fn default_min_files() -> usize {
    10
}
fn default_storage_poll_ms() -> u64 {
    1000
}
fn default_person_model_input() -> (u32, u32) {
    (224, 224)
}
fn default_person_confidence() -> f32 {
    0.5
}
