use super::classifier::{Capabilities, FrameClassifier};
use super::heatmap::MotionHeatmap;
use crate::config::DetectorConfig;
use crate::error::DetectorError;
use crate::frame::FrameData;
use crate::source::FrameSource;
use chrono::{DateTime, Local, Utc};
use chrono_tz::Tz;
use image::ImageFormat;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Where a detector reads frames from
pub trait FrameProvider {
    fn snapshot(&self) -> Option<FrameData>;
    fn refresh(&self);
}

impl FrameProvider for FrameSource {
    fn snapshot(&self) -> Option<FrameData> {
        FrameSource::snapshot(self)
    }

    fn refresh(&self) {
        FrameSource::refresh(self)
    }
}

/// Result of one detector invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectionOutcome {
    /// Called again before the sample interval elapsed
    RateLimited,
    /// The source has not decoded a frame yet
    NoFrame,
    /// The latest frame was already processed
    Duplicate,
    /// Frame fed to the background model only
    WarmingUp,
    /// No region reached the minimum area
    Still,
    /// Motion found; the full-resolution frame was written here
    Saved(PathBuf),
}

/// Timezone used to render file name timestamps
#[derive(Debug, Clone, Copy)]
pub enum TimestampZone {
    Local,
    Named(Tz),
}

impl TimestampZone {
    /// "Local" (any case) selects the host zone, anything else must be an
    /// IANA name; unknown names fall back to UTC
    pub fn resolve(name: &str) -> Self {
        if name.eq_ignore_ascii_case("local") {
            return Self::Local;
        }
        match name.parse::<Tz>() {
            Ok(tz) => Self::Named(tz),
            Err(_) => {
                warn!("Invalid timestamp timezone '{}', falling back to UTC", name);
                Self::Named(chrono_tz::UTC)
            }
        }
    }

    pub fn format(&self, timestamp: std::time::SystemTime, pattern: &str) -> String {
        let utc = DateTime::<Utc>::from(timestamp);
        match self {
            Self::Local => utc.with_timezone(&Local).format(pattern).to_string(),
            Self::Named(tz) => utc.with_timezone(tz).format(pattern).to_string(),
        }
    }
}

/// Per-camera motion trigger.
///
/// Each [`MotionDetector::run_once`] call looks at the newest frame of a
/// source at most once, and writes that frame at full resolution when a
/// large enough region of change is found.
pub struct MotionDetector {
    camera_name: String,
    output_dir: PathBuf,
    min_area: u32,
    initial_frame_skip: u32,
    sample_interval: Duration,
    refresh_interval: Duration,
    timestamp_format: String,
    timezone: TimestampZone,
    classifier: FrameClassifier,
    warmup_frames: u32,
    last_processed_at: Option<Instant>,
    last_frame_id: Option<u64>,
    last_refresh_at: Instant,
    frames_processed: u64,
    frames_saved: u64,
}

impl MotionDetector {
    pub fn new(camera_name: &str, output_dir: PathBuf, config: &DetectorConfig) -> Self {
        let classifier = FrameClassifier::new(config);
        let min_area = config.min_area_for(camera_name);

        info!(
            "Motion detector for '{}' writing to {} (min area {}, warm-up {} frames, {:?})",
            camera_name,
            output_dir.display(),
            min_area,
            config.initial_frame_skip,
            classifier.capabilities()
        );

        Self {
            camera_name: camera_name.to_string(),
            output_dir,
            min_area,
            initial_frame_skip: config.initial_frame_skip,
            sample_interval: config.sample_interval(),
            refresh_interval: config.refresh_interval(),
            timestamp_format: config.timestamp_format.clone(),
            timezone: TimestampZone::resolve(&config.timestamp_timezone),
            classifier,
            warmup_frames: 0,
            last_processed_at: None,
            last_frame_id: None,
            last_refresh_at: Instant::now(),
            frames_processed: 0,
            frames_saved: 0,
        }
    }

    /// Run one detection step against `source`
    pub fn run_once(
        &mut self,
        source: &dyn FrameProvider,
    ) -> Result<DetectionOutcome, DetectorError> {
        if self.capabilities().rate_limiting {
            if let Some(last) = self.last_processed_at {
                if last.elapsed() < self.sample_interval {
                    return Ok(DetectionOutcome::RateLimited);
                }
            }
        }

        let outcome = self.examine(source);

        if self.last_refresh_at.elapsed() >= self.refresh_interval {
            debug!("Refreshing source for '{}'", self.camera_name);
            source.refresh();
            self.last_refresh_at = Instant::now();
        }

        outcome
    }

    fn examine(&mut self, source: &dyn FrameProvider) -> Result<DetectionOutcome, DetectorError> {
        let Some(frame) = source.snapshot() else {
            trace!("No frame available yet for '{}'", self.camera_name);
            return Ok(DetectionOutcome::NoFrame);
        };

        if self.last_frame_id == Some(frame.id) {
            trace!("Frame {} of '{}' already processed", frame.id, self.camera_name);
            return Ok(DetectionOutcome::Duplicate);
        }
        self.last_frame_id = Some(frame.id);
        self.last_processed_at = Some(Instant::now());
        self.frames_processed += 1;

        if self.warmup_frames < self.initial_frame_skip {
            self.warmup_frames += 1;
            self.classifier.learn(&frame.image);
            trace!(
                "Warm-up frame {}/{} for '{}'",
                self.warmup_frames,
                self.initial_frame_skip,
                self.camera_name
            );
            return Ok(DetectionOutcome::WarmingUp);
        }

        let classification = self.classifier.classify(&frame.image);
        let qualifying = classification.qualifying(self.min_area).count();
        if qualifying == 0 {
            debug!(
                "No motion in frame {} of '{}' (largest region {} < {})",
                frame.id,
                self.camera_name,
                classification.largest_area(),
                self.min_area
            );
            return Ok(DetectionOutcome::Still);
        }

        let path = self.save_frame(&frame)?;
        info!(
            "Motion detected on '{}': {} region(s), largest {} px, saved {}",
            self.camera_name,
            qualifying,
            classification.largest_area(),
            path.display()
        );
        Ok(DetectionOutcome::Saved(path))
    }

    /// Write the full-resolution frame under a unique timestamped name
    fn save_frame(&mut self, frame: &FrameData) -> Result<PathBuf, DetectorError> {
        fs::create_dir_all(&self.output_dir).map_err(|e| DetectorError::Save {
            path: self.output_dir.clone(),
            details: e.to_string(),
        })?;

        let stamp = self
            .timezone
            .format(frame.timestamp, &self.timestamp_format);
        let stem = format!("{} - {}", self.camera_name, stamp);
        let path = unique_path(&self.output_dir, &stem);

        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{}.jpg", stem));
        let partial = self.output_dir.join(format!(".{}.part", file_name));

        frame
            .image
            .save_with_format(&partial, ImageFormat::Jpeg)
            .map_err(|e| DetectorError::Save {
                path: partial.clone(),
                details: e.to_string(),
            })?;

        if let Err(e) = fs::rename(&partial, &path) {
            let _ = fs::remove_file(&partial);
            return Err(DetectorError::Save {
                path,
                details: e.to_string(),
            });
        }

        self.frames_saved += 1;
        Ok(path)
    }

    pub fn camera_name(&self) -> &str {
        &self.camera_name
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn min_area(&self) -> u32 {
        self.min_area
    }

    pub fn capabilities(&self) -> Capabilities {
        self.classifier.capabilities()
    }

    pub fn is_warming_up(&self) -> bool {
        self.warmup_frames < self.initial_frame_skip
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed
    }

    pub fn frames_saved(&self) -> u64 {
        self.frames_saved
    }

    pub fn heatmap(&self) -> Option<&MotionHeatmap> {
        self.classifier.heatmap()
    }

    /// Write the heat map as `<camera>-heatmap.png` under `dir`.
    ///
    /// Returns `None` when the heat map capability is off or nothing has been
    /// classified yet.
    pub fn save_heatmap(&self, dir: &Path) -> Result<Option<PathBuf>, DetectorError> {
        let Some(heatmap) = self.heatmap().filter(|heatmap| heatmap.samples() > 0) else {
            return Ok(None);
        };

        fs::create_dir_all(dir).map_err(|e| DetectorError::Save {
            path: dir.to_path_buf(),
            details: e.to_string(),
        })?;

        let path = dir.join(format!("{}-heatmap.png", self.camera_name));
        heatmap.save(&path).map_err(|e| DetectorError::Save {
            path: path.clone(),
            details: e.to_string(),
        })?;

        info!(
            "Heat map for '{}' written to {} ({} frames)",
            self.camera_name,
            path.display(),
            heatmap.samples()
        );
        Ok(Some(path))
    }
}

/// `<stem>.jpg`, or `<stem> (n).jpg` with the first free `n`
fn unique_path(dir: &Path, stem: &str) -> PathBuf {
    let candidate = dir.join(format!("{}.jpg", stem));
    if !candidate.exists() {
        return candidate;
    }

    let mut n = 1u32;
    loop {
        let candidate = dir.join(format!("{} ({}).jpg", stem, n));
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}
