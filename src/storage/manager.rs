use super::protection::ContentGuard;
use super::space::SpaceProbe;
use crate::config::StorageConfig;
use crate::error::StorageError;
use crate::filter::is_jpeg_name;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// How urgently space has to be reclaimed
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Pressure {
    Relaxed,
    /// Below the required free space; passes run on every poll
    Memory,
    /// Below the critical free space; protected images are evicted too
    Critical,
}

/// Free-space thresholds in GiB
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvictionBudget {
    pub required_free_gb: f64,
    pub critical_free_gb: f64,
}

impl EvictionBudget {
    pub fn from_config(config: &StorageConfig) -> Self {
        Self {
            required_free_gb: config.required_free_gb,
            critical_free_gb: config.critical_free_gb,
        }
    }

    pub fn assess(&self, free_gb: f64) -> Pressure {
        if free_gb < self.critical_free_gb {
            Pressure::Critical
        } else if free_gb < self.required_free_gb {
            Pressure::Memory
        } else {
            Pressure::Relaxed
        }
    }
}

/// Result of one [`StorageManager::run`] call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvictionOutcome {
    /// Interval not elapsed and no space pressure
    Skipped,
    /// Not more than `min_files` images present
    TooFewFiles,
    /// The selected image is protected
    Retained(PathBuf),
    Evicted(PathBuf),
}

/// Random-eviction keeper of the cold storage directory.
///
/// Each pass removes at most one image, chosen uniformly at random, unless
/// the content guard protects it and space is not critical.
pub struct StorageManager {
    storage_dir: PathBuf,
    interval: Duration,
    min_files: usize,
    budget: EvictionBudget,
    probe: Arc<dyn SpaceProbe>,
    guard: Arc<dyn ContentGuard>,
    rng: StdRng,
    last_run_at: Option<Instant>,
    last_pressure: Option<Pressure>,
    evicted_total: u64,
}

impl StorageManager {
    pub fn new(
        storage_dir: PathBuf,
        config: &StorageConfig,
        probe: Arc<dyn SpaceProbe>,
        guard: Arc<dyn ContentGuard>,
    ) -> Self {
        info!(
            "Storage manager for {} (required {:.1} GiB, critical {:.1} GiB, guard: {})",
            storage_dir.display(),
            config.required_free_gb,
            config.critical_free_gb,
            guard.name()
        );

        Self {
            storage_dir,
            interval: config.interval(),
            min_files: config.min_files,
            budget: EvictionBudget::from_config(config),
            probe,
            guard,
            rng: StdRng::from_entropy(),
            last_run_at: None,
            last_pressure: None,
            evicted_total: 0,
        }
    }

    /// Replace the random source, for reproducible selection
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    /// Free space on the storage filesystem, in GiB
    pub fn check_free_space(&self) -> Result<f64, StorageError> {
        self.probe.free_gb(&self.storage_dir)
    }

    /// Current pressure; an unanswerable query counts as memory pressure
    pub fn pressure(&self) -> Pressure {
        match self.check_free_space() {
            Ok(free_gb) => {
                let pressure = self.budget.assess(free_gb);
                debug!("{:.2} GiB free, pressure {:?}", free_gb, pressure);
                pressure
            }
            Err(e) => {
                warn!("{}; assuming memory pressure", e);
                Pressure::Memory
            }
        }
    }

    /// One eviction pass, unless the interval is pending and space is fine
    pub fn run(&mut self) -> Result<EvictionOutcome, StorageError> {
        let pressure = self.pressure();
        if self.last_pressure != Some(pressure) && pressure != Pressure::Relaxed {
            warn!(
                "Storage pressure on {} is now {:?}",
                self.storage_dir.display(),
                pressure
            );
        }
        self.last_pressure = Some(pressure);

        let interval_pending = self
            .last_run_at
            .map(|last| last.elapsed() < self.interval)
            .unwrap_or(false);
        if interval_pending && pressure == Pressure::Relaxed {
            return Ok(EvictionOutcome::Skipped);
        }
        self.last_run_at = Some(Instant::now());

        let files = self.list_images()?;
        if files.len() <= self.min_files {
            debug!(
                "{} images in {}, nothing to evict",
                files.len(),
                self.storage_dir.display()
            );
            return Ok(EvictionOutcome::TooFewFiles);
        }

        let Some(selected) = files.choose(&mut self.rng).cloned() else {
            return Ok(EvictionOutcome::TooFewFiles);
        };

        let protected = match self.guard.is_protected(&selected) {
            Ok(protected) => protected,
            Err(e) => {
                warn!(
                    "Protection check failed for {}, treating as unprotected: {}",
                    selected.display(),
                    e
                );
                false
            }
        };

        if protected && pressure != Pressure::Critical {
            debug!("Keeping protected image {}", selected.display());
            return Ok(EvictionOutcome::Retained(selected));
        }

        match fs::remove_file(&selected) {
            Ok(()) => {
                self.evicted_total += 1;
                info!(
                    "Evicted {} ({:?}{})",
                    selected.display(),
                    pressure,
                    if protected { ", protected" } else { "" }
                );
                Ok(EvictionOutcome::Evicted(selected))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("{} vanished before eviction", selected.display());
                Ok(EvictionOutcome::Skipped)
            }
            Err(e) => Err(StorageError::Evict {
                path: selected,
                details: e.to_string(),
            }),
        }
    }

    fn list_images(&self) -> Result<Vec<PathBuf>, StorageError> {
        let entries = match fs::read_dir(&self.storage_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(StorageError::Evict {
                    path: self.storage_dir.clone(),
                    details: format!("cannot list directory: {}", e),
                })
            }
        };

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
            .map(|entry| entry.path())
            .filter(|path| is_jpeg_name(path))
            .collect();
        // Stable order so a seeded rng picks reproducibly
        files.sort();
        Ok(files)
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    pub fn budget(&self) -> EvictionBudget {
        self.budget
    }

    pub fn evicted_total(&self) -> u64 {
        self.evicted_total
    }
}
