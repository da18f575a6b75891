use super::similarity::{SimilarityMetric, TemplateHistogramMetric};
use crate::config::FilterConfig;
use crate::error::FilterError;
use image::io::Reader as ImageReader;
use image::RgbImage;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, error, info, warn};

/// Result of one [`SimilarityFilter::run`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOutcome {
    /// Interval not elapsed, nothing new, or too few files
    Skipped,
    Completed { compared: usize, moved: usize },
}

/// A candidate image on disk, ordered by modification time then name
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct Candidate {
    modified: SystemTime,
    path: PathBuf,
}

#[derive(Debug)]
struct Reference {
    key: Candidate,
    image: RgbImage,
}

/// Sequential near-duplicate remover for one working directory.
///
/// Every file is compared with the one examined just before it; when the pair
/// scores above the threshold the newer file goes to cold storage. The
/// reference always moves on to the newest examined file, so runs of
/// near-identical captures collapse to their first frame.
pub struct SimilarityFilter {
    working_dir: PathBuf,
    cold_storage_dir: PathBuf,
    interval: Duration,
    threshold: f64,
    metric: Arc<dyn SimilarityMetric>,
    reference: Option<Reference>,
    first_pass_done: bool,
    last_run_at: Option<Instant>,
    last_file_count: usize,
    moved_total: u64,
}

impl SimilarityFilter {
    pub fn new(working_dir: PathBuf, cold_storage_dir: PathBuf, config: &FilterConfig) -> Self {
        let metric = Arc::new(TemplateHistogramMetric::new(config.compare_width));
        Self::with_metric(working_dir, cold_storage_dir, config, metric)
    }

    pub fn with_metric(
        working_dir: PathBuf,
        cold_storage_dir: PathBuf,
        config: &FilterConfig,
        metric: Arc<dyn SimilarityMetric>,
    ) -> Self {
        Self {
            working_dir,
            cold_storage_dir,
            interval: config.interval(),
            threshold: config.similarity_threshold,
            metric,
            reference: None,
            first_pass_done: false,
            last_run_at: None,
            last_file_count: 0,
            moved_total: 0,
        }
    }

    /// One deduplication pass, unless a skip condition holds
    pub fn run(&mut self) -> Result<FilterOutcome, FilterError> {
        let files = list_candidates(&self.working_dir)?;

        if self.first_pass_done {
            let interval_pending = self
                .last_run_at
                .map(|last| last.elapsed() < self.interval)
                .unwrap_or(false);
            if interval_pending || files.len() == self.last_file_count || files.len() < 2 {
                return Ok(FilterOutcome::Skipped);
            }
        }

        self.last_run_at = Some(Instant::now());
        debug!(
            "Similarity pass over {} files in {}",
            files.len(),
            self.working_dir.display()
        );

        let mut compared = 0;
        let mut moved = 0;

        for candidate in files.iter() {
            if let Some(reference) = &self.reference {
                if *candidate <= reference.key {
                    continue;
                }
            }

            let image = match load_rgb(&candidate.path) {
                Ok(image) => image,
                Err(e) => {
                    report_unreadable(&candidate.path, &e);
                    continue;
                }
            };

            let Some(reference) = self.reference.as_ref() else {
                debug!("Adopting {} as reference", candidate.path.display());
                self.reference = Some(Reference {
                    key: candidate.clone(),
                    image,
                });
                continue;
            };

            let score = self.metric.score(&reference.image, &image);
            compared += 1;

            if score > self.threshold {
                match self.move_to_cold_storage(&candidate.path) {
                    Ok(target) => {
                        moved += 1;
                        debug!(
                            "Moved {} to {} (score {:.2})",
                            candidate.path.display(),
                            target.display(),
                            score
                        );
                    }
                    Err(e) => error!("{}", e),
                }
            } else {
                debug!(
                    "Kept {} (score {:.2} <= {:.2})",
                    candidate.path.display(),
                    score,
                    self.threshold
                );
            }

            self.reference = Some(Reference {
                key: candidate.clone(),
                image,
            });
        }

        self.first_pass_done = true;
        self.last_file_count = files.len() - moved;
        self.moved_total += moved as u64;

        if moved > 0 {
            info!(
                "Similarity pass on {}: {} compared, {} duplicates moved",
                self.working_dir.display(),
                compared,
                moved
            );
        }

        Ok(FilterOutcome::Completed { compared, moved })
    }

    fn move_to_cold_storage(&self, path: &Path) -> Result<PathBuf, FilterError> {
        let move_error = |to: &Path, details: String| FilterError::Move {
            from: path.to_path_buf(),
            to: to.to_path_buf(),
            details,
        };

        fs::create_dir_all(&self.cold_storage_dir)
            .map_err(|e| move_error(&self.cold_storage_dir, e.to_string()))?;

        let file_name = path
            .file_name()
            .ok_or_else(|| move_error(&self.cold_storage_dir, "no file name".to_string()))?;
        let target = free_target(&self.cold_storage_dir, Path::new(file_name));

        fs::rename(path, &target).map_err(|e| move_error(&target, e.to_string()))?;
        Ok(target)
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn reference_path(&self) -> Option<&Path> {
        self.reference.as_ref().map(|reference| reference.key.path.as_path())
    }

    pub fn moved_total(&self) -> u64 {
        self.moved_total
    }
}

/// `.jpg` files directly under `dir`, oldest first; a missing directory is
/// empty
fn list_candidates(dir: &Path) -> Result<Vec<Candidate>, FilterError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(FilterError::Load {
                path: dir.to_path_buf(),
                details: e.to_string(),
            })
        }
    };

    let mut files: Vec<Candidate> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let path = entry.path();
            if !is_jpeg_name(&path) {
                return None;
            }
            let metadata = entry.metadata().ok()?;
            if !metadata.is_file() {
                return None;
            }
            Some(Candidate {
                modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                path,
            })
        })
        .collect();

    files.sort();
    Ok(files)
}

pub(crate) fn is_jpeg_name(path: &Path) -> bool {
    let hidden = path
        .file_name()
        .map(|name| name.to_string_lossy().starts_with('.'))
        .unwrap_or(true);
    !hidden
        && path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("jpg"))
            .unwrap_or(false)
}

/// Decode an image by content, whatever its extension says
pub(crate) fn load_rgb(path: &Path) -> Result<RgbImage, FilterError> {
    let load_error = |details: String| FilterError::Load {
        path: path.to_path_buf(),
        details,
    };

    let image = ImageReader::open(path)
        .map_err(|e| load_error(e.to_string()))?
        .with_guessed_format()
        .map_err(|e| load_error(e.to_string()))?
        .decode()
        .map_err(|e| load_error(e.to_string()))?;
    Ok(image.to_rgb8())
}

fn report_unreadable(path: &Path, e: &FilterError) {
    if path.exists() {
        warn!("Skipping unreadable image: {}", e);
    } else {
        debug!("{} vanished before it could be compared", path.display());
    }
}

/// `dir/name`, or `dir/<stem> (n).<ext>` if that is taken
fn free_target(dir: &Path, name: &Path) -> PathBuf {
    let candidate = dir.join(name);
    if !candidate.exists() {
        return candidate;
    }

    let stem = name
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = name
        .extension()
        .map(|ext| ext.to_string_lossy().into_owned())
        .unwrap_or_else(|| "jpg".to_string());

    let mut n = 1u32;
    loop {
        let candidate = dir.join(format!("{} ({}).{}", stem, n, ext));
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}
