use super::protection::person_score;
use super::*;
use crate::config::StorageConfig;
use crate::error::StorageError;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

const GB: u64 = 1 << 30;

struct FixedProbe(u64);

impl SpaceProbe for FixedProbe {
    fn free_bytes(&self, _path: &Path) -> Result<u64, StorageError> {
        Ok(self.0)
    }
}

struct FailingProbe;

impl SpaceProbe for FailingProbe {
    fn free_bytes(&self, path: &Path) -> Result<u64, StorageError> {
        Err(StorageError::SpaceQuery {
            path: path.to_path_buf(),
            details: "device unavailable".to_string(),
        })
    }
}

/// Flags every image as containing a person
struct PersonEverywhere;

impl ContentGuard for PersonEverywhere {
    fn name(&self) -> &'static str {
        "person-everywhere"
    }

    fn is_protected(&self, _path: &Path) -> Result<bool, StorageError> {
        Ok(true)
    }
}

struct BrokenGuard;

impl ContentGuard for BrokenGuard {
    fn name(&self) -> &'static str {
        "broken"
    }

    fn is_protected(&self, _path: &Path) -> Result<bool, StorageError> {
        Err(StorageError::Protection {
            details: "model exploded".to_string(),
        })
    }
}

fn test_storage_config() -> StorageConfig {
    StorageConfig {
        interval_seconds: 3600.0,
        required_free_gb: 5.0,
        critical_free_gb: 2.0,
        ..StorageConfig::default()
    }
}

fn fill(dir: &Path, count: usize) {
    fs::create_dir_all(dir).unwrap();
    for i in 0..count {
        fs::write(dir.join(format!("porch - {:02}.jpg", i)), b"jpeg").unwrap();
    }
}

fn image_count(dir: &Path) -> usize {
    fs::read_dir(dir).unwrap().count()
}

fn manager(
    dir: &Path,
    probe: impl SpaceProbe + 'static,
    guard: impl ContentGuard + 'static,
) -> StorageManager {
    StorageManager::new(
        dir.to_path_buf(),
        &test_storage_config(),
        Arc::new(probe),
        Arc::new(guard),
    )
    .with_rng(StdRng::seed_from_u64(7))
}

#[test]
fn test_budget_assessment() {
    let budget = EvictionBudget {
        required_free_gb: 5.0,
        critical_free_gb: 2.0,
    };
    assert_eq!(budget.assess(10.0), Pressure::Relaxed);
    assert_eq!(budget.assess(5.0), Pressure::Relaxed);
    assert_eq!(budget.assess(4.9), Pressure::Memory);
    assert_eq!(budget.assess(2.0), Pressure::Memory);
    assert_eq!(budget.assess(1.0), Pressure::Critical);
}

#[test]
fn test_low_space_evicts_exactly_one_file() {
    let dir = TempDir::new().unwrap();
    fill(dir.path(), 11);

    let mut manager = manager(dir.path(), FixedProbe(GB), NoProtection);
    let outcome = manager.run().unwrap();

    let EvictionOutcome::Evicted(path) = outcome else {
        panic!("Expected an eviction, got {:?}", outcome);
    };
    assert!(!path.exists());
    assert_eq!(image_count(dir.path()), 10);
    assert_eq!(manager.evicted_total(), 1);
}

#[test]
fn test_protected_image_survives_memory_pressure() {
    let dir = TempDir::new().unwrap();
    fill(dir.path(), 11);

    let mut manager = manager(dir.path(), FixedProbe(3 * GB), PersonEverywhere);
    let outcome = manager.run().unwrap();

    assert!(matches!(outcome, EvictionOutcome::Retained(_)));
    assert_eq!(image_count(dir.path()), 11);
}

#[test]
fn test_critical_space_ignores_protection() {
    let dir = TempDir::new().unwrap();
    fill(dir.path(), 11);

    let mut manager = manager(dir.path(), FixedProbe(GB), PersonEverywhere);
    assert!(matches!(manager.run().unwrap(), EvictionOutcome::Evicted(_)));
    assert_eq!(image_count(dir.path()), 10);
}

#[test]
fn test_failed_protection_check_counts_as_unprotected() {
    let dir = TempDir::new().unwrap();
    fill(dir.path(), 12);

    let mut manager = manager(dir.path(), FixedProbe(3 * GB), BrokenGuard);
    assert!(matches!(manager.run().unwrap(), EvictionOutcome::Evicted(_)));
    assert_eq!(image_count(dir.path()), 11);
}

#[test]
fn test_too_few_files() {
    let dir = TempDir::new().unwrap();
    fill(dir.path(), 10);

    let mut manager = manager(dir.path(), FixedProbe(GB), NoProtection);
    assert_eq!(manager.run().unwrap(), EvictionOutcome::TooFewFiles);
    assert_eq!(image_count(dir.path()), 10);
}

#[test]
fn test_relaxed_passes_wait_for_interval() {
    let dir = TempDir::new().unwrap();
    fill(dir.path(), 20);

    let mut relaxed = manager(dir.path(), FixedProbe(50 * GB), NoProtection);
    assert!(matches!(relaxed.run().unwrap(), EvictionOutcome::Evicted(_)));
    assert_eq!(relaxed.run().unwrap(), EvictionOutcome::Skipped);
    assert_eq!(image_count(dir.path()), 19);

    let mut pressed = manager(dir.path(), FixedProbe(4 * GB), NoProtection);
    assert!(matches!(pressed.run().unwrap(), EvictionOutcome::Evicted(_)));
    assert!(matches!(pressed.run().unwrap(), EvictionOutcome::Evicted(_)));
    assert_eq!(image_count(dir.path()), 17);
}

#[test]
fn test_space_query_failure_assumes_memory_pressure() {
    let dir = TempDir::new().unwrap();
    fill(dir.path(), 15);

    let mut manager = manager(dir.path(), FailingProbe, PersonEverywhere);
    assert!(manager.check_free_space().is_err());
    assert_eq!(manager.pressure(), Pressure::Memory);

    // Memory pressure: runs every time, but protection still holds
    assert!(matches!(manager.run().unwrap(), EvictionOutcome::Retained(_)));
    assert!(matches!(manager.run().unwrap(), EvictionOutcome::Retained(_)));
    assert_eq!(image_count(dir.path()), 15);
}

#[test]
fn test_only_images_are_candidates() {
    let dir = TempDir::new().unwrap();
    fill(dir.path(), 11);
    fs::write(dir.path().join("notes.txt"), b"keep me").unwrap();
    fs::create_dir(dir.path().join("nested.jpg")).unwrap();

    let mut manager = manager(dir.path(), FixedProbe(GB), NoProtection);
    for _ in 0..5 {
        manager.run().unwrap();
    }
    assert!(dir.path().join("notes.txt").exists());
    assert!(dir.path().join("nested.jpg").is_dir());
}

#[test]
fn test_seeded_selection_is_reproducible() {
    let picks: Vec<PathBuf> = (0..2)
        .map(|_| {
            let dir = TempDir::new().unwrap();
            fill(dir.path(), 11);
            let mut manager = manager(dir.path(), FixedProbe(GB), NoProtection);
            match manager.run().unwrap() {
                EvictionOutcome::Evicted(path) => PathBuf::from(path.file_name().unwrap()),
                other => panic!("Expected an eviction, got {:?}", other),
            }
        })
        .collect();
    assert_eq!(picks[0], picks[1]);
}

#[test]
fn test_missing_storage_dir_is_empty() {
    let dir = TempDir::new().unwrap();
    let mut manager = manager(&dir.path().join("absent"), FixedProbe(GB), NoProtection);
    assert_eq!(manager.run().unwrap(), EvictionOutcome::TooFewFiles);
}

#[test]
fn test_default_guard_protects_nothing() {
    let guard = build_guard(&StorageConfig::default()).unwrap();
    assert_eq!(guard.name(), "none");
    assert!(!guard.is_protected(Path::new("/nowhere.jpg")).unwrap());
}

#[test]
fn test_person_score_selection() {
    // Single-output classifier
    assert_eq!(person_score(&[0.8], None).unwrap(), 0.8);
    assert_eq!(person_score(&[f32::NAN], None).unwrap(), 0.0);

    // Multi-class output: only the configured class counts
    let scores = [0.9, 0.1, 0.05];
    assert_eq!(person_score(&scores, Some(1)).unwrap(), 0.1);
    assert!(person_score(&scores, None).is_err());
    assert!(person_score(&scores, Some(3)).is_err());
}

#[cfg(unix)]
#[test]
fn test_statvfs_probe() {
    let dir = TempDir::new().unwrap();
    let probe = StatvfsProbe;
    let free = probe.free_bytes(dir.path()).unwrap();
    assert!(free > 0);

    // Not created yet: falls back to the parent's filesystem
    assert!(probe.free_gb(&dir.path().join("later/storage")).unwrap() > 0.0);
    assert_eq!(bytes_to_gb(3 * GB), 3.0);
}
