use super::*;
use crate::config::DetectorConfig;
use crate::frame::FrameData;
use image::{GrayImage, Luma, Rgb, RgbImage};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tempfile::TempDir;

const BACKGROUND: Rgb<u8> = Rgb([60, 60, 60]);
const BLOB: Rgb<u8> = Rgb([230, 230, 230]);

#[derive(Default)]
struct ScriptedSource {
    frame: Mutex<Option<FrameData>>,
    refreshes: AtomicU32,
}

impl ScriptedSource {
    fn show(&self, id: u64, image: RgbImage) {
        self.show_at(id, SystemTime::now(), image);
    }

    fn show_at(&self, id: u64, timestamp: SystemTime, image: RgbImage) {
        *self.frame.lock().unwrap() = Some(FrameData::new(id, timestamp, image));
    }

    fn refreshes(&self) -> u32 {
        self.refreshes.load(Ordering::SeqCst)
    }
}

impl FrameProvider for ScriptedSource {
    fn snapshot(&self) -> Option<FrameData> {
        self.frame.lock().unwrap().clone()
    }

    fn refresh(&self) {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
    }
}

fn test_detector_config(min_area: u32) -> DetectorConfig {
    DetectorConfig {
        min_area,
        downsample_width: 64,
        initial_frame_skip: 3,
        sample_interval_seconds: 0.0,
        refresh_interval_seconds: 3600.0,
        noise_kernel_radius: 1,
        timestamp_format: "%Y%m%d-%H%M%S".to_string(),
        timestamp_timezone: "UTC".to_string(),
        ..DetectorConfig::default()
    }
}

fn background_frame() -> RgbImage {
    RgbImage::from_pixel(64, 48, BACKGROUND)
}

/// Background with filled squares at the given top-left corners
fn frame_with_squares(corners: &[(u32, u32)], side: u32) -> RgbImage {
    let mut image = background_frame();
    for &(x0, y0) in corners {
        for y in y0..y0 + side {
            for x in x0..x0 + side {
                image.put_pixel(x, y, BLOB);
            }
        }
    }
    image
}

/// Run the warm-up frames, returning the next free frame id
fn warm_up(detector: &mut MotionDetector, source: &ScriptedSource) -> u64 {
    let mut id = 1;
    while detector.is_warming_up() {
        source.show(id, background_frame());
        assert_eq!(
            detector.run_once(source).unwrap(),
            DetectionOutcome::WarmingUp
        );
        id += 1;
    }
    id
}

fn jpg_files(dir: &std::path::Path) -> Vec<std::path::PathBuf> {
    let mut files: Vec<_> = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|entry| entry.ok().map(|entry| entry.path()))
                .filter(|path| path.extension().map(|ext| ext == "jpg").unwrap_or(false))
                .collect()
        })
        .unwrap_or_default();
    files.sort();
    files
}

#[test]
fn test_region_equal_to_min_area_is_saved() {
    let dir = TempDir::new().unwrap();
    let source = ScriptedSource::default();
    let mut detector = MotionDetector::new("porch", dir.path().to_path_buf(), &test_detector_config(100));

    let id = warm_up(&mut detector, &source);
    source.show(id, frame_with_squares(&[(20, 15)], 10));

    match detector.run_once(&source).unwrap() {
        DetectionOutcome::Saved(path) => {
            assert!(path.exists());
            let name = path.file_name().unwrap().to_string_lossy().into_owned();
            assert!(name.starts_with("porch - "));
            assert!(name.ends_with(".jpg"));
        }
        other => panic!("Expected a saved frame, got {:?}", other),
    }
    assert_eq!(detector.frames_saved(), 1);
}

#[test]
fn test_region_below_min_area_is_ignored() {
    let dir = TempDir::new().unwrap();
    let source = ScriptedSource::default();
    let mut detector = MotionDetector::new("porch", dir.path().to_path_buf(), &test_detector_config(101));

    let id = warm_up(&mut detector, &source);
    source.show(id, frame_with_squares(&[(20, 15)], 10));

    assert_eq!(detector.run_once(&source).unwrap(), DetectionOutcome::Still);
    assert!(jpg_files(dir.path()).is_empty());
}

#[test]
fn test_multiple_regions_save_one_file() {
    let dir = TempDir::new().unwrap();
    let source = ScriptedSource::default();
    let mut detector = MotionDetector::new("yard", dir.path().to_path_buf(), &test_detector_config(100));

    let id = warm_up(&mut detector, &source);
    source.show(id, frame_with_squares(&[(4, 4), (40, 30)], 12));

    assert!(matches!(
        detector.run_once(&source).unwrap(),
        DetectionOutcome::Saved(_)
    ));
    assert_eq!(jpg_files(dir.path()).len(), 1);
}

#[test]
fn test_saved_frame_is_full_resolution() {
    let dir = TempDir::new().unwrap();
    let source = ScriptedSource::default();
    let mut detector = MotionDetector::new("yard", dir.path().to_path_buf(), &test_detector_config(20));

    let big_background = || RgbImage::from_pixel(128, 96, BACKGROUND);
    let mut id = 1;
    while detector.is_warming_up() {
        source.show(id, big_background());
        detector.run_once(&source).unwrap();
        id += 1;
    }

    let mut moving = big_background();
    for y in 30..70 {
        for x in 40..80 {
            moving.put_pixel(x, y, BLOB);
        }
    }
    source.show(id, moving);

    let DetectionOutcome::Saved(path) = detector.run_once(&source).unwrap() else {
        panic!("Expected motion in a 40x40 block");
    };
    let saved = image::open(&path).unwrap();
    assert_eq!((saved.width(), saved.height()), (128, 96));
}

#[test]
fn test_warm_up_frames_never_flag_motion() {
    let dir = TempDir::new().unwrap();
    let source = ScriptedSource::default();
    let mut detector = MotionDetector::new("porch", dir.path().to_path_buf(), &test_detector_config(10));

    for id in 1..=3 {
        source.show(id, frame_with_squares(&[(id as u32 * 10, 10)], 10));
        assert_eq!(
            detector.run_once(&source).unwrap(),
            DetectionOutcome::WarmingUp
        );
    }
    assert!(!detector.is_warming_up());
    assert!(jpg_files(dir.path()).is_empty());
    assert!(detector.capabilities().rate_limiting);
}

#[test]
fn test_no_frame_and_duplicate_frames() {
    let dir = TempDir::new().unwrap();
    let source = ScriptedSource::default();
    let mut detector = MotionDetector::new("porch", dir.path().to_path_buf(), &test_detector_config(100));

    assert_eq!(detector.run_once(&source).unwrap(), DetectionOutcome::NoFrame);

    source.show(1, background_frame());
    assert_eq!(detector.run_once(&source).unwrap(), DetectionOutcome::WarmingUp);
    assert_eq!(detector.run_once(&source).unwrap(), DetectionOutcome::Duplicate);
    assert_eq!(detector.frames_processed(), 1);
}

#[test]
fn test_rate_limiting() {
    let dir = TempDir::new().unwrap();
    let source = ScriptedSource::default();
    let mut config = test_detector_config(100);
    config.sample_interval_seconds = 3600.0;
    let mut detector = MotionDetector::new("porch", dir.path().to_path_buf(), &config);

    source.show(1, background_frame());
    assert_eq!(detector.run_once(&source).unwrap(), DetectionOutcome::WarmingUp);

    source.show(2, background_frame());
    assert_eq!(detector.run_once(&source).unwrap(), DetectionOutcome::RateLimited);

    config.rate_limiting = false;
    let mut unlimited = MotionDetector::new("porch", dir.path().to_path_buf(), &config);
    source.show(3, background_frame());
    assert_eq!(unlimited.run_once(&source).unwrap(), DetectionOutcome::WarmingUp);
    source.show(4, background_frame());
    assert_eq!(unlimited.run_once(&source).unwrap(), DetectionOutcome::WarmingUp);
}

#[test]
fn test_refresh_interval() {
    let dir = TempDir::new().unwrap();
    let source = ScriptedSource::default();

    let mut detector = MotionDetector::new("porch", dir.path().to_path_buf(), &test_detector_config(100));
    detector.run_once(&source).unwrap();
    assert_eq!(source.refreshes(), 0);

    let mut config = test_detector_config(100);
    config.refresh_interval_seconds = 0.0;
    let mut eager = MotionDetector::new("porch", dir.path().to_path_buf(), &config);
    eager.run_once(&source).unwrap();
    eager.run_once(&source).unwrap();
    assert_eq!(source.refreshes(), 2);
}

#[test]
fn test_name_collisions_get_suffix() {
    let dir = TempDir::new().unwrap();
    let source = ScriptedSource::default();
    let mut detector = MotionDetector::new("porch", dir.path().to_path_buf(), &test_detector_config(100));
    let at = UNIX_EPOCH + Duration::from_secs(1_700_000_000);

    let id = warm_up(&mut detector, &source);
    source.show_at(id, at, frame_with_squares(&[(20, 15)], 10));
    let DetectionOutcome::Saved(first) = detector.run_once(&source).unwrap() else {
        panic!("Expected first save");
    };
    source.show_at(id + 1, at, frame_with_squares(&[(20, 15)], 10));
    let DetectionOutcome::Saved(second) = detector.run_once(&source).unwrap() else {
        panic!("Expected second save");
    };

    assert_eq!(
        first.file_name().unwrap().to_string_lossy(),
        "porch - 20231114-221320.jpg"
    );
    assert_eq!(
        second.file_name().unwrap().to_string_lossy(),
        "porch - 20231114-221320 (1).jpg"
    );
    assert_eq!(jpg_files(dir.path()).len(), 2);
}

#[test]
fn test_min_area_override() {
    let dir = TempDir::new().unwrap();
    let mut config = test_detector_config(100);
    config.min_area_overrides.insert("driveway".to_string(), 400);

    let driveway = MotionDetector::new("driveway", dir.path().join("driveway"), &config);
    let porch = MotionDetector::new("porch", dir.path().join("porch"), &config);
    assert_eq!(driveway.min_area(), 400);
    assert_eq!(porch.min_area(), 100);
}

#[test]
fn test_timestamp_zone_resolution() {
    let at = UNIX_EPOCH;
    assert_eq!(
        TimestampZone::resolve("UTC").format(at, "%Y-%m-%d %H:%M:%S"),
        "1970-01-01 00:00:00"
    );
    assert_eq!(
        TimestampZone::resolve("Asia/Tokyo").format(at, "%H:%M"),
        "09:00"
    );
    assert!(matches!(TimestampZone::resolve("local"), TimestampZone::Local));
    assert_eq!(
        TimestampZone::resolve("Nowhere/Special").format(at, "%H:%M"),
        "00:00"
    );
}

#[test]
fn test_heatmap_accumulates_and_saves() {
    let dir = TempDir::new().unwrap();
    let source = ScriptedSource::default();
    let mut config = test_detector_config(100);
    config.heatmap = true;
    let mut detector = MotionDetector::new("porch", dir.path().join("frames"), &config);

    let id = warm_up(&mut detector, &source);
    source.show(id, frame_with_squares(&[(20, 15)], 10));
    detector.run_once(&source).unwrap();
    source.show(id + 1, background_frame());
    detector.run_once(&source).unwrap();

    let heatmap = detector.heatmap().unwrap();
    assert_eq!(heatmap.samples(), 2);
    assert!((heatmap.value_at(25, 20).unwrap() - 0.5).abs() < 1e-6);
    assert_eq!(heatmap.value_at(0, 0), Some(0.0));

    let saved = detector.save_heatmap(&dir.path().join("heat")).unwrap().unwrap();
    assert!(saved.ends_with("porch-heatmap.png"));
    assert!(saved.exists());
}

#[test]
fn test_heatmap_disabled_by_default() {
    let dir = TempDir::new().unwrap();
    let detector = MotionDetector::new("porch", dir.path().to_path_buf(), &test_detector_config(100));
    assert!(detector.heatmap().is_none());
    assert_eq!(detector.save_heatmap(dir.path()).unwrap(), None);
}

#[test]
fn test_opening_removes_isolated_pixels() {
    let mut mask = GrayImage::new(20, 20);
    mask.put_pixel(2, 2, Luma([255]));
    for y in 8..14 {
        for x in 8..14 {
            mask.put_pixel(x, y, Luma([255]));
        }
    }

    let opened = open_mask(&mask, 1);
    assert_eq!(opened.get_pixel(2, 2)[0], 0);

    let regions = connected_regions(&opened);
    assert_eq!(regions.len(), 1);
    assert_eq!(regions[0].area, 36);
    assert_eq!(regions[0].bounding_size(), (6, 6));
}

#[test]
fn test_regions_use_eight_connectivity() {
    let mut mask = GrayImage::new(10, 10);
    mask.put_pixel(1, 1, Luma([255]));
    mask.put_pixel(2, 2, Luma([255]));
    mask.put_pixel(3, 3, Luma([255]));
    mask.put_pixel(8, 1, Luma([255]));

    let regions = connected_regions(&mask);
    assert_eq!(regions.len(), 2);
    assert_eq!(regions[0].area, 3);
    assert_eq!(regions[1].area, 1);
    assert!(regions[0].qualifies(3));
    assert!(!regions[0].qualifies(4));
}

#[test]
fn test_background_model_seeding() {
    let mut model = BackgroundModel::new(0.5, 16.0, 25);
    let flat = GrayImage::from_pixel(8, 8, Luma([100]));

    let first = model.apply(&flat);
    assert!(first.pixels().all(|p| p[0] == 0));
    assert!(model.is_initialized());

    let mut bright = flat.clone();
    bright.put_pixel(4, 4, Luma([250]));
    let mask = model.apply(&bright);
    assert_eq!(mask.get_pixel(4, 4)[0], 255);
    assert_eq!(mask.get_pixel(0, 0)[0], 0);
    assert!((model.mean_at(4, 4).unwrap() - 175.0).abs() < 1e-3);

    let resized = GrayImage::from_pixel(4, 4, Luma([100]));
    assert!(model.apply(&resized).pixels().all(|p| p[0] == 0));
    assert_eq!(model.dimensions(), (4, 4));
    assert_eq!(model.frames_seen(), 1);
}

#[test]
fn test_classifier_downsamples_preserving_aspect() {
    let config = DetectorConfig {
        downsample_width: 32,
        ..DetectorConfig::default()
    };
    let classifier = FrameClassifier::new(&config);
    let gray = classifier.downsample(&RgbImage::from_pixel(128, 96, BACKGROUND));
    assert_eq!(gray.dimensions(), (32, 24));
    assert_eq!(gray.get_pixel(5, 5)[0], 60);
}
