use super::*;
use crate::config::CamwatchConfig;
use crate::error::StorageError;
use crate::registry::{CameraRegistry, FileCameraRegistry};
use crate::storage::{NoProtection, SpaceProbe};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Reports a roomy disk so eviction stays relaxed
struct PlentyOfSpace;

impl SpaceProbe for PlentyOfSpace {
    fn free_bytes(&self, _path: &Path) -> Result<u64, StorageError> {
        Ok(500 << 30)
    }
}

fn create_test_config(dir: &TempDir) -> CamwatchConfig {
    let mut config = CamwatchConfig::default();
    config.paths.working_dir = dir.path().join("working").to_string_lossy().into_owned();
    config.paths.cold_storage_dir = dir.path().join("cold").to_string_lossy().into_owned();
    config.paths.registry_path = dir
        .path()
        .join("cameras.toml")
        .to_string_lossy()
        .into_owned();

    config.source.synthetic_fps = 50;
    config.source.reconnect_delay_ms = 50;

    config.detector.min_area = 40;
    config.detector.downsample_width = 64;
    config.detector.initial_frame_skip = 2;
    config.detector.sample_interval_seconds = 0.0;
    config.detector.poll_interval_ms = 20;
    config.detector.noise_kernel_radius = 1;
    config.detector.timestamp_format = "%Y%m%d-%H%M%S%.3f".to_string();
    config.detector.timestamp_timezone = "UTC".to_string();

    config.filter.poll_interval_ms = 50;
    config.storage.poll_interval_ms = 50;
    config.storage.interval_seconds = 3600.0;
    config
}

async fn create_orchestrator(config: CamwatchConfig) -> CamwatchOrchestrator {
    CamwatchOrchestrator::new(config)
        .await
        .unwrap()
        .with_space_probe(Arc::new(PlentyOfSpace))
        .with_content_guard(Arc::new(NoProtection))
}

async fn register(config: &CamwatchConfig, name: &str, source: &str) {
    FileCameraRegistry::new(config.paths.registry_path())
        .save(name, source)
        .await
        .unwrap();
}

async fn wait_for_state(
    orchestrator: &CamwatchOrchestrator,
    component: &str,
    expected: ComponentState,
) -> bool {
    for _ in 0..100 {
        if orchestrator.get_component_state(component).await == Some(expected.clone()) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test]
async fn test_empty_registry_is_not_fatal() {
    let dir = TempDir::new().unwrap();
    let config = create_test_config(&dir);
    let mut orchestrator = create_orchestrator(config).await;

    orchestrator.start().await.unwrap();
    assert_eq!(orchestrator.camera_count(), 0);
    assert_eq!(
        orchestrator.get_component_state("filter").await,
        Some(ComponentState::Running)
    );
    assert_eq!(
        orchestrator.get_component_state("storage").await,
        Some(ComponentState::Running)
    );
    assert!(dir.path().join("cold").is_dir());

    let exit_code = orchestrator.shutdown().await.unwrap();
    assert_eq!(exit_code, 0);
    let states = orchestrator.get_all_component_states().await;
    assert_eq!(states.len(), 2);
    assert!(states.values().all(|s| *s == ComponentState::Stopped));
}

#[tokio::test]
async fn test_synthetic_camera_saves_motion() {
    let dir = TempDir::new().unwrap();
    let config = create_test_config(&dir);
    register(&config, "porch", "stub://64x48").await;

    let mut orchestrator = create_orchestrator(config).await;
    orchestrator.start().await.unwrap();
    assert_eq!(orchestrator.camera_count(), 1);
    assert!(dir.path().join("working").join("porch").is_dir());
    assert!(wait_for_state(&orchestrator, "camera:porch", ComponentState::Running).await);

    let detector = Arc::clone(&orchestrator.detectors[0]);
    let mut saved = 0;
    for _ in 0..250 {
        saved = detector.lock().frames_saved();
        if saved > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(saved > 0, "moving square never triggered a capture");

    assert_eq!(orchestrator.shutdown().await.unwrap(), 0);
    assert_eq!(
        orchestrator.get_component_state("camera:porch").await,
        Some(ComponentState::Stopped)
    );
}

#[tokio::test]
async fn test_cameras_run_independently() {
    let dir = TempDir::new().unwrap();
    let config = create_test_config(&dir);
    register(&config, "yard", "stub://still/64x48").await;
    register(&config, "broken", "stub://not-a-size").await;

    let mut orchestrator = create_orchestrator(config).await;
    orchestrator.start().await.unwrap();

    assert!(wait_for_state(&orchestrator, "camera:broken", ComponentState::Failed).await);
    assert!(wait_for_state(&orchestrator, "camera:yard", ComponentState::Running).await);

    orchestrator.shutdown().await.unwrap();
    assert_eq!(
        orchestrator.get_component_state("camera:broken").await,
        Some(ComponentState::Failed)
    );
    assert_eq!(
        orchestrator.get_component_state("camera:yard").await,
        Some(ComponentState::Stopped)
    );
}

#[tokio::test]
async fn test_heatmaps_written_on_shutdown() {
    let dir = TempDir::new().unwrap();
    let mut config = create_test_config(&dir);
    config.detector.heatmap = true;
    config.paths.heatmap_dir = Some(dir.path().join("heatmaps").to_string_lossy().into_owned());
    register(&config, "porch", "stub://64x48").await;

    let mut orchestrator = create_orchestrator(config).await;
    orchestrator.start().await.unwrap();

    let detector = Arc::clone(&orchestrator.detectors[0]);
    for _ in 0..250 {
        if detector.lock().heatmap().map(|h| h.samples()).unwrap_or(0) > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    orchestrator.shutdown().await.unwrap();
    assert!(dir.path().join("heatmaps").join("porch-heatmap.png").is_file());
}

#[tokio::test]
async fn test_run_returns_after_cancellation() {
    let dir = TempDir::new().unwrap();
    let config = create_test_config(&dir);
    let mut orchestrator = create_orchestrator(config).await;
    orchestrator.start().await.unwrap();

    let token = orchestrator.cancellation_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        token.cancel();
    });

    let exit_code = tokio::time::timeout(Duration::from_secs(15), orchestrator.run())
        .await
        .expect("run did not return after cancellation")
        .unwrap();
    assert_eq!(exit_code, 0);

    // The channel halves are consumed by the first run
    assert!(orchestrator.run().await.is_err());
}

#[tokio::test]
async fn test_component_state_transitions() {
    let dir = TempDir::new().unwrap();
    let orchestrator = create_orchestrator(create_test_config(&dir)).await;
    let component = "test_component";

    assert_eq!(orchestrator.get_component_state(component).await, None);

    for state in [
        ComponentState::Starting,
        ComponentState::Running,
        ComponentState::Stopping,
        ComponentState::Stopped,
    ] {
        orchestrator
            .set_component_state(component, state.clone())
            .await;
        assert_eq!(
            orchestrator.get_component_state(component).await,
            Some(state)
        );
    }
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let dir = TempDir::new().unwrap();
    let mut config = create_test_config(&dir);
    config.filter.interval_seconds = f64::NAN;

    match CamwatchOrchestrator::new(config).await {
        Err(crate::error::CamwatchError::Config(_)) => {}
        Err(e) => panic!("Unexpected orchestrator error: {}", e),
        Ok(_) => panic!("Expected a configuration error"),
    }
}
