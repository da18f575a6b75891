use super::state::record_state;
use super::types::{camera_component, ComponentStates};
use super::{CamwatchOrchestrator, ComponentState};
use crate::config::{CamwatchConfig, SourceConfig};
use crate::detector::{DetectionOutcome, MotionDetector};
use crate::error::{Result, SourceError};
use crate::filter::{FilterOutcome, SimilarityFilter};
use crate::registry::Camera;
use crate::source::{DecoderConnector, FrameSource};
use crate::storage::{EvictionOutcome, StorageManager};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

impl CamwatchOrchestrator {
    /// Read the registry and launch every component task
    pub async fn start(&mut self) -> Result<()> {
        info!("Starting camwatch pipeline");

        let working_dir = self.config.paths.working_dir();
        let cold_storage_dir = self.config.paths.cold_storage_dir();
        tokio::fs::create_dir_all(&working_dir).await?;
        tokio::fs::create_dir_all(&cold_storage_dir).await?;

        let cameras = match self.registry.list().await {
            Ok(cameras) => cameras,
            Err(e) => {
                error!("Failed to read camera registry, starting without cameras: {}", e);
                Vec::new()
            }
        };
        if cameras.is_empty() {
            warn!("No cameras registered; only deduplication and eviction will run");
        }

        let mut filters = Vec::with_capacity(cameras.len());
        for camera in cameras {
            let camera_dir = self.config.paths.camera_dir(&camera.name);
            tokio::fs::create_dir_all(&camera_dir).await?;

            let detector = Arc::new(Mutex::new(MotionDetector::new(
                &camera.name,
                camera_dir.clone(),
                &self.config.detector,
            )));
            self.detectors.push(Arc::clone(&detector));
            filters.push(SimilarityFilter::new(
                camera_dir,
                cold_storage_dir.clone(),
                &self.config.filter,
            ));

            let component = camera_component(&camera.name);
            self.set_component_state(&component, ComponentState::Starting)
                .await;

            let task = tokio::spawn(run_camera(
                camera,
                detector,
                Arc::clone(&self.connector),
                self.config.clone(),
                Arc::clone(&self.component_states),
                self.cancellation_token.child_token(),
            ));
            self.tasks.push((component, task));
        }

        self.set_component_state("filter", ComponentState::Running)
            .await;
        let filter_task = tokio::spawn(run_filters(
            filters,
            self.config.filter.poll_interval(),
            self.cancellation_token.child_token(),
        ));
        self.tasks.push(("filter".to_string(), filter_task));

        let manager = StorageManager::new(
            cold_storage_dir,
            &self.config.storage,
            Arc::clone(&self.space_probe),
            Arc::clone(&self.content_guard),
        );
        self.set_component_state("storage", ComponentState::Running)
            .await;
        let storage_task = tokio::spawn(run_storage(
            manager,
            self.config.storage.poll_interval(),
            self.cancellation_token.child_token(),
        ));
        self.tasks.push(("storage".to_string(), storage_task));

        info!(
            "camwatch started with {} camera(s)",
            self.detectors.len()
        );
        Ok(())
    }
}

/// Open the camera's source, retrying until it connects or the task is
/// cancelled. `None` means the task should end.
async fn open_source(
    camera: &Camera,
    connector: &Arc<dyn DecoderConnector>,
    config: &SourceConfig,
    cancel: &CancellationToken,
) -> Option<FrameSource> {
    loop {
        match FrameSource::open(
            &camera.name,
            &camera.source,
            Arc::clone(connector),
            config,
            cancel,
        )
        .await
        {
            Ok(source) => return Some(source),
            Err(e @ SourceError::Unsupported { .. }) => {
                error!("Camera '{}' cannot be started: {}", camera.name, e);
                return None;
            }
            Err(e) => {
                warn!(
                    "Failed to open camera '{}', retrying in {:?}: {}",
                    camera.name,
                    config.reconnect_delay(),
                    e
                );
                tokio::select! {
                    _ = cancel.cancelled() => return None,
                    _ = tokio::time::sleep(config.reconnect_delay()) => {}
                }
            }
        }
    }
}

async fn run_camera(
    camera: Camera,
    detector: Arc<Mutex<MotionDetector>>,
    connector: Arc<dyn DecoderConnector>,
    config: CamwatchConfig,
    states: ComponentStates,
    cancel: CancellationToken,
) {
    let component = camera_component(&camera.name);

    let Some(source) = open_source(&camera, &connector, &config.source, &cancel).await else {
        let state = if cancel.is_cancelled() {
            ComponentState::Stopped
        } else {
            ComponentState::Failed
        };
        record_state(&states, &component, state).await;
        return;
    };
    let source = Arc::new(source);
    record_state(&states, &component, ComponentState::Running).await;

    let mut ticker = interval(config.detector.poll_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let step_detector = Arc::clone(&detector);
        let step_source = Arc::clone(&source);
        let result =
            tokio::task::spawn_blocking(move || step_detector.lock().run_once(step_source.as_ref()))
                .await;

        match result {
            Ok(Ok(DetectionOutcome::Saved(path))) => {
                debug!("Camera '{}' saved {}", camera.name, path.display())
            }
            Ok(Ok(outcome)) => trace!("Camera '{}': {:?}", camera.name, outcome),
            Ok(Err(e)) => warn!("Detection failed for camera '{}': {}", camera.name, e),
            Err(e) => error!("Detection step for camera '{}' panicked: {}", camera.name, e),
        }
    }

    source.close().await;
    debug!("Detection loop for camera '{}' stopped", camera.name);
}

async fn run_filters(filters: Vec<SimilarityFilter>, poll: Duration, cancel: CancellationToken) {
    let filters = Arc::new(Mutex::new(filters));
    let mut ticker = interval(poll);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let pass = Arc::clone(&filters);
        let result = tokio::task::spawn_blocking(move || {
            let mut filters = pass.lock();
            let mut moved = 0;
            for filter in filters.iter_mut() {
                match filter.run() {
                    Ok(FilterOutcome::Completed { moved: count, .. }) => moved += count,
                    Ok(FilterOutcome::Skipped) => {}
                    Err(e) => warn!(
                        "Deduplication of {} failed: {}",
                        filter.working_dir().display(),
                        e
                    ),
                }
            }
            moved
        })
        .await;

        match result {
            Ok(0) => {}
            Ok(moved) => debug!("Deduplication pass moved {} image(s)", moved),
            Err(e) => error!("Deduplication pass panicked: {}", e),
        }
    }

    debug!("Deduplication loop stopped");
}

async fn run_storage(manager: StorageManager, poll: Duration, cancel: CancellationToken) {
    let manager = Arc::new(Mutex::new(manager));
    let mut ticker = interval(poll);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let pass = Arc::clone(&manager);
        match tokio::task::spawn_blocking(move || pass.lock().run()).await {
            Ok(Ok(EvictionOutcome::Evicted(path))) => {
                debug!("Evicted {}", path.display())
            }
            Ok(Ok(outcome)) => trace!("Eviction pass: {:?}", outcome),
            Ok(Err(e)) => warn!("Eviction pass failed: {}", e),
            Err(e) => error!("Eviction pass panicked: {}", e),
        }
    }

    debug!("Eviction loop stopped");
}
