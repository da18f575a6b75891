use super::{CamwatchOrchestrator, ComponentState};
use crate::error::{CamwatchError, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, info, warn};

/// How long a cancelled component task may take to wind down
const COMPONENT_STOP_TIMEOUT: Duration = Duration::from_secs(10);

impl CamwatchOrchestrator {
    /// Perform graceful shutdown of all components
    pub async fn shutdown(&mut self) -> Result<i32> {
        info!("Beginning graceful shutdown");

        // Cancel all background tasks
        self.cancellation_token.cancel();

        let mut exit_code = 0;

        for (component, task) in std::mem::take(&mut self.tasks) {
            if let Err(e) = self.stop_component(&component, task).await {
                error!("Error stopping {}: {}", component, e);
                exit_code = 1;
            }
        }

        if let Err(e) = self.write_heatmaps().await {
            error!("Error writing heat maps: {}", e);
            exit_code = 1;
        }

        info!("Graceful shutdown completed with exit code: {}", exit_code);
        Ok(exit_code)
    }

    /// Wait for a cancelled component task to finish
    async fn stop_component(
        &self,
        component: &str,
        mut task: tokio::task::JoinHandle<()>,
    ) -> Result<()> {
        info!("Stopping {} component", component);

        // Cameras whose source never opened have already settled
        if self.get_component_state(component).await != Some(ComponentState::Failed) {
            self.set_component_state(component, ComponentState::Stopping)
                .await;
        }

        match timeout(COMPONENT_STOP_TIMEOUT, &mut task).await {
            Ok(Ok(())) => {
                if self.get_component_state(component).await != Some(ComponentState::Failed) {
                    self.set_component_state(component, ComponentState::Stopped)
                        .await;
                }
                info!("{} component stopped", component);
                Ok(())
            }
            Ok(Err(e)) => {
                self.set_component_state(component, ComponentState::Failed)
                    .await;
                Err(CamwatchError::component(
                    component.to_string(),
                    format!("task failed: {}", e),
                ))
            }
            Err(_) => {
                task.abort();
                self.set_component_state(component, ComponentState::Failed)
                    .await;
                Err(CamwatchError::System {
                    message: format!("{} component stop timeout", component),
                })
            }
        }
    }

    /// Write every accumulated heat map when a heat map directory is set
    async fn write_heatmaps(&self) -> Result<Vec<PathBuf>> {
        let Some(dir) = self.config.paths.heatmap_dir.clone() else {
            return Ok(Vec::new());
        };
        if self.detectors.is_empty() {
            return Ok(Vec::new());
        }

        let detectors: Vec<_> = self.detectors.iter().map(Arc::clone).collect();
        let written = tokio::task::spawn_blocking(move || {
            let dir = PathBuf::from(dir);
            let mut written = Vec::new();
            for detector in detectors {
                let detector = detector.lock();
                match detector.save_heatmap(&dir) {
                    Ok(Some(path)) => written.push(path),
                    Ok(None) => {}
                    Err(e) => warn!(
                        "Heat map for '{}' not written: {}",
                        detector.camera_name(),
                        e
                    ),
                }
            }
            written
        })
        .await
        .map_err(|e| CamwatchError::system(format!("heat map task failed: {}", e)))?;

        Ok(written)
    }
}
