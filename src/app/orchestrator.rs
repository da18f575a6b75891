use super::types::{ComponentStates, ShutdownReason};
use crate::config::CamwatchConfig;
use crate::detector::MotionDetector;
use crate::error::Result;
use crate::registry::{CameraRegistry, FileCameraRegistry};
use crate::source::{DecoderConnector, DefaultConnector};
use crate::storage::{build_guard, ContentGuard, SpaceProbe, StatvfsProbe};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Runs one detection task per registered camera plus the shared
/// deduplication and eviction loops
pub struct CamwatchOrchestrator {
    pub(super) config: CamwatchConfig,

    // Collaborators
    pub(super) registry: Arc<dyn CameraRegistry>,
    pub(super) connector: Arc<dyn DecoderConnector>,
    pub(super) space_probe: Arc<dyn SpaceProbe>,
    pub(super) content_guard: Arc<dyn ContentGuard>,

    // Running components
    pub(super) detectors: Vec<Arc<parking_lot::Mutex<MotionDetector>>>,
    pub(super) tasks: Vec<(String, JoinHandle<()>)>,

    // Lifecycle management
    pub(super) component_states: ComponentStates,
    pub(super) shutdown_sender: Option<oneshot::Sender<ShutdownReason>>,
    pub(super) shutdown_receiver: Option<oneshot::Receiver<ShutdownReason>>,
    pub(super) cancellation_token: CancellationToken,
}

impl CamwatchOrchestrator {
    /// Create an orchestrator backed by the file registry, the default
    /// decoders and the statvfs space probe.
    ///
    /// Fails on configuration that does not pass `validate()`.
    pub async fn new(config: CamwatchConfig) -> Result<Self> {
        config.validate()?;

        let registry = Arc::new(FileCameraRegistry::new(config.paths.registry_path()));
        let connector = Arc::new(DefaultConnector::new(config.source.synthetic_fps));
        let content_guard = build_guard(&config.storage)?;
        let (shutdown_sender, shutdown_receiver) = oneshot::channel();

        Ok(Self {
            config,
            registry,
            connector,
            space_probe: Arc::new(StatvfsProbe),
            content_guard,
            detectors: Vec::new(),
            tasks: Vec::new(),
            component_states: Arc::new(Mutex::new(HashMap::new())),
            shutdown_sender: Some(shutdown_sender),
            shutdown_receiver: Some(shutdown_receiver),
            cancellation_token: CancellationToken::new(),
        })
    }

    pub fn with_registry(mut self, registry: Arc<dyn CameraRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_connector(mut self, connector: Arc<dyn DecoderConnector>) -> Self {
        self.connector = connector;
        self
    }

    pub fn with_space_probe(mut self, probe: Arc<dyn SpaceProbe>) -> Self {
        self.space_probe = probe;
        self
    }

    pub fn with_content_guard(mut self, guard: Arc<dyn ContentGuard>) -> Self {
        self.content_guard = guard;
        self
    }

    pub fn config(&self) -> &CamwatchConfig {
        &self.config
    }

    /// Token whose cancellation stops every running component
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Number of cameras started by the last `start()`
    pub fn camera_count(&self) -> usize {
        self.detectors.len()
    }
}
