use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Component lifecycle states
#[derive(Debug, Clone, PartialEq)]
pub enum ComponentState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Failed,
}

/// System shutdown reason
#[derive(Debug, Clone)]
pub enum ShutdownReason {
    Signal(String),
    UserRequest,
}

/// State table shared with the spawned component tasks
pub(super) type ComponentStates = Arc<Mutex<HashMap<String, ComponentState>>>;

/// Component name of a camera's detection task
pub(super) fn camera_component(name: &str) -> String {
    format!("camera:{}", name)
}
