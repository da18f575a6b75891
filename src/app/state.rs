use super::types::ComponentStates;
use super::{CamwatchOrchestrator, ComponentState};
use std::collections::HashMap;
use tracing::debug;

/// Record a state change from inside a component task
pub(super) async fn record_state(states: &ComponentStates, component: &str, state: ComponentState) {
    let mut states = states.lock().await;
    debug!("Component '{}' state changed to: {:?}", component, state);
    states.insert(component.to_string(), state);
}

impl CamwatchOrchestrator {
    /// Update component state
    pub async fn set_component_state(&self, component: &str, state: ComponentState) {
        record_state(&self.component_states, component, state).await;
    }

    /// Get component state
    pub async fn get_component_state(&self, component: &str) -> Option<ComponentState> {
        let states = self.component_states.lock().await;
        states.get(component).cloned()
    }

    /// Get all component states
    pub async fn get_all_component_states(&self) -> HashMap<String, ComponentState> {
        let states = self.component_states.lock().await;
        states.clone()
    }
}
