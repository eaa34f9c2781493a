use super::{ComponentState, FfwardenOrchestrator};
use std::collections::HashMap;
use tracing::{debug, warn};

impl FfwardenOrchestrator {
    pub async fn set_component_state(&self, component: &'static str, state: ComponentState) {
        if state == ComponentState::Failed {
            warn!("Component '{}' failed", component);
        } else {
            debug!("Component '{}' -> {:?}", component, state);
        }
        self.component_states.lock().await.insert(component, state);
    }

    pub async fn get_component_state(&self, component: &str) -> Option<ComponentState> {
        self.component_states.lock().await.get(component).cloned()
    }

    /// Snapshot of every registered component
    pub async fn get_all_component_states(&self) -> HashMap<&'static str, ComponentState> {
        self.component_states.lock().await.clone()
    }
}
