use flowcore::{ExecutorMetadata, NodeExecutor};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Registry of available node types.
///
/// Populated at startup and read on every validation and dispatch. The
/// lock only exists so executors can be hot-reloaded without a restart.
pub struct NodeRegistry {
    executors: RwLock<HashMap<String, Arc<dyn NodeExecutor>>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            executors: RwLock::new(HashMap::new()),
        }
    }

    /// Register an executor, replacing any previous one for the same type.
    pub fn register(&self, executor: Arc<dyn NodeExecutor>) {
        let node_type = executor.node_type().to_string();
        tracing::info!("Registering node type: {}", node_type);
        let mut executors = self.executors.write().unwrap_or_else(|e| e.into_inner());
        if executors.insert(node_type.clone(), executor).is_some() {
            tracing::info!("Replaced executor for node type: {}", node_type);
        }
    }

    pub fn unregister(&self, node_type: &str) -> bool {
        let mut executors = self.executors.write().unwrap_or_else(|e| e.into_inner());
        executors.remove(node_type).is_some()
    }

    /// Look up the executor for a node type
    pub fn get(&self, node_type: &str) -> Option<Arc<dyn NodeExecutor>> {
        let executors = self.executors.read().unwrap_or_else(|e| e.into_inner());
        executors.get(node_type).cloned()
    }

    pub fn contains(&self, node_type: &str) -> bool {
        let executors = self.executors.read().unwrap_or_else(|e| e.into_inner());
        executors.contains_key(node_type)
    }

    /// Get all registered node types, sorted
    pub fn list_node_types(&self) -> Vec<String> {
        let executors = self.executors.read().unwrap_or_else(|e| e.into_inner());
        let mut types: Vec<String> = executors.keys().cloned().collect();
        types.sort();
        types
    }

    /// Get metadata for a node type
    pub fn get_metadata(&self, node_type: &str) -> Option<ExecutorMetadata> {
        self.get(node_type).map(|e| e.metadata())
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
