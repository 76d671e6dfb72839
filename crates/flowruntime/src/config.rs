use flowcore::FlowError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Configuration for the runtime
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Per-run cap on concurrently dispatched nodes; `None` is unbounded.
    pub max_parallel_nodes: Option<usize>,
    /// Cap on executor invocations in flight across all runs.
    pub max_concurrent_nodes: usize,
    pub node_timeout_secs: u64,
    /// Per node type overrides of `node_timeout_secs`.
    pub node_type_timeouts: HashMap<String, u64>,
    /// Broadcast capacity of each execution's event channel.
    pub event_buffer_size: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_parallel_nodes: None,
            max_concurrent_nodes: 64,
            node_timeout_secs: 120,
            node_type_timeouts: HashMap::new(),
            event_buffer_size: 1000,
        }
    }
}

impl RuntimeConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, FlowError> {
        let config: Self =
            toml::from_str(raw).map_err(|e| FlowError::Config(format!("invalid TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, FlowError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            FlowError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<(), FlowError> {
        if self.max_concurrent_nodes == 0 {
            return Err(FlowError::Config(
                "max_concurrent_nodes must be at least 1".to_string(),
            ));
        }
        if self.max_parallel_nodes == Some(0) {
            return Err(FlowError::Config(
                "max_parallel_nodes must be at least 1 when set".to_string(),
            ));
        }
        if self.event_buffer_size == 0 {
            return Err(FlowError::Config(
                "event_buffer_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Timeout applied to one invocation of the given node type.
    pub fn timeout_for(&self, node_type: &str) -> Duration {
        let secs = self
            .node_type_timeouts
            .get(node_type)
            .copied()
            .unwrap_or(self.node_timeout_secs);
        Duration::from_secs(secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = RuntimeConfig::from_toml_str(
            r#"
            max_parallel_nodes = 4
            [node_type_timeouts]
            "http.request" = 30
            "#,
        )
        .unwrap();

        assert_eq!(config.max_parallel_nodes, Some(4));
        assert_eq!(config.max_concurrent_nodes, 64);
        assert_eq!(config.timeout_for("http.request"), Duration::from_secs(30));
        assert_eq!(config.timeout_for("debug.log"), Duration::from_secs(120));
    }

    #[test]
    fn rejects_zero_limits() {
        assert!(RuntimeConfig::from_toml_str("max_concurrent_nodes = 0").is_err());
        assert!(RuntimeConfig::from_toml_str("max_parallel_nodes = 0").is_err());
    }
}
