//! # Engine Configuration
//!
//! Runtime knobs for the engine facade, read from TOML:
//!
//! ```toml
//! [snapshots]
//! max_snapshots = 100
//!
//! [planner]
//! merge_stages = true
//! reorder_nodes = true
//! max_parallelism = 4
//!
//! [subscriptions]
//! default_priority = 50
//! ```
//!
//! Every section and key is optional. The crate never reads files; callers
//! hand over the TOML text.

use crate::plan::OptimizeOptions;
use crate::primitives::{DEFAULT_MAX_SNAPSHOTS, DEFAULT_PRIORITY, MAX_PRIORITY};
use crate::GraphError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    pub max_snapshots: usize,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            max_snapshots: DEFAULT_MAX_SNAPSHOTS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionConfig {
    /// Priority given to subscriptions that do not declare one.
    pub default_priority: u8,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            default_priority: DEFAULT_PRIORITY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub snapshots: SnapshotConfig,
    pub planner: OptimizeOptions,
    pub subscriptions: SubscriptionConfig,
}

impl EngineConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(input: &str) -> Result<Self, GraphError> {
        let config: EngineConfig =
            toml::from_str(input).map_err(|e| GraphError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject out-of-range values.
    pub fn validate(&self) -> Result<(), GraphError> {
        if self.snapshots.max_snapshots == 0 {
            return Err(GraphError::Config(
                "snapshots.max_snapshots must be at least 1".to_string(),
            ));
        }
        if self.planner.max_parallelism == 0 {
            return Err(GraphError::Config(
                "planner.max_parallelism must be at least 1".to_string(),
            ));
        }
        if self.subscriptions.default_priority > MAX_PRIORITY {
            return Err(GraphError::Config(format!(
                "subscriptions.default_priority must be at most {}",
                MAX_PRIORITY
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_gives_defaults() {
        let config = EngineConfig::from_toml_str("").expect("parse");
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.snapshots.max_snapshots, 100);
        assert_eq!(config.planner.max_parallelism, 4);
        assert!(config.planner.merge_stages);
        assert_eq!(config.subscriptions.default_priority, 50);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            [planner]
            reorder_nodes = false

            [subscriptions]
            default_priority = 70
            "#,
        )
        .expect("parse");

        assert!(!config.planner.reorder_nodes);
        assert!(config.planner.merge_stages);
        assert_eq!(config.subscriptions.default_priority, 70);
        assert_eq!(config.snapshots.max_snapshots, 100);
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        for input in [
            "[snapshots]\nmax_snapshots = 0",
            "[planner]\nmax_parallelism = 0",
            "[subscriptions]\ndefault_priority = 101",
            "[subscriptions]\ndefault_priority = -1",
            "[unknown]\nkey = 1",
        ] {
            assert!(
                matches!(EngineConfig::from_toml_str(input), Err(GraphError::Config(_))),
                "accepted: {}",
                input
            );
        }
    }
}
