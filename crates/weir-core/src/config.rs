use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WeirError};

/// Runtime configuration for the flow controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowConfig {
    /// Default ceiling on back-edge traversals per run. Edges may override
    /// it individually.
    #[serde(default = "default_max_loops")]
    pub max_loops: u32,
    /// Optional wall-clock limit per step execution, in seconds.
    #[serde(default)]
    pub step_timeout_secs: Option<u64>,
}

fn default_max_loops() -> u32 {
    5
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            max_loops: default_max_loops(),
            step_timeout_secs: None,
        }
    }
}

impl FlowConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(WeirError::ConfigNotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)?;
        let config: FlowConfig = toml::from_str(&content)
            .map_err(|e| WeirError::Config(format!("{}: {}", path.display(), e)))?;
        if config.max_loops == 0 {
            return Err(WeirError::Config(
                "max_loops must be a positive integer".to_string(),
            ));
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = FlowConfig::default();
        assert_eq!(config.max_loops, 5);
        assert!(config.step_timeout_secs.is_none());
    }

    #[test]
    fn test_load_from_file() {
        let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
        tmp.write_all(b"max_loops = 3\nstep_timeout_secs = 30\n")
            .expect("write toml");

        let config = FlowConfig::load(tmp.path()).expect("load config");
        assert_eq!(config.max_loops, 3);
        assert_eq!(config.step_timeout_secs, Some(30));
    }

    #[test]
    fn test_load_missing_file() {
        let err = FlowConfig::load("/nonexistent/weir.toml").unwrap_err();
        assert!(matches!(err, WeirError::ConfigNotFound(_)));
    }

    #[test]
    fn test_zero_max_loops_rejected() {
        let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
        tmp.write_all(b"max_loops = 0\n").expect("write toml");

        let err = FlowConfig::load(tmp.path()).unwrap_err();
        assert!(matches!(err, WeirError::Config(_)));
    }
}
