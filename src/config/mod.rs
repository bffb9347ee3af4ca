//! # Orchestrator Configuration
//!
//! Policy knobs live in an optional `armada.yaml` at the root of the data
//! directory. Missing file means defaults; CLI flags override file values.
//!
//! ## Data directory layout
//!
//! ```text
//! {data_dir}/
//!   armada.yaml            # optional policy file (this module)
//!   platforms/{name}.json  # platform descriptors, seeded on first run
//!   transactions/{id}.json # one deployment record per file
//!   rollbacks/{rid}.json   # one rollback record per file
//!   logs/{id}.log          # free-form stage/adapter logs
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default data directory, overridable via `--data-dir` / `ARMADA_DATA_DIR`
pub const DEFAULT_DATA_DIR: &str = ".armada";

/// Orchestrator policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Bounded worker count for the parallel topology
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,

    /// Whether a failed deploy auto-opens a rollback transaction against
    /// the platforms that completed
    #[serde(default = "default_auto_rollback")]
    pub auto_rollback: bool,

    /// Licenses the validator accepts
    #[serde(default = "default_license_allow_list")]
    pub license_allow_list: Vec<String>,

    /// Platforms placed in the production set under the staged topology;
    /// every other target lands in the staging set
    #[serde(default = "default_production_platforms")]
    pub production_platforms: Vec<String>,

    /// Hard cap on verify polling, seconds
    #[serde(default = "default_verify_cap_secs")]
    pub verify_cap_secs: u64,

    /// Default external command timeout for deploys, seconds
    #[serde(default = "default_deploy_timeout_secs")]
    pub deploy_timeout_secs: u64,

    /// Default external command timeout for verify, seconds
    #[serde(default = "default_verify_timeout_secs")]
    pub verify_timeout_secs: u64,

    /// Metadata API request timeout, seconds
    #[serde(default = "default_metadata_timeout_secs")]
    pub metadata_timeout_secs: u64,

    /// Abort the pipeline when any target registry health-checks as down
    #[serde(default)]
    pub strict_health: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
            auto_rollback: default_auto_rollback(),
            license_allow_list: default_license_allow_list(),
            production_platforms: default_production_platforms(),
            verify_cap_secs: default_verify_cap_secs(),
            deploy_timeout_secs: default_deploy_timeout_secs(),
            verify_timeout_secs: default_verify_timeout_secs(),
            metadata_timeout_secs: default_metadata_timeout_secs(),
            strict_health: false,
        }
    }
}

fn default_max_parallel() -> usize {
    5
}

fn default_auto_rollback() -> bool {
    true
}

fn default_license_allow_list() -> Vec<String> {
    [
        "MIT",
        "Apache-2.0",
        "MIT OR Apache-2.0",
        "BSD-2-Clause",
        "BSD-3-Clause",
        "ISC",
        "MPL-2.0",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_production_platforms() -> Vec<String> {
    vec!["dockerhub".to_string()]
}

fn default_verify_cap_secs() -> u64 {
    300
}

fn default_deploy_timeout_secs() -> u64 {
    300
}

fn default_verify_timeout_secs() -> u64 {
    60
}

fn default_metadata_timeout_secs() -> u64 {
    30
}

impl OrchestratorConfig {
    /// Load `{data_dir}/armada.yaml`, or defaults when the file is absent.
    pub fn load(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join("armada.yaml");
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn verify_cap(&self) -> Duration {
        Duration::from_secs(self.verify_cap_secs)
    }

    pub fn deploy_timeout(&self) -> Duration {
        Duration::from_secs(self.deploy_timeout_secs)
    }

    pub fn verify_timeout(&self) -> Duration {
        Duration::from_secs(self.verify_timeout_secs)
    }

    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_secs(self.metadata_timeout_secs)
    }

    /// Split targets into (staging, production) sets for the staged
    /// topology, preserving declared target order within each set.
    pub fn split_staged(&self, targets: &[String]) -> (Vec<String>, Vec<String>) {
        let (production, staging): (Vec<String>, Vec<String>) = targets
            .iter()
            .cloned()
            .partition(|t| self.production_platforms.contains(t));
        (staging, production)
    }

    pub fn license_allowed(&self, license: &str) -> bool {
        self.license_allow_list.iter().any(|l| l == license)
    }
}

/// Resolve the data directory from flag > env > default.
pub fn resolve_data_dir(flag: Option<&str>) -> PathBuf {
    if let Some(dir) = flag {
        return PathBuf::from(dir);
    }
    if let Ok(dir) = std::env::var("ARMADA_DATA_DIR") {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }
    PathBuf::from(DEFAULT_DATA_DIR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_file_absent() {
        let dir = tempfile::tempdir().unwrap();
        let config = OrchestratorConfig::load(dir.path()).unwrap();
        assert_eq!(config.max_parallel, 5);
        assert!(config.auto_rollback);
        assert_eq!(config.verify_cap_secs, 300);
    }

    #[test]
    fn test_partial_yaml_overrides() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("armada.yaml"),
            "max_parallel: 2\nstrict_health: true\n",
        )
        .unwrap();

        let config = OrchestratorConfig::load(dir.path()).unwrap();
        assert_eq!(config.max_parallel, 2);
        assert!(config.strict_health);
        // untouched fields keep their defaults
        assert_eq!(config.deploy_timeout_secs, 300);
    }

    #[test]
    fn test_split_staged() {
        let config = OrchestratorConfig::default();
        let targets = vec![
            "npm".to_string(),
            "pypi".to_string(),
            "dockerhub".to_string(),
        ];
        let (staging, production) = config.split_staged(&targets);
        assert_eq!(staging, vec!["npm".to_string(), "pypi".to_string()]);
        assert_eq!(production, vec!["dockerhub".to_string()]);
    }

    #[test]
    fn test_license_allow_list() {
        let config = OrchestratorConfig::default();
        assert!(config.license_allowed("MIT"));
        assert!(!config.license_allowed("SSPL-1.0"));
    }
}
