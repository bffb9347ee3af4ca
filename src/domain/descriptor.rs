//! Platform descriptors.
//!
//! A descriptor is a static, declarative description of one package
//! registry: endpoints, required files, auth scheme, version locator and
//! rollback capability. Descriptors are loaded once at startup and are
//! immutable afterwards; per-registry quirks live here instead of in
//! pipeline branching.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use crate::error::DescriptorError;

/// What kind of rollback a registry permits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackCapability {
    /// The release can be removed outright (npm within the grace window)
    Unpublish,
    /// The release stays downloadable by exact pin but stops resolving (cargo)
    Yank,
    /// A dist-tag or alias is rewritten to the previous release (npm `latest`)
    TagRewrite,
    /// An image tag is repointed at the previous digest (Docker)
    RetagImage,
    /// The registry forbids rollback (PyPI)
    None,
}

impl RollbackCapability {
    pub fn supports_rollback(&self) -> bool {
        !matches!(self, Self::None)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unpublish => "unpublish",
            Self::Yank => "yank",
            Self::TagRewrite => "tag_rewrite",
            Self::RetagImage => "retag_image",
            Self::None => "none",
        }
    }
}

impl fmt::Display for RollbackCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How the registry authenticates publishes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthScheme {
    /// `{PLATFORM}_TOKEN` env var
    BearerToken,
    /// `{PLATFORM}_USERNAME` + `{PLATFORM}_PASSWORD` env vars
    Userpass,
    /// Pre-provisioned tool config file (e.g. ~/.npmrc, ~/.pypirc)
    ConfigFile,
    None,
}

impl fmt::Display for AuthScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::BearerToken => "bearer_token",
            Self::Userpass => "userpass",
            Self::ConfigFile => "config_file",
            Self::None => "none",
        };
        write!(f, "{}", s)
    }
}

/// One rollback method attempt, tried in declared order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackMethod {
    pub name: String,

    /// Command template; `{package}`, `{version}` and `{previous_version}`
    /// are substituted at invocation time
    pub command: Vec<String>,

    #[serde(default = "default_rollback_timeout_secs")]
    pub timeout_secs: u64,

    /// Methods that destroy data (e.g. unpublish) require an explicit
    /// confirmation override when running automated
    #[serde(default)]
    pub requires_confirmation: bool,
}

impl RollbackMethod {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_rollback_timeout_secs() -> u64 {
    300
}

/// Post-rollback hook (restore dist-tag, drop orphaned image tag, ...)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryAction {
    pub name: String,
    pub command: Vec<String>,

    #[serde(default = "default_recovery_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_recovery_timeout_secs() -> u64 {
    60
}

/// Where the package version lives in the working tree
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionLocator {
    /// Manifest file, relative to the working tree
    pub file: String,

    /// Dotted field path for structured manifests (package.json, Cargo.toml)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,

    /// Regex with one capture group for free-form manifests (setup.py, *.rb)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

/// Static description of one package registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformDescriptor {
    pub name: String,

    /// Language family tag (javascript, python, rust, ...)
    pub ecosystem: String,

    pub registry_base_url: String,

    /// Public metadata endpoint, templated on `{package}` / `{version}`
    pub metadata_api_url: String,

    /// Health probe endpoint; defaults to the registry base URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_url: Option<String>,

    pub required_files: Vec<String>,

    #[serde(default)]
    pub optional_files: Vec<String>,

    pub version_locator: VersionLocator,

    pub rollback_capability: RollbackCapability,

    /// Ordered rollback attempts; may be empty iff capability is `none`
    #[serde(default)]
    pub rollback_methods: Vec<RollbackMethod>,

    pub auth_scheme: AuthScheme,

    /// Post-rollback hooks, run best-effort after the rollback command
    #[serde(default)]
    pub recovery_actions: Vec<RecoveryAction>,

    /// Unknown descriptor fields are preserved but unused
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl PlatformDescriptor {
    /// Fail fast on descriptors that would break the pipeline later.
    pub fn validate(&self) -> Result<(), DescriptorError> {
        for (field, value) in [
            ("name", &self.name),
            ("ecosystem", &self.ecosystem),
            ("registry_base_url", &self.registry_base_url),
            ("metadata_api_url", &self.metadata_api_url),
        ] {
            if value.is_empty() {
                return Err(DescriptorError::MissingField {
                    name: self.name.clone(),
                    field: field.to_string(),
                });
            }
        }

        if self.required_files.is_empty() {
            return Err(DescriptorError::MissingField {
                name: self.name.clone(),
                field: "required_files".to_string(),
            });
        }

        if self.version_locator.field.is_none() && self.version_locator.pattern.is_none() {
            return Err(DescriptorError::MissingField {
                name: self.name.clone(),
                field: "version_locator.field|pattern".to_string(),
            });
        }

        if !self.rollback_capability.supports_rollback() && !self.rollback_methods.is_empty() {
            return Err(DescriptorError::InconsistentRollback {
                name: self.name.clone(),
            });
        }

        if self.rollback_capability.supports_rollback() && self.rollback_methods.is_empty() {
            return Err(DescriptorError::MissingField {
                name: self.name.clone(),
                field: "rollback_methods".to_string(),
            });
        }

        Ok(())
    }

    /// Expand the metadata API template for a package/version pair.
    /// `{version}` is optional in the template; package-level endpoints
    /// simply ignore the version argument.
    pub fn metadata_url(&self, package: &str, version: &str) -> String {
        self.metadata_api_url
            .replace("{package}", package)
            .replace("{version}", version)
    }

    pub fn health_url(&self) -> &str {
        self.health_url.as_deref().unwrap_or(&self.registry_base_url)
    }

    pub fn supports_rollback(&self) -> bool {
        self.rollback_capability.supports_rollback()
    }

    /// Env var names the credential resolver reads for this platform.
    pub fn token_env_var(&self) -> String {
        format!("{}_TOKEN", self.name.to_uppercase())
    }

    pub fn userpass_env_vars(&self) -> (String, String) {
        let upper = self.name.to_uppercase();
        (format!("{}_USERNAME", upper), format!("{}_PASSWORD", upper))
    }
}

/// Substitute `{package}` / `{version}` / `{previous_version}` in a
/// command template.
pub fn render_command(template: &[String], package: &str, version: &str, previous: &str) -> Vec<String> {
    template
        .iter()
        .map(|arg| {
            arg.replace("{package}", package)
                .replace("{version}", version)
                .replace("{previous_version}", previous)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::builtin;

    #[test]
    fn test_builtin_descriptors_validate() {
        for desc in builtin::builtin_descriptors() {
            desc.validate()
                .unwrap_or_else(|e| panic!("builtin {} invalid: {}", desc.name, e));
        }
    }

    #[test]
    fn test_metadata_url_expansion() {
        let desc = builtin::builtin_descriptors()
            .into_iter()
            .find(|d| d.name == "npm")
            .unwrap();
        let url = desc.metadata_url("leftpad", "1.2.3");
        assert!(url.contains("leftpad"));
        assert!(!url.contains("{package}"));
    }

    #[test]
    fn test_missing_rollback_methods_rejected() {
        let mut desc = builtin::builtin_descriptors()
            .into_iter()
            .find(|d| d.name == "cargo")
            .unwrap();
        desc.rollback_methods.clear();
        assert!(matches!(
            desc.validate(),
            Err(DescriptorError::MissingField { .. })
        ));
    }

    #[test]
    fn test_methods_on_none_capability_rejected() {
        let mut desc = builtin::builtin_descriptors()
            .into_iter()
            .find(|d| d.name == "pypi")
            .unwrap();
        desc.rollback_methods = vec![RollbackMethod {
            name: "impossible".to_string(),
            command: vec!["true".to_string()],
            timeout_secs: 5,
            requires_confirmation: false,
        }];
        assert!(matches!(
            desc.validate(),
            Err(DescriptorError::InconsistentRollback { .. })
        ));
    }

    #[test]
    fn test_render_command_substitutes_all_tokens() {
        let rendered = render_command(
            &[
                "npm".to_string(),
                "dist-tag".to_string(),
                "add".to_string(),
                "{package}@{previous_version}".to_string(),
                "latest".to_string(),
            ],
            "leftpad",
            "2.0.0",
            "1.9.9",
        );
        assert_eq!(rendered[3], "leftpad@1.9.9");
    }

    #[test]
    fn test_unknown_fields_preserved() {
        let json = r#"{
            "name": "custom",
            "ecosystem": "misc",
            "registry_base_url": "https://registry.example.com",
            "metadata_api_url": "https://registry.example.com/{package}/{version}",
            "required_files": ["manifest.json"],
            "version_locator": {"file": "manifest.json", "field": "version"},
            "rollback_capability": "none",
            "auth_scheme": "none",
            "x_internal_note": "kept but unused"
        }"#;
        let desc: PlatformDescriptor = serde_json::from_str(json).unwrap();
        assert!(desc.extra.contains_key("x_internal_note"));
        let back = serde_json::to_value(&desc).unwrap();
        assert_eq!(back["x_internal_note"], "kept but unused");
    }
}
