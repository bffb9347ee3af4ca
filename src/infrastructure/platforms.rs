//! Platform registry.
//!
//! Loads every descriptor from `{data_dir}/platforms/*.json` at startup,
//! seeding the directory with the built-ins on first run. Descriptors
//! are validated eagerly and immutable afterwards; lookups hand out
//! references for the life of the registry.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::Path;

use crate::domain::builtin::builtin_descriptors;
use crate::domain::PlatformDescriptor;
use crate::error::DescriptorError;
use crate::infrastructure::metadata::{HealthReport, MetadataClient};

/// Registry of loaded platform descriptors
pub struct PlatformRegistry {
    descriptors: BTreeMap<String, PlatformDescriptor>,
}

impl PlatformRegistry {
    /// Seed missing built-in descriptor files, then load and validate
    /// every `platforms/*.json`. Fails fast on the first invalid file.
    pub fn load(data_dir: &Path) -> Result<Self> {
        let dir = data_dir.join("platforms");
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;

        // First run: write the built-ins out so operators can edit them.
        // Existing files always win.
        for descriptor in builtin_descriptors() {
            let path = dir.join(format!("{}.json", descriptor.name));
            if !path.exists() {
                let json = serde_json::to_string_pretty(&descriptor)
                    .context("Failed to serialize built-in descriptor")?;
                std::fs::write(&path, format!("{}\n", json))
                    .with_context(|| format!("Failed to seed {}", path.display()))?;
            }
        }

        let mut descriptors = BTreeMap::new();

        let mut entries: Vec<_> = std::fs::read_dir(&dir)
            .with_context(|| format!("Failed to read {}", dir.display()))?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().map(|e| e == "json").unwrap_or(false))
            .collect();
        entries.sort();

        for path in entries {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;

            let descriptor: PlatformDescriptor =
                serde_json::from_str(&content).map_err(|e| DescriptorError::ParseError {
                    path: path.display().to_string(),
                    message: e.to_string(),
                })?;

            descriptor.validate()?;

            if descriptors.contains_key(&descriptor.name) {
                return Err(DescriptorError::DuplicateName {
                    name: descriptor.name,
                }
                .into());
            }

            tracing::debug!(platform = %descriptor.name, path = %path.display(), "Loaded descriptor");
            descriptors.insert(descriptor.name.clone(), descriptor);
        }

        Ok(Self { descriptors })
    }

    /// Build a registry from in-memory descriptors (tests).
    #[cfg(test)]
    pub fn from_descriptors(list: Vec<PlatformDescriptor>) -> Result<Self> {
        let mut descriptors = BTreeMap::new();
        for descriptor in list {
            descriptor.validate()?;
            if descriptors
                .insert(descriptor.name.clone(), descriptor.clone())
                .is_some()
            {
                return Err(DescriptorError::DuplicateName {
                    name: descriptor.name,
                }
                .into());
            }
        }
        Ok(Self { descriptors })
    }

    pub fn get(&self, name: &str) -> Result<&PlatformDescriptor, DescriptorError> {
        self.descriptors
            .get(name)
            .ok_or_else(|| DescriptorError::UnknownPlatform {
                name: name.to_string(),
            })
    }

    pub fn list(&self) -> impl Iterator<Item = &PlatformDescriptor> {
        self.descriptors.values()
    }

    pub fn names(&self) -> Vec<String> {
        self.descriptors.keys().cloned().collect()
    }

    /// Re-run structural validation for one descriptor by name.
    pub fn validate_descriptor(&self, name: &str) -> Result<(), DescriptorError> {
        self.get(name)?.validate()
    }

    /// Probe one registry's health endpoint. Advisory; never blocks a
    /// deploy by itself.
    pub async fn health_check(
        &self,
        name: &str,
        client: &MetadataClient,
    ) -> Result<HealthReport, DescriptorError> {
        let descriptor = self.get(name)?;
        Ok(client.health(descriptor).await)
    }

    /// Resolve a comma-separated target list against loaded descriptors,
    /// preserving order and rejecting unknowns and duplicates.
    pub fn resolve_targets(&self, csv: &str) -> Result<Vec<String>, DescriptorError> {
        let mut targets = Vec::new();
        for raw in csv.split(',') {
            let name = raw.trim();
            if name.is_empty() {
                continue;
            }
            self.get(name)?;
            if !targets.contains(&name.to_string()) {
                targets.push(name.to_string());
            }
        }
        Ok(targets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_seeds_builtins() {
        let dir = tempfile::tempdir().unwrap();
        let registry = PlatformRegistry::load(dir.path()).unwrap();

        assert!(registry.get("npm").is_ok());
        assert!(registry.get("pypi").is_ok());
        assert!(dir.path().join("platforms/npm.json").exists());
    }

    #[test]
    fn test_operator_edits_win_over_builtins() {
        let dir = tempfile::tempdir().unwrap();
        // seed, then edit one file
        PlatformRegistry::load(dir.path()).unwrap();
        let path = dir.path().join("platforms/npm.json");
        let mut descriptor: PlatformDescriptor =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        descriptor.registry_base_url = "https://npm.internal.example.com".to_string();
        std::fs::write(&path, serde_json::to_string_pretty(&descriptor).unwrap()).unwrap();

        let registry = PlatformRegistry::load(dir.path()).unwrap();
        assert_eq!(
            registry.get("npm").unwrap().registry_base_url,
            "https://npm.internal.example.com"
        );
    }

    #[test]
    fn test_unknown_platform_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let registry = PlatformRegistry::load(dir.path()).unwrap();
        assert!(matches!(
            registry.get("rubygems"),
            Err(DescriptorError::UnknownPlatform { .. })
        ));
    }

    #[test]
    fn test_resolve_targets_keeps_order_and_dedups() {
        let dir = tempfile::tempdir().unwrap();
        let registry = PlatformRegistry::load(dir.path()).unwrap();

        let targets = registry.resolve_targets("npm, cargo,npm").unwrap();
        assert_eq!(targets, vec!["npm".to_string(), "cargo".to_string()]);

        assert!(registry.resolve_targets("npm,unknown").is_err());
    }

    #[test]
    fn test_invalid_descriptor_fails_load() {
        let dir = tempfile::tempdir().unwrap();
        let platforms = dir.path().join("platforms");
        std::fs::create_dir_all(&platforms).unwrap();
        std::fs::write(
            platforms.join("broken.json"),
            r#"{"name": "broken", "ecosystem": "x"}"#,
        )
        .unwrap();

        assert!(PlatformRegistry::load(dir.path()).is_err());
    }
}
