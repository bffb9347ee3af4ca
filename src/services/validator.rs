//! Pre-deploy validation gate.
//!
//! Runs before the first adapter touches the tree: file structure,
//! manifest fields, license policy, dependency resolution and advisory
//! registry health. Failures collect into a report; the first
//! `required=true` failure aborts the pipeline at the validation stage,
//! non-required failures are recorded as warnings.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use crate::config::OrchestratorConfig;
use crate::domain::PlatformDescriptor;
use crate::error::ValidationError;
use crate::infrastructure::{HealthState, MetadataClient, PlatformRegistry};
use crate::services::adapter::version::expand_path;
use crate::services::adapter::PlatformAdapter;

/// One validation check result
#[derive(Debug, Clone)]
pub struct ValidationCheck {
    pub name: String,
    pub platform: Option<String>,
    pub required: bool,
    pub passed: bool,
    pub detail: Option<String>,
}

impl ValidationCheck {
    fn pass(name: impl Into<String>, platform: Option<&str>) -> Self {
        Self {
            name: name.into(),
            platform: platform.map(|p| p.to_string()),
            required: true,
            passed: true,
            detail: None,
        }
    }

    fn fail(
        name: impl Into<String>,
        platform: Option<&str>,
        required: bool,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            platform: platform.map(|p| p.to_string()),
            required,
            passed: false,
            detail: Some(detail.into()),
        }
    }
}

/// Collected validation results
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub checks: Vec<ValidationCheck>,
}

impl ValidationReport {
    pub fn passed(&self) -> bool {
        !self.checks.iter().any(|c| c.required && !c.passed)
    }

    pub fn first_failure(&self) -> Option<&ValidationCheck> {
        self.checks.iter().find(|c| c.required && !c.passed)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &ValidationCheck> {
        self.checks.iter().filter(|c| !c.required && !c.passed)
    }

    fn push(&mut self, check: ValidationCheck) {
        self.checks.push(check);
    }
}

const LICENSE_FILES: &[&str] = &["LICENSE", "LICENSE.md", "LICENSE.txt", "COPYING", "LICENCE"];

/// Run the full gate for a working tree against the target platforms.
#[allow(clippy::too_many_arguments)]
pub async fn validate(
    tree: &Path,
    package: &str,
    targets: &[String],
    adapters: &BTreeMap<String, Arc<dyn PlatformAdapter>>,
    registry: &PlatformRegistry,
    metadata: &MetadataClient,
    config: &OrchestratorConfig,
    strict_health: bool,
) -> ValidationReport {
    let mut report = ValidationReport::default();

    for target in targets {
        let descriptor = match registry.get(target) {
            Ok(d) => d,
            Err(e) => {
                report.push(ValidationCheck::fail(
                    "descriptor",
                    Some(target.as_str()),
                    true,
                    e.to_string(),
                ));
                continue;
            }
        };

        check_required_files(&mut report, tree, package, descriptor);
        check_manifest(&mut report, tree, package, descriptor);
    }

    check_license(&mut report, tree, package, targets, registry, config);

    for target in targets {
        if let Some(adapter) = adapters.get(target) {
            match adapter.dependency_check(tree).await {
                Ok(()) => report.push(ValidationCheck::pass("dependency_resolution", Some(target.as_str()))),
                Err(message) => report.push(ValidationCheck::fail(
                    "dependency_resolution",
                    Some(target.as_str()),
                    true,
                    ValidationError::DependencyCheckFailed {
                        platform: target.clone(),
                        message,
                    }
                    .to_string(),
                )),
            }
        }
    }

    check_health(&mut report, targets, registry, metadata, strict_health).await;

    report
}

fn check_required_files(
    report: &mut ValidationReport,
    tree: &Path,
    package: &str,
    descriptor: &PlatformDescriptor,
) {
    for file in &descriptor.required_files {
        let rel = expand_path(file, package);
        if tree.join(&rel).exists() {
            report.push(ValidationCheck::pass(
                format!("required_file:{}", rel),
                Some(descriptor.name.as_str()),
            ));
        } else {
            report.push(ValidationCheck::fail(
                format!("required_file:{}", rel),
                Some(descriptor.name.as_str()),
                true,
                ValidationError::RequiredFileMissing {
                    platform: descriptor.name.clone(),
                    path: rel,
                }
                .to_string(),
            ));
        }
    }
}

fn check_manifest(
    report: &mut ValidationReport,
    tree: &Path,
    package: &str,
    descriptor: &PlatformDescriptor,
) {
    use crate::services::adapter::version::read_version;

    // A readable version doubles as the syntactic parse check: the
    // locator only resolves on a well-formed manifest.
    match read_version(tree, &descriptor.version_locator, package) {
        Ok(version) if !version.is_empty() => {
            report.push(ValidationCheck::pass("manifest_version", Some(descriptor.name.as_str())));
        }
        Ok(_) => report.push(ValidationCheck::fail(
            "manifest_version",
            Some(descriptor.name.as_str()),
            true,
            "manifest version field is empty",
        )),
        Err(e) => report.push(ValidationCheck::fail(
            "manifest_version",
            Some(descriptor.name.as_str()),
            true,
            e.to_string(),
        )),
    }

    match manifest_name(tree, package, descriptor) {
        Some(name) if !name.is_empty() => {
            report.push(ValidationCheck::pass("manifest_name", Some(descriptor.name.as_str())));
        }
        Some(_) => report.push(ValidationCheck::fail(
            "manifest_name",
            Some(descriptor.name.as_str()),
            true,
            "manifest name field is empty",
        )),
        // Free-form manifests (Dockerfile, formula) carry no name field
        None => {}
    }
}

/// Declared package name where the manifest format carries one.
fn manifest_name(tree: &Path, package: &str, descriptor: &PlatformDescriptor) -> Option<String> {
    let rel = expand_path(&descriptor.version_locator.file, package);
    let path = tree.join(rel);
    let content = std::fs::read_to_string(&path).ok()?;

    if path.extension().map(|e| e == "json").unwrap_or(false) {
        let doc: serde_json::Value = serde_json::from_str(&content).ok()?;
        return doc
            .get("name")
            .and_then(|n| n.as_str())
            .map(|s| s.to_string())
            .or(Some(String::new()));
    }
    if path.extension().map(|e| e == "toml").unwrap_or(false) {
        let doc: toml::Table = content.parse().ok()?;
        for section in ["package", "project"] {
            if let Some(name) = doc
                .get(section)
                .and_then(|s| s.get("name"))
                .and_then(|n| n.as_str())
            {
                return Some(name.to_string());
            }
        }
        return Some(String::new());
    }
    None
}

fn check_license(
    report: &mut ValidationReport,
    tree: &Path,
    package: &str,
    targets: &[String],
    registry: &PlatformRegistry,
    config: &OrchestratorConfig,
) {
    let license_file = LICENSE_FILES.iter().find(|f| tree.join(f).exists());
    match license_file {
        Some(file) => report.push(ValidationCheck::pass(format!("license_file:{}", file), None)),
        None => {
            report.push(ValidationCheck::fail(
                "license_file",
                None,
                true,
                ValidationError::LicenseFileMissing.to_string(),
            ));
            return;
        }
    }

    // Declared license from the first manifest that carries one
    let declared = targets.iter().find_map(|t| {
        let descriptor = registry.get(t).ok()?;
        declared_license(tree, package, descriptor)
    });

    match declared {
        Some(license) if config.license_allowed(&license) => {
            report.push(ValidationCheck::pass(format!("license_policy:{}", license), None));
        }
        Some(license) => report.push(ValidationCheck::fail(
            "license_policy",
            None,
            true,
            ValidationError::LicenseNotAllowed { license }.to_string(),
        )),
        None => report.push(ValidationCheck::fail(
            "license_declared",
            None,
            false,
            "no manifest declares a license",
        )),
    }
}

fn declared_license(
    tree: &Path,
    package: &str,
    descriptor: &PlatformDescriptor,
) -> Option<String> {
    let rel = expand_path(&descriptor.version_locator.file, package);
    let path = tree.join(rel);
    let content = std::fs::read_to_string(&path).ok()?;

    if path.extension().map(|e| e == "json").unwrap_or(false) {
        let doc: serde_json::Value = serde_json::from_str(&content).ok()?;
        return doc
            .get("license")
            .and_then(|l| l.as_str())
            .map(|s| s.to_string());
    }
    if path.extension().map(|e| e == "toml").unwrap_or(false) {
        let doc: toml::Table = content.parse().ok()?;
        for section in ["package", "project"] {
            if let Some(license) = doc.get(section).and_then(|s| s.get("license")) {
                if let Some(s) = license.as_str() {
                    return Some(s.to_string());
                }
                // pyproject: license = {text = "MIT"}
                if let Some(s) = license.get("text").and_then(|t| t.as_str()) {
                    return Some(s.to_string());
                }
            }
        }
    }
    None
}

async fn check_health(
    report: &mut ValidationReport,
    targets: &[String],
    registry: &PlatformRegistry,
    metadata: &MetadataClient,
    strict_health: bool,
) {
    for target in targets {
        let Ok(descriptor) = registry.get(target) else {
            continue;
        };
        let health = metadata.health(descriptor).await;
        match health.state {
            HealthState::Ok => {
                report.push(ValidationCheck::pass("registry_health", Some(target.as_str())));
            }
            HealthState::Degraded => report.push(ValidationCheck::fail(
                "registry_health",
                Some(target.as_str()),
                false,
                format!(
                    "registry degraded: {}",
                    health.detail.unwrap_or_default()
                ),
            )),
            HealthState::Down if strict_health => report.push(ValidationCheck::fail(
                "registry_health",
                Some(target.as_str()),
                true,
                ValidationError::RegistryDown {
                    platform: target.clone(),
                }
                .to_string(),
            )),
            HealthState::Down => report.push(ValidationCheck::fail(
                "registry_health",
                Some(target.as_str()),
                false,
                format!("registry down: {}", health.detail.unwrap_or_default()),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_required_failure_wins() {
        let mut report = ValidationReport::default();
        report.push(ValidationCheck::pass("a", None));
        report.push(ValidationCheck::fail("b", Some("npm"), false, "warning only"));
        assert!(report.passed());

        report.push(ValidationCheck::fail("c", Some("npm"), true, "fatal"));
        assert!(!report.passed());
        assert_eq!(report.first_failure().unwrap().name, "c");
        assert_eq!(report.warnings().count(), 1);
    }
}
