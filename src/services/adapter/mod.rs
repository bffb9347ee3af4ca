//! Platform adapter runtime.
//!
//! Every registry hides behind the same six-operation lifecycle:
//! Init, Validate, Build, Deploy, Verify, Rollback. Per-registry quirks
//! (PyPI's no-unpublish rule, Docker's tag rewrite) are expressed by the
//! platform descriptor, not by pipeline branching. Deploy, Verify and
//! Rollback report tagged outcome values; only tool/credential/manifest
//! breakage raises an error.
//!
//! Adapters are stateless: they receive a working-tree path, a version
//! and a credential handle per call, and never hold transaction state.

mod cargo;
mod command;
mod docker;
mod generic;
mod npm;
mod pypi;
pub mod version;

pub use command::{CommandOutput, CommandRunner};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use crate::config::OrchestratorConfig;
use crate::domain::descriptor::render_command;
use crate::domain::PlatformDescriptor;
use crate::error::AdapterError;
use crate::infrastructure::{Credential, MetadataClient, MetadataLookup};

/// Build artifacts produced by `Build`: paths plus content checksums
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArtifactDescriptor {
    /// Artifact locations; file paths for archive-style registries, an
    /// image reference for container ones
    pub paths: Vec<String>,

    /// sha256 per artifact path (images record their digest instead)
    #[serde(default)]
    pub checksums: BTreeMap<String, String>,
}

/// Tagged result of `Deploy`
#[derive(Debug, Clone)]
pub enum DeployOutcome {
    /// Registry acknowledged the publish; location is the registry-assigned
    /// URL or coordinates
    Completed { location: String },
    /// Retryable failure (network, rate limit, timeout)
    Transient { message: String },
    /// Registry refused the artifact; never retried
    Rejected { message: String },
    /// Version already published; never retried
    Conflict { message: String },
}

/// Tagged result of one `Verify` probe
#[derive(Debug, Clone)]
pub enum VerifyOutcome {
    /// Registry metadata reports the release
    Present { metadata: serde_json::Value },
    /// Metadata endpoint does not know the release (yet)
    NotFound,
    /// Release is visible but its metadata contradicts what we published
    Mismatch { message: String },
}

/// Tagged result of `Rollback`
#[derive(Debug, Clone)]
pub enum RollbackOutcome {
    Completed { method_used: String },
    /// Descriptor declares no rollback capability; nothing was attempted
    NotSupported { message: String },
    /// Every usable method requires confirmation the caller withheld
    ManualOnly { message: String },
    /// All declared methods were attempted and failed
    Failed { message: String },
}

/// Inputs to a `Rollback` invocation
#[derive(Debug, Clone)]
pub struct RollbackRequest {
    pub package: String,
    /// The version being rolled back
    pub version: String,
    /// Registry-reported version to restore, frozen at rollback open time
    pub previous_version: Option<String>,
    /// True when the operator explicitly overrode confirmation (or runs
    /// in manual mode); confirmation-gated methods stay skipped otherwise
    pub allow_confirmation_required: bool,
}

/// The six-operation platform lifecycle
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    fn descriptor(&self) -> &PlatformDescriptor;

    /// Check tool availability and credential presence; fails with
    /// `ToolMissing` / `AuthUnavailable` before any pipeline work starts.
    async fn init(&self) -> Result<(), AdapterError>;

    /// Resolve the version: write `requested` into the manifest when
    /// supplied (the pipeline is authoritative), otherwise read the
    /// manifest's current value. Returns the resolved version string.
    async fn validate(
        &self,
        tree: &Path,
        requested: Option<&str>,
    ) -> Result<String, AdapterError>;

    /// Produce fresh artifacts from source. Pre-existing dist artifacts
    /// from a prior run are ignored.
    async fn build(&self, tree: &Path, version: &str)
        -> Result<ArtifactDescriptor, AdapterError>;

    /// Publish the artifacts. Success is defined by the registry's
    /// acknowledgement, not exit code alone.
    async fn deploy(
        &self,
        tree: &Path,
        artifact: &ArtifactDescriptor,
    ) -> Result<DeployOutcome, AdapterError>;

    /// One probe of the registry's public metadata endpoint. The
    /// pipeline's backoff loop absorbs propagation delay around this.
    async fn verify(&self, package: &str, version: &str) -> Result<VerifyOutcome, AdapterError>;

    /// Undo a published release using the descriptor's rollback methods,
    /// in declared order; the first success wins.
    async fn rollback(&self, request: &RollbackRequest) -> Result<RollbackOutcome, AdapterError>;

    /// Dependency-resolution dry run for the validator gate. Platforms
    /// without a meaningful check succeed trivially. `Err` carries the
    /// failure text the validation report records.
    async fn dependency_check(&self, tree: &Path) -> Result<(), String>;
}

/// Shared state every concrete adapter carries
pub struct AdapterBase {
    pub descriptor: PlatformDescriptor,
    /// Source tree identifier; expands `{package}` in locator paths
    pub package: String,
    pub credential: Credential,
    pub runner: CommandRunner,
    pub metadata: Arc<MetadataClient>,
}

impl AdapterBase {
    /// Validate's version resolution: write the requested version into
    /// the manifest (the pipeline is authoritative, an existing manifest
    /// value is overwritten), or read the manifest's current value when
    /// none was requested.
    pub fn resolve_version(
        &self,
        tree: &Path,
        requested: Option<&str>,
    ) -> Result<String, AdapterError> {
        let locator = &self.descriptor.version_locator;
        match requested {
            Some(v) => {
                version::write_version(tree, locator, &self.package, v)?;
                Ok(v.to_string())
            }
            None => version::read_version(tree, locator, &self.package),
        }
    }

    /// sha256 of a built artifact file.
    pub fn checksum_file(path: &Path) -> Result<String, AdapterError> {
        use sha2::{Digest, Sha256};

        let bytes = std::fs::read(path).map_err(|e| AdapterError::BuildFailed {
            message: format!("cannot read artifact {}: {}", path.display(), e),
        })?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        Ok(format!("sha256:{:x}", hasher.finalize()))
    }

    /// Default verify: hit the metadata endpoint for the exact version
    /// and cross-check the reported version field where one is present.
    pub async fn verify_via_metadata(
        &self,
        package: &str,
        version: &str,
    ) -> Result<VerifyOutcome, AdapterError> {
        let lookup = self
            .metadata
            .lookup(&self.descriptor, package, version)
            .await
            .map_err(|e| AdapterError::SpawnFailed {
                command: format!("GET {}", self.descriptor.metadata_url(package, version)),
                message: e.to_string(),
            })?;

        match lookup {
            MetadataLookup::NotFound => Ok(VerifyOutcome::NotFound),
            MetadataLookup::Present(metadata) => {
                let reported = metadata
                    .get("version")
                    .or_else(|| metadata.get("vers"))
                    .or_else(|| metadata.get("num"))
                    .and_then(|v| v.as_str());
                match reported {
                    Some(r) if r != version => Ok(VerifyOutcome::Mismatch {
                        message: format!("registry reports version {}, expected {}", r, version),
                    }),
                    _ => Ok(VerifyOutcome::Present { metadata }),
                }
            }
        }
    }

    /// Default rollback: walk the descriptor's methods in declared order.
    ///
    /// Capability `none` returns `NotSupported` without attempting
    /// anything. A platform already in its rolled-back state (release
    /// gone or marked yanked on the registry) reports `Completed` without
    /// reissuing any command, which makes a second rollback of the same
    /// deployment safe.
    pub async fn rollback_via_methods(
        &self,
        request: &RollbackRequest,
    ) -> Result<RollbackOutcome, AdapterError> {
        let descriptor = &self.descriptor;

        if !descriptor.supports_rollback() {
            return Ok(RollbackOutcome::NotSupported {
                message: format!(
                    "{} declares rollback_capability=none; registry must be handled manually",
                    descriptor.name
                ),
            });
        }

        if self.already_rolled_back(request).await {
            return Ok(RollbackOutcome::Completed {
                method_used: "already-rolled-back".to_string(),
            });
        }

        let previous = request.previous_version.as_deref().unwrap_or_default();
        let mut skipped_confirmation = 0;
        let mut failures = Vec::new();

        for method in &descriptor.rollback_methods {
            if method.requires_confirmation && !request.allow_confirmation_required {
                tracing::info!(
                    platform = %descriptor.name,
                    method = %method.name,
                    "Skipping rollback method: requires confirmation"
                );
                skipped_confirmation += 1;
                continue;
            }

            let argv = render_command(&method.command, &request.package, &request.version, previous);
            tracing::info!(platform = %descriptor.name, method = %method.name, "Attempting rollback method");

            let output = self
                .runner
                .run_with_timeout(&argv, None, &[], method.timeout())
                .await?;

            if output.success() {
                return Ok(RollbackOutcome::Completed {
                    method_used: method.name.clone(),
                });
            }
            failures.push(format!("{}: {}", method.name, output.failure_summary()));
        }

        if failures.is_empty() && skipped_confirmation > 0 {
            return Ok(RollbackOutcome::ManualOnly {
                message: crate::error::RollbackError::ConfirmationRequired {
                    platform: descriptor.name.clone(),
                }
                .to_string(),
            });
        }

        Ok(RollbackOutcome::Failed {
            message: format!(
                "{}: {}",
                crate::error::RollbackError::AllMethodsFailed {
                    platform: descriptor.name.clone(),
                    attempts: failures.len(),
                },
                failures.join("; ")
            ),
        })
    }

    /// Registry-side check for rollback idempotence: the target release
    /// is gone, or present but flagged yanked.
    async fn already_rolled_back(&self, request: &RollbackRequest) -> bool {
        match self
            .metadata
            .lookup(&self.descriptor, &request.package, &request.version)
            .await
        {
            Ok(MetadataLookup::NotFound) => true,
            Ok(MetadataLookup::Present(metadata)) => metadata
                .get("yanked")
                .or_else(|| metadata.get("unlisted"))
                .and_then(|y| y.as_bool())
                .unwrap_or(false),
            // Cannot tell; attempt the methods rather than guessing.
            Err(_) => false,
        }
    }
}

/// Construct the adapter for a platform.
///
/// npm, pypi, cargo and dockerhub get dedicated adapters that know their
/// tools' output; everything else runs on the generic adapter driven by
/// the descriptor's command templates.
pub fn build_adapter(
    descriptor: &PlatformDescriptor,
    package: &str,
    credential: Credential,
    config: &OrchestratorConfig,
    metadata: Arc<MetadataClient>,
) -> Box<dyn PlatformAdapter> {
    let base = AdapterBase {
        descriptor: descriptor.clone(),
        package: package.to_string(),
        credential,
        runner: CommandRunner::new(config.deploy_timeout()),
        metadata,
    };

    match descriptor.name.as_str() {
        "npm" => Box::new(npm::NpmAdapter::new(base)),
        "pypi" => Box::new(pypi::PypiAdapter::new(base)),
        "cargo" => Box::new(cargo::CargoAdapter::new(base)),
        "dockerhub" => Box::new(docker::DockerAdapter::new(base)),
        _ => Box::new(generic::GenericAdapter::new(base)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::builtin::builtin_descriptors;

    fn base_for(name: &str) -> AdapterBase {
        let descriptor = builtin_descriptors()
            .into_iter()
            .find(|d| d.name == name)
            .unwrap();
        AdapterBase {
            descriptor,
            package: "mypkg".to_string(),
            credential: Credential::Anonymous,
            runner: CommandRunner::new(std::time::Duration::from_secs(5)),
            metadata: Arc::new(
                MetadataClient::new(std::time::Duration::from_secs(5)).unwrap(),
            ),
        }
    }

    #[test]
    fn test_rollback_without_capability_attempts_nothing() {
        let base = base_for("maven");
        let request = RollbackRequest {
            package: "com.example:lib".to_string(),
            version: "1.0.0".to_string(),
            previous_version: None,
            allow_confirmation_required: true,
        };
        let outcome =
            tokio_test::block_on(base.rollback_via_methods(&request)).unwrap();
        assert!(matches!(outcome, RollbackOutcome::NotSupported { .. }));
    }

    #[test]
    fn test_factory_picks_generic_for_unknown_platforms() {
        let config = OrchestratorConfig::default();
        let metadata =
            Arc::new(MetadataClient::new(std::time::Duration::from_secs(5)).unwrap());
        let descriptor = builtin_descriptors()
            .into_iter()
            .find(|d| d.name == "maven")
            .unwrap();
        let adapter =
            build_adapter(&descriptor, "mypkg", Credential::Anonymous, &config, metadata);
        assert_eq!(adapter.descriptor().name, "maven");
    }
}
