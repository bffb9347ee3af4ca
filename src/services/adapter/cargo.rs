//! crates.io adapter.
//!
//! `cargo package` rebuilds the .crate from source; `cargo publish`
//! uploads it with CARGO_REGISTRY_TOKEN. crates.io rejects re-publishing
//! an existing version ("already uploaded") and supports yank as its
//! rollback capability.

use async_trait::async_trait;
use std::path::Path;

use crate::error::AdapterError;
use crate::infrastructure::Credential;

use super::{
    AdapterBase, ArtifactDescriptor, DeployOutcome, PlatformAdapter, RollbackOutcome,
    RollbackRequest, VerifyOutcome,
};

pub struct CargoAdapter {
    base: AdapterBase,
}

impl CargoAdapter {
    pub fn new(base: AdapterBase) -> Self {
        Self { base }
    }

    fn auth_env(&self) -> Vec<(String, String)> {
        match &self.base.credential {
            Credential::Bearer { token } => {
                vec![("CARGO_REGISTRY_TOKEN".to_string(), token.clone())]
            }
            _ => Vec::new(),
        }
    }
}

#[async_trait]
impl PlatformAdapter for CargoAdapter {
    fn descriptor(&self) -> &crate::domain::PlatformDescriptor {
        &self.base.descriptor
    }

    async fn init(&self) -> Result<(), AdapterError> {
        crate::tools::require_tool("cargo")?;
        match &self.base.credential {
            Credential::Bearer { .. } | Credential::ConfigFile { .. } => Ok(()),
            _ => Err(AdapterError::AuthUnavailable {
                platform: self.base.descriptor.name.clone(),
                message: "cargo publish needs CARGO_TOKEN".to_string(),
            }),
        }
    }

    async fn validate(
        &self,
        tree: &Path,
        requested: Option<&str>,
    ) -> Result<String, AdapterError> {
        self.base.resolve_version(tree, requested)
    }

    async fn build(
        &self,
        tree: &Path,
        version: &str,
    ) -> Result<ArtifactDescriptor, AdapterError> {
        let output = self
            .base
            .runner
            .run(
                &[
                    "cargo".to_string(),
                    "package".to_string(),
                    "--allow-dirty".to_string(),
                ],
                Some(tree),
                &[],
            )
            .await?;

        if !output.success() {
            // cargo package runs the verify build; a broken tree fails here
            let summary = output.failure_summary();
            if output.output_contains("test failed") {
                return Err(AdapterError::TestsFailed { message: summary });
            }
            return Err(AdapterError::BuildFailed { message: summary });
        }

        let crate_path = tree
            .join("target/package")
            .join(format!("{}-{}.crate", self.base.package, version));
        if !crate_path.exists() {
            return Err(AdapterError::BuildFailed {
                message: format!("expected package at {}", crate_path.display()),
            });
        }

        let checksum = AdapterBase::checksum_file(&crate_path)?;
        let mut artifact = ArtifactDescriptor::default();
        artifact
            .checksums
            .insert(crate_path.display().to_string(), checksum);
        artifact.paths.push(crate_path.display().to_string());
        Ok(artifact)
    }

    async fn deploy(
        &self,
        tree: &Path,
        _artifact: &ArtifactDescriptor,
    ) -> Result<DeployOutcome, AdapterError> {
        let output = self
            .base
            .runner
            .run(
                &[
                    "cargo".to_string(),
                    "publish".to_string(),
                    "--allow-dirty".to_string(),
                    "--no-verify".to_string(),
                ],
                Some(tree),
                &self.auth_env(),
            )
            .await?;

        if output.timed_out {
            return Ok(DeployOutcome::Transient {
                message: "cargo publish timed out".to_string(),
            });
        }

        if output.success() {
            return Ok(DeployOutcome::Completed {
                location: format!(
                    "{}/crates/{}",
                    self.base.descriptor.registry_base_url, self.base.package
                ),
            });
        }

        if output.output_contains("already uploaded")
            || output.output_contains("is already uploaded")
        {
            return Ok(DeployOutcome::Conflict {
                message: output.failure_summary(),
            });
        }
        if output.output_contains("connection") || output.output_contains("timed out") {
            return Ok(DeployOutcome::Transient {
                message: output.failure_summary(),
            });
        }

        Ok(DeployOutcome::Rejected {
            message: output.failure_summary(),
        })
    }

    async fn verify(&self, package: &str, version: &str) -> Result<VerifyOutcome, AdapterError> {
        // crates.io nests the version object: {"version": {"num": "..."}}
        let outcome = self.base.verify_via_metadata(package, version).await?;
        if let VerifyOutcome::Present { metadata } = &outcome {
            if let Some(num) = metadata
                .get("version")
                .and_then(|v| v.get("num"))
                .and_then(|n| n.as_str())
            {
                if num != version {
                    return Ok(VerifyOutcome::Mismatch {
                        message: format!("crates.io reports {}, expected {}", num, version),
                    });
                }
            }
        }
        Ok(outcome)
    }

    async fn rollback(&self, request: &RollbackRequest) -> Result<RollbackOutcome, AdapterError> {
        self.base.rollback_via_methods(request).await
    }

    async fn dependency_check(&self, tree: &Path) -> Result<(), String> {
        let output = self
            .base
            .runner
            .run(
                &[
                    "cargo".to_string(),
                    "metadata".to_string(),
                    "--format-version".to_string(),
                    "1".to_string(),
                ],
                Some(tree),
                &[],
            )
            .await
            .map_err(|e| e.to_string())?;

        if output.success() {
            Ok(())
        } else {
            Err(output.failure_summary())
        }
    }
}
