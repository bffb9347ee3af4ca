//! npm registry adapter.
//!
//! Publishes through the `npm` CLI. `npm publish --json` gives
//! structured output on success; failure classification leans on npm's
//! well-known error codes (EPUBLISHCONFLICT, E403, ...) before falling
//! back to exit-code semantics.

use async_trait::async_trait;
use std::path::Path;

use crate::error::AdapterError;
use crate::infrastructure::Credential;

use super::{
    AdapterBase, ArtifactDescriptor, DeployOutcome, PlatformAdapter, RollbackOutcome,
    RollbackRequest, VerifyOutcome,
};

pub struct NpmAdapter {
    base: AdapterBase,
}

impl NpmAdapter {
    pub fn new(base: AdapterBase) -> Self {
        Self { base }
    }

    fn auth_env(&self) -> Vec<(String, String)> {
        match &self.base.credential {
            // .npmrc is expected to reference ${NPM_TOKEN}
            Credential::Bearer { token } => vec![("NPM_TOKEN".to_string(), token.clone())],
            _ => Vec::new(),
        }
    }
}

#[async_trait]
impl PlatformAdapter for NpmAdapter {
    fn descriptor(&self) -> &crate::domain::PlatformDescriptor {
        &self.base.descriptor
    }

    async fn init(&self) -> Result<(), AdapterError> {
        crate::tools::require_tool("npm")?;
        match &self.base.credential {
            Credential::Bearer { .. } | Credential::ConfigFile { .. } => Ok(()),
            _ => Err(AdapterError::AuthUnavailable {
                platform: self.base.descriptor.name.clone(),
                message: "npm publish needs NPM_TOKEN or an .npmrc".to_string(),
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
        // npm pack re-creates the tarball from source and prints its
        // filename as the last stdout line.
        let output = self
            .base
            .runner
            .run(
                &["npm".to_string(), "pack".to_string()],
                Some(tree),
                &self.auth_env(),
            )
            .await?;

        if !output.success() {
            return Err(AdapterError::BuildFailed {
                message: output.failure_summary(),
            });
        }

        let tarball = output
            .stdout
            .lines()
            .rev()
            .find(|l| l.trim().ends_with(".tgz"))
            .map(|l| l.trim().to_string())
            .ok_or_else(|| AdapterError::BuildFailed {
                message: format!("npm pack produced no tarball for version {}", version),
            })?;

        let path = tree.join(&tarball);
        let checksum = AdapterBase::checksum_file(&path)?;

        let mut artifact = ArtifactDescriptor::default();
        artifact.paths.push(path.display().to_string());
        artifact.checksums.insert(path.display().to_string(), checksum);
        Ok(artifact)
    }

    async fn deploy(
        &self,
        tree: &Path,
        artifact: &ArtifactDescriptor,
    ) -> Result<DeployOutcome, AdapterError> {
        let tarball = artifact
            .paths
            .first()
            .cloned()
            .unwrap_or_else(|| ".".to_string());

        let output = self
            .base
            .runner
            .run(
                &[
                    "npm".to_string(),
                    "publish".to_string(),
                    tarball,
                    "--json".to_string(),
                ],
                Some(tree),
                &self.auth_env(),
            )
            .await?;

        if output.timed_out {
            return Ok(DeployOutcome::Transient {
                message: "npm publish timed out".to_string(),
            });
        }

        if output.success() {
            // {"id": "pkg@1.2.3", ...} on success with --json
            let location = serde_json::from_str::<serde_json::Value>(&output.stdout)
                .ok()
                .and_then(|v| v.get("id").and_then(|id| id.as_str()).map(|s| s.to_string()))
                .map(|id| format!("{}/{}", self.base.descriptor.registry_base_url, id))
                .unwrap_or_else(|| self.base.descriptor.registry_base_url.clone());
            return Ok(DeployOutcome::Completed { location });
        }

        if output.output_contains("EPUBLISHCONFLICT")
            || output.output_contains("cannot publish over the previously published")
        {
            return Ok(DeployOutcome::Conflict {
                message: output.failure_summary(),
            });
        }
        if output.output_contains("ETIMEDOUT")
            || output.output_contains("ECONNRESET")
            || output.output_contains("EAI_AGAIN")
            || output.output_contains("503")
        {
            return Ok(DeployOutcome::Transient {
                message: output.failure_summary(),
            });
        }

        Ok(DeployOutcome::Rejected {
            message: output.failure_summary(),
        })
    }

    async fn verify(&self, package: &str, version: &str) -> Result<VerifyOutcome, AdapterError> {
        self.base.verify_via_metadata(package, version).await
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
                    "npm".to_string(),
                    "install".to_string(),
                    "--dry-run".to_string(),
                    "--package-lock-only".to_string(),
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
