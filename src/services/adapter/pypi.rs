//! PyPI adapter.
//!
//! Builds with `python -m build` and uploads with `twine`, which reads
//! TWINE_USERNAME / TWINE_PASSWORD from the environment. PyPI refuses
//! re-uploads of an existing version ("File already exists") and never
//! allows unpublish; the descriptor's yank method is confirmation-gated
//! accordingly.

use async_trait::async_trait;
use std::path::Path;

use crate::error::AdapterError;
use crate::infrastructure::Credential;

use super::{
    AdapterBase, ArtifactDescriptor, DeployOutcome, PlatformAdapter, RollbackOutcome,
    RollbackRequest, VerifyOutcome,
};

pub struct PypiAdapter {
    base: AdapterBase,
}

impl PypiAdapter {
    pub fn new(base: AdapterBase) -> Self {
        Self { base }
    }

    fn auth_env(&self) -> Vec<(String, String)> {
        match &self.base.credential {
            Credential::UserPass { username, password } => vec![
                ("TWINE_USERNAME".to_string(), username.clone()),
                ("TWINE_PASSWORD".to_string(), password.clone()),
                ("TWINE_NON_INTERACTIVE".to_string(), "1".to_string()),
            ],
            _ => Vec::new(),
        }
    }
}

#[async_trait]
impl PlatformAdapter for PypiAdapter {
    fn descriptor(&self) -> &crate::domain::PlatformDescriptor {
        &self.base.descriptor
    }

    async fn init(&self) -> Result<(), AdapterError> {
        crate::tools::require_tool("python")?;
        crate::tools::require_tool("twine")?;
        match &self.base.credential {
            Credential::UserPass { .. } | Credential::ConfigFile { .. } => Ok(()),
            _ => Err(AdapterError::AuthUnavailable {
                platform: self.base.descriptor.name.clone(),
                message: "twine needs PYPI_USERNAME/PYPI_PASSWORD or a .pypirc".to_string(),
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
        // Stale dist/ from a prior run must not leak into the upload.
        let dist = tree.join("dist");
        if dist.exists() {
            let _ = std::fs::remove_dir_all(&dist);
        }

        let output = self
            .base
            .runner
            .run(
                &["python".to_string(), "-m".to_string(), "build".to_string()],
                Some(tree),
                &[],
            )
            .await?;

        if !output.success() {
            return Err(AdapterError::BuildFailed {
                message: output.failure_summary(),
            });
        }

        let mut artifact = ArtifactDescriptor::default();
        let entries = std::fs::read_dir(&dist).map_err(|e| AdapterError::BuildFailed {
            message: format!("dist/ missing after build: {}", e),
        })?;
        for entry in entries.flatten() {
            let path = entry.path();
            let name = path.file_name().map(|n| n.to_string_lossy().to_string());
            let is_dist = name
                .as_deref()
                .map(|n| n.ends_with(".whl") || n.ends_with(".tar.gz"))
                .unwrap_or(false);
            if is_dist {
                let checksum = AdapterBase::checksum_file(&path)?;
                artifact.checksums.insert(path.display().to_string(), checksum);
                artifact.paths.push(path.display().to_string());
            }
        }

        if artifact.paths.is_empty() {
            return Err(AdapterError::BuildFailed {
                message: format!("python -m build produced no artifacts for {}", version),
            });
        }
        Ok(artifact)
    }

    async fn deploy(
        &self,
        tree: &Path,
        artifact: &ArtifactDescriptor,
    ) -> Result<DeployOutcome, AdapterError> {
        let mut argv = vec![
            "twine".to_string(),
            "upload".to_string(),
            "--repository-url".to_string(),
            self.base.descriptor.registry_base_url.clone(),
        ];
        argv.extend(artifact.paths.iter().cloned());

        let output = self
            .base
            .runner
            .run(&argv, Some(tree), &self.auth_env())
            .await?;

        if output.timed_out {
            return Ok(DeployOutcome::Transient {
                message: "twine upload timed out".to_string(),
            });
        }

        if output.success() {
            return Ok(DeployOutcome::Completed {
                location: format!(
                    "https://pypi.org/project/{}/",
                    self.base.package
                ),
            });
        }

        if output.output_contains("File already exists")
            || (output.output_contains("400 Bad Request") && output.output_contains("already"))
        {
            return Ok(DeployOutcome::Conflict {
                message: output.failure_summary(),
            });
        }
        if output.output_contains("403") || output.output_contains("Invalid or non-existent") {
            return Ok(DeployOutcome::Rejected {
                message: output.failure_summary(),
            });
        }
        if output.output_contains("ConnectionError")
            || output.output_contains("timed out")
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
                    "python".to_string(),
                    "-m".to_string(),
                    "pip".to_string(),
                    "install".to_string(),
                    "--dry-run".to_string(),
                    ".".to_string(),
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
