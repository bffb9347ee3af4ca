//! Docker Hub adapter.
//!
//! Builds the image from the working tree's Dockerfile and pushes the
//! version tag. The "artifact" is an image reference rather than a file;
//! its digest stands in for a checksum. Rollback is a tag rewrite: the
//! descriptor repoints `latest` at the previous version's digest.

use async_trait::async_trait;
use std::path::Path;

use crate::error::AdapterError;
use crate::infrastructure::Credential;

use super::{
    AdapterBase, ArtifactDescriptor, DeployOutcome, PlatformAdapter, RollbackOutcome,
    RollbackRequest, VerifyOutcome,
};

pub struct DockerAdapter {
    base: AdapterBase,
}

impl DockerAdapter {
    pub fn new(base: AdapterBase) -> Self {
        Self { base }
    }

    fn image_ref(&self, version: &str) -> String {
        format!("{}:{}", self.base.package, version)
    }

    async fn login(&self) -> Result<Option<super::CommandOutput>, AdapterError> {
        let Credential::UserPass { username, password } = &self.base.credential else {
            return Ok(None);
        };
        let output = self
            .base
            .runner
            .run_with_stdin(
                &[
                    "docker".to_string(),
                    "login".to_string(),
                    "--username".to_string(),
                    username.clone(),
                    "--password-stdin".to_string(),
                ],
                None,
                &[],
                password,
            )
            .await?;
        Ok(Some(output))
    }
}

#[async_trait]
impl PlatformAdapter for DockerAdapter {
    fn descriptor(&self) -> &crate::domain::PlatformDescriptor {
        &self.base.descriptor
    }

    async fn init(&self) -> Result<(), AdapterError> {
        crate::tools::require_tool("docker")?;
        match &self.base.credential {
            Credential::UserPass { .. } | Credential::ConfigFile { .. } => Ok(()),
            _ => Err(AdapterError::AuthUnavailable {
                platform: self.base.descriptor.name.clone(),
                message: "docker push needs DOCKERHUB_USERNAME/DOCKERHUB_PASSWORD".to_string(),
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
        let image = self.image_ref(version);
        let output = self
            .base
            .runner
            .run(
                &[
                    "docker".to_string(),
                    "build".to_string(),
                    "--tag".to_string(),
                    image.clone(),
                    ".".to_string(),
                ],
                Some(tree),
                &[],
            )
            .await?;

        if !output.success() {
            return Err(AdapterError::BuildFailed {
                message: output.failure_summary(),
            });
        }

        // Record the image id as the artifact checksum
        let inspect = self
            .base
            .runner
            .run(
                &[
                    "docker".to_string(),
                    "images".to_string(),
                    "--no-trunc".to_string(),
                    "--quiet".to_string(),
                    image.clone(),
                ],
                Some(tree),
                &[],
            )
            .await?;

        let mut artifact = ArtifactDescriptor::default();
        if inspect.success() {
            let digest = inspect.stdout.trim().to_string();
            if !digest.is_empty() {
                artifact.checksums.insert(image.clone(), digest);
            }
        }
        artifact.paths.push(image);
        Ok(artifact)
    }

    async fn deploy(
        &self,
        _tree: &Path,
        artifact: &ArtifactDescriptor,
    ) -> Result<DeployOutcome, AdapterError> {
        if let Some(login) = self.login().await? {
            if !login.success() {
                return Ok(DeployOutcome::Rejected {
                    message: format!("docker login failed: {}", login.failure_summary()),
                });
            }
        }

        let image = artifact.paths.first().cloned().unwrap_or_default();
        let output = self
            .base
            .runner
            .run(
                &["docker".to_string(), "push".to_string(), image.clone()],
                None,
                &[],
            )
            .await?;

        if output.timed_out {
            return Ok(DeployOutcome::Transient {
                message: "docker push timed out".to_string(),
            });
        }

        if output.success() {
            return Ok(DeployOutcome::Completed {
                location: format!("docker.io/{}", image),
            });
        }

        if output.output_contains("denied") || output.output_contains("unauthorized") {
            return Ok(DeployOutcome::Rejected {
                message: output.failure_summary(),
            });
        }
        // Registry push failures are overwhelmingly network-shaped
        Ok(DeployOutcome::Transient {
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
        // A parseable Dockerfile is the closest thing to dependency
        // resolution; `docker build --check` lints without building.
        let output = self
            .base
            .runner
            .run(
                &[
                    "docker".to_string(),
                    "build".to_string(),
                    "--check".to_string(),
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
