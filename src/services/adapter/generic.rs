//! Generic descriptor-driven adapter.
//!
//! Platforms without a dedicated adapter (maven, nuget, packagist,
//! homebrew, operator-added registries) run their whole lifecycle from
//! command templates in the descriptor's extra fields: `build_command`,
//! `deploy_command` and optionally `dependency_check_command`. Templates
//! expand `{package}` and `{version}` like rollback methods do.

use async_trait::async_trait;
use std::path::Path;

use crate::domain::descriptor::render_command;
use crate::error::AdapterError;
use crate::infrastructure::Credential;

use super::{
    AdapterBase, ArtifactDescriptor, DeployOutcome, PlatformAdapter, RollbackOutcome,
    RollbackRequest, VerifyOutcome,
};

pub struct GenericAdapter {
    base: AdapterBase,
}

impl GenericAdapter {
    pub fn new(base: AdapterBase) -> Self {
        Self { base }
    }

    fn command_from_extra(&self, key: &str) -> Option<Vec<String>> {
        self.base
            .descriptor
            .extra
            .get(key)
            .and_then(|v| serde_json::from_value::<Vec<String>>(v.clone()).ok())
            .filter(|argv| !argv.is_empty())
    }

    fn render(&self, template: &[String], version: &str) -> Vec<String> {
        render_command(template, &self.base.package, version, "")
    }
}

#[async_trait]
impl PlatformAdapter for GenericAdapter {
    fn descriptor(&self) -> &crate::domain::PlatformDescriptor {
        &self.base.descriptor
    }

    async fn init(&self) -> Result<(), AdapterError> {
        for key in ["build_command", "deploy_command"] {
            let argv = self.command_from_extra(key).ok_or_else(|| {
                AdapterError::SpawnFailed {
                    command: key.to_string(),
                    message: format!(
                        "descriptor {} has no {} for the generic adapter",
                        self.base.descriptor.name, key
                    ),
                }
            })?;
            crate::tools::require_tool(&argv[0])?;
        }

        match (&self.base.descriptor.auth_scheme, &self.base.credential) {
            (crate::domain::AuthScheme::None, _) => Ok(()),
            (_, Credential::Anonymous) => Err(AdapterError::AuthUnavailable {
                platform: self.base.descriptor.name.clone(),
                message: "credentials did not resolve".to_string(),
            }),
            _ => Ok(()),
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
        let template =
            self.command_from_extra("build_command")
                .ok_or_else(|| AdapterError::BuildFailed {
                    message: format!(
                        "descriptor {} has no build_command",
                        self.base.descriptor.name
                    ),
                })?;
        let argv = self.render(&template, version);

        let output = self.base.runner.run(&argv, Some(tree), &[]).await?;
        if !output.success() {
            return Err(AdapterError::BuildFailed {
                message: output.failure_summary(),
            });
        }

        // The deploy template names its own inputs; the artifact record
        // carries the rendered identity for the transaction log.
        let mut artifact = ArtifactDescriptor::default();
        artifact
            .paths
            .push(format!("{}@{}", self.base.package, version));
        Ok(artifact)
    }

    async fn deploy(
        &self,
        tree: &Path,
        artifact: &ArtifactDescriptor,
    ) -> Result<DeployOutcome, AdapterError> {
        let version = artifact
            .paths
            .first()
            .and_then(|p| p.rsplit_once('@').map(|(_, v)| v.to_string()))
            .unwrap_or_default();

        let template =
            self.command_from_extra("deploy_command")
                .ok_or_else(|| AdapterError::SpawnFailed {
                    command: "deploy_command".to_string(),
                    message: format!(
                        "descriptor {} has no deploy_command",
                        self.base.descriptor.name
                    ),
                })?;
        let argv = self.render(&template, &version);

        let output = self.base.runner.run(&argv, Some(tree), &[]).await?;

        if output.timed_out {
            return Ok(DeployOutcome::Transient {
                message: format!("{} timed out", argv[0]),
            });
        }

        if output.success() {
            return Ok(DeployOutcome::Completed {
                location: self
                    .base
                    .descriptor
                    .metadata_url(&self.base.package, &version),
            });
        }

        if output.output_contains("already exists") || output.output_contains("409") {
            return Ok(DeployOutcome::Conflict {
                message: output.failure_summary(),
            });
        }
        if output.output_contains("timed out")
            || output.output_contains("connection")
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
        let Some(template) = self.command_from_extra("dependency_check_command") else {
            return Ok(());
        };
        let argv = self.render(&template, "");

        let output = self
            .base
            .runner
            .run(&argv, Some(tree), &[])
            .await
            .map_err(|e| e.to_string())?;

        if output.success() {
            Ok(())
        } else {
            Err(output.failure_summary())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::builtin::builtin_descriptors;
    use crate::infrastructure::MetadataClient;
    use std::sync::Arc;
    use std::time::Duration;

    fn adapter_for(name: &str) -> GenericAdapter {
        let descriptor = builtin_descriptors()
            .into_iter()
            .find(|d| d.name == name)
            .unwrap();
        GenericAdapter::new(AdapterBase {
            descriptor,
            package: "mypkg".to_string(),
            credential: Credential::Anonymous,
            runner: super::super::CommandRunner::new(Duration::from_secs(5)),
            metadata: Arc::new(MetadataClient::new(Duration::from_secs(5)).unwrap()),
        })
    }

    #[test]
    fn test_builtin_generics_carry_command_templates() {
        for name in ["maven", "nuget", "packagist", "homebrew"] {
            let adapter = adapter_for(name);
            assert!(
                adapter.command_from_extra("build_command").is_some(),
                "{} missing build_command",
                name
            );
            assert!(
                adapter.command_from_extra("deploy_command").is_some(),
                "{} missing deploy_command",
                name
            );
        }
    }

    #[test]
    fn test_render_substitutes_package_and_version() {
        let adapter = adapter_for("nuget");
        let template = adapter.command_from_extra("deploy_command").unwrap();
        let argv = adapter.render(&template, "2.1.0");
        assert!(argv.iter().any(|a| a.contains("mypkg.2.1.0.nupkg")));
    }
}
