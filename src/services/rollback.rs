//! Rollback engine.
//!
//! Given a deployment id, opens a rollback transaction linked to it,
//! snapshots each target's public registry metadata, walks the targets
//! in deployment order invoking the adapter rollback, runs the
//! descriptor's recovery actions best-effort, snapshots again, and
//! finalizes. A rollback that fails is reported for operator action and
//! never retried automatically; rolling back the same deployment twice
//! opens a second transaction and relies on adapter-side idempotence.

use anyhow::{bail, Context, Result};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::OrchestratorConfig;
use crate::domain::descriptor::render_command;
use crate::domain::{
    DeploymentTransaction, PlatformPatch, PlatformState, RollbackReason, RollbackTransaction,
    Stage, StageState, TransactionStatus,
};
use crate::infrastructure::{
    CredentialResolver, MetadataClient, NotificationPayload, Notifier, PlatformRegistry,
    TransactionStore,
};
use crate::services::adapter::{build_adapter, CommandRunner, RollbackOutcome, RollbackRequest};

/// Options for one rollback invocation
#[derive(Debug, Clone)]
pub struct RollbackOptions {
    /// Restrict to a subset of the deployment's targets; None rolls
    /// back every platform whose deploy was acknowledged
    pub targets: Option<Vec<String>>,
    pub reason: RollbackReason,
    /// `automated` mode downgrades confirmation-gated methods unless
    /// the operator overrode confirmation
    pub automated: bool,
    /// Explicit confirmation override (`--yes`)
    pub confirm_override: bool,
}

/// Executes rollback transactions against the transaction store
pub struct RollbackEngine {
    store: Arc<TransactionStore>,
    registry: Arc<PlatformRegistry>,
    config: OrchestratorConfig,
    metadata: Arc<MetadataClient>,
    notifier: Arc<Notifier>,
    resolver: Arc<dyn CredentialResolver>,
}

impl RollbackEngine {
    pub fn new(
        store: Arc<TransactionStore>,
        registry: Arc<PlatformRegistry>,
        config: OrchestratorConfig,
        metadata: Arc<MetadataClient>,
        notifier: Arc<Notifier>,
        resolver: Arc<dyn CredentialResolver>,
    ) -> Self {
        Self {
            store,
            registry,
            config,
            metadata,
            notifier,
            resolver,
        }
    }

    /// Platforms eligible for rollback: those whose deploy was
    /// acknowledged by the registry. A later verify failure does not
    /// un-deploy a release, so `completed_at` is the marker, not the
    /// final platform state.
    pub fn rollback_candidates(deployment: &DeploymentTransaction) -> Vec<String> {
        deployment
            .targets
            .iter()
            .filter(|t| {
                deployment
                    .platforms
                    .get(*t)
                    .map(|p| p.completed_at.is_some())
                    .unwrap_or(false)
            })
            .cloned()
            .collect()
    }

    /// Run one rollback to a terminal status and return the final record.
    pub async fn run(
        &self,
        deployment_id: &str,
        options: &RollbackOptions,
    ) -> Result<RollbackTransaction> {
        let deployment = self
            .store
            .get_deployment(deployment_id)
            .with_context(|| format!("Deployment {} not found", deployment_id))?;

        match deployment.status {
            TransactionStatus::Failed | TransactionStatus::RolledBack => {}
            TransactionStatus::Completed
                if options.reason == RollbackReason::ManualTrigger
                    || options.reason == RollbackReason::OperatorDecision => {}
            TransactionStatus::Completed => {
                bail!(
                    "Deployment {} completed; a completed deployment only rolls back on \
                     an explicit manual trigger",
                    deployment_id
                );
            }
            other => {
                bail!(
                    "Deployment {} is {}; only failed or completed deployments roll back",
                    deployment_id,
                    other
                );
            }
        }

        // Deterministic order: the deployment's declared target order,
        // filtered to the requested subset and the acknowledged deploys.
        let candidates = Self::rollback_candidates(&deployment);
        let targets: Vec<String> = match &options.targets {
            Some(subset) => deployment
                .targets
                .iter()
                .filter(|t| subset.contains(t))
                .cloned()
                .collect(),
            None => candidates.clone(),
        };

        if targets.is_empty() {
            return Err(crate::error::RollbackError::NothingToRollBack {
                id: deployment_id.to_string(),
            }
            .into());
        }

        let tx = RollbackTransaction::new(&deployment, options.reason, targets.clone());
        let rid = tx.id.clone();
        self.store.create_rollback(&tx).await?;
        self.store.link_rollback(deployment_id, &rid).await?;
        self.store.append_log(
            &rid,
            &format!(
                "rollback of {} targets=[{}] reason={}",
                deployment_id,
                targets.join(","),
                options.reason
            ),
        );

        let outcome = self
            .drive(&rid, &deployment, &targets, &candidates, options)
            .await;

        if let Err(e) = outcome {
            self.store.append_error(&rid, e.to_string()).await.ok();
            self.store.finalize(&rid, TransactionStatus::Failed).await.ok();
        }

        let final_tx = self.store.get_rollback(&rid)?;

        // A rollback that actually undid something flips the deployment
        // to rolled_back.
        if final_tx.status == TransactionStatus::Completed
            && final_tx
                .platforms
                .values()
                .any(|p| p.state == PlatformState::Completed)
        {
            self.store.mark_rolled_back(deployment_id).await?;
        }

        self.notifier
            .notify(NotificationPayload::for_rollback(&final_tx))
            .await;
        Ok(final_tx)
    }

    async fn drive(
        &self,
        rid: &str,
        deployment: &DeploymentTransaction,
        targets: &[String],
        candidates: &[String],
        options: &RollbackOptions,
    ) -> Result<()> {
        // ─── Snapshot before ───────────────────────────────────────────
        self.stage(rid, Stage::Snapshot, StageState::Started).await?;
        let before = self.snapshot(&deployment.package, targets).await;
        self.store
            .set_rollback_snapshot(rid, Some(before), None)
            .await?;
        self.stage(rid, Stage::Snapshot, StageState::Completed).await?;

        // ─── Roll back each target ─────────────────────────────────────
        self.stage(rid, Stage::Rollback, StageState::Started).await?;
        let mut attempted_failure = false;
        let mut completed_targets: Vec<String> = Vec::new();

        for target in targets {
            if !candidates.contains(target) {
                // Deploy never succeeded here; nothing to undo.
                self.store
                    .update_platform(rid, target, PlatformPatch::state(PlatformState::Skipped))
                    .await?;
                self.store.append_log(
                    rid,
                    &format!("{}: skipped (deploy was never acknowledged)", target),
                );
                continue;
            }

            let descriptor = self.registry.get(target)?;

            if !descriptor.supports_rollback() {
                let message = format!(
                    "{} declares rollback_capability=none; undo manually via the registry UI",
                    target
                );
                tracing::warn!(rid = %rid, "{}", message);
                self.store.append_log(rid, &message);
                let mut patch = PlatformPatch::state(PlatformState::Skipped);
                patch.error_message = Some(message);
                self.store.update_platform(rid, target, patch).await?;
                continue;
            }

            let credential = match self.resolver.resolve(descriptor) {
                Ok(credential) => credential,
                Err(e) => {
                    attempted_failure = true;
                    self.store.append_error(rid, format!("{}: {}", target, e)).await?;
                    self.store
                        .update_platform(rid, target, PlatformPatch::failed(e.to_string()))
                        .await?;
                    continue;
                }
            };

            let adapter = build_adapter(
                descriptor,
                &deployment.package,
                credential,
                &self.config,
                self.metadata.clone(),
            );

            // previous_version resolves from the registry version list
            // and freezes on the platform entry before any command runs.
            let previous_version = self
                .metadata
                .previous_version(descriptor, &deployment.package, &deployment.version)
                .await
                .unwrap_or_default();

            let mut freeze = PlatformPatch::state(PlatformState::Running);
            freeze.previous_version = previous_version.clone();
            self.store.update_platform(rid, target, freeze).await?;

            let request = RollbackRequest {
                package: deployment.package.clone(),
                version: deployment.version.clone(),
                previous_version,
                allow_confirmation_required: !options.automated || options.confirm_override,
            };

            match adapter.rollback(&request).await {
                Ok(RollbackOutcome::Completed { method_used }) => {
                    self.store.append_log(
                        rid,
                        &format!("{}: rolled back via {}", target, method_used),
                    );
                    let mut patch = PlatformPatch::completed(chrono::Utc::now());
                    patch.method_used = Some(method_used);
                    self.store.update_platform(rid, target, patch).await?;
                    completed_targets.push(target.clone());
                }
                Ok(RollbackOutcome::NotSupported { message }) => {
                    // Adapter-level downgrade (descriptor changed under
                    // us); recorded like capability=none.
                    self.store.append_log(rid, &format!("{}: {}", target, message));
                    let mut patch = PlatformPatch::state(PlatformState::Skipped);
                    patch.error_message = Some(message);
                    self.store.update_platform(rid, target, patch).await?;
                }
                Ok(RollbackOutcome::ManualOnly { message }) => {
                    attempted_failure = true;
                    let message = format!("NotSupported in automated mode: {}", message);
                    self.store.append_error(rid, format!("{}: {}", target, message)).await?;
                    self.store
                        .update_platform(rid, target, PlatformPatch::failed(message))
                        .await?;
                }
                Ok(RollbackOutcome::Failed { message }) => {
                    attempted_failure = true;
                    self.store.append_error(rid, format!("{}: {}", target, message)).await?;
                    self.store
                        .update_platform(rid, target, PlatformPatch::failed(message))
                        .await?;
                }
                Err(e) => {
                    attempted_failure = true;
                    self.store.append_error(rid, format!("{}: {}", target, e)).await?;
                    self.store
                        .update_platform(rid, target, PlatformPatch::failed(e.to_string()))
                        .await?;
                }
            }
        }
        let rollback_stage_state = if attempted_failure {
            StageState::Failed
        } else {
            StageState::Completed
        };
        self.stage(rid, Stage::Rollback, rollback_stage_state).await?;

        // ─── Recovery actions (best effort) ────────────────────────────
        if !completed_targets.is_empty() {
            self.stage(rid, Stage::Recovery, StageState::Started).await?;
            self.run_recovery_actions(rid, deployment, &completed_targets)
                .await?;
            self.stage(rid, Stage::Recovery, StageState::Completed).await?;
        }

        // ─── Snapshot after, finalize ──────────────────────────────────
        let after = self.snapshot(&deployment.package, targets).await;
        self.store
            .set_rollback_snapshot(rid, None, Some(after))
            .await?;

        let terminal = if attempted_failure {
            TransactionStatus::Failed
        } else {
            TransactionStatus::Completed
        };
        self.store.finalize(rid, terminal).await?;
        Ok(())
    }

    /// Post-rollback hooks from the descriptor. Individual failures are
    /// recorded but never flip the rollback transaction to failed.
    async fn run_recovery_actions(
        &self,
        rid: &str,
        deployment: &DeploymentTransaction,
        targets: &[String],
    ) -> Result<()> {
        for target in targets {
            let descriptor = self.registry.get(target)?;
            let previous = self
                .store
                .get_rollback(rid)?
                .platforms
                .get(target)
                .and_then(|p| p.previous_version.clone())
                .unwrap_or_default();

            for action in &descriptor.recovery_actions {
                let argv = render_command(
                    &action.command,
                    &deployment.package,
                    &deployment.version,
                    &previous,
                );
                let runner = CommandRunner::new(std::time::Duration::from_secs(action.timeout_secs));
                match runner.run_with_timeout(
                    &argv,
                    None,
                    &[],
                    std::time::Duration::from_secs(action.timeout_secs),
                )
                .await
                {
                    Ok(output) if output.success() => {
                        self.store.append_log(
                            rid,
                            &format!("{}: recovery action {} succeeded", target, action.name),
                        );
                    }
                    Ok(output) => {
                        let line = format!(
                            "{}: recovery action {} failed: {}",
                            target,
                            action.name,
                            output.failure_summary()
                        );
                        tracing::warn!(rid = %rid, "{}", line);
                        self.store.append_log(rid, &line);
                        self.store.append_error(rid, line).await?;
                    }
                    Err(e) => {
                        let line = format!(
                            "{}: recovery action {} did not run: {}",
                            target, action.name, e
                        );
                        tracing::warn!(rid = %rid, "{}", line);
                        self.store.append_log(rid, &line);
                        self.store.append_error(rid, line).await?;
                    }
                }
            }
        }
        Ok(())
    }

    async fn snapshot(
        &self,
        package: &str,
        targets: &[String],
    ) -> BTreeMap<String, serde_json::Value> {
        let mut snapshots = BTreeMap::new();
        for target in targets {
            if let Ok(descriptor) = self.registry.get(target) {
                snapshots.insert(
                    target.clone(),
                    self.metadata.snapshot(descriptor, package).await,
                );
            }
        }
        snapshots
    }

    async fn stage(&self, id: &str, stage: Stage, state: StageState) -> Result<()> {
        self.store.append_stage(id, stage, state).await?;
        self.store
            .append_log(id, &format!("stage {} {}", stage, state));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PipelineKind;
    use crate::infrastructure::EnvCredentialResolver;

    fn engine() -> (tempfile::TempDir, RollbackEngine, Arc<TransactionStore>) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(TransactionStore::open(dir.path()).unwrap());
        // Point every metadata endpoint at a closed local port so the
        // tests never leave the machine and fail fast.
        let descriptors: Vec<_> = crate::domain::builtin::builtin_descriptors()
            .into_iter()
            .map(|mut d| {
                d.metadata_api_url = "http://127.0.0.1:1/{package}/{version}".to_string();
                d
            })
            .collect();
        let registry = Arc::new(PlatformRegistry::from_descriptors(descriptors).unwrap());
        let metadata =
            Arc::new(MetadataClient::new(std::time::Duration::from_secs(2)).unwrap());
        let engine = RollbackEngine::new(
            store.clone(),
            registry,
            OrchestratorConfig::default(),
            metadata,
            Arc::new(Notifier::from_env()),
            Arc::new(EnvCredentialResolver),
        );
        (dir, engine, store)
    }

    async fn failed_deployment(
        store: &TransactionStore,
        targets: &[&str],
        acknowledged: &[&str],
    ) -> DeploymentTransaction {
        let tx = DeploymentTransaction::new(
            "mypkg",
            "2.0.0",
            PipelineKind::Staged,
            targets.iter().map(|s| s.to_string()).collect(),
        );
        store.create_deployment(&tx).await.unwrap();
        for target in acknowledged {
            store
                .update_platform(&tx.id, target, PlatformPatch::completed(chrono::Utc::now()))
                .await
                .unwrap();
        }
        store
            .finalize(&tx.id, TransactionStatus::Failed)
            .await
            .unwrap();
        store.get_deployment(&tx.id).unwrap()
    }

    #[test]
    fn test_rollback_candidates_use_deploy_acknowledgement() {
        let mut tx = DeploymentTransaction::new(
            "mypkg",
            "2.0.0",
            PipelineKind::Parallel,
            vec!["npm".to_string(), "pypi".to_string(), "cargo".to_string()],
        );
        // npm deployed then failed verify: still a candidate
        {
            let p = tx.platforms.get_mut("npm").unwrap();
            p.completed_at = Some(chrono::Utc::now());
            p.state = PlatformState::Failed;
        }
        // pypi deployed cleanly
        {
            let p = tx.platforms.get_mut("pypi").unwrap();
            p.completed_at = Some(chrono::Utc::now());
            p.state = PlatformState::Completed;
        }
        // cargo never deployed

        assert_eq!(
            RollbackEngine::rollback_candidates(&tx),
            vec!["npm".to_string(), "pypi".to_string()]
        );
    }

    #[tokio::test]
    async fn test_rollback_rejected_for_in_progress_deployment() {
        let (_dir, engine, store) = engine();
        let tx = DeploymentTransaction::new(
            "mypkg",
            "2.0.0",
            PipelineKind::Standard,
            vec!["npm".to_string()],
        );
        store.create_deployment(&tx).await.unwrap();

        let options = RollbackOptions {
            targets: None,
            reason: RollbackReason::ManualTrigger,
            automated: true,
            confirm_override: false,
        };
        assert!(engine.run(&tx.id, &options).await.is_err());
    }

    #[tokio::test]
    async fn test_rollback_with_nothing_deployed_is_an_error() {
        let (_dir, engine, store) = engine();
        let deployment = failed_deployment(&store, &["npm"], &[]).await;

        let options = RollbackOptions {
            targets: None,
            reason: RollbackReason::StageFailed,
            automated: true,
            confirm_override: false,
        };
        assert!(engine.run(&deployment.id, &options).await.is_err());
    }

    #[tokio::test]
    async fn test_capability_none_is_skipped_and_backlink_set() {
        let (_dir, engine, store) = engine();
        // maven acknowledged its deploy, but Maven Central cannot roll back
        let deployment = failed_deployment(&store, &["maven"], &["maven"]).await;

        let options = RollbackOptions {
            targets: None,
            reason: RollbackReason::ManualTrigger,
            automated: true,
            confirm_override: false,
        };
        let rollback = engine.run(&deployment.id, &options).await.unwrap();

        assert_eq!(rollback.platforms["maven"].state, PlatformState::Skipped);
        // nothing was attempted, so the rollback itself completed
        assert_eq!(rollback.status, TransactionStatus::Completed);

        let deployment = store.get_deployment(&deployment.id).unwrap();
        assert_eq!(
            deployment.rollback_transaction_id.as_deref(),
            Some(rollback.id.as_str())
        );
        // no platform actually rolled back, the deployment stays failed
        assert_eq!(deployment.status, TransactionStatus::Failed);
    }
}
