//! Pipeline executor.
//!
//! Drives a deployment through `validation → pre_deploy → deploy* →
//! post_deploy → verify` under one of three topologies:
//!
//! - **standard**: targets deploy sequentially; later targets still run
//!   after a failure (the operator sees the whole picture) unless
//!   `--fail-fast` is set
//! - **parallel**: targets fan out under a bounded worker count
//! - **staged**: the staging set deploys and passes its verify gate
//!   before any production target starts
//!
//! The transaction store is the only shared mutable state; workers hold
//! the transaction id and write through the store's serialized
//! primitives. Cancellation is cooperative: workers poll the intent
//! marker at suspension points, an in-flight deploy always completes.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::config::OrchestratorConfig;
use crate::domain::{
    DeploymentTransaction, PipelineKind, PlatformPatch, PlatformState, Stage, StageState,
    TransactionStatus,
};
use crate::infrastructure::{
    CredentialResolver, MetadataClient, NotificationPayload, Notifier, PlatformRegistry,
    TransactionStore,
};
use crate::services::adapter::{
    build_adapter, ArtifactDescriptor, DeployOutcome, PlatformAdapter, VerifyOutcome,
};
use crate::services::retry::BackoffSchedule;
use crate::services::validator;

/// One deployment request
#[derive(Debug, Clone)]
pub struct DeployRequest {
    pub package: String,
    /// Empty means "resolve from the manifest"
    pub version: Option<String>,
    pub targets: Vec<String>,
    pub pipeline: PipelineKind,
    pub tree: PathBuf,
    pub fail_fast: bool,
    /// None defers to policy (on iff any target can roll back)
    pub auto_rollback: Option<bool>,
    pub strict_health: bool,
    pub max_parallel: Option<usize>,
}

/// Executes deployment pipelines against the transaction store
pub struct PipelineExecutor {
    store: Arc<TransactionStore>,
    registry: Arc<PlatformRegistry>,
    config: OrchestratorConfig,
    metadata: Arc<MetadataClient>,
    notifier: Arc<Notifier>,
    resolver: Arc<dyn CredentialResolver>,
}

/// Everything a deploy worker needs for one target
struct TargetContext {
    store: Arc<TransactionStore>,
    adapter: Arc<dyn PlatformAdapter>,
    id: String,
    target: String,
    tree: PathBuf,
    version: String,
    schedule: BackoffSchedule,
}

impl PipelineExecutor {
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

    /// Post-failure policy: auto-rollback defaults on for pipelines that
    /// touched at least one platform able to roll back.
    pub fn should_auto_rollback(&self, request: &DeployRequest) -> bool {
        if let Some(explicit) = request.auto_rollback {
            return explicit;
        }
        if !self.config.auto_rollback {
            return false;
        }
        request.targets.iter().any(|t| {
            self.registry
                .get(t)
                .map(|d| d.supports_rollback())
                .unwrap_or(false)
        })
    }

    /// Run one deployment to a terminal status and return the final
    /// record. Infrastructure failures (store I/O) surface as errors;
    /// deploy failures land in the record itself.
    pub async fn run(&self, request: &DeployRequest) -> Result<DeploymentTransaction> {
        let tx = DeploymentTransaction::new(
            &request.package,
            request.version.clone().unwrap_or_default(),
            request.pipeline,
            request.targets.clone(),
        );
        let id = tx.id.clone();
        self.store.create_deployment(&tx).await?;
        self.store.append_log(
            &id,
            &format!(
                "deploy {} targets={} pipeline={}",
                request.package,
                request.targets.join(","),
                request.pipeline
            ),
        );

        let outcome = self.drive(&id, request).await;

        match outcome {
            Ok(()) => {}
            Err(e) => {
                // Defensive terminal transition so no record is left
                // in_progress on an internal error.
                self.store.append_error(&id, e.to_string()).await.ok();
                self.store
                    .finalize(&id, TransactionStatus::Failed)
                    .await
                    .ok();
            }
        }

        let final_tx = self.store.get_deployment(&id)?;
        self.notifier
            .notify(NotificationPayload::for_deployment(&final_tx))
            .await;
        Ok(final_tx)
    }

    /// The stage machine. Every early return has already finalized the
    /// transaction.
    async fn drive(&self, id: &str, request: &DeployRequest) -> Result<()> {
        // ─── Init adapters ─────────────────────────────────────────────
        let adapters = match self.init_adapters(id, request).await? {
            Some(adapters) => adapters,
            None => return Ok(()), // finalized failed
        };

        // ─── Stage: validation ─────────────────────────────────────────
        self.stage(id, Stage::Validation, StageState::Started).await?;
        let report = validator::validate(
            &request.tree,
            &request.package,
            &request.targets,
            &adapters,
            &self.registry,
            &self.metadata,
            &self.config,
            request.strict_health || self.config.strict_health,
        )
        .await;

        for warning in report.warnings() {
            let line = format!(
                "validation warning [{}]: {}",
                warning.name,
                warning.detail.clone().unwrap_or_default()
            );
            tracing::warn!(id = %id, "{}", line);
            self.store.append_log(id, &line);
        }

        if !report.passed() {
            let message = match report.first_failure() {
                Some(failure) => format!(
                    "validation failed [{}{}]: {}",
                    failure.name,
                    failure
                        .platform
                        .as_ref()
                        .map(|p| format!(" on {}", p))
                        .unwrap_or_default(),
                    failure.detail.clone().unwrap_or_default()
                ),
                None => "validation failed".to_string(),
            };
            self.store.append_error(id, message.clone()).await?;
            self.store.append_log(id, &message);
            self.stage(id, Stage::Validation, StageState::Failed).await?;
            self.store.finalize(id, TransactionStatus::Failed).await?;
            return Ok(());
        }
        self.stage(id, Stage::Validation, StageState::Completed).await?;

        // ─── Stage: pre_deploy (version resolution, sequential) ────────
        self.stage(id, Stage::PreDeploy, StageState::Started).await?;
        let version = match self.resolve_versions(id, request, &adapters).await? {
            Some(version) => version,
            None => return Ok(()), // finalized failed
        };
        self.stage(id, Stage::PreDeploy, StageState::Completed).await?;

        if self.check_cancel(id, &request.targets).await? {
            return Ok(());
        }

        // ─── Stage: deploy* ────────────────────────────────────────────
        self.stage(id, Stage::Deploy, StageState::Started).await?;
        let cancelled = match request.pipeline {
            PipelineKind::Standard => {
                self.deploy_standard(id, request, &adapters, &version).await?
            }
            PipelineKind::Parallel => {
                self.deploy_parallel(id, request, &adapters, &version, &request.targets)
                    .await?
            }
            PipelineKind::Staged => {
                self.deploy_staged(id, request, &adapters, &version).await?
            }
        };

        if cancelled {
            self.stage(id, Stage::Deploy, StageState::Completed).await?;
            self.store.finalize(id, TransactionStatus::Cancelled).await?;
            return Ok(());
        }

        let after_deploy = self.store.get_deployment(id)?;
        if after_deploy.any_platform_failed() {
            self.stage(id, Stage::Deploy, StageState::Failed).await?;
            self.store.finalize(id, TransactionStatus::Failed).await?;
            return Ok(());
        }
        self.stage(id, Stage::Deploy, StageState::Completed).await?;

        // ─── Stage: post_deploy ────────────────────────────────────────
        self.stage(id, Stage::PostDeploy, StageState::Started).await?;
        for (platform, status) in &after_deploy.platforms {
            self.store.append_log(
                id,
                &format!("post_deploy: {} state={}", platform, status.state),
            );
        }
        self.stage(id, Stage::PostDeploy, StageState::Completed).await?;

        if self.check_cancel(id, &request.targets).await? {
            return Ok(());
        }

        // ─── Stage: verify ─────────────────────────────────────────────
        self.stage(id, Stage::Verify, StageState::Started).await?;
        let verified = self
            .verify_targets(id, request, &adapters, &version, &request.targets)
            .await?;

        if verified {
            self.stage(id, Stage::Verify, StageState::Completed).await?;
            self.store.finalize(id, TransactionStatus::Completed).await?;
        } else {
            self.stage(id, Stage::Verify, StageState::Failed).await?;
            self.store.finalize(id, TransactionStatus::Failed).await?;
        }
        Ok(())
    }

    /// Init every target's adapter; a failure records the configuration
    /// error and finalizes the transaction as failed.
    async fn init_adapters(
        &self,
        id: &str,
        request: &DeployRequest,
    ) -> Result<Option<BTreeMap<String, Arc<dyn PlatformAdapter>>>> {
        let mut adapters: BTreeMap<String, Arc<dyn PlatformAdapter>> = BTreeMap::new();

        for target in &request.targets {
            let descriptor = self.registry.get(target).context("unknown target")?;
            let credential = match self.resolver.resolve(descriptor) {
                Ok(credential) => credential,
                Err(e) => {
                    return self.abort_init(id, target, e.to_string()).await;
                }
            };

            let adapter: Arc<dyn PlatformAdapter> = Arc::from(build_adapter(
                descriptor,
                &request.package,
                credential,
                &self.config,
                self.metadata.clone(),
            ));

            if let Err(e) = adapter.init().await {
                return self.abort_init(id, target, e.to_string()).await;
            }
            adapters.insert(target.clone(), adapter);
        }

        Ok(Some(adapters))
    }

    async fn abort_init<T>(
        &self,
        id: &str,
        target: &str,
        message: String,
    ) -> Result<Option<T>> {
        let line = format!("init failed for {}: {}", target, message);
        tracing::error!(id = %id, "{}", line);
        self.store.append_error(id, line.clone()).await?;
        self.store.append_log(id, &line);
        self.store
            .update_platform(id, target, PlatformPatch::failed(message))
            .await?;
        self.store.finalize(id, TransactionStatus::Failed).await?;
        Ok(None)
    }

    /// Sequential version resolution; manifests mutate here, before any
    /// fan-out, and are read-only afterwards. The first resolved version
    /// is imposed on every later target.
    async fn resolve_versions(
        &self,
        id: &str,
        request: &DeployRequest,
        adapters: &BTreeMap<String, Arc<dyn PlatformAdapter>>,
    ) -> Result<Option<String>> {
        let mut resolved = request.version.clone().filter(|v| !v.is_empty());

        for target in &request.targets {
            let adapter = &adapters[target];
            match adapter.validate(&request.tree, resolved.as_deref()).await {
                Ok(version) => {
                    if resolved.is_none() {
                        self.store.append_log(
                            id,
                            &format!("pre_deploy: {} resolved version {}", target, version),
                        );
                        resolved = Some(version);
                    }
                }
                Err(e) => {
                    let message = format!("pre_deploy failed for {}: {}", target, e);
                    self.store.append_error(id, message.clone()).await?;
                    self.store.append_log(id, &message);
                    self.store
                        .update_platform(id, target, PlatformPatch::failed(e.to_string()))
                        .await?;
                    self.stage(id, Stage::PreDeploy, StageState::Failed).await?;
                    self.store.finalize(id, TransactionStatus::Failed).await?;
                    return Ok(None);
                }
            }
        }

        let version = resolved.context("no target resolved a version")?;
        self.store.set_version(id, &version).await?;
        Ok(Some(version))
    }

    fn target_context(
        &self,
        id: &str,
        target: &str,
        request: &DeployRequest,
        adapters: &BTreeMap<String, Arc<dyn PlatformAdapter>>,
        version: &str,
    ) -> Arc<TargetContext> {
        Arc::new(TargetContext {
            store: self.store.clone(),
            adapter: adapters[target].clone(),
            id: id.to_string(),
            target: target.to_string(),
            tree: request.tree.clone(),
            version: version.to_string(),
            schedule: BackoffSchedule::default(),
        })
    }

    /// Standard topology: sequential; failures do not stop later targets
    /// unless fail-fast is set. Returns true when cancellation ended the
    /// loop.
    async fn deploy_standard(
        &self,
        id: &str,
        request: &DeployRequest,
        adapters: &BTreeMap<String, Arc<dyn PlatformAdapter>>,
        version: &str,
    ) -> Result<bool> {
        let mut failed = false;

        for (index, target) in request.targets.iter().enumerate() {
            if self.store.cancel_requested(id) {
                self.skip_targets(id, &request.targets[index..], "cancelled before start")
                    .await?;
                return Ok(true);
            }
            if failed && request.fail_fast {
                self.skip_targets(id, &request.targets[index..], "skipped by fail-fast")
                    .await?;
                break;
            }

            let ctx = self.target_context(id, target, request, adapters, version);
            let state = deploy_target(ctx).await?;
            if state == PlatformState::Failed {
                failed = true;
            }
        }
        Ok(false)
    }

    /// Parallel topology: bounded fan-out. At most N workers are
    /// build/deploy-active at once; queued targets observe cancellation
    /// before starting.
    async fn deploy_parallel(
        &self,
        id: &str,
        request: &DeployRequest,
        adapters: &BTreeMap<String, Arc<dyn PlatformAdapter>>,
        version: &str,
        targets: &[String],
    ) -> Result<bool> {
        let bound = request
            .max_parallel
            .unwrap_or(self.config.max_parallel)
            .max(1);
        let semaphore = Arc::new(Semaphore::new(bound));
        let mut join_set = JoinSet::new();

        for target in targets {
            let ctx = self.target_context(id, target, request, adapters, version);
            let semaphore = semaphore.clone();
            join_set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
                // Queued targets that see the cancel intent never start.
                if ctx.store.cancel_requested(&ctx.id) {
                    ctx.store
                        .update_platform(
                            &ctx.id,
                            &ctx.target,
                            PlatformPatch::state(PlatformState::Skipped),
                        )
                        .await?;
                    ctx.store
                        .append_log(&ctx.id, &format!("{}: skipped (cancelled)", ctx.target));
                    return Ok::<_, anyhow::Error>(PlatformState::Skipped);
                }
                deploy_target(ctx).await
            });
        }

        while let Some(result) = join_set.join_next().await {
            result.context("deploy worker panicked")??;
        }

        Ok(self.store.cancel_requested(id))
    }

    /// Staged topology: staging set deploys and passes its verify gate
    /// inside the deploy stage; production starts only after the gate.
    /// A production failure never retries staging.
    async fn deploy_staged(
        &self,
        id: &str,
        request: &DeployRequest,
        adapters: &BTreeMap<String, Arc<dyn PlatformAdapter>>,
        version: &str,
    ) -> Result<bool> {
        let (staging, production) = self.config.split_staged(&request.targets);
        self.store.append_log(
            id,
            &format!(
                "staged: staging=[{}] production=[{}]",
                staging.join(","),
                production.join(",")
            ),
        );

        if !staging.is_empty() {
            let cancelled = self
                .deploy_parallel(id, request, adapters, version, &staging)
                .await?;
            if cancelled {
                self.skip_targets(id, &production, "cancelled before start").await?;
                return Ok(true);
            }

            let tx = self.store.get_deployment(id)?;
            if tx.any_platform_failed() {
                self.skip_targets(id, &production, "staging failed").await?;
                return Ok(false);
            }

            // Staging verify gate; production waits on it.
            let gate_ok = self
                .verify_targets(id, request, &adapters_subset(adapters, &staging), version, &staging)
                .await?;
            if !gate_ok {
                self.skip_targets(id, &production, "staging verify gate failed")
                    .await?;
                return Ok(false);
            }
            self.store.append_log(id, "staged: staging verify gate passed");
        }

        if self.store.cancel_requested(id) {
            self.skip_targets(id, &production, "cancelled before start").await?;
            return Ok(true);
        }

        self.deploy_parallel(id, request, adapters, version, &production)
            .await
    }

    async fn skip_targets(
        &self,
        id: &str,
        targets: &[String],
        reason: &str,
    ) -> Result<()> {
        for target in targets {
            let tx = self.store.get_deployment(id)?;
            let state = tx.platforms.get(target).map(|p| p.state);
            if state == Some(PlatformState::Pending) {
                self.store
                    .update_platform(id, target, PlatformPatch::state(PlatformState::Skipped))
                    .await?;
                self.store
                    .append_log(id, &format!("{}: skipped ({})", target, reason));
            }
        }
        Ok(())
    }

    /// Poll every completed target's metadata endpoint under the verify
    /// backoff until present or the hard cap. Returns overall success.
    async fn verify_targets(
        &self,
        id: &str,
        request: &DeployRequest,
        adapters: &BTreeMap<String, Arc<dyn PlatformAdapter>>,
        version: &str,
        targets: &[String],
    ) -> Result<bool> {
        let mut all_ok = true;

        let mut join_set = JoinSet::new();
        for target in targets {
            let tx = self.store.get_deployment(id)?;
            let state = tx.platforms.get(target).map(|p| p.state);
            if state != Some(PlatformState::Completed) {
                continue; // skipped or failed targets have nothing to verify
            }

            let ctx = self.target_context(id, target, request, adapters, version);
            let cap = self.config.verify_cap();
            let probe_timeout = self.config.verify_timeout();
            let package = request.package.clone();
            join_set
                .spawn(async move { verify_target(ctx, &package, cap, probe_timeout).await });
        }

        while let Some(result) = join_set.join_next().await {
            let ok = result.context("verify worker panicked")??;
            all_ok &= ok;
        }
        Ok(all_ok)
    }

    /// Cooperative cancel check between stages. Marks pending targets
    /// skipped and finalizes as cancelled when intent is set.
    async fn check_cancel(&self, id: &str, targets: &[String]) -> Result<bool> {
        if !self.store.cancel_requested(id) {
            return Ok(false);
        }
        self.skip_targets(id, targets, "cancelled before start").await?;
        self.store.finalize(id, TransactionStatus::Cancelled).await?;
        self.store.append_log(id, "cancelled by operator request");
        Ok(true)
    }

    async fn stage(&self, id: &str, stage: Stage, state: StageState) -> Result<()> {
        self.store.append_stage(id, stage, state).await?;
        self.store
            .append_log(id, &format!("stage {} {}", stage, state));
        Ok(())
    }
}

fn adapters_subset(
    adapters: &BTreeMap<String, Arc<dyn PlatformAdapter>>,
    targets: &[String],
) -> BTreeMap<String, Arc<dyn PlatformAdapter>> {
    adapters
        .iter()
        .filter(|(name, _)| targets.contains(name))
        .map(|(name, adapter)| (name.clone(), adapter.clone()))
        .collect()
}

/// One target's Build + Deploy, with the transient retry schedule.
/// Returns the platform's settled state.
async fn deploy_target(ctx: Arc<TargetContext>) -> Result<PlatformState> {
    let TargetContext {
        store,
        adapter,
        id,
        target,
        tree,
        version,
        schedule,
    } = &*ctx;

    store
        .update_platform(id, target, PlatformPatch::state(PlatformState::Running))
        .await?;
    store.append_log(id, &format!("{}: build started", target));

    let artifact: ArtifactDescriptor = match adapter.build(tree, version).await {
        Ok(artifact) => artifact,
        Err(e) => {
            store.append_log(id, &format!("{}: build failed: {}", target, e));
            store.append_error(id, format!("{}: {}", target, e)).await?;
            store
                .update_platform(id, target, PlatformPatch::failed(e.to_string()))
                .await?;
            return Ok(PlatformState::Failed);
        }
    };
    for (path, checksum) in &artifact.checksums {
        store.append_log(id, &format!("{}: artifact {} {}", target, path, checksum));
    }

    let mut attempts: u32 = 0;
    loop {
        attempts += 1;
        let outcome = match adapter.deploy(tree, &artifact).await {
            Ok(outcome) => outcome,
            Err(e) => {
                store.append_error(id, format!("{}: {}", target, e)).await?;
                store
                    .update_platform(id, target, PlatformPatch::failed(e.to_string()))
                    .await?;
                return Ok(PlatformState::Failed);
            }
        };

        match outcome {
            DeployOutcome::Completed { location } => {
                store.append_log(id, &format!("{}: deployed to {}", target, location));
                store
                    .update_platform(id, target, PlatformPatch::completed(chrono::Utc::now()))
                    .await?;
                return Ok(PlatformState::Completed);
            }
            DeployOutcome::Transient { message } if schedule.should_retry(attempts) => {
                let delay = schedule.delay(attempts);
                store.append_log(
                    id,
                    &format!(
                        "{}: transient failure (attempt {}/{}), retrying in {:?}: {}",
                        target, attempts, schedule.max_attempts, delay, message
                    ),
                );
                store
                    .update_platform(id, target, PlatformPatch::state(PlatformState::Retrying))
                    .await?;
                tokio::time::sleep(delay).await;
                // Cancellation observed at the backoff suspension point;
                // the attempt already made is not rolled back here.
                if store.cancel_requested(id) {
                    store
                        .update_platform(
                            id,
                            target,
                            PlatformPatch::failed(format!(
                                "cancelled during retry backoff: {}",
                                message
                            )),
                        )
                        .await?;
                    return Ok(PlatformState::Failed);
                }
                store
                    .update_platform(id, target, PlatformPatch::state(PlatformState::Running))
                    .await?;
            }
            DeployOutcome::Transient { message } => {
                let message = format!(
                    "transient failure persisted after {} attempts: {}",
                    attempts, message
                );
                store.append_error(id, format!("{}: {}", target, message)).await?;
                store
                    .update_platform(id, target, PlatformPatch::failed(message))
                    .await?;
                return Ok(PlatformState::Failed);
            }
            DeployOutcome::Conflict { message } => {
                let message = format!("version already published: {}", message);
                store.append_error(id, format!("{}: {}", target, message)).await?;
                store
                    .update_platform(id, target, PlatformPatch::failed(message))
                    .await?;
                return Ok(PlatformState::Failed);
            }
            DeployOutcome::Rejected { message } => {
                store.append_error(id, format!("{}: rejected: {}", target, message)).await?;
                store
                    .update_platform(id, target, PlatformPatch::failed(message))
                    .await?;
                return Ok(PlatformState::Failed);
            }
        }
    }
}

/// Poll one target's registry metadata until the release is visible.
/// `NotFound` within the cap is propagation delay; past the cap it is a
/// verification failure. Returns whether the target verified.
async fn verify_target(
    ctx: Arc<TargetContext>,
    package: &str,
    cap: std::time::Duration,
    probe_timeout: std::time::Duration,
) -> Result<bool> {
    let TargetContext {
        store,
        adapter,
        id,
        target,
        version,
        schedule,
        ..
    } = &*ctx;

    let started = Instant::now();
    let mut attempt: u32 = 0;

    loop {
        // A probe that exceeds its own timeout counts as "not yet".
        let probe = tokio::time::timeout(probe_timeout, adapter.verify(package, version)).await;
        match probe {
            Ok(Ok(VerifyOutcome::Present { .. })) => {
                store.append_log(id, &format!("{}: verified {}@{}", target, package, version));
                return Ok(true);
            }
            Ok(Ok(VerifyOutcome::Mismatch { message })) => {
                store.append_error(id, format!("{}: verify mismatch: {}", target, message)).await?;
                store
                    .update_platform(id, target, PlatformPatch::failed(message))
                    .await?;
                return Ok(false);
            }
            Ok(Ok(VerifyOutcome::NotFound)) | Ok(Err(_)) | Err(_) => {
                if started.elapsed() >= cap {
                    let message = format!(
                        "release not visible on registry after {:?} (propagation cap exceeded)",
                        cap
                    );
                    store.append_error(id, format!("{}: {}", target, message)).await?;
                    store
                        .update_platform(id, target, PlatformPatch::failed(message))
                        .await?;
                    return Ok(false);
                }
                attempt += 1;
                let delay = schedule.delay(attempt).max(schedule.initial);
                store.append_log(
                    id,
                    &format!(
                        "{}: not visible yet, polling again in {:?}",
                        target, delay
                    ),
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::EnvCredentialResolver;

    fn executor_with(config: OrchestratorConfig) -> (tempfile::TempDir, PipelineExecutor) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(TransactionStore::open(dir.path()).unwrap());
        let registry = Arc::new(PlatformRegistry::load(dir.path()).unwrap());
        let metadata =
            Arc::new(MetadataClient::new(std::time::Duration::from_secs(5)).unwrap());
        let executor = PipelineExecutor::new(
            store,
            registry,
            config,
            metadata,
            Arc::new(Notifier::from_env()),
            Arc::new(EnvCredentialResolver),
        );
        (dir, executor)
    }

    fn request(targets: &[&str]) -> DeployRequest {
        DeployRequest {
            package: "mypkg".to_string(),
            version: Some("1.0.0".to_string()),
            targets: targets.iter().map(|s| s.to_string()).collect(),
            pipeline: PipelineKind::Standard,
            tree: PathBuf::from("."),
            fail_fast: false,
            auto_rollback: None,
            strict_health: false,
            max_parallel: None,
        }
    }

    #[test]
    fn test_auto_rollback_policy_defaults() {
        let (_dir, executor) = executor_with(OrchestratorConfig::default());

        // npm supports rollback -> policy on
        assert!(executor.should_auto_rollback(&request(&["npm"])));
        // maven is rollback-incapable -> policy off
        assert!(!executor.should_auto_rollback(&request(&["maven"])));
        // explicit flag wins either way
        let mut r = request(&["maven"]);
        r.auto_rollback = Some(true);
        assert!(executor.should_auto_rollback(&r));
        let mut r = request(&["npm"]);
        r.auto_rollback = Some(false);
        assert!(!executor.should_auto_rollback(&r));
    }

    #[tokio::test]
    async fn test_missing_credentials_fail_at_init() {
        std::env::remove_var("NPM_TOKEN");
        let (_dir, executor) = executor_with(OrchestratorConfig::default());

        let result = executor.run(&request(&["npm"])).await.unwrap();
        assert_eq!(result.status, TransactionStatus::Failed);
        assert_eq!(result.platforms["npm"].state, PlatformState::Failed);
        assert!(!result.errors.is_empty());
    }
}
