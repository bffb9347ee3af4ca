//! Deployment and rollback transaction records.
//!
//! A transaction is the durable record of one deploy or one rollback
//! attempt. It is created when the pipeline starts and updated until it
//! reaches a terminal status, after which only reads are permitted. All
//! mutation goes through the transaction store, which serializes writes
//! per id; nothing else holds a record for longer than one update.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Pipeline topology for a deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineKind {
    /// Targets deploy sequentially
    Standard,
    /// Targets deploy concurrently under a bounded worker count
    Parallel,
    /// Staging set deploys and verifies before the production set starts
    Staged,
}

impl FromStr for PipelineKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "standard" => Ok(Self::Standard),
            "parallel" => Ok(Self::Parallel),
            "staged" => Ok(Self::Staged),
            other => Err(format!(
                "Unknown pipeline '{}'. Expected standard, parallel or staged",
                other
            )),
        }
    }
}

impl fmt::Display for PipelineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Standard => "standard",
            Self::Parallel => "parallel",
            Self::Staged => "staged",
        };
        write!(f, "{}", s)
    }
}

/// Transaction status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    InProgress,
    Completed,
    Failed,
    Cancelled,
    RolledBack,
}

impl TransactionStatus {
    /// Terminal statuses freeze the record; only reads are allowed after.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::InProgress)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::RolledBack => "rolled_back",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Named stages. The first five belong to deployment pipelines, in
/// execution order; the last three are the rollback engine's phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Validation,
    PreDeploy,
    Deploy,
    PostDeploy,
    Verify,
    Snapshot,
    Rollback,
    Recovery,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::PreDeploy => "pre_deploy",
            Self::Deploy => "deploy",
            Self::PostDeploy => "post_deploy",
            Self::Verify => "verify",
            Self::Snapshot => "snapshot",
            Self::Rollback => "rollback",
            Self::Recovery => "recovery",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// State of one stage log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageState {
    Started,
    Completed,
    Failed,
    Skipped,
}

impl fmt::Display for StageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Started => "started",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        write!(f, "{}", s)
    }
}

/// One append-only stage log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageEntry {
    pub stage: Stage,
    pub state: StageState,
    pub ts: DateTime<Utc>,
}

/// Per-platform deployment state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlatformState {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
    Retrying,
}

impl PlatformState {
    /// States that count as "done" for terminal-status accounting.
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}

impl fmt::Display for PlatformState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Retrying => "retrying",
        };
        write!(f, "{}", s)
    }
}

/// Status block for a single target platform inside a transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformStatus {
    pub state: PlatformState,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Rollback method that ended up being used (rollback transactions)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method_used: Option<String>,

    /// Registry-reported version before a rollback command ran.
    /// Frozen at capture time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_version: Option<String>,
}

impl PlatformStatus {
    pub fn pending() -> Self {
        Self {
            state: PlatformState::Pending,
            completed_at: None,
            error_message: None,
            method_used: None,
            previous_version: None,
        }
    }
}

/// Partial update merged into a platform's status block.
///
/// `None` fields leave the stored value untouched, so two concurrent
/// updates never produce a half-written block: the store applies each
/// patch whole under the per-id lock.
#[derive(Debug, Clone, Default)]
pub struct PlatformPatch {
    pub state: Option<PlatformState>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub method_used: Option<String>,
    pub previous_version: Option<String>,
}

impl PlatformPatch {
    pub fn state(state: PlatformState) -> Self {
        Self {
            state: Some(state),
            ..Default::default()
        }
    }

    pub fn completed(now: DateTime<Utc>) -> Self {
        Self {
            state: Some(PlatformState::Completed),
            completed_at: Some(now),
            ..Default::default()
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            state: Some(PlatformState::Failed),
            error_message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn apply_to(&self, status: &mut PlatformStatus) {
        if let Some(state) = self.state {
            status.state = state;
        }
        if let Some(ts) = self.completed_at {
            status.completed_at = Some(ts);
        }
        if let Some(msg) = &self.error_message {
            status.error_message = Some(msg.clone());
        }
        if let Some(method) = &self.method_used {
            status.method_used = Some(method.clone());
        }
        if let Some(prev) = &self.previous_version {
            status.previous_version = Some(prev.clone());
        }
    }
}

/// Why a rollback transaction was opened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackReason {
    ManualTrigger,
    PostDeployVerificationFailed,
    StageFailed,
    OperatorDecision,
}

impl fmt::Display for RollbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ManualTrigger => "manual_trigger",
            Self::PostDeployVerificationFailed => "post_deploy_verification_failed",
            Self::StageFailed => "stage_failed",
            Self::OperatorDecision => "operator_decision",
        };
        write!(f, "{}", s)
    }
}

/// Durable record of one deployment attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentTransaction {
    /// Unique, time-ordered id (`dep-{yyyymmddHHMMSS}-{8 hex}`)
    pub id: String,

    /// Source tree identifier
    pub package: String,

    /// Requested version; empty until resolved from the manifest
    #[serde(default)]
    pub version: String,

    pub pipeline: PipelineKind,

    /// Ordered set of platform names
    pub targets: Vec<String>,

    pub started_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    pub status: TransactionStatus,

    /// Append-only stage log
    #[serde(default)]
    pub stages: Vec<StageEntry>,

    /// Per-platform status, one entry per target
    #[serde(default)]
    pub platforms: BTreeMap<String, PlatformStatus>,

    /// Free-form diagnostic lines
    #[serde(default)]
    pub errors: Vec<String>,

    /// Back-link set when a rollback transaction is opened for this deploy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_transaction_id: Option<String>,
}

impl DeploymentTransaction {
    /// Build a fresh in-progress record. Every target gets a pending
    /// platform entry up front so invariant 2 holds from creation.
    pub fn new(
        package: impl Into<String>,
        version: impl Into<String>,
        pipeline: PipelineKind,
        targets: Vec<String>,
    ) -> Self {
        let started_at = Utc::now();
        let platforms = targets
            .iter()
            .map(|t| (t.clone(), PlatformStatus::pending()))
            .collect();

        Self {
            id: new_id("dep", started_at),
            package: package.into(),
            version: version.into(),
            pipeline,
            targets,
            started_at,
            completed_at: None,
            status: TransactionStatus::InProgress,
            stages: Vec::new(),
            platforms,
            errors: Vec::new(),
            rollback_transaction_id: None,
        }
    }

    /// Platforms whose deploy completed (candidates for rollback)
    pub fn completed_platforms(&self) -> Vec<String> {
        self.targets
            .iter()
            .filter(|t| {
                self.platforms
                    .get(*t)
                    .map(|p| p.state == PlatformState::Completed)
                    .unwrap_or(false)
            })
            .cloned()
            .collect()
    }

    /// True when every target's platform entry reached a settled state
    pub fn all_platforms_settled(&self) -> bool {
        self.targets.iter().all(|t| {
            self.platforms
                .get(t)
                .map(|p| p.state.is_settled())
                .unwrap_or(false)
        })
    }

    /// True when any platform failed
    pub fn any_platform_failed(&self) -> bool {
        self.platforms
            .values()
            .any(|p| p.state == PlatformState::Failed)
    }
}

/// Durable record of one rollback attempt
///
/// Mirrors the deployment record, plus a forward link to the deployment
/// and before/after registry snapshots for auditability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackTransaction {
    pub id: String,

    /// Forward link to the deployment being rolled back
    pub deployment_id: String,

    pub reason: RollbackReason,

    pub package: String,

    #[serde(default)]
    pub version: String,

    pub targets: Vec<String>,

    pub started_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    pub status: TransactionStatus,

    #[serde(default)]
    pub stages: Vec<StageEntry>,

    #[serde(default)]
    pub platforms: BTreeMap<String, PlatformStatus>,

    #[serde(default)]
    pub errors: Vec<String>,

    /// Registry metadata per platform, captured before rollback ran
    #[serde(default)]
    pub state_before: BTreeMap<String, serde_json::Value>,

    /// Registry metadata per platform, captured after rollback finished
    #[serde(default)]
    pub state_after: BTreeMap<String, serde_json::Value>,
}

impl RollbackTransaction {
    pub fn new(
        deployment: &DeploymentTransaction,
        reason: RollbackReason,
        targets: Vec<String>,
    ) -> Self {
        let started_at = Utc::now();
        let platforms = targets
            .iter()
            .map(|t| (t.clone(), PlatformStatus::pending()))
            .collect();

        Self {
            id: new_id("rb", started_at),
            deployment_id: deployment.id.clone(),
            reason,
            package: deployment.package.clone(),
            version: deployment.version.clone(),
            targets,
            started_at,
            completed_at: None,
            status: TransactionStatus::InProgress,
            stages: Vec::new(),
            platforms,
            errors: Vec::new(),
            state_before: BTreeMap::new(),
            state_after: BTreeMap::new(),
        }
    }
}

/// Generate a time-ordered transaction id.
///
/// Timestamp prefix keeps directory listings and `ListRecent` ordering
/// cheap; the uuid suffix breaks same-second collisions.
fn new_id(prefix: &str, ts: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}-{}", prefix, ts.format("%Y%m%d%H%M%S"), &suffix[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_transaction_has_pending_entry_per_target() {
        let tx = DeploymentTransaction::new(
            "mypkg",
            "1.2.3",
            PipelineKind::Parallel,
            vec!["npm".to_string(), "pypi".to_string()],
        );

        assert_eq!(tx.status, TransactionStatus::InProgress);
        assert_eq!(tx.platforms.len(), 2);
        assert!(tx
            .platforms
            .values()
            .all(|p| p.state == PlatformState::Pending));
        assert!(tx.id.starts_with("dep-"));
    }

    #[test]
    fn test_platform_patch_merges_whole_fields() {
        let mut status = PlatformStatus::pending();

        PlatformPatch::state(PlatformState::Running).apply_to(&mut status);
        assert_eq!(status.state, PlatformState::Running);
        assert!(status.error_message.is_none());

        PlatformPatch::failed("registry said no").apply_to(&mut status);
        assert_eq!(status.state, PlatformState::Failed);
        assert_eq!(status.error_message.as_deref(), Some("registry said no"));
    }

    #[test]
    fn test_completed_platforms() {
        let mut tx = DeploymentTransaction::new(
            "mypkg",
            "1.0.0",
            PipelineKind::Standard,
            vec!["npm".to_string(), "cargo".to_string()],
        );
        PlatformPatch::completed(Utc::now()).apply_to(tx.platforms.get_mut("npm").unwrap());
        PlatformPatch::failed("boom").apply_to(tx.platforms.get_mut("cargo").unwrap());

        assert_eq!(tx.completed_platforms(), vec!["npm".to_string()]);
        assert!(tx.any_platform_failed());
        assert!(tx.all_platforms_settled());
    }

    #[test]
    fn test_ids_are_time_ordered() {
        let early = new_id("dep", Utc::now());
        let late = new_id("dep", Utc::now() + chrono::Duration::seconds(2));
        assert!(late > early);
    }

    #[test]
    fn test_status_round_trips_snake_case() {
        let json = serde_json::to_string(&TransactionStatus::RolledBack).unwrap();
        assert_eq!(json, "\"rolled_back\"");
        let back: TransactionStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, TransactionStatus::RolledBack);
    }

    #[test]
    fn test_pipeline_kind_from_str() {
        assert_eq!(
            "parallel".parse::<PipelineKind>().unwrap(),
            PipelineKind::Parallel
        );
        assert!("rolling".parse::<PipelineKind>().is_err());
    }
}
