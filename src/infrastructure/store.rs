//! Durable transaction store.
//!
//! One JSON file per record under `transactions/` (deployments) and
//! `rollbacks/` (rollbacks). Every write goes through a per-id async
//! mutex and lands via temp-file + rename, so concurrent writers to the
//! same id serialize and readers never observe a torn record. Writes to
//! different ids proceed in parallel.
//!
//! The store is the single owner of transaction records; the pipeline,
//! rollback engine and CLI commands hold only ids and mutate through the
//! primitives here.

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use tokio::sync::Mutex as AsyncMutex;

use crate::domain::{
    DeploymentTransaction, PlatformPatch, PlatformStatus, RollbackTransaction, Stage, StageEntry,
    StageState, TransactionStatus,
};
use crate::error::StoreError;

/// Internal record access shared by deployment and rollback transactions.
///
/// Both record shapes carry the same mutable surface (status, stage log,
/// platform map); the store's primitives are written once against this.
trait Record: Serialize + DeserializeOwned {
    fn id(&self) -> &str;
    fn status(&self) -> TransactionStatus;
    fn set_status(&mut self, status: TransactionStatus);
    fn set_completed_at(&mut self, ts: chrono::DateTime<chrono::Utc>);
    fn stages_mut(&mut self) -> &mut Vec<StageEntry>;
    fn platforms_mut(&mut self) -> &mut BTreeMap<String, PlatformStatus>;
    fn errors_mut(&mut self) -> &mut Vec<String>;
}

impl Record for DeploymentTransaction {
    fn id(&self) -> &str {
        &self.id
    }
    fn status(&self) -> TransactionStatus {
        self.status
    }
    fn set_status(&mut self, status: TransactionStatus) {
        self.status = status;
    }
    fn set_completed_at(&mut self, ts: chrono::DateTime<chrono::Utc>) {
        self.completed_at = Some(ts);
    }
    fn stages_mut(&mut self) -> &mut Vec<StageEntry> {
        &mut self.stages
    }
    fn platforms_mut(&mut self) -> &mut BTreeMap<String, PlatformStatus> {
        &mut self.platforms
    }
    fn errors_mut(&mut self) -> &mut Vec<String> {
        &mut self.errors
    }
}

impl Record for RollbackTransaction {
    fn id(&self) -> &str {
        &self.id
    }
    fn status(&self) -> TransactionStatus {
        self.status
    }
    fn set_status(&mut self, status: TransactionStatus) {
        self.status = status;
    }
    fn set_completed_at(&mut self, ts: chrono::DateTime<chrono::Utc>) {
        self.completed_at = Some(ts);
    }
    fn stages_mut(&mut self) -> &mut Vec<StageEntry> {
        &mut self.stages
    }
    fn platforms_mut(&mut self) -> &mut BTreeMap<String, PlatformStatus> {
        &mut self.platforms
    }
    fn errors_mut(&mut self) -> &mut Vec<String> {
        &mut self.errors
    }
}

/// Append-only store keyed by transaction id
pub struct TransactionStore {
    root: PathBuf,
    locks: StdMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl TransactionStore {
    /// Open (and lay out) the store under the given data directory.
    pub fn open(data_dir: &Path) -> Result<Self, StoreError> {
        for sub in ["transactions", "rollbacks", "logs"] {
            let dir = data_dir.join(sub);
            std::fs::create_dir_all(&dir).map_err(|e| StoreError::Io {
                path: dir.display().to_string(),
                message: e.to_string(),
            })?;
        }

        Ok(Self {
            root: data_dir.to_path_buf(),
            locks: StdMutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn lock_for(&self, id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().expect("lock map poisoned");
        locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    fn deployment_path(&self, id: &str) -> PathBuf {
        self.root.join("transactions").join(format!("{}.json", id))
    }

    fn rollback_path(&self, id: &str) -> PathBuf {
        self.root.join("rollbacks").join(format!("{}.json", id))
    }

    fn record_path(&self, id: &str) -> PathBuf {
        if id.starts_with("rb-") {
            self.rollback_path(id)
        } else {
            self.deployment_path(id)
        }
    }

    pub fn log_path(&self, id: &str) -> PathBuf {
        self.root.join("logs").join(format!("{}.log", id))
    }

    fn cancel_path(&self, id: &str) -> PathBuf {
        self.root.join("transactions").join(format!("{}.cancel", id))
    }

    // ─── Record I/O ─────────────────────────────────────────────────────

    fn read_record<T: Record>(path: &Path) -> Result<T, StoreError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StoreError::NotFound {
                    id: path
                        .file_stem()
                        .map(|s| s.to_string_lossy().to_string())
                        .unwrap_or_default(),
                }
            } else {
                StoreError::Io {
                    path: path.display().to_string(),
                    message: e.to_string(),
                }
            }
        })?;

        serde_json::from_str(&content).map_err(|e| StoreError::Corrupt {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Write the whole record through a temp file in the same directory,
    /// fsync, then rename over the target. Readers see old or new, never
    /// a partial write.
    fn write_record<T: Record>(path: &Path, record: &T) -> Result<(), StoreError> {
        let dir = path.parent().ok_or_else(|| StoreError::Io {
            path: path.display().to_string(),
            message: "record path has no parent".to_string(),
        })?;

        let json =
            serde_json::to_string_pretty(record).map_err(|e| StoreError::Io {
                path: path.display().to_string(),
                message: format!("serialize: {}", e),
            })?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| StoreError::Io {
            path: dir.display().to_string(),
            message: e.to_string(),
        })?;

        tmp.write_all(json.as_bytes())
            .and_then(|_| tmp.write_all(b"\n"))
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| StoreError::Io {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;

        tmp.persist(path).map_err(|e| StoreError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        Ok(())
    }

    /// Load-mutate-store under the id's lock. The closure sees the whole
    /// record and decides the mutation; terminal checks live in callers
    /// so the back-link exception stays explicit.
    async fn mutate<T, F, R>(&self, path: PathBuf, id: &str, f: F) -> Result<R, StoreError>
    where
        T: Record,
        F: FnOnce(&mut T) -> Result<R, StoreError>,
    {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let mut record: T = Self::read_record(&path)?;
        let result = f(&mut record)?;
        Self::write_record(&path, &record)?;
        Ok(result)
    }

    fn reject_terminal<T: Record>(record: &T) -> Result<(), StoreError> {
        if record.status().is_terminal() {
            return Err(StoreError::TerminalWrite {
                id: record.id().to_string(),
                status: record.status().to_string(),
            });
        }
        Ok(())
    }

    // ─── Primitives ─────────────────────────────────────────────────────

    /// Write the initial deployment record; atomic.
    pub async fn create_deployment(
        &self,
        tx: &DeploymentTransaction,
    ) -> Result<(), StoreError> {
        let path = self.deployment_path(&tx.id);
        let lock = self.lock_for(&tx.id);
        let _guard = lock.lock().await;
        Self::write_record(&path, tx)
    }

    /// Write the initial rollback record; atomic.
    pub async fn create_rollback(&self, tx: &RollbackTransaction) -> Result<(), StoreError> {
        let path = self.rollback_path(&tx.id);
        let lock = self.lock_for(&tx.id);
        let _guard = lock.lock().await;
        Self::write_record(&path, tx)
    }

    /// Append to the stage log; rejected once the record is terminal.
    pub async fn append_stage(
        &self,
        id: &str,
        stage: Stage,
        state: StageState,
    ) -> Result<(), StoreError> {
        self.mutate_any(id, move |record: &mut dyn RecordDyn| {
            record.check_not_terminal()?;
            record.push_stage(StageEntry {
                stage,
                state,
                ts: Utc::now(),
            });
            Ok(())
        })
        .await
    }

    /// Merge a patch into one platform's status block.
    pub async fn update_platform(
        &self,
        id: &str,
        platform: &str,
        patch: PlatformPatch,
    ) -> Result<(), StoreError> {
        let platform = platform.to_string();
        self.mutate_any(id, move |record: &mut dyn RecordDyn| {
            record.check_not_terminal()?;
            record.patch_platform(&platform, &patch);
            Ok(())
        })
        .await
    }

    /// Record a free-form diagnostic line on the transaction.
    pub async fn append_error(&self, id: &str, message: String) -> Result<(), StoreError> {
        self.mutate_any(id, move |record: &mut dyn RecordDyn| {
            record.check_not_terminal()?;
            record.push_error(message);
            Ok(())
        })
        .await
    }

    /// Set the terminal status. Idempotent for the same status; a
    /// different terminal status on an already-terminal record is
    /// rejected.
    pub async fn finalize(
        &self,
        id: &str,
        terminal: TransactionStatus,
    ) -> Result<(), StoreError> {
        debug_assert!(terminal.is_terminal());
        self.mutate_any(id, move |record: &mut dyn RecordDyn| {
            let current = record.status_dyn();
            if current.is_terminal() {
                if current == terminal {
                    return Ok(()); // idempotent
                }
                return Err(StoreError::FinalizeConflict {
                    id: record.id_dyn().to_string(),
                    current: current.to_string(),
                    requested: terminal.to_string(),
                });
            }
            record.set_terminal(terminal, Utc::now());
            Ok(())
        })
        .await
    }

    /// Flip a terminal deployment to `rolled_back` after its rollback
    /// transaction completed. This is the one sanctioned
    /// terminal-to-terminal transition.
    pub async fn mark_rolled_back(&self, deployment_id: &str) -> Result<(), StoreError> {
        let path = self.deployment_path(deployment_id);
        self.mutate(path, deployment_id, |tx: &mut DeploymentTransaction| {
            match tx.status {
                TransactionStatus::Failed | TransactionStatus::Completed => {
                    tx.status = TransactionStatus::RolledBack;
                    Ok(())
                }
                TransactionStatus::RolledBack => Ok(()),
                other => Err(StoreError::FinalizeConflict {
                    id: tx.id.clone(),
                    current: other.to_string(),
                    requested: TransactionStatus::RolledBack.to_string(),
                }),
            }
        })
        .await
    }

    /// Back-link a deployment to the rollback transaction opened for it.
    /// Permitted on terminal records; this is the only other field that
    /// may change after a transaction settles.
    pub async fn link_rollback(
        &self,
        deployment_id: &str,
        rollback_id: &str,
    ) -> Result<(), StoreError> {
        let path = self.deployment_path(deployment_id);
        let rollback_id = rollback_id.to_string();
        self.mutate(path, deployment_id, |tx: &mut DeploymentTransaction| {
            tx.rollback_transaction_id = Some(rollback_id);
            Ok(())
        })
        .await
    }

    /// Update the snapshot blocks on a rollback record.
    pub async fn set_rollback_snapshot(
        &self,
        rollback_id: &str,
        before: Option<BTreeMap<String, serde_json::Value>>,
        after: Option<BTreeMap<String, serde_json::Value>>,
    ) -> Result<(), StoreError> {
        let path = self.rollback_path(rollback_id);
        self.mutate(path, rollback_id, |tx: &mut RollbackTransaction| {
            if let Some(before) = before {
                tx.state_before = before;
            }
            if let Some(after) = after {
                tx.state_after = after;
            }
            Ok(())
        })
        .await
    }

    /// Persist the resolved version once Validate settles it.
    pub async fn set_version(&self, id: &str, version: &str) -> Result<(), StoreError> {
        let path = self.deployment_path(id);
        let version = version.to_string();
        self.mutate(path, id, |tx: &mut DeploymentTransaction| {
            Self::reject_terminal(tx)?;
            tx.version = version;
            Ok(())
        })
        .await
    }

    // ─── Reads ──────────────────────────────────────────────────────────

    pub fn get_deployment(&self, id: &str) -> Result<DeploymentTransaction, StoreError> {
        Self::read_record(&self.deployment_path(id))
    }

    pub fn get_rollback(&self, id: &str) -> Result<RollbackTransaction, StoreError> {
        Self::read_record(&self.rollback_path(id))
    }

    /// Most recent deployments, newest first. Ids are time-prefixed so
    /// filename order is creation order.
    pub fn list_recent(
        &self,
        n: usize,
        package: Option<&str>,
    ) -> Result<Vec<DeploymentTransaction>, StoreError> {
        let dir = self.root.join("transactions");
        let mut ids: Vec<String> = std::fs::read_dir(&dir)
            .map_err(|e| StoreError::Io {
                path: dir.display().to_string(),
                message: e.to_string(),
            })?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().to_string();
                name.strip_suffix(".json").map(|s| s.to_string())
            })
            .collect();

        ids.sort_unstable_by(|a, b| b.cmp(a));

        let mut out = Vec::new();
        for id in ids {
            if out.len() >= n {
                break;
            }
            let tx = self.get_deployment(&id)?;
            if let Some(pkg) = package {
                if tx.package != pkg {
                    continue;
                }
            }
            out.push(tx);
        }
        Ok(out)
    }

    pub fn find_latest_for_package(
        &self,
        package: &str,
    ) -> Result<Option<DeploymentTransaction>, StoreError> {
        Ok(self.list_recent(1, Some(package))?.into_iter().next())
    }

    // ─── Cancellation intent ────────────────────────────────────────────

    /// Record a cancellation intent readable by pipeline workers (also
    /// from another process) at their next suspension point.
    pub fn request_cancel(&self, id: &str) -> Result<(), StoreError> {
        let path = self.cancel_path(id);
        std::fs::write(&path, Utc::now().to_rfc3339()).map_err(|e| StoreError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    pub fn cancel_requested(&self, id: &str) -> bool {
        self.cancel_path(id).exists()
    }

    // ─── Free-form log ──────────────────────────────────────────────────

    /// Append a human-readable line to `logs/{id}.log`. Best effort; the
    /// log is not parsed by the core.
    pub fn append_log(&self, id: &str, line: &str) {
        let path = self.log_path(id);
        let stamped = format!("{} {}\n", Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ"), line);
        if let Err(e) = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .and_then(|mut f| f.write_all(stamped.as_bytes()))
        {
            tracing::warn!(id = %id, error = %e, "Failed to append transaction log");
        }
    }

    // ─── Dyn dispatch over the two record shapes ────────────────────────

    async fn mutate_any<F, R>(&self, id: &str, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&mut dyn RecordDyn) -> Result<R, StoreError>,
    {
        let path = self.record_path(id);
        if id.starts_with("rb-") {
            self.mutate(path, id, |tx: &mut RollbackTransaction| f(tx))
                .await
        } else {
            self.mutate(path, id, |tx: &mut DeploymentTransaction| f(tx))
                .await
        }
    }
}

/// Object-safe subset of [`Record`] for primitives that work on either
/// record shape without knowing which.
trait RecordDyn {
    fn id_dyn(&self) -> &str;
    fn status_dyn(&self) -> TransactionStatus;
    fn check_not_terminal(&self) -> Result<(), StoreError>;
    fn push_stage(&mut self, entry: StageEntry);
    fn patch_platform(&mut self, platform: &str, patch: &PlatformPatch);
    fn push_error(&mut self, message: String);
    fn set_terminal(&mut self, status: TransactionStatus, ts: chrono::DateTime<chrono::Utc>);
}

impl<T: Record> RecordDyn for T {
    fn id_dyn(&self) -> &str {
        self.id()
    }

    fn status_dyn(&self) -> TransactionStatus {
        self.status()
    }

    fn check_not_terminal(&self) -> Result<(), StoreError> {
        if self.status().is_terminal() {
            return Err(StoreError::TerminalWrite {
                id: self.id().to_string(),
                status: self.status().to_string(),
            });
        }
        Ok(())
    }

    fn push_stage(&mut self, entry: StageEntry) {
        self.stages_mut().push(entry);
    }

    fn patch_platform(&mut self, platform: &str, patch: &PlatformPatch) {
        let status = self
            .platforms_mut()
            .entry(platform.to_string())
            .or_insert_with(PlatformStatus::pending);
        patch.apply_to(status);
    }

    fn push_error(&mut self, message: String) {
        self.errors_mut().push(message);
    }

    fn set_terminal(&mut self, status: TransactionStatus, ts: chrono::DateTime<chrono::Utc>) {
        self.set_status(status);
        self.set_completed_at(ts);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{PipelineKind, PlatformState};

    fn store() -> (tempfile::TempDir, TransactionStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = TransactionStore::open(dir.path()).unwrap();
        (dir, store)
    }

    fn sample_tx() -> DeploymentTransaction {
        DeploymentTransaction::new(
            "mypkg",
            "1.2.3",
            PipelineKind::Standard,
            vec!["npm".to_string(), "cargo".to_string()],
        )
    }

    #[tokio::test]
    async fn test_create_and_get_round_trip() {
        let (_dir, store) = store();
        let tx = sample_tx();
        store.create_deployment(&tx).await.unwrap();

        let loaded = store.get_deployment(&tx.id).unwrap();
        assert_eq!(loaded.package, "mypkg");
        assert_eq!(loaded.status, TransactionStatus::InProgress);
        assert_eq!(loaded.platforms.len(), 2);
    }

    #[tokio::test]
    async fn test_append_stage_and_platform_patch() {
        let (_dir, store) = store();
        let tx = sample_tx();
        store.create_deployment(&tx).await.unwrap();

        store
            .append_stage(&tx.id, Stage::Validation, StageState::Started)
            .await
            .unwrap();
        store
            .append_stage(&tx.id, Stage::Validation, StageState::Completed)
            .await
            .unwrap();
        store
            .update_platform(&tx.id, "npm", PlatformPatch::state(PlatformState::Running))
            .await
            .unwrap();

        let loaded = store.get_deployment(&tx.id).unwrap();
        assert_eq!(loaded.stages.len(), 2);
        assert_eq!(loaded.platforms["npm"].state, PlatformState::Running);
        assert_eq!(loaded.platforms["cargo"].state, PlatformState::Pending);
    }

    #[tokio::test]
    async fn test_writes_rejected_after_terminal() {
        let (_dir, store) = store();
        let tx = sample_tx();
        store.create_deployment(&tx).await.unwrap();
        store
            .finalize(&tx.id, TransactionStatus::Failed)
            .await
            .unwrap();

        let result = store
            .append_stage(&tx.id, Stage::Deploy, StageState::Started)
            .await;
        assert!(matches!(result, Err(StoreError::TerminalWrite { .. })));
    }

    #[tokio::test]
    async fn test_finalize_idempotent_same_status() {
        let (_dir, store) = store();
        let tx = sample_tx();
        store.create_deployment(&tx).await.unwrap();

        store
            .finalize(&tx.id, TransactionStatus::Completed)
            .await
            .unwrap();
        store
            .finalize(&tx.id, TransactionStatus::Completed)
            .await
            .unwrap();

        let conflict = store.finalize(&tx.id, TransactionStatus::Failed).await;
        assert!(matches!(conflict, Err(StoreError::FinalizeConflict { .. })));
    }

    #[tokio::test]
    async fn test_mark_rolled_back_from_failed() {
        let (_dir, store) = store();
        let tx = sample_tx();
        store.create_deployment(&tx).await.unwrap();
        store
            .finalize(&tx.id, TransactionStatus::Failed)
            .await
            .unwrap();

        store.mark_rolled_back(&tx.id).await.unwrap();
        let loaded = store.get_deployment(&tx.id).unwrap();
        assert_eq!(loaded.status, TransactionStatus::RolledBack);
    }

    #[tokio::test]
    async fn test_link_rollback_allowed_on_terminal() {
        let (_dir, store) = store();
        let tx = sample_tx();
        store.create_deployment(&tx).await.unwrap();
        store
            .finalize(&tx.id, TransactionStatus::Failed)
            .await
            .unwrap();

        store.link_rollback(&tx.id, "rb-20990101000000-abcd1234").await.unwrap();
        let loaded = store.get_deployment(&tx.id).unwrap();
        assert_eq!(
            loaded.rollback_transaction_id.as_deref(),
            Some("rb-20990101000000-abcd1234")
        );
        // status untouched by the back-link
        assert_eq!(loaded.status, TransactionStatus::Failed);
    }

    #[tokio::test]
    async fn test_concurrent_platform_updates_serialize() {
        let (_dir, store) = store();
        let store = Arc::new(store);
        let tx = sample_tx();
        store.create_deployment(&tx).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            let id = tx.id.clone();
            let platform = if i % 2 == 0 { "npm" } else { "cargo" };
            handles.push(tokio::spawn(async move {
                store
                    .update_platform(
                        &id,
                        platform,
                        PlatformPatch::failed(format!("attempt {}", i)),
                    )
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        // final record is one of the inputs, not a merge artifact
        let loaded = store.get_deployment(&tx.id).unwrap();
        let msg = loaded.platforms["npm"].error_message.clone().unwrap();
        assert!(msg.starts_with("attempt "));
        assert_eq!(loaded.platforms["npm"].state, PlatformState::Failed);
    }

    #[tokio::test]
    async fn test_list_recent_orders_newest_first() {
        let (_dir, store) = store();
        let older = DeploymentTransaction {
            id: "dep-20200101000000-aaaaaaaa".to_string(),
            ..sample_tx()
        };
        let newer = DeploymentTransaction {
            id: "dep-20300101000000-bbbbbbbb".to_string(),
            ..sample_tx()
        };
        store.create_deployment(&older).await.unwrap();
        store.create_deployment(&newer).await.unwrap();

        let recent = store.list_recent(10, None).unwrap();
        assert_eq!(recent[0].id, newer.id);
        assert_eq!(recent[1].id, older.id);
    }

    #[tokio::test]
    async fn test_cancel_marker() {
        let (_dir, store) = store();
        let tx = sample_tx();
        store.create_deployment(&tx).await.unwrap();

        assert!(!store.cancel_requested(&tx.id));
        store.request_cancel(&tx.id).unwrap();
        assert!(store.cancel_requested(&tx.id));
    }

    #[tokio::test]
    async fn test_rollback_record_round_trip() {
        let (_dir, store) = store();
        let dep = sample_tx();
        store.create_deployment(&dep).await.unwrap();

        let rb = RollbackTransaction::new(
            &dep,
            crate::domain::RollbackReason::ManualTrigger,
            vec!["npm".to_string()],
        );
        store.create_rollback(&rb).await.unwrap();

        store
            .update_platform(&rb.id, "npm", PlatformPatch::state(PlatformState::Running))
            .await
            .unwrap();

        let loaded = store.get_rollback(&rb.id).unwrap();
        assert_eq!(loaded.deployment_id, dep.id);
        assert_eq!(loaded.platforms["npm"].state, PlatformState::Running);
    }
}
