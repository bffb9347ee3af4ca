//! Command implementations.
//!
//! Each command returns its process exit code: 0 on success, 1 on a
//! failed or missing transaction, 2 on usage errors (unknown targets,
//! bad mode strings). Infrastructure errors propagate as anyhow errors
//! and exit 1 from main.

pub mod cancel;
pub mod deploy;
pub mod history;
pub mod platforms;
pub mod retry;
pub mod rollback;
pub mod rollback_status;
pub mod rollback_verify;
pub mod status;

use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::{self, OrchestratorConfig};
use crate::infrastructure::{
    CredentialResolver, EnvCredentialResolver, MetadataClient, Notifier, PlatformRegistry,
    TransactionStore,
};

/// Shared runtime wiring for every command
pub struct AppContext {
    pub data_dir: PathBuf,
    pub config: OrchestratorConfig,
    pub store: Arc<TransactionStore>,
    pub registry: Arc<PlatformRegistry>,
    pub metadata: Arc<MetadataClient>,
    pub notifier: Arc<Notifier>,
    pub resolver: Arc<dyn CredentialResolver>,
}

impl AppContext {
    /// Open the data directory, load policy and descriptors.
    pub fn init(data_dir_flag: Option<&str>) -> Result<Self> {
        let data_dir = config::resolve_data_dir(data_dir_flag);
        let config = OrchestratorConfig::load(&data_dir)?;
        let store = Arc::new(TransactionStore::open(&data_dir)?);
        let registry = Arc::new(PlatformRegistry::load(&data_dir)?);
        let metadata = Arc::new(MetadataClient::new(config.metadata_timeout())?);

        Ok(Self {
            data_dir,
            config,
            store,
            registry,
            metadata,
            notifier: Arc::new(Notifier::from_env()),
            resolver: Arc::new(EnvCredentialResolver),
        })
    }

    /// Working tree resolution: explicit flag, else ./{package} when it
    /// exists, else the current directory.
    pub fn resolve_tree(&self, package: &str, flag: Option<&str>) -> PathBuf {
        if let Some(tree) = flag {
            return PathBuf::from(tree);
        }
        let candidate = PathBuf::from(package);
        if candidate.is_dir() {
            candidate
        } else {
            PathBuf::from(".")
        }
    }
}
