//! Infrastructure layer - external I/O adapters
//!
//! This module contains all code that interacts with external systems:
//! - Durable transaction store (JSON records on disk)
//! - Registry metadata APIs and health probes
//! - Credential resolution
//! - Platform descriptor loading
//! - Outbound notifications

pub mod credentials;
pub mod metadata;
pub mod notify;
pub mod platforms;
pub mod store;

// Re-export commonly used types
pub use credentials::{Credential, CredentialResolver, EnvCredentialResolver};
pub use metadata::{HealthReport, HealthState, MetadataClient, MetadataLookup};
pub use notify::{NotificationPayload, Notifier};
pub use platforms::PlatformRegistry;
pub use store::TransactionStore;
