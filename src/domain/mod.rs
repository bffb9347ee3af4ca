//! Core data model: transaction records and platform descriptors.
//!
//! Everything in here is plain data plus invariant helpers; no disk,
//! network or process access, so the deployment/rollback state machine
//! is testable in isolation.

pub mod builtin;
pub mod descriptor;
pub mod transaction;

// Re-export commonly used types
pub use descriptor::{
    AuthScheme, PlatformDescriptor, RecoveryAction, RollbackCapability, RollbackMethod,
    VersionLocator,
};
pub use transaction::{
    DeploymentTransaction, PipelineKind, PlatformPatch, PlatformState, PlatformStatus,
    RollbackReason, RollbackTransaction, Stage, StageEntry, StageState, TransactionStatus,
};
