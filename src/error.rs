//! Centralized error types for armada
//!
//! Uses thiserror for typed errors that can be matched on,
//! while still being compatible with anyhow for propagation.

use thiserror::Error;

/// Top-level error type for orchestrator operations
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Descriptor error: {0}")]
    Descriptor(#[from] DescriptorError),

    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error("Adapter error: {0}")]
    Adapter(#[from] AdapterError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Rollback error: {0}")]
    Rollback(#[from] RollbackError),
}

/// Platform descriptor errors
///
/// Raised at startup when loading `platforms/{name}.json` or when a
/// command names a platform no descriptor covers.
#[derive(Error, Debug)]
pub enum DescriptorError {
    #[error("Descriptor for '{name}' is missing required field '{field}'")]
    MissingField { name: String, field: String },

    #[error("Two descriptors share the name '{name}'")]
    DuplicateName { name: String },

    #[error("Descriptor file not found: {path}")]
    FileNotFound { path: String },

    #[error("Failed to parse descriptor {path}: {message}")]
    ParseError { path: String, message: String },

    #[error("Unknown platform: {name}. Run `armada platforms list` to see loaded descriptors")]
    UnknownPlatform { name: String },

    #[error("Descriptor '{name}' declares rollback methods but rollback_capability is 'none'")]
    InconsistentRollback { name: String },
}

/// Credential resolution errors
#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("Token not found for {platform}. Set the {var} env var")]
    TokenNotFound { platform: String, var: String },

    #[error("Username/password not found for {platform}. Set {user_var} and {pass_var}")]
    UserPassNotFound {
        platform: String,
        user_var: String,
        pass_var: String,
    },

    #[error("Auth config file not found: {path}")]
    ConfigFileMissing { path: String },
}

/// Adapter lifecycle errors
///
/// Hard failures from Init/Validate/Build. Deploy, Verify and Rollback
/// report their outcomes as tagged result values instead; only tool or
/// I/O breakage surfaces here.
#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("Required tool '{tool}' not found on PATH (set {env_var} to override)")]
    ToolMissing { tool: String, env_var: String },

    #[error("Credentials unavailable for {platform}: {message}")]
    AuthUnavailable { platform: String, message: String },

    #[error("Manifest not found: {path}")]
    ManifestMissing { path: String },

    #[error("Failed to parse manifest {path}: {message}")]
    ManifestMalformed { path: String, message: String },

    #[error("Version conflict in {manifest}: {message}")]
    VersionConflict { manifest: String, message: String },

    #[error("Build failed: {message}")]
    BuildFailed { message: String },

    #[error("Tests failed: {message}")]
    TestsFailed { message: String },

    #[error("Command '{command}' failed to spawn: {message}")]
    SpawnFailed { command: String, message: String },
}

/// Transaction store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Transaction not found: {id}")]
    NotFound { id: String },

    #[error("Transaction {id} is terminal ({status}); record is immutable")]
    TerminalWrite { id: String, status: String },

    #[error("Finalize conflict on {id}: already terminal as {current}, refusing {requested}")]
    FinalizeConflict {
        id: String,
        current: String,
        requested: String,
    },

    #[error("Corrupt record at {path}: {message}")]
    Corrupt { path: String, message: String },

    #[error("Store I/O failure at {path}: {message}")]
    Io { path: String, message: String },
}

/// Pre-deploy validation errors
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Required file missing for {platform}: {path}")]
    RequiredFileMissing { platform: String, path: String },

    #[error("Manifest for {platform} is missing required field '{field}'")]
    ManifestFieldMissing { platform: String, field: String },

    #[error("No license file found in working tree")]
    LicenseFileMissing,

    #[error("Declared license '{license}' is not on the allow-list")]
    LicenseNotAllowed { license: String },

    #[error("Dependency resolution failed for {platform}: {message}")]
    DependencyCheckFailed { platform: String, message: String },

    #[error("Registry for {platform} is down and --strict-health is set")]
    RegistryDown { platform: String },
}

/// Rollback engine errors
#[derive(Error, Debug)]
pub enum RollbackError {
    #[error("Platform {platform} does not support rollback")]
    Unsupported { platform: String },

    #[error("All {attempts} rollback method(s) failed for {platform}")]
    AllMethodsFailed { platform: String, attempts: usize },

    #[error(
        "Rollback method for {platform} requires confirmation; \
         re-run with --yes or mode=manual"
    )]
    ConfirmationRequired { platform: String },

    #[error("Deployment {id} has no completed platforms to roll back")]
    NothingToRollBack { id: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_error_display() {
        let err = DescriptorError::MissingField {
            name: "npm".to_string(),
            field: "registry_base_url".to_string(),
        };
        assert!(err.to_string().contains("registry_base_url"));
    }

    #[test]
    fn test_error_conversion() {
        let store_err = StoreError::NotFound {
            id: "dep-x".to_string(),
        };
        let top: OrchestratorError = store_err.into();
        assert!(matches!(top, OrchestratorError::Store(_)));
    }

    #[test]
    fn test_credential_error_names_env_var() {
        let err = CredentialError::TokenNotFound {
            platform: "npm".to_string(),
            var: "NPM_TOKEN".to_string(),
        };
        assert!(err.to_string().contains("NPM_TOKEN"));
    }
}
