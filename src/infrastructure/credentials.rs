//! Credential resolver boundary.
//!
//! The core consumes an abstract credential handle; how secrets are
//! stored is pluggable behind [`CredentialResolver`]. The default
//! resolver reads environment variables: `{PLATFORM}_TOKEN` for
//! bearer-style registries, `{PLATFORM}_USERNAME` + `{PLATFORM}_PASSWORD`
//! for userpass ones. Handles are held briefly and never logged.

use std::fmt;
use std::path::PathBuf;

use crate::domain::{AuthScheme, PlatformDescriptor};
use crate::error::CredentialError;

/// A resolved credential handle
#[derive(Clone)]
pub enum Credential {
    Bearer {
        token: String,
    },
    UserPass {
        username: String,
        password: String,
    },
    /// The publishing tool reads its own config file; `path` overrides
    /// the tool default when set
    ConfigFile {
        path: Option<PathBuf>,
    },
    Anonymous,
}

// Secrets stay out of Debug output and therefore out of logs.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bearer { .. } => write!(f, "Credential::Bearer(<redacted>)"),
            Self::UserPass { username, .. } => {
                write!(f, "Credential::UserPass({}, <redacted>)", username)
            }
            Self::ConfigFile { path } => write!(f, "Credential::ConfigFile({:?})", path),
            Self::Anonymous => write!(f, "Credential::Anonymous"),
        }
    }
}

/// Resolves an abstract credential handle to concrete secrets
pub trait CredentialResolver: Send + Sync {
    fn resolve(&self, descriptor: &PlatformDescriptor) -> Result<Credential, CredentialError>;
}

/// Environment-variable backed resolver (the default)
pub struct EnvCredentialResolver;

impl CredentialResolver for EnvCredentialResolver {
    fn resolve(&self, descriptor: &PlatformDescriptor) -> Result<Credential, CredentialError> {
        match descriptor.auth_scheme {
            AuthScheme::BearerToken => {
                let var = descriptor.token_env_var();
                match std::env::var(&var) {
                    Ok(token) if !token.is_empty() => Ok(Credential::Bearer { token }),
                    _ => Err(CredentialError::TokenNotFound {
                        platform: descriptor.name.clone(),
                        var,
                    }),
                }
            }
            AuthScheme::Userpass => {
                let (user_var, pass_var) = descriptor.userpass_env_vars();
                let username = std::env::var(&user_var).unwrap_or_default();
                let password = std::env::var(&pass_var).unwrap_or_default();
                if username.is_empty() || password.is_empty() {
                    return Err(CredentialError::UserPassNotFound {
                        platform: descriptor.name.clone(),
                        user_var,
                        pass_var,
                    });
                }
                Ok(Credential::UserPass { username, password })
            }
            AuthScheme::ConfigFile => {
                let var = format!("{}_CONFIG_FILE", descriptor.name.to_uppercase());
                match std::env::var(&var) {
                    Ok(path) if !path.is_empty() => {
                        let path = PathBuf::from(path);
                        if !path.exists() {
                            return Err(CredentialError::ConfigFileMissing {
                                path: path.display().to_string(),
                            });
                        }
                        Ok(Credential::ConfigFile { path: Some(path) })
                    }
                    _ => Ok(Credential::ConfigFile { path: None }),
                }
            }
            AuthScheme::None => Ok(Credential::Anonymous),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::builtin::builtin_descriptors;

    fn descriptor(name: &str) -> PlatformDescriptor {
        builtin_descriptors()
            .into_iter()
            .find(|d| d.name == name)
            .unwrap()
    }

    #[test]
    fn test_bearer_token_from_env() {
        std::env::set_var("CARGO_TOKEN", "cio-secret");
        let cred = EnvCredentialResolver.resolve(&descriptor("cargo")).unwrap();
        assert!(matches!(cred, Credential::Bearer { token } if token == "cio-secret"));
        std::env::remove_var("CARGO_TOKEN");
    }

    #[test]
    fn test_missing_token_is_typed_error() {
        std::env::remove_var("NPM_TOKEN");
        let result = EnvCredentialResolver.resolve(&descriptor("npm"));
        assert!(matches!(result, Err(CredentialError::TokenNotFound { .. })));
    }

    #[test]
    fn test_userpass_requires_both_vars() {
        std::env::set_var("DOCKERHUB_USERNAME", "captain");
        std::env::remove_var("DOCKERHUB_PASSWORD");
        let result = EnvCredentialResolver.resolve(&descriptor("dockerhub"));
        assert!(matches!(
            result,
            Err(CredentialError::UserPassNotFound { .. })
        ));
        std::env::remove_var("DOCKERHUB_USERNAME");
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let cred = Credential::Bearer {
            token: "super-secret".to_string(),
        };
        let debug = format!("{:?}", cred);
        assert!(!debug.contains("super-secret"));
    }
}
