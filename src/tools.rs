//! Runtime tool path resolution
//!
//! Each platform adapter shells out to its ecosystem's publishing tool
//! (`npm`, `twine`, `cargo`, `docker`, ...). For each tool we:
//! 1. Check for an environment variable `{TOOL}_BIN` (e.g., `NPM_BIN`)
//! 2. Fall back to PATH-based invocation if the envvar is not set
//!
//! The envvar override keeps CI images with non-standard tool locations
//! working and makes the tools easy to stub out in tests.

use std::env;

use crate::error::AdapterError;

/// Resolve what to pass to `Command::new` for a tool.
///
/// Returns the `{TOOL}_BIN` override when one is exported; otherwise the
/// bare tool name, leaving lookup to PATH.
pub fn get_tool_path(tool: &str) -> String {
    let env_var = tool_env_var(tool);
    env::var(&env_var).unwrap_or_else(|_| tool.to_string())
}

/// Environment variable name for a tool override
///
/// `npm` -> `NPM_BIN`, `dotnet` -> `DOTNET_BIN`. Dashes become underscores.
pub fn tool_env_var(tool: &str) -> String {
    format!("{}_BIN", tool.to_uppercase().replace('-', "_"))
}

/// Verify a tool is invocable, either via its `{TOOL}_BIN` override or PATH
///
/// Used by adapter `Init` to fail fast with `ToolMissing` before any
/// pipeline work starts.
pub fn require_tool(tool: &str) -> Result<String, AdapterError> {
    let env_var = tool_env_var(tool);

    if let Ok(path) = env::var(&env_var) {
        if std::path::Path::new(&path).exists() {
            return Ok(path);
        }
        return Err(AdapterError::ToolMissing {
            tool: tool.to_string(),
            env_var,
        });
    }

    which::which(tool)
        .map(|p| p.to_string_lossy().to_string())
        .map_err(|_| AdapterError::ToolMissing {
            tool: tool.to_string(),
            env_var,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_override_wins_over_path() {
        env::set_var("FAKE_PUBLISHER_BIN", "/opt/ci/bin/fake-publisher");
        let resolved = get_tool_path("fake-publisher");
        env::remove_var("FAKE_PUBLISHER_BIN");
        assert_eq!(resolved, "/opt/ci/bin/fake-publisher");
    }

    #[test]
    fn test_bare_name_when_no_override() {
        env::remove_var("TWINE_BIN");
        // PATH resolution is the tool's problem; we hand back the name.
        assert_eq!(get_tool_path("twine"), "twine");
    }

    #[test]
    fn test_tool_env_var_conversion() {
        assert_eq!(tool_env_var("npm"), "NPM_BIN");
        assert_eq!(tool_env_var("mvn-wrapper"), "MVN_WRAPPER_BIN");
    }

    #[test]
    fn test_require_tool_missing_override() {
        env::set_var("GHOST_TOOL_BIN", "/nonexistent/ghost-tool");
        let result = require_tool("ghost-tool");
        assert!(matches!(result, Err(AdapterError::ToolMissing { .. })));
        env::remove_var("GHOST_TOOL_BIN");
    }
}
