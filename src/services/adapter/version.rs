//! Version locator resolution.
//!
//! Each descriptor points at the file and field (or regex) where the
//! package version lives. Validate reads the current value when the
//! caller supplied no version, and writes the requested version in
//! place when one was supplied; the pipeline is authoritative over the
//! manifest.
//!
//! JSON manifests are edited through serde_json. TOML manifests are
//! edited line-wise under the right `[section]` so operator formatting
//! and comments survive. Free-form manifests use the locator's regex,
//! whose first capture group is the version.

use regex::Regex;
use std::path::{Path, PathBuf};

use crate::domain::VersionLocator;
use crate::error::AdapterError;

/// Expand `{package}` in a locator or required-file path.
pub fn expand_path(template: &str, package: &str) -> String {
    template.replace("{package}", package)
}

/// Absolute manifest path for a locator within a working tree.
pub fn manifest_path(tree: &Path, locator: &VersionLocator, package: &str) -> PathBuf {
    tree.join(expand_path(&locator.file, package))
}

/// Read the current version out of the manifest.
pub fn read_version(
    tree: &Path,
    locator: &VersionLocator,
    package: &str,
) -> Result<String, AdapterError> {
    let path = manifest_path(tree, locator, package);
    let content = read_manifest(&path)?;

    if let Some(field) = &locator.field {
        if path.extension().map(|e| e == "toml").unwrap_or(false) {
            read_toml_field(&path, &content, field)
        } else {
            read_json_field(&path, &content, field)
        }
    } else if let Some(pattern) = &locator.pattern {
        read_pattern(&path, &content, pattern)
    } else {
        Err(AdapterError::VersionConflict {
            manifest: path.display().to_string(),
            message: "version locator declares neither field nor pattern".to_string(),
        })
    }
}

/// Write `version` into the manifest, replacing the current value in
/// place.
pub fn write_version(
    tree: &Path,
    locator: &VersionLocator,
    package: &str,
    version: &str,
) -> Result<(), AdapterError> {
    let path = manifest_path(tree, locator, package);
    let content = read_manifest(&path)?;

    let updated = if let Some(field) = &locator.field {
        if path.extension().map(|e| e == "toml").unwrap_or(false) {
            write_toml_field(&path, &content, field, version)?
        } else {
            write_json_field(&path, &content, field, version)?
        }
    } else if let Some(pattern) = &locator.pattern {
        write_pattern(&path, &content, pattern, version)?
    } else {
        return Err(AdapterError::VersionConflict {
            manifest: path.display().to_string(),
            message: "version locator declares neither field nor pattern".to_string(),
        });
    };

    std::fs::write(&path, updated).map_err(|e| AdapterError::ManifestMalformed {
        path: path.display().to_string(),
        message: format!("write failed: {}", e),
    })
}

fn read_manifest(path: &Path) -> Result<String, AdapterError> {
    if !path.exists() {
        return Err(AdapterError::ManifestMissing {
            path: path.display().to_string(),
        });
    }
    std::fs::read_to_string(path).map_err(|e| AdapterError::ManifestMalformed {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

// ─── JSON field locators ────────────────────────────────────────────────

fn read_json_field(path: &Path, content: &str, field: &str) -> Result<String, AdapterError> {
    let doc: serde_json::Value =
        serde_json::from_str(content).map_err(|e| AdapterError::ManifestMalformed {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

    let mut node = &doc;
    for part in field.split('.') {
        node = node
            .get(part)
            .ok_or_else(|| AdapterError::VersionConflict {
                manifest: path.display().to_string(),
                message: format!("field '{}' not found", field),
            })?;
    }

    node.as_str()
        .map(|s| s.to_string())
        .ok_or_else(|| AdapterError::ManifestMalformed {
            path: path.display().to_string(),
            message: format!("field '{}' is not a string", field),
        })
}

fn write_json_field(
    path: &Path,
    content: &str,
    field: &str,
    version: &str,
) -> Result<String, AdapterError> {
    let mut doc: serde_json::Value =
        serde_json::from_str(content).map_err(|e| AdapterError::ManifestMalformed {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

    let mut node = &mut doc;
    let parts: Vec<&str> = field.split('.').collect();
    for part in &parts[..parts.len() - 1] {
        node = node
            .get_mut(*part)
            .ok_or_else(|| AdapterError::VersionConflict {
                manifest: path.display().to_string(),
                message: format!("field '{}' not found", field),
            })?;
    }

    let leaf = parts[parts.len() - 1];
    match node.get_mut(leaf) {
        Some(slot) => *slot = serde_json::Value::String(version.to_string()),
        None => {
            return Err(AdapterError::VersionConflict {
                manifest: path.display().to_string(),
                message: format!("field '{}' not found", field),
            })
        }
    }

    serde_json::to_string_pretty(&doc)
        .map(|s| format!("{}\n", s))
        .map_err(|e| AdapterError::ManifestMalformed {
            path: path.display().to_string(),
            message: e.to_string(),
        })
}

// ─── TOML field locators ────────────────────────────────────────────────
//
// Dotted fields split into `[section]` + key; a bare key addresses the
// document root. Replacement is line-wise so formatting survives; the
// parse below is only used to reject malformed documents early.

fn split_toml_field(field: &str) -> (Option<String>, String) {
    match field.rsplit_once('.') {
        Some((section, key)) => (Some(section.to_string()), key.to_string()),
        None => (None, field.to_string()),
    }
}

fn check_toml(path: &Path, content: &str) -> Result<(), AdapterError> {
    content
        .parse::<toml::Table>()
        .map(|_| ())
        .map_err(|e| AdapterError::ManifestMalformed {
            path: path.display().to_string(),
            message: e.to_string(),
        })
}

fn toml_key_line(line: &str, key: &str) -> Option<String> {
    let trimmed = line.trim_start();
    let rest = trimmed.strip_prefix(key)?;
    let rest = rest.trim_start();
    let rest = rest.strip_prefix('=')?;
    let rest = rest.trim_start();
    let rest = rest.strip_prefix('"')?;
    rest.split('"').next().map(|v| v.to_string())
}

fn read_toml_field(path: &Path, content: &str, field: &str) -> Result<String, AdapterError> {
    check_toml(path, content)?;
    let (section, key) = split_toml_field(field);

    let mut current_section: Option<String> = None;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with('[') && trimmed.ends_with(']') {
            current_section = Some(trimmed[1..trimmed.len() - 1].trim().to_string());
            continue;
        }
        if current_section == section {
            if let Some(value) = toml_key_line(line, &key) {
                return Ok(value);
            }
        }
    }

    Err(AdapterError::VersionConflict {
        manifest: path.display().to_string(),
        message: format!("field '{}' not found", field),
    })
}

fn write_toml_field(
    path: &Path,
    content: &str,
    field: &str,
    version: &str,
) -> Result<String, AdapterError> {
    check_toml(path, content)?;
    let (section, key) = split_toml_field(field);

    let mut current_section: Option<String> = None;
    let mut replaced = false;
    let mut out = Vec::new();

    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with('[') && trimmed.ends_with(']') {
            current_section = Some(trimmed[1..trimmed.len() - 1].trim().to_string());
        } else if !replaced && current_section == section {
            if let Some(old) = toml_key_line(line, &key) {
                out.push(line.replacen(
                    &format!("\"{}\"", old),
                    &format!("\"{}\"", version),
                    1,
                ));
                replaced = true;
                continue;
            }
        }
        out.push(line.to_string());
    }

    if !replaced {
        return Err(AdapterError::VersionConflict {
            manifest: path.display().to_string(),
            message: format!("field '{}' not found", field),
        });
    }

    Ok(format!("{}\n", out.join("\n")))
}

// ─── Regex pattern locators ─────────────────────────────────────────────

fn compile_pattern(path: &Path, pattern: &str) -> Result<Regex, AdapterError> {
    Regex::new(pattern).map_err(|e| AdapterError::ManifestMalformed {
        path: path.display().to_string(),
        message: format!("bad version pattern: {}", e),
    })
}

fn read_pattern(path: &Path, content: &str, pattern: &str) -> Result<String, AdapterError> {
    let re = compile_pattern(path, pattern)?;
    re.captures(content)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| AdapterError::VersionConflict {
            manifest: path.display().to_string(),
            message: format!("pattern '{}' matched nothing", pattern),
        })
}

fn write_pattern(
    path: &Path,
    content: &str,
    pattern: &str,
    version: &str,
) -> Result<String, AdapterError> {
    let re = compile_pattern(path, pattern)?;
    let captures = re
        .captures(content)
        .ok_or_else(|| AdapterError::VersionConflict {
            manifest: path.display().to_string(),
            message: format!("pattern '{}' matched nothing", pattern),
        })?;
    let group = captures.get(1).ok_or_else(|| AdapterError::ManifestMalformed {
        path: path.display().to_string(),
        message: "version pattern has no capture group".to_string(),
    })?;

    let mut updated = String::with_capacity(content.len());
    updated.push_str(&content[..group.start()]);
    updated.push_str(version);
    updated.push_str(&content[group.end()..]);
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn locator_json() -> VersionLocator {
        VersionLocator {
            file: "package.json".to_string(),
            field: Some("version".to_string()),
            pattern: None,
        }
    }

    #[test]
    fn test_json_read_and_write() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("package.json"),
            r#"{"name": "leftpad", "version": "1.0.0"}"#,
        )
        .unwrap();

        let locator = locator_json();
        assert_eq!(read_version(dir.path(), &locator, "leftpad").unwrap(), "1.0.0");

        write_version(dir.path(), &locator, "leftpad", "1.1.0").unwrap();
        assert_eq!(read_version(dir.path(), &locator, "leftpad").unwrap(), "1.1.0");
    }

    #[test]
    fn test_toml_write_preserves_comments() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = "# build manifest\n[package]\nname = \"mycrate\"\nversion = \"0.2.0\" # bump me\n\n[dependencies]\nserde = \"1.0\"\n";
        std::fs::write(dir.path().join("Cargo.toml"), manifest).unwrap();

        let locator = VersionLocator {
            file: "Cargo.toml".to_string(),
            field: Some("package.version".to_string()),
            pattern: None,
        };

        write_version(dir.path(), &locator, "mycrate", "0.3.0").unwrap();
        let updated = std::fs::read_to_string(dir.path().join("Cargo.toml")).unwrap();
        assert!(updated.contains("version = \"0.3.0\" # bump me"));
        assert!(updated.contains("# build manifest"));
        // the dependencies table is untouched
        assert!(updated.contains("serde = \"1.0\""));
        assert_eq!(read_version(dir.path(), &locator, "mycrate").unwrap(), "0.3.0");
    }

    #[test]
    fn test_toml_does_not_touch_other_sections() {
        let dir = tempfile::tempdir().unwrap();
        let manifest =
            "[package]\nversion = \"1.0.0\"\n\n[tool.other]\nversion = \"9.9.9\"\n";
        std::fs::write(dir.path().join("pyproject.toml"), manifest).unwrap();

        let locator = VersionLocator {
            file: "pyproject.toml".to_string(),
            field: Some("package.version".to_string()),
            pattern: None,
        };
        write_version(dir.path(), &locator, "pkg", "2.0.0").unwrap();

        let updated = std::fs::read_to_string(dir.path().join("pyproject.toml")).unwrap();
        assert!(updated.contains("version = \"2.0.0\""));
        assert!(updated.contains("version = \"9.9.9\""));
    }

    #[test]
    fn test_pattern_read_and_write() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("Dockerfile"),
            "FROM alpine\nLABEL version=\"3.1.0\"\n",
        )
        .unwrap();

        let locator = VersionLocator {
            file: "Dockerfile".to_string(),
            field: None,
            pattern: Some(r#"(?m)^LABEL version="([^"]+)""#.to_string()),
        };

        assert_eq!(read_version(dir.path(), &locator, "img").unwrap(), "3.1.0");
        write_version(dir.path(), &locator, "img", "3.2.0").unwrap();
        let updated = std::fs::read_to_string(dir.path().join("Dockerfile")).unwrap();
        assert!(updated.contains("LABEL version=\"3.2.0\""));
    }

    #[test]
    fn test_missing_manifest_is_typed() {
        let dir = tempfile::tempdir().unwrap();
        let result = read_version(dir.path(), &locator_json(), "pkg");
        assert!(matches!(result, Err(AdapterError::ManifestMissing { .. })));
    }

    #[test]
    fn test_package_substitution_in_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("Formula")).unwrap();
        std::fs::write(
            dir.path().join("Formula/mytool.rb"),
            "class Mytool\n  version \"0.9.0\"\nend\n",
        )
        .unwrap();

        let locator = VersionLocator {
            file: "Formula/{package}.rb".to_string(),
            field: None,
            pattern: Some(r#"version "([^"]+)""#.to_string()),
        };
        assert_eq!(
            read_version(dir.path(), &locator, "mytool").unwrap(),
            "0.9.0"
        );
    }
}
