//! Built-in platform descriptors.
//!
//! These seed the data directory's `platforms/` on first run. Operators
//! edit the seeded JSON files to adjust endpoints or rollback commands;
//! edited files win over the built-ins on every later run.
//!
//! Rollback capabilities mirror what the registries actually permit:
//! npm unpublishes (within its grace window) or rewrites dist-tags,
//! crates.io yanks, Docker Hub retags, PyPI yanks only with an explicit
//! operator confirmation, Maven Central and Packagist are immutable.

use std::collections::BTreeMap;

use super::descriptor::{
    AuthScheme, PlatformDescriptor, RecoveryAction, RollbackCapability, RollbackMethod,
    VersionLocator,
};

fn cmd(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

pub fn builtin_descriptors() -> Vec<PlatformDescriptor> {
    vec![
        PlatformDescriptor {
            name: "npm".to_string(),
            ecosystem: "javascript".to_string(),
            registry_base_url: "https://registry.npmjs.org".to_string(),
            metadata_api_url: "https://registry.npmjs.org/{package}/{version}".to_string(),
            health_url: Some("https://registry.npmjs.org/-/ping".to_string()),
            required_files: vec!["package.json".to_string()],
            optional_files: vec!["README.md".to_string(), ".npmignore".to_string()],
            version_locator: VersionLocator {
                file: "package.json".to_string(),
                field: Some("version".to_string()),
                pattern: None,
            },
            rollback_capability: RollbackCapability::Unpublish,
            rollback_methods: vec![
                RollbackMethod {
                    name: "unpublish".to_string(),
                    command: cmd(&["npm", "unpublish", "{package}@{version}"]),
                    timeout_secs: 120,
                    requires_confirmation: true,
                },
                RollbackMethod {
                    name: "dist-tag-previous".to_string(),
                    command: cmd(&[
                        "npm",
                        "dist-tag",
                        "add",
                        "{package}@{previous_version}",
                        "latest",
                    ]),
                    timeout_secs: 60,
                    requires_confirmation: false,
                },
            ],
            auth_scheme: AuthScheme::BearerToken,
            recovery_actions: vec![RecoveryAction {
                name: "restore-latest-tag".to_string(),
                command: cmd(&[
                    "npm",
                    "dist-tag",
                    "add",
                    "{package}@{previous_version}",
                    "latest",
                ]),
                timeout_secs: 60,
            }],
            extra: BTreeMap::new(),
        },
        PlatformDescriptor {
            name: "pypi".to_string(),
            ecosystem: "python".to_string(),
            registry_base_url: "https://upload.pypi.org/legacy/".to_string(),
            metadata_api_url: "https://pypi.org/pypi/{package}/{version}/json".to_string(),
            health_url: Some("https://pypi.org/simple/".to_string()),
            required_files: vec!["pyproject.toml".to_string()],
            optional_files: vec!["README.md".to_string(), "LICENSE".to_string()],
            version_locator: VersionLocator {
                file: "pyproject.toml".to_string(),
                field: Some("project.version".to_string()),
                pattern: None,
            },
            // PyPI forbids re-upload and unpublish; yanking exists but is
            // destructive enough to gate behind operator confirmation.
            rollback_capability: RollbackCapability::Yank,
            rollback_methods: vec![RollbackMethod {
                name: "yank".to_string(),
                command: cmd(&["pypi-yank", "{package}", "{version}"]),
                timeout_secs: 120,
                requires_confirmation: true,
            }],
            auth_scheme: AuthScheme::Userpass,
            recovery_actions: Vec::new(),
            extra: BTreeMap::new(),
        },
        PlatformDescriptor {
            name: "cargo".to_string(),
            ecosystem: "rust".to_string(),
            registry_base_url: "https://crates.io".to_string(),
            metadata_api_url: "https://crates.io/api/v1/crates/{package}/{version}".to_string(),
            health_url: Some("https://crates.io/api/v1/summary".to_string()),
            required_files: vec!["Cargo.toml".to_string(), "src".to_string()],
            optional_files: vec!["README.md".to_string()],
            version_locator: VersionLocator {
                file: "Cargo.toml".to_string(),
                field: Some("package.version".to_string()),
                pattern: None,
            },
            rollback_capability: RollbackCapability::Yank,
            rollback_methods: vec![RollbackMethod {
                name: "yank".to_string(),
                command: cmd(&["cargo", "yank", "--version", "{version}", "{package}"]),
                timeout_secs: 120,
                requires_confirmation: false,
            }],
            auth_scheme: AuthScheme::BearerToken,
            recovery_actions: Vec::new(),
            extra: BTreeMap::new(),
        },
        PlatformDescriptor {
            name: "dockerhub".to_string(),
            ecosystem: "container".to_string(),
            registry_base_url: "https://registry-1.docker.io".to_string(),
            metadata_api_url: "https://hub.docker.com/v2/repositories/{package}/tags/{version}"
                .to_string(),
            health_url: Some("https://hub.docker.com/v2/".to_string()),
            required_files: vec!["Dockerfile".to_string()],
            optional_files: vec![".dockerignore".to_string()],
            version_locator: VersionLocator {
                file: "Dockerfile".to_string(),
                field: None,
                pattern: Some(r#"(?m)^LABEL version="([^"]+)""#.to_string()),
            },
            rollback_capability: RollbackCapability::RetagImage,
            rollback_methods: vec![RollbackMethod {
                name: "retag-latest-previous".to_string(),
                command: cmd(&[
                    "docker",
                    "buildx",
                    "imagetools",
                    "create",
                    "--tag",
                    "{package}:latest",
                    "{package}:{previous_version}",
                ]),
                timeout_secs: 180,
                requires_confirmation: false,
            }],
            auth_scheme: AuthScheme::Userpass,
            recovery_actions: vec![RecoveryAction {
                name: "remove-bad-tag".to_string(),
                command: cmd(&["hub-tool", "tag", "rm", "--force", "{package}:{version}"]),
                timeout_secs: 60,
            }],
            extra: BTreeMap::new(),
        },
        PlatformDescriptor {
            name: "maven".to_string(),
            ecosystem: "java".to_string(),
            registry_base_url: "https://repo1.maven.org/maven2".to_string(),
            metadata_api_url:
                "https://search.maven.org/solrsearch/select?q=a:{package}%20AND%20v:{version}"
                    .to_string(),
            health_url: Some("https://repo1.maven.org/maven2/".to_string()),
            required_files: vec!["pom.xml".to_string()],
            optional_files: vec!["settings.xml".to_string()],
            version_locator: VersionLocator {
                file: "pom.xml".to_string(),
                field: None,
                pattern: Some(r"<version>([^<]+)</version>".to_string()),
            },
            // Maven Central is immutable once a release syncs.
            rollback_capability: RollbackCapability::None,
            rollback_methods: Vec::new(),
            auth_scheme: AuthScheme::Userpass,
            recovery_actions: Vec::new(),
            extra: generic_commands(
                &["mvn", "-B", "package"],
                &["mvn", "-B", "deploy", "-DskipTests"],
                Some(&["mvn", "-B", "dependency:resolve"]),
            ),
        },
        PlatformDescriptor {
            name: "nuget".to_string(),
            ecosystem: "dotnet".to_string(),
            registry_base_url: "https://www.nuget.org".to_string(),
            metadata_api_url:
                "https://api.nuget.org/v3/registration5-semver1/{package}/{version}.json"
                    .to_string(),
            health_url: Some("https://api.nuget.org/v3/index.json".to_string()),
            required_files: vec!["package.nuspec".to_string()],
            optional_files: vec!["README.md".to_string()],
            version_locator: VersionLocator {
                file: "package.nuspec".to_string(),
                field: None,
                pattern: Some(r"<version>([^<]+)</version>".to_string()),
            },
            // nuget.org "delete" unlists, it does not destroy
            rollback_capability: RollbackCapability::Yank,
            rollback_methods: vec![RollbackMethod {
                name: "unlist".to_string(),
                command: cmd(&[
                    "dotnet",
                    "nuget",
                    "delete",
                    "{package}",
                    "{version}",
                    "--source",
                    "https://api.nuget.org/v3/index.json",
                    "--non-interactive",
                ]),
                timeout_secs: 120,
                requires_confirmation: false,
            }],
            auth_scheme: AuthScheme::BearerToken,
            recovery_actions: Vec::new(),
            extra: generic_commands(
                &["dotnet", "pack", "-c", "Release"],
                &[
                    "dotnet",
                    "nuget",
                    "push",
                    "bin/Release/{package}.{version}.nupkg",
                    "--source",
                    "https://api.nuget.org/v3/index.json",
                ],
                Some(&["dotnet", "restore"]),
            ),
        },
        PlatformDescriptor {
            name: "packagist".to_string(),
            ecosystem: "php".to_string(),
            registry_base_url: "https://packagist.org".to_string(),
            metadata_api_url: "https://repo.packagist.org/p2/{package}.json".to_string(),
            health_url: Some("https://packagist.org/".to_string()),
            required_files: vec!["composer.json".to_string()],
            optional_files: vec!["composer.lock".to_string()],
            version_locator: VersionLocator {
                file: "composer.json".to_string(),
                field: Some("version".to_string()),
                pattern: None,
            },
            // Packagist mirrors VCS tags; there is no CLI rollback path.
            rollback_capability: RollbackCapability::None,
            rollback_methods: Vec::new(),
            auth_scheme: AuthScheme::BearerToken,
            recovery_actions: Vec::new(),
            extra: generic_commands(
                &["composer", "validate", "--strict"],
                &["git", "push", "origin", "HEAD", "--tags"],
                Some(&["composer", "install", "--dry-run"]),
            ),
        },
        PlatformDescriptor {
            name: "homebrew".to_string(),
            ecosystem: "homebrew".to_string(),
            registry_base_url: "https://formulae.brew.sh".to_string(),
            metadata_api_url: "https://formulae.brew.sh/api/formula/{package}.json".to_string(),
            health_url: Some("https://formulae.brew.sh/api/formula.json".to_string()),
            required_files: vec!["Formula/{package}.rb".to_string()],
            optional_files: vec!["README.md".to_string()],
            version_locator: VersionLocator {
                file: "Formula/{package}.rb".to_string(),
                field: None,
                pattern: Some(r#"version "([^"]+)""#.to_string()),
            },
            rollback_capability: RollbackCapability::TagRewrite,
            rollback_methods: vec![RollbackMethod {
                name: "revert-formula".to_string(),
                command: cmd(&["git", "revert", "--no-edit", "HEAD"]),
                timeout_secs: 60,
                requires_confirmation: false,
            }],
            auth_scheme: AuthScheme::None,
            recovery_actions: vec![RecoveryAction {
                name: "push-revert".to_string(),
                command: cmd(&["git", "push", "origin", "HEAD"]),
                timeout_secs: 60,
            }],
            extra: generic_commands(
                &["brew", "style", "Formula/{package}.rb"],
                &["git", "push", "origin", "HEAD"],
                None,
            ),
        },
    ]
}

/// Command templates the generic adapter reads from descriptor extras.
///
/// Platforms without a dedicated adapter (maven, nuget, packagist,
/// homebrew) drive the whole lifecycle from these.
fn generic_commands(
    build: &[&str],
    deploy: &[&str],
    dependency_check: Option<&[&str]>,
) -> BTreeMap<String, serde_json::Value> {
    let mut extra = BTreeMap::new();
    extra.insert(
        "build_command".to_string(),
        serde_json::json!(cmd(build)),
    );
    extra.insert(
        "deploy_command".to_string(),
        serde_json::json!(cmd(deploy)),
    );
    if let Some(check) = dependency_check {
        extra.insert(
            "dependency_check_command".to_string(),
            serde_json::json!(cmd(check)),
        );
    }
    extra
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eight_builtins_with_unique_names() {
        let descriptors = builtin_descriptors();
        assert_eq!(descriptors.len(), 8);

        let mut names: Vec<&str> = descriptors.iter().map(|d| d.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), 8);
    }

    #[test]
    fn test_immutable_registries_declare_no_rollback() {
        let descriptors = builtin_descriptors();
        for name in ["maven", "packagist"] {
            let desc = descriptors.iter().find(|d| d.name == name).unwrap();
            assert_eq!(desc.rollback_capability, RollbackCapability::None);
            assert!(desc.rollback_methods.is_empty());
        }
    }

    #[test]
    fn test_pypi_yank_requires_confirmation() {
        let descriptors = builtin_descriptors();
        let pypi = descriptors.iter().find(|d| d.name == "pypi").unwrap();
        assert!(pypi.rollback_methods.iter().all(|m| m.requires_confirmation));
    }
}
