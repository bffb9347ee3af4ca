//! Registry metadata API client.
//!
//! Verify and rollback read the registry's *public* metadata endpoint,
//! never the local tool's cache: the registry's answer is the only one
//! that matters for "is this release actually live". The same client
//! backs health probes and the before/after snapshots on rollback
//! records.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::time::{Duration, Instant};

use crate::domain::PlatformDescriptor;

/// Advisory registry health
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Ok,
    Degraded,
    Down,
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Ok => "ok",
            Self::Degraded => "degraded",
            Self::Down => "down",
        };
        write!(f, "{}", s)
    }
}

/// Result of one health probe
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub platform: String,
    pub state: HealthState,
    pub checked_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// What the metadata endpoint reported for a package/version
#[derive(Debug, Clone)]
pub enum MetadataLookup {
    /// Release is visible; payload is the registry's metadata document
    Present(serde_json::Value),
    /// Endpoint answered but the release is not there (404)
    NotFound,
}

/// Client for public registry metadata endpoints
pub struct MetadataClient {
    client: Client,
}

impl MetadataClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .user_agent(concat!("armada/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client })
    }

    /// Look up one package/version on the registry's metadata API.
    pub async fn lookup(
        &self,
        descriptor: &PlatformDescriptor,
        package: &str,
        version: &str,
    ) -> Result<MetadataLookup> {
        let url = descriptor.metadata_url(package, version);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Metadata request to {} failed", url))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(MetadataLookup::NotFound);
        }

        if !response.status().is_success() {
            anyhow::bail!(
                "Metadata endpoint {} returned status {}",
                url,
                response.status()
            );
        }

        let body = response
            .json::<serde_json::Value>()
            .await
            .with_context(|| format!("Failed to parse metadata from {}", url))?;

        Ok(MetadataLookup::Present(body))
    }

    /// Package-level metadata document, used for rollback audit
    /// snapshots. Absence is recorded as a JSON null, not an error.
    pub async fn snapshot(
        &self,
        descriptor: &PlatformDescriptor,
        package: &str,
    ) -> serde_json::Value {
        match self.lookup(descriptor, package, "").await {
            Ok(MetadataLookup::Present(value)) => value,
            Ok(MetadataLookup::NotFound) => serde_json::Value::Null,
            Err(e) => serde_json::json!({ "snapshot_error": e.to_string() }),
        }
    }

    /// Published versions for a package, best-effort across registry
    /// payload shapes (npm's `versions` map, PyPI's `releases` map,
    /// crates.io's `versions` array).
    pub async fn list_versions(
        &self,
        descriptor: &PlatformDescriptor,
        package: &str,
    ) -> Result<Vec<String>> {
        match self.lookup(descriptor, package, "").await? {
            MetadataLookup::Present(body) => {
                let mut versions = extract_versions(&body);
                versions.sort_by(|a, b| compare_versions(a, b));
                Ok(versions)
            }
            MetadataLookup::NotFound => Ok(Vec::new()),
        }
    }

    /// Greatest published version strictly below `version`; the rollback
    /// engine freezes this at rollback-open time.
    pub async fn previous_version(
        &self,
        descriptor: &PlatformDescriptor,
        package: &str,
        version: &str,
    ) -> Result<Option<String>> {
        let versions = self.list_versions(descriptor, package).await?;
        Ok(versions
            .into_iter()
            .filter(|v| compare_versions(v, version) == Ordering::Less)
            .next_back())
    }

    /// Time-bounded probe of the descriptor's health endpoint.
    ///
    /// Side-effect-free and advisory: 2xx within the threshold is `ok`,
    /// a slow or non-2xx answer is `degraded`, no answer is `down`.
    pub async fn health(&self, descriptor: &PlatformDescriptor) -> HealthReport {
        const DEGRADED_LATENCY: Duration = Duration::from_secs(3);

        let url = descriptor.health_url();
        let start = Instant::now();

        let (state, latency_ms, detail) = match self.client.get(url).send().await {
            Ok(response) => {
                let latency = start.elapsed();
                let latency_ms = latency.as_millis() as u64;
                if response.status().is_success() {
                    if latency > DEGRADED_LATENCY {
                        (
                            HealthState::Degraded,
                            Some(latency_ms),
                            Some(format!("slow response: {}ms", latency_ms)),
                        )
                    } else {
                        (HealthState::Ok, Some(latency_ms), None)
                    }
                } else {
                    (
                        HealthState::Degraded,
                        Some(latency_ms),
                        Some(format!("status {}", response.status())),
                    )
                }
            }
            Err(e) => (HealthState::Down, None, Some(e.to_string())),
        };

        HealthReport {
            platform: descriptor.name.clone(),
            state,
            checked_at: Utc::now(),
            latency_ms,
            detail,
        }
    }
}

/// Pull version strings out of the registry payload shapes we know.
fn extract_versions(body: &serde_json::Value) -> Vec<String> {
    // npm: {"versions": {"1.0.0": {...}}} / crates.io: {"versions": [{"num": "1.0.0"}]}
    if let Some(versions) = body.get("versions") {
        if let Some(map) = versions.as_object() {
            return map.keys().cloned().collect();
        }
        if let Some(list) = versions.as_array() {
            return list
                .iter()
                .filter_map(|v| {
                    v.get("num")
                        .or_else(|| v.get("version"))
                        .and_then(|n| n.as_str())
                        .map(|s| s.to_string())
                })
                .collect();
        }
    }

    // PyPI: {"releases": {"1.0.0": [...]}}
    if let Some(map) = body.get("releases").and_then(|r| r.as_object()) {
        return map.keys().cloned().collect();
    }

    // Packagist: {"packages": {"name": [{"version": "1.0.0"}]}}
    if let Some(packages) = body.get("packages").and_then(|p| p.as_object()) {
        return packages
            .values()
            .filter_map(|v| v.as_array())
            .flatten()
            .filter_map(|v| v.get("version").and_then(|s| s.as_str()))
            .map(|s| s.to_string())
            .collect();
    }

    // Plain array of strings
    if let Some(list) = body.as_array() {
        return list
            .iter()
            .filter_map(|v| v.as_str().map(|s| s.to_string()))
            .collect();
    }

    Vec::new()
}

/// Dotted-version ordering: numeric segments compare numerically,
/// everything else lexically. Good enough for "previous version" across
/// ecosystems without dragging in per-ecosystem semver rules.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let split = |s: &str| -> Vec<String> {
        s.split(|c: char| c == '.' || c == '-' || c == '+')
            .map(|p| p.to_string())
            .collect()
    };

    let (pa, pb) = (split(a), split(b));
    for i in 0..pa.len().max(pb.len()) {
        let (sa, sb) = match (pa.get(i), pb.get(i)) {
            (Some(sa), Some(sb)) => (sa, sb),
            // 1.2 < 1.2.1, but 1.2 > 1.2-rc1
            (None, Some(sb)) => {
                return if sb.parse::<u64>().is_ok() {
                    Ordering::Less
                } else {
                    Ordering::Greater
                }
            }
            (Some(sa), None) => {
                return if sa.parse::<u64>().is_ok() {
                    Ordering::Greater
                } else {
                    Ordering::Less
                }
            }
            (None, None) => return Ordering::Equal,
        };

        let ord = match (sa.parse::<u64>(), sb.parse::<u64>()) {
            (Ok(na), Ok(nb)) => na.cmp(&nb),
            _ => sa.cmp(sb),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compare_versions_numeric() {
        assert_eq!(compare_versions("1.2.3", "1.10.0"), Ordering::Less);
        assert_eq!(compare_versions("2.0.0", "2.0.0"), Ordering::Equal);
        assert_eq!(compare_versions("1.2.10", "1.2.9"), Ordering::Greater);
    }

    #[test]
    fn test_compare_versions_prerelease() {
        assert_eq!(compare_versions("1.2.0-rc1", "1.2.0"), Ordering::Less);
        assert_eq!(compare_versions("1.2", "1.2.1"), Ordering::Less);
    }

    #[test]
    fn test_extract_versions_npm_shape() {
        let body = serde_json::json!({
            "versions": {"1.0.0": {}, "1.1.0": {}}
        });
        let mut versions = extract_versions(&body);
        versions.sort();
        assert_eq!(versions, vec!["1.0.0", "1.1.0"]);
    }

    #[test]
    fn test_extract_versions_cargo_shape() {
        let body = serde_json::json!({
            "versions": [{"num": "0.3.0"}, {"num": "0.2.0"}]
        });
        assert_eq!(extract_versions(&body), vec!["0.3.0", "0.2.0"]);
    }

    #[test]
    fn test_extract_versions_pypi_shape() {
        let body = serde_json::json!({
            "releases": {"3.0.0": [], "2.9.0": []}
        });
        let mut versions = extract_versions(&body);
        versions.sort();
        assert_eq!(versions, vec!["2.9.0", "3.0.0"]);
    }
}
