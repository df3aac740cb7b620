//! YAML engine configuration.
//!
//! A file lists cache namespaces and detectors; each entry maps onto a
//! validated [`NamespaceConfig`] or [`DetectorConfig`]. Durations are plain
//! integers with the unit in the field name.
//!
//! ```yaml
//! namespaces:
//!   - name: profiles
//!     ttl_seconds: 300
//!     pattern: refresh-ahead
//!     refresh_ahead_fraction: 0.2
//!     versioned: true
//!     fetch_timeout_ms: 2000
//! detectors:
//!   - name: comments
//!     window_seconds: 60
//!     max_occurrences_per_window: 5
//!     similarity_method: simhash
//!     similarity_threshold: 5
//! ```
//!
//! [`EngineConfig::from_env`] reads the file named by `DEDUP_CACHE_CONFIG`.

use crate::cache::{CachePattern, NamespaceConfig, WriteBehindConfig};
use crate::detector::{DetectorConfig, NearDuplicateMethod, NearDuplicateScope};
use crate::guard::LockConfig;
use crate::invalidation::AdaptiveTtlConfig;
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Environment variable holding the configuration file path.
pub const CONFIG_ENV_VAR: &str = "DEDUP_CACHE_CONFIG";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    #[serde(default)]
    pub namespaces: Vec<NamespaceSection>,
    #[serde(default)]
    pub detectors: Vec<DetectorSection>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NamespaceSection {
    pub name: String,
    pub ttl_seconds: i64,
    #[serde(default = "default_pattern")]
    pub pattern: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_ahead_fraction: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub early_expiration_beta: Option<f64>,
    #[serde(default)]
    pub versioned: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetch_timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adaptive_ttl: Option<AdaptiveTtlSection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock: Option<LockSection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_behind: Option<WriteBehindSection>,
}

fn default_pattern() -> String {
    CachePattern::CacheAside.as_str().to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdaptiveTtlSection {
    pub min_seconds: u64,
    pub max_seconds: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LockSection {
    pub ttl_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub backoff_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WriteBehindSection {
    pub max_retries: Option<u32>,
    pub base_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub queue_capacity: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DetectorSection {
    pub name: String,
    pub window_seconds: i64,
    pub max_occurrences_per_window: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_max_occurrences: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit_per_window: Option<u64>,
    /// `simhash`, `minhash` or `none`.
    #[serde(default = "default_similarity_method")]
    pub similarity_method: String,
    /// Hamming distance bits for simhash, Jaccard similarity for minhash.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub similarity_threshold: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_hashes: Option<usize>,
    /// `per-sender` or `global`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint_window_len: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub whitelist_ttl_seconds: Option<u64>,
}

fn default_similarity_method() -> String {
    "simhash".to_string()
}

fn positive_seconds(field: String, value: i64) -> Result<Duration> {
    if value <= 0 {
        return Err(Error::configuration_with_context(
            "duration must be positive",
            ErrorContext::new()
                .with_field_path(field)
                .with_details(format!("got {}", value)),
        ));
    }
    Ok(Duration::from_secs(value as u64))
}

impl TryFrom<&NamespaceSection> for NamespaceConfig {
    type Error = Error;

    fn try_from(section: &NamespaceSection) -> Result<Self> {
        let field = |name: &str| format!("namespaces.{}.{}", section.name, name);

        let ttl = positive_seconds(field("ttl_seconds"), section.ttl_seconds)?;
        let pattern = section.pattern.parse::<CachePattern>().map_err(|e: Error| match e {
            Error::InvalidConfiguration { message, context } => Error::InvalidConfiguration {
                message,
                context: context.with_field_path(field("pattern")),
            },
            other => other,
        })?;

        let mut config = NamespaceConfig::new(section.name.clone(), ttl).with_pattern(pattern);
        if let Some(fraction) = section.refresh_ahead_fraction {
            config.refresh_ahead_fraction = fraction;
        }
        config.early_expiration = section.early_expiration_beta;
        config.versioned = section.versioned;
        config.fetch_timeout = section.fetch_timeout_ms.map(Duration::from_millis);
        config.adaptive_ttl = section.adaptive_ttl.as_ref().map(|a| AdaptiveTtlConfig {
            min_ttl: Duration::from_secs(a.min_seconds),
            max_ttl: Duration::from_secs(a.max_seconds),
            capacity: a.capacity.unwrap_or(AdaptiveTtlConfig::default().capacity),
        });
        if let Some(lock) = &section.lock {
            let defaults = LockConfig::default();
            config.lock = LockConfig {
                ttl: lock.ttl_ms.map_or(defaults.ttl, Duration::from_millis),
                max_retries: lock.max_retries.unwrap_or(defaults.max_retries),
                backoff: lock.backoff_ms.map_or(defaults.backoff, Duration::from_millis),
            };
        }
        if let Some(wb) = &section.write_behind {
            let defaults = WriteBehindConfig::default();
            config.write_behind = WriteBehindConfig {
                max_retries: wb.max_retries.unwrap_or(defaults.max_retries),
                base_delay: wb.base_delay_ms.map_or(defaults.base_delay, Duration::from_millis),
                max_delay: wb.max_delay_ms.map_or(defaults.max_delay, Duration::from_millis),
                queue_capacity: wb.queue_capacity.unwrap_or(defaults.queue_capacity),
            };
        }
        config.validate()?;
        Ok(config)
    }
}

impl TryFrom<&DetectorSection> for DetectorConfig {
    type Error = Error;

    fn try_from(section: &DetectorSection) -> Result<Self> {
        let field = |name: &str| format!("detectors.{}.{}", section.name, name);

        let window = positive_seconds(field("window_seconds"), section.window_seconds)?;
        let mut config =
            DetectorConfig::new(section.name.clone(), window, section.max_occurrences_per_window);
        if let Some(global) = section.global_max_occurrences {
            config.global_max_occurrences = global;
        }
        if let Some(rate) = section.rate_limit_per_window {
            config.rate_limit_per_window = rate;
        }

        config.method = match section.similarity_method.trim().to_ascii_lowercase().as_str() {
            "simhash" => {
                let threshold = section.similarity_threshold.unwrap_or(5.0);
                if threshold.fract() != 0.0 || !(1.0..=64.0).contains(&threshold) {
                    return Err(Error::invalid_field(
                        field("similarity_threshold"),
                        format!("simhash threshold must be a whole number of bits in 1..=64, got {}", threshold),
                    ));
                }
                NearDuplicateMethod::SimHash {
                    threshold: threshold as u32,
                }
            }
            "minhash" => NearDuplicateMethod::MinHash {
                num_hashes: section
                    .num_hashes
                    .unwrap_or(crate::fingerprint::DEFAULT_NUM_HASHES),
                min_similarity: section.similarity_threshold.unwrap_or(0.8),
            },
            "none" | "disabled" => NearDuplicateMethod::Disabled,
            other => {
                return Err(Error::configuration_with_context(
                    format!("unknown similarity method '{}'", other),
                    ErrorContext::new()
                        .with_field_path(field("similarity_method"))
                        .with_details("expected simhash, minhash or none"),
                ))
            }
        };

        if let Some(scope) = &section.scope {
            config.near_duplicate_scope = match scope.trim().to_ascii_lowercase().replace('_', "-").as_str() {
                "per-sender" | "sender" => NearDuplicateScope::PerSender,
                "global" => NearDuplicateScope::Global,
                other => {
                    return Err(Error::invalid_field(
                        field("scope"),
                        format!("unknown scope '{}', expected per-sender or global", other),
                    ))
                }
            };
        }
        if let Some(len) = section.fingerprint_window_len {
            config.fingerprint_window_len = len;
        }
        if let Some(secs) = section.whitelist_ttl_seconds {
            config.whitelist_ttl = Duration::from_secs(secs);
        }
        config.validate()?;
        Ok(config)
    }
}

impl EngineConfig {
    /// Parse and validate.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: EngineConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await?;
        let config = Self::from_yaml_str(&content)?;
        info!(
            path = %path.display(),
            namespaces = config.namespaces.len(),
            detectors = config.detectors.len(),
            "engine configuration loaded"
        );
        Ok(config)
    }

    /// Load the file named by `DEDUP_CACHE_CONFIG`. `Ok(None)` when it is unset.
    pub async fn from_env() -> Result<Option<Self>> {
        match std::env::var(CONFIG_ENV_VAR) {
            Ok(path) if !path.trim().is_empty() => Self::from_path(path.trim()).await.map(Some),
            _ => Ok(None),
        }
    }

    /// Check every entry, including duplicate names.
    pub fn validate(&self) -> Result<()> {
        self.namespace_configs()?;
        self.detector_configs()?;
        for (kind, names) in [
            ("namespaces", self.namespaces.iter().map(|n| n.name.as_str()).collect::<Vec<_>>()),
            ("detectors", self.detectors.iter().map(|d| d.name.as_str()).collect()),
        ] {
            let mut seen = std::collections::HashSet::new();
            for name in names {
                if !seen.insert(name) {
                    return Err(Error::invalid_field(
                        format!("{}.{}", kind, name),
                        format!("duplicate name '{}'", name),
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn namespace_configs(&self) -> Result<Vec<NamespaceConfig>> {
        self.namespaces.iter().map(NamespaceConfig::try_from).collect()
    }

    pub fn detector_configs(&self) -> Result<Vec<DetectorConfig>> {
        self.detectors.iter().map(DetectorConfig::try_from).collect()
    }

    pub fn namespace(&self, name: &str) -> Option<Result<NamespaceConfig>> {
        self.namespaces
            .iter()
            .find(|n| n.name == name)
            .map(NamespaceConfig::try_from)
    }

    pub fn detector(&self, name: &str) -> Option<Result<DetectorConfig>> {
        self.detectors
            .iter()
            .find(|d| d.name == name)
            .map(DetectorConfig::try_from)
    }
}
