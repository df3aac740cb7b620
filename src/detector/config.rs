use crate::{Error, ErrorContext, Result};
use std::time::Duration;

/// Near-duplicate comparison used by the last detector stage.
#[derive(Debug, Clone, PartialEq)]
pub enum NearDuplicateMethod {
    /// SimHash over 64 bits; near-duplicate when the Hamming distance is below `threshold`.
    SimHash { threshold: u32 },
    /// MinHash signatures; near-duplicate when the Jaccard estimate reaches `min_similarity`.
    MinHash {
        num_hashes: usize,
        min_similarity: f64,
    },
    Disabled,
}

impl Default for NearDuplicateMethod {
    fn default() -> Self {
        NearDuplicateMethod::SimHash { threshold: 5 }
    }
}

/// Whose recent payloads a submission is compared against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NearDuplicateScope {
    #[default]
    PerSender,
    Global,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectorConfig {
    pub name: String,
    /// Length of every counting and fingerprint window.
    pub window: Duration,
    /// Same template from one sender; the next one is rejected.
    pub max_occurrences_per_window: u64,
    /// Same template from anyone.
    pub global_max_occurrences: u64,
    /// Submissions of any kind from one sender.
    pub rate_limit_per_window: u64,
    pub method: NearDuplicateMethod,
    pub near_duplicate_scope: NearDuplicateScope,
    /// Fingerprints kept per window.
    pub fingerprint_window_len: usize,
    pub whitelist_ttl: Duration,
}

impl DetectorConfig {
    pub fn new(name: impl Into<String>, window: Duration, max_occurrences_per_window: u64) -> Self {
        Self {
            name: name.into(),
            window,
            max_occurrences_per_window,
            global_max_occurrences: max_occurrences_per_window.saturating_mul(10),
            rate_limit_per_window: 100,
            method: NearDuplicateMethod::default(),
            near_duplicate_scope: NearDuplicateScope::PerSender,
            fingerprint_window_len: 256,
            whitelist_ttl: Duration::from_secs(30 * 24 * 60 * 60),
        }
    }

    pub fn with_global_max(mut self, max: u64) -> Self {
        self.global_max_occurrences = max;
        self
    }

    pub fn with_rate_limit(mut self, per_window: u64) -> Self {
        self.rate_limit_per_window = per_window;
        self
    }

    pub fn with_method(mut self, method: NearDuplicateMethod) -> Self {
        self.method = method;
        self
    }

    pub fn with_scope(mut self, scope: NearDuplicateScope) -> Self {
        self.near_duplicate_scope = scope;
        self
    }

    pub fn with_fingerprint_window_len(mut self, len: usize) -> Self {
        self.fingerprint_window_len = len;
        self
    }

    pub fn with_whitelist_ttl(mut self, ttl: Duration) -> Self {
        self.whitelist_ttl = ttl;
        self
    }

    pub fn validate(&self) -> Result<()> {
        let field = |name: &str| format!("detectors.{}.{}", self.name, name);

        if self.name.trim().is_empty() {
            return Err(Error::invalid_field("detector.name", "detector name must not be empty"));
        }
        if self.window.is_zero() {
            return Err(Error::invalid_field(field("window"), "window must be positive"));
        }
        if self.max_occurrences_per_window == 0 {
            return Err(Error::invalid_field(
                field("max_occurrences_per_window"),
                "max occurrences must be at least 1",
            ));
        }
        if self.global_max_occurrences < self.max_occurrences_per_window {
            return Err(Error::configuration_with_context(
                "global threshold below per-sender threshold",
                ErrorContext::new()
                    .with_field_path(field("global_max_occurrences"))
                    .with_details(format!(
                        "{} < {}",
                        self.global_max_occurrences, self.max_occurrences_per_window
                    )),
            ));
        }
        if self.rate_limit_per_window == 0 {
            return Err(Error::invalid_field(
                field("rate_limit_per_window"),
                "rate limit must be at least 1",
            ));
        }
        match self.method {
            NearDuplicateMethod::SimHash { threshold } if threshold == 0 || threshold > 64 => {
                return Err(Error::invalid_field(
                    field("similarity_threshold"),
                    format!("simhash threshold must be in 1..=64, got {}", threshold),
                ));
            }
            NearDuplicateMethod::MinHash {
                num_hashes,
                min_similarity,
            } => {
                if num_hashes == 0 {
                    return Err(Error::invalid_field(
                        field("num_hashes"),
                        "minhash needs at least one hash",
                    ));
                }
                if !(min_similarity > 0.0 && min_similarity <= 1.0) {
                    return Err(Error::invalid_field(
                        field("similarity_threshold"),
                        format!("minhash similarity must be in (0, 1], got {}", min_similarity),
                    ));
                }
            }
            _ => {}
        }
        if self.fingerprint_window_len == 0 {
            return Err(Error::invalid_field(
                field("fingerprint_window_len"),
                "fingerprint window must hold at least one entry",
            ));
        }
        if self.whitelist_ttl.is_zero() {
            return Err(Error::invalid_field(field("whitelist_ttl"), "whitelist ttl must be positive"));
        }
        Ok(())
    }
}
