//! Template-based duplicate and spam detection.
//!
//! # Duplicate/Spam Detector
//!
//! [`DuplicateDetector::check`] runs a short-circuiting pipeline over the
//! shared backing store:
//!
//! | Stage | Store key | Rejects with |
//! |-------|-----------|--------------|
//! | rate limit | `rate:{ns}:{sender}` | [`RejectReason::RateLimit`] |
//! | whitelist | `whitelist:{ns}:{hash}` | never; a hit skips the next two stages |
//! | exact template | `occurrence:{ns}:{hash}:{sender}`, `occurrence:{ns}:{hash}` | [`RejectReason::ExactTemplate`] |
//! | near duplicate | `fingerprints:{ns}:{sender}` or `fingerprints:{ns}` | [`RejectReason::NearDuplicate`] |
//!
//! Counters are created with their window TTL in the same atomic step, so a
//! window starts with the first submission and ends `window` later. When the
//! store cannot be reached the affected stage is skipped: the detector fails
//! open rather than blocking traffic.
//!
//! ## Example
//!
//! ```rust
//! use dedup_cache::detector::{DetectorConfig, DuplicateDetector, RejectReason};
//! use dedup_cache::store::MemoryStore;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn demo() -> dedup_cache::Result<()> {
//! let detector = DuplicateDetector::new(
//!     Arc::new(MemoryStore::new()),
//!     DetectorConfig::new("comments", Duration::from_secs(60), 2),
//! )?;
//!
//! assert!(detector.check("u1", "price is 1000 dollars").await.is_allowed());
//! assert!(detector.check("u1", "price is 2000 dollars").await.is_allowed());
//! let third = detector.check("u1", "price is 3000 dollars").await;
//! assert_eq!(third.reason(), Some(RejectReason::ExactTemplate));
//! # Ok(())
//! # }
//! ```

mod config;
mod decision;

pub use config::{DetectorConfig, NearDuplicateMethod, NearDuplicateScope};
pub use decision::{Decision, Evidence, RejectReason};

use crate::fingerprint::{hamming_distance, jaccard_estimate, minhash, simhash, Fingerprint};
use crate::metrics::{noop_metrics, MetricEvent, MetricsSink};
use crate::store::BackingStore;
use crate::template::{TemplateHash, TemplateNormalizer};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One remembered submission in a fingerprint window.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WindowEntry {
    /// Keeps otherwise identical entries distinct inside the window.
    id: String,
    template: TemplateHash,
    fingerprint: Fingerprint,
}

pub struct DuplicateDetector {
    store: Arc<dyn BackingStore>,
    config: DetectorConfig,
    normalizer: TemplateNormalizer,
    metrics: Arc<dyn MetricsSink>,
}

impl DuplicateDetector {
    pub fn new(store: Arc<dyn BackingStore>, config: DetectorConfig) -> Result<Self> {
        config.validate()?;
        info!(
            detector = %config.name,
            window_ms = config.window.as_millis() as u64,
            max_occurrences = config.max_occurrences_per_window,
            store = store.name(),
            "duplicate detector registered"
        );
        Ok(Self {
            store,
            config,
            normalizer: TemplateNormalizer::new(),
            metrics: noop_metrics(),
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_normalizer(mut self, normalizer: TemplateNormalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn template_hash(&self, payload: &str) -> TemplateHash {
        self.normalizer.template_hash(payload)
    }

    /// Decide whether `sender` may submit `payload`. Never fails.
    pub async fn check(&self, sender: &str, payload: &str) -> Decision {
        let hash = self.template_hash(payload);
        let cfg = &self.config;

        if let Some(count) = self.count(&self.rate_key(sender)).await {
            if count > cfg.rate_limit_per_window {
                return self.reject(
                    sender,
                    RejectReason::RateLimit,
                    hash,
                    Evidence::Count {
                        observed: count,
                        limit: cfg.rate_limit_per_window,
                    },
                );
            }
        }

        match self.is_whitelisted(&hash).await {
            Ok(true) => {
                return Decision::Allow {
                    template_hash: hash,
                    whitelisted: true,
                }
            }
            Ok(false) => {}
            Err(e) => warn!(detector = %cfg.name, "whitelist lookup failed, continuing: {}", e),
        }

        let per_sender = self.count(&self.sender_occurrence_key(&hash, sender)).await;
        let global = self.count(&self.occurrence_key(&hash)).await;
        if let Some(count) = per_sender.filter(|c| *c > cfg.max_occurrences_per_window) {
            return self.reject(
                sender,
                RejectReason::ExactTemplate,
                hash,
                Evidence::Count {
                    observed: count,
                    limit: cfg.max_occurrences_per_window,
                },
            );
        }
        if let Some(count) = global.filter(|c| *c > cfg.global_max_occurrences) {
            return self.reject(
                sender,
                RejectReason::ExactTemplate,
                hash,
                Evidence::Count {
                    observed: count,
                    limit: cfg.global_max_occurrences,
                },
            );
        }

        if let Some(evidence) = self.near_duplicate(sender, payload, &hash).await {
            return self.reject(sender, RejectReason::NearDuplicate, hash, evidence);
        }

        Decision::Allow {
            template_hash: hash,
            whitelisted: false,
        }
    }

    /// Exempt a template from the duplicate stages until the whitelist TTL runs out.
    /// The rate limit still applies.
    pub async fn whitelist(&self, hash: &TemplateHash) -> Result<()> {
        self.store
            .set(&self.whitelist_key(hash), b"1", self.config.whitelist_ttl)
            .await?;
        info!(detector = %self.config.name, template = %hash, "template whitelisted");
        Ok(())
    }

    pub async fn remove_from_whitelist(&self, hash: &TemplateHash) -> Result<bool> {
        Ok(self.store.delete(&[self.whitelist_key(hash)]).await? > 0)
    }

    pub async fn is_whitelisted(&self, hash: &TemplateHash) -> Result<bool> {
        Ok(self.store.get(&self.whitelist_key(hash)).await?.is_some())
    }

    /// Compare against the scope's recent fingerprints of other templates.
    /// Any match within the threshold rejects, reporting the closest one;
    /// otherwise the fingerprint is recorded.
    async fn near_duplicate(
        &self,
        sender: &str,
        payload: &str,
        hash: &TemplateHash,
    ) -> Option<Evidence> {
        let fingerprint = match self.config.method {
            NearDuplicateMethod::SimHash { .. } => Fingerprint::SimHash(simhash(payload, 64)),
            NearDuplicateMethod::MinHash { num_hashes, .. } => {
                Fingerprint::MinHash(minhash(payload, num_hashes))
            }
            NearDuplicateMethod::Disabled => return None,
        };
        let key = self.fingerprint_key(sender);

        let members = match self.store.window_members(&key, self.config.window).await {
            Ok(members) => members,
            Err(e) => {
                warn!(detector = %self.config.name, "fingerprint window unavailable, skipping near-duplicate check: {}", e);
                return None;
            }
        };

        let mut closest: Option<Evidence> = None;
        for raw in &members {
            let Ok(entry) = serde_json::from_str::<WindowEntry>(raw) else {
                continue;
            };
            if entry.template == *hash {
                continue;
            }
            if let Some(evidence) = self.compare(&fingerprint, &entry.fingerprint) {
                if closer(&evidence, closest.as_ref()) {
                    closest = Some(evidence);
                }
            }
        }

        if closest.is_some() {
            return closest;
        }

        let entry = WindowEntry {
            id: uuid::Uuid::new_v4().to_string(),
            template: *hash,
            fingerprint,
        };
        match serde_json::to_string(&entry) {
            Ok(member) => {
                if let Err(e) = self
                    .store
                    .window_push(
                        &key,
                        &member,
                        self.config.window,
                        self.config.fingerprint_window_len,
                    )
                    .await
                {
                    warn!(detector = %self.config.name, "failed to record fingerprint: {}", e);
                }
            }
            Err(e) => warn!(detector = %self.config.name, "failed to encode fingerprint: {}", e),
        }
        None
    }

    /// Evidence when `a` and `b` are near-duplicates under the configured method.
    fn compare(&self, a: &Fingerprint, b: &Fingerprint) -> Option<Evidence> {
        match (&self.config.method, a, b) {
            (NearDuplicateMethod::SimHash { threshold }, Fingerprint::SimHash(a), Fingerprint::SimHash(b)) => {
                let bits = hamming_distance(*a, *b);
                (bits < *threshold).then_some(Evidence::Distance {
                    bits,
                    threshold: *threshold,
                })
            }
            (
                NearDuplicateMethod::MinHash { min_similarity, .. },
                Fingerprint::MinHash(a),
                Fingerprint::MinHash(b),
            ) => {
                let jaccard = jaccard_estimate(a, b);
                (jaccard >= *min_similarity).then_some(Evidence::Similarity {
                    jaccard,
                    threshold: *min_similarity,
                })
            }
            // entries recorded under another method
            _ => None,
        }
    }

    /// Atomic window counter. `None` when the store failed.
    async fn count(&self, key: &str) -> Option<u64> {
        match self.store.incr_with_ttl(key, self.config.window).await {
            Ok(count) => Some(count),
            Err(e) => {
                warn!(detector = %self.config.name, key, "counter unavailable, failing open: {}", e);
                None
            }
        }
    }

    fn reject(
        &self,
        sender: &str,
        reason: RejectReason,
        template_hash: TemplateHash,
        evidence: Evidence,
    ) -> Decision {
        debug!(
            detector = %self.config.name,
            sender,
            reason = %reason,
            template = %template_hash,
            ?evidence,
            "submission rejected"
        );
        self.metrics
            .record(&self.config.name, MetricEvent::DetectorRejected(reason));
        Decision::Reject {
            reason,
            template_hash,
            evidence,
        }
    }

    fn rate_key(&self, sender: &str) -> String {
        format!("rate:{}:{}", self.config.name, sender)
    }

    fn occurrence_key(&self, hash: &TemplateHash) -> String {
        format!("occurrence:{}:{}", self.config.name, hash)
    }

    fn sender_occurrence_key(&self, hash: &TemplateHash, sender: &str) -> String {
        format!("occurrence:{}:{}:{}", self.config.name, hash, sender)
    }

    fn whitelist_key(&self, hash: &TemplateHash) -> String {
        format!("whitelist:{}:{}", self.config.name, hash)
    }

    fn fingerprint_key(&self, sender: &str) -> String {
        match self.config.near_duplicate_scope {
            NearDuplicateScope::PerSender => format!("fingerprints:{}:{}", self.config.name, sender),
            NearDuplicateScope::Global => format!("fingerprints:{}", self.config.name),
        }
    }
}

fn closer(candidate: &Evidence, current: Option<&Evidence>) -> bool {
    match (candidate, current) {
        (_, None) => true,
        (Evidence::Distance { bits: a, .. }, Some(Evidence::Distance { bits: b, .. })) => a < b,
        (Evidence::Similarity { jaccard: a, .. }, Some(Evidence::Similarity { jaccard: b, .. })) => {
            a > b
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::time::Duration;

    fn detector(config: DetectorConfig) -> DuplicateDetector {
        DuplicateDetector::new(Arc::new(MemoryStore::new()), config).unwrap()
    }

    #[tokio::test]
    async fn test_keys_are_namespaced() {
        let d = detector(DetectorConfig::new("comments", Duration::from_secs(60), 5));
        let h = TemplateHash::of("t");
        assert_eq!(d.rate_key("u1"), "rate:comments:u1");
        assert_eq!(d.occurrence_key(&h), format!("occurrence:comments:{}", h));
        assert_eq!(d.sender_occurrence_key(&h, "u1"), format!("occurrence:comments:{}:u1", h));
        assert_eq!(d.fingerprint_key("u1"), "fingerprints:comments:u1");
    }

    #[tokio::test]
    async fn test_whitelist_round_trip() {
        let d = detector(DetectorConfig::new("comments", Duration::from_secs(60), 1));
        let h = d.template_hash("health check 1234");
        assert!(!d.is_whitelisted(&h).await.unwrap());
        d.whitelist(&h).await.unwrap();
        assert!(d.is_whitelisted(&h).await.unwrap());
        assert!(d.remove_from_whitelist(&h).await.unwrap());
        assert!(!d.remove_from_whitelist(&h).await.unwrap());
    }

    #[test]
    fn test_closer_prefers_stronger_evidence() {
        let near = Evidence::Distance { bits: 1, threshold: 5 };
        let far = Evidence::Distance { bits: 4, threshold: 5 };
        assert!(closer(&near, Some(&far)));
        assert!(!closer(&far, Some(&near)));
        assert!(closer(&far, None));
    }

    #[tokio::test]
    async fn test_disabled_method_never_flags() {
        let d = detector(
            DetectorConfig::new("c", Duration::from_secs(60), 2)
                .with_method(NearDuplicateMethod::Disabled),
        );
        for word in ["alpha", "bravo", "charlie", "delta"] {
            let decision = d.check("u1", &format!("win a free cruise {}", word)).await;
            assert!(decision.is_allowed());
        }
    }
}
