use crate::template::TemplateHash;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which detector stage rejected a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RejectReason {
    RateLimit,
    ExactTemplate,
    NearDuplicate,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::RateLimit => "rate-limit",
            RejectReason::ExactTemplate => "exact-template",
            RejectReason::NearDuplicate => "near-duplicate",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why the stage fired, for audit logs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Evidence {
    /// Counter value against its limit.
    Count { observed: u64, limit: u64 },
    /// Closest SimHash distance found; near-duplicate below `threshold`.
    Distance { bits: u32, threshold: u32 },
    /// Highest MinHash Jaccard estimate found; near-duplicate at or above `threshold`.
    Similarity { jaccard: f64, threshold: f64 },
}

/// Outcome of [`DuplicateDetector::check`](super::DuplicateDetector::check).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    Allow {
        template_hash: TemplateHash,
        /// The template is whitelisted and skipped duplicate checks.
        whitelisted: bool,
    },
    Reject {
        reason: RejectReason,
        template_hash: TemplateHash,
        evidence: Evidence,
    },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow { .. })
    }

    pub fn is_rejected(&self) -> bool {
        !self.is_allowed()
    }

    pub fn reason(&self) -> Option<RejectReason> {
        match self {
            Decision::Reject { reason, .. } => Some(*reason),
            Decision::Allow { .. } => None,
        }
    }

    pub fn template_hash(&self) -> &TemplateHash {
        match self {
            Decision::Allow { template_hash, .. } | Decision::Reject { template_hash, .. } => {
                template_hash
            }
        }
    }

    pub fn evidence(&self) -> Option<&Evidence> {
        match self {
            Decision::Reject { evidence, .. } => Some(evidence),
            Decision::Allow { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reject_serializes_for_audit() {
        let decision = Decision::Reject {
            reason: RejectReason::ExactTemplate,
            template_hash: TemplateHash::of("abc"),
            evidence: Evidence::Count {
                observed: 6,
                limit: 5,
            },
        };
        let json = serde_json::to_value(&decision).unwrap();
        assert_eq!(json["decision"], "reject");
        assert_eq!(json["reason"], "exact-template");
        assert_eq!(json["evidence"]["kind"], "count");
        assert_eq!(json["evidence"]["observed"], 6);
        assert_eq!(
            json["template_hash"],
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(decision.reason(), Some(RejectReason::ExactTemplate));
        assert!(decision.is_rejected());
    }
}
