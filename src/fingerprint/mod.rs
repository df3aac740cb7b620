//! Similarity fingerprints over the raw (un-normalized) payload.
//!
//! | Scheme | Signature | Comparison |
//! |--------|-----------|------------|
//! | [`simhash`] | one `u64` | [`hamming_distance`], smaller is closer |
//! | [`minhash`] | `Vec<u64>` of `num_hashes` minima | [`jaccard_estimate`], larger is closer |
//!
//! Both schemes are seeded with fixed constants: the same payload yields the
//! same fingerprint in every process, across restarts.

mod minhash;
mod simhash;

pub use minhash::{jaccard_estimate, minhash, DEFAULT_NUM_HASHES};
pub use simhash::{hamming_distance, simhash, DEFAULT_SIMHASH_BITS};

use serde::{Deserialize, Serialize};

/// Lowercased alphanumeric runs; everything else separates tokens.
pub fn tokenize(payload: &str) -> Vec<String> {
    payload
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// A stored similarity fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Fingerprint {
    SimHash(u64),
    MinHash(Vec<u64>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_splits_on_punctuation() {
        assert_eq!(
            tokenize("Hello, World! user_42 -- ok"),
            vec!["hello", "world", "user", "42", "ok"]
        );
        assert!(tokenize("  ...  ").is_empty());
    }
}
