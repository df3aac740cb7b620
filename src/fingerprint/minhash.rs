use super::tokenize;

pub const DEFAULT_NUM_HASHES: usize = 128;

const SHINGLE_LEN: usize = 3;

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^ (x >> 31)
}

fn shingle_hashes(payload: &str) -> Vec<u64> {
    let tokens = tokenize(payload);
    if tokens.is_empty() {
        return Vec::new();
    }
    if tokens.len() < SHINGLE_LEN {
        return vec![seahash::hash(tokens.join(" ").as_bytes())];
    }
    tokens
        .windows(SHINGLE_LEN)
        .map(|w| seahash::hash(w.join(" ").as_bytes()))
        .collect()
}

/// MinHash signature: for each of `num_hashes` fixed seeds, the minimum mixed
/// hash over all 3-token shingles.
///
/// Payloads shorter than three tokens form a single shingle. A payload with no
/// tokens yields a signature of `u64::MAX`.
pub fn minhash(payload: &str, num_hashes: usize) -> Vec<u64> {
    let shingles = shingle_hashes(payload);
    (0..num_hashes as u64)
        .map(|i| {
            let seed = splitmix64(i);
            shingles
                .iter()
                .map(|h| splitmix64(h ^ seed))
                .min()
                .unwrap_or(u64::MAX)
        })
        .collect()
}

/// Fraction of agreeing positions. Signatures of different length are compared
/// over their common prefix; an empty comparison is 0.0.
pub fn jaccard_estimate(a: &[u64], b: &[u64]) -> f64 {
    let n = a.len().min(b.len());
    if n == 0 {
        return 0.0;
    }
    let same = a.iter().zip(b).filter(|(x, y)| x == y).count();
    same as f64 / n as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_payloads_agree_everywhere() {
        let a = minhash("limited offer buy now and save big on watches", 64);
        assert_eq!(a.len(), 64);
        assert_eq!(jaccard_estimate(&a, &a), 1.0);
        assert_eq!(a, minhash("Limited offer: buy now, and save BIG on watches", 64));
    }

    #[test]
    fn test_similarity_ranks_edits_above_unrelated() {
        let base = minhash("limited offer buy now and save big on luxury watches today only", 128);
        let edit = minhash("limited offer buy now and save big on luxury watches this week", 128);
        let other = minhash("quarterly report attached please review before the board meeting", 128);
        let near = jaccard_estimate(&base, &edit);
        let far = jaccard_estimate(&base, &other);
        assert!(near > far, "near={near} far={far}");
        assert!(near > 0.3);
    }

    #[test]
    fn test_short_and_empty_payloads() {
        assert_eq!(minhash("hi there", 4), minhash("HI, there", 4));
        assert_eq!(minhash("", 3), vec![u64::MAX; 3]);
        assert_eq!(jaccard_estimate(&[], &[]), 0.0);
    }
}
