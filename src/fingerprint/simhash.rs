use super::tokenize;

pub const DEFAULT_SIMHASH_BITS: u32 = 64;

/// SimHash of `payload` over `bits` bits (clamped to `1..=64`).
///
/// Each token votes +1 on the bits set in its hash and -1 on the others; an
/// output bit is set iff its vote is positive. A payload without tokens hashes to 0.
pub fn simhash(payload: &str, bits: u32) -> u64 {
    let bits = bits.clamp(1, 64);
    let mut votes = [0i64; 64];
    for token in tokenize(payload) {
        let h = seahash::hash(token.as_bytes());
        for (i, vote) in votes.iter_mut().enumerate().take(bits as usize) {
            if h >> i & 1 == 1 {
                *vote += 1;
            } else {
                *vote -= 1;
            }
        }
    }
    votes
        .iter()
        .take(bits as usize)
        .enumerate()
        .filter(|(_, v)| **v > 0)
        .fold(0u64, |acc, (i, _)| acc | 1 << i)
}

pub fn hamming_distance(a: u64, b: u64) -> u32 {
    (a ^ b).count_ones()
}
