//! Bloom pre-filter over exact and suffix rule keys.
//!
//! The filter answers "might this qname, or any parent suffix of it, be a
//! rule key?". A negative answer is definitive, so the compound matcher can
//! skip its exact/suffix paths entirely; a positive answer may be a false
//! positive and must be confirmed by the full matcher.
//!
//! Sized from the expected entry count `n` and target false-positive rate
//! `fp`: `m = -n·ln fp / ln²2` bits with `k = m/n·ln 2` probes, derived
//! from a single FNV-1a pass by double hashing.

use crate::rule::fqdn;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Bloom filter for domain and exact-name keys.
///
/// `add` must only be called during build (single writer); `maybe_match`
/// is read-only and safe for concurrent use.
#[derive(Debug, Clone)]
pub struct BloomFilter {
    bits: Vec<u64>,
    nbits: u64,
    hashes: u32,
}

impl BloomFilter {
    /// Create a filter sized for `n` expected entries at false-positive
    /// rate `fp` (e.g. `0.01` for 1%).
    pub fn with_estimates(n: usize, fp: f64) -> Self {
        let n = n.max(1) as f64;
        let fp = fp.clamp(1e-9, 0.5);
        let ln2 = std::f64::consts::LN_2;
        let nbits = ((-n * fp.ln()) / (ln2 * ln2)).ceil().max(64.0) as u64;
        let hashes = ((nbits as f64 / n) * ln2).round().max(1.0) as u32;
        BloomFilter {
            bits: vec![0; nbits.div_ceil(64) as usize],
            nbits,
            hashes,
        }
    }

    /// Insert a key after lowercase/FQDN normalisation. Empty keys are
    /// ignored.
    pub fn add(&mut self, key: &str) {
        let key = fqdn(key);
        if key == "." {
            return;
        }
        let (h1, h2) = hash_pair(key.as_bytes());
        for i in 0..self.hashes {
            let bit = h1.wrapping_add((i as u64).wrapping_mul(h2)) % self.nbits;
            self.bits[(bit / 64) as usize] |= 1 << (bit % 64);
        }
    }

    /// True if `qname` or any of its parent suffixes might be in the set.
    /// False positives are possible; false negatives are not.
    pub fn maybe_match(&self, qname: &str) -> bool {
        let q = fqdn(qname);
        let mut rest = q.as_str();
        loop {
            if self.test(rest.as_bytes()) {
                return true;
            }
            // Strip the left-most label and test the parent suffix.
            match rest.find('.') {
                Some(idx) if idx + 1 < rest.len() => rest = &rest[idx + 1..],
                _ => return false,
            }
        }
    }

    fn test(&self, key: &[u8]) -> bool {
        let (h1, h2) = hash_pair(key);
        (0..self.hashes).all(|i| {
            let bit = h1.wrapping_add((i as u64).wrapping_mul(h2)) % self.nbits;
            self.bits[(bit / 64) as usize] & (1 << (bit % 64)) != 0
        })
    }
}

/// FNV-1a hash split into two values for double hashing; the second is
/// forced odd so the probe stride never degenerates.
#[inline]
fn hash_pair(bytes: &[u8]) -> (u64, u64) {
    let mut h = FNV_OFFSET;
    for &b in bytes {
        h ^= b as u64;
        h = h.wrapping_mul(FNV_PRIME);
    }
    let h2 = h.wrapping_mul(0x9e37_79b9_7f4a_7c15) | 1;
    (h, h2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maybe_match_suffix_walk() {
        let mut bf = BloomFilter::with_estimates(1000, 0.01);
        bf.add("example.com.");
        bf.add("full.match.org.");

        assert!(bf.maybe_match("full.match.org."));
        assert!(bf.maybe_match("sub.example.com."));
        assert!(bf.maybe_match("example.com."));
        assert!(!bf.maybe_match("other.org."));
    }

    #[test]
    fn no_false_negatives() {
        let mut bf = BloomFilter::with_estimates(64, 0.01);
        let keys: Vec<String> = (0..200).map(|i| format!("host-{i}.example.net.")).collect();
        for k in &keys {
            bf.add(k);
        }
        for k in &keys {
            assert!(bf.maybe_match(k), "false negative for {k}");
            assert!(bf.maybe_match(&format!("deep.sub.{k}")), "suffix miss for {k}");
        }
    }

    #[test]
    fn normalises_before_hashing() {
        let mut bf = BloomFilter::with_estimates(10, 0.01);
        bf.add("Example.COM");
        assert!(bf.maybe_match("example.com."));
        assert!(bf.maybe_match("EXAMPLE.com"));
    }

    #[test]
    fn empty_filter_matches_nothing() {
        let bf = BloomFilter::with_estimates(0, 0.01);
        assert!(!bf.maybe_match("anything.example."));
    }
}
