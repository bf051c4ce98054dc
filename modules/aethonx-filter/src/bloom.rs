//! Word-packed Bloom filter for URL dedup.
//!
//! Sized from the target element count and false-positive rate; double
//! hashing derives all k indexes from two FNV-1a passes. Reads share the
//! lock, writes take it exclusively. The data path never errors: past
//! design capacity the false-positive rate rises but membership answers
//! stay one-sided (no false negatives).

use std::sync::RwLock;

use crate::FilterError;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Words sampled (at most) when estimating the fill ratio.
const FILL_SAMPLE_WORDS: usize = 1000;

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// FNV-1a over the input plus a trailing zero byte. XOR with zero is a
/// no-op, so only the final multiply remains of the extra round.
fn fnv1a_salted(bytes: &[u8]) -> u64 {
    fnv1a(bytes).wrapping_mul(FNV_PRIME)
}

#[derive(Debug, Clone, PartialEq)]
pub struct BloomStats {
    pub bits: u64,
    pub hashes: u32,
    pub count: u64,
    pub expected_elements: u64,
    pub fill_ratio: f64,
    pub est_fp_rate: f64,
}

struct Bits {
    words: Vec<u64>,
    count: u64,
}

pub struct BloomFilter {
    bits: RwLock<Bits>,
    m: u64,
    k: u32,
    expected: u64,
}

impl BloomFilter {
    /// `expected_elements` and `fp_rate` size the filter:
    /// m = ceil(-n·ln p / (ln 2)^2), k = max(1, ceil((m/n)·ln 2)).
    pub fn new(expected_elements: usize, fp_rate: f64) -> Result<Self, FilterError> {
        if expected_elements == 0 {
            return Err(FilterError::Config(
                "bloom expected_elements must be positive".to_string(),
            ));
        }
        if !(fp_rate > 0.0 && fp_rate < 1.0) {
            return Err(FilterError::Config(format!(
                "bloom fp_rate must be in (0, 1), got {fp_rate}"
            )));
        }

        let n = expected_elements as f64;
        let ln2 = std::f64::consts::LN_2;
        let m = (-n * fp_rate.ln() / (ln2 * ln2)).ceil() as u64;
        let m = m.max(64);
        let k = ((m as f64 / n) * ln2).ceil() as u32;
        let k = k.max(1);
        let words = m.div_ceil(64) as usize;

        Ok(Self {
            bits: RwLock::new(Bits {
                words: vec![0u64; words],
                count: 0,
            }),
            m,
            k,
            expected: expected_elements as u64,
        })
    }

    fn indexes(&self, value: &str) -> impl Iterator<Item = u64> + '_ {
        let h1 = fnv1a(value.as_bytes());
        let h2 = fnv1a_salted(value.as_bytes());
        let m = self.m;
        (0..self.k as u64).map(move |i| h1.wrapping_add(i.wrapping_mul(h2)) % m)
    }

    pub fn add(&self, value: &str) {
        let mut bits = self.bits.write().unwrap_or_else(|e| e.into_inner());
        for idx in self.indexes(value) {
            bits.words[(idx / 64) as usize] |= 1u64 << (idx % 64);
        }
        bits.count += 1;
    }

    /// Never false-negative; false positives bounded by the configured rate
    /// while `count` stays at or below the design capacity.
    pub fn may_contain(&self, value: &str) -> bool {
        let bits = self.bits.read().unwrap_or_else(|e| e.into_inner());
        self.indexes(value)
            .all(|idx| bits.words[(idx / 64) as usize] & (1u64 << (idx % 64)) != 0)
    }

    /// Set all k bits and report whether every one was already set (a likely
    /// duplicate). Atomic under the write lock.
    pub fn add_and_check(&self, value: &str) -> bool {
        let mut bits = self.bits.write().unwrap_or_else(|e| e.into_inner());
        let mut all_set = true;
        for idx in self.indexes(value) {
            let word = (idx / 64) as usize;
            let mask = 1u64 << (idx % 64);
            if bits.words[word] & mask == 0 {
                all_set = false;
                bits.words[word] |= mask;
            }
        }
        bits.count += 1;
        all_set
    }

    pub fn clear(&self) {
        let mut bits = self.bits.write().unwrap_or_else(|e| e.into_inner());
        bits.words.fill(0);
        bits.count = 0;
    }

    pub fn count(&self) -> u64 {
        self.bits.read().unwrap_or_else(|e| e.into_inner()).count
    }

    /// Fill ratio is estimated from a popcount over at most 1000 evenly
    /// spaced words; estimated FP rate is fill_ratio^k.
    pub fn stats(&self) -> BloomStats {
        let bits = self.bits.read().unwrap_or_else(|e| e.into_inner());
        let total_words = bits.words.len();
        let step = (total_words / FILL_SAMPLE_WORDS).max(1);
        let mut sampled = 0u64;
        let mut ones = 0u64;
        let mut i = 0;
        while i < total_words {
            ones += bits.words[i].count_ones() as u64;
            sampled += 64;
            i += step;
        }
        let fill_ratio = if sampled == 0 {
            0.0
        } else {
            ones as f64 / sampled as f64
        };
        BloomStats {
            bits: self.m,
            hashes: self.k,
            count: bits.count,
            expected_elements: self.expected,
            fill_ratio,
            est_fp_rate: fill_ratio.powi(self.k as i32),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_parameters() {
        assert!(BloomFilter::new(0, 0.01).is_err());
        assert!(BloomFilter::new(100, 0.0).is_err());
        assert!(BloomFilter::new(100, 1.0).is_err());
    }

    #[test]
    fn no_false_negatives() {
        let bloom = BloomFilter::new(1000, 0.01).unwrap();
        for i in 0..1000 {
            bloom.add(&format!("https://example.com/page/{i}"));
        }
        for i in 0..1000 {
            assert!(bloom.may_contain(&format!("https://example.com/page/{i}")));
        }
    }

    #[test]
    fn false_positive_rate_within_bound() {
        let bloom = BloomFilter::new(1000, 0.01).unwrap();
        for i in 0..1000 {
            bloom.add(&format!("seen-{i}"));
        }
        let mut hits = 0;
        for i in 0..10_000 {
            if bloom.may_contain(&format!("unseen-{i}")) {
                hits += 1;
            }
        }
        // Allow 3x headroom over the design rate, matching the contract.
        assert!(hits as f64 / 10_000.0 <= 0.03, "fp rate too high: {hits}/10000");
    }

    #[test]
    fn add_and_check_reports_duplicates() {
        let bloom = BloomFilter::new(100, 0.01).unwrap();
        assert!(!bloom.add_and_check("https://example.com/a"));
        assert!(bloom.add_and_check("https://example.com/a"));
        assert!(!bloom.add_and_check("https://example.com/b"));
    }

    #[test]
    fn clear_resets() {
        let bloom = BloomFilter::new(100, 0.01).unwrap();
        bloom.add("x");
        assert!(bloom.may_contain("x"));
        bloom.clear();
        assert!(!bloom.may_contain("x"));
        assert_eq!(bloom.count(), 0);
        assert_eq!(bloom.stats().fill_ratio, 0.0);
    }

    #[test]
    fn stats_track_fill() {
        let bloom = BloomFilter::new(1000, 0.01).unwrap();
        let empty = bloom.stats();
        assert_eq!(empty.fill_ratio, 0.0);
        assert!(empty.hashes >= 1);

        for i in 0..1000 {
            bloom.add(&format!("item-{i}"));
        }
        let full = bloom.stats();
        assert_eq!(full.count, 1000);
        assert!(full.fill_ratio > 0.0 && full.fill_ratio < 1.0);
        assert!(full.est_fp_rate > 0.0 && full.est_fp_rate < 0.05);
    }
}
