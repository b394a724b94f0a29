//! XOR signatures and the shared Bloom filter
//!
//! Every accepted instruction contributes `(mnemonic, signature)` to a Bloom
//! filter shared by all workers. Bit positions come from salted SHA-256 of
//! `"{mnemonic}:{signature}"`. Bits are only ever set, with `fetch_or`, so
//! unsynchronized writers can add false positives but never lose a member.

pub mod shm;

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use crate::error::Result;
use shm::SharedRegion;

pub const DEFAULT_FALSE_POSITIVE_RATE: f64 = 0.01;
pub const DEFAULT_SAFETY_FACTOR: f64 = 1.5;
const MIN_BITS: u64 = 64 * 1024 * 8;
const MAX_BITS: u64 = 16 * 1024 * 1024 * 8;
const FALLBACK_ELEMENTS: u64 = 10_000;

/// `v0 ^ (v1 << 1) ^ (v2 << 2) ^ ...`, truncated to 64 bits.
pub fn xor_signature(values: &[u64]) -> u64 {
    values.iter().enumerate().fold(0u64, |acc, (i, v)| {
        acc ^ v.checked_shl(i as u32).unwrap_or(0)
    })
}

/// Filter geometry.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct BloomParams {
    pub size_bits: u64,
    pub num_hashes: u32,
    pub expected_elements: u64,
}

impl BloomParams {
    /// Size for `seeds × instrs × safety` elements at false-positive rate `p`:
    /// `m = -n ln p / ln²2`, `k = m/n · ln 2`.
    pub fn for_workload(seeds: usize, instrs_per_seed: usize, p: f64, safety: f64) -> Self {
        let mut n = (seeds as f64 * instrs_per_seed as f64 * safety) as u64;
        if n == 0 {
            n = FALLBACK_ELEMENTS;
        }
        let ln2 = std::f64::consts::LN_2;
        let bits = -(n as f64) * p.ln() / (ln2 * ln2);
        let bits = (bits as u64).clamp(MIN_BITS, MAX_BITS);
        // whole 64-bit words
        let size_bits = bits.div_ceil(64) * 64;
        let k = ((size_bits as f64 / n as f64) * ln2 + 0.5) as u32;
        Self {
            size_bits,
            num_hashes: k.clamp(3, 10),
            expected_elements: n,
        }
    }

    pub fn size_bytes(&self) -> usize {
        (self.size_bits / 8) as usize
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct CacheStats {
    pub name: String,
    pub size_bits: u64,
    pub size_kib: f64,
    pub num_hashes: u32,
    pub bits_set: u64,
}

enum Backing {
    Local(Box<[AtomicU64]>),
    Shared(SharedRegion),
}

impl Backing {
    fn words(&self) -> &[AtomicU64] {
        match self {
            Backing::Local(w) => w,
            Backing::Shared(r) => r.words(),
        }
    }
}

/// Bloom filter over `(mnemonic, signature)` pairs.
pub struct XorCache {
    params: BloomParams,
    name: String,
    backing: Backing,
}

impl XorCache {
    /// In-process filter, for thread mode and tests.
    pub fn local(params: BloomParams) -> Self {
        let words = (0..params.size_bits / 64).map(|_| AtomicU64::new(0)).collect();
        Self {
            params,
            name: "local".to_string(),
            backing: Backing::Local(words),
        }
    }

    /// Create a named shared-memory filter; the creator owns the name.
    pub fn create_shared(name: &str, params: BloomParams) -> Result<Self> {
        let region = SharedRegion::create(name, params.size_bytes())?;
        debug!(
            name,
            size_kib = params.size_bits / 8 / 1024,
            k = params.num_hashes,
            "created shared bloom filter"
        );
        Ok(Self {
            params,
            name: name.to_string(),
            backing: Backing::Shared(region),
        })
    }

    /// Attach to a filter another process created.
    pub fn attach(name: &str, params: BloomParams) -> Result<Self> {
        let region = SharedRegion::attach(name, params.size_bytes())?;
        Ok(Self {
            params,
            name: name.to_string(),
            backing: Backing::Shared(region),
        })
    }

    /// A region name unique to this process.
    pub fn default_name() -> String {
        format!("/rvsynth_bloom_{}", std::process::id())
    }

    pub fn params(&self) -> BloomParams {
        self.params
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn positions(&self, opcode: &str, value: u64) -> impl Iterator<Item = u64> + '_ {
        let key = format!("{}:{}", opcode, value);
        let m = self.params.size_bits;
        (0..self.params.num_hashes).map(move |i| {
            let mut hasher = Sha256::new();
            hasher.update(key.as_bytes());
            hasher.update([i as u8]);
            let digest = hasher.finalize();
            let mut head = [0u8; 8];
            head.copy_from_slice(&digest[..8]);
            u64::from_le_bytes(head) % m
        })
    }

    /// All k bits set: possibly present. Never inserts.
    pub fn contains(&self, opcode: &str, value: u64) -> bool {
        let words = self.backing.words();
        self.positions(opcode, value).all(|pos| {
            words[(pos / 64) as usize].load(Ordering::Relaxed) & (1u64 << (pos % 64)) != 0
        })
    }

    /// Insert; returns `true` when at least one bit was newly set (definitely
    /// new) and `false` when every bit was already set (possible duplicate).
    pub fn check_and_add(&self, opcode: &str, value: u64) -> bool {
        let words = self.backing.words();
        let mut fresh = false;
        for pos in self.positions(opcode, value) {
            let mask = 1u64 << (pos % 64);
            let prev = words[(pos / 64) as usize].fetch_or(mask, Ordering::Relaxed);
            if prev & mask == 0 {
                fresh = true;
            }
        }
        fresh
    }

    pub fn bits_set(&self) -> u64 {
        self.backing
            .words()
            .iter()
            .map(|w| w.load(Ordering::Relaxed).count_ones() as u64)
            .sum()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            name: self.name.clone(),
            size_bits: self.params.size_bits,
            size_kib: self.params.size_bits as f64 / 8.0 / 1024.0,
            num_hashes: self.params.num_hashes,
            bits_set: self.bits_set(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;

    fn small() -> XorCache {
        XorCache::local(BloomParams::for_workload(1, 100, 0.01, 1.5))
    }

    #[test]
    fn test_signature_shifts_by_position() {
        assert_eq!(xor_signature(&[]), 0);
        assert_eq!(xor_signature(&[5]), 5);
        assert_eq!(xor_signature(&[1, 1]), 1 ^ 2);
        assert_ne!(xor_signature(&[3, 7]), xor_signature(&[7, 3]));
        assert_eq!(xor_signature(&[u64::MAX, u64::MAX]), 1);
    }

    #[test]
    fn test_params_bounds() {
        let p = BloomParams::for_workload(0, 0, 0.01, 1.5);
        assert_eq!(p.expected_elements, 10_000);
        assert_eq!(p.size_bits, MIN_BITS);
        let huge = BloomParams::for_workload(100_000, 100_000, 0.01, 1.5);
        assert_eq!(huge.size_bits, MAX_BITS);
        assert_eq!(huge.num_hashes, 3);
        let tiny = BloomParams::for_workload(1, 10, 0.01, 1.5);
        assert_eq!(tiny.num_hashes, 10);
    }

    #[test]
    fn test_params_formula_midrange() {
        // n = 1000 × 1000 × 1.5; m = 14_377_588 bits, k = round(6.64) = 7
        let p = BloomParams::for_workload(1000, 1000, 0.01, 1.5);
        assert_eq!(p.expected_elements, 1_500_000);
        assert_eq!(p.size_bits % 64, 0);
        assert!((14_377_500..14_377_700).contains(&p.size_bits));
        assert_eq!(p.num_hashes, 7);
    }

    #[test]
    fn test_check_and_add_then_duplicate() {
        let cache = small();
        assert!(!cache.contains("add", 42));
        assert!(cache.check_and_add("add", 42));
        assert!(cache.contains("add", 42));
        assert!(!cache.check_and_add("add", 42));
        // separate pools per mnemonic
        assert!(cache.check_and_add("sub", 42));
    }

    #[test]
    fn test_stats_report_bits() {
        let cache = small();
        cache.check_and_add("xor", 1);
        let stats = cache.stats();
        assert!(stats.bits_set >= 1 && stats.bits_set <= stats.num_hashes as u64);
        assert_eq!(stats.size_bits, cache.params().size_bits);
    }

    #[test]
    fn test_shared_filter_visible_to_attached() {
        let name = format!("/rvsynth_test_bloom_{}", std::process::id());
        let params = BloomParams::for_workload(1, 10, 0.01, 1.5);
        let owner = XorCache::create_shared(&name, params).unwrap();
        let worker = XorCache::attach(&name, params).unwrap();
        assert!(worker.check_and_add("mul", 9));
        assert!(owner.contains("mul", 9));
        assert!(!owner.check_and_add("mul", 9));
    }

    #[test]
    fn test_concurrent_adds_keep_members() {
        let cache = Arc::new(small());
        let handles: Vec<_> = (0..4u64)
            .map(|t| {
                let c = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for v in 0..200u64 {
                        c.check_and_add("and", t * 1000 + v);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        for t in 0..4u64 {
            for v in 0..200u64 {
                assert!(cache.contains("and", t * 1000 + v));
            }
        }
    }

    proptest! {
        #[test]
        fn prop_no_false_negatives(values in proptest::collection::vec(any::<u64>(), 1..50)) {
            let cache = small();
            for v in &values {
                cache.check_and_add("op", *v);
            }
            for v in &values {
                prop_assert!(cache.contains("op", *v));
                prop_assert!(!cache.check_and_add("op", *v));
            }
        }

        #[test]
        fn prop_signature_order_sensitive(a in 1u64..u64::MAX / 4, b in 1u64..u64::MAX / 4) {
            prop_assume!(a != b);
            prop_assert_ne!(xor_signature(&[a, b]), xor_signature(&[b, a]));
        }
    }
}
