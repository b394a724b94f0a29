//! Bounded register-usage history
//!
//! Keeps the most recently chosen registers of one class, newest first. The
//! operand builder uses it to spread destinations across the file and to bias
//! sources toward recent destinations (RAW/WAW hazards).

use crate::isa::RegisterType;
use rand::seq::IndexedRandom;
use rand::Rng;

pub const DEFAULT_HISTORY_CAPACITY: usize = 6;

/// Probability of steering a register choice by history.
pub const HISTORY_BIAS: f64 = 0.8;

#[derive(Clone, Debug)]
pub struct RegisterHistory<R: RegisterType> {
    entries: Vec<R>,
    capacity: usize,
}

impl<R: RegisterType> Default for RegisterHistory<R> {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl<R: RegisterType> RegisterHistory<R> {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Record `reg` as most recent. An existing entry moves to the head;
    /// otherwise the tail is evicted when full.
    pub fn record(&mut self, reg: R) {
        if let Some(pos) = self.entries.iter().position(|r| *r == reg) {
            self.entries.remove(pos);
        } else if self.entries.len() == self.capacity {
            self.entries.pop();
        }
        self.entries.insert(0, reg);
    }

    pub fn contains(&self, reg: &R) -> bool {
        self.entries.contains(reg)
    }

    pub fn entries(&self) -> &[R] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Pick a destination from `pool`. A pick already in history is redrawn
    /// from the registers outside history with probability `HISTORY_BIAS`.
    /// The final choice is recorded.
    pub fn choose_dest<G: Rng + ?Sized>(&mut self, pool: &[R], rng: &mut G) -> Option<R> {
        let mut pick = *pool.choose(rng)?;
        if self.contains(&pick) && rng.random_bool(HISTORY_BIAS) {
            let fresh: Vec<R> = pool.iter().copied().filter(|r| !self.contains(r)).collect();
            if let Some(r) = fresh.choose(rng) {
                pick = *r;
            }
        }
        self.record(pick);
        Some(pick)
    }

    /// Pick a source from `pool`, preferring recent destinations in `pool`
    /// with probability `HISTORY_BIAS`. Sources are not recorded.
    pub fn choose_source<G: Rng + ?Sized>(&self, pool: &[R], rng: &mut G) -> Option<R> {
        if rng.random_bool(HISTORY_BIAS) {
            let recent: Vec<R> = self
                .entries
                .iter()
                .copied()
                .filter(|r| pool.contains(r))
                .collect();
            if let Some(r) = recent.choose(rng) {
                return Some(*r);
            }
        }
        pool.choose(rng).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::register::{int_pool, IntRegister};
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_record_moves_existing_to_head() {
        let mut h = RegisterHistory::new(3);
        h.record(IntRegister::X5);
        h.record(IntRegister::X6);
        h.record(IntRegister::X5);
        assert_eq!(h.entries(), &[IntRegister::X5, IntRegister::X6]);
    }

    #[test]
    fn test_record_evicts_tail() {
        let mut h = RegisterHistory::new(2);
        h.record(IntRegister::X1);
        h.record(IntRegister::X2);
        h.record(IntRegister::X3);
        assert_eq!(h.entries(), &[IntRegister::X3, IntRegister::X2]);
    }

    #[test]
    fn test_source_bias_toward_recent_dests() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let mut h = RegisterHistory::default();
        h.record(IntRegister::X10);
        let pool = int_pool();
        let hits = (0..1000)
            .filter(|_| h.choose_source(&pool, &mut rng) == Some(IntRegister::X10))
            .count();
        // 0.8 from history plus a 1/30 share of the uniform draws
        assert!(hits > 700, "only {} hits", hits);
    }

    #[test]
    fn test_dest_spreads_away_from_history() {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let pool = vec![IntRegister::X5, IntRegister::X6];
        let mut h = RegisterHistory::new(1);
        let mut picks = Vec::new();
        for _ in 0..200 {
            picks.push(h.choose_dest(&pool, &mut rng).unwrap());
        }
        let switches = picks.windows(2).filter(|w| w[0] != w[1]).count();
        assert!(switches > 120, "only {} switches", switches);
    }

    #[test]
    fn test_empty_pool_yields_none() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let mut h: RegisterHistory<IntRegister> = RegisterHistory::default();
        assert!(h.choose_dest(&[], &mut rng).is_none());
        assert!(h.choose_source(&[], &mut rng).is_none());
    }

    proptest! {
        #[test]
        fn test_history_bounded_and_unique(
            cap in 1usize..10,
            regs in proptest::collection::vec(0u8..32, 0..100)
        ) {
            let mut h = RegisterHistory::new(cap);
            for idx in regs {
                h.record(IntRegister::from_index(idx).unwrap());
                prop_assert!(h.len() <= cap);
                let mut seen = h.entries().to_vec();
                seen.sort();
                seen.dedup();
                prop_assert_eq!(seen.len(), h.len());
            }
        }
    }
}
