//! Extension profiles and weighted extension selection
//!
//! A profile is an ordered set of extension tags with optional weights. Tags
//! without an explicit weight share the remaining probability mass equally;
//! the resulting vector is normalized to sum to one.

pub mod history;
pub mod operands;

use crate::error::{Result, SynthError};
use crate::isa::ExtensionTag;
use rand::distr::weighted::WeightedIndex;
use rand::distr::Distribution;
use rand::Rng;
use std::fmt;

/// Named extension profile with normalized weights.
#[derive(Clone, Debug)]
pub struct ExtensionProfile {
    name: String,
    raw: Vec<(ExtensionTag, Option<f64>)>,
    tags: Vec<ExtensionTag>,
    weights: Vec<f64>,
}

impl ExtensionProfile {
    /// Build a profile. Unweighted tags share `(1 - sum(explicit)) / #unweighted`.
    pub fn new(name: &str, entries: &[(ExtensionTag, Option<f64>)]) -> Result<Self> {
        let mut tags = Vec::new();
        let mut raw = Vec::new();
        for (tag, weight) in entries {
            if let Some(w) = weight {
                if !w.is_finite() || *w < 0.0 {
                    return Err(SynthError::Config(format!(
                        "profile {}: weight for {} must be non-negative",
                        name, tag
                    )));
                }
            }
            if !tags.contains(tag) {
                tags.push(*tag);
                raw.push((*tag, *weight));
            }
        }
        if tags.is_empty() {
            return Err(SynthError::Config(format!(
                "profile {} has no extensions",
                name
            )));
        }

        let explicit: f64 = raw.iter().filter_map(|(_, w)| *w).sum();
        let unweighted = raw.iter().filter(|(_, w)| w.is_none()).count();
        let share = if unweighted > 0 {
            ((1.0 - explicit) / unweighted as f64).max(0.0)
        } else {
            0.0
        };
        let unnormalized: Vec<f64> = raw.iter().map(|(_, w)| w.unwrap_or(share)).collect();
        let total: f64 = unnormalized.iter().sum();
        if total <= 0.0 {
            return Err(SynthError::Config(format!(
                "profile {} has zero total weight",
                name
            )));
        }
        let weights = unnormalized.iter().map(|w| w / total).collect();

        Ok(Self {
            name: name.to_string(),
            raw,
            tags,
            weights,
        })
    }

    /// Look up a built-in profile by name.
    pub fn builtin(name: &str) -> Result<Self> {
        let entries = builtin_entries(name).ok_or_else(|| {
            SynthError::Config(format!(
                "unknown profile `{}` (available: {})",
                name,
                BUILTIN_PROFILES.join(", ")
            ))
        })?;
        Self::new(name, &entries)
    }

    /// Copy of this profile without `excluded`, renormalized from the raw weights.
    pub fn without(&self, excluded: &[ExtensionTag]) -> Result<Self> {
        let kept: Vec<_> = self
            .raw
            .iter()
            .copied()
            .filter(|(t, _)| !excluded.contains(t))
            .collect();
        Self::new(&self.name, &kept)
    }

    /// Drop tags whose instructions do not exist on 32-bit targets.
    pub fn for_rv32(&self) -> Result<Self> {
        let rv64: Vec<ExtensionTag> = self
            .tags
            .iter()
            .copied()
            .filter(ExtensionTag::is_rv64_only)
            .collect();
        self.without(&rv64)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tags(&self) -> &[ExtensionTag] {
        &self.tags
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn weight_of(&self, tag: ExtensionTag) -> f64 {
        self.tags
            .iter()
            .position(|t| *t == tag)
            .map(|i| self.weights[i])
            .unwrap_or(0.0)
    }

    pub fn has_compressed(&self) -> bool {
        self.tags.iter().any(ExtensionTag::is_compressed)
    }

    pub fn has_float(&self) -> bool {
        self.tags.iter().any(ExtensionTag::is_float)
    }
}

impl fmt::Display for ExtensionProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.name)?;
        for (tag, w) in self.tags.iter().zip(&self.weights) {
            write!(f, " {}={:.4}", tag, w)?;
        }
        Ok(())
    }
}

pub const BUILTIN_PROFILES: &[&str] = &["general", "cva6", "rv32", "base", "integer"];

fn builtin_entries(name: &str) -> Option<Vec<(ExtensionTag, Option<f64>)>> {
    use ExtensionTag::*;
    let entries = match name {
        "general" => vec![
            (RvZicsr, Some(0.04)),
            (RvZifencei, Some(0.005)),
            (RvI, Some(0.17)),
            (Rv64I, Some(0.07)),
            (RvF, Some(0.02)),
            (RvD, Some(0.08)),
            (Rv64F, Some(0.02)),
            (Rv64D, Some(0.025)),
            (RvC, Some(0.09)),
            (Rv64C, Some(0.04)),
            (RvM, Some(0.03)),
            (Rv64M, Some(0.02)),
            (RvA, Some(0.045)),
            (Rv64A, Some(0.045)),
            (RvZba, None),
            (RvZbb, None),
            (RvZbs, None),
        ],
        "cva6" => vec![
            (RvZicsr, Some(0.0423)),
            (RvZifencei, Some(0.0042)),
            (RvI, Some(0.1652)),
            (Rv64I, Some(0.0635)),
            (RvF, Some(0.0084)),
            (RvD, Some(0.1101)),
            (Rv64F, Some(0.0209)),
            (Rv64D, Some(0.0254)),
            (RvC, Some(0.0974)),
            (RvM, Some(0.0296)),
            (Rv64M, Some(0.0211)),
            (RvA, Some(0.0476)),
            (Rv64A, Some(0.0466)),
            (RvZba, None),
            (RvZbb, None),
            (RvZbs, None),
        ],
        "rv32" => vec![
            (RvZicsr, None),
            (RvZifencei, None),
            (RvI, None),
            (RvM, None),
            (RvZba, None),
            (RvZbb, None),
            (RvZbs, None),
            (RvC, None),
            (Rv32C, None),
        ],
        "base" => vec![
            (Rv64I, None),
            (RvI, None),
            (RvF, None),
            (RvD, None),
            (Rv64F, None),
            (Rv64D, None),
            (RvM, None),
            (Rv64M, None),
            (RvA, None),
            (Rv64A, None),
        ],
        "integer" => vec![(RvI, None)],
        _ => return None,
    };
    Some(entries)
}

/// Samples extension tags from a profile, enforcing compressed pairing:
/// after an odd run of compressed instructions the next pick is forced to a
/// compressed tag so the stream stays 4-byte aligned.
#[derive(Clone, Debug)]
pub struct ExtensionSelector {
    profile: ExtensionProfile,
    dist: WeightedIndex<f64>,
    compressed: Vec<ExtensionTag>,
    compressed_run: usize,
}

impl ExtensionSelector {
    pub fn new(profile: ExtensionProfile) -> Result<Self> {
        let dist = WeightedIndex::new(profile.weights())
            .map_err(|e| SynthError::Config(format!("profile {}: {}", profile.name(), e)))?;
        let compressed = profile
            .tags()
            .iter()
            .copied()
            .filter(|t| *t == ExtensionTag::RvC || *t == ExtensionTag::Rv64C)
            .collect();
        Ok(Self {
            profile,
            dist,
            compressed,
            compressed_run: 0,
        })
    }

    pub fn profile(&self) -> &ExtensionProfile {
        &self.profile
    }

    pub fn next_tag<G: Rng + ?Sized>(&mut self, rng: &mut G) -> ExtensionTag {
        if self.pairing_pending() && !self.compressed.is_empty() {
            let idx = rng.random_range(0..self.compressed.len());
            return self.compressed[idx];
        }
        self.profile.tags()[self.dist.sample(rng)]
    }

    /// Report the width of what was actually emitted for the last pick.
    pub fn note_emitted(&mut self, compressed: bool) {
        if compressed {
            self.compressed_run += 1;
        } else {
            self.compressed_run = 0;
        }
    }

    pub fn pairing_pending(&self) -> bool {
        self.compressed_run % 2 == 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn sum(w: &[f64]) -> f64 {
        w.iter().sum()
    }

    #[test]
    fn test_unweighted_tags_share_remainder() {
        use ExtensionTag::*;
        let p = ExtensionProfile::new("t", &[(RvI, Some(0.5)), (RvM, None), (RvZba, None)])
            .unwrap();
        assert!((p.weight_of(RvI) - 0.5).abs() < 1e-12);
        assert!((p.weight_of(RvM) - 0.25).abs() < 1e-12);
        assert!((p.weight_of(RvZba) - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_builtin_profiles_normalize() {
        for name in BUILTIN_PROFILES {
            let p = ExtensionProfile::builtin(name).unwrap();
            assert!((sum(p.weights()) - 1.0).abs() < 1e-9, "{}", name);
            assert!(p.weights().iter().all(|w| *w >= 0.0));
        }
        assert!(ExtensionProfile::builtin("nope").is_err());
    }

    #[test]
    fn test_exclusion_renormalizes() {
        let p = ExtensionProfile::builtin("base").unwrap();
        let q = p.without(&[ExtensionTag::RvF, ExtensionTag::RvD]).unwrap();
        assert_eq!(q.tags().len(), p.tags().len() - 2);
        assert!((sum(q.weights()) - 1.0).abs() < 1e-9);
        assert_eq!(q.weight_of(ExtensionTag::RvF), 0.0);
        assert!(p.without(p.tags()).is_err());
    }

    #[test]
    fn test_rv32_drops_rv64_tags() {
        let p = ExtensionProfile::builtin("general")
            .unwrap()
            .for_rv32()
            .unwrap();
        assert!(p.tags().iter().all(|t| !t.is_rv64_only()));
    }

    #[test]
    fn test_compressed_pairing_forces_compressed_tag() {
        let p = ExtensionProfile::builtin("general").unwrap();
        let mut sel = ExtensionSelector::new(p).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        sel.note_emitted(true);
        assert!(sel.pairing_pending());
        for _ in 0..50 {
            assert!(sel.next_tag(&mut rng).is_compressed());
        }
        sel.note_emitted(true);
        assert!(!sel.pairing_pending());
    }

    #[test]
    fn test_single_tag_profile_always_selects_it() {
        let p = ExtensionProfile::builtin("integer").unwrap();
        let mut sel = ExtensionSelector::new(p).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        for _ in 0..100 {
            assert_eq!(sel.next_tag(&mut rng), ExtensionTag::RvI);
        }
    }
}
