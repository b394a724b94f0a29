//! Simulation oracles
//!
//! An oracle is a stateful single-hart simulator with one checkpoint slot.
//! `execute_sequence` writes the given code at the current PC and runs until
//! the PC leaves the written range or `max_steps` instructions retire.

pub mod reference;
pub mod spike;

use crate::error::Result;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

pub use reference::ReferenceOracle;
pub use spike::SpikeOracle;

/// Base address of flat images and of the linked template.
pub const DRAM_BASE: u64 = 0x8000_0000;

/// What the oracle boots from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OracleImage {
    /// Linked NOP template; boot runs the header up to `main`.
    Elf(PathBuf),
    /// Bare NOP region at `base` followed by an 8 KiB data region.
    /// Registers are seeded deterministically from `seed`.
    Flat { base: u64, code_bytes: u64, seed: u64 },
}

impl OracleImage {
    pub fn flat(code_bytes: u64, seed: u64) -> Self {
        OracleImage::Flat {
            base: DRAM_BASE,
            code_bytes,
            seed,
        }
    }
}

/// Which oracle implementation to run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OracleKind {
    #[default]
    Reference,
    Spike,
}

impl fmt::Display for OracleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OracleKind::Reference => write!(f, "reference"),
            OracleKind::Spike => write!(f, "spike"),
        }
    }
}

impl FromStr for OracleKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "reference" | "ref" => Ok(OracleKind::Reference),
            "spike" => Ok(OracleKind::Spike),
            _ => Err(format!("unknown oracle: {}", s)),
        }
    }
}

/// The simulation oracle API.
pub trait Oracle {
    fn initialize(&mut self, image: &OracleImage, isa: &str, capacity: usize) -> Result<()>;

    fn set_checkpoint(&mut self) -> Result<()>;

    fn restore_checkpoint(&mut self) -> Result<()>;

    /// Drop the saved state, keeping the current one.
    fn discard_checkpoint(&mut self) {}

    /// Returns the number of retired instructions.
    fn execute_sequence(&mut self, codes: &[u32], sizes: &[u8], max_steps: u64) -> Result<u64>;

    fn get_xpr(&self, idx: u8) -> u64;

    fn get_fpr(&self, idx: u8) -> u64;

    fn get_csr(&self, addr: u16) -> u64;

    fn get_pc(&self) -> u64;

    fn was_last_execution_trapped(&self) -> bool;

    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oracle_kind_parse() {
        assert_eq!("spike".parse::<OracleKind>().unwrap(), OracleKind::Spike);
        assert_eq!("REF".parse::<OracleKind>().unwrap(), OracleKind::Reference);
        assert!("qemu".parse::<OracleKind>().is_err());
        assert_eq!(OracleKind::Reference.to_string(), "reference");
    }
}
