//! Core traits for register-file abstraction
//!
//! Integer and floating-point register files share the same selection and
//! history machinery; this trait is the seam between them.

use std::fmt::{Debug, Display};
use std::hash::Hash;

/// Trait for architectural register types
pub trait RegisterType:
    Clone + Copy + PartialEq + Eq + Hash + Debug + Display + Send + Sync + 'static
{
    /// Numeric index inside the register file (0-31)
    fn index(&self) -> u8;

    /// Create a register from its numeric index
    fn from_index(idx: u8) -> Option<Self>;

    /// ABI name used in generated assembly (e.g. "a0", "ft3")
    fn abi_name(&self) -> &'static str;

    /// Returns true if this register always reads as zero
    fn is_zero_register(&self) -> bool;

    /// Returns true for registers the generated code must not use as a scratch
    /// address base (stack, global and thread pointers)
    fn is_special(&self) -> bool;

    /// Parse either the ABI name or the numeric form of a register
    fn parse_name(name: &str) -> Option<Self>;

    /// All registers of the file, in index order
    fn all() -> Vec<Self> {
        (0..32).filter_map(Self::from_index).collect()
    }
}
