//! RISC-V register files
//!
//! Integer (x0-x31) and floating-point (f0-f31) registers with ABI names,
//! plus the register pools the generator draws operands from.

use crate::isa::traits::RegisterType;
use std::fmt;
use std::str::FromStr;

/// RISC-V integer register enumeration (x0-x31)
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
#[repr(u8)]
pub enum IntRegister {
    X0,  // zero
    X1,  // ra
    X2,  // sp
    X3,  // gp
    X4,  // tp
    X5,  // t0
    X6,  // t1
    X7,  // t2
    X8,  // s0/fp
    X9,  // s1
    X10, // a0
    X11, // a1
    X12, // a2
    X13, // a3
    X14, // a4
    X15, // a5
    X16, // a6
    X17, // a7
    X18, // s2
    X19, // s3
    X20, // s4
    X21, // s5
    X22, // s6
    X23, // s7
    X24, // s8
    X25, // s9
    X26, // s10
    X27, // s11
    X28, // t3
    X29, // t4
    X30, // t5
    X31, // t6
}

const INT_REGISTERS: [IntRegister; 32] = {
    use IntRegister::*;
    [
        X0, X1, X2, X3, X4, X5, X6, X7, X8, X9, X10, X11, X12, X13, X14, X15, X16, X17, X18, X19,
        X20, X21, X22, X23, X24, X25, X26, X27, X28, X29, X30, X31,
    ]
};

const INT_ABI_NAMES: [&str; 32] = [
    "zero", "ra", "sp", "gp", "tp", "t0", "t1", "t2", "s0", "s1", "a0", "a1", "a2", "a3", "a4",
    "a5", "a6", "a7", "s2", "s3", "s4", "s5", "s6", "s7", "s8", "s9", "s10", "s11", "t3", "t4",
    "t5", "t6",
];

const FLOAT_ABI_NAMES: [&str; 32] = [
    "ft0", "ft1", "ft2", "ft3", "ft4", "ft5", "ft6", "ft7", "fs0", "fs1", "fa0", "fa1", "fa2",
    "fa3", "fa4", "fa5", "fa6", "fa7", "fs2", "fs3", "fs4", "fs5", "fs6", "fs7", "fs8", "fs9",
    "fs10", "fs11", "ft8", "ft9", "ft10", "ft11",
];

impl IntRegister {
    pub const ZERO: IntRegister = IntRegister::X0;
    pub const RA: IntRegister = IntRegister::X1;
    pub const S11: IntRegister = IntRegister::X27;
    pub const T5: IntRegister = IntRegister::X30;
    pub const T6: IntRegister = IntRegister::X31;

    /// Registers usable in the 3-bit fields of compressed encodings (x8-x15)
    pub fn is_compressed_encodable(&self) -> bool {
        (8..16).contains(&self.index())
    }
}

impl RegisterType for IntRegister {
    fn index(&self) -> u8 {
        *self as u8
    }

    fn from_index(idx: u8) -> Option<Self> {
        INT_REGISTERS.get(idx as usize).copied()
    }

    fn abi_name(&self) -> &'static str {
        INT_ABI_NAMES[self.index() as usize]
    }

    fn is_zero_register(&self) -> bool {
        matches!(self, IntRegister::X0)
    }

    fn is_special(&self) -> bool {
        matches!(
            self,
            IntRegister::X0 | IntRegister::X2 | IntRegister::X3 | IntRegister::X4
        )
    }

    fn parse_name(name: &str) -> Option<Self> {
        let name = name.trim().to_ascii_lowercase();
        if name == "fp" {
            return Some(IntRegister::X8);
        }
        if let Some(pos) = INT_ABI_NAMES.iter().position(|n| *n == name) {
            return Self::from_index(pos as u8);
        }
        name.strip_prefix('x')
            .and_then(|n| n.parse::<u8>().ok())
            .and_then(Self::from_index)
    }
}

impl fmt::Display for IntRegister {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.abi_name())
    }
}

/// RISC-V floating-point register (f0-f31)
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct FloatRegister(u8);

impl FloatRegister {
    pub const FT0: FloatRegister = FloatRegister(0);
}

impl RegisterType for FloatRegister {
    fn index(&self) -> u8 {
        self.0
    }

    fn from_index(idx: u8) -> Option<Self> {
        (idx < 32).then_some(FloatRegister(idx))
    }

    fn abi_name(&self) -> &'static str {
        FLOAT_ABI_NAMES[self.0 as usize]
    }

    fn is_zero_register(&self) -> bool {
        false
    }

    fn is_special(&self) -> bool {
        false
    }

    fn parse_name(name: &str) -> Option<Self> {
        let name = name.trim().to_ascii_lowercase();
        if let Some(pos) = FLOAT_ABI_NAMES.iter().position(|n| *n == name) {
            return Self::from_index(pos as u8);
        }
        name.strip_prefix('f')
            .and_then(|n| n.parse::<u8>().ok())
            .and_then(Self::from_index)
    }
}

impl fmt::Display for FloatRegister {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.abi_name())
    }
}

/// Error type for register name parsing
#[derive(Debug, Clone, PartialEq)]
pub struct ParseRegisterError {
    pub message: String,
}

impl fmt::Display for ParseRegisterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ParseRegisterError: {}", self.message)
    }
}

impl std::error::Error for ParseRegisterError {}

impl FromStr for IntRegister {
    type Err = ParseRegisterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        IntRegister::parse_name(s).ok_or_else(|| ParseRegisterError {
            message: format!("invalid integer register name: '{}'", s.trim()),
        })
    }
}

impl FromStr for FloatRegister {
    type Err = ParseRegisterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FloatRegister::parse_name(s).ok_or_else(|| ParseRegisterError {
            message: format!("invalid floating-point register name: '{}'", s.trim()),
        })
    }
}

/// A register reference in either file.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum RegRef {
    Int(IntRegister),
    Float(FloatRegister),
}

impl RegRef {
    /// Parse a register name, deciding the file from the name itself.
    /// `fp` is the integer frame pointer, not a float register.
    pub fn parse(name: &str) -> Option<RegRef> {
        let lower = name.trim().to_ascii_lowercase();
        if lower == "fp" {
            return Some(RegRef::Int(IntRegister::X8));
        }
        if let Some(r) = IntRegister::parse_name(&lower) {
            return Some(RegRef::Int(r));
        }
        FloatRegister::parse_name(&lower).map(RegRef::Float)
    }

    pub fn is_float(&self) -> bool {
        matches!(self, RegRef::Float(_))
    }
}

impl fmt::Display for RegRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegRef::Int(r) => write!(f, "{}", r),
            RegRef::Float(r) => write!(f, "{}", r),
        }
    }
}

/// Integer operand pool. t5 and t6 are reserved by the template as scratch
/// and memory base, so they never appear as random operands.
pub fn int_pool() -> Vec<IntRegister> {
    IntRegister::all()
        .into_iter()
        .filter(|r| *r != IntRegister::T5 && *r != IntRegister::T6)
        .collect()
}

/// Compressed-form operand pool (x8-x15)
pub fn compressed_int_pool() -> Vec<IntRegister> {
    IntRegister::all()
        .into_iter()
        .filter(IntRegister::is_compressed_encodable)
        .collect()
}

pub fn float_pool() -> Vec<FloatRegister> {
    FloatRegister::all()
}
