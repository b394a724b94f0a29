//! Hybrid instruction encoder
//!
//! `encode` tries the table encoder first and falls back to an assembler
//! round-trip through the external toolchain. `encode_sequence` also
//! accepts pseudo-instructions that expand to several machine instructions.

pub mod table;
pub mod toolchain;

use crate::error::{Result, SynthError};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::trace;

pub use table::TableEncoder;
pub use toolchain::Toolchain;

/// Instruction width in bytes, from the two low bits of the encoding.
pub fn instruction_size(code: u32) -> u8 {
    if code & 0b11 != 0b11 {
        2
    } else {
        4
    }
}

/// One machine instruction with its source text.
///
/// Continuation units of a multi-instruction pseudo carry an empty `text`;
/// the pseudo's text sits on its first unit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompiledInstruction {
    pub machine_code: u32,
    pub size: u8,
    pub text: String,
}

impl CompiledInstruction {
    pub fn new(machine_code: u32, text: impl Into<String>) -> Self {
        Self {
            machine_code,
            size: instruction_size(machine_code),
            text: text.into(),
        }
    }

    pub fn is_compressed(&self) -> bool {
        self.size == 2
    }

    /// Little-endian bytes of this instruction.
    pub fn bytes(&self) -> Vec<u8> {
        self.machine_code.to_le_bytes()[..self.size as usize].to_vec()
    }
}

impl fmt::Display for CompiledInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.size == 2 {
            write!(f, "{:<32} # 0x{:04x}", self.text, self.machine_code)
        } else {
            write!(f, "{:<32} # 0x{:08x}", self.text, self.machine_code)
        }
    }
}

/// Total byte length of a compiled sequence.
pub fn total_size(seq: &[CompiledInstruction]) -> usize {
    seq.iter().map(|c| c.size as usize).sum()
}

/// Table encoder with optional assembler fallback.
#[derive(Debug)]
pub struct HybridEncoder {
    table: TableEncoder,
    toolchain: Option<Toolchain>,
    fallbacks: AtomicUsize,
}

impl HybridEncoder {
    pub fn new(xlen: u32, toolchain: Option<Toolchain>) -> Self {
        Self {
            table: TableEncoder::new(xlen),
            toolchain,
            fallbacks: AtomicUsize::new(0),
        }
    }

    /// Encoder without a toolchain; only table-encodable text succeeds.
    pub fn table_only(xlen: u32) -> Self {
        Self::new(xlen, None)
    }

    pub fn toolchain(&self) -> Option<&Toolchain> {
        self.toolchain.as_ref()
    }

    pub fn xlen(&self) -> u32 {
        self.table.xlen()
    }

    /// Number of encodings that went through the assembler.
    pub fn fallback_count(&self) -> usize {
        self.fallbacks.load(Ordering::Relaxed)
    }

    /// Encode a single real instruction.
    pub fn encode(&self, text: &str) -> Result<CompiledInstruction> {
        let table_err = match self.table.encode(text) {
            Ok(code) => return Ok(CompiledInstruction::new(code, text.trim())),
            Err(e) => e,
        };
        let Some(toolchain) = &self.toolchain else {
            return Err(table_err);
        };
        trace!(text, error = %table_err, "table encoder declined, using assembler");
        self.fallbacks.fetch_add(1, Ordering::Relaxed);
        let code = toolchain.assemble_one(text).map_err(|e| match e {
            SynthError::EncodingFailure { reason, .. } => SynthError::encoding(
                text,
                format!("{}; assembler: {}", table_reason(&table_err), reason),
            ),
            other => other,
        })?;
        Ok(CompiledInstruction::new(code, text.trim()))
    }

    /// Encode text that may expand to several instructions.
    pub fn encode_sequence(&self, text: &str) -> Result<Vec<CompiledInstruction>> {
        if let Ok(code) = self.table.encode(text) {
            return Ok(vec![CompiledInstruction::new(code, text.trim())]);
        }
        let toolchain = self.toolchain.as_ref().ok_or_else(|| {
            SynthError::encoding(text, "no table encoding and no assembler available")
        })?;
        self.fallbacks.fetch_add(1, Ordering::Relaxed);
        let units = toolchain.assemble_sequence(text)?;
        Ok(units
            .into_iter()
            .enumerate()
            .map(|(i, code)| {
                let label = if i == 0 { text.trim() } else { "" };
                CompiledInstruction::new(code, label)
            })
            .collect())
    }
}

fn table_reason(err: &SynthError) -> String {
    match err {
        SynthError::EncodingFailure { reason, .. } => reason.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_from_low_bits() {
        assert_eq!(instruction_size(0x0001), 2);
        assert_eq!(instruction_size(0x852e), 2);
        assert_eq!(instruction_size(0x0000_0013), 4);
        let c = CompiledInstruction::new(0x0015_0513, "addi a0, a0, 1");
        assert_eq!(c.bytes(), vec![0x13, 0x05, 0x15, 0x00]);
    }

    #[test]
    fn test_table_only_encodes_real_instructions() {
        let enc = HybridEncoder::table_only(64);
        let c = enc.encode("  xor a0, a1, a2 ").unwrap();
        assert_eq!(c.size, 4);
        assert_eq!(c.text, "xor a0, a1, a2");
        assert_eq!(enc.fallback_count(), 0);
    }

    #[test]
    fn test_table_only_rejects_multi_instruction_pseudo() {
        let enc = HybridEncoder::table_only(64);
        let err = enc.encode_sequence("li a0, 0x123456789").unwrap_err();
        assert!(matches!(err, SynthError::EncodingFailure { .. }));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_sequence_of_simple_instruction_is_single_unit() {
        let enc = HybridEncoder::table_only(64);
        let seq = enc.encode_sequence("li s11, 3").unwrap();
        assert_eq!(seq.len(), 1);
        assert_eq!(total_size(&seq), 4);
    }
}
