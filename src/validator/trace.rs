//! Per-validator debug trace
//!
//! One record per validated candidate with its operand values before and
//! after execution. Each validator owns its own writer; nothing is shared
//! between seeds.

use capstone::prelude::*;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::{Result, SynthError};
use crate::isa::csr::csr_name;
use crate::isa::RegRef;

/// RISC-V disassembler with the compressed extension enabled.
pub fn riscv_disassembler(xlen: u32) -> Result<Capstone> {
    let mode = if xlen == 32 {
        capstone::arch::riscv::ArchMode::RiscV32
    } else {
        capstone::arch::riscv::ArchMode::RiscV64
    };
    Capstone::new()
        .riscv()
        .mode(mode)
        .extra_mode([capstone::arch::riscv::ArchExtraMode::RiscVC].iter().copied())
        .build()
        .map_err(|e| SynthError::Config(format!("capstone: {}", e)))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TraceStatus {
    Accepted,
    Rejected,
    Duplicate,
}

impl TraceStatus {
    fn tag(&self) -> &'static str {
        match self {
            TraceStatus::Accepted => "[ACCEPTED]",
            TraceStatus::Rejected => "[REJECTED]",
            TraceStatus::Duplicate => "[DUPLICATE]",
        }
    }
}

/// Everything a record prints.
pub struct TraceRecord<'a> {
    pub status: TraceStatus,
    pub text: &'a str,
    pub machine_code: u32,
    pub size: u8,
    pub pc_after: u64,
    pub sources: &'a [RegRef],
    pub source_values: &'a [u64],
    pub dests: &'a [RegRef],
    pub dest_values: &'a [u64],
    pub immediate: Option<i64>,
    /// CSR operand and its value after execution.
    pub csr: Option<(u16, u64)>,
    /// Bug label for rejected candidates.
    pub reason: Option<&'a str>,
}

pub struct DebugTrace {
    path: PathBuf,
    out: BufWriter<File>,
    accepted_only: bool,
    disasm: Option<Capstone>,
    records: usize,
}

fn reg_list(regs: &[RegRef]) -> String {
    let names: Vec<String> = regs.iter().map(|r| r.to_string()).collect();
    format!("[{}]", names.join(", "))
}

fn hex_list(values: &[u64]) -> String {
    let hex: Vec<String> = values.iter().map(|v| format!("0x{:x}", v)).collect();
    format!("[{}]", hex.join(", "))
}

impl DebugTrace {
    pub fn create(path: &Path, accepted_only: bool, xlen: u32) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = BufWriter::new(File::create(path)?);
        let mode = if accepted_only {
            "ACCEPTED only"
        } else {
            "ALL"
        };
        writeln!(out, "# rvsynth validation trace")?;
        writeln!(out, "# Mode: {}", mode)?;
        writeln!(out, "#{}", "=".repeat(79))?;
        writeln!(out)?;
        Ok(Self {
            path: path.to_path_buf(),
            out,
            accepted_only,
            // a trace without disassembly is still useful
            disasm: riscv_disassembler(xlen).ok(),
            records: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records(&self) -> usize {
        self.records
    }

    fn disassemble(&self, code: u32, size: u8, pc: u64) -> Option<String> {
        let cs = self.disasm.as_ref()?;
        let bytes = &code.to_le_bytes()[..size as usize];
        let insns = cs.disasm_count(bytes, pc, 1).ok()?;
        let insn = insns.iter().next()?;
        Some(format!(
            "{} {}",
            insn.mnemonic().unwrap_or("???"),
            insn.op_str().unwrap_or("")
        ))
    }

    pub fn record(&mut self, rec: &TraceRecord<'_>) -> Result<()> {
        if self.accepted_only && rec.status != TraceStatus::Accepted {
            return Ok(());
        }
        let disasm = self.disassemble(rec.machine_code, rec.size, rec.pc_after);
        let out = &mut self.out;
        writeln!(out, "{} {}", rec.status.tag(), rec.text)?;
        if rec.size == 2 {
            write!(out, "  Machine code: 0x{:04x}", rec.machine_code)?;
        } else {
            write!(out, "  Machine code: 0x{:08x}", rec.machine_code)?;
        }
        writeln!(out, ", PC after: 0x{:x}", rec.pc_after)?;
        writeln!(
            out,
            "  Source regs: {} -> {}",
            reg_list(rec.sources),
            hex_list(rec.source_values)
        )?;
        writeln!(
            out,
            "  Dest regs: {} -> {}",
            reg_list(rec.dests),
            hex_list(rec.dest_values)
        )?;
        if let Some(imm) = rec.immediate {
            writeln!(out, "  Immediate: {} (0x{:x})", imm, imm as u64)?;
        }
        if let Some((addr, value)) = rec.csr {
            writeln!(
                out,
                "  CSR: {} (0x{:03x}) = 0x{:x}",
                csr_name(addr).unwrap_or("?"),
                addr,
                value
            )?;
        }
        if let Some(reason) = rec.reason {
            writeln!(out, "  Reason: {}", reason)?;
        }
        if let Some(text) = disasm {
            writeln!(out, "  Disasm: {}", text.trim_end())?;
        }
        writeln!(out)?;
        self.out.flush()?;
        self.records += 1;
        Ok(())
    }
}
