//! Jump sequence compiler
//!
//! Turns a planned control-flow structure plus its already-compiled filler
//! into an exact byte sequence. Offsets are numeric, so the emitted text
//! re-assembles to the same machine code the oracle executed.
//!
//! Forward jumps need a size fixed point: the offset depends on the branch's
//! own width, and the width depends on which form encodes. Since a width is
//! either 2 or 4 bytes, one re-encode always settles it.

use crate::encoder::{total_size, CompiledInstruction, HybridEncoder};
use crate::error::{Result, SynthError};
use crate::isa::IntRegister;
use std::fmt;

/// Control-flow structure decided before any encoding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JumpPlan {
    Forward {
        label: String,
        target_distance: usize,
    },
    Backward {
        label: String,
        loop_iterations: u32,
        counter_reg: IntRegister,
    },
    Indirect {
        label: String,
        target_distance: usize,
        addr_reg: IntRegister,
    },
}

impl JumpPlan {
    pub fn label(&self) -> &str {
        match self {
            JumpPlan::Forward { label, .. }
            | JumpPlan::Backward { label, .. }
            | JumpPlan::Indirect { label, .. } => label,
        }
    }

    pub fn kind(&self) -> JumpKind {
        match self {
            JumpPlan::Forward { .. } => JumpKind::Forward,
            JumpPlan::Backward { .. } => JumpKind::Backward,
            JumpPlan::Indirect { .. } => JumpKind::Indirect,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JumpKind {
    Forward,
    Backward,
    Indirect,
}

impl fmt::Display for JumpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JumpKind::Forward => write!(f, "forward"),
            JumpKind::Backward => write!(f, "backward"),
            JumpKind::Indirect => write!(f, "indirect"),
        }
    }
}

/// A branch or jump mnemonic with its register operands, offset pending.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BranchForm {
    pub mnemonic: String,
    pub registers: Vec<IntRegister>,
}

impl BranchForm {
    pub fn new(mnemonic: &str, registers: Vec<IntRegister>) -> Self {
        Self {
            mnemonic: mnemonic.to_string(),
            registers,
        }
    }

    /// Width assumed before encoding: 2 for compressed forms, else 4.
    pub fn assumed_size(&self) -> u8 {
        if self.mnemonic.starts_with("c.") {
            2
        } else {
            4
        }
    }

    /// Assembly text with a numeric offset in place of the label.
    pub fn text_with_offset(&self, offset: i64) -> Result<String> {
        let regs = &self.registers;
        let need = |n: usize| -> Result<()> {
            if regs.len() < n {
                return Err(SynthError::encoding(
                    &self.mnemonic,
                    format!("needs {} register operands, has {}", n, regs.len()),
                ));
            }
            Ok(())
        };
        match self.mnemonic.as_str() {
            "beq" | "bne" | "blt" | "bge" | "bltu" | "bgeu" => {
                need(2)?;
                Ok(format!("{} {}, {}, {}", self.mnemonic, regs[0], regs[1], offset))
            }
            "jal" => {
                let rd = regs.first().copied().unwrap_or(IntRegister::RA);
                Ok(format!("jal {}, {}", rd, offset))
            }
            "c.beqz" | "c.bnez" => {
                need(1)?;
                Ok(format!("{} {}, {}", self.mnemonic, regs[0], offset))
            }
            "c.j" | "c.jal" => Ok(format!("{} {}", self.mnemonic, offset)),
            other => Err(SynthError::encoding(
                other,
                "not a direct branch or jump mnemonic",
            )),
        }
    }
}

/// Split a PC-relative offset into `auipc`/`addi` immediates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OffsetSplit {
    /// Signed upper part; `hi20 << 12` plus `lo12` is the offset.
    pub hi20: i64,
    pub lo12: i64,
}

impl OffsetSplit {
    /// The 20-bit field as written in `auipc`.
    pub fn hi20_field(&self) -> i64 {
        self.hi20 & 0xfffff
    }
}

pub fn split_offset(offset: i64) -> OffsetSplit {
    let mut lo12 = offset & 0xfff;
    if lo12 >= 0x800 {
        lo12 -= 0x1000;
    }
    OffsetSplit {
        hi20: (offset - lo12) >> 12,
        lo12,
    }
}

/// Output of the compiler: every unit in execution order.
#[derive(Clone, Debug)]
pub struct CompiledSequence {
    pub kind: JumpKind,
    pub label: String,
    pub instructions: Vec<CompiledInstruction>,
    /// Offset encoded into the control-transfer instruction.
    pub branch_offset: i64,
    /// Index of the control-transfer instruction in `instructions`.
    pub branch_index: usize,
    pub loop_iterations: u32,
}

impl CompiledSequence {
    pub fn total_size(&self) -> usize {
        total_size(&self.instructions)
    }

    pub fn codes(&self) -> Vec<u32> {
        self.instructions.iter().map(|c| c.machine_code).collect()
    }

    pub fn sizes(&self) -> Vec<u8> {
        self.instructions.iter().map(|c| c.size).collect()
    }

    pub fn branch(&self) -> &CompiledInstruction {
        &self.instructions[self.branch_index]
    }

    /// Upper bound on retired instructions when the sequence runs once.
    pub fn step_budget(&self) -> u64 {
        let n = self.instructions.len() as u64;
        n * (self.loop_iterations.max(1) as u64) + n
    }

    /// Lines to write into the assembly body.
    pub fn asm_lines(&self) -> Vec<String> {
        let mut lines: Vec<String> = Vec::with_capacity(self.instructions.len() + 1);
        for (i, c) in self.instructions.iter().enumerate() {
            if self.kind == JumpKind::Backward && i == 1 {
                lines.push(format!("{}:", self.label));
            }
            if !c.text.is_empty() {
                lines.push(c.text.clone());
            }
        }
        if self.kind != JumpKind::Backward {
            lines.push(format!("{}:", self.label));
        }
        lines
    }
}

/// Compiles jump plans against a hybrid encoder.
pub struct JumpCompiler<'a> {
    encoder: &'a HybridEncoder,
}

impl<'a> JumpCompiler<'a> {
    pub fn new(encoder: &'a HybridEncoder) -> Self {
        Self { encoder }
    }

    pub fn encode_branch(&self, form: &BranchForm, offset: i64) -> Result<CompiledInstruction> {
        self.encoder.encode(&form.text_with_offset(offset)?)
    }

    /// Branch over `filler`: offset = branch size + filler bytes.
    pub fn compile_forward(
        &self,
        form: &BranchForm,
        filler: &[CompiledInstruction],
        label: &str,
    ) -> Result<CompiledSequence> {
        let m = total_size(filler) as i64;
        let assumed = form.assumed_size();
        let mut offset = assumed as i64 + m;
        let mut branch = self.encode_branch(form, offset)?;
        if branch.size != assumed {
            offset = branch.size as i64 + m;
            let used = branch.size;
            branch = self.encode_branch(form, offset)?;
            if branch.size != used {
                return Err(SynthError::encoding(
                    &branch.text,
                    "branch size did not converge",
                ));
            }
        }

        let mut instructions = Vec::with_capacity(filler.len() + 1);
        instructions.push(branch);
        instructions.extend_from_slice(filler);
        Ok(CompiledSequence {
            kind: JumpKind::Forward,
            label: label.to_string(),
            instructions,
            branch_offset: offset,
            branch_index: 0,
            loop_iterations: 1,
        })
    }

    /// `li counter, N; body; addi counter, counter, -1; bne counter, zero, back`.
    pub fn compile_backward(
        &self,
        counter: IntRegister,
        iterations: u32,
        body: &[CompiledInstruction],
        label: &str,
    ) -> Result<CompiledSequence> {
        let init = self
            .encoder
            .encode_sequence(&format!("li {}, {}", counter, iterations))?;
        let decr = self
            .encoder
            .encode(&format!("addi {}, {}, -1", counter, counter))?;
        let offset = -((total_size(body) + decr.size as usize) as i64);
        let form = BranchForm::new("bne", vec![counter, IntRegister::ZERO]);
        let branch = self.encode_branch(&form, offset)?;

        let mut instructions = Vec::with_capacity(init.len() + body.len() + 2);
        instructions.extend(init);
        instructions.extend_from_slice(body);
        instructions.push(decr);
        instructions.push(branch);
        let branch_index = instructions.len() - 1;
        Ok(CompiledSequence {
            kind: JumpKind::Backward,
            label: label.to_string(),
            instructions,
            branch_offset: offset,
            branch_index,
            loop_iterations: iterations,
        })
    }

    /// `auipc r, hi; addi r, r, lo; <jump via r>; filler`, landing just
    /// past the filler.
    pub fn compile_indirect(
        &self,
        jump_text: &str,
        addr_reg: IntRegister,
        filler: &[CompiledInstruction],
        label: &str,
    ) -> Result<CompiledSequence> {
        let jump = self.encoder.encode(jump_text)?;
        let target = 8 + jump.size as i64 + total_size(filler) as i64;
        let split = split_offset(target);
        let auipc = self
            .encoder
            .encode(&format!("auipc {}, {}", addr_reg, split.hi20_field()))?;
        let addi = self.encoder.encode(&format!(
            "addi {}, {}, {}",
            addr_reg, addr_reg, split.lo12
        ))?;

        let mut instructions = Vec::with_capacity(filler.len() + 3);
        instructions.push(auipc);
        instructions.push(addi);
        instructions.push(jump);
        instructions.extend_from_slice(filler);
        Ok(CompiledSequence {
            kind: JumpKind::Indirect,
            label: label.to_string(),
            instructions,
            branch_offset: target,
            branch_index: 2,
            loop_iterations: 1,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn filler(enc: &HybridEncoder, texts: &[&str]) -> Vec<CompiledInstruction> {
        texts.iter().map(|t| enc.encode(t).unwrap()).collect()
    }

    #[test]
    fn test_forward_offset_includes_branch_size() {
        let enc = HybridEncoder::table_only(64);
        let body = filler(&enc, &["add t0, t1, t2", "sub t3, t4, a0", "and a1, a0, a1"]);
        let form = BranchForm::new("beq", vec![IntRegister::X10, IntRegister::X11]);
        let seq = JumpCompiler::new(&enc).compile_forward(&form, &body, "fwd_0").unwrap();
        assert_eq!(seq.branch_offset, 16);
        assert_eq!(seq.branch().text, "beq a0, a1, 16");
        assert_eq!(seq.total_size(), 16);
        assert_eq!(seq.instructions.len(), 4);
    }

    #[test]
    fn test_compressed_forward_jump() {
        let enc = HybridEncoder::table_only(64);
        let body = filler(&enc, &["add t0, t1, t2", "xor a0, a1, a2"]);
        let form = BranchForm::new("c.beqz", vec![IntRegister::X8]);
        let seq = JumpCompiler::new(&enc).compile_forward(&form, &body, "fwd_1").unwrap();
        assert_eq!(seq.branch().size, 2);
        assert_eq!(seq.branch_offset, 10);
        assert_eq!(seq.branch_offset, seq.total_size() as i64);
    }

    #[test]
    fn test_backward_offset_spans_body_and_decrement() {
        let enc = HybridEncoder::table_only(64);
        let body = filler(&enc, &["add t0, t1, t2", "or a0, a1, a2", "mul a3, a4, a5"]);
        let seq = JumpCompiler::new(&enc)
            .compile_backward(IntRegister::S11, 4, &body, "bwd_0")
            .unwrap();
        assert_eq!(seq.branch_offset, -16);
        assert_eq!(seq.branch().text, "bne s11, zero, -16");
        assert_eq!(seq.instructions[0].text, "li s11, 4");
        assert_eq!(seq.loop_iterations, 4);
        let lines = seq.asm_lines();
        assert_eq!(lines[1], "bwd_0:");
        assert_eq!(lines.last().map(String::as_str), Some("bne s11, zero, -16"));
    }

    #[test]
    fn test_indirect_jump_target() {
        let enc = HybridEncoder::table_only(64);
        let body = filler(&enc, &["add t0, t1, t2", "add t0, t1, t2"]);
        let seq = JumpCompiler::new(&enc)
            .compile_indirect("jalr ra, 0(t0)", IntRegister::X5, &body, "fwd_2")
            .unwrap();
        assert_eq!(seq.branch_offset, 20);
        assert_eq!(seq.instructions[0].text, "auipc t0, 0");
        assert_eq!(seq.instructions[1].text, "addi t0, t0, 20");
        assert_eq!(seq.total_size(), 20);
    }

    #[test]
    fn test_split_offset_examples() {
        assert_eq!(split_offset(20), OffsetSplit { hi20: 0, lo12: 20 });
        assert_eq!(split_offset(4095), OffsetSplit { hi20: 1, lo12: -1 });
        assert_eq!(split_offset(0x800), OffsetSplit { hi20: 1, lo12: -2048 });
        assert_eq!(split_offset(-4), OffsetSplit { hi20: 0, lo12: -4 });
        assert_eq!(split_offset(-4).hi20_field(), 0);
        assert_eq!(split_offset(-0x1000).hi20_field(), 0xfffff);
    }

    #[test]
    fn test_branch_text_forms() {
        let j = BranchForm::new("c.j", vec![]);
        assert_eq!(j.text_with_offset(6).unwrap(), "c.j 6");
        let jal = BranchForm::new("jal", vec![]);
        assert_eq!(jal.text_with_offset(8).unwrap(), "jal ra, 8");
        assert!(BranchForm::new("beq", vec![IntRegister::X5])
            .text_with_offset(8)
            .is_err());
        assert!(BranchForm::new("add", vec![]).text_with_offset(8).is_err());
    }

    proptest! {
        #[test]
        fn test_split_offset_recombines(offset in -(1i64 << 31)..(1i64 << 31) - 2048) {
            let s = split_offset(offset);
            prop_assert!((-2048..=2047).contains(&s.lo12));
            prop_assert_eq!((s.hi20 << 12) + s.lo12, offset);
        }

        #[test]
        fn test_forward_size_converges(n in 0usize..8, compressed in any::<bool>()) {
            let enc = HybridEncoder::table_only(64);
            let body: Vec<_> = (0..n).map(|_| enc.encode("add a0, a1, a2").unwrap()).collect();
            let form = if compressed {
                BranchForm::new("c.bnez", vec![IntRegister::X9])
            } else {
                BranchForm::new("bge", vec![IntRegister::X9, IntRegister::X10])
            };
            let seq = JumpCompiler::new(&enc).compile_forward(&form, &body, "f").unwrap();
            prop_assert_eq!(
                seq.branch_offset,
                seq.branch().size as i64 + total_size(&body) as i64
            );
        }
    }
}
