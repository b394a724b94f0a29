//! Assembly text parser for RISC-V instructions
//!
//! Extracts the register and immediate operands the validator needs: which
//! registers an instruction reads, which it writes, and its immediate.
//! Memory operands `imm(base)` contribute the base as a source and the
//! offset as the immediate.

use std::fmt;

use crate::encoder::table::{parse_imm, split_instruction};
use crate::isa::csr::csr_address;
use crate::isa::RegRef;

/// Parse error with the offending text
#[derive(Debug, Clone)]
pub struct ParseError {
    pub operand: Option<usize>,
    pub message: String,
    pub text: String,
}

impl ParseError {
    pub fn new(message: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            operand: None,
            message: message.into(),
            text: text.into(),
        }
    }

    pub fn with_operand(mut self, operand: usize) -> Self {
        self.operand = Some(operand);
        self
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(idx) = self.operand {
            write!(f, "operand {}: {}\n  | {}", idx + 1, self.message, self.text)
        } else {
            write!(f, "{}\n  | {}", self.message, self.text)
        }
    }
}

impl std::error::Error for ParseError {}

/// Operand layout of a mnemonic.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperandShape {
    ZeroRs,
    ThreeFrs,
    DoubleFrs,
    SingleFrs,
    DoubleRs,
    SingleRsImm,
    SingleRs,
    CsrRs,
    CsrImm,
    CsrRead,
    CsrWrite,
    SingleImm,
    Load,
    Store,
    LoadFp,
    StoreFp,
    AtomicLr,
    AtomicSc,
    AtomicAmo,
    FpToInt,
    IntToFp,
    Branch,
    Jump,
    IndirectJump,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Role {
    Dest,
    Source,
    /// Compressed two-address forms read and write the same register.
    DestSource,
    Imm,
    Csr,
    Mem,
}

/// Registers and immediate of one instruction.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParsedInstruction {
    pub mnemonic: String,
    pub sources: Vec<RegRef>,
    pub dests: Vec<RegRef>,
    pub immediate: Option<i64>,
    pub csr: Option<u16>,
}

impl ParsedInstruction {
    pub fn writes(&self, reg: RegRef) -> bool {
        self.dests.contains(&reg)
    }
}

const DOUBLE_RS: &[&str] = &[
    "add", "sub", "sll", "slt", "sltu", "xor", "srl", "sra", "or", "and", "addw", "subw", "sllw",
    "srlw", "sraw", "mul", "mulh", "mulhsu", "mulhu", "div", "divu", "rem", "remu", "mulw",
    "divw", "divuw", "remw", "remuw", "sh1add", "sh2add", "sh3add", "add.uw", "sh1add.uw",
    "sh2add.uw", "sh3add.uw", "andn", "orn", "xnor", "max", "maxu", "min", "minu", "rol", "ror",
    "rolw", "rorw", "bclr", "bext", "binv", "bset", "c.add", "c.and", "c.or", "c.xor", "c.sub",
    "c.addw", "c.subw",
];

const SINGLE_RS_IMM: &[&str] = &[
    "addi", "slti", "sltiu", "xori", "ori", "andi", "slli", "srli", "srai", "addiw", "slliw",
    "srliw", "sraiw", "slli.uw", "rori", "roriw", "bclri", "bexti", "binvi", "bseti", "c.addi",
    "c.addiw", "c.slli", "c.srli", "c.srai", "c.andi", "c.addi16sp", "c.addi4spn",
];

const SINGLE_RS: &[&str] = &[
    "mv", "not", "neg", "negw", "sext.w", "seqz", "snez", "sltz", "sgtz", "clz", "clzw", "ctz",
    "ctzw", "cpop", "cpopw", "sext.b", "sext.h", "zext.h", "zext.w", "rev8", "orc.b", "c.mv",
];

const SINGLE_IMM: &[&str] = &["lui", "auipc", "li", "c.li", "c.lui"];

const ZERO_RS: &[&str] = &[
    "fence", "fence.i", "ecall", "ebreak", "mret", "sret", "wfi", "nop", "c.nop", "c.ebreak",
];

const LOADS: &[&str] = &[
    "lb", "lh", "lw", "ld", "lbu", "lhu", "lwu", "c.lw", "c.ld", "c.lwsp", "c.ldsp",
];
const STORES: &[&str] = &["sb", "sh", "sw", "sd", "c.sw", "c.sd", "c.swsp", "c.sdsp"];
const FP_LOADS: &[&str] = &["flw", "fld", "c.flw", "c.fld", "c.flwsp", "c.fldsp"];
const FP_STORES: &[&str] = &["fsw", "fsd", "c.fsw", "c.fsd", "c.fswsp", "c.fsdsp"];

const BRANCHES: &[&str] = &[
    "beq", "bne", "blt", "bge", "bltu", "bgeu", "beqz", "bnez", "c.beqz", "c.bnez",
];
const JUMPS: &[&str] = &["jal", "j", "c.j", "c.jal"];
const INDIRECT_JUMPS: &[&str] = &["jalr", "jr", "ret", "c.jr", "c.jalr"];

const TWO_ADDRESS: &[&str] = &[
    "c.add", "c.and", "c.or", "c.xor", "c.sub", "c.addw", "c.subw", "c.addi", "c.addiw",
    "c.slli", "c.srli", "c.srai", "c.andi", "c.addi16sp",
];

/// Drop `.aq`, `.rl` and `.aqrl` ordering suffixes.
pub fn strip_ordering(mnemonic: &str) -> &str {
    for suffix in [".aqrl", ".aq", ".rl"] {
        if let Some(base) = mnemonic.strip_suffix(suffix) {
            return base;
        }
    }
    mnemonic
}

/// Operand shape of a mnemonic, `None` when unknown.
pub fn shape_of(mnemonic: &str) -> Option<OperandShape> {
    let m = strip_ordering(mnemonic);
    let shape = if ZERO_RS.contains(&m) {
        OperandShape::ZeroRs
    } else if DOUBLE_RS.contains(&m) {
        OperandShape::DoubleRs
    } else if SINGLE_RS_IMM.contains(&m) {
        OperandShape::SingleRsImm
    } else if SINGLE_RS.contains(&m) {
        OperandShape::SingleRs
    } else if SINGLE_IMM.contains(&m) {
        OperandShape::SingleImm
    } else if LOADS.contains(&m) {
        OperandShape::Load
    } else if STORES.contains(&m) {
        OperandShape::Store
    } else if FP_LOADS.contains(&m) {
        OperandShape::LoadFp
    } else if FP_STORES.contains(&m) {
        OperandShape::StoreFp
    } else if BRANCHES.contains(&m) {
        OperandShape::Branch
    } else if JUMPS.contains(&m) {
        OperandShape::Jump
    } else if INDIRECT_JUMPS.contains(&m) {
        OperandShape::IndirectJump
    } else if matches!(m, "csrrw" | "csrrs" | "csrrc") {
        OperandShape::CsrRs
    } else if matches!(m, "csrrwi" | "csrrsi" | "csrrci") {
        OperandShape::CsrImm
    } else if m == "csrr" {
        OperandShape::CsrRead
    } else if m == "csrw" {
        OperandShape::CsrWrite
    } else if m.starts_with("lr.") {
        OperandShape::AtomicLr
    } else if m.starts_with("sc.") {
        OperandShape::AtomicSc
    } else if m.starts_with("amo") {
        OperandShape::AtomicAmo
    } else if m.starts_with('f') {
        return float_shape(m);
    } else {
        return None;
    };
    Some(shape)
}

fn float_shape(m: &str) -> Option<OperandShape> {
    let mut parts = m.split('.');
    let op = parts.next()?;
    let shape = match op {
        "fmadd" | "fmsub" | "fnmadd" | "fnmsub" => OperandShape::ThreeFrs,
        "fadd" | "fsub" | "fmul" | "fdiv" | "fmin" | "fmax" | "fsgnj" | "fsgnjn" | "fsgnjx"
        | "feq" | "flt" | "fle" => OperandShape::DoubleFrs,
        "fsqrt" | "fabs" | "fneg" => OperandShape::SingleFrs,
        "fclass" => OperandShape::FpToInt,
        "fmv" => match (parts.next()?, parts.next()) {
            ("x", _) => OperandShape::FpToInt,
            (_, Some("x")) => OperandShape::IntToFp,
            _ => OperandShape::SingleFrs,
        },
        "fcvt" => {
            let dst = parts.next()?;
            let src = parts.next()?;
            let is_float = |s: &str| matches!(s, "s" | "d" | "h");
            match (is_float(dst), is_float(src)) {
                (true, true) => OperandShape::SingleFrs,
                (false, true) => OperandShape::FpToInt,
                (true, false) => OperandShape::IntToFp,
                (false, false) => return None,
            }
        }
        _ => return None,
    };
    Some(shape)
}

fn roles(shape: OperandShape, mnemonic: &str, count: usize) -> Vec<Role> {
    use Role::*;
    let two_address = TWO_ADDRESS.contains(&mnemonic);
    match shape {
        OperandShape::ZeroRs => vec![],
        OperandShape::ThreeFrs => vec![Dest, Source, Source, Source],
        OperandShape::DoubleFrs | OperandShape::DoubleRs => {
            if two_address {
                vec![DestSource, Source]
            } else {
                vec![Dest, Source, Source]
            }
        }
        OperandShape::SingleRsImm => {
            if two_address {
                vec![DestSource, Imm]
            } else {
                vec![Dest, Source, Imm]
            }
        }
        OperandShape::SingleFrs
        | OperandShape::SingleRs
        | OperandShape::FpToInt
        | OperandShape::IntToFp => vec![Dest, Source],
        OperandShape::CsrRs => vec![Dest, Csr, Source],
        OperandShape::CsrImm => vec![Dest, Csr, Imm],
        OperandShape::CsrRead => vec![Dest, Csr],
        OperandShape::CsrWrite => vec![Csr, Source],
        OperandShape::SingleImm => vec![Dest, Imm],
        OperandShape::Load | OperandShape::LoadFp | OperandShape::AtomicLr => vec![Dest, Mem],
        OperandShape::Store | OperandShape::StoreFp => vec![Source, Mem],
        OperandShape::AtomicSc | OperandShape::AtomicAmo => vec![Dest, Source, Mem],
        OperandShape::Branch => {
            let mut r = vec![Source; count.saturating_sub(1)];
            r.push(Imm);
            r
        }
        OperandShape::Jump => {
            if count >= 2 {
                vec![Dest, Imm]
            } else {
                vec![Imm]
            }
        }
        OperandShape::IndirectJump => match mnemonic {
            "ret" => vec![],
            "c.jr" | "jr" | "c.jalr" => vec![Source],
            _ if count >= 2 => vec![Dest, Mem],
            _ => vec![Source],
        },
    }
}

/// Split a memory operand `imm(base)` or `(base)`.
fn split_mem(s: &str) -> Option<(i64, &str)> {
    let open = s.find('(')?;
    let close = s.rfind(')').filter(|c| *c > open)?;
    let offset = s[..open].trim();
    let offset = if offset.is_empty() { 0 } else { parse_imm(offset)? };
    Some((offset, s[open + 1..close].trim()))
}

pub struct InstructionParser;

impl InstructionParser {
    /// Parse one instruction. Unknown mnemonics yield no operands.
    pub fn parse(text: &str) -> Result<ParsedInstruction, ParseError> {
        let (mnemonic, items) = split_instruction(text);
        let base = strip_ordering(&mnemonic).to_string();
        let mut parsed = ParsedInstruction {
            mnemonic: base.clone(),
            ..ParsedInstruction::default()
        };
        let Some(shape) = shape_of(&base) else {
            return Ok(parsed);
        };

        let reg = |i: usize| -> Result<RegRef, ParseError> {
            let name = items
                .get(i)
                .ok_or_else(|| ParseError::new("missing register operand", text).with_operand(i))?;
            RegRef::parse(name).ok_or_else(|| {
                ParseError::new(format!("unknown register '{}'", name), text).with_operand(i)
            })
        };

        for (i, role) in roles(shape, &base, items.len()).into_iter().enumerate() {
            match role {
                Role::Dest => parsed.dests.push(reg(i)?),
                Role::Source => parsed.sources.push(reg(i)?),
                Role::DestSource => {
                    let r = reg(i)?;
                    parsed.dests.push(r);
                    parsed.sources.push(r);
                }
                Role::Imm => {
                    let s = items.get(i).ok_or_else(|| {
                        ParseError::new("missing immediate", text).with_operand(i)
                    })?;
                    let v = parse_imm(s).ok_or_else(|| {
                        ParseError::new(format!("invalid immediate '{}'", s), text).with_operand(i)
                    })?;
                    parsed.immediate = Some(v);
                }
                Role::Csr => {
                    let s = items
                        .get(i)
                        .ok_or_else(|| ParseError::new("missing csr", text).with_operand(i))?;
                    let addr = csr_address(s).ok_or_else(|| {
                        ParseError::new(format!("unknown csr '{}'", s), text).with_operand(i)
                    })?;
                    parsed.csr = Some(addr);
                }
                Role::Mem => {
                    let s = items.get(i).ok_or_else(|| {
                        ParseError::new("missing memory operand", text).with_operand(i)
                    })?;
                    let (offset, base_name) = split_mem(s).ok_or_else(|| {
                        ParseError::new(format!("invalid memory operand '{}'", s), text)
                            .with_operand(i)
                    })?;
                    let base_reg = RegRef::parse(base_name).ok_or_else(|| {
                        ParseError::new(format!("unknown register '{}'", base_name), text)
                            .with_operand(i)
                    })?;
                    parsed.sources.push(base_reg);
                    if !matches!(
                        shape,
                        OperandShape::AtomicLr | OperandShape::AtomicSc | OperandShape::AtomicAmo
                    ) {
                        parsed.immediate = Some(offset);
                    }
                }
            }
        }
        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::{FloatRegister, IntRegister, RegisterType};

    fn x(i: u8) -> RegRef {
        RegRef::Int(IntRegister::from_index(i).unwrap())
    }

    fn f(i: u8) -> RegRef {
        RegRef::Float(FloatRegister::from_index(i).unwrap())
    }

    #[test]
    fn test_parse_r_type() {
        let p = InstructionParser::parse("add a0, a1, a2").unwrap();
        assert_eq!(p.mnemonic, "add");
        assert_eq!(p.dests, vec![x(10)]);
        assert_eq!(p.sources, vec![x(11), x(12)]);
        assert_eq!(p.immediate, None);
    }

    #[test]
    fn test_parse_immediate_forms() {
        let p = InstructionParser::parse("addi t0, t1, -0x10").unwrap();
        assert_eq!(p.sources, vec![x(6)]);
        assert_eq!(p.immediate, Some(-16));

        let p = InstructionParser::parse("lui a0, 0x12345").unwrap();
        assert!(p.sources.is_empty());
        assert_eq!(p.immediate, Some(0x12345));
    }

    #[test]
    fn test_label_and_unknown_text_have_no_operands() {
        for text in ["loop_1:", "bogus a0, a1"] {
            let p = InstructionParser::parse(text).unwrap();
            assert!(p.dests.is_empty());
            assert!(p.sources.is_empty());
            assert_eq!(p.immediate, None);
            assert_eq!(p.csr, None);
        }
    }

    #[test]
    fn test_parse_memory_operands() {
        let p = InstructionParser::parse("ld a0, -24(t6)").unwrap();
        assert_eq!(p.dests, vec![x(10)]);
        assert_eq!(p.sources, vec![x(31)]);
        assert_eq!(p.immediate, Some(-24));

        let p = InstructionParser::parse("fsd fa0, 8(t6)").unwrap();
        assert!(p.dests.is_empty());
        assert_eq!(p.sources, vec![f(10), x(31)]);
    }

    #[test]
    fn test_parse_atomics_strip_ordering() {
        let p = InstructionParser::parse("amoadd.w.aqrl a0, a1, (t6)").unwrap();
        assert_eq!(p.mnemonic, "amoadd.w");
        assert_eq!(p.dests, vec![x(10)]);
        assert_eq!(p.sources, vec![x(11), x(31)]);
        assert_eq!(p.immediate, None);

        let p = InstructionParser::parse("lr.d.aq a2, (t6)").unwrap();
        assert_eq!(p.mnemonic, "lr.d");
        assert_eq!(p.sources, vec![x(31)]);
    }

    #[test]
    fn test_parse_float_shapes() {
        let p = InstructionParser::parse("fmadd.d fa0, fa1, fa2, fa3").unwrap();
        assert_eq!(shape_of("fmadd.d"), Some(OperandShape::ThreeFrs));
        assert_eq!(p.sources, vec![f(11), f(12), f(13)]);

        let p = InstructionParser::parse("fcvt.w.s a0, ft1, rtz").unwrap();
        assert_eq!(shape_of("fcvt.w.s"), Some(OperandShape::FpToInt));
        assert_eq!(p.dests, vec![x(10)]);
        assert_eq!(p.sources, vec![f(1)]);

        assert_eq!(shape_of("fmv.d.x"), Some(OperandShape::IntToFp));
        assert_eq!(shape_of("fmv.x.w"), Some(OperandShape::FpToInt));
        assert_eq!(shape_of("fcvt.s.d"), Some(OperandShape::SingleFrs));

        let p = InstructionParser::parse("feq.s a0, fa0, fa1").unwrap();
        assert_eq!(p.dests, vec![x(10)]);
    }

    #[test]
    fn test_parse_csr_forms() {
        let p = InstructionParser::parse("csrrs a0, mscratch, a1").unwrap();
        assert_eq!(p.csr, Some(0x340));
        assert_eq!(p.sources, vec![x(11)]);

        let p = InstructionParser::parse("csrrwi zero, mscratch, 5").unwrap();
        assert_eq!(p.immediate, Some(5));
        assert_eq!(p.dests, vec![x(0)]);
    }

    #[test]
    fn test_parse_compressed_two_address() {
        let p = InstructionParser::parse("c.addi s0, -3").unwrap();
        assert_eq!(p.dests, vec![x(8)]);
        assert_eq!(p.sources, vec![x(8)]);
        assert_eq!(p.immediate, Some(-3));

        let p = InstructionParser::parse("c.mv a0, a1").unwrap();
        assert_eq!(p.sources, vec![x(11)]);
    }

    #[test]
    fn test_fp_is_frame_pointer() {
        let p = InstructionParser::parse("add fp, fp, a0").unwrap();
        assert_eq!(p.dests, vec![x(8)]);
    }

    #[test]
    fn test_unknown_mnemonic_has_no_operands() {
        let p = InstructionParser::parse("vadd.vv v1, v2, v3").unwrap();
        assert_eq!(p.mnemonic, "vadd.vv");
        assert!(p.sources.is_empty() && p.dests.is_empty());
    }

    #[test]
    fn test_bad_register_is_error() {
        let err = InstructionParser::parse("add a0, q9, a2").unwrap_err();
        assert_eq!(err.operand, Some(1));
        assert!(err.to_string().contains("q9"));
    }

    #[test]
    fn test_branch_sources() {
        let p = InstructionParser::parse("bne s11, zero, -16").unwrap();
        assert_eq!(p.sources, vec![x(27), x(0)]);
        assert_eq!(p.immediate, Some(-16));
        let p = InstructionParser::parse("jalr ra, 0(t0)").unwrap();
        assert_eq!(p.dests, vec![x(1)]);
        assert_eq!(p.sources, vec![x(5)]);
    }
}
