//! Table-driven RISC-V encoder
//!
//! Encodes one assembly line (real instruction or single-instruction
//! pseudo) straight to machine code without touching the toolchain. Anything
//! it does not recognise is reported as an `EncodingFailure` so the hybrid
//! encoder can fall back to the assembler.
//!
//! Branch and jump operands are numeric byte offsets relative to the
//! instruction itself, matching how GNU as treats a constant target.

use crate::error::{Result, SynthError};
use crate::isa::csr::csr_address;
use crate::isa::{FloatRegister, IntRegister, RegisterType};

const OP_LUI: u32 = 0x37;
const OP_AUIPC: u32 = 0x17;
const OP_JAL: u32 = 0x6f;
const OP_JALR: u32 = 0x67;
const OP_BRANCH: u32 = 0x63;
const OP_LOAD: u32 = 0x03;
const OP_STORE: u32 = 0x23;
const OP_IMM: u32 = 0x13;
const OP_REG: u32 = 0x33;
const OP_IMM_32: u32 = 0x1b;
const OP_REG_32: u32 = 0x3b;
const OP_MISC_MEM: u32 = 0x0f;
const OP_SYSTEM: u32 = 0x73;
const OP_AMO: u32 = 0x2f;
const OP_LOAD_FP: u32 = 0x07;
const OP_STORE_FP: u32 = 0x27;
const OP_FP: u32 = 0x53;
const OP_FMADD: u32 = 0x43;
const OP_FMSUB: u32 = 0x47;
const OP_FNMSUB: u32 = 0x4b;
const OP_FNMADD: u32 = 0x4f;

/// Dynamic rounding mode, the assembler default for rounding operations.
const RM_DYN: u32 = 7;

/// Encoder for one XLEN.
#[derive(Clone, Copy, Debug)]
pub struct TableEncoder {
    xlen: u32,
}

impl Default for TableEncoder {
    fn default() -> Self {
        Self::new(64)
    }
}

/// Operand list of one assembly line.
struct Operands<'a> {
    text: &'a str,
    items: Vec<&'a str>,
}

impl<'a> Operands<'a> {
    fn fail(&self, reason: impl Into<String>) -> SynthError {
        SynthError::encoding(self.text, reason)
    }

    fn expect(&self, n: usize) -> Result<()> {
        if self.items.len() != n {
            return Err(self.fail(format!(
                "expected {} operands, found {}",
                n,
                self.items.len()
            )));
        }
        Ok(())
    }

    fn get(&self, i: usize) -> Result<&'a str> {
        self.items
            .get(i)
            .copied()
            .ok_or_else(|| self.fail(format!("missing operand {}", i + 1)))
    }

    fn reg(&self, i: usize) -> Result<u32> {
        let name = self.get(i)?;
        IntRegister::parse_name(name)
            .map(|r| r.index() as u32)
            .ok_or_else(|| self.fail(format!("`{}` is not an integer register", name)))
    }

    fn freg(&self, i: usize) -> Result<u32> {
        let name = self.get(i)?;
        FloatRegister::parse_name(name)
            .map(|r| r.index() as u32)
            .ok_or_else(|| self.fail(format!("`{}` is not a float register", name)))
    }

    /// Register restricted to x8-x15, returned as its 3-bit field.
    fn creg(&self, i: usize) -> Result<u32> {
        let r = self.reg(i)?;
        if !(8..16).contains(&r) {
            return Err(self.fail(format!("`{}` is not a compressed register", self.get(i)?)));
        }
        Ok(r - 8)
    }

    fn imm(&self, i: usize) -> Result<i64> {
        let s = self.get(i)?;
        parse_imm(s).ok_or_else(|| self.fail(format!("bad immediate `{}`", s)))
    }

    /// `imm(reg)` or `(reg)`.
    fn mem(&self, i: usize) -> Result<(i64, u32)> {
        let s = self.get(i)?;
        let open = s
            .find('(')
            .ok_or_else(|| self.fail(format!("bad memory operand `{}`", s)))?;
        let close = s
            .rfind(')')
            .filter(|c| *c > open)
            .ok_or_else(|| self.fail(format!("bad memory operand `{}`", s)))?;
        let offset = s[..open].trim();
        let offset = if offset.is_empty() {
            0
        } else {
            parse_imm(offset).ok_or_else(|| self.fail(format!("bad offset `{}`", offset)))?
        };
        let base = &s[open + 1..close];
        let base = IntRegister::parse_name(base)
            .map(|r| r.index() as u32)
            .ok_or_else(|| self.fail(format!("bad base register `{}`", base)))?;
        Ok((offset, base))
    }

    fn csr(&self, i: usize) -> Result<u32> {
        let s = self.get(i)?;
        csr_address(s)
            .map(u32::from)
            .ok_or_else(|| self.fail(format!("unknown csr `{}`", s)))
    }

    /// Optional trailing rounding-mode operand at index `i`.
    fn rm(&self, i: usize, default: u32) -> Result<u32> {
        match self.items.get(i) {
            None => Ok(default),
            Some(s) => parse_rounding_mode(s)
                .ok_or_else(|| self.fail(format!("bad rounding mode `{}`", s))),
        }
    }
}

/// Parse a decimal or `0x` hexadecimal immediate, optionally negative.
pub fn parse_imm(s: &str) -> Option<i64> {
    let s = s.trim();
    let (neg, body) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };
    let value = if let Some(hex) = body.strip_prefix("0x").or_else(|| body.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).ok()?
    } else {
        body.parse::<i64>().ok()?
    };
    Some(if neg { -value } else { value })
}

fn parse_rounding_mode(s: &str) -> Option<u32> {
    Some(match s.trim() {
        "rne" => 0,
        "rtz" => 1,
        "rdn" => 2,
        "rup" => 3,
        "rmm" => 4,
        "dyn" => 7,
        _ => return None,
    })
}

fn fits_signed(value: i64, bits: u32) -> bool {
    let min = -(1i64 << (bits - 1));
    let max = (1i64 << (bits - 1)) - 1;
    (min..=max).contains(&value)
}

pub(crate) fn r_type(funct7: u32, rs2: u32, rs1: u32, funct3: u32, rd: u32, opcode: u32) -> u32 {
    (funct7 << 25) | (rs2 << 20) | (rs1 << 15) | (funct3 << 12) | (rd << 7) | opcode
}

pub(crate) fn i_type(imm: i64, rs1: u32, funct3: u32, rd: u32, opcode: u32) -> u32 {
    (((imm as u32) & 0xfff) << 20) | (rs1 << 15) | (funct3 << 12) | (rd << 7) | opcode
}

pub(crate) fn s_type(imm: i64, rs2: u32, rs1: u32, funct3: u32, opcode: u32) -> u32 {
    let imm = imm as u32;
    (((imm >> 5) & 0x7f) << 25)
        | (rs2 << 20)
        | (rs1 << 15)
        | (funct3 << 12)
        | ((imm & 0x1f) << 7)
        | opcode
}

pub(crate) fn b_type(offset: i64, rs2: u32, rs1: u32, funct3: u32) -> u32 {
    let imm = offset as u32;
    (((imm >> 12) & 1) << 31)
        | (((imm >> 5) & 0x3f) << 25)
        | (rs2 << 20)
        | (rs1 << 15)
        | (funct3 << 12)
        | (((imm >> 1) & 0xf) << 8)
        | (((imm >> 11) & 1) << 7)
        | OP_BRANCH
}

pub(crate) fn j_type(offset: i64, rd: u32) -> u32 {
    let imm = offset as u32;
    (((imm >> 20) & 1) << 31)
        | (((imm >> 1) & 0x3ff) << 21)
        | (((imm >> 11) & 1) << 20)
        | (((imm >> 12) & 0xff) << 12)
        | (rd << 7)
        | OP_JAL
}

fn r4_type(rs3: u32, fmt: u32, rs2: u32, rs1: u32, rm: u32, rd: u32, opcode: u32) -> u32 {
    (rs3 << 27) | (fmt << 25) | (rs2 << 20) | (rs1 << 15) | (rm << 12) | (rd << 7) | opcode
}

/// CI-format 6-bit immediate fields.
fn ci_imm(imm: i64) -> u32 {
    let imm = imm as u32;
    (((imm >> 5) & 1) << 12) | ((imm & 0x1f) << 2)
}

fn cj_offset(offset: i64) -> u32 {
    let o = offset as u32;
    (((o >> 11) & 1) << 12)
        | (((o >> 4) & 1) << 11)
        | (((o >> 8) & 3) << 9)
        | (((o >> 10) & 1) << 8)
        | (((o >> 6) & 1) << 7)
        | (((o >> 7) & 1) << 6)
        | (((o >> 1) & 7) << 3)
        | (((o >> 5) & 1) << 2)
}

fn cb_offset(offset: i64) -> u32 {
    let o = offset as u32;
    (((o >> 8) & 1) << 12)
        | (((o >> 3) & 3) << 10)
        | (((o >> 6) & 3) << 5)
        | (((o >> 1) & 3) << 3)
        | (((o >> 5) & 1) << 2)
}

/// Split `mnemonic op, op, ...` into its parts.
pub fn split_instruction(text: &str) -> (String, Vec<&str>) {
    let text = text.trim();
    let (mnemonic, rest) = match text.find(char::is_whitespace) {
        Some(pos) => (&text[..pos], text[pos..].trim()),
        None => (text, ""),
    };
    let operands = if rest.is_empty() {
        Vec::new()
    } else {
        rest.split(',').map(str::trim).collect()
    };
    (mnemonic.to_ascii_lowercase(), operands)
}

impl TableEncoder {
    pub fn new(xlen: u32) -> Self {
        Self { xlen }
    }

    pub fn xlen(&self) -> u32 {
        self.xlen
    }

    fn rv64(&self) -> bool {
        self.xlen == 64
    }

    /// Encode one instruction. Returns the 16- or 32-bit machine code.
    pub fn encode(&self, text: &str) -> Result<u32> {
        let (mnemonic, items) = split_instruction(text);
        let ops = Operands { text, items };
        match mnemonic.as_str() {
            m if m.starts_with("c.") => self.encode_compressed(m, &ops),
            m if m.starts_with('f') && m != "fence" && m != "fence.i" => {
                self.encode_float(m, &ops)
            }
            m if m.starts_with("amo") || m.starts_with("lr.") || m.starts_with("sc.") => {
                self.encode_atomic(m, &ops)
            }
            m => self.encode_base(m, &ops),
        }
    }

    fn shamt(&self, ops: &Operands, i: usize) -> Result<u32> {
        let v = ops.imm(i)?;
        let max = if self.rv64() { 63 } else { 31 };
        if !(0..=max).contains(&v) {
            return Err(ops.fail(format!("shift amount {} out of range", v)));
        }
        Ok(v as u32)
    }

    fn require_rv64(&self, ops: &Operands) -> Result<()> {
        if !self.rv64() {
            return Err(ops.fail("instruction requires RV64"));
        }
        Ok(())
    }

    fn imm12(&self, ops: &Operands, i: usize) -> Result<i64> {
        let v = ops.imm(i)?;
        if !fits_signed(v, 12) {
            return Err(ops.fail(format!("immediate {} out of 12-bit range", v)));
        }
        Ok(v)
    }

    fn branch_offset(&self, ops: &Operands, i: usize, bits: u32) -> Result<i64> {
        let v = ops.imm(i)?;
        if v % 2 != 0 || !fits_signed(v, bits) {
            return Err(ops.fail(format!("branch offset {} not encodable", v)));
        }
        Ok(v)
    }

    fn encode_base(&self, m: &str, ops: &Operands) -> Result<u32> {
        let alu_imm = |f3: u32| -> Result<u32> {
            ops.expect(3)?;
            Ok(i_type(self.imm12(ops, 2)?, ops.reg(1)?, f3, ops.reg(0)?, OP_IMM))
        };
        let alu = |f7: u32, f3: u32, opcode: u32| -> Result<u32> {
            ops.expect(3)?;
            Ok(r_type(f7, ops.reg(2)?, ops.reg(1)?, f3, ops.reg(0)?, opcode))
        };
        let unary = |imm12: u32, f3: u32| -> Result<u32> {
            ops.expect(2)?;
            Ok((imm12 << 20) | (ops.reg(1)? << 15) | (f3 << 12) | (ops.reg(0)? << 7) | OP_IMM)
        };
        let shift_imm = |f7: u32, f3: u32| -> Result<u32> {
            ops.expect(3)?;
            Ok((f7 << 25)
                | (self.shamt(ops, 2)? << 20)
                | (ops.reg(1)? << 15)
                | (f3 << 12)
                | (ops.reg(0)? << 7)
                | OP_IMM)
        };
        let shift_imm_w = |f7: u32, f3: u32| -> Result<u32> {
            self.require_rv64(ops)?;
            ops.expect(3)?;
            let sh = ops.imm(2)?;
            if !(0..=31).contains(&sh) {
                return Err(ops.fail(format!("shift amount {} out of range", sh)));
            }
            Ok(r_type(f7, sh as u32, ops.reg(1)?, f3, ops.reg(0)?, OP_IMM_32))
        };
        let load = |f3: u32| -> Result<u32> {
            ops.expect(2)?;
            let (off, base) = ops.mem(1)?;
            if !fits_signed(off, 12) {
                return Err(ops.fail("load offset out of range"));
            }
            Ok(i_type(off, base, f3, ops.reg(0)?, OP_LOAD))
        };
        let store = |f3: u32| -> Result<u32> {
            ops.expect(2)?;
            let (off, base) = ops.mem(1)?;
            if !fits_signed(off, 12) {
                return Err(ops.fail("store offset out of range"));
            }
            Ok(s_type(off, ops.reg(0)?, base, f3, OP_STORE))
        };
        let branch = |f3: u32| -> Result<u32> {
            ops.expect(3)?;
            Ok(b_type(self.branch_offset(ops, 2, 13)?, ops.reg(1)?, ops.reg(0)?, f3))
        };
        let csr = |f3: u32, immediate: bool| -> Result<u32> {
            ops.expect(3)?;
            let src = if immediate {
                let z = ops.imm(2)?;
                if !(0..32).contains(&z) {
                    return Err(ops.fail("csr immediate out of range"));
                }
                z as u32
            } else {
                ops.reg(2)?
            };
            Ok((ops.csr(1)? << 20) | (src << 15) | (f3 << 12) | (ops.reg(0)? << 7) | OP_SYSTEM)
        };
        let upper = |opcode: u32| -> Result<u32> {
            ops.expect(2)?;
            let v = ops.imm(1)?;
            if !(0..=0xfffff).contains(&v) {
                return Err(ops.fail(format!("upper immediate {} out of range", v)));
            }
            Ok(((v as u32) << 12) | (ops.reg(0)? << 7) | opcode)
        };

        match m {
            "lui" => upper(OP_LUI),
            "auipc" => upper(OP_AUIPC),
            "jal" => match ops.items.len() {
                1 => Ok(j_type(self.branch_offset(ops, 0, 21)?, 1)),
                _ => {
                    ops.expect(2)?;
                    Ok(j_type(self.branch_offset(ops, 1, 21)?, ops.reg(0)?))
                }
            },
            "j" => {
                ops.expect(1)?;
                Ok(j_type(self.branch_offset(ops, 0, 21)?, 0))
            }
            "jalr" => match ops.items.len() {
                1 => Ok(i_type(0, ops.reg(0)?, 0, 1, OP_JALR)),
                2 => {
                    let (off, base) = ops.mem(1)?;
                    if !fits_signed(off, 12) {
                        return Err(ops.fail("jalr offset out of range"));
                    }
                    Ok(i_type(off, base, 0, ops.reg(0)?, OP_JALR))
                }
                _ => {
                    ops.expect(3)?;
                    Ok(i_type(self.imm12(ops, 2)?, ops.reg(1)?, 0, ops.reg(0)?, OP_JALR))
                }
            },
            "jr" => {
                ops.expect(1)?;
                Ok(i_type(0, ops.reg(0)?, 0, 0, OP_JALR))
            }
            "ret" => {
                ops.expect(0)?;
                Ok(i_type(0, 1, 0, 0, OP_JALR))
            }
            "beq" => branch(0),
            "bne" => branch(1),
            "blt" => branch(4),
            "bge" => branch(5),
            "bltu" => branch(6),
            "bgeu" => branch(7),
            "beqz" | "bnez" => {
                ops.expect(2)?;
                let f3 = if m == "beqz" { 0 } else { 1 };
                Ok(b_type(self.branch_offset(ops, 1, 13)?, 0, ops.reg(0)?, f3))
            }
            "lb" => load(0),
            "lh" => load(1),
            "lw" => load(2),
            "lbu" => load(4),
            "lhu" => load(5),
            "ld" | "lwu" => {
                self.require_rv64(ops)?;
                load(if m == "ld" { 3 } else { 6 })
            }
            "sb" => store(0),
            "sh" => store(1),
            "sw" => store(2),
            "sd" => {
                self.require_rv64(ops)?;
                store(3)
            }
            "addi" => alu_imm(0),
            "slti" => alu_imm(2),
            "sltiu" => alu_imm(3),
            "xori" => alu_imm(4),
            "ori" => alu_imm(6),
            "andi" => alu_imm(7),
            "slli" => shift_imm(0x00, 1),
            "srli" => shift_imm(0x00, 5),
            "srai" => shift_imm(0x20, 5),
            "add" => alu(0x00, 0, OP_REG),
            "sub" => alu(0x20, 0, OP_REG),
            "sll" => alu(0x00, 1, OP_REG),
            "slt" => alu(0x00, 2, OP_REG),
            "sltu" => alu(0x00, 3, OP_REG),
            "xor" => alu(0x00, 4, OP_REG),
            "srl" => alu(0x00, 5, OP_REG),
            "sra" => alu(0x20, 5, OP_REG),
            "or" => alu(0x00, 6, OP_REG),
            "and" => alu(0x00, 7, OP_REG),
            "mul" => alu(0x01, 0, OP_REG),
            "mulh" => alu(0x01, 1, OP_REG),
            "mulhsu" => alu(0x01, 2, OP_REG),
            "mulhu" => alu(0x01, 3, OP_REG),
            "div" => alu(0x01, 4, OP_REG),
            "divu" => alu(0x01, 5, OP_REG),
            "rem" => alu(0x01, 6, OP_REG),
            "remu" => alu(0x01, 7, OP_REG),
            "addiw" => {
                self.require_rv64(ops)?;
                ops.expect(3)?;
                Ok(i_type(self.imm12(ops, 2)?, ops.reg(1)?, 0, ops.reg(0)?, OP_IMM_32))
            }
            "slliw" => shift_imm_w(0x00, 1),
            "srliw" => shift_imm_w(0x00, 5),
            "sraiw" => shift_imm_w(0x20, 5),
            "addw" | "subw" | "sllw" | "srlw" | "sraw" | "mulw" | "divw" | "divuw" | "remw"
            | "remuw" => {
                self.require_rv64(ops)?;
                let (f7, f3) = match m {
                    "addw" => (0x00, 0),
                    "subw" => (0x20, 0),
                    "sllw" => (0x00, 1),
                    "srlw" => (0x00, 5),
                    "sraw" => (0x20, 5),
                    "mulw" => (0x01, 0),
                    "divw" => (0x01, 4),
                    "divuw" => (0x01, 5),
                    "remw" => (0x01, 6),
                    _ => (0x01, 7),
                };
                alu(f7, f3, OP_REG_32)
            }
            // Zba
            "sh1add" => alu(0x10, 2, OP_REG),
            "sh2add" => alu(0x10, 4, OP_REG),
            "sh3add" => alu(0x10, 6, OP_REG),
            // Zbb
            "andn" => alu(0x20, 7, OP_REG),
            "orn" => alu(0x20, 6, OP_REG),
            "xnor" => alu(0x20, 4, OP_REG),
            "max" => alu(0x05, 6, OP_REG),
            "maxu" => alu(0x05, 7, OP_REG),
            "min" => alu(0x05, 4, OP_REG),
            "minu" => alu(0x05, 5, OP_REG),
            "rol" => alu(0x30, 1, OP_REG),
            "ror" => alu(0x30, 5, OP_REG),
            "clz" => unary(0x600, 1),
            "ctz" => unary(0x601, 1),
            "cpop" => unary(0x602, 1),
            "sext.b" => unary(0x604, 1),
            "sext.h" => unary(0x605, 1),
            "orc.b" => unary(0x287, 5),
            "rev8" => unary(if self.rv64() { 0x6b8 } else { 0x698 }, 5),
            "rori" => shift_imm(0x30, 5),
            // Zbs
            "bclr" => alu(0x24, 1, OP_REG),
            "bext" => alu(0x24, 5, OP_REG),
            "binv" => alu(0x34, 1, OP_REG),
            "bset" => alu(0x14, 1, OP_REG),
            "bclri" => shift_imm(0x24, 1),
            "bexti" => shift_imm(0x24, 5),
            "binvi" => shift_imm(0x34, 1),
            "bseti" => shift_imm(0x14, 1),
            // Zicsr
            "csrrw" => csr(1, false),
            "csrrs" => csr(2, false),
            "csrrc" => csr(3, false),
            "csrrwi" => csr(5, true),
            "csrrsi" => csr(6, true),
            "csrrci" => csr(7, true),
            "csrr" => {
                ops.expect(2)?;
                Ok((ops.csr(1)? << 20) | (2 << 12) | (ops.reg(0)? << 7) | OP_SYSTEM)
            }
            "csrw" => {
                ops.expect(2)?;
                Ok((ops.csr(0)? << 20) | (ops.reg(1)? << 15) | (1 << 12) | OP_SYSTEM)
            }
            "fence" => {
                if ops.items.is_empty() {
                    Ok(0x0ff0_0000 | OP_MISC_MEM)
                } else {
                    Err(ops.fail("fence ordering operands are not supported"))
                }
            }
            "fence.i" => {
                ops.expect(0)?;
                Ok((1 << 12) | OP_MISC_MEM)
            }
            "ecall" => Ok(0x0000_0073),
            "ebreak" => Ok(0x0010_0073),
            "mret" => Ok(0x3020_0073),
            "wfi" => Ok(0x1050_0073),
            // single-instruction pseudos
            "nop" => {
                ops.expect(0)?;
                Ok(i_type(0, 0, 0, 0, OP_IMM))
            }
            "li" => {
                ops.expect(2)?;
                let v = ops.imm(1)?;
                if !fits_signed(v, 12) {
                    return Err(ops.fail("li immediate needs a multi-instruction expansion"));
                }
                Ok(i_type(v, 0, 0, ops.reg(0)?, OP_IMM))
            }
            "mv" => {
                ops.expect(2)?;
                Ok(i_type(0, ops.reg(1)?, 0, ops.reg(0)?, OP_IMM))
            }
            "not" => {
                ops.expect(2)?;
                Ok(i_type(-1, ops.reg(1)?, 4, ops.reg(0)?, OP_IMM))
            }
            "neg" => {
                ops.expect(2)?;
                Ok(r_type(0x20, ops.reg(1)?, 0, 0, ops.reg(0)?, OP_REG))
            }
            _ => Err(ops.fail(format!("unknown mnemonic `{}`", m))),
        }
    }

    fn encode_atomic(&self, m: &str, ops: &Operands) -> Result<u32> {
        let mut parts: Vec<&str> = m.split('.').collect();
        let (aq, rl) = match parts.last().copied() {
            Some("aq") => (1, 0),
            Some("rl") => (0, 1),
            Some("aqrl") => (1, 1),
            _ => (0, 0),
        };
        if aq | rl != 0 {
            parts.pop();
        }
        if parts.len() != 2 {
            return Err(ops.fail(format!("unknown atomic `{}`", m)));
        }
        let f3 = match parts[1] {
            "w" => 2,
            "d" => {
                self.require_rv64(ops)?;
                3
            }
            _ => return Err(ops.fail(format!("unknown atomic width in `{}`", m))),
        };
        let funct5 = match parts[0] {
            "lr" => 0x02,
            "sc" => 0x03,
            "amoswap" => 0x01,
            "amoadd" => 0x00,
            "amoxor" => 0x04,
            "amoand" => 0x0c,
            "amoor" => 0x08,
            "amomin" => 0x10,
            "amomax" => 0x14,
            "amominu" => 0x18,
            "amomaxu" => 0x1c,
            other => return Err(ops.fail(format!("unknown atomic `{}`", other))),
        };
        let (rs2, addr_idx) = if parts[0] == "lr" {
            ops.expect(2)?;
            (0, 1)
        } else {
            ops.expect(3)?;
            (ops.reg(1)?, 2)
        };
        let (off, base) = ops.mem(addr_idx)?;
        if off != 0 {
            return Err(ops.fail("atomic address must have zero offset"));
        }
        Ok((funct5 << 27)
            | (aq << 26)
            | (rl << 25)
            | (rs2 << 20)
            | (base << 15)
            | (f3 << 12)
            | (ops.reg(0)? << 7)
            | OP_AMO)
    }

    fn encode_float(&self, m: &str, ops: &Operands) -> Result<u32> {
        let parts: Vec<&str> = m.split('.').collect();
        let fmt_of = |s: &str| -> Result<u32> {
            match s {
                "s" => Ok(0),
                "d" => Ok(1),
                _ => Err(ops.fail(format!("unsupported float format in `{}`", m))),
            }
        };
        let int_code = |s: &str| -> Option<u32> {
            match s {
                "w" => Some(0),
                "wu" => Some(1),
                "l" => Some(2),
                "lu" => Some(3),
                _ => None,
            }
        };

        match parts.as_slice() {
            ["flw"] | ["fld"] => {
                ops.expect(2)?;
                let (off, base) = ops.mem(1)?;
                let f3 = if m == "flw" { 2 } else { 3 };
                Ok(i_type(off, base, f3, ops.freg(0)?, OP_LOAD_FP))
            }
            ["fsw"] | ["fsd"] => {
                ops.expect(2)?;
                let (off, base) = ops.mem(1)?;
                let f3 = if m == "fsw" { 2 } else { 3 };
                Ok(s_type(off, ops.freg(0)?, base, f3, OP_STORE_FP))
            }
            [op @ ("fmadd" | "fmsub" | "fnmadd" | "fnmsub"), fmt] => {
                let fmt = fmt_of(*fmt)?;
                let opcode = match *op {
                    "fmadd" => OP_FMADD,
                    "fmsub" => OP_FMSUB,
                    "fnmsub" => OP_FNMSUB,
                    _ => OP_FNMADD,
                };
                if ops.items.len() != 4 && ops.items.len() != 5 {
                    return Err(ops.fail("expected 4 operands"));
                }
                Ok(r4_type(
                    ops.freg(3)?,
                    fmt,
                    ops.freg(2)?,
                    ops.freg(1)?,
                    ops.rm(4, RM_DYN)?,
                    ops.freg(0)?,
                    opcode,
                ))
            }
            [op @ ("fadd" | "fsub" | "fmul" | "fdiv"), fmt] => {
                let fmt = fmt_of(*fmt)?;
                let funct5 = match *op {
                    "fadd" => 0x00,
                    "fsub" => 0x01,
                    "fmul" => 0x02,
                    _ => 0x03,
                };
                if ops.items.len() != 3 && ops.items.len() != 4 {
                    return Err(ops.fail("expected 3 operands"));
                }
                Ok(r_type(
                    (funct5 << 2) | fmt,
                    ops.freg(2)?,
                    ops.freg(1)?,
                    ops.rm(3, RM_DYN)?,
                    ops.freg(0)?,
                    OP_FP,
                ))
            }
            ["fsqrt", fmt] => {
                let fmt = fmt_of(*fmt)?;
                if ops.items.len() != 2 && ops.items.len() != 3 {
                    return Err(ops.fail("expected 2 operands"));
                }
                Ok(r_type(
                    (0x0b << 2) | fmt,
                    0,
                    ops.freg(1)?,
                    ops.rm(2, RM_DYN)?,
                    ops.freg(0)?,
                    OP_FP,
                ))
            }
            [op @ ("fsgnj" | "fsgnjn" | "fsgnjx" | "fmin" | "fmax"), fmt] => {
                let fmt = fmt_of(*fmt)?;
                let (funct5, f3) = match *op {
                    "fsgnj" => (0x04, 0),
                    "fsgnjn" => (0x04, 1),
                    "fsgnjx" => (0x04, 2),
                    "fmin" => (0x05, 0),
                    _ => (0x05, 1),
                };
                ops.expect(3)?;
                Ok(r_type(
                    (funct5 << 2) | fmt,
                    ops.freg(2)?,
                    ops.freg(1)?,
                    f3,
                    ops.freg(0)?,
                    OP_FP,
                ))
            }
            [op @ ("feq" | "flt" | "fle"), fmt] => {
                let fmt = fmt_of(*fmt)?;
                let f3 = match *op {
                    "feq" => 2,
                    "flt" => 1,
                    _ => 0,
                };
                ops.expect(3)?;
                Ok(r_type(
                    (0x14 << 2) | fmt,
                    ops.freg(2)?,
                    ops.freg(1)?,
                    f3,
                    ops.reg(0)?,
                    OP_FP,
                ))
            }
            ["fclass", fmt] => {
                let fmt = fmt_of(*fmt)?;
                ops.expect(2)?;
                Ok(r_type((0x1c << 2) | fmt, 0, ops.freg(1)?, 1, ops.reg(0)?, OP_FP))
            }
            ["fmv", "x", w @ ("w" | "d")] => {
                if *w == "d" {
                    self.require_rv64(ops)?;
                }
                ops.expect(2)?;
                let fmt = fmt_of(if *w == "w" { "s" } else { "d" })?;
                Ok(r_type((0x1c << 2) | fmt, 0, ops.freg(1)?, 0, ops.reg(0)?, OP_FP))
            }
            ["fmv", w @ ("w" | "d"), "x"] => {
                if *w == "d" {
                    self.require_rv64(ops)?;
                }
                ops.expect(2)?;
                let fmt = fmt_of(if *w == "w" { "s" } else { "d" })?;
                Ok(r_type((0x1e << 2) | fmt, 0, ops.reg(1)?, 0, ops.freg(0)?, OP_FP))
            }
            ["fcvt", "s", "d"] => {
                if ops.items.len() != 2 && ops.items.len() != 3 {
                    return Err(ops.fail("expected 2 operands"));
                }
                Ok(r_type(0x20, 1, ops.freg(1)?, ops.rm(2, RM_DYN)?, ops.freg(0)?, OP_FP))
            }
            ["fcvt", "d", "s"] => {
                if ops.items.len() != 2 && ops.items.len() != 3 {
                    return Err(ops.fail("expected 2 operands"));
                }
                Ok(r_type(0x21, 0, ops.freg(1)?, ops.rm(2, 0)?, ops.freg(0)?, OP_FP))
            }
            ["fcvt", dst, src] => {
                if ops.items.len() != 2 && ops.items.len() != 3 {
                    return Err(ops.fail("expected 2 operands"));
                }
                if let (Some(code), Ok(fmt)) = (int_code(*dst), fmt_of(*src)) {
                    if code >= 2 {
                        self.require_rv64(ops)?;
                    }
                    return Ok(r_type(
                        (0x18 << 2) | fmt,
                        code,
                        ops.freg(1)?,
                        ops.rm(2, RM_DYN)?,
                        ops.reg(0)?,
                        OP_FP,
                    ));
                }
                if let (Ok(fmt), Some(code)) = (fmt_of(*dst), int_code(*src)) {
                    if code >= 2 {
                        self.require_rv64(ops)?;
                    }
                    // Exact conversions carry a fixed rne field in the assembler.
                    let default_rm = if fmt == 1 && code < 2 { 0 } else { RM_DYN };
                    return Ok(r_type(
                        (0x1a << 2) | fmt,
                        code,
                        ops.reg(1)?,
                        ops.rm(2, default_rm)?,
                        ops.freg(0)?,
                        OP_FP,
                    ));
                }
                Err(ops.fail(format!("unsupported conversion `{}`", m)))
            }
            _ => Err(ops.fail(format!("unknown mnemonic `{}`", m))),
        }
    }

    fn encode_compressed(&self, m: &str, ops: &Operands) -> Result<u32> {
        let nonzero_reg = |i: usize| -> Result<u32> {
            let r = ops.reg(i)?;
            if r == 0 {
                return Err(ops.fail("register must not be zero"));
            }
            Ok(r)
        };
        let imm6 = |i: usize, nonzero: bool| -> Result<i64> {
            let v = ops.imm(i)?;
            if !fits_signed(v, 6) || (nonzero && v == 0) {
                return Err(ops.fail(format!("immediate {} not encodable", v)));
            }
            Ok(v)
        };
        let shamt6 = |i: usize| -> Result<u32> {
            let v = ops.imm(i)?;
            let max = if self.rv64() { 63 } else { 31 };
            if !(1..=max).contains(&v) {
                return Err(ops.fail(format!("shift amount {} not encodable", v)));
            }
            Ok(v as u32)
        };
        let arith = |prefix: u32, f2: u32| -> Result<u32> {
            ops.expect(2)?;
            Ok((prefix << 10) | (ops.creg(0)? << 7) | (f2 << 5) | (ops.creg(1)? << 2) | 0b01)
        };

        let code = match m {
            "c.nop" => {
                ops.expect(0)?;
                0x0001
            }
            "c.addi" => {
                ops.expect(2)?;
                (nonzero_reg(0)? << 7) | ci_imm(imm6(1, true)?) | 0b01
            }
            "c.addiw" => {
                self.require_rv64(ops)?;
                ops.expect(2)?;
                (0b001 << 13) | (nonzero_reg(0)? << 7) | ci_imm(imm6(1, false)?) | 0b01
            }
            "c.li" => {
                ops.expect(2)?;
                (0b010 << 13) | (nonzero_reg(0)? << 7) | ci_imm(imm6(1, false)?) | 0b01
            }
            "c.srli" | "c.srai" => {
                ops.expect(2)?;
                let sh = shamt6(1)?;
                let f2 = if m == "c.srli" { 0 } else { 1 };
                (0b100 << 13)
                    | (((sh >> 5) & 1) << 12)
                    | (f2 << 10)
                    | (ops.creg(0)? << 7)
                    | ((sh & 0x1f) << 2)
                    | 0b01
            }
            "c.andi" => {
                ops.expect(2)?;
                (0b100 << 13) | (0b10 << 10) | (ops.creg(0)? << 7) | ci_imm(imm6(1, false)?) | 0b01
            }
            "c.sub" => arith(0b100011, 0)?,
            "c.xor" => arith(0b100011, 1)?,
            "c.or" => arith(0b100011, 2)?,
            "c.and" => arith(0b100011, 3)?,
            "c.subw" | "c.addw" => {
                self.require_rv64(ops)?;
                arith(0b100111, if m == "c.subw" { 0 } else { 1 })?
            }
            "c.j" | "c.jal" => {
                if m == "c.jal" && self.rv64() {
                    return Err(ops.fail("c.jal is RV32 only"));
                }
                ops.expect(1)?;
                let f3 = if m == "c.j" { 0b101 } else { 0b001 };
                (f3 << 13) | cj_offset(self.branch_offset(ops, 0, 12)?) | 0b01
            }
            "c.beqz" | "c.bnez" => {
                ops.expect(2)?;
                let f3 = if m == "c.beqz" { 0b110 } else { 0b111 };
                (f3 << 13) | (ops.creg(0)? << 7) | cb_offset(self.branch_offset(ops, 1, 9)?) | 0b01
            }
            "c.slli" => {
                ops.expect(2)?;
                let sh = shamt6(1)?;
                (((sh >> 5) & 1) << 12) | (nonzero_reg(0)? << 7) | ((sh & 0x1f) << 2) | 0b10
            }
            "c.mv" => {
                ops.expect(2)?;
                (0b1000 << 12) | (nonzero_reg(0)? << 7) | (nonzero_reg(1)? << 2) | 0b10
            }
            "c.add" => {
                ops.expect(2)?;
                (0b1001 << 12) | (nonzero_reg(0)? << 7) | (nonzero_reg(1)? << 2) | 0b10
            }
            "c.jr" => {
                ops.expect(1)?;
                (0b1000 << 12) | (nonzero_reg(0)? << 7) | 0b10
            }
            "c.jalr" => {
                ops.expect(1)?;
                (0b1001 << 12) | (nonzero_reg(0)? << 7) | 0b10
            }
            "c.ebreak" => 0x9002,
            _ => return Err(ops.fail(format!("unknown compressed mnemonic `{}`", m))),
        };
        Ok(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enc(text: &str) -> u32 {
        TableEncoder::new(64).encode(text).unwrap()
    }

    #[test]
    fn test_base_integer_encodings() {
        assert_eq!(enc("addi a0, a0, 1"), 0x0015_0513);
        assert_eq!(enc("add t0, t1, t2"), 0x0073_02b3);
        assert_eq!(enc("sub t3, t4, t5"), 0x41ee_8e33);
        assert_eq!(enc("nop"), 0x0000_0013);
        assert_eq!(enc("lui a0, 0x12345"), 0x1234_5537);
        assert_eq!(enc("li s11, 5"), 0x0050_0d93);
        assert_eq!(enc("addi s11, s11, -1"), 0xfffd_8d93);
        assert_eq!(enc("srai a0, a1, 3"), 0x4035_d513);
    }

    #[test]
    fn test_memory_encodings() {
        assert_eq!(enc("ld a0, 8(t6)"), 0x008f_b503);
        assert_eq!(enc("sw a1, -4(t6)"), 0xfebf_ae23);
        assert_eq!(enc("lr.w a0, (t6)"), 0x100f_a52f);
        assert_eq!(enc("amoadd.w.aqrl a0, a1, (t6)"), 0x06bf_a52f);
    }

    #[test]
    fn test_branch_and_jump_offsets() {
        assert_eq!(enc("beq a0, a1, 16"), 0x00b5_0863);
        assert_eq!(enc("bne s11, zero, -12"), 0xfe0d_9ae3);
        assert_eq!(enc("jal ra, 8"), 0x0080_00ef);
        assert_eq!(enc("jal zero, -4"), 0xffdf_f06f);
        assert!(TableEncoder::new(64).encode("beq a0, a1, 3").is_err());
        assert!(TableEncoder::new(64).encode("beq a0, a1, 4096").is_err());
    }

    #[test]
    fn test_indirect_jump_encodings() {
        assert_eq!(enc("jalr ra, 0(t0)"), 0x0002_80e7);
        assert_eq!(enc("auipc t0, 0"), 0x0000_0297);
        assert_eq!(enc("addi t0, t0, 20"), 0x0142_8293);
    }

    #[test]
    fn test_csr_encodings() {
        assert_eq!(enc("csrrw a0, mscratch, a1"), 0x3405_9573);
        assert_eq!(enc("csrrsi zero, fflags, 1"), 0x0010_e073);
        assert!(TableEncoder::new(64).encode("csrrw a0, bogus, a1").is_err());
    }

    #[test]
    fn test_float_encodings() {
        assert_eq!(enc("fadd.s ft0, ft1, ft2"), 0x0020_f053);
        assert_eq!(enc("fadd.d fa0, fa1, fa2"), 0x02c5_f553);
        assert_eq!(enc("fmv.x.w a0, fa0"), 0xe005_0553);
        assert_eq!(enc("fcvt.d.w fa0, a0"), 0xd205_0553);
        assert_eq!(enc("fcvt.w.s a0, fa0"), 0xc005_7553);
        assert_eq!(enc("fmadd.s fa0, fa1, fa2, fa3"), 0x68c5_f543);
    }

    #[test]
    fn test_compressed_encodings() {
        assert_eq!(enc("c.nop"), 0x0001);
        assert_eq!(enc("c.addi a0, 1"), 0x0505);
        assert_eq!(enc("c.li a0, -1"), 0x557d);
        assert_eq!(enc("c.mv a0, a1"), 0x852e);
        assert_eq!(enc("c.add a0, a1"), 0x952e);
        assert_eq!(enc("c.jr ra"), 0x8082);
        assert_eq!(enc("c.sub s0, s1"), 0x8c05);
        assert_eq!(enc("c.j 8"), 0xa021);
        assert_eq!(enc("c.beqz a0, 8"), 0xc501);
        assert_eq!(enc("c.bnez a0, -2"), 0xfd7d);
        assert!(TableEncoder::new(64).encode("c.addi a0, 0").is_err());
        assert!(TableEncoder::new(64).encode("c.sub t0, s1").is_err());
    }

    #[test]
    fn test_bitmanip_encodings() {
        assert_eq!(enc("sh1add a0, a1, a2"), 0x20c5_a533);
        assert_eq!(enc("andn a0, a1, a2"), 0x40c5_f533);
        assert_eq!(enc("clz a0, a1"), 0x6005_9513);
        assert_eq!(enc("bseti a0, a1, 3"), 0x2835_9513);
    }

    #[test]
    fn test_rv32_rejects_rv64_only() {
        let e = TableEncoder::new(32);
        assert!(e.encode("ld a0, 0(t6)").is_err());
        assert!(e.encode("addw a0, a1, a2").is_err());
        assert!(e.encode("c.jal 4").is_ok());
        assert!(TableEncoder::new(64).encode("c.jal 4").is_err());
    }

    #[test]
    fn test_pseudo_needing_expansion_is_rejected() {
        let e = TableEncoder::default();
        assert!(e.encode("li a0, 0x12345678").is_err());
        assert!(e.encode("la a0, foo").is_err());
    }

    #[test]
    fn test_parse_imm_forms() {
        assert_eq!(parse_imm("-0x10"), Some(-16));
        assert_eq!(parse_imm("0X1f"), Some(31));
        assert_eq!(parse_imm("42"), Some(42));
        assert_eq!(parse_imm("a0"), None);
    }
}
