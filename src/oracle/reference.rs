//! Built-in reference interpreter
//!
//! A single-hart M-mode RISC-V interpreter over sparse memory. It covers
//! RV32/RV64 I, M, A, Zicsr, Zba, Zbb, Zbs, the F/D arithmetic and move
//! instructions, and the C extension (decoded by expansion to the 32-bit
//! form). Anything else raises an illegal-instruction trap; traps record
//! `mepc`/`mcause` and resume at the next instruction, which matches what
//! the template's trap vector does for 4-byte instructions.
//!
//! Checkpoints are full machine clones.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, trace};

use super::{Oracle, OracleImage};
use crate::encoder::table::{b_type, i_type, j_type, r_type, s_type};
use crate::error::{Result, SynthError};
use crate::isa::csr::is_read_only;
use crate::template::image::ElfImage;

const PAGE_SIZE: usize = 4096;
const BOOT_STEP_LIMIT: u64 = 1_000_000;
/// Size of the data region placed after a flat code region.
pub const DATA_REGION_BYTES: u64 = 8192;

const CSR_FFLAGS: u16 = 0x001;
const CSR_FRM: u16 = 0x002;
const CSR_FCSR: u16 = 0x003;
const CSR_MSTATUS: u16 = 0x300;
const CSR_MISA: u16 = 0x301;
const CSR_MEPC: u16 = 0x341;
const CSR_MCAUSE: u16 = 0x342;
const CSR_MHARTID: u16 = 0xf14;

const NOP: u32 = 0x0000_0013;
const CANONICAL_NAN_32: u32 = 0x7fc0_0000;
const CANONICAL_NAN_64: u64 = 0x7ff8_0000_0000_0000;
const NAN_BOX: u64 = 0xffff_ffff_0000_0000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Trap {
    IllegalInstruction,
    Breakpoint,
    LoadMisaligned,
    StoreMisaligned,
    EnvCall,
}

impl Trap {
    pub fn cause(self) -> u64 {
        match self {
            Trap::IllegalInstruction => 2,
            Trap::Breakpoint => 3,
            Trap::LoadMisaligned => 4,
            Trap::StoreMisaligned => 6,
            Trap::EnvCall => 11,
        }
    }
}

type Exec<T> = std::result::Result<T, Trap>;

#[derive(Clone, Default)]
struct Memory {
    pages: HashMap<u64, Box<[u8; PAGE_SIZE]>>,
}

impl Memory {
    fn read_u8(&self, addr: u64) -> u8 {
        let page = addr / PAGE_SIZE as u64;
        self.pages
            .get(&page)
            .map(|p| p[(addr % PAGE_SIZE as u64) as usize])
            .unwrap_or(0)
    }

    fn write_u8(&mut self, addr: u64, value: u8) {
        let page = addr / PAGE_SIZE as u64;
        let p = self
            .pages
            .entry(page)
            .or_insert_with(|| Box::new([0u8; PAGE_SIZE]));
        p[(addr % PAGE_SIZE as u64) as usize] = value;
    }

    fn read(&self, addr: u64, width: u64) -> u64 {
        (0..width).fold(0u64, |acc, i| {
            acc | ((self.read_u8(addr.wrapping_add(i)) as u64) << (8 * i))
        })
    }

    fn write(&mut self, addr: u64, width: u64, value: u64) {
        for i in 0..width {
            self.write_u8(addr.wrapping_add(i), (value >> (8 * i)) as u8);
        }
    }

    fn load_bytes(&mut self, addr: u64, bytes: &[u8]) {
        for (i, b) in bytes.iter().enumerate() {
            self.write_u8(addr + i as u64, *b);
        }
    }
}

#[derive(Clone)]
struct Machine {
    xlen: u32,
    x: [u64; 32],
    f: [u64; 32],
    pc: u64,
    csrs: BTreeMap<u16, u64>,
    fcsr: u64,
    instret: u64,
    reservation: Option<u64>,
    mem: Memory,
}

fn sext(value: u64, bits: u32) -> i64 {
    let shift = 64 - bits;
    ((value << shift) as i64) >> shift
}

fn sext32(value: u32) -> u64 {
    value as i32 as i64 as u64
}

fn bit(c: u32, n: u32) -> u32 {
    (c >> n) & 1
}

fn bits(c: u32, hi: u32, lo: u32) -> u32 {
    (c >> lo) & ((1 << (hi - lo + 1)) - 1)
}

/// Expand a 16-bit instruction to its 32-bit equivalent.
pub fn expand_compressed(half: u16, xlen: u32) -> Option<u32> {
    let c = half as u32;
    if c == 0 {
        return None;
    }
    let rv64 = xlen == 64;
    let f3 = bits(c, 15, 13);
    let rdp = bits(c, 4, 2) + 8;
    let rs1p = bits(c, 9, 7) + 8;
    let rd = bits(c, 11, 7);
    let rs2 = bits(c, 6, 2);
    let ci = sext(((bit(c, 12) << 5) | bits(c, 6, 2)) as u64, 6);
    let shamt = ((bit(c, 12) << 5) | bits(c, 6, 2)) as i64;
    let lw_off = ((bits(c, 12, 10) << 3) | (bit(c, 6) << 2) | (bit(c, 5) << 6)) as i64;
    let ld_off = ((bits(c, 12, 10) << 3) | (bits(c, 6, 5) << 6)) as i64;
    let lwsp_off = ((bit(c, 12) << 5) | (bits(c, 6, 4) << 2) | (bits(c, 3, 2) << 6)) as i64;
    let ldsp_off = ((bit(c, 12) << 5) | (bits(c, 6, 5) << 3) | (bits(c, 4, 2) << 6)) as i64;
    let swsp_off = ((bits(c, 12, 9) << 2) | (bits(c, 8, 7) << 6)) as i64;
    let sdsp_off = ((bits(c, 12, 10) << 3) | (bits(c, 9, 7) << 6)) as i64;
    let cj = sext(
        ((bit(c, 12) << 11)
            | (bit(c, 11) << 4)
            | (bits(c, 10, 9) << 8)
            | (bit(c, 8) << 10)
            | (bit(c, 7) << 6)
            | (bit(c, 6) << 7)
            | (bits(c, 5, 3) << 1)
            | (bit(c, 2) << 5)) as u64,
        12,
    );
    let cb = sext(
        ((bit(c, 12) << 8)
            | (bits(c, 11, 10) << 3)
            | (bits(c, 6, 5) << 6)
            | (bits(c, 4, 3) << 1)
            | (bit(c, 2) << 5)) as u64,
        9,
    );

    let inst = match (c & 3, f3) {
        (0, 0) => {
            let nz = (bits(c, 12, 11) << 4) | (bits(c, 10, 7) << 6) | (bit(c, 6) << 2) | (bit(c, 5) << 3);
            if nz == 0 {
                return None;
            }
            i_type(nz as i64, 2, 0, rdp, 0x13)
        }
        (0, 1) => i_type(ld_off, rs1p, 3, rdp, 0x07),
        (0, 2) => i_type(lw_off, rs1p, 2, rdp, 0x03),
        (0, 3) if rv64 => i_type(ld_off, rs1p, 3, rdp, 0x03),
        (0, 3) => i_type(lw_off, rs1p, 2, rdp, 0x07),
        (0, 5) => s_type(ld_off, rdp, rs1p, 3, 0x27),
        (0, 6) => s_type(lw_off, rdp, rs1p, 2, 0x23),
        (0, 7) if rv64 => s_type(ld_off, rdp, rs1p, 3, 0x23),
        (0, 7) => s_type(lw_off, rdp, rs1p, 2, 0x27),
        (1, 0) => i_type(ci, rd, 0, rd, 0x13),
        (1, 1) if rv64 => {
            if rd == 0 {
                return None;
            }
            i_type(ci, rd, 0, rd, 0x1b)
        }
        (1, 1) => j_type(cj, 1),
        (1, 2) => i_type(ci, 0, 0, rd, 0x13),
        (1, 3) if rd == 2 => {
            let imm = sext(
                ((bit(c, 12) << 9)
                    | (bit(c, 6) << 4)
                    | (bit(c, 5) << 6)
                    | (bits(c, 4, 3) << 7)
                    | (bit(c, 2) << 5)) as u64,
                10,
            );
            if imm == 0 {
                return None;
            }
            i_type(imm, 2, 0, 2, 0x13)
        }
        (1, 3) => {
            let imm = sext(((bit(c, 12) << 17) | (bits(c, 6, 2) << 12)) as u64, 18);
            if imm == 0 || rd == 0 {
                return None;
            }
            ((imm as u32) & 0xffff_f000) | (rd << 7) | 0x37
        }
        (1, 4) => match bits(c, 11, 10) {
            0 if rv64 || bit(c, 12) == 0 => i_type(shamt, rs1p, 5, rs1p, 0x13),
            1 if rv64 || bit(c, 12) == 0 => i_type(0x400 | shamt, rs1p, 5, rs1p, 0x13),
            2 => i_type(ci, rs1p, 7, rs1p, 0x13),
            3 => match (bit(c, 12), bits(c, 6, 5)) {
                (0, 0) => r_type(0x20, rdp, rs1p, 0, rs1p, 0x33),
                (0, 1) => r_type(0, rdp, rs1p, 4, rs1p, 0x33),
                (0, 2) => r_type(0, rdp, rs1p, 6, rs1p, 0x33),
                (0, 3) => r_type(0, rdp, rs1p, 7, rs1p, 0x33),
                (1, 0) if rv64 => r_type(0x20, rdp, rs1p, 0, rs1p, 0x3b),
                (1, 1) if rv64 => r_type(0, rdp, rs1p, 0, rs1p, 0x3b),
                _ => return None,
            },
            _ => return None,
        },
        (1, 5) => j_type(cj, 0),
        (1, 6) => b_type(cb, 0, rs1p, 0),
        (1, 7) => b_type(cb, 0, rs1p, 1),
        (2, 0) if rv64 || bit(c, 12) == 0 => i_type(shamt, rd, 1, rd, 0x13),
        (2, 1) => i_type(ldsp_off, 2, 3, rd, 0x07),
        (2, 2) if rd != 0 => i_type(lwsp_off, 2, 2, rd, 0x03),
        (2, 3) if rv64 && rd != 0 => i_type(ldsp_off, 2, 3, rd, 0x03),
        (2, 3) if !rv64 => i_type(lwsp_off, 2, 2, rd, 0x07),
        (2, 4) => match (bit(c, 12), rd, rs2) {
            (0, 0, 0) => return None,
            (0, _, 0) => i_type(0, rd, 0, 0, 0x67),
            (0, _, _) => r_type(0, rs2, 0, 0, rd, 0x33),
            (1, 0, 0) => 0x0010_0073,
            (1, _, 0) => i_type(0, rd, 0, 1, 0x67),
            (1, _, _) => r_type(0, rs2, rd, 0, rd, 0x33),
            _ => return None,
        },
        (2, 5) => s_type(sdsp_off, rs2, 2, 3, 0x27),
        (2, 6) => s_type(swsp_off, rs2, 2, 2, 0x23),
        (2, 7) if rv64 => s_type(sdsp_off, rs2, 2, 3, 0x23),
        (2, 7) => s_type(swsp_off, rs2, 2, 2, 0x27),
        _ => return None,
    };
    Some(inst)
}

fn round_mode(x: f64, rm: u32) -> f64 {
    match rm {
        1 => x.trunc(),
        2 => x.floor(),
        3 => x.ceil(),
        4 => x.round(),
        _ => x.round_ties_even(),
    }
}

fn fclass64(v: f64) -> u64 {
    let neg = v.is_sign_negative();
    let idx = if v.is_nan() {
        if v.to_bits() & (1 << 51) == 0 {
            8
        } else {
            9
        }
    } else if v.is_infinite() {
        if neg {
            0
        } else {
            7
        }
    } else if v == 0.0 {
        if neg {
            3
        } else {
            4
        }
    } else if v.is_subnormal() {
        if neg {
            2
        } else {
            5
        }
    } else if neg {
        1
    } else {
        6
    };
    1 << idx
}

fn fclass32(v: f32) -> u64 {
    if v.is_nan() {
        return if v.to_bits() & (1 << 22) == 0 { 1 << 8 } else { 1 << 9 };
    }
    if v.is_subnormal() {
        return if v.is_sign_negative() { 1 << 2 } else { 1 << 5 };
    }
    fclass64(v as f64)
}

fn canon32(v: f32) -> f32 {
    if v.is_nan() {
        f32::from_bits(CANONICAL_NAN_32)
    } else {
        v
    }
}

fn canon64(v: f64) -> f64 {
    if v.is_nan() {
        f64::from_bits(CANONICAL_NAN_64)
    } else {
        v
    }
}

fn fmin_max<T: PartialOrd + Copy>(a: T, b: T, a_nan: bool, b_nan: bool, a_neg: bool, max: bool) -> Option<T> {
    match (a_nan, b_nan) {
        (true, true) => None,
        (true, false) => Some(b),
        (false, true) => Some(a),
        _ => {
            let pick_a = if max {
                a > b || (a == b && !a_neg)
            } else {
                a < b || (a == b && a_neg)
            };
            Some(if pick_a { a } else { b })
        }
    }
}

impl Machine {
    fn new(xlen: u32) -> Self {
        let mut csrs = BTreeMap::new();
        let mxl: u64 = if xlen == 64 { 2 } else { 1 };
        let ext = |c: char| 1u64 << (c as u8 - b'a');
        let misa = (mxl << (xlen - 2))
            | ext('i')
            | ext('m')
            | ext('a')
            | ext('f')
            | ext('d')
            | ext('c');
        csrs.insert(CSR_MISA, misa);
        csrs.insert(CSR_MHARTID, 0);
        csrs.insert(CSR_MSTATUS, 0x6000);
        Self {
            xlen,
            x: [0; 32],
            f: [0; 32],
            pc: 0,
            csrs,
            fcsr: 0,
            instret: 0,
            reservation: None,
            mem: Memory::default(),
        }
    }

    fn rv64(&self) -> bool {
        self.xlen == 64
    }

    fn trunc(&self, v: u64) -> u64 {
        if self.rv64() {
            v
        } else {
            v as u32 as u64
        }
    }

    fn signed(&self, v: u64) -> i64 {
        if self.rv64() {
            v as i64
        } else {
            v as u32 as i32 as i64
        }
    }

    fn xr(&self, r: u32) -> u64 {
        self.x[r as usize]
    }

    fn xw(&mut self, r: u32, v: u64) {
        if r != 0 {
            self.x[r as usize] = self.trunc(v);
        }
    }

    fn f32r(&self, r: u32) -> f32 {
        let v = self.f[r as usize];
        if v & NAN_BOX == NAN_BOX {
            f32::from_bits(v as u32)
        } else {
            f32::from_bits(CANONICAL_NAN_32)
        }
    }

    fn f32w(&mut self, r: u32, v: f32) {
        self.f[r as usize] = NAN_BOX | v.to_bits() as u64;
    }

    fn f64r(&self, r: u32) -> f64 {
        f64::from_bits(self.f[r as usize])
    }

    fn f64w(&mut self, r: u32, v: f64) {
        self.f[r as usize] = v.to_bits();
    }

    fn read_csr(&self, addr: u16) -> u64 {
        match addr {
            CSR_FFLAGS => self.fcsr & 0x1f,
            CSR_FRM => (self.fcsr >> 5) & 7,
            CSR_FCSR => self.fcsr & 0xff,
            0xc00 | 0xc01 | 0xc02 | 0xb00 | 0xb02 => self.trunc(self.instret),
            _ => self.csrs.get(&addr).copied().unwrap_or(0),
        }
    }

    fn write_csr(&mut self, addr: u16, v: u64) {
        match addr {
            CSR_FFLAGS => self.fcsr = (self.fcsr & !0x1f) | (v & 0x1f),
            CSR_FRM => self.fcsr = (self.fcsr & !0xe0) | ((v & 7) << 5),
            CSR_FCSR => self.fcsr = v & 0xff,
            CSR_MISA | CSR_MHARTID => {}
            _ => {
                let v = self.trunc(v);
                self.csrs.insert(addr, v);
            }
        }
    }

    /// Execute one instruction; returns the trap if one was taken.
    fn step(&mut self) -> Option<Trap> {
        let pc = self.pc;
        let low = self.mem.read(pc, 2) as u32;
        let decoded = if low & 3 != 3 {
            expand_compressed(low as u16, self.xlen).map(|i| (i, 2))
        } else {
            Some((self.mem.read(pc, 4) as u32, 4))
        };
        let size = decoded.map(|(_, s)| s).unwrap_or(2);
        let result = match decoded {
            Some((inst, size)) => self.execute(inst, size),
            None => Err(Trap::IllegalInstruction),
        };
        self.instret += 1;
        match result {
            Ok(next) => {
                self.pc = self.trunc(next);
                None
            }
            Err(trap) => {
                trace!(pc = format_args!("0x{:x}", pc), ?trap, "trap");
                self.csrs.insert(CSR_MEPC, pc);
                self.csrs.insert(CSR_MCAUSE, trap.cause());
                self.pc = self.trunc(pc.wrapping_add(size));
                Some(trap)
            }
        }
    }

    fn execute(&mut self, inst: u32, size: u64) -> Exec<u64> {
        let opcode = inst & 0x7f;
        let rd = (inst >> 7) & 31;
        let f3 = (inst >> 12) & 7;
        let rs1 = (inst >> 15) & 31;
        let rs2 = (inst >> 20) & 31;
        let f7 = inst >> 25;
        let pc = self.pc;
        let next = pc.wrapping_add(size);
        let imm_i = sext((inst >> 20) as u64, 12);
        let imm_s = sext((((inst >> 25) << 5) | ((inst >> 7) & 0x1f)) as u64, 12);
        let a = self.xr(rs1);
        let b = self.xr(rs2);

        match opcode {
            0x37 => self.xw(rd, (inst & 0xffff_f000) as i32 as i64 as u64),
            0x17 => self.xw(rd, pc.wrapping_add((inst & 0xffff_f000) as i32 as i64 as u64)),
            0x6f => {
                let imm = sext(
                    ((((inst >> 31) & 1) << 20)
                        | (((inst >> 12) & 0xff) << 12)
                        | (((inst >> 20) & 1) << 11)
                        | (((inst >> 21) & 0x3ff) << 1)) as u64,
                    21,
                );
                self.xw(rd, next);
                return Ok(pc.wrapping_add(imm as u64));
            }
            0x67 => {
                if f3 != 0 {
                    return Err(Trap::IllegalInstruction);
                }
                let target = a.wrapping_add(imm_i as u64) & !1;
                self.xw(rd, next);
                return Ok(target);
            }
            0x63 => {
                let taken = match f3 {
                    0 => a == b,
                    1 => a != b,
                    4 => self.signed(a) < self.signed(b),
                    5 => self.signed(a) >= self.signed(b),
                    6 => a < b,
                    7 => a >= b,
                    _ => return Err(Trap::IllegalInstruction),
                };
                if taken {
                    let imm = sext(
                        ((((inst >> 31) & 1) << 12)
                            | (((inst >> 7) & 1) << 11)
                            | (((inst >> 25) & 0x3f) << 5)
                            | (((inst >> 8) & 0xf) << 1)) as u64,
                        13,
                    );
                    return Ok(pc.wrapping_add(imm as u64));
                }
            }
            0x03 => {
                let (width, signed) = match f3 {
                    0 => (1, true),
                    1 => (2, true),
                    2 => (4, true),
                    3 if self.rv64() => (8, true),
                    4 => (1, false),
                    5 => (2, false),
                    6 if self.rv64() => (4, false),
                    _ => return Err(Trap::IllegalInstruction),
                };
                let addr = self.trunc(a.wrapping_add(imm_i as u64));
                if addr % width != 0 {
                    return Err(Trap::LoadMisaligned);
                }
                let v = self.mem.read(addr, width);
                let v = if signed && width < 8 {
                    sext(v, (width * 8) as u32) as u64
                } else {
                    v
                };
                self.xw(rd, v);
            }
            0x23 => {
                let width = match f3 {
                    0 => 1,
                    1 => 2,
                    2 => 4,
                    3 if self.rv64() => 8,
                    _ => return Err(Trap::IllegalInstruction),
                };
                let addr = self.trunc(a.wrapping_add(imm_s as u64));
                if addr % width != 0 {
                    return Err(Trap::StoreMisaligned);
                }
                self.mem.write(addr, width, b);
            }
            0x13 => {
                let v = self.op_imm(inst, f3, a, imm_i)?;
                self.xw(rd, v);
            }
            0x1b if self.rv64() => {
                let v = self.op_imm_32(inst, f3, a, imm_i)?;
                self.xw(rd, v);
            }
            0x33 => {
                let v = self.op(f7, f3, rs2, a, b)?;
                self.xw(rd, v);
            }
            0x3b if self.rv64() => {
                let v = self.op_32(f7, f3, rs2, a, b)?;
                self.xw(rd, v);
            }
            0x0f if f3 <= 1 => {}
            0x73 => return self.system(inst, f3, rd, rs1, a, next),
            0x2f => self.amo(inst, f3, rd, a, b)?,
            0x07 => {
                let addr = self.trunc(a.wrapping_add(imm_i as u64));
                match f3 {
                    2 => {
                        if addr % 4 != 0 {
                            return Err(Trap::LoadMisaligned);
                        }
                        self.f[rd as usize] = NAN_BOX | self.mem.read(addr, 4);
                    }
                    3 => {
                        if addr % 8 != 0 {
                            return Err(Trap::LoadMisaligned);
                        }
                        self.f[rd as usize] = self.mem.read(addr, 8);
                    }
                    _ => return Err(Trap::IllegalInstruction),
                }
            }
            0x27 => {
                let addr = self.trunc(a.wrapping_add(imm_s as u64));
                let width = match f3 {
                    2 => 4,
                    3 => 8,
                    _ => return Err(Trap::IllegalInstruction),
                };
                if addr % width != 0 {
                    return Err(Trap::StoreMisaligned);
                }
                self.mem.write(addr, width, self.f[rs2 as usize]);
            }
            0x53 => self.op_fp(f7, f3, rd, rs1, rs2, a)?,
            0x43 | 0x47 | 0x4b | 0x4f => self.fma(inst, opcode, rd, rs1, rs2)?,
            _ => return Err(Trap::IllegalInstruction),
        }
        Ok(next)
    }

    fn op_imm(&self, inst: u32, f3: u32, a: u64, imm: i64) -> Exec<u64> {
        let shmask = self.xlen - 1;
        let shamt = (inst >> 20) & shmask;
        if !self.rv64() && (f3 == 1 || f3 == 5) && (inst >> 25) & 1 != 0 {
            return Err(Trap::IllegalInstruction);
        }
        let f6 = inst >> 26;
        let imm12 = inst >> 20;
        let ua = self.trunc(a);
        Ok(match f3 {
            0 => a.wrapping_add(imm as u64),
            2 => (self.signed(a) < imm) as u64,
            3 => (ua < self.trunc(imm as u64)) as u64,
            4 => a ^ imm as u64,
            6 => a | imm as u64,
            7 => a & imm as u64,
            1 => match imm12 {
                0x600 => self.clz(ua),
                0x601 => self.ctz(ua),
                0x602 => ua.count_ones() as u64,
                0x604 => a as u8 as i8 as i64 as u64,
                0x605 => a as u16 as i16 as i64 as u64,
                _ => match f6 {
                    0x00 => a << shamt,
                    0x0a => a | (1u64 << shamt),
                    0x12 => a & !(1u64 << shamt),
                    0x1a => a ^ (1u64 << shamt),
                    _ => return Err(Trap::IllegalInstruction),
                },
            },
            5 => match imm12 {
                0x287 => orc_b(a),
                0x6b8 if self.rv64() => a.swap_bytes(),
                0x698 if !self.rv64() => (a as u32).swap_bytes() as u64,
                _ => match f6 {
                    0x00 => ua >> shamt,
                    0x10 => (self.signed(a) >> shamt) as u64,
                    0x18 => self.rotr(ua, shamt),
                    0x12 => (ua >> shamt) & 1,
                    _ => return Err(Trap::IllegalInstruction),
                },
            },
            _ => return Err(Trap::IllegalInstruction),
        })
    }

    fn op_imm_32(&self, inst: u32, f3: u32, a: u64, imm: i64) -> Exec<u64> {
        let aw = a as u32;
        let shamt = (inst >> 20) & 31;
        let imm12 = inst >> 20;
        let f7 = inst >> 25;
        Ok(match f3 {
            0 => sext32(aw.wrapping_add(imm as u32)),
            1 => match imm12 {
                0x600 => aw.leading_zeros() as u64,
                0x601 => aw.trailing_zeros() as u64,
                0x602 => aw.count_ones() as u64,
                _ if f7 == 0 => sext32(aw << shamt),
                _ if inst >> 26 == 0x02 => (a & 0xffff_ffff) << ((inst >> 20) & 63),
                _ => return Err(Trap::IllegalInstruction),
            },
            5 => match f7 {
                0x00 => sext32(aw >> shamt),
                0x20 => ((aw as i32) >> shamt) as i64 as u64,
                0x30 => sext32(aw.rotate_right(shamt)),
                _ => return Err(Trap::IllegalInstruction),
            },
            _ => return Err(Trap::IllegalInstruction),
        })
    }

    fn op(&self, f7: u32, f3: u32, rs2: u32, a: u64, b: u64) -> Exec<u64> {
        let sh = (b & (self.xlen as u64 - 1)) as u32;
        let (sa, sb) = (self.signed(a), self.signed(b));
        let (ua, ub) = (self.trunc(a), self.trunc(b));
        let xlen = self.xlen;
        Ok(match (f7, f3) {
            (0x00, 0) => a.wrapping_add(b),
            (0x20, 0) => a.wrapping_sub(b),
            (0x00, 1) => a << sh,
            (0x00, 2) => (sa < sb) as u64,
            (0x00, 3) => (ua < ub) as u64,
            (0x00, 4) => a ^ b,
            (0x00, 5) => ua >> sh,
            (0x20, 5) => (sa >> sh) as u64,
            (0x00, 6) => a | b,
            (0x00, 7) => a & b,
            (0x01, 0) => a.wrapping_mul(b),
            (0x01, 1) => ((sa as i128 * sb as i128) >> xlen) as u64,
            (0x01, 2) => ((sa as i128 * ua as i128) >> xlen) as u64,
            (0x01, 3) => ((ua as u128 * ub as u128) >> xlen) as u64,
            (0x01, 4) => {
                if sb == 0 {
                    u64::MAX
                } else {
                    sa.wrapping_div(sb) as u64
                }
            }
            (0x01, 5) => {
                if ub == 0 {
                    u64::MAX
                } else {
                    ua / ub
                }
            }
            (0x01, 6) => {
                if sb == 0 {
                    a
                } else {
                    sa.wrapping_rem(sb) as u64
                }
            }
            (0x01, 7) => {
                if ub == 0 {
                    a
                } else {
                    ua % ub
                }
            }
            (0x10, 2) | (0x10, 4) | (0x10, 6) => (a << (f3 / 2)).wrapping_add(b),
            (0x20, 7) => a & !b,
            (0x20, 6) => a | !b,
            (0x20, 4) => !(a ^ b),
            (0x05, 4) => sa.min(sb) as u64,
            (0x05, 5) => ua.min(ub),
            (0x05, 6) => sa.max(sb) as u64,
            (0x05, 7) => ua.max(ub),
            (0x30, 1) => self.rotr(ua, (xlen - sh) % xlen),
            (0x30, 5) => self.rotr(ua, sh),
            (0x24, 1) => a & !(1u64 << sh),
            (0x24, 5) => (ua >> sh) & 1,
            (0x14, 1) => a | (1u64 << sh),
            (0x34, 1) => a ^ (1u64 << sh),
            (0x04, 4) if !self.rv64() && rs2 == 0 => a & 0xffff,
            _ => return Err(Trap::IllegalInstruction),
        })
    }

    fn op_32(&self, f7: u32, f3: u32, rs2: u32, a: u64, b: u64) -> Exec<u64> {
        let (aw, bw) = (a as u32, b as u32);
        let sh = bw & 31;
        Ok(match (f7, f3) {
            (0x00, 0) => sext32(aw.wrapping_add(bw)),
            (0x20, 0) => sext32(aw.wrapping_sub(bw)),
            (0x00, 1) => sext32(aw << sh),
            (0x00, 5) => sext32(aw >> sh),
            (0x20, 5) => ((aw as i32) >> sh) as i64 as u64,
            (0x01, 0) => sext32(aw.wrapping_mul(bw)),
            (0x01, 4) => {
                if bw == 0 {
                    u64::MAX
                } else {
                    (aw as i32).wrapping_div(bw as i32) as i64 as u64
                }
            }
            (0x01, 5) => {
                if bw == 0 {
                    u64::MAX
                } else {
                    sext32(aw / bw)
                }
            }
            (0x01, 6) => {
                if bw == 0 {
                    sext32(aw)
                } else {
                    (aw as i32).wrapping_rem(bw as i32) as i64 as u64
                }
            }
            (0x01, 7) => {
                if bw == 0 {
                    sext32(aw)
                } else {
                    sext32(aw % bw)
                }
            }
            (0x04, 0) => (a & 0xffff_ffff).wrapping_add(b),
            (0x10, 2) | (0x10, 4) | (0x10, 6) => ((a & 0xffff_ffff) << (f3 / 2)).wrapping_add(b),
            (0x04, 4) if rs2 == 0 => a & 0xffff,
            (0x30, 1) => sext32(aw.rotate_left(sh)),
            (0x30, 5) => sext32(aw.rotate_right(sh)),
            _ => return Err(Trap::IllegalInstruction),
        })
    }

    fn clz(&self, v: u64) -> u64 {
        if self.rv64() {
            v.leading_zeros() as u64
        } else {
            (v as u32).leading_zeros() as u64
        }
    }

    fn ctz(&self, v: u64) -> u64 {
        if self.rv64() {
            v.trailing_zeros() as u64
        } else {
            (v as u32).trailing_zeros() as u64
        }
    }

    fn rotr(&self, v: u64, sh: u32) -> u64 {
        if self.rv64() {
            v.rotate_right(sh)
        } else {
            (v as u32).rotate_right(sh) as u64
        }
    }

    fn system(&mut self, inst: u32, f3: u32, rd: u32, rs1: u32, a: u64, next: u64) -> Exec<u64> {
        if f3 == 0 {
            return match inst {
                0x0000_0073 => Err(Trap::EnvCall),
                0x0010_0073 => Err(Trap::Breakpoint),
                0x3020_0073 => Ok(self.read_csr(CSR_MEPC)),
                0x1050_0073 => Ok(next),
                _ => Err(Trap::IllegalInstruction),
            };
        }
        if f3 == 4 {
            return Err(Trap::IllegalInstruction);
        }
        let csr = (inst >> 20) as u16;
        let src = if f3 & 4 != 0 { rs1 as u64 } else { a };
        let writes = f3 & 3 == 1 || rs1 != 0;
        if writes && is_read_only(csr) {
            return Err(Trap::IllegalInstruction);
        }
        let old = self.read_csr(csr);
        let new = match f3 & 3 {
            1 => src,
            2 => old | src,
            _ => old & !src,
        };
        if writes {
            self.write_csr(csr, new);
        }
        self.xw(rd, old);
        Ok(next)
    }

    fn amo(&mut self, inst: u32, f3: u32, rd: u32, a: u64, b: u64) -> Exec<()> {
        let width = match f3 {
            2 => 4,
            3 if self.rv64() => 8,
            _ => return Err(Trap::IllegalInstruction),
        };
        let addr = self.trunc(a);
        if addr % width != 0 {
            return Err(Trap::StoreMisaligned);
        }
        let load = |m: &Self| {
            let v = m.mem.read(addr, width);
            if width == 4 {
                sext32(v as u32)
            } else {
                v
            }
        };
        let funct5 = inst >> 27;
        match funct5 {
            0x02 => {
                let v = load(self);
                self.reservation = Some(addr);
                self.xw(rd, v);
            }
            0x03 => {
                if self.reservation == Some(addr) {
                    self.mem.write(addr, width, b);
                    self.xw(rd, 0);
                } else {
                    self.xw(rd, 1);
                }
                self.reservation = None;
            }
            _ => {
                let old = load(self);
                let mask = if width == 4 { 0xffff_ffff } else { u64::MAX };
                let (so, sb) = if width == 4 {
                    (old as u32 as i32 as i64, b as u32 as i32 as i64)
                } else {
                    (old as i64, b as i64)
                };
                let new = match funct5 {
                    0x01 => b,
                    0x00 => old.wrapping_add(b),
                    0x04 => old ^ b,
                    0x0c => old & b,
                    0x08 => old | b,
                    0x10 => so.min(sb) as u64,
                    0x14 => so.max(sb) as u64,
                    0x18 => (old & mask).min(b & mask),
                    0x1c => (old & mask).max(b & mask),
                    _ => return Err(Trap::IllegalInstruction),
                };
                self.mem.write(addr, width, new);
                self.xw(rd, old);
            }
        }
        Ok(())
    }

    fn rounding(&self, f3: u32) -> u32 {
        if f3 == 7 {
            ((self.fcsr >> 5) & 7) as u32
        } else {
            f3
        }
    }

    fn op_fp(&mut self, f7: u32, f3: u32, rd: u32, rs1: u32, rs2: u32, a: u64) -> Exec<()> {
        let fmt = f7 & 3;
        let op = f7 >> 2;
        if fmt > 1 {
            return Err(Trap::IllegalInstruction);
        }
        let double = fmt == 1;
        match op {
            0x00..=0x03 | 0x0b => {
                if double {
                    let (x, y) = (self.f64r(rs1), self.f64r(rs2));
                    let r = match op {
                        0x00 => x + y,
                        0x01 => x - y,
                        0x02 => x * y,
                        0x03 => x / y,
                        _ => x.sqrt(),
                    };
                    self.f64w(rd, canon64(r));
                } else {
                    let (x, y) = (self.f32r(rs1), self.f32r(rs2));
                    let r = match op {
                        0x00 => x + y,
                        0x01 => x - y,
                        0x02 => x * y,
                        0x03 => x / y,
                        _ => x.sqrt(),
                    };
                    self.f32w(rd, canon32(r));
                }
            }
            0x04 => {
                if f3 > 2 {
                    return Err(Trap::IllegalInstruction);
                }
                let (sign, x, y) = if double {
                    (1u64 << 63, self.f[rs1 as usize], self.f[rs2 as usize])
                } else {
                    (
                        1u64 << 31,
                        self.f32r(rs1).to_bits() as u64,
                        self.f32r(rs2).to_bits() as u64,
                    )
                };
                let r = match f3 {
                    0 => (x & !sign) | (y & sign),
                    1 => (x & !sign) | (!y & sign),
                    _ => x ^ (y & sign),
                };
                if double {
                    self.f[rd as usize] = r;
                } else {
                    self.f[rd as usize] = NAN_BOX | r;
                }
            }
            0x05 => {
                if f3 > 1 {
                    return Err(Trap::IllegalInstruction);
                }
                let max = f3 == 1;
                if double {
                    let (x, y) = (self.f64r(rs1), self.f64r(rs2));
                    let r = fmin_max(x, y, x.is_nan(), y.is_nan(), x.is_sign_negative(), max);
                    self.f64w(rd, r.unwrap_or(f64::from_bits(CANONICAL_NAN_64)));
                } else {
                    let (x, y) = (self.f32r(rs1), self.f32r(rs2));
                    let r = fmin_max(x, y, x.is_nan(), y.is_nan(), x.is_sign_negative(), max);
                    self.f32w(rd, r.unwrap_or(f32::from_bits(CANONICAL_NAN_32)));
                }
            }
            0x08 => match (fmt, rs2) {
                (0, 1) => {
                    let v = self.f64r(rs1) as f32;
                    self.f32w(rd, canon32(v));
                }
                (1, 0) => {
                    let v = self.f32r(rs1) as f64;
                    self.f64w(rd, canon64(v));
                }
                _ => return Err(Trap::IllegalInstruction),
            },
            0x14 => {
                let (x, y) = if double {
                    (self.f64r(rs1), self.f64r(rs2))
                } else {
                    (self.f32r(rs1) as f64, self.f32r(rs2) as f64)
                };
                let r = match f3 {
                    2 => x == y,
                    1 => x < y,
                    0 => x <= y,
                    _ => return Err(Trap::IllegalInstruction),
                };
                self.xw(rd, r as u64);
            }
            0x18 => {
                let x = if double {
                    self.f64r(rs1)
                } else {
                    self.f32r(rs1) as f64
                };
                let r = round_mode(x, self.rounding(f3));
                let v = match rs2 {
                    0 => {
                        let w = if x.is_nan() {
                            i32::MAX
                        } else {
                            (r as i64).clamp(i32::MIN as i64, i32::MAX as i64) as i32
                        };
                        w as i64 as u64
                    }
                    1 => {
                        let w = if x.is_nan() { u32::MAX } else { (r as i64).clamp(0, u32::MAX as i64) as u32 };
                        sext32(w)
                    }
                    2 if self.rv64() => {
                        if x.is_nan() {
                            i64::MAX as u64
                        } else {
                            r as i64 as u64
                        }
                    }
                    3 if self.rv64() => {
                        if x.is_nan() {
                            u64::MAX
                        } else {
                            r as u64
                        }
                    }
                    _ => return Err(Trap::IllegalInstruction),
                };
                self.xw(rd, v);
            }
            0x1a => {
                let v: f64 = match rs2 {
                    0 => a as u32 as i32 as f64,
                    1 => a as u32 as f64,
                    2 if self.rv64() => a as i64 as f64,
                    3 if self.rv64() => a as f64,
                    _ => return Err(Trap::IllegalInstruction),
                };
                if double {
                    self.f64w(rd, v);
                } else {
                    let single = match rs2 {
                        0 => a as u32 as i32 as f32,
                        1 => a as u32 as f32,
                        2 => a as i64 as f32,
                        _ => a as f32,
                    };
                    self.f32w(rd, single);
                }
            }
            0x1c if rs2 == 0 => match f3 {
                0 if double && self.rv64() => self.xw(rd, self.f[rs1 as usize]),
                0 if !double => self.xw(rd, sext32(self.f[rs1 as usize] as u32)),
                1 => {
                    let c = if double {
                        fclass64(self.f64r(rs1))
                    } else {
                        fclass32(self.f32r(rs1))
                    };
                    self.xw(rd, c);
                }
                _ => return Err(Trap::IllegalInstruction),
            },
            0x1e if rs2 == 0 && f3 == 0 => {
                if double {
                    if !self.rv64() {
                        return Err(Trap::IllegalInstruction);
                    }
                    self.f[rd as usize] = a;
                } else {
                    self.f[rd as usize] = NAN_BOX | (a & 0xffff_ffff);
                }
            }
            _ => return Err(Trap::IllegalInstruction),
        }
        Ok(())
    }

    fn fma(&mut self, inst: u32, opcode: u32, rd: u32, rs1: u32, rs2: u32) -> Exec<()> {
        let fmt = (inst >> 25) & 3;
        let rs3 = inst >> 27;
        let (neg_prod, neg_add) = match opcode {
            0x43 => (false, false),
            0x47 => (false, true),
            0x4b => (true, false),
            _ => (true, true),
        };
        match fmt {
            0 => {
                let (x, y, z) = (self.f32r(rs1), self.f32r(rs2), self.f32r(rs3));
                let x = if neg_prod { -x } else { x };
                let z = if neg_add { -z } else { z };
                self.f32w(rd, canon32(x.mul_add(y, z)));
            }
            1 => {
                let (x, y, z) = (self.f64r(rs1), self.f64r(rs2), self.f64r(rs3));
                let x = if neg_prod { -x } else { x };
                let z = if neg_add { -z } else { z };
                self.f64w(rd, canon64(x.mul_add(y, z)));
            }
            _ => return Err(Trap::IllegalInstruction),
        }
        Ok(())
    }
}

fn orc_b(v: u64) -> u64 {
    let mut out = 0u64;
    for i in 0..8 {
        if (v >> (8 * i)) & 0xff != 0 {
            out |= 0xff << (8 * i);
        }
    }
    out
}

fn xlen_of(isa: &str) -> u32 {
    if isa.to_ascii_lowercase().starts_with("rv32") {
        32
    } else {
        64
    }
}

/// The built-in interpreter oracle.
pub struct ReferenceOracle {
    machine: Machine,
    checkpoint: Option<Box<Machine>>,
    trapped: bool,
    initialized: bool,
}

impl Default for ReferenceOracle {
    fn default() -> Self {
        Self::new()
    }
}

impl ReferenceOracle {
    pub fn new() -> Self {
        Self {
            machine: Machine::new(64),
            checkpoint: None,
            trapped: false,
            initialized: false,
        }
    }

    fn boot_flat(&mut self, base: u64, code_bytes: u64, seed: u64) {
        let m = &mut self.machine;
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut addr = base;
        while addr < base + code_bytes {
            m.mem.write(addr, 4, NOP as u64);
            addr += 4;
        }
        let data_base = (base + code_bytes + PAGE_SIZE as u64 - 1) & !(PAGE_SIZE as u64 - 1);
        let mut data = vec![0u8; DATA_REGION_BYTES as usize];
        rng.fill(&mut data[..]);
        m.mem.load_bytes(data_base, &data);

        for r in 1..32 {
            let v: u64 = rng.random();
            m.xw(r, v);
        }
        for r in 0..32 {
            let v: f64 = rng.random_range(-1.0e6..1.0e6);
            m.f64w(r, v);
        }
        m.xw(2, data_base + 1024);
        m.xw(30, 0);
        m.xw(31, data_base + DATA_REGION_BYTES / 2);
        m.pc = base;
        debug!(
            base = format_args!("0x{:x}", base),
            data = format_args!("0x{:x}", data_base),
            "booted flat image"
        );
    }

    fn boot_elf(&mut self, image: &ElfImage) -> Result<()> {
        let main = image.body_start().ok_or_else(|| {
            SynthError::SimulatorInitFailure("image has no `main` symbol".to_string())
        })?;
        let m = &mut self.machine;
        for seg in &image.segments {
            m.mem.load_bytes(seg.vaddr, &seg.data);
            for off in seg.data.len() as u64..seg.mem_size {
                m.mem.write_u8(seg.vaddr + off, 0);
            }
        }
        m.pc = image.entry;
        let mut steps = 0;
        while m.pc != main {
            if steps >= BOOT_STEP_LIMIT {
                return Err(SynthError::SimulatorInitFailure(format!(
                    "template initialization did not reach main (pc=0x{:x})",
                    m.pc
                )));
            }
            m.step();
            steps += 1;
        }
        debug!(steps, main = format_args!("0x{:x}", main), "template initialization done");
        Ok(())
    }
}

impl Oracle for ReferenceOracle {
    fn initialize(&mut self, image: &OracleImage, isa: &str, _capacity: usize) -> Result<()> {
        self.machine = Machine::new(xlen_of(isa));
        self.checkpoint = None;
        self.trapped = false;
        match image {
            OracleImage::Flat {
                base,
                code_bytes,
                seed,
            } => self.boot_flat(*base, *code_bytes, *seed),
            OracleImage::Elf(path) => {
                let elf = ElfImage::load(path)?;
                self.boot_elf(&elf)?;
            }
        }
        self.initialized = true;
        Ok(())
    }

    fn set_checkpoint(&mut self) -> Result<()> {
        self.checkpoint = Some(Box::new(self.machine.clone()));
        Ok(())
    }

    fn restore_checkpoint(&mut self) -> Result<()> {
        let saved = self
            .checkpoint
            .take()
            .ok_or_else(|| SynthError::Checkpoint("no checkpoint to restore".to_string()))?;
        self.machine = *saved;
        Ok(())
    }

    fn discard_checkpoint(&mut self) {
        self.checkpoint = None;
    }

    fn execute_sequence(&mut self, codes: &[u32], sizes: &[u8], max_steps: u64) -> Result<u64> {
        if !self.initialized {
            return Err(SynthError::SimulatorInitFailure(
                "oracle used before initialize".to_string(),
            ));
        }
        if codes.len() != sizes.len() {
            return Err(SynthError::encoding(
                format!("{} codes", codes.len()),
                format!("{} sizes supplied", sizes.len()),
            ));
        }
        let start = self.machine.pc;
        let mut addr = start;
        for (code, size) in codes.iter().zip(sizes) {
            if *size != 2 && *size != 4 {
                return Err(SynthError::encoding(
                    format!("0x{:x}", code),
                    format!("invalid instruction size {}", size),
                ));
            }
            self.machine.mem.write(addr, *size as u64, *code as u64);
            addr += *size as u64;
        }
        let end = addr;

        self.trapped = false;
        let mut steps = 0;
        while steps < max_steps && self.machine.pc != end {
            let pc = self.machine.pc;
            if pc < start || pc > end {
                break;
            }
            if self.machine.step().is_some() {
                self.trapped = true;
            }
            steps += 1;
        }
        Ok(steps)
    }

    fn get_xpr(&self, idx: u8) -> u64 {
        self.machine.x.get(idx as usize).copied().unwrap_or(0)
    }

    fn get_fpr(&self, idx: u8) -> u64 {
        self.machine.f.get(idx as usize).copied().unwrap_or(0)
    }

    fn get_csr(&self, addr: u16) -> u64 {
        self.machine.read_csr(addr)
    }

    fn get_pc(&self) -> u64 {
        self.machine.pc
    }

    fn was_last_execution_trapped(&self) -> bool {
        self.trapped
    }

    fn name(&self) -> &'static str {
        "reference"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::HybridEncoder;
    use crate::jump::JumpCompiler;
    use crate::isa::IntRegister;
    use crate::oracle::DRAM_BASE;

    fn booted(isa: &str) -> ReferenceOracle {
        let mut o = ReferenceOracle::new();
        o.initialize(&OracleImage::flat(1024, 7), isa, 256).unwrap();
        o
    }

    fn run(o: &mut ReferenceOracle, texts: &[&str]) -> u64 {
        let enc = HybridEncoder::table_only(o.machine.xlen);
        let compiled: Vec<_> = texts.iter().map(|t| enc.encode(t).unwrap()).collect();
        let codes: Vec<u32> = compiled.iter().map(|c| c.machine_code).collect();
        let sizes: Vec<u8> = compiled.iter().map(|c| c.size).collect();
        o.execute_sequence(&codes, &sizes, 1000).unwrap()
    }

    #[test]
    fn test_executes_alu_and_advances_pc() {
        let mut o = booted("rv64gc");
        let steps = run(&mut o, &["addi a0, zero, 5", "slli a1, a0, 3", "sub a2, a1, a0"]);
        assert_eq!(steps, 3);
        assert_eq!(o.get_xpr(10), 5);
        assert_eq!(o.get_xpr(11), 40);
        assert_eq!(o.get_xpr(12), 35);
        assert_eq!(o.get_pc(), DRAM_BASE + 12);
        assert!(!o.was_last_execution_trapped());
    }

    #[test]
    fn test_checkpoint_restore_rolls_back() {
        let mut o = booted("rv64gc");
        let before = o.get_xpr(10);
        o.set_checkpoint().unwrap();
        run(&mut o, &["addi a0, a0, 1"]);
        assert_eq!(o.get_xpr(10), before.wrapping_add(1));
        o.restore_checkpoint().unwrap();
        assert_eq!(o.get_xpr(10), before);
        assert_eq!(o.get_pc(), DRAM_BASE);
        assert!(o.restore_checkpoint().is_err());
    }

    #[test]
    fn test_compressed_expansion() {
        assert_eq!(expand_compressed(0x0001, 64), Some(0x0000_0013));
        // c.mv a0, a1 -> add a0, zero, a1
        assert_eq!(expand_compressed(0x852e, 64), Some(r_type(0, 11, 0, 0, 10, 0x33)));
        // c.beqz a0, 8 -> beq a0, zero, 8
        assert_eq!(expand_compressed(0xc501, 64), Some(b_type(8, 0, 10, 0)));
        assert_eq!(expand_compressed(0x0000, 64), None);
    }

    #[test]
    fn test_compressed_execution_sizes() {
        let mut o = booted("rv64gc");
        run(&mut o, &["c.li a0, 3", "c.addi a0, 4", "addi a1, a0, 1"]);
        assert_eq!(o.get_xpr(10), 7);
        assert_eq!(o.get_xpr(11), 8);
        assert_eq!(o.get_pc(), DRAM_BASE + 8);
    }

    #[test]
    fn test_backward_loop_runs_n_times() {
        let mut o = booted("rv64gc");
        let enc = HybridEncoder::table_only(64);
        let body: Vec<_> = ["addi a0, a0, 1", "addi a1, a1, 2", "xor a2, a2, a2"]
            .iter()
            .map(|t| enc.encode(t).unwrap())
            .collect();
        let seq = JumpCompiler::new(&enc)
            .compile_backward(IntRegister::S11, 3, &body, "bwd_0")
            .unwrap();
        let a0 = o.get_xpr(10);
        let steps = o
            .execute_sequence(&seq.codes(), &seq.sizes(), seq.step_budget())
            .unwrap();
        assert_eq!(steps, 1 + 3 * 5);
        assert_eq!(o.get_xpr(10), a0.wrapping_add(3));
        assert_eq!(o.get_xpr(27), 0);
        assert_eq!(o.get_pc(), DRAM_BASE + seq.total_size() as u64);
    }

    #[test]
    fn test_forward_jump_skips_filler() {
        let mut o = booted("rv64gc");
        let enc = HybridEncoder::table_only(64);
        let body: Vec<_> = ["addi a0, a0, 1", "addi a0, a0, 1", "addi a0, a0, 1"]
            .iter()
            .map(|t| enc.encode(t).unwrap())
            .collect();
        let form = crate::jump::BranchForm::new("beq", vec![IntRegister::ZERO, IntRegister::ZERO]);
        let seq = JumpCompiler::new(&enc)
            .compile_forward(&form, &body, "fwd_0")
            .unwrap();
        let a0 = o.get_xpr(10);
        let steps = o.execute_sequence(&seq.codes(), &seq.sizes(), 100).unwrap();
        assert_eq!(steps, 1);
        assert_eq!(o.get_xpr(10), a0);
        assert_eq!(o.get_pc(), DRAM_BASE + 16);
    }

    #[test]
    fn test_indirect_jump_lands_after_filler() {
        let mut o = booted("rv64gc");
        let enc = HybridEncoder::table_only(64);
        let body: Vec<_> = ["addi a0, a0, 1", "addi a0, a0, 1"]
            .iter()
            .map(|t| enc.encode(t).unwrap())
            .collect();
        let seq = JumpCompiler::new(&enc)
            .compile_indirect("jalr ra, 0(t0)", IntRegister::X5, &body, "fwd_1")
            .unwrap();
        let a0 = o.get_xpr(10);
        o.execute_sequence(&seq.codes(), &seq.sizes(), 100).unwrap();
        assert_eq!(o.get_xpr(10), a0);
        assert_eq!(o.get_pc(), DRAM_BASE + seq.total_size() as u64);
        assert_eq!(o.get_xpr(1), DRAM_BASE + 12);
    }

    #[test]
    fn test_illegal_instruction_traps_and_advances() {
        let mut o = booted("rv64gc");
        let steps = o.execute_sequence(&[0xffff_ffff], &[4], 10).unwrap();
        assert_eq!(steps, 1);
        assert!(o.was_last_execution_trapped());
        assert_eq!(o.get_csr(CSR_MCAUSE), 2);
        assert_eq!(o.get_csr(CSR_MEPC), DRAM_BASE);
        assert_eq!(o.get_pc(), DRAM_BASE + 4);
    }

    #[test]
    fn test_division_edge_cases() {
        let mut o = booted("rv64gc");
        run(
            &mut o,
            &["addi a1, zero, 7", "div a0, a1, zero", "rem a2, a1, zero", "divu a3, a1, zero"],
        );
        assert_eq!(o.get_xpr(10), u64::MAX);
        assert_eq!(o.get_xpr(12), 7);
        assert_eq!(o.get_xpr(13), u64::MAX);
    }

    #[test]
    fn test_rv32_wraps_at_32_bits() {
        let mut o = booted("rv32imafc_zicsr");
        assert_eq!(o.machine.xlen, 32);
        run(&mut o, &["addi a0, zero, -1", "addi a1, a0, 1", "srli a2, a0, 31"]);
        assert_eq!(o.get_xpr(10), 0xffff_ffff);
        assert_eq!(o.get_xpr(11), 0);
        assert_eq!(o.get_xpr(12), 1);
    }

    #[test]
    fn test_csr_read_write() {
        let mut o = booted("rv64gc");
        run(&mut o, &["addi a1, zero, 42", "csrrw a0, mscratch, a1", "csrrs a2, mscratch, zero"]);
        assert_eq!(o.get_xpr(12), 42);
        assert_eq!(o.get_csr(0x340), 42);
        run(&mut o, &["csrrwi zero, frm, 3"]);
        assert_eq!(o.get_csr(CSR_FCSR), 3 << 5);
    }

    #[test]
    fn test_write_to_read_only_csr_traps() {
        let mut o = booted("rv64gc");
        run(&mut o, &["csrrw a0, mhartid, a1"]);
        assert!(o.was_last_execution_trapped());
    }

    #[test]
    fn test_float_moves_and_add() {
        let mut o = booted("rv64gc");
        o.machine.xw(5, 1.5f64.to_bits());
        o.machine.xw(6, 2.25f64.to_bits());
        run(&mut o, &["fmv.d.x ft0, t0", "fmv.d.x ft1, t1", "fadd.d ft2, ft0, ft1", "fmv.x.d a0, ft2"]);
        assert_eq!(f64::from_bits(o.get_xpr(10)), 3.75);
    }

    #[test]
    fn test_loads_and_stores_through_t6() {
        let mut o = booted("rv64gc");
        run(&mut o, &["addi a0, zero, -2", "sd a0, 8(t6)", "lw a1, 8(t6)", "lbu a2, 8(t6)"]);
        assert_eq!(o.get_xpr(11), u64::MAX - 1);
        assert_eq!(o.get_xpr(12), 0xfe);
    }

    #[test]
    fn test_sequence_escaping_range_stops() {
        let mut o = booted("rv64gc");
        let steps = run(&mut o, &["jal zero, 64", "addi a0, a0, 1"]);
        assert_eq!(steps, 1);
        assert_eq!(o.get_pc(), DRAM_BASE + 64);
    }
}
