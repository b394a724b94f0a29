//! Operand synthesis
//!
//! Renders an `InstructionFormat` template into concrete assembly text:
//! registers are drawn with the history bias, immediates follow the
//! special-value rules, memory accesses go through `t6` with an in-range
//! aligned offset, and CSRs come from the filtered generation pool.

use crate::isa::csr::{GENERATION_POOL, RV32_UNSUPPORTED};
use crate::isa::register::{compressed_int_pool, float_pool, int_pool};
use crate::isa::{
    Category, FloatRegister, ImmKind, ImmSpec, InstructionFormat, IntRegister, RegRef,
    RegisterType, Variable,
};
use crate::profile::history::RegisterHistory;
use rand::seq::IndexedRandom;
use rand::Rng;
use std::collections::HashSet;

/// Placeholder left in rendered text for the jump compiler to resolve.
pub const LABEL_PLACEHOLDER: &str = "{LABEL}";

/// CSRs whose writes are redirected to `zero` as destination.
const ZERO_DEST_CSRS: &[&str] = &["senvcfg", "scounteren"];

/// Result of rendering one format.
#[derive(Clone, Debug, PartialEq)]
pub struct RenderedInstruction {
    pub mnemonic: String,
    /// Assembly text; may still contain `{LABEL}`.
    pub text: String,
    /// Register operands in template order.
    pub registers: Vec<RegRef>,
    /// Registers written by the instruction.
    pub dests: Vec<RegRef>,
}

impl RenderedInstruction {
    pub fn writes(&self, reg: RegRef) -> bool {
        self.dests.contains(&reg)
    }

    pub fn has_label(&self) -> bool {
        self.text.contains(LABEL_PLACEHOLDER)
    }
}

/// Per-seed operand state: destination histories and the CSR pool.
#[derive(Clone, Debug)]
pub struct OperandBuilder {
    rd_history: RegisterHistory<IntRegister>,
    frd_history: RegisterHistory<FloatRegister>,
    csr_pool: Vec<&'static str>,
    int_pool: Vec<IntRegister>,
    int_pool_nonzero: Vec<IntRegister>,
    compressed_pool: Vec<IntRegister>,
    float_pool: Vec<FloatRegister>,
}

impl OperandBuilder {
    /// `csr_blacklist` names are removed from the CSR pool; if that empties
    /// the pool the unfiltered list is used instead.
    pub fn new(csr_blacklist: &HashSet<String>, rv32: bool) -> Self {
        let base: Vec<&'static str> = GENERATION_POOL
            .iter()
            .copied()
            .filter(|c| !rv32 || !RV32_UNSUPPORTED.contains(c))
            .collect();
        let filtered: Vec<&'static str> = base
            .iter()
            .copied()
            .filter(|c| !csr_blacklist.contains(&c.to_ascii_lowercase()))
            .collect();
        let csr_pool = if filtered.is_empty() { base } else { filtered };

        let int_pool = int_pool();
        let int_pool_nonzero = int_pool
            .iter()
            .copied()
            .filter(|r| !r.is_zero_register())
            .collect();
        Self {
            rd_history: RegisterHistory::default(),
            frd_history: RegisterHistory::default(),
            csr_pool,
            int_pool,
            int_pool_nonzero,
            compressed_pool: compressed_int_pool(),
            float_pool: float_pool(),
        }
    }

    pub fn rd_history(&self) -> &RegisterHistory<IntRegister> {
        &self.rd_history
    }

    pub fn frd_history(&self) -> &RegisterHistory<FloatRegister> {
        &self.frd_history
    }

    pub fn csr_pool(&self) -> &[&'static str] {
        &self.csr_pool
    }

    /// Record a destination written by structural code (loop counters, address loads).
    pub fn record_dest(&mut self, reg: IntRegister) {
        self.rd_history.record(reg);
    }

    /// Address register for indirect jumps: never zero/sp/gp/tp, never the
    /// reserved scratch registers.
    pub fn choose_address_reg<G: Rng + ?Sized>(&mut self, rng: &mut G) -> IntRegister {
        let safe: Vec<IntRegister> = self
            .int_pool
            .iter()
            .copied()
            .filter(|r| !r.is_special())
            .collect();
        let reg = safe.choose(rng).copied().unwrap_or(IntRegister::X5);
        self.rd_history.record(reg);
        reg
    }

    pub fn choose_int_dest<G: Rng + ?Sized>(&mut self, rng: &mut G) -> IntRegister {
        let pool = self.int_pool.clone();
        self.rd_history
            .choose_dest(&pool, rng)
            .unwrap_or(IntRegister::ZERO)
    }

    /// Pick a CSR, resampling once if `satp` comes up.
    pub fn choose_csr<G: Rng + ?Sized>(&self, rng: &mut G) -> &'static str {
        let mut csr = self.csr_pool.choose(rng).copied().unwrap_or("mscratch");
        if csr == "satp" {
            csr = self.csr_pool.choose(rng).copied().unwrap_or("mscratch");
        }
        csr
    }

    /// Render `format` into assembly text.
    pub fn render<G: Rng + ?Sized>(
        &mut self,
        format: &InstructionFormat,
        rng: &mut G,
    ) -> RenderedInstruction {
        let mut values: Vec<(String, String)> = Vec::with_capacity(format.variables.len());
        let mut registers = Vec::new();
        let mut dests = Vec::new();
        let mut rd_slot: Option<usize> = None;
        let mut chosen_csr: Option<&'static str> = None;

        for (name, var) in &format.variables {
            let text = match var {
                Variable::Label => LABEL_PLACEHOLDER.to_string(),
                Variable::T6 => IntRegister::T6.to_string(),
                Variable::Csr => {
                    let csr = self.choose_csr(rng);
                    chosen_csr = Some(csr);
                    csr.to_string()
                }
                Variable::Imm(spec) => {
                    let imm = if is_memory_access(format) && spec.bits == 12 {
                        memory_offset(&format.mnemonic, rng)
                    } else {
                        gen_imm(spec, rng)
                    };
                    imm.to_string()
                }
                Variable::Frd => {
                    let pool = self.float_pool.clone();
                    let r = self
                        .frd_history
                        .choose_dest(&pool, rng)
                        .unwrap_or(FloatRegister::FT0);
                    registers.push(RegRef::Float(r));
                    dests.push(RegRef::Float(r));
                    r.to_string()
                }
                Variable::Frs1 | Variable::Frs2 | Variable::Frs3 => {
                    let r = self
                        .frd_history
                        .choose_source(&self.float_pool, rng)
                        .unwrap_or(FloatRegister::FT0);
                    registers.push(RegRef::Float(r));
                    r.to_string()
                }
                v if v.is_int_dest() => {
                    let pool = self.pool_for(*v).to_vec();
                    let r = self
                        .rd_history
                        .choose_dest(&pool, rng)
                        .unwrap_or(IntRegister::ZERO);
                    rd_slot.get_or_insert(values.len());
                    registers.push(RegRef::Int(r));
                    if !r.is_zero_register() {
                        dests.push(RegRef::Int(r));
                    }
                    r.to_string()
                }
                v => {
                    let r = self
                        .rd_history
                        .choose_source(self.pool_for(*v), rng)
                        .unwrap_or(IntRegister::ZERO);
                    registers.push(RegRef::Int(r));
                    r.to_string()
                }
            };
            values.push((name.clone(), text));
        }

        if let (Some(csr), Some(slot)) = (chosen_csr, rd_slot) {
            if ZERO_DEST_CSRS.contains(&csr) {
                values[slot].1 = IntRegister::ZERO.to_string();
                dests.retain(|d| d.is_float());
                if let Some(first) = registers.first_mut() {
                    *first = RegRef::Int(IntRegister::ZERO);
                }
            }
        }

        let mut text = format.template.clone();
        for (name, value) in &values {
            text = text.replace(&format!("{{{}}}", name), value);
        }

        RenderedInstruction {
            mnemonic: format.mnemonic.clone(),
            text,
            registers,
            dests,
        }
    }

    fn pool_for(&self, var: Variable) -> &[IntRegister] {
        match var {
            Variable::RdP | Variable::Rs1P | Variable::Rs2P | Variable::RdRs1P => {
                &self.compressed_pool
            }
            Variable::RdN0 | Variable::Rs1N0 | Variable::Rs2N0 | Variable::RdRs1N0 => {
                &self.int_pool_nonzero
            }
            _ => &self.int_pool,
        }
    }
}

fn is_memory_access(format: &InstructionFormat) -> bool {
    [
        Category::Load,
        Category::Store,
        Category::FloatLoad,
        Category::FloatStore,
    ]
    .iter()
    .any(|c| format.has_category(*c))
}

/// Access width in bytes of a load/store mnemonic.
pub fn access_width(mnemonic: &str) -> i64 {
    match mnemonic {
        "lb" | "lbu" | "sb" => 1,
        "lh" | "lhu" | "sh" => 2,
        "ld" | "sd" | "fld" | "fsd" => 8,
        _ => 4,
    }
}

/// Offset from `t6` in `[-2048, 2047 - width + 1]`, aligned to the access width.
pub fn memory_offset<G: Rng + ?Sized>(mnemonic: &str, rng: &mut G) -> i64 {
    let width = access_width(mnemonic);
    let offset = rng.random_range(-2048..=2047 - width + 1);
    offset & !(width - 1)
}

/// Draw an immediate for `spec`.
pub fn gen_imm<G: Rng + ?Sized>(spec: &ImmSpec, rng: &mut G) -> i64 {
    let (min, max) = spec.range();
    if let Some(multiple) = spec.multiple.filter(|m| *m > 0) {
        let m = multiple as i64;
        let lo = (min + m - 1).div_euclid(m);
        let hi = max.div_euclid(m);
        let imm = rng.random_range(lo..=hi) * m;
        if imm == 0 && spec.kind != ImmKind::Signed && spec.kind != ImmKind::Unsigned {
            return m;
        }
        return imm;
    }

    if rng.random_bool(0.5) {
        let mut specials = vec![min, max, 1];
        match spec.kind {
            ImmKind::Signed => specials.extend([0, -1]),
            ImmKind::NonZeroSigned => specials.push(-1),
            ImmKind::Unsigned | ImmKind::Zimm => specials.push(0),
            ImmKind::NonZeroUnsigned => {}
        }
        if let Some(v) = specials.choose(rng) {
            return *v;
        }
    }

    loop {
        let imm = rng.random_range(min..=max);
        if imm != 0 || !spec.is_nonzero() {
            return imm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::{ExtensionTag, FormatTable};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn table() -> FormatTable {
        FormatTable::builtin().unwrap()
    }

    #[test]
    fn test_render_r_type() {
        let t = table();
        let mut b = OperandBuilder::new(&HashSet::new(), false);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let r = b.render(t.get(ExtensionTag::RvI, "add").unwrap(), &mut rng);
        assert!(r.text.starts_with("add "));
        assert_eq!(r.registers.len(), 3);
        assert!(!r.text.contains('{'));
        assert!(r.text.split(", ").count() == 3);
    }

    #[test]
    fn test_render_never_uses_reserved_registers() {
        let t = table();
        let mut b = OperandBuilder::new(&HashSet::new(), false);
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let fmt = t.get(ExtensionTag::RvI, "xor").unwrap();
        for _ in 0..500 {
            let r = b.render(fmt, &mut rng);
            for reg in &r.registers {
                assert_ne!(*reg, RegRef::Int(IntRegister::T5));
                assert_ne!(*reg, RegRef::Int(IntRegister::T6));
            }
        }
    }

    #[test]
    fn test_memory_offsets_are_aligned_and_in_range() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        for mnemonic in ["lb", "lh", "lw", "ld", "sd", "fsw"] {
            let w = access_width(mnemonic);
            for _ in 0..200 {
                let off = memory_offset(mnemonic, &mut rng);
                assert!((-2048..=2047).contains(&off));
                assert!(off + w - 1 <= 2047);
                assert_eq!(off % w, 0);
            }
        }
    }

    #[test]
    fn test_load_uses_t6_base() {
        let t = table();
        let mut b = OperandBuilder::new(&HashSet::new(), false);
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        let r = b.render(t.get(ExtensionTag::Rv64I, "ld").unwrap(), &mut rng);
        assert!(r.text.ends_with("(t6)"), "{}", r.text);
    }

    #[test]
    fn test_nonzero_immediates_never_zero() {
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let spec = ImmSpec::parse("NZIMM_6").unwrap();
        for _ in 0..1000 {
            let v = gen_imm(&spec, &mut rng);
            assert_ne!(v, 0);
            assert!((-32..=31).contains(&v));
        }
        let spec = ImmSpec::parse("UIMM_8_4").unwrap();
        for _ in 0..200 {
            let v = gen_imm(&spec, &mut rng);
            assert_eq!(v % 4, 0);
            assert!((0..=255).contains(&v));
        }
    }

    #[test]
    fn test_csr_blacklist_and_rv32_filtering() {
        let mut blacklist = HashSet::new();
        blacklist.insert("mscratch".to_string());
        let b = OperandBuilder::new(&blacklist, true);
        assert!(!b.csr_pool().contains(&"mscratch"));
        assert!(!b.csr_pool().contains(&"minstret"));
        assert!(!b.csr_pool().contains(&"senvcfg"));

        let everything: HashSet<String> =
            GENERATION_POOL.iter().map(|s| s.to_string()).collect();
        let b = OperandBuilder::new(&everything, false);
        assert_eq!(b.csr_pool().len(), GENERATION_POOL.len());
    }

    #[test]
    fn test_senvcfg_write_targets_zero() {
        let t = table();
        let mut blacklist: HashSet<String> =
            GENERATION_POOL.iter().map(|s| s.to_string()).collect();
        blacklist.remove("senvcfg");
        let mut b = OperandBuilder::new(&blacklist, false);
        let mut rng = ChaCha8Rng::seed_from_u64(6);
        let r = b.render(t.get(ExtensionTag::RvZicsr, "csrrw").unwrap(), &mut rng);
        assert!(r.text.starts_with("csrrw zero, senvcfg, "), "{}", r.text);
        assert!(r.dests.is_empty());
    }

    #[test]
    fn test_label_placeholder_survives() {
        let t = table();
        let mut b = OperandBuilder::new(&HashSet::new(), false);
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let r = b.render(t.get(ExtensionTag::RvI, "beq").unwrap(), &mut rng);
        assert!(r.has_label());
        assert_eq!(r.registers.len(), 2);
    }

    #[test]
    fn test_address_register_avoids_special() {
        let mut b = OperandBuilder::new(&HashSet::new(), false);
        let mut rng = ChaCha8Rng::seed_from_u64(8);
        for _ in 0..200 {
            let r = b.choose_address_reg(&mut rng);
            assert!(!r.is_special());
            assert_ne!(r, IntRegister::T6);
        }
    }
}
