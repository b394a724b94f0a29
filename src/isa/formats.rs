//! Instruction format table
//!
//! Maps (extension, mnemonic) to an operand template such as
//! `"add {RD}, {RS1}, {RS2}"`, the set of placeholder variables it uses and
//! its category tags. The built-in table is validated when it is constructed:
//! a template that names an unknown placeholder is a configuration error.

use crate::error::{Result, SynthError};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Extension tags used by profiles and the format table.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub enum ExtensionTag {
    RvI,
    Rv64I,
    RvM,
    Rv64M,
    RvA,
    Rv64A,
    RvF,
    Rv64F,
    RvD,
    Rv64D,
    RvZicsr,
    RvZifencei,
    RvZba,
    RvZbb,
    RvZbs,
    RvC,
    Rv32C,
    Rv64C,
}

impl ExtensionTag {
    pub const ALL: [ExtensionTag; 18] = [
        ExtensionTag::RvI,
        ExtensionTag::Rv64I,
        ExtensionTag::RvM,
        ExtensionTag::Rv64M,
        ExtensionTag::RvA,
        ExtensionTag::Rv64A,
        ExtensionTag::RvF,
        ExtensionTag::Rv64F,
        ExtensionTag::RvD,
        ExtensionTag::Rv64D,
        ExtensionTag::RvZicsr,
        ExtensionTag::RvZifencei,
        ExtensionTag::RvZba,
        ExtensionTag::RvZbb,
        ExtensionTag::RvZbs,
        ExtensionTag::RvC,
        ExtensionTag::Rv32C,
        ExtensionTag::Rv64C,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ExtensionTag::RvI => "RV_I",
            ExtensionTag::Rv64I => "RV64_I",
            ExtensionTag::RvM => "RV_M",
            ExtensionTag::Rv64M => "RV64_M",
            ExtensionTag::RvA => "RV_A",
            ExtensionTag::Rv64A => "RV64_A",
            ExtensionTag::RvF => "RV_F",
            ExtensionTag::Rv64F => "RV64_F",
            ExtensionTag::RvD => "RV_D",
            ExtensionTag::Rv64D => "RV64_D",
            ExtensionTag::RvZicsr => "RV_ZICSR",
            ExtensionTag::RvZifencei => "RV_ZIFENCEI",
            ExtensionTag::RvZba => "RV_ZBA",
            ExtensionTag::RvZbb => "RV_ZBB",
            ExtensionTag::RvZbs => "RV_ZBS",
            ExtensionTag::RvC => "RV_C",
            ExtensionTag::Rv32C => "RV32_C",
            ExtensionTag::Rv64C => "RV64_C",
        }
    }

    pub fn is_compressed(&self) -> bool {
        matches!(
            self,
            ExtensionTag::RvC | ExtensionTag::Rv32C | ExtensionTag::Rv64C
        )
    }

    /// Tags whose instructions only exist on RV64.
    pub fn is_rv64_only(&self) -> bool {
        matches!(
            self,
            ExtensionTag::Rv64I
                | ExtensionTag::Rv64M
                | ExtensionTag::Rv64A
                | ExtensionTag::Rv64F
                | ExtensionTag::Rv64D
                | ExtensionTag::Rv64C
        )
    }

    pub fn is_float(&self) -> bool {
        matches!(
            self,
            ExtensionTag::RvF | ExtensionTag::Rv64F | ExtensionTag::RvD | ExtensionTag::Rv64D
        )
    }
}

impl fmt::Display for ExtensionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ExtensionTag {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_uppercase();
        ExtensionTag::ALL
            .iter()
            .copied()
            .find(|t| t.name() == wanted)
            .ok_or_else(|| format!("unknown extension tag: {}", s))
    }
}

/// Category tags attached to each format.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Category {
    Arith,
    Logic,
    Shift,
    Compare,
    Mul,
    Div,
    Load,
    Store,
    StoreSp,
    FloatLoad,
    FloatStore,
    Amo,
    Jump,
    Branch,
    Csr,
    Float,
    Convert,
    Fence,
    Bitmanip,
    Nop,
}

impl Category {
    /// Categories whose side effects the per-instruction validator cannot replay.
    pub fn mutates_memory(&self) -> bool {
        matches!(
            self,
            Category::Amo | Category::Store | Category::StoreSp | Category::FloatStore
        )
    }

    pub fn is_control_flow(&self) -> bool {
        matches!(self, Category::Jump | Category::Branch)
    }
}

/// Immediate kinds, following the usual assembler-manual naming.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum ImmKind {
    Signed,
    NonZeroSigned,
    Unsigned,
    NonZeroUnsigned,
    /// Zero-extended CSR immediate
    Zimm,
}

/// Immediate placeholder specification: kind, bit length, required multiple.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ImmSpec {
    pub kind: ImmKind,
    pub bits: u32,
    pub multiple: Option<u32>,
}

impl ImmSpec {
    /// Parse names like `IMM_12`, `NZUIMM_6`, `UIMM_8_4` (bits 8, multiple of 4).
    pub fn parse(name: &str) -> Option<ImmSpec> {
        let mut parts = name.split('_');
        let kind = match parts.next()? {
            "IMM" => ImmKind::Signed,
            "NZIMM" => ImmKind::NonZeroSigned,
            "UIMM" => ImmKind::Unsigned,
            "NZUIMM" => ImmKind::NonZeroUnsigned,
            "ZIMM" => ImmKind::Zimm,
            _ => return None,
        };
        let bits = match parts.next() {
            Some(b) => b.parse().ok()?,
            None => 12,
        };
        let multiple = match parts.next() {
            Some(m) => Some(m.parse().ok()?),
            None => None,
        };
        if parts.next().is_some() || bits == 0 || bits > 32 {
            return None;
        }
        Some(ImmSpec {
            kind,
            bits,
            multiple,
        })
    }

    /// Inclusive value range.
    pub fn range(&self) -> (i64, i64) {
        match self.kind {
            ImmKind::Signed | ImmKind::NonZeroSigned => {
                (-(1i64 << (self.bits - 1)), (1i64 << (self.bits - 1)) - 1)
            }
            ImmKind::NonZeroUnsigned => (1, (1i64 << self.bits) - 1),
            ImmKind::Unsigned | ImmKind::Zimm => (0, (1i64 << self.bits) - 1),
        }
    }

    pub fn is_nonzero(&self) -> bool {
        matches!(self.kind, ImmKind::NonZeroSigned | ImmKind::NonZeroUnsigned)
    }
}

/// Placeholder variables a template may contain.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Variable {
    Rd,
    Rs1,
    Rs2,
    Rs3,
    Frd,
    Frs1,
    Frs2,
    Frs3,
    Csr,
    Label,
    /// Compressed-form destination (x8-x15)
    RdP,
    Rs1P,
    Rs2P,
    RdRs1P,
    RdRs1N0,
    RdN0,
    Rs1N0,
    Rs2N0,
    /// Fixed memory base register
    T6,
    Imm(ImmSpec),
}

impl Variable {
    pub fn from_name(name: &str) -> Option<Variable> {
        Some(match name {
            "RD" => Variable::Rd,
            "RS1" => Variable::Rs1,
            "RS2" => Variable::Rs2,
            "RS3" => Variable::Rs3,
            "FRD" => Variable::Frd,
            "FRS1" => Variable::Frs1,
            "FRS2" => Variable::Frs2,
            "FRS3" => Variable::Frs3,
            "CSR" => Variable::Csr,
            "LABEL" => Variable::Label,
            "RD_P" => Variable::RdP,
            "RS1_P" => Variable::Rs1P,
            "RS2_P" => Variable::Rs2P,
            "RD_RS1_P" => Variable::RdRs1P,
            "RD_RS1_N0" => Variable::RdRs1N0,
            "RD_N0" => Variable::RdN0,
            "RS1_N0" => Variable::Rs1N0,
            "RS2_N0" => Variable::Rs2N0,
            "T6" => Variable::T6,
            other => return ImmSpec::parse(other).map(Variable::Imm),
        })
    }

    /// Integer destination variables (tracked in the rd history).
    pub fn is_int_dest(&self) -> bool {
        matches!(
            self,
            Variable::Rd | Variable::RdP | Variable::RdRs1P | Variable::RdRs1N0 | Variable::RdN0
        )
    }
}

/// One entry of the format table.
#[derive(Clone, Debug, PartialEq)]
pub struct InstructionFormat {
    pub mnemonic: String,
    pub template: String,
    /// Placeholders as they appear in the template, each once, in order.
    pub variables: Vec<(String, Variable)>,
    pub categories: Vec<Category>,
}

impl InstructionFormat {
    /// Build a format, checking every placeholder names a known variable.
    pub fn new(mnemonic: &str, template: &str, categories: &[Category]) -> Result<Self> {
        if !template.starts_with(mnemonic) {
            return Err(SynthError::Config(format!(
                "template `{}` does not start with its mnemonic `{}`",
                template, mnemonic
            )));
        }
        let mut variables: Vec<(String, Variable)> = Vec::new();
        let mut rest = template;
        while let Some(open) = rest.find('{') {
            let after = &rest[open + 1..];
            let close = after.find('}').ok_or_else(|| {
                SynthError::Config(format!("unterminated placeholder in `{}`", template))
            })?;
            let name = &after[..close];
            let var = Variable::from_name(name).ok_or_else(|| {
                SynthError::Config(format!(
                    "unknown placeholder `{{{}}}` in `{}`",
                    name, template
                ))
            })?;
            if !variables.iter().any(|(n, _)| n == name) {
                variables.push((name.to_string(), var));
            }
            rest = &after[close + 1..];
        }
        Ok(Self {
            mnemonic: mnemonic.to_string(),
            template: template.to_string(),
            variables,
            categories: categories.to_vec(),
        })
    }

    pub fn has_category(&self, category: Category) -> bool {
        self.categories.contains(&category)
    }

    pub fn has_label(&self) -> bool {
        self.variables.iter().any(|(_, v)| *v == Variable::Label)
    }

    pub fn is_compressed(&self) -> bool {
        self.mnemonic.starts_with("c.")
    }

    pub fn is_control_flow(&self) -> bool {
        self.categories.iter().any(Category::is_control_flow)
    }

    /// Whether this instruction may appear inside a jump or loop body.
    pub fn is_filler_eligible(&self) -> bool {
        !self.has_label()
            && !self.is_control_flow()
            && !self.categories.iter().any(Category::mutates_memory)
            && !self.is_compressed()
    }
}

/// Typed lookup table (extension, mnemonic) -> format.
#[derive(Clone, Debug, Default)]
pub struct FormatTable {
    entries: BTreeMap<ExtensionTag, BTreeMap<String, InstructionFormat>>,
}

impl FormatTable {
    /// Build a table from raw rows, failing on the first invalid one.
    pub fn from_rows(rows: &[(ExtensionTag, &str, &str, &[Category])]) -> Result<Self> {
        let mut table = FormatTable::default();
        for (ext, mnemonic, template, categories) in rows {
            let format = InstructionFormat::new(mnemonic, template, categories)?;
            let per_ext = table.entries.entry(*ext).or_default();
            if per_ext.insert(mnemonic.to_string(), format).is_some() {
                return Err(SynthError::Config(format!(
                    "duplicate format for {} `{}`",
                    ext, mnemonic
                )));
            }
        }
        Ok(table)
    }

    pub fn builtin() -> Result<Self> {
        Self::from_rows(BUILTIN_FORMATS)
    }

    pub fn get(&self, ext: ExtensionTag, mnemonic: &str) -> Option<&InstructionFormat> {
        self.entries.get(&ext).and_then(|m| m.get(mnemonic))
    }

    /// Find a mnemonic in any extension.
    pub fn find(&self, mnemonic: &str) -> Option<(ExtensionTag, &InstructionFormat)> {
        self.entries
            .iter()
            .find_map(|(ext, m)| m.get(mnemonic).map(|f| (*ext, f)))
    }

    pub fn formats(&self, ext: ExtensionTag) -> Vec<&InstructionFormat> {
        self.entries
            .get(&ext)
            .map(|m| m.values().collect())
            .unwrap_or_default()
    }

    /// Filler candidates drawn from the given extensions.
    pub fn filler_formats(&self, exts: &[ExtensionTag]) -> Vec<&InstructionFormat> {
        exts.iter()
            .flat_map(|e| self.formats(*e))
            .filter(|f| f.is_filler_eligible())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

use Category::*;
use ExtensionTag::*;

type Row = (ExtensionTag, &'static str, &'static str, &'static [Category]);

const BUILTIN_FORMATS: &[Row] = &[
    // RV_I
    (RvI, "lui", "lui {RD}, {UIMM_20}", &[Arith]),
    (RvI, "auipc", "auipc {RD}, {UIMM_20}", &[Arith]),
    (RvI, "jal", "jal {RD}, {LABEL}", &[Jump]),
    (RvI, "jalr", "jalr {RD}, 0({RS1})", &[Jump]),
    (RvI, "beq", "beq {RS1}, {RS2}, {LABEL}", &[Branch]),
    (RvI, "bne", "bne {RS1}, {RS2}, {LABEL}", &[Branch]),
    (RvI, "blt", "blt {RS1}, {RS2}, {LABEL}", &[Branch]),
    (RvI, "bge", "bge {RS1}, {RS2}, {LABEL}", &[Branch]),
    (RvI, "bltu", "bltu {RS1}, {RS2}, {LABEL}", &[Branch]),
    (RvI, "bgeu", "bgeu {RS1}, {RS2}, {LABEL}", &[Branch]),
    (RvI, "lb", "lb {RD}, {IMM_12}({T6})", &[Load]),
    (RvI, "lh", "lh {RD}, {IMM_12}({T6})", &[Load]),
    (RvI, "lw", "lw {RD}, {IMM_12}({T6})", &[Load]),
    (RvI, "lbu", "lbu {RD}, {IMM_12}({T6})", &[Load]),
    (RvI, "lhu", "lhu {RD}, {IMM_12}({T6})", &[Load]),
    (RvI, "sb", "sb {RS2}, {IMM_12}({T6})", &[Store]),
    (RvI, "sh", "sh {RS2}, {IMM_12}({T6})", &[Store]),
    (RvI, "sw", "sw {RS2}, {IMM_12}({T6})", &[Store]),
    (RvI, "addi", "addi {RD}, {RS1}, {IMM_12}", &[Arith]),
    (RvI, "slti", "slti {RD}, {RS1}, {IMM_12}", &[Compare]),
    (RvI, "sltiu", "sltiu {RD}, {RS1}, {IMM_12}", &[Compare]),
    (RvI, "xori", "xori {RD}, {RS1}, {IMM_12}", &[Logic]),
    (RvI, "ori", "ori {RD}, {RS1}, {IMM_12}", &[Logic]),
    (RvI, "andi", "andi {RD}, {RS1}, {IMM_12}", &[Logic]),
    (RvI, "slli", "slli {RD}, {RS1}, {UIMM_5}", &[Shift]),
    (RvI, "srli", "srli {RD}, {RS1}, {UIMM_5}", &[Shift]),
    (RvI, "srai", "srai {RD}, {RS1}, {UIMM_5}", &[Shift]),
    (RvI, "add", "add {RD}, {RS1}, {RS2}", &[Arith]),
    (RvI, "sub", "sub {RD}, {RS1}, {RS2}", &[Arith]),
    (RvI, "sll", "sll {RD}, {RS1}, {RS2}", &[Shift]),
    (RvI, "slt", "slt {RD}, {RS1}, {RS2}", &[Compare]),
    (RvI, "sltu", "sltu {RD}, {RS1}, {RS2}", &[Compare]),
    (RvI, "xor", "xor {RD}, {RS1}, {RS2}", &[Logic]),
    (RvI, "srl", "srl {RD}, {RS1}, {RS2}", &[Shift]),
    (RvI, "sra", "sra {RD}, {RS1}, {RS2}", &[Shift]),
    (RvI, "or", "or {RD}, {RS1}, {RS2}", &[Logic]),
    (RvI, "and", "and {RD}, {RS1}, {RS2}", &[Logic]),
    (RvI, "fence", "fence", &[Fence]),
    // RV64_I
    (Rv64I, "lwu", "lwu {RD}, {IMM_12}({T6})", &[Load]),
    (Rv64I, "ld", "ld {RD}, {IMM_12}({T6})", &[Load]),
    (Rv64I, "sd", "sd {RS2}, {IMM_12}({T6})", &[Store]),
    (Rv64I, "addiw", "addiw {RD}, {RS1}, {IMM_12}", &[Arith]),
    (Rv64I, "slliw", "slliw {RD}, {RS1}, {UIMM_5}", &[Shift]),
    (Rv64I, "srliw", "srliw {RD}, {RS1}, {UIMM_5}", &[Shift]),
    (Rv64I, "sraiw", "sraiw {RD}, {RS1}, {UIMM_5}", &[Shift]),
    (Rv64I, "addw", "addw {RD}, {RS1}, {RS2}", &[Arith]),
    (Rv64I, "subw", "subw {RD}, {RS1}, {RS2}", &[Arith]),
    (Rv64I, "sllw", "sllw {RD}, {RS1}, {RS2}", &[Shift]),
    (Rv64I, "srlw", "srlw {RD}, {RS1}, {RS2}", &[Shift]),
    (Rv64I, "sraw", "sraw {RD}, {RS1}, {RS2}", &[Shift]),
    // RV_M / RV64_M
    (RvM, "mul", "mul {RD}, {RS1}, {RS2}", &[Mul]),
    (RvM, "mulh", "mulh {RD}, {RS1}, {RS2}", &[Mul]),
    (RvM, "mulhsu", "mulhsu {RD}, {RS1}, {RS2}", &[Mul]),
    (RvM, "mulhu", "mulhu {RD}, {RS1}, {RS2}", &[Mul]),
    (RvM, "div", "div {RD}, {RS1}, {RS2}", &[Div]),
    (RvM, "divu", "divu {RD}, {RS1}, {RS2}", &[Div]),
    (RvM, "rem", "rem {RD}, {RS1}, {RS2}", &[Div]),
    (RvM, "remu", "remu {RD}, {RS1}, {RS2}", &[Div]),
    (Rv64M, "mulw", "mulw {RD}, {RS1}, {RS2}", &[Mul]),
    (Rv64M, "divw", "divw {RD}, {RS1}, {RS2}", &[Div]),
    (Rv64M, "divuw", "divuw {RD}, {RS1}, {RS2}", &[Div]),
    (Rv64M, "remw", "remw {RD}, {RS1}, {RS2}", &[Div]),
    (Rv64M, "remuw", "remuw {RD}, {RS1}, {RS2}", &[Div]),
    // RV_A / RV64_A
    (RvA, "lr.w", "lr.w {RD}, ({T6})", &[Amo, Load]),
    (RvA, "sc.w", "sc.w {RD}, {RS2}, ({T6})", &[Amo, Store]),
    (RvA, "amoswap.w", "amoswap.w {RD}, {RS2}, ({T6})", &[Amo]),
    (RvA, "amoadd.w", "amoadd.w {RD}, {RS2}, ({T6})", &[Amo]),
    (RvA, "amoxor.w", "amoxor.w {RD}, {RS2}, ({T6})", &[Amo]),
    (RvA, "amoand.w", "amoand.w {RD}, {RS2}, ({T6})", &[Amo]),
    (RvA, "amoor.w", "amoor.w {RD}, {RS2}, ({T6})", &[Amo]),
    (RvA, "amomin.w", "amomin.w {RD}, {RS2}, ({T6})", &[Amo]),
    (RvA, "amomax.w", "amomax.w {RD}, {RS2}, ({T6})", &[Amo]),
    (RvA, "amominu.w", "amominu.w {RD}, {RS2}, ({T6})", &[Amo]),
    (RvA, "amomaxu.w", "amomaxu.w {RD}, {RS2}, ({T6})", &[Amo]),
    (Rv64A, "lr.d", "lr.d {RD}, ({T6})", &[Amo, Load]),
    (Rv64A, "sc.d", "sc.d {RD}, {RS2}, ({T6})", &[Amo, Store]),
    (Rv64A, "amoswap.d", "amoswap.d {RD}, {RS2}, ({T6})", &[Amo]),
    (Rv64A, "amoadd.d", "amoadd.d {RD}, {RS2}, ({T6})", &[Amo]),
    (Rv64A, "amoxor.d", "amoxor.d {RD}, {RS2}, ({T6})", &[Amo]),
    (Rv64A, "amoand.d", "amoand.d {RD}, {RS2}, ({T6})", &[Amo]),
    (Rv64A, "amoor.d", "amoor.d {RD}, {RS2}, ({T6})", &[Amo]),
    (Rv64A, "amomin.d", "amomin.d {RD}, {RS2}, ({T6})", &[Amo]),
    (Rv64A, "amomax.d", "amomax.d {RD}, {RS2}, ({T6})", &[Amo]),
    (Rv64A, "amominu.d", "amominu.d {RD}, {RS2}, ({T6})", &[Amo]),
    (Rv64A, "amomaxu.d", "amomaxu.d {RD}, {RS2}, ({T6})", &[Amo]),
    // RV_F / RV64_F
    (RvF, "flw", "flw {FRD}, {IMM_12}({T6})", &[FloatLoad]),
    (RvF, "fsw", "fsw {FRS2}, {IMM_12}({T6})", &[FloatStore]),
    (RvF, "fmadd.s", "fmadd.s {FRD}, {FRS1}, {FRS2}, {FRS3}", &[Float]),
    (RvF, "fmsub.s", "fmsub.s {FRD}, {FRS1}, {FRS2}, {FRS3}", &[Float]),
    (RvF, "fnmadd.s", "fnmadd.s {FRD}, {FRS1}, {FRS2}, {FRS3}", &[Float]),
    (RvF, "fnmsub.s", "fnmsub.s {FRD}, {FRS1}, {FRS2}, {FRS3}", &[Float]),
    (RvF, "fadd.s", "fadd.s {FRD}, {FRS1}, {FRS2}", &[Float]),
    (RvF, "fsub.s", "fsub.s {FRD}, {FRS1}, {FRS2}", &[Float]),
    (RvF, "fmul.s", "fmul.s {FRD}, {FRS1}, {FRS2}", &[Float]),
    (RvF, "fdiv.s", "fdiv.s {FRD}, {FRS1}, {FRS2}", &[Float]),
    (RvF, "fsqrt.s", "fsqrt.s {FRD}, {FRS1}", &[Float]),
    (RvF, "fsgnj.s", "fsgnj.s {FRD}, {FRS1}, {FRS2}", &[Float]),
    (RvF, "fsgnjn.s", "fsgnjn.s {FRD}, {FRS1}, {FRS2}", &[Float]),
    (RvF, "fsgnjx.s", "fsgnjx.s {FRD}, {FRS1}, {FRS2}", &[Float]),
    (RvF, "fmin.s", "fmin.s {FRD}, {FRS1}, {FRS2}", &[Float]),
    (RvF, "fmax.s", "fmax.s {FRD}, {FRS1}, {FRS2}", &[Float]),
    (RvF, "feq.s", "feq.s {RD}, {FRS1}, {FRS2}", &[Float, Compare]),
    (RvF, "flt.s", "flt.s {RD}, {FRS1}, {FRS2}", &[Float, Compare]),
    (RvF, "fle.s", "fle.s {RD}, {FRS1}, {FRS2}", &[Float, Compare]),
    (RvF, "fclass.s", "fclass.s {RD}, {FRS1}", &[Float]),
    (RvF, "fcvt.w.s", "fcvt.w.s {RD}, {FRS1}", &[Convert]),
    (RvF, "fcvt.wu.s", "fcvt.wu.s {RD}, {FRS1}", &[Convert]),
    (RvF, "fcvt.s.w", "fcvt.s.w {FRD}, {RS1}", &[Convert]),
    (RvF, "fcvt.s.wu", "fcvt.s.wu {FRD}, {RS1}", &[Convert]),
    (RvF, "fmv.x.w", "fmv.x.w {RD}, {FRS1}", &[Convert]),
    (RvF, "fmv.w.x", "fmv.w.x {FRD}, {RS1}", &[Convert]),
    (Rv64F, "fcvt.l.s", "fcvt.l.s {RD}, {FRS1}", &[Convert]),
    (Rv64F, "fcvt.lu.s", "fcvt.lu.s {RD}, {FRS1}", &[Convert]),
    (Rv64F, "fcvt.s.l", "fcvt.s.l {FRD}, {RS1}", &[Convert]),
    (Rv64F, "fcvt.s.lu", "fcvt.s.lu {FRD}, {RS1}", &[Convert]),
    // RV_D / RV64_D
    (RvD, "fld", "fld {FRD}, {IMM_12}({T6})", &[FloatLoad]),
    (RvD, "fsd", "fsd {FRS2}, {IMM_12}({T6})", &[FloatStore]),
    (RvD, "fmadd.d", "fmadd.d {FRD}, {FRS1}, {FRS2}, {FRS3}", &[Float]),
    (RvD, "fmsub.d", "fmsub.d {FRD}, {FRS1}, {FRS2}, {FRS3}", &[Float]),
    (RvD, "fnmadd.d", "fnmadd.d {FRD}, {FRS1}, {FRS2}, {FRS3}", &[Float]),
    (RvD, "fnmsub.d", "fnmsub.d {FRD}, {FRS1}, {FRS2}, {FRS3}", &[Float]),
    (RvD, "fadd.d", "fadd.d {FRD}, {FRS1}, {FRS2}", &[Float]),
    (RvD, "fsub.d", "fsub.d {FRD}, {FRS1}, {FRS2}", &[Float]),
    (RvD, "fmul.d", "fmul.d {FRD}, {FRS1}, {FRS2}", &[Float]),
    (RvD, "fdiv.d", "fdiv.d {FRD}, {FRS1}, {FRS2}", &[Float]),
    (RvD, "fsqrt.d", "fsqrt.d {FRD}, {FRS1}", &[Float]),
    (RvD, "fsgnj.d", "fsgnj.d {FRD}, {FRS1}, {FRS2}", &[Float]),
    (RvD, "fsgnjn.d", "fsgnjn.d {FRD}, {FRS1}, {FRS2}", &[Float]),
    (RvD, "fsgnjx.d", "fsgnjx.d {FRD}, {FRS1}, {FRS2}", &[Float]),
    (RvD, "fmin.d", "fmin.d {FRD}, {FRS1}, {FRS2}", &[Float]),
    (RvD, "fmax.d", "fmax.d {FRD}, {FRS1}, {FRS2}", &[Float]),
    (RvD, "fcvt.s.d", "fcvt.s.d {FRD}, {FRS1}", &[Convert]),
    (RvD, "fcvt.d.s", "fcvt.d.s {FRD}, {FRS1}", &[Convert]),
    (RvD, "feq.d", "feq.d {RD}, {FRS1}, {FRS2}", &[Float, Compare]),
    (RvD, "flt.d", "flt.d {RD}, {FRS1}, {FRS2}", &[Float, Compare]),
    (RvD, "fle.d", "fle.d {RD}, {FRS1}, {FRS2}", &[Float, Compare]),
    (RvD, "fclass.d", "fclass.d {RD}, {FRS1}", &[Float]),
    (RvD, "fcvt.w.d", "fcvt.w.d {RD}, {FRS1}", &[Convert]),
    (RvD, "fcvt.wu.d", "fcvt.wu.d {RD}, {FRS1}", &[Convert]),
    (RvD, "fcvt.d.w", "fcvt.d.w {FRD}, {RS1}", &[Convert]),
    (RvD, "fcvt.d.wu", "fcvt.d.wu {FRD}, {RS1}", &[Convert]),
    (Rv64D, "fcvt.l.d", "fcvt.l.d {RD}, {FRS1}", &[Convert]),
    (Rv64D, "fcvt.lu.d", "fcvt.lu.d {RD}, {FRS1}", &[Convert]),
    (Rv64D, "fcvt.d.l", "fcvt.d.l {FRD}, {RS1}", &[Convert]),
    (Rv64D, "fcvt.d.lu", "fcvt.d.lu {FRD}, {RS1}", &[Convert]),
    (Rv64D, "fmv.x.d", "fmv.x.d {RD}, {FRS1}", &[Convert]),
    (Rv64D, "fmv.d.x", "fmv.d.x {FRD}, {RS1}", &[Convert]),
    // Zicsr / Zifencei
    (RvZicsr, "csrrw", "csrrw {RD}, {CSR}, {RS1}", &[Csr]),
    (RvZicsr, "csrrs", "csrrs {RD}, {CSR}, {RS1}", &[Csr]),
    (RvZicsr, "csrrc", "csrrc {RD}, {CSR}, {RS1}", &[Csr]),
    (RvZicsr, "csrrwi", "csrrwi {RD}, {CSR}, {ZIMM_5}", &[Csr]),
    (RvZicsr, "csrrsi", "csrrsi {RD}, {CSR}, {ZIMM_5}", &[Csr]),
    (RvZicsr, "csrrci", "csrrci {RD}, {CSR}, {ZIMM_5}", &[Csr]),
    (RvZifencei, "fence.i", "fence.i", &[Fence]),
    // Zba / Zbb / Zbs
    (RvZba, "sh1add", "sh1add {RD}, {RS1}, {RS2}", &[Bitmanip]),
    (RvZba, "sh2add", "sh2add {RD}, {RS1}, {RS2}", &[Bitmanip]),
    (RvZba, "sh3add", "sh3add {RD}, {RS1}, {RS2}", &[Bitmanip]),
    (RvZbb, "andn", "andn {RD}, {RS1}, {RS2}", &[Bitmanip]),
    (RvZbb, "orn", "orn {RD}, {RS1}, {RS2}", &[Bitmanip]),
    (RvZbb, "xnor", "xnor {RD}, {RS1}, {RS2}", &[Bitmanip]),
    (RvZbb, "clz", "clz {RD}, {RS1}", &[Bitmanip]),
    (RvZbb, "ctz", "ctz {RD}, {RS1}", &[Bitmanip]),
    (RvZbb, "cpop", "cpop {RD}, {RS1}", &[Bitmanip]),
    (RvZbb, "max", "max {RD}, {RS1}, {RS2}", &[Bitmanip]),
    (RvZbb, "maxu", "maxu {RD}, {RS1}, {RS2}", &[Bitmanip]),
    (RvZbb, "min", "min {RD}, {RS1}, {RS2}", &[Bitmanip]),
    (RvZbb, "minu", "minu {RD}, {RS1}, {RS2}", &[Bitmanip]),
    (RvZbb, "sext.b", "sext.b {RD}, {RS1}", &[Bitmanip]),
    (RvZbb, "sext.h", "sext.h {RD}, {RS1}", &[Bitmanip]),
    (RvZbb, "rol", "rol {RD}, {RS1}, {RS2}", &[Bitmanip]),
    (RvZbb, "ror", "ror {RD}, {RS1}, {RS2}", &[Bitmanip]),
    (RvZbb, "rori", "rori {RD}, {RS1}, {UIMM_5}", &[Bitmanip]),
    (RvZbb, "orc.b", "orc.b {RD}, {RS1}", &[Bitmanip]),
    (RvZbs, "bclr", "bclr {RD}, {RS1}, {RS2}", &[Bitmanip]),
    (RvZbs, "bext", "bext {RD}, {RS1}, {RS2}", &[Bitmanip]),
    (RvZbs, "binv", "binv {RD}, {RS1}, {RS2}", &[Bitmanip]),
    (RvZbs, "bset", "bset {RD}, {RS1}, {RS2}", &[Bitmanip]),
    (RvZbs, "bclri", "bclri {RD}, {RS1}, {UIMM_5}", &[Bitmanip]),
    (RvZbs, "bexti", "bexti {RD}, {RS1}, {UIMM_5}", &[Bitmanip]),
    (RvZbs, "binvi", "binvi {RD}, {RS1}, {UIMM_5}", &[Bitmanip]),
    (RvZbs, "bseti", "bseti {RD}, {RS1}, {UIMM_5}", &[Bitmanip]),
    // Compressed
    (RvC, "c.nop", "c.nop", &[Nop]),
    (RvC, "c.addi", "c.addi {RD_RS1_N0}, {NZIMM_6}", &[Arith]),
    (RvC, "c.li", "c.li {RD_N0}, {IMM_6}", &[Arith]),
    (RvC, "c.mv", "c.mv {RD_N0}, {RS2_N0}", &[Arith]),
    (RvC, "c.add", "c.add {RD_RS1_N0}, {RS2_N0}", &[Arith]),
    (RvC, "c.sub", "c.sub {RD_RS1_P}, {RS2_P}", &[Arith]),
    (RvC, "c.xor", "c.xor {RD_RS1_P}, {RS2_P}", &[Logic]),
    (RvC, "c.or", "c.or {RD_RS1_P}, {RS2_P}", &[Logic]),
    (RvC, "c.and", "c.and {RD_RS1_P}, {RS2_P}", &[Logic]),
    (RvC, "c.andi", "c.andi {RD_RS1_P}, {IMM_6}", &[Logic]),
    (RvC, "c.slli", "c.slli {RD_RS1_N0}, {NZUIMM_5}", &[Shift]),
    (RvC, "c.srli", "c.srli {RD_RS1_P}, {NZUIMM_5}", &[Shift]),
    (RvC, "c.srai", "c.srai {RD_RS1_P}, {NZUIMM_5}", &[Shift]),
    (RvC, "c.j", "c.j {LABEL}", &[Jump]),
    (RvC, "c.beqz", "c.beqz {RS1_P}, {LABEL}", &[Branch]),
    (RvC, "c.bnez", "c.bnez {RS1_P}, {LABEL}", &[Branch]),
    (RvC, "c.jr", "c.jr {RS1_N0}", &[Jump]),
    (RvC, "c.jalr", "c.jalr {RS1_N0}", &[Jump]),
    (Rv32C, "c.jal", "c.jal {LABEL}", &[Jump]),
    (Rv64C, "c.addiw", "c.addiw {RD_RS1_N0}, {IMM_6}", &[Arith]),
    (Rv64C, "c.addw", "c.addw {RD_RS1_P}, {RS2_P}", &[Arith]),
    (Rv64C, "c.subw", "c.subw {RD_RS1_P}, {RS2_P}", &[Arith]),
];
