//! Control and status register names and addresses.

/// Known CSRs as (name, address).
pub const CSR_TABLE: &[(&str, u16)] = &[
    ("fflags", 0x001),
    ("frm", 0x002),
    ("fcsr", 0x003),
    ("cycle", 0xC00),
    ("time", 0xC01),
    ("instret", 0xC02),
    ("hpmcounter3", 0xC03),
    ("hpmcounter4", 0xC04),
    ("hpmcounter5", 0xC05),
    ("hpmcounter6", 0xC06),
    ("sstatus", 0x100),
    ("sie", 0x104),
    ("stvec", 0x105),
    ("scounteren", 0x106),
    ("senvcfg", 0x10A),
    ("sscratch", 0x140),
    ("sepc", 0x141),
    ("scause", 0x142),
    ("stval", 0x143),
    ("sip", 0x144),
    ("satp", 0x180),
    ("mvendorid", 0xF11),
    ("marchid", 0xF12),
    ("mimpid", 0xF13),
    ("mhartid", 0xF14),
    ("mconfigptr", 0xF15),
    ("mstatus", 0x300),
    ("misa", 0x301),
    ("medeleg", 0x302),
    ("mideleg", 0x303),
    ("mie", 0x304),
    ("mtvec", 0x305),
    ("mcounteren", 0x306),
    ("menvcfg", 0x30A),
    ("mcountinhibit", 0x320),
    ("mscratch", 0x340),
    ("mepc", 0x341),
    ("mcause", 0x342),
    ("mtval", 0x343),
    ("mip", 0x344),
    ("mtinst", 0x34A),
    ("mtval2", 0x34B),
    ("pmpcfg0", 0x3A0),
    ("pmpcfg1", 0x3A1),
    ("pmpcfg2", 0x3A2),
    ("pmpaddr0", 0x3B0),
    ("pmpaddr1", 0x3B1),
    ("pmpaddr2", 0x3B2),
    ("mseccfg", 0x747),
    ("dcsr", 0x7B0),
    ("dpc", 0x7B1),
    ("dscratch0", 0x7B2),
    ("mcycle", 0xB00),
    ("minstret", 0xB02),
    ("mhpmcounter3", 0xB03),
    ("mhpmcounter4", 0xB04),
    ("mhpmcounter5", 0xB05),
    ("mhpmcounter6", 0xB06),
];

/// CSRs the generator may pick as operands. Trap-flow registers (mstatus,
/// mtvec, mepc, mip) are left out so random writes cannot derail the template.
pub const GENERATION_POOL: &[&str] = &[
    "fflags",
    "frm",
    "fcsr",
    "cycle",
    "time",
    "instret",
    "hpmcounter3",
    "hpmcounter4",
    "hpmcounter5",
    "hpmcounter6",
    "sstatus",
    "sie",
    "stvec",
    "scounteren",
    "senvcfg",
    "sscratch",
    "sepc",
    "scause",
    "stval",
    "sip",
    "satp",
    "mvendorid",
    "marchid",
    "mimpid",
    "mhartid",
    "mconfigptr",
    "misa",
    "medeleg",
    "mideleg",
    "mie",
    "mcounteren",
    "mscratch",
    "mcause",
    "mtval",
    "mtinst",
    "mtval2",
    "menvcfg",
    "pmpcfg0",
    "pmpaddr0",
    "pmpcfg1",
    "pmpaddr1",
    "pmpcfg2",
    "pmpaddr2",
    "mcycle",
    "minstret",
    "mhpmcounter3",
    "mhpmcounter4",
    "mhpmcounter5",
    "mhpmcounter6",
    "mcountinhibit",
];

/// CSRs absent or different on RV32 targets.
pub const RV32_UNSUPPORTED: &[&str] = &[
    "senvcfg",
    "mconfigptr",
    "mseccfg",
    "mcountinhibit",
    "cycle",
    "mcounteren",
    "minstret",
];

/// Resolve a CSR operand given by name or as a numeric literal.
pub fn csr_address(name: &str) -> Option<u16> {
    let name = name.trim();
    if let Some((_, addr)) = CSR_TABLE.iter().find(|(n, _)| n.eq_ignore_ascii_case(name)) {
        return Some(*addr);
    }
    let parsed = match name.strip_prefix("0x").or_else(|| name.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16).ok(),
        None => name.parse::<u16>().ok(),
    };
    parsed.filter(|a| *a < 0x1000)
}

pub fn csr_name(addr: u16) -> Option<&'static str> {
    CSR_TABLE.iter().find(|(_, a)| *a == addr).map(|(n, _)| *n)
}

/// CSRs that are read-only by address encoding (top two bits set).
pub fn is_read_only(addr: u16) -> bool {
    (addr >> 10) & 0b11 == 0b11
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_by_name_and_number() {
        assert_eq!(csr_address("mscratch"), Some(0x340));
        assert_eq!(csr_address("SATP"), Some(0x180));
        assert_eq!(csr_address("0x7b0"), Some(0x7B0));
        assert_eq!(csr_address("768"), Some(0x300));
        assert_eq!(csr_address("0x1000"), None);
        assert_eq!(csr_address("nosuchcsr"), None);
    }

    #[test]
    fn test_generation_pool_is_resolvable() {
        for name in GENERATION_POOL {
            assert!(csr_address(name).is_some(), "{} has no address", name);
        }
        assert!(!GENERATION_POOL.contains(&"mtvec"));
        assert!(!GENERATION_POOL.contains(&"mepc"));
    }

    #[test]
    fn test_read_only_encoding() {
        assert!(is_read_only(0xC00));
        assert!(is_read_only(0xF14));
        assert!(!is_read_only(0x340));
        assert_eq!(csr_name(0x341), Some("mepc"));
    }
}
