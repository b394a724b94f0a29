//! Assembly templates
//!
//! A template supplies the text around a generated body: machine-mode setup,
//! a trap handler that skips the faulting instruction, randomized register
//! state, and the `tohost` exit sequence. Every seed gets a fresh
//! `TemplateInstance`, so register seeds differ between files.

pub mod image;

use rand::seq::IndexedRandom;
use rand::Rng;
use rand_chacha::ChaCha8Rng;

use crate::config::TargetArch;
use crate::error::{Result, SynthError};
use crate::profile::ExtensionProfile;

pub use image::{ElfImage, NopImageBuilder};

/// Bytes in the `mem_region` data block.
pub const MEM_REGION_BYTES: usize = 8192;

const VALID_ROUNDING_MODES: [u8; 5] = [0, 1, 2, 3, 4];
const RESERVED_ROUNDING_MODES: [u8; 3] = [5, 6, 7];

/// Host-communication words and the start of the data region.
const TOHOST_SECTION: &str = "\
.section .tohost, \"aw\", @progbits
.align 6
.globl tohost
tohost: .dword 0
.align 6
.globl fromhost
fromhost: .dword 0

.section .data
.align 12
mem_region:
";

fn push_line(buf: &mut String, line: &str) {
    buf.push_str(line);
    buf.push('\n');
}

/// Header, footer and ISA for one seed file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateInstance {
    pub header: String,
    pub footer: String,
    pub isa: String,
    pub arch_bits: u32,
}

impl TemplateInstance {
    /// Full assembly file for `body`. Labels stay in column zero, explicit
    /// compressed mnemonics are bracketed by `.option rvc`/`.option norvc`.
    pub fn complete(&self, body: &[String]) -> String {
        let mut out = String::with_capacity(self.header.len() + self.footer.len() + body.len() * 24);
        out.push_str(&self.header);
        let mut in_rvc = false;
        for line in body {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let compressed = line.starts_with("c.");
            if compressed != in_rvc {
                out.push_str(if compressed { ".option rvc\n" } else { ".option norvc\n" });
                in_rvc = compressed;
            }
            if !line.ends_with(':') {
                out.push_str("    ");
            }
            out.push_str(line);
            out.push('\n');
        }
        if in_rvc {
            out.push_str(".option norvc\n");
        }
        out.push_str(&self.footer);
        out
    }

    /// Contents of the `.isa_info` file written next to the seeds.
    pub fn sidecar(&self) -> String {
        format!("ISA={}\nARCH_BITS={}\n", self.isa, self.arch_bits)
    }
}

/// Source of per-seed templates.
pub trait TemplateProvider: Send + Sync {
    fn instantiate(
        &self,
        target: TargetArch,
        profile: &ExtensionProfile,
        rng: &mut ChaCha8Rng,
    ) -> Result<TemplateInstance>;

    fn name(&self) -> &'static str;
}

/// Machine-mode template used when no external provider is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinTemplate;

impl BuiltinTemplate {
    fn random_value(rng: &mut ChaCha8Rng, bits: u32) -> u64 {
        if bits == 32 {
            rng.random::<u32>() as u64
        } else {
            rng.random::<u64>()
        }
    }

    fn header(rng: &mut ChaCha8Rng, bits: u32, float: bool) -> Result<String> {
        let mut h = String::new();
        push_line(&mut h, ".section .text.init, \"ax\", @progbits");
        push_line(&mut h, ".globl _start");
        push_line(&mut h, ".option norvc");
        push_line(&mut h, "_start:");
        push_line(&mut h, "    la t0, trap_vector");
        push_line(&mut h, "    csrw mtvec, t0");

        if float {
            // mstatus.FS = dirty
            push_line(&mut h, "    li t0, 0x6000");
            push_line(&mut h, "    csrs mstatus, t0");
            let mv = if bits == 32 { "fmv.w.x" } else { "fmv.d.x" };
            for f in 0..32 {
                let v = Self::random_value(rng, bits);
                push_line(&mut h, &format!("    li t0, 0x{:x}", v));
                push_line(&mut h, &format!("    {} f{}, t0", mv, f));
            }
            let pool: &[u8] = if rng.random_bool(0.95) {
                &VALID_ROUNDING_MODES
            } else {
                &RESERVED_ROUNDING_MODES
            };
            let rm = pool
                .choose(rng)
                .ok_or_else(|| SynthError::Template("empty rounding-mode pool".to_string()))?;
            push_line(&mut h, &format!("    fsrmi {}", rm));
        }

        for x in 1..32 {
            let v = Self::random_value(rng, bits);
            push_line(&mut h, &format!("    li x{}, 0x{:x}", x, v));
        }
        push_line(&mut h, "    la sp, mem_region");
        push_line(&mut h, "    addi sp, sp, 1024");
        // t6 addresses the middle of mem_region, so both offset signs stay inside
        push_line(&mut h, "    la t6, mem_region");
        push_line(&mut h, "    li t5, 4096");
        push_line(&mut h, "    add t6, t6, t5");
        push_line(&mut h, "    j main");
        push_line(&mut h, "");
        push_line(&mut h, ".align 2");
        push_line(&mut h, "trap_vector:");
        push_line(&mut h, "    csrr t5, mepc");
        push_line(&mut h, "    addi t5, t5, 4");
        push_line(&mut h, "    csrw mepc, t5");
        push_line(&mut h, "    mret");
        push_line(&mut h, "");
        push_line(&mut h, ".section .text, \"ax\", @progbits");
        push_line(&mut h, ".option norvc");
        push_line(&mut h, ".align 2");
        push_line(&mut h, "main:");
        Ok(h)
    }

    fn footer(rng: &mut ChaCha8Rng, bits: u32) -> String {
        let store = if bits == 32 { "sw" } else { "sd" };
        let mut f = String::new();
        push_line(&mut f, ".option norvc");
        push_line(&mut f, "write_tohost:");
        push_line(&mut f, "    li t0, 1");
        push_line(&mut f, "    la t1, tohost");
        push_line(&mut f, &format!("    {} t0, 0(t1)", store));
        push_line(&mut f, "    j write_tohost");
        push_line(&mut f, "");
        f.push_str(TOHOST_SECTION);
        for _ in 0..MEM_REGION_BYTES / 64 {
            let words: Vec<String> = (0..8).map(|_| format!("0x{:016x}", rng.random::<u64>())).collect();
            push_line(&mut f, &format!("    .dword {}", words.join(", ")));
        }
        push_line(&mut f, "mem_region_end:");
        f
    }
}

impl TemplateProvider for BuiltinTemplate {
    fn instantiate(
        &self,
        target: TargetArch,
        profile: &ExtensionProfile,
        rng: &mut ChaCha8Rng,
    ) -> Result<TemplateInstance> {
        let bits = target.arch_bits();
        let header = Self::header(rng, bits, profile.has_float())?;
        let footer = Self::footer(rng, bits);
        Ok(TemplateInstance {
            header,
            footer,
            isa: target.isa_string(profile.has_compressed()),
            arch_bits: bits,
        })
    }

    fn name(&self) -> &'static str {
        "builtin"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn instance(target: TargetArch, profile: &str) -> TemplateInstance {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let profile = ExtensionProfile::builtin(profile).unwrap();
        BuiltinTemplate.instantiate(target, &profile, &mut rng).unwrap()
    }

    #[test]
    fn test_header_layout() {
        let t = instance(TargetArch::Xs, "general");
        assert!(t.header.contains("_start:"));
        assert!(t.header.contains("csrw mtvec, t0"));
        assert!(t.header.contains("fsrmi"));
        assert!(t.header.contains("fmv.d.x f31, t0"));
        assert!(t.header.trim_end().ends_with("main:"));
        assert!(t.footer.contains("tohost: .dword 0"));
        assert_eq!(t.arch_bits, 64);
    }

    #[test]
    fn test_footer_layout() {
        let t = instance(TargetArch::Xs, "integer");
        assert!(t.footer.starts_with(
            ".option norvc\nwrite_tohost:\n    li t0, 1\n    la t1, tohost\n    sd t0, 0(t1)\n    j write_tohost\n\n.section .tohost"
        ));
        assert!(t.footer.contains("fromhost: .dword 0\n\n.section .data\n.align 12\nmem_region:\n    .dword 0x"));
        assert!(t.footer.ends_with("mem_region_end:\n"));
        assert!(t.header.ends_with(".align 2\nmain:\n"));
    }

    #[test]
    fn test_mem_region_size() {
        let t = instance(TargetArch::Xs, "integer");
        let dwords: usize = t
            .footer
            .lines()
            .filter_map(|l| l.trim().strip_prefix(".dword "))
            .filter(|l| l.contains(','))
            .map(|l| l.split(',').count())
            .sum();
        assert_eq!(dwords * 8, MEM_REGION_BYTES);
    }

    #[test]
    fn test_integer_profile_skips_float_setup() {
        let t = instance(TargetArch::Xs, "integer");
        assert!(!t.header.contains("fmv"));
        assert!(!t.header.contains("fsrmi"));
        assert!(t.isa.starts_with("rv64g_"));
    }

    #[test]
    fn test_rv32_values_and_moves() {
        let t = instance(TargetArch::Rv32, "rv32");
        assert_eq!(t.arch_bits, 32);
        assert!(t.footer.contains("sw t0, 0(t1)"));
        for line in t.header.lines().filter(|l| l.trim_start().starts_with("li x")) {
            let hex = line.rsplit("0x").next().unwrap();
            assert!(u64::from_str_radix(hex, 16).unwrap() <= u32::MAX as u64);
        }
    }

    #[test]
    fn test_complete_wraps_compressed_runs() {
        let t = TemplateInstance {
            header: "H\n".to_string(),
            footer: "F\n".to_string(),
            isa: "rv64gc".to_string(),
            arch_bits: 64,
        };
        let body: Vec<String> = ["add a0, a1, a2", "c.mv a0, a1", "c.nop", "fwd_0:", "nop"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let text = t.complete(&body);
        assert_eq!(
            text,
            "H\n    add a0, a1, a2\n.option rvc\n    c.mv a0, a1\n    c.nop\n.option norvc\nfwd_0:\n    nop\nF\n"
        );
    }

    #[test]
    fn test_sidecar_format() {
        let t = instance(TargetArch::Cva6, "cva6");
        assert_eq!(
            t.sidecar(),
            format!("ISA={}\nARCH_BITS=64\n", TargetArch::Cva6.isa_string(true))
        );
    }

    #[test]
    fn test_instances_differ_per_seed() {
        let profile = ExtensionProfile::builtin("base").unwrap();
        let a = BuiltinTemplate
            .instantiate(TargetArch::Nts, &profile, &mut ChaCha8Rng::seed_from_u64(1))
            .unwrap();
        let b = BuiltinTemplate
            .instantiate(TargetArch::Nts, &profile, &mut ChaCha8Rng::seed_from_u64(2))
            .unwrap();
        assert_ne!(a.header, b.header);
    }
}
