//! Oracle images
//!
//! `NopImageBuilder` assembles `header + nop × capacity + footer` into an
//! ELF the oracle boots from. `ElfImage` reads it back: loadable segments,
//! the entry point, and the `main` symbol where the instruction body starts.

use elf::{endian::AnyEndian, ElfBytes};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::TemplateInstance;
use crate::encoder::Toolchain;
use crate::error::{Result, SynthError};

/// Symbol marking the start of the instruction body.
pub const BODY_SYMBOL: &str = "main";

pub const LINKER_SCRIPT: &str = r#"OUTPUT_ARCH("riscv")
ENTRY(_start)

SECTIONS
{
  . = 0x80000000;
  .text.init : { *(.text.init) }
  . = ALIGN(0x1000);
  .tohost : { *(.tohost) }
  . = ALIGN(0x1000);
  .text : { *(.text) }
  . = ALIGN(0x1000);
  .data : { *(.data) }
  .bss : { *(.bss) }
  _end = .;
}
"#;

#[derive(Debug, Clone)]
pub struct LoadSegment {
    pub vaddr: u64,
    pub data: Vec<u8>,
    /// Bytes past `data.len()` up to this size are zero-filled.
    pub mem_size: u64,
}

#[derive(Debug, Clone)]
pub struct TextSection {
    pub name: String,
    pub virtual_addr: u64,
    pub data: Vec<u8>,
}

/// A parsed RISC-V ELF executable.
#[derive(Debug, Clone)]
pub struct ElfImage {
    pub entry: u64,
    /// 32 or 64, from the ELF class.
    pub xlen: u32,
    pub segments: Vec<LoadSegment>,
    pub symbols: BTreeMap<String, u64>,
    pub text_sections: Vec<TextSection>,
}

fn image_err(path: &Path, e: impl std::fmt::Display) -> SynthError {
    SynthError::SimulatorInitFailure(format!("{}: {}", path.display(), e))
}

impl ElfImage {
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read(path)?;
        Self::parse(&data).map_err(|e| image_err(path, e))
    }

    pub fn parse(file_data: &[u8]) -> std::result::Result<Self, String> {
        let elf = ElfBytes::<AnyEndian>::minimal_parse(file_data).map_err(|e| e.to_string())?;

        if elf.ehdr.e_machine != elf::abi::EM_RISCV {
            return Err(format!(
                "not a RISC-V binary (machine type: {})",
                elf.ehdr.e_machine
            ));
        }

        let mut segments = Vec::new();
        if let Some(phdrs) = elf.segments() {
            for ph in phdrs.iter().filter(|p| p.p_type == elf::abi::PT_LOAD) {
                let start = ph.p_offset as usize;
                let end = start + ph.p_filesz as usize;
                let bytes = file_data
                    .get(start..end)
                    .ok_or_else(|| format!("segment at 0x{:x} extends beyond file", ph.p_vaddr))?;
                segments.push(LoadSegment {
                    vaddr: ph.p_vaddr,
                    data: bytes.to_vec(),
                    mem_size: ph.p_memsz,
                });
            }
        }

        let mut symbols = BTreeMap::new();
        if let Some((symtab, strtab)) = elf.symbol_table().map_err(|e| e.to_string())? {
            for sym in symtab.iter() {
                let name = strtab.get(sym.st_name as usize).map_err(|e| e.to_string())?;
                if !name.is_empty() {
                    symbols.insert(name.to_string(), sym.st_value);
                }
            }
        }

        let mut text_sections = Vec::new();
        let (shdrs, strtab) = elf
            .section_headers_with_strtab()
            .map_err(|e| e.to_string())?;
        if let (Some(shdrs), Some(strtab)) = (shdrs, strtab) {
            for sh in shdrs.iter() {
                if sh.sh_flags & elf::abi::SHF_EXECINSTR as u64 == 0 || sh.sh_size == 0 {
                    continue;
                }
                let name = strtab.get(sh.sh_name as usize).map_err(|e| e.to_string())?;
                let (data, _) = elf.section_data(&sh).map_err(|e| e.to_string())?;
                text_sections.push(TextSection {
                    name: name.to_string(),
                    virtual_addr: sh.sh_addr,
                    data: data.to_vec(),
                });
            }
        }

        let xlen = match elf.ehdr.class {
            elf::file::Class::ELF32 => 32,
            elf::file::Class::ELF64 => 64,
        };
        Ok(Self {
            entry: elf.ehdr.e_entry,
            xlen,
            segments,
            symbols,
            text_sections,
        })
    }

    pub fn symbol(&self, name: &str) -> Option<u64> {
        self.symbols.get(name).copied()
    }

    /// Address of the instruction body.
    pub fn body_start(&self) -> Option<u64> {
        self.symbol(BODY_SYMBOL)
    }
}

/// `capacity` NOP lines for the oracle body.
pub fn nop_body(capacity: usize) -> String {
    "    nop\n".repeat(capacity)
}

/// Builds NOP-padded images through the external toolchain.
pub struct NopImageBuilder<'a> {
    toolchain: &'a Toolchain,
}

impl<'a> NopImageBuilder<'a> {
    pub fn new(toolchain: &'a Toolchain) -> Self {
        Self { toolchain }
    }

    /// Assemble and link an image with `capacity` NOP slots into `dir`.
    pub fn build(&self, instance: &TemplateInstance, capacity: usize, dir: &Path) -> Result<PathBuf> {
        let source = dir.join("nop_template.S");
        let object = dir.join("nop_template.o");
        let script = dir.join("link.ld");
        let output = dir.join("nop_template.elf");

        let mut text = String::new();
        text.push_str(&instance.header);
        text.push_str(&nop_body(capacity));
        text.push_str(&instance.footer);
        fs::write(&source, text)?;
        fs::write(&script, LINKER_SCRIPT)?;

        let init_failure = |e: SynthError| match e {
            SynthError::Template(msg) => SynthError::SimulatorInitFailure(msg),
            other => other,
        };
        self.toolchain
            .assemble_file(&source, &object, &instance.isa)
            .map_err(init_failure)?;
        self.toolchain
            .link(&object, &script, &output)
            .map_err(init_failure)?;
        debug!(path = %output.display(), capacity, "built nop image");
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nop_body_line_count() {
        let body = nop_body(3);
        assert_eq!(body.lines().count(), 3);
        assert!(body.lines().all(|l| l.trim() == "nop"));
    }

    #[test]
    fn test_rejects_non_elf() {
        assert!(ElfImage::parse(b"not an elf file at all").is_err());
    }

    #[test]
    fn test_linker_script_entry() {
        assert!(LINKER_SCRIPT.contains("ENTRY(_start)"));
        assert!(LINKER_SCRIPT.contains(".tohost"));
    }

    #[test]
    fn test_missing_image_is_init_failure() {
        let dir = tempfile::tempdir().unwrap();
        let err = ElfImage::load(&dir.path().join("absent.elf")).unwrap_err();
        assert!(matches!(err, SynthError::Io(_)));
    }
}
