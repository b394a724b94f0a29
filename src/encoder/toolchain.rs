//! External GNU toolchain wrapper
//!
//! Used as the encoding fallback for text the table encoder rejects
//! (multi-instruction pseudos, exotic operand forms) and to build the
//! NOP-padded oracle image.

use crate::error::{Result, SynthError};
use std::fs;
use std::path::Path;
use std::process::{Command, Output};
use tracing::debug;

pub const DEFAULT_PREFIX: &str = "riscv64-unknown-elf-";
pub const DEFAULT_MARCH: &str = "rv64imafdcv_zicsr_zifencei_zba_zbb_zbc_zbs_zfh";

const TOOLS: [&str; 4] = ["as", "objcopy", "ld", "objdump"];

#[derive(Clone, Debug)]
pub struct Toolchain {
    prefix: String,
    march: String,
}

impl Default for Toolchain {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX)
    }
}

impl Toolchain {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            march: DEFAULT_MARCH.to_string(),
        }
    }

    pub fn with_march(mut self, march: &str) -> Self {
        self.march = march.to_string();
        self
    }

    pub fn tool(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    /// Run every tool with `--version`; the first one that cannot be
    /// executed is reported as missing.
    pub fn verify(&self) -> Result<()> {
        for name in TOOLS {
            let tool = self.tool(name);
            let ok = Command::new(&tool)
                .arg("--version")
                .output()
                .map(|o| o.status.success())
                .unwrap_or(false);
            if !ok {
                return Err(SynthError::ToolchainMissing { tool });
            }
            debug!(tool = %tool, "toolchain binary found");
        }
        Ok(())
    }

    fn run(&self, tool: &str, args: &[&str], cwd: &Path) -> Result<Output> {
        let output = Command::new(self.tool(tool))
            .args(args)
            .current_dir(cwd)
            .output()
            .map_err(|_| SynthError::ToolchainMissing {
                tool: self.tool(tool),
            })?;
        Ok(output)
    }

    /// Assemble `source` into an object file with the given `-march`.
    pub fn assemble_file(&self, source: &Path, object: &Path, march: &str) -> Result<()> {
        let cwd = source.parent().unwrap_or(Path::new("."));
        let march_arg = format!("-march={}", march);
        let src = source.to_string_lossy();
        let obj = object.to_string_lossy();
        let out = self.run("as", &[&march_arg, "-o", &obj, &src], cwd)?;
        if !out.status.success() {
            return Err(SynthError::Template(format!(
                "assembling {} failed: {}",
                source.display(),
                String::from_utf8_lossy(&out.stderr).trim()
            )));
        }
        Ok(())
    }

    /// Link `object` with linker script `script` into `output`.
    pub fn link(&self, object: &Path, script: &Path, output: &Path) -> Result<()> {
        let cwd = object.parent().unwrap_or(Path::new("."));
        let script_arg = script.to_string_lossy();
        let obj = object.to_string_lossy();
        let elf = output.to_string_lossy();
        let out = self.run("ld", &["-T", &script_arg, "-o", &elf, &obj], cwd)?;
        if !out.status.success() {
            return Err(SynthError::Template(format!(
                "linking {} failed: {}",
                output.display(),
                String::from_utf8_lossy(&out.stderr).trim()
            )));
        }
        Ok(())
    }

    /// Assemble a single line in a scratch directory and return the raw
    /// `.text` bytes.
    fn assemble_bytes(&self, instr: &str) -> Result<Vec<u8>> {
        let dir = tempfile::tempdir()?;
        let source = dir.path().join("inst.s");
        let object = dir.path().join("inst.o");
        let binary = dir.path().join("inst.bin");

        let rvc = if instr.trim_start().starts_with("c.") {
            "rvc"
        } else {
            "norvc"
        };
        fs::write(&source, format!(".text\n.option {}\n    {}\n", rvc, instr))?;

        let march_arg = format!("-march={}", self.march);
        let out = self.run(
            "as",
            &[&march_arg, "-o", "inst.o", "inst.s"],
            dir.path(),
        )?;
        if !out.status.success() {
            return Err(SynthError::encoding(
                instr,
                String::from_utf8_lossy(&out.stderr).trim().to_string(),
            ));
        }
        let out = self.run(
            "objcopy",
            &["-O", "binary", "inst.o", "inst.bin"],
            dir.path(),
        )?;
        if !out.status.success() || !object.exists() {
            return Err(SynthError::encoding(instr, "objcopy failed"));
        }
        let bytes = fs::read(&binary)?;
        if bytes.is_empty() {
            return Err(SynthError::encoding(instr, "assembler produced no code"));
        }
        debug!(instr, len = bytes.len(), "assembled through toolchain");
        Ok(bytes)
    }

    /// Encode a single instruction. A 2-byte result is zero-extended.
    pub fn assemble_one(&self, instr: &str) -> Result<u32> {
        let bytes = self.assemble_bytes(instr)?;
        let units = split_units(&bytes);
        match units.as_slice() {
            [single] => Ok(*single),
            _ => Err(SynthError::encoding(
                instr,
                format!("expands to {} instructions", units.len()),
            )),
        }
    }

    /// Encode a possibly multi-instruction pseudo, returning every unit.
    pub fn assemble_sequence(&self, instr: &str) -> Result<Vec<u32>> {
        let bytes = self.assemble_bytes(instr)?;
        Ok(split_units(&bytes))
    }
}

/// Split a little-endian code buffer into 2- and 4-byte instruction units.
pub fn split_units(bytes: &[u8]) -> Vec<u32> {
    let mut units = Vec::new();
    let mut pos = 0;
    while pos + 2 <= bytes.len() {
        let low = u16::from_le_bytes([bytes[pos], bytes[pos + 1]]) as u32;
        if low & 0b11 != 0b11 {
            units.push(low);
            pos += 2;
        } else if pos + 4 <= bytes.len() {
            let high = u16::from_le_bytes([bytes[pos + 2], bytes[pos + 3]]) as u32;
            units.push(low | (high << 16));
            pos += 4;
        } else {
            break;
        }
    }
    units
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_units_mixed_widths() {
        // c.nop, addi a0,a0,1, c.mv a0,a1
        let bytes = [0x01, 0x00, 0x13, 0x05, 0x15, 0x00, 0x2e, 0x85];
        assert_eq!(split_units(&bytes), vec![0x0001, 0x0015_0513, 0x852e]);
    }

    #[test]
    fn test_split_units_drops_truncated_tail() {
        let bytes = [0x13, 0x05, 0x15];
        assert!(split_units(&bytes).is_empty());
    }

    #[test]
    fn test_missing_toolchain_is_reported() {
        let tc = Toolchain::new("definitely-not-a-real-prefix-");
        match tc.verify() {
            Err(SynthError::ToolchainMissing { tool }) => {
                assert_eq!(tool, "definitely-not-a-real-prefix-as")
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(tc.verify().unwrap_err().is_fatal());
    }

    #[test]
    fn test_tool_names_use_prefix() {
        let tc = Toolchain::default();
        assert_eq!(tc.tool("objcopy"), "riscv64-unknown-elf-objcopy");
        assert_eq!(tc.march, DEFAULT_MARCH);
    }
}
