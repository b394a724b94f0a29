//! Generator configuration
//!
//! `GeneratorConfig` is built from defaults, optionally overlaid by a JSON
//! file, and finally by explicit command-line flags.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::cache::{DEFAULT_FALSE_POSITIVE_RATE, DEFAULT_SAFETY_FACTOR};
use crate::encoder::toolchain::DEFAULT_PREFIX;
use crate::error::{Result, SynthError};
use crate::oracle::OracleKind;

/// Device-under-test family the seeds are generated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetArch {
    /// XiangShan
    #[default]
    Xs,
    /// NutShell
    Nts,
    Cva6,
    /// Any RV32 core
    Rv32,
}

impl TargetArch {
    pub fn arch_bits(&self) -> u32 {
        match self {
            TargetArch::Rv32 => 32,
            _ => 64,
        }
    }

    pub fn default_profile(&self) -> &'static str {
        match self {
            TargetArch::Cva6 => "cva6",
            TargetArch::Rv32 => "rv32",
            _ => "general",
        }
    }

    /// ISA string handed to the assembler and the oracle.
    pub fn isa_string(&self, compressed: bool) -> String {
        let bits = self.arch_bits();
        match self {
            TargetArch::Cva6 => format!(
                "rv{}gc_zicsr_zifencei_zba_zbb_zbc_zbs_zbkb_zbkc_zbkx_zkne_zknd_zknh",
                bits
            ),
            _ => format!(
                "rv{}{}_zicsr_zifencei_zfh_zba_zbb_zbkc_zbc_zbkb_zbs_zmmul_zknh_zkne_zknd_zbkx_zfa",
                bits,
                if compressed { "gc" } else { "g" }
            ),
        }
    }
}

impl fmt::Display for TargetArch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetArch::Xs => write!(f, "xs"),
            TargetArch::Nts => write!(f, "nts"),
            TargetArch::Cva6 => write!(f, "cva6"),
            TargetArch::Rv32 => write!(f, "rv32"),
        }
    }
}

impl FromStr for TargetArch {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "xs" | "xiangshan" => Ok(TargetArch::Xs),
            "nts" | "nutshell" => Ok(TargetArch::Nts),
            "cva6" => Ok(TargetArch::Cva6),
            "rv32" => Ok(TargetArch::Rv32),
            _ => Err(format!(
                "Unknown target: '{}'. Valid options: xs, nts, cva6, rv32",
                s
            )),
        }
    }
}

/// How seeds are run in parallel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Worker threads sharing one in-process filter
    #[default]
    Thread,
    /// One child process per seed, filter in shared memory
    Process,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Thread => write!(f, "thread"),
            ExecutionMode::Process => write!(f, "process"),
        }
    }
}

impl FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "thread" | "threads" => Ok(ExecutionMode::Thread),
            "process" | "processes" => Ok(ExecutionMode::Process),
            _ => Err(format!(
                "Unknown execution mode: '{}'. Valid options: thread, process",
                s
            )),
        }
    }
}

/// Per-candidate validation traces. `path` is a directory; each seed
/// writes its own `seeds_{i}_.trace` inside it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceConfig {
    pub path: PathBuf,
    /// Only record accepted instructions.
    #[serde(default)]
    pub accepted_only: bool,
}

/// Full configuration of a generation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Logical instruction slots per seed.
    pub instr_number: usize,
    pub seeds: usize,
    pub max_workers: usize,
    pub out_dir: PathBuf,
    pub target: TargetArch,
    /// Extension profile name; `None` uses the target's default.
    pub profile: Option<String>,
    /// Validate candidates against the oracle.
    pub eliminate: bool,
    pub oracle: OracleKind,
    pub spike_library: Option<PathBuf>,
    pub toolchain_prefix: String,
    pub use_toolchain: bool,
    pub false_positive_rate: f64,
    pub safety_factor: f64,
    /// Retry budget per logical slot.
    pub max_mutate_time: usize,
    /// Seconds of deadline per requested instruction.
    pub timeout_per_instr: f64,
    pub max_retry_rounds: usize,
    /// Extra NOP slots in the oracle image beyond `instr_number`.
    pub redundancy_margin: usize,
    pub base_seed: Option<u64>,
    pub exclude_ext: Vec<String>,
    pub debug_trace: Option<TraceConfig>,
    pub bug_registry: Option<PathBuf>,
    pub execution: ExecutionMode,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            instr_number: 200,
            seeds: 10,
            max_workers: num_cpus::get(),
            out_dir: PathBuf::from("out-seeds"),
            target: TargetArch::default(),
            profile: None,
            eliminate: true,
            oracle: OracleKind::default(),
            spike_library: None,
            toolchain_prefix: DEFAULT_PREFIX.to_string(),
            use_toolchain: true,
            false_positive_rate: DEFAULT_FALSE_POSITIVE_RATE,
            safety_factor: DEFAULT_SAFETY_FACTOR,
            max_mutate_time: 10,
            timeout_per_instr: 0.8,
            max_retry_rounds: 5,
            redundancy_margin: 64,
            base_seed: None,
            exclude_ext: Vec::new(),
            debug_trace: None,
            bug_registry: None,
            execution: ExecutionMode::default(),
        }
    }
}

impl GeneratorConfig {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text)
            .map_err(|e| SynthError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn with_instr_number(mut self, n: usize) -> Self {
        self.instr_number = n;
        self
    }

    pub fn with_seeds(mut self, seeds: usize) -> Self {
        self.seeds = seeds;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.max_workers = workers.max(1);
        self
    }

    pub fn with_out_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.out_dir = dir.into();
        self
    }

    pub fn with_target(mut self, target: TargetArch) -> Self {
        self.target = target;
        self
    }

    pub fn with_profile(mut self, profile: &str) -> Self {
        self.profile = Some(profile.to_string());
        self
    }

    pub fn with_eliminate(mut self, eliminate: bool) -> Self {
        self.eliminate = eliminate;
        self
    }

    pub fn with_oracle(mut self, oracle: OracleKind) -> Self {
        self.oracle = oracle;
        self
    }

    pub fn with_toolchain(mut self, enabled: bool) -> Self {
        self.use_toolchain = enabled;
        self
    }

    pub fn with_seed_option(mut self, seed: Option<u64>) -> Self {
        self.base_seed = seed;
        self
    }

    pub fn with_execution(mut self, mode: ExecutionMode) -> Self {
        self.execution = mode;
        self
    }

    pub fn with_max_mutate_time(mut self, n: usize) -> Self {
        self.max_mutate_time = n.max(1);
        self
    }

    pub fn with_trace(mut self, trace: TraceConfig) -> Self {
        self.debug_trace = Some(trace);
        self
    }

    pub fn profile_name(&self) -> &str {
        self.profile
            .as_deref()
            .unwrap_or_else(|| self.target.default_profile())
    }

    pub fn arch_bits(&self) -> u32 {
        self.target.arch_bits()
    }

    /// NOP slots in the oracle image.
    pub fn capacity(&self) -> usize {
        self.instr_number + self.redundancy_margin
    }

    /// Bytes the instruction body is padded to.
    pub fn byte_budget(&self) -> usize {
        self.capacity() * 4
    }

    pub fn seed_deadline(&self) -> Duration {
        Duration::from_secs_f64(self.instr_number as f64 * self.timeout_per_instr)
    }

    /// Per-seed RNG seed: `base_seed + index`, when a base seed is set.
    pub fn seed_for(&self, index: usize) -> Option<u64> {
        self.base_seed.map(|b| b.wrapping_add(index as u64))
    }

    pub fn validate(&self) -> Result<()> {
        if self.instr_number == 0 {
            return Err(SynthError::Config("instr_number must be positive".to_string()));
        }
        if self.seeds == 0 {
            return Err(SynthError::Config("seeds must be positive".to_string()));
        }
        if !(self.false_positive_rate > 0.0 && self.false_positive_rate < 1.0) {
            return Err(SynthError::Config(format!(
                "false_positive_rate {} is not in (0, 1)",
                self.false_positive_rate
            )));
        }
        if self.safety_factor <= 0.0 {
            return Err(SynthError::Config("safety_factor must be positive".to_string()));
        }
        if self.timeout_per_instr <= 0.0 {
            return Err(SynthError::Config("timeout_per_instr must be positive".to_string()));
        }
        Ok(())
    }
}
