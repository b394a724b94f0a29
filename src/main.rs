use anyhow::{bail, Context};
use clap::{ArgAction, Parser, Subcommand};
use std::path::{Path, PathBuf};

mod bugfilter;
mod cache;
mod config;
mod encoder;
mod error;
mod isa;
mod jump;
mod logging;
mod oracle;
mod parser;
mod profile;
mod runner;
mod session;
mod synth;
mod template;
mod validator;

use config::{ExecutionMode, GeneratorConfig, TargetArch, TraceConfig};
use encoder::{HybridEncoder, Toolchain};
use error::SynthError;
use jump::split_offset;
use logging::LogFormat;
use oracle::OracleKind;
use profile::{ExtensionProfile, BUILTIN_PROFILES};
use template::ElfImage;

// --- Command Line Arguments ---

#[derive(Parser)]
#[command(name = "rvsynth")]
#[command(about = "rvsynth - RISC-V random instruction-stream synthesizer")]
#[command(version)]
#[command(subcommand_required = true)]
#[command(arg_required_else_help = true)]
struct Args {
    /// More log output (-v debug, -vv trace)
    #[arg(long, short, action = ArgAction::Count, global = true)]
    verbose: u8,
    /// Less log output (-q warn, -qq error)
    #[arg(long, short, action = ArgAction::Count, global = true)]
    quiet: u8,
    /// Log format: pretty, compact or json
    #[arg(long, default_value = "pretty", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Debug, Default)]
struct GenerateArgs {
    /// JSON configuration file; explicit flags override it
    #[arg(long)]
    config: Option<PathBuf>,

    // --- Workload ---
    /// Logical instruction slots per seed
    #[arg(long, short = 'n')]
    instr_number: Option<usize>,
    /// Number of seed files to generate
    #[arg(long, short = 's')]
    seeds: Option<usize>,
    /// Maximum seeds in flight
    #[arg(long, short = 'j')]
    workers: Option<usize>,
    /// Output directory for seed files and statistics
    #[arg(long, short = 'o')]
    out_dir: Option<PathBuf>,
    /// Target: xs, nts, cva6 or rv32
    #[arg(long)]
    target: Option<TargetArch>,
    /// Extension profile (see `rvsynth profiles`)
    #[arg(long)]
    profile: Option<String>,
    /// Extension tags to drop from the profile, e.g. RV_A,RV64_A
    #[arg(long, value_delimiter = ',')]
    exclude_ext: Vec<String>,
    /// Base RNG seed; seed i uses base + i
    #[arg(long)]
    seed: Option<u64>,

    // --- Validation ---
    /// Skip oracle validation and duplicate elimination
    #[arg(long)]
    no_eliminate: bool,
    /// Oracle: reference or spike
    #[arg(long)]
    oracle: Option<OracleKind>,
    /// Spike checkpoint engine library
    #[arg(long)]
    spike_library: Option<PathBuf>,
    /// Retry budget per logical slot
    #[arg(long)]
    max_mutate_time: Option<usize>,
    /// Bloom filter false-positive rate
    #[arg(long)]
    fp_rate: Option<f64>,
    /// Bloom filter sizing safety factor
    #[arg(long)]
    safety_factor: Option<f64>,
    /// JSON file with additional known bugs
    #[arg(long)]
    bug_registry: Option<PathBuf>,
    /// Directory for per-seed validation traces
    #[arg(long)]
    debug_trace: Option<PathBuf>,
    /// Trace accepted instructions only
    #[arg(long, requires = "debug_trace")]
    trace_accepted_only: bool,

    // --- Toolchain ---
    /// GNU toolchain prefix
    #[arg(long)]
    toolchain_prefix: Option<String>,
    /// Table encoder only, flat oracle image
    #[arg(long)]
    no_toolchain: bool,

    // --- Scheduling ---
    /// Execution mode: thread or process
    #[arg(long)]
    execution: Option<ExecutionMode>,
    /// Seconds of deadline per requested instruction
    #[arg(long)]
    timeout_per_instr: Option<f64>,
    /// Rounds of resubmission for timed-out seeds
    #[arg(long)]
    max_retry_rounds: Option<usize>,
    /// Extra NOP slots in the oracle image
    #[arg(long)]
    redundancy_margin: Option<usize>,
    /// Print the run report as JSON instead of a summary
    #[arg(long)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate seed files
    Generate(GenerateArgs),
    /// Encode one instruction and print its machine code
    Encode {
        /// Assembly text, e.g. "addi a0, a1, -3"
        instruction: String,
        /// Allow pseudo-instructions that expand to several units
        #[arg(long)]
        sequence: bool,
        /// Register width
        #[arg(long, default_value = "64")]
        xlen: u32,
        /// Fall back to the GNU assembler with this prefix
        #[arg(long)]
        toolchain_prefix: Option<String>,
    },
    /// Split a PC-relative offset into auipc/addi immediates
    SplitOffset {
        #[arg(allow_hyphen_values = true)]
        offset: i64,
    },
    /// List extension profiles and their normalized weights
    Profiles {
        /// Show only this profile
        name: Option<String>,
    },
    /// Disassemble the executable sections of a RISC-V ELF
    Disasm {
        /// Path to ELF binary to disassemble
        binary: PathBuf,
    },
    /// Generate one seed for a parent `generate --execution process`
    #[command(hide = true)]
    SeedWorker {
        #[arg(long)]
        index: usize,
        #[arg(long)]
        cache_name: String,
        #[arg(long)]
        config_json: String,
    },
}

// --- Generation ---

fn build_config(args: &GenerateArgs) -> anyhow::Result<GeneratorConfig> {
    let mut config = match &args.config {
        Some(path) => GeneratorConfig::from_json_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => GeneratorConfig::default(),
    };
    if let Some(n) = args.instr_number {
        config = config.with_instr_number(n);
    }
    if let Some(n) = args.seeds {
        config = config.with_seeds(n);
    }
    if let Some(n) = args.workers {
        config = config.with_workers(n);
    }
    if let Some(dir) = &args.out_dir {
        config = config.with_out_dir(dir);
    }
    if let Some(target) = args.target {
        config = config.with_target(target);
    }
    if let Some(profile) = &args.profile {
        config = config.with_profile(profile);
    }
    if !args.exclude_ext.is_empty() {
        config.exclude_ext = args.exclude_ext.clone();
    }
    if args.seed.is_some() {
        config = config.with_seed_option(args.seed);
    }
    if args.no_eliminate {
        config = config.with_eliminate(false);
    }
    if let Some(oracle) = args.oracle {
        config = config.with_oracle(oracle);
    }
    if let Some(path) = &args.spike_library {
        config.spike_library = Some(path.clone());
    }
    if let Some(n) = args.max_mutate_time {
        config = config.with_max_mutate_time(n);
    }
    if let Some(p) = args.fp_rate {
        config.false_positive_rate = p;
    }
    if let Some(f) = args.safety_factor {
        config.safety_factor = f;
    }
    if let Some(path) = &args.bug_registry {
        config.bug_registry = Some(path.clone());
    }
    if let Some(path) = &args.debug_trace {
        config = config.with_trace(TraceConfig {
            path: path.clone(),
            accepted_only: args.trace_accepted_only,
        });
    }
    if let Some(prefix) = &args.toolchain_prefix {
        config.toolchain_prefix = prefix.clone();
    }
    if args.no_toolchain {
        config = config.with_toolchain(false);
    }
    if let Some(mode) = args.execution {
        config = config.with_execution(mode);
    }
    if let Some(t) = args.timeout_per_instr {
        config.timeout_per_instr = t;
    }
    if let Some(n) = args.max_retry_rounds {
        config.max_retry_rounds = n;
    }
    if let Some(n) = args.redundancy_margin {
        config.redundancy_margin = n;
    }
    config.validate()?;
    Ok(config)
}

fn generate(args: &GenerateArgs) -> anyhow::Result<()> {
    let config = build_config(args)?;
    let out_dir = config.out_dir.clone();
    let report = runner::run_generation(config).context("generation failed")?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        report.print_summary();
        println!("Output:              {}", out_dir.display());
    }
    if let Some(reason) = &report.aborted {
        bail!("run aborted: {}", reason);
    }
    if report.completed.is_empty() {
        bail!("no seed completed");
    }
    Ok(())
}

fn seed_worker(index: usize, cache_name: &str, config_json: &str) -> anyhow::Result<()> {
    let config: GeneratorConfig =
        serde_json::from_str(config_json).context("parsing worker configuration")?;
    match runner::run_seed_worker(config, index, cache_name) {
        Ok(outcome) => {
            println!("{}", serde_json::to_string(&outcome)?);
            Ok(())
        }
        Err(SynthError::Timeout { seed, limit }) => {
            eprintln!("seed {} exceeded its {:?} deadline", seed, limit);
            std::process::exit(runner::coordinator::EXIT_TIMEOUT);
        }
        Err(e) if e.is_fatal() => {
            eprintln!("seed {}: {}", index, e);
            std::process::exit(runner::coordinator::EXIT_FATAL);
        }
        Err(e) => Err(e).with_context(|| format!("seed {}", index)),
    }
}

// --- Utilities ---

fn encode(
    instruction: &str,
    sequence: bool,
    xlen: u32,
    toolchain_prefix: Option<&str>,
) -> anyhow::Result<()> {
    if xlen != 32 && xlen != 64 {
        bail!("xlen must be 32 or 64, got {}", xlen);
    }
    let encoder = match toolchain_prefix {
        Some(p) => HybridEncoder::new(
            xlen,
            Some(Toolchain::new(p).with_march(&runner::march_for(xlen))),
        ),
        None => HybridEncoder::table_only(xlen),
    };
    let units = if sequence {
        encoder.encode_sequence(instruction)?
    } else {
        vec![encoder.encode(instruction)?]
    };
    for unit in &units {
        println!("{}  ({} bytes)", unit, unit.size);
    }
    if units.len() > 1 {
        println!("total: {} bytes", encoder::total_size(&units));
    }
    Ok(())
}

fn print_profile(profile: &ExtensionProfile) {
    println!("{}:", profile.name());
    for tag in profile.tags() {
        println!("  {:<12} {:.4}", tag.name(), profile.weight_of(*tag));
    }
}

fn profiles(name: Option<&str>) -> anyhow::Result<()> {
    match name {
        Some(name) => print_profile(&ExtensionProfile::builtin(name)?),
        None => {
            for name in BUILTIN_PROFILES {
                print_profile(&ExtensionProfile::builtin(name)?);
            }
        }
    }
    Ok(())
}

fn disassemble(path: &Path) -> anyhow::Result<()> {
    let image = ElfImage::load(path).with_context(|| format!("reading {}", path.display()))?;
    let cs = validator::trace::riscv_disassembler(image.xlen)?;
    for section in &image.text_sections {
        println!("{} @ 0x{:x}:", section.name, section.virtual_addr);
        let insns = cs
            .disasm_all(&section.data, section.virtual_addr)
            .map_err(|e| anyhow::anyhow!("capstone: {}", e))?;
        for insn in insns.iter() {
            let hex: String = insn
                .bytes()
                .iter()
                .rev()
                .map(|b| format!("{:02x}", b))
                .collect();
            println!(
                "0x{:x}: {:8} {} {}",
                insn.address(),
                hex,
                insn.mnemonic().unwrap_or("???"),
                insn.op_str().unwrap_or("")
            );
        }
    }
    Ok(())
}

fn run(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Generate(args) => generate(&args),
        Commands::Encode {
            instruction,
            sequence,
            xlen,
            toolchain_prefix,
        } => encode(&instruction, sequence, xlen, toolchain_prefix.as_deref()),
        Commands::SplitOffset { offset } => {
            let split = split_offset(offset);
            println!("offset: {}", offset);
            println!("hi20:   {} (auipc field 0x{:x})", split.hi20, split.hi20_field());
            println!("lo12:   {}", split.lo12);
            Ok(())
        }
        Commands::Profiles { name } => profiles(name.as_deref()),
        Commands::Disasm { binary } => disassemble(&binary),
        Commands::SeedWorker {
            index,
            cache_name,
            config_json,
        } => seed_worker(index, &cache_name, &config_json),
    }
}

fn main() {
    let args = Args::parse();
    let verbosity = (args.verbose as i8).saturating_sub(args.quiet as i8);
    if let Err(e) = logging::init(verbosity, args.log_format) {
        eprintln!("Error: cannot install logger: {}", e);
        std::process::exit(1);
    }

    if let Err(e) = run(args.command) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_generate_flags() {
        let args = Args::try_parse_from([
            "rvsynth", "generate", "-n", "50", "--seeds", "2", "--target", "rv32",
            "--exclude-ext", "RV_A,RV_F", "--no-toolchain", "--oracle", "reference",
            "--execution", "process", "-vv",
        ])
        .unwrap();
        assert_eq!(args.verbose, 2);
        let Commands::Generate(g) = args.command else {
            panic!("expected generate");
        };
        let config = build_config(&g).unwrap();
        assert_eq!(config.instr_number, 50);
        assert_eq!(config.seeds, 2);
        assert_eq!(config.target, TargetArch::Rv32);
        assert_eq!(config.exclude_ext, vec!["RV_A", "RV_F"]);
        assert!(!config.use_toolchain);
        assert_eq!(config.execution, ExecutionMode::Process);
    }

    #[test]
    fn test_flags_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gen.json");
        std::fs::write(&path, r#"{"instr_number": 10, "seeds": 4, "target": "cva6"}"#).unwrap();
        let args = GenerateArgs {
            config: Some(path),
            seeds: Some(7),
            ..Default::default()
        };
        let config = build_config(&args).unwrap();
        assert_eq!(config.instr_number, 10);
        assert_eq!(config.seeds, 7);
        assert_eq!(config.target, TargetArch::Cva6);
        assert_eq!(config.profile_name(), "cva6");
    }

    #[test]
    fn test_invalid_overrides_rejected() {
        let args = GenerateArgs {
            fp_rate: Some(1.5),
            ..Default::default()
        };
        assert!(build_config(&args).is_err());
        assert!(Args::try_parse_from(["rvsynth", "generate", "--target", "arm"]).is_err());
    }

    #[test]
    fn test_split_offset_accepts_negative() {
        let args = Args::try_parse_from(["rvsynth", "split-offset", "-4096"]).unwrap();
        assert!(matches!(args.command, Commands::SplitOffset { offset: -4096 }));
    }
}
