//! Parallel seed generation
//!
//! The parent builds one [`GenerationContext`] and hands seeds to workers,
//! either threads sharing that context or `rvsynth seed-worker` child
//! processes that rebuild it and attach to the shared Bloom filter by name.
//! Seeds that miss their deadline are requeued for a bounded number of
//! rounds and then abandoned.

pub mod coordinator;
pub mod seed;
pub mod stats;

use std::fs;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::bugfilter::BugFilter;
use crate::cache::{BloomParams, XorCache};
use crate::config::{ExecutionMode, GeneratorConfig};
use crate::encoder::toolchain::DEFAULT_MARCH;
use crate::encoder::{HybridEncoder, Toolchain};
use crate::error::{Result, SynthError};
use crate::isa::{ExtensionTag, FormatTable};
use crate::oracle::spike::default_library_path;
use crate::oracle::{Oracle, OracleKind, ReferenceOracle, SpikeOracle};
use crate::profile::ExtensionProfile;
use crate::template::{BuiltinTemplate, TemplateProvider};

pub use coordinator::{run_rounds, ProcessLauncher, ThreadLauncher};
pub use seed::{generate_seed, SeedOutcome};
pub use stats::RunReport;

/// Everything a seed needs, built once per process.
pub struct GenerationContext {
    pub config: GeneratorConfig,
    pub table: FormatTable,
    pub profile: ExtensionProfile,
    pub filter: Arc<BugFilter>,
    pub encoder: Arc<HybridEncoder>,
    pub cache: Arc<XorCache>,
    pub template: Box<dyn TemplateProvider>,
}

impl GenerationContext {
    /// `check_resources` verifies the toolchain and oracle library; the
    /// parent does this once, seed workers skip it.
    pub fn new(config: GeneratorConfig, cache: Arc<XorCache>, check_resources: bool) -> Result<Self> {
        config.validate()?;
        let table = FormatTable::builtin()?;
        let profile = build_profile(&config)?;

        let mut filter = BugFilter::for_target(config.target);
        if let Some(path) = &config.bug_registry {
            filter.load_json(path)?;
        }

        let toolchain = if config.use_toolchain {
            let tc = Toolchain::new(&config.toolchain_prefix).with_march(&march_for(config.arch_bits()));
            if check_resources {
                tc.verify()?;
            }
            Some(tc)
        } else {
            None
        };
        if check_resources && config.eliminate && config.oracle == OracleKind::Spike {
            open_oracle(&config)?;
        }

        info!(
            profile = profile.name(),
            target = %config.target,
            toolchain = toolchain.is_some(),
            bug_patterns = filter.len(),
            "generation context ready"
        );
        Ok(Self {
            encoder: Arc::new(HybridEncoder::new(config.arch_bits(), toolchain)),
            config,
            table,
            profile,
            filter: Arc::new(filter),
            cache,
            template: Box::new(BuiltinTemplate),
        })
    }

    pub fn toolchain(&self) -> Option<&Toolchain> {
        self.encoder.toolchain()
    }
}

/// Assembler `-march` for encoding fallbacks.
pub fn march_for(bits: u32) -> String {
    if bits == 32 {
        DEFAULT_MARCH.replacen("rv64", "rv32", 1)
    } else {
        DEFAULT_MARCH.to_string()
    }
}

/// The named profile, minus excluded tags, minus RV64-only tags on 32-bit targets.
pub fn build_profile(config: &GeneratorConfig) -> Result<ExtensionProfile> {
    let base = ExtensionProfile::builtin(config.profile_name())?;
    let excluded = config
        .exclude_ext
        .iter()
        .map(|s| s.parse::<ExtensionTag>().map_err(SynthError::Config))
        .collect::<Result<Vec<_>>>()?;
    let profile = if excluded.is_empty() {
        base
    } else {
        base.without(&excluded)?
    };
    if config.arch_bits() == 32 {
        profile.for_rv32()
    } else {
        Ok(profile)
    }
}

/// Filter sized for `seeds × instr_number × safety_factor` elements.
pub fn bloom_params(config: &GeneratorConfig) -> BloomParams {
    BloomParams::for_workload(
        config.seeds,
        config.instr_number,
        config.false_positive_rate,
        config.safety_factor,
    )
}

pub fn open_oracle(config: &GeneratorConfig) -> Result<Box<dyn Oracle>> {
    match config.oracle {
        OracleKind::Reference => Ok(Box::new(ReferenceOracle::new())),
        OracleKind::Spike => {
            let path = config
                .spike_library
                .clone()
                .unwrap_or_else(default_library_path);
            Ok(Box::new(SpikeOracle::load(&path)?))
        }
    }
}

/// Generate every seed of `config` and write `run_stats.json`.
pub fn run_generation(config: GeneratorConfig) -> Result<RunReport> {
    config.validate()?;
    fs::create_dir_all(&config.out_dir)?;
    let params = bloom_params(&config);
    let started = Instant::now();
    info!(
        seeds = config.seeds,
        instr_number = config.instr_number,
        workers = config.max_workers,
        execution = %config.execution,
        bloom_bits = params.size_bits,
        bloom_hashes = params.num_hashes,
        "starting generation"
    );

    let cache = match config.execution {
        ExecutionMode::Thread => XorCache::local(params),
        ExecutionMode::Process => XorCache::create_shared(&XorCache::default_name(), params)?,
    };
    let ctx = Arc::new(GenerationContext::new(config, Arc::new(cache), true)?);
    let config = &ctx.config;

    let summary = match config.execution {
        ExecutionMode::Thread => run_rounds(
            &ThreadLauncher::new(Arc::clone(&ctx)),
            config.seeds,
            config.max_workers,
            config.max_retry_rounds,
        ),
        ExecutionMode::Process => run_rounds(
            &ProcessLauncher::new(config, ctx.cache.name(), std::env::current_exe()?)?,
            config.seeds,
            config.max_workers,
            config.max_retry_rounds,
        ),
    };

    let report = RunReport::new(
        config,
        summary,
        &ctx.cache,
        ctx.encoder.fallback_count(),
        started.elapsed(),
    );
    if !report.abandoned.is_empty() {
        warn!(abandoned = ?report.abandoned, "seeds abandoned after retries");
    }
    if !report.is_complete() {
        warn!(
            completed = report.completed.len(),
            requested = report.seeds_requested,
            failed = report.failed.len(),
            "run incomplete"
        );
    }
    report.write_json(&config.out_dir.join(stats::RUN_STATS_FILE))?;
    Ok(report)
}

/// Body of the hidden `seed-worker` subcommand.
pub fn run_seed_worker(config: GeneratorConfig, index: usize, cache_name: &str) -> Result<SeedOutcome> {
    let cache = XorCache::attach(cache_name, bloom_params(&config))?;
    let ctx = GenerationContext::new(config, Arc::new(cache), false)?;
    generate_seed(&ctx, index)
}

#[cfg(test)]
mod tests {
    use super::seed::seed_file_name;
    use super::*;
    use crate::config::TargetArch;
    use std::path::Path;

    fn quick_config(dir: &Path) -> GeneratorConfig {
        GeneratorConfig::default()
            .with_instr_number(30)
            .with_seeds(3)
            .with_workers(2)
            .with_out_dir(dir)
            .with_toolchain(false)
            .with_seed_option(Some(99))
            .with_profile("integer")
    }

    #[test]
    fn test_build_profile_excludes_and_filters_rv32() {
        let mut config = GeneratorConfig::default().with_target(TargetArch::Rv32);
        config.exclude_ext = vec!["RV_M".to_string()];
        let profile = build_profile(&config).unwrap();
        assert!(!profile.tags().contains(&ExtensionTag::RvM));
        assert!(profile.tags().iter().all(|t| !t.is_rv64_only()));

        config.exclude_ext = vec!["RV_NOPE".to_string()];
        assert!(matches!(build_profile(&config), Err(SynthError::Config(_))));
    }

    #[test]
    fn test_march_for_width() {
        assert!(march_for(32).starts_with("rv32"));
        assert_eq!(march_for(64), DEFAULT_MARCH);
    }

    #[test]
    fn test_bloom_params_scale_with_workload() {
        let small = bloom_params(&GeneratorConfig::default().with_seeds(1));
        let large = bloom_params(&GeneratorConfig::default().with_seeds(100));
        assert!(large.size_bits > small.size_bits);
    }

    #[test]
    fn test_missing_spike_library_is_fatal_at_startup() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = quick_config(dir.path()).with_oracle(OracleKind::Spike);
        config.spike_library = Some(dir.path().join("missing.so"));
        let cache = Arc::new(XorCache::local(bloom_params(&config)));
        let err = GenerationContext::new(config, cache, true).err().unwrap();
        assert!(matches!(err, SynthError::SimulatorInitFailure(_)));
    }

    #[test]
    fn test_run_generation_threads() {
        let dir = tempfile::tempdir().unwrap();
        let report = run_generation(quick_config(dir.path())).unwrap();
        assert_eq!(report.completed, vec![0, 1, 2]);
        assert!(report.abandoned.is_empty());
        for i in 0..3 {
            assert!(dir.path().join(seed_file_name(i)).exists());
        }
        assert!(report.is_complete());
        assert!(dir.path().join(".isa_info").exists());
        assert!(dir.path().join(stats::RUN_STATS_FILE).exists());
        assert!(report.resolve_duplicates > 0);
    }

    #[test]
    fn test_run_generation_is_reproducible_with_base_seed() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        run_generation(quick_config(a.path()).with_workers(1)).unwrap();
        run_generation(quick_config(b.path()).with_workers(1)).unwrap();
        let name = seed_file_name(0);
        assert_eq!(
            fs::read_to_string(a.path().join(&name)).unwrap(),
            fs::read_to_string(b.path().join(&name)).unwrap()
        );
    }
}
