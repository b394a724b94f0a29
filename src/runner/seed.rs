//! One seed, end to end: template, oracle session, synthesis, output files.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, info_span};

use super::{open_oracle, GenerationContext};
use crate::error::{Result, SynthError};
use crate::oracle::OracleImage;
use crate::session::ValidationSession;
use crate::synth::{SynthOptions, SynthStats, Synthesizer};
use crate::template::{NopImageBuilder, TemplateInstance};
use crate::validator::trace::DebugTrace;
use crate::validator::{InstructionValidator, ValidatorStats};

/// Sidecar written next to the seed files.
pub const ISA_INFO_FILE: &str = ".isa_info";

pub fn seed_file_name(index: usize) -> String {
    format!("seeds_{}_.S", index)
}

pub fn trace_file_name(index: usize) -> String {
    format!("seeds_{}_.trace", index)
}

/// Result of a finished seed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedOutcome {
    pub index: usize,
    pub path: PathBuf,
    pub code_bytes: usize,
    pub padding_bytes: usize,
    pub misaligned: bool,
    pub synth: SynthStats,
    pub validator: ValidatorStats,
    pub elapsed_ms: u64,
}

impl SeedOutcome {
    #[cfg(test)]
    pub fn empty(index: usize) -> Self {
        Self {
            index,
            path: PathBuf::from(seed_file_name(index)),
            code_bytes: 0,
            padding_bytes: 0,
            misaligned: false,
            synth: SynthStats::default(),
            validator: ValidatorStats::default(),
            elapsed_ms: 0,
        }
    }
}

fn seed_rng(ctx: &GenerationContext, index: usize) -> ChaCha8Rng {
    match ctx.config.seed_for(index) {
        Some(seed) => ChaCha8Rng::seed_from_u64(seed),
        None => ChaCha8Rng::from_os_rng(),
    }
}

/// Boot an oracle session on this seed's template. With a toolchain the
/// image is the linked NOP template; without one it is a flat NOP region.
fn open_session(
    ctx: &GenerationContext,
    instance: &TemplateInstance,
    rng: &mut ChaCha8Rng,
) -> Result<ValidationSession> {
    let capacity = ctx.config.capacity();
    let mut session = ValidationSession::new(open_oracle(&ctx.config)?);
    match ctx.toolchain() {
        Some(tc) => {
            let scratch = tempfile::tempdir()?;
            let elf = NopImageBuilder::new(tc).build(instance, capacity, scratch.path())?;
            session.initialize(&OracleImage::Elf(elf), &instance.isa, capacity)?;
        }
        None => {
            let image = OracleImage::flat(ctx.config.byte_budget() as u64, rng.random());
            session.initialize(&image, &instance.isa, capacity)?;
        }
    }
    Ok(session)
}

fn build_validator(
    ctx: &GenerationContext,
    index: usize,
    instance: &TemplateInstance,
    rng: &mut ChaCha8Rng,
) -> Result<InstructionValidator> {
    let session = open_session(ctx, instance, rng)?;
    let mut validator = InstructionValidator::new(
        session,
        Arc::clone(&ctx.encoder),
        Arc::clone(&ctx.cache),
        Arc::clone(&ctx.filter),
    );
    if let Some(trace) = &ctx.config.debug_trace {
        let path = trace.path.join(trace_file_name(index));
        validator = validator.with_trace(DebugTrace::create(&path, trace.accepted_only, instance.arch_bits)?);
    }
    Ok(validator)
}

/// Generate seed `index` and write `seeds_{index}_.S` plus the sidecar.
pub fn generate_seed(ctx: &GenerationContext, index: usize) -> Result<SeedOutcome> {
    let span = info_span!("seed", index);
    let _enter = span.enter();
    let started = Instant::now();
    let config = &ctx.config;

    let mut rng = seed_rng(ctx, index);
    let instance = ctx.template.instantiate(config.target, &ctx.profile, &mut rng)?;
    debug!(template = ctx.template.name(), isa = %instance.isa, "template instantiated");
    let validator = if config.eliminate {
        let v = build_validator(ctx, index, &instance, &mut rng).map_err(|e| match e {
            SynthError::Io(io) => SynthError::SimulatorInitFailure(io.to_string()),
            other => other,
        })?;
        Some(v)
    } else {
        None
    };

    let mut options = SynthOptions::new(config.instr_number, config.byte_budget())
        .with_deadline(config.seed_deadline());
    options.max_mutate_time = config.max_mutate_time;
    options.seed_index = index;

    let body = Synthesizer::new(
        &ctx.table,
        ctx.profile.clone(),
        ctx.filter.csr_blacklist(),
        Arc::clone(&ctx.encoder),
        validator,
        rng,
        options,
    )?
    .run()?;

    let path = config.out_dir.join(seed_file_name(index));
    fs::write(&path, instance.complete(&body.lines))?;
    fs::write(config.out_dir.join(ISA_INFO_FILE), instance.sidecar())?;
    debug!(path = %path.display(), lines = body.lines.len(), "wrote seed");

    let elapsed_ms = started.elapsed().as_millis() as u64;
    info!(
        instructions = body.stats.instructions,
        code_bytes = body.code_bytes,
        padding = body.padding_bytes,
        total_bytes = body.total_bytes(),
        resolved = body.stats.resolve_duplicates,
        failed = body.stats.resolve_duplicates_fail,
        elapsed_ms,
        "seed done"
    );
    Ok(SeedOutcome {
        index,
        path,
        code_bytes: body.code_bytes,
        padding_bytes: body.padding_bytes,
        misaligned: body.misaligned,
        synth: body.stats,
        validator: body.validator,
        elapsed_ms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::XorCache;
    use crate::config::{GeneratorConfig, TraceConfig};
    use crate::runner::bloom_params;

    fn context(config: GeneratorConfig) -> GenerationContext {
        let cache = Arc::new(XorCache::local(bloom_params(&config)));
        GenerationContext::new(config, cache, false).unwrap()
    }

    fn config(dir: &std::path::Path) -> GeneratorConfig {
        GeneratorConfig::default()
            .with_instr_number(40)
            .with_seeds(1)
            .with_out_dir(dir)
            .with_toolchain(false)
            .with_seed_option(Some(5))
            .with_profile("integer")
    }

    #[test]
    fn test_seed_file_layout() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(config(dir.path()));
        let outcome = generate_seed(&ctx, 0).unwrap();
        assert_eq!(outcome.path, dir.path().join("seeds_0_.S"));
        assert_eq!(outcome.code_bytes + outcome.padding_bytes, ctx.config.byte_budget());

        let text = fs::read_to_string(&outcome.path).unwrap();
        assert!(text.contains("main:"));
        assert!(text.contains("write_tohost:"));
        let sidecar = fs::read_to_string(dir.path().join(ISA_INFO_FILE)).unwrap();
        assert!(sidecar.starts_with("ISA=rv64g"));
        assert!(sidecar.contains("ARCH_BITS=64"));
    }

    #[test]
    fn test_seed_without_elimination() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(config(dir.path()).with_eliminate(false));
        let outcome = generate_seed(&ctx, 1).unwrap();
        assert_eq!(outcome.validator, ValidatorStats::default());
        assert_eq!(outcome.synth.resolve_duplicates, 0);
        assert!(outcome.synth.instructions > 0);
    }

    #[test]
    fn test_seed_writes_trace_per_seed() {
        let dir = tempfile::tempdir().unwrap();
        let traces = dir.path().join("traces");
        let ctx = context(config(dir.path()).with_trace(TraceConfig {
            path: traces.clone(),
            accepted_only: true,
        }));
        generate_seed(&ctx, 2).unwrap();
        let text = fs::read_to_string(traces.join("seeds_2_.trace")).unwrap();
        assert!(text.contains("[ACCEPTED]"));
        assert!(!text.contains("[DUPLICATE]"));
    }

    #[test]
    fn test_outcome_json_round_trip() {
        let outcome = SeedOutcome::empty(3);
        let json = serde_json::to_string(&outcome).unwrap();
        assert_eq!(serde_json::from_str::<SeedOutcome>(&json).unwrap(), outcome);
    }
}
