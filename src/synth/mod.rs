//! Control-flow synthesizer
//!
//! Walks the requested number of logical slots. Each slot draws an
//! extension tag and a format; plain instructions go through the
//! validator's retry loop, branches and jumps become forward jumps,
//! backward loops or indirect jumps that are compiled and executed as one
//! unit. A control-flow slot consumes `filler + structural` logical slots.
//!
//! The finished body is NOP-padded to the byte budget. A remainder that is
//! not a multiple of 4 is padded with `c.nop` and reported, never dropped.

use rand::seq::IndexedRandom;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

use crate::encoder::{total_size, CompiledInstruction, HybridEncoder};
use crate::error::{Result, SynthError};
use crate::isa::{FormatTable, InstructionFormat, IntRegister, RegRef};
use crate::jump::{BranchForm, CompiledSequence, JumpCompiler, JumpPlan};
use crate::profile::operands::OperandBuilder;
use crate::profile::{ExtensionProfile, ExtensionSelector};
use crate::validator::{InstructionValidator, ValidatorStats};

/// Chance that a `bne` becomes a backward loop instead of a forward branch.
pub const BACKWARD_LOOP_PROBABILITY: f64 = 0.5;
pub const MIN_BODY_LEN: usize = 3;
pub const MAX_BODY_LEN: usize = 8;
pub const MAX_LOOP_ITERATIONS: u32 = 8;
/// Fixed loop counter; filler that writes it is regenerated.
pub const LOOP_COUNTER: IntRegister = IntRegister::S11;

fn is_indirect_jump(mnemonic: &str) -> bool {
    matches!(mnemonic, "jalr" | "c.jr" | "c.jalr")
}

/// Per-seed knobs.
#[derive(Clone, Debug)]
pub struct SynthOptions {
    pub instr_number: usize,
    pub byte_budget: usize,
    pub max_mutate_time: usize,
    pub seed_index: usize,
    /// Cooperative deadline checked before every slot.
    pub deadline: Option<(Instant, Duration)>,
}

impl SynthOptions {
    pub fn new(instr_number: usize, byte_budget: usize) -> Self {
        Self {
            instr_number,
            byte_budget,
            max_mutate_time: crate::validator::MAX_MUTATE_TIME,
            seed_index: 0,
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, limit: Duration) -> Self {
        self.deadline = Some((Instant::now() + limit, limit));
        self
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynthStats {
    /// Machine instructions emitted, padding excluded.
    pub instructions: usize,
    /// Slots validated within the retry budget.
    pub resolve_duplicates: usize,
    /// Slots whose retry budget ran out.
    pub resolve_duplicates_fail: usize,
    pub encoding_failures: usize,
    /// Control-flow picks dropped at the last slot or for lack of room.
    pub skipped_slots: usize,
    pub forward_jumps: usize,
    pub backward_loops: usize,
    pub indirect_jumps: usize,
}

/// A finished instruction body.
#[derive(Clone, Debug)]
pub struct SynthesizedBody {
    pub lines: Vec<String>,
    pub code_bytes: usize,
    pub padding_bytes: usize,
    /// The remainder needed a `c.nop`.
    pub misaligned: bool,
    pub stats: SynthStats,
    pub validator: ValidatorStats,
}

impl SynthesizedBody {
    pub fn total_bytes(&self) -> usize {
        self.code_bytes + self.padding_bytes
    }
}

pub struct Synthesizer<'a> {
    table: &'a FormatTable,
    selector: ExtensionSelector,
    operands: OperandBuilder,
    filler: Vec<&'a InstructionFormat>,
    encoder: Arc<HybridEncoder>,
    validator: Option<InstructionValidator>,
    rng: ChaCha8Rng,
    options: SynthOptions,
    lines: Vec<String>,
    bytes: usize,
    next_label: usize,
    stats: SynthStats,
}

impl<'a> Synthesizer<'a> {
    /// Without a validator, candidates are only encoded.
    pub fn new(
        table: &'a FormatTable,
        profile: ExtensionProfile,
        csr_blacklist: &HashSet<String>,
        encoder: Arc<HybridEncoder>,
        validator: Option<InstructionValidator>,
        rng: ChaCha8Rng,
        options: SynthOptions,
    ) -> Result<Self> {
        let rv32 = encoder.xlen() == 32;
        let filler = table.filler_formats(profile.tags());
        let selector = ExtensionSelector::new(profile)?;
        Ok(Self {
            table,
            selector,
            operands: OperandBuilder::new(csr_blacklist, rv32),
            filler,
            encoder,
            validator,
            rng,
            options,
            lines: Vec::new(),
            bytes: 0,
            next_label: 0,
            stats: SynthStats::default(),
        })
    }

    fn check_deadline(&self) -> Result<()> {
        if let Some((deadline, limit)) = self.options.deadline {
            if Instant::now() >= deadline {
                return Err(SynthError::Timeout {
                    seed: self.options.seed_index,
                    limit,
                });
            }
        }
        Ok(())
    }

    fn label(&mut self, prefix: &str) -> String {
        let name = format!("{}_{}", prefix, self.next_label);
        self.next_label += 1;
        name
    }

    /// Generate every slot, then pad.
    pub fn run(mut self) -> Result<SynthesizedBody> {
        let n = self.options.instr_number;
        let mut slot = 0;
        while slot < n {
            self.check_deadline()?;
            let tag = self.selector.next_tag(&mut self.rng);
            let Some(format) = self.table.formats(tag).choose(&mut self.rng).copied() else {
                trace!(%tag, "no formats for extension");
                self.stats.skipped_slots += 1;
                slot += 1;
                continue;
            };

            if format.is_control_flow() {
                if slot + 1 == n {
                    trace!(mnemonic = %format.mnemonic, "control flow at the last slot, skipped");
                    self.stats.skipped_slots += 1;
                    slot += 1;
                    continue;
                }
                slot += self.fill_control(format, n - slot)?;
            } else if format.has_label() {
                self.stats.skipped_slots += 1;
                slot += 1;
            } else {
                self.fill_plain(format)?;
                slot += 1;
            }
        }
        Ok(self.finish())
    }

    fn emit(&mut self, lines: Vec<String>, instructions: &[CompiledInstruction]) {
        let size = total_size(instructions);
        self.lines.extend(lines);
        self.bytes += size;
        self.stats.instructions += instructions.len();
        self.selector.note_emitted(size % 4 != 0);
    }

    /// Encode, and validate when a validator is attached. `None` means the
    /// candidate was refused and should be regenerated.
    fn try_accept(&mut self, text: &str) -> Result<Option<Vec<CompiledInstruction>>> {
        match self.validator.as_mut() {
            Some(v) => {
                let outcome = v.validate(text)?;
                Ok(match outcome {
                    crate::validator::ValidationOutcome::Accepted { instructions, .. } => {
                        Some(instructions)
                    }
                    _ => None,
                })
            }
            None => Ok(Some(vec![self.encoder.encode(text)?])),
        }
    }

    fn fill_plain(&mut self, format: &'a InstructionFormat) -> Result<bool> {
        let max = self.options.max_mutate_time.max(1);
        for attempt in 1..=max {
            let rendered = self.operands.render(format, &mut self.rng);
            match self.try_accept(&rendered.text) {
                Ok(Some(instructions)) => {
                    let lines = instructions
                        .iter()
                        .filter(|c| !c.text.is_empty())
                        .map(|c| c.text.clone())
                        .collect();
                    self.emit(lines, &instructions);
                    if self.validator.is_some() {
                        self.stats.resolve_duplicates += 1;
                    }
                    return Ok(true);
                }
                Ok(None) => {}
                Err(e @ SynthError::EncodingFailure { .. }) => {
                    self.stats.encoding_failures += 1;
                    debug!(error = %e, attempt, "candidate could not be encoded");
                }
                Err(e) => return Err(e),
            }
        }
        let exhausted = SynthError::ValidationExhausted {
            mnemonic: format.mnemonic.clone(),
            attempts: max,
        };
        debug!(%exhausted, "slot skipped");
        self.stats.resolve_duplicates_fail += 1;
        Ok(false)
    }

    /// Filler for a jump or loop body. Candidates writing `avoid` are
    /// regenerated; every regeneration costs one attempt.
    fn gen_filler(
        &mut self,
        count: usize,
        avoid: Option<RegRef>,
        attempts: &mut usize,
    ) -> Result<Option<Vec<CompiledInstruction>>> {
        let max = self.options.max_mutate_time.max(1);
        let mut out = Vec::with_capacity(count);
        while out.len() < count {
            let Some(format) = self.filler.choose(&mut self.rng).copied() else {
                return Ok(None);
            };
            let rendered = self.operands.render(format, &mut self.rng);
            if avoid.is_some_and(|r| rendered.writes(r)) {
                *attempts += 1;
                if *attempts >= max {
                    return Ok(None);
                }
                continue;
            }
            match self.encoder.encode(&rendered.text) {
                Ok(c) => out.push(c),
                Err(SynthError::EncodingFailure { .. }) => {
                    self.stats.encoding_failures += 1;
                    *attempts += 1;
                    if *attempts >= max {
                        return Ok(None);
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Ok(Some(out))
    }

    fn plan_for(&mut self, format: &InstructionFormat, body_len: usize, backward: bool) -> JumpPlan {
        if is_indirect_jump(&format.mnemonic) {
            let addr_reg = self.operands.choose_address_reg(&mut self.rng);
            JumpPlan::Indirect {
                label: self.label("fwd"),
                target_distance: body_len,
                addr_reg,
            }
        } else if backward {
            JumpPlan::Backward {
                label: self.label("bwd"),
                loop_iterations: self.rng.random_range(1..=MAX_LOOP_ITERATIONS),
                counter_reg: LOOP_COUNTER,
            }
        } else {
            JumpPlan::Forward {
                label: self.label("fwd"),
                target_distance: body_len,
            }
        }
    }

    fn indirect_text(&mut self, mnemonic: &str, addr_reg: IntRegister) -> String {
        match mnemonic {
            "jalr" => {
                let rd = self.operands.choose_int_dest(&mut self.rng);
                format!("jalr {}, 0({})", rd, addr_reg)
            }
            other => format!("{} {}", other, addr_reg),
        }
    }

    fn build_sequence(
        &mut self,
        plan: &JumpPlan,
        format: &InstructionFormat,
        body_len: usize,
        attempts: &mut usize,
    ) -> Result<Option<CompiledSequence>> {
        let avoid = match plan {
            JumpPlan::Backward { counter_reg, .. } => Some(RegRef::Int(*counter_reg)),
            _ => None,
        };
        let Some(filler) = self.gen_filler(body_len, avoid, attempts)? else {
            return Ok(None);
        };
        let encoder = Arc::clone(&self.encoder);
        let compiler = JumpCompiler::new(&encoder);
        let seq = match plan {
            JumpPlan::Forward { label, .. } => {
                let rendered = self.operands.render(format, &mut self.rng);
                let regs: Vec<IntRegister> = rendered
                    .registers
                    .iter()
                    .filter_map(|r| match r {
                        RegRef::Int(i) => Some(*i),
                        RegRef::Float(_) => None,
                    })
                    .collect();
                let form = BranchForm::new(&format.mnemonic, regs);
                compiler.compile_forward(&form, &filler, label)?
            }
            JumpPlan::Backward {
                label,
                loop_iterations,
                counter_reg,
            } => compiler.compile_backward(*counter_reg, *loop_iterations, &filler, label)?,
            JumpPlan::Indirect { label, addr_reg, .. } => {
                let text = self.indirect_text(&format.mnemonic, *addr_reg);
                compiler.compile_indirect(&text, *addr_reg, &filler, label)?
            }
        };
        Ok(Some(seq))
    }

    /// Returns the logical slots consumed.
    fn fill_control(&mut self, format: &'a InstructionFormat, remaining: usize) -> Result<usize> {
        let indirect = is_indirect_jump(&format.mnemonic);
        let backward =
            !indirect && format.mnemonic == "bne" && self.rng.random_bool(BACKWARD_LOOP_PROBABILITY);
        let structural = if indirect || backward { 3 } else { 1 };
        if remaining < structural + 1 {
            self.stats.skipped_slots += 1;
            return Ok(1);
        }
        let body_len = self
            .rng
            .random_range(MIN_BODY_LEN..=MAX_BODY_LEN)
            .min(remaining - structural);
        let plan = self.plan_for(format, body_len, backward);

        let max = self.options.max_mutate_time.max(1);
        let mut attempts = 0;
        while attempts < max {
            attempts += 1;
            let seq = match self.build_sequence(&plan, format, body_len, &mut attempts) {
                Ok(Some(seq)) => seq,
                Ok(None) => break,
                Err(e @ SynthError::EncodingFailure { .. }) => {
                    self.stats.encoding_failures += 1;
                    debug!(
                        error = %e,
                        label = plan.label(),
                        kind = %plan.kind(),
                        "jump sequence could not be encoded"
                    );
                    continue;
                }
                Err(e) => return Err(e),
            };
            let accepted = match self.validator.as_mut() {
                Some(v) => v.validate_sequence(&seq)?.is_accepted(),
                None => true,
            };
            if !accepted {
                continue;
            }

            trace!(
                label = %seq.label,
                kind = %seq.kind,
                offset = seq.branch_offset,
                branch = %seq.branch().text,
                bytes = seq.total_size(),
                "emitted jump sequence"
            );
            match &plan {
                JumpPlan::Forward { .. } => self.stats.forward_jumps += 1,
                JumpPlan::Backward { counter_reg, .. } => {
                    self.stats.backward_loops += 1;
                    self.operands.record_dest(*counter_reg);
                }
                JumpPlan::Indirect { .. } => self.stats.indirect_jumps += 1,
            }
            if self.validator.is_some() {
                self.stats.resolve_duplicates += 1;
            }
            let lines = seq.asm_lines();
            self.emit(lines, &seq.instructions);
            return Ok(body_len + structural);
        }

        debug!(
            mnemonic = %format.mnemonic,
            label = plan.label(),
            attempts,
            "control-flow slot skipped"
        );
        self.stats.resolve_duplicates_fail += 1;
        Ok(1)
    }

    fn finish(mut self) -> SynthesizedBody {
        let budget = self.options.byte_budget;
        if self.bytes > budget {
            warn!(
                seed = self.options.seed_index,
                bytes = self.bytes,
                budget,
                "instruction body exceeds its byte budget"
            );
        }
        let mut remaining = budget.saturating_sub(self.bytes);
        let mut misaligned = false;
        let mut padding = 0;
        if remaining % 4 != 0 {
            warn!(
                seed = self.options.seed_index,
                bytes = self.bytes,
                "body is not a multiple of 4 bytes, padding with c.nop"
            );
            self.lines.push("c.nop".to_string());
            remaining = remaining.saturating_sub(2);
            padding += 2;
            misaligned = true;
        }
        for _ in 0..remaining / 4 {
            self.lines.push("nop".to_string());
        }
        padding += remaining / 4 * 4;

        let validator = match self.validator.as_ref() {
            Some(v) => {
                let session = v.session();
                debug!(
                    oracle = session.oracle_name(),
                    confirmed = session.confirmed_count(),
                    restored = session.restored_count(),
                    "validation session closed"
                );
                v.stats().clone()
            }
            None => ValidatorStats::default(),
        };
        SynthesizedBody {
            lines: self.lines,
            code_bytes: self.bytes,
            padding_bytes: padding,
            misaligned,
            stats: self.stats,
            validator,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bugfilter::BugFilter;
    use crate::cache::{BloomParams, XorCache};
    use crate::isa::{Category, ExtensionTag};
    use crate::oracle::{OracleImage, ReferenceOracle};
    use crate::session::ValidationSession;
    use rand::SeedableRng;

    type Row = (ExtensionTag, &'static str, &'static str, &'static [Category]);

    fn profile(tags: &[ExtensionTag]) -> ExtensionProfile {
        let entries: Vec<_> = tags.iter().map(|t| (*t, None)).collect();
        ExtensionProfile::new("test", &entries).unwrap()
    }

    fn validator(code_bytes: u64) -> InstructionValidator {
        let mut session = ValidationSession::new(Box::new(ReferenceOracle::new()));
        session
            .initialize(&OracleImage::flat(code_bytes, 3), "rv64gc", 0)
            .unwrap();
        InstructionValidator::new(
            session,
            Arc::new(HybridEncoder::table_only(64)),
            Arc::new(XorCache::local(BloomParams::for_workload(1, 1000, 0.01, 1.5))),
            Arc::new(BugFilter::new()),
        )
    }

    fn synth<'a>(
        table: &'a FormatTable,
        profile: ExtensionProfile,
        validator: Option<InstructionValidator>,
        n: usize,
        seed: u64,
    ) -> Synthesizer<'a> {
        Synthesizer::new(
            table,
            profile,
            &HashSet::new(),
            Arc::new(HybridEncoder::table_only(64)),
            validator,
            ChaCha8Rng::seed_from_u64(seed),
            SynthOptions::new(n, (n + 64) * 4),
        )
        .unwrap()
    }

    fn is_padding(line: &str) -> bool {
        line == "nop" || line == "c.nop"
    }

    #[test]
    fn test_single_extension_fills_every_slot() {
        let table = FormatTable::builtin().unwrap();
        let body = synth(&table, profile(&[ExtensionTag::RvM]), None, 25, 1)
            .run()
            .unwrap();
        let code: Vec<_> = body.lines.iter().filter(|l| !is_padding(l)).collect();
        assert_eq!(code.len(), 25);
        assert_eq!(body.code_bytes, 100);
        assert_eq!(body.total_bytes(), (25 + 64) * 4);
        assert_eq!(body.padding_bytes % 4, 0);
        assert!(!body.misaligned);
    }

    #[test]
    fn test_validated_body_matches_budget() {
        let table = FormatTable::builtin().unwrap();
        let n = 60;
        let profile = profile(&[ExtensionTag::RvI, ExtensionTag::RvM]);
        let body = synth(&table, profile, Some(validator(4096)), n, 2).run().unwrap();
        assert_eq!(body.total_bytes(), (n + 64) * 4);
        assert!(body.lines.iter().all(|l| !l.contains("{LABEL}")));
        assert!(body.validator.accepted + body.validator.sequences_accepted > 0);
        assert_eq!(
            body.stats.resolve_duplicates,
            body.validator.accepted + body.validator.sequences_accepted
        );
    }

    #[test]
    fn test_control_flow_on_last_slot_is_skipped() {
        let rows: &[Row] = &[(ExtensionTag::RvI, "bne", "bne {RS1}, {RS2}, {LABEL}", &[Category::Branch])];
        let table = FormatTable::from_rows(rows).unwrap();
        let body = synth(&table, profile(&[ExtensionTag::RvI]), None, 1, 3)
            .run()
            .unwrap();
        assert_eq!(body.stats.skipped_slots, 1);
        assert_eq!(body.code_bytes, 0);
        assert!(body.lines.iter().all(|l| is_padding(l)));
    }

    #[test]
    fn test_loop_bodies_never_write_counter() {
        let rows: &[Row] = &[
            (ExtensionTag::RvI, "bne", "bne {RS1}, {RS2}, {LABEL}", &[Category::Branch]),
            (ExtensionTag::RvI, "add", "add {RD}, {RS1}, {RS2}", &[Category::Arith]),
        ];
        let table = FormatTable::from_rows(rows).unwrap();
        let body = synth(&table, profile(&[ExtensionTag::RvI]), Some(validator(8192)), 200, 4)
            .run()
            .unwrap();
        assert!(body.stats.backward_loops > 0);
        let mut in_loop = false;
        for line in &body.lines {
            if line.starts_with("bwd_") {
                in_loop = true;
            } else if line.starts_with("addi s11, s11, -1") {
                in_loop = false;
            } else if in_loop {
                assert!(!line.starts_with("add s11,"), "{}", line);
            }
        }
        assert_eq!(body.total_bytes(), (200 + 64) * 4);
    }

    #[test]
    fn test_indirect_jumps_load_their_target() {
        let rows: &[Row] = &[
            (ExtensionTag::RvI, "jalr", "jalr {RD}, 0({RS1})", &[Category::Jump]),
            (ExtensionTag::RvI, "xor", "xor {RD}, {RS1}, {RS2}", &[Category::Logic]),
        ];
        let table = FormatTable::from_rows(rows).unwrap();
        let body = synth(&table, profile(&[ExtensionTag::RvI]), Some(validator(4096)), 40, 5)
            .run()
            .unwrap();
        assert!(body.stats.indirect_jumps > 0);
        assert!(body.lines.iter().any(|l| l.starts_with("auipc ")));
        assert!(body.lines.iter().any(|l| l.starts_with("fwd_")));
    }

    #[test]
    fn test_odd_compressed_remainder_is_flagged() {
        let rows: &[Row] = &[(ExtensionTag::RvC, "c.mv", "c.mv {RD_N0}, {RS2_N0}", &[Category::Arith])];
        let table = FormatTable::from_rows(rows).unwrap();
        let body = synth(&table, profile(&[ExtensionTag::RvC]), None, 3, 6)
            .run()
            .unwrap();
        assert_eq!(body.code_bytes, 6);
        assert!(body.misaligned);
        assert_eq!(body.lines.iter().filter(|l| *l == "c.nop").count(), 1);
        assert_eq!(body.total_bytes(), (3 + 64) * 4);
    }

    #[test]
    fn test_expired_deadline_times_out() {
        let table = FormatTable::builtin().unwrap();
        let mut options = SynthOptions::new(10, 296).with_deadline(Duration::ZERO);
        options.seed_index = 4;
        let s = Synthesizer::new(
            &table,
            profile(&[ExtensionTag::RvI]),
            &HashSet::new(),
            Arc::new(HybridEncoder::table_only(64)),
            None,
            ChaCha8Rng::seed_from_u64(7),
            options,
        )
        .unwrap();
        assert!(matches!(s.run(), Err(SynthError::Timeout { seed: 4, .. })));
    }
}
