//! Instruction validator
//!
//! Ties the encoder, the checkpoint session, the XOR cache and the bug
//! filter together. A candidate is accepted only when its source-operand
//! signature is new for its mnemonic, it matches no known bug, and it runs to
//! its fall-through address on the oracle. Every other outcome leaves the
//! oracle exactly where it was.

pub mod trace;

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, trace as trace_event};

use crate::bugfilter::BugFilter;
use crate::cache::{xor_signature, XorCache};
use crate::encoder::{CompiledInstruction, HybridEncoder};
use crate::error::{Result, SynthError};
use crate::jump::CompiledSequence;
use crate::parser::{InstructionParser, ParsedInstruction};
use crate::session::ValidationSession;
use trace::{DebugTrace, TraceRecord, TraceStatus};

/// Retry budget per logical slot.
pub const MAX_MUTATE_TIME: usize = 10;

/// Steps allowed beyond the instructions themselves, for the trap handler.
const TRAP_STEP_ALLOWANCE: u64 = 8;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ValidationOutcome {
    /// Executed and kept. `size` is the byte length actually consumed.
    Accepted {
        instructions: Vec<CompiledInstruction>,
        size: usize,
    },
    /// The signature is already in the cache.
    NotUnique,
    /// A known-bug pattern matched.
    Rejected { bug: String },
    /// Trapped on a compressed instruction, or did not fall through.
    Diverged { pc: u64, expected: u64 },
}

impl ValidationOutcome {
    pub fn is_accepted(&self) -> bool {
        self.accepted_size().is_some()
    }

    pub fn accepted_size(&self) -> Option<usize> {
        match self {
            ValidationOutcome::Accepted { size, .. } => Some(*size),
            _ => None,
        }
    }
}

/// Outcome counters for one validator.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorStats {
    pub accepted: usize,
    pub duplicates: usize,
    pub rejected_by_bug_filter: usize,
    pub diverged: usize,
    pub sequences_accepted: usize,
    pub sequences_rejected: usize,
}

impl ValidatorStats {
    pub fn merge(&mut self, other: &ValidatorStats) {
        self.accepted += other.accepted;
        self.duplicates += other.duplicates;
        self.rejected_by_bug_filter += other.rejected_by_bug_filter;
        self.diverged += other.diverged;
        self.sequences_accepted += other.sequences_accepted;
        self.sequences_rejected += other.sequences_rejected;
    }
}

/// Signature inputs: register values in operand order, then the immediate,
/// then the CSR address.
fn signature_values(parsed: &ParsedInstruction, register_values: &[u64]) -> Vec<u64> {
    let mut values = register_values.to_vec();
    if let Some(imm) = parsed.immediate {
        values.push(imm as u64);
    }
    if let Some(csr) = parsed.csr {
        values.push(csr as u64);
    }
    values
}

pub struct InstructionValidator {
    session: ValidationSession,
    encoder: Arc<HybridEncoder>,
    cache: Arc<XorCache>,
    filter: Arc<BugFilter>,
    trace: Option<DebugTrace>,
    stats: ValidatorStats,
}

impl InstructionValidator {
    /// `session` must already be initialized.
    pub fn new(
        session: ValidationSession,
        encoder: Arc<HybridEncoder>,
        cache: Arc<XorCache>,
        filter: Arc<BugFilter>,
    ) -> Self {
        Self {
            session,
            encoder,
            cache,
            filter,
            trace: None,
            stats: ValidatorStats::default(),
        }
    }

    pub fn with_trace(mut self, trace: DebugTrace) -> Self {
        self.trace = Some(trace);
        self
    }

    pub fn encoder(&self) -> &HybridEncoder {
        &self.encoder
    }

    pub fn session(&self) -> &ValidationSession {
        &self.session
    }

    pub fn stats(&self) -> &ValidatorStats {
        &self.stats
    }

    fn write_trace(&mut self, rec: &TraceRecord<'_>) {
        if let Some(t) = self.trace.as_mut() {
            if let Err(e) = t.record(rec) {
                debug!(error = %e, "debug trace write failed, disabling trace");
                self.trace = None;
            }
        }
    }

    /// Validate one instruction. Errors are encoding or oracle failures; a
    /// candidate that is merely unacceptable comes back as an outcome.
    pub fn validate(&mut self, text: &str) -> Result<ValidationOutcome> {
        let parsed =
            InstructionParser::parse(text).map_err(|e| SynthError::encoding(text, e.message))?;
        let compiled = self.encoder.encode(text)?;
        let code = compiled.machine_code;
        let size = compiled.size;

        let mut cp = self.session.checkpoint()?;
        let start = cp.pc();
        let register_values = cp.read_all(&parsed.sources);
        let values = signature_values(&parsed, &register_values);
        let signature = xor_signature(&values);

        if self.cache.contains(&parsed.mnemonic, signature) {
            let dest_values = cp.read_all(&parsed.dests);
            let csr = parsed.csr.map(|a| (a, cp.csr(a)));
            cp.restore()?;
            self.stats.duplicates += 1;
            trace_event!(text, signature = format_args!("0x{:x}", signature), "duplicate signature");
            self.write_trace(&TraceRecord {
                status: TraceStatus::Duplicate,
                text,
                machine_code: code,
                size,
                pc_after: start,
                sources: &parsed.sources,
                source_values: &register_values,
                dests: &parsed.dests,
                dest_values: &dest_values,
                immediate: parsed.immediate,
                csr,
                reason: None,
            });
            return Ok(ValidationOutcome::NotUnique);
        }

        cp.execute(&[code], &[size], 1 + TRAP_STEP_ALLOWANCE)?;
        let pc_after = cp.pc();
        let expected = start.wrapping_add(size as u64);
        let trapped = cp.trapped();
        let dest_values = cp.read_all(&parsed.dests);
        let csr = parsed.csr.map(|a| (a, cp.csr(a)));

        let diverged = pc_after != expected || (trapped && compiled.is_compressed());
        let bug = if diverged {
            None
        } else {
            self.filter
                .check(&parsed.mnemonic, &dest_values, &values)
                .map(str::to_string)
        };

        if diverged || bug.is_some() {
            cp.restore()?;
            self.write_trace(&TraceRecord {
                status: TraceStatus::Rejected,
                text,
                machine_code: code,
                size,
                pc_after,
                sources: &parsed.sources,
                source_values: &register_values,
                dests: &parsed.dests,
                dest_values: &dest_values,
                immediate: parsed.immediate,
                csr,
                reason: bug.as_deref(),
            });
            return Ok(match bug {
                Some(bug) => {
                    self.stats.rejected_by_bug_filter += 1;
                    debug!(text, %bug, "known bug matched");
                    ValidationOutcome::Rejected { bug }
                }
                None => {
                    self.stats.diverged += 1;
                    trace_event!(text, trapped, pc = format_args!("0x{:x}", pc_after), "candidate diverged");
                    ValidationOutcome::Diverged {
                        pc: pc_after,
                        expected,
                    }
                }
            });
        }

        // another worker may have inserted the same signature meanwhile
        if !self.cache.check_and_add(&parsed.mnemonic, signature) {
            cp.restore()?;
            self.stats.duplicates += 1;
            return Ok(ValidationOutcome::NotUnique);
        }
        cp.confirm();
        self.stats.accepted += 1;
        self.write_trace(&TraceRecord {
            status: TraceStatus::Accepted,
            text,
            machine_code: code,
            size,
            pc_after,
            sources: &parsed.sources,
            source_values: &register_values,
            dests: &parsed.dests,
            dest_values: &dest_values,
            immediate: parsed.immediate,
            csr,
            reason: None,
        });
        Ok(ValidationOutcome::Accepted {
            instructions: vec![compiled],
            size: size as usize,
        })
    }

    /// Execute a compiled control-flow sequence atomically. Members skip the
    /// uniqueness check and are screened only by unconditional bug entries.
    pub fn validate_sequence(&mut self, seq: &CompiledSequence) -> Result<ValidationOutcome> {
        for inst in seq.instructions.iter().filter(|i| !i.text.is_empty()) {
            let mnemonic = inst.text.split_whitespace().next().unwrap_or("");
            if let Some(bug) = self.filter.filter_known_bug(mnemonic, &[]) {
                let bug = bug.to_string();
                self.stats.sequences_rejected += 1;
                debug!(label = %seq.label, text = %inst.text, %bug, "sequence member matched a known bug");
                return Ok(ValidationOutcome::Rejected { bug });
            }
        }

        let codes = seq.codes();
        let sizes = seq.sizes();
        let total = seq.total_size();
        let mut cp = self.session.checkpoint()?;
        let start = cp.pc();
        let expected = start.wrapping_add(total as u64);
        let budget = seq.step_budget() + TRAP_STEP_ALLOWANCE * seq.instructions.len() as u64;
        let steps = cp.execute(&codes, &sizes, budget)?;
        let pc_after = cp.pc();
        if pc_after != expected {
            cp.restore()?;
            self.stats.sequences_rejected += 1;
            debug!(
                label = %seq.label,
                kind = %seq.kind,
                steps,
                pc = format_args!("0x{:x}", pc_after),
                expected = format_args!("0x{:x}", expected),
                "sequence did not reach its end"
            );
            return Ok(ValidationOutcome::Diverged {
                pc: pc_after,
                expected,
            });
        }
        cp.confirm();
        self.stats.sequences_accepted += 1;
        trace_event!(label = %seq.label, kind = %seq.kind, steps, bytes = total, "sequence accepted");
        Ok(ValidationOutcome::Accepted {
            instructions: seq.instructions.clone(),
            size: total,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::BloomParams;
    use crate::isa::IntRegister;
    use crate::jump::{BranchForm, JumpCompiler};
    use crate::oracle::{OracleImage, ReferenceOracle};

    fn validator_with(filter: BugFilter) -> InstructionValidator {
        let mut session = ValidationSession::new(Box::new(ReferenceOracle::new()));
        session
            .initialize(&OracleImage::flat(1024, 7), "rv64gc", 256)
            .unwrap();
        let cache = Arc::new(XorCache::local(BloomParams::for_workload(1, 100, 0.01, 1.5)));
        InstructionValidator::new(
            session,
            Arc::new(HybridEncoder::table_only(64)),
            cache,
            Arc::new(filter),
        )
    }

    fn validator() -> InstructionValidator {
        validator_with(BugFilter::new())
    }

    #[test]
    fn test_accepts_and_advances() {
        let mut v = validator();
        let pc = v.session().pc();
        let a1 = v.session().xpr(11);
        let out = v.validate("addi a0, a1, 5").unwrap();
        assert_eq!(out.accepted_size(), Some(4));
        assert_eq!(v.session().pc(), pc + 4);
        assert_eq!(v.session().xpr(10), a1.wrapping_add(5));
        assert_eq!(v.stats().accepted, 1);
    }

    #[test]
    fn test_same_sources_are_duplicates() {
        let mut v = validator();
        assert!(v.validate("add a0, a1, a2").unwrap().is_accepted());
        let pc = v.session().pc();
        let a3 = v.session().xpr(13);
        // a1/a2 unchanged: same mnemonic, same source values
        assert_eq!(v.validate("add a3, a1, a2").unwrap(), ValidationOutcome::NotUnique);
        assert_eq!(v.session().pc(), pc);
        assert_eq!(v.session().xpr(13), a3);
        // a different mnemonic has its own pool
        assert!(v.validate("sub a3, a1, a2").unwrap().is_accepted());
        assert_eq!(v.stats().duplicates, 1);
    }

    #[test]
    fn test_immediate_changes_signature() {
        let mut v = validator();
        assert!(v.validate("addi a0, a1, 1").unwrap().is_accepted());
        assert!(v.validate("addi a0, a1, 2").unwrap().is_accepted());
    }

    #[test]
    fn test_bug_filter_rejects_and_restores() {
        let mut filter = BugFilter::new();
        filter.add_bug("xor", "xor broken", &[]).unwrap();
        let mut v = validator_with(filter);
        let before = (v.session().pc(), v.session().xpr(10));
        let out = v.validate("xor a0, a1, a2").unwrap();
        assert_eq!(
            out,
            ValidationOutcome::Rejected {
                bug: "xor broken".to_string()
            }
        );
        assert_eq!((v.session().pc(), v.session().xpr(10)), before);
        assert!(v.session.checkpoint().is_ok());
    }

    #[test]
    fn test_trapped_compressed_diverges() {
        let mut v = validator();
        let pc = v.session().pc();
        let out = v.validate("c.ebreak").unwrap();
        assert!(matches!(out, ValidationOutcome::Diverged { .. }));
        assert_eq!(v.session().pc(), pc);
    }

    #[test]
    fn test_trapped_full_width_is_kept() {
        let mut v = validator();
        let pc = v.session().pc();
        let out = v.validate("ebreak").unwrap();
        assert_eq!(out.accepted_size(), Some(4));
        assert_eq!(v.session().pc(), pc + 4);
    }

    #[test]
    fn test_encoding_failure_is_error() {
        let mut v = validator();
        let err = v.validate("frobnicate a0, a1").unwrap_err();
        assert!(matches!(err, SynthError::EncodingFailure { .. }));
        assert!(v.session.checkpoint().is_ok());
    }

    #[test]
    fn test_forward_sequence_accepted_whole() {
        let mut v = validator();
        let enc = HybridEncoder::table_only(64);
        let filler: Vec<_> = ["add t0, t1, t2", "or a0, a1, a2", "and a3, a4, a5"]
            .iter()
            .map(|t| enc.encode(t).unwrap())
            .collect();
        let form = BranchForm::new("jal", vec![IntRegister::ZERO]);
        let seq = JumpCompiler::new(&enc)
            .compile_forward(&form, &filler, "fwd_0")
            .unwrap();
        let pc = v.session().pc();
        let out = v.validate_sequence(&seq).unwrap();
        assert_eq!(out.accepted_size(), Some(16));
        assert_eq!(v.session().pc(), pc + 16);
        assert_eq!(v.stats().sequences_accepted, 1);
    }

    #[test]
    fn test_backward_loop_runs_to_exit() {
        let mut v = validator();
        let enc = HybridEncoder::table_only(64);
        let body: Vec<_> = ["addi a0, a0, 1", "xor a1, a1, a2", "add a3, a3, a0"]
            .iter()
            .map(|t| enc.encode(t).unwrap())
            .collect();
        let seq = JumpCompiler::new(&enc)
            .compile_backward(IntRegister::S11, 3, &body, "bwd_0")
            .unwrap();
        let a0 = v.session().xpr(10);
        let out = v.validate_sequence(&seq).unwrap();
        assert!(out.is_accepted());
        assert_eq!(v.session().xpr(10), a0.wrapping_add(3));
        assert_eq!(v.session().xpr(27), 0);
    }

    #[test]
    fn test_sequence_member_with_unconditional_bug() {
        let mut filter = BugFilter::new();
        filter.add_bug("or", "or disabled", &[]).unwrap();
        filter.add_bug("add", "only with zero", &["0"]).unwrap();
        let mut v = validator_with(filter);
        let enc = HybridEncoder::table_only(64);
        let filler: Vec<_> = ["add t0, t1, t2", "or a0, a1, a2"]
            .iter()
            .map(|t| enc.encode(t).unwrap())
            .collect();
        let form = BranchForm::new("beq", vec![IntRegister::X10, IntRegister::X10]);
        let seq = JumpCompiler::new(&enc)
            .compile_forward(&form, &filler, "fwd_1")
            .unwrap();
        let pc = v.session().pc();
        let out = v.validate_sequence(&seq).unwrap();
        assert_eq!(
            out,
            ValidationOutcome::Rejected {
                bug: "or disabled".to_string()
            }
        );
        assert_eq!(v.session().pc(), pc);
    }

    #[test]
    fn test_trace_records_outcomes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("v.trace");
        let mut v = validator().with_trace(DebugTrace::create(&path, false, 64).unwrap());
        v.validate("add a0, a1, a2").unwrap();
        v.validate("add a4, a1, a2").unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("[ACCEPTED] add a0, a1, a2"));
        assert!(text.contains("[DUPLICATE] add a4, a1, a2"));
    }
}
