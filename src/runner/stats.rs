//! Run-level statistics.

use serde::Serialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use super::coordinator::RoundSummary;
use super::seed::SeedOutcome;
use crate::cache::{BloomParams, CacheStats, XorCache};
use crate::config::GeneratorConfig;
use crate::error::{Result, SynthError};
use crate::validator::ValidatorStats;

pub const RUN_STATS_FILE: &str = "run_stats.json";

#[derive(Debug, Clone, Serialize)]
pub struct FailedSeed {
    pub index: usize,
    pub message: String,
}

/// Totals over every finished seed, plus what did not finish.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub seeds_requested: usize,
    pub completed: Vec<usize>,
    /// Timeouts across all rounds; a seed retried twice counts twice.
    pub timeouts: usize,
    pub retry_rounds: usize,
    pub abandoned: Vec<usize>,
    pub failed: Vec<FailedSeed>,
    /// Set when a fatal failure stopped the run before every seed launched.
    pub aborted: Option<String>,
    pub instructions: usize,
    pub resolve_duplicates: usize,
    pub resolve_duplicates_fail: usize,
    pub encoding_failures: usize,
    pub validator: ValidatorStats,
    pub forward_jumps: usize,
    pub backward_loops: usize,
    pub indirect_jumps: usize,
    /// Seeds whose padding needed a `c.nop`.
    pub misaligned_padding: Vec<usize>,
    /// Assembler fallbacks in this process; zero for child processes.
    pub encoder_fallbacks: usize,
    pub bloom: BloomParams,
    pub cache: CacheStats,
    pub elapsed_secs: f64,
    pub seeds: Vec<SeedOutcome>,
}

impl RunReport {
    pub fn new(
        config: &GeneratorConfig,
        summary: RoundSummary,
        cache: &XorCache,
        encoder_fallbacks: usize,
        elapsed: Duration,
    ) -> Self {
        let mut report = Self {
            seeds_requested: config.seeds,
            completed: summary.outcomes.iter().map(|o| o.index).collect(),
            timeouts: summary.timeouts,
            retry_rounds: summary.rounds.saturating_sub(1),
            abandoned: summary.abandoned,
            failed: summary
                .failed
                .into_iter()
                .map(|(index, message)| FailedSeed { index, message })
                .collect(),
            aborted: summary.aborted,
            instructions: 0,
            resolve_duplicates: 0,
            resolve_duplicates_fail: 0,
            encoding_failures: 0,
            validator: ValidatorStats::default(),
            forward_jumps: 0,
            backward_loops: 0,
            indirect_jumps: 0,
            misaligned_padding: Vec::new(),
            encoder_fallbacks,
            bloom: cache.params(),
            cache: cache.stats(),
            elapsed_secs: elapsed.as_secs_f64(),
            seeds: Vec::new(),
        };
        for outcome in summary.outcomes {
            report.add(outcome);
        }
        report
    }

    fn add(&mut self, outcome: SeedOutcome) {
        let s = &outcome.synth;
        self.instructions += s.instructions;
        self.resolve_duplicates += s.resolve_duplicates;
        self.resolve_duplicates_fail += s.resolve_duplicates_fail;
        self.encoding_failures += s.encoding_failures;
        self.forward_jumps += s.forward_jumps;
        self.backward_loops += s.backward_loops;
        self.indirect_jumps += s.indirect_jumps;
        self.validator.merge(&outcome.validator);
        if outcome.misaligned {
            self.misaligned_padding.push(outcome.index);
        }
        self.seeds.push(outcome);
    }

    pub fn is_complete(&self) -> bool {
        self.completed.len() == self.seeds_requested
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self)
            .map_err(|e| SynthError::Config(format!("cannot serialize report: {}", e)))?;
        fs::write(path, text)?;
        Ok(())
    }

    pub fn print_summary(&self) {
        println!("Generation summary");
        println!("==================");
        println!(
            "Seeds:               {}/{} completed in {:.2}s",
            self.completed.len(),
            self.seeds_requested,
            self.elapsed_secs
        );
        println!("Instructions:        {}", self.instructions);
        println!(
            "Control flow:        {} forward, {} loops, {} indirect",
            self.forward_jumps, self.backward_loops, self.indirect_jumps
        );
        println!("Resolved duplicates: {}", self.resolve_duplicates);
        println!("Failed eliminations: {}", self.resolve_duplicates_fail);
        println!("Duplicates retried:  {}", self.validator.duplicates);
        println!("Known-bug rejects:   {}", self.validator.rejected_by_bug_filter);
        println!("Encoding failures:   {}", self.encoding_failures);
        println!(
            "Bloom filter:        {:.1} KiB, k={}, {} bits set",
            self.cache.size_kib, self.cache.num_hashes, self.cache.bits_set
        );
        if self.timeouts > 0 {
            println!(
                "Timeouts:            {} over {} retry rounds",
                self.timeouts, self.retry_rounds
            );
        }
        if !self.abandoned.is_empty() {
            println!("Abandoned seeds:     {:?}", self.abandoned);
        }
        for f in &self.failed {
            println!("Failed seed {}:       {}", f.index, f.message);
        }
        if let Some(reason) = &self.aborted {
            println!("Run aborted:         {}", reason);
        }
        if !self.misaligned_padding.is_empty() {
            println!("Misaligned padding:  {:?}", self.misaligned_padding);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::bloom_params;

    fn outcome(index: usize, misaligned: bool) -> SeedOutcome {
        let mut o = SeedOutcome::empty(index);
        o.misaligned = misaligned;
        o.synth.instructions = 10;
        o.synth.resolve_duplicates = 8;
        o.synth.resolve_duplicates_fail = 1;
        o.validator.duplicates = 4;
        o.validator.accepted = 10;
        o
    }

    #[test]
    fn test_report_totals() {
        let config = GeneratorConfig::default().with_seeds(3).with_instr_number(10);
        let summary = RoundSummary {
            outcomes: vec![outcome(0, false), outcome(2, true)],
            timeouts: 2,
            abandoned: vec![1],
            failed: Vec::new(),
            rounds: 3,
            aborted: None,
        };
        let cache = XorCache::local(bloom_params(&config));
        let report = RunReport::new(&config, summary, &cache, 0, Duration::from_millis(1500));
        assert_eq!(report.completed, vec![0, 2]);
        assert_eq!(report.instructions, 20);
        assert_eq!(report.resolve_duplicates, 16);
        assert_eq!(report.resolve_duplicates_fail, 2);
        assert_eq!(report.validator.duplicates, 8);
        assert_eq!(report.validator.accepted, 20);
        assert!(report.aborted.is_none());
        assert_eq!(report.misaligned_padding, vec![2]);
        assert_eq!(report.retry_rounds, 2);
        assert_eq!(report.bloom.expected_elements, 45);
        assert!(!report.is_complete());
    }

    #[test]
    fn test_report_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = GeneratorConfig::default().with_seeds(1);
        let cache = XorCache::local(bloom_params(&config));
        let report = RunReport::new(&config, RoundSummary::default(), &cache, 0, Duration::ZERO);
        let path = dir.path().join(RUN_STATS_FILE);
        report.write_json(&path).unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["seeds_requested"], 1);
        assert!(value["bloom"]["size_bits"].as_u64().unwrap() > 0);
        assert_eq!(value["validator"]["rejected_by_bug_filter"], 0);
    }

    #[test]
    fn test_report_carries_abort_reason() {
        let config = GeneratorConfig::default().with_seeds(4);
        let summary = RoundSummary {
            outcomes: vec![outcome(0, false)],
            failed: vec![(1, "required tool `as` is not available".to_string())],
            aborted: Some("seed 1: required tool `as` is not available".to_string()),
            rounds: 1,
            ..RoundSummary::default()
        };
        let cache = XorCache::local(bloom_params(&config));
        let report = RunReport::new(&config, summary, &cache, 0, Duration::ZERO);
        assert!(!report.is_complete());
        assert_eq!(report.failed[0].index, 1);
        assert!(report.aborted.as_deref().unwrap().contains("not available"));
    }
}
