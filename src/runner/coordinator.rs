//! Seed scheduling across worker threads or child processes.

use crossbeam_channel::{unbounded, Sender};
use std::collections::VecDeque;
use std::io::Read;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::seed::{generate_seed, SeedOutcome};
use super::GenerationContext;
use crate::config::GeneratorConfig;
use crate::error::{Result, SynthError};

/// Exit status of a seed worker that hit a run-wide failure.
pub const EXIT_FATAL: i32 = 2;

/// Exit status of a seed worker whose cooperative deadline expired.
pub const EXIT_TIMEOUT: i32 = 3;

/// How often a process launcher polls its child.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Slack granted to a child past its deadline before it is killed.
const KILL_GRACE: Duration = Duration::from_secs(1);

/// Message sent from a worker to the coordinator. Every launched seed
/// produces exactly one.
#[derive(Debug, Clone)]
pub enum WorkerMessage {
    Finished { index: usize, outcome: Box<SeedOutcome> },
    TimedOut { index: usize },
    /// `fatal` failures stop every seed not yet launched.
    Failed {
        index: usize,
        message: String,
        fatal: bool,
    },
}

/// Starts one seed in the background.
pub trait SeedLauncher {
    fn launch(&self, index: usize, tx: Sender<WorkerMessage>) -> Result<JoinHandle<()>>;
}

/// What the retry rounds produced.
#[derive(Debug, Default)]
pub struct RoundSummary {
    pub outcomes: Vec<SeedOutcome>,
    /// Timeouts across all rounds, counting repeats.
    pub timeouts: usize,
    pub abandoned: Vec<usize>,
    pub failed: Vec<(usize, String)>,
    pub rounds: usize,
    pub aborted: Option<String>,
}

/// Run `seeds` seeds with at most `max_workers` in flight, requeueing
/// timed-out seeds for up to `max_retry_rounds` further rounds.
pub fn run_rounds<L: SeedLauncher>(
    launcher: &L,
    seeds: usize,
    max_workers: usize,
    max_retry_rounds: usize,
) -> RoundSummary {
    let mut summary = RoundSummary::default();
    let mut pending: Vec<usize> = (0..seeds).collect();

    for round in 0..=max_retry_rounds {
        summary.rounds = round + 1;
        let timed_out = run_round(launcher, &pending, max_workers, &mut summary);
        if summary.aborted.is_some() {
            summary.timeouts += timed_out.len();
            summary.abandoned = timed_out;
            break;
        }
        if timed_out.is_empty() {
            break;
        }
        summary.timeouts += timed_out.len();
        if round == max_retry_rounds {
            warn!(round, seeds = ?timed_out, "retry rounds exhausted");
            summary.abandoned = timed_out;
            break;
        }
        info!(round, count = timed_out.len(), "requeueing timed-out seeds");
        pending = timed_out;
    }

    summary.outcomes.sort_by_key(|o| o.index);
    summary.failed.sort_by_key(|(i, _)| *i);
    summary
}

fn run_round<L: SeedLauncher>(
    launcher: &L,
    indices: &[usize],
    max_workers: usize,
    summary: &mut RoundSummary,
) -> Vec<usize> {
    let (tx, rx) = unbounded();
    let mut queue: VecDeque<usize> = indices.iter().copied().collect();
    let mut handles = Vec::with_capacity(indices.len());
    let mut in_flight = 0;
    let mut timed_out = Vec::new();

    while !queue.is_empty() || in_flight > 0 {
        while in_flight < max_workers.max(1) {
            let Some(index) = queue.pop_front() else {
                break;
            };
            match launcher.launch(index, tx.clone()) {
                Ok(handle) => {
                    handles.push(handle);
                    in_flight += 1;
                }
                Err(e) => {
                    error!(index, error = %e, "failed to launch seed");
                    if e.is_fatal() {
                        abort(summary, &mut queue, index, &e.to_string());
                    }
                    summary.failed.push((index, e.to_string()));
                }
            }
        }
        if in_flight == 0 {
            continue;
        }

        match rx.recv() {
            Ok(WorkerMessage::Finished { index, outcome }) => {
                in_flight -= 1;
                debug!(index, bytes = outcome.code_bytes, "seed finished");
                summary.outcomes.push(*outcome);
            }
            Ok(WorkerMessage::TimedOut { index }) => {
                in_flight -= 1;
                warn!(index, "seed timed out");
                timed_out.push(index);
            }
            Ok(WorkerMessage::Failed {
                index,
                message,
                fatal,
            }) => {
                in_flight -= 1;
                error!(index, %message, fatal, "seed failed");
                if fatal {
                    abort(summary, &mut queue, index, &message);
                }
                summary.failed.push((index, message));
            }
            // unreachable while `tx` is alive
            Err(_) => break,
        }
    }

    for handle in handles {
        let _ = handle.join();
    }
    timed_out.sort_unstable();
    timed_out
}

/// Drop every queued seed; the first fatal failure names the reason.
fn abort(summary: &mut RoundSummary, queue: &mut VecDeque<usize>, index: usize, message: &str) {
    if summary.aborted.is_none() {
        warn!(index, skipped = queue.len(), "fatal failure, not launching remaining seeds");
        summary.aborted = Some(format!("seed {}: {}", index, message));
    }
    queue.clear();
}

/// Seeds as threads sharing one context. The deadline is cooperative.
pub struct ThreadLauncher {
    ctx: Arc<GenerationContext>,
}

impl ThreadLauncher {
    pub fn new(ctx: Arc<GenerationContext>) -> Self {
        Self { ctx }
    }
}

impl SeedLauncher for ThreadLauncher {
    fn launch(&self, index: usize, tx: Sender<WorkerMessage>) -> Result<JoinHandle<()>> {
        let ctx = Arc::clone(&self.ctx);
        let handle = thread::Builder::new()
            .name(format!("seed-{}", index))
            .spawn(move || {
                let result = panic::catch_unwind(AssertUnwindSafe(|| generate_seed(&ctx, index)));
                let msg = match result {
                    Ok(Ok(outcome)) => WorkerMessage::Finished {
                        index,
                        outcome: Box::new(outcome),
                    },
                    Ok(Err(SynthError::Timeout { .. })) => WorkerMessage::TimedOut { index },
                    Ok(Err(e)) => WorkerMessage::Failed {
                        index,
                        message: e.to_string(),
                        fatal: e.is_fatal(),
                    },
                    Err(_) => WorkerMessage::Failed {
                        index,
                        message: "worker panicked".to_string(),
                        fatal: false,
                    },
                };
                let _ = tx.send(msg);
            })?;
        Ok(handle)
    }
}

/// Seeds as `rvsynth seed-worker` children, killed once their deadline
/// (plus a short grace) passes.
pub struct ProcessLauncher {
    exe: PathBuf,
    config_json: String,
    cache_name: String,
    deadline: Duration,
}

impl ProcessLauncher {
    /// `exe` is the `rvsynth` binary that provides `seed-worker`.
    pub fn new(config: &GeneratorConfig, cache_name: &str, exe: PathBuf) -> Result<Self> {
        let config_json = serde_json::to_string(config)
            .map_err(|e| SynthError::Config(format!("cannot serialize config: {}", e)))?;
        Ok(Self {
            exe,
            config_json,
            cache_name: cache_name.to_string(),
            deadline: config.seed_deadline(),
        })
    }

    fn command(&self, index: usize) -> Command {
        let mut cmd = Command::new(&self.exe);
        cmd.arg("seed-worker")
            .arg("--index")
            .arg(index.to_string())
            .arg("--cache-name")
            .arg(&self.cache_name)
            .arg("--config-json")
            .arg(&self.config_json)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        cmd
    }
}

fn collect_child(mut child: Child, index: usize, limit: Duration) -> WorkerMessage {
    let started = Instant::now();
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if started.elapsed() > limit => {
                warn!(index, pid = child.id(), "killing seed worker past its deadline");
                let _ = child.kill();
                let _ = child.wait();
                return WorkerMessage::TimedOut { index };
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(e) => {
                return WorkerMessage::Failed {
                    index,
                    message: format!("wait failed: {}", e),
                    fatal: false,
                }
            }
        }
    };

    if status.code() == Some(EXIT_TIMEOUT) {
        return WorkerMessage::TimedOut { index };
    }
    if !status.success() {
        return WorkerMessage::Failed {
            index,
            message: format!("seed worker exited with {}", status),
            fatal: status.code() == Some(EXIT_FATAL),
        };
    }
    let mut stdout = String::new();
    if let Some(mut out) = child.stdout.take() {
        if let Err(e) = out.read_to_string(&mut stdout) {
            return WorkerMessage::Failed {
                index,
                message: format!("cannot read worker output: {}", e),
                fatal: false,
            };
        }
    }
    match serde_json::from_str::<SeedOutcome>(stdout.trim()) {
        Ok(outcome) => WorkerMessage::Finished {
            index,
            outcome: Box::new(outcome),
        },
        Err(e) => WorkerMessage::Failed {
            index,
            message: format!("malformed worker output: {}", e),
            fatal: false,
        },
    }
}

impl SeedLauncher for ProcessLauncher {
    fn launch(&self, index: usize, tx: Sender<WorkerMessage>) -> Result<JoinHandle<()>> {
        let child = self.command(index).spawn()?;
        debug!(index, pid = child.id(), "spawned seed worker");
        let limit = self.deadline + KILL_GRACE;
        let handle = thread::Builder::new()
            .name(format!("seed-{}-monitor", index))
            .spawn(move || {
                let _ = tx.send(collect_child(child, index, limit));
            })?;
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Times each seed out a fixed number of times before finishing it.
    struct ScriptedLauncher {
        timeouts_left: Mutex<HashMap<usize, usize>>,
        fail: Vec<usize>,
        fatal: Vec<usize>,
        launches: Mutex<Vec<usize>>,
    }

    impl ScriptedLauncher {
        fn new(timeouts: &[(usize, usize)], fail: &[usize]) -> Self {
            Self {
                timeouts_left: Mutex::new(timeouts.iter().copied().collect()),
                fail: fail.to_vec(),
                fatal: Vec::new(),
                launches: Mutex::new(Vec::new()),
            }
        }

        fn with_fatal(mut self, fatal: &[usize]) -> Self {
            self.fatal = fatal.to_vec();
            self
        }
    }

    impl SeedLauncher for ScriptedLauncher {
        fn launch(&self, index: usize, tx: Sender<WorkerMessage>) -> Result<JoinHandle<()>> {
            self.launches.lock().unwrap().push(index);
            let timeout = {
                let mut left = self.timeouts_left.lock().unwrap();
                match left.get_mut(&index) {
                    Some(n) if *n > 0 => {
                        *n -= 1;
                        true
                    }
                    _ => false,
                }
            };
            let fail = self.fail.contains(&index);
            let fatal = self.fatal.contains(&index);
            Ok(thread::spawn(move || {
                let msg = if timeout {
                    WorkerMessage::TimedOut { index }
                } else if fail || fatal {
                    WorkerMessage::Failed {
                        index,
                        message: "boom".to_string(),
                        fatal,
                    }
                } else {
                    WorkerMessage::Finished {
                        index,
                        outcome: Box::new(SeedOutcome::empty(index)),
                    }
                };
                tx.send(msg).unwrap();
            }))
        }
    }

    #[test]
    fn test_all_seeds_finish_in_one_round() {
        let launcher = ScriptedLauncher::new(&[], &[]);
        let summary = run_rounds(&launcher, 5, 2, 3);
        assert_eq!(summary.rounds, 1);
        let done: Vec<usize> = summary.outcomes.iter().map(|o| o.index).collect();
        assert_eq!(done, vec![0, 1, 2, 3, 4]);
        assert_eq!(summary.timeouts, 0);
    }

    #[test]
    fn test_timed_out_seeds_are_requeued() {
        let launcher = ScriptedLauncher::new(&[(1, 2), (3, 1)], &[]);
        let summary = run_rounds(&launcher, 4, 4, 5);
        assert_eq!(summary.rounds, 3);
        assert_eq!(summary.timeouts, 3);
        assert!(summary.abandoned.is_empty());
        assert_eq!(summary.outcomes.len(), 4);
        let launches = launcher.launches.lock().unwrap();
        assert_eq!(launches.iter().filter(|&&i| i == 1).count(), 3);
    }

    #[test]
    fn test_seed_abandoned_after_retry_rounds() {
        let launcher = ScriptedLauncher::new(&[(2, 10)], &[]);
        let summary = run_rounds(&launcher, 3, 1, 2);
        assert_eq!(summary.rounds, 3);
        assert_eq!(summary.abandoned, vec![2]);
        assert_eq!(summary.outcomes.len(), 2);
    }

    #[test]
    fn test_failures_are_not_retried() {
        let launcher = ScriptedLauncher::new(&[], &[0]);
        let summary = run_rounds(&launcher, 2, 2, 4);
        assert_eq!(summary.rounds, 1);
        assert_eq!(summary.failed, vec![(0, "boom".to_string())]);
        assert_eq!(launcher.launches.lock().unwrap().len(), 2);
        assert!(summary.aborted.is_none());
    }

    #[test]
    fn test_fatal_failure_stops_queued_seeds() {
        let launcher = ScriptedLauncher::new(&[], &[]).with_fatal(&[1]);
        let summary = run_rounds(&launcher, 5, 1, 3);
        assert_eq!(summary.rounds, 1);
        assert_eq!(*launcher.launches.lock().unwrap(), vec![0, 1]);
        assert_eq!(summary.outcomes.len(), 1);
        assert_eq!(summary.failed, vec![(1, "boom".to_string())]);
        assert_eq!(summary.aborted.as_deref(), Some("seed 1: boom"));
    }

    #[test]
    fn test_fatal_failure_abandons_pending_retries() {
        let launcher = ScriptedLauncher::new(&[(0, 5)], &[]).with_fatal(&[1]);
        let summary = run_rounds(&launcher, 2, 2, 3);
        assert_eq!(summary.rounds, 1);
        assert_eq!(summary.abandoned, vec![0]);
        assert!(summary.aborted.is_some());
    }

    #[test]
    fn test_process_launcher_reports_spawn_failure() {
        let config = GeneratorConfig::default();
        let launcher =
            ProcessLauncher::new(&config, "/rvsynth_test", PathBuf::from("/nonexistent/rvsynth"))
                .unwrap();
        let summary = run_rounds(&launcher, 2, 2, 1);
        assert_eq!(summary.failed.len(), 2);
        assert!(summary.outcomes.is_empty());
    }
}
