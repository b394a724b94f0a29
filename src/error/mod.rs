//! Error taxonomy for instruction synthesis.
//!
//! Local recovery is the default: most variants abort only the current
//! instruction, slot or seed. `is_fatal` singles out resource unavailability
//! that must stop the whole run.

use std::time::Duration;
use thiserror::Error;

/// Errors raised by the synthesis pipeline.
#[derive(Debug, Error)]
pub enum SynthError {
    /// Both the table encoder and the assembler fallback rejected the text.
    #[error("cannot encode `{instruction}`: {reason}")]
    EncodingFailure { instruction: String, reason: String },

    /// The oracle could not be created or the template image failed to build.
    #[error("simulator initialization failed: {0}")]
    SimulatorInitFailure(String),

    /// No unique, bug-free candidate was found within the retry budget.
    #[error("validation exhausted for `{mnemonic}` after {attempts} attempts")]
    ValidationExhausted { mnemonic: String, attempts: usize },

    /// Seed generation ran past its deadline.
    #[error("seed {seed} exceeded its {limit:?} deadline")]
    Timeout { seed: usize, limit: Duration },

    /// A required external binary is absent.
    #[error("required tool `{tool}` is not available")]
    ToolchainMissing { tool: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid bug pattern: {0}")]
    InvalidBugPattern(String),

    #[error("shared memory error: {0}")]
    SharedMemory(String),

    #[error("template error: {0}")]
    Template(String),

    #[error("checkpoint protocol violation: {0}")]
    Checkpoint(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SynthError {
    pub fn encoding(instruction: impl Into<String>, reason: impl Into<String>) -> Self {
        SynthError::EncodingFailure {
            instruction: instruction.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error must abort the entire run rather than a slot or seed.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SynthError::ToolchainMissing { .. } | SynthError::SharedMemory(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, SynthError>;
