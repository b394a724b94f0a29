//! Checkpoint validation session
//!
//! Wraps one oracle and enforces the checkpoint protocol: at most one
//! checkpoint is outstanding, and every checkpoint ends in exactly one of
//! `confirm` (keep the new state) or `restore` (roll back). A `Checkpoint`
//! guard dropped without either is restored.

use tracing::{debug, warn};

use crate::error::{Result, SynthError};
use crate::isa::{RegRef, RegisterType};
use crate::oracle::{Oracle, OracleImage};

pub struct ValidationSession {
    oracle: Box<dyn Oracle>,
    outstanding: bool,
    initialized: bool,
    confirmed: usize,
    restored: usize,
}

impl ValidationSession {
    pub fn new(oracle: Box<dyn Oracle>) -> Self {
        Self {
            oracle,
            outstanding: false,
            initialized: false,
            confirmed: 0,
            restored: 0,
        }
    }

    /// Boot the oracle; `capacity` is the number of NOP slots in the image.
    pub fn initialize(&mut self, image: &OracleImage, isa: &str, capacity: usize) -> Result<()> {
        self.oracle.initialize(image, isa, capacity)?;
        self.initialized = true;
        self.outstanding = false;
        debug!(
            oracle = self.oracle.name(),
            isa,
            capacity,
            pc = format_args!("0x{:x}", self.oracle.get_pc()),
            "validation session ready"
        );
        Ok(())
    }

    pub fn oracle_name(&self) -> &'static str {
        self.oracle.name()
    }

    pub fn confirmed_count(&self) -> usize {
        self.confirmed
    }

    pub fn restored_count(&self) -> usize {
        self.restored
    }

    /// Save the oracle state. Fails while another checkpoint is outstanding.
    pub fn checkpoint(&mut self) -> Result<Checkpoint<'_>> {
        if !self.initialized {
            return Err(SynthError::Checkpoint("session not initialized".to_string()));
        }
        if self.outstanding {
            return Err(SynthError::Checkpoint(
                "a checkpoint is already outstanding".to_string(),
            ));
        }
        self.oracle.set_checkpoint()?;
        self.outstanding = true;
        Ok(Checkpoint {
            session: self,
            resolved: false,
        })
    }

    pub fn xpr(&self, idx: u8) -> u64 {
        self.oracle.get_xpr(idx)
    }

    pub fn fpr(&self, idx: u8) -> u64 {
        self.oracle.get_fpr(idx)
    }

    pub fn csr(&self, addr: u16) -> u64 {
        self.oracle.get_csr(addr)
    }

    pub fn pc(&self) -> u64 {
        self.oracle.get_pc()
    }

    pub fn trapped(&self) -> bool {
        self.oracle.was_last_execution_trapped()
    }

    pub fn read(&self, reg: RegRef) -> u64 {
        match reg {
            RegRef::Int(r) => self.xpr(r.index()),
            RegRef::Float(r) => self.fpr(r.index()),
        }
    }

    /// Current values of `regs`, in order.
    pub fn read_all(&self, regs: &[RegRef]) -> Vec<u64> {
        regs.iter().map(|r| self.read(*r)).collect()
    }

    fn finish_restore(&mut self) -> Result<()> {
        self.outstanding = false;
        self.restored += 1;
        self.oracle.restore_checkpoint()
    }

    fn finish_confirm(&mut self) {
        self.oracle.discard_checkpoint();
        self.outstanding = false;
        self.confirmed += 1;
    }
}

/// An outstanding checkpoint. Reads go through to the session.
pub struct Checkpoint<'a> {
    session: &'a mut ValidationSession,
    resolved: bool,
}

impl Checkpoint<'_> {
    pub fn execute(&mut self, codes: &[u32], sizes: &[u8], max_steps: u64) -> Result<u64> {
        self.session.oracle.execute_sequence(codes, sizes, max_steps)
    }

    /// Keep the executed state.
    pub fn confirm(mut self) {
        self.resolved = true;
        self.session.finish_confirm();
    }

    /// Roll back to the saved state.
    pub fn restore(mut self) -> Result<()> {
        self.resolved = true;
        self.session.finish_restore()
    }
}

impl std::ops::Deref for Checkpoint<'_> {
    type Target = ValidationSession;

    fn deref(&self) -> &ValidationSession {
        self.session
    }
}

impl Drop for Checkpoint<'_> {
    fn drop(&mut self) {
        if !self.resolved {
            if let Err(e) = self.session.finish_restore() {
                warn!(error = %e, "restoring abandoned checkpoint failed");
            }
        }
    }
}
