//! Spike-backed oracle
//!
//! Binds a shared library exporting a small C ABI around a Spike processor
//! instance. The library is opened at runtime; a missing library or symbol
//! is reported as `SimulatorInitFailure` so callers can fall back to the
//! reference interpreter.

use libloading::{Library, Symbol};
use std::ffi::{c_char, c_int, c_void, CStr, CString};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::{Oracle, OracleImage};
use crate::error::{Result, SynthError};

/// Environment variable naming the engine library.
pub const SPIKE_LIB_ENV: &str = "RVSYNTH_SPIKE_LIB";
pub const DEFAULT_SPIKE_LIB: &str = "libspike_engine.so";

type CreateFn = unsafe extern "C" fn() -> *mut c_void;
type DestroyFn = unsafe extern "C" fn(*mut c_void);
type InitializeFn = unsafe extern "C" fn(*mut c_void, *const c_char, *const c_char, u64) -> c_int;
type StatusFn = unsafe extern "C" fn(*mut c_void) -> c_int;
type ExecuteFn = unsafe extern "C" fn(*mut c_void, *const u32, *const u8, usize, u64) -> u64;
type RegFn = unsafe extern "C" fn(*mut c_void, u32) -> u64;
type PcFn = unsafe extern "C" fn(*mut c_void) -> u64;
type ErrorFn = unsafe extern "C" fn(*mut c_void) -> *const c_char;

#[derive(Clone, Copy)]
struct SpikeApi {
    create: CreateFn,
    destroy: DestroyFn,
    initialize: InitializeFn,
    set_checkpoint: StatusFn,
    restore_checkpoint: StatusFn,
    execute_sequence: ExecuteFn,
    get_xpr: RegFn,
    get_fpr: RegFn,
    get_csr: RegFn,
    get_pc: PcFn,
    last_trapped: StatusFn,
    last_error: Option<ErrorFn>,
}

fn symbol<T: Copy>(library: &Library, name: &str) -> Result<T> {
    let mut raw = name.as_bytes().to_vec();
    raw.push(0);
    let sym: Symbol<T> = unsafe { library.get(&raw) }.map_err(|e| {
        SynthError::SimulatorInitFailure(format!("missing symbol `{}`: {}", name, e))
    })?;
    Ok(*sym)
}

impl SpikeApi {
    fn load(library: &Library) -> Result<Self> {
        Ok(Self {
            create: symbol(library, "spike_engine_create")?,
            destroy: symbol(library, "spike_engine_destroy")?,
            initialize: symbol(library, "spike_engine_initialize")?,
            set_checkpoint: symbol(library, "spike_engine_set_checkpoint")?,
            restore_checkpoint: symbol(library, "spike_engine_restore_checkpoint")?,
            execute_sequence: symbol(library, "spike_engine_execute_sequence")?,
            get_xpr: symbol(library, "spike_engine_get_xpr")?,
            get_fpr: symbol(library, "spike_engine_get_fpr")?,
            get_csr: symbol(library, "spike_engine_get_csr")?,
            get_pc: symbol(library, "spike_engine_get_pc")?,
            last_trapped: symbol(library, "spike_engine_last_trapped")?,
            last_error: symbol(library, "spike_engine_last_error").ok(),
        })
    }
}

/// Library path from `RVSYNTH_SPIKE_LIB`, else the default soname.
pub fn default_library_path() -> PathBuf {
    std::env::var_os(SPIKE_LIB_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SPIKE_LIB))
}

pub struct SpikeOracle {
    api: SpikeApi,
    handle: *mut c_void,
    trapped: bool,
    // Declared last so the handle is destroyed before the library unloads.
    _library: Library,
}

impl SpikeOracle {
    pub fn load(path: &Path) -> Result<Self> {
        let library = unsafe { Library::new(path) }.map_err(|e| {
            SynthError::SimulatorInitFailure(format!("cannot load {}: {}", path.display(), e))
        })?;
        let api = SpikeApi::load(&library)?;
        let handle = unsafe { (api.create)() };
        if handle.is_null() {
            return Err(SynthError::SimulatorInitFailure(
                "spike_engine_create returned null".to_string(),
            ));
        }
        debug!(path = %path.display(), "loaded spike engine");
        Ok(Self {
            api,
            handle,
            trapped: false,
            _library: library,
        })
    }

    fn last_error(&self) -> String {
        let Some(f) = self.api.last_error else {
            return "unknown error".to_string();
        };
        let ptr = unsafe { f(self.handle) };
        if ptr.is_null() {
            return "unknown error".to_string();
        }
        unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
    }
}

impl Drop for SpikeOracle {
    fn drop(&mut self) {
        unsafe { (self.api.destroy)(self.handle) };
    }
}

fn c_string(s: &str) -> Result<CString> {
    CString::new(s).map_err(|_| SynthError::SimulatorInitFailure(format!("interior NUL in `{}`", s)))
}

impl Oracle for SpikeOracle {
    fn initialize(&mut self, image: &OracleImage, isa: &str, capacity: usize) -> Result<()> {
        let OracleImage::Elf(path) = image else {
            return Err(SynthError::SimulatorInitFailure(
                "spike needs a linked template image".to_string(),
            ));
        };
        let elf = c_string(&path.to_string_lossy())?;
        let isa_c = c_string(isa)?;
        let ok = unsafe {
            (self.api.initialize)(self.handle, elf.as_ptr(), isa_c.as_ptr(), capacity as u64)
        };
        if ok != 1 {
            return Err(SynthError::SimulatorInitFailure(self.last_error()));
        }
        info!(elf = %path.display(), isa, pc = format_args!("0x{:x}", self.get_pc()), "spike initialized");
        Ok(())
    }

    fn set_checkpoint(&mut self) -> Result<()> {
        if unsafe { (self.api.set_checkpoint)(self.handle) } != 1 {
            return Err(SynthError::Checkpoint(self.last_error()));
        }
        Ok(())
    }

    fn restore_checkpoint(&mut self) -> Result<()> {
        if unsafe { (self.api.restore_checkpoint)(self.handle) } != 1 {
            return Err(SynthError::Checkpoint(self.last_error()));
        }
        Ok(())
    }

    fn execute_sequence(&mut self, codes: &[u32], sizes: &[u8], max_steps: u64) -> Result<u64> {
        if codes.len() != sizes.len() {
            return Err(SynthError::encoding(
                format!("{} codes", codes.len()),
                format!("{} sizes supplied", sizes.len()),
            ));
        }
        let steps = unsafe {
            (self.api.execute_sequence)(
                self.handle,
                codes.as_ptr(),
                sizes.as_ptr(),
                codes.len(),
                max_steps,
            )
        };
        self.trapped = unsafe { (self.api.last_trapped)(self.handle) } != 0;
        Ok(steps)
    }

    fn get_xpr(&self, idx: u8) -> u64 {
        unsafe { (self.api.get_xpr)(self.handle, idx as u32) }
    }

    fn get_fpr(&self, idx: u8) -> u64 {
        unsafe { (self.api.get_fpr)(self.handle, idx as u32) }
    }

    fn get_csr(&self, addr: u16) -> u64 {
        unsafe { (self.api.get_csr)(self.handle, addr as u32) }
    }

    fn get_pc(&self) -> u64 {
        unsafe { (self.api.get_pc)(self.handle) }
    }

    fn was_last_execution_trapped(&self) -> bool {
        self.trapped
    }

    fn name(&self) -> &'static str {
        "spike"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_library_is_init_failure() {
        let err = SpikeOracle::load(Path::new("/nonexistent/libspike_engine.so"))
            .err()
            .unwrap();
        assert!(matches!(err, SynthError::SimulatorInitFailure(_)));
        assert!(err.to_string().contains("libspike_engine.so"));
    }

    #[test]
    fn test_default_library_name() {
        if std::env::var_os(SPIKE_LIB_ENV).is_none() {
            assert_eq!(default_library_path(), PathBuf::from(DEFAULT_SPIKE_LIB));
        }
    }
}
