//! POSIX shared-memory region holding the Bloom filter words.
//!
//! The parent creates the region (`create`), children open it by name
//! (`attach`). The creator unlinks the name on drop.

use libc::{
    c_int, c_void, close, fstat, ftruncate, mmap, munmap, shm_open, shm_unlink, MAP_FAILED,
    MAP_SHARED, PROT_READ, PROT_WRITE,
};
use std::ffi::CString;
use std::io;
use std::ptr;
use std::sync::atomic::AtomicU64;
use tracing::{error, trace};

use crate::error::{Result, SynthError};

pub struct SharedRegion {
    ptr: *mut u8,
    size: usize,
    fd: c_int,
    name: String,
    owner: bool,
}

// The mapping is only accessed through atomics.
unsafe impl Send for SharedRegion {}
unsafe impl Sync for SharedRegion {}

fn shm_err(what: &str, name: &str) -> SynthError {
    SynthError::SharedMemory(format!("{}('{}') failed: {}", what, name, io::Error::last_os_error()))
}

fn c_name(name: &str) -> Result<CString> {
    CString::new(name).map_err(|_| SynthError::SharedMemory(format!("invalid region name `{}`", name)))
}

impl SharedRegion {
    /// Create and zero a fresh region. A stale region with the same name is
    /// unlinked first.
    pub fn create(name: &str, size: usize) -> Result<Self> {
        if size == 0 || size % 8 != 0 {
            return Err(SynthError::SharedMemory(format!(
                "region size {} is not a positive multiple of 8",
                size
            )));
        }
        let cname = c_name(name)?;
        unsafe { shm_unlink(cname.as_ptr()) };
        let mode = (libc::S_IRUSR | libc::S_IWUSR) as libc::mode_t;
        let fd = unsafe { shm_open(cname.as_ptr(), libc::O_CREAT | libc::O_EXCL | libc::O_RDWR, mode) };
        if fd == -1 {
            return Err(shm_err("shm_open", name));
        }
        if unsafe { ftruncate(fd, size as libc::off_t) } != 0 {
            let err = shm_err("ftruncate", name);
            unsafe {
                close(fd);
                shm_unlink(cname.as_ptr());
            }
            return Err(err);
        }
        let ptr = match Self::map(fd, size, name) {
            Ok(p) => p,
            Err(e) => {
                unsafe {
                    close(fd);
                    shm_unlink(cname.as_ptr());
                }
                return Err(e);
            }
        };
        trace!(name, size, "created shared region");
        Ok(Self {
            ptr,
            size,
            fd,
            name: name.to_string(),
            owner: true,
        })
    }

    /// Map an existing region created by another process.
    pub fn attach(name: &str, size: usize) -> Result<Self> {
        let cname = c_name(name)?;
        let fd = unsafe { shm_open(cname.as_ptr(), libc::O_RDWR, 0) };
        if fd == -1 {
            return Err(shm_err("shm_open", name));
        }
        // Touching pages past the end of the object raises SIGBUS.
        let mut stat: libc::stat = unsafe { std::mem::zeroed() };
        if unsafe { fstat(fd, &mut stat) } != 0 {
            let err = shm_err("fstat", name);
            unsafe { close(fd) };
            return Err(err);
        }
        let actual = stat.st_size.max(0) as usize;
        if actual < size {
            unsafe { close(fd) };
            return Err(SynthError::SharedMemory(format!(
                "{}: region is {} bytes, {} required",
                name, actual, size
            )));
        }
        let ptr = match Self::map(fd, size, name) {
            Ok(p) => p,
            Err(e) => {
                unsafe { close(fd) };
                return Err(e);
            }
        };
        trace!(name, size, "attached shared region");
        Ok(Self {
            ptr,
            size,
            fd,
            name: name.to_string(),
            owner: false,
        })
    }

    fn map(fd: c_int, size: usize, name: &str) -> Result<*mut u8> {
        let mapped = unsafe { mmap(ptr::null_mut(), size, PROT_READ | PROT_WRITE, MAP_SHARED, fd, 0) };
        if mapped == MAP_FAILED {
            return Err(shm_err("mmap", name));
        }
        Ok(mapped as *mut u8)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// The region as 64-bit atomic words.
    pub fn words(&self) -> &[AtomicU64] {
        // mmap returns page-aligned memory and size is a multiple of 8.
        unsafe { std::slice::from_raw_parts(self.ptr as *const AtomicU64, self.size / 8) }
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        unsafe {
            if munmap(self.ptr as *mut c_void, self.size) != 0 {
                error!("munmap failed: {:?}", io::Error::last_os_error());
            }
            close(self.fd);
            if self.owner {
                if let Ok(cname) = CString::new(self.name.as_str()) {
                    shm_unlink(cname.as_ptr());
                }
            }
        }
        trace!(name = %self.name, "released shared region");
    }
}
