//! Low-level POSIX shared memory objects and mappings
//!
//! A channel named `X` is backed by two objects, `/X_hdr` and `/X_data`.
//! Objects are never unlinked implicitly: dropping a [`ShmRegion`] only
//! unmaps it, removal is an explicit [`unlink`].

use crate::error::{Result, ShmError};
use rustix::fd::OwnedFd;
use rustix::fs::{fstat, ftruncate};
use rustix::io::Errno;
use rustix::mm::{mmap, munmap, MapFlags, ProtFlags};
use rustix::shm::{shm_open, shm_unlink, Mode, ShmOFlags};
use std::ffi::CString;
use std::ptr::NonNull;

/// Suffix of the object holding the channel header
pub const HEADER_SUFFIX: &str = "_hdr";

/// Suffix of the object holding the channel slots
pub const DATA_SUFFIX: &str = "_data";

/// Build the POSIX object name for one region of a channel.
pub fn object_name(channel: &str, suffix: &str) -> String {
    if channel.starts_with('/') {
        format!("{}{}", channel, suffix)
    } else {
        format!("/{}{}", channel, suffix)
    }
}

fn object_mode() -> Mode {
    Mode::RUSR | Mode::WUSR | Mode::RGRP | Mode::WGRP
}

fn c_name(name: &str) -> Result<CString> {
    CString::new(name)
        .map_err(|_| ShmError::InvalidArgument(format!("name '{}' contains a NUL byte", name)))
}

/// How a region is opened and mapped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    ReadOnly,
    ReadWrite,
}

impl Access {
    fn oflags(self) -> ShmOFlags {
        match self {
            Access::ReadOnly => ShmOFlags::RDONLY,
            Access::ReadWrite => ShmOFlags::RDWR,
        }
    }

    fn prot(self) -> ProtFlags {
        match self {
            Access::ReadOnly => ProtFlags::READ,
            Access::ReadWrite => ProtFlags::READ | ProtFlags::WRITE,
        }
    }
}

/// An open, not yet mapped, shared memory object
pub struct ShmObject {
    fd: OwnedFd,
    name: String,
}

impl ShmObject {
    /// Create a shared memory object.
    ///
    /// With `exclusive` set, an existing object yields
    /// [`ShmError::ChannelExists`]; otherwise it is opened for reuse.
    pub fn create(name: &str, exclusive: bool) -> Result<Self> {
        let c_name = c_name(name)?;
        let mut flags = ShmOFlags::CREATE | ShmOFlags::RDWR;
        if exclusive {
            flags |= ShmOFlags::EXCL;
        }

        let fd = shm_open(c_name.as_c_str(), flags, object_mode()).map_err(|e| {
            if e == Errno::EXIST {
                ShmError::ChannelExists {
                    name: name.to_string(),
                }
            } else {
                ShmError::fatal("shm_open", e)
            }
        })?;

        Ok(Self {
            fd,
            name: name.to_string(),
        })
    }

    /// Open an existing shared memory object
    pub fn open(name: &str, access: Access) -> Result<Self> {
        let c_name = c_name(name)?;
        let fd = shm_open(c_name.as_c_str(), access.oflags(), Mode::empty()).map_err(|e| {
            if e == Errno::NOENT {
                ShmError::ChannelNotFound {
                    name: name.to_string(),
                }
            } else {
                ShmError::fatal("shm_open", e)
            }
        })?;

        Ok(Self {
            fd,
            name: name.to_string(),
        })
    }

    /// Current size of the object as reported by the OS
    pub fn len(&self) -> Result<usize> {
        let stat = fstat(&self.fd).map_err(|e| ShmError::fatal("fstat", e))?;
        Ok(stat.st_size as usize)
    }

    /// Whether the object has no backing bytes yet
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Resize the object
    pub fn set_len(&self, len: usize) -> Result<()> {
        ftruncate(&self.fd, len as u64).map_err(|e| ShmError::fatal("ftruncate", e))
    }

    /// Name of the object, including the leading '/'
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Map `len` bytes of the object. The descriptor is closed afterwards;
    /// the mapping stays valid.
    pub fn map(self, len: usize, access: Access) -> Result<ShmRegion> {
        if len == 0 {
            return Err(ShmError::InvalidArgument(format!(
                "cannot map zero bytes of '{}'",
                self.name
            )));
        }

        let addr = unsafe {
            mmap(
                std::ptr::null_mut(),
                len,
                access.prot(),
                MapFlags::SHARED,
                &self.fd,
                0,
            )
            .map_err(|e| ShmError::fatal("mmap", e))?
        };

        let addr = NonNull::new(addr.cast::<u8>()).ok_or_else(|| {
            ShmError::corrupted("mmap", format!("null mapping for '{}'", self.name))
        })?;

        Ok(ShmRegion {
            addr,
            len,
            access,
            name: self.name,
        })
    }
}

/// A mapped shared memory region, unmapped on drop
pub struct ShmRegion {
    addr: NonNull<u8>,
    len: usize,
    access: Access,
    name: String,
}

// SAFETY: the mapping is process-shared memory; synchronisation of its
// contents is the responsibility of the structures placed inside it.
unsafe impl Send for ShmRegion {}
unsafe impl Sync for ShmRegion {}

impl ShmRegion {
    /// Raw pointer to the start of the mapping
    #[inline(always)]
    pub fn as_ptr(&self) -> *mut u8 {
        self.addr.as_ptr()
    }

    /// Mapped length in bytes
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline(always)]
    pub fn access(&self) -> Access {
        self.access
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for ShmRegion {
    fn drop(&mut self) {
        unsafe {
            let _ = munmap(self.addr.as_ptr().cast(), self.len);
        }
    }
}

/// Unlink a shared memory object by name.
///
/// Returns `Ok(false)` if no such object existed.
pub fn unlink(name: &str) -> Result<bool> {
    let c_name = c_name(name)?;
    match shm_unlink(c_name.as_c_str()) {
        Ok(()) => Ok(true),
        Err(e) if e == Errno::NOENT => Ok(false),
        Err(e) => Err(ShmError::fatal("shm_unlink", e)),
    }
}
