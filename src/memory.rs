// CLASSIFICATION: COMMUNITY
// Filename: memory.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-19

//! Anonymous memory mapping used for loaded segments.
//!
//! The loader never calls the kernel directly; it goes through a
//! [`MemoryMapper`] so mapping calls can be observed and counted.

use std::io;
use std::ptr::{self, NonNull};

use bitflags::bitflags;
use thiserror::Error;

/// Default mapping granularity.
pub const PAGE_SIZE: usize = 4096;

bitflags! {
    /// Access rights requested for a mapping.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Protection: i32 {
        const READ = libc::PROT_READ;
        const WRITE = libc::PROT_WRITE;
        const EXEC = libc::PROT_EXEC;
    }
}

/// Where a mapping must be placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Exactly at this address or not at all.
    Fixed(usize),
    /// Wherever the kernel chooses.
    Anywhere,
}

#[derive(Debug, Error)]
pub enum MapError {
    #[error("mmap of 0x{len:x} bytes at {placement:?} failed: {source}")]
    Map {
        placement: Placement,
        len: usize,
        #[source]
        source: io::Error,
    },
    #[error("mmap placed region at 0x{actual:x} instead of 0x{requested:x}")]
    Misplaced { requested: usize, actual: usize },
    #[error("mprotect of 0x{len:x} bytes at 0x{addr:x} failed: {source}")]
    Protect {
        addr: usize,
        len: usize,
        #[source]
        source: io::Error,
    },
    #[error("munmap of 0x{len:x} bytes at 0x{addr:x} failed: {source}")]
    Unmap {
        addr: usize,
        len: usize,
        #[source]
        source: io::Error,
    },
}

/// Facility for reserving and releasing zero-initialized memory.
pub trait MemoryMapper {
    /// Reserve `len` bytes of fresh zero-filled memory.
    fn map(&self, placement: Placement, len: usize, prot: Protection)
        -> Result<NonNull<u8>, MapError>;

    /// Release a range previously returned by [`MemoryMapper::map`].
    ///
    /// # Safety
    /// `addr..addr + len` must be a live mapping produced by this mapper and
    /// nothing may access it afterwards.
    unsafe fn unmap(&self, addr: NonNull<u8>, len: usize) -> Result<(), MapError>;

    /// Change the access rights of part of a mapping.
    ///
    /// # Safety
    /// `addr..addr + len` must lie inside a live mapping produced by this
    /// mapper, and no live reference may rely on the rights being removed.
    unsafe fn protect(&self, addr: NonNull<u8>, len: usize, prot: Protection)
        -> Result<(), MapError>;
}

impl<M: MemoryMapper + ?Sized> MemoryMapper for &M {
    fn map(
        &self,
        placement: Placement,
        len: usize,
        prot: Protection,
    ) -> Result<NonNull<u8>, MapError> {
        (**self).map(placement, len, prot)
    }

    unsafe fn unmap(&self, addr: NonNull<u8>, len: usize) -> Result<(), MapError> {
        (**self).unmap(addr, len)
    }

    unsafe fn protect(
        &self,
        addr: NonNull<u8>,
        len: usize,
        prot: Protection,
    ) -> Result<(), MapError> {
        (**self).protect(addr, len, prot)
    }
}

#[cfg(target_os = "linux")]
const MAP_FIXED_NOREPLACE: libc::c_int = libc::MAP_FIXED_NOREPLACE;
#[cfg(not(target_os = "linux"))]
const MAP_FIXED_NOREPLACE: libc::c_int = 0;

/// Private anonymous mappings via `mmap(2)` / `munmap(2)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LibcMapper;

impl MemoryMapper for LibcMapper {
    fn map(
        &self,
        placement: Placement,
        len: usize,
        prot: Protection,
    ) -> Result<NonNull<u8>, MapError> {
        let mut flags = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;
        let hint = match placement {
            Placement::Fixed(addr) => {
                flags |= MAP_FIXED_NOREPLACE;
                addr as *mut libc::c_void
            }
            Placement::Anywhere => ptr::null_mut(),
        };
        // SAFETY: anonymous mapping without MAP_FIXED never replaces an
        // existing mapping.
        let raw = unsafe { libc::mmap(hint, len, prot.bits(), flags, -1, 0) };
        if raw == libc::MAP_FAILED {
            return Err(MapError::Map {
                placement,
                len,
                source: io::Error::last_os_error(),
            });
        }
        if let Placement::Fixed(requested) = placement {
            // Kernels without MAP_FIXED_NOREPLACE treat the address as a hint.
            if raw as usize != requested {
                // SAFETY: `raw` was mapped just above and is not shared.
                unsafe { libc::munmap(raw, len) };
                return Err(MapError::Misplaced {
                    requested,
                    actual: raw as usize,
                });
            }
        }
        NonNull::new(raw.cast::<u8>()).ok_or(MapError::Misplaced {
            requested: hint as usize,
            actual: 0,
        })
    }

    unsafe fn unmap(&self, addr: NonNull<u8>, len: usize) -> Result<(), MapError> {
        if libc::munmap(addr.as_ptr().cast(), len) != 0 {
            return Err(MapError::Unmap {
                addr: addr.as_ptr() as usize,
                len,
                source: io::Error::last_os_error(),
            });
        }
        Ok(())
    }

    unsafe fn protect(
        &self,
        addr: NonNull<u8>,
        len: usize,
        prot: Protection,
    ) -> Result<(), MapError> {
        if libc::mprotect(addr.as_ptr().cast(), len, prot.bits()) != 0 {
            return Err(MapError::Protect {
                addr: addr.as_ptr() as usize,
                len,
                source: io::Error::last_os_error(),
            });
        }
        Ok(())
    }
}

/// Round `value` up to a multiple of `align` (a power of two); `None` if
/// the result does not fit in a `usize`.
pub fn round_up(value: usize, align: usize) -> Option<usize> {
    value
        .checked_add(align - 1)
        .map(|v| v & !(align - 1))
}

/// Round `value` down to a multiple of `align` (a power of two).
pub fn round_down(value: usize, align: usize) -> usize {
    value & !(align - 1)
}
