// CLASSIFICATION: COMMUNITY
// Filename: region.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-19

//! Bookkeeping for the memory regions a load created.
//!
//! Regions are released as a complete set through
//! [`RegionTracker::release_all`]. Dropping a tracker does not unmap
//! anything: cooperative runs keep both images resident until the process
//! ends.

use std::ptr::NonNull;
use std::slice;

use log::debug;

use crate::memory::{MapError, MemoryMapper};

/// One mapped loadable segment.
#[derive(Debug)]
pub struct MappedRegion {
    base: NonNull<u8>,
    len: usize,
    segment: usize,
}

impl MappedRegion {
    pub(crate) fn new(base: NonNull<u8>, len: usize, segment: usize) -> Self {
        Self { base, len, segment }
    }

    /// Start address of the mapping.
    pub fn base(&self) -> usize {
        self.base.as_ptr() as usize
    }

    /// Mapping length, a whole number of pages.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Index of the program-header entry that produced this region.
    pub fn segment(&self) -> usize {
        self.segment
    }

    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.base() && addr < self.base() + self.len
    }

    /// Current contents of the region.
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: the mapping stays live until the owning tracker releases it,
        // which needs `&mut` access to the tracker.
        unsafe { slice::from_raw_parts(self.base.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as for `as_slice`; `&mut self` makes the borrow unique.
        unsafe { slice::from_raw_parts_mut(self.base.as_ptr(), self.len) }
    }
}

/// Ordered record of every region produced by one load.
#[derive(Debug, Default)]
pub struct RegionTracker {
    regions: Vec<MappedRegion>,
}

impl RegionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record(&mut self, region: MappedRegion) -> &mut MappedRegion {
        debug!(
            "tracking region 0x{:x}+0x{:x} for segment {}",
            region.base(),
            region.len,
            region.segment
        );
        self.regions.push(region);
        let last = self.regions.len() - 1;
        &mut self.regions[last]
    }

    /// Regions in creation order.
    pub fn regions(&self) -> &[MappedRegion] {
        &self.regions
    }

    pub fn regions_mut(&mut self) -> &mut [MappedRegion] {
        &mut self.regions
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.regions.iter().map(MappedRegion::len).sum()
    }

    /// Region covering `addr`, if any.
    pub fn find(&self, addr: usize) -> Option<&MappedRegion> {
        self.regions.iter().find(|r| r.contains(addr))
    }

    /// Unmap every recorded region.
    ///
    /// All regions are attempted even if one fails; the first failure is
    /// returned. Afterwards the tracker is empty.
    ///
    /// # Safety
    /// No code may still execute from, or hold pointers into, any of the
    /// regions.
    pub unsafe fn release_all<M: MemoryMapper>(&mut self, mapper: &M) -> Result<usize, MapError> {
        let mut first_err = None;
        let count = self.regions.len();
        for region in self.regions.drain(..) {
            debug!("releasing region 0x{:x}+0x{:x}", region.base(), region.len);
            if let Err(err) = mapper.unmap(region.base, region.len) {
                first_err.get_or_insert(err);
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(count),
        }
    }
}
