//! # Regions
//!
//! A [`Vma`] is one contiguous, page-aligned user-address range with uniform
//! flags and protection. [`VmaTree`] keeps the regions of one address space
//! ordered by start and answers the neighbor and free-gap queries that
//! placement and splitting need.

use crate::prot::PageProtection;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use core::fmt;
use kernel_memory_addresses::{Size4K, VirtualAddress, VirtualRange};
use kernel_sync::SpinLock;

bitflags::bitflags! {
    /// Region flags.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
    pub struct VmaFlags: u64 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const EXEC = 1 << 2;
        const SHARED = 1 << 3;
        const MAYREAD = 1 << 4;
        const MAYWRITE = 1 << 5;
        const MAYEXEC = 1 << 6;
        const MAYSHARE = 1 << 7;
        const GROWSDOWN = 1 << 8;
        /// Device memory; never treated as ordinary RAM.
        const IO = 1 << 14;
        /// Raw PFN mapping without page descriptors.
        const PFNMAP = 1 << 10;
        /// Cannot be grown by remap.
        const DONTEXPAND = 1 << 18;
        /// Excluded from core dumps.
        const DONTDUMP = 1 << 26;
        /// Backed by a DMA-BUF and eligible for PMD leaves.
        const DMABUF_HUGE = 1 << 40;
    }
}

impl VmaFlags {
    /// Flags every raw PFN mapping carries once installed.
    pub const RAW_PFN: Self = Self::IO
        .union(Self::PFNMAP)
        .union(Self::DONTEXPAND)
        .union(Self::DONTDUMP);
}

/// Lock protecting a region's reverse-map structure.
pub type RmapLock = SpinLock<()>;

/// One user-address region.
#[derive(Clone)]
pub struct Vma {
    range: VirtualRange,
    flags: VmaFlags,
    prot: PageProtection,
    pgoff: u64,
    file_rmap: Option<Arc<RmapLock>>,
    anon_rmap: Option<Arc<RmapLock>>,
}

impl Vma {
    /// # Panics
    /// If the range is empty or not page aligned.
    #[must_use]
    pub fn new(start: VirtualAddress, end: VirtualAddress, flags: VmaFlags, prot: PageProtection) -> Self {
        assert!(
            start < end && start.is_aligned::<Size4K>() && end.is_aligned::<Size4K>(),
            "malformed region {start:?}..{end:?}"
        );
        Self {
            range: VirtualRange::new(start, end),
            flags,
            prot,
            pgoff: 0,
            file_rmap: None,
            anon_rmap: None,
        }
    }

    /// Attach the file-side reverse-map lock.
    #[must_use]
    pub fn with_file_rmap(mut self, lock: Arc<RmapLock>) -> Self {
        self.file_rmap = Some(lock);
        self
    }

    /// Attach the anonymous-side reverse-map lock.
    #[must_use]
    pub fn with_anon_rmap(mut self, lock: Arc<RmapLock>) -> Self {
        self.anon_rmap = Some(lock);
        self
    }

    #[must_use]
    pub const fn with_pgoff(mut self, pgoff: u64) -> Self {
        self.pgoff = pgoff;
        self
    }

    #[inline]
    #[must_use]
    pub const fn start(&self) -> VirtualAddress {
        self.range.start
    }

    #[inline]
    #[must_use]
    pub const fn end(&self) -> VirtualAddress {
        self.range.end
    }

    #[inline]
    #[must_use]
    pub const fn range(&self) -> VirtualRange {
        self.range
    }

    #[inline]
    #[must_use]
    pub const fn len(&self) -> u64 {
        self.range.len()
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.range.is_empty()
    }

    #[inline]
    #[must_use]
    pub const fn contains(&self, addr: VirtualAddress) -> bool {
        self.range.contains(addr)
    }

    #[inline]
    #[must_use]
    pub const fn flags(&self) -> VmaFlags {
        self.flags
    }

    #[inline]
    pub fn insert_flags(&mut self, flags: VmaFlags) {
        self.flags.insert(flags);
    }

    #[inline]
    #[must_use]
    pub const fn prot(&self) -> PageProtection {
        self.prot
    }

    /// Page offset of the backing object; for raw PFN COW mappings, the
    /// first mapped frame.
    #[inline]
    #[must_use]
    pub const fn pgoff(&self) -> u64 {
        self.pgoff
    }

    #[inline]
    pub fn set_pgoff(&mut self, pgoff: u64) {
        self.pgoff = pgoff;
    }

    /// Private and potentially writable: writes would copy.
    #[inline]
    #[must_use]
    pub const fn is_cow_mapping(&self) -> bool {
        self.flags
            .intersection(VmaFlags::SHARED.union(VmaFlags::MAYWRITE))
            .bits()
            == VmaFlags::MAYWRITE.bits()
    }

    #[inline]
    #[must_use]
    pub const fn is_dmabuf_huge(&self) -> bool {
        self.flags.contains(VmaFlags::DMABUF_HUGE)
    }

    #[inline]
    #[must_use]
    pub fn file_rmap(&self) -> Option<&RmapLock> {
        self.file_rmap.as_deref()
    }

    #[inline]
    #[must_use]
    pub fn anon_rmap(&self) -> Option<&RmapLock> {
        self.anon_rmap.as_deref()
    }

    /// Move the bounds. Used by the registry when trimming.
    pub(crate) const fn set_range(&mut self, range: VirtualRange) {
        self.range = range;
    }
}

impl fmt::Debug for Vma {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vma")
            .field("range", &self.range)
            .field("flags", &self.flags)
            .field("prot", &self.prot)
            .field("pgoff", &self.pgoff)
            .finish_non_exhaustive()
    }
}

/// A region could not be registered.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VmaInsertError {
    #[error("region {new:?} overlaps existing region {existing:?}")]
    Overlap {
        new: VirtualRange,
        existing: VirtualRange,
    },
}

/// No gap satisfies an [`UnmappedAreaInfo`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UnmappedAreaError {
    #[error("no free gap of {length:#x} bytes in [{low:#x}, {high:#x})")]
    NoFit { length: u64, low: u64, high: u64 },
}

/// Parameters of a free-gap search.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct UnmappedAreaInfo {
    pub length: u64,
    /// Lowest acceptable start.
    pub low_limit: u64,
    /// Exclusive upper bound of the mapping.
    pub high_limit: u64,
    /// Start must have these bits clear (alignment - 1, or 0).
    pub align_mask: u64,
}

impl UnmappedAreaInfo {
    const fn no_fit(&self) -> UnmappedAreaError {
        UnmappedAreaError::NoFit {
            length: self.length,
            low: self.low_limit,
            high: self.high_limit,
        }
    }

    /// Lowest aligned start in `[gap_start, gap_end)` that fits.
    const fn fit_low(&self, gap_start: u64, gap_end: u64) -> Option<u64> {
        let Some(bumped) = gap_start.checked_add(self.align_mask) else {
            return None;
        };
        let candidate = bumped & !self.align_mask;
        match candidate.checked_add(self.length) {
            Some(end) if end <= gap_end => Some(candidate),
            _ => None,
        }
    }

    /// Highest aligned start in `[gap_start, gap_end)` that fits.
    const fn fit_high(&self, gap_start: u64, gap_end: u64) -> Option<u64> {
        let Some(top) = gap_end.checked_sub(self.length) else {
            return None;
        };
        let candidate = top & !self.align_mask;
        if candidate >= gap_start {
            Some(candidate)
        } else {
            None
        }
    }
}

/// Ordered, non-overlapping set of regions.
#[derive(Debug, Default, Clone)]
pub struct VmaTree {
    map: BTreeMap<VirtualAddress, Vma>,
}

impl VmaTree {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            map: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Register `vma`.
    ///
    /// # Errors
    /// [`VmaInsertError::Overlap`] if it intersects an existing region.
    pub fn insert(&mut self, vma: Vma) -> Result<(), VmaInsertError> {
        if let Some(existing) = self.find(vma.start())
            && existing.start() < vma.end()
        {
            return Err(VmaInsertError::Overlap {
                new: vma.range(),
                existing: existing.range(),
            });
        }
        self.map.insert(vma.start(), vma);
        Ok(())
    }

    /// Remove the region starting at `start`.
    pub fn remove(&mut self, start: VirtualAddress) -> Option<Vma> {
        self.map.remove(&start)
    }

    /// The region starting exactly at `start`.
    #[must_use]
    pub fn get(&self, start: VirtualAddress) -> Option<&Vma> {
        self.map.get(&start)
    }

    /// Mutable access to the region starting exactly at `start`.
    ///
    /// Bounds cannot be changed through this; use [`VmaTree::resize`].
    pub fn get_mut(&mut self, start: VirtualAddress) -> Option<&mut Vma> {
        self.map.get_mut(&start)
    }

    /// First region with `end > addr`; it may start above `addr`.
    #[must_use]
    pub fn find(&self, addr: VirtualAddress) -> Option<&Vma> {
        if let Some((_, vma)) = self.map.range(..=addr).next_back()
            && vma.end() > addr
        {
            return Some(vma);
        }
        self.map
            .range((core::ops::Bound::Excluded(addr), core::ops::Bound::Unbounded))
            .map(|(_, v)| v)
            .next()
    }

    /// The region containing `addr`.
    #[must_use]
    pub fn find_containing(&self, addr: VirtualAddress) -> Option<&Vma> {
        self.find(addr).filter(|v| v.contains(addr))
    }

    /// [`VmaTree::find`] together with the region before the result (or the
    /// last region if there is no result).
    #[must_use]
    pub fn find_prev(&self, addr: VirtualAddress) -> (Option<&Vma>, Option<&Vma>) {
        let vma = self.find(addr);
        let prev = match vma {
            Some(v) => self.map.range(..v.start()).next_back().map(|(_, p)| p),
            None => self.map.values().next_back(),
        };
        (vma, prev)
    }

    /// Change the bounds of the region starting at `start`.
    ///
    /// # Errors
    /// [`VmaInsertError::Overlap`] if the new bounds intersect a neighbor;
    /// the region keeps its old bounds.
    ///
    /// # Panics
    /// If there is no region at `start` or the new range is malformed.
    pub fn resize(&mut self, start: VirtualAddress, range: VirtualRange) -> Result<(), VmaInsertError> {
        let Some(mut vma) = self.map.remove(&start) else {
            panic!("no region starts at {start:?}");
        };
        let old = vma.range();
        vma.set_range(range);
        let probe = Vma::new(range.start, range.end, vma.flags(), vma.prot());
        if let Err(e) = self.insert(probe) {
            vma.set_range(old);
            self.map.insert(old.start, vma);
            return Err(e);
        }
        self.map.insert(range.start, vma);
        Ok(())
    }

    /// Lowest gap satisfying `info`.
    ///
    /// # Errors
    /// [`UnmappedAreaError::NoFit`] if none exists.
    pub fn unmapped_area(&self, info: &UnmappedAreaInfo) -> Result<VirtualAddress, UnmappedAreaError> {
        let mut gap_start = info.low_limit;
        for vma in self.map.values() {
            let vend = vma.end().as_u64();
            if vend <= gap_start {
                continue;
            }
            let gap_end = vma.start().as_u64().min(info.high_limit);
            if gap_end > gap_start
                && let Some(addr) = info.fit_low(gap_start, gap_end)
            {
                return Ok(VirtualAddress::new(addr));
            }
            gap_start = gap_start.max(vend);
            if gap_start >= info.high_limit {
                return Err(info.no_fit());
            }
        }
        info.fit_low(gap_start, info.high_limit)
            .map(VirtualAddress::new)
            .ok_or_else(|| info.no_fit())
    }

    /// Highest gap satisfying `info`.
    ///
    /// # Errors
    /// [`UnmappedAreaError::NoFit`] if none exists.
    pub fn unmapped_area_topdown(
        &self,
        info: &UnmappedAreaInfo,
    ) -> Result<VirtualAddress, UnmappedAreaError> {
        let mut gap_end = info.high_limit;
        for vma in self.map.values().rev() {
            let vstart = vma.start().as_u64();
            if vstart >= gap_end {
                continue;
            }
            let gap_start = vma.end().as_u64().max(info.low_limit);
            if gap_end > gap_start
                && let Some(addr) = info.fit_high(gap_start, gap_end)
            {
                return Ok(VirtualAddress::new(addr));
            }
            gap_end = gap_end.min(vstart);
            if gap_end <= info.low_limit {
                return Err(info.no_fit());
            }
        }
        info.fit_high(info.low_limit, gap_end)
            .map(VirtualAddress::new)
            .ok_or_else(|| info.no_fit())
    }
}
