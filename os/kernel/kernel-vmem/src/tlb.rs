//! # Batched TLB Invalidation
//!
//! Teardown walks clear many entries; flushing each one would be wasteful.
//! [`MmuGather`] accumulates the span of cleared entries and issues a single
//! range flush when asked, or when it goes out of scope.

use crate::AddressSpace;
use kernel_info::memory::{PAGE_SIZE, PMD_SIZE};
use kernel_memory_addresses::{VirtualAddress, VirtualRange};

/// Accumulator for one teardown pass.
pub struct MmuGather<'a> {
    mm: &'a AddressSpace,
    pending: Option<VirtualRange>,
    cleared_pmds: usize,
    cleared_ptes: usize,
    freed_tables: usize,
    flushes: usize,
}

impl<'a> MmuGather<'a> {
    #[must_use]
    pub const fn new(mm: &'a AddressSpace) -> Self {
        Self {
            mm,
            pending: None,
            cleared_pmds: 0,
            cleared_ptes: 0,
            freed_tables: 0,
            flushes: 0,
        }
    }

    #[must_use]
    pub const fn mm(&self) -> &'a AddressSpace {
        self.mm
    }

    fn widen(&mut self, range: VirtualRange) {
        self.pending = Some(match self.pending {
            Some(p) => p.union(&range),
            None => range,
        });
    }

    /// A huge leaf covering `addr` was cleared.
    pub fn remove_pmd_tlb_entry(&mut self, addr: VirtualAddress) {
        self.cleared_pmds += 1;
        self.widen(VirtualRange::with_len(addr, PMD_SIZE));
    }

    /// A base leaf at `addr` was cleared.
    pub fn remove_pte_tlb_entry(&mut self, addr: VirtualAddress) {
        self.cleared_ptes += 1;
        self.widen(VirtualRange::with_len(addr, PAGE_SIZE));
    }

    /// A table page was released during this pass.
    pub const fn note_freed_table(&mut self) {
        self.freed_tables += 1;
    }

    /// Range still waiting for a flush.
    #[must_use]
    pub const fn pending(&self) -> Option<VirtualRange> {
        self.pending
    }

    #[must_use]
    pub const fn cleared_pmds(&self) -> usize {
        self.cleared_pmds
    }

    #[must_use]
    pub const fn cleared_ptes(&self) -> usize {
        self.cleared_ptes
    }

    #[must_use]
    pub const fn freed_tables(&self) -> usize {
        self.freed_tables
    }

    /// Flushes issued so far.
    #[must_use]
    pub const fn flushes(&self) -> usize {
        self.flushes
    }

    /// Flush the pending range now.
    pub fn flush(&mut self) {
        if let Some(range) = self.pending.take() {
            log::trace!("gather flush {range:?}");
            self.mm.arch().flush_tlb_range(range);
            self.flushes += 1;
        }
    }

    /// Flush and end the pass.
    pub fn finish(mut self) {
        self.flush();
    }
}

impl Drop for MmuGather<'_> {
    fn drop(&mut self) {
        self.flush();
    }
}
