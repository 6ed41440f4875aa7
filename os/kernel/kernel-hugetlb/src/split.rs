//! # Splitter
//!
//! Turns one huge leaf into 512 special base leaves that carry the same
//! attributes, using the PTE table deposited when the leaf was installed.
//!
//! ```text
//!  invalidate_start ─► lock ─► check ─► withdraw ─► clear PMD ─► fill 512 PTEs
//!                                                                    │
//!  invalidate_end ◄── unlock ◄── PMD → table ◄── release fence ◄────┘
//! ```
//!
//! Splitting something that is not a huge leaf is a no-op, so every entry
//! point here may be called speculatively.

use crate::HugeTlb;
use alloc::sync::Arc;
use core::sync::atomic::{Ordering, fence};
use kernel_info::memory::HPAGE_PMD_NR;
use kernel_memory_addresses::{Pfn, Size2M, VirtualAddress, VirtualRange};
use kernel_vmem::{
    AddressSpace, BaseLeaf, MmuNotifierEvent, PageTablePage, PmdEntry, PmdHandle, PmdKind,
    PteEntry, TableLevel, Vma, VmaTree, page_table_bug,
};

impl HugeTlb {
    /// Split the huge leaf in `pmd`.
    ///
    /// With `expected`, the split only happens if the leaf still maps that
    /// frame; a leaf that was replaced concurrently is left alone.
    ///
    /// Returns whether a leaf was split.
    ///
    /// # Panics
    /// If the leaf has no deposited table or the deposit is not empty.
    pub fn split_huge_leaf(&self, mm: &AddressSpace, pmd: &PmdHandle, expected: Option<Pfn>) -> bool {
        let window = pmd.window();
        let _bracket = mm.invalidate_range(window, MmuNotifierEvent::Clear);

        let mut ptl = pmd.lock();
        let PmdKind::Huge(leaf) = ptl.get().kind() else {
            return false;
        };
        if let Some(pfn) = expected
            && !(leaf.pfn..leaf.pfn + HPAGE_PMD_NR as u64).contains(&pfn)
        {
            log::trace!("split of {window:?} skipped, leaf maps {} not {pfn}", leaf.pfn);
            return false;
        }

        let Some(frame) = ptl.withdraw() else {
            page_table_bug!("huge leaf at {window:?} has no deposited table");
        };
        let Some(table) = mm.lookup_table(frame, TableLevel::Pte) else {
            page_table_bug!("deposited table {frame} for {window:?} is unknown");
        };

        let _old = ptl.get_and_clear();
        mm.arch().flush_tlb_range(window);

        {
            let mut ptes = table.lock_ptes_nested(&ptl);
            for i in 0..HPAGE_PMD_NR {
                if !ptes.get(i).is_none() {
                    page_table_bug!("deposited table {frame} slot {i} is populated");
                }
                let leaf = BaseLeaf::special(leaf.pfn + i as u64, leaf.attrs);
                ptes.set(i, PteEntry::leaf(leaf));
            }
        }

        // PTE writes must be visible before the PMD points at the table.
        fence(Ordering::Release);
        ptl.set(PmdEntry::table(frame));
        drop(ptl);

        self.stats.inc_pmd_split();
        log::trace!("split huge leaf {window:?} -> {}", leaf.pfn);
        true
    }

    /// Split the huge leaf covering `addr`, if any.
    pub fn split_at_address(&self, mm: &AddressSpace, vma: &Vma, addr: VirtualAddress) -> bool {
        debug_assert!(vma.contains(addr), "{addr} outside {vma:?}");
        mm.pmd_lookup(addr)
            .is_some_and(|pmd| self.split_huge_leaf(mm, &pmd, None))
    }

    /// Split every huge leaf inside `vma`.
    ///
    /// Corrupt upper-level entries are reported and skipped. Yields to the
    /// scheduler every [`HugeTlbConfig::resched_every_puds`](crate::HugeTlbConfig)
    /// PUD entries.
    ///
    /// Returns the number of leaves split.
    pub fn split_whole_region(&self, mm: &AddressSpace, vma: &Vma) -> usize {
        let (start, end) = (vma.start().as_u64(), vma.end().as_u64());
        let mut splits = 0;
        let mut puds_seen = 0_u32;

        let mut addr = start;
        while addr < end {
            let next = level_end(addr, TableLevel::P4d, end);
            let p4d_index = TableLevel::P4d.index_of(VirtualAddress::new(addr));
            if let Some(pud_table) = mm.next_level(mm.root(), p4d_index) {
                let mut pud_addr = addr;
                while pud_addr < next {
                    let pud_next = level_end(pud_addr, TableLevel::Pud, next);
                    let index = TableLevel::Pud.index_of(VirtualAddress::new(pud_addr));
                    if let Some(pmd_table) = mm.next_level(&pud_table, index) {
                        splits += self.split_pmd_range(mm, &pmd_table, pud_addr, pud_next);
                    }
                    puds_seen += 1;
                    if puds_seen.is_multiple_of(self.config.resched_interval()) {
                        mm.arch().cond_resched();
                    }
                    pud_addr = pud_next;
                }
            }
            addr = next;
        }

        log::debug!("split {splits} huge leaves in {:?}", vma.range());
        splits
    }

    fn split_pmd_range(&self, mm: &AddressSpace, table: &Arc<PageTablePage>, start: u64, end: u64) -> usize {
        let mut splits = 0;
        let mut addr = start;
        while addr < end {
            let va = VirtualAddress::new(addr);
            let pmd = PmdHandle::new(Arc::clone(table), va);
            if pmd.read().is_huge() && self.split_huge_leaf(mm, &pmd, None) {
                splits += 1;
            }
            addr = level_end(addr, TableLevel::Pmd, end);
        }
        splits
    }

    /// Split the huge leaf covering `addr` if `addr` cuts through it.
    ///
    /// Nothing happens if `vma` never holds huge leaves, `addr` is 2 MiB
    /// aligned, or the surrounding 2 MiB window is not entirely inside `vma`.
    pub fn split_if_straddling(&self, mm: &AddressSpace, vma: &Vma, addr: VirtualAddress) -> bool {
        if !vma.is_dmabuf_huge() || addr.is_aligned::<Size2M>() {
            return false;
        }
        let window = VirtualRange::granule_of::<Size2M>(addr);
        if !vma.range().covers(&window) {
            return false;
        }
        self.split_at_address(mm, vma, addr)
    }

    /// Prepare `vma` for new bounds `[start, end)`.
    ///
    /// Splits huge leaves cut by the new start or end, and, for a positive
    /// `adjust_next`, the leaf cut by the following region's shifted start.
    pub fn adjust_boundaries(
        &self,
        mm: &AddressSpace,
        vmas: &VmaTree,
        vma: &Vma,
        start: VirtualAddress,
        end: VirtualAddress,
        adjust_next: i64,
    ) {
        self.split_if_straddling(mm, vma, start);
        self.split_if_straddling(mm, vma, end);

        if let Ok(delta) = u64::try_from(adjust_next)
            && delta > 0
            && let Some(next) = vmas.find(vma.end())
            && let Some(nstart) = next.start().checked_add(delta)
        {
            self.split_if_straddling(mm, next, nstart);
        }
    }
}

/// End of the `level` entry containing `addr`, clamped to `end`.
const fn level_end(addr: u64, level: TableLevel, end: u64) -> u64 {
    let span = level.entry_span();
    let boundary = (addr & !(span - 1)).wrapping_add(span);
    if boundary.wrapping_sub(1) < end - 1 {
        boundary
    } else {
        end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_end_clamps() {
        let gib = 1 << 30;
        assert_eq!(level_end(0, TableLevel::Pud, 3 * gib), gib);
        assert_eq!(level_end(gib + 5, TableLevel::Pud, 3 * gib), 2 * gib);
        assert_eq!(level_end(2 * gib, TableLevel::Pud, 2 * gib + 10), 2 * gib + 10);
        assert_eq!(level_end(0x20_1000, TableLevel::Pmd, u64::MAX), 0x40_0000);
    }
}
