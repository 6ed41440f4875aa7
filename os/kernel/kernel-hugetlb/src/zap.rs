//! Teardown of huge leaves and of whole ranges.

use crate::HugeTlb;
use kernel_info::memory::PAGE_SIZE;
use kernel_memory_addresses::{PageSize, Size2M, Size4K, VirtualAddress, VirtualRange};
use kernel_vmem::{AddressSpace, MmuGather, MmuNotifierEvent, PmdHandle, TableLevel, Vma};

impl HugeTlb {
    /// Clear the huge leaf in `pmd` and free its deposited table.
    ///
    /// The cleared range is added to `tlb`; the flush happens when the
    /// gather does. Returns `false`, touching nothing, if `pmd` does not hold
    /// a huge leaf.
    pub fn zap_huge_leaf(
        &self,
        tlb: &mut MmuGather<'_>,
        vma: &Vma,
        pmd: &PmdHandle,
        addr: VirtualAddress,
    ) -> bool {
        let mm = tlb.mm();
        let mut ptl = pmd.lock();
        if !ptl.get().is_huge() {
            return false;
        }

        let old = ptl.get_and_clear();
        tlb.remove_pmd_tlb_entry(addr.align_down::<Size2M>());
        let deposit = ptl.withdraw();
        drop(ptl);

        match deposit {
            Some(frame) => {
                mm.free_table(frame);
                mm.dec_nr_ptes();
                tlb.note_freed_table();
            }
            None => log::warn!("zapped huge leaf at {addr} in {:?} had no deposit", vma.range()),
        }

        self.stats.inc_pmd_zap();
        log::trace!("zapped {old:?} at {addr}");
        true
    }

    /// Remove every leaf in `range` of `vma`.
    ///
    /// Huge leaves fully inside the range are zapped whole; ones the range
    /// only partly covers are split first. A contiguous run the range cuts
    /// into is unfolded first, so its survivors drop the hint. PTE tables
    /// stay in place. Cleared entries are flushed in one batch, inside one
    /// notifier bracket.
    ///
    /// # Panics
    /// If `range` is not page aligned or leaves `vma`.
    pub fn unmap_range(&self, mm: &AddressSpace, vma: &Vma, range: VirtualRange) {
        assert!(
            vma.range().covers(&range)
                && range.start.is_aligned::<Size4K>()
                && range.end.is_aligned::<Size4K>(),
            "unmap of {range:?} outside {vma:?}"
        );
        log::debug!("unmap {range:?}");

        let bracket = mm.invalidate_range(range, MmuNotifierEvent::Unmap);
        let mut tlb = MmuGather::new(mm);

        let mut addr = range.start;
        while addr < range.end {
            let next = addr.granule_end::<Size2M>(range.end);
            if let Some(pmd) = mm.pmd_lookup(addr) {
                let whole = addr.is_aligned::<Size2M>() && next - addr == Size2M::SIZE;
                if pmd.read().is_huge() {
                    if whole && self.zap_huge_leaf(&mut tlb, vma, &pmd, addr) {
                        addr = next;
                        continue;
                    }
                    self.split_huge_leaf(mm, &pmd, None);
                }
                if let Some(table) = mm.pte_table(&pmd) {
                    let mut ptes = table.lock_ptes();
                    let mut va = addr;
                    while va < next {
                        let index = TableLevel::Pte.index_of(va);
                        ptes.unfold(index);
                        if !ptes.take(index).is_none() {
                            tlb.remove_pte_tlb_entry(va);
                        }
                        va += PAGE_SIZE;
                    }
                }
            }
            addr = next;
        }

        tlb.finish();
        drop(bracket);
    }
}
