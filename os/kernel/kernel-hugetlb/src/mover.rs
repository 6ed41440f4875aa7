//! # Mover
//!
//! Relocates leaves from one address to another in the same address space.
//!
//! Two PMD slots may share a lock (same table page) or not. When they do not,
//! the old lock is always taken first and the deposited PTE table follows the
//! leaf into the new table page's bookkeeping.
//!
//! ```text
//!  rmap locks (file, anon) ─► old PMD lock ─► [new PMD lock, nested]
//!        clear old ─► move deposit ─► set new ─► flush old ─► unlock
//! ```

use crate::HugeTlb;
use kernel_info::memory::PAGE_SIZE;
use kernel_memory_addresses::{PageSize, Size2M, VirtualAddress, VirtualRange};
use kernel_vmem::{
    AddressSpace, MmuNotifierEvent, PmdHandle, PteEntry, PteGuard, RmapLock, TableLevel, Vma,
    page_table_bug,
};

impl HugeTlb {
    /// Move the huge leaf in `old_pmd` (mapping `old_addr`) to `new_pmd`
    /// (mapping `new_addr`).
    ///
    /// With `take_rmap_locks`, the region's file and anonymous reverse-map
    /// locks are held for the duration of the move.
    ///
    /// Returns `false`, touching nothing, if either address is not 2 MiB
    /// aligned or `old_pmd` does not hold a huge leaf.
    ///
    /// # Panics
    /// If `new_pmd` is not empty, or the old slot has no deposited table
    /// when one must move.
    #[allow(clippy::too_many_arguments)]
    pub fn move_huge_leaf(
        &self,
        mm: &AddressSpace,
        vma: &Vma,
        old_addr: VirtualAddress,
        new_addr: VirtualAddress,
        old_pmd: &PmdHandle,
        new_pmd: &PmdHandle,
        take_rmap_locks: bool,
    ) -> bool {
        if !old_addr.is_aligned::<Size2M>() || !new_addr.is_aligned::<Size2M>() {
            return false;
        }

        let (_file, _anon) = if take_rmap_locks {
            (
                vma.file_rmap().map(RmapLock::lock),
                vma.anon_rmap().map(RmapLock::lock),
            )
        } else {
            (None, None)
        };

        let dst = new_pmd.read();
        if !dst.is_none() {
            page_table_bug!("move to {new_addr} over live {dst:?}");
        }

        let mut old_ptl = old_pmd.lock();
        if !old_ptl.get().is_huge() {
            return false;
        }
        let mut new_ptl = if old_pmd.same_lock(new_pmd) {
            None
        } else {
            Some(new_pmd.lock_nested(&old_ptl))
        };

        let entry = old_ptl.get_and_clear();
        let force_flush = entry.is_present();

        if let Some(new_ptl) = new_ptl.as_mut() {
            let Some(frame) = old_ptl.withdraw() else {
                page_table_bug!("huge leaf at {old_addr} has no deposited table");
            };
            new_ptl.deposit(frame);
        }

        let entry = if self.config.soft_dirty_on_move {
            entry.mk_soft_dirty()
        } else {
            entry
        };
        match new_ptl.as_mut() {
            Some(new_ptl) => new_ptl.set(entry),
            None => old_ptl.set_sibling(new_pmd, entry),
        }

        if force_flush {
            mm.arch()
                .flush_tlb_range(VirtualRange::granule_of::<Size2M>(old_addr));
        }
        drop(new_ptl);
        drop(old_ptl);

        log::trace!("moved huge leaf {old_addr} -> {new_addr}: {entry:?}");
        true
    }

    /// Move `len` bytes of mappings from `old_addr` to `new_addr`.
    ///
    /// Whole huge leaves move with [`move_huge_leaf`](Self::move_huge_leaf);
    /// partial ones are split and moved entry by entry. Base leaves arrive
    /// without the contiguous hint, and runs they leave behind are unfolded.
    /// Stops early if a destination table cannot be allocated.
    ///
    /// Returns the number of bytes processed.
    pub fn move_range(
        &self,
        mm: &AddressSpace,
        vma: &Vma,
        old_addr: VirtualAddress,
        new_addr: VirtualAddress,
        len: u64,
        take_rmap_locks: bool,
    ) -> u64 {
        let Some(old_end) = old_addr.checked_add(len) else {
            return 0;
        };
        let old_range = VirtualRange::new(old_addr, old_end);
        log::debug!("move {old_range:?} -> {new_addr}");

        mm.arch().flush_cache_range(old_range);
        let _bracket = mm.invalidate_range(old_range, MmuNotifierEvent::Unmap);

        let mut moved = 0;
        while moved < len {
            let old = old_addr + moved;
            let new = new_addr + moved;
            let extent = (old.granule_end::<Size2M>(old_end) - old)
                .min(new.granule_end::<Size2M>(new + (len - moved)) - new);

            let Some(old_pmd) = mm.pmd_lookup(old) else {
                moved += extent;
                continue;
            };
            let Ok(new_pmd) = mm.pmd_alloc(new) else {
                break;
            };

            if old_pmd.read().is_huge() {
                if extent == Size2M::SIZE
                    && new_pmd.read().is_none()
                    && self.move_huge_leaf(mm, vma, old, new, &old_pmd, &new_pmd, take_rmap_locks)
                {
                    moved += extent;
                    continue;
                }
                self.split_huge_leaf(mm, &old_pmd, None);
            }

            let Some(old_table) = mm.pte_table(&old_pmd) else {
                moved += extent;
                continue;
            };
            let Ok(Some(new_table)) = mm.pte_alloc(&new_pmd) else {
                break;
            };

            let mut old_ptes = old_table.lock_ptes();
            let mut new_ptes = (!old_table.same_lock(&new_table))
                .then(|| new_table.lock_ptes_after(&old_ptes));

            let mut present = false;
            let mut offset = 0;
            while offset < extent {
                let index = TableLevel::Pte.index_of(old + offset);
                old_ptes.unfold(index);
                let entry = old_ptes.take(index);
                if !entry.is_none() {
                    present = true;
                    let entry = if self.config.soft_dirty_on_move {
                        entry.mk_soft_dirty()
                    } else {
                        entry
                    };
                    let to = new + offset;
                    match new_ptes.as_mut() {
                        Some(dst) => place(dst, to, entry),
                        None => place(&mut old_ptes, to, entry),
                    }
                }
                offset += PAGE_SIZE;
            }

            if present {
                mm.arch()
                    .flush_tlb_range(VirtualRange::new(old, old + extent));
            }
            drop(new_ptes);
            drop(old_ptes);

            moved += extent;
        }

        log::debug!("moved {moved:#x} of {len:#x} bytes from {old_addr}");
        moved
    }
}

fn place(ptes: &mut PteGuard<'_>, addr: VirtualAddress, entry: PteEntry) {
    let index = TableLevel::Pte.index_of(addr);
    let dst = ptes.get(index);
    if !dst.is_none() {
        page_table_bug!("move to {addr} over live {dst:?}");
    }
    ptes.set(index, entry);
}
