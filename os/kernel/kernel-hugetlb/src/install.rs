//! # Installer
//!
//! Maps a physical frame range into a region, one PMD-sized chunk at a time.
//!
//! ```text
//! install_mapping
//!   ├─ page alignment            → Misaligned (nothing touched)
//!   ├─ frame span fits entries   → FrameOutOfRange (nothing touched)
//!   ├─ track_pfn_remap           → Track (nothing touched)
//!   ├─ tag region IO|PFNMAP|DONTEXPAND|DONTDUMP [|DMABUF_HUGE]
//!   ├─ COW must cover the region → InvalidCowRange
//!   ├─ flush_cache_range (once)
//!   └─ per 2 MiB chunk
//!        ├─ Huge: deposit PTE table, set huge leaf        (pmd_map += 1)
//!        └─ Base: pfn policy, fill PTEs, mark 64K runs    (contpte_map += 1)
//! ```
//!
//! A failing chunk stops the loop; earlier chunks stay mapped and the region
//! stays tagged.

use crate::HugeTlb;
use crate::error::InstallError;
use kernel_info::memory::{CONT_PTES, PAGE_SIZE, PMD_SIZE};
use kernel_memory_addresses::{
    Pfn, Size2M, Size4K, Size64K, VirtualAddress, VirtualRange, checked_align_up,
};
use kernel_vmem::{
    AddressSpace, BaseLeaf, EntryBits, HugeLeaf, LeafAttrs, PageProtection, PmdEntry, PmdHandle,
    PmdKind, PteEntry, TableLevel, Vma, VmaFlags, page_table_bug,
};

/// Leaf granularity for [`HugeTlb::install_mapping`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum InstallMode {
    /// One 2 MiB leaf per chunk. Address, frame and size must be 2 MiB aligned.
    Huge,
    /// 4 KiB leaves, grouped into contiguous runs where 64 KiB aligned.
    Base,
}

impl HugeTlb {
    /// Map `size` bytes of frames starting at `pfn` at `addr` inside `vma`.
    ///
    /// # Errors
    /// - [`InstallError::Misaligned`] if `addr` is not page aligned, or in
    ///   [`InstallMode::Huge`] if `addr`, `pfn` or `size` is not 2 MiB aligned.
    /// - [`InstallError::InvalidRange`] if the range is empty or leaves `vma`.
    /// - [`InstallError::FrameOutOfRange`] if a frame is too large for an entry.
    /// - [`InstallError::Track`] if the memory type cannot be reserved.
    /// - [`InstallError::InvalidCowRange`] for a partial copy-on-write mapping.
    /// - [`InstallError::OutOfMemory`] if a table page cannot be allocated.
    /// - [`InstallError::PermissionDenied`] if the PFN policy refuses a frame.
    ///
    /// # Panics
    /// If a target PMD or PTE is already populated.
    #[allow(clippy::too_many_arguments)]
    pub fn install_mapping(
        &self,
        mm: &AddressSpace,
        vma: &mut Vma,
        addr: VirtualAddress,
        pfn: Pfn,
        size: u64,
        prot: PageProtection,
        mode: InstallMode,
    ) -> Result<(), InstallError> {
        let misaligned = InstallError::Misaligned { addr, pfn, size };
        if !addr.is_aligned::<Size4K>() {
            return Err(misaligned);
        }
        let size = checked_align_up(size, PAGE_SIZE).ok_or(misaligned)?;
        if mode == InstallMode::Huge
            && !(addr.is_aligned::<Size2M>()
                && pfn.is_aligned::<Size2M>()
                && size.is_multiple_of(PMD_SIZE))
        {
            return Err(misaligned);
        }

        let range = match addr.checked_add(size) {
            Some(end) if size > 0 && vma.range().covers(&VirtualRange::new(addr, end)) => {
                VirtualRange::new(addr, end)
            }
            _ => {
                return Err(InstallError::InvalidRange {
                    range: VirtualRange::new(addr, addr.checked_add(size).unwrap_or(addr)),
                    region: vma.range(),
                });
            }
        };

        let frames = Pfn::frames_in(size);
        if !EntryBits::frames_fit(pfn, frames) {
            return Err(InstallError::FrameOutOfRange { pfn, frames });
        }

        let mut prot = prot;
        mm.pfn_policy()
            .track_pfn_remap(vma, &mut prot, pfn, addr, size)?;

        let result = self.install_tracked(mm, vma, range, pfn, prot, mode);
        if let Err(e) = &result {
            log::debug!("install of {range:?} -> {pfn} failed: {e}");
            mm.pfn_policy().untrack_pfn(vma, pfn, size);
        }
        result
    }

    fn install_tracked(
        &self,
        mm: &AddressSpace,
        vma: &mut Vma,
        range: VirtualRange,
        pfn: Pfn,
        prot: PageProtection,
        mode: InstallMode,
    ) -> Result<(), InstallError> {
        vma.insert_flags(VmaFlags::RAW_PFN);
        if mode == InstallMode::Huge {
            vma.insert_flags(VmaFlags::DMABUF_HUGE);
        }

        if vma.is_cow_mapping() {
            if range != vma.range() {
                return Err(InstallError::InvalidCowRange {
                    region: vma.range(),
                });
            }
            vma.set_pgoff(pfn.as_u64());
        }

        mm.arch().flush_cache_range(range);

        let attrs = LeafAttrs::fresh(prot);
        let mut addr = range.start;
        while addr < range.end {
            let next = addr.granule_end::<Size2M>(range.end);
            let chunk_pfn = pfn + Pfn::frames_in(addr - range.start);
            let pmd = mm.pmd_alloc(addr)?;
            match mode {
                InstallMode::Huge => self.install_huge(mm, &pmd, chunk_pfn, attrs)?,
                InstallMode::Base => {
                    self.install_base(mm, &pmd, VirtualRange::new(addr, next), chunk_pfn, attrs)?;
                }
            }
            addr = next;
        }
        Ok(())
    }

    /// Install one huge leaf, depositing a PTE table beneath it.
    ///
    /// An empty PTE table already linked from the slot is reused as the
    /// deposit instead of allocating a new one.
    fn install_huge(
        &self,
        mm: &AddressSpace,
        pmd: &PmdHandle,
        pfn: Pfn,
        attrs: LeafAttrs,
    ) -> Result<(), InstallError> {
        loop {
            let fresh = if pmd.read().is_none() {
                Some(mm.alloc_table(TableLevel::Pte)?)
            } else {
                None
            };

            let mut ptl = pmd.lock();
            let (deposit, spare) = match (ptl.get().kind(), fresh) {
                (PmdKind::None, Some(table)) => {
                    mm.inc_nr_ptes();
                    (table.frame(), None)
                }
                (PmdKind::None, None) => {
                    // Emptied since the unlocked read; allocate and retry.
                    continue;
                }
                (PmdKind::Table(frame), spare) => {
                    let Some(table) = mm.lookup_table(frame, TableLevel::Pte) else {
                        page_table_bug!("PMD for {:?} links unknown table {frame}", pmd.addr());
                    };
                    if table.lock_ptes_nested(&ptl).populated() != 0 {
                        page_table_bug!("huge install over populated PTE table at {:?}", pmd.addr());
                    }
                    (frame, spare)
                }
                (kind, _) => {
                    page_table_bug!("huge install over live PMD at {:?}: {kind:?}", pmd.addr());
                }
            };

            ptl.deposit(deposit);
            ptl.set(PmdEntry::huge(HugeLeaf { pfn, attrs }));
            drop(ptl);

            if let Some(spare) = spare {
                mm.free_table(spare.frame());
            }
            self.stats.inc_pmd_map();
            log::trace!("huge leaf {:?} -> {pfn}", pmd.addr());
            return Ok(());
        }
    }

    /// Fill `range` (inside one PMD window) with base leaves.
    fn install_base(
        &self,
        mm: &AddressSpace,
        pmd: &PmdHandle,
        range: VirtualRange,
        pfn: Pfn,
        attrs: LeafAttrs,
    ) -> Result<(), InstallError> {
        let Some(table) = mm.pte_alloc(pmd)? else {
            page_table_bug!("base install over huge or bad PMD at {:?}", pmd.addr());
        };

        let first = TableLevel::Pte.index_of(range.start);
        let count = usize::try_from(range.len() / PAGE_SIZE).unwrap_or(0);
        let slots = first..first + count;

        let mut ptes = table.lock_ptes();
        if !ptes.is_range_none(slots.clone()) {
            page_table_bug!("base install over populated PTEs in {range:?}");
        }

        let policy = mm.pfn_policy();
        for i in 0..count as u64 {
            if !policy.pfn_modify_allowed(pfn + i, attrs.prot) {
                return Err(InstallError::PermissionDenied { pfn: pfn + i });
            }
        }

        for (n, slot) in slots.enumerate() {
            let offset = n as u64;
            let va = range.start + offset * PAGE_SIZE;
            let leaf = BaseLeaf {
                contiguous: in_contiguous_run(range, va, pfn + offset),
                ..BaseLeaf::special(pfn + offset, attrs)
            };
            ptes.set(slot, PteEntry::leaf(leaf));
        }
        drop(ptes);

        self.stats.inc_contpte_map();
        log::trace!("{count} base leaves {range:?} -> {pfn}");
        Ok(())
    }
}

/// Whether the page at `va` (mapping `pfn`) lies in a 64 KiB run that is
/// aligned in both address spaces and fully inside `range`.
fn in_contiguous_run(range: VirtualRange, va: VirtualAddress, pfn: Pfn) -> bool {
    let run = VirtualRange::granule_of::<Size64K>(va);
    range.covers(&run)
        && pfn
            .as_u64()
            .checked_sub(va.offset::<Size64K>() / PAGE_SIZE)
            .is_some_and(|first| first.is_multiple_of(CONT_PTES as u64))
}
