//! Locked access to PMD slots and PTE tables.

use crate::entry::{PmdEntry, PteEntry};
use crate::table::{PageTablePage, TableLevel, TableState};
use alloc::sync::Arc;
use core::ops::Range;
use kernel_info::memory::CONT_PTES;
use kernel_memory_addresses::{Pfn, Size2M, VirtualAddress, VirtualRange};
use kernel_sync::SpinLockGuard;

/// One PMD slot: a PMD table page and an index into it.
///
/// Cheap to clone. The slot's lock is the table page's lock.
#[derive(Clone)]
pub struct PmdHandle {
    table: Arc<PageTablePage>,
    index: usize,
    addr: VirtualAddress,
}

impl PmdHandle {
    /// Slot of PMD table `table` covering `va`.
    #[must_use]
    pub fn new(table: Arc<PageTablePage>, va: VirtualAddress) -> Self {
        debug_assert_eq!(table.level(), TableLevel::Pmd);
        Self {
            index: TableLevel::Pmd.index_of(va),
            addr: va.align_down::<Size2M>(),
            table,
        }
    }

    #[inline]
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    /// Start of the 2 MiB window this slot covers.
    #[inline]
    #[must_use]
    pub const fn addr(&self) -> VirtualAddress {
        self.addr
    }

    #[inline]
    #[must_use]
    pub const fn window(&self) -> VirtualRange {
        VirtualRange::granule_of::<Size2M>(self.addr)
    }

    #[inline]
    #[must_use]
    pub fn table(&self) -> &Arc<PageTablePage> {
        &self.table
    }

    /// Take the slot's lock.
    #[inline]
    #[must_use]
    pub fn lock(&self) -> PmdGuard<'_> {
        PmdGuard {
            guard: self.table.lock(),
            table: &self.table,
            index: self.index,
        }
    }

    /// Take the slot's lock while holding `outer`, which must be a
    /// different lock.
    #[inline]
    #[must_use]
    pub fn lock_nested<'a>(&'a self, outer: &PmdGuard<'_>) -> PmdGuard<'a> {
        PmdGuard {
            guard: self.table.lock_nested(&outer.guard),
            table: &self.table,
            index: self.index,
        }
    }

    /// Whether both slots are guarded by the same lock.
    #[inline]
    #[must_use]
    pub fn same_lock(&self, other: &Self) -> bool {
        self.table.same_lock(&other.table)
    }

    /// Unlocked snapshot; only a hint unless the caller excludes writers.
    #[inline]
    #[must_use]
    pub fn read(&self) -> PmdEntry {
        PmdEntry::from_bits(self.table.read(self.index))
    }
}

impl core::fmt::Debug for PmdHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "PmdHandle({}[{}] @ {:?})", self.table.frame(), self.index, self.addr)
    }
}

/// Held lock on a PMD slot (and on every slot of the same table).
pub struct PmdGuard<'a> {
    guard: SpinLockGuard<'a, TableState>,
    table: &'a PageTablePage,
    index: usize,
}

impl PmdGuard<'_> {
    #[inline]
    #[must_use]
    pub fn get(&self) -> PmdEntry {
        PmdEntry::from_bits(self.guard.get(self.index))
    }

    #[inline]
    pub fn set(&mut self, entry: PmdEntry) {
        self.guard.set(self.index, entry.bits());
    }

    /// Atomically read and clear the slot.
    #[inline]
    pub fn get_and_clear(&mut self) -> PmdEntry {
        PmdEntry::from_bits(self.guard.take(self.index))
    }

    /// Read another slot covered by this same lock.
    ///
    /// # Panics
    /// If `other` lives in a different table.
    #[must_use]
    pub fn get_sibling(&self, other: &PmdHandle) -> PmdEntry {
        self.assert_sibling(other);
        PmdEntry::from_bits(self.guard.get(other.index))
    }

    /// Write another slot covered by this same lock.
    ///
    /// # Panics
    /// If `other` lives in a different table.
    pub fn set_sibling(&mut self, other: &PmdHandle, entry: PmdEntry) {
        self.assert_sibling(other);
        self.guard.set(other.index, entry.bits());
    }

    fn assert_sibling(&self, other: &PmdHandle) {
        assert!(
            self.table.same_lock(&other.table),
            "slot {other:?} is not covered by this lock"
        );
    }

    /// Reserve a PTE table for a later split of a leaf in this table.
    #[inline]
    pub fn deposit(&mut self, frame: Pfn) {
        self.guard.deposit(frame);
    }

    /// Take back a reserved PTE table.
    #[inline]
    pub fn withdraw(&mut self) -> Option<Pfn> {
        self.guard.withdraw()
    }

    /// Number of reserved PTE tables on this lock domain.
    #[inline]
    #[must_use]
    pub fn deposited(&self) -> usize {
        self.guard.deposited()
    }

    #[inline]
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }
}

/// Held lock on a PTE table.
pub struct PteGuard<'a> {
    guard: SpinLockGuard<'a, TableState>,
}

impl PteGuard<'_> {
    #[inline]
    #[must_use]
    pub fn get(&self, index: usize) -> PteEntry {
        PteEntry::from_bits(self.guard.get(index))
    }

    #[inline]
    pub fn set(&mut self, index: usize, entry: PteEntry) {
        self.guard.set(index, entry.bits());
    }

    #[inline]
    pub fn take(&mut self, index: usize) -> PteEntry {
        PteEntry::from_bits(self.guard.take(index))
    }

    /// Drop the contiguous hint from every member of the 64 KiB run that
    /// holds `index`. Call before changing any single member of a run.
    pub fn unfold(&mut self, index: usize) {
        if !self.get(index).is_contiguous() {
            return;
        }
        let first = index - index % CONT_PTES;
        for i in first..first + CONT_PTES {
            let entry = self.get(i);
            if !entry.is_none() {
                self.set(i, entry.with_contiguous(false));
            }
        }
    }

    /// Whether every slot in `range` is empty.
    #[inline]
    #[must_use]
    pub fn is_range_none(&self, range: Range<usize>) -> bool {
        self.guard.is_range_none(range)
    }

    /// Number of occupied slots.
    #[inline]
    #[must_use]
    pub fn populated(&self) -> usize {
        self.guard.populated()
    }
}

impl PageTablePage {
    /// Lock a PTE table.
    #[inline]
    #[must_use]
    pub fn lock_ptes(&self) -> PteGuard<'_> {
        debug_assert_eq!(self.level(), TableLevel::Pte);
        PteGuard { guard: self.lock() }
    }

    /// Lock a PTE table while holding a PMD lock.
    #[inline]
    #[must_use]
    pub fn lock_ptes_nested<'a>(&'a self, outer: &PmdGuard<'_>) -> PteGuard<'a> {
        debug_assert_eq!(self.level(), TableLevel::Pte);
        PteGuard {
            guard: self.lock_nested(&outer.guard),
        }
    }

    /// Lock a second PTE table while holding `outer`, which must be a
    /// different lock.
    #[inline]
    #[must_use]
    pub fn lock_ptes_after<'a>(&'a self, outer: &PteGuard<'_>) -> PteGuard<'a> {
        debug_assert_eq!(self.level(), TableLevel::Pte);
        PteGuard {
            guard: self.lock_nested(&outer.guard),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{HugeLeaf, LeafAttrs};
    use crate::prot::PageProtection;

    fn pmd_table() -> Arc<PageTablePage> {
        Arc::new(PageTablePage::new(TableLevel::Pmd, Pfn::new(42)))
    }

    #[test]
    fn guard_reads_and_clears() {
        let table = pmd_table();
        let h = PmdHandle::new(Arc::clone(&table), VirtualAddress::new(0x60_1000));
        assert_eq!(h.index(), 3);
        assert_eq!(h.addr(), VirtualAddress::new(0x60_0000));

        let leaf = PmdEntry::huge(HugeLeaf {
            pfn: Pfn::new(0x400),
            attrs: LeafAttrs::fresh(PageProtection::USER_RW),
        });
        let mut g = h.lock();
        g.set(leaf);
        g.deposit(Pfn::new(7));
        assert_eq!(g.get_and_clear(), leaf);
        assert!(g.get().is_none());
        assert_eq!(g.withdraw(), Some(Pfn::new(7)));
        drop(g);
        assert!(!table.is_locked());
    }

    #[test]
    fn siblings_share_one_lock() {
        let table = pmd_table();
        let a = PmdHandle::new(Arc::clone(&table), VirtualAddress::new(0));
        let b = PmdHandle::new(Arc::clone(&table), VirtualAddress::new(0x20_0000));
        assert!(a.same_lock(&b));

        let mut g = a.lock();
        g.set_sibling(&b, PmdEntry::table(Pfn::new(9)));
        assert_eq!(g.get_sibling(&b), PmdEntry::table(Pfn::new(9)));
        drop(g);
        assert_eq!(b.read(), PmdEntry::table(Pfn::new(9)));
    }

    #[test]
    #[should_panic(expected = "is not covered by this lock")]
    fn foreign_sibling_is_rejected() {
        let a = PmdHandle::new(pmd_table(), VirtualAddress::new(0));
        let b = PmdHandle::new(pmd_table(), VirtualAddress::new(0));
        let g = a.lock();
        let _ = g.get_sibling(&b);
    }

    #[test]
    fn second_pte_table_locks_after_first() {
        let a = PageTablePage::new(TableLevel::Pte, Pfn::new(1));
        let b = PageTablePage::new(TableLevel::Pte, Pfn::new(2));
        let mut ga = a.lock_ptes();
        let mut gb = b.lock_ptes_after(&ga);
        let leaf = PteEntry::leaf(crate::entry::BaseLeaf::special(
            Pfn::new(0x77),
            LeafAttrs::fresh(PageProtection::USER_RO),
        ));
        ga.set(5, leaf);
        gb.set(6, ga.take(5).mk_soft_dirty());
        assert!(ga.get(5).is_none());
        assert!(gb.get(6).base_leaf().is_some_and(|l| l.attrs.soft_dirty));
        drop(gb);
        drop(ga);
        assert!(!a.is_locked() && !b.is_locked());
    }

    #[test]
    fn unfold_clears_the_whole_run() {
        let table = PageTablePage::new(TableLevel::Pte, Pfn::new(1));
        let attrs = LeafAttrs::fresh(PageProtection::USER_RW);
        let mut ptes = table.lock_ptes();
        for i in 0..2 * CONT_PTES {
            let leaf = crate::entry::BaseLeaf {
                contiguous: true,
                ..crate::entry::BaseLeaf::special(Pfn::new(0x100 + i as u64), attrs)
            };
            ptes.set(i, PteEntry::leaf(leaf));
        }

        ptes.unfold(CONT_PTES + 3);
        assert!((0..CONT_PTES).all(|i| ptes.get(i).is_contiguous()));
        assert!((CONT_PTES..2 * CONT_PTES).all(|i| !ptes.get(i).is_contiguous()));
        assert_eq!(ptes.get(CONT_PTES).base_leaf().map(|l| l.pfn), Some(Pfn::new(0x110)));

        ptes.unfold(CONT_PTES + 3);
        ptes.unfold(2 * CONT_PTES);
        assert_eq!(ptes.populated(), 2 * CONT_PTES);
    }

    #[test]
    fn nested_pmd_locks() {
        let a = PmdHandle::new(pmd_table(), VirtualAddress::new(0));
        let b = PmdHandle::new(pmd_table(), VirtualAddress::new(0));
        assert!(!a.same_lock(&b));
        let ga = a.lock();
        let gb = b.lock_nested(&ga);
        assert!(gb.get().is_none());
    }
}
