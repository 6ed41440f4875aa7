//! # Address Space
//!
//! [`AddressSpace`] owns one page-table forest and everything needed to change
//! it safely: the table allocator, the architecture hooks, the PFN policy,
//! the MMU-notifier subscribers and the page-table accounting counters.
//!
//! ## Walking
//!
//! - [`AddressSpace::pmd_lookup`] walks without allocating.
//! - [`AddressSpace::pmd_alloc`] populates missing P4D/PUD/PMD tables.
//! - [`AddressSpace::pte_alloc`] populates a missing PTE table under a PMD.
//!
//! Allocation happens with no lock held; the new page is published under the
//! parent's lock only if the slot is still empty, otherwise it is returned to
//! the allocator and the winner's table is used.
//!
//! ## Accounting
//!
//! `nr_ptes` counts PTE tables that belong to this address space, including
//! ones deposited beneath huge leaves. `nr_pmds` counts PMD tables.

mod pmd;

pub use pmd::{PmdGuard, PmdHandle, PteGuard};

use crate::arch::{ArchOps, NoopArch};
use crate::entry::{BaseLeaf, HugeLeaf, LeafAttrs, PmdEntry, PmdKind, PteEntry, TableEntry};
use crate::layout::MmapLayout;
use crate::mmu_notifier::{InvalidateGuard, MmuNotifier, MmuNotifierEvent, MmuNotifierRange};
use crate::pfn_policy::{AllowAllPfns, PfnPolicy};
use crate::pool::{AllocError, PageTableAlloc};
use crate::table::{PageTablePage, TableLevel};
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicI64, Ordering};
use kernel_memory_addresses::{
    PhysicalAddress, Pfn, Size2M, Size4K, VirtualAddress, VirtualRange,
};
use kernel_sync::SpinLock;

/// Result of translating one virtual address.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Translation {
    /// Mapped by a 2 MiB leaf.
    Huge(HugeLeaf),
    /// Mapped by a 4 KiB leaf.
    Base(BaseLeaf),
}

impl Translation {
    #[must_use]
    pub const fn attrs(&self) -> LeafAttrs {
        match self {
            Self::Huge(l) => l.attrs,
            Self::Base(l) => l.attrs,
        }
    }

    #[must_use]
    pub const fn is_huge(&self) -> bool {
        matches!(self, Self::Huge(_))
    }
}

/// One process page-table forest and its collaborators.
pub struct AddressSpace {
    root: Arc<PageTablePage>,
    tables: Arc<dyn PageTableAlloc>,
    arch: Arc<dyn ArchOps>,
    pfn_policy: Arc<dyn PfnPolicy>,
    notifiers: SpinLock<Vec<Arc<dyn MmuNotifier>>>,
    layout: MmapLayout,
    nr_ptes: AtomicI64,
    nr_pmds: AtomicI64,
}

impl AddressSpace {
    /// Create an empty forest with no-op hooks and the default layout.
    ///
    /// # Errors
    /// [`AllocError`] if the root table cannot be allocated.
    pub fn new(tables: Arc<dyn PageTableAlloc>) -> Result<Self, AllocError> {
        let root = tables.alloc_table(TableLevel::P4d).ok_or(AllocError {
            level: TableLevel::P4d,
        })?;
        log::debug!("new address space, root table at {}", root.frame());
        Ok(Self {
            root,
            tables,
            arch: Arc::new(NoopArch),
            pfn_policy: Arc::new(AllowAllPfns),
            notifiers: SpinLock::new(Vec::new()),
            layout: MmapLayout::default(),
            nr_ptes: AtomicI64::new(0),
            nr_pmds: AtomicI64::new(0),
        })
    }

    #[must_use]
    pub fn with_arch(mut self, arch: Arc<dyn ArchOps>) -> Self {
        self.arch = arch;
        self
    }

    #[must_use]
    pub fn with_pfn_policy(mut self, policy: Arc<dyn PfnPolicy>) -> Self {
        self.pfn_policy = policy;
        self
    }

    #[must_use]
    pub fn with_layout(mut self, layout: MmapLayout) -> Self {
        self.layout = layout;
        self
    }

    #[inline]
    #[must_use]
    pub const fn layout(&self) -> &MmapLayout {
        &self.layout
    }

    #[inline]
    #[must_use]
    pub fn arch(&self) -> &dyn ArchOps {
        &*self.arch
    }

    #[inline]
    #[must_use]
    pub fn pfn_policy(&self) -> &dyn PfnPolicy {
        &*self.pfn_policy
    }

    #[inline]
    #[must_use]
    pub fn root(&self) -> &Arc<PageTablePage> {
        &self.root
    }

    /// Subscribe to translation changes.
    pub fn register_notifier(&self, notifier: Arc<dyn MmuNotifier>) {
        self.notifiers.lock().push(notifier);
    }

    /// Snapshot of the subscribers; callbacks run without the list locked.
    pub(crate) fn notifiers(&self) -> Vec<Arc<dyn MmuNotifier>> {
        self.notifiers.lock().clone()
    }

    /// Announce an upcoming change to `range`. The end is announced when the
    /// returned guard drops.
    pub fn invalidate_range(&self, range: VirtualRange, event: MmuNotifierEvent) -> InvalidateGuard<'_> {
        InvalidateGuard::start(self, MmuNotifierRange { range, event })
    }

    /// PTE tables owned by this address space.
    #[inline]
    #[must_use]
    pub fn nr_ptes(&self) -> i64 {
        self.nr_ptes.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn inc_nr_ptes(&self) {
        self.nr_ptes.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn dec_nr_ptes(&self) {
        self.nr_ptes.fetch_sub(1, Ordering::Relaxed);
    }

    /// PMD tables owned by this address space.
    #[inline]
    #[must_use]
    pub fn nr_pmds(&self) -> i64 {
        self.nr_pmds.load(Ordering::Relaxed)
    }

    /// Allocate a table page.
    ///
    /// # Errors
    /// [`AllocError`] when the allocator is exhausted.
    pub fn alloc_table(&self, level: TableLevel) -> Result<Arc<PageTablePage>, AllocError> {
        self.tables.alloc_table(level).ok_or(AllocError { level })
    }

    /// Return a table page to the allocator.
    pub fn free_table(&self, frame: Pfn) {
        self.tables.free_table(frame);
    }

    /// Resolve a frame stored in an entry.
    #[must_use]
    pub fn lookup_table(&self, frame: Pfn, level: TableLevel) -> Option<Arc<PageTablePage>> {
        self.tables.lookup(frame).filter(|t| t.level() == level)
    }

    /// Child of `parent` at `index`, read-only.
    fn child(&self, parent: &PageTablePage, index: usize) -> Option<Arc<PageTablePage>> {
        let level = parent.level().child()?;
        let entry = TableEntry::from_bits(parent.read(index));
        self.lookup_table(entry.next_table()?, level)
    }

    /// Child of `parent` at `index` for a range walk.
    ///
    /// A corrupt entry is reported and cleared so the walk can continue.
    #[must_use]
    pub fn next_level(&self, parent: &PageTablePage, index: usize) -> Option<Arc<PageTablePage>> {
        let level = parent.level().child()?;
        let mut guard = parent.lock();
        let entry = TableEntry::from_bits(guard.get(index));
        if entry.is_none() {
            return None;
        }
        let child = entry
            .next_table()
            .and_then(|frame| self.lookup_table(frame, level));
        if child.is_none() {
            log::warn!(
                "bad {:?} entry {index} in table {}: {:?}",
                parent.level(),
                parent.frame(),
                entry.bits()
            );
            guard.take(index);
        }
        child
    }

    /// Child of `parent` covering `va`, allocating it if missing.
    fn ensure_child(&self, parent: &PageTablePage, va: VirtualAddress) -> Result<Arc<PageTablePage>, AllocError> {
        let index = parent.level().index_of(va);
        let Some(level) = parent.level().child() else {
            crate::page_table_bug!("PTE tables have no children");
        };
        if let Some(existing) = self.child(parent, index) {
            return Ok(existing);
        }

        let fresh = self.alloc_table(level)?;
        let mut guard = parent.lock();
        let current = TableEntry::from_bits(guard.get(index));
        if current.is_none() {
            guard.set(index, TableEntry::table(fresh.frame()).bits());
            drop(guard);
            if level == TableLevel::Pmd {
                self.nr_pmds.fetch_add(1, Ordering::Relaxed);
            }
            log::trace!("populated {level:?} table {} for {va}", fresh.frame());
            return Ok(fresh);
        }
        drop(guard);

        // Lost the race; use the winner's table.
        self.free_table(fresh.frame());
        match current
            .next_table()
            .and_then(|frame| self.lookup_table(frame, level))
        {
            Some(winner) => Ok(winner),
            None => crate::page_table_bug!(
                "corrupt {:?} entry for {va}: {:?}",
                parent.level(),
                current.bits()
            ),
        }
    }

    /// PMD slot covering `va`, if its P4D and PUD tables exist.
    #[must_use]
    pub fn pmd_lookup(&self, va: VirtualAddress) -> Option<PmdHandle> {
        let pud = self.child(&self.root, TableLevel::P4d.index_of(va))?;
        let pmd = self.child(&pud, TableLevel::Pud.index_of(va))?;
        Some(PmdHandle::new(pmd, va))
    }

    /// PMD slot covering `va`, populating upper tables as needed.
    ///
    /// # Errors
    /// [`AllocError`] if an upper table cannot be allocated.
    pub fn pmd_alloc(&self, va: VirtualAddress) -> Result<PmdHandle, AllocError> {
        let pud = self.ensure_child(&self.root, va)?;
        let pmd = self.ensure_child(&pud, va)?;
        Ok(PmdHandle::new(pmd, va))
    }

    /// The PTE table under `pmd`, if it points to one.
    #[must_use]
    pub fn pte_table(&self, pmd: &PmdHandle) -> Option<Arc<PageTablePage>> {
        match pmd.read().kind() {
            PmdKind::Table(frame) => self.lookup_table(frame, TableLevel::Pte),
            _ => None,
        }
    }

    /// The PTE table under `pmd`, allocating one if the slot is empty.
    ///
    /// Returns `Ok(None)` if the slot holds a huge leaf or garbage.
    ///
    /// # Errors
    /// [`AllocError`] if the table cannot be allocated.
    pub fn pte_alloc(&self, pmd: &PmdHandle) -> Result<Option<Arc<PageTablePage>>, AllocError> {
        if !pmd.read().is_none() {
            return Ok(self.pte_table(pmd));
        }

        let fresh = self.alloc_table(TableLevel::Pte)?;
        let mut guard = pmd.lock();
        if guard.get().is_none() {
            guard.set(PmdEntry::table(fresh.frame()));
            drop(guard);
            self.inc_nr_ptes();
            return Ok(Some(fresh));
        }
        drop(guard);
        self.free_table(fresh.frame());
        Ok(self.pte_table(pmd))
    }

    /// Translate `va` to the leaf mapping it.
    #[must_use]
    pub fn query(&self, va: VirtualAddress) -> Option<Translation> {
        let pmd = self.pmd_lookup(va)?;
        match pmd.read().kind() {
            PmdKind::Huge(leaf) => Some(Translation::Huge(leaf)),
            PmdKind::Table(frame) => {
                let pte = self.lookup_table(frame, TableLevel::Pte)?;
                let entry = PteEntry::from_bits(pte.read(TableLevel::Pte.index_of(va)));
                entry.base_leaf().map(Translation::Base)
            }
            PmdKind::None | PmdKind::Bad(_) => None,
        }
    }

    /// Physical address `va` maps to.
    #[must_use]
    pub fn translate(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        Some(match self.query(va)? {
            Translation::Huge(l) => l.pfn.address() + va.offset::<Size2M>(),
            Translation::Base(l) => l.pfn.address() + va.offset::<Size4K>(),
        })
    }
}

impl core::fmt::Debug for AddressSpace {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AddressSpace")
            .field("root", &self.root.frame())
            .field("nr_ptes", &self.nr_ptes())
            .field("nr_pmds", &self.nr_pmds())
            .field("layout", &self.layout)
            .finish_non_exhaustive()
    }
}
