//! # Table Pages
//!
//! One [`PageTablePage`] is one 4 KiB page-table page: 512 raw entries, a
//! spinlock, and (for PMD tables) the list of deposited PTE tables.
//!
//! The deposit list lives next to the entries it serves so that one lock
//! protects both. Depositing and withdrawing therefore always happen under
//! the same lock as the PMD update they accompany.

use crate::entry::EntryBits;
use alloc::vec::Vec;
use core::fmt;
use kernel_info::memory::{P4D_SHIFT, PAGE_SHIFT, PMD_SHIFT, PTRS_PER_TABLE, PUD_SHIFT};
use kernel_memory_addresses::{Pfn, VirtualAddress};
use kernel_sync::{SpinLock, SpinLockGuard};

/// Level of a table page in the forest, root first.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TableLevel {
    P4d,
    Pud,
    Pmd,
    Pte,
}

impl TableLevel {
    /// Address bit where this level's index starts.
    #[inline]
    #[must_use]
    pub const fn shift(self) -> u32 {
        match self {
            Self::P4d => P4D_SHIFT,
            Self::Pud => PUD_SHIFT,
            Self::Pmd => PMD_SHIFT,
            Self::Pte => PAGE_SHIFT,
        }
    }

    /// Bytes of address space covered by one entry at this level.
    #[inline]
    #[must_use]
    pub const fn entry_span(self) -> u64 {
        1 << self.shift()
    }

    /// Index of the entry covering `va` (9 bits).
    #[inline]
    #[must_use]
    pub const fn index_of(self, va: VirtualAddress) -> usize {
        ((va.as_u64() >> self.shift()) & 0x1FF) as usize
    }

    /// Level of the tables that entries at this level point to.
    #[inline]
    #[must_use]
    pub const fn child(self) -> Option<Self> {
        match self {
            Self::P4d => Some(Self::Pud),
            Self::Pud => Some(Self::Pmd),
            Self::Pmd => Some(Self::Pte),
            Self::Pte => None,
        }
    }
}

/// Lock-protected contents of a table page.
pub struct TableState {
    entries: [EntryBits; PTRS_PER_TABLE],
    deposited: Vec<Pfn>,
}

impl TableState {
    const fn new() -> Self {
        Self {
            entries: [EntryBits::new(); PTRS_PER_TABLE],
            deposited: Vec::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn get(&self, index: usize) -> EntryBits {
        self.entries[index]
    }

    #[inline]
    pub fn set(&mut self, index: usize, bits: EntryBits) {
        self.entries[index] = bits;
    }

    /// Clear and return the old entry.
    #[inline]
    pub fn take(&mut self, index: usize) -> EntryBits {
        core::mem::replace(&mut self.entries[index], EntryBits::new())
    }

    /// Whether every entry in `range` is zero.
    #[must_use]
    pub fn is_range_none(&self, range: core::ops::Range<usize>) -> bool {
        self.entries[range].iter().all(|e| e.is_none())
    }

    /// Number of non-zero entries.
    #[must_use]
    pub fn populated(&self) -> usize {
        self.entries.iter().filter(|e| !e.is_none()).count()
    }

    /// Reserve a PTE table for a later split.
    #[inline]
    pub fn deposit(&mut self, frame: Pfn) {
        self.deposited.push(frame);
    }

    /// Take back a reserved PTE table.
    #[inline]
    pub fn withdraw(&mut self) -> Option<Pfn> {
        self.deposited.pop()
    }

    #[inline]
    #[must_use]
    pub fn deposited(&self) -> usize {
        self.deposited.len()
    }
}

/// One page of the forest.
pub struct PageTablePage {
    level: TableLevel,
    frame: Pfn,
    state: SpinLock<TableState>,
}

impl PageTablePage {
    #[must_use]
    pub const fn new(level: TableLevel, frame: Pfn) -> Self {
        Self {
            level,
            frame,
            state: SpinLock::new(TableState::new()),
        }
    }

    #[inline]
    #[must_use]
    pub const fn level(&self) -> TableLevel {
        self.level
    }

    /// Physical frame of this page; what parent entries store.
    #[inline]
    #[must_use]
    pub const fn frame(&self) -> Pfn {
        self.frame
    }

    /// Take this page's lock.
    #[inline]
    pub fn lock(&self) -> SpinLockGuard<'_, TableState> {
        self.state.lock()
    }

    /// Take this page's lock while already holding `outer`.
    #[inline]
    pub fn lock_nested<'a, U>(&'a self, outer: &SpinLockGuard<'_, U>) -> SpinLockGuard<'a, TableState> {
        self.state.lock_nested(outer)
    }

    /// Whether both pages are protected by the same lock.
    #[inline]
    #[must_use]
    pub fn same_lock(&self, other: &Self) -> bool {
        self.state.same_lock(&other.state)
    }

    /// Snapshot one entry under a short lock.
    #[inline]
    #[must_use]
    pub fn read(&self, index: usize) -> EntryBits {
        self.state.lock().get(index)
    }

    #[inline]
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.state.is_locked()
    }
}

impl fmt::Debug for PageTablePage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageTablePage")
            .field("level", &self.level)
            .field("frame", &self.frame)
            .finish_non_exhaustive()
    }
}
