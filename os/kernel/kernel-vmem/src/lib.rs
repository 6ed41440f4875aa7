//! # Virtual Memory Support
//!
//! A software model of a process page-table forest and the memory-manager
//! contracts that huge-mapping code runs against.
//!
//! ## What you get
//! - An [`AddressSpace`] rooted at a P4D table, owning the forest and the
//!   per-process page-table accounting.
//! - Typed entries ([`PmdEntry`], [`PteEntry`], [`TableEntry`]) over a single
//!   64-bit [`EntryBits`] layout, decoded into [`HugeLeaf`] / [`BaseLeaf`].
//! - [`PageTablePage`]s that each carry their own spinlock and, at the PMD
//!   level, the list of deposited PTE tables reserved for huge leaves.
//! - A page-table page allocator seam ([`PageTableAlloc`], [`TablePool`]).
//! - The region registry ([`Vma`], [`VmaTree`]) with gap searches.
//! - Collaborator traits: [`MmuNotifier`], [`ArchOps`], [`PfnPolicy`].
//! - A batched TLB invalidation accumulator ([`MmuGather`]).
//!
//! ## Walk
//!
//! ```text
//!  P4D  →  PUD  →  PMD  →  PTE  →  Base page (4 KiB)
//!                   │
//!                   └──► huge leaf (2 MiB), with a deposited PTE table
//!                        kept aside so a split never allocates
//! ```
//!
//! ## Locking
//!
//! Every table page has a spinlock; the lock guarding a PMD entry is the lock
//! of the page holding that PMD table, so all 512 PMDs of one table share
//! it. Upper-level pages are only locked briefly to publish a freshly
//! allocated child. Holding a [`PmdGuard`] is required to read-modify-write a
//! PMD entry or its deposit list.
//!
//! ## Fatal invariants
//!
//! Breaches of a caller contract that would corrupt the forest go through
//! [`page_table_bug!`]: they are logged and the thread panics. They are
//! never returned as errors.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(clippy::inline_always)]

extern crate alloc;

pub mod address_space;
mod arch;
mod entry;
mod layout;
mod mmu_notifier;
mod pfn_policy;
mod pool;
mod prot;
mod table;
mod tlb;
pub mod vma;

pub use crate::address_space::{AddressSpace, PmdGuard, PmdHandle, PteGuard, Translation};
pub use crate::arch::{ArchOps, NoopArch};
pub use crate::entry::{
    BaseLeaf, EntryBits, HugeLeaf, LeafAttrs, PmdEntry, PmdKind, PteEntry, TableEntry,
};
pub use crate::layout::{MmapLayout, PlacementPolicy};
pub use crate::mmu_notifier::{
    InvalidateGuard, MmuNotifier, MmuNotifierEvent, MmuNotifierRange,
};
pub use crate::pfn_policy::{AllowAllPfns, PfnPolicy, PfnTrackError};
pub use crate::pool::{AllocError, PageTableAlloc, TablePool};
pub use crate::prot::PageProtection;
pub use crate::table::{PageTablePage, TableLevel, TableState};
pub use crate::tlb::MmuGather;
pub use crate::vma::{RmapLock, UnmappedAreaError, UnmappedAreaInfo, Vma, VmaFlags, VmaTree};

/// Re-export constants as info module.
pub use kernel_info::memory as info;

#[doc(hidden)]
pub use log as __log;

/// Report a detected page-table corruption and halt the current thread.
///
/// Used for caller-contract violations (installing over a live entry,
/// moving onto an occupied PMD) where continuing would corrupt the forest.
/// The message is logged at `error` level before panicking.
#[macro_export]
macro_rules! page_table_bug {
    ($($arg:tt)+) => {{
        $crate::__log::error!($($arg)+);
        panic!($($arg)+)
    }};
}
