//! # Huge Mappings for DMA-BUF Regions
//!
//! Installs, splits, zaps and moves 2 MiB PMD leaves for raw-PFN regions, and
//! places new mappings so that they can use them.
//!
//! ## Operations
//!
//! | Operation | Module | Outcome |
//! |-----------|--------|---------|
//! | [`HugeTlb::search_unmapped_range`] | `search` | free, granule-aligned address |
//! | [`HugeTlb::install_mapping`] | `install` | huge leaves or base-leaf batches |
//! | [`HugeTlb::split_huge_leaf`] | `split` | one huge leaf → 512 base leaves |
//! | [`HugeTlb::split_at_address`], [`HugeTlb::split_whole_region`], [`HugeTlb::split_if_straddling`], [`HugeTlb::adjust_boundaries`] | `split` | no huge leaf crosses a boundary |
//! | [`HugeTlb::zap_huge_leaf`], [`HugeTlb::unmap_range`] | `zap` | leaves cleared, one TLB flush |
//! | [`HugeTlb::move_huge_leaf`], [`HugeTlb::move_range`] | `mover` | leaves relocated |
//!
//! ## Invariants
//!
//! - A huge leaf always has a PTE table deposited on its PMD page, so a split
//!   never allocates while holding the PMD lock.
//! - A deposited table has exactly one owner: a deposit list, a live PMD
//!   entry, or the mover while it holds both PMD locks.
//! - When two PMD locks are held, the one for the old address is taken first.
//! - Every change to a live PMD entry is bracketed by MMU-notifier
//!   invalidate-start / invalidate-end.
//!
//! Contract violations that would corrupt the forest panic via
//! [`kernel_vmem::page_table_bug!`]; everything else is a typed error or a
//! boolean "nothing to do".

#![cfg_attr(not(any(test, doctest)), no_std)]

extern crate alloc;

mod config;
mod error;
mod install;
mod mover;
mod search;
mod split;
mod stats;
mod zap;

pub use crate::config::HugeTlbConfig;
pub use crate::error::{InstallError, SearchError};
pub use crate::install::InstallMode;
pub use crate::stats::{HugeTlbStats, StatsSnapshot};

use alloc::sync::Arc;

/// The huge-mapping engine.
///
/// Holds no per-address-space state; every operation takes the
/// [`AddressSpace`](kernel_vmem::AddressSpace) it works on.
#[derive(Debug, Clone)]
pub struct HugeTlb {
    stats: Arc<HugeTlbStats>,
    config: HugeTlbConfig,
}

impl HugeTlb {
    #[must_use]
    pub fn new(stats: Arc<HugeTlbStats>) -> Self {
        Self {
            stats,
            config: HugeTlbConfig::default(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: HugeTlbConfig) -> Self {
        self.config = config;
        self
    }

    #[inline]
    #[must_use]
    pub fn stats(&self) -> &HugeTlbStats {
        &self.stats
    }

    #[inline]
    #[must_use]
    pub const fn config(&self) -> &HugeTlbConfig {
        &self.config
    }
}
