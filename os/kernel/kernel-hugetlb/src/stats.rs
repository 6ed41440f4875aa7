//! # Statistics
//!
//! Four event counters shared by every address space the engine serves.
//! They only grow; increments saturate at `u64::MAX` instead of wrapping.

use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

/// Engine-wide event counters.
///
/// Create one at startup and hand an `Arc` to every [`HugeTlb`](crate::HugeTlb).
#[derive(Debug, Default)]
pub struct HugeTlbStats {
    pmd_map: AtomicU64,
    contpte_map: AtomicU64,
    pmd_zap: AtomicU64,
    pmd_split: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    // Only fails when already saturated.
    let _ = counter.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_add(1));
}

impl HugeTlbStats {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            pmd_map: AtomicU64::new(0),
            contpte_map: AtomicU64::new(0),
            pmd_zap: AtomicU64::new(0),
            pmd_split: AtomicU64::new(0),
        }
    }

    /// Huge leaves installed.
    #[must_use]
    pub fn pmd_map(&self) -> u64 {
        self.pmd_map.load(Ordering::Relaxed)
    }

    /// Base-leaf batches installed.
    #[must_use]
    pub fn contpte_map(&self) -> u64 {
        self.contpte_map.load(Ordering::Relaxed)
    }

    /// Huge leaves zapped.
    #[must_use]
    pub fn pmd_zap(&self) -> u64 {
        self.pmd_zap.load(Ordering::Relaxed)
    }

    /// Huge leaves split.
    #[must_use]
    pub fn pmd_split(&self) -> u64 {
        self.pmd_split.load(Ordering::Relaxed)
    }

    pub(crate) fn inc_pmd_map(&self) {
        bump(&self.pmd_map);
    }

    pub(crate) fn inc_contpte_map(&self) {
        bump(&self.contpte_map);
    }

    pub(crate) fn inc_pmd_zap(&self) {
        bump(&self.pmd_zap);
    }

    pub(crate) fn inc_pmd_split(&self) {
        bump(&self.pmd_split);
    }

    /// Read all four counters.
    ///
    /// Each value is read independently; concurrent updates may land between
    /// the reads.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            pmd_map: self.pmd_map(),
            contpte_map: self.contpte_map(),
            pmd_zap: self.pmd_zap(),
            pmd_split: self.pmd_split(),
        }
    }
}

/// Point-in-time copy of [`HugeTlbStats`].
///
/// Renders as one `name: value` line per counter.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct StatsSnapshot {
    pub pmd_map: u64,
    pub contpte_map: u64,
    pub pmd_zap: u64,
    pub pmd_split: u64,
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "pmd_map: {}", self.pmd_map)?;
        writeln!(f, "contpte_map: {}", self.contpte_map)?;
        writeln!(f, "pmd_zap: {}", self.pmd_zap)?;
        writeln!(f, "pmd_split: {}", self.pmd_split)
    }
}
