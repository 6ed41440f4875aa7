//! # Mapping-Area Layout
//!
//! Per-address-space bounds used when placing new mappings.

use kernel_info::memory::{
    DEFAULT_MMAP_BASE, DEFAULT_MMAP_MIN_ADDR, TASK_SIZE, TASK_UNMAPPED_BASE,
};

/// Direction in which free space is searched for new mappings.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub enum PlacementPolicy {
    /// Search downward from [`MmapLayout::mmap_base`].
    #[default]
    TopDown,
    /// Search upward from [`MmapLayout::mmap_base`].
    BottomUp,
}

/// Placement bounds for one address space.
///
/// ```
/// # use kernel_vmem::{MmapLayout, PlacementPolicy};
/// let layout = MmapLayout::default()
///     .with_placement(PlacementPolicy::BottomUp)
///     .with_mmap_base(0x4000_0000);
/// assert_eq!(layout.mmap_base, 0x4000_0000);
/// ```
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MmapLayout {
    /// No mapping may start below this.
    pub mmap_min_addr: u64,
    /// Top of the top-down area, or start of the bottom-up area.
    pub mmap_base: u64,
    /// Start of the fallback bottom-up search.
    pub unmapped_base: u64,
    /// Exclusive end of user addresses.
    pub task_size: u64,
    pub placement: PlacementPolicy,
}

impl Default for MmapLayout {
    fn default() -> Self {
        Self {
            mmap_min_addr: DEFAULT_MMAP_MIN_ADDR,
            mmap_base: DEFAULT_MMAP_BASE,
            unmapped_base: TASK_UNMAPPED_BASE,
            task_size: TASK_SIZE,
            placement: PlacementPolicy::TopDown,
        }
    }
}

impl MmapLayout {
    #[must_use]
    pub const fn with_mmap_min_addr(mut self, addr: u64) -> Self {
        self.mmap_min_addr = addr;
        self
    }

    #[must_use]
    pub const fn with_mmap_base(mut self, addr: u64) -> Self {
        self.mmap_base = addr;
        self
    }

    #[must_use]
    pub const fn with_unmapped_base(mut self, addr: u64) -> Self {
        self.unmapped_base = addr;
        self
    }

    #[must_use]
    pub const fn with_task_size(mut self, size: u64) -> Self {
        self.task_size = size;
        self
    }

    #[must_use]
    pub const fn with_placement(mut self, placement: PlacementPolicy) -> Self {
        self.placement = placement;
        self
    }
}
