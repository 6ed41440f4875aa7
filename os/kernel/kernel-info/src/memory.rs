//! # Memory Layout

use kernel_memory_addresses::{PageSize, Size1G, Size2M, Size4K, Size64K};

/// Base page shift.
pub const PAGE_SHIFT: u32 = Size4K::SHIFT;

/// Base page size.
pub const PAGE_SIZE: u64 = Size4K::SIZE;

/// Span of one PMD entry (one huge leaf).
pub const PMD_SHIFT: u32 = Size2M::SHIFT;

/// Span of one PMD entry in bytes.
pub const PMD_SIZE: u64 = Size2M::SIZE;

/// Span of one PUD entry.
pub const PUD_SHIFT: u32 = Size1G::SHIFT;

/// Span of one PUD entry in bytes.
pub const PUD_SIZE: u64 = Size1G::SIZE;

/// Span of one P4D entry (512 GiB).
pub const P4D_SHIFT: u32 = 39;

/// Span of one P4D entry in bytes.
pub const P4D_SIZE: u64 = 1 << P4D_SHIFT;

/// Entries per table at every level.
pub const PTRS_PER_TABLE: usize = 512;

/// Size of a contiguous-PTE run (the "medium" placement granule).
pub const CONT_PTE_SIZE: u64 = Size64K::SIZE;

/// Base pages per contiguous-PTE run.
pub const CONT_PTES: usize = (CONT_PTE_SIZE / PAGE_SIZE) as usize;

/// Base pages per huge leaf.
pub const HPAGE_PMD_NR: usize = (PMD_SIZE / PAGE_SIZE) as usize;

/// Exclusive upper bound of user virtual addresses (47-bit user space).
pub const TASK_SIZE: u64 = 1 << 47;

/// Lowest address a non-fixed mapping may be placed at.
pub const DEFAULT_MMAP_MIN_ADDR: u64 = 0x1_0000;

/// Where bottom-up searches start.
pub const TASK_UNMAPPED_BASE: u64 = (TASK_SIZE / 4) & !(PAGE_SIZE - 1);

/// Gap kept between the top-down mapping area and the top of user space.
pub const MMAP_STACK_GAP: u64 = 128 * 1024 * 1024 * 1024;

/// Where top-down searches start (searching downwards from here).
pub const DEFAULT_MMAP_BASE: u64 = TASK_SIZE - MMAP_STACK_GAP;

const _: () = {
    assert!(PTRS_PER_TABLE as u64 * PAGE_SIZE == PMD_SIZE);
    assert!(PTRS_PER_TABLE as u64 * PMD_SIZE == PUD_SIZE);
    assert!(PTRS_PER_TABLE as u64 * PUD_SIZE == P4D_SIZE);
    assert!(CONT_PTES == 16);
    assert!(HPAGE_PMD_NR == 512);
    assert!(DEFAULT_MMAP_MIN_ADDR < TASK_UNMAPPED_BASE);
    assert!(TASK_UNMAPPED_BASE < DEFAULT_MMAP_BASE);
    assert!(DEFAULT_MMAP_BASE.is_multiple_of(PMD_SIZE));
};
