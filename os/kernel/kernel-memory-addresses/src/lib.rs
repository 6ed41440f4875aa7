//! # Virtual and Physical Memory Address Types
//!
//! Strongly typed wrappers for raw addresses, frame numbers and address
//! ranges used by the page-table code.
//!
//! ## Overview
//!
//! | Type | Meaning |
//! |------|---------|
//! | [`VirtualAddress`] | An address in a process (or kernel) address space. |
//! | [`PhysicalAddress`] | An address in physical memory or MMIO space. |
//! | [`Pfn`] | A physical frame number, i.e. a physical address shifted right by [`Size4K::SHIFT`]. |
//! | [`VirtualRange`] | A half-open range `[start, end)` of virtual addresses. |
//!
//! ## Page Sizes
//!
//! The mapping granules are modeled as marker types implementing [`PageSize`]:
//!
//! - [`Size4K`]: base pages, mapped by a PTE
//! - [`Size64K`]: a run of contiguous PTEs sharing one TLB entry
//! - [`Size2M`]: huge pages, mapped by a single PMD leaf
//! - [`Size1G`]: giant pages, the span of one PUD entry
//!
//! ## Typical Usage
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let va = VirtualAddress::new(0x1000_1234);
//! assert_eq!(va.align_down::<Size4K>().as_u64(), 0x1000_1000);
//! assert_eq!(va.align_up::<Size2M>().as_u64(), 0x1020_0000);
//! assert!(!va.is_aligned::<Size4K>());
//!
//! let pa = PhysicalAddress::new(0x8020_0000);
//! assert_eq!(pa.pfn(), Pfn::new(0x80200));
//! assert_eq!(Pfn::new(0x80200).address(), pa);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(clippy::inline_always)]

mod page_size;
mod pfn;
mod physical_address;
mod virtual_address;
mod virtual_range;

pub use crate::page_size::{PageSize, Size1G, Size2M, Size4K, Size64K};
pub use crate::pfn::Pfn;
pub use crate::physical_address::PhysicalAddress;
pub use crate::virtual_address::VirtualAddress;
pub use crate::virtual_range::VirtualRange;

/// Align `x` down to the nearest multiple of `a`.
///
/// ### Preconditions
/// - `a` must be **non-zero** and a **power of two**.
///
/// ### Examples
/// ```rust
/// # use kernel_memory_addresses::align_down;
/// assert_eq!(align_down(0,      4096), 0);
/// assert_eq!(align_down(4095,   4096), 0);
/// assert_eq!(align_down(8191,   4096), 4096);
/// assert_eq!(align_down(0x12345,   16), 0x12340);
/// ```
#[inline(always)]
#[must_use]
pub const fn align_down(x: u64, a: u64) -> u64 {
    x & !(a - 1)
}

/// Align `x` up to the nearest multiple of `a`.
///
/// ### Preconditions
/// - `a` must be **non-zero** and a **power of two**.
/// - `x + (a - 1)` must **not overflow** `u64`; see [`checked_align_up`].
///
/// ### Examples
/// ```rust
/// # use kernel_memory_addresses::align_up;
/// assert_eq!(align_up(0,       4096), 0);
/// assert_eq!(align_up(1,       4096), 4096);
/// assert_eq!(align_up(4096,    4096), 4096);
/// assert_eq!(align_up(0x12345,   16), 0x12350);
/// ```
#[inline(always)]
#[must_use]
pub const fn align_up(x: u64, a: u64) -> u64 {
    (x + a - 1) & !(a - 1)
}

/// Like [`align_up`], but returns `None` instead of overflowing.
#[inline(always)]
#[must_use]
pub const fn checked_align_up(x: u64, a: u64) -> Option<u64> {
    match x.checked_add(a - 1) {
        Some(v) => Some(v & !(a - 1)),
        None => None,
    }
}
