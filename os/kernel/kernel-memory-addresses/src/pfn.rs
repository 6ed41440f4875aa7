use crate::{PageSize, PhysicalAddress, Size4K};
use core::fmt;
use core::ops::{Add, AddAssign};

/// Physical frame number: a [`PhysicalAddress`] in units of [`Size4K`] pages.
///
/// Page-table entries store frames, not byte addresses. The PFN of a huge
/// mapping is the frame of its first base page; the `i`-th base page of the
/// same mapping is `pfn + i`.
///
/// ### Examples
/// ```rust
/// # use kernel_memory_addresses::*;
/// let pfn = Pfn::new(0x201);
/// assert!(!pfn.is_aligned::<Size2M>());
/// assert!(Pfn::new(0x200).is_aligned::<Size2M>());
/// assert_eq!((pfn + 1).as_u64(), 0x202);
/// ```
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Pfn(u64);

impl Pfn {
    #[inline]
    #[must_use]
    pub const fn new(v: u64) -> Self {
        Self(v)
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// The physical byte address of the first byte of this frame.
    #[inline]
    #[must_use]
    pub const fn address(self) -> PhysicalAddress {
        PhysicalAddress::new(self.0 << Size4K::SHIFT)
    }

    /// Whether the frame starts on an `S` boundary.
    #[inline]
    #[must_use]
    pub const fn is_aligned<S: PageSize>(self) -> bool {
        (self.0 << Size4K::SHIFT) & (S::SIZE - 1) == 0
    }

    /// Number of base frames spanned by `bytes` (rounded up).
    #[inline]
    #[must_use]
    pub const fn frames_in(bytes: u64) -> u64 {
        bytes.div_ceil(Size4K::SIZE)
    }
}

impl fmt::Debug for Pfn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PFN(0x{:X})", self.0)
    }
}

impl fmt::Display for Pfn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:X}", self.0)
    }
}

impl From<u64> for Pfn {
    #[inline]
    fn from(v: u64) -> Self {
        Self::new(v)
    }
}

impl Add<u64> for Pfn {
    type Output = Self;
    #[inline]
    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl AddAssign<u64> for Pfn {
    #[inline]
    fn add_assign(&mut self, rhs: u64) {
        self.0 += rhs;
    }
}
