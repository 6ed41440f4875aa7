use crate::{PageSize, VirtualAddress};
use core::fmt;

/// Half-open range `[start, end)` of virtual addresses.
///
/// Used for MMU-notifier brackets, TLB/cache maintenance requests and region
/// bounds. An empty range has `start == end`.
#[derive(Copy, Clone, Default, Eq, PartialEq, Hash)]
pub struct VirtualRange {
    pub start: VirtualAddress,
    pub end: VirtualAddress,
}

impl VirtualRange {
    #[inline]
    #[must_use]
    pub const fn new(start: VirtualAddress, end: VirtualAddress) -> Self {
        debug_assert!(start.as_u64() <= end.as_u64());
        Self { start, end }
    }

    /// Range of `len` bytes starting at `start`.
    #[inline]
    #[must_use]
    pub const fn with_len(start: VirtualAddress, len: u64) -> Self {
        Self::new(start, VirtualAddress::new(start.as_u64() + len))
    }

    /// The `S`-aligned granule containing `addr`.
    #[inline]
    #[must_use]
    pub const fn granule_of<S: PageSize>(addr: VirtualAddress) -> Self {
        Self::with_len(addr.align_down::<S>(), S::SIZE)
    }

    #[inline]
    #[must_use]
    pub const fn len(&self) -> u64 {
        self.end.as_u64() - self.start.as_u64()
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.start.as_u64() == self.end.as_u64()
    }

    #[inline]
    #[must_use]
    pub const fn contains(&self, addr: VirtualAddress) -> bool {
        addr.as_u64() >= self.start.as_u64() && addr.as_u64() < self.end.as_u64()
    }

    /// Whether `other` lies entirely inside this range.
    #[inline]
    #[must_use]
    pub const fn covers(&self, other: &Self) -> bool {
        other.start.as_u64() >= self.start.as_u64() && other.end.as_u64() <= self.end.as_u64()
    }

    #[inline]
    #[must_use]
    pub const fn overlaps(&self, other: &Self) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.start.as_u64() < other.end.as_u64()
            && other.start.as_u64() < self.end.as_u64()
    }

    /// Smallest range covering both `self` and `other`.
    #[inline]
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        Self::new(self.start.min(other.start), self.end.max(other.end))
    }
}

impl fmt::Debug for VirtualRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "VA[0x{:016X}..0x{:016X})",
            self.start.as_u64(),
            self.end.as_u64()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Size2M;

    #[test]
    fn granule_of_covers_address() {
        let r = VirtualRange::granule_of::<Size2M>(VirtualAddress::new(0x2010_0000));
        assert_eq!(r.start.as_u64(), 0x2000_0000);
        assert_eq!(r.end.as_u64(), 0x2020_0000);
        assert!(r.contains(VirtualAddress::new(0x201F_FFFF)));
        assert!(!r.contains(VirtualAddress::new(0x2020_0000)));
    }

    #[test]
    fn overlap_and_cover() {
        let a = VirtualRange::with_len(VirtualAddress::new(0x1000), 0x3000);
        let b = VirtualRange::with_len(VirtualAddress::new(0x3000), 0x1000);
        let c = VirtualRange::with_len(VirtualAddress::new(0x4000), 0x1000);
        assert!(a.overlaps(&b));
        assert!(a.covers(&b));
        assert!(!a.overlaps(&c));
        assert_eq!(a.union(&c).len(), 0x4000);
    }
}
