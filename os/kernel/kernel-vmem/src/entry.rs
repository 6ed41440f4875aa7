//! # Page-Table Entries
//!
//! All four levels share one 64-bit layout, [`EntryBits`]. The typed wrappers
//! give each level its own vocabulary:
//!
//! - [`TableEntry`]: P4D / PUD slots, which only ever point at a child table.
//! - [`PmdEntry`]: empty, a pointer to a PTE table, or a 2 MiB huge leaf.
//! - [`PteEntry`]: empty or a 4 KiB base leaf.
//!
//! Leaves decode into [`HugeLeaf`] and [`BaseLeaf`]. Both carry the same
//! [`LeafAttrs`], which is what a split copies from the huge leaf into every
//! base leaf.

use crate::prot::PageProtection;
use bitfield_struct::bitfield;
use kernel_memory_addresses::Pfn;

/// Raw 64-bit entry shared by every level.
///
/// ### Bit layout
///
/// | Bits   | Name            | Meaning |
/// |--------|-----------------|---------|
/// | 0      | `present`       | Valid entry |
/// | 1      | `writable`      | Writes allowed |
/// | 2      | `user`          | User-mode accessible |
/// | 3      | `write_through` | Write-combining memory type |
/// | 4      | `cache_disabled`| Uncached memory type |
/// | 5      | `young`         | Accessed since last cleared |
/// | 6      | `dirty`         | Written since last cleared (leaf only) |
/// | 7      | `huge`          | PMD leaf instead of table pointer |
/// | 8      | `global`        | Not flushed on address-space switch |
/// | 9      | `special`       | Raw PFN leaf, no backing page descriptor |
/// | 10     | `soft_dirty`    | Software write tracking |
/// | 11     | `uffd_wp`       | Userfault write-protect marker |
/// | 12–51  | `frame`         | Physical frame number |
/// | 52     | `contiguous`    | Member of a 64 KiB contiguous run (PTE only) |
/// | 53–62  | reserved        | Zero |
/// | 63     | `no_execute`    | Instruction fetch disallowed |
#[bitfield(u64)]
#[derive(PartialEq, Eq, Hash)]
pub struct EntryBits {
    pub present: bool,
    pub writable: bool,
    pub user: bool,
    pub write_through: bool,
    pub cache_disabled: bool,
    pub young: bool,
    pub dirty: bool,
    pub huge: bool,
    pub global: bool,
    pub special: bool,
    pub soft_dirty: bool,
    pub uffd_wp: bool,
    #[bits(40)]
    frame: u64,
    pub contiguous: bool,
    #[bits(10)]
    __: u16,
    pub no_execute: bool,
}

impl EntryBits {
    /// Frame numbers an entry can hold are below this limit.
    pub const FRAME_LIMIT: u64 = 1 << 40;

    /// Whether `frames` frames starting at `pfn` all fit the frame field.
    #[inline]
    #[must_use]
    pub const fn frames_fit(pfn: Pfn, frames: u64) -> bool {
        match pfn.as_u64().checked_add(frames) {
            Some(end) => end <= Self::FRAME_LIMIT,
            None => false,
        }
    }

    #[inline]
    #[must_use]
    pub const fn pfn(self) -> Pfn {
        Pfn::new(self.frame())
    }

    #[inline]
    #[must_use]
    pub const fn with_pfn(self, pfn: Pfn) -> Self {
        self.with_frame(pfn.as_u64())
    }

    /// Whether the entry is all-zero.
    #[inline]
    #[must_use]
    pub const fn is_none(self) -> bool {
        self.into_bits() == 0
    }

    /// Encode `prot` onto the permission and memory-type bits.
    #[must_use]
    pub const fn with_protection(self, prot: PageProtection) -> Self {
        self.with_writable(prot.contains(PageProtection::WRITE))
            .with_user(prot.contains(PageProtection::USER))
            .with_no_execute(!prot.contains(PageProtection::EXEC))
            .with_write_through(prot.contains(PageProtection::WRITE_COMBINE))
            .with_cache_disabled(prot.contains(PageProtection::UNCACHED))
    }

    /// Decode the permission and memory-type bits.
    #[must_use]
    pub const fn protection(self) -> PageProtection {
        let mut prot = PageProtection::READ;
        if self.writable() {
            prot = prot.union(PageProtection::WRITE);
        }
        if self.user() {
            prot = prot.union(PageProtection::USER);
        }
        if !self.no_execute() {
            prot = prot.union(PageProtection::EXEC);
        }
        if self.write_through() {
            prot = prot.union(PageProtection::WRITE_COMBINE);
        }
        if self.cache_disabled() {
            prot = prot.union(PageProtection::UNCACHED);
        }
        prot
    }

    const fn with_attrs(self, attrs: LeafAttrs) -> Self {
        self.with_protection(attrs.prot)
            .with_young(attrs.young)
            .with_dirty(attrs.dirty)
            .with_soft_dirty(attrs.soft_dirty)
            .with_uffd_wp(attrs.uffd_wp)
    }

    const fn attrs(self) -> LeafAttrs {
        LeafAttrs {
            prot: self.protection(),
            young: self.young(),
            dirty: self.dirty(),
            soft_dirty: self.soft_dirty(),
            uffd_wp: self.uffd_wp(),
        }
    }

    /// Link to a child table: present, writable, user, executable.
    ///
    /// Upper levels are permissive; the leaf decides.
    const fn table_link(frame: Pfn) -> Self {
        Self::new()
            .with_present(true)
            .with_writable(true)
            .with_user(true)
            .with_young(true)
            .with_pfn(frame)
    }
}

/// Per-leaf state that a split must carry from a huge leaf onto each of its
/// 512 base leaves.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct LeafAttrs {
    pub prot: PageProtection,
    pub young: bool,
    pub dirty: bool,
    pub soft_dirty: bool,
    pub uffd_wp: bool,
}

impl LeafAttrs {
    /// State of a freshly installed leaf: accessed, clean.
    #[inline]
    #[must_use]
    pub const fn fresh(prot: PageProtection) -> Self {
        Self {
            prot,
            young: true,
            dirty: false,
            soft_dirty: false,
            uffd_wp: false,
        }
    }
}

/// A decoded 2 MiB leaf.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct HugeLeaf {
    pub pfn: Pfn,
    pub attrs: LeafAttrs,
}

/// A decoded 4 KiB leaf.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct BaseLeaf {
    pub pfn: Pfn,
    pub attrs: LeafAttrs,
    /// Raw PFN mapping; there is no page descriptor to refcount.
    pub special: bool,
    pub contiguous: bool,
}

impl BaseLeaf {
    /// A special leaf for raw PFN mappings.
    #[inline]
    #[must_use]
    pub const fn special(pfn: Pfn, attrs: LeafAttrs) -> Self {
        Self {
            pfn,
            attrs,
            special: true,
            contiguous: false,
        }
    }
}

/// A P4D or PUD entry: empty, or a link to the next table.
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct TableEntry(EntryBits);

impl TableEntry {
    #[inline]
    #[must_use]
    pub const fn none() -> Self {
        Self(EntryBits::new())
    }

    #[inline]
    #[must_use]
    pub const fn table(frame: Pfn) -> Self {
        Self(EntryBits::table_link(frame))
    }

    #[inline]
    #[must_use]
    pub const fn from_bits(bits: EntryBits) -> Self {
        Self(bits)
    }

    #[inline]
    #[must_use]
    pub const fn bits(self) -> EntryBits {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn is_none(self) -> bool {
        self.0.is_none()
    }

    /// Non-empty but not a usable table link.
    ///
    /// Huge leaves above the PMD level are not supported in this forest, so
    /// they count as corrupt too.
    #[inline]
    #[must_use]
    pub const fn is_bad(self) -> bool {
        !self.is_none() && (!self.0.present() || self.0.huge())
    }

    /// The child table's frame, if this is a good link.
    #[inline]
    #[must_use]
    pub const fn next_table(self) -> Option<Pfn> {
        if self.is_none() || self.is_bad() {
            None
        } else {
            Some(self.0.pfn())
        }
    }
}

/// Decoded view of a [`PmdEntry`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PmdKind {
    None,
    /// Points at a PTE table.
    Table(Pfn),
    /// Maps 2 MiB directly.
    Huge(HugeLeaf),
    /// Non-empty garbage.
    Bad(EntryBits),
}

/// A PMD entry.
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct PmdEntry(EntryBits);

impl PmdEntry {
    #[inline]
    #[must_use]
    pub const fn none() -> Self {
        Self(EntryBits::new())
    }

    #[inline]
    #[must_use]
    pub const fn table(frame: Pfn) -> Self {
        Self(EntryBits::table_link(frame))
    }

    /// A present huge leaf.
    #[inline]
    #[must_use]
    pub const fn huge(leaf: HugeLeaf) -> Self {
        Self(
            EntryBits::new()
                .with_present(true)
                .with_huge(true)
                .with_pfn(leaf.pfn)
                .with_attrs(leaf.attrs),
        )
    }

    #[inline]
    #[must_use]
    pub const fn from_bits(bits: EntryBits) -> Self {
        Self(bits)
    }

    #[inline]
    #[must_use]
    pub const fn bits(self) -> EntryBits {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn is_none(self) -> bool {
        self.0.is_none()
    }

    #[inline]
    #[must_use]
    pub const fn is_present(self) -> bool {
        self.0.present()
    }

    /// Huge leaf, present or not.
    #[inline]
    #[must_use]
    pub const fn is_huge(self) -> bool {
        self.0.huge()
    }

    #[must_use]
    pub const fn kind(self) -> PmdKind {
        if self.is_none() {
            PmdKind::None
        } else if self.0.huge() {
            PmdKind::Huge(HugeLeaf {
                pfn: self.0.pfn(),
                attrs: self.0.attrs(),
            })
        } else if self.0.present() {
            PmdKind::Table(self.0.pfn())
        } else {
            PmdKind::Bad(self.0)
        }
    }

    /// The huge leaf, if this is one.
    #[inline]
    #[must_use]
    pub const fn huge_leaf(self) -> Option<HugeLeaf> {
        match self.kind() {
            PmdKind::Huge(leaf) => Some(leaf),
            _ => None,
        }
    }

    /// Mark the leaf as written for soft-dirty tracking.
    #[inline]
    #[must_use]
    pub const fn mk_soft_dirty(self) -> Self {
        Self(self.0.with_soft_dirty(true))
    }
}

impl core::fmt::Debug for PmdEntry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "PMD({:?})", self.kind())
    }
}

/// A PTE entry.
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct PteEntry(EntryBits);

impl PteEntry {
    #[inline]
    #[must_use]
    pub const fn none() -> Self {
        Self(EntryBits::new())
    }

    #[inline]
    #[must_use]
    pub const fn leaf(leaf: BaseLeaf) -> Self {
        Self(
            EntryBits::new()
                .with_present(true)
                .with_pfn(leaf.pfn)
                .with_attrs(leaf.attrs)
                .with_special(leaf.special)
                .with_contiguous(leaf.contiguous),
        )
    }

    #[inline]
    #[must_use]
    pub const fn from_bits(bits: EntryBits) -> Self {
        Self(bits)
    }

    #[inline]
    #[must_use]
    pub const fn bits(self) -> EntryBits {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn is_none(self) -> bool {
        self.0.is_none()
    }

    #[inline]
    #[must_use]
    pub const fn is_contiguous(self) -> bool {
        self.0.contiguous()
    }

    #[inline]
    #[must_use]
    pub const fn with_contiguous(self, contiguous: bool) -> Self {
        Self(self.0.with_contiguous(contiguous))
    }

    #[inline]
    #[must_use]
    pub const fn mk_soft_dirty(self) -> Self {
        Self(self.0.with_soft_dirty(true))
    }

    /// The base leaf, if present.
    #[must_use]
    pub const fn base_leaf(self) -> Option<BaseLeaf> {
        if !self.0.present() {
            return None;
        }
        Some(BaseLeaf {
            pfn: self.0.pfn(),
            attrs: self.0.attrs(),
            special: self.0.special(),
            contiguous: self.0.contiguous(),
        })
    }
}

impl core::fmt::Debug for PteEntry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.base_leaf() {
            Some(leaf) => write!(f, "PTE({leaf:?})"),
            None if self.is_none() => f.write_str("PTE(none)"),
            None => write!(f, "PTE(raw 0x{:016X})", self.0.into_bits()),
        }
    }
}
