//! Placement of new mappings.
//!
//! A mapping is aligned to the largest granule its length qualifies for:
//!
//! | Length          | Alignment |
//! |-----------------|-----------|
//! | ≥ 2 MiB         | 2 MiB (PMD leaf) |
//! | ≥ 64 KiB        | 64 KiB (contiguous-PTE run) |
//! | otherwise       | 4 KiB |

use crate::HugeTlb;
use crate::error::SearchError;
use kernel_info::memory::{CONT_PTE_SIZE, PAGE_SIZE, PMD_SIZE};
use kernel_memory_addresses::{VirtualAddress, checked_align_up};
use kernel_vmem::{AddressSpace, PlacementPolicy, UnmappedAreaInfo, VmaTree};

/// Alignment a mapping of `len` bytes is placed at.
#[must_use]
pub(crate) const fn placement_granule(len: u64) -> u64 {
    if len >= PMD_SIZE {
        PMD_SIZE
    } else if len >= CONT_PTE_SIZE {
        CONT_PTE_SIZE
    } else {
        PAGE_SIZE
    }
}

impl HugeTlb {
    /// Find where a new mapping of `len` bytes may go.
    ///
    /// With `fixed` the hint is returned as is, without any validation. Otherwise
    /// the hint, rounded up to the placement granule, is used if it is free
    /// and in range; failing that the whole mapping area is searched in the
    /// address space's [`PlacementPolicy`] direction. A failed top-down
    /// search retries bottom-up from the unmapped base without alignment.
    ///
    /// Only the region registry is consulted; no page-table lock is taken.
    ///
    /// # Errors
    /// - [`SearchError::OutOfAddressSpace`] if `len` exceeds the user range.
    /// - [`SearchError::NoFit`] if no suitable gap exists.
    pub fn search_unmapped_range(
        &self,
        mm: &AddressSpace,
        vmas: &VmaTree,
        hint: VirtualAddress,
        len: u64,
        fixed: bool,
    ) -> Result<VirtualAddress, SearchError> {
        let layout = mm.layout();
        let usable = layout.task_size.saturating_sub(layout.mmap_min_addr);
        let len = checked_align_up(len, PAGE_SIZE).ok_or(SearchError::OutOfAddressSpace { len })?;
        if len > usable {
            return Err(SearchError::OutOfAddressSpace { len });
        }

        if fixed {
            return Ok(hint);
        }

        let granule = placement_granule(len);

        if !hint.is_null()
            && let Some(addr) = checked_align_up(hint.as_u64(), granule)
            && Self::hint_is_free(mm, vmas, addr, len)
        {
            log::trace!("placing {len:#x} bytes at hint {addr:#x}");
            return Ok(VirtualAddress::new(addr));
        }

        let info = UnmappedAreaInfo {
            length: len,
            low_limit: 0,
            high_limit: 0,
            align_mask: granule - 1,
        };

        match layout.placement {
            PlacementPolicy::BottomUp => vmas
                .unmapped_area(&UnmappedAreaInfo {
                    low_limit: layout.mmap_base,
                    high_limit: layout.task_size,
                    ..info
                })
                .map_err(|_| SearchError::NoFit { len }),
            PlacementPolicy::TopDown => {
                let top_down = UnmappedAreaInfo {
                    low_limit: PAGE_SIZE.max(layout.mmap_min_addr),
                    high_limit: layout.mmap_base,
                    ..info
                };
                if let Ok(addr) = vmas.unmapped_area_topdown(&top_down) {
                    return Ok(addr);
                }

                log::debug!("top-down search for {len:#x} bytes failed, retrying bottom-up");
                vmas.unmapped_area(&UnmappedAreaInfo {
                    low_limit: layout.unmapped_base,
                    high_limit: layout.task_size,
                    align_mask: 0,
                    ..info
                })
                .map_err(|_| SearchError::NoFit { len })
            }
        }
    }

    fn hint_is_free(mm: &AddressSpace, vmas: &VmaTree, addr: u64, len: u64) -> bool {
        let layout = mm.layout();
        if addr < layout.mmap_min_addr || addr > layout.task_size - len {
            return false;
        }
        let (next, prev) = vmas.find_prev(VirtualAddress::new(addr));
        next.is_none_or(|v| addr + len <= v.start().as_u64())
            && prev.is_none_or(|p| addr >= p.end().as_u64())
    }
}
