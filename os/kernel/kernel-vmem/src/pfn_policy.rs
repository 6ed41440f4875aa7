//! Physical-frame policy: which raw frames may be mapped, and with what
//! memory type.

use crate::prot::PageProtection;
use crate::vma::Vma;
use kernel_memory_addresses::{Pfn, VirtualAddress};

/// Memory-type reservation for a raw PFN range failed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PfnTrackError {
    #[error("memory type of {pfn} (+{frames} frames) conflicts with an existing reservation")]
    Conflict { pfn: Pfn, frames: u64 },
}

/// Gatekeeper for raw PFN mappings.
pub trait PfnPolicy: Send + Sync {
    /// Whether `pfn` may be mapped with `prot`.
    fn pfn_modify_allowed(&self, pfn: Pfn, prot: PageProtection) -> bool;

    /// Reserve the memory type for `size` bytes at `pfn`, possibly adjusting
    /// `prot` to the type already in force.
    ///
    /// # Errors
    /// [`PfnTrackError`] when the range cannot be reserved.
    fn track_pfn_remap(
        &self,
        vma: &Vma,
        prot: &mut PageProtection,
        pfn: Pfn,
        addr: VirtualAddress,
        size: u64,
    ) -> Result<(), PfnTrackError>;

    /// Drop a reservation made by [`PfnPolicy::track_pfn_remap`].
    fn untrack_pfn(&self, vma: &Vma, pfn: Pfn, size: u64);
}

/// Allows every frame and tracks nothing.
#[derive(Debug, Default, Copy, Clone)]
pub struct AllowAllPfns;

impl PfnPolicy for AllowAllPfns {
    fn pfn_modify_allowed(&self, _pfn: Pfn, _prot: PageProtection) -> bool {
        true
    }

    fn track_pfn_remap(
        &self,
        _vma: &Vma,
        _prot: &mut PageProtection,
        _pfn: Pfn,
        _addr: VirtualAddress,
        _size: u64,
    ) -> Result<(), PfnTrackError> {
        Ok(())
    }

    fn untrack_pfn(&self, _vma: &Vma, _pfn: Pfn, _size: u64) {}
}
