use kernel_memory_addresses::{Pfn, VirtualAddress, VirtualRange};
use kernel_vmem::{AllocError, PfnTrackError};

/// [`HugeTlb::search_unmapped_range`](crate::HugeTlb::search_unmapped_range) failed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SearchError {
    #[error("a mapping of {len:#x} bytes does not fit in the user address space")]
    OutOfAddressSpace { len: u64 },
    #[error("no free range of {len:#x} bytes")]
    NoFit { len: u64 },
}

/// [`HugeTlb::install_mapping`](crate::HugeTlb::install_mapping) failed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InstallError {
    #[error("mapping {addr}+{size:#x} -> {pfn} is not aligned to its granule")]
    Misaligned {
        addr: VirtualAddress,
        pfn: Pfn,
        size: u64,
    },
    #[error("frames {pfn}+{frames:#x} exceed the page-table frame field")]
    FrameOutOfRange { pfn: Pfn, frames: u64 },
    #[error("range {range:?} is empty or outside region {region:?}")]
    InvalidRange {
        range: VirtualRange,
        region: VirtualRange,
    },
    #[error("copy-on-write mapping must cover the whole region {region:?}")]
    InvalidCowRange { region: VirtualRange },
    #[error(transparent)]
    OutOfMemory(#[from] AllocError),
    #[error("mapping {pfn} with the requested protection is not permitted")]
    PermissionDenied { pfn: Pfn },
    #[error(transparent)]
    Track(#[from] PfnTrackError),
}
