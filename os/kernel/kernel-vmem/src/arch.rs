use kernel_memory_addresses::VirtualRange;

/// Architecture maintenance hooks the page-table code calls out to.
pub trait ArchOps: Send + Sync {
    /// Invalidate cached translations for `range`.
    fn flush_tlb_range(&self, range: VirtualRange);

    /// Write back data caches for `range` before its mapping changes.
    fn flush_cache_range(&self, range: VirtualRange);

    /// Voluntary preemption point for long walks.
    fn cond_resched(&self) {}
}

/// Hooks that do nothing; for coherent-cache hosts and tests.
#[derive(Debug, Default, Copy, Clone)]
pub struct NoopArch;

impl ArchOps for NoopArch {
    fn flush_tlb_range(&self, _range: VirtualRange) {}

    fn flush_cache_range(&self, _range: VirtualRange) {}
}
