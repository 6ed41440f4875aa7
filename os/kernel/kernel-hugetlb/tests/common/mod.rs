#![allow(dead_code)]

use kernel_hugetlb::{HugeTlb, HugeTlbConfig, HugeTlbStats, InstallError, InstallMode};
use kernel_memory_addresses::{Pfn, VirtualAddress, VirtualRange};
use kernel_vmem::{
    AddressSpace, ArchOps, MmapLayout, MmuNotifier, MmuNotifierEvent, MmuNotifierRange,
    PageProtection, PageTableAlloc, PfnPolicy, PfnTrackError, TablePool, Translation, Vma,
    VmaFlags,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const MB: u64 = 1024 * 1024;
pub const HUGE: u64 = 2 * MB;
pub const GB: u64 = 1024 * MB;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Start(MmuNotifierEvent, VirtualRange),
    End(MmuNotifierEvent, VirtualRange),
    Tlb(VirtualRange),
    Cache(VirtualRange),
}

/// Records every arch and notifier callback in order.
#[derive(Default)]
pub struct Recorder {
    events: Mutex<Vec<Event>>,
    resched: AtomicUsize,
}

impl Recorder {
    pub fn take(&self) -> Vec<Event> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }

    pub fn resched_calls(&self) -> usize {
        self.resched.load(Ordering::Relaxed)
    }

    pub fn tlb_flushes(&self) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| matches!(e, Event::Tlb(_)))
            .count()
    }

    fn push(&self, e: Event) {
        self.events.lock().unwrap().push(e);
    }
}

impl ArchOps for Recorder {
    fn flush_tlb_range(&self, range: VirtualRange) {
        self.push(Event::Tlb(range));
    }

    fn flush_cache_range(&self, range: VirtualRange) {
        self.push(Event::Cache(range));
    }

    fn cond_resched(&self) {
        self.resched.fetch_add(1, Ordering::Relaxed);
    }
}

impl MmuNotifier for Recorder {
    fn invalidate_range_start(&self, r: &MmuNotifierRange) {
        self.push(Event::Start(r.event, r.range));
    }

    fn invalidate_range_end(&self, r: &MmuNotifierRange) {
        self.push(Event::End(r.event, r.range));
    }
}

/// PFN policy that refuses frames at or above `deny_from` and can fail
/// tracking outright.
#[derive(Default)]
pub struct StrictPfns {
    pub deny_from: Option<u64>,
    pub fail_track: bool,
    pub tracked: AtomicUsize,
    pub untracked: AtomicUsize,
}

impl PfnPolicy for StrictPfns {
    fn pfn_modify_allowed(&self, pfn: Pfn, _prot: PageProtection) -> bool {
        self.deny_from.is_none_or(|limit| pfn.as_u64() < limit)
    }

    fn track_pfn_remap(
        &self,
        _vma: &Vma,
        _prot: &mut PageProtection,
        pfn: Pfn,
        _addr: VirtualAddress,
        size: u64,
    ) -> Result<(), PfnTrackError> {
        if self.fail_track {
            return Err(PfnTrackError::Conflict {
                pfn,
                frames: Pfn::frames_in(size),
            });
        }
        self.tracked.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn untrack_pfn(&self, _vma: &Vma, _pfn: Pfn, _size: u64) {
        self.untracked.fetch_add(1, Ordering::Relaxed);
    }
}

pub struct Harness {
    pub pool: Arc<TablePool>,
    pub rec: Arc<Recorder>,
    pub mm: AddressSpace,
    pub engine: HugeTlb,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(TablePool::new(Pfn::new(0x10)), None, MmapLayout::default())
    }

    pub fn with_pool(pool: TablePool) -> Self {
        Self::build(pool, None, MmapLayout::default())
    }

    pub fn with_policy(policy: Arc<dyn PfnPolicy>) -> Self {
        Self::build(TablePool::new(Pfn::new(0x10)), Some(policy), MmapLayout::default())
    }

    pub fn with_layout(layout: MmapLayout) -> Self {
        Self::build(TablePool::new(Pfn::new(0x10)), None, layout)
    }

    pub fn build(pool: TablePool, policy: Option<Arc<dyn PfnPolicy>>, layout: MmapLayout) -> Self {
        let pool = Arc::new(pool);
        let rec = Arc::new(Recorder::default());
        let mut mm = AddressSpace::new(Arc::clone(&pool) as Arc<dyn PageTableAlloc>)
            .unwrap()
            .with_arch(Arc::clone(&rec) as Arc<dyn ArchOps>)
            .with_layout(layout);
        if let Some(policy) = policy {
            mm = mm.with_pfn_policy(policy);
        }
        mm.register_notifier(Arc::clone(&rec) as Arc<dyn MmuNotifier>);
        Self {
            pool,
            rec,
            mm,
            engine: HugeTlb::new(Arc::new(HugeTlbStats::new())),
        }
    }

    pub fn configure(mut self, config: HugeTlbConfig) -> Self {
        self.engine = self.engine.with_config(config);
        self
    }

    pub fn stats(&self) -> &HugeTlbStats {
        self.engine.stats()
    }

    /// Map all of `vma` to frames starting at `pfn`.
    pub fn install(&self, vma: &mut Vma, pfn: u64, mode: InstallMode) {
        let (start, len) = (vma.start().as_u64(), vma.len());
        self.try_install(vma, start, pfn, len, mode).unwrap();
    }

    pub fn try_install(
        &self,
        vma: &mut Vma,
        addr: u64,
        pfn: u64,
        size: u64,
        mode: InstallMode,
    ) -> Result<(), InstallError> {
        self.engine.install_mapping(
            &self.mm,
            vma,
            va(addr),
            Pfn::new(pfn),
            size,
            PageProtection::USER_RW,
            mode,
        )
    }

    pub fn huge_at(&self, addr: u64) -> Option<kernel_vmem::HugeLeaf> {
        match self.mm.query(va(addr))? {
            Translation::Huge(leaf) => Some(leaf),
            Translation::Base(_) => None,
        }
    }

    pub fn base_at(&self, addr: u64) -> Option<kernel_vmem::BaseLeaf> {
        match self.mm.query(va(addr))? {
            Translation::Base(leaf) => Some(leaf),
            Translation::Huge(_) => None,
        }
    }

    /// Every translation in `[start, start + len)`, one per page.
    pub fn snapshot(&self, start: u64, len: u64) -> Vec<Option<Translation>> {
        (start..start + len)
            .step_by(4096)
            .map(|a| self.mm.query(va(a)))
            .collect()
    }
}

pub const fn va(addr: u64) -> VirtualAddress {
    VirtualAddress::new(addr)
}

pub const fn range(start: u64, len: u64) -> VirtualRange {
    VirtualRange::with_len(VirtualAddress::new(start), len)
}

/// A shared, writable region as a DMA-BUF exporter would set it up.
pub fn shared_vma(start: u64, len: u64) -> Vma {
    Vma::new(
        va(start),
        va(start + len),
        VmaFlags::READ
            | VmaFlags::WRITE
            | VmaFlags::SHARED
            | VmaFlags::MAYREAD
            | VmaFlags::MAYWRITE
            | VmaFlags::MAYSHARE,
        PageProtection::USER_RW,
    )
}

/// A private, writable region: copy-on-write.
pub fn private_vma(start: u64, len: u64) -> Vma {
    Vma::new(
        va(start),
        va(start + len),
        VmaFlags::READ | VmaFlags::WRITE | VmaFlags::MAYREAD | VmaFlags::MAYWRITE,
        PageProtection::USER_RW,
    )
}
