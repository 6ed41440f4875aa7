mod common;

use common::*;
use kernel_hugetlb::{HugeTlbConfig, InstallMode};
use kernel_memory_addresses::Pfn;
use kernel_vmem::{BaseLeaf, MmuNotifierEvent, VmaFlags, VmaTree};

const F: u64 = 0x8_0000;

fn installed(start: u64, len: u64) -> (Harness, kernel_vmem::Vma) {
    let h = Harness::new();
    let mut vma = shared_vma(start, len);
    h.install(&mut vma, F, InstallMode::Huge);
    h.rec.take();
    (h, vma)
}

#[test]
fn split_carries_leaf_state() {
    let start = 0x1000_0000;
    let (h, vma) = installed(start, HUGE);

    let pmd = h.mm.pmd_lookup(va(start)).unwrap();
    {
        let mut g = pmd.lock();
        let e = g.get();
        g.set(e.mk_soft_dirty());
    }
    let leaf = h.huge_at(start).unwrap();
    assert!(leaf.attrs.soft_dirty);
    let tables = h.pool.live_tables();

    assert!(h.engine.split_at_address(&h.mm, &vma, va(start + 0x5000)));

    for i in 0..512 {
        assert_eq!(
            h.base_at(start + i * 0x1000),
            Some(BaseLeaf::special(leaf.pfn + i, leaf.attrs)),
            "slot {i}"
        );
    }
    assert_eq!(h.stats().pmd_split(), 1);
    assert_eq!(h.pool.live_tables(), tables);
    assert_eq!(pmd.lock().deposited(), 0);

    let window = range(start, HUGE);
    assert_eq!(
        h.rec.take(),
        vec![
            Event::Start(MmuNotifierEvent::Clear, window),
            Event::Tlb(window),
            Event::End(MmuNotifierEvent::Clear, window),
        ]
    );
}

#[test]
fn second_split_is_a_noop() {
    let start = 0x1000_0000;
    let (h, vma) = installed(start, HUGE);

    assert!(h.engine.split_at_address(&h.mm, &vma, va(start)));
    let after_first = h.snapshot(start, HUGE);
    let tables = h.pool.live_tables();

    assert!(!h.engine.split_at_address(&h.mm, &vma, va(start)));
    assert_eq!(h.snapshot(start, HUGE), after_first);
    assert_eq!(h.pool.live_tables(), tables);
    assert_eq!(h.stats().pmd_split(), 1);
}

#[test]
fn split_skips_a_replaced_leaf() {
    let start = 0x1000_0000;
    let (h, _vma) = installed(start, HUGE);
    let pmd = h.mm.pmd_lookup(va(start)).unwrap();

    assert!(!h.engine.split_huge_leaf(&h.mm, &pmd, Some(Pfn::new(0x1234))));
    assert!(h.huge_at(start).is_some());
    assert!(h.engine.split_huge_leaf(&h.mm, &pmd, Some(Pfn::new(F + 100))));
    assert_eq!(h.stats().pmd_split(), 1);
}

#[test]
fn straddling_address_splits_once() {
    let start = 0x2000_0000;
    let (h, vma) = installed(start, HUGE);

    assert!(h.engine.split_if_straddling(&h.mm, &vma, va(0x2010_0000)));
    assert_eq!(h.base_at(0x2010_0000).unwrap().pfn, Pfn::new(F + 0x100));
    assert_eq!(h.stats().pmd_split(), 1);

    let before = h.snapshot(start, HUGE);
    h.rec.take();
    assert!(!h.engine.split_if_straddling(&h.mm, &vma, va(start)));
    assert_eq!(h.snapshot(start, HUGE), before);
    assert!(h.rec.take().is_empty());
    assert_eq!(h.stats().pmd_split(), 1);
}

#[test]
fn straddle_needs_the_whole_window_in_the_region() {
    let start = 0x2000_0000;
    let (h, _vma) = installed(start, 2 * HUGE);

    // A view of the region that cuts the first leaf in half.
    let mut narrow = shared_vma(0x2010_0000, HUGE);
    narrow.insert_flags(VmaFlags::DMABUF_HUGE);
    assert!(!h.engine.split_if_straddling(&h.mm, &narrow, va(0x2018_0000)));
    assert!(h.huge_at(start).is_some());
    assert_eq!(h.stats().pmd_split(), 0);
}

#[test]
fn straddle_ignores_regions_without_huge_leaves() {
    let start = 0x2000_0000;
    let (h, vma) = installed(start, HUGE);

    let plain = shared_vma(start, HUGE);
    assert!(!plain.is_dmabuf_huge());
    assert!(!h.engine.split_if_straddling(&h.mm, &plain, va(start + MB)));
    assert!(h.huge_at(start).is_some());
    assert!(h.rec.take().is_empty());

    assert!(vma.is_dmabuf_huge());
    assert!(h.engine.split_if_straddling(&h.mm, &vma, va(start + MB)));
}

#[test]
fn whole_region_split_crosses_pud_boundary() {
    let start = GB - HUGE;
    let (h, vma) = installed(start, 2 * HUGE);

    assert_eq!(h.engine.split_whole_region(&h.mm, &vma), 2);
    assert_eq!(h.rec.resched_calls(), 2);
    assert_eq!(h.stats().pmd_split(), 2);
    assert!(h.huge_at(start).is_none());
    assert_eq!(h.base_at(GB).unwrap().pfn, Pfn::new(F + 512));

    assert_eq!(h.engine.split_whole_region(&h.mm, &vma), 0);
    assert_eq!(h.stats().pmd_split(), 2);
}

#[test]
fn whole_region_split_yields_at_configured_interval() {
    let h = Harness::new().configure(HugeTlbConfig::default().with_resched_every_puds(2));
    let mut vma = shared_vma(GB - HUGE, 2 * HUGE);
    h.install(&mut vma, F, InstallMode::Huge);

    assert_eq!(h.engine.split_whole_region(&h.mm, &vma), 2);
    assert_eq!(h.rec.resched_calls(), 1);
}

#[test]
fn whole_region_split_ignores_base_leaves() {
    let h = Harness::new();
    let mut vma = shared_vma(0x3000_0000, HUGE);
    h.install(&mut vma, F, InstallMode::Base);
    let before = h.snapshot(0x3000_0000, HUGE);

    assert_eq!(h.engine.split_whole_region(&h.mm, &vma), 0);
    assert_eq!(h.snapshot(0x3000_0000, HUGE), before);
}

#[test]
fn boundary_adjustment_splits_cut_leaves() {
    let h = Harness::new();
    let mut a = shared_vma(0x4000_0000, 2 * HUGE);
    let mut b = shared_vma(0x4040_0000, 2 * HUGE);
    h.install(&mut a, F, InstallMode::Huge);
    h.install(&mut b, F + 0x400, InstallMode::Huge);

    let mut vmas = VmaTree::new();
    vmas.insert(a.clone()).unwrap();
    vmas.insert(b.clone()).unwrap();

    h.engine
        .adjust_boundaries(&h.mm, &vmas, &a, va(0x4000_0000), a.end(), 0);
    assert_eq!(h.stats().pmd_split(), 0);

    h.engine
        .adjust_boundaries(&h.mm, &vmas, &a, va(0x4000_0000 + MB), a.end(), MB as i64);
    assert_eq!(h.stats().pmd_split(), 2);
    assert!(h.huge_at(0x4000_0000).is_none());
    assert!(h.huge_at(0x4020_0000).is_some());
    assert_eq!(h.base_at(0x4040_0000).unwrap().pfn, Pfn::new(F + 0x400));
    assert!(h.huge_at(0x4060_0000).is_some());
}

#[test]
fn negative_next_adjustment_leaves_next_alone() {
    let h = Harness::new();
    let mut a = shared_vma(0x4000_0000, 2 * HUGE);
    let mut b = shared_vma(0x4040_0000, 2 * HUGE);
    h.install(&mut a, F, InstallMode::Huge);
    h.install(&mut b, F + 0x400, InstallMode::Huge);

    let mut vmas = VmaTree::new();
    vmas.insert(a.clone()).unwrap();
    vmas.insert(b).unwrap();

    h.engine
        .adjust_boundaries(&h.mm, &vmas, &a, a.start(), va(0x4030_0000), -(MB as i64));
    assert_eq!(h.stats().pmd_split(), 1);
    assert!(h.huge_at(0x4040_0000).is_some());
}
