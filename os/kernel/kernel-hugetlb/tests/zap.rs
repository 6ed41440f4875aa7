mod common;

use common::*;
use kernel_hugetlb::InstallMode;
use kernel_memory_addresses::Pfn;
use kernel_vmem::{MmuGather, MmuNotifierEvent};

const F: u64 = 0x8_0000;

#[test]
fn zap_frees_the_deposit_once() {
    let h = Harness::new();
    let start = 0x1000_0000;
    let mut vma = shared_vma(start, HUGE);
    h.install(&mut vma, F, InstallMode::Huge);
    h.rec.take();

    let tables = h.pool.live_tables();
    let pmd = h.mm.pmd_lookup(va(start)).unwrap();
    {
        let mut tlb = MmuGather::new(&h.mm);
        assert!(h.engine.zap_huge_leaf(&mut tlb, &vma, &pmd, va(start)));
        assert_eq!(h.pool.live_tables(), tables - 1);
        assert!(!h.engine.zap_huge_leaf(&mut tlb, &vma, &pmd, va(start)));
        assert_eq!(h.pool.live_tables(), tables - 1);
        assert_eq!(tlb.cleared_pmds(), 1);
        assert_eq!(tlb.freed_tables(), 1);
        assert!(h.rec.take().is_empty());
        tlb.finish();
    }

    assert!(pmd.read().is_none());
    assert_eq!(h.mm.nr_ptes(), 0);
    assert_eq!(h.stats().pmd_zap(), 1);
    assert_eq!(h.rec.take(), vec![Event::Tlb(range(start, HUGE))]);
}

#[test]
fn install_split_zap_scenario() {
    let h = Harness::new();
    let start = 0x1000_0000;
    let mut vma = shared_vma(start, 2 * HUGE);
    h.install(&mut vma, F, InstallMode::Huge);
    assert_eq!(h.stats().pmd_map(), 2);

    assert!(h.engine.split_at_address(&h.mm, &vma, va(start + 0x1000)));
    for i in 0..512 {
        assert!(h.base_at(start + i * 0x1000).is_some());
    }
    assert_eq!(h.base_at(start).unwrap().pfn, Pfn::new(F));
    assert_eq!(h.base_at(start + 0x1000).unwrap().pfn, Pfn::new(F + 1));
    assert_eq!(h.stats().pmd_split(), 1);

    let mut tlb = MmuGather::new(&h.mm);
    // The split slot now links a table; only the other leaf is zappable.
    let split = h.mm.pmd_lookup(va(start)).unwrap();
    assert!(!h.engine.zap_huge_leaf(&mut tlb, &vma, &split, va(start)));
    let huge = h.mm.pmd_lookup(va(start + HUGE)).unwrap();
    assert!(h.engine.zap_huge_leaf(&mut tlb, &vma, &huge, va(start + HUGE)));
    tlb.finish();

    assert_eq!(h.stats().pmd_zap(), 1);
    assert!(huge.read().is_none());
    assert!(h.base_at(start).is_some());
}

#[test]
fn unmap_zaps_whole_leaves_and_splits_partial_ones() {
    let h = Harness::new();
    let start = 0x6000_0000;
    let mut vma = shared_vma(start, 2 * HUGE);
    h.install(&mut vma, F, InstallMode::Huge);
    h.rec.take();
    assert_eq!(h.pool.live_tables(), 5);

    let cut = range(start, HUGE + MB);
    h.engine.unmap_range(&h.mm, &vma, cut);

    assert!(h.mm.query(va(start)).is_none());
    assert!(h.mm.pmd_lookup(va(start)).unwrap().read().is_none());
    assert!(h.base_at(start + HUGE).is_none());
    assert!(h.base_at(start + HUGE + MB - 0x1000).is_none());
    assert_eq!(
        h.base_at(start + HUGE + MB).unwrap().pfn,
        Pfn::new(F + 512 + 256)
    );

    assert_eq!(h.stats().pmd_zap(), 1);
    assert_eq!(h.stats().pmd_split(), 1);
    // one deposit freed, the other became the live PTE table
    assert_eq!(h.pool.live_tables(), 4);

    let second = range(start + HUGE, HUGE);
    assert_eq!(
        h.rec.take(),
        vec![
            Event::Start(MmuNotifierEvent::Unmap, cut),
            Event::Start(MmuNotifierEvent::Clear, second),
            Event::Tlb(second),
            Event::End(MmuNotifierEvent::Clear, second),
            Event::Tlb(cut),
            Event::End(MmuNotifierEvent::Unmap, cut),
        ]
    );
}

#[test]
fn unmap_of_base_leaves_keeps_tables() {
    let h = Harness::new();
    let start = 0x3000_0000;
    let mut vma = shared_vma(start, 0x4_0000);
    h.install(&mut vma, F, InstallMode::Base);
    let tables = h.pool.live_tables();

    h.engine.unmap_range(&h.mm, &vma, range(start + 0x1_0000, 0x1_0000));

    assert!(h.base_at(start).is_some());
    assert!(h.base_at(start + 0x1_0000).is_none());
    assert!(h.base_at(start + 0x1_F000).is_none());
    assert!(h.base_at(start + 0x2_0000).is_some());
    assert_eq!(h.pool.live_tables(), tables);
    assert_eq!(h.stats().pmd_zap(), 0);
}

#[test]
fn unmap_inside_a_run_unfolds_the_survivors() {
    let h = Harness::new();
    let start = 0x3000_0000;
    let mut vma = shared_vma(start, 0x2_0000);
    h.install(&mut vma, F, InstallMode::Base);

    h.engine
        .unmap_range(&h.mm, &vma, range(start + 0x4000, 0x1000));

    assert!(h.base_at(start + 0x4000).is_none());
    for i in (0..16).filter(|&i| i != 4) {
        let leaf = h.base_at(start + i * 0x1000).unwrap();
        assert_eq!(leaf.pfn, Pfn::new(F + i));
        assert!(!leaf.contiguous, "page {i}");
    }
    // the neighbouring run was not touched
    assert!((16..32).all(|i| h.base_at(start + i * 0x1000).unwrap().contiguous));
}

#[test]
#[should_panic(expected = "outside")]
fn unmap_outside_region_panics() {
    let h = Harness::new();
    let vma = shared_vma(0x3000_0000, HUGE);
    h.engine.unmap_range(&h.mm, &vma, range(0x3000_0000, 2 * HUGE));
}
