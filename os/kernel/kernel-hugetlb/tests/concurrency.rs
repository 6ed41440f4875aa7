mod common;

use common::*;
use kernel_hugetlb::InstallMode;
use kernel_memory_addresses::Pfn;
use kernel_vmem::{MmuGather, TableLevel};
use std::sync::Barrier;
use std::thread;

const F: u64 = 0x8_0000;
const THREADS: usize = 8;

#[test]
fn racing_splits_split_once() {
    let h = Harness::new();
    let start = 0x1000_0000;
    let mut vma = shared_vma(start, HUGE);
    h.install(&mut vma, F, InstallMode::Huge);

    let barrier = Barrier::new(THREADS);
    let wins = thread::scope(|s| {
        let handles: Vec<_> = (0..THREADS as u64)
            .map(|i| {
                let (h, vma, barrier) = (&h, &vma, &barrier);
                s.spawn(move || {
                    barrier.wait();
                    h.engine
                        .split_at_address(&h.mm, vma, va(start + i * 0x4_0000))
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|t| t.join().unwrap())
            .filter(|&won| won)
            .count()
    });

    assert_eq!(wins, 1);
    assert_eq!(h.stats().pmd_split(), 1);
    for i in 0..512 {
        assert_eq!(h.base_at(start + i * 0x1000).unwrap().pfn, Pfn::new(F + i));
    }
}

#[test]
fn racing_base_installs_share_tables() {
    let h = Harness::new();
    let start = 0x3000_0000;
    let slice = HUGE / THREADS as u64;

    let barrier = Barrier::new(THREADS);
    thread::scope(|s| {
        for i in 0..THREADS as u64 {
            let (h, barrier) = (&h, &barrier);
            s.spawn(move || {
                let addr = start + i * slice;
                let mut vma = shared_vma(addr, slice);
                barrier.wait();
                h.install(&mut vma, F + i * (slice / 0x1000), InstallMode::Base);
            });
        }
    });

    assert_eq!(h.stats().contpte_map(), THREADS as u64);
    // root, PUD, PMD, PTE; the losers' spares went back to the pool
    assert_eq!(h.pool.live_tables(), 4);
    assert_eq!(h.pool.live_tables_at(TableLevel::Pte), 1);
    assert_eq!(h.mm.nr_ptes(), 1);
    assert_eq!(h.mm.nr_pmds(), 1);
    for i in 0..512 {
        assert_eq!(h.base_at(start + i * 0x1000).unwrap().pfn, Pfn::new(F + i));
    }
}

#[test]
fn racing_zap_and_split_agree() {
    for _ in 0..16 {
        let h = Harness::new();
        let start = 0x1000_0000;
        let mut vma = shared_vma(start, HUGE);
        h.install(&mut vma, F, InstallMode::Huge);
        let pmd = h.mm.pmd_lookup(va(start)).unwrap();

        let barrier = Barrier::new(2);
        let (zapped, split) = thread::scope(|s| {
            let zap = s.spawn(|| {
                barrier.wait();
                let mut tlb = MmuGather::new(&h.mm);
                h.engine.zap_huge_leaf(&mut tlb, &vma, &pmd, va(start))
            });
            let split = s.spawn(|| {
                barrier.wait();
                h.engine.split_huge_leaf(&h.mm, &pmd, None)
            });
            (zap.join().unwrap(), split.join().unwrap())
        });

        assert!(zapped ^ split);
        assert_eq!(h.stats().pmd_zap() + h.stats().pmd_split(), 1);
        assert_eq!(h.huge_at(start), None);
        assert_eq!(h.base_at(start).is_some(), split);
    }
}
