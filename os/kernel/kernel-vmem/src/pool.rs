//! # Table Page Allocation
//!
//! [`PageTableAlloc`] is the seam between the forest and whatever hands out
//! page-table pages. Entries store frame numbers, so the allocator also
//! resolves a frame back to its [`PageTablePage`].
//!
//! [`TablePool`] is the in-memory implementation. It can be given a capacity,
//! after which allocation fails the way a real allocator under memory
//! pressure would.

use crate::table::{PageTablePage, TableLevel};
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use kernel_memory_addresses::Pfn;
use kernel_sync::SpinLock;

/// Page-table page allocation failed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
#[error("out of memory allocating a {level:?} table page")]
pub struct AllocError {
    pub level: TableLevel,
}

/// Source of page-table pages.
pub trait PageTableAlloc: Send + Sync {
    /// Allocate a zeroed table page for `level`.
    fn alloc_table(&self, level: TableLevel) -> Option<Arc<PageTablePage>>;

    /// Return a table page. The frame must not be referenced by any entry
    /// or deposit list afterwards.
    fn free_table(&self, frame: Pfn);

    /// Resolve a frame stored in an entry back to its table page.
    fn lookup(&self, frame: Pfn) -> Option<Arc<PageTablePage>>;
}

/// Bookkeeping for [`TablePool`].
struct PoolState {
    next: u64,
    free: Vec<Pfn>,
    live: BTreeMap<Pfn, Arc<PageTablePage>>,
    capacity: Option<usize>,
}

/// Arena of table pages with optional capacity limit.
///
/// Frames are handed out from `base` upward and recycled on free.
pub struct TablePool {
    state: SpinLock<PoolState>,
}

impl TablePool {
    /// Unlimited pool starting at `base`.
    #[must_use]
    pub const fn new(base: Pfn) -> Self {
        Self {
            state: SpinLock::new(PoolState {
                next: base.as_u64(),
                free: Vec::new(),
                live: BTreeMap::new(),
                capacity: None,
            }),
        }
    }

    /// Pool that holds at most `capacity` live pages.
    #[must_use]
    pub fn with_capacity(base: Pfn, capacity: usize) -> Self {
        let pool = Self::new(base);
        pool.set_capacity(Some(capacity));
        pool
    }

    /// Change the live-page limit. Pages already handed out stay valid.
    pub fn set_capacity(&self, capacity: Option<usize>) {
        self.state.lock().capacity = capacity;
    }

    /// Number of table pages currently handed out.
    #[must_use]
    pub fn live_tables(&self) -> usize {
        self.state.lock().live.len()
    }

    /// Number of live pages at `level`.
    #[must_use]
    pub fn live_tables_at(&self, level: TableLevel) -> usize {
        self.state
            .lock()
            .live
            .values()
            .filter(|p| p.level() == level)
            .count()
    }
}

impl PageTableAlloc for TablePool {
    fn alloc_table(&self, level: TableLevel) -> Option<Arc<PageTablePage>> {
        let mut st = self.state.lock();
        if st.capacity.is_some_and(|cap| st.live.len() >= cap) {
            log::trace!("table pool exhausted at {} pages", st.live.len());
            return None;
        }

        let frame = if let Some(frame) = st.free.pop() {
            frame
        } else {
            let frame = Pfn::new(st.next);
            st.next += 1;
            frame
        };

        let page = Arc::new(PageTablePage::new(level, frame));
        st.live.insert(frame, Arc::clone(&page));
        Some(page)
    }

    fn free_table(&self, frame: Pfn) {
        let mut st = self.state.lock();
        match st.live.remove(&frame) {
            Some(page) => {
                debug_assert_eq!(page.lock().deposited(), 0, "freed table still holds deposits");
                st.free.push(frame);
            }
            None => log::warn!("freeing unknown table page {frame}"),
        }
    }

    fn lookup(&self, frame: Pfn) -> Option<Arc<PageTablePage>> {
        self.state.lock().live.get(&frame).cloned()
    }
}
