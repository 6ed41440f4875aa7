//! # MMU Notifiers
//!
//! Secondary translation caches (device MMUs, hypervisors) subscribe to an
//! [`AddressSpace`](crate::AddressSpace) and are told before and after any
//! change to a range's translations.

use crate::AddressSpace;
use kernel_memory_addresses::VirtualRange;

/// Why a range is being invalidated.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum MmuNotifierEvent {
    /// Translations change but stay mapped (e.g. a huge leaf is split).
    Clear,
    /// Translations go away.
    Unmap,
}

/// Argument to the invalidate callbacks.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct MmuNotifierRange {
    pub range: VirtualRange,
    pub event: MmuNotifierEvent,
}

/// Subscriber to translation changes.
pub trait MmuNotifier: Send + Sync {
    fn invalidate_range_start(&self, range: &MmuNotifierRange);
    fn invalidate_range_end(&self, range: &MmuNotifierRange);
}

/// An open invalidation bracket; announces the end when dropped.
///
/// Drop it only after the page-table lock covering the change is released.
#[must_use = "the invalidation ends when the guard is dropped"]
pub struct InvalidateGuard<'a> {
    mm: &'a AddressSpace,
    range: MmuNotifierRange,
}

impl<'a> InvalidateGuard<'a> {
    pub(crate) fn start(mm: &'a AddressSpace, range: MmuNotifierRange) -> Self {
        for n in mm.notifiers() {
            n.invalidate_range_start(&range);
        }
        Self { mm, range }
    }

    #[must_use]
    pub const fn range(&self) -> &MmuNotifierRange {
        &self.range
    }
}

impl Drop for InvalidateGuard<'_> {
    fn drop(&mut self) {
        for n in self.mm.notifiers() {
            n.invalidate_range_end(&self.range);
        }
    }
}
