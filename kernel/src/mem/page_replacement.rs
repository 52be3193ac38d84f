//! Victim selection for eviction.

use crate::mem::frame_allocator::FramePool;
use crate::mem::frame_table::FrameTableEntry;
use crate::paging::PageDirectory;

pub trait PageReplacementPolicy {
    /// Picks the index of the entry to evict, or [`None`] if every entry is
    /// pinned or the table is empty.
    fn select_victim(
        &mut self,
        entries: &[FrameTableEntry],
        pool: &FramePool,
        mmu: &dyn PageDirectory,
    ) -> Option<usize>;

    /// Called after the entry at `index` is removed, leaving `len` entries.
    fn entry_removed(&mut self, index: usize, len: usize);
}

/// The second-chance clock algorithm.
///
/// The table is scanned circularly from the hand. A frame whose accessed bit
/// is set has the bit cleared and is passed over; the first unpinned frame
/// with a clear bit is the victim. The hand persists across calls.
#[derive(Default)]
pub struct Clock {
    hand: usize,
}

impl Clock {
    pub fn hand(&self) -> usize {
        self.hand
    }
}

impl PageReplacementPolicy for Clock {
    fn select_victim(
        &mut self,
        entries: &[FrameTableEntry],
        pool: &FramePool,
        mmu: &dyn PageDirectory,
    ) -> Option<usize> {
        if entries.is_empty() {
            return None;
        }
        if self.hand >= entries.len() {
            self.hand = 0;
        }

        // Two sweeps: the first may only clear accessed bits.
        for _ in 0..2 * entries.len() {
            let index = self.hand;
            let entry = &entries[index];
            self.hand = (self.hand + 1) % entries.len();

            if pool.is_pinned(entry.frame) {
                log::trace!("clock: {} pinned", entry.frame);
                continue;
            }
            if mmu.test_and_clear_accessed(entry.owner, entry.page) {
                log::trace!("clock: second chance for {} of pid {}", entry.page, entry.owner);
                continue;
            }
            return Some(index);
        }

        None
    }

    fn entry_removed(&mut self, index: usize, len: usize) {
        if index < self.hand {
            self.hand -= 1;
        }
        if self.hand >= len {
            self.hand = 0;
        }
    }
}
