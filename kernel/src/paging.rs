//! Virtual pages and the hardware address space interface.

use crate::mem::frame_allocator::FrameId;
use crate::threading::process::Pid;
use core::fmt;
use kidneyos_shared::mem::PAGE_FRAME_SIZE;

/// A virtual page number.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct PageId(pub usize);

impl PageId {
    /// The page containing `addr`.
    pub const fn containing(addr: usize) -> Self {
        Self(addr / PAGE_FRAME_SIZE)
    }

    pub const fn number(self) -> usize {
        self.0
    }

    /// The first address of the page.
    pub const fn base(self) -> usize {
        self.0 * PAGE_FRAME_SIZE
    }

    /// The page `n` pages after this one.
    pub const fn offset(self, n: usize) -> Self {
        Self(self.0 + n)
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "page {:#x}", self.base())
    }
}

/// Per-process hardware page tables.
///
/// Each call is atomic with respect to the others. The memory manager only
/// calls these while the frame involved is pinned or its owner's page table
/// is locked.
pub trait PageDirectory: Send + Sync {
    /// Maps `page` to `frame` in `pid`'s address space. Returns `false` if the
    /// page is already mapped or the page tables could not be extended.
    fn install_mapping(&self, pid: Pid, page: PageId, frame: FrameId, writable: bool) -> bool;
    /// Removes the mapping of `page`, if any, and returns the dirty bit of the
    /// entry it removed, including writes made up to the moment of removal.
    fn clear_mapping(&self, pid: Pid, page: PageId) -> bool;
    fn lookup_frame(&self, pid: Pid, page: PageId) -> Option<FrameId>;
    /// Returns the accessed bit of `page` and clears it.
    fn test_and_clear_accessed(&self, pid: Pid, page: PageId) -> bool;
    fn test_dirty(&self, pid: Pid, page: PageId) -> bool;
}
