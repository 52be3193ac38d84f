//! Per-process record of every virtual page the process knows about.

use crate::fs::FileHandle;
use crate::mem::error::{Result, VmError};
use crate::mem::frame_allocator::FrameId;
use crate::mem::swapping::{SwapSlot, SwapSpace};
use crate::paging::PageId;
use alloc::{collections::BTreeMap, sync::Arc};
use kidneyos_shared::mem::PAGE_FRAME_SIZE;

/// Where file-backed contents go when a dirty page leaves memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MappingKind {
    /// A demand-loaded executable segment. Dirty pages go to swap.
    Private,
    /// A memory-mapped file. Dirty pages are written back to the file.
    Shared,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileBacking {
    pub file: FileHandle,
    pub offset: usize,
    pub read_bytes: usize,
    pub zero_bytes: usize,
    pub kind: MappingKind,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PageState {
    Resident { frame: FrameId },
    FileBacked,
    Swapped { slot: SwapSlot },
    ZeroStack,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageEntry {
    pub page: PageId,
    pub writable: bool,
    /// Kept for the life of the entry, whatever its state.
    pub file: Option<FileBacking>,
    pub state: PageState,
}

impl PageEntry {
    pub fn is_shared(&self) -> bool {
        self.file.is_some_and(|file| file.kind == MappingKind::Shared)
    }

    pub fn frame(&self) -> Option<FrameId> {
        match self.state {
            PageState::Resident { frame } => Some(frame),
            _ => None,
        }
    }
}

pub struct SupplementalPageTable {
    entries: BTreeMap<PageId, PageEntry>,
    swap: Arc<SwapSpace>,
}

impl SupplementalPageTable {
    pub fn new(swap: Arc<SwapSpace>) -> Self {
        Self {
            entries: BTreeMap::new(),
            swap,
        }
    }

    pub fn register_file_backed(
        &mut self,
        page: PageId,
        backing: FileBacking,
        writable: bool,
    ) -> Result<()> {
        debug_assert_eq!(backing.read_bytes + backing.zero_bytes, PAGE_FRAME_SIZE);
        self.insert(PageEntry {
            page,
            writable,
            file: Some(backing),
            state: PageState::FileBacked,
        })
    }

    pub fn register_zero_stack(&mut self, page: PageId) -> Result<()> {
        self.insert(PageEntry {
            page,
            writable: true,
            file: None,
            state: PageState::ZeroStack,
        })
    }

    /// Records a page whose frame the caller has already allocated.
    pub fn register_resident(&mut self, page: PageId, frame: FrameId, writable: bool) -> Result<()> {
        self.insert(PageEntry {
            page,
            writable,
            file: None,
            state: PageState::Resident { frame },
        })
    }

    /// Registers a private, demand-loaded segment starting at `base`. Each
    /// page reads up to a page of the remaining `read_bytes` and zero-fills
    /// the rest. Returns the number of pages registered.
    pub fn load_segment(
        &mut self,
        file: FileHandle,
        mut offset: usize,
        base: PageId,
        read_bytes: usize,
        zero_bytes: usize,
        writable: bool,
    ) -> Result<usize> {
        let total = read_bytes + zero_bytes;
        if total % PAGE_FRAME_SIZE != 0 {
            return Err(VmError::MisalignedSegment);
        }
        let pages = total / PAGE_FRAME_SIZE;

        if let Some(page) = (0..pages).map(|i| base.offset(i)).find(|p| self.contains(*p)) {
            return Err(VmError::PageAlreadyMapped(page));
        }

        let mut remaining = read_bytes;
        for i in 0..pages {
            let page_read = remaining.min(PAGE_FRAME_SIZE);
            let backing = FileBacking {
                file,
                offset,
                read_bytes: page_read,
                zero_bytes: PAGE_FRAME_SIZE - page_read,
                kind: MappingKind::Private,
            };
            self.register_file_backed(base.offset(i), backing, writable)?;
            remaining -= page_read;
            offset += page_read;
        }

        log::debug!("loaded {} segment pages at {}", pages, base);
        Ok(pages)
    }

    pub fn lookup(&self, page: PageId) -> Option<&PageEntry> {
        self.entries.get(&page)
    }

    pub fn lookup_mut(&mut self, page: PageId) -> Option<&mut PageEntry> {
        self.entries.get_mut(&page)
    }

    pub fn contains(&self, page: PageId) -> bool {
        self.entries.contains_key(&page)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PageEntry> {
        self.entries.values()
    }

    /// Removes the entry for `page`, releasing its swap slot if it holds one.
    /// A resident page's frame must already have been freed.
    pub fn remove(&mut self, page: PageId) -> Option<PageEntry> {
        let entry = self.entries.remove(&page)?;
        self.release(&entry);
        Some(entry)
    }

    /// Removes every entry without writing anything back. Returns the number
    /// of entries removed.
    pub fn destroy_all(&mut self) -> usize {
        let entries = core::mem::take(&mut self.entries);
        for entry in entries.values() {
            self.release(entry);
        }
        entries.len()
    }

    fn insert(&mut self, entry: PageEntry) -> Result<()> {
        if self.entries.contains_key(&entry.page) {
            log::warn!("{} already has an entry", entry.page);
            return Err(VmError::PageAlreadyMapped(entry.page));
        }
        self.entries.insert(entry.page, entry);
        Ok(())
    }

    fn release(&self, entry: &PageEntry) {
        if let PageState::Swapped { slot } = entry.state {
            if let Err(error) = self.swap.free_slot(slot) {
                log::error!("dropping {}: {}", entry.page, error);
            }
        }
    }
}
