//! Memory-mapped files.
//!
//! A mapping registers one shared, writable, file-backed page per page of
//! the file and loads nothing up front. Dirty pages go back to the file when
//! they are evicted or unmapped.

use super::{AddressSpace, VirtualMemory};
use crate::fs::FileHandle;
use crate::mem::error::{Result, VmError};
use crate::mem::supplemental_page_table::{FileBacking, MappingKind, PageState};
use crate::paging::PageId;
use alloc::{collections::BTreeMap, sync::Arc, vec::Vec};
use core::fmt;
use kidneyos_shared::mem::{is_page_aligned, PAGE_FRAME_SIZE};

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct MapId(pub u32);

impl fmt::Display for MapId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "map {}", self.0)
    }
}

pub struct MemoryMap {
    pub id: MapId,
    /// Our own handle on the file, independent of the caller's.
    pub file: FileHandle,
    pub base: PageId,
    pub pages: Vec<PageId>,
}

#[derive(Default)]
pub struct MapTable {
    maps: BTreeMap<MapId, MemoryMap>,
    next_id: u32,
}

impl MapTable {
    fn insert(&mut self, file: FileHandle, base: PageId, pages: Vec<PageId>) -> MapId {
        let id = MapId(self.next_id);
        self.next_id += 1;
        self.maps.insert(
            id,
            MemoryMap {
                id,
                file,
                base,
                pages,
            },
        );
        id
    }

    fn remove(&mut self, id: MapId) -> Option<MemoryMap> {
        self.maps.remove(&id)
    }

    pub fn get(&self, id: MapId) -> Option<&MemoryMap> {
        self.maps.get(&id)
    }

    pub fn ids(&self) -> Vec<MapId> {
        self.maps.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }
}

impl VirtualMemory {
    /// Maps `file` at `addr` in `space`.
    ///
    /// Fails without changing anything if the file is empty, `addr` is null,
    /// unaligned or outside user space, or any page of the range is already
    /// in use.
    pub fn map(&self, space: &Arc<AddressSpace>, file: FileHandle, addr: usize) -> Result<MapId> {
        if addr == 0 || !is_page_aligned(addr) || addr >= self.config.user_top {
            log::warn!("pid {}: mmap at bad address {:#x}", space.pid, addr);
            return Err(VmError::InvalidMapping);
        }

        let mut maps = space.maps();
        let session = self.fs.enter(space.pid);
        let mut spt = space.spt();

        let length = session.length(file);
        if length == 0 {
            log::warn!("pid {}: mmap of empty {}", space.pid, file);
            return Err(VmError::InvalidMapping);
        }
        let page_count = length.div_ceil(PAGE_FRAME_SIZE);
        let end = page_count
            .checked_mul(PAGE_FRAME_SIZE)
            .and_then(|size| addr.checked_add(size));
        if end.map_or(true, |end| end > self.config.user_top) {
            log::warn!("pid {}: mmap at {:#x} runs past user space", space.pid, addr);
            return Err(VmError::InvalidMapping);
        }

        let base = PageId::containing(addr);
        let pages: Vec<PageId> = (0..page_count).map(|i| base.offset(i)).collect();
        if let Some(&page) = pages.iter().find(|page| spt.contains(**page)) {
            log::warn!("pid {}: mmap overlaps {}", space.pid, page);
            return Err(VmError::PageAlreadyMapped(page));
        }

        let file = session.reopen(file).ok_or(VmError::FileUnavailable)?;
        for (i, &page) in pages.iter().enumerate() {
            let offset = i * PAGE_FRAME_SIZE;
            let read_bytes = (length - offset).min(PAGE_FRAME_SIZE);
            let backing = FileBacking {
                file,
                offset,
                read_bytes,
                zero_bytes: PAGE_FRAME_SIZE - read_bytes,
                kind: MappingKind::Shared,
            };
            spt.register_file_backed(page, backing, true)?;
        }

        let id = maps.insert(file, base, pages);
        log::info!(
            "pid {}: {} covers {} pages at {}",
            space.pid,
            id,
            page_count,
            base
        );
        Ok(id)
    }

    /// Removes a mapping, writing dirty resident pages back to the file.
    /// Unknown ids are ignored.
    ///
    /// Every page of the mapping is removed and the file closed even if a
    /// frame turns out not to be in the frame table; the first such error is
    /// returned afterwards.
    pub fn unmap(&self, space: &Arc<AddressSpace>, id: MapId) -> Result<()> {
        let mut maps = space.maps();
        let Some(map) = maps.remove(id) else {
            log::debug!("pid {}: {} is not mapped", space.pid, id);
            return Ok(());
        };

        let session = self.fs.enter(space.pid);
        let mut spt = space.spt();
        let mut written = 0;
        let mut failure = None;
        for &page in &map.pages {
            let Some(entry) = spt.lookup(page).copied() else {
                continue;
            };
            if let PageState::Resident { frame } = entry.state {
                let dirty = self.mmu.clear_mapping(space.pid, page);
                if let (true, Some(backing)) = (dirty, entry.file) {
                    let count = self.frames.pool().with_frame(frame, |memory| {
                        session.write_at(backing.file, &memory[..backing.read_bytes], backing.offset)
                    });
                    if count != backing.read_bytes {
                        log::warn!(
                            "{}: short write-back ({} of {} bytes)",
                            page,
                            count,
                            backing.read_bytes
                        );
                    }
                    written += 1;
                }
                if let Err(error) = self.frames.free(frame) {
                    log::error!("pid {}: {} of {}: {}", space.pid, page, id, error);
                    failure.get_or_insert(error);
                }
            }
            spt.remove(page);
        }
        drop(spt);

        session.close(map.file);
        log::info!(
            "pid {}: unmapped {} ({} pages written back)",
            space.pid,
            id,
            written
        );
        failure.map_or(Ok(()), Err)
    }

    /// Removes every mapping of `space`, carrying on past failures. Returns
    /// the first error.
    pub fn unmap_all(&self, space: &Arc<AddressSpace>) -> Result<()> {
        let ids = space.maps().ids();
        let mut result = Ok(());
        for id in ids {
            let unmapped = self.unmap(space, id);
            if result.is_ok() {
                result = unmapped;
            }
        }
        result
    }
}
