//! Demand-paged user address spaces.
//!
//! [`VirtualMemory`] owns the frame table, the swap space and the file system
//! gate, and keeps one [`AddressSpace`] per process. Page faults, memory maps
//! and process exit all enter through it.

pub mod config;
pub mod error;
pub mod frame_allocator;
pub mod frame_table;
pub mod mmap;
pub mod page_fault;
pub mod page_replacement;
pub mod supplemental_page_table;
pub mod swapping;
pub mod user;

#[cfg(test)]
mod testing;

use crate::block::Block;
use crate::fs::{FileSystem, SerialFs};
use crate::paging::PageDirectory;
use crate::sync::mutex::{Mutex, MutexGuard};
use crate::threading::process::{Pid, ProcessDirectory};
use alloc::{collections::BTreeMap, sync::Arc, vec::Vec};
use config::VmConfig;
use frame_allocator::FramePool;
use frame_table::FrameTable;
use mmap::MapTable;
use supplemental_page_table::{PageState, SupplementalPageTable};
use swapping::SwapSpace;

/// The virtual memory of one process.
pub struct AddressSpace {
    pid: Pid,
    spt: Mutex<SupplementalPageTable>,
    maps: Mutex<MapTable>,
}

impl AddressSpace {
    fn new(pid: Pid, swap: Arc<SwapSpace>) -> Self {
        Self {
            pid,
            spt: Mutex::new(SupplementalPageTable::new(swap)),
            maps: Mutex::new(MapTable::default()),
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Locks the supplemental page table. Taken after the file system lock
    /// and before the swap lock, and never while holding the frame table
    /// lock. Nobody waits for the file system lock while holding this one.
    pub fn spt(&self) -> MutexGuard<SupplementalPageTable> {
        self.spt.lock()
    }

    /// Locks the supplemental page table unless someone else holds it.
    pub fn try_spt(&self) -> Option<MutexGuard<SupplementalPageTable>> {
        self.spt.try_lock()
    }

    /// Locks the memory map table. Taken before the file system and page
    /// table locks.
    pub fn maps(&self) -> MutexGuard<MapTable> {
        self.maps.lock()
    }
}

pub struct VirtualMemory {
    config: VmConfig,
    frames: FrameTable,
    swap: Arc<SwapSpace>,
    fs: Arc<SerialFs>,
    mmu: Arc<dyn PageDirectory>,
    processes: Arc<dyn ProcessDirectory>,
    spaces: Mutex<BTreeMap<Pid, Arc<AddressSpace>>>,
}

impl VirtualMemory {
    pub fn new(
        config: VmConfig,
        pool: Arc<FramePool>,
        swap_device: Block,
        fs: Arc<dyn FileSystem>,
        mmu: Arc<dyn PageDirectory>,
        processes: Arc<dyn ProcessDirectory>,
    ) -> Self {
        let swap = Arc::new(SwapSpace::new(swap_device));
        let fs = Arc::new(SerialFs::new(fs));
        log::info!(
            "vm: {} frames, {} swap slots, user space below {:#x}",
            pool.total(),
            swap.slot_count(),
            config.user_top
        );
        Self {
            config,
            frames: FrameTable::new(pool, mmu.clone(), swap.clone(), fs.clone()),
            swap,
            fs,
            mmu,
            processes,
            spaces: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn create_address_space(&self, pid: Pid) -> Arc<AddressSpace> {
        let space = Arc::new(AddressSpace::new(pid, self.swap.clone()));
        let previous = self.spaces.lock().insert(pid, space.clone());
        assert!(previous.is_none(), "pid {} already has an address space", pid);
        space
    }

    pub fn address_space(&self, pid: Pid) -> Option<Arc<AddressSpace>> {
        self.spaces.lock().get(&pid).cloned()
    }

    pub fn current_address_space(&self) -> Option<Arc<AddressSpace>> {
        self.address_space(self.processes.current_process())
    }

    /// Tears down `space`: unmaps every memory map (writing dirty pages back),
    /// frees every frame and drops every page table entry.
    pub fn exit(&self, space: &Arc<AddressSpace>) {
        if let Err(error) = self.unmap_all(space) {
            log::error!("pid {}: unmapping at exit: {}", space.pid, error);
        }

        let mut spt = space.spt();
        let frames = self.frames.free_all(space.pid);
        let pages = spt.destroy_all();
        drop(spt);

        self.spaces.lock().remove(&space.pid);
        log::debug!(
            "pid {}: released {} frames and {} pages",
            space.pid,
            frames,
            pages
        );
    }

    /// Logs frame, page and swap usage for every live process.
    pub fn dump_status(&self) {
        log::info!(
            "vm: {}/{} frames in use, {}/{} swap slots free",
            self.frames.len(),
            self.frames.pool().total(),
            self.swap.free_slot_count(),
            self.swap.slot_count()
        );
        for pid in self.processes.live_processes() {
            let Some(space) = self.address_space(pid) else {
                continue;
            };
            let spt = space.spt();
            let swapped = spt
                .iter()
                .filter(|entry| matches!(entry.state, PageState::Swapped { .. }))
                .count();
            let pages = spt.len();
            drop(spt);
            log::info!(
                "  pid {}: {} pages, {} resident, {} swapped, {} maps",
                pid,
                pages,
                self.frames.frames_owned_by(pid),
                swapped,
                space.maps().len()
            );
        }
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    pub fn frames(&self) -> &FrameTable {
        &self.frames
    }

    pub fn swap(&self) -> &SwapSpace {
        &self.swap
    }

    pub fn fs(&self) -> &SerialFs {
        &self.fs
    }

    pub fn live_spaces(&self) -> Vec<Pid> {
        self.spaces.lock().keys().copied().collect()
    }
}
