//! A virtual memory system wired to in-memory doubles.

use super::{AddressSpace, VirtualMemory};
use crate::block::block_core::test::RamDisk;
use crate::block::{Block, BlockType};
use crate::fs::test::MemFs;
use crate::fs::FileHandle;
use crate::mem::config::VmConfig;
use crate::mem::error::Result;
use crate::mem::frame_allocator::FramePool;
use crate::mem::swapping::SECTORS_PER_PAGE;
use crate::paging::test::{SoftMmu, UserFault};
use crate::paging::PageDirectory;
use crate::threading::process::test::ProcessList;
use crate::threading::process::Pid;
use alloc::sync::Arc;

/// Faults resolved per byte range before giving up.
const MAX_FAULTS: usize = 64;

pub struct Harness {
    pub vm: VirtualMemory,
    pub pool: Arc<FramePool>,
    pub mmu: Arc<SoftMmu>,
    pub fs: Arc<MemFs>,
    pub disk: Arc<RamDisk>,
    pub processes: Arc<ProcessList>,
}

impl Harness {
    pub fn new(frames: usize, swap_slots: u32) -> Self {
        Self::with_config(frames, swap_slots, VmConfig::default())
    }

    pub fn with_config(frames: usize, swap_slots: u32, config: VmConfig) -> Self {
        let pool = Arc::new(FramePool::new(frames));
        let mmu = Arc::new(SoftMmu::new(pool.clone()));
        let fs = Arc::new(MemFs::new());
        let disk = Arc::new(RamDisk::new(swap_slots * SECTORS_PER_PAGE as u32));
        let processes = Arc::new(ProcessList::new());
        let vm = VirtualMemory::new(
            config,
            pool.clone(),
            Block::new("swap", BlockType::Swap, disk.clone()),
            fs.clone(),
            mmu.clone(),
            processes.clone(),
        );
        Self {
            vm,
            pool,
            mmu,
            fs,
            disk,
            processes,
        }
    }

    pub fn spawn(&self, name: &str) -> Arc<AddressSpace> {
        let pid = self.processes.allocate_pid(name);
        self.processes.set_current(pid);
        self.vm.create_address_space(pid)
    }

    /// Creates `name` with `data` and opens it.
    pub fn file(&self, name: &str, data: &[u8]) -> FileHandle {
        self.fs.create(name, data);
        self.vm.fs().enter(0).open(name).unwrap()
    }

    /// Writes to user memory as the process would, resolving faults along
    /// the way. The stack pointer is taken to be `addr`.
    pub fn write(&self, space: &Arc<AddressSpace>, addr: usize, data: &[u8]) -> Result<()> {
        self.write_with_sp(space, addr, addr, data)
    }

    pub fn write_with_sp(
        &self,
        space: &Arc<AddressSpace>,
        addr: usize,
        sp: usize,
        data: &[u8],
    ) -> Result<()> {
        self.retry(space, sp, || self.mmu.write_user(space.pid(), addr, data))
    }

    pub fn read(&self, space: &Arc<AddressSpace>, addr: usize, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0; len];
        self.retry(space, addr, || self.mmu.read_user(space.pid(), addr, &mut buf))?;
        Ok(buf)
    }

    pub fn pid_frames(&self, pid: Pid) -> usize {
        self.vm.frames().frames_owned_by(pid)
    }

    /// Checks that each page of `space` is mapped exactly when it is
    /// resident, to the frame its entry names, and that the frame table
    /// agrees on who owns that frame.
    pub fn assert_residency_consistent(&self, space: &Arc<AddressSpace>) {
        let pid = space.pid();
        let frames = self.vm.frames().entries();
        let spt = space.spt();
        let mut resident = 0;
        for entry in spt.iter() {
            assert_eq!(
                self.mmu.lookup_frame(pid, entry.page),
                entry.frame(),
                "{} of pid {} is {:?}",
                entry.page,
                pid,
                entry.state
            );
            if let Some(frame) = entry.frame() {
                assert!(
                    frames.contains(&(frame, pid, entry.page)),
                    "{} of pid {} has no frame table entry",
                    entry.page,
                    pid
                );
                resident += 1;
            }
        }
        assert_eq!(self.pid_frames(pid), resident);
        assert_eq!(self.mmu.mapped_pages(pid), resident);
    }

    fn retry(
        &self,
        space: &Arc<AddressSpace>,
        sp: usize,
        mut access: impl FnMut() -> core::result::Result<(), UserFault>,
    ) -> Result<()> {
        for _ in 0..MAX_FAULTS {
            match access() {
                Ok(()) => return Ok(()),
                Err(fault) => self.vm.handle_page_fault(space, fault.addr, sp, fault.write)?,
            }
        }
        panic!("access did not settle after {} faults", MAX_FAULTS);
    }
}
