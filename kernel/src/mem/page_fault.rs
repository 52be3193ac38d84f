//! Page fault resolution.

use super::{AddressSpace, VirtualMemory};
use crate::mem::error::{Result, VmError};
use crate::mem::frame_allocator::FrameId;
use crate::mem::supplemental_page_table::{PageEntry, PageState};
use crate::paging::PageId;
use crate::threading::process::Pid;
use alloc::{string::String, sync::Arc};
use kidneyos_shared::mem::PAGE_FRAME_SIZE;

impl VirtualMemory {
    /// Resolves a fault at `addr` in `space`. `sp` is the user stack pointer
    /// at the time of the fault and `write` whether the access was a write.
    ///
    /// On success the page is mapped and the access can be retried. Errors
    /// are fatal to the process; see [`VirtualMemory::resolve_or_kill`].
    pub fn handle_page_fault(
        &self,
        space: &Arc<AddressSpace>,
        addr: usize,
        sp: usize,
        write: bool,
    ) -> Result<()> {
        let page = PageId::containing(addr);
        log::trace!(
            "pid {}: {} fault at {:#x} (sp {:#x})",
            space.pid,
            if write { "write" } else { "read" },
            addr,
            sp
        );

        if addr >= self.config.user_top || addr < PAGE_FRAME_SIZE {
            return Err(VmError::InvalidAccess { addr });
        }

        let known = space.spt().lookup(page).copied();
        match known {
            Some(entry) if matches!(entry.state, PageState::Resident { .. }) => {
                Err(VmError::ProtectionViolation { addr })
            }
            Some(entry) if write && !entry.writable => Err(VmError::ProtectionViolation { addr }),
            Some(_) => self.load_page(space, page),
            None if self.is_stack_access(addr, sp) => self.grow_stack(space, page),
            None => Err(VmError::InvalidAccess { addr }),
        }
    }

    /// Resolves a fault, killing the process with status -1 if it cannot be
    /// resolved.
    pub fn resolve_or_kill(
        &self,
        space: &Arc<AddressSpace>,
        addr: usize,
        sp: usize,
        write: bool,
    ) -> Result<()> {
        self.handle_page_fault(space, addr, sp, write)
            .inspect_err(|error| {
                log::warn!("pid {}: unresolved fault: {}", space.pid, error);
                self.kill(space, error.exit_status());
            })
    }

    /// Terminates the process owning `space` with `status`.
    pub fn kill(&self, space: &Arc<AddressSpace>, status: i32) {
        let name = self
            .processes
            .process_name(space.pid)
            .unwrap_or_else(|| String::from("?"));
        log::info!("{}: exit({})", name, status);
        self.exit(space);
        self.processes.terminate(space.pid, status);
    }

    /// Maps a zeroed page just below the top of user space. Returns the
    /// initial stack pointer.
    pub fn setup_stack(&self, space: &Arc<AddressSpace>) -> Result<usize> {
        let page = PageId::containing(self.config.user_top - 1);
        let frame = self.frames.allocate(space, page)?;
        self.frames.pool().with_frame(frame, |memory| memory.fill(0));

        let mut spt = space.spt();
        if let Err(error) = spt.register_resident(page, frame, true) {
            self.frames.free(frame)?;
            return Err(error);
        }
        if !self.mmu.install_mapping(space.pid, page, frame, true) {
            spt.remove(page);
            self.frames.free(frame)?;
            return Err(VmError::InstallFailed(page));
        }
        self.frames.unpin(frame);

        Ok(self.config.user_top)
    }

    fn is_stack_access(&self, addr: usize, sp: usize) -> bool {
        addr >= self.config.stack_floor()
            && addr < self.config.user_top
            && self
                .config
                .stack_slop
                .map_or(true, |slop| addr.saturating_add(slop) >= sp)
    }

    fn grow_stack(&self, space: &Arc<AddressSpace>, page: PageId) -> Result<()> {
        space.spt().register_zero_stack(page)?;
        log::debug!("pid {}: growing stack to {}", space.pid, page);
        self.load_page(space, page).inspect_err(|_| {
            space.spt().remove(page);
        })
    }

    /// Brings a known, non-resident page into a frame and maps it.
    ///
    /// The frame is filled with the page table unlocked. If the entry changed
    /// in the meantime the frame is dropped and the access is left to fault
    /// again.
    fn load_page(&self, space: &Arc<AddressSpace>, page: PageId) -> Result<()> {
        // Allocation may evict one of our own pages, which takes our page
        // table lock.
        let frame = self.frames.allocate(space, page)?;

        let Some(entry) = space.spt().lookup(page).copied() else {
            self.frames.free(frame)?;
            return Err(VmError::InvalidAccess { addr: page.base() });
        };

        if let Err(error) = self.fill_frame(space.pid, &entry, frame) {
            self.frames.free(frame)?;
            return Err(error);
        }

        let mut spt = space.spt();
        let Some(current) = spt.lookup_mut(page).filter(|current| **current == entry) else {
            drop(spt);
            log::debug!("pid {}: {} changed while loading", space.pid, page);
            return self.frames.free(frame);
        };

        if !self.mmu.install_mapping(space.pid, page, frame, entry.writable) {
            log::warn!("pid {}: could not map {}", space.pid, page);
            drop(spt);
            self.frames.free(frame)?;
            return Err(VmError::InstallFailed(page));
        }

        if let PageState::Swapped { slot } = entry.state {
            if let Err(error) = self.swap.free_slot(slot) {
                log::error!("{}: releasing swap slot {}: {}", page, slot.0, error);
            }
        }
        current.state = PageState::Resident { frame };
        self.frames.unpin(frame);
        log::trace!("pid {}: {} resident in {}", space.pid, page, frame);
        Ok(())
    }

    /// Fills `frame` with the contents `entry` describes. A swapped page's
    /// slot stays allocated until the page is installed.
    fn fill_frame(&self, who: Pid, entry: &PageEntry, frame: FrameId) -> Result<()> {
        let pool = self.frames.pool();
        match entry.state {
            PageState::FileBacked => {
                let backing = entry.file.ok_or(VmError::FileUnavailable)?;
                let session = self.fs.enter(who);
                let read = pool.with_frame(frame, |memory| {
                    let read = session.read_at(
                        backing.file,
                        &mut memory[..backing.read_bytes],
                        backing.offset,
                    );
                    memory[read..].fill(0);
                    read
                });
                drop(session);
                if read != backing.read_bytes {
                    log::warn!(
                        "{}: short read ({} of {} bytes)",
                        entry.page,
                        read,
                        backing.read_bytes
                    );
                    return Err(VmError::FileUnavailable);
                }
                Ok(())
            }
            PageState::ZeroStack => {
                pool.with_frame(frame, |memory| memory.fill(0));
                Ok(())
            }
            PageState::Swapped { slot } => {
                pool.with_frame(frame, |memory| self.swap.peek_page(slot, memory))
            }
            PageState::Resident { .. } => Err(VmError::ProtectionViolation {
                addr: entry.page.base(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::block::{BlockSector, BLOCK_SECTOR_SIZE};
    use crate::mem::config::VmConfig;
    use crate::mem::error::VmError;
    use crate::mem::supplemental_page_table::PageState;
    use crate::mem::swapping::SECTORS_PER_PAGE;
    use crate::mem::testing::Harness;
    use crate::paging::PageId;
    use kidneyos_shared::mem::{OFFSET, PAGE_FRAME_SIZE};
    use kidneyos_shared::sizes::MB;

    const CODE: usize = 0x0804_8000;
    const HEAP: usize = 0x1000_0000;

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 253) as u8).collect()
    }

    #[test]
    fn segment_pages_load_lazily() {
        let h = Harness::new(4, 4);
        let space = h.spawn("segment");
        let data = pattern(5000);
        let file = h.file("prog", &data);

        let base = PageId::containing(CODE);
        let zero = 2 * PAGE_FRAME_SIZE - data.len();
        space
            .spt()
            .load_segment(file, 0, base, data.len(), zero, false)
            .unwrap();
        assert_eq!(h.pool.allocated(), 0);

        assert_eq!(h.read(&space, CODE, PAGE_FRAME_SIZE).unwrap(), data[..PAGE_FRAME_SIZE]);
        let second = h.read(&space, CODE + PAGE_FRAME_SIZE, PAGE_FRAME_SIZE).unwrap();
        assert_eq!(second[..904], data[PAGE_FRAME_SIZE..]);
        assert!(second[904..].iter().all(|&b| b == 0));
        assert_eq!(h.pid_frames(space.pid()), 2);

        // Read-only segment.
        assert_eq!(
            h.write(&space, CODE + 8, &[1]),
            Err(VmError::ProtectionViolation { addr: CODE + 8 })
        );
    }

    #[test]
    fn invalid_addresses() {
        let h = Harness::new(2, 2);
        let space = h.spawn("wild");
        let vm = &h.vm;
        assert_eq!(
            vm.handle_page_fault(&space, 0x10, 0x10, false),
            Err(VmError::InvalidAccess { addr: 0x10 })
        );
        assert_eq!(
            vm.handle_page_fault(&space, OFFSET, OFFSET, true),
            Err(VmError::InvalidAccess { addr: OFFSET })
        );
        assert_eq!(
            vm.handle_page_fault(&space, HEAP, OFFSET, false),
            Err(VmError::InvalidAccess { addr: HEAP })
        );
        assert!(space.spt().is_empty());
    }

    #[test]
    fn stack_grows_near_the_stack_pointer() {
        let h = Harness::new(4, 4);
        let space = h.spawn("stack");
        let sp = h.vm.setup_stack(&space).unwrap();
        assert_eq!(sp, OFFSET);
        assert_eq!(h.pid_frames(space.pid()), 1);
        h.write(&space, OFFSET - 4, &[7; 4]).unwrap();

        // PUSHA-style access 32 bytes below a lowered stack pointer.
        let sp = OFFSET - PAGE_FRAME_SIZE - 64;
        h.write_with_sp(&space, sp - 32, sp, &[1]).unwrap();
        let grown = PageId::containing(sp - 32);
        assert!(matches!(
            space.spt().lookup(grown).unwrap().state,
            PageState::Resident { .. }
        ));

        // Anywhere in the stack region will do, however far below the stack
        // pointer.
        let far = sp - 2 * PAGE_FRAME_SIZE;
        h.write_with_sp(&space, far, sp, &[1]).unwrap();
        assert!(space.spt().contains(PageId::containing(far)));

        // Beyond the stack ceiling.
        let deep = OFFSET - 8 * MB - PAGE_FRAME_SIZE;
        assert_eq!(
            h.write_with_sp(&space, deep, deep, &[1]),
            Err(VmError::InvalidAccess { addr: deep })
        );
        h.assert_residency_consistent(&space);
    }

    #[test]
    fn pusha_slop_limits_stack_growth() {
        let h = Harness::with_config(4, 4, VmConfig::default().with_pusha_slop());
        let space = h.spawn("pusha");
        h.vm.setup_stack(&space).unwrap();

        let sp = OFFSET - PAGE_FRAME_SIZE - 64;
        h.write_with_sp(&space, sp - 32, sp, &[1]).unwrap();

        let far = sp - 2 * PAGE_FRAME_SIZE;
        assert_eq!(
            h.write_with_sp(&space, far, sp, &[1]),
            Err(VmError::InvalidAccess { addr: far })
        );
        assert!(!space.spt().contains(PageId::containing(far)));
    }

    #[test]
    fn mappings_follow_residency() {
        let h = Harness::new(2, 8);
        let space = h.spawn("residency");
        let program = h.file("prog", &pattern(2 * PAGE_FRAME_SIZE));
        let data = h.file("data", &[0; PAGE_FRAME_SIZE]);
        space
            .spt()
            .load_segment(program, 0, PageId::containing(CODE), 2 * PAGE_FRAME_SIZE, 0, true)
            .unwrap();
        let sp = h.vm.setup_stack(&space).unwrap();
        let id = h.vm.map(&space, data, HEAP).unwrap();
        h.assert_residency_consistent(&space);

        // Eviction to swap and to the file, then back in.
        h.write(&space, CODE, b"code").unwrap();
        h.write(&space, HEAP, b"map").unwrap();
        h.assert_residency_consistent(&space);
        h.write(&space, CODE + PAGE_FRAME_SIZE, b"more").unwrap();
        h.assert_residency_consistent(&space);
        h.write_with_sp(&space, sp - 8, sp - 8, b"stack").unwrap();
        h.assert_residency_consistent(&space);
        assert_eq!(h.read(&space, CODE, 4).unwrap(), b"code");
        h.assert_residency_consistent(&space);

        // A failed install leaves nothing mapped behind.
        let page = PageId::containing(HEAP);
        if space.spt().lookup(page).unwrap().frame().is_none() {
            h.mmu.fail_next_install();
            assert_eq!(h.read(&space, HEAP, 3), Err(VmError::InstallFailed(page)));
            h.assert_residency_consistent(&space);
        }
        assert_eq!(h.read(&space, HEAP, 3).unwrap(), b"map");
        h.assert_residency_consistent(&space);

        h.vm.unmap(&space, id).unwrap();
        h.assert_residency_consistent(&space);
        assert!(!space.spt().contains(page));
    }

    #[test]
    fn swapped_pages_come_back() {
        let h = Harness::new(1, 4);
        let space = h.spawn("swap");
        let a = HEAP;
        let b = HEAP + PAGE_FRAME_SIZE;
        space.spt().register_zero_stack(PageId::containing(a)).unwrap();
        space.spt().register_zero_stack(PageId::containing(b)).unwrap();

        let data = pattern(PAGE_FRAME_SIZE);
        h.write(&space, a, &data).unwrap();
        h.write(&space, b, b"b").unwrap();
        assert_eq!(h.vm.swap().free_slot_count(), 3);
        let PageState::Swapped { slot } = space.spt().lookup(PageId::containing(a)).unwrap().state
        else {
            panic!("first page should have been swapped out");
        };
        let first_sector = (slot.0 * SECTORS_PER_PAGE) as BlockSector;
        assert_eq!(h.disk.sector(first_sector)[..], data[..BLOCK_SECTOR_SIZE]);

        assert_eq!(h.read(&space, a, PAGE_FRAME_SIZE).unwrap(), data);
        // A's slot was released on the way in, and B took a fresh one.
        assert_eq!(h.vm.swap().free_slot_count(), 3);
        assert_eq!(h.read(&space, b, 1).unwrap(), b"b");
    }

    #[test]
    fn failed_install_rolls_back() {
        let h = Harness::new(1, 4);
        let space = h.spawn("rollback");
        let a = PageId::containing(HEAP);
        let b = PageId::containing(HEAP + PAGE_FRAME_SIZE);
        space.spt().register_zero_stack(a).unwrap();
        space.spt().register_zero_stack(b).unwrap();

        h.mmu.fail_next_install();
        assert_eq!(h.write(&space, a.base(), b"x"), Err(VmError::InstallFailed(a)));
        assert_eq!(space.spt().lookup(a).unwrap().state, PageState::ZeroStack);
        assert!(h.vm.frames().is_empty());
        assert_eq!(h.pool.allocated(), 0);

        // Swapped page: the contents survive a failed swap-in.
        h.write(&space, a.base(), b"kept").unwrap();
        h.write(&space, b.base(), b"y").unwrap();
        h.mmu.fail_next_install();
        assert_eq!(h.read(&space, a.base(), 4), Err(VmError::InstallFailed(a)));
        let PageState::Swapped { slot } = space.spt().lookup(a).unwrap().state else {
            panic!("page should be back in swap");
        };
        assert!(!h.vm.swap().is_slot_free(slot));
        assert_eq!(h.read(&space, a.base(), 4).unwrap(), b"kept");
    }

    #[test]
    fn unresolved_fault_kills() {
        let h = Harness::new(2, 2);
        let space = h.spawn("victim");
        h.vm.setup_stack(&space).unwrap();

        assert_eq!(
            h.vm.resolve_or_kill(&space, HEAP, OFFSET, true),
            Err(VmError::InvalidAccess { addr: HEAP })
        );
        assert_eq!(h.processes.exits(), [(space.pid(), -1)]);
        assert!(h.vm.address_space(space.pid()).is_none());
        assert_eq!(h.pool.allocated(), 0);
        assert!(space.spt().is_empty());
    }
}
