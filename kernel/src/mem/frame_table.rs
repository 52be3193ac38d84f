//! Frames assigned to user pages, and eviction.
//!
//! Every frame handed out by [`FrameTable::allocate`] has an entry naming the
//! page it backs and the process that owns it. Entries hold only a weak
//! reference to the owner's address space so the table never keeps a process
//! alive.
//!
//! Locking: victim selection and pinning happen under the table lock. The
//! victim is written out after that lock is released, under the victim
//! owner's page table lock. Owners only remove their entries with their page
//! table locked, so an evictor that holds that lock and still finds the entry
//! it picked (same serial) has the page to itself.
//!
//! The evictor may already hold the file system lock, and the victim's owner
//! may be waiting for it, so the evictor only ever tries the victim's page
//! table lock and the file system lock. A victim whose locks are taken is
//! unpinned and passed over.

use crate::fs::SerialFs;
use crate::mem::error::{Result, VmError};
use crate::mem::frame_allocator::{FrameId, FramePool};
use crate::mem::page_replacement::{Clock, PageReplacementPolicy};
use crate::mem::supplemental_page_table::PageState;
use crate::mem::swapping::{SwapSlot, SwapSpace};
use crate::mem::AddressSpace;
use crate::paging::{PageDirectory, PageId};
use crate::sync::mutex::Mutex;
use crate::threading::process::Pid;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;

/// Sweeps over a table of busy candidates before eviction gives up.
pub const MAX_BUSY_SWEEPS: usize = 1024;

#[derive(Clone)]
pub struct FrameTableEntry {
    pub frame: FrameId,
    pub page: PageId,
    pub owner: Pid,
    pub space: Weak<AddressSpace>,
    /// Distinguishes successive allocations of the same frame.
    pub serial: u64,
}

enum Eviction {
    /// Nothing was evictable.
    Nothing,
    /// The victim was freed by someone else first.
    Released,
    /// The victim's frame, still allocated and pinned.
    Reclaimed(FrameId),
}

struct Inner {
    entries: Vec<FrameTableEntry>,
    policy: Clock,
    next_serial: u64,
}

impl Inner {
    fn take(&mut self, frame: FrameId) -> Option<FrameTableEntry> {
        let index = self.entries.iter().position(|entry| entry.frame == frame)?;
        let entry = self.entries.remove(index);
        self.policy.entry_removed(index, self.entries.len());
        Some(entry)
    }

    fn is_current(&self, frame: FrameId, serial: u64) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.frame == frame && entry.serial == serial)
    }
}

pub struct FrameTable {
    pool: Arc<FramePool>,
    mmu: Arc<dyn PageDirectory>,
    swap: Arc<SwapSpace>,
    fs: Arc<SerialFs>,
    inner: Mutex<Inner>,
}

impl FrameTable {
    pub fn new(
        pool: Arc<FramePool>,
        mmu: Arc<dyn PageDirectory>,
        swap: Arc<SwapSpace>,
        fs: Arc<SerialFs>,
    ) -> Self {
        Self {
            pool,
            mmu,
            swap,
            fs,
            inner: Mutex::new(Inner {
                entries: Vec::new(),
                policy: Clock::default(),
                next_serial: 0,
            }),
        }
    }

    /// Takes a frame for `page` of `space`, evicting once if the pool is
    /// empty. The frame comes back pinned; call [`FrameTable::unpin`] once it
    /// is installed.
    ///
    /// Must not be called with `space`'s page table locked.
    pub fn allocate(&self, space: &Arc<AddressSpace>, page: PageId) -> Result<FrameId> {
        let frame = match self.pool.alloc() {
            Some(frame) => frame,
            None => match self.evict(space.pid())? {
                Eviction::Reclaimed(frame) => frame,
                Eviction::Released | Eviction::Nothing => {
                    self.pool.alloc().ok_or_else(|| {
                        log::warn!("pid {}: out of frames for {}", space.pid(), page);
                        VmError::OutOfFrames
                    })?
                }
            },
        };

        let mut inner = self.inner.lock();
        debug_assert!(
            !inner
                .entries
                .iter()
                .any(|entry| entry.owner == space.pid() && entry.page == page),
            "{} of pid {} already has a frame",
            page,
            space.pid()
        );
        let serial = inner.next_serial;
        inner.next_serial += 1;
        inner.entries.push(FrameTableEntry {
            frame,
            page,
            owner: space.pid(),
            space: Arc::downgrade(space),
            serial,
        });
        log::debug!("{} -> {} of pid {}", frame, page, space.pid());

        Ok(frame)
    }

    /// Makes `frame` eligible for eviction.
    pub fn unpin(&self, frame: FrameId) {
        self.pool.unpin(frame);
    }

    /// Removes `frame` from the table, clears its owner's mapping and returns
    /// it to the pool.
    pub fn free(&self, frame: FrameId) -> Result<()> {
        let entry = self.inner.lock().take(frame).ok_or_else(|| {
            log::error!("{} freed without a frame table entry", frame);
            VmError::FrameNotAllocated(frame)
        })?;
        self.release(&entry);
        Ok(())
    }

    /// Frees every frame owned by `pid`. Returns the number freed.
    pub fn free_all(&self, pid: Pid) -> usize {
        let freed = {
            let mut inner = self.inner.lock();
            let mut freed = Vec::new();
            let mut index = 0;
            while index < inner.entries.len() {
                if inner.entries[index].owner == pid {
                    let entry = inner.entries.remove(index);
                    let len = inner.entries.len();
                    inner.policy.entry_removed(index, len);
                    freed.push(entry);
                } else {
                    index += 1;
                }
            }
            freed
        };

        for entry in &freed {
            self.release(entry);
        }
        if !freed.is_empty() {
            log::debug!("pid {}: freed {} frames", pid, freed.len());
        }
        freed.len()
    }

    /// Evicts one frame chosen by the clock and returns it to the pool.
    /// `ctx` is the process on whose behalf the eviction runs.
    ///
    /// Returns `Ok(false)` if nothing could be evicted: the table is empty or
    /// every frame is pinned.
    pub fn evict_one(&self, ctx: Pid) -> Result<bool> {
        match self.evict(ctx)? {
            Eviction::Reclaimed(frame) => {
                self.pool.dealloc(frame);
                Ok(true)
            }
            Eviction::Released => Ok(true),
            Eviction::Nothing => Ok(false),
        }
    }

    /// Evicts one frame. A reclaimed frame stays allocated and pinned for the
    /// caller.
    ///
    /// Candidates whose page table or file system session is held elsewhere
    /// are passed over. If every candidate stays busy for
    /// [`MAX_BUSY_SWEEPS`] sweeps of the table, nothing is evicted.
    fn evict(&self, ctx: Pid) -> Result<Eviction> {
        for _ in 0..MAX_BUSY_SWEEPS {
            for _ in 0..self.len().max(1) {
                let Some(victim) = self.select_victim(ctx) else {
                    return Ok(Eviction::Nothing);
                };
                if let Some(eviction) = self.evict_victim(ctx, &victim)? {
                    return Ok(eviction);
                }
                log::trace!("pid {}: {} is busy, passing over it", ctx, victim.frame);
                let inner = self.inner.lock();
                if inner.is_current(victim.frame, victim.serial) {
                    self.pool.unpin(victim.frame);
                }
            }
            core::hint::spin_loop();
        }
        log::warn!("pid {}: every eviction candidate stayed busy", ctx);
        Ok(Eviction::Nothing)
    }

    /// Picks and pins a victim.
    fn select_victim(&self, ctx: Pid) -> Option<FrameTableEntry> {
        let mut inner = self.inner.lock();
        let Inner {
            entries, policy, ..
        } = &mut *inner;
        let Some(index) = policy.select_victim(entries, &self.pool, self.mmu.as_ref()) else {
            log::debug!("pid {}: no frame to evict", ctx);
            return None;
        };
        let victim = entries[index].clone();
        self.pool.pin(victim.frame);
        Some(victim)
    }

    /// Writes a pinned victim out and takes its frame. Returns [`None`],
    /// leaving the victim pinned and untouched, if its page table or the file
    /// system is held by someone else.
    fn evict_victim(&self, ctx: Pid, victim: &FrameTableEntry) -> Result<Option<Eviction>> {
        let Some(space) = victim.space.upgrade() else {
            // The owner is gone; its frame only needs taking back.
            return Ok(Some(self.reclaim(victim)));
        };

        let Some(mut spt) = space.try_spt() else {
            return Ok(None);
        };
        if !self.inner.lock().is_current(victim.frame, victim.serial) {
            // Freed by its owner before we got the page table.
            return Ok(Some(Eviction::Released));
        }

        let Some(entry) = spt
            .lookup_mut(victim.page)
            .filter(|entry| entry.state == PageState::Resident { frame: victim.frame })
        else {
            log::error!(
                "{} of pid {} has a frame but no resident page",
                victim.page,
                victim.owner
            );
            return Ok(Some(self.reclaim(victim)));
        };

        let write_back = entry
            .file
            .filter(|_| entry.writable && entry.is_shared());
        let session = match write_back {
            Some(_) => match self.fs.try_enter(ctx) {
                Some(session) => Some(session),
                None => return Ok(None),
            },
            None => None,
        };

        log::debug!(
            "pid {}: evicting {} ({} of pid {})",
            ctx,
            victim.frame,
            victim.page,
            victim.owner
        );
        // Writes after this point fault and wait for the page table lock.
        let dirty = self.mmu.clear_mapping(victim.owner, victim.page);

        match write_back.zip(session).filter(|_| dirty) {
            Some((backing, session)) => {
                let written = self.pool.with_frame(victim.frame, |memory| {
                    session.write_at(backing.file, &memory[..backing.read_bytes], backing.offset)
                });
                if written != backing.read_bytes {
                    log::warn!(
                        "{}: short write-back ({} of {} bytes)",
                        victim.page,
                        written,
                        backing.read_bytes
                    );
                }
                entry.state = PageState::FileBacked;
            }
            None => match self.swap_out(victim.frame) {
                Ok(slot) => entry.state = PageState::Swapped { slot },
                Err(error) => {
                    if !self.mmu.install_mapping(
                        victim.owner,
                        victim.page,
                        victim.frame,
                        entry.writable,
                    ) {
                        log::error!("{}: could not restore mapping", victim.page);
                    }
                    self.pool.unpin(victim.frame);
                    return Err(error);
                }
            },
        }

        Ok(Some(self.reclaim(victim)))
    }

    /// Drops the entry for a pinned victim, keeping the frame allocated and
    /// pinned.
    fn reclaim(&self, victim: &FrameTableEntry) -> Eviction {
        let mut inner = self.inner.lock();
        if !inner.is_current(victim.frame, victim.serial) {
            return Eviction::Released;
        }
        inner.take(victim.frame);
        drop(inner);
        self.mmu.clear_mapping(victim.owner, victim.page);
        Eviction::Reclaimed(victim.frame)
    }

    /// Copies `frame` into a fresh swap slot.
    pub fn swap_out(&self, frame: FrameId) -> Result<SwapSlot> {
        let slot = self.swap.allocate_slot()?;
        if let Err(error) = self
            .pool
            .with_frame(frame, |memory| self.swap.write_page(slot, memory))
        {
            self.swap.free_slot(slot)?;
            return Err(error);
        }
        Ok(slot)
    }

    pub fn pool(&self) -> &FramePool {
        &self.pool
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn frames_owned_by(&self, pid: Pid) -> usize {
        self.inner
            .lock()
            .entries
            .iter()
            .filter(|entry| entry.owner == pid)
            .count()
    }

    /// `(frame, owner, page)` for every entry, in clock order.
    pub fn entries(&self) -> Vec<(FrameId, Pid, PageId)> {
        self.inner
            .lock()
            .entries
            .iter()
            .map(|entry| (entry.frame, entry.owner, entry.page))
            .collect()
    }

    fn release(&self, entry: &FrameTableEntry) {
        self.mmu.clear_mapping(entry.owner, entry.page);
        self.pool.dealloc(entry.frame);
    }
}
