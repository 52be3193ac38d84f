//! The pool of physical frames available to user pages.

mod placement_algorithms;

use crate::sync::mutex::Mutex;
use alloc::boxed::Box;
use bitbybit::bitfield;
use core::fmt;
use kidneyos_shared::mem::PAGE_FRAME_SIZE;
use placement_algorithms::{NextFit, PlacementAlgorithm};

/// A physical frame number, an index into the [`FramePool`].
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct FrameId(pub usize);

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "frame {}", self.0)
    }
}

#[bitfield(u8, default = 0)]
pub struct CoreMapEntry {
    #[bit(0, rw)]
    allocated: bool,
    // Set while the frame is being filled or written out.
    #[bit(1, rw)]
    pinned: bool,
}

struct CoreMap {
    entries: Box<[CoreMapEntry]>,
    placement_algorithm: NextFit,
    frames_allocated: usize,
}

pub struct FramePool {
    core_map: Mutex<CoreMap>,
    memory: Box<[Mutex<[u8; PAGE_FRAME_SIZE]>]>,
}

impl FramePool {
    pub fn new(frames: usize) -> Self {
        Self {
            core_map: Mutex::new(CoreMap {
                entries: (0..frames).map(|_| CoreMapEntry::DEFAULT).collect(),
                placement_algorithm: NextFit::default(),
                frames_allocated: 0,
            }),
            memory: (0..frames)
                .map(|_| Mutex::new([0; PAGE_FRAME_SIZE]))
                .collect(),
        }
    }

    /// Takes a free frame. The frame comes back pinned.
    pub fn alloc(&self) -> Option<FrameId> {
        let mut core_map = self.core_map.lock();
        let CoreMap {
            entries,
            placement_algorithm,
            frames_allocated,
        } = &mut *core_map;

        let index = placement_algorithm.place(entries)?;
        assert!(!entries[index].allocated());
        entries[index] = entries[index].with_allocated(true).with_pinned(true);
        *frames_allocated += 1;

        Some(FrameId(index))
    }

    pub fn dealloc(&self, frame: FrameId) {
        let mut core_map = self.core_map.lock();
        let entry = &mut core_map.entries[frame.0];
        assert!(entry.allocated(), "{} freed while not allocated", frame);
        *entry = CoreMapEntry::DEFAULT;
        core_map.frames_allocated -= 1;
    }

    pub fn pin(&self, frame: FrameId) {
        self.set_pinned(frame, true);
    }

    pub fn unpin(&self, frame: FrameId) {
        self.set_pinned(frame, false);
    }

    pub fn is_pinned(&self, frame: FrameId) -> bool {
        self.core_map.lock().entries[frame.0].pinned()
    }

    fn set_pinned(&self, frame: FrameId, pinned: bool) {
        let mut core_map = self.core_map.lock();
        let entry = &mut core_map.entries[frame.0];
        debug_assert!(entry.allocated(), "pinning free {}", frame);
        *entry = entry.with_pinned(pinned);
    }

    /// Runs `f` with exclusive access to the contents of `frame`.
    pub fn with_frame<R>(
        &self,
        frame: FrameId,
        f: impl FnOnce(&mut [u8; PAGE_FRAME_SIZE]) -> R,
    ) -> R {
        f(&mut self.memory[frame.0].lock())
    }

    pub fn total(&self) -> usize {
        self.memory.len()
    }

    pub fn allocated(&self) -> usize {
        self.core_map.lock().frames_allocated
    }
}
