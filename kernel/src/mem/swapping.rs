//! Page-sized slots on the swap device.
//!
//! The slot table is a bitmap with one bit per slot: `true` means the slot is
//! free. Only the bitmap is locked; device I/O happens outside the lock.

use crate::block::{Block, BlockSector, BLOCK_SECTOR_SIZE};
use crate::mem::error::{Result, VmError};
use crate::sync::mutex::Mutex;
use kidneyos_shared::bit_array::BitArray;
use kidneyos_shared::mem::PAGE_FRAME_SIZE;

/// Number of device sectors backing one page.
pub const SECTORS_PER_PAGE: usize = PAGE_FRAME_SIZE / BLOCK_SECTOR_SIZE;

/// Index of a page-sized slot on the swap device.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct SwapSlot(pub usize);

pub struct SwapSpace {
    device: Block,
    slots: Mutex<BitArray>,
}

impl SwapSpace {
    pub fn new(device: Block) -> Self {
        let slot_count = device.get_size() as usize / SECTORS_PER_PAGE;
        log::info!("swap: {} slots on {}", slot_count, device.get_name());
        Self {
            device,
            slots: Mutex::new(BitArray::new(slot_count, true)),
        }
    }

    /// Claims the lowest free slot.
    pub fn allocate_slot(&self) -> Result<SwapSlot> {
        let index = self.slots.lock().scan_and_flip(true).ok_or_else(|| {
            log::warn!("swap: no free slots");
            VmError::SwapExhausted
        })?;
        Ok(SwapSlot(index))
    }

    /// Writes `page` to `slot`, which must already be allocated.
    pub fn write_page(&self, slot: SwapSlot, page: &[u8; PAGE_FRAME_SIZE]) -> Result<()> {
        self.check_in_use(slot)?;
        for (i, sector) in page.chunks_exact(BLOCK_SECTOR_SIZE).enumerate() {
            self.device.write(Self::sector(slot, i), sector)?;
        }
        log::debug!("swap: wrote slot {}", slot.0);
        Ok(())
    }

    /// Reads `slot` into `page` and frees the slot.
    pub fn read_page(&self, slot: SwapSlot, page: &mut [u8; PAGE_FRAME_SIZE]) -> Result<()> {
        self.peek_page(slot, page)?;
        self.free_slot(slot)
    }

    /// Reads `slot` into `page`, leaving the slot allocated.
    pub fn peek_page(&self, slot: SwapSlot, page: &mut [u8; PAGE_FRAME_SIZE]) -> Result<()> {
        self.check_in_use(slot)?;
        for (i, sector) in page.chunks_exact_mut(BLOCK_SECTOR_SIZE).enumerate() {
            self.device.read(Self::sector(slot, i), sector)?;
        }
        log::debug!("swap: read slot {}", slot.0);
        Ok(())
    }

    /// Frees `slot` without reading it.
    pub fn free_slot(&self, slot: SwapSlot) -> Result<()> {
        let mut slots = self.slots.lock();
        if slot.0 >= slots.len() || slots.get(slot.0) {
            log::error!("swap: slot {} freed while not in use", slot.0);
            return Err(VmError::SwapSlotNotInUse(slot));
        }
        slots.set(slot.0, true);
        Ok(())
    }

    pub fn slot_count(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn free_slot_count(&self) -> usize {
        self.slots.lock().count(true)
    }

    pub fn is_slot_free(&self, slot: SwapSlot) -> bool {
        let slots = self.slots.lock();
        slot.0 < slots.len() && slots.get(slot.0)
    }

    pub fn device(&self) -> &Block {
        &self.device
    }

    fn check_in_use(&self, slot: SwapSlot) -> Result<()> {
        let slots = self.slots.lock();
        if slot.0 >= slots.len() || slots.get(slot.0) {
            return Err(VmError::SwapSlotNotInUse(slot));
        }
        Ok(())
    }

    #[allow(clippy::cast_possible_truncation)]
    fn sector(slot: SwapSlot, index: usize) -> BlockSector {
        (slot.0 * SECTORS_PER_PAGE + index) as BlockSector
    }
}
