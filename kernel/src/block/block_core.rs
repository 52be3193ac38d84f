use super::BlockError;
use alloc::{string::String, sync::Arc};
use core::fmt;
use core::sync::atomic::{AtomicU32, Ordering};
use kidneyos_shared::sizes::SECTOR_SIZE;

/// Size of a block device sector in bytes.
///
/// All IDE disks use this sector size, as do most USB and SCSI disks.
pub const BLOCK_SECTOR_SIZE: usize = SECTOR_SIZE as usize;

/// Index of a block device sector.
///
/// Good enough for devices up to 2 TB.
pub type BlockSector = u32;

/// Types of blocks
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum BlockType {
    /// File system
    FileSystem,
    /// Scratch
    Scratch,
    /// Swap
    Swap,
    /// "Raw" device with unidentified contents
    Raw,
    /// Owned by another operating system
    Foreign,
}

impl fmt::Display for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BlockType::FileSystem => write!(f, "File System"),
            BlockType::Scratch => write!(f, "Scratch"),
            BlockType::Swap => write!(f, "Swap"),
            BlockType::Raw => write!(f, "Raw"),
            BlockType::Foreign => write!(f, "Foreign"),
        }
    }
}

/// Lower-level interface to block device drivers
pub trait BlockOp: Send + Sync {
    /// Read a block sector
    fn read(&self, sector: BlockSector, buf: &mut [u8]) -> Result<(), BlockError>;
    /// Write a block sector
    fn write(&self, sector: BlockSector, buf: &[u8]) -> Result<(), BlockError>;
    /// Size of the device in sectors
    fn size(&self) -> BlockSector;
}

/// A block device
///
/// **Note:** Once blocks are made their geometry is immutable; only the I/O
/// counters change.
pub struct Block {
    /// The name of the block device
    block_name: String,
    /// The type of block
    block_type: BlockType,
    /// The block driver
    driver: Arc<dyn BlockOp>,
    /// The size of the block device in sectors
    block_size: BlockSector,
    /// The read count
    read_count: AtomicU32,
    /// The write count
    write_count: AtomicU32,
}

impl Block {
    pub fn new(block_name: &str, block_type: BlockType, driver: Arc<dyn BlockOp>) -> Self {
        let block_size = driver.size();
        log::info!(
            "registered block device \"{}\" ({} type) with {} sectors",
            block_name,
            block_type,
            block_size
        );
        Self {
            block_name: String::from(block_name),
            block_type,
            driver,
            block_size,
            read_count: AtomicU32::new(0),
            write_count: AtomicU32::new(0),
        }
    }

    /// Verifies that `buf` is a valid buffer for reading or writing a block sector.
    fn verify_buffer(buf: &[u8]) -> Result<(), BlockError> {
        if buf.len() != BLOCK_SECTOR_SIZE {
            return Err(BlockError::BufferInvalid { len: buf.len() });
        }
        Ok(())
    }

    /// Verifies that `sector` is a valid offset within the block device.
    fn check_sector(&self, sector: BlockSector) -> Result<(), BlockError> {
        if sector >= self.block_size {
            log::error!(
                "{}: invalid sector {} (block size: {})",
                self.block_name,
                sector,
                self.block_size
            );
            return Err(BlockError::SectorOutOfBounds {
                sector,
                size: self.block_size,
            });
        }
        Ok(())
    }

    /// Reads sector `sector` from the block device into `buf`, which must have room for
    /// `BLOCK_SECTOR_SIZE` bytes.
    pub fn read(&self, sector: BlockSector, buf: &mut [u8]) -> Result<(), BlockError> {
        self.check_sector(sector)?;
        Self::verify_buffer(buf)?;

        self.driver.read(sector, buf)?;
        self.read_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Writes sector `sector` from `buf`, which must contain `BLOCK_SECTOR_SIZE` bytes. Returns
    /// after the block device has acknowledged receiving the data.
    pub fn write(&self, sector: BlockSector, buf: &[u8]) -> Result<(), BlockError> {
        self.check_sector(sector)?;
        Self::verify_buffer(buf)?;

        if self.block_type == BlockType::Foreign {
            return Err(BlockError::ReadOnly);
        }

        self.driver.write(sector, buf)?;
        self.write_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    // Block getters -----------------------------------------------------------

    pub fn get_type(&self) -> BlockType {
        self.block_type
    }
    pub fn get_size(&self) -> BlockSector {
        self.block_size
    }
    pub fn get_name(&self) -> &str {
        &self.block_name
    }
    pub fn read_count(&self) -> u32 {
        self.read_count.load(Ordering::Relaxed)
    }
    pub fn write_count(&self) -> u32 {
        self.write_count.load(Ordering::Relaxed)
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "\"{}\" ({}): {:04} sectors, {:04} read, {:04} write",
            self.block_name,
            self.block_type,
            self.block_size,
            self.read_count(),
            self.write_count()
        )
    }
}

#[cfg(test)]
pub mod test {
    use super::{BlockOp, BlockSector, BLOCK_SECTOR_SIZE};
    use crate::block::BlockError;
    use std::sync::Mutex;

    /// A block device held entirely in memory.
    pub struct RamDisk {
        sectors: Mutex<Vec<[u8; BLOCK_SECTOR_SIZE]>>,
    }

    impl RamDisk {
        pub fn new(sectors: BlockSector) -> Self {
            Self {
                sectors: Mutex::new(vec![[0; BLOCK_SECTOR_SIZE]; sectors as usize]),
            }
        }

        pub fn sector(&self, sector: BlockSector) -> [u8; BLOCK_SECTOR_SIZE] {
            self.sectors.lock().unwrap()[sector as usize]
        }
    }

    impl BlockOp for RamDisk {
        fn read(&self, sector: BlockSector, buf: &mut [u8]) -> Result<(), BlockError> {
            let sectors = self.sectors.lock().unwrap();
            let data = sectors.get(sector as usize).ok_or(BlockError::ReadError(sector))?;
            buf.copy_from_slice(data);
            Ok(())
        }

        fn write(&self, sector: BlockSector, buf: &[u8]) -> Result<(), BlockError> {
            let mut sectors = self.sectors.lock().unwrap();
            let data = sectors
                .get_mut(sector as usize)
                .ok_or(BlockError::WriteError(sector))?;
            data.copy_from_slice(buf);
            Ok(())
        }

        fn size(&self) -> BlockSector {
            self.sectors.lock().unwrap().len() as BlockSector
        }
    }
}
