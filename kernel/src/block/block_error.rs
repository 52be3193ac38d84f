use super::BlockSector;
use core::error::Error;
use core::fmt;

/// Failure of a single-sector transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockError {
    /// `sector` lies past the end of a device of `size` sectors.
    SectorOutOfBounds { sector: BlockSector, size: BlockSector },
    /// The caller's buffer is `len` bytes instead of exactly one sector.
    BufferInvalid { len: usize },
    /// The device is owned by another operating system and may not be written.
    ReadOnly,
    /// The driver failed to read `sector`.
    ReadError(BlockSector),
    /// The driver failed to write `sector`.
    WriteError(BlockSector),
}

impl fmt::Display for BlockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            BlockError::SectorOutOfBounds { sector, size } => {
                write!(f, "sector {sector} out of bounds (device has {size})")
            }
            BlockError::BufferInvalid { len } => {
                write!(f, "buffer of {len} bytes is not one sector")
            }
            BlockError::ReadOnly => f.write_str("device is read-only"),
            BlockError::ReadError(sector) => write!(f, "error reading sector {sector}"),
            BlockError::WriteError(sector) => write!(f, "error writing sector {sector}"),
        }
    }
}

impl Error for BlockError {}
