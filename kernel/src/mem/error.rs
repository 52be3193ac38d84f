use crate::block::BlockError;
use crate::mem::frame_allocator::FrameId;
use crate::mem::swapping::SwapSlot;
use crate::paging::PageId;
use core::error::Error;
use core::fmt::{Debug, Display, Formatter};

pub type Result<T> = core::result::Result<T, VmError>;

/// Error type for virtual memory operations
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum VmError {
    /// The address is outside every region the process may touch
    InvalidAccess { addr: usize },
    /// The page exists but the access is not allowed
    ProtectionViolation { addr: usize },
    /// No free frame and nothing could be evicted
    OutOfFrames,
    /// Every swap slot is in use
    SwapExhausted,
    /// The swap slot was already free
    SwapSlotNotInUse(SwapSlot),
    /// The frame has no frame table entry
    FrameNotAllocated(FrameId),
    /// The page already has a supplemental page table entry
    PageAlreadyMapped(PageId),
    /// A memory map request with a bad file or address
    InvalidMapping,
    /// The file system refused to open or reopen a file
    FileUnavailable,
    /// A segment whose size is not a whole number of pages
    MisalignedSegment,
    /// The hardware page tables rejected a mapping
    InstallFailed(PageId),
    /// Error from the swap device
    Block(BlockError),
}

impl VmError {
    /// The status a process is killed with when this error is fatal to it.
    pub const fn exit_status(&self) -> i32 {
        -1
    }
}

impl From<BlockError> for VmError {
    fn from(error: BlockError) -> Self {
        VmError::Block(error)
    }
}

impl Debug for VmError {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            VmError::InvalidAccess { addr } => write!(f, "InvalidAccess({:#x})", addr),
            VmError::ProtectionViolation { addr } => write!(f, "ProtectionViolation({:#x})", addr),
            VmError::OutOfFrames => write!(f, "OutOfFrames"),
            VmError::SwapExhausted => write!(f, "SwapExhausted"),
            VmError::SwapSlotNotInUse(slot) => write!(f, "SwapSlotNotInUse({})", slot.0),
            VmError::FrameNotAllocated(frame) => write!(f, "FrameNotAllocated({})", frame.0),
            VmError::PageAlreadyMapped(page) => write!(f, "PageAlreadyMapped({:#x})", page.base()),
            VmError::InvalidMapping => write!(f, "InvalidMapping"),
            VmError::FileUnavailable => write!(f, "FileUnavailable"),
            VmError::MisalignedSegment => write!(f, "MisalignedSegment"),
            VmError::InstallFailed(page) => write!(f, "InstallFailed({:#x})", page.base()),
            VmError::Block(error) => write!(f, "Block({:?})", error),
        }
    }
}

impl Display for VmError {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            VmError::InvalidAccess { addr } => write!(f, "invalid access at {:#x}", addr),
            VmError::ProtectionViolation { addr } => {
                write!(f, "protection violation at {:#x}", addr)
            }
            VmError::OutOfFrames => write!(f, "out of physical frames"),
            VmError::SwapExhausted => write!(f, "swap space exhausted"),
            VmError::SwapSlotNotInUse(slot) => write!(f, "swap slot {} is not in use", slot.0),
            VmError::FrameNotAllocated(frame) => write!(f, "{} is not allocated", frame),
            VmError::PageAlreadyMapped(page) => write!(f, "{} is already mapped", page),
            VmError::InvalidMapping => write!(f, "invalid memory mapping"),
            VmError::FileUnavailable => write!(f, "file unavailable"),
            VmError::MisalignedSegment => write!(f, "segment is not page aligned"),
            VmError::InstallFailed(page) => write!(f, "could not install {}", page),
            VmError::Block(error) => write!(f, "swap device: {}", error),
        }
    }
}

impl Error for VmError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            VmError::Block(error) => Some(error),
            _ => None,
        }
    }
}
