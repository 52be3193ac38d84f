use crate::sizes::{KB, MB};

// Page size is 4KB. This is a property of x86 processors.
pub const PAGE_FRAME_SIZE: usize = 4 * KB;

// Any virtual address at or above OFFSET is a kernel address.
pub const OFFSET: usize = 0x80000000;

// User stacks grow down from OFFSET and may not exceed this size.
pub const MAX_STACK_SIZE: usize = 8 * MB;

// PUSHA writes 32 bytes below the stack pointer before moving it, so a fault
// that far below %esp is still a legitimate stack access.
pub const STACK_SLOP: usize = 32;

#[inline]
pub const fn page_round_down(addr: usize) -> usize {
    addr & !(PAGE_FRAME_SIZE - 1)
}

#[inline]
pub const fn is_page_aligned(addr: usize) -> bool {
    addr % PAGE_FRAME_SIZE == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounding() {
        assert_eq!(page_round_down(0), 0);
        assert_eq!(page_round_down(PAGE_FRAME_SIZE - 1), 0);
        assert_eq!(page_round_down(PAGE_FRAME_SIZE + 7), PAGE_FRAME_SIZE);
        assert!(is_page_aligned(OFFSET));
        assert!(!is_page_aligned(OFFSET - 1));
    }
}
