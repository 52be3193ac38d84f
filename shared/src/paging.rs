// https://wiki.osdev.org/Paging

// Frame numbers handed to these entries come from a pool far smaller than
// 2^20 frames.
#![allow(clippy::cast_possible_truncation)]

use arbitrary_int::u20;
use bitbybit::bitfield;

/// A 32-bit x86 page table entry.
#[bitfield(u32, default = 0)]
pub struct PageTableEntry {
    #[bit(0, rw)]
    present: bool,
    #[bit(1, rw)]
    read_write: bool,
    #[bit(2, rw)]
    user_supervisor: bool,
    #[bit(5, rw)]
    accessed: bool,
    #[bit(6, rw)]
    dirty: bool,
    #[bits(12..=31, rw)]
    page_frame_address: u20,
}

impl PageTableEntry {
    /// A present user mapping of `frame` with clear accessed and dirty bits.
    pub fn user_mapping(frame: usize, writable: bool) -> Self {
        Self::DEFAULT
            .with_present(true)
            .with_user_supervisor(true)
            .with_read_write(writable)
            .with_page_frame_address(u20::new(frame as u32))
    }

    pub fn frame(&self) -> usize {
        self.page_frame_address().value() as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_mapping_bits() {
        let entry = PageTableEntry::user_mapping(0x1234, false);
        assert!(entry.present());
        assert!(entry.user_supervisor());
        assert!(!entry.read_write());
        assert!(!entry.accessed());
        assert!(!entry.dirty());
        assert_eq!(entry.frame(), 0x1234);
        assert_eq!(entry.raw_value() >> 12, 0x1234);

        let touched = entry.with_accessed(true).with_dirty(true);
        assert_eq!(touched.raw_value() & 0b110_0000, 0b110_0000);
        assert_eq!(touched.frame(), 0x1234);
    }
}
