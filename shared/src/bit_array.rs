//! A fixed-length array of bits packed into 64-bit words.

use alloc::{boxed::Box, vec};

const WORD_BITS: usize = u64::BITS as usize;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BitArray {
    words: Box<[u64]>,
    len: usize,
}

impl BitArray {
    /// Creates an array of `len` bits, all set to `value`.
    pub fn new(len: usize, value: bool) -> Self {
        let mut bits = Self {
            words: vec![0; len.div_ceil(WORD_BITS)].into_boxed_slice(),
            len,
        };
        bits.set_all(value);
        bits
    }

    pub const fn len(&self) -> usize {
        self.len
    }

    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn get(&self, idx: usize) -> bool {
        self.check_index(idx);
        (self.words[idx / WORD_BITS] >> (idx % WORD_BITS) & 1) != 0
    }

    pub fn set(&mut self, idx: usize, value: bool) {
        self.check_index(idx);
        let mask = 1 << (idx % WORD_BITS);
        let word = &mut self.words[idx / WORD_BITS];
        if value {
            *word |= mask;
        } else {
            *word &= !mask;
        }
    }

    pub fn flip(&mut self, idx: usize) {
        self.check_index(idx);
        self.words[idx / WORD_BITS] ^= 1 << (idx % WORD_BITS);
    }

    pub fn set_all(&mut self, value: bool) {
        let fill = if value { u64::MAX } else { 0 };
        self.words.fill(fill);
        self.clear_tail();
    }

    /// Number of bits equal to `value`.
    pub fn count(&self, value: bool) -> usize {
        let ones: usize = self.words.iter().map(|w| w.count_ones() as usize).sum();
        if value {
            ones
        } else {
            self.len - ones
        }
    }

    /// Finds the lowest index whose bit equals `value` and flips it.
    pub fn scan_and_flip(&mut self, value: bool) -> Option<usize> {
        let idx = self.scan(value)?;
        self.flip(idx);
        Some(idx)
    }

    /// Finds the lowest index whose bit equals `value`.
    pub fn scan(&self, value: bool) -> Option<usize> {
        self.words
            .iter()
            .enumerate()
            .find_map(|(i, &word)| {
                let candidates = if value { word } else { !word };
                (candidates != 0).then(|| i * WORD_BITS + candidates.trailing_zeros() as usize)
            })
            .filter(|&idx| idx < self.len)
    }

    fn check_index(&self, idx: usize) {
        assert!(idx < self.len, "bit index {} out of range (len {})", idx, self.len);
    }

    // Bits past `len` in the last word are kept clear so counting and scanning
    // never see them.
    fn clear_tail(&mut self) {
        let used = self.len % WORD_BITS;
        if used != 0 {
            if let Some(last) = self.words.last_mut() {
                *last &= (1 << used) - 1;
            }
        }
    }
}
