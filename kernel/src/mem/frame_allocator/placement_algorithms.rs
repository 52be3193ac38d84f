//! Frame placement policies for the core map.

use super::CoreMapEntry;

/// Chooses which free frame the pool hands out next.
pub trait PlacementAlgorithm: Default {
    /// Returns the index of a free frame, or [`None`] if every frame is
    /// allocated.
    fn place(&mut self, core_map: &[CoreMapEntry]) -> Option<usize>;
}

/// Resumes each search one past the previous placement, so freshly freed
/// frames are not reused immediately.
#[derive(Default)]
pub struct NextFit {
    position: usize,
}

impl PlacementAlgorithm for NextFit {
    fn place(&mut self, core_map: &[CoreMapEntry]) -> Option<usize> {
        let len = core_map.len();
        let start = self.position.min(len);
        let (before, after) = core_map.split_at(start);

        let index = after
            .iter()
            .position(|entry| !entry.allocated())
            .map(|i| start + i)
            .or_else(|| before.iter().position(|entry| !entry.allocated()))?;

        self.position = (index + 1) % len;
        Some(index)
    }
}
