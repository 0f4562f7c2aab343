// SPDX-FileCopyrightText: 2025 The piecewise Contributors
// SPDX-License-Identifier: GPL-3.0-or-later

use crate::block_tracker::geometry::BlockGeometry;
use std::ops::RangeInclusive;

/// Inclusive block-index range covering every block that intersects a byte
/// sub-range of the file.
///
/// Boundary blocks that are only partly inside the byte range are selected
/// whole, so a 2 byte request straddling two blocks selects both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeFilter {
    lo: usize,
    hi: usize,
}

impl RangeFilter {
    /// Returns `None` if the byte range is empty or starts past the end of
    /// the file.
    pub fn from_byte_range(offset: u64, length: u64, geometry: &BlockGeometry) -> Option<Self> {
        let block_count = geometry.block_count();
        if length == 0 || block_count == 0 || offset >= geometry.total_length() {
            return None;
        }
        let block_length = geometry.block_length();
        let lo = (offset / block_length) as usize;
        let last_byte = offset.saturating_add(length - 1);
        let hi = ((last_byte / block_length) as usize).min(block_count - 1);
        Some(Self { lo, hi })
    }

    pub fn lo(&self) -> usize {
        self.lo
    }

    pub fn hi(&self) -> usize {
        self.hi
    }

    pub fn len(&self) -> usize {
        self.hi - self.lo + 1
    }

    pub fn contains(&self, index: usize) -> bool {
        (self.lo..=self.hi).contains(&index)
    }

    pub fn indices(&self) -> RangeInclusive<usize> {
        self.lo..=self.hi
    }

    /// Bytes of the selected blocks, with the short last block counted at
    /// its real length.
    pub fn covered_length(&self, geometry: &BlockGeometry) -> u64 {
        geometry.span_length(self.indices())
    }
}

/// The requested byte span itself, clamped so it does not run past the end
/// of the file.
pub fn clamp_span(offset: u64, length: u64, total_length: u64) -> u64 {
    length.min(total_length.saturating_sub(offset))
}
