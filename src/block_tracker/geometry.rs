// SPDX-FileCopyrightText: 2025 The piecewise Contributors
// SPDX-License-Identifier: GPL-3.0-or-later

use std::ops::RangeInclusive;

/// Number of blocks needed to cover `total_length` bytes.
pub fn block_count(block_length: u64, total_length: u64) -> usize {
    if block_length == 0 || total_length == 0 {
        return 0;
    }
    total_length.div_ceil(block_length) as usize
}

/// Byte length of the block at `index`. Only the last block can be short;
/// anything past it is 0.
pub fn block_length_at(index: usize, block_length: u64, total_length: u64) -> u64 {
    let count = block_count(block_length, total_length);
    if index >= count {
        0
    } else if index == count - 1 {
        total_length - block_length * (count as u64 - 1)
    } else {
        block_length
    }
}

/// Fixed block layout of one logical file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockGeometry {
    block_length: u64,
    total_length: u64,
    block_count: usize,
}

impl BlockGeometry {
    pub fn new(block_length: u64, total_length: u64) -> Self {
        Self {
            block_length,
            total_length,
            block_count: block_count(block_length, total_length),
        }
    }

    pub fn block_length(&self) -> u64 {
        self.block_length
    }

    pub fn total_length(&self) -> u64 {
        self.total_length
    }

    pub fn block_count(&self) -> usize {
        self.block_count
    }

    pub fn length_at(&self, index: usize) -> u64 {
        block_length_at(index, self.block_length, self.total_length)
    }

    pub fn last_block_length(&self) -> u64 {
        match self.block_count {
            0 => 0,
            count => self.length_at(count - 1),
        }
    }

    /// Global byte offset where block `index` starts.
    pub fn offset_of(&self, index: usize) -> Option<u64> {
        (index < self.block_count).then(|| index as u64 * self.block_length)
    }

    /// Block that contains the byte at `offset`.
    pub fn index_of(&self, offset: u64) -> Option<usize> {
        if offset >= self.total_length || self.block_length == 0 {
            return None;
        }
        Some((offset / self.block_length) as usize)
    }

    /// Sum of block lengths over an inclusive index range, ignoring indices
    /// past the last block.
    pub fn span_length(&self, range: RangeInclusive<usize>) -> u64 {
        let (lo, hi) = range.into_inner();
        if self.block_count == 0 || lo > hi || lo >= self.block_count {
            return 0;
        }
        let hi = hi.min(self.block_count - 1);
        if hi == self.block_count - 1 {
            (hi - lo) as u64 * self.block_length + self.last_block_length()
        } else {
            (hi - lo + 1) as u64 * self.block_length
        }
    }
}
