// SPDX-FileCopyrightText: 2025 The piecewise Contributors
// SPDX-License-Identifier: GPL-3.0-or-later

use bitvec::prelude::*;
use std::ops::Range;

/// A fixed-length packed boolean array, one bit per block.
///
/// Bits are stored most-significant-bit first within each byte, which is the
/// BitTorrent BITFIELD wire order, so a peer's bitfield payload can be wrapped
/// with [`BitVector::from_bytes`] without reshuffling.
///
/// Out-of-range access never panics: reads return `false` and writes are
/// ignored (and report `false`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BitVector {
    bits: BitVec<u8, Msb0>,
}

impl BitVector {
    /// All bits clear.
    pub fn new(len: usize) -> Self {
        Self::with_value(len, false)
    }

    /// Every bit set to `value`. Spare bits in the final byte stay clear.
    pub fn with_value(len: usize, value: bool) -> Self {
        let mut bits = BitVec::repeat(value, len);
        bits.set_uninitialized(false);
        Self { bits }
    }

    /// Wraps packed bytes holding `len` bits.
    ///
    /// Returns `None` unless `bytes` is exactly `ceil(len / 8)` long. Spare
    /// bits past `len` in the final byte are cleared.
    pub fn from_bytes(bytes: &[u8], len: usize) -> Option<Self> {
        if bytes.len() != len.div_ceil(8) {
            return None;
        }
        let mut bits = BitVec::<u8, Msb0>::from_slice(bytes);
        bits.truncate(len);
        bits.set_uninitialized(false);
        Some(Self { bits })
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    pub fn get(&self, index: usize) -> bool {
        self.bits.get(index).map(|bit| *bit).unwrap_or(false)
    }

    /// Sets the bit. Returns `false` if `index` is out of range.
    pub fn set(&mut self, index: usize) -> bool {
        self.write(index, true)
    }

    /// Clears the bit. Returns `false` if `index` is out of range.
    pub fn clear(&mut self, index: usize) -> bool {
        self.write(index, false)
    }

    fn write(&mut self, index: usize, value: bool) -> bool {
        if index >= self.bits.len() {
            return false;
        }
        self.bits.set(index, value);
        true
    }

    pub fn fill_range(&mut self, range: Range<usize>, value: bool) {
        let range = self.clamp(range);
        self.bits[range].fill(value);
    }

    pub fn fill(&mut self, value: bool) {
        self.bits.fill(value);
    }

    pub fn count_set(&self, range: Range<usize>) -> usize {
        let range = self.clamp(range);
        self.bits[range].count_ones()
    }

    pub fn count_ones(&self) -> usize {
        self.bits.count_ones()
    }

    pub fn all(&self) -> bool {
        self.bits.all()
    }

    /// Linear scan for the first index in `range` accepted by `pred`.
    pub fn first_where<F>(&self, range: Range<usize>, mut pred: F) -> Option<usize>
    where
        F: FnMut(usize) -> bool,
    {
        self.clamp(range).find(|&index| pred(index))
    }

    pub fn first_set(&self, range: Range<usize>) -> Option<usize> {
        let range = self.clamp(range);
        let start = range.start;
        self.bits[range].first_one().map(|offset| start + offset)
    }

    pub fn first_clear(&self, range: Range<usize>) -> Option<usize> {
        let range = self.clamp(range);
        let start = range.start;
        self.bits[range].first_zero().map(|offset| start + offset)
    }

    pub fn iter_ones(&self) -> impl Iterator<Item = usize> + '_ {
        self.bits.iter_ones()
    }

    /// Packed bytes, ready to be sent as a BITFIELD payload or persisted.
    pub fn as_bytes(&self) -> &[u8] {
        self.bits.as_raw_slice()
    }

    fn clamp(&self, range: Range<usize>) -> Range<usize> {
        let end = range.end.min(self.bits.len());
        let start = range.start.min(end);
        start..end
    }
}
