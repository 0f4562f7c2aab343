// SPDX-FileCopyrightText: 2025 The piecewise Contributors
// SPDX-License-Identifier: GPL-3.0-or-later

use crate::block_tracker::bit_vector::BitVector;
use crate::block_tracker::geometry::BlockGeometry;
use crate::block_tracker::range_filter::{clamp_span, RangeFilter};
use crate::block_tracker::selection::{SelectionStrategy, UniformRandom};
use crate::errors::TrackerError;

use tracing::{event, Level};

/// Completion and claim state of every block of one download.
///
/// Each block is `Free`, `Claimed` (an in-flight fetch owns it) or
/// `Completed`. A block is claimed at most once at a time and completion
/// is terminal. When a filter is enabled, aggregate queries and selection only
/// look at the filtered blocks.
///
/// The tracker is not synchronized. Drive it from one control loop, or wrap
/// it in a [`SharedTracker`](crate::block_tracker::SharedTracker) so that
/// selection and claim happen under one lock.
#[derive(Debug)]
pub struct BlockStateTracker {
    geometry: BlockGeometry,
    completed: BitVector,
    claimed: BitVector,
    filter: Option<BitVector>,
    filter_enabled: bool,
    strategy: Box<dyn SelectionStrategy>,
}

impl BlockStateTracker {
    pub fn new(block_length: u64, total_length: u64) -> Self {
        let geometry = BlockGeometry::new(block_length, total_length);
        let blocks = geometry.block_count();
        Self {
            geometry,
            completed: BitVector::new(blocks),
            claimed: BitVector::new(blocks),
            filter: None,
            filter_enabled: false,
            strategy: Box::new(UniformRandom),
        }
    }

    pub fn with_strategy(mut self, strategy: Box<dyn SelectionStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn set_strategy(&mut self, strategy: Box<dyn SelectionStrategy>) {
        self.strategy = strategy;
    }

    // --- GEOMETRY ---

    pub fn geometry(&self) -> &BlockGeometry {
        &self.geometry
    }

    pub fn block_length(&self) -> u64 {
        self.geometry.block_length()
    }

    pub fn total_length(&self) -> u64 {
        self.geometry.total_length()
    }

    /// Number of blocks in the whole file. Not affected by the filter.
    pub fn count_block(&self) -> usize {
        self.geometry.block_count()
    }

    pub fn block_length_at(&self, index: usize) -> u64 {
        self.geometry.length_at(index)
    }

    pub fn last_block_length(&self) -> u64 {
        self.geometry.last_block_length()
    }

    // --- PER-BLOCK STATE ---

    pub fn is_complete(&self, index: usize) -> bool {
        self.completed.get(index)
    }

    pub fn is_claimed(&self, index: usize) -> bool {
        self.claimed.get(index)
    }

    pub fn count_claimed(&self) -> usize {
        self.claimed.count_ones()
    }

    /// Marks a block as owned by an in-flight fetch.
    ///
    /// Fails if the index is out of range, the block is already completed, or
    /// it is already claimed.
    pub fn claim(&mut self, index: usize) -> bool {
        if index >= self.count_block() || self.completed.get(index) || self.claimed.get(index) {
            event!(Level::TRACE, block = index, "Claim rejected");
            return false;
        }
        self.claimed.set(index);
        event!(Level::TRACE, block = index, "Block claimed");
        true
    }

    /// Returns a claimed block to the free pool, e.g. after its connection
    /// died. Fails if the block is not currently claimed.
    pub fn release(&mut self, index: usize) -> bool {
        if !self.claimed.get(index) {
            return false;
        }
        self.claimed.clear(index);
        event!(Level::TRACE, block = index, "Block released");
        true
    }

    /// Marks a block as fully received. Works whether or not the block was
    /// claimed, and repeating it is harmless.
    pub fn mark_complete(&mut self, index: usize) -> bool {
        if !self.completed.set(index) {
            return false;
        }
        self.claimed.clear(index);
        true
    }

    /// Marks every block of the inclusive range complete. Indices past the
    /// last block are ignored.
    pub fn mark_range_complete(&mut self, lo: usize, hi: usize) {
        for index in lo..=hi.min(self.count_block().saturating_sub(1)) {
            self.mark_complete(index);
        }
    }

    pub fn mark_all_complete(&mut self) {
        self.completed.fill(true);
        self.claimed.fill(false);
    }

    /// Drops every claim, e.g. when all connections of a download are reset.
    pub fn clear_all_claims(&mut self) {
        self.claimed.fill(false);
    }

    // --- COMPLETION QUERIES ---

    /// Whether every block of the active range is completed. The active range
    /// is the filter when it is enabled, the whole file otherwise.
    pub fn is_all_complete(&self) -> bool {
        match self.active_filter() {
            Some(filter) => filter.iter_ones().all(|index| self.completed.get(index)),
            None => self.completed.all(),
        }
    }

    /// Whether every block of the file is completed, regardless of the filter.
    pub fn is_whole_file_complete(&self) -> bool {
        self.completed.all()
    }

    /// `false` if `hi` is past the last block or the range is inverted.
    pub fn is_range_complete(&self, lo: usize, hi: usize) -> bool {
        lo <= hi && (lo..=hi).all(|index| self.completed.get(index))
    }

    /// Whether every block touching `[offset, offset + length)` is completed.
    /// Empty ranges and ranges starting past the end are never complete.
    pub fn is_byte_range_complete(&self, offset: u64, length: u64) -> bool {
        match RangeFilter::from_byte_range(offset, length, &self.geometry) {
            Some(range) => self.is_range_complete(range.lo(), range.hi()),
            None => false,
        }
    }

    pub fn count_missing_block(&self) -> usize {
        match self.active_filter() {
            Some(filter) => filter
                .iter_ones()
                .filter(|&index| !self.completed.get(index))
                .count(),
            None => self.count_block() - self.completed.count_ones(),
        }
    }

    /// Number of filtered blocks, or 0 while no filter is enabled.
    pub fn count_filtered_block(&self) -> usize {
        self.active_filter().map_or(0, BitVector::count_ones)
    }

    pub fn completed_length(&self) -> u64 {
        self.length_of(self.completed.iter_ones())
    }

    pub fn filtered_completed_length(&self) -> u64 {
        match self.active_filter() {
            Some(filter) => {
                self.length_of(filter.iter_ones().filter(|&index| self.completed.get(index)))
            }
            None => self.completed_length(),
        }
    }

    /// Bytes covered by the enabled filter, or 0 while no filter is enabled.
    pub fn filtered_total_length(&self) -> u64 {
        self.active_filter()
            .map_or(0, |filter| self.length_of(filter.iter_ones()))
    }

    /// Completed bytes inside `[offset, offset + length)`. Blocks only partly
    /// inside the range count their overlapping bytes.
    pub fn offset_completed_length(&self, offset: u64, length: u64) -> u64 {
        let Some(range) = RangeFilter::from_byte_range(offset, length, &self.geometry) else {
            return 0;
        };
        let end = offset + clamp_span(offset, length, self.total_length());
        range
            .indices()
            .filter(|&index| self.completed.get(index))
            .map(|index| {
                let block_start = index as u64 * self.block_length();
                let block_end = block_start + self.block_length_at(index);
                block_end.min(end) - block_start.max(offset)
            })
            .sum()
    }

    /// Bytes of the run of free blocks starting at `start`.
    pub fn missing_unused_length(&self, start: usize) -> u64 {
        let run = (start..self.count_block())
            .take_while(|&index| !self.completed.get(index) && !self.claimed.get(index));
        self.length_of(run)
    }

    // --- SELECTION ---

    /// Lowest index in the active range that is neither completed nor claimed
    /// and that the peer can serve. `peer` of `None` means the peer has every
    /// block.
    pub fn first_missing_unused_index(&self, peer: Option<&BitVector>) -> Option<usize> {
        if !self.peer_fits(peer) {
            return None;
        }
        self.completed
            .first_where(0..self.count_block(), |index| self.is_eligible(index, peer, true))
    }

    /// Same as [`first_missing_unused_index`](Self::first_missing_unused_index)
    /// but claimed blocks are eligible too.
    pub fn first_missing_index(&self, peer: Option<&BitVector>) -> Option<usize> {
        if !self.peer_fits(peer) {
            return None;
        }
        self.completed
            .first_where(0..self.count_block(), |index| self.is_eligible(index, peer, false))
    }

    /// Up to `n` free blocks of the active range in ascending order.
    pub fn first_n_missing_unused_indexes(&self, n: usize) -> Vec<usize> {
        (0..self.count_block())
            .filter(|&index| self.is_eligible(index, None, true))
            .take(n)
            .collect()
    }

    /// A free block of the active range chosen by the selection strategy.
    pub fn missing_unused_index(&mut self, peer: Option<&BitVector>) -> Option<usize> {
        let eligible = self.all_missing_unused_indexes(peer);
        self.pick(&eligible)
    }

    /// A missing block of the active range chosen by the selection strategy,
    /// claimed or not. Used for endgame duplicate requests.
    pub fn missing_index(&mut self, peer: Option<&BitVector>) -> Option<usize> {
        let eligible = self.all_missing_indexes(peer);
        self.pick(&eligible)
    }

    /// Selects a free block and claims it in one step.
    pub fn select_next(&mut self, peer: Option<&BitVector>) -> Option<usize> {
        let index = self.missing_unused_index(peer)?;
        if !self.claim(index) {
            return None;
        }
        event!(Level::DEBUG, block = index, "Selected block");
        Some(index)
    }

    pub fn all_missing_indexes(&self, peer: Option<&BitVector>) -> Vec<usize> {
        self.eligible_indexes(peer, false)
    }

    pub fn all_missing_unused_indexes(&self, peer: Option<&BitVector>) -> Vec<usize> {
        self.eligible_indexes(peer, true)
    }

    /// Whether the peer can serve at least one block we are missing.
    pub fn has_missing_block(&self, peer: &BitVector) -> bool {
        self.peer_fits(Some(peer))
            && peer
                .iter_ones()
                .any(|index| self.is_eligible(index, Some(peer), false))
    }

    /// Picks a block for a new segmented connection so that connections
    /// spread over the file.
    ///
    /// Blocks that are completed, claimed, filtered out or set in `ignore`
    /// are unavailable. Each run of available blocks offers one candidate: its
    /// midpoint if the run directly follows a claimed block (the in-flight
    /// segment keeps the first half), its first block otherwise. The
    /// candidate with the most blocks left up to the end of its run wins. On
    /// ties the first one wins, unless a later run follows a finished block
    /// while the current best does not.
    ///
    /// A winning run that neither starts the file nor follows a finished
    /// block must leave at least `min_split_size` bytes to the new
    /// connection, or nothing is returned.
    pub fn sparse_missing_unused_index(
        &self,
        min_split_size: u64,
        ignore: Option<&BitVector>,
    ) -> Option<usize> {
        let blocks = self.count_block();
        let unavailable = |index: usize| self.is_skipped(index, ignore) || self.claimed.get(index);

        let mut best: Option<(usize, usize)> = None;
        let mut next = 0;
        while next < blocks {
            let Some(start) = (next..blocks).find(|&index| !unavailable(index)) else {
                break;
            };
            let end = (start..blocks)
                .find(|&index| unavailable(index))
                .unwrap_or(blocks);
            let candidate = if start > 0 && self.claimed.get(start - 1) {
                (start + end) / 2
            } else {
                start
            };
            let replace = match best {
                None => true,
                Some((lo, hi)) if hi - lo == end - candidate => {
                    lo > 0
                        && candidate > 0
                        && !self.follows_finished(lo, ignore)
                        && self.follows_finished(candidate, ignore)
                }
                Some((lo, hi)) => hi - lo < end - candidate,
            };
            if replace {
                best = Some((candidate, end));
            }
            next = end;
        }

        let (start, end) = best?;
        if start == 0
            || self.follows_finished(start, ignore)
            || (end - start) as u64 * self.block_length() >= min_split_size
        {
            Some(start)
        } else {
            None
        }
    }

    /// Lowest block a new segmented connection can start at when the file is
    /// fetched front to back.
    ///
    /// The first block is taken if it is free. Any other free block is taken
    /// if the block before it is finished (completed, ignored or filtered
    /// out). Otherwise the connection has to start far enough behind the
    /// in-flight segment: the returned block is the one at which the free run
    /// reaches `min_split_size` bytes.
    pub fn inorder_missing_unused_index(
        &self,
        min_split_size: u64,
        ignore: Option<&BitVector>,
    ) -> Option<usize> {
        self.inorder_within(0, self.count_block(), min_split_size, ignore)
    }

    /// Streaming-friendly selection. Windows `[base^k - 1, base^(k+1) - 1)`
    /// (shifted by `offset`) are scanned in order and the first free block
    /// of a window is returned, unless a claimed block comes first. When no
    /// window yields a block, falls back to
    /// [`sparse_missing_unused_index`](Self::sparse_missing_unused_index).
    ///
    /// A `base` that is not greater than 1 skips straight to the fallback.
    pub fn geom_missing_unused_index(
        &self,
        min_split_size: u64,
        ignore: Option<&BitVector>,
        base: f64,
        offset: usize,
    ) -> Option<usize> {
        let blocks = self.count_block();
        if base > 1.0 {
            let mut start = 0.0_f64;
            let mut end = 1.0_f64;
            while (start as usize).saturating_add(offset) < blocks {
                let lo = (start as usize).saturating_add(offset);
                let hi = (end as usize).saturating_add(offset).min(blocks);
                for index in lo..hi {
                    if self.claimed.get(index) {
                        break;
                    }
                    if !self.is_skipped(index, ignore) {
                        return Some(index);
                    }
                }
                start = end;
                end *= base;
            }
        }
        self.sparse_missing_unused_index(min_split_size, ignore)
    }

    // --- FILTER ---

    /// Adds the blocks intersecting `[offset, offset + length)` to the stored
    /// filter. The filter takes effect once enabled.
    pub fn add_filter(&mut self, offset: u64, length: u64) {
        let range = RangeFilter::from_byte_range(offset, length, &self.geometry);
        let filter = self.ensure_filter();
        if let Some(range) = range {
            filter.fill_range(range.lo()..range.hi() + 1, true);
        }
        event!(Level::DEBUG, offset, length, ?range, "Filter added");
    }

    /// Removes the blocks intersecting the byte range from the stored filter.
    pub fn remove_filter(&mut self, offset: u64, length: u64) {
        let range = RangeFilter::from_byte_range(offset, length, &self.geometry);
        let filter = self.ensure_filter();
        if let Some(range) = range {
            filter.fill_range(range.lo()..range.hi() + 1, false);
        }
        event!(Level::DEBUG, offset, length, ?range, "Filter removed");
    }

    /// Adds every block outside `[offset, offset + length)` to the filter.
    /// A zero length adds nothing.
    pub fn add_not_filter(&mut self, offset: u64, length: u64) {
        let blocks = self.count_block();
        let block_length = self.block_length();
        let filter = self.ensure_filter();
        if length == 0 || blocks == 0 {
            return;
        }
        let start = (offset / block_length).min(blocks as u64) as usize;
        let end = (offset.saturating_add(length - 1) / block_length).min(blocks as u64) as usize;
        filter.fill_range(0..start, true);
        filter.fill_range(end + 1..blocks, true);
        event!(Level::DEBUG, offset, length, "Exclusion filter added");
    }

    /// Restricts aggregate queries and selection to the stored filter. An
    /// empty filter restricts them to nothing.
    pub fn enable_filter(&mut self) {
        self.ensure_filter();
        self.filter_enabled = true;
        event!(
            Level::DEBUG,
            blocks = self.count_filtered_block(),
            bytes = self.filtered_total_length(),
            "Filter enabled"
        );
    }

    /// Stops applying the filter but keeps it stored.
    pub fn disable_filter(&mut self) {
        self.filter_enabled = false;
    }

    /// Disables and drops the filter.
    pub fn clear_filter(&mut self) {
        self.filter = None;
        self.filter_enabled = false;
    }

    pub fn is_filter_enabled(&self) -> bool {
        self.filter_enabled
    }

    pub fn is_filter_bit_set(&self, index: usize) -> bool {
        self.filter.as_ref().is_some_and(|filter| filter.get(index))
    }

    // --- RESUME ---

    pub fn completed_bitfield(&self) -> &BitVector {
        &self.completed
    }

    /// Replaces the completed set with packed bytes saved by an earlier run.
    /// Claims do not survive a restart, so they are all dropped.
    pub fn restore_completed(&mut self, bytes: &[u8]) -> Result<(), TrackerError> {
        let blocks = self.count_block();
        let completed =
            BitVector::from_bytes(bytes, blocks).ok_or(TrackerError::BitfieldLength {
                blocks,
                expected: blocks.div_ceil(8),
                actual: bytes.len(),
            })?;
        self.completed = completed;
        self.claimed.fill(false);
        event!(
            Level::DEBUG,
            completed = self.completed.count_ones(),
            blocks,
            "Restored completed blocks"
        );
        Ok(())
    }

    // --- HELPERS ---

    fn active_filter(&self) -> Option<&BitVector> {
        if self.filter_enabled {
            self.filter.as_ref()
        } else {
            None
        }
    }

    fn ensure_filter(&mut self) -> &mut BitVector {
        let blocks = self.count_block();
        self.filter.get_or_insert_with(|| BitVector::new(blocks))
    }

    fn in_active_range(&self, index: usize) -> bool {
        self.active_filter().is_none_or(|filter| filter.get(index))
    }

    // Completed, ignored or filtered out. Claims are tracked separately.
    fn is_skipped(&self, index: usize, ignore: Option<&BitVector>) -> bool {
        index >= self.count_block()
            || ignore.is_some_and(|bits| bits.get(index))
            || !self.in_active_range(index)
            || self.completed.get(index)
    }

    fn follows_finished(&self, index: usize, ignore: Option<&BitVector>) -> bool {
        index > 0 && self.is_skipped(index - 1, ignore) && !self.claimed.get(index - 1)
    }

    fn inorder_within(
        &self,
        lo: usize,
        hi: usize,
        min_split_size: u64,
        ignore: Option<&BitVector>,
    ) -> Option<usize> {
        let blocks = self.count_block();
        let free = |index: usize| !self.is_skipped(index, ignore) && !self.claimed.get(index);
        if lo >= blocks {
            return None;
        }
        if free(lo) {
            return Some(lo);
        }

        let mut index = lo + 1;
        while index < hi {
            if !free(index) {
                index += 1;
                continue;
            }
            if self.follows_finished(index, ignore) {
                return Some(index);
            }
            // The free run may extend past `hi`.
            let mut run_end = index;
            while run_end < blocks && free(run_end) {
                if (run_end - index + 1) as u64 * self.block_length() >= min_split_size {
                    return Some(run_end);
                }
                run_end += 1;
            }
            index = run_end + 1;
        }
        None
    }

    fn peer_fits(&self, peer: Option<&BitVector>) -> bool {
        peer.is_none_or(|bits| bits.len() == self.count_block())
    }

    fn is_eligible(&self, index: usize, peer: Option<&BitVector>, skip_claimed: bool) -> bool {
        index < self.count_block()
            && !self.completed.get(index)
            && !(skip_claimed && self.claimed.get(index))
            && peer.is_none_or(|bits| bits.get(index))
            && self.in_active_range(index)
    }

    fn eligible_indexes(&self, peer: Option<&BitVector>, skip_claimed: bool) -> Vec<usize> {
        if !self.peer_fits(peer) {
            return Vec::new();
        }
        (0..self.count_block())
            .filter(|&index| self.is_eligible(index, peer, skip_claimed))
            .collect()
    }

    fn pick(&mut self, eligible: &[usize]) -> Option<usize> {
        self.strategy
            .pick(eligible)
            .filter(|index| eligible.binary_search(index).is_ok())
    }

    fn length_of<I>(&self, indexes: I) -> u64
    where
        I: Iterator<Item = usize>,
    {
        indexes.map(|index| self.geometry.length_at(index)).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_tracker::selection::{FirstEligible, SeededRandom};

    fn tracker(block_length: u64, total_length: u64) -> BlockStateTracker {
        BlockStateTracker::new(block_length, total_length)
    }

    #[test]
    fn test_block_lengths() {
        let bt = tracker(1024, 1024 * 10);
        assert_eq!(bt.count_block(), 10);
        assert_eq!(bt.block_length_at(9), 1024);

        let bt = tracker(1024, 1024 * 10 + 1);
        assert_eq!(bt.count_block(), 11);
        assert_eq!(bt.block_length_at(9), 1024);
        assert_eq!(bt.block_length_at(10), 1);
        assert_eq!(bt.block_length_at(11), 0);
        assert_eq!(bt.last_block_length(), 1);
    }

    #[test]
    fn test_claim_is_exclusive() {
        let mut bt = tracker(1024, 1024 * 10);
        assert!(bt.claim(3));
        assert!(!bt.claim(3));
        assert!(bt.release(3));
        assert!(bt.claim(3));
        assert!(bt.mark_complete(3));
        assert!(!bt.is_claimed(3));
        assert!(!bt.claim(3), "completed blocks cannot be claimed");
    }

    #[test]
    fn test_out_of_range_index() {
        let mut bt = tracker(1024, 1024 * 10);
        assert!(!bt.claim(10));
        assert!(!bt.release(10));
        assert!(!bt.mark_complete(10));
        assert!(!bt.is_complete(10));
        assert!(!bt.is_claimed(usize::MAX));
    }

    #[test]
    fn test_release_unclaimed_is_noop() {
        let mut bt = tracker(1024, 1024 * 10);
        assert!(!bt.release(4));
        assert!(!bt.is_claimed(4));
        assert_eq!(bt.first_missing_unused_index(None), Some(0));
    }

    #[test]
    fn test_mark_complete_twice() {
        let mut bt = tracker(1024, 1024 * 10);
        assert!(bt.mark_complete(2));
        assert!(bt.mark_complete(2));
        assert!(bt.is_complete(2));
        assert_eq!(bt.count_missing_block(), 9);
    }

    #[test]
    fn test_get_first_missing_unused_index() {
        let mut bt = tracker(1024, 1024 * 10);
        assert_eq!(bt.first_missing_unused_index(None), Some(0));
        bt.claim(0);
        assert_eq!(bt.first_missing_unused_index(None), Some(1));
        bt.release(0);
        bt.mark_complete(0);
        assert_eq!(bt.first_missing_unused_index(None), Some(1));
        bt.mark_all_complete();
        assert_eq!(bt.first_missing_unused_index(None), None);

        let mut bt = tracker(1024, 1024 * 10);
        bt.add_filter(1024, 1024 * 10);
        bt.enable_filter();
        assert_eq!(bt.first_missing_unused_index(None), Some(1));
        bt.claim(1);
        assert_eq!(bt.first_missing_unused_index(None), Some(2));
        bt.mark_complete(2);
        assert_eq!(bt.first_missing_unused_index(None), Some(3));
    }

    #[test]
    fn test_get_first_missing_index() {
        let mut bt = tracker(1024, 1024 * 10);
        assert_eq!(bt.first_missing_index(None), Some(0));
        bt.claim(0);
        assert_eq!(bt.first_missing_index(None), Some(0));
        bt.release(0);
        bt.mark_complete(0);
        assert_eq!(bt.first_missing_index(None), Some(1));
        bt.mark_all_complete();
        assert_eq!(bt.first_missing_index(None), None);
    }

    #[test]
    fn test_sequential_allocation_scenario() {
        let mut bt = tracker(1024, 10240);
        bt.mark_range_complete(0, 7);
        assert_eq!(bt.first_missing_unused_index(None), Some(8));
        assert!(bt.claim(8));
        assert_eq!(bt.first_missing_unused_index(None), Some(9));
    }

    #[test]
    fn test_peer_availability() {
        let mut bt = tracker(1024, 1024 * 10);
        let mut peer = BitVector::new(10);
        assert_eq!(bt.first_missing_unused_index(Some(&peer)), None);
        assert_eq!(bt.missing_unused_index(Some(&peer)), None);
        assert!(!bt.has_missing_block(&peer));

        peer.set(6);
        peer.set(7);
        assert_eq!(bt.first_missing_unused_index(Some(&peer)), Some(6));
        assert!(bt.has_missing_block(&peer));
        bt.claim(6);
        assert_eq!(bt.missing_unused_index(Some(&peer)), Some(7));
        bt.mark_complete(7);
        assert_eq!(bt.missing_unused_index(Some(&peer)), None);
        assert_eq!(bt.missing_index(Some(&peer)), Some(6));
    }

    #[test]
    fn test_peer_bitmap_length_mismatch() {
        let mut bt = tracker(1024, 1024 * 10);
        let peer = BitVector::with_value(16, true);
        assert_eq!(bt.first_missing_unused_index(Some(&peer)), None);
        assert_eq!(bt.missing_unused_index(Some(&peer)), None);
        assert!(bt.all_missing_indexes(Some(&peer)).is_empty());
        assert!(!bt.has_missing_block(&peer));
    }

    #[test]
    fn test_random_selection_returns_eligible_blocks() {
        let mut bt = tracker(1024, 1024 * 64).with_strategy(Box::new(SeededRandom::new(9)));
        bt.add_filter(1024 * 8, 1024 * 16);
        bt.enable_filter();
        let mut peer = BitVector::with_value(64, true);
        peer.clear(10);

        let mut picked = Vec::new();
        while let Some(index) = bt.select_next(Some(&peer)) {
            assert!((8..24).contains(&index));
            assert_ne!(index, 10);
            picked.push(index);
        }
        picked.sort_unstable();
        let expected: Vec<usize> = (8..24).filter(|&i| i != 10).collect();
        assert_eq!(picked, expected);
    }

    #[test]
    fn test_select_next_claims() {
        let mut bt = tracker(1024, 1024 * 3).with_strategy(Box::new(FirstEligible));
        assert_eq!(bt.select_next(None), Some(0));
        assert!(bt.is_claimed(0));
        assert_eq!(bt.select_next(None), Some(1));
        assert_eq!(bt.select_next(None), Some(2));
        assert_eq!(bt.select_next(None), None);
        bt.release(1);
        assert_eq!(bt.select_next(None), Some(1));
    }

    #[test]
    fn test_is_all_bit_set() {
        let mut bt = tracker(1024, 1024 * 10);
        assert!(!bt.is_all_complete());
        bt.mark_complete(1);
        assert!(!bt.is_all_complete());
        for i in 0..8 {
            assert!(bt.mark_complete(i));
        }
        assert!(!bt.is_all_complete());
        for i in 0..bt.count_block() {
            assert!(bt.mark_complete(i));
        }
        assert!(bt.is_all_complete());

        let empty = tracker(1024, 0);
        assert!(empty.is_all_complete());
    }

    #[test]
    fn test_filter() {
        let mut bt = tracker(2, 32);
        bt.add_filter(4, 12);
        bt.enable_filter();
        assert_eq!(bt.first_n_missing_unused_indexes(32), vec![2, 3, 4, 5, 6, 7]);
        assert_eq!(bt.filtered_total_length(), 12);

        for _ in 2..=7 {
            let index = bt.select_next(None).unwrap();
            assert!((2..=7).contains(&index));
        }
        assert_eq!(bt.select_next(None), None);

        bt.clear_all_claims();
        bt.clear_filter();
        bt.add_filter(5, 2);
        bt.enable_filter();
        assert_eq!(bt.first_n_missing_unused_indexes(32), vec![2, 3]);
        bt.mark_complete(2);
        bt.mark_complete(3);
        assert_eq!(bt.filtered_total_length(), 4);
        assert!(bt.is_all_complete());
        assert!(!bt.is_whole_file_complete());

        let mut bt = tracker(2, 31);
        bt.add_filter(0, 31);
        bt.enable_filter();
        assert_eq!(bt.filtered_total_length(), 31);
    }

    #[test]
    fn test_filtered_total_length_needs_enabled_filter() {
        let mut bt = tracker(2, 32);
        assert_eq!(bt.filtered_total_length(), 0);
        bt.add_filter(4, 12);
        assert_eq!(bt.filtered_total_length(), 0);
        bt.enable_filter();
        assert_eq!(bt.filtered_total_length(), 12);
        bt.disable_filter();
        assert_eq!(bt.filtered_total_length(), 0);
        assert!(bt.is_filter_bit_set(2));
        bt.clear_filter();
        assert!(!bt.is_filter_bit_set(2));
    }

    #[test]
    fn test_completion_follows_active_range() {
        let mut bt = tracker(2, 32);
        bt.add_filter(0, 4);
        bt.enable_filter();
        bt.mark_complete(0);
        bt.mark_complete(1);
        assert!(bt.is_all_complete());
        bt.disable_filter();
        assert!(!bt.is_all_complete());
        bt.enable_filter();
        assert!(bt.is_all_complete());
    }

    #[test]
    fn test_is_filter_bit_set() {
        let mut bt = tracker(2, 32);
        assert!(!bt.is_filter_bit_set(0));
        bt.add_filter(0, 2);
        assert!(bt.is_filter_bit_set(0));
        assert!(!bt.is_filter_bit_set(1));
        bt.add_filter(2, 4);
        assert!(bt.is_filter_bit_set(1));
    }

    #[test]
    fn test_remove_filter() {
        let mut bt = tracker(2, 32);
        bt.add_filter(0, 32);
        bt.remove_filter(4, 4);
        bt.enable_filter();
        assert!(!bt.is_filter_bit_set(2));
        assert!(!bt.is_filter_bit_set(3));
        assert_eq!(bt.count_filtered_block(), 14);
    }

    #[test]
    fn test_add_filter_zero_length() {
        let mut bt = tracker(1024, 1024 * 1024);
        bt.add_filter(2048, 0);
        bt.enable_filter();
        assert_eq!(bt.count_missing_block(), 0);
        assert!(bt.is_all_complete());
        assert_eq!(bt.first_missing_unused_index(None), None);
    }

    #[test]
    fn test_enable_without_filter_selects_nothing() {
        let mut bt = tracker(1024, 1024 * 10);
        bt.enable_filter();
        assert_eq!(bt.count_missing_block(), 0);
        assert_eq!(bt.select_next(None), None);
    }

    #[test]
    fn test_add_not_filter() {
        let mut bt = tracker(2, 32);
        bt.add_not_filter(3, 6);
        assert!(bt.is_filter_bit_set(0));
        for i in 1..5 {
            assert!(!bt.is_filter_bit_set(i));
        }
        for i in 5..16 {
            assert!(bt.is_filter_bit_set(i));
        }
    }

    #[test]
    fn test_add_not_filter_zero_length() {
        let mut bt = tracker(2, 6);
        bt.add_not_filter(2, 0);
        for i in 0..3 {
            assert!(!bt.is_filter_bit_set(i));
        }
    }

    #[test]
    fn test_add_not_filter_overflow() {
        let mut bt = tracker(2, 6);
        bt.add_not_filter(6, 100);
        for i in 0..3 {
            assert!(bt.is_filter_bit_set(i));
        }
    }

    #[test]
    fn test_sparse_missing_unused_index() {
        let block_length = 1024 * 1024;
        let mut bt = tracker(block_length, 10 * block_length);
        let ignore = BitVector::new(10);
        for expected in [0, 5, 3, 8, 2, 1, 4, 7, 6, 9] {
            assert_eq!(
                bt.sparse_missing_unused_index(block_length, Some(&ignore)),
                Some(expected)
            );
            bt.claim(expected);
        }
        assert_eq!(bt.sparse_missing_unused_index(block_length, Some(&ignore)), None);
    }

    #[test]
    fn test_sparse_missing_unused_index_after_completion() {
        let block_length = 1024 * 1024;
        let mut bt = tracker(block_length, 10 * block_length);
        for expected in 0..10 {
            assert_eq!(bt.sparse_missing_unused_index(block_length, None), Some(expected));
            bt.mark_complete(expected);
        }
        assert_eq!(bt.sparse_missing_unused_index(block_length, None), None);
    }

    #[test]
    fn test_sparse_missing_unused_index_with_min_split_size() {
        let block_length = 1024 * 1024;
        let min_split_size = 2 * block_length;
        let mut bt = tracker(block_length, 10 * block_length);
        let ignore = BitVector::new(10);

        bt.claim(1);
        assert_eq!(bt.sparse_missing_unused_index(min_split_size, Some(&ignore)), Some(6));
        bt.mark_complete(6);
        assert_eq!(bt.sparse_missing_unused_index(min_split_size, Some(&ignore)), Some(7));
        bt.claim(7);
        assert_eq!(bt.sparse_missing_unused_index(min_split_size, Some(&ignore)), Some(4));
        bt.mark_complete(4);
        assert_eq!(bt.sparse_missing_unused_index(min_split_size, Some(&ignore)), Some(0));
        bt.mark_complete(0);
        // Blocks 3, 5 and 9 tie; 5 follows a completed block.
        assert_eq!(bt.sparse_missing_unused_index(min_split_size, Some(&ignore)), Some(5));
        bt.mark_complete(5);
        // Only one-block runs behind in-flight segments are left.
        assert_eq!(bt.sparse_missing_unused_index(min_split_size, Some(&ignore)), None);
    }

    #[test]
    fn test_sparse_respects_ignore_and_filter() {
        let mut bt = tracker(1024, 1024 * 20);
        let mut ignore = BitVector::new(20);
        ignore.set(0);
        ignore.set(1);
        assert_eq!(bt.sparse_missing_unused_index(1024, Some(&ignore)), Some(2));
        bt.add_filter(1024 * 3, 1024 * 3);
        bt.enable_filter();
        assert_eq!(bt.sparse_missing_unused_index(1024, Some(&ignore)), Some(3));
    }

    #[test]
    fn test_inorder_missing_unused_index() {
        let mut bt = tracker(1024, 1024 * 20);
        let mut ignore = BitVector::new(20);
        assert_eq!(bt.inorder_missing_unused_index(1024, Some(&ignore)), Some(0));
        bt.claim(0);
        assert_eq!(bt.inorder_missing_unused_index(1024, Some(&ignore)), Some(1));
        assert_eq!(bt.inorder_missing_unused_index(2048, Some(&ignore)), Some(2));
        bt.release(0);
        bt.mark_complete(0);
        assert_eq!(bt.inorder_missing_unused_index(2048, Some(&ignore)), Some(1));

        let mut bt = tracker(1024, 1024 * 20);
        bt.restore_completed(&[0xff, 0xdf, 0xf0]).unwrap();
        assert!(!bt.is_complete(10));
        assert_eq!(bt.inorder_missing_unused_index(2048, Some(&ignore)), Some(10));
        bt.claim(10);
        assert_eq!(bt.inorder_missing_unused_index(2048, Some(&ignore)), None);
        bt.mark_all_complete();
        assert_eq!(bt.inorder_missing_unused_index(2048, Some(&ignore)), None);

        let mut bt = tracker(1024, 1024 * 20);
        ignore.set(0);
        ignore.set(1);
        assert_eq!(bt.inorder_missing_unused_index(2048, Some(&ignore)), Some(2));
        bt.add_filter(1024 * 3, 1024 * 3);
        bt.enable_filter();
        assert_eq!(bt.inorder_missing_unused_index(2048, Some(&ignore)), Some(3));
    }

    #[test]
    fn test_inorder_on_empty_file() {
        let bt = tracker(1024, 0);
        assert_eq!(bt.inorder_missing_unused_index(1024, None), None);
        assert_eq!(bt.geom_missing_unused_index(1024, None, 2.0, 0), None);
    }

    #[test]
    fn test_geom_missing_unused_index() {
        let mut bt = tracker(1024, 1024 * 20);
        let ignore = BitVector::new(20);
        for expected in [0, 1, 2, 4, 8, 16, 12] {
            assert_eq!(
                bt.geom_missing_unused_index(1024, Some(&ignore), 2.0, 0),
                Some(expected)
            );
            bt.claim(expected);
        }
    }

    #[test]
    fn test_geom_offset_and_degenerate_base() {
        let mut bt = tracker(1024, 1024 * 20);
        assert_eq!(bt.geom_missing_unused_index(1024, None, 2.0, 5), Some(5));
        bt.claim(5);
        assert_eq!(bt.geom_missing_unused_index(1024, None, 2.0, 5), Some(6));
        // No geometric stage: sparse splits the run behind block 5.
        assert_eq!(bt.geom_missing_unused_index(1024, None, 1.0, 5), Some(13));
        assert_eq!(bt.geom_missing_unused_index(1024, None, f64::NAN, 5), Some(13));
    }

    #[test]
    fn test_is_byte_range_complete() {
        let total_length = 4u64 * 1024 * 1024 * 1024;
        let piece_length = 4u64 * 1024 * 1024;
        let mut bt = tracker(piece_length, total_length);
        bt.mark_all_complete();

        assert!(!bt.is_byte_range_complete(0, 0));
        assert!(!bt.is_byte_range_complete(total_length, 100));
        assert!(!bt.is_byte_range_complete(total_length + 1, 100));
        assert!(bt.is_byte_range_complete(0, total_length));
        assert!(bt.is_byte_range_complete(0, total_length + 1));

        let mut bt = tracker(piece_length, total_length);
        bt.mark_complete(100);
        bt.mark_complete(101);
        assert!(bt.is_byte_range_complete(piece_length * 100, piece_length * 2));
        assert!(!bt.is_byte_range_complete(piece_length * 100 - 10, piece_length * 2));
        assert!(!bt.is_byte_range_complete(piece_length * 100, piece_length * 2 + 1));

        let mut bt = tracker(piece_length, total_length);
        bt.mark_complete(100);
        bt.mark_complete(102);
        assert!(!bt.is_byte_range_complete(piece_length * 100, piece_length * 3));
    }

    #[test]
    fn test_offset_completed_length() {
        let mut bt = tracker(1024, 1024 * 20);
        assert_eq!(bt.offset_completed_length(0, 1024), 0);
        assert_eq!(bt.offset_completed_length(0, 0), 0);
        bt.mark_range_complete(2, 4);
        assert_eq!(bt.offset_completed_length(2048, 3072), 3072);
        assert_eq!(bt.offset_completed_length(2047, 3072), 3071);
        assert_eq!(bt.offset_completed_length(2049, 3072), 3071);
        assert_eq!(bt.offset_completed_length(2048, 0), 0);
        assert_eq!(bt.offset_completed_length(2048, 1), 1);
        assert_eq!(bt.offset_completed_length(2047, 1), 0);
        assert_eq!(bt.offset_completed_length(0, 1024 * 20), 3072);
        assert_eq!(bt.offset_completed_length(0, 1024 * 20 + 10), 3072);
        assert_eq!(bt.offset_completed_length(1024 * 20, 1), 0);
    }

    #[test]
    fn test_missing_unused_length() {
        let total_length = 1024 * 10 + 10;
        let mut bt = tracker(1024, total_length);
        assert_eq!(bt.missing_unused_length(0), total_length);
        assert_eq!(bt.missing_unused_length(10), 10);
        assert_eq!(bt.missing_unused_length(11), 0);
        assert_eq!(bt.missing_unused_length(12), 0);

        bt.claim(5);
        assert_eq!(bt.missing_unused_length(0), 5 * 1024);
        bt.mark_complete(4);
        assert_eq!(bt.missing_unused_length(0), 4 * 1024);
        assert_eq!(bt.missing_unused_length(1), 3 * 1024);
    }

    #[test]
    fn test_mark_range_complete() {
        let block_length = 1024 * 1024;
        let mut bt = tracker(block_length, 10 * block_length);
        bt.mark_range_complete(0, 4);
        for i in 0..5 {
            assert!(bt.is_complete(i));
        }
        for i in 5..10 {
            assert!(!bt.is_complete(i));
        }
        assert_eq!(bt.completed_length(), 5 * block_length);
        assert!(bt.is_range_complete(0, 4));
        assert!(!bt.is_range_complete(0, 5));
        assert!(!bt.is_range_complete(4, 0));

        bt.mark_range_complete(8, 100);
        assert!(bt.is_range_complete(8, 9));
        assert!(!bt.is_range_complete(8, 10));
    }

    #[test]
    fn test_all_missing_indexes() {
        let block_length = 16 * 1024;
        let mut bt = tracker(block_length, 1024 * 1024);
        let mut peer = BitVector::with_value(64, true);
        assert_eq!(bt.all_missing_indexes(Some(&peer)).len(), 64);

        bt.mark_range_complete(0, 61);
        peer.clear(62);
        assert_eq!(bt.all_missing_indexes(Some(&peer)), vec![63]);
        assert_eq!(bt.all_missing_indexes(None), vec![62, 63]);
    }

    #[test]
    fn test_all_missing_unused_indexes() {
        let block_length = 16 * 1024;
        let mut bt = tracker(block_length, 1024 * 1024);
        let mut peer = BitVector::with_value(64, true);
        assert_eq!(bt.all_missing_unused_indexes(Some(&peer)).len(), 64);

        bt.mark_range_complete(0, 60);
        bt.claim(61);
        peer.clear(62);
        assert_eq!(bt.all_missing_unused_indexes(Some(&peer)), vec![63]);
    }

    #[test]
    fn test_count_filtered_block() {
        let mut bt = tracker(1024, 1024 * 256);
        assert_eq!(bt.count_block(), 256);
        assert_eq!(bt.count_filtered_block(), 0);
        bt.add_filter(1024, 1024 * 256);
        bt.enable_filter();
        assert_eq!(bt.count_block(), 256);
        assert_eq!(bt.count_filtered_block(), 255);
        bt.disable_filter();
        assert_eq!(bt.count_block(), 256);
        assert_eq!(bt.count_filtered_block(), 0);
    }

    #[test]
    fn test_count_missing_block() {
        let mut bt = tracker(1024, 1024 * 10);
        assert_eq!(bt.count_missing_block(), 10);
        bt.mark_complete(1);
        assert_eq!(bt.count_missing_block(), 9);
        bt.mark_all_complete();
        assert_eq!(bt.count_missing_block(), 0);
    }

    #[test]
    fn test_filtered_completed_length() {
        let mut bt = tracker(2, 31);
        bt.add_filter(26, 10);
        bt.enable_filter();
        bt.mark_complete(0);
        bt.mark_complete(15);
        assert_eq!(bt.completed_length(), 3);
        assert_eq!(bt.filtered_completed_length(), 1);
    }

    #[test]
    fn test_first_n_missing_unused_indexes() {
        let mut bt = tracker(1024, 1024 * 10);
        bt.claim(1);
        bt.mark_complete(5);
        assert_eq!(bt.first_n_missing_unused_indexes(256), vec![0, 2, 3, 4, 6, 7, 8, 9]);
        assert_eq!(bt.first_n_missing_unused_indexes(3), vec![0, 2, 3]);
        assert!(bt.first_n_missing_unused_indexes(0).is_empty());
        bt.mark_all_complete();
        assert!(bt.first_n_missing_unused_indexes(10).is_empty());

        let mut bt = tracker(1024, 1024 * 10);
        bt.add_filter(1024 * 9, 1024);
        bt.enable_filter();
        assert_eq!(bt.first_n_missing_unused_indexes(256), vec![9]);
    }

    #[test]
    fn test_restore_completed() {
        let mut bt = tracker(1024, 1024 * 10);
        bt.mark_range_complete(0, 2);
        bt.mark_complete(9);
        let saved = bt.completed_bitfield().as_bytes().to_vec();

        let mut resumed = tracker(1024, 1024 * 10);
        resumed.claim(5);
        resumed.restore_completed(&saved).unwrap();
        assert!(resumed.is_range_complete(0, 2));
        assert!(resumed.is_complete(9));
        assert!(!resumed.is_claimed(5));
        assert_eq!(resumed.first_missing_unused_index(None), Some(3));
    }

    #[test]
    fn test_restore_completed_wrong_length() {
        let mut bt = tracker(1024, 1024 * 10);
        bt.claim(1);
        let err = bt.restore_completed(&[0xff]).unwrap_err();
        assert_eq!(
            err,
            TrackerError::BitfieldLength {
                blocks: 10,
                expected: 2,
                actual: 1
            }
        );
        assert!(bt.is_claimed(1), "failed restore leaves state untouched");
    }
}
