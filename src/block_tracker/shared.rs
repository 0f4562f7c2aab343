// SPDX-FileCopyrightText: 2025 The piecewise Contributors
// SPDX-License-Identifier: GPL-3.0-or-later

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::block_tracker::bit_vector::BitVector;
use crate::block_tracker::tracker::BlockStateTracker;

/// A tracker shared between connection handlers on different threads.
///
/// Every method takes the lock once, so `select_and_claim` can never hand
/// the same block to two callers.
#[derive(Debug, Clone)]
pub struct SharedTracker {
    inner: Arc<Mutex<BlockStateTracker>>,
}

impl SharedTracker {
    pub fn new(tracker: BlockStateTracker) -> Self {
        Self {
            inner: Arc::new(Mutex::new(tracker)),
        }
    }

    pub fn select_and_claim(&self, peer: Option<&BitVector>) -> Option<usize> {
        self.lock().select_next(peer)
    }

    pub fn complete(&self, index: usize) -> bool {
        self.lock().mark_complete(index)
    }

    pub fn release(&self, index: usize) -> bool {
        self.lock().release(index)
    }

    pub fn is_all_complete(&self) -> bool {
        self.lock().is_all_complete()
    }

    /// Runs `f` with exclusive access to the tracker.
    pub fn with<R>(&self, f: impl FnOnce(&mut BlockStateTracker) -> R) -> R {
        f(&mut self.lock())
    }

    // A panic in another handler cannot leave the bit vectors half-written,
    // so a poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, BlockStateTracker> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
