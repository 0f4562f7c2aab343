// SPDX-FileCopyrightText: 2025 The piecewise Contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Block bookkeeping for segmented downloads.
//!
//! A file is cut into fixed-size blocks that several connections fetch in
//! parallel. [`BlockStateTracker`] records which blocks are completed and
//! which are claimed by an in-flight fetch, picks the next block for an idle
//! connection and restricts everything to a byte sub-range when only part of
//! the file is wanted.

pub mod block_tracker;
pub mod config;
pub mod errors;
pub mod layout;
pub mod simulation;

pub use block_tracker::{BitVector, BlockStateTracker, SharedTracker, StrategyKind};
pub use config::Settings;
