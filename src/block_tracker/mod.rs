// SPDX-FileCopyrightText: 2025 The piecewise Contributors
// SPDX-License-Identifier: GPL-3.0-or-later

pub mod bit_vector;
pub mod geometry;
pub mod range_filter;
pub mod selection;
pub mod shared;
pub mod tracker;

pub use bit_vector::BitVector;
pub use geometry::BlockGeometry;
pub use range_filter::RangeFilter;
pub use selection::{FirstEligible, SeededRandom, SelectionStrategy, StrategyKind, UniformRandom};
pub use shared::SharedTracker;
pub use tracker::BlockStateTracker;
