// SPDX-FileCopyrightText: 2025 The piecewise Contributors
// SPDX-License-Identifier: GPL-3.0-or-later

use clap::ValueEnum;
use rand::prelude::IndexedRandom;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Picks one block out of the eligible set handed over by the tracker.
///
/// The tracker has already filtered out completed, claimed, unavailable and
/// filtered-out blocks, so any returned index must come from `eligible`.
pub trait SelectionStrategy: Send + fmt::Debug {
    fn pick(&mut self, eligible: &[usize]) -> Option<usize>;
}

/// Lowest eligible index. Sequential allocation.
#[derive(Debug, Default, Clone, Copy)]
pub struct FirstEligible;

impl SelectionStrategy for FirstEligible {
    fn pick(&mut self, eligible: &[usize]) -> Option<usize> {
        eligible.first().copied()
    }
}

/// Uniform choice using the thread-local RNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct UniformRandom;

impl SelectionStrategy for UniformRandom {
    fn pick(&mut self, eligible: &[usize]) -> Option<usize> {
        eligible.choose(&mut rand::rng()).copied()
    }
}

/// Uniform choice from a seeded generator, reproducible across runs.
#[derive(Debug, Clone)]
pub struct SeededRandom {
    rng: StdRng,
}

impl SeededRandom {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl SelectionStrategy for SeededRandom {
    fn pick(&mut self, eligible: &[usize]) -> Option<usize> {
        eligible.choose(&mut self.rng).copied()
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    Sequential,
    #[default]
    Random,
    /// Split the longest free run between connections. Driven by
    /// `sparse_missing_unused_index`; the built strategy is sequential.
    Sparse,
    /// Front to back, via `inorder_missing_unused_index`.
    Inorder,
    /// Geometrically growing windows from the front, via
    /// `geom_missing_unused_index`.
    Geom,
}

impl StrategyKind {
    /// A seed only matters for `Random`, where it makes the picks reproducible.
    pub fn build(self, seed: Option<u64>) -> Box<dyn SelectionStrategy> {
        match (self, seed) {
            (
                StrategyKind::Sequential
                | StrategyKind::Sparse
                | StrategyKind::Inorder
                | StrategyKind::Geom,
                _,
            ) => Box::new(FirstEligible),
            (StrategyKind::Random, Some(seed)) => Box::new(SeededRandom::new(seed)),
            (StrategyKind::Random, None) => Box::new(UniformRandom),
        }
    }
}
