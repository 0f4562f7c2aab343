// SPDX-FileCopyrightText: 2025 The piecewise Contributors
// SPDX-License-Identifier: GPL-3.0-or-later

use std::fmt;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{event, Level};

use crate::block_tracker::{BitVector, BlockStateTracker, StrategyKind};
use crate::config::Settings;
use crate::errors::SimulationError;

#[derive(Debug, Clone, PartialEq)]
pub struct SimulationSettings {
    pub connections: usize,
    pub failure_rate: f64,
    pub max_ticks: u64,
    pub seed: Option<u64>,
    /// `Sparse`, `Inorder` and `Geom` allocate through the tracker's split
    /// selectors. The other kinds use the tracker's own strategy.
    pub allocation: StrategyKind,
    pub min_split_size: u64,
    pub geom_base: f64,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

impl From<&Settings> for SimulationSettings {
    fn from(settings: &Settings) -> Self {
        Self {
            connections: settings.connections,
            failure_rate: settings.failure_rate,
            max_ticks: settings.max_ticks,
            seed: settings.seed,
            allocation: settings.strategy,
            min_split_size: settings.min_split_size,
            geom_base: settings.geom_base,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimulationReport {
    pub ticks: u64,
    pub blocks_completed: usize,
    pub releases: usize,
    pub idle_selections: usize,
}

impl fmt::Display for SimulationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ticks:            {}", self.ticks)?;
        writeln!(f, "blocks completed: {}", self.blocks_completed)?;
        writeln!(f, "releases:         {}", self.releases)?;
        write!(f, "idle selections:  {}", self.idle_selections)
    }
}

#[derive(Debug)]
struct Connection {
    peer: BitVector,
    // Blocks the peer lacks, for the split selectors.
    unavailable: BitVector,
    in_flight: Option<usize>,
}

/// Drives a tracker with virtual connections from a single loop.
///
/// Every connection talks to one peer. Connection 0 always reaches a seeder,
/// the others see a random half of the blocks. On each tick an idle
/// connection selects and claims a block, and a busy one either finishes its
/// block or drops it with probability `failure_rate`.
#[derive(Debug)]
pub struct Simulation {
    tracker: BlockStateTracker,
    settings: SimulationSettings,
    connections: Vec<Connection>,
    rng: StdRng,
}

impl Simulation {
    /// Fails when `failure_rate` is not a probability.
    pub fn new(
        tracker: BlockStateTracker,
        settings: SimulationSettings,
    ) -> Result<Self, SimulationError> {
        if !(0.0..=1.0).contains(&settings.failure_rate) {
            return Err(SimulationError::FailureRate(settings.failure_rate));
        }
        let mut rng = match settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let blocks = tracker.count_block();
        let connections = (0..settings.connections)
            .map(|id| {
                let mut peer = BitVector::with_value(blocks, true);
                if id > 0 {
                    for index in 0..blocks {
                        if rng.random_bool(0.5) {
                            peer.clear(index);
                        }
                    }
                }
                let mut unavailable = BitVector::new(blocks);
                for index in (0..blocks).filter(|&index| !peer.get(index)) {
                    unavailable.set(index);
                }
                Connection {
                    peer,
                    unavailable,
                    in_flight: None,
                }
            })
            .collect();

        Ok(Self {
            tracker,
            settings,
            connections,
            rng,
        })
    }

    pub fn tracker(&self) -> &BlockStateTracker {
        &self.tracker
    }

    /// Runs until the active range is complete or `max_ticks` is reached.
    pub fn run(&mut self) -> Result<SimulationReport, SimulationError> {
        let mut report = SimulationReport::default();
        event!(
            Level::INFO,
            blocks = self.tracker.count_missing_block(),
            connections = self.connections.len(),
            "Simulation started"
        );

        while !self.tracker.is_all_complete() {
            if report.ticks == self.settings.max_ticks {
                return Err(SimulationError::Stalled {
                    ticks: report.ticks,
                    missing: self.tracker.count_missing_block(),
                });
            }
            report.ticks += 1;
            self.tick(&mut report);
            self.check_claims()?;
        }

        event!(
            Level::INFO,
            ticks = report.ticks,
            releases = report.releases,
            "Simulation finished"
        );
        Ok(report)
    }

    fn tick(&mut self, report: &mut SimulationReport) {
        for id in 0..self.connections.len() {
            match self.connections[id].in_flight.take() {
                Some(index) => {
                    if self.rng.random_bool(self.settings.failure_rate) {
                        self.tracker.release(index);
                        report.releases += 1;
                        event!(Level::DEBUG, connection = id, block = index, "Fetch failed");
                    } else {
                        self.tracker.mark_complete(index);
                        report.blocks_completed += 1;
                    }
                }
                None => {
                    let picked = self.select(id);
                    if picked.is_none() {
                        report.idle_selections += 1;
                    }
                    self.connections[id].in_flight = picked;
                }
            }
        }
    }

    fn select(&mut self, id: usize) -> Option<usize> {
        let connection = &self.connections[id];
        let min_split_size = self.settings.min_split_size;
        let ignore = Some(&connection.unavailable);
        let index = match self.settings.allocation {
            StrategyKind::Sequential | StrategyKind::Random => {
                return self.tracker.select_next(Some(&connection.peer));
            }
            StrategyKind::Sparse => self
                .tracker
                .sparse_missing_unused_index(min_split_size, ignore)?,
            StrategyKind::Inorder => self
                .tracker
                .inorder_missing_unused_index(min_split_size, ignore)?,
            StrategyKind::Geom => self.tracker.geom_missing_unused_index(
                min_split_size,
                ignore,
                self.settings.geom_base,
                0,
            )?,
        };
        self.tracker.claim(index).then_some(index)
    }

    fn check_claims(&self) -> Result<(), SimulationError> {
        let mut owners: Vec<Option<usize>> = vec![None; self.tracker.count_block()];
        for (id, connection) in self.connections.iter().enumerate() {
            let Some(index) = connection.in_flight else {
                continue;
            };
            if let Some(first) = owners[index] {
                return Err(SimulationError::DoubleClaim {
                    index,
                    first,
                    second: id,
                });
            }
            owners[index] = Some(id);
        }
        Ok(())
    }
}
