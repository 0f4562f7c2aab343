// SPDX-FileCopyrightText: 2025 The piecewise Contributors
// SPDX-License-Identifier: GPL-3.0-or-later

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TrackerError {
    #[error("Bitfield for {blocks} blocks must be {expected} bytes, got {actual}")]
    BitfieldLength {
        blocks: usize,
        expected: usize,
        actual: usize,
    },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LayoutError {
    #[error("File index {index} is out of range ({count} files)")]
    UnknownFile { index: usize, count: usize },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load settings: {0}")]
    Figment(#[from] Box<figment::Error>),
    #[error("block_length must be greater than zero")]
    ZeroBlockLength,
    #[error("connections must be greater than zero")]
    NoConnections,
    #[error("failure_rate must be within [0, 1), got {0}")]
    FailureRate(f64),
    #[error("geom_base must be greater than 1, got {0}")]
    GeomBase(f64),
}

impl From<figment::Error> for ConfigError {
    fn from(e: figment::Error) -> Self {
        ConfigError::Figment(Box::new(e))
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimulationError {
    #[error("failure_rate must be within [0, 1], got {0}")]
    FailureRate(f64),
    #[error("Download stalled after {ticks} ticks with {missing} blocks missing")]
    Stalled { ticks: u64, missing: usize },
    #[error("Block {index} was claimed by connections {first} and {second}")]
    DoubleClaim {
        index: usize,
        first: usize,
        second: usize,
    },
}
