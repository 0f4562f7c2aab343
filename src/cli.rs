// SPDX-FileCopyrightText: 2025 The piecewise Contributors
// SPDX-License-Identifier: GPL-3.0-or-later

use std::path::PathBuf;
use std::str::FromStr;

use clap::{Parser, Subcommand};
use thiserror::Error;

use piecewise::block_tracker::{BlockStateTracker, RangeFilter, StrategyKind};
use piecewise::config::Settings;
use piecewise::errors::SimulationError;
use piecewise::simulation::{Simulation, SimulationReport, SimulationSettings};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CliError {
    #[error("Range '{0}' must look like OFFSET:LENGTH")]
    RangeFormat(String),
    #[error("Invalid number '{0}' in range")]
    RangeNumber(String),
}

/// A byte sub-range given on the command line as `OFFSET:LENGTH`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub offset: u64,
    pub length: u64,
}

impl FromStr for ByteRange {
    type Err = CliError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (offset, length) = s
            .split_once(':')
            .ok_or_else(|| CliError::RangeFormat(s.to_string()))?;
        let parse = |part: &str| {
            part.trim()
                .parse::<u64>()
                .map_err(|_| CliError::RangeNumber(part.to_string()))
        };
        Ok(Self {
            offset: parse(offset)?,
            length: parse(length)?,
        })
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// TOML settings file. Defaults to settings.toml in the user config directory.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log at DEBUG instead of INFO.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show how a file splits into blocks and what a range filter selects.
    Plan {
        #[arg(long)]
        total_length: u64,
        #[arg(long)]
        block_length: Option<u64>,
        #[arg(long = "range")]
        ranges: Vec<ByteRange>,
    },
    /// Download a virtual file over simulated connections.
    Simulate {
        #[arg(long)]
        total_length: u64,
        #[arg(long)]
        block_length: Option<u64>,
        #[arg(long)]
        connections: Option<usize>,
        #[arg(long = "range")]
        ranges: Vec<ByteRange>,
        #[arg(long)]
        seed: Option<u64>,
        #[arg(long, value_enum)]
        strategy: Option<StrategyKind>,
    },
}

fn build_tracker(
    settings: &Settings,
    total_length: u64,
    ranges: &[ByteRange],
) -> BlockStateTracker {
    let mut tracker = BlockStateTracker::new(settings.block_length, total_length)
        .with_strategy(settings.strategy.build(settings.seed));
    if !ranges.is_empty() {
        for range in ranges {
            tracker.add_filter(range.offset, range.length);
        }
        tracker.enable_filter();
    }
    tracker
}

pub fn plan(settings: &Settings, total_length: u64, ranges: &[ByteRange]) -> String {
    let tracker = build_tracker(settings, total_length, ranges);
    let mut lines = vec![
        format!("block length:      {}", tracker.block_length()),
        format!("blocks:            {}", tracker.count_block()),
        format!("last block length: {}", tracker.last_block_length()),
    ];
    for range in ranges {
        let blocks = RangeFilter::from_byte_range(range.offset, range.length, tracker.geometry());
        let described = match blocks {
            Some(blocks) => format!("blocks {}..={}", blocks.lo(), blocks.hi()),
            None => "no blocks".to_string(),
        };
        lines.push(format!("range {}:{}: {}", range.offset, range.length, described));
    }
    if tracker.is_filter_enabled() {
        lines.push(format!("filtered blocks:   {}", tracker.count_filtered_block()));
        lines.push(format!("filtered length:   {}", tracker.filtered_total_length()));
    }
    lines.join("\n")
}

pub fn simulate(
    settings: &Settings,
    total_length: u64,
    ranges: &[ByteRange],
) -> Result<SimulationReport, SimulationError> {
    let tracker = build_tracker(settings, total_length, ranges);
    Simulation::new(tracker, SimulationSettings::from(settings))?.run()
}
