// SPDX-FileCopyrightText: 2025 The piecewise Contributors
// SPDX-License-Identifier: GPL-3.0-or-later

mod cli;

use std::fs;
use std::io;

use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::Targets;
use tracing_subscriber::{filter::LevelFilter, fmt, prelude::*};

use piecewise::config::{self, Settings};

use crate::cli::{Cli, Commands};

const DEFAULT_LOG_FILTER: LevelFilter = LevelFilter::INFO;

fn init_logging(settings: &Settings, verbose: bool) -> Option<WorkerGuard> {
    let level = if verbose {
        LevelFilter::DEBUG
    } else {
        DEFAULT_LOG_FILTER
    };
    let filter = Targets::new()
        .with_default(LevelFilter::WARN)
        .with_target("piecewise", level);

    if let Some(log_dir) = &settings.log_dir {
        if fs::create_dir_all(log_dir).is_ok() {
            if let Ok(appender) = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .max_log_files(31)
                .filename_prefix("piecewise")
                .filename_suffix("log")
                .build(log_dir)
            {
                let (non_blocking, guard) = tracing_appender::non_blocking(appender);
                let file_layer = fmt::layer()
                    .with_writer(non_blocking)
                    .with_ansi(false)
                    .with_filter(filter);
                let _ = tracing_subscriber::registry().with(file_layer).try_init();
                return Some(guard);
            }
        }
    }

    let stderr_layer = fmt::layer().with_writer(io::stderr).with_filter(filter);
    let _ = tracing_subscriber::registry().with(stderr_layer).try_init();
    None
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let mut settings = config::load_settings(cli.config.as_deref())?;

    match cli.command {
        Commands::Plan {
            total_length,
            block_length,
            ranges,
        } => {
            if let Some(block_length) = block_length {
                settings.block_length = block_length;
            }
            settings.validate()?;
            let _guard = init_logging(&settings, cli.verbose);
            println!("{}", cli::plan(&settings, total_length, &ranges));
        }
        Commands::Simulate {
            total_length,
            block_length,
            connections,
            ranges,
            seed,
            strategy,
        } => {
            if let Some(block_length) = block_length {
                settings.block_length = block_length;
            }
            if let Some(connections) = connections {
                settings.connections = connections;
            }
            if seed.is_some() {
                settings.seed = seed;
            }
            if let Some(strategy) = strategy {
                settings.strategy = strategy;
            }
            settings.validate()?;
            let _guard = init_logging(&settings, cli.verbose);
            tracing::info!(
                total_length,
                block_length = settings.block_length,
                "Starting simulation"
            );
            let report = cli::simulate(&settings, total_length, &ranges)?;
            println!("{report}");
        }
    }

    Ok(())
}
