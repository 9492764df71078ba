// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! aqlplan CLI entry point

use clap::Parser;
use colored::Colorize;

mod cli;
use cli::{Cli, Commands};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse command line arguments first to get log level
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        log::LevelFilter::Debug
    } else if let Some(level) = cli.log_level {
        level.to_level_filter()
    } else {
        // can still be overridden by RUST_LOG
        log::LevelFilter::Warn
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    match &cli.command {
        Commands::Version => {
            println!("{} {}", "aqlplan".bold().green(), aqlplan::VERSION);
            println!("Rule-based, cluster-aware AQL query optimizer");
            Ok(())
        }

        Commands::Explain {
            query,
            all_plans,
            trace,
        } => cli::handle_explain(&cli, query, *all_plans, *trace),

        Commands::Query {
            query,
            full_count,
            batch_size,
        } => cli::handle_query(&cli, query, *full_count, *batch_size),

        Commands::Rules => cli::handle_rules(&cli),
    }
}
