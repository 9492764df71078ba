// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Command line definitions

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "aqlplan")]
#[command(about = "Rule-based, cluster-aware AQL query optimizer", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable debug logging (same as --log-level debug)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log level, overridden by --verbose
    #[arg(long, global = true, value_enum)]
    pub log_level: Option<LogLevel>,

    /// JSON catalog with collections, indexes and documents
    #[arg(short, long, global = true)]
    pub catalog: Option<PathBuf>,

    /// JSON optimizer configuration
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Plan for a sharded deployment
    #[arg(long, global = true)]
    pub cluster: bool,

    /// Rule switches, e.g. `-all,+use-indexes`
    #[arg(short, long, global = true, value_delimiter = ',', allow_hyphen_values = true)]
    pub rules: Vec<String>,

    /// Output format
    #[arg(short, long, global = true, value_enum, default_value = "table")]
    pub format: OutputFormat,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show the optimized plan of a query
    Explain {
        query: String,

        /// Show every candidate plan, not only the selected one
        #[arg(long)]
        all_plans: bool,

        /// Show the rule applications of the optimizer run
        #[arg(long)]
        trace: bool,
    },

    /// Optimize and run a query against the catalog's documents
    Query {
        query: String,

        /// Report the number of rows before the last LIMIT
        #[arg(long)]
        full_count: bool,

        /// Rows per printed batch
        #[arg(long, default_value_t = 1000)]
        batch_size: usize,
    },

    /// List the optimizer rules
    Rules,

    /// Show version information
    Version,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn to_level_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_explain_with_rules() {
        let cli = Cli::parse_from([
            "aqlplan",
            "explain",
            "FOR d IN docs RETURN d",
            "--rules",
            "-all,+use-indexes",
            "--cluster",
            "--format",
            "json",
        ]);
        assert_eq!(cli.rules, vec!["-all", "+use-indexes"]);
        assert!(cli.cluster);
        assert_eq!(cli.format, OutputFormat::Json);
        assert!(matches!(cli.command, Commands::Explain { all_plans: false, .. }));
    }

    #[test]
    fn test_query_defaults() {
        let cli = Cli::parse_from(["aqlplan", "query", "RETURN 1"]);
        assert!(matches!(
            cli.command,
            Commands::Query {
                batch_size: 1000,
                full_count: false,
                ..
            }
        ));
        assert_eq!(cli.format, OutputFormat::Table);
        assert!(cli.log_level.is_none());
    }
}
