// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! CLI command handlers for aqlplan

use colored::Colorize;
use std::path::Path;
use std::sync::Arc;

use super::commands::{Cli, OutputFormat};
use super::output::ResultFormatter;
use aqlplan::plan::{format_plan, registry};
use aqlplan::{MemoryCatalog, OptimizerConfig, Plan, QueryCoordinator, QueryOptions};

/// Build a coordinator from the global catalog and configuration flags
pub fn load_coordinator(cli: &Cli) -> Result<QueryCoordinator, Box<dyn std::error::Error>> {
    let catalog = match &cli.catalog {
        Some(path) => load_catalog(path)?,
        None => {
            log::info!("No catalog given, using an empty one");
            MemoryCatalog::new()
        }
    };
    let mut config = match &cli.config {
        Some(path) => OptimizerConfig::from_file(path)
            .map_err(|e| format!("Failed to load configuration {:?}: {}", path, e))?,
        None => OptimizerConfig::default(),
    };
    if cli.cluster {
        config.cluster = true;
    }
    Ok(QueryCoordinator::new(Arc::new(catalog), config))
}

fn load_catalog(path: &Path) -> Result<MemoryCatalog, Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("Catalog not found at {:?}", path).into());
    }
    let catalog = MemoryCatalog::from_file(path)
        .map_err(|e| format!("Failed to load catalog {:?}: {}", path, e))?;
    log::debug!(
        "Loaded catalog {:?} with {} collections",
        path,
        catalog.collection_names().len()
    );
    Ok(catalog)
}

/// Handle the explain command
pub fn handle_explain(
    cli: &Cli,
    query: &str,
    all_plans: bool,
    trace: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let coordinator = load_coordinator(cli)?;
    let options = QueryOptions::default().with_rules(&cli.rules);
    let planned = match coordinator.plan(query, &options) {
        Ok(planned) => planned,
        Err(e) => {
            eprintln!("{}", format!("Error: {}", e).red());
            return Err(e.into());
        }
    };

    match cli.format {
        OutputFormat::Json => {
            let output = if all_plans {
                serde_json::to_string_pretty(&planned.explain_all())?
            } else {
                serde_json::to_string_pretty(&planned.explain())?
            };
            println!("{}", output);
        }
        OutputFormat::Table => {
            let plans: Vec<&Plan> = if all_plans {
                std::iter::once(&planned.plan)
                    .chain(planned.alternatives.iter())
                    .collect()
            } else {
                vec![&planned.plan]
            };
            for (i, plan) in plans.into_iter().enumerate() {
                if i > 0 {
                    println!("{}", format!("Alternative {}", i).bold().yellow());
                }
                print!("{}", format_plan(plan));
                println!(
                    "Rules applied: {}",
                    if plan.applied_rules().is_empty() {
                        "none".to_string()
                    } else {
                        plan.applied_rules().join(", ")
                    }
                    .cyan()
                );
                println!("Estimated cost: {:.2}\n", plan.total_cost());
            }
            if trace {
                print!("{}", planned.trace.format_steps());
            }
            print!("{}", ResultFormatter::format_warnings(&planned.warnings));
        }
    }
    Ok(())
}

/// Handle the query command
pub fn handle_query(
    cli: &Cli,
    query: &str,
    full_count: bool,
    batch_size: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let coordinator = load_coordinator(cli)?;
    let mut options = QueryOptions::default()
        .with_rules(&cli.rules)
        .with_batch_size(batch_size);
    if full_count {
        options = options.with_full_count();
    }

    match coordinator.execute(query, &options) {
        Ok(mut cursor) => {
            match cli.format {
                OutputFormat::Json => println!("{}", ResultFormatter::format_json(&mut cursor)),
                OutputFormat::Table => {
                    let mut batch_number = 0;
                    while let Some(batch) = cursor.next_batch() {
                        batch_number += 1;
                        print!("{}", ResultFormatter::format_table(&batch, batch_number));
                    }
                    print!("{}", ResultFormatter::format_summary(&cursor));
                }
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("{}", format!("Error: {}", e).red());
            Err(e.into())
        }
    }
}

/// Handle the rules command
pub fn handle_rules(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let rules = registry();
    match cli.format {
        OutputFormat::Json => {
            let entries: Vec<serde_json::Value> = rules
                .iter()
                .map(|rule| {
                    serde_json::json!({
                        "name": rule.name,
                        "pass": rule.pass,
                        "canBeDisabled": rule.can_be_disabled,
                        "clusterOnly": rule.cluster_only,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        OutputFormat::Table => print!("{}", ResultFormatter::format_rules(rules)),
    }
    Ok(())
}
