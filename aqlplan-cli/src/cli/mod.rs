// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! CLI module for aqlplan
//!
//! Explains and runs queries against a JSON catalog and lists the optimizer
//! rules.

pub mod commands;
pub mod handlers;
pub mod output;

pub use commands::{Cli, Commands};
pub use handlers::{handle_explain, handle_query, handle_rules};
