// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! AST subsystem: lexer, parser and AST nodes for the AQL query subset

#[allow(clippy::module_inception)]
mod ast;
pub use ast::*;
pub mod lexer;
pub mod parser;

pub use parser::{parse_query, ParserError};
