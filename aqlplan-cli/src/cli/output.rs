// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Result formatting for CLI output

use aqlplan::plan::Rule;
use aqlplan::Cursor;
use colored::*;
use comfy_table::{presets::UTF8_FULL, Cell, Color, Table};
use serde_json::Value;

/// Result formatter for the table and JSON output formats
pub struct ResultFormatter;

impl ResultFormatter {
    /// One batch of rows as a table. Object rows get a column per attribute,
    /// anything else a single value column.
    pub fn format_table(rows: &[Value], batch_number: usize) -> String {
        if rows.is_empty() {
            return format!("{}\n", "No results found".yellow());
        }

        let mut output = String::new();
        output.push_str(&format!(
            "{}\n",
            format!("Batch {}", batch_number).bold().green()
        ));

        let mut table = Table::new();
        table.load_preset(UTF8_FULL);

        let columns = Self::columns(rows);
        match &columns {
            Some(columns) => {
                table.set_header(
                    columns
                        .iter()
                        .map(|column| Cell::new(column).fg(Color::Green))
                        .collect::<Vec<_>>(),
                );
                for row in rows {
                    table.add_row(
                        columns
                            .iter()
                            .map(|column| {
                                Self::value_to_string(row.get(column).unwrap_or(&Value::Null))
                            })
                            .collect::<Vec<_>>(),
                    );
                }
            }
            None => {
                table.set_header(vec![Cell::new("value").fg(Color::Green)]);
                for row in rows {
                    table.add_row(vec![Self::value_to_string(row)]);
                }
            }
        }

        output.push_str(&table.to_string());
        output.push('\n');
        output
    }

    /// Attribute names when every row is an object, in first-seen order
    fn columns(rows: &[Value]) -> Option<Vec<String>> {
        let mut columns: Vec<String> = Vec::new();
        for row in rows {
            let object = row.as_object()?;
            for key in object.keys() {
                if !columns.contains(key) {
                    columns.push(key.clone());
                }
            }
        }
        Some(columns)
    }

    pub fn format_summary(cursor: &Cursor) -> String {
        let mut output = format!(
            "Rows returned: {}\nExecution time: {:.3} ms\n",
            cursor.row_count(),
            cursor.stats().execution_time * 1000.0
        );
        if let Some(full_count) = cursor.full_count() {
            output.push_str(&format!("Full count: {}\n", full_count));
        }
        output.push_str(&format!(
            "Scanned: {} full, {} index; filtered: {}\n",
            cursor.stats().scanned_full,
            cursor.stats().scanned_index,
            cursor.stats().filtered
        ));
        output
    }

    /// All remaining rows with the cursor's statistics
    pub fn format_json(cursor: &mut Cursor) -> String {
        let json_result = serde_json::json!({
            "id": cursor.id().to_string(),
            "result": cursor.drain_all(),
            "count": cursor.row_count(),
            "fullCount": cursor.full_count(),
            "stats": cursor.stats(),
        });
        serde_json::to_string_pretty(&json_result).unwrap_or_else(|_| {
            "{\"error\": \"Could not serialize results to JSON\"}".to_string()
        })
    }

    pub fn format_warnings(warnings: &[String]) -> String {
        if warnings.is_empty() {
            return String::new();
        }
        let mut output = format!("\n{}\n", "Warnings:".bold().yellow());
        for (i, warning) in warnings.iter().enumerate() {
            output.push_str(&format!("  {}. {}\n", i + 1, warning.yellow()));
        }
        output
    }

    pub fn format_rules(rules: &[Rule]) -> String {
        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_header(vec![
            Cell::new("pass").fg(Color::Green),
            Cell::new("rule").fg(Color::Green),
            Cell::new("flags").fg(Color::Green),
        ]);
        for rule in rules {
            let mut flags = Vec::new();
            if rule.cluster_only {
                flags.push("cluster-only");
            }
            if !rule.can_be_disabled {
                flags.push("required");
            }
            table.add_row(vec![
                rule.pass.to_string(),
                rule.name.to_string(),
                flags.join(", "),
            ]);
        }
        format!("{}\n", table)
    }

    fn value_to_string(value: &Value) -> String {
        match value {
            Value::String(s) => s.clone(),
            Value::Null => "null".to_string(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_object_rows_become_columns() {
        let rows = vec![json!({ "a": 1 }), json!({ "a": 2, "b": "x" })];
        assert_eq!(
            ResultFormatter::columns(&rows),
            Some(vec!["a".to_string(), "b".to_string()])
        );
        assert_eq!(ResultFormatter::columns(&[json!(1), json!({})]), None);
        let table = ResultFormatter::format_table(&rows, 1);
        assert!(table.contains("Batch 1"));
        assert!(table.contains('x'));
    }

    #[test]
    fn test_empty_batch() {
        assert!(ResultFormatter::format_table(&[], 1).contains("No results found"));
        assert!(ResultFormatter::format_warnings(&[]).is_empty());
    }
}
