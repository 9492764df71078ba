// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Fulltext matching
//!
//! A query is a comma separated list of terms. Terms are combined left to
//! right: a bare or `+` term must match, a `|` term may match instead of the
//! terms so far, a `-` term must not match. `prefix:` turns a term into a
//! word prefix. Indexed text is split into words on non-alphanumeric
//! characters and case folded; words shorter than the index's minimum
//! length are not indexed.

use crate::exec::error::{ExecutionError, ExecutionResult};
use crate::exec::value::get_field;
use serde_json::Value;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Combine {
    And,
    Or,
    Not,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Term {
    combine: Combine,
    word: String,
    prefix: bool,
}

impl Term {
    fn matches(&self, words: &BTreeSet<String>) -> bool {
        if self.prefix {
            words
                .range(self.word.clone()..)
                .next()
                .map(|word| word.starts_with(&self.word))
                .unwrap_or(false)
        } else {
            words.contains(&self.word)
        }
    }
}

/// Parsed fulltext query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FulltextQuery {
    terms: Vec<Term>,
}

impl FulltextQuery {
    pub fn parse(query: &str) -> ExecutionResult<Self> {
        let mut terms = Vec::new();
        for raw in query.split(',') {
            let mut text = raw.trim();
            let combine = match text.chars().next() {
                Some('+') => Combine::And,
                Some('|') => Combine::Or,
                Some('-') => Combine::Not,
                _ => Combine::And,
            };
            if matches!(text.chars().next(), Some('+' | '|' | '-')) {
                text = text[1..].trim_start();
            }
            let (prefix, word) = match text.strip_prefix("prefix:") {
                Some(rest) => (true, rest.trim()),
                None => (false, text),
            };
            if word.is_empty() {
                continue;
            }
            terms.push(Term {
                combine,
                word: word.to_lowercase(),
                prefix,
            });
        }
        if terms.is_empty() {
            return Err(ExecutionError::FulltextError(format!(
                "query '{}' contains no search terms",
                query
            )));
        }
        Ok(Self { terms })
    }

    /// Whether a document with these indexed words matches
    pub fn matches(&self, words: &BTreeSet<String>) -> bool {
        let mut terms = self.terms.iter();
        let Some(first) = terms.next() else {
            return false;
        };
        let mut matched = first.matches(words) != (first.combine == Combine::Not);
        for term in terms {
            matched = match term.combine {
                Combine::And => matched && term.matches(words),
                Combine::Or => matched || term.matches(words),
                Combine::Not => matched && !term.matches(words),
            };
        }
        matched
    }
}

/// Words of `text` that a fulltext index with `min_length` would store
pub fn tokenize(text: &str, min_length: usize) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty() && word.chars().count() >= min_length)
        .map(str::to_lowercase)
        .collect()
}

/// Words indexed for one attribute value: strings directly, arrays and
/// objects through their string members
pub fn indexed_words(value: &Value, min_length: usize) -> BTreeSet<String> {
    let mut words = BTreeSet::new();
    collect_words(value, min_length, &mut words);
    words
}

fn collect_words(value: &Value, min_length: usize, words: &mut BTreeSet<String>) {
    match value {
        Value::String(text) => words.extend(tokenize(text, min_length)),
        Value::Array(items) => items
            .iter()
            .for_each(|item| collect_words(item, min_length, words)),
        Value::Object(entries) => entries
            .values()
            .for_each(|item| collect_words(item, min_length, words)),
        _ => {}
    }
}

/// Matching documents in storage order, at most `limit` of them
pub fn search(
    documents: Vec<Value>,
    field: &str,
    query: &FulltextQuery,
    min_length: usize,
    limit: Option<usize>,
) -> Vec<Value> {
    documents
        .into_iter()
        .filter(|document| query.matches(&indexed_words(&get_field(document, field), min_length)))
        .take(limit.unwrap_or(usize::MAX))
        .collect()
}
