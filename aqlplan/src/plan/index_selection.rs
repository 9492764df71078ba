// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Index selection
//!
//! Filter conditions over one document variable are normalized into a
//! disjunction of conjunctions of attribute terms (`doc.path OP value`).
//! Each conjunction is matched against the collection's indexes and the
//! candidate with the fewest estimated items wins.

use crate::ast::BinaryOperator;
use crate::catalog::{IndexDescriptor, IndexType};
use crate::plan::cost::CostModel;
use crate::plan::expression::{Expr, VarId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

/// Upper bound on the number of disjuncts produced by normalization
const MAX_DISJUNCTS: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TermOperator {
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
    In,
}

impl TermOperator {
    fn from_binary(operator: BinaryOperator) -> Option<Self> {
        match operator {
            BinaryOperator::Equal => Some(TermOperator::Eq),
            BinaryOperator::LessThan => Some(TermOperator::Lt),
            BinaryOperator::LessEqual => Some(TermOperator::Le),
            BinaryOperator::GreaterThan => Some(TermOperator::Gt),
            BinaryOperator::GreaterEqual => Some(TermOperator::Ge),
            BinaryOperator::In => Some(TermOperator::In),
            _ => None,
        }
    }

    pub fn to_binary(self) -> BinaryOperator {
        match self {
            TermOperator::Eq => BinaryOperator::Equal,
            TermOperator::Lt => BinaryOperator::LessThan,
            TermOperator::Le => BinaryOperator::LessEqual,
            TermOperator::Gt => BinaryOperator::GreaterThan,
            TermOperator::Ge => BinaryOperator::GreaterEqual,
            TermOperator::In => BinaryOperator::In,
        }
    }

    pub fn is_range(self) -> bool {
        matches!(
            self,
            TermOperator::Lt | TermOperator::Le | TermOperator::Gt | TermOperator::Ge
        )
    }

    pub fn as_str(self) -> &'static str {
        self.to_binary().as_str()
    }
}

/// `doc.path OP value`, with `value` independent of the document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeTerm {
    pub path: Vec<String>,
    pub operator: TermOperator,
    pub value: Expr,
}

impl AttributeTerm {
    pub fn field(&self) -> String {
        self.path.join(".")
    }

    /// The term as a condition over `var`
    pub fn to_condition(&self, var: VarId) -> Expr {
        Expr::binary(
            self.operator.to_binary(),
            Expr::attribute_path_of(var, &self.path),
            self.value.clone(),
        )
    }

    /// Whether a document whose attribute is null or missing can satisfy
    /// the term
    fn could_match_null(&self) -> bool {
        let constant = self.value.evaluate_constant();
        match self.operator {
            TermOperator::Eq | TermOperator::Ge => !matches!(constant, Some(ref v) if !v.is_null()),
            TermOperator::In => match constant {
                Some(Value::Array(values)) => values.iter().any(Value::is_null),
                _ => true,
            },
            // null sorts before every other value
            TermOperator::Lt | TermOperator::Le => true,
            TermOperator::Gt => false,
        }
    }

    fn in_cardinality(&self, model: &CostModel) -> f64 {
        match self.value.evaluate_constant() {
            Some(Value::Array(values)) => values.len() as f64,
            Some(_) => 0.0,
            None => model.default_list_estimate as f64,
        }
    }
}

/// Filter condition in disjunctive normal form
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedCondition {
    pub disjuncts: Vec<Vec<AttributeTerm>>,
    /// False when parts of the condition could not be expressed as terms;
    /// the original filter must then stay in place
    pub complete: bool,
}

#[derive(Debug, Clone)]
enum Leaf {
    Term(AttributeTerm),
    Opaque,
}

/// Normalize `condition` into attribute terms over `var`. Term values may
/// only reference variables in `available`. Returns `None` when some
/// disjunct has no usable term at all.
pub fn normalize_condition(
    condition: &Expr,
    var: VarId,
    available: &BTreeSet<VarId>,
) -> Option<NormalizedCondition> {
    let dnf = to_dnf(condition, var, available)?;
    let mut complete = true;
    let mut disjuncts = Vec::with_capacity(dnf.len());
    for conjunction in dnf {
        let mut terms = Vec::new();
        for leaf in conjunction {
            match leaf {
                Leaf::Term(term) => terms.push(term),
                Leaf::Opaque => complete = false,
            }
        }
        if terms.is_empty() {
            return None;
        }
        disjuncts.push(terms);
    }
    Some(NormalizedCondition {
        disjuncts,
        complete,
    })
}

fn to_dnf(expr: &Expr, var: VarId, available: &BTreeSet<VarId>) -> Option<Vec<Vec<Leaf>>> {
    match expr {
        Expr::Binary {
            operator: BinaryOperator::Or,
            left,
            right,
        } => {
            let mut dnf = to_dnf(left, var, available)?;
            dnf.extend(to_dnf(right, var, available)?);
            (dnf.len() <= MAX_DISJUNCTS).then_some(dnf)
        }
        Expr::Binary {
            operator: BinaryOperator::And,
            left,
            right,
        } => {
            let left = to_dnf(left, var, available)?;
            let right = to_dnf(right, var, available)?;
            if left.len() * right.len() > MAX_DISJUNCTS {
                return None;
            }
            let mut dnf = Vec::with_capacity(left.len() * right.len());
            for l in &left {
                for r in &right {
                    dnf.push(l.iter().chain(r.iter()).cloned().collect());
                }
            }
            Some(dnf)
        }
        _ => Some(vec![vec![leaf_of(expr, var, available)]]),
    }
}

fn leaf_of(expr: &Expr, var: VarId, available: &BTreeSet<VarId>) -> Leaf {
    let Expr::Binary {
        operator,
        left,
        right,
    } = expr
    else {
        return Leaf::Opaque;
    };
    let usable = |value: &Expr| {
        !value.uses_variable(var)
            && value.is_deterministic()
            && value.variables_used().is_subset(available)
    };

    if let Some(operator) = TermOperator::from_binary(*operator) {
        if let Some((base, path)) = left.attribute_path() {
            if base == var && !path.is_empty() && usable(right) {
                return Leaf::Term(AttributeTerm {
                    path,
                    operator,
                    value: (**right).clone(),
                });
            }
        }
    }
    // constant on the left: `5 < doc.a` is `doc.a > 5`
    if let Some(reversed) = operator.reversed().and_then(TermOperator::from_binary) {
        if let Some((base, path)) = right.attribute_path() {
            if base == var && !path.is_empty() && usable(left) {
                return Leaf::Term(AttributeTerm {
                    path,
                    operator: reversed,
                    value: (**left).clone(),
                });
            }
        }
    }
    Leaf::Opaque
}

/// Terms of `conjunction` an index can answer, `None` if it answers none
pub fn match_index(index: &IndexDescriptor, conjunction: &[AttributeTerm]) -> Option<Vec<AttributeTerm>> {
    let equality = |field: &str| {
        conjunction.iter().find(|term| {
            term.field() == field && matches!(term.operator, TermOperator::Eq | TermOperator::In)
        })
    };

    let matched: Vec<AttributeTerm> = match index.index_type {
        IndexType::Edge => ["_from", "_to"]
            .iter()
            .find_map(|field| equality(field))
            .cloned()
            .into_iter()
            .collect(),
        IndexType::Primary | IndexType::Persistent => {
            let mut matched = Vec::new();
            for field in &index.fields {
                if let Some(term) = equality(field) {
                    matched.push(term.clone());
                    continue;
                }
                let lower = conjunction.iter().find(|term| {
                    term.field() == *field
                        && matches!(term.operator, TermOperator::Gt | TermOperator::Ge)
                });
                let upper = conjunction.iter().find(|term| {
                    term.field() == *field
                        && matches!(term.operator, TermOperator::Lt | TermOperator::Le)
                });
                matched.extend(lower.into_iter().chain(upper).cloned());
                break;
            }
            matched
        }
        IndexType::Fulltext | IndexType::Geo => Vec::new(),
    };

    if matched.is_empty() {
        return None;
    }
    if index.sparse && matched.iter().any(AttributeTerm::could_match_null) {
        return None;
    }
    Some(matched)
}

/// Estimated number of documents one index lookup returns per input row
pub fn estimate_lookup_items(
    index: &IndexDescriptor,
    terms: &[AttributeTerm],
    count: u64,
    model: &CostModel,
) -> f64 {
    let count = count as f64;
    if terms.is_empty() {
        return count;
    }

    let equality_fields: BTreeSet<String> = terms
        .iter()
        .filter(|term| !term.operator.is_range())
        .map(AttributeTerm::field)
        .collect();
    let has_range = terms.iter().any(|term| term.operator.is_range());
    let multiplier: f64 = terms
        .iter()
        .filter(|term| term.operator == TermOperator::In)
        .map(|term| term.in_cardinality(model))
        .product();

    let fields = index.fields.len().max(1) as f64;
    let full_equality = !has_range && index.fields.iter().all(|f| equality_fields.contains(f));

    let items = if index.index_type == IndexType::Edge {
        count * index.selectivity_estimate * multiplier
    } else if index.unique && full_equality {
        multiplier
    } else {
        let k = equality_fields.len() as f64;
        let mut items = count * index.selectivity_estimate.powf(k / fields) * multiplier;
        if has_range {
            items *= model.range_selectivity;
        }
        items
    };
    items.min(count)
}

/// Best index for one conjunction: the fewest estimated items, ties broken
/// by declaration order
pub fn select_index(
    indexes: &[IndexDescriptor],
    conjunction: &[AttributeTerm],
    count: u64,
    model: &CostModel,
) -> Option<(IndexDescriptor, Vec<AttributeTerm>, f64)> {
    let mut best: Option<(IndexDescriptor, Vec<AttributeTerm>, f64)> = None;
    for index in indexes {
        let Some(terms) = match_index(index, conjunction) else {
            continue;
        };
        let items = estimate_lookup_items(index, &terms, count, model);
        if best.as_ref().map_or(true, |(_, _, best_items)| items < *best_items) {
            best = Some((index.clone(), terms, items));
        }
    }
    best
}

/// Whether `index` returns documents ordered by `sort_paths`, given the
/// fields bound by equality lookups
pub fn supports_sort(
    index: &IndexDescriptor,
    equality_bound: &[Vec<String>],
    sort_paths: &[Vec<String>],
) -> bool {
    if index.index_type != IndexType::Persistent || sort_paths.is_empty() {
        return false;
    }
    // a sparse index misses documents without the attribute
    if index.sparse && equality_bound.is_empty() {
        return false;
    }
    let fields = index.field_paths();
    let remaining: Vec<&Vec<String>> = fields
        .iter()
        .skip_while(|field| equality_bound.contains(field))
        .collect();
    remaining.len() >= sort_paths.len()
        && remaining
            .iter()
            .zip(sort_paths)
            .all(|(field, path)| *field == path)
}

/// Fulltext index over exactly `attribute`
pub fn find_fulltext_index<'a>(
    indexes: &'a [IndexDescriptor],
    attribute: &str,
) -> Option<&'a IndexDescriptor> {
    indexes.iter().find(|index| {
        index.index_type == IndexType::Fulltext && index.fields.len() == 1 && index.fields[0] == attribute
    })
}
