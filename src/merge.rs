//! Conflict resolution: pure field-level merge of two divergent views.
//!
//! Policy: non-overlapping fields from both views are unioned; a field one
//! system is configured as authoritative for always takes that system's
//! value; genuinely overlapping fields take the more recently fetched side,
//! ties broken in favor of System A for reproducibility. No I/O, no side
//! effects: identical inputs always produce identical output and report.

use crate::external::FetchedView;
use crate::types::{Payload, SourceSystem};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

/// Which system owns a field category exclusively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorityRule {
    SystemA,
    SystemB,
}

impl AuthorityRule {
    fn source(&self) -> SourceSystem {
        match self {
            AuthorityRule::SystemA => SourceSystem::SystemA,
            AuthorityRule::SystemB => SourceSystem::SystemB,
        }
    }
}

/// Per-field authority assignments.
///
/// Fields not listed fall back to the recency rule. An empty map is valid
/// and means recency-only; authority for a given deployment is an explicit
/// configuration question, never a hidden default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MergeAuthority {
    rules: BTreeMap<String, AuthorityRule>,
}

impl MergeAuthority {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assign(mut self, field: impl Into<String>, rule: AuthorityRule) -> Self {
        self.rules.insert(field.into(), rule);
        self
    }

    pub fn rule_for(&self, field: &str) -> Option<AuthorityRule> {
        self.rules.get(field).copied()
    }
}

/// Why a particular side won a contested field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    /// The winning system is configured as authoritative for this field.
    Authority,
    /// The winning side was fetched more recently.
    MoreRecent,
    /// Fetch timestamps tied; System A wins for reproducibility.
    TieBreak,
}

/// One contested field and which side won it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDecision {
    pub field: String,
    pub winner: SourceSystem,
    pub reason: DecisionReason,
}

/// Structured record of merge choices for one context.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConflictReport {
    /// Fields where a choice between sides was made, in field order.
    pub decisions: Vec<FieldDecision>,
    /// Set when one side was unavailable and the merge proceeded with the
    /// other (partial sync).
    pub missing_side: Option<SourceSystem>,
}

impl ConflictReport {
    pub fn is_clean(&self) -> bool {
        self.decisions.is_empty() && self.missing_side.is_none()
    }
}

/// Merge two system views over an optional committed base.
///
/// Field-level when all payloads are JSON objects; otherwise the whole
/// payload is resolved as a single pseudo-field `$`. With only one side
/// available, that side's fields overlay the base and the report records the
/// missing side; no A-versus-B decisions are made.
pub fn merge(
    base: Option<&Payload>,
    view_a: Option<&FetchedView>,
    view_b: Option<&FetchedView>,
    authority: &MergeAuthority,
) -> (Payload, ConflictReport) {
    match (view_a, view_b) {
        (Some(a), Some(b)) => merge_both(base, a, b, authority),
        (Some(a), None) => (
            overlay(base, &a.payload),
            ConflictReport {
                decisions: Vec::new(),
                missing_side: Some(SourceSystem::SystemB),
            },
        ),
        (None, Some(b)) => (
            overlay(base, &b.payload),
            ConflictReport {
                decisions: Vec::new(),
                missing_side: Some(SourceSystem::SystemA),
            },
        ),
        (None, None) => (
            base.cloned().unwrap_or_else(|| Payload::new(Value::Null)),
            ConflictReport::default(),
        ),
    }
}

fn merge_both(
    base: Option<&Payload>,
    view_a: &FetchedView,
    view_b: &FetchedView,
    authority: &MergeAuthority,
) -> (Payload, ConflictReport) {
    let fields_a = view_a.payload.fields();
    let fields_b = view_b.payload.fields();

    let (fields_a, fields_b) = match (fields_a, fields_b) {
        (Some(a), Some(b)) => (a, b),
        // Non-object payload on either side: resolve the whole value.
        _ => {
            let mut report = ConflictReport::default();
            let payload = if view_a.payload == view_b.payload {
                view_a.payload.clone()
            } else {
                let (winner, reason) = pick_winner("$", view_a, view_b, authority);
                report.decisions.push(FieldDecision {
                    field: "$".to_string(),
                    winner,
                    reason,
                });
                if winner == SourceSystem::SystemA {
                    view_a.payload.clone()
                } else {
                    view_b.payload.clone()
                }
            };
            return (payload, report);
        }
    };

    let mut merged: Map<String, Value> = base
        .and_then(|p| p.fields())
        .cloned()
        .unwrap_or_default();
    let mut report = ConflictReport::default();

    let keys: BTreeSet<&String> = fields_a.keys().chain(fields_b.keys()).collect();
    for key in keys {
        match (fields_a.get(key.as_str()), fields_b.get(key.as_str())) {
            (Some(a_val), None) => {
                merged.insert(key.clone(), a_val.clone());
            }
            (None, Some(b_val)) => {
                merged.insert(key.clone(), b_val.clone());
            }
            (Some(a_val), Some(b_val)) if a_val == b_val => {
                merged.insert(key.clone(), a_val.clone());
            }
            (Some(a_val), Some(b_val)) => {
                let (winner, reason) = pick_winner(key, view_a, view_b, authority);
                let value = if winner == SourceSystem::SystemA {
                    a_val.clone()
                } else {
                    b_val.clone()
                };
                merged.insert(key.clone(), value);
                report.decisions.push(FieldDecision {
                    field: key.clone(),
                    winner,
                    reason,
                });
            }
            (None, None) => unreachable!("key drawn from union of both maps"),
        }
    }

    (Payload::new(Value::Object(merged)), report)
}

fn pick_winner(
    field: &str,
    view_a: &FetchedView,
    view_b: &FetchedView,
    authority: &MergeAuthority,
) -> (SourceSystem, DecisionReason) {
    if let Some(rule) = authority.rule_for(field) {
        return (rule.source(), DecisionReason::Authority);
    }
    if view_b.fetched_at > view_a.fetched_at {
        (SourceSystem::SystemB, DecisionReason::MoreRecent)
    } else if view_a.fetched_at > view_b.fetched_at {
        (SourceSystem::SystemA, DecisionReason::MoreRecent)
    } else {
        (SourceSystem::SystemA, DecisionReason::TieBreak)
    }
}

/// Overlay one side's fields onto the base (single-side pass).
fn overlay(base: Option<&Payload>, side: &Payload) -> Payload {
    match (base.and_then(|p| p.fields()), side.fields()) {
        (Some(base_fields), Some(side_fields)) => {
            let mut merged = base_fields.clone();
            for (key, value) in side_fields {
                merged.insert(key.clone(), value.clone());
            }
            Payload::new(Value::Object(merged))
        }
        _ => side.clone(),
    }
}
