//! Placeholder matching
//!
//! Each placeholder name maps to a [`PlaceholderRule`]: a predicate on the
//! candidate node the placeholder is compared against, and how many tokens
//! it may stand for in a leaf sequence. Rules are plain data, loaded from
//! configuration, so a new placeholder kind is one more table entry.

use std::collections::BTreeMap;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::kind::{NodeKind, PlaceholderNames, classify};
use crate::tree::NodeRef;

/// Default label of the candidate node an empty-side marker matches
pub const DEFAULT_EMPTY_LABEL: &str = "multipleStatements";

/// Condition a candidate node must satisfy to match a placeholder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CandidatePredicate {
    /// The candidate has a parent labelled with one of `labels`
    ParentLabel { labels: Vec<String> },
    /// The candidate has no children
    Leaf,
    /// The candidate itself is labelled with one of `labels`
    Label { labels: Vec<String> },
}

impl CandidatePredicate {
    pub fn holds(&self, candidate: NodeRef<'_>) -> bool {
        match self {
            CandidatePredicate::ParentLabel { labels } => candidate
                .parent()
                .is_some_and(|parent| labels.iter().any(|l| l == parent.label())),
            CandidatePredicate::Leaf => candidate.is_leaf(),
            CandidatePredicate::Label { labels } => {
                labels.iter().any(|l| l == candidate.label())
            }
        }
    }
}

/// How many candidate tokens a placeholder covers in a leaf sequence
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeafSpan {
    /// Exactly one token
    #[default]
    Single,
    /// One or more tokens (a whole subtree)
    Subtree,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceholderRule {
    pub predicate: CandidatePredicate,
    #[serde(default)]
    pub span: LeafSpan,
}

impl PlaceholderRule {
    pub fn new(predicate: CandidatePredicate, span: LeafSpan) -> Self {
        Self { predicate, span }
    }
}

fn labels(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

/// Rules for the built-in placeholder names
pub fn default_rules() -> BTreeMap<String, PlaceholderRule> {
    let mut rules = BTreeMap::new();
    rules.insert(
        "LT".to_string(),
        PlaceholderRule::new(
            CandidatePredicate::ParentLabel {
                labels: labels(&["literal"]),
            },
            LeafSpan::Single,
        ),
    );
    rules.insert(
        "ID".to_string(),
        PlaceholderRule::new(CandidatePredicate::Leaf, LeafSpan::Single),
    );
    rules.insert(
        "binOP".to_string(),
        PlaceholderRule::new(
            CandidatePredicate::Label {
                labels: labels(&["binary_operators"]),
            },
            LeafSpan::Single,
        ),
    );
    // like binOP, OP stands in for the operator node itself
    rules.insert(
        "OP".to_string(),
        PlaceholderRule::new(
            CandidatePredicate::Label {
                labels: labels(&["binary_operators", "assign_operators"]),
            },
            LeafSpan::Single,
        ),
    );
    rules.insert(
        "EXPR".to_string(),
        PlaceholderRule::new(
            CandidatePredicate::Label {
                labels: labels(&["expression"]),
            },
            LeafSpan::Subtree,
        ),
    );
    rules
}

/// Validated placeholder dispatch table
#[derive(Debug, Clone)]
pub struct PlaceholderTable {
    names: PlaceholderNames,
    rules: FxHashMap<String, PlaceholderRule>,
    empty_label: String,
}

impl PlaceholderTable {
    /// Build a table, checking that every name has a rule
    ///
    /// Rules for names outside `names` are ignored.
    pub fn new(
        names: &[String],
        rules: &BTreeMap<String, PlaceholderRule>,
        empty_label: &str,
    ) -> Result<Self, ConfigError> {
        let mut table = FxHashMap::default();
        for name in names {
            if name.is_empty() || name.contains(['<', '>']) || name.chars().any(char::is_whitespace)
            {
                return Err(ConfigError::InvalidPlaceholderName(name.clone()));
            }
            let Some(rule) = rules.get(name) else {
                return Err(ConfigError::UnknownPlaceholderKind(name.clone()));
            };
            table.insert(name.clone(), rule.clone());
        }

        Ok(Self {
            names: PlaceholderNames::new(names.iter().cloned()),
            rules: table,
            empty_label: empty_label.to_string(),
        })
    }

    pub fn names(&self) -> &PlaceholderNames {
        &self.names
    }

    pub fn rule(&self, name: &str) -> Option<&PlaceholderRule> {
        self.rules.get(name)
    }

    pub fn empty_label(&self) -> &str {
        &self.empty_label
    }

    /// Classify a query node against this table's names
    pub fn classify<'a>(&self, node: NodeRef<'a>) -> NodeKind<'a> {
        classify(node, &self.names)
    }

    /// Whether `candidate` can stand where the placeholder `query` is
    ///
    /// False when `query` is not a placeholder.
    pub fn matches_placeholder(&self, query: NodeRef<'_>, candidate: NodeRef<'_>) -> bool {
        match self.classify(query).placeholder_name() {
            Some(name) => self.rule_holds(name, candidate),
            None => false,
        }
    }

    pub(crate) fn rule_holds(&self, name: &str, candidate: NodeRef<'_>) -> bool {
        self.rules
            .get(name)
            .is_some_and(|rule| rule.predicate.holds(candidate))
    }

    /// Whether an empty-side marker in the query matches `candidate`
    pub fn matches_empty(&self, query: NodeRef<'_>, candidate: NodeRef<'_>) -> bool {
        self.classify(query) == NodeKind::Empty
            && candidate.is_leaf()
            && candidate.label() == self.empty_label
    }
}

impl Default for PlaceholderTable {
    fn default() -> Self {
        let names = PlaceholderNames::default();
        let mut rules = FxHashMap::default();
        for (name, rule) in default_rules() {
            rules.insert(name, rule);
        }
        Self {
            names,
            rules,
            empty_label: DEFAULT_EMPTY_LABEL.to_string(),
        }
    }
}
