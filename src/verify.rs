//! Leaf-sequence verification
//!
//! Final literal-level check after the structural match. Both the query and
//! the candidate are flattened to their token texts, split at the change
//! delimiter, and the old and new sequences are aligned position by position.

use crate::change::is_formatting;
use crate::kind::{NodeKind, classify_token};
use crate::placeholder::{LeafSpan, PlaceholderTable};
use crate::tree::Tree;

/// Split a flat token list at the first delimiter
///
/// Everything before the delimiter is the old side, everything after it the
/// new side. Without a delimiter the whole list is the old side.
pub fn split_at_delimiter<'a, S: AsRef<str>>(
    leaves: &'a [S],
    delimiter: &str,
) -> (&'a [S], &'a [S]) {
    match leaves.iter().position(|leaf| leaf.as_ref() == delimiter) {
        Some(at) => (&leaves[..at], &leaves[at + 1..]),
        None => (leaves, &[]),
    }
}

/// Token texts of both sides of one change
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeafSequences {
    pub old: Vec<String>,
    pub new: Vec<String>,
}

impl LeafSequences {
    /// Collect the non-formatting tokens of a change tree and split them
    pub fn from_tree(tree: &Tree, delimiter: &str) -> Self {
        let leaves: Vec<String> = tree
            .root()
            .map(|root| {
                root.tokens()
                    .filter(|leaf| !is_formatting(*leaf))
                    .map(|leaf| leaf.label().to_string())
                    .collect()
            })
            .unwrap_or_default();

        let (old, new) = split_at_delimiter(&leaves, delimiter);
        Self {
            old: old.to_vec(),
            new: new.to_vec(),
        }
    }

    /// Old and new sides are token-for-token identical
    pub fn is_unchanged(&self) -> bool {
        self.old == self.new
    }
}

/// Literal-level agreement between query and candidate token sequences
pub trait LeafVerifier: Send + Sync {
    fn leaves_match(
        &self,
        query_old: &[String],
        query_new: &[String],
        candidate_old: &[String],
        candidate_new: &[String],
    ) -> bool;
}

/// Positional alignment with placeholder holes
///
/// Ordinary query tokens must equal the candidate token at the same aligned
/// position. Placeholders, wildcards and the empty marker are holes:
/// single-token placeholders take one token, subtree placeholders one or
/// more, `<...>` any number and `_` none. A numbered placeholder binds what
/// it takes, and every other occurrence of the same placeholder on either
/// side must take the same tokens.
#[derive(Debug, Clone, Default)]
pub struct PositionalLeafVerifier {
    placeholders: PlaceholderTable,
}

impl PositionalLeafVerifier {
    pub fn new(placeholders: PlaceholderTable) -> Self {
        Self { placeholders }
    }

    fn slots<'q>(&self, tokens: &'q [String]) -> Vec<Slot<'q>> {
        tokens
            .iter()
            .map(|token| {
                let text = token.as_str();
                let kind = classify_token(text, self.placeholders.names());
                let span = |name: &str| {
                    self.placeholders
                        .rule(name)
                        .map_or(LeafSpan::Single, |rule| rule.span)
                };
                match kind {
                    NodeKind::Normal => Slot::Literal(text),
                    NodeKind::Wildcard => Slot::Hole {
                        binding: None,
                        min: 0,
                        max: None,
                    },
                    NodeKind::Empty => Slot::Hole {
                        binding: None,
                        min: 0,
                        max: Some(0),
                    },
                    NodeKind::UnnamedPlaceholder(name) => Slot::hole(None, span(name)),
                    NodeKind::NamedPlaceholder(name, _) => Slot::hole(Some(text), span(name)),
                }
            })
            .collect()
    }
}

impl LeafVerifier for PositionalLeafVerifier {
    fn leaves_match(
        &self,
        query_old: &[String],
        query_new: &[String],
        candidate_old: &[String],
        candidate_new: &[String],
    ) -> bool {
        let old_slots = self.slots(query_old);
        let new_slots = self.slots(query_new);
        let alignment = Alignment {
            sides: [
                Side::new(&old_slots, candidate_old),
                Side::new(&new_slots, candidate_new),
            ],
        };
        alignment.walk(0, 0, 0, &mut Vec::new())
    }
}

/// Exact positional equality, ignoring placeholders entirely
#[derive(Debug, Clone, Copy, Default)]
pub struct LiteralLeafVerifier;

impl LeafVerifier for LiteralLeafVerifier {
    fn leaves_match(
        &self,
        query_old: &[String],
        query_new: &[String],
        candidate_old: &[String],
        candidate_new: &[String],
    ) -> bool {
        query_old == candidate_old && query_new == candidate_new
    }
}

#[derive(Debug, Clone, Copy)]
enum Slot<'q> {
    Literal(&'q str),
    Hole {
        /// Full placeholder text (`ID<1>`) for numbered placeholders
        binding: Option<&'q str>,
        min: usize,
        max: Option<usize>,
    },
}

impl<'q> Slot<'q> {
    fn hole(binding: Option<&'q str>, span: LeafSpan) -> Self {
        match span {
            LeafSpan::Single => Slot::Hole {
                binding,
                min: 1,
                max: Some(1),
            },
            LeafSpan::Subtree => Slot::Hole {
                binding,
                min: 1,
                max: None,
            },
        }
    }

    fn min(&self) -> usize {
        match *self {
            Slot::Literal(_) => 1,
            Slot::Hole { min, .. } => min,
        }
    }
}

struct Side<'a, 'q> {
    slots: &'a [Slot<'q>],
    tokens: &'a [String],
    /// Minimum number of tokens needed by `slots[i..]`
    min_suffix: Vec<usize>,
}

impl<'a, 'q> Side<'a, 'q> {
    fn new(slots: &'a [Slot<'q>], tokens: &'a [String]) -> Self {
        let mut min_suffix = vec![0; slots.len() + 1];
        for i in (0..slots.len()).rev() {
            min_suffix[i] = min_suffix[i + 1] + slots[i].min();
        }
        Self {
            slots,
            tokens,
            min_suffix,
        }
    }
}

struct Alignment<'a, 'q> {
    sides: [Side<'a, 'q>; 2],
}

type Bindings<'a, 'q> = Vec<(&'q str, &'a [String])>;

impl<'a, 'q> Alignment<'a, 'q> {
    fn walk(&self, side: usize, slot: usize, pos: usize, bindings: &mut Bindings<'a, 'q>) -> bool {
        let Some(current) = self.sides.get(side) else {
            return true;
        };
        let tokens = current.tokens;

        if tokens.len() - pos < current.min_suffix[slot] {
            return false;
        }
        let Some(&next) = current.slots.get(slot) else {
            return pos == tokens.len() && self.walk(side + 1, 0, 0, bindings);
        };

        match next {
            Slot::Literal(text) => {
                tokens[pos] == text && self.walk(side, slot + 1, pos + 1, bindings)
            }
            Slot::Hole { binding, min, max } => {
                let available = tokens.len() - pos - current.min_suffix[slot + 1];
                let upper = max.map_or(available, |m| m.min(available));

                for take in min..=upper {
                    let span = &tokens[pos..pos + take];
                    let Some(key) = binding else {
                        if self.walk(side, slot + 1, pos + take, bindings) {
                            return true;
                        }
                        continue;
                    };

                    match bindings.iter().find(|(k, _)| *k == key) {
                        Some(&(_, bound)) => {
                            if bound == span && self.walk(side, slot + 1, pos + take, bindings) {
                                return true;
                            }
                        }
                        None => {
                            bindings.push((key, span));
                            if self.walk(side, slot + 1, pos + take, bindings) {
                                return true;
                            }
                            bindings.pop();
                        }
                    }
                }
                false
            }
        }
    }
}
