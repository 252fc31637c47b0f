//! Deep tree comparison
//!
//! Top-down, single-pass structural match of a query tree against a
//! candidate tree. The query node's kind drives each step:
//!
//! - `Wildcard` matches any candidate subtree
//! - `Empty` and placeholders are decided by the [`PlaceholderTable`]
//! - a childless `Normal` node must equal the candidate's text
//! - any other node needs the same category and arity, then every child
//!   pair must match in order
//!
//! There is no backtracking: the first failing child fails the node.

use std::fmt::Write as _;

use crate::change::ChangePattern;
use crate::kind::NodeKind;
use crate::placeholder::PlaceholderTable;
use crate::tree::{NodeId, NodeRef, Tree};

/// Why a comparison step succeeded or failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceReason {
    Wildcard,
    Empty,
    Placeholder,
    /// Childless query node compared by text
    Literal,
    CategoryMismatch,
    ArityMismatch,
    /// The child at this index did not match
    ChildMismatch(usize),
    /// All children matched
    Matched,
}

/// One comparison decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceEntry {
    pub query: NodeId,
    pub candidate: NodeId,
    pub outcome: bool,
    pub reason: TraceReason,
}

/// Receiver for comparison decisions
///
/// `()` discards them, [`MatchTrace`] keeps them.
pub trait TraceSink {
    fn record(&mut self, entry: TraceEntry);
}

impl TraceSink for () {
    #[inline]
    fn record(&mut self, _entry: TraceEntry) {}
}

/// Append-only log of comparison decisions, innermost first
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchTrace {
    entries: Vec<TraceEntry>,
}

impl TraceSink for MatchTrace {
    fn record(&mut self, entry: TraceEntry) {
        self.entries.push(entry);
    }
}

impl MatchTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[TraceEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Failed decisions, innermost first
    pub fn failures(&self) -> impl Iterator<Item = &TraceEntry> {
        self.entries.iter().filter(|e| !e.outcome)
    }

    /// The innermost failure, which explains why a comparison failed
    pub fn first_failure(&self) -> Option<&TraceEntry> {
        self.failures().next()
    }

    /// One line per decision, with node labels looked up in both trees
    pub fn render(&self, query: &Tree, candidate: &Tree) -> String {
        let label = |tree: &Tree, id: NodeId| {
            tree.node(id)
                .map(|n| n.label().to_string())
                .unwrap_or_default()
        };
        let mut out = String::new();
        for entry in &self.entries {
            let _ = writeln!(
                out,
                "{} {:?} query#{} {:?} ~ candidate#{} {:?}",
                if entry.outcome { "ok  " } else { "FAIL" },
                entry.reason,
                entry.query,
                label(query, entry.query),
                entry.candidate,
                label(candidate, entry.candidate),
            );
        }
        out
    }
}

/// Structural matcher parameterised by a placeholder table
#[derive(Debug, Clone, Default)]
pub struct Matcher {
    placeholders: PlaceholderTable,
}

impl Matcher {
    pub fn new(placeholders: PlaceholderTable) -> Self {
        Self { placeholders }
    }

    pub fn placeholders(&self) -> &PlaceholderTable {
        &self.placeholders
    }

    /// Whether the candidate subtree matches the query subtree
    ///
    /// Every call records one entry in `trace` before returning.
    pub fn structurally_equal<T: TraceSink>(
        &self,
        query: NodeRef<'_>,
        candidate: NodeRef<'_>,
        trace: &mut T,
    ) -> bool {
        let (outcome, reason) = self.compare(query, candidate, trace);
        trace.record(TraceEntry {
            query: query.id(),
            candidate: candidate.id(),
            outcome,
            reason,
        });
        outcome
    }

    fn compare<T: TraceSink>(
        &self,
        query: NodeRef<'_>,
        candidate: NodeRef<'_>,
        trace: &mut T,
    ) -> (bool, TraceReason) {
        match self.placeholders.classify(query) {
            NodeKind::Wildcard => (true, TraceReason::Wildcard),
            NodeKind::Empty => (
                self.placeholders.matches_empty(query, candidate),
                TraceReason::Empty,
            ),
            NodeKind::UnnamedPlaceholder(name) | NodeKind::NamedPlaceholder(name, _) => (
                self.placeholders.rule_holds(name, candidate),
                TraceReason::Placeholder,
            ),
            NodeKind::Normal if query.is_leaf() => (
                candidate.is_leaf()
                    && query.same_category(candidate)
                    && query.label() == candidate.label(),
                TraceReason::Literal,
            ),
            NodeKind::Normal => {
                if !query.same_category(candidate) {
                    return (false, TraceReason::CategoryMismatch);
                }
                if query.child_count() != candidate.child_count() {
                    return (false, TraceReason::ArityMismatch);
                }
                for (i, (q, c)) in query.children().zip(candidate.children()).enumerate() {
                    if !self.structurally_equal(q, c, trace) {
                        return (false, TraceReason::ChildMismatch(i));
                    }
                }
                (true, TraceReason::Matched)
            }
        }
    }

    /// Match both sides of a change: old against old, then new against new
    pub fn matches_change<T: TraceSink>(
        &self,
        query: &ChangePattern,
        candidate: &ChangePattern,
        trace: &mut T,
    ) -> bool {
        self.structurally_equal(query.old(), candidate.old(), trace)
            && self.structurally_equal(query.new(), candidate.new(), trace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::DEFAULT_DELIMITER;
    use crate::parser::PestChangeParser;
    use crate::tree::CategoryTable;
    use std::sync::Arc;

    fn sexpr(input: &str) -> Tree {
        Tree::from_sexpr(input, Arc::new(CategoryTable::new())).unwrap()
    }

    fn change(source: &str) -> ChangePattern {
        ChangePattern::parse(&PestChangeParser::new(), source, DEFAULT_DELIMITER).unwrap()
    }

    fn equal(query: &Tree, candidate: &Tree) -> (bool, MatchTrace) {
        let mut trace = MatchTrace::new();
        let matched = Matcher::default().structurally_equal(
            query.root().unwrap(),
            candidate.root().unwrap(),
            &mut trace,
        );
        (matched, trace)
    }

    #[test]
    fn test_identical_trees_match() {
        let a = sexpr("(call (name foo) (args (lit 1) (name x)))");
        let b = sexpr("(call (name foo) (args (lit 1) (name x)))");
        let (matched, trace) = equal(&a, &b);
        assert!(matched);
        // one entry per query node
        assert_eq!(trace.len(), a.len());
        assert!(trace.first_failure().is_none());
    }

    #[test]
    fn test_wildcard_absorbs_subtrees() {
        let query = sexpr("(call (name foo) <...>)");
        for candidate in [
            "(call (name foo) x)",
            "(call (name foo) (args (lit 1) (name x) (call (name g))))",
        ] {
            let (matched, trace) = equal(&query, &sexpr(candidate));
            assert!(matched, "{candidate}");
            assert!(trace.entries().iter().any(|e| e.reason == TraceReason::Wildcard));
        }
    }

    #[test]
    fn test_arity_mismatch() {
        let query = sexpr("(args (name x) (lit 1))");
        let candidate = sexpr("(args (name x) (lit 1) (lit 2))");
        let (matched, trace) = equal(&query, &candidate);
        assert!(!matched);
        assert_eq!(trace.len(), 1);
        assert_eq!(trace.entries()[0].reason, TraceReason::ArityMismatch);
    }

    #[test]
    fn test_category_mismatch() {
        let query = sexpr("(args (name x))");
        let candidate = sexpr("(args (lit x))");
        let (matched, trace) = equal(&query, &candidate);
        assert!(!matched);
        let failure = trace.first_failure().unwrap();
        assert_eq!(failure.reason, TraceReason::CategoryMismatch);
        assert_eq!(trace.entries().last().unwrap().reason, TraceReason::ChildMismatch(0));
    }

    #[test]
    fn test_literal_mismatch_fails_fast() {
        let query = sexpr("(args (name x) (name y))");
        let candidate = sexpr("(args (name z) (name y))");
        let (matched, trace) = equal(&query, &candidate);
        assert!(!matched);
        // leaf x, then name, then args; the second child is never visited
        assert_eq!(trace.len(), 3);
        assert_eq!(trace.entries()[0].reason, TraceReason::Literal);
        assert!(!trace.entries()[0].outcome);
    }

    #[test]
    fn test_leaf_needs_leaf_candidate() {
        let query = sexpr("(wrap x)");
        let candidate = sexpr("(wrap (x y))");
        let (matched, _) = equal(&query, &candidate);
        assert!(!matched);
    }

    #[test]
    fn test_placeholders_stop_recursion() {
        let query = change("ID<1>(ID<2>, LT<3>); -> ID<1>(LT<3>, ID<2>);");
        let candidate = change("foo(x, 42); -> foo(42, x);");
        let mut trace = MatchTrace::new();
        assert!(Matcher::default().matches_change(&query, &candidate, &mut trace));
        let placeholders = trace
            .entries()
            .iter()
            .filter(|e| e.reason == TraceReason::Placeholder)
            .count();
        assert_eq!(placeholders, 6);
    }

    #[test]
    fn test_placeholder_category_still_checked() {
        // LT<3> sits under a literal; the candidate has an identifier there
        let query = change("foo(LT<3>); -> foo();");
        let candidate = change("foo(x); -> foo();");
        let mut trace = MatchTrace::new();
        assert!(!Matcher::default().matches_change(&query, &candidate, &mut trace));
        assert_eq!(
            trace.first_failure().unwrap().reason,
            TraceReason::CategoryMismatch
        );
    }

    #[test]
    fn test_operator_placeholders_line_up() {
        let matcher = Matcher::default();
        let assign = change("x = y; -> x += y;");
        let binary = change("x + y; -> x - y;");

        let any_op = change("x OP y; -> x OP y;");
        assert!(matcher.matches_change(&any_op, &assign, &mut ()));
        assert!(matcher.matches_change(&any_op, &binary, &mut ()));

        let bin_op = change("x binOP y; -> x binOP y;");
        assert!(matcher.matches_change(&bin_op, &binary, &mut ()));
        let mut trace = MatchTrace::new();
        assert!(!matcher.matches_change(&bin_op, &assign, &mut trace));
        assert_eq!(trace.first_failure().unwrap().reason, TraceReason::Placeholder);
    }

    #[test]
    fn test_expr_covers_operands() {
        let matcher = Matcher::default();
        let query = change("EXPR + 1; -> EXPR;");
        assert!(matcher.matches_change(&query, &change("a.size() + 1; -> a.size();"), &mut ()));
        assert!(matcher.matches_change(&query, &change("(a - b) + 1; -> a - b;"), &mut ()));
        assert!(!matcher.matches_change(&query, &change("a + 2 + 1; -> a;"), &mut ()));
    }

    #[test]
    fn test_wildcard_argument_list() {
        let matcher = Matcher::default();
        let query = change("foo(<...>); -> bar();");
        for candidate in ["foo(a, b + 1); -> bar();", "foo(); -> bar();", "foo(x); -> bar();"] {
            assert!(matcher.matches_change(&query, &change(candidate), &mut ()), "{candidate}");
        }
        assert!(!matcher.matches_change(&query, &change("foo(a); -> bar(a);"), &mut ()));
    }

    #[test]
    fn test_empty_marker() {
        let matcher = Matcher::default();
        let query = change("_ -> foo();");
        assert!(matcher.matches_change(&query, &change(" -> foo();"), &mut ()));
        assert!(!matcher.matches_change(&query, &change("bar(); -> foo();"), &mut ()));
    }

    #[test]
    fn test_matches_change_checks_both_sides() {
        let matcher = Matcher::default();
        let query = change("foo(ID); -> bar(ID);");
        assert!(matcher.matches_change(&query, &change("foo(a); -> bar(b);"), &mut ()));
        assert!(!matcher.matches_change(&query, &change("foo(a); -> baz(b);"), &mut ()));
        assert!(!matcher.matches_change(&query, &change("foo(a, c); -> bar(b);"), &mut ()));
    }

    #[test]
    fn test_render() {
        let query = sexpr("(args (name x))");
        let candidate = sexpr("(args (name y))");
        let (_, trace) = equal(&query, &candidate);
        let rendered = trace.render(&query, &candidate);
        assert_eq!(rendered.lines().count(), trace.len());
        assert!(rendered.starts_with("FAIL Literal query#2 \"x\" ~ candidate#2 \"y\""));
    }
}
