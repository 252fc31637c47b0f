//! Change parser
//!
//! Parses "old -> new" change strings into syntax trees using a pest grammar.
//! The pipeline only depends on the [`ChangeParser`] trait, so another
//! grammar or an out-of-process parser can be plugged in per language.

use std::sync::Arc;

use pest::Parser;
use pest::iterators::Pair;
use pest_derive::Parser;
use thiserror::Error;

use crate::change::DEFAULT_DELIMITER;
use crate::tree::{CategoryTable, NodeId, Tree, TreeError};

#[derive(Parser)]
#[grammar = "change.pest"]
struct ChangeGrammar;

/// Error type for parse failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("syntax error: {0}")]
    Syntax(String),
    #[error("parser produced no tree")]
    Empty,
    #[error("change has no `{0}` delimiter")]
    MissingDelimiter(String),
    #[error("change has no {0} side")]
    MissingSide(&'static str),
    #[error(transparent)]
    Tree(#[from] TreeError),
}

impl From<pest::error::Error<Rule>> for ParseError {
    fn from(err: pest::error::Error<Rule>) -> Self {
        ParseError::Syntax(err.to_string())
    }
}

/// Boundary to whatever turns change text into a syntax tree
///
/// Implementations must be usable from several worker threads at once.
/// Category names are available through the returned tree's
/// [`CategoryTable`].
pub trait ChangeParser: Send + Sync {
    /// Source language handled by this parser
    fn language(&self) -> &str;

    /// Token that separates the old side from the new side
    fn delimiter(&self) -> &str;

    /// Parse one change string into a tree
    fn parse(&self, source: &str) -> Result<Tree, ParseError>;
}

/// Grammar-driven parser for Java-like change snippets
///
/// Internal nodes are named after grammar rules (`expression`, `literal`,
/// `binary_operators`, `multipleStatements`, ...); punctuation, keywords,
/// the delimiter and query tokens become leaves. Operands of a binary
/// chain are `expression` nodes, so `a + b` reads as
/// `(expression (expression ..) (binary_operators +) (expression ..))`.
#[derive(Debug, Clone, Default)]
pub struct PestChangeParser {
    categories: Arc<CategoryTable>,
}

impl PestChangeParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a parser that interns categories into an existing table
    pub fn with_categories(categories: Arc<CategoryTable>) -> Self {
        Self { categories }
    }

    pub fn categories(&self) -> &Arc<CategoryTable> {
        &self.categories
    }
}

impl ChangeParser for PestChangeParser {
    fn language(&self) -> &str {
        "java"
    }

    fn delimiter(&self) -> &str {
        DEFAULT_DELIMITER
    }

    fn parse(&self, source: &str) -> Result<Tree, ParseError> {
        let mut pairs = ChangeGrammar::parse(Rule::change, source)?;

        let Some(change) = pairs.next() else {
            return Err(ParseError::Empty);
        };

        let mut tree = Tree::new(Arc::clone(&self.categories));
        add_pair(change, None, &mut tree)?;
        Ok(tree)
    }
}

/// Rules whose matched text is a single token
fn is_token(rule: Rule) -> bool {
    matches!(
        rule,
        Rule::line_break
            | Rule::arrow
            | Rule::wildcard
            | Rule::empty_marker
            | Rule::expr_placeholder
            | Rule::bin_op_placeholder
            | Rule::op_placeholder
            | Rule::lparen
            | Rule::rparen
            | Rule::lbrace
            | Rule::rbrace
            | Rule::lbracket
            | Rule::rbracket
            | Rule::semi
            | Rule::comma
            | Rule::colon
            | Rule::dot
            | Rule::kw_if
            | Rule::kw_else
            | Rule::kw_while
            | Rule::kw_for
            | Rule::kw_return
            | Rule::kw_throw
            | Rule::kw_break
            | Rule::kw_continue
            | Rule::kw_new
            | Rule::kw_this
    )
}

/// Add a pair and its descendants below `parent`
fn add_pair(pair: Pair<Rule>, parent: Option<NodeId>, tree: &mut Tree) -> Result<(), TreeError> {
    let rule = pair.as_rule();
    match rule {
        Rule::EOI => {}
        rule if is_token(rule) => {
            tree.add_leaf(pair.as_str(), parent)?;
        }
        _ => {
            // operands of a binary chain are expressions in their own right
            let name = match rule {
                Rule::operand => "expression".to_string(),
                rule => format!("{rule:?}"),
            };
            let id = tree.add_internal(&name, parent)?;
            let text = pair.as_str();
            let mut inner = pair.into_inner().peekable();

            // Atomic rules (identifiers, literals, operators) keep their
            // text as a single leaf child.
            if inner.peek().is_none() {
                if !text.is_empty() {
                    tree.add_leaf(text, Some(id))?;
                }
                return Ok(());
            }

            for child in inner {
                add_pair(child, Some(id), tree)?;
            }
        }
    }
    Ok(())
}
