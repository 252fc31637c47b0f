//! Change patterns
//!
//! A [`ChangePattern`] is one parsed "old -> new" unit: the tree produced by
//! the parser plus the ids of its two sides. Also holds the single-line codec
//! used by corpus files, where embedded newlines are stored as `$$`.

use crate::parser::{ChangeParser, ParseError};
use crate::tree::{NodeId, NodeRef, Tree};

/// Default token separating the old and new side of a change
pub const DEFAULT_DELIMITER: &str = "->";

/// Sentinel replacing newlines in single-line change storage
pub const NEWLINE_SENTINEL: &str = "$$";

/// Whether a node only carries layout (a line break or other whitespace token)
pub fn is_formatting(node: NodeRef<'_>) -> bool {
    node.is_token() && node.label().chars().all(char::is_whitespace)
}

/// A parsed code change with its old and new subtrees
#[derive(Debug, Clone)]
pub struct ChangePattern {
    tree: Tree,
    old: NodeId,
    new: NodeId,
}

impl ChangePattern {
    /// Split a parsed change tree into its two sides
    ///
    /// The root's children are scanned with formatting-only nodes skipped:
    /// the child before the delimiter token is the old side, the child after
    /// it the new side.
    pub fn from_tree(tree: Tree, delimiter: &str) -> Result<Self, ParseError> {
        let Some(root) = tree.root() else {
            return Err(ParseError::Empty);
        };

        let significant: Vec<NodeRef<'_>> = root
            .children()
            .filter(|child| !is_formatting(*child))
            .collect();
        let Some(split) = significant
            .iter()
            .position(|c| c.is_token() && c.label() == delimiter)
        else {
            return Err(ParseError::MissingDelimiter(delimiter.to_string()));
        };

        let Some(old) = split.checked_sub(1).map(|i| significant[i].id()) else {
            return Err(ParseError::MissingSide("old"));
        };
        let Some(new) = significant.get(split + 1).map(|n| n.id()) else {
            return Err(ParseError::MissingSide("new"));
        };

        Ok(Self { tree, old, new })
    }

    /// Parse `source` with `parser` and split it at `delimiter`
    pub fn parse<P>(parser: &P, source: &str, delimiter: &str) -> Result<Self, ParseError>
    where
        P: ChangeParser + ?Sized,
    {
        Self::from_tree(parser.parse(source)?, delimiter)
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn old(&self) -> NodeRef<'_> {
        self.side(self.old)
    }

    pub fn new(&self) -> NodeRef<'_> {
        self.side(self.new)
    }

    fn side(&self, id: NodeId) -> NodeRef<'_> {
        match self.tree.node(id) {
            Some(node) => node,
            // ids were taken from this tree in from_tree
            None => unreachable!("change side {id} outside its tree"),
        }
    }

    /// Number of nodes in the whole change tree
    pub fn node_count(&self) -> usize {
        self.tree.len()
    }
}

/// Encode a change for single-line storage
pub fn encode_change(text: &str) -> String {
    text.replace('\n', NEWLINE_SENTINEL)
}

/// Reverse of [`encode_change`]
pub fn decode_change(line: &str) -> String {
    line.replace(NEWLINE_SENTINEL, "\n")
}
