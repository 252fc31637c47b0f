//! S-expression reading and writing for trees
//!
//! `(call (name foo) "(" ")")` is an internal `call` node with a `name`
//! child and two token leaves. Used to build trees by hand in tests and to
//! print parse results.

use std::sync::Arc;

use pest::Parser;
use pest::iterators::Pair;
use pest_derive::Parser;
use thiserror::Error;

use crate::tree::{Category, CategoryTable, NodeId, NodeRef, Tree, TreeError};

#[derive(Parser)]
#[grammar = "sexpr.pest"]
struct SexprGrammar;

/// Error building a tree from an s-expression
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SexprError {
    #[error("malformed s-expression: {0}")]
    Syntax(String),
    #[error(transparent)]
    Tree(#[from] TreeError),
}

impl From<pest::error::Error<Rule>> for SexprError {
    fn from(err: pest::error::Error<Rule>) -> Self {
        SexprError::Syntax(err.to_string())
    }
}

impl Tree {
    /// Build a tree from an s-expression such as `(call (name foo) "(" ")")`
    ///
    /// Parenthesised groups are internal nodes whose first atom is the
    /// category; every other atom is a leaf.
    pub fn from_sexpr(input: &str, categories: Arc<CategoryTable>) -> Result<Self, SexprError> {
        let mut tree = Tree::new(categories);
        for pair in SexprGrammar::parse(Rule::sexpr, input)?.flat_map(Pair::into_inner) {
            add_node(pair, None, &mut tree)?;
        }
        Ok(tree)
    }

    /// Render the tree as an s-expression accepted by [`Tree::from_sexpr`]
    pub fn to_sexpr(&self) -> String {
        self.root().map(|root| root.to_sexpr()).unwrap_or_default()
    }
}

fn add_node(pair: Pair<Rule>, parent: Option<NodeId>, tree: &mut Tree) -> Result<(), TreeError> {
    match pair.as_rule() {
        Rule::group => {
            let mut inner = pair.into_inner();
            let Some(name) = inner.next() else {
                return Ok(());
            };
            let id = tree.add_internal(&atom_text(name), parent)?;
            for child in inner {
                add_node(child, Some(id), tree)?;
            }
        }
        Rule::bare | Rule::quoted => {
            tree.add_leaf(&atom_text(pair), parent)?;
        }
        _ => {}
    }
    Ok(())
}

fn atom_text(pair: Pair<Rule>) -> String {
    match pair.as_rule() {
        Rule::quoted => pair
            .into_inner()
            .map(|part| match part.as_rule() {
                Rule::escaped => &part.as_str()[1..],
                _ => part.as_str(),
            })
            .collect(),
        _ => pair.as_str().to_string(),
    }
}

impl NodeRef<'_> {
    pub fn to_sexpr(&self) -> String {
        let mut out = String::new();
        self.write_sexpr(&mut out);
        out
    }

    fn write_sexpr(&self, out: &mut String) {
        match self.category() {
            Category::Leaf(text) => write_atom(text, out),
            Category::Internal(_) => {
                out.push('(');
                write_atom(self.label(), out);
                for child in self.children() {
                    out.push(' ');
                    child.write_sexpr(out);
                }
                out.push(')');
            }
        }
    }
}

fn write_atom(text: &str, out: &mut String) {
    let bare = !text.is_empty()
        && !text
            .chars()
            .any(|c| c.is_whitespace() || c == '(' || c == ')' || c == '"' || c == '\\');
    if bare {
        out.push_str(text);
        return;
    }
    out.push('"');
    for c in text.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> Arc<CategoryTable> {
        Arc::new(CategoryTable::new())
    }

    #[test]
    fn test_read_nested_groups() {
        let tree = Tree::from_sexpr("(call (name foo)\n  (args \"(\" x \")\"))", table()).unwrap();
        assert_eq!(tree.len(), 7);

        let root = tree.root().unwrap();
        assert_eq!(root.label(), "call");
        assert!(!root.is_token());
        assert_eq!(root.child(0).unwrap().label(), "name");

        let tokens: Vec<_> = root.tokens().map(|t| t.label()).collect();
        assert_eq!(tokens, vec!["foo", "(", "x", ")"]);
    }

    #[test]
    fn test_quoted_atoms() {
        let tree = Tree::from_sexpr(r#"(lit "a \"b\" c" "\\" "")"#, table()).unwrap();
        let leaves: Vec<_> = tree.root().unwrap().children().map(|c| c.label()).collect();
        assert_eq!(leaves, vec![r#"a "b" c"#, "\\", ""]);

        // quoted category names are allowed too
        let tree = Tree::from_sexpr(r#"("odd name" x)"#, table()).unwrap();
        assert_eq!(tree.root().unwrap().label(), "odd name");
    }

    #[test]
    fn test_round_trip() {
        let input = r#"(expression (unary (primary (identifier foo)) (arguments "(" (identifier x) ")")))"#;
        let tree = Tree::from_sexpr(input, table()).unwrap();
        assert_eq!(tree.len(), 10);
        assert_eq!(tree.to_sexpr(), input);

        let text = Tree::from_sexpr(r#"(s "\n" "a b" "q\"")"#, table()).unwrap();
        let again = Tree::from_sexpr(&text.to_sexpr(), table()).unwrap();
        assert_eq!(again.to_sexpr(), text.to_sexpr());
    }

    #[test]
    fn test_bare_leaf_root() {
        let tree = Tree::from_sexpr("x", table()).unwrap();
        let root = tree.root().unwrap();
        assert!(root.is_token());
        assert_eq!(root.label(), "x");
    }

    #[test]
    fn test_errors() {
        for input in ["", "   ", "(a (b c)", "()", "(a \"b)", "(a b) c", "a b", ")"] {
            assert!(
                matches!(Tree::from_sexpr(input, table()), Err(SexprError::Syntax(_))),
                "{input:?}"
            );
        }
    }

    #[test]
    fn test_empty_tree_renders_empty() {
        assert_eq!(Tree::new(table()).to_sexpr(), "");
    }
}
