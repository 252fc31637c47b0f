//! Node classification
//!
//! Decides what a query node stands for: a wildcard, the empty-side marker,
//! a placeholder (plain `ID` or numbered `ID<2>`), or ordinary code. The
//! result depends only on the node's text and whether it has children.

use crate::tree::NodeRef;

/// Query text that absorbs any candidate subtree
pub const WILDCARD: &str = "<...>";

/// Query leaf standing for an empty statement list
pub const EMPTY_MARKER: &str = "_";

/// What a query node means to the matcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind<'a> {
    Wildcard,
    Empty,
    /// Bare placeholder such as `ID`
    UnnamedPlaceholder(&'a str),
    /// Numbered placeholder such as `ID<2>`: (name, variant)
    NamedPlaceholder(&'a str, &'a str),
    Normal,
}

impl<'a> NodeKind<'a> {
    /// Placeholder name, for either placeholder form
    pub fn placeholder_name(&self) -> Option<&'a str> {
        match *self {
            NodeKind::UnnamedPlaceholder(name) | NodeKind::NamedPlaceholder(name, _) => Some(name),
            _ => None,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.placeholder_name().is_some()
    }
}

/// The closed set of placeholder names
///
/// Names are kept longest first so that a numbered placeholder resolves to
/// the most specific name (`binOP<1>` is `binOP`, not `OP`-prefixed text).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceholderNames {
    names: Vec<String>,
}

impl PlaceholderNames {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut names: Vec<String> = names.into_iter().map(Into::into).collect();
        names.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        names.dedup();
        Self { names }
    }

    pub fn contains(&self, text: &str) -> bool {
        self.names.iter().any(|name| name == text)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl Default for PlaceholderNames {
    fn default() -> Self {
        Self::new(["LT", "ID", "binOP", "OP", "EXPR"])
    }
}

/// Classify a query node
pub fn classify<'a>(node: NodeRef<'a>, names: &PlaceholderNames) -> NodeKind<'a> {
    if node.text_is(WILDCARD) {
        return NodeKind::Wildcard;
    }
    if !node.is_leaf() || !node.is_token() {
        return NodeKind::Normal;
    }
    classify_token(node.label(), names)
}

/// Classify the text of a childless node
///
/// Shared by the tree classifier and the leaf-sequence verifier, which only
/// sees token texts.
pub fn classify_token<'a>(text: &'a str, names: &PlaceholderNames) -> NodeKind<'a> {
    if text == WILDCARD {
        return NodeKind::Wildcard;
    }
    if text == EMPTY_MARKER {
        return NodeKind::Empty;
    }
    if names.contains(text) {
        return NodeKind::UnnamedPlaceholder(text);
    }

    if text.ends_with('>') {
        if let Some(open) = text.find('<') {
            for name in names.iter() {
                if text.starts_with(name) && open >= name.len() {
                    return NodeKind::NamedPlaceholder(
                        &text[..name.len()],
                        &text[open + 1..text.len() - 1],
                    );
                }
            }
        }
    }

    NodeKind::Normal
}
