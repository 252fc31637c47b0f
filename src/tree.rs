//! Arena-backed syntax trees
//!
//! Every parsed code change becomes a [`Tree`]: a flat vector of nodes with
//! parent/child links by index. Internal nodes carry an interned grammar
//! category, leaves carry their token text. Trees are immutable once the
//! parser has finished building them.

use std::fmt;
use std::sync::Arc;

use lasso::{Spur, ThreadedRodeo};
use thiserror::Error;

/// Unique identifier for a node within its tree
pub type NodeId = usize;

/// Interned grammar-category name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CategoryId(Spur);

/// Shared interner for grammar-category names
///
/// One table is shared by a parser and every tree it produces, so category
/// comparisons between two trees from the same parser reduce to comparing
/// interned keys.
#[derive(Debug, Default)]
pub struct CategoryTable {
    names: ThreadedRodeo,
}

impl CategoryTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a category name, returning its id
    pub fn intern(&self, name: &str) -> CategoryId {
        CategoryId(self.names.get_or_intern(name))
    }

    /// Look up an already-interned name
    pub fn get(&self, name: &str) -> Option<CategoryId> {
        self.names.get(name).map(CategoryId)
    }

    pub fn resolve(&self, id: CategoryId) -> &str {
        self.names.resolve(&id.0)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// What a node is: a grammar category or a token
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Category {
    Internal(CategoryId),
    Leaf(String),
}

/// A node in a syntax tree
#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub category: Category,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
}

/// A syntax tree
#[derive(Debug, Clone)]
pub struct Tree {
    nodes: Vec<Node>,
    root_id: Option<NodeId>,
    categories: Arc<CategoryTable>,
}

impl Tree {
    /// Create an empty tree that interns categories into `categories`
    pub fn new(categories: Arc<CategoryTable>) -> Self {
        Self {
            nodes: Vec::new(),
            root_id: None,
            categories,
        }
    }

    /// Append an internal node. A node without a parent becomes the root;
    /// a tree has exactly one.
    pub fn add_internal(&mut self, name: &str, parent: Option<NodeId>) -> Result<NodeId, TreeError> {
        let category = Category::Internal(self.categories.intern(name));
        self.push(category, parent)
    }

    /// Append a leaf (token) node
    pub fn add_leaf(&mut self, text: &str, parent: Option<NodeId>) -> Result<NodeId, TreeError> {
        self.push(Category::Leaf(text.to_string()), parent)
    }

    fn push(&mut self, category: Category, parent: Option<NodeId>) -> Result<NodeId, TreeError> {
        let id = self.nodes.len();
        match (parent, self.root_id) {
            (Some(p), _) if p >= id => {
                return Err(TreeError::UnknownParent { parent: p, len: id });
            }
            (None, Some(root)) => return Err(TreeError::DuplicateRoot(root)),
            (None, None) => self.root_id = Some(id),
            (Some(_), _) => {}
        }
        self.nodes.push(Node {
            id,
            category,
            parent,
            children: Vec::new(),
        });
        if let Some(p) = parent {
            self.nodes[p].children.push(id);
        }
        Ok(id)
    }

    pub fn root(&self) -> Option<NodeRef<'_>> {
        self.root_id.map(|id| NodeRef { tree: self, id })
    }

    /// Get a node by ID
    pub fn node(&self, id: NodeId) -> Option<NodeRef<'_>> {
        (id < self.nodes.len()).then_some(NodeRef { tree: self, id })
    }

    /// Total number of nodes, including leaves
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn categories(&self) -> &Arc<CategoryTable> {
        &self.categories
    }
}

/// Error adding a node to a [`Tree`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TreeError {
    #[error("parent node {parent} does not exist in a tree of {len} nodes")]
    UnknownParent { parent: NodeId, len: usize },
    #[error("tree already has a root (node {0})")]
    DuplicateRoot(NodeId),
}

/// Borrowed view of one node together with its tree
#[derive(Clone, Copy)]
pub struct NodeRef<'a> {
    tree: &'a Tree,
    id: NodeId,
}

impl<'a> NodeRef<'a> {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn tree(&self) -> &'a Tree {
        self.tree
    }

    pub fn node(&self) -> &'a Node {
        &self.tree.nodes[self.id]
    }

    pub fn category(&self) -> &'a Category {
        &self.node().category
    }

    /// Category name for internal nodes, token text for leaves
    pub fn label(&self) -> &'a str {
        match self.category() {
            Category::Internal(id) => self.tree.categories.resolve(*id),
            Category::Leaf(text) => text,
        }
    }

    /// Whether both nodes have the same category
    ///
    /// Internal categories are compared by name, so trees interned into
    /// different tables still agree; all tokens share one category.
    pub fn same_category(&self, other: NodeRef<'_>) -> bool {
        match (self.category(), other.category()) {
            (Category::Internal(a), Category::Internal(b))
                if Arc::ptr_eq(&self.tree.categories, &other.tree.categories) =>
            {
                a == b
            }
            (Category::Internal(_), Category::Internal(_)) => self.label() == other.label(),
            (Category::Leaf(_), Category::Leaf(_)) => true,
            _ => false,
        }
    }

    /// True for token nodes
    pub fn is_token(&self) -> bool {
        matches!(self.category(), Category::Leaf(_))
    }

    /// True when the node has no children
    pub fn is_leaf(&self) -> bool {
        self.node().children.is_empty()
    }

    pub fn child_count(&self) -> usize {
        self.node().children.len()
    }

    pub fn children(&self) -> impl ExactSizeIterator<Item = NodeRef<'a>> + use<'a> {
        let tree = self.tree;
        self.node()
            .children
            .iter()
            .map(move |&id| NodeRef { tree, id })
    }

    pub fn child(&self, index: usize) -> Option<NodeRef<'a>> {
        self.node().children.get(index).map(|&id| NodeRef {
            tree: self.tree,
            id,
        })
    }

    pub fn parent(&self) -> Option<NodeRef<'a>> {
        self.node().parent.map(|id| NodeRef {
            tree: self.tree,
            id,
        })
    }

    /// All nodes of the subtree rooted here, in pre-order
    pub fn pre_order(&self) -> PreOrder<'a> {
        PreOrder {
            tree: self.tree,
            stack: vec![self.id],
        }
    }

    /// Token nodes of the subtree, in source order
    pub fn tokens(&self) -> impl Iterator<Item = NodeRef<'a>> + use<'a> {
        self.pre_order().filter(NodeRef::is_token)
    }

    pub fn subtree_size(&self) -> usize {
        self.pre_order().count()
    }

    /// Concatenated token text of the subtree, without separators
    pub fn text(&self) -> String {
        self.tokens().map(|leaf| leaf.label()).collect()
    }

    /// Whether [`NodeRef::text`] equals `expected`, without allocating
    pub fn text_is(&self, expected: &str) -> bool {
        let mut rest = expected;
        for leaf in self.tokens() {
            match rest.strip_prefix(leaf.label()) {
                Some(remaining) => rest = remaining,
                None => return false,
            }
        }
        rest.is_empty()
    }
}

impl fmt::Debug for NodeRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeRef")
            .field("id", &self.id)
            .field("label", &self.label())
            .field("children", &self.child_count())
            .finish()
    }
}

/// Pre-order traversal over a subtree
pub struct PreOrder<'a> {
    tree: &'a Tree,
    stack: Vec<NodeId>,
}

impl<'a> Iterator for PreOrder<'a> {
    type Item = NodeRef<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.stack.pop()?;
        self.stack
            .extend(self.tree.nodes[id].children.iter().rev().copied());
        Some(NodeRef {
            tree: self.tree,
            id,
        })
    }
}
