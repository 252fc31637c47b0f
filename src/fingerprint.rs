//! Structural fingerprints
//!
//! Turns a tree (or both sides of a change) into a fixed-length histogram
//! used for the cosine pre-filter and for approximate candidate lookup.
//!
//! Two passes contribute `B` buckets each:
//! - **hash-sum**: every node's subtree hash (its category combined with the
//!   ordered hashes of its children) increments one bucket.
//! - **parent-child**: every edge increments the bucket of the hashed
//!   (parent category, child category) pair.
//!
//! Only categories and shape enter the hashes: token text is reduced to a
//! single leaf marker so renamed identifiers fingerprint identically.

use std::hash::{Hash, Hasher};
use std::ops::Range;

use rustc_hash::FxHasher;
use serde::{Deserialize, Serialize};

use crate::change::ChangePattern;
use crate::config::ConfigError;
use crate::tree::{Category, NodeRef};

/// Default bucket count per pass
pub const DEFAULT_BUCKETS: usize = 128;

/// Fixed-length histogram of structural features
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct FeatureVector(Vec<u32>);

impl FeatureVector {
    pub fn zeros(dimension: usize) -> Self {
        Self(vec![0; dimension])
    }

    pub fn as_slice(&self) -> &[u32] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<u32> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True when every bucket is zero
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&v| v == 0)
    }

    /// Sum of all bucket counts
    pub fn total(&self) -> u64 {
        self.0.iter().map(|&v| u64::from(v)).sum()
    }
}

impl From<Vec<u32>> for FeatureVector {
    fn from(values: Vec<u32>) -> Self {
        Self(values)
    }
}

impl AsRef<[u32]> for FeatureVector {
    fn as_ref(&self) -> &[u32] {
        &self.0
    }
}

/// A named range of a feature vector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub name: String,
    pub range: Range<usize>,
}

/// Section names and offsets of a feature vector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureLayout {
    sections: Vec<Section>,
}

impl FeatureLayout {
    fn from_widths(parts: &[(&str, usize)]) -> Self {
        let mut start = 0;
        let sections = parts
            .iter()
            .map(|&(name, width)| {
                let section = Section {
                    name: name.to_string(),
                    range: start..start + width,
                };
                start += width;
                section
            })
            .collect();
        Self { sections }
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name == name)
    }

    pub fn dimension(&self) -> usize {
        self.sections.last().map_or(0, |s| s.range.end)
    }

    /// View one section of `vector`
    pub fn slice<'v>(&self, vector: &'v FeatureVector, name: &str) -> Option<&'v [u32]> {
        let section = self.section(name)?;
        vector.as_slice().get(section.range.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FingerprintConfig {
    /// Buckets per pass; the vector has twice as many entries
    pub buckets: usize,
}

impl Default for FingerprintConfig {
    fn default() -> Self {
        Self {
            buckets: DEFAULT_BUCKETS,
        }
    }
}

/// Computes feature vectors of a fixed dimension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fingerprinter {
    buckets: usize,
}

impl Fingerprinter {
    /// `buckets` must be even (changes split each pass into halves) and at
    /// least 2.
    pub fn new(buckets: usize) -> Result<Self, ConfigError> {
        if buckets < 2 || buckets % 2 != 0 {
            return Err(ConfigError::InvalidBuckets(buckets));
        }
        Ok(Self { buckets })
    }

    pub fn from_config(config: &FingerprintConfig) -> Result<Self, ConfigError> {
        Self::new(config.buckets)
    }

    pub fn buckets(&self) -> usize {
        self.buckets
    }

    /// Length of every vector this fingerprinter produces
    pub fn dimension(&self) -> usize {
        2 * self.buckets
    }

    /// Fingerprint a single tree
    pub fn tree(&self, root: NodeRef<'_>) -> FeatureVector {
        let mut values = subtree_histogram(root, self.buckets);
        values.extend(edge_histogram(root, self.buckets));
        FeatureVector(values)
    }

    /// Fingerprint a change, keeping old and new in disjoint halves of each
    /// section
    pub fn change(&self, change: &ChangePattern) -> FeatureVector {
        let half = self.buckets / 2;
        let (old, new) = (change.old(), change.new());

        let mut values = Vec::with_capacity(self.dimension());
        values.extend(subtree_histogram(old, half));
        values.extend(subtree_histogram(new, half));
        values.extend(edge_histogram(old, half));
        values.extend(edge_histogram(new, half));
        FeatureVector(values)
    }

    pub fn tree_layout(&self) -> FeatureLayout {
        FeatureLayout::from_widths(&[("hash-sum", self.buckets), ("parent-child", self.buckets)])
    }

    pub fn change_layout(&self) -> FeatureLayout {
        let half = self.buckets / 2;
        FeatureLayout::from_widths(&[
            ("hash-sum [old]", half),
            ("hash-sum [new]", half),
            ("parent-child [old]", half),
            ("parent-child [new]", half),
        ])
    }

    /// Order-sensitive structural hash of the subtree rooted at `node`
    pub fn subtree_hash(&self, node: NodeRef<'_>) -> u64 {
        local_hash(node, &mut [])
    }
}

#[derive(Hash)]
enum CategoryKey<'a> {
    Internal(&'a str),
    Leaf,
}

fn category_key<'a>(node: NodeRef<'a>) -> CategoryKey<'a> {
    match node.category() {
        Category::Internal(_) => CategoryKey::Internal(node.label()),
        Category::Leaf(_) => CategoryKey::Leaf,
    }
}

/// 64-bit finalizer, spreads FxHash output over the low bits used for
/// bucketing
fn mix(mut h: u64) -> u64 {
    h ^= h >> 33;
    h = h.wrapping_mul(0xff51_afd7_ed55_8ccd);
    h ^= h >> 33;
    h = h.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    h ^= h >> 33;
    h
}

fn bucket(hash: u64, buckets: usize) -> usize {
    (mix(hash) % buckets as u64) as usize
}

/// Post-order subtree hashes; each one increments a bucket of `histogram`
/// unless it is empty
fn local_hash(node: NodeRef<'_>, histogram: &mut [u32]) -> u64 {
    let mut hasher = FxHasher::default();
    category_key(node).hash(&mut hasher);
    hasher.write_usize(node.child_count());
    for child in node.children() {
        hasher.write_u64(local_hash(child, histogram));
    }
    let hash = hasher.finish();

    if !histogram.is_empty() {
        let slot = bucket(hash, histogram.len());
        histogram[slot] += 1;
    }
    hash
}

fn subtree_histogram(root: NodeRef<'_>, buckets: usize) -> Vec<u32> {
    let mut histogram = vec![0; buckets];
    local_hash(root, &mut histogram);
    histogram
}

fn edge_histogram(root: NodeRef<'_>, buckets: usize) -> Vec<u32> {
    let mut histogram = vec![0; buckets];
    for parent in root.pre_order() {
        let parent_key = category_key(parent);
        for child in parent.children() {
            let mut hasher = FxHasher::default();
            parent_key.hash(&mut hasher);
            category_key(child).hash(&mut hasher);
            histogram[bucket(hasher.finish(), buckets)] += 1;
        }
    }
    histogram
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::DEFAULT_DELIMITER;
    use crate::parser::PestChangeParser;
    use crate::tree::{CategoryTable, Tree};
    use std::sync::Arc;

    fn sexpr(input: &str) -> Tree {
        Tree::from_sexpr(input, Arc::new(CategoryTable::new())).unwrap()
    }

    fn change(source: &str) -> ChangePattern {
        ChangePattern::parse(&PestChangeParser::new(), source, DEFAULT_DELIMITER).unwrap()
    }

    #[test]
    fn test_invalid_bucket_counts() {
        assert!(matches!(Fingerprinter::new(0), Err(ConfigError::InvalidBuckets(0))));
        assert!(matches!(Fingerprinter::new(7), Err(ConfigError::InvalidBuckets(7))));
        assert_eq!(Fingerprinter::new(2).unwrap().dimension(), 4);
    }

    #[test]
    fn test_tree_vector_counts() {
        let fp = Fingerprinter::new(16).unwrap();
        let tree = sexpr("(call (name foo) (args a b))");
        let vector = fp.tree(tree.root().unwrap());
        assert_eq!(vector.len(), 32);

        let layout = fp.tree_layout();
        let hash_sum: u32 = layout.slice(&vector, "hash-sum").unwrap().iter().sum();
        let edges: u32 = layout.slice(&vector, "parent-child").unwrap().iter().sum();
        // one count per node, one per edge
        assert_eq!(hash_sum as usize, tree.len());
        assert_eq!(edges as usize, tree.len() - 1);
    }

    #[test]
    fn test_deterministic() {
        let fp = Fingerprinter::new(DEFAULT_BUCKETS).unwrap();
        let a = change("foo(x, 42); -> foo(42, x);");
        let b = change("foo(x, 42); -> foo(42, x);");
        assert_eq!(fp.change(&a), fp.change(&b));
        assert_eq!(fp.change(&a), fp.change(&a));
    }

    #[test]
    fn test_token_text_ignored() {
        let fp = Fingerprinter::new(DEFAULT_BUCKETS).unwrap();
        let a = change("foo(x, 42); -> foo(42, x);");
        let b = change("bar(y, 7); -> bar(7, y);");
        assert_eq!(fp.change(&a), fp.change(&b));
    }

    #[test]
    fn test_child_order_changes_subtree_hash() {
        let fp = Fingerprinter::new(1024).unwrap();
        let a = sexpr("(call (name x) (literal 1))");
        let b = sexpr("(call (literal 1) (name x))");
        assert_ne!(
            fp.subtree_hash(a.root().unwrap()),
            fp.subtree_hash(b.root().unwrap())
        );
        assert_ne!(fp.tree(a.root().unwrap()), fp.tree(b.root().unwrap()));
    }

    #[test]
    fn test_change_halves_are_disjoint() {
        let fp = Fingerprinter::new(64).unwrap();
        let layout = fp.change_layout();
        assert_eq!(layout.dimension(), fp.dimension());

        // a change whose new side is empty only fills the old halves
        let only_old = change("foo(); -> ");
        let vector = fp.change(&only_old);
        let old_sum: u32 = layout.slice(&vector, "hash-sum [old]").unwrap().iter().sum();
        let new_sum: u32 = layout.slice(&vector, "hash-sum [new]").unwrap().iter().sum();
        let new_edges: u32 = layout
            .slice(&vector, "parent-child [new]")
            .unwrap()
            .iter()
            .sum();
        assert_eq!(old_sum as usize, only_old.old().subtree_size());
        // snippet -> multipleStatements
        assert_eq!(new_sum, 2);
        assert_eq!(new_edges, 1);

        let reversed = change(" -> foo();");
        assert_ne!(fp.change(&only_old), fp.change(&reversed));
    }

    #[test]
    fn test_bounded_size() {
        let fp = Fingerprinter::new(8).unwrap();
        let small = change("a(); -> b();");
        let large = change(
            "if (a) { b(c, d, e); while (f) { g.h(i); } } else { return j + k * l; } -> \
             for (int m = 0; m < n; m++) { o[p] = q(r, s); }",
        );
        assert_eq!(fp.change(&small).len(), 16);
        assert_eq!(fp.change(&large).len(), 16);
        assert!(fp.change(&large).total() > fp.change(&small).total());
    }

    #[test]
    fn test_layout_sections() {
        let fp = Fingerprinter::new(4).unwrap();
        let layout = fp.change_layout();
        let names: Vec<_> = layout.sections().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["hash-sum [old]", "hash-sum [new]", "parent-child [old]", "parent-child [new]"]
        );
        assert_eq!(layout.section("parent-child [old]").unwrap().range, 4..6);
        assert!(layout.section("missing").is_none());
    }
}
