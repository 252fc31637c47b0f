//! Diffsearch: structural search over code-change corpora
//!
//! Finds "old -> new" code changes that match a query change written with
//! placeholders (`ID`, `LT`, `EXPR`, `OP`, `binOP`, optionally numbered as
//! `ID<1>`), the wildcard `<...>` and the empty-side marker `_`.

// Trees and parsing
pub mod change; // Old/new split of a parsed change, single-line codec
pub mod parser; // Grammar-driven change parser
pub mod sexpr; // S-expression tree notation
pub mod tree; // Arena syntax trees with interned categories

// Matching (classification first, verification last)
pub mod compare; // Deep placeholder-aware tree comparison with traces
pub mod fingerprint; // Fixed-length structural feature vectors
pub mod kind; // Query node classification
pub mod placeholder; // Placeholder rule table
pub mod similarity; // Cosine pre-filter
pub mod verify; // Token-sequence verification

// Pipeline
pub mod config;
pub mod corpus; // Corpus files, feature rows, commit info
pub mod index; // Candidate lookup
pub mod searcher; // End-to-end search (index + pre-filter + comparison)

// Re-exports for convenience
pub use change::ChangePattern;
pub use compare::{MatchTrace, Matcher};
pub use config::{ConfigError, SearchConfig};
pub use corpus::{ChangeInfo, Corpus, CorpusError, FeatureTable};
pub use fingerprint::{FeatureVector, Fingerprinter};
pub use index::{CandidateId, CandidateIndex, FlatIndex, IndexError};
pub use kind::{NodeKind, classify};
pub use parser::{ChangeParser, ParseError, PestChangeParser};
pub use placeholder::PlaceholderTable;
pub use searcher::{
    CancellationToken, CandidateMatch, SearchError, SearchPipeline, SearchResults, SearchStats,
};
pub use similarity::{cosine, passes_prefilter};
pub use tree::{NodeRef, Tree, TreeError};
pub use verify::{LeafVerifier, PositionalLeafVerifier};
