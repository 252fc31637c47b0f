//! End-to-end change search
//!
//! The SearchPipeline ties the stages together:
//! 1. Parse the query into a ChangePattern and reject it if too small
//! 2. Fingerprint the query and ask the index for a shortlist
//! 3. On the worker pool, for each shortlisted candidate: parse, fingerprint,
//!    cosine pre-filter, deep comparison, leaf verification
//! 4. Collect matches, optionally sorted by shortlist rank
//!
//! Problems with a single candidate are logged and counted in
//! [`SearchStats`]; only query, configuration and index errors abort a search.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;

use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::change::ChangePattern;
use crate::compare::{MatchTrace, Matcher};
use crate::config::{ConfigError, SearchConfig};
use crate::corpus::{ChangeInfo, Corpus};
use crate::fingerprint::{FeatureVector, Fingerprinter};
use crate::index::{CandidateId, CandidateIndex, IndexError};
use crate::parser::{ChangeParser, ParseError};
use crate::similarity::{DimensionMismatch, cosine};
use crate::verify::{LeafSequences, LeafVerifier, PositionalLeafVerifier};

/// Error that aborts a whole search
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("query rejected: {0}")]
    QueryParse(#[from] ParseError),

    #[error("query rejected: {nodes} nodes is below the minimum of {min}")]
    TooSmallQuery { nodes: usize, min: usize },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("candidate lookup failed: {0}")]
    Index(#[from] IndexError),

    #[error(transparent)]
    Dimension(#[from] DimensionMismatch),

    #[error("candidate {0} is not in the corpus")]
    MissingCandidate(CandidateId),

    #[error("candidate {id} failed to parse: {source}")]
    CandidateParse { id: CandidateId, source: ParseError },
}

/// Shared flag asking running searches to stop
///
/// Workers check it between candidates, never in the middle of one.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// A parsed, size-checked query with its fingerprint and token sequences
#[derive(Debug, Clone)]
pub struct PreparedQuery {
    pub pattern: ChangePattern,
    pub fingerprint: FeatureVector,
    pub leaves: LeafSequences,
}

/// One corpus entry that matched the query
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateMatch {
    pub id: CandidateId,
    /// Position in the index shortlist
    pub rank: usize,
    pub similarity: f64,
    /// Change text, with real newlines
    pub change: String,
    pub info: Option<ChangeInfo>,
}

/// Where the candidates of one search ended up
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchStats {
    pub shortlisted: usize,
    pub evaluated: usize,
    /// Shortlisted ids with no corpus entry
    pub missing: usize,
    pub parse_failures: usize,
    pub dimension_mismatches: usize,
    pub prefilter_rejects: usize,
    pub structural_rejects: usize,
    pub leaf_rejects: usize,
    /// Matches dropped because both sides had the same tokens
    pub unchanged: usize,
    pub matched: usize,
    /// Candidates never looked at because the search was stopped
    pub cancelled: usize,
}

#[derive(Default)]
struct Counters {
    evaluated: AtomicUsize,
    missing: AtomicUsize,
    parse_failures: AtomicUsize,
    dimension_mismatches: AtomicUsize,
    prefilter_rejects: AtomicUsize,
    structural_rejects: AtomicUsize,
    leaf_rejects: AtomicUsize,
    unchanged: AtomicUsize,
    matched: AtomicUsize,
    cancelled: AtomicUsize,
}

fn bump(counter: &AtomicUsize) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl Counters {
    fn snapshot(&self, shortlisted: usize) -> SearchStats {
        let get = |c: &AtomicUsize| c.load(Ordering::Relaxed);
        SearchStats {
            shortlisted,
            evaluated: get(&self.evaluated),
            missing: get(&self.missing),
            parse_failures: get(&self.parse_failures),
            dimension_mismatches: get(&self.dimension_mismatches),
            prefilter_rejects: get(&self.prefilter_rejects),
            structural_rejects: get(&self.structural_rejects),
            leaf_rejects: get(&self.leaf_rejects),
            unchanged: get(&self.unchanged),
            matched: get(&self.matched),
            cancelled: get(&self.cancelled),
        }
    }
}

/// Matches of one search and how the shortlist was filtered
#[derive(Debug, Clone, Default)]
pub struct SearchResults {
    pub matches: Vec<CandidateMatch>,
    pub stats: SearchStats,
}

/// Stage-by-stage account of one query/candidate pair
#[derive(Debug, Clone)]
pub struct Explanation {
    pub similarity: f64,
    pub passes_prefilter: bool,
    pub structural: bool,
    /// Only checked when the structural comparison succeeded
    pub leaves: Option<bool>,
    pub trace: MatchTrace,
    /// `trace` rendered with node labels
    pub report: String,
}

impl Explanation {
    /// Whether the candidate would be reported, ignoring the unchanged filter
    pub fn is_match(&self) -> bool {
        self.passes_prefilter && self.structural && self.leaves == Some(true)
    }
}

/// Search pipeline over one corpus, index and parser
pub struct SearchPipeline<P, I> {
    config: SearchConfig,
    parser: P,
    index: I,
    corpus: Corpus,
    matcher: Matcher,
    fingerprinter: Fingerprinter,
    verifier: Box<dyn LeafVerifier>,
    pool: rayon::ThreadPool,
}

impl<P, I> SearchPipeline<P, I>
where
    P: ChangeParser,
    I: CandidateIndex,
{
    /// Validate `config` and set up the worker pool
    pub fn new(config: SearchConfig, parser: P, index: I, corpus: Corpus) -> Result<Self, ConfigError> {
        config.validate()?;
        config.check_parser(&parser)?;
        let placeholders = config.placeholder_table()?;
        let fingerprinter = config.fingerprinter()?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.workers)
            .thread_name(|i| format!("diffsearch-{i}"))
            .build()?;

        Ok(Self {
            verifier: Box::new(PositionalLeafVerifier::new(placeholders.clone())),
            matcher: Matcher::new(placeholders),
            fingerprinter,
            config,
            parser,
            index,
            corpus,
            pool,
        })
    }

    /// Replace the final token-level check
    pub fn with_leaf_verifier<V>(mut self, verifier: V) -> Self
    where
        V: LeafVerifier + 'static,
    {
        self.verifier = Box::new(verifier);
        self
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    pub fn corpus(&self) -> &Corpus {
        &self.corpus
    }

    /// Parse the query and check its size
    pub fn prepare_query(&self, query: &str) -> Result<PreparedQuery, SearchError> {
        let pattern = ChangePattern::parse(&self.parser, query, &self.config.delimiter)?;

        let nodes = pattern.node_count();
        if nodes < self.config.min_query_nodes {
            return Err(SearchError::TooSmallQuery {
                nodes,
                min: self.config.min_query_nodes,
            });
        }

        Ok(PreparedQuery {
            fingerprint: self.fingerprinter.change(&pattern),
            leaves: LeafSequences::from_tree(pattern.tree(), &self.config.delimiter),
            pattern,
        })
    }

    pub fn search(&self, query: &str) -> Result<SearchResults, SearchError> {
        self.search_with(query, &CancellationToken::new())
    }

    /// Search, stopping early once `cancel` is set
    pub fn search_with(
        &self,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<SearchResults, SearchError> {
        let prepared = match self.prepare_query(query) {
            Ok(prepared) => prepared,
            Err(error) => {
                warn!(%error, "rejecting query");
                return Err(error);
            }
        };
        self.search_prepared(&prepared, cancel)
    }

    /// Search with a query that was already prepared
    pub fn search_prepared(
        &self,
        query: &PreparedQuery,
        cancel: &CancellationToken,
    ) -> Result<SearchResults, SearchError> {
        let shortlist = self.index.lookup(&query.fingerprint, self.config.top_k)?;
        debug!(shortlisted = shortlist.len(), "index lookup done");

        let counters = Counters::default();
        let stop = AtomicBool::new(self.config.max_matches == Some(0));
        let (sender, receiver) = mpsc::channel();

        self.pool.install(|| {
            shortlist
                .par_iter()
                .enumerate()
                .for_each_with(sender, |sender, (rank, &id)| {
                    if cancel.is_cancelled() || stop.load(Ordering::Relaxed) {
                        bump(&counters.cancelled);
                        return;
                    }
                    let Some(found) = self.evaluate(query, rank, id, &counters) else {
                        return;
                    };
                    if self.claim_slot(&counters.matched, &stop) {
                        // the receiver outlives the pool
                        let _ = sender.send(found);
                    }
                });
        });

        let mut matches: Vec<CandidateMatch> = receiver.into_iter().collect();
        if self.config.ordered {
            matches.sort_by_key(|m| m.rank);
        }

        let stats = counters.snapshot(shortlist.len());
        info!(
            shortlisted = stats.shortlisted,
            evaluated = stats.evaluated,
            prefilter_rejects = stats.prefilter_rejects,
            structural_rejects = stats.structural_rejects,
            leaf_rejects = stats.leaf_rejects,
            parse_failures = stats.parse_failures,
            matched = matches.len(),
            cancelled = stats.cancelled,
            "search finished"
        );

        Ok(SearchResults { matches, stats })
    }

    /// Count a match unless the cap is reached; raise `stop` on reaching it
    fn claim_slot(&self, matched: &AtomicUsize, stop: &AtomicBool) -> bool {
        let Some(cap) = self.config.max_matches else {
            bump(matched);
            return true;
        };
        match matched.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
            (n < cap).then_some(n + 1)
        }) {
            Ok(previous) => {
                if previous + 1 == cap {
                    stop.store(true, Ordering::Relaxed);
                }
                true
            }
            Err(_) => {
                stop.store(true, Ordering::Relaxed);
                false
            }
        }
    }

    fn evaluate(
        &self,
        query: &PreparedQuery,
        rank: usize,
        id: CandidateId,
        counters: &Counters,
    ) -> Option<CandidateMatch> {
        bump(&counters.evaluated);

        let Some(text) = self.corpus.change(id) else {
            bump(&counters.missing);
            warn!(candidate = id, "shortlisted id has no corpus entry");
            return None;
        };

        let candidate = match ChangePattern::parse(&self.parser, text, &self.config.delimiter) {
            Ok(candidate) => candidate,
            Err(error) => {
                bump(&counters.parse_failures);
                warn!(candidate = id, %error, "skipping candidate that failed to parse");
                return None;
            }
        };

        let similarity = match cosine(&query.fingerprint, &self.fingerprinter.change(&candidate)) {
            Ok(similarity) => similarity,
            Err(error) => {
                bump(&counters.dimension_mismatches);
                warn!(candidate = id, %error, "skipping candidate");
                return None;
            }
        };
        if similarity < self.config.similarity_threshold {
            bump(&counters.prefilter_rejects);
            debug!(candidate = id, similarity, "below similarity threshold");
            return None;
        }

        if !self.matcher.matches_change(&query.pattern, &candidate, &mut ()) {
            bump(&counters.structural_rejects);
            debug!(candidate = id, "structure differs");
            return None;
        }

        let leaves = LeafSequences::from_tree(candidate.tree(), &self.config.delimiter);
        if !self
            .verifier
            .leaves_match(&query.leaves.old, &query.leaves.new, &leaves.old, &leaves.new)
        {
            bump(&counters.leaf_rejects);
            debug!(candidate = id, "tokens differ");
            return None;
        }

        if self.config.skip_unchanged && leaves.is_unchanged() {
            bump(&counters.unchanged);
            debug!(candidate = id, "old and new sides are identical");
            return None;
        }

        Some(CandidateMatch {
            id,
            rank,
            similarity,
            change: text.to_string(),
            info: self.corpus.info(id).and_then(ChangeInfo::parse),
        })
    }

    /// Run every stage on one candidate and keep the comparison trace
    pub fn explain(&self, query: &str, candidate: CandidateId) -> Result<Explanation, SearchError> {
        let query = self.prepare_query(query)?;
        let text = self
            .corpus
            .change(candidate)
            .ok_or(SearchError::MissingCandidate(candidate))?;
        let parsed = ChangePattern::parse(&self.parser, text, &self.config.delimiter).map_err(
            |source| SearchError::CandidateParse {
                id: candidate,
                source,
            },
        )?;

        let similarity = cosine(&query.fingerprint, &self.fingerprinter.change(&parsed))?;

        let mut match_trace = MatchTrace::new();
        let structural = self
            .matcher
            .matches_change(&query.pattern, &parsed, &mut match_trace);
        let leaves = structural.then(|| {
            let leaves = LeafSequences::from_tree(parsed.tree(), &self.config.delimiter);
            self.verifier
                .leaves_match(&query.leaves.old, &query.leaves.new, &leaves.old, &leaves.new)
        });

        let report = match_trace.render(query.pattern.tree(), parsed.tree());
        trace!(candidate, structural, "comparison trace:\n{report}");

        Ok(Explanation {
            similarity,
            passes_prefilter: similarity >= self.config.similarity_threshold,
            structural,
            leaves,
            trace: match_trace,
            report,
        })
    }
}
