//! Search configuration
//!
//! Every knob of the pipeline lives in [`SearchConfig`]. It deserializes
//! from YAML with defaults for anything left out, and is validated once when
//! a pipeline is built so bad settings never surface mid-search.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::change::DEFAULT_DELIMITER;
use crate::fingerprint::{FingerprintConfig, Fingerprinter};
use crate::kind::PlaceholderNames;
use crate::parser::ChangeParser;
use crate::placeholder::{DEFAULT_EMPTY_LABEL, PlaceholderRule, PlaceholderTable, default_rules};
use crate::similarity::DEFAULT_THRESHOLD;

/// Invalid configuration, reported at startup
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown placeholder kind `{0}`: no matching rule is configured")]
    UnknownPlaceholderKind(String),

    #[error("invalid placeholder name `{0}`")]
    InvalidPlaceholderName(String),

    #[error("fingerprint bucket count must be even and at least 2, got {0}")]
    InvalidBuckets(usize),

    #[error("similarity threshold must lie in [0, 1], got {0}")]
    InvalidThreshold(f64),

    #[error("top_k must be at least 1")]
    ZeroTopK,

    #[error("change delimiter must not be empty")]
    EmptyDelimiter,

    #[error("configured delimiter `{configured}` differs from the {language} parser's `{parser}`")]
    DelimiterMismatch {
        configured: String,
        parser: String,
        language: String,
    },

    #[error("failed to build worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Placeholder names and their matching rules
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaceholderConfig {
    pub names: Vec<String>,
    pub rules: BTreeMap<String, PlaceholderRule>,
}

impl Default for PlaceholderConfig {
    fn default() -> Self {
        Self {
            names: PlaceholderNames::default().iter().map(str::to_string).collect(),
            rules: default_rules(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub placeholders: PlaceholderConfig,
    /// Category of the candidate node an empty-side marker `_` matches
    pub empty_marker_label: String,
    pub fingerprint: FingerprintConfig,
    /// Minimum cosine similarity for the deep comparison
    pub similarity_threshold: f64,
    /// Shortlist size requested from the index
    pub top_k: usize,
    /// Queries with fewer nodes are rejected
    pub min_query_nodes: usize,
    /// Stop after this many matches
    pub max_matches: Option<usize>,
    /// Worker threads; 0 uses one per CPU
    pub workers: usize,
    /// Sort matches by shortlist rank instead of completion order
    pub ordered: bool,
    /// Drop candidates whose old and new tokens are identical
    pub skip_unchanged: bool,
    /// Corpus entries longer than this are not featurized
    pub max_change_chars: usize,
    pub delimiter: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            placeholders: PlaceholderConfig::default(),
            empty_marker_label: DEFAULT_EMPTY_LABEL.to_string(),
            fingerprint: FingerprintConfig::default(),
            similarity_threshold: DEFAULT_THRESHOLD,
            top_k: 1000,
            min_query_nodes: 5,
            max_matches: None,
            workers: 0,
            ordered: true,
            skip_unchanged: true,
            max_change_chars: 500,
            delimiter: DEFAULT_DELIMITER.to_string(),
        }
    }
}

impl SearchConfig {
    /// Parse and validate a YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: SearchConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&yaml)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.placeholder_table()?;
        self.fingerprinter()?;
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(ConfigError::InvalidThreshold(self.similarity_threshold));
        }
        if self.top_k == 0 {
            return Err(ConfigError::ZeroTopK);
        }
        if self.delimiter.is_empty() {
            return Err(ConfigError::EmptyDelimiter);
        }
        Ok(())
    }

    /// Check that `parser` splits changes at the configured delimiter
    pub fn check_parser<P: ChangeParser + ?Sized>(&self, parser: &P) -> Result<(), ConfigError> {
        if parser.delimiter() != self.delimiter {
            return Err(ConfigError::DelimiterMismatch {
                configured: self.delimiter.clone(),
                parser: parser.delimiter().to_string(),
                language: parser.language().to_string(),
            });
        }
        Ok(())
    }

    pub fn placeholder_table(&self) -> Result<PlaceholderTable, ConfigError> {
        PlaceholderTable::new(
            &self.placeholders.names,
            &self.placeholders.rules,
            &self.empty_marker_label,
        )
    }

    pub fn fingerprinter(&self) -> Result<Fingerprinter, ConfigError> {
        Fingerprinter::from_config(&self.fingerprint)
    }
}
