//! Corpus files and feature tables
//!
//! A corpus is a list of code changes, one per line with newlines stored as
//! `$$`, optionally paired line-for-line with commit info. Featurizing a
//! corpus parses and fingerprints every entry in parallel; the resulting
//! rows can be written as CSV (one comma-terminated row per entry) or loaded
//! straight into a [`FlatIndex`].
//!
//! Files ending in `.gz` are decompressed transparently.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use atoi::FromRadix10Checked;
use bstr::ByteSlice;
use bstr::io::BufReadExt;
use flate2::Compression;
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::change::{ChangePattern, decode_change, encode_change};
use crate::config::{ConfigError, SearchConfig};
use crate::fingerprint::FeatureVector;
use crate::index::{CandidateId, FlatIndex, IndexError};
use crate::parser::ChangeParser;

/// Error reading or writing corpus artifacts
#[derive(Debug, Error)]
pub enum CorpusError {
    #[error("failed to open {path}: {source}")]
    Open { path: PathBuf, source: io::Error },

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("line {line}: invalid feature value `{value}`")]
    InvalidFeature { line: usize, value: String },

    #[error("line {line}: expected {expected} features, found {found}")]
    RowLength {
        line: usize,
        expected: usize,
        found: usize,
    },

    #[error("commit info has {info} lines but the corpus has {changes} changes")]
    InfoLength { info: usize, changes: usize },
}

fn is_gzip(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "gz")
}

/// Open a file for buffered reading, decompressing `.gz` files
pub fn open_reader(path: impl AsRef<Path>) -> Result<Box<dyn BufRead>, CorpusError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| CorpusError::Open {
        path: path.to_path_buf(),
        source,
    })?;

    if is_gzip(path) {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

fn read_lines<R: BufRead>(mut reader: R) -> Result<Vec<String>, CorpusError> {
    let mut lines = Vec::new();
    reader.for_byte_line(|line| {
        lines.push(line.to_str_lossy().into_owned());
        Ok(true)
    })?;
    Ok(lines)
}

/// Code changes available for search
#[derive(Debug, Clone, Default)]
pub struct Corpus {
    changes: Vec<String>,
    info: Vec<String>,
}

impl Corpus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a corpus from change texts (real newlines, not `$$`)
    pub fn from_changes<I, S>(changes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            changes: changes.into_iter().map(Into::into).collect(),
            info: Vec::new(),
        }
    }

    /// Build a corpus from encoded single-line changes
    pub fn from_lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::from_changes(lines.into_iter().map(|line| decode_change(line.as_ref())))
    }

    /// Read encoded changes, one per line
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self, CorpusError> {
        Ok(Self::from_lines(read_lines(reader)?))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CorpusError> {
        Self::from_reader(open_reader(path)?)
    }

    /// Attach commit info, one line per change
    pub fn with_info(mut self, info: Vec<String>) -> Result<Self, CorpusError> {
        if info.len() != self.changes.len() {
            return Err(CorpusError::InfoLength {
                info: info.len(),
                changes: self.changes.len(),
            });
        }
        self.info = info;
        Ok(self)
    }

    pub fn with_info_file(self, path: impl AsRef<Path>) -> Result<Self, CorpusError> {
        let info = read_lines(open_reader(path)?)?;
        self.with_info(info)
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Change text of an entry
    pub fn change(&self, id: CandidateId) -> Option<&str> {
        self.changes.get(id).map(String::as_str)
    }

    /// Raw commit info line of an entry
    pub fn info(&self, id: CandidateId) -> Option<&str> {
        self.info.get(id).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (CandidateId, &str)> {
        self.changes.iter().map(String::as_str).enumerate()
    }

    /// Entries `ids`, renumbered from zero in the given order
    pub fn select(&self, ids: &[CandidateId]) -> Corpus {
        let changes = ids
            .iter()
            .filter_map(|&id| self.changes.get(id).cloned())
            .collect();
        let info = if self.info.is_empty() {
            Vec::new()
        } else {
            ids.iter()
                .filter_map(|&id| self.info.get(id).cloned())
                .collect()
        };
        Corpus { changes, info }
    }

    /// Write the changes in single-line form
    pub fn write_lines<W: Write>(&self, mut writer: W) -> io::Result<()> {
        for change in &self.changes {
            writeln!(writer, "{}", encode_change(change))?;
        }
        writer.flush()
    }

    /// Parse and fingerprint every entry in parallel
    ///
    /// Entries longer than `max_change_chars` or failing to parse are left
    /// out of the table and listed in [`FeatureTable::skipped`].
    pub fn featurize<P>(&self, parser: &P, config: &SearchConfig) -> Result<FeatureTable, ConfigError>
    where
        P: ChangeParser + ?Sized,
    {
        let fingerprinter = config.fingerprinter()?;
        config.check_parser(parser)?;

        let vectors: Vec<(CandidateId, Option<FeatureVector>)> = self
            .changes
            .par_iter()
            .enumerate()
            .map(|(id, text)| {
                let chars = text.chars().count();
                if chars > config.max_change_chars {
                    debug!(candidate = id, chars, "skipping oversized change");
                    return (id, None);
                }
                match ChangePattern::parse(parser, text, &config.delimiter) {
                    Ok(change) => (id, Some(fingerprinter.change(&change))),
                    Err(error) => {
                        warn!(candidate = id, %error, "skipping corpus entry that failed to parse");
                        (id, None)
                    }
                }
            })
            .collect();

        let mut table = FeatureTable {
            dimension: fingerprinter.dimension(),
            ..FeatureTable::default()
        };
        for (id, vector) in vectors {
            match vector {
                Some(vector) => table.rows.push((id, vector)),
                None => table.skipped.push(id),
            }
        }

        info!(
            entries = self.len(),
            indexed = table.rows.len(),
            skipped = table.skipped.len(),
            "featurized corpus"
        );
        Ok(table)
    }
}

/// Fingerprints of a featurized corpus
#[derive(Debug, Clone, Default)]
pub struct FeatureTable {
    pub dimension: usize,
    /// Corpus id and fingerprint of every featurized entry, in corpus order
    pub rows: Vec<(CandidateId, FeatureVector)>,
    /// Entries that were too long or failed to parse
    pub skipped: Vec<CandidateId>,
}

impl FeatureTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn ids(&self) -> Vec<CandidateId> {
        self.rows.iter().map(|(id, _)| *id).collect()
    }

    pub fn vectors(&self) -> impl Iterator<Item = &FeatureVector> {
        self.rows.iter().map(|(_, vector)| vector)
    }

    /// Write one CSV row per featurized entry
    ///
    /// Row `i` belongs to `ids()[i]`; pair it with `Corpus::select` to keep
    /// the change file aligned.
    pub fn write_csv<W: Write>(&self, writer: W) -> io::Result<()> {
        write_feature_rows(writer, self.vectors())
    }

    /// Load the rows into an exact index keyed by corpus id
    pub fn into_index(self) -> Result<FlatIndex, IndexError> {
        FlatIndex::from_rows(self.dimension, self.rows)
    }
}

/// Write feature vectors as comma-terminated integer rows
pub fn write_feature_rows<'a, W, I>(mut writer: W, vectors: I) -> io::Result<()>
where
    W: Write,
    I: IntoIterator<Item = &'a FeatureVector>,
{
    for vector in vectors {
        for value in vector.as_slice() {
            write!(writer, "{value},")?;
        }
        writeln!(writer)?;
    }
    writer.flush()
}

/// Read comma-separated integer rows; a trailing comma is allowed
///
/// Blank lines are skipped. Every row must have the length of the first.
pub fn read_feature_rows<R: BufRead>(reader: R) -> Result<Vec<FeatureVector>, CorpusError> {
    let mut rows = Vec::new();
    let mut expected: Option<usize> = None;

    for (index, line) in reader.byte_lines().enumerate() {
        let line = line?;
        let line_num = index + 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let line = line.strip_suffix(b",").unwrap_or(line);

        let mut values = Vec::with_capacity(expected.unwrap_or(0));
        for field in line.split_str(",") {
            let field = field.trim();
            match u32::from_radix_10_checked(field) {
                (Some(value), used) if used > 0 && used == field.len() => values.push(value),
                _ => {
                    return Err(CorpusError::InvalidFeature {
                        line: line_num,
                        value: field.to_str_lossy().into_owned(),
                    });
                }
            }
        }

        match expected {
            Some(expected) if expected != values.len() => {
                return Err(CorpusError::RowLength {
                    line: line_num,
                    expected,
                    found: values.len(),
                });
            }
            Some(_) => {}
            None => expected = Some(values.len()),
        }
        rows.push(FeatureVector::from(values));
    }

    Ok(rows)
}

/// Write feature rows to a file, gzip-compressed for `.gz` paths
pub fn write_feature_file<'a, I>(path: impl AsRef<Path>, vectors: I) -> Result<(), CorpusError>
where
    I: IntoIterator<Item = &'a FeatureVector>,
{
    let path = path.as_ref();
    let file = File::create(path).map_err(|source| CorpusError::Open {
        path: path.to_path_buf(),
        source,
    })?;

    if is_gzip(path) {
        let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
        write_feature_rows(&mut encoder, vectors)?;
        encoder.finish()?.flush()?;
    } else {
        write_feature_rows(BufWriter::new(file), vectors)?;
    }
    Ok(())
}

pub fn read_feature_file(path: impl AsRef<Path>) -> Result<Vec<FeatureVector>, CorpusError> {
    read_feature_rows(open_reader(path)?)
}

/// Where a corpus entry came from
///
/// Parsed from lines of the form
/// `commit <sha> @@ <location> @@ <path>/patch/<owner>-<repo>.patch`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeInfo {
    pub commit: String,
    pub location: String,
    /// `owner/repo`, when the patch path names one
    pub repository: Option<String>,
}

impl ChangeInfo {
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split("@@").map(str::trim);
        let head = parts.next()?;
        let location = parts.next()?;
        let patch = parts.next()?;

        let commit: String = head
            .strip_prefix("commit")
            .unwrap_or(head)
            .split_whitespace()
            .collect();
        if commit.is_empty() {
            return None;
        }

        let repository = patch
            .split_once("patch/")
            .and_then(|(_, rest)| rest.split_once(".patch"))
            .map(|(name, _)| name.replacen('-', "/", 1))
            .filter(|name| !name.is_empty());

        Some(Self {
            commit,
            location: location.to_string(),
            repository,
        })
    }

    /// GitHub URL of the commit
    pub fn commit_url(&self) -> Option<String> {
        let repository = self.repository.as_ref()?;
        Some(format!(
            "https://github.com/{repository}/commit/{}",
            self.commit
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::CandidateIndex;
    use crate::parser::PestChangeParser;
    use std::io::Cursor;

    #[test]
    fn test_read_feature_rows() {
        let csv = "1,2,3,\n\n4,5,6\n 7, 8 ,9,\n";
        let rows = read_feature_rows(Cursor::new(csv)).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].as_slice(), &[1, 2, 3]);
        assert_eq!(rows[2].as_slice(), &[7, 8, 9]);
    }

    #[test]
    fn test_invalid_feature_rows() {
        let err = read_feature_rows(Cursor::new("1,2\n3,x\n")).unwrap_err();
        assert!(matches!(err, CorpusError::InvalidFeature { line: 2, ref value } if value == "x"));

        let err = read_feature_rows(Cursor::new("1,2\n3,-4\n")).unwrap_err();
        assert!(matches!(err, CorpusError::InvalidFeature { line: 2, .. }));

        let err = read_feature_rows(Cursor::new("1,2,\n3,4,5,\n")).unwrap_err();
        assert!(matches!(
            err,
            CorpusError::RowLength {
                line: 2,
                expected: 2,
                found: 3
            }
        ));
    }

    #[test]
    fn test_write_feature_rows() {
        let rows = vec![FeatureVector::from(vec![1, 0, 2]), FeatureVector::from(vec![0, 0, 3])];
        let mut out = Vec::new();
        write_feature_rows(&mut out, &rows).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "1,0,2,\n0,0,3,\n");
    }

    #[test]
    fn test_feature_file_gzip() {
        let dir = tempfile::tempdir().unwrap();
        let rows = vec![FeatureVector::from(vec![4, 5]), FeatureVector::from(vec![6, 7])];
        for name in ["features.csv", "features.csv.gz"] {
            let path = dir.path().join(name);
            write_feature_file(&path, &rows).unwrap();
            assert_eq!(read_feature_file(&path).unwrap(), rows);
        }
    }

    #[test]
    fn test_corpus_lines() {
        let corpus = Corpus::from_reader(Cursor::new("a();$$b(); -> b();\nc(); -> d();\n")).unwrap();
        assert_eq!(corpus.len(), 2);
        assert_eq!(corpus.change(0), Some("a();\nb(); -> b();"));
        assert_eq!(corpus.change(2), None);

        let mut out = Vec::new();
        corpus.write_lines(&mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "a();$$b(); -> b();\nc(); -> d();\n"
        );
    }

    #[test]
    fn test_read_lines() {
        let lines = read_lines(Cursor::new("a();\r\nb(); -> c();\nlast")).unwrap();
        assert_eq!(lines, vec!["a();", "b(); -> c();", "last"]);
        assert!(read_lines(Cursor::new("")).unwrap().is_empty());
    }

    #[test]
    fn test_corpus_gzip_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("changes.txt.gz");
        let mut encoder = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        encoder.write_all(b"x(); -> y();\nz(); -> w();\n").unwrap();
        encoder.finish().unwrap();

        let corpus = Corpus::from_file(&path).unwrap();
        assert_eq!(corpus.len(), 2);
        assert_eq!(corpus.change(1), Some("z(); -> w();"));

        let missing = dir.path().join("missing.txt");
        assert!(matches!(Corpus::from_file(&missing), Err(CorpusError::Open { .. })));
    }

    #[test]
    fn test_info_alignment() {
        let corpus = Corpus::from_changes(["a(); -> b();"]);
        assert!(matches!(
            corpus.clone().with_info(vec![]),
            Err(CorpusError::InfoLength { info: 0, changes: 1 })
        ));
        let corpus = corpus.with_info(vec!["commit abc @@ A.java @@ x/patch/o-r.patch".to_string()]).unwrap();
        assert!(corpus.info(0).unwrap().starts_with("commit abc"));
    }

    #[test]
    fn test_change_info() {
        let info = ChangeInfo::parse(
            "commit 1a2b3c @@ src/Main.java:42 @@ ./data/patch/apache-commons-lang.patch",
        )
        .unwrap();
        assert_eq!(info.commit, "1a2b3c");
        assert_eq!(info.location, "src/Main.java:42");
        assert_eq!(info.repository.as_deref(), Some("apache/commons-lang"));
        assert_eq!(
            info.commit_url().as_deref(),
            Some("https://github.com/apache/commons-lang/commit/1a2b3c")
        );

        let no_repo = ChangeInfo::parse("commit ff @@ A.java @@ unknown").unwrap();
        assert!(no_repo.commit_url().is_none());
        assert!(ChangeInfo::parse("commit ff @@ A.java").is_none());
        assert!(ChangeInfo::parse("commit @@ A.java @@ x").is_none());
    }

    #[test]
    fn test_featurize_skips_bad_entries() {
        let long_call = format!("f({}); -> f();", "a, ".repeat(300) + "a");
        let corpus = Corpus::from_changes([
            "foo(x); -> foo(y);".to_string(),
            "foo( -> ".to_string(),
            long_call,
            "bar(); -> baz();".to_string(),
        ]);
        let config = SearchConfig {
            fingerprint: crate::fingerprint::FingerprintConfig { buckets: 16 },
            ..SearchConfig::default()
        };
        let table = corpus.featurize(&PestChangeParser::new(), &config).unwrap();
        assert_eq!(table.ids(), vec![0, 3]);
        assert_eq!(table.skipped, vec![1, 2]);
        assert_eq!(table.dimension, 32);
        assert!(table.vectors().all(|v| v.len() == 32));

        let mut csv = Vec::new();
        table.write_csv(&mut csv).unwrap();
        assert_eq!(read_feature_rows(Cursor::new(csv)).unwrap().len(), 2);

        let selected = corpus.select(&table.ids());
        assert_eq!(selected.len(), 2);
        assert_eq!(selected.change(1), Some("bar(); -> baz();"));

        let index = table.into_index().unwrap();
        let query = index.lookup(&FeatureVector::zeros(32), 5).unwrap();
        assert_eq!(query.len(), 2);
    }

    #[test]
    fn test_size_limit_counts_characters() {
        let accented = format!("s(\"{}\"); -> s();", "é".repeat(20));
        let ascii = format!("t(\"{}\"); -> t();", "a".repeat(40));
        assert!(accented.len() > 40 && accented.chars().count() <= 40);

        let corpus = Corpus::from_changes([accented, ascii]);
        let config = SearchConfig {
            max_change_chars: 40,
            ..SearchConfig::default()
        };
        let table = corpus.featurize(&PestChangeParser::new(), &config).unwrap();
        assert_eq!(table.ids(), vec![0]);
        assert_eq!(table.skipped, vec![1]);
    }

    #[test]
    fn test_featurize_checks_delimiter() {
        let corpus = Corpus::from_changes(["a(); => b();"]);
        let config = SearchConfig {
            delimiter: "=>".to_string(),
            ..SearchConfig::default()
        };
        assert!(matches!(
            corpus.featurize(&PestChangeParser::new(), &config),
            Err(ConfigError::DelimiterMismatch { .. })
        ));
    }
}
