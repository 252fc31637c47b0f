//! Search a corpus file for changes matching a query
//!
//! Featurizes the corpus, loads the fingerprints into an in-memory index and
//! runs one query. Set `RUST_LOG=diffsearch=debug` to see why candidates are
//! rejected.
//!
//! Run with: cargo run --release --example search_corpus -- <changes[.gz]> [info] [config.yaml]

use std::env;
use std::process::ExitCode;

use diffsearch::{Corpus, PestChangeParser, SearchConfig, SearchPipeline};
use mimalloc::MiMalloc;
use tracing_subscriber::EnvFilter;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

const QUERY: &str = "ID<1>(ID<2>, LT<3>); -> ID<1>(LT<3>, ID<2>);";

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let Some(changes_path) = args.first() else {
        eprintln!("usage: search_corpus <changes[.gz]> [info] [config.yaml]");
        return ExitCode::FAILURE;
    };

    let config = match args.get(2) {
        Some(path) => match SearchConfig::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Error: {e}");
                return ExitCode::FAILURE;
            }
        },
        None => SearchConfig::default(),
    };

    let corpus = match Corpus::from_file(changes_path) {
        Ok(corpus) => corpus,
        Err(e) => {
            eprintln!("Error reading {changes_path}: {e}");
            return ExitCode::FAILURE;
        }
    };
    let corpus = match args.get(1) {
        Some(info_path) => match corpus.with_info_file(info_path) {
            Ok(corpus) => corpus,
            Err(e) => {
                eprintln!("Error reading {info_path}: {e}");
                return ExitCode::FAILURE;
            }
        },
        None => corpus,
    };

    let parser = PestChangeParser::new();
    let index = match corpus
        .featurize(&parser, &config)
        .map_err(|e| e.to_string())
        .and_then(|table| table.into_index().map_err(|e| e.to_string()))
    {
        Ok(index) => index,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let pipeline = match SearchPipeline::new(config, parser, index, corpus) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    println!("Query: {QUERY}\n");
    let results = match pipeline.search(QUERY) {
        Ok(results) => results,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    for m in &results.matches {
        println!("#{} (rank {}, similarity {:.3})", m.id, m.rank, m.similarity);
        if let Some(url) = m.info.as_ref().and_then(|info| info.commit_url()) {
            println!("  {url}");
        }
        for line in m.change.lines() {
            println!("  | {line}");
        }
        println!();
    }
    println!("{} matches, {:?}", results.matches.len(), results.stats);
    ExitCode::SUCCESS
}
