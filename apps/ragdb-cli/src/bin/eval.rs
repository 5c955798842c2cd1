use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use ragdb_cli::{init_tracing, load_settings};
use ragdb_core::traits::FileContentSource;
use ragdb_core::types::IndexedText;
use ragdb_embed::EmbeddingService;
use ragdb_hybrid::{code_search_benchmark, generate_report, sample_corpus, ModelEvaluator};
use ragdb_indexer::FileIndexService;

#[derive(Parser, Debug)]
#[command(name = "ragdb-eval")]
#[command(about = "Rank embedding models on the code search benchmark")]
struct Args {
    /// Models to evaluate (comma-separated)
    #[arg(long, value_delimiter = ',', default_value = "embeddinggemma:latest,nomic-embed-text,bge-m3")]
    models: Vec<String>,

    /// Use files under this directory as the corpus instead of the built-in one
    #[arg(long)]
    corpus: Option<PathBuf>,

    #[arg(long, default_value_t = 10)]
    top_k: usize,

    /// Write the markdown report here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    #[arg(long)]
    mock: bool,
}

async fn load_corpus(files: &FileIndexService, dir: PathBuf) -> anyhow::Result<Vec<IndexedText>> {
    files.index_files(&[dir], None).await?;
    let mut corpus = Vec::new();
    for path in files.indexed_files() {
        if let Some(content) = files.get_file_content(&path).await {
            let metadata = [("document_id".to_string(), path.clone())].into_iter().collect();
            corpus.push(IndexedText { id: path, content, metadata });
        }
    }
    Ok(corpus)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();
    let settings = load_settings(args.mock)?;

    let corpus = match args.corpus {
        Some(dir) => load_corpus(&FileIndexService::new(settings.files.clone()), dir).await?,
        None => sample_corpus(),
    };
    anyhow::ensure!(!corpus.is_empty(), "corpus is empty");

    let service = std::sync::Arc::new(EmbeddingService::new(settings.embedding)?);
    let evaluator = ModelEvaluator::new(service).with_top_k(args.top_k);
    let queries = code_search_benchmark();
    let results = evaluator.evaluate_models(&args.models, &corpus, &queries).await;
    let report = generate_report(&results, queries.len());

    match args.output {
        Some(path) => std::fs::write(&path, report).with_context(|| format!("writing {}", path.display()))?,
        None => println!("{report}"),
    }
    Ok(())
}
