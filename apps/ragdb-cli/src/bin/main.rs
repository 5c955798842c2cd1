use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use ragdb_cli::{init_tracing, load_settings, print_summary, Pipeline};
use ragdb_core::types::ResultType;
use ragdb_indexer::FileIndexService;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SearchType {
    Semantic,
    Keyword,
    Bm25,
    Hybrid,
}

impl From<SearchType> for ResultType {
    fn from(t: SearchType) -> Self {
        match t {
            SearchType::Semantic => ResultType::Semantic,
            SearchType::Keyword => ResultType::Keyword,
            SearchType::Bm25 => ResultType::Bm25,
            SearchType::Hybrid => ResultType::Hybrid,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "ragdb")]
#[command(about = "Index source trees and run hybrid search over them")]
struct Args {
    /// Serve mock embeddings instead of calling backends
    #[arg(long, global = true)]
    mock: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Index directories, then answer the given queries
    Ingest {
        #[arg(required = true)]
        dirs: Vec<PathBuf>,

        /// File extensions to include (comma-separated), overriding config
        #[arg(long, value_delimiter = ',')]
        ext: Option<Vec<String>>,

        /// Query to run after indexing (repeatable)
        #[arg(short, long)]
        query: Vec<String>,

        #[arg(long = "type", value_enum, default_value = "hybrid")]
        search_type: SearchType,

        #[arg(short, long, default_value_t = 5)]
        limit: usize,

        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },
    /// List indexable files whose name or content matches every term
    Files {
        #[arg(required = true)]
        dirs: Vec<PathBuf>,

        #[arg(short, long)]
        query: String,

        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();
    let settings = load_settings(args.mock)?;

    match args.command {
        Command::Ingest { dirs, ext, query, search_type, limit, json } => {
            let pipeline = Pipeline::build(&settings).await?;
            let summary = pipeline.ingest(&dirs, ext.as_deref()).await?;
            print_summary(&summary);

            for q in &query {
                let results = pipeline.engine.search(q, search_type.into(), limit).await?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&results)?);
                    continue;
                }
                println!("\n{q}");
                for (i, r) in results.iter().enumerate() {
                    let loc = match (r.metadata.get("document_id"), r.metadata.get("start_line")) {
                        (Some(doc), Some(line)) => format!("{doc}:{line}"),
                        (Some(doc), None) => doc.clone(),
                        _ => r.id.clone(),
                    };
                    let first = r.content.lines().next().unwrap_or_default();
                    println!("  {}. [{:.4}] {loc}  {first}", i + 1, r.score);
                }
            }
            if !query.is_empty() && !json {
                let stats = pipeline.engine.get_statistics().await;
                println!("\n{} searches, {:.1} ms average", stats.searches_performed, stats.average_search_time_ms);
            }
        }
        Command::Files { dirs, query, limit } => {
            let files = FileIndexService::new(settings.files);
            let report = files.index_files(&dirs, None).await?;
            println!("{} files indexed, {} skipped", report.indexed_files, report.skipped_files);
            for path in files.search_files(&query, limit).await {
                println!("{path}");
            }
        }
    }
    Ok(())
}
