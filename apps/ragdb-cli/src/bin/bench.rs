use std::path::PathBuf;

use clap::Parser;

use ragdb_cli::{init_tracing, load_settings, print_summary, Pipeline};
use ragdb_hybrid::TimingSummary;

#[derive(Parser, Debug)]
#[command(name = "ragdb-bench")]
#[command(about = "Compare semantic, keyword and hybrid search latency")]
struct Args {
    #[arg(required = true)]
    dirs: Vec<PathBuf>,

    /// Queries to time (repeatable)
    #[arg(short, long, required = true)]
    query: Vec<String>,

    #[arg(short, long, default_value_t = 5)]
    iterations: usize,

    #[arg(long)]
    mock: bool,

    /// Output results as JSON
    #[arg(long)]
    json: bool,
}

fn row(name: &str, t: &TimingSummary) {
    println!("{name:<10} {:>10.3} {:>10.3} {:>10.3} {:>8}", t.average_ms, t.min_ms, t.max_ms, t.total_queries);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();
    let settings = load_settings(args.mock)?;
    let pipeline = Pipeline::build(&settings).await?;
    let summary = pipeline.ingest(&args.dirs, None).await?;
    print_summary(&summary);

    let report = pipeline.engine.benchmark_search_performance(&args.query, args.iterations).await;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    println!("\n{:<10} {:>10} {:>10} {:>10} {:>8}", "path", "avg ms", "min ms", "max ms", "queries");
    row("semantic", &report.semantic_only);
    row("keyword", &report.keyword_only);
    row("hybrid", &report.hybrid);
    Ok(())
}
