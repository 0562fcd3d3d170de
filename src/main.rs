use anyhow::{Context, Result};
use clap::Parser;
use receval::config::CatalogScope;
use receval::services::ingestion;
use receval::{init_tracing, CancellationFlag, Config, EvaluationEngine};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Evaluates the popularity baseline on a time-split interaction log.
///
/// Candidates default to items seen before the cutoff (`evaluation.catalog =
/// "train"`). Items that first appear in the test period are then never
/// recommended, which lowers recall against them; set `catalog = "full_log"`
/// to offer every item in the log.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    #[arg(short, long, default_value = "config/default.toml")]
    config: String,

    /// Interaction log (.jsonl / .json / .csv)
    #[arg(short, long)]
    events: PathBuf,

    /// Report destination; stdout when omitted
    #[arg(short, long)]
    output: Option<PathBuf>,

    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    std::env::set_var("RUST_LOG", &args.log_level);
    init_tracing();

    let config = Config::from_file(&args.config)
        .with_context(|| format!("loading configuration from {}", args.config))?;
    info!(
        "Evaluation configuration: k={} timeout={:?} workers={} catalog={:?}",
        config.evaluation.k,
        config.evaluation.timeout(),
        config.evaluation.workers,
        config.evaluation.catalog
    );

    if config.evaluation.catalog == CatalogScope::Train {
        info!("Candidates limited to items seen before the cutoff; test-period newcomers cannot be hits");
    }

    let log = ingestion::load_path(&args.events)?;

    let cancellation = CancellationFlag::new();
    let on_signal = cancellation.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, no further users will be started");
            on_signal.cancel();
        }
    });

    let engine = EvaluationEngine::new(config)?.with_cancellation(cancellation);
    let split = engine.split(&log)?;
    let baseline = engine.popularity_baseline(&split)?;
    let report = engine.run_with_split(&log, &split, Arc::new(baseline)).await?;

    for (name, value) in report.metrics() {
        info!("{name} = {value:.4}");
    }

    let rendered = serde_json::to_string_pretty(&report)?;
    match args.output {
        Some(path) => {
            std::fs::write(&path, rendered)
                .with_context(|| format!("writing report to {}", path.display()))?;
            info!("Report {} written to {}", report.run_id(), path.display());
        }
        None => println!("{rendered}"),
    }

    Ok(())
}
