use anyhow::Result;
use clap::Parser;
use receval::services::ingestion;
use receval::{init_tracing, Config, EvaluationEngine};
use std::path::PathBuf;
use tracing::info;

/// Previews a time split: log statistics, split sizes and user eligibility.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "config/default.toml")]
    config: String,

    #[arg(short, long)]
    events: PathBuf,

    #[arg(short, long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();

    std::env::set_var("RUST_LOG", &args.log_level);
    init_tracing();

    let config = Config::from_file(&args.config)?;
    let log = ingestion::load_path(&args.events)?;
    let preview = EvaluationEngine::new(config)?.preview(&log)?;

    info!(
        "Cutoff {}: {} train / {} test interactions, {} of {} users eligible",
        preview.cutoff,
        preview.train_interactions,
        preview.test_interactions,
        preview.users_eligible,
        preview.users_total
    );

    println!("{}", serde_json::to_string_pretty(&preview)?);
    Ok(())
}
