pub mod algorithms;
pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use algorithms::{PopularityRanker, Ranker, RankingRequest};
pub use config::Config;
pub use error::{EvalError, Result};
pub use models::*;
pub use services::engine::{EvaluationEngine, SplitPreview};
pub use services::evaluator::CancellationFlag;

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
}
