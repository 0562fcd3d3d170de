pub mod aggregator;
pub mod engine;
pub mod evaluator;
pub mod ingestion;
pub mod profile;
pub mod splitter;
