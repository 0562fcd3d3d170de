use crate::error::{EvalError, Result};
use crate::models::EventType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Run configuration. The split policy has no default: a reproducible run
/// needs the cutoff chosen explicitly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub split: CutoffPolicy,
    #[serde(default)]
    pub evaluation: EvaluationConfig,
    #[serde(default)]
    pub event_weights: EventWeights,
    #[serde(default)]
    pub popularity: Option<PopularityConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum CutoffPolicy {
    /// Train is everything strictly before `cutoff`.
    Absolute { cutoff: DateTime<Utc> },
    /// The last `test_fraction` of the log's wall-clock span is held out.
    Fractional { test_fraction: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatalogScope {
    /// Items observed before the cutoff. Items first seen in the test period
    /// are never candidates, so recall against them is zero.
    Train,
    /// Every item in the log, including ones first seen after the cutoff.
    FullLog,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    pub k: usize,
    pub timeout_ms: u64,
    pub workers: usize,
    pub catalog: CatalogScope,
}

impl EvaluationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            k: 10,
            timeout_ms: 5_000,
            workers: num_cpus::get(),
            catalog: CatalogScope::Train,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventWeights {
    pub view: f64,
    pub cart_add: f64,
    pub purchase: f64,
}

impl EventWeights {
    pub fn weight(&self, event_type: EventType) -> f64 {
        match event_type {
            EventType::View => self.view,
            EventType::CartAdd => self.cart_add,
            EventType::Purchase => self.purchase,
        }
    }
}

impl Default for EventWeights {
    fn default() -> Self {
        Self {
            view: 1.0,
            cart_add: 2.0,
            purchase: 4.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    ItemIdAsc,
    EarliestSeen,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PopularityConfig {
    pub tie_break: TieBreak,
}

impl Config {
    pub fn new(split: CutoffPolicy) -> Self {
        Self {
            split,
            evaluation: EvaluationConfig::default(),
            event_weights: EventWeights::default(),
            popularity: None,
        }
    }

    pub fn with_k(mut self, k: usize) -> Self {
        self.evaluation.k = k;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.evaluation.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.evaluation.workers = workers;
        self
    }

    pub fn with_catalog(mut self, catalog: CatalogScope) -> Self {
        self.evaluation.catalog = catalog;
        self
    }

    pub fn with_event_weights(mut self, weights: EventWeights) -> Self {
        self.event_weights = weights;
        self
    }

    pub fn with_popularity(mut self, tie_break: TieBreak) -> Self {
        self.popularity = Some(PopularityConfig { tie_break });
        self
    }

    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(
                config::Environment::with_prefix("RECEVAL")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        crate::utils::validation::validate_config(self)
    }

    /// Tie policy for the popularity baseline; an error when it was never configured.
    pub fn popularity_tie_break(&self) -> Result<TieBreak> {
        self.popularity
            .as_ref()
            .map(|p| p.tie_break)
            .ok_or_else(|| {
                EvalError::InvalidConfig(
                    "popularity.tie_break must be set to use the popularity baseline".to_string(),
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_from_file_reads_fractional_policy() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[split]
policy = "fractional"
test_fraction = 0.2

[evaluation]
k = 5
timeout_ms = 250
workers = 2

[event_weights]
purchase = 10.0

[popularity]
tie_break = "earliest_seen"
"#
        )
        .unwrap();

        let config = Config::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.split, CutoffPolicy::Fractional { test_fraction: 0.2 });
        assert_eq!(config.evaluation.k, 5);
        assert_eq!(config.evaluation.timeout(), Duration::from_millis(250));
        assert_eq!(config.evaluation.catalog, CatalogScope::Train);
        assert_eq!(config.event_weights.purchase, 10.0);
        assert_eq!(config.event_weights.view, 1.0);
        assert_eq!(config.popularity_tie_break().unwrap(), TieBreak::EarliestSeen);
    }

    #[test]
    fn test_from_file_requires_split() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[evaluation]\nk = 5").unwrap();
        assert!(Config::from_file(file.path().to_str().unwrap()).is_err());
    }

    #[test]
    fn test_tie_break_not_defaulted() {
        let config = Config::new(CutoffPolicy::Fractional { test_fraction: 0.2 });
        assert!(matches!(
            config.popularity_tie_break(),
            Err(EvalError::InvalidConfig(_))
        ));
    }
}
