use crate::algorithms::{PopularityRanker, Ranker};
use crate::config::{CatalogScope, Config};
use crate::error::{EvalError, Result};
use crate::models::{
    ExclusionCounts, Interaction, InteractionLog, ItemId, LogSummary, MetricReport, TimeSplit,
};
use crate::services::aggregator::{Aggregator, RunContext};
use crate::services::evaluator::{CancellationFlag, EvaluationTask, RankingEvaluator};
use crate::services::profile::{Eligibility, ProfileBuilder, ProfileSet};
use crate::services::splitter::TimeSplitter;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::{info, warn};

/// What a split would look like, without running a model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitPreview {
    pub log: LogSummary,
    pub cutoff: DateTime<Utc>,
    pub train_interactions: usize,
    pub test_interactions: usize,
    pub users_total: usize,
    pub users_eligible: usize,
    pub excluded: ExclusionCounts,
}

/// Runs split, profile building, ranking and aggregation for one configuration.
///
/// All per-run state lives in locals of `run`; nothing is shared between runs.
pub struct EvaluationEngine {
    config: Config,
    cancellation: CancellationFlag,
}

impl EvaluationEngine {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            cancellation: CancellationFlag::new(),
        })
    }

    pub fn with_cancellation(mut self, cancellation: CancellationFlag) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn split(&self, log: &InteractionLog) -> Result<TimeSplit> {
        TimeSplitter::new(self.config.split).split(log)
    }

    /// Popularity baseline fitted on the train side of `split`.
    pub fn popularity_baseline(&self, split: &TimeSplit) -> Result<PopularityRanker> {
        let tie_break = self.config.popularity_tie_break()?;
        Ok(PopularityRanker::from_train(
            split.train(),
            &self.config.event_weights,
            tie_break,
        ))
    }

    pub fn preview(&self, log: &InteractionLog) -> Result<SplitPreview> {
        let split = self.split(log)?;
        let profiles = ProfileBuilder::new(self.config.event_weights).build(&split);
        let eligibility = profiles.eligibility();

        Ok(SplitPreview {
            log: log.summary(),
            cutoff: split.cutoff(),
            train_interactions: split.train().len(),
            test_interactions: split.test().len(),
            users_total: profiles.users_total(),
            users_eligible: eligibility.eligible.len(),
            excluded: eligibility.excluded.iter().collect(),
        })
    }

    pub async fn run(&self, log: &InteractionLog, ranker: Arc<dyn Ranker>) -> Result<MetricReport> {
        let split = self.split(log)?;
        self.run_with_split(log, &split, ranker).await
    }

    /// Evaluates against an already computed split, e.g. when the ranker was
    /// fitted on `split.train()` first. `split` must have been taken from `log`.
    pub async fn run_with_split(
        &self,
        log: &InteractionLog,
        split: &TimeSplit,
        ranker: Arc<dyn Ranker>,
    ) -> Result<MetricReport> {
        if !split.covers(log) {
            return Err(EvalError::InvalidSplit {
                cutoff: split.cutoff(),
                total: log.len(),
                train: split.train().len(),
                test: split.test().len(),
            });
        }

        let builder = ProfileBuilder::new(self.config.event_weights);
        let profiles = cpu_bound(|| builder.build(split));
        let Eligibility { eligible, excluded } = profiles.eligibility();
        let users_total = profiles.users_total();

        info!(
            "{} of {} users eligible at cutoff {} ({} excluded before ranking)",
            eligible.len(),
            users_total,
            split.cutoff(),
            excluded.len()
        );

        if eligible.is_empty() {
            return Err(no_eligible_users(split, users_total, excluded.len()));
        }

        let catalog = self.catalog(log, split);
        let tasks = build_tasks(&eligible, &profiles, &catalog);

        let evaluator = RankingEvaluator::new(
            ranker,
            self.config.evaluation.k,
            self.config.evaluation.timeout(),
            self.config.evaluation.workers,
        )
        .with_cancellation(self.cancellation.clone());
        let outcomes = evaluator.evaluate(tasks).await?;

        let report = Aggregator::new(RunContext {
            k: self.config.evaluation.k,
            cutoff: split.cutoff(),
            catalog: self.config.evaluation.catalog,
            train_interactions: split.train().len(),
            test_interactions: split.test().len(),
            users_total,
        })
        .aggregate(outcomes, excluded);

        // Every eligible user failed; a report of zeros would read as a score.
        if report.users_evaluated() == 0 {
            warn!("No user could be evaluated; see exclusions for causes");
            return Err(no_eligible_users(split, users_total, report.excluded().total()));
        }

        Ok(report.with_log_summary(log.summary()))
    }

    fn catalog(&self, log: &InteractionLog, split: &TimeSplit) -> Vec<ItemId> {
        let source: &[Interaction] = match self.config.evaluation.catalog {
            CatalogScope::Train => split.train(),
            CatalogScope::FullLog => log.as_slice(),
        };
        source
            .iter()
            .map(|i| i.item_id.as_str())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(String::from)
            .collect()
    }
}

fn build_tasks<'a>(
    eligible: &'a [String],
    profiles: &'a ProfileSet,
    catalog: &'a [ItemId],
) -> Vec<EvaluationTask<'a>> {
    eligible
        .iter()
        .filter_map(|user_id| {
            Some(EvaluationTask {
                user_id: user_id.as_str(),
                profile: profiles.profile(user_id)?,
                ground_truth: profiles.ground_truth(user_id)?,
                catalog,
            })
        })
        .collect()
}

// Only a multi-thread runtime can hand its worker off for the rayon build;
// anywhere else the work runs inline.
fn cpu_bound<R>(work: impl FnOnce() -> R) -> R {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(work)
        }
        _ => work(),
    }
}

fn no_eligible_users(split: &TimeSplit, users_total: usize, excluded: usize) -> EvalError {
    EvalError::NoEligibleUsers {
        cutoff: split.cutoff(),
        users_total,
        excluded,
        train: split.train().len(),
        test: split.test().len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CutoffPolicy, TieBreak};
    use crate::models::{EventType, ScoredItem};
    use crate::algorithms::RankingRequest;
    use chrono::TimeZone;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 1, day, 0, 0, 0).unwrap()
    }

    fn log() -> InteractionLog {
        InteractionLog::from_unsorted(vec![
            Interaction::new("a", "i1", EventType::Purchase, at(1)),
            Interaction::new("b", "i1", EventType::View, at(2)),
            Interaction::new("b", "i2", EventType::View, at(3)),
            Interaction::new("a", "i3", EventType::View, at(20)),
            Interaction::new("b", "i1", EventType::Purchase, at(21)),
            Interaction::new("c", "i2", EventType::View, at(22)),
        ])
    }

    fn config() -> Config {
        Config::new(CutoffPolicy::Absolute { cutoff: at(10) })
            .with_k(2)
            .with_workers(2)
            .with_popularity(TieBreak::ItemIdAsc)
            .with_catalog(CatalogScope::FullLog)
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        assert!(matches!(
            EvaluationEngine::new(config().with_k(0)),
            Err(EvalError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_catalog_scope() {
        let engine = EvaluationEngine::new(config()).unwrap();
        let split = engine.split(&log()).unwrap();
        assert_eq!(engine.catalog(&log(), &split), vec!["i1", "i2", "i3"]);

        let train_only = EvaluationEngine::new(config().with_catalog(CatalogScope::Train)).unwrap();
        assert_eq!(train_only.catalog(&log(), &split), vec!["i1", "i2"]);
    }

    #[test]
    fn test_preview_counts() {
        let engine = EvaluationEngine::new(config()).unwrap();
        let preview = engine.preview(&log()).unwrap();
        assert_eq!(preview.train_interactions, 3);
        assert_eq!(preview.test_interactions, 3);
        assert_eq!(preview.users_total, 3);
        assert_eq!(preview.users_eligible, 1);
        assert_eq!(preview.excluded.no_train_history, 1);
        assert_eq!(preview.excluded.ground_truth_already_seen, 1);
    }

    #[tokio::test]
    async fn test_split_from_another_log_is_rejected() {
        let engine = EvaluationEngine::new(config()).unwrap();
        let split = engine.split(&log()).unwrap();
        let mut events: Vec<Interaction> = log().iter().cloned().collect();
        events.push(Interaction::new("d", "i9", EventType::View, at(25)));
        let other = InteractionLog::from_unsorted(events);

        let ranker = Arc::new(engine.popularity_baseline(&split).unwrap());
        let err = engine.run_with_split(&other, &split, ranker).await.unwrap_err();
        assert!(matches!(err, EvalError::InvalidSplit { total: 7, train: 3, test: 3, .. }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_run_on_multi_thread_runtime() {
        let engine = EvaluationEngine::new(config()).unwrap();
        let split = engine.split(&log()).unwrap();
        let ranker = Arc::new(engine.popularity_baseline(&split).unwrap());

        let report = engine.run_with_split(&log(), &split, ranker).await.unwrap();
        assert_eq!(report.users_evaluated(), 1);
        assert_eq!(report.catalog(), CatalogScope::FullLog);
        assert_eq!(report.user("a").unwrap().metrics.hit_rate, 1.0);
    }

    #[tokio::test]
    async fn test_all_users_failing_is_fatal() {
        let engine = EvaluationEngine::new(config()).unwrap();
        let empty = Arc::new(|_: &RankingRequest| -> anyhow::Result<Vec<ScoredItem>> { Ok(vec![]) });
        let err = engine.run(&log(), empty).await.unwrap_err();
        assert!(matches!(err, EvalError::NoEligibleUsers { users_total: 3, excluded: 3, .. }));
    }
}
