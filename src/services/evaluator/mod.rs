use crate::algorithms::{Ranker, RankingRequest};
use crate::error::{EvalError, Result};
use crate::models::{
    ExclusionReason, GroundTruth, ItemId, RankingResult, ScoredItem, UserEvaluation,
    UserExclusion, UserProfile,
};
use crate::utils::metrics::MetricsCalculator;
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Shared abort switch, checked before each user starts.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One eligible user: has a train profile and non-empty ground truth.
#[derive(Debug, Clone, Copy)]
pub struct EvaluationTask<'a> {
    pub user_id: &'a str,
    pub profile: &'a UserProfile,
    pub ground_truth: &'a GroundTruth,
    pub catalog: &'a [ItemId],
}

impl EvaluationTask<'_> {
    /// Catalog minus the user's profile items, in catalog order.
    pub fn candidate_pool(&self) -> Vec<ItemId> {
        self.catalog
            .iter()
            .filter(|item| !self.profile.contains(item))
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum UserOutcome {
    Evaluated(UserEvaluation),
    Excluded(UserExclusion),
}

impl UserOutcome {
    fn from_error(user_id: &str, err: EvalError) -> Self {
        let reason = err
            .exclusion_reason()
            .unwrap_or(ExclusionReason::RankerError);
        UserOutcome::Excluded(UserExclusion::new(user_id, reason).with_detail(err.to_string()))
    }
}

pub struct RankingEvaluator {
    ranker: Arc<dyn Ranker>,
    calculator: MetricsCalculator,
    timeout: Duration,
    workers: usize,
    cancellation: CancellationFlag,
}

impl RankingEvaluator {
    pub fn new(ranker: Arc<dyn Ranker>, k: usize, timeout: Duration, workers: usize) -> Self {
        Self {
            ranker,
            calculator: MetricsCalculator::new(k),
            timeout,
            workers: workers.max(1),
            cancellation: CancellationFlag::new(),
        }
    }

    pub fn with_cancellation(mut self, cancellation: CancellationFlag) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn k(&self) -> usize {
        self.calculator.k()
    }

    /// Evaluates every task with at most `workers` rankings in flight.
    ///
    /// Per-user failures come back as `UserOutcome::Excluded`. The only error
    /// is `Aborted`, when the cancellation flag stopped users from starting.
    pub async fn evaluate(&self, tasks: Vec<EvaluationTask<'_>>) -> Result<Vec<UserOutcome>> {
        let total = tasks.len();
        info!(
            "Evaluating {} users with {} (k={}, workers={}, timeout={:?})",
            total,
            self.ranker.name(),
            self.k(),
            self.workers,
            self.timeout
        );

        let outcomes: Vec<Option<UserOutcome>> = stream::iter(tasks)
            .map(|task| async move {
                if self.cancellation.is_cancelled() {
                    return None;
                }
                Some(self.evaluate_user(task).await)
            })
            .buffer_unordered(self.workers)
            .collect()
            .await;

        let completed: Vec<UserOutcome> = outcomes.into_iter().flatten().collect();
        if completed.len() < total {
            warn!(
                "Evaluation aborted: {} of {} users completed",
                completed.len(),
                total
            );
            return Err(EvalError::Aborted {
                completed: completed.len(),
                remaining: total - completed.len(),
            });
        }

        Ok(completed)
    }

    pub async fn evaluate_user(&self, task: EvaluationTask<'_>) -> UserOutcome {
        let ranked = match self.request_ranking(&task).await {
            Ok(ranked) => ranked,
            Err(err) => {
                warn!("Excluding user {}: {}", task.user_id, err);
                return UserOutcome::from_error(task.user_id, err);
            }
        };

        let result = match apply_leakage_guard(task.user_id, ranked, task.profile, self.k()) {
            Ok(result) => result,
            Err(err) => {
                warn!("Excluding user {}: {}", task.user_id, err);
                return UserOutcome::from_error(task.user_id, err);
            }
        };

        let metrics = self.calculator.calculate_all(result.item_ids(), task.ground_truth);
        debug!(
            "User {}: {} items, {} leaked removed, {:?}",
            task.user_id,
            result.items.len(),
            result.leaked_removed,
            metrics
        );

        UserOutcome::Evaluated(UserEvaluation {
            user_id: task.user_id.to_string(),
            train_interactions: task.profile.interaction_count,
            ground_truth_size: task.ground_truth.len(),
            leaked_removed: result.leaked_removed,
            metrics,
        })
    }

    // Each call gets its own detached thread. A timed-out call is abandoned,
    // not interrupted, and it never holds up runtime shutdown.
    async fn request_ranking(&self, task: &EvaluationTask<'_>) -> Result<Vec<ScoredItem>> {
        let request = RankingRequest {
            user_id: task.user_id.to_string(),
            candidates: task.candidate_pool(),
            limit: self.k() + task.profile.item_count(),
        };
        let ranker = Arc::clone(&self.ranker);
        let ranker_error = |message: String| EvalError::Ranker {
            user_id: task.user_id.to_string(),
            message,
        };

        let (tx, rx) = oneshot::channel();
        std::thread::Builder::new()
            .name(format!("ranker-{}", task.user_id))
            .spawn(move || {
                let _ = tx.send(ranker.rank(&request));
            })
            .map_err(|e| ranker_error(format!("could not start ranking thread: {}", e)))?;

        match tokio::time::timeout(self.timeout, rx).await {
            Err(_) => Err(EvalError::Timeout {
                user_id: task.user_id.to_string(),
                limit: self.timeout,
            }),
            // The sender only drops without sending when the ranker panicked.
            Ok(Err(_)) => Err(ranker_error("ranker panicked".to_string())),
            Ok(Ok(Err(err))) => Err(ranker_error(format!("{:#}", err))),
            Ok(Ok(Ok(items))) => Ok(items),
        }
    }
}

/// Normalizes a ranker's output into a top-K that contains no profile items.
///
/// Items are stable-sorted by score descending so the ranker's own tie order
/// survives. Duplicates keep their first occurrence. Profile items are removed
/// before truncating to `k`, so a leaked item never takes a slot.
pub fn apply_leakage_guard(
    user_id: &str,
    mut ranked: Vec<ScoredItem>,
    profile: &UserProfile,
    k: usize,
) -> Result<RankingResult> {
    if let Some(bad) = ranked.iter().find(|item| !item.score.is_finite()) {
        return Err(EvalError::Ranker {
            user_id: user_id.to_string(),
            message: format!("non-finite score {} for item {}", bad.score, bad.item_id),
        });
    }

    ranked.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut seen = HashSet::new();
    let mut leaked_removed = 0;
    let mut items = Vec::with_capacity(k);

    for item in ranked {
        if !seen.insert(item.item_id.clone()) {
            continue;
        }
        if profile.contains(&item.item_id) {
            leaked_removed += 1;
            continue;
        }
        if items.len() < k {
            items.push(item);
        }
    }

    if items.is_empty() {
        return Err(EvalError::MissingRanking {
            user_id: user_id.to_string(),
        });
    }

    Ok(RankingResult {
        items,
        leaked_removed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(user: &str, items: &[&str]) -> UserProfile {
        let mut profile = UserProfile::new(user);
        for item in items {
            profile.record(item, 1.0);
        }
        profile
    }

    fn truth(user: &str, items: &[&str]) -> GroundTruth {
        GroundTruth {
            user_id: user.to_string(),
            items: items.iter().map(|s| s.to_string()).collect(),
            already_seen: 0,
        }
    }

    fn catalog(items: &[&str]) -> Vec<ItemId> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn fixed_ranker(items: Vec<(&'static str, f64)>) -> Arc<dyn Ranker> {
        Arc::new(move |_: &RankingRequest| -> anyhow::Result<Vec<ScoredItem>> {
            Ok(items.iter().map(|(id, s)| ScoredItem::new(*id, *s)).collect())
        })
    }

    #[test]
    fn test_leakage_guard_strips_profile_items_before_truncating() {
        let profile = profile("u", &["a", "b"]);
        let ranked = vec![
            ScoredItem::new("a", 0.9),
            ScoredItem::new("c", 0.8),
            ScoredItem::new("b", 0.7),
            ScoredItem::new("d", 0.6),
            ScoredItem::new("e", 0.5),
        ];
        let result = apply_leakage_guard("u", ranked, &profile, 2).unwrap();
        assert_eq!(result.item_ids().collect::<Vec<_>>(), vec!["c", "d"]);
        assert_eq!(result.leaked_removed, 2);
        assert!(result.item_ids().all(|id| !profile.contains(id)));
    }

    #[test]
    fn test_leakage_guard_sorts_and_dedups() {
        let profile = profile("u", &[]);
        let ranked = vec![
            ScoredItem::new("low", 0.1),
            ScoredItem::new("high", 0.9),
            ScoredItem::new("high", 0.2),
            ScoredItem::new("tie_first", 0.5),
            ScoredItem::new("tie_second", 0.5),
        ];
        let result = apply_leakage_guard("u", ranked, &profile, 10).unwrap();
        assert_eq!(
            result.item_ids().collect::<Vec<_>>(),
            vec!["high", "tie_first", "tie_second", "low"]
        );
    }

    #[test]
    fn test_leakage_guard_only_leaked_items_is_missing_ranking() {
        let profile = profile("u", &["a"]);
        let err = apply_leakage_guard("u", vec![ScoredItem::new("a", 1.0)], &profile, 5).unwrap_err();
        assert!(matches!(err, EvalError::MissingRanking { .. }));
    }

    #[test]
    fn test_leakage_guard_rejects_nan() {
        let profile = profile("u", &[]);
        let err = apply_leakage_guard("u", vec![ScoredItem::new("a", f64::NAN)], &profile, 5).unwrap_err();
        assert_eq!(err.exclusion_reason(), Some(ExclusionReason::RankerError));
    }

    #[test]
    fn test_candidate_pool_excludes_profile() {
        let profile = profile("u", &["b"]);
        let truth = truth("u", &["c"]);
        let catalog = catalog(&["a", "b", "c"]);
        let task = EvaluationTask {
            user_id: "u",
            profile: &profile,
            ground_truth: &truth,
            catalog: &catalog,
        };
        assert_eq!(task.candidate_pool(), vec!["a".to_string(), "c".to_string()]);
    }

    #[tokio::test]
    async fn test_evaluate_user_metrics() {
        let profile = profile("u", &["a"]);
        let truth = truth("u", &["c", "z"]);
        let catalog = catalog(&["a", "b", "c", "z"]);
        let evaluator = RankingEvaluator::new(
            fixed_ranker(vec![("a", 0.9), ("c", 0.8), ("b", 0.7)]),
            2,
            Duration::from_secs(1),
            1,
        );

        let outcome = evaluator
            .evaluate_user(EvaluationTask {
                user_id: "u",
                profile: &profile,
                ground_truth: &truth,
                catalog: &catalog,
            })
            .await;

        let evaluation = match outcome {
            UserOutcome::Evaluated(evaluation) => evaluation,
            other => panic!("expected evaluated outcome, got {:?}", other),
        };
        assert_eq!(evaluation.leaked_removed, 1);
        assert_eq!(evaluation.metrics.hit_rate, 1.0);
        assert!((evaluation.metrics.precision - 0.5).abs() < 1e-9);
        assert!((evaluation.metrics.recall - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_empty_ranking_is_excluded_not_zero() {
        let profile = profile("u", &["a"]);
        let truth = truth("u", &["c"]);
        let catalog = catalog(&["a", "c"]);
        let evaluator = RankingEvaluator::new(fixed_ranker(vec![]), 5, Duration::from_secs(1), 1);

        let outcome = evaluator
            .evaluate_user(EvaluationTask {
                user_id: "u",
                profile: &profile,
                ground_truth: &truth,
                catalog: &catalog,
            })
            .await;

        assert!(matches!(
            outcome,
            UserOutcome::Excluded(UserExclusion { reason: ExclusionReason::MissingRanking, .. })
        ));
    }

    #[tokio::test]
    async fn test_ranker_error_is_excluded() {
        let profile = profile("u", &["a"]);
        let truth = truth("u", &["c"]);
        let catalog = catalog(&["a", "c"]);
        let failing: Arc<dyn Ranker> = Arc::new(|_: &RankingRequest| -> anyhow::Result<Vec<ScoredItem>> {
            anyhow::bail!("model not loaded")
        });
        let evaluator = RankingEvaluator::new(failing, 5, Duration::from_secs(1), 1);

        let outcome = evaluator
            .evaluate_user(EvaluationTask {
                user_id: "u",
                profile: &profile,
                ground_truth: &truth,
                catalog: &catalog,
            })
            .await;

        match outcome {
            UserOutcome::Excluded(exclusion) => {
                assert_eq!(exclusion.reason, ExclusionReason::RankerError);
                assert!(exclusion.detail.unwrap().contains("model not loaded"));
            }
            other => panic!("expected exclusion, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_slow_ranker_times_out() {
        let profile = profile("u", &["a"]);
        let truth = truth("u", &["c"]);
        let catalog = catalog(&["a", "c"]);
        let slow: Arc<dyn Ranker> = Arc::new(|_: &RankingRequest| -> anyhow::Result<Vec<ScoredItem>> {
            std::thread::sleep(Duration::from_millis(300));
            Ok(vec![ScoredItem::new("c", 1.0)])
        });
        let evaluator = RankingEvaluator::new(slow, 5, Duration::from_millis(20), 1);

        let outcome = evaluator
            .evaluate_user(EvaluationTask {
                user_id: "u",
                profile: &profile,
                ground_truth: &truth,
                catalog: &catalog,
            })
            .await;

        assert!(matches!(
            outcome,
            UserOutcome::Excluded(UserExclusion { reason: ExclusionReason::Timeout, .. })
        ));
    }

    #[test]
    fn test_abandoned_ranker_does_not_block_shutdown() {
        let profile = profile("u", &["a"]);
        let truth = truth("u", &["c"]);
        let catalog = catalog(&["a", "c"]);
        let hung: Arc<dyn Ranker> = Arc::new(|_: &RankingRequest| -> anyhow::Result<Vec<ScoredItem>> {
            std::thread::sleep(Duration::from_secs(5));
            Ok(vec![])
        });
        let evaluator = RankingEvaluator::new(hung, 5, Duration::from_millis(20), 1);

        let rt = tokio::runtime::Runtime::new().unwrap();
        let outcome = rt.block_on(evaluator.evaluate_user(EvaluationTask {
            user_id: "u",
            profile: &profile,
            ground_truth: &truth,
            catalog: &catalog,
        }));
        assert!(matches!(
            outcome,
            UserOutcome::Excluded(UserExclusion { reason: ExclusionReason::Timeout, .. })
        ));

        let started = std::time::Instant::now();
        drop(rt);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_panicking_ranker_is_excluded() {
        let profile = profile("u", &["a"]);
        let truth = truth("u", &["c"]);
        let catalog = catalog(&["a", "c"]);
        let broken: Arc<dyn Ranker> = Arc::new(|_: &RankingRequest| -> anyhow::Result<Vec<ScoredItem>> {
            panic!("model state corrupted")
        });
        let evaluator = RankingEvaluator::new(broken, 5, Duration::from_secs(1), 1);

        let outcome = evaluator
            .evaluate_user(EvaluationTask {
                user_id: "u",
                profile: &profile,
                ground_truth: &truth,
                catalog: &catalog,
            })
            .await;

        assert!(matches!(
            outcome,
            UserOutcome::Excluded(UserExclusion { reason: ExclusionReason::RankerError, .. })
        ));
    }

    #[tokio::test]
    async fn test_cancelled_run_is_aborted() {
        let profile = profile("u", &["a"]);
        let truth = truth("u", &["c"]);
        let catalog = catalog(&["a", "c"]);
        let flag = CancellationFlag::new();
        flag.cancel();
        let evaluator = RankingEvaluator::new(fixed_ranker(vec![("c", 1.0)]), 5, Duration::from_secs(1), 2)
            .with_cancellation(flag);

        let tasks = vec![
            EvaluationTask {
                user_id: "u",
                profile: &profile,
                ground_truth: &truth,
                catalog: &catalog,
            };
            3
        ];
        let err = evaluator.evaluate(tasks).await.unwrap_err();
        assert!(matches!(err, EvalError::Aborted { completed: 0, remaining: 3 }));
    }
}
