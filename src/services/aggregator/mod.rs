use crate::config::CatalogScope;
use crate::models::{
    ExclusionCounts, MetricReport, MetricReportParts, MetricSummary, UserEvaluation,
    UserExclusion, UserMetrics,
};
use crate::services::evaluator::UserOutcome;
use crate::utils::{mean, weighted_mean};
use chrono::{DateTime, Utc};
use tracing::info;

/// Run-level facts the aggregator reports next to the metrics.
#[derive(Debug, Clone, Copy)]
pub struct RunContext {
    pub k: usize,
    pub cutoff: DateTime<Utc>,
    pub catalog: CatalogScope,
    pub train_interactions: usize,
    pub test_interactions: usize,
    pub users_total: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct Aggregator {
    context: RunContext,
}

impl Aggregator {
    pub fn new(context: RunContext) -> Self {
        Self { context }
    }

    /// Combines evaluated users into the report.
    ///
    /// The headline mean counts every evaluated user once. The activity-weighted
    /// mean weights each user by train interaction count, which shows how much
    /// heavy users move the number. Excluded users never enter either mean.
    pub fn aggregate(
        &self,
        outcomes: Vec<UserOutcome>,
        mut exclusions: Vec<UserExclusion>,
    ) -> MetricReport {
        let mut per_user: Vec<UserEvaluation> = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            match outcome {
                UserOutcome::Evaluated(evaluation) => per_user.push(evaluation),
                UserOutcome::Excluded(exclusion) => exclusions.push(exclusion),
            }
        }

        per_user.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        exclusions.sort_by(|a, b| a.user_id.cmp(&b.user_id));

        let excluded: ExclusionCounts = exclusions.iter().collect();
        let mean = unweighted_summary(&per_user);
        let activity_weighted_mean = activity_weighted_summary(&per_user);

        info!(
            "Aggregated {} evaluated users ({} excluded): precision@{}={:.4} recall@{}={:.4} ndcg@{}={:.4} hit_rate@{}={:.4}",
            per_user.len(),
            excluded.total(),
            self.context.k,
            mean.precision,
            self.context.k,
            mean.recall,
            self.context.k,
            mean.ndcg,
            self.context.k,
            mean.hit_rate
        );

        MetricReport::from_parts(MetricReportParts {
            k: self.context.k,
            cutoff: self.context.cutoff,
            catalog: self.context.catalog,
            train_interactions: self.context.train_interactions,
            test_interactions: self.context.test_interactions,
            users_total: self.context.users_total,
            excluded,
            mean,
            activity_weighted_mean,
            per_user,
            exclusions,
        })
    }
}

fn unweighted_summary(per_user: &[UserEvaluation]) -> MetricSummary {
    let metric = |pick: fn(&UserMetrics) -> f64| mean(per_user.iter().map(|u| pick(&u.metrics)));

    MetricSummary {
        hit_rate: metric(|m| m.hit_rate),
        precision: metric(|m| m.precision),
        recall: metric(|m| m.recall),
        ndcg: metric(|m| m.ndcg),
    }
}

fn activity_weighted_summary(per_user: &[UserEvaluation]) -> MetricSummary {
    let metric = |pick: fn(&UserMetrics) -> f64| {
        weighted_mean(
            per_user
                .iter()
                .map(|u| (pick(&u.metrics), u.train_interactions as f64)),
        )
    };

    MetricSummary {
        hit_rate: metric(|m| m.hit_rate),
        precision: metric(|m| m.precision),
        recall: metric(|m| m.recall),
        ndcg: metric(|m| m.ndcg),
    }
}
