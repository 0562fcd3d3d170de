use crate::config::CatalogScope;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use uuid::Uuid;

pub type UserId = String;
pub type ItemId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    View,
    CartAdd,
    Purchase,
}

impl EventType {
    pub const ALL: [EventType; 3] = [EventType::View, EventType::CartAdd, EventType::Purchase];

    /// Parses a raw event label, ignoring case and surrounding whitespace.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "view" => Some(EventType::View),
            "cart_add" | "cart" | "addtocart" => Some(EventType::CartAdd),
            "purchase" | "transaction" => Some(EventType::Purchase),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::View => "view",
            EventType::CartAdd => "cart_add",
            EventType::Purchase => "purchase",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub user_id: UserId,
    pub item_id: ItemId,
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
}

impl Interaction {
    pub fn new(
        user_id: impl Into<UserId>,
        item_id: impl Into<ItemId>,
        event_type: EventType,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            item_id: item_id.into(),
            event_type,
            timestamp,
        }
    }
}

/// Interactions ordered by timestamp ascending. Ties keep their input order.
#[derive(Debug, Clone, Default)]
pub struct InteractionLog {
    interactions: Vec<Interaction>,
}

impl InteractionLog {
    pub fn from_unsorted(mut interactions: Vec<Interaction>) -> Self {
        interactions.sort_by_key(|interaction| interaction.timestamp);
        Self { interactions }
    }

    pub fn len(&self) -> usize {
        self.interactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interactions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Interaction> {
        self.interactions.iter()
    }

    pub fn as_slice(&self) -> &[Interaction] {
        &self.interactions
    }

    pub fn first_timestamp(&self) -> Option<DateTime<Utc>> {
        self.interactions.first().map(|i| i.timestamp)
    }

    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.interactions.last().map(|i| i.timestamp)
    }

    pub fn summary(&self) -> LogSummary {
        let mut per_user: HashMap<&str, usize> = HashMap::new();
        let mut items: HashSet<&str> = HashSet::new();
        let mut event_type_counts = BTreeMap::new();

        for interaction in &self.interactions {
            *per_user.entry(interaction.user_id.as_str()).or_insert(0) += 1;
            items.insert(interaction.item_id.as_str());
            *event_type_counts
                .entry(interaction.event_type.as_str().to_string())
                .or_insert(0) += 1;
        }

        let mut counts: Vec<usize> = per_user.values().copied().collect();
        counts.sort_unstable();

        LogSummary {
            total_events: self.interactions.len(),
            unique_users: per_user.len(),
            unique_items: items.len(),
            first_timestamp: self.first_timestamp(),
            last_timestamp: self.last_timestamp(),
            events_per_user_mean: crate::utils::mean(counts.iter().map(|&c| c as f64)),
            events_per_user_median: crate::utils::median_of_sorted(&counts),
            event_type_counts,
        }
    }
}

impl FromIterator<Interaction> for InteractionLog {
    fn from_iter<T: IntoIterator<Item = Interaction>>(iter: T) -> Self {
        Self::from_unsorted(iter.into_iter().collect())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogSummary {
    pub total_events: usize,
    pub unique_users: usize,
    pub unique_items: usize,
    pub first_timestamp: Option<DateTime<Utc>>,
    pub last_timestamp: Option<DateTime<Utc>>,
    pub events_per_user_mean: f64,
    pub events_per_user_median: f64,
    pub event_type_counts: BTreeMap<String, usize>,
}

/// Train/test partition at `cutoff`: train is strictly before it, test at or after.
///
/// Only the splitter builds one, so both sides always come from one sorted log.
#[derive(Debug, Clone)]
pub struct TimeSplit {
    cutoff: DateTime<Utc>,
    train: Vec<Interaction>,
    test: Vec<Interaction>,
}

impl TimeSplit {
    pub(crate) fn new(cutoff: DateTime<Utc>, train: Vec<Interaction>, test: Vec<Interaction>) -> Self {
        Self { cutoff, train, test }
    }

    pub fn cutoff(&self) -> DateTime<Utc> {
        self.cutoff
    }

    pub fn train(&self) -> &[Interaction] {
        &self.train
    }

    pub fn test(&self) -> &[Interaction] {
        &self.test
    }

    /// True when train followed by test is exactly `log`.
    pub fn covers(&self, log: &InteractionLog) -> bool {
        let (train, test) = log.as_slice().split_at(self.train.len().min(log.len()));
        train == self.train.as_slice() && test == self.test.as_slice()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: UserId,
    pub item_weights: HashMap<ItemId, f64>,
    pub interaction_count: usize,
}

impl UserProfile {
    pub fn new(user_id: impl Into<UserId>) -> Self {
        Self {
            user_id: user_id.into(),
            item_weights: HashMap::new(),
            interaction_count: 0,
        }
    }

    pub fn record(&mut self, item_id: &str, weight: f64) {
        *self.item_weights.entry(item_id.to_string()).or_insert(0.0) += weight;
        self.interaction_count += 1;
    }

    pub fn contains(&self, item_id: &str) -> bool {
        self.item_weights.contains_key(item_id)
    }

    pub fn weight(&self, item_id: &str) -> Option<f64> {
        self.item_weights.get(item_id).copied()
    }

    pub fn item_count(&self) -> usize {
        self.item_weights.len()
    }

    pub fn total_weight(&self) -> f64 {
        self.item_weights.values().sum()
    }
}

/// Items a user interacted with at or after the cutoff that were not already
/// in the user's train profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundTruth {
    pub user_id: UserId,
    pub items: HashSet<ItemId>,
    pub already_seen: usize,
}

impl GroundTruth {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, item_id: &str) -> bool {
        self.items.contains(item_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredItem {
    pub item_id: ItemId,
    pub score: f64,
}

impl ScoredItem {
    pub fn new(item_id: impl Into<ItemId>, score: f64) -> Self {
        Self {
            item_id: item_id.into(),
            score,
        }
    }
}

/// A user's top-K after the leakage guard: no profile items, at most K long.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingResult {
    pub items: Vec<ScoredItem>,
    pub leaked_removed: usize,
}

impl RankingResult {
    pub fn item_ids(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(|item| item.item_id.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct UserMetrics {
    pub hit_rate: f64,
    pub precision: f64,
    pub recall: f64,
    pub ndcg: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserEvaluation {
    pub user_id: UserId,
    pub train_interactions: usize,
    pub ground_truth_size: usize,
    pub leaked_removed: usize,
    pub metrics: UserMetrics,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionReason {
    NoTrainHistory,
    NoTestActivity,
    GroundTruthAlreadySeen,
    MissingRanking,
    RankerError,
    Timeout,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserExclusion {
    pub user_id: UserId,
    pub reason: ExclusionReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl UserExclusion {
    pub fn new(user_id: impl Into<UserId>, reason: ExclusionReason) -> Self {
        Self {
            user_id: user_id.into(),
            reason,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExclusionCounts {
    pub no_train_history: usize,
    pub no_test_activity: usize,
    pub ground_truth_already_seen: usize,
    pub missing_ranking: usize,
    pub ranker_error: usize,
    pub timeout: usize,
}

impl ExclusionCounts {
    pub fn record(&mut self, reason: ExclusionReason) {
        match reason {
            ExclusionReason::NoTrainHistory => self.no_train_history += 1,
            ExclusionReason::NoTestActivity => self.no_test_activity += 1,
            ExclusionReason::GroundTruthAlreadySeen => self.ground_truth_already_seen += 1,
            ExclusionReason::MissingRanking => self.missing_ranking += 1,
            ExclusionReason::RankerError => self.ranker_error += 1,
            ExclusionReason::Timeout => self.timeout += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.no_train_history
            + self.no_test_activity
            + self.ground_truth_already_seen
            + self.missing_ranking
            + self.ranker_error
            + self.timeout
    }
}

impl<'a> FromIterator<&'a UserExclusion> for ExclusionCounts {
    fn from_iter<T: IntoIterator<Item = &'a UserExclusion>>(iter: T) -> Self {
        let mut counts = ExclusionCounts::default();
        for exclusion in iter {
            counts.record(exclusion.reason);
        }
        counts
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MetricSummary {
    pub hit_rate: f64,
    pub precision: f64,
    pub recall: f64,
    pub ndcg: f64,
}

/// Outcome of one evaluation run. Built once by the aggregator; read-only after.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricReport {
    run_id: Uuid,
    generated_at: DateTime<Utc>,
    k: usize,
    cutoff: DateTime<Utc>,
    catalog: CatalogScope,
    train_interactions: usize,
    test_interactions: usize,
    users_total: usize,
    users_evaluated: usize,
    excluded: ExclusionCounts,
    mean: MetricSummary,
    activity_weighted_mean: MetricSummary,
    log_summary: Option<LogSummary>,
    per_user: Vec<UserEvaluation>,
    exclusions: Vec<UserExclusion>,
}

pub(crate) struct MetricReportParts {
    pub k: usize,
    pub cutoff: DateTime<Utc>,
    pub catalog: CatalogScope,
    pub train_interactions: usize,
    pub test_interactions: usize,
    pub users_total: usize,
    pub excluded: ExclusionCounts,
    pub mean: MetricSummary,
    pub activity_weighted_mean: MetricSummary,
    pub per_user: Vec<UserEvaluation>,
    pub exclusions: Vec<UserExclusion>,
}

impl MetricReport {
    pub(crate) fn from_parts(parts: MetricReportParts) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            generated_at: Utc::now(),
            k: parts.k,
            cutoff: parts.cutoff,
            catalog: parts.catalog,
            train_interactions: parts.train_interactions,
            test_interactions: parts.test_interactions,
            users_total: parts.users_total,
            users_evaluated: parts.per_user.len(),
            excluded: parts.excluded,
            mean: parts.mean,
            activity_weighted_mean: parts.activity_weighted_mean,
            log_summary: None,
            per_user: parts.per_user,
            exclusions: parts.exclusions,
        }
    }

    pub(crate) fn with_log_summary(mut self, summary: LogSummary) -> Self {
        self.log_summary = Some(summary);
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn generated_at(&self) -> DateTime<Utc> {
        self.generated_at
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn cutoff(&self) -> DateTime<Utc> {
        self.cutoff
    }

    /// Which items were offered as candidates. With `Train`, items first seen
    /// after the cutoff can never be hits.
    pub fn catalog(&self) -> CatalogScope {
        self.catalog
    }

    pub fn train_interactions(&self) -> usize {
        self.train_interactions
    }

    pub fn test_interactions(&self) -> usize {
        self.test_interactions
    }

    pub fn users_total(&self) -> usize {
        self.users_total
    }

    pub fn users_evaluated(&self) -> usize {
        self.users_evaluated
    }

    pub fn excluded(&self) -> &ExclusionCounts {
        &self.excluded
    }

    pub fn mean(&self) -> &MetricSummary {
        &self.mean
    }

    pub fn activity_weighted_mean(&self) -> &MetricSummary {
        &self.activity_weighted_mean
    }

    pub fn log_summary(&self) -> Option<&LogSummary> {
        self.log_summary.as_ref()
    }

    pub fn per_user(&self) -> &[UserEvaluation] {
        &self.per_user
    }

    pub fn exclusions(&self) -> &[UserExclusion] {
        &self.exclusions
    }

    pub fn user(&self, user_id: &str) -> Option<&UserEvaluation> {
        self.per_user.iter().find(|u| u.user_id == user_id)
    }

    /// Flat metric-name to value mapping, e.g. `precision@10`, `ndcg@10_weighted`.
    pub fn metrics(&self) -> BTreeMap<String, f64> {
        let mut out = BTreeMap::new();
        for (suffix, summary) in [("", &self.mean), ("_weighted", &self.activity_weighted_mean)] {
            out.insert(format!("hit_rate@{}{}", self.k, suffix), summary.hit_rate);
            out.insert(format!("precision@{}{}", self.k, suffix), summary.precision);
            out.insert(format!("recall@{}{}", self.k, suffix), summary.recall);
            out.insert(format!("ndcg@{}{}", self.k, suffix), summary.ndcg);
        }
        out
    }
}
