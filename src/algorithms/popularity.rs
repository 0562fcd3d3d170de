use super::{Ranker, RankingRequest};
use crate::config::{EventWeights, TieBreak};
use crate::models::{Interaction, ItemId, ScoredItem};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tracing::info;

/// Ranks items by summed event weight over the train period.
///
/// Built per run from train interactions only. The global order is fixed at
/// construction; `rank` filters it down to the user's candidate pool.
#[derive(Debug, Clone)]
pub struct PopularityRanker {
    ranked: Vec<ScoredItem>,
}

impl PopularityRanker {
    pub fn from_train(train: &[Interaction], weights: &EventWeights, tie_break: TieBreak) -> Self {
        let mut scores: HashMap<&str, f64> = HashMap::new();
        let mut first_seen: HashMap<&str, DateTime<Utc>> = HashMap::new();

        for interaction in train {
            *scores.entry(interaction.item_id.as_str()).or_insert(0.0) +=
                weights.weight(interaction.event_type);
            first_seen
                .entry(interaction.item_id.as_str())
                .and_modify(|ts| *ts = (*ts).min(interaction.timestamp))
                .or_insert(interaction.timestamp);
        }

        let mut ranked: Vec<ScoredItem> = scores
            .into_iter()
            .map(|(item_id, score)| ScoredItem::new(item_id, score))
            .collect();

        match tie_break {
            TieBreak::ItemIdAsc => crate::utils::sort_ranked(&mut ranked),
            TieBreak::EarliestSeen => ranked.sort_by(|a, b| {
                b.score
                    .total_cmp(&a.score)
                    .then_with(|| first_seen[a.item_id.as_str()].cmp(&first_seen[b.item_id.as_str()]))
                    .then_with(|| a.item_id.cmp(&b.item_id))
            }),
        }

        info!(
            "Built popularity baseline over {} items ({:?} ties)",
            ranked.len(),
            tie_break
        );

        Self { ranked }
    }
}

impl Ranker for PopularityRanker {
    fn rank(&self, request: &RankingRequest) -> anyhow::Result<Vec<ScoredItem>> {
        let pool: HashSet<&str> = request.candidates.iter().map(String::as_str).collect();

        let mut out: Vec<ScoredItem> = self
            .ranked
            .iter()
            .filter(|item| pool.contains(item.item_id.as_str()))
            .take(request.limit)
            .cloned()
            .collect();

        // Candidates with no train signal trail the list at score zero.
        if out.len() < request.limit {
            let scored: HashSet<&str> = out.iter().map(|i| i.item_id.as_str()).collect();
            let known: HashSet<&str> = self.ranked.iter().map(|i| i.item_id.as_str()).collect();
            let mut unseen: Vec<&ItemId> = request
                .candidates
                .iter()
                .filter(|id| !known.contains(id.as_str()) && !scored.contains(id.as_str()))
                .collect();
            unseen.sort();
            unseen.dedup();
            let room = request.limit - out.len();
            out.extend(unseen.into_iter().take(room).map(|id| ScoredItem::new(id.as_str(), 0.0)));
        }

        Ok(out)
    }

    fn name(&self) -> &str {
        "popularity"
    }
}
