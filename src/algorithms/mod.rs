pub mod popularity;

pub use popularity::PopularityRanker;

use crate::models::{ItemId, ScoredItem, UserId};

/// What a ranker is asked for one user.
#[derive(Debug, Clone)]
pub struct RankingRequest {
    pub user_id: UserId,
    /// Catalog minus the items already in the user's train profile.
    pub candidates: Vec<ItemId>,
    pub limit: usize,
}

/// The model under evaluation, as a single capability: user and candidate pool
/// in, items sorted by score descending out.
///
/// Implementations are invoked concurrently from worker threads and must not
/// rely on mutable state between calls.
pub trait Ranker: Send + Sync {
    fn rank(&self, request: &RankingRequest) -> anyhow::Result<Vec<ScoredItem>>;

    fn name(&self) -> &str {
        "ranker"
    }
}

impl<F> Ranker for F
where
    F: Fn(&RankingRequest) -> anyhow::Result<Vec<ScoredItem>> + Send + Sync,
{
    fn rank(&self, request: &RankingRequest) -> anyhow::Result<Vec<ScoredItem>> {
        self(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closure_is_a_ranker() {
        let ranker = |request: &RankingRequest| -> anyhow::Result<Vec<ScoredItem>> {
            Ok(request
                .candidates
                .iter()
                .take(request.limit)
                .map(|item| ScoredItem::new(item.as_str(), 1.0))
                .collect())
        };
        let request = RankingRequest {
            user_id: "u1".to_string(),
            candidates: vec!["a".to_string(), "b".to_string(), "c".to_string()],
            limit: 2,
        };

        let ranked = Ranker::rank(&ranker, &request).unwrap();
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranker.name(), "ranker");
    }
}
