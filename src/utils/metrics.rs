use crate::models::{GroundTruth, UserMetrics};

/// Top-K metrics with binary relevance against a user's ground truth.
#[derive(Debug, Clone, Copy)]
pub struct MetricsCalculator {
    k: usize,
}

impl MetricsCalculator {
    pub fn new(k: usize) -> Self {
        Self { k }
    }

    pub fn k(&self) -> usize {
        self.k
    }

    fn hits<'a, I>(&self, recommended: I, relevant: &GroundTruth) -> usize
    where
        I: IntoIterator<Item = &'a str>,
    {
        recommended
            .into_iter()
            .take(self.k)
            .filter(|item| relevant.contains(item))
            .count()
    }

    pub fn calculate_hit_rate<'a, I>(&self, recommended: I, relevant: &GroundTruth) -> f64
    where
        I: IntoIterator<Item = &'a str>,
    {
        if self.hits(recommended, relevant) > 0 {
            1.0
        } else {
            0.0
        }
    }

    /// Hits over K, not over the list length: a short list is not rewarded.
    pub fn calculate_precision<'a, I>(&self, recommended: I, relevant: &GroundTruth) -> f64
    where
        I: IntoIterator<Item = &'a str>,
    {
        if self.k == 0 {
            return 0.0;
        }
        self.hits(recommended, relevant) as f64 / self.k as f64
    }

    pub fn calculate_recall<'a, I>(&self, recommended: I, relevant: &GroundTruth) -> f64
    where
        I: IntoIterator<Item = &'a str>,
    {
        if relevant.is_empty() {
            return 0.0;
        }
        self.hits(recommended, relevant) as f64 / relevant.len() as f64
    }

    pub fn calculate_ndcg<'a, I>(&self, recommended: I, relevant: &GroundTruth) -> f64
    where
        I: IntoIterator<Item = &'a str>,
    {
        let dcg = self.calculate_dcg(recommended, relevant);
        let idcg = self.calculate_ideal_dcg(relevant.len());

        if idcg == 0.0 {
            0.0
        } else {
            dcg / idcg
        }
    }

    fn calculate_dcg<'a, I>(&self, recommended: I, relevant: &GroundTruth) -> f64
    where
        I: IntoIterator<Item = &'a str>,
    {
        recommended
            .into_iter()
            .take(self.k)
            .enumerate()
            .filter(|(_, item)| relevant.contains(item))
            .map(|(i, _)| discount(i))
            .sum()
    }

    fn calculate_ideal_dcg(&self, relevant_count: usize) -> f64 {
        (0..relevant_count.min(self.k)).map(discount).sum()
    }

    pub fn calculate_all<'a, I>(&self, recommended: I, relevant: &GroundTruth) -> UserMetrics
    where
        I: IntoIterator<Item = &'a str>,
    {
        let top: Vec<&str> = recommended.into_iter().take(self.k).collect();

        UserMetrics {
            hit_rate: self.calculate_hit_rate(top.iter().copied(), relevant),
            precision: self.calculate_precision(top.iter().copied(), relevant),
            recall: self.calculate_recall(top.iter().copied(), relevant),
            ndcg: self.calculate_ndcg(top.iter().copied(), relevant),
        }
    }
}

// 0-indexed rank i sits at position i + 1, discounted by log2(position + 1).
fn discount(rank: usize) -> f64 {
    1.0 / ((rank + 2) as f64).log2()
}
