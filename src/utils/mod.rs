use crate::models::ScoredItem;
use std::cmp::Ordering;

pub mod metrics;
pub mod validation;

/// Arithmetic mean; 0.0 for an empty input.
pub fn mean<I>(values: I) -> f64
where
    I: IntoIterator<Item = f64>,
{
    let (sum, count) = values
        .into_iter()
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));

    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

/// Mean of `(value, weight)` pairs; 0.0 when the total weight is zero.
pub fn weighted_mean<I>(pairs: I) -> f64
where
    I: IntoIterator<Item = (f64, f64)>,
{
    let mut total = 0.0;
    let mut total_weight = 0.0;

    for (value, weight) in pairs {
        total += value * weight;
        total_weight += weight;
    }

    if total_weight > 0.0 {
        total / total_weight
    } else {
        0.0
    }
}

pub fn median_of_sorted(sorted: &[usize]) -> f64 {
    match sorted.len() {
        0 => 0.0,
        n if n % 2 == 1 => sorted[n / 2] as f64,
        n => (sorted[n / 2 - 1] + sorted[n / 2]) as f64 / 2.0,
    }
}

/// Score descending, then item id ascending.
pub fn ranking_order(a: &ScoredItem, b: &ScoredItem) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.item_id.cmp(&b.item_id))
}

pub fn sort_ranked(items: &mut [ScoredItem]) {
    items.sort_by(ranking_order);
}
