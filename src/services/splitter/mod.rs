use crate::config::CutoffPolicy;
use crate::error::{EvalError, Result};
use crate::models::{InteractionLog, TimeSplit};
use chrono::{DateTime, Duration, Utc};
use tracing::info;

/// Partitions a log into train/test by timestamp.
#[derive(Debug, Clone, Copy)]
pub struct TimeSplitter {
    policy: CutoffPolicy,
}

impl TimeSplitter {
    pub fn new(policy: CutoffPolicy) -> Self {
        Self { policy }
    }

    /// Resolves the policy to a concrete cutoff. `None` for an empty log.
    ///
    /// The fractional policy measures wall-clock span, not event count, so a
    /// burst of activity near the end does not move the cutoff.
    pub fn resolve_cutoff(&self, log: &InteractionLog) -> Option<DateTime<Utc>> {
        match self.policy {
            CutoffPolicy::Absolute { cutoff } => Some(cutoff),
            CutoffPolicy::Fractional { test_fraction } => {
                let first = log.first_timestamp()?;
                let last = log.last_timestamp()?;
                let span_ms = (last - first).num_milliseconds() as f64;
                let held_out = Duration::milliseconds((span_ms * test_fraction).round() as i64);
                Some(last - held_out)
            }
        }
    }

    pub fn split(&self, log: &InteractionLog) -> Result<TimeSplit> {
        let cutoff = match self.resolve_cutoff(log) {
            Some(cutoff) => cutoff,
            None => {
                return Err(EvalError::InvalidSplit {
                    cutoff: DateTime::<Utc>::UNIX_EPOCH,
                    total: 0,
                    train: 0,
                    test: 0,
                })
            }
        };

        // The log is sorted, so the boundary is a single partition point.
        let boundary = log.as_slice().partition_point(|i| i.timestamp < cutoff);
        let (train, test) = log.as_slice().split_at(boundary);

        if train.is_empty() || test.is_empty() {
            return Err(EvalError::InvalidSplit {
                cutoff,
                total: log.len(),
                train: train.len(),
                test: test.len(),
            });
        }

        info!(
            "Split {} interactions at {}: {} train / {} test",
            log.len(),
            cutoff,
            train.len(),
            test.len()
        );

        Ok(TimeSplit::new(cutoff, train.to_vec(), test.to_vec()))
    }
}
