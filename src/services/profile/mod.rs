use crate::config::EventWeights;
use crate::models::{
    ExclusionReason, GroundTruth, Interaction, TimeSplit, UserExclusion, UserId, UserProfile,
};
use rayon::prelude::*;
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::debug;

/// Per-user train profiles and test ground truth for one run.
#[derive(Debug, Clone, Default)]
pub struct ProfileSet {
    pub profiles: HashMap<UserId, UserProfile>,
    pub ground_truth: HashMap<UserId, GroundTruth>,
    test_users: HashSet<UserId>,
}

/// Users split into those that can be evaluated and those that cannot.
#[derive(Debug, Clone, Default)]
pub struct Eligibility {
    pub eligible: Vec<UserId>,
    pub excluded: Vec<UserExclusion>,
}

impl ProfileSet {
    pub fn profile(&self, user_id: &str) -> Option<&UserProfile> {
        self.profiles.get(user_id)
    }

    pub fn ground_truth(&self, user_id: &str) -> Option<&GroundTruth> {
        self.ground_truth.get(user_id)
    }

    pub fn users_total(&self) -> usize {
        self.profiles
            .keys()
            .chain(self.test_users.iter())
            .collect::<HashSet<_>>()
            .len()
    }

    /// Every user appears exactly once, either eligible or excluded with a reason.
    /// Both lists are sorted by user id.
    pub fn eligibility(&self) -> Eligibility {
        let all_users: BTreeSet<&UserId> =
            self.profiles.keys().chain(self.test_users.iter()).collect();

        let mut out = Eligibility::default();
        for user_id in all_users {
            let reason = if !self.profiles.contains_key(user_id) {
                Some(ExclusionReason::NoTrainHistory)
            } else if !self.test_users.contains(user_id) {
                Some(ExclusionReason::NoTestActivity)
            } else if self.ground_truth.get(user_id).map_or(true, |gt| gt.is_empty()) {
                Some(ExclusionReason::GroundTruthAlreadySeen)
            } else {
                None
            };

            match reason {
                Some(reason) => out.excluded.push(UserExclusion::new(user_id.as_str(), reason)),
                None => out.eligible.push(user_id.clone()),
            }
        }
        out
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ProfileBuilder {
    weights: EventWeights,
}

impl ProfileBuilder {
    pub fn new(weights: EventWeights) -> Self {
        Self { weights }
    }

    pub fn build(&self, split: &TimeSplit) -> ProfileSet {
        let profiles: HashMap<UserId, UserProfile> = group_by_user(split.train())
            .into_par_iter()
            .map(|(user_id, interactions)| {
                let mut profile = UserProfile::new(user_id);
                for interaction in interactions {
                    profile.record(&interaction.item_id, self.weights.weight(interaction.event_type));
                }
                (profile.user_id.clone(), profile)
            })
            .collect();

        let test_groups = group_by_user(split.test());
        let test_users: HashSet<UserId> = test_groups.keys().map(|u| u.to_string()).collect();

        let ground_truth: HashMap<UserId, GroundTruth> = test_groups
            .into_par_iter()
            .filter_map(|(user_id, interactions)| {
                let profile = profiles.get(user_id)?;
                Some((user_id.to_string(), ground_truth_for(user_id, profile, &interactions)))
            })
            .collect();

        debug!(
            "Built {} profiles and {} ground-truth sets",
            profiles.len(),
            ground_truth.len()
        );

        ProfileSet {
            profiles,
            ground_truth,
            test_users,
        }
    }
}

fn group_by_user(interactions: &[Interaction]) -> HashMap<&str, Vec<&Interaction>> {
    let mut groups: HashMap<&str, Vec<&Interaction>> = HashMap::new();
    for interaction in interactions {
        groups
            .entry(interaction.user_id.as_str())
            .or_default()
            .push(interaction);
    }
    groups
}

// Test items the user already had before the cutoff are not predictions; they
// are dropped from ground truth and counted.
fn ground_truth_for(user_id: &str, profile: &UserProfile, test: &[&Interaction]) -> GroundTruth {
    let test_items: HashSet<&str> = test.iter().map(|i| i.item_id.as_str()).collect();
    let mut items = HashSet::new();
    let mut already_seen = 0;

    for item_id in test_items {
        if profile.contains(item_id) {
            already_seen += 1;
        } else {
            items.insert(item_id.to_string());
        }
    }

    GroundTruth {
        user_id: user_id.to_string(),
        items,
        already_seen,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EventType;
    use chrono::{TimeZone, Utc};

    fn interaction(user: &str, item: &str, event_type: EventType, day: u32) -> Interaction {
        Interaction::new(
            user,
            item,
            event_type,
            Utc.with_ymd_and_hms(2020, 1, day, 0, 0, 0).unwrap(),
        )
    }

    fn split(train: Vec<Interaction>, test: Vec<Interaction>) -> TimeSplit {
        TimeSplit::new(Utc.with_ymd_and_hms(2020, 1, 15, 0, 0, 0).unwrap(), train, test)
    }

    #[test]
    fn test_weights_accumulate_per_pair() {
        let split = split(
            vec![
                interaction("a", "i1", EventType::View, 1),
                interaction("a", "i1", EventType::Purchase, 2),
                interaction("a", "i2", EventType::CartAdd, 3),
            ],
            vec![],
        );
        let set = ProfileBuilder::new(EventWeights::default()).build(&split);
        let profile = set.profile("a").unwrap();
        assert_eq!(profile.weight("i1"), Some(5.0));
        assert_eq!(profile.weight("i2"), Some(2.0));
        assert_eq!(profile.interaction_count, 3);
    }

    #[test]
    fn test_ground_truth_drops_already_seen_items() {
        let split = split(
            vec![interaction("a", "i1", EventType::View, 1)],
            vec![
                interaction("a", "i1", EventType::Purchase, 20),
                interaction("a", "i2", EventType::View, 21),
                interaction("a", "i2", EventType::Purchase, 22),
            ],
        );
        let set = ProfileBuilder::new(EventWeights::default()).build(&split);
        let truth = set.ground_truth("a").unwrap();
        assert_eq!(truth.len(), 1);
        assert!(truth.contains("i2"));
        assert_eq!(truth.already_seen, 1);
    }

    #[test]
    fn test_eligibility_reasons() {
        let split = split(
            vec![
                interaction("eligible", "i1", EventType::View, 1),
                interaction("train_only", "i1", EventType::View, 1),
                interaction("seen", "i3", EventType::View, 2),
            ],
            vec![
                interaction("eligible", "i2", EventType::Purchase, 20),
                interaction("test_only", "i2", EventType::Purchase, 20),
                interaction("seen", "i3", EventType::Purchase, 21),
            ],
        );
        let set = ProfileBuilder::new(EventWeights::default()).build(&split);
        assert_eq!(set.users_total(), 4);

        let eligibility = set.eligibility();
        assert_eq!(eligibility.eligible, vec!["eligible".to_string()]);

        let reasons: HashMap<&str, ExclusionReason> = eligibility
            .excluded
            .iter()
            .map(|e| (e.user_id.as_str(), e.reason))
            .collect();
        assert_eq!(reasons["train_only"], ExclusionReason::NoTestActivity);
        assert_eq!(reasons["test_only"], ExclusionReason::NoTrainHistory);
        assert_eq!(reasons["seen"], ExclusionReason::GroundTruthAlreadySeen);
    }
}
