//! Per-AID contribution tracking with a bounded top-contributors list.

use hashbrown::HashMap;
use smallvec::SmallVec;
use veilql_noise::Seed;

use crate::aid::Aid;
use crate::contribution::ContributionOps;

/// An AID together with its aggregated contribution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Contributor<C> {
    pub aid: Aid,
    pub contribution: C,
}

#[derive(Debug, Clone, Copy)]
struct Entry<C> {
    contribution: C,
    has_contribution: bool,
}

/// Tracks, for one AID instance in one bucket:
///
/// - the per-AID aggregated contributions (unique keys);
/// - the count of AIDs that contributed at least once;
/// - the combined overall contribution;
/// - contributions whose AID was NULL (`unaccounted_for`);
/// - the XOR seed over all contributing AIDs;
/// - the largest `capacity` contributions, in descending order.
///
/// The final state per AID is invariant under permutation of updates; the
/// ordering of equal contributions in the top list follows insertion order
/// and is not observable through finalized values.
#[derive(Debug, Clone)]
pub struct ContributionTracker<C: ContributionOps> {
    entries: HashMap<Aid, Entry<C>>,
    distinct_contributors: u64,
    overall_contribution: C,
    unaccounted_for: C,
    aid_seed: Seed,
    capacity: usize,
    top_contributors: SmallVec<[Contributor<C>; 8]>,
}

impl<C: ContributionOps> ContributionTracker<C> {
    /// A fresh tracker whose top list holds at most `capacity` entries.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            distinct_contributors: 0,
            overall_contribution: C::ZERO,
            unaccounted_for: C::ZERO,
            aid_seed: 0,
            capacity,
            top_contributors: SmallVec::new(),
        }
    }

    /// Records that `aid` exists without contributing.
    pub fn update_aid(&mut self, aid: Aid) {
        self.entries.entry(aid).or_insert(Entry {
            contribution: C::ZERO,
            has_contribution: false,
        });
    }

    /// Records a contribution from `aid`. On the first contribution the AID
    /// folds into the seed, bumps the distinct count, and is offered to the
    /// top list; repeats combine and may re-rank.
    pub fn update_contribution(&mut self, aid: Aid, contribution: C) {
        debug_assert!(!contribution.is_negative(), "contributions are tracked as absolute values");

        self.overall_contribution = self.overall_contribution.combine(contribution);

        match self.entries.get_mut(&aid) {
            None => {
                self.entries.insert(aid, Entry {
                    contribution,
                    has_contribution: true,
                });
                self.distinct_contributors += 1;
                self.aid_seed ^= aid;
                self.add_top_contributor(Contributor { aid, contribution });
            }
            Some(entry) if !entry.has_contribution => {
                entry.has_contribution = true;
                entry.contribution = contribution;
                self.distinct_contributors += 1;
                self.aid_seed ^= aid;
                self.add_top_contributor(Contributor { aid, contribution });
            }
            Some(entry) => {
                entry.contribution = entry.contribution.combine(contribution);
                let updated = Contributor {
                    aid,
                    contribution: entry.contribution,
                };
                self.update_or_add_top_contributor(updated);
            }
        }
    }

    /// Folds in a contribution whose AID was NULL.
    pub fn add_unaccounted(&mut self, contribution: C) {
        self.unaccounted_for = self.unaccounted_for.combine(contribution);
    }

    /// Folds all of `src` into `self`.
    pub fn merge(&mut self, src: &Self) {
        debug_assert_eq!(self.capacity, src.capacity);
        for (&aid, entry) in &src.entries {
            if entry.has_contribution {
                self.update_contribution(aid, entry.contribution);
            } else {
                self.update_aid(aid);
            }
        }
        self.unaccounted_for = self.unaccounted_for.combine(src.unaccounted_for);
    }

    /// Count of AIDs that contributed at least once.
    #[must_use]
    pub fn distinct_contributors(&self) -> u64 {
        self.distinct_contributors
    }

    /// Count of all tracked AIDs, contributing or not.
    #[must_use]
    pub fn distinct_aids(&self) -> u64 {
        self.entries.len() as u64
    }

    #[must_use]
    pub fn overall_contribution(&self) -> C {
        self.overall_contribution
    }

    #[must_use]
    pub fn unaccounted_for(&self) -> C {
        self.unaccounted_for
    }

    /// XOR of all contributing AIDs.
    #[must_use]
    pub fn aid_seed(&self) -> Seed {
        self.aid_seed
    }

    /// The largest contributions seen so far, descending.
    #[must_use]
    pub fn top_contributors(&self) -> &[Contributor<C>] {
        &self.top_contributors
    }

    /// First position whose contribution is beaten by `contribution`, or the
    /// end of the list.
    fn find_insertion_index(&self, contribution: C) -> usize {
        self.top_contributors
            .iter()
            .position(|c| contribution.greater(c.contribution))
            .unwrap_or(self.top_contributors.len())
    }

    fn add_top_contributor(&mut self, contributor: Contributor<C>) {
        if self.capacity == 0 {
            return;
        }
        let len = self.top_contributors.len();
        // Not a top contributor if the list is full and the lowest kept
        // contribution is at least as large.
        if len == self.capacity
            && !contributor
                .contribution
                .greater(self.top_contributors[len - 1].contribution)
        {
            return;
        }

        let index = self.find_insertion_index(contributor.contribution);
        if len == self.capacity {
            self.top_contributors.pop();
        }
        self.top_contributors.insert(index, contributor);
    }

    fn update_or_add_top_contributor(&mut self, contributor: Contributor<C>) {
        let Some(current) = self
            .top_contributors
            .iter()
            .position(|c| c.aid == contributor.aid)
        else {
            self.add_top_contributor(contributor);
            return;
        };

        // The contribution grew, so its rank can only improve. Zero-growth
        // updates (a zero contribution combined in) keep the current slot.
        let index = self.find_insertion_index(contributor.contribution).min(current);
        self.top_contributors.remove(current);
        self.top_contributors.insert(index, contributor);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn top_values(tracker: &ContributionTracker<i64>) -> Vec<i64> {
        tracker
            .top_contributors()
            .iter()
            .map(|c| c.contribution)
            .collect()
    }

    #[test]
    fn first_contribution_updates_seed_and_distinct() {
        let mut tracker = ContributionTracker::<i64>::new(4);
        tracker.update_contribution(10, 1);
        tracker.update_contribution(20, 1);
        tracker.update_contribution(10, 1);

        assert_eq!(tracker.distinct_contributors(), 2);
        assert_eq!(tracker.aid_seed(), 10 ^ 20);
        assert_eq!(tracker.overall_contribution(), 3);
    }

    #[test]
    fn update_aid_registers_without_contributing() {
        let mut tracker = ContributionTracker::<i64>::new(4);
        tracker.update_aid(7);
        assert_eq!(tracker.distinct_aids(), 1);
        assert_eq!(tracker.distinct_contributors(), 0);
        assert_eq!(tracker.aid_seed(), 0);
        assert!(tracker.top_contributors().is_empty());

        // A later contribution promotes the entry.
        tracker.update_contribution(7, 3);
        assert_eq!(tracker.distinct_contributors(), 1);
        assert_eq!(tracker.aid_seed(), 7);
        assert_eq!(top_values(&tracker), vec![3]);
    }

    #[test]
    fn top_list_keeps_the_largest_descending() {
        let mut tracker = ContributionTracker::<i64>::new(3);
        for (aid, c) in [(1, 5), (2, 9), (3, 1), (4, 7), (5, 3)] {
            tracker.update_contribution(aid, c);
        }
        assert_eq!(top_values(&tracker), vec![9, 7, 5]);
    }

    #[test]
    fn repeat_contributions_re_rank_in_place() {
        let mut tracker = ContributionTracker::<i64>::new(3);
        tracker.update_contribution(1, 5);
        tracker.update_contribution(2, 4);
        tracker.update_contribution(3, 3);
        // AID 3 grows past both others.
        tracker.update_contribution(3, 10);
        assert_eq!(top_values(&tracker), vec![13, 5, 4]);
        assert_eq!(tracker.top_contributors()[0].aid, 3);
    }

    #[test]
    fn growth_outside_the_top_list_can_enter_it() {
        let mut tracker = ContributionTracker::<i64>::new(2);
        tracker.update_contribution(1, 5);
        tracker.update_contribution(2, 4);
        tracker.update_contribution(3, 1);
        assert_eq!(top_values(&tracker), vec![5, 4]);

        tracker.update_contribution(3, 6);
        assert_eq!(top_values(&tracker), vec![7, 5]);
        assert_eq!(tracker.top_contributors()[0].aid, 3);
    }

    #[test]
    fn ties_at_capacity_keep_the_incumbent() {
        let mut tracker = ContributionTracker::<i64>::new(2);
        tracker.update_contribution(1, 5);
        tracker.update_contribution(2, 3);
        tracker.update_contribution(3, 3);
        assert_eq!(top_values(&tracker), vec![5, 3]);
        assert_eq!(tracker.top_contributors()[1].aid, 2);
    }

    #[test]
    fn final_state_is_permutation_invariant_per_aid() {
        let updates = [(1u64, 2i64), (2, 7), (3, 1), (1, 4), (2, 1), (4, 9)];
        let mut forward = ContributionTracker::<i64>::new(8);
        let mut backward = ContributionTracker::<i64>::new(8);
        for &(aid, c) in &updates {
            forward.update_contribution(aid, c);
        }
        for &(aid, c) in updates.iter().rev() {
            backward.update_contribution(aid, c);
        }

        assert_eq!(forward.distinct_contributors(), backward.distinct_contributors());
        assert_eq!(forward.aid_seed(), backward.aid_seed());
        assert_eq!(forward.overall_contribution(), backward.overall_contribution());
        // All contributors fit, so the lists hold the same multiset.
        let mut f = top_values(&forward);
        let mut b = top_values(&backward);
        f.sort_unstable();
        b.sort_unstable();
        assert_eq!(f, b);
    }

    #[test]
    fn merge_combines_entries_seeds_and_unaccounted() {
        let mut left = ContributionTracker::<i64>::new(4);
        left.update_contribution(1, 2);
        left.update_aid(9);
        left.add_unaccounted(3);

        let mut right = ContributionTracker::<i64>::new(4);
        right.update_contribution(1, 5);
        right.update_contribution(2, 1);
        right.add_unaccounted(1);

        left.merge(&right);
        assert_eq!(left.distinct_contributors(), 2);
        assert_eq!(left.distinct_aids(), 3);
        assert_eq!(left.overall_contribution(), 8);
        assert_eq!(left.unaccounted_for(), 4);
        assert_eq!(left.aid_seed(), 1 ^ 2);
        assert_eq!(top_values(&left), vec![7, 1]);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            // The top list always holds exactly the K largest per-AID
            // totals, in descending order.
            #[test]
            fn top_k_matches_a_reference_ranking(
                updates in proptest::collection::vec((0u64..12, 1i64..100), 0..80)
            ) {
                let mut tracker = ContributionTracker::<i64>::new(5);
                let mut reference: std::collections::HashMap<u64, i64> =
                    std::collections::HashMap::new();
                for &(aid, c) in &updates {
                    tracker.update_contribution(aid, c);
                    *reference.entry(aid).or_insert(0) += c;
                }

                let mut expected: Vec<i64> = reference.values().copied().collect();
                expected.sort_unstable_by(|a, b| b.cmp(a));
                expected.truncate(5);

                prop_assert_eq!(top_values(&tracker), expected);
            }

            // Rotating the update sequence never changes the per-AID state.
            #[test]
            fn state_is_rotation_invariant(
                updates in proptest::collection::vec((0u64..8, 1i64..50), 1..40),
                split in 0usize..40
            ) {
                let split = split % updates.len();
                let mut in_order = ContributionTracker::<i64>::new(8);
                let mut rotated = ContributionTracker::<i64>::new(8);
                for &(aid, c) in &updates {
                    in_order.update_contribution(aid, c);
                }
                for &(aid, c) in updates[split..].iter().chain(&updates[..split]) {
                    rotated.update_contribution(aid, c);
                }

                prop_assert_eq!(in_order.aid_seed(), rotated.aid_seed());
                prop_assert_eq!(
                    in_order.distinct_contributors(),
                    rotated.distinct_contributors()
                );
                prop_assert_eq!(
                    in_order.overall_contribution(),
                    rotated.overall_contribution()
                );
                let mut a = top_values(&in_order);
                let mut b = top_values(&rotated);
                a.sort_unstable();
                b.sort_unstable();
                prop_assert_eq!(a, b);
            }
        }
    }

    #[test]
    fn real_contributions_track_like_integers() {
        let mut tracker = ContributionTracker::<f64>::new(2);
        tracker.update_contribution(1, 1.5);
        tracker.update_contribution(2, 2.25);
        tracker.update_contribution(1, 1.0);
        assert_eq!(tracker.overall_contribution(), 4.75);
        let values: Vec<f64> = tracker
            .top_contributors()
            .iter()
            .map(|c| c.contribution)
            .collect();
        assert_eq!(values, vec![2.5, 2.25]);
    }
}
