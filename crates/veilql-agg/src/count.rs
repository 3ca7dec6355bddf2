//! Anonymizing `count(*)` and `count(x)`.

use std::fmt::Write as _;

use veilql_error::{Result, VeilError};
use veilql_noise::{AnonContext, Seed, seed_preview};
use veilql_types::Value;

use crate::aid::AidMapper;
use crate::contribution_tracker::ContributionTracker;
use crate::summable::{SummableResultAccumulator, calculate_count_result};

/// State of one counting aggregator: one contribution tracker per AID
/// instance, each row contributing 1.
///
/// With a value argument (`count(x)`), NULL values register the AID without
/// a contribution; without one (`count(*)`), every row contributes. Rows
/// whose AIDs are all NULL are skipped entirely; a NULL AID alongside a
/// counted row goes to the tracker's unaccounted-for tally.
#[derive(Debug, Clone)]
pub struct CountState {
    has_value_arg: bool,
    trackers: Vec<(AidMapper, ContributionTracker<i64>)>,
}

impl CountState {
    #[must_use]
    pub fn new(has_value_arg: bool, aid_mappers: Vec<AidMapper>, top_capacity: usize) -> Self {
        let trackers = aid_mappers
            .into_iter()
            .map(|mapper| (mapper, ContributionTracker::new(top_capacity)))
            .collect();
        Self {
            has_value_arg,
            trackers,
        }
    }

    #[must_use]
    pub fn aid_count(&self) -> usize {
        self.trackers.len()
    }

    fn aids_offset(&self) -> usize {
        usize::from(self.has_value_arg)
    }

    /// Expected transition argument arity.
    #[must_use]
    pub fn arity(&self) -> usize {
        self.aids_offset() + self.trackers.len()
    }

    pub fn transition(&mut self, args: &[Option<Value>]) {
        debug_assert_eq!(args.len(), self.arity());

        let aids = &args[self.aids_offset()..];
        if aids.iter().all(Option::is_none) {
            return;
        }

        let value_is_null = self.has_value_arg && args[0].is_none();
        for ((mapper, tracker), aid_value) in self.trackers.iter_mut().zip(aids) {
            match aid_value {
                Some(value) => {
                    let aid = mapper.map(value);
                    if value_is_null {
                        tracker.update_aid(aid);
                    } else {
                        tracker.update_contribution(aid, 1);
                    }
                }
                None => {
                    if !value_is_null {
                        tracker.add_unaccounted(1);
                    }
                }
            }
        }
    }

    pub fn merge(&mut self, src: &Self) -> Result<()> {
        if self.has_value_arg != src.has_value_arg || self.trackers.len() != src.trackers.len() {
            return Err(VeilError::misuse("merging count states with mismatched configurations"));
        }
        for ((_, dst), (_, src)) in self.trackers.iter_mut().zip(&src.trackers) {
            dst.merge(src);
        }
        Ok(())
    }

    /// The anonymized count. Buckets with grouping labels never report
    /// below the low-count minimum; global aggregations floor at 0.
    pub fn finalize(&self, ctx: &AnonContext, bucket_seed: Seed, is_global: bool) -> Result<i64> {
        let min_count = if is_global {
            0
        } else {
            ctx.config().low_count_min_threshold
        };

        let mut accumulator = SummableResultAccumulator::default();
        for (_, tracker) in &self.trackers {
            let result = calculate_count_result(ctx, bucket_seed, tracker)?;
            if result.not_enough_aid_values {
                return Ok(min_count);
            }
            accumulator.accumulate(&result);
        }

        Ok(accumulator.noisy_count().max(min_count))
    }

    /// The money-rounded magnitude of the noise the count carries, or
    /// `None` when the population was too small to aggregate.
    pub fn finalize_noise(&self, ctx: &AnonContext, bucket_seed: Seed) -> Result<Option<f64>> {
        let mut accumulator = SummableResultAccumulator::default();
        for (_, tracker) in &self.trackers {
            let result = calculate_count_result(ctx, bucket_seed, tracker)?;
            accumulator.accumulate(&result);
        }
        if accumulator.not_enough_aid_values() {
            return Ok(None);
        }
        Ok(Some(accumulator.reported_noise_sd()))
    }

    /// One line per AID instance: distinct AIDs, the top band with the
    /// outlier/top split, true/flat/noise numbers, and the seed previews.
    pub fn explain(&self, ctx: &AnonContext, bucket_seed: Seed) -> Result<String> {
        let mut out = String::new();
        for (index, (_, tracker)) in self.trackers.iter().enumerate() {
            if index > 0 {
                out.push('\n');
            }
            let result = calculate_count_result(ctx, bucket_seed, tracker)?;

            let _ = write!(out, "uniq={}", tracker.distinct_aids());

            out.push_str(", top=[");
            let top = tracker.top_contributors();
            for (i, contributor) in top.iter().enumerate() {
                let _ = write!(out, "{}x{}", contributor.contribution, contributor.aid);
                if i + 1 == result.noisy_outlier_count as usize {
                    out.push_str(" | ");
                } else if i + 1 < top.len() {
                    out.push_str(", ");
                }
            }
            out.push(']');

            let _ = write!(out, ", true={}", result.true_value as i64);

            if result.not_enough_aid_values {
                out.push_str(", insufficient AIDs");
            } else {
                let _ = write!(
                    out,
                    ", flat={:.3}, noise={:.3}, SD={:.3}",
                    result.flattened_sum, result.noise, result.noise_sd
                );
            }

            let _ = write!(
                out,
                ", seeds: bkt={}, aid={}",
                seed_preview(bucket_seed),
                seed_preview(result.aid_seed)
            );
        }
        Ok(out)
    }
}
