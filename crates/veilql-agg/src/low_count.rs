//! The low-count filter aggregator.
//!
//! Tracks the distinct AIDs of every AID instance in a bucket. The bucket
//! is low-count if any instance's population falls below its noisy
//! threshold, which is seeded from the bucket and the instance's AID set.

use std::fmt::Write as _;

use veilql_error::{Result, VeilError};
use veilql_noise::{AnonContext, Seed, seed_preview};
use veilql_types::Value;

use crate::aid::AidMapper;
use crate::aid_tracker::AidTracker;

/// State of one low-count filter.
#[derive(Debug, Clone)]
pub struct LowCountState {
    trackers: Vec<(AidMapper, AidTracker)>,
}

impl LowCountState {
    #[must_use]
    pub fn new(aid_mappers: Vec<AidMapper>) -> Self {
        let trackers = aid_mappers
            .into_iter()
            .map(|mapper| (mapper, AidTracker::new()))
            .collect();
        Self { trackers }
    }

    /// Expected transition argument arity.
    #[must_use]
    pub fn arity(&self) -> usize {
        self.trackers.len()
    }

    pub fn transition(&mut self, args: &[Option<Value>]) {
        debug_assert_eq!(args.len(), self.arity());
        for ((mapper, tracker), aid_value) in self.trackers.iter_mut().zip(args) {
            if let Some(aid_value) = aid_value {
                let aid = mapper.map(aid_value);
                tracker.update(aid);
            }
        }
    }

    pub fn merge(&mut self, src: &Self) -> Result<()> {
        if self.trackers.len() != src.trackers.len() {
            return Err(VeilError::misuse(
                "merging low-count states with mismatched AID instances",
            ));
        }
        for ((_, dst), (_, src)) in self.trackers.iter_mut().zip(&src.trackers) {
            dst.merge(src);
        }
        Ok(())
    }

    /// Whether the bucket fails the filter on any AID instance.
    #[must_use]
    pub fn is_low_count(&self, ctx: &AnonContext, bucket_seed: Seed) -> bool {
        self.trackers.iter().any(|(_, tracker)| {
            let threshold = ctx.lcf_threshold(&[bucket_seed, tracker.aid_seed()]);
            i64::from(tracker.size()) < threshold
        })
    }

    /// One line per AID instance: population, threshold, verdict, seeds.
    #[must_use]
    pub fn explain(&self, ctx: &AnonContext, bucket_seed: Seed) -> String {
        let mut out = String::new();
        for (index, (_, tracker)) in self.trackers.iter().enumerate() {
            if index > 0 {
                out.push('\n');
            }
            let threshold = ctx.lcf_threshold(&[bucket_seed, tracker.aid_seed()]);
            let passes = i64::from(tracker.size()) >= threshold;
            let _ = write!(
                out,
                "uniq={}, thresh={}, pass={}, seeds: bkt={}, aid={}",
                tracker.size(),
                threshold,
                passes,
                seed_preview(bucket_seed),
                seed_preview(tracker.aid_seed())
            );
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use veilql_types::AnonConfig;

    fn ctx() -> AnonContext {
        AnonContext::new(AnonConfig::with_salt("t")).unwrap()
    }

    fn feed(state: &mut LowCountState, users: impl IntoIterator<Item = i64>) {
        for user in users {
            state.transition(&[Some(Value::Int(user))]);
        }
    }

    #[test]
    fn single_aid_is_always_low_count() {
        let ctx = ctx();
        let mut state = LowCountState::new(vec![AidMapper::Int]);
        feed(&mut state, [1]);
        assert!(state.is_low_count(&ctx, 0));
    }

    #[test]
    fn large_populations_pass() {
        let ctx = ctx();
        let mut state = LowCountState::new(vec![AidMapper::Int]);
        feed(&mut state, 1..=50);
        assert!(!state.is_low_count(&ctx, 0));
    }

    #[test]
    fn any_starved_instance_suppresses_the_bucket() {
        let ctx = ctx();
        let mut state = LowCountState::new(vec![AidMapper::Int, AidMapper::Text]);
        // Plenty of users, but a single distinct company.
        for user in 1..=50 {
            state.transition(&[
                Some(Value::Int(user)),
                Some(Value::Text("acme".into())),
            ]);
        }
        assert!(state.is_low_count(&ctx, 0));
    }

    #[test]
    fn verdict_is_deterministic_per_bucket_seed() {
        let ctx = ctx();
        let mut state = LowCountState::new(vec![AidMapper::Int]);
        feed(&mut state, 1..=4);
        let verdict = state.is_low_count(&ctx, 123);
        for _ in 0..10 {
            assert_eq!(state.is_low_count(&ctx, 123), verdict);
        }
    }

    #[test]
    fn zero_threshold_sd_pins_the_verdict_to_the_minimum() {
        let mut config = AnonConfig::with_salt("t");
        config.low_count_layer_sd = 0.0;
        let ctx = AnonContext::new(config).unwrap();

        let mut one = LowCountState::new(vec![AidMapper::Int]);
        feed(&mut one, [7]);
        let mut two = LowCountState::new(vec![AidMapper::Int]);
        feed(&mut two, [7, 8]);

        for bucket_seed in [0u64, 9, 1 << 40] {
            assert!(one.is_low_count(&ctx, bucket_seed));
            assert!(!two.is_low_count(&ctx, bucket_seed));
        }
    }

    #[test]
    fn merge_unions_populations() {
        let ctx = ctx();
        let mut left = LowCountState::new(vec![AidMapper::Int]);
        let mut right = LowCountState::new(vec![AidMapper::Int]);
        feed(&mut left, 1..=5);
        feed(&mut right, 6..=30);
        left.merge(&right).unwrap();
        assert!(!left.is_low_count(&ctx, 0));
    }

    #[test]
    fn explain_reports_threshold_and_verdict() {
        let ctx = ctx();
        let mut state = LowCountState::new(vec![AidMapper::Int]);
        feed(&mut state, 1..=50);
        let explain = state.explain(&ctx, 5);
        assert!(explain.starts_with("uniq=50, thresh="));
        assert!(explain.contains("pass=true"));
        assert!(explain.contains("seeds: bkt=000500000000"));
    }
}
