//! Anonymizing histogram over per-AID row counts.
//!
//! Tracks, per counted AID, its row count and one AID tracker per AID
//! instance. Finalize generalizes the counts to bins, suppresses low-count
//! bins into a NULL-keyed suppress bin, and reports each surviving bin's
//! distinct-AID count with an independent noise layer.

use hashbrown::HashMap;
use veilql_error::{Result, VeilError};
use veilql_noise::{AnonContext, STEP_COUNT_HISTOGRAM, Seed};
use veilql_types::{HistogramBin, Value};

use crate::aid::{Aid, AidMapper};
use crate::aid_tracker::AidTracker;

/// Row count plus per-instance AID population of one histogram cell.
#[derive(Debug, Clone)]
struct CountTracker {
    count: i64,
    aid_trackers: Vec<AidTracker>,
}

impl CountTracker {
    fn new(instances: usize) -> Self {
        Self {
            count: 0,
            aid_trackers: vec![AidTracker::new(); instances],
        }
    }

    fn merge(&mut self, src: &Self) {
        self.count += src.count;
        for (dst, src) in self.aid_trackers.iter_mut().zip(&src.aid_trackers) {
            dst.merge(src);
        }
    }

    fn is_low_count(&self, ctx: &AnonContext) -> bool {
        self.aid_trackers.iter().any(|tracker| {
            let threshold = ctx.lcf_threshold(&[tracker.aid_seed()]);
            i64::from(tracker.size()) < threshold
        })
    }

    /// The reported count of a surviving bin: the counted instance's
    /// distinct-AID population with its own noise layer, floored at the
    /// low-count minimum.
    fn noisy_count(&self, ctx: &AnonContext, bucket_seed: Seed, counted_index: usize) -> i64 {
        let tracker = &self.aid_trackers[counted_index];
        let noise = ctx.layered_normal(
            &[bucket_seed, tracker.aid_seed()],
            STEP_COUNT_HISTOGRAM,
            ctx.config().noise_layer_sd,
        );
        let noisy = (f64::from(tracker.size()) + noise).round() as i64;
        noisy.max(ctx.config().low_count_min_threshold)
    }
}

/// State of one anonymizing count histogram.
#[derive(Debug, Clone)]
pub struct CountHistogramState {
    mappers: Vec<AidMapper>,
    counted_aid_index: usize,
    bin_size: i64,
    table: HashMap<Aid, CountTracker>,
}

fn generalize(value: i64, bin_size: i64) -> i64 {
    (value / bin_size) * bin_size
}

impl CountHistogramState {
    pub fn new(
        aid_mappers: Vec<AidMapper>,
        counted_aid_index: usize,
        bin_size: i64,
    ) -> Result<Self> {
        if counted_aid_index >= aid_mappers.len() {
            return Err(VeilError::misuse(
                "count_histogram counted AID index out of range",
            ));
        }
        if bin_size < 1 {
            return Err(VeilError::misuse("count_histogram bin_size must be >= 1"));
        }
        Ok(Self {
            mappers: aid_mappers,
            counted_aid_index,
            bin_size,
            table: HashMap::new(),
        })
    }

    /// Expected transition argument arity: one column per AID instance.
    #[must_use]
    pub fn arity(&self) -> usize {
        self.mappers.len()
    }

    pub fn transition(&mut self, args: &[Option<Value>]) {
        debug_assert_eq!(args.len(), self.arity());

        let Some(counted_value) = &args[self.counted_aid_index] else {
            return;
        };
        let counted_aid = self.mappers[self.counted_aid_index].map(counted_value);

        let instances = self.mappers.len();
        let entry = self
            .table
            .entry(counted_aid)
            .or_insert_with(|| CountTracker::new(instances));
        entry.count += 1;

        for (index, aid_value) in args.iter().enumerate() {
            if let Some(aid_value) = aid_value {
                let aid = self.mappers[index].map(aid_value);
                entry.aid_trackers[index].update(aid);
            }
        }
    }

    pub fn merge(&mut self, src: &Self) -> Result<()> {
        if self.mappers != src.mappers
            || self.counted_aid_index != src.counted_aid_index
            || self.bin_size != src.bin_size
        {
            return Err(VeilError::misuse(
                "merging count-histogram states with mismatched configurations",
            ));
        }
        let instances = self.mappers.len();
        for (&aid, src_tracker) in &src.table {
            self.table
                .entry(aid)
                .or_insert_with(|| CountTracker::new(instances))
                .merge(src_tracker);
        }
        Ok(())
    }

    /// Bins, key-sorted, preceded by the NULL-keyed suppress bin when at
    /// least two low-count bins were absorbed and the suppress bin itself
    /// holds enough population.
    #[must_use]
    pub fn finalize(&self, ctx: &AnonContext, bucket_seed: Seed) -> Vec<HistogramBin> {
        let instances = self.mappers.len();

        // Group cells by generalized row count.
        let mut histogram: HashMap<i64, CountTracker> = HashMap::new();
        for tracker in self.table.values() {
            let bin_label = generalize(tracker.count, self.bin_size);
            histogram
                .entry(bin_label)
                .or_insert_with(|| CountTracker::new(instances))
                .merge(tracker);
        }

        let mut suppress_bin = CountTracker::new(instances);
        let mut low_count_bins = 0;
        let mut kept: Vec<(i64, CountTracker)> = Vec::new();
        for (label, tracker) in histogram {
            if tracker.is_low_count(ctx) {
                suppress_bin.merge(&tracker);
                low_count_bins += 1;
            } else {
                kept.push((label, tracker));
            }
        }
        kept.sort_unstable_by_key(|(label, _)| *label);

        let include_suppress_bin = low_count_bins >= 2 && !suppress_bin.is_low_count(ctx);

        let mut bins = Vec::with_capacity(kept.len() + usize::from(include_suppress_bin));
        if include_suppress_bin {
            bins.push(HistogramBin {
                key: None,
                count: suppress_bin.noisy_count(ctx, bucket_seed, self.counted_aid_index),
            });
        }
        for (label, tracker) in &kept {
            bins.push(HistogramBin {
                key: Some(*label),
                count: tracker.noisy_count(ctx, bucket_seed, self.counted_aid_index),
            });
        }
        bins
    }

    #[must_use]
    pub fn explain(&self) -> String {
        format!(
            "veilql.anon_count_histogram(bin_size={}, counted_aid={}) over {} AID instance(s)",
            self.bin_size,
            self.counted_aid_index,
            self.mappers.len()
        )
    }
}
