//! Anonymizing `count(distinct x)`.
//!
//! For every encountered value the state keeps one AID set per AID
//! instance, capped just above the largest possible low-count threshold. A
//! saturated set is high-count by construction; smaller sets compare
//! against a noisy threshold seeded from their own membership. Values that
//! are high-count on every AID instance are safe to count exactly; the
//! rest are dropped.

use hashbrown::HashMap;
use smallvec::SmallVec;
use veilql_error::{Result, VeilError};
use veilql_noise::AnonContext;
use veilql_types::Value;

use crate::aid::{Aid, AidMapper};

/// Width of the noisy low-count threshold interval above its minimum.
const LCF_RANGE: i64 = 2;

type ValueKey = SmallVec<[u8; 24]>;

/// A capped set of AIDs attached to one value and one AID instance.
#[derive(Debug, Clone, Default)]
struct AidValueSet {
    aids: SmallVec<[Aid; 8]>,
}

impl AidValueSet {
    fn insert_capped(&mut self, aid: Aid, max_size: usize) {
        if self.aids.len() == max_size {
            // Saturated: the value can never test low-count again.
            return;
        }
        if !self.aids.contains(&aid) {
            self.aids.push(aid);
        }
    }

    fn seed(&self) -> u64 {
        self.aids.iter().fold(0, |seed, aid| seed ^ aid)
    }

    fn is_high_count(&self, ctx: &AnonContext, max_size: usize) -> bool {
        if self.aids.len() == max_size {
            return true;
        }
        let threshold = ctx.lcf_threshold(&[self.seed()]);
        self.aids.len() as i64 >= threshold
    }
}

/// State of one anonymizing distinct count.
#[derive(Debug, Clone)]
pub struct CountDistinctState {
    mappers: Vec<AidMapper>,
    values: HashMap<ValueKey, Vec<AidValueSet>>,
    max_set_size: usize,
}

/// Split of the tracked values at finalize time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CountDistinctResult {
    pub high_count_values: i64,
    pub low_count_values: i64,
}

impl CountDistinctState {
    #[must_use]
    pub fn new(ctx: &AnonContext, aid_mappers: Vec<AidMapper>) -> Self {
        let max_set_size =
            (ctx.config().low_count_min_threshold + LCF_RANGE + 1) as usize;
        Self {
            mappers: aid_mappers,
            values: HashMap::new(),
            max_set_size,
        }
    }

    /// Expected transition argument arity.
    #[must_use]
    pub fn arity(&self) -> usize {
        1 + self.mappers.len()
    }

    pub fn transition(&mut self, args: &[Option<Value>]) {
        debug_assert_eq!(args.len(), self.arity());

        let Some(value) = &args[0] else { return };
        let aids = &args[1..];

        let instances = self.mappers.len();
        let sets = self
            .values
            .entry(value.canonical_bytes())
            .or_insert_with(|| vec![AidValueSet::default(); instances]);

        for (index, aid_value) in aids.iter().enumerate() {
            if let Some(aid_value) = aid_value {
                let aid = self.mappers[index].map(aid_value);
                sets[index].insert_capped(aid, self.max_set_size);
            }
        }
    }

    pub fn merge(&mut self, src: &Self) -> Result<()> {
        if self.mappers != src.mappers || self.max_set_size != src.max_set_size {
            return Err(VeilError::misuse(
                "merging distinct-count states with mismatched configurations",
            ));
        }
        let instances = self.mappers.len();
        for (key, src_sets) in &src.values {
            let sets = self
                .values
                .entry(key.clone())
                .or_insert_with(|| vec![AidValueSet::default(); instances]);
            for (dst, src_set) in sets.iter_mut().zip(src_sets) {
                for &aid in &src_set.aids {
                    dst.insert_capped(aid, self.max_set_size);
                }
            }
        }
        Ok(())
    }

    /// Classifies every value. A value is high-count iff each of its AID
    /// sets is high-count.
    #[must_use]
    pub fn calculate(&self, ctx: &AnonContext) -> CountDistinctResult {
        let mut result = CountDistinctResult::default();
        for sets in self.values.values() {
            let high = sets
                .iter()
                .all(|set| set.is_high_count(ctx, self.max_set_size));
            if high {
                result.high_count_values += 1;
            } else {
                result.low_count_values += 1;
            }
        }
        result
    }

    /// High-count values are safe to expose without extra noise; zero is
    /// SQL NULL.
    #[must_use]
    pub fn finalize(&self, ctx: &AnonContext) -> Option<i64> {
        let result = self.calculate(ctx);
        if result.high_count_values == 0 {
            None
        } else {
            Some(result.high_count_values)
        }
    }

    #[must_use]
    pub fn explain(&self, ctx: &AnonContext) -> String {
        let result = self.calculate(ctx);
        format!(
            "hc_values={}, lc_values={}, noisy_count={}",
            result.high_count_values,
            result.low_count_values,
            result.high_count_values
        )
    }
}
