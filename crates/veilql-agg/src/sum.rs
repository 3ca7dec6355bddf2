//! Anonymizing `sum(x)`.
//!
//! Positive and negative contributions are tracked in separate legs, as
//! absolute values, so the flattening core only ever sees non-negative
//! populations. A zero summand registers the AID in both legs; NULL summands
//! contribute nothing at all. The final value is the difference of the two
//! finalized legs.

use veilql_error::{Result, VeilError};
use veilql_noise::{AnonContext, Seed};
use veilql_types::{Value, ValueType};

use crate::aid::AidMapper;
use crate::contribution::ContributionOps;
use crate::contribution_tracker::ContributionTracker;
use crate::summable::{SummableResultAccumulator, calculate_sum_result};

/// The per-sign tracker pairs of one sum state. Public only through
/// [`SumState`]'s variants.
#[derive(Debug, Clone)]
pub struct SumLegs<C: ContributionOps> {
    mappers: Vec<AidMapper>,
    positive: Vec<ContributionTracker<C>>,
    negative: Vec<ContributionTracker<C>>,
}

#[derive(Debug, Clone, Copy, Default)]
struct SumOutcome {
    not_enough_aid_values: bool,
    positive: SummableResultAccumulator,
    negative: SummableResultAccumulator,
}

impl<C: ContributionOps> SumLegs<C> {
    fn new(mappers: Vec<AidMapper>, top_capacity: usize) -> Self {
        let positive = mappers
            .iter()
            .map(|_| ContributionTracker::new(top_capacity))
            .collect();
        let negative = mappers
            .iter()
            .map(|_| ContributionTracker::new(top_capacity))
            .collect();
        Self {
            mappers,
            positive,
            negative,
        }
    }

    fn transition(&mut self, value: C, aids: &[Option<Value>]) {
        if aids.iter().all(Option::is_none) {
            return;
        }

        let magnitude = value.abs();
        let is_negative = value.is_negative();
        let is_zero = value == C::ZERO;

        for (index, aid_value) in aids.iter().enumerate() {
            match aid_value {
                Some(aid_value) => {
                    let aid = self.mappers[index].map(aid_value);
                    if !is_negative {
                        self.positive[index].update_contribution(aid, magnitude);
                    }
                    if is_negative || is_zero {
                        self.negative[index].update_contribution(aid, magnitude);
                    }
                }
                None => {
                    // Strictly signed rows only; zeros carry no information
                    // worth compensating.
                    if !is_negative && !is_zero {
                        self.positive[index].add_unaccounted(magnitude);
                    }
                    if is_negative {
                        self.negative[index].add_unaccounted(magnitude);
                    }
                }
            }
        }
    }

    fn merge(&mut self, src: &Self) -> Result<()> {
        if self.mappers != src.mappers {
            return Err(VeilError::misuse("merging sum states with mismatched AID instances"));
        }
        for (dst, src) in self.positive.iter_mut().zip(&src.positive) {
            dst.merge(src);
        }
        for (dst, src) in self.negative.iter_mut().zip(&src.negative) {
            dst.merge(src);
        }
        Ok(())
    }

    fn calculate(&self, ctx: &AnonContext, bucket_seed: Seed) -> Result<SumOutcome> {
        let mut outcome = SumOutcome::default();
        for index in 0..self.mappers.len() {
            let positive = calculate_sum_result(ctx, bucket_seed, &self.positive[index])?;
            let negative = calculate_sum_result(ctx, bucket_seed, &self.negative[index])?;

            // Only when both legs of an AID instance lack population is the
            // whole sum unreportable; a one-sided population is fine, and
            // the other leg's flag is deliberately ignored downstream.
            if positive.not_enough_aid_values && negative.not_enough_aid_values {
                outcome.not_enough_aid_values = true;
                return Ok(outcome);
            }
            outcome.positive.accumulate(&positive);
            outcome.negative.accumulate(&negative);
        }
        Ok(outcome)
    }
}

/// State of one anonymizing sum, tagged by summand representation.
#[derive(Debug, Clone)]
pub enum SumState {
    Int(SumLegs<i64>),
    Real(SumLegs<f64>),
}

use SumState::{Int, Real};

impl SumState {
    pub fn new(
        summand_type: ValueType,
        aid_mappers: Vec<AidMapper>,
        top_capacity: usize,
    ) -> Result<Self> {
        match summand_type {
            ValueType::Int => Ok(Int(SumLegs::new(aid_mappers, top_capacity))),
            ValueType::Real => Ok(Real(SumLegs::new(aid_mappers, top_capacity))),
            other => Err(VeilError::ArgTypeUnsupported {
                role: "summand",
                type_name: other.name(),
            }),
        }
    }

    /// The final value type: integer summands report integers, real ones
    /// report reals.
    #[must_use]
    pub fn final_type(&self) -> ValueType {
        match self {
            Int(_) => ValueType::Int,
            Real(_) => ValueType::Real,
        }
    }

    fn aid_count(&self) -> usize {
        match self {
            Int(legs) => legs.mappers.len(),
            Real(legs) => legs.mappers.len(),
        }
    }

    /// Expected transition argument arity.
    #[must_use]
    pub fn arity(&self) -> usize {
        1 + self.aid_count()
    }

    pub fn transition(&mut self, args: &[Option<Value>]) {
        debug_assert_eq!(args.len(), self.arity());

        // NULL sums nothing, unlike count(x) where NULL still marks the AID.
        let Some(value) = &args[0] else { return };
        let aids = &args[1..];

        match self {
            Int(legs) => {
                if let Some(value) = value.as_i64() {
                    legs.transition(value, aids);
                }
            }
            Real(legs) => {
                if let Some(value) = value.as_f64() {
                    legs.transition(value, aids);
                }
            }
        }
    }

    pub fn merge(&mut self, src: &Self) -> Result<()> {
        match (self, src) {
            (Int(dst), Int(src)) => dst.merge(src),
            (Real(dst), Real(src)) => dst.merge(src),
            _ => Err(VeilError::misuse("merging sum states with mismatched summand types")),
        }
    }

    /// The anonymized sum, or `None` (SQL NULL) when no AID instance has
    /// enough population on either leg.
    pub fn finalize(&self, ctx: &AnonContext, bucket_seed: Seed) -> Result<Option<Value>> {
        match self {
            Int(legs) => {
                let outcome = legs.calculate(ctx, bucket_seed)?;
                if outcome.not_enough_aid_values {
                    return Ok(None);
                }
                let combined = outcome.positive.noisy_sum() - outcome.negative.noisy_sum();
                Ok(Some(Value::Int(combined.round() as i64)))
            }
            Real(legs) => {
                let outcome = legs.calculate(ctx, bucket_seed)?;
                if outcome.not_enough_aid_values {
                    return Ok(None);
                }
                let combined = outcome.positive.noisy_sum() - outcome.negative.noisy_sum();
                Ok(Some(Value::Real(combined)))
            }
        }
    }

    /// The money-rounded noise magnitude the sum carries, combining both
    /// legs, or `None` when the sum itself is NULL.
    pub fn finalize_noise(&self, ctx: &AnonContext, bucket_seed: Seed) -> Result<Option<Value>> {
        let outcome = match self {
            Int(legs) => legs.calculate(ctx, bucket_seed)?,
            Real(legs) => legs.calculate(ctx, bucket_seed)?,
        };
        if outcome.not_enough_aid_values {
            return Ok(None);
        }
        let positive_sd = outcome.positive.reported_noise_sd();
        let negative_sd = outcome.negative.reported_noise_sd();
        Ok(Some(Value::Real(
            positive_sd.hypot(negative_sd),
        )))
    }

    pub fn explain(&self) -> String {
        let (tag, instances) = match self {
            Int(legs) => ("int", legs.mappers.len()),
            Real(legs) => ("real", legs.mappers.len()),
        };
        format!("veilql.anon_sum({tag}) over {instances} AID instance(s)")
    }
}
