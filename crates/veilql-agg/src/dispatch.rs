//! Uniform dispatch over the anonymizing aggregators.
//!
//! The bucketing layer drives every aggregator through one surface:
//! create, transition, merge, finalize (at most once), explain. Kinds and
//! states are tagged enums; argument layouts are declared per kind in an
//! [`ArgsDescriptor`] and checked when the state is created, so no row-time
//! call can observe a misconfigured aggregator.

use veilql_error::{Result, VeilError};
use veilql_noise::{AnonContext, Seed};
use veilql_types::{Value, ValueType};

use crate::aid::AidMapper;
use crate::count::CountState;
use crate::count_distinct::CountDistinctState;
use crate::count_histogram::CountHistogramState;
use crate::low_count::LowCountState;
use crate::sum::SumState;

/// The anonymizing aggregator kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggKind {
    /// `count(*)`: every row contributes.
    Count,
    /// `count(x)`: NULL values register the AID without contributing.
    CountAny,
    /// Reports the noise magnitude a `count` carries.
    CountNoise,
    /// `sum(x)` over an integer or real summand.
    Sum,
    /// Reports the noise magnitude a `sum` carries.
    SumNoise,
    /// `count(distinct x)`.
    CountDistinct,
    /// Histogram over per-AID row counts.
    CountHistogram,
    /// The low-count filter injected by the rewriter.
    LowCount,
}

impl AggKind {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Count => "anon_count",
            Self::CountAny => "anon_count_any",
            Self::CountNoise => "anon_count_noise",
            Self::Sum => "anon_sum",
            Self::SumNoise => "anon_sum_noise",
            Self::CountDistinct => "anon_count_distinct",
            Self::CountHistogram => "anon_count_histogram",
            Self::LowCount => "low_count",
        }
    }

    /// Index of the first AID argument in this kind's argument list.
    fn aids_offset(self) -> usize {
        match self {
            Self::Count | Self::CountNoise | Self::LowCount => 0,
            Self::CountAny | Self::Sum | Self::SumNoise | Self::CountDistinct => 1,
            Self::CountHistogram => 2,
        }
    }
}

/// One declared aggregator argument.
#[derive(Debug, Clone, PartialEq)]
pub struct ArgSpec {
    pub value_type: ValueType,
    /// Constant-folded expression for literal arguments (bin size, counted
    /// AID index).
    pub const_value: Option<Value>,
}

impl ArgSpec {
    /// A per-row column argument.
    #[must_use]
    pub fn column(value_type: ValueType) -> Self {
        Self {
            value_type,
            const_value: None,
        }
    }

    /// A constant literal argument.
    #[must_use]
    pub fn constant(value: Value) -> Self {
        Self {
            value_type: value.value_type(),
            const_value: Some(value),
        }
    }
}

/// Declared argument layout of one aggregator instance.
#[derive(Debug, Clone, PartialEq)]
pub struct ArgsDescriptor {
    pub args: Vec<ArgSpec>,
}

impl ArgsDescriptor {
    #[must_use]
    pub fn new(args: Vec<ArgSpec>) -> Self {
        Self { args }
    }

    fn const_i64(&self, index: usize, name: &str) -> Result<i64> {
        self.args
            .get(index)
            .and_then(|arg| arg.const_value.as_ref())
            .and_then(Value::as_i64)
            .ok_or_else(|| {
                VeilError::misuse(format!("{name} must be a constant integer argument"))
            })
    }

    fn aid_mappers(&self, offset: usize) -> Result<Vec<AidMapper>> {
        if self.args.len() <= offset {
            return Err(VeilError::AidMissing);
        }
        self.args[offset..]
            .iter()
            .map(|arg| AidMapper::for_type(arg.value_type))
            .collect()
    }
}

#[derive(Debug, Clone)]
enum StateInner {
    Count(CountState),
    Sum(SumState),
    CountDistinct(CountDistinctState),
    CountHistogram(CountHistogramState),
    LowCount(LowCountState),
}

/// An anonymizing aggregator state bound to one bucket.
#[derive(Debug, Clone)]
pub struct AnonAggState {
    kind: AggKind,
    finalized: bool,
    inner: StateInner,
}

impl AnonAggState {
    /// Creates an empty state, validating the argument layout. Every kind
    /// requires at least one AID argument.
    pub fn new(kind: AggKind, args_desc: &ArgsDescriptor, ctx: &AnonContext) -> Result<Self> {
        let mappers = args_desc.aid_mappers(kind.aids_offset())?;
        let capacity = ctx.config().top_contributors_capacity();

        let inner = match kind {
            AggKind::Count | AggKind::CountNoise => {
                StateInner::Count(CountState::new(false, mappers, capacity))
            }
            AggKind::CountAny => StateInner::Count(CountState::new(true, mappers, capacity)),
            AggKind::Sum | AggKind::SumNoise => {
                let summand_type = args_desc.args[0].value_type;
                StateInner::Sum(SumState::new(summand_type, mappers, capacity)?)
            }
            AggKind::CountDistinct => {
                StateInner::CountDistinct(CountDistinctState::new(ctx, mappers))
            }
            AggKind::CountHistogram => {
                let counted_aid_index = args_desc.const_i64(0, "count_histogram counted AID")?;
                let bin_size = args_desc.const_i64(1, "count_histogram bin_size")?;
                let counted_aid_index = usize::try_from(counted_aid_index).map_err(|_| {
                    VeilError::misuse("count_histogram counted AID index out of range")
                })?;
                StateInner::CountHistogram(CountHistogramState::new(
                    mappers,
                    counted_aid_index,
                    bin_size,
                )?)
            }
            AggKind::LowCount => StateInner::LowCount(LowCountState::new(mappers)),
        };

        Ok(Self {
            kind,
            finalized: false,
            inner,
        })
    }

    /// The type a finalized value of this layout will carry.
    pub fn final_type(kind: AggKind, args_desc: &ArgsDescriptor) -> Result<ValueType> {
        match kind {
            AggKind::Count | AggKind::CountAny | AggKind::CountDistinct => Ok(ValueType::Int),
            AggKind::CountNoise | AggKind::SumNoise => Ok(ValueType::Real),
            AggKind::Sum => {
                let summand = args_desc
                    .args
                    .first()
                    .ok_or(VeilError::AidMissing)?
                    .value_type;
                if !summand.is_numeric() {
                    return Err(VeilError::ArgTypeUnsupported {
                        role: "summand",
                        type_name: summand.name(),
                    });
                }
                Ok(summand)
            }
            AggKind::CountHistogram => Ok(ValueType::Histogram),
            AggKind::LowCount => Ok(ValueType::Bool),
        }
    }

    #[must_use]
    pub fn kind(&self) -> AggKind {
        self.kind
    }

    /// Expected transition argument arity.
    #[must_use]
    pub fn arity(&self) -> usize {
        match &self.inner {
            StateInner::Count(state) => state.arity(),
            StateInner::Sum(state) => state.arity(),
            StateInner::CountDistinct(state) => state.arity(),
            StateInner::CountHistogram(state) => state.arity() + 2,
            StateInner::LowCount(state) => state.arity(),
        }
    }

    /// Consumes one input row. Arguments follow the declared layout; the
    /// histogram's two leading constants are carried per row and skipped.
    pub fn transition(&mut self, args: &[Option<Value>]) -> Result<()> {
        if self.finalized {
            return Err(VeilError::misuse("transition after finalize"));
        }
        if args.len() != self.arity() {
            return Err(VeilError::misuse(format!(
                "{} expects {} arguments, got {}",
                self.kind.name(),
                self.arity(),
                args.len()
            )));
        }
        match &mut self.inner {
            StateInner::Count(state) => state.transition(args),
            StateInner::Sum(state) => state.transition(args),
            StateInner::CountDistinct(state) => state.transition(args),
            StateInner::CountHistogram(state) => state.transition(&args[2..]),
            StateInner::LowCount(state) => state.transition(args),
        }
        Ok(())
    }

    /// Merges `src` into `self`. Both states must share kind and layout.
    pub fn merge(&mut self, src: &Self) -> Result<()> {
        if self.finalized {
            return Err(VeilError::misuse("merge after finalize"));
        }
        if self.kind != src.kind {
            return Err(VeilError::misuse(format!(
                "cannot merge {} into {}",
                src.kind.name(),
                self.kind.name()
            )));
        }
        match (&mut self.inner, &src.inner) {
            (StateInner::Count(dst), StateInner::Count(src)) => dst.merge(src),
            (StateInner::Sum(dst), StateInner::Sum(src)) => dst.merge(src),
            (StateInner::CountDistinct(dst), StateInner::CountDistinct(src)) => dst.merge(src),
            (StateInner::CountHistogram(dst), StateInner::CountHistogram(src)) => dst.merge(src),
            (StateInner::LowCount(dst), StateInner::LowCount(src)) => dst.merge(src),
            _ => Err(VeilError::misuse("mismatched aggregator states")),
        }
    }

    /// Derives the final value. Callable at most once per state; `None`
    /// is SQL NULL.
    pub fn finalize(
        &mut self,
        ctx: &AnonContext,
        bucket_seed: Seed,
        is_global: bool,
    ) -> Result<Option<Value>> {
        if self.finalized {
            return Err(VeilError::misuse("finalize called twice"));
        }
        self.finalized = true;

        match (&self.inner, self.kind) {
            (StateInner::Count(state), AggKind::CountNoise) => Ok(state
                .finalize_noise(ctx, bucket_seed)?
                .map(Value::Real)),
            (StateInner::Count(state), _) => Ok(Some(Value::Int(
                state.finalize(ctx, bucket_seed, is_global)?,
            ))),
            (StateInner::Sum(state), AggKind::SumNoise) => state.finalize_noise(ctx, bucket_seed),
            (StateInner::Sum(state), _) => state.finalize(ctx, bucket_seed),
            (StateInner::CountDistinct(state), _) => {
                Ok(state.finalize(ctx).map(Value::Int))
            }
            (StateInner::CountHistogram(state), _) => Ok(Some(Value::Histogram(
                state.finalize(ctx, bucket_seed),
            ))),
            (StateInner::LowCount(state), _) => {
                Ok(Some(Value::Bool(state.is_low_count(ctx, bucket_seed))))
            }
        }
    }

    /// Non-consuming low-count verdict; `None` for other kinds. The
    /// post-processor reads this before any finalize runs.
    #[must_use]
    pub fn peek_low_count(&self, ctx: &AnonContext, bucket_seed: Seed) -> Option<bool> {
        match &self.inner {
            StateInner::LowCount(state) => Some(state.is_low_count(ctx, bucket_seed)),
            _ => None,
        }
    }

    /// Human-readable state description.
    pub fn explain(&self, ctx: &AnonContext, bucket_seed: Seed) -> Result<String> {
        match &self.inner {
            StateInner::Count(state) => state.explain(ctx, bucket_seed),
            StateInner::Sum(state) => Ok(state.explain()),
            StateInner::CountDistinct(state) => Ok(state.explain(ctx)),
            StateInner::CountHistogram(state) => Ok(state.explain()),
            StateInner::LowCount(state) => Ok(state.explain(ctx, bucket_seed)),
        }
    }
}
