//! VeilQL: an embeddable SQL anonymization engine.
//!
//! The host executor groups rows into buckets and drives one
//! [`AnonAggState`] per anonymizing aggregate; VeilQL suppresses buckets
//! with too few distinct anonymization identifiers, perturbs the surviving
//! aggregates with a deterministic flattening + layered-noise scheme, and
//! merges isolated low-count buckets where linked-extension attacks would
//! otherwise single out individuals.
//!
//! ```
//! use veilql::{
//!     AggKind, AnonConfig, ArgSpec, ArgsDescriptor, Bucket, BucketAttribute, Engine, Value,
//!     ValueType,
//! };
//!
//! let engine = Engine::new(AnonConfig::with_salt("secret")).unwrap();
//! let desc = engine
//!     .bucket_descriptor(vec![
//!         BucketAttribute::label("city", ValueType::Text),
//!         BucketAttribute::anon_agg(
//!             "visitors",
//!             AggKind::Count,
//!             ArgsDescriptor::new(vec![ArgSpec::column(ValueType::Int)]),
//!         )
//!         .unwrap(),
//!         BucketAttribute::anon_agg(
//!             "lcf",
//!             AggKind::LowCount,
//!             ArgsDescriptor::new(vec![ArgSpec::column(ValueType::Int)]),
//!         )
//!         .unwrap(),
//!     ])
//!     .unwrap();
//!
//! let mut bucket = Bucket::new(&desc, vec![Some(Value::Text("berlin".into()))]).unwrap();
//! for user in 0..50i64 {
//!     bucket.transition(1, &[Some(Value::Int(user))]).unwrap();
//!     bucket.transition(2, &[Some(Value::Int(user))]).unwrap();
//! }
//! let rows = engine.process_buckets(&mut vec![bucket], &desc, None).unwrap();
//! assert_eq!(rows.len(), 1);
//! ```

use std::sync::Arc;

pub use veilql_agg::{
    AggKind, Aid, AidMapper, AidTracker, AnonAggState, ArgSpec, ArgsDescriptor,
    ContributionOps, ContributionTracker, Contributor, CountDistinctState, CountHistogramState,
    CountState, LowCountState, RECORD_HASH_SIZE, RecordHasher, SumState, SummableResult,
    SummableResultAccumulator,
};
pub use veilql_buckets::{
    AggSpec, AttrKind, Bucket, BucketAccumulator, BucketAttribute, BucketDescriptor, BucketRow,
    BucketValue, CancelProbe, eval_low_count, led_pass, merge_bucket, merge_buckets_at,
    process_buckets, star_bucket,
};
pub use veilql_error::{Result, VeilError};
pub use veilql_noise::{AnonContext, Seed, hash_bytes, money_round, seed_preview};
pub use veilql_types::{AnonConfig, HistogramBin, NullableValue, Value, ValueType};

/// Engine handle: the validated anonymization context behind every call.
///
/// No global state; hosts may hold several engines with different salts or
/// parameters side by side.
#[derive(Debug, Clone)]
pub struct Engine {
    ctx: Arc<AnonContext>,
}

impl Engine {
    /// Validates `config` and builds the engine.
    pub fn new(config: AnonConfig) -> Result<Self> {
        Ok(Self {
            ctx: Arc::new(AnonContext::new(config)?),
        })
    }

    #[must_use]
    pub fn context(&self) -> &Arc<AnonContext> {
        &self.ctx
    }

    /// Creates an aggregator state for the given declared arguments.
    pub fn create_state(&self, kind: AggKind, args: &ArgsDescriptor) -> Result<AnonAggState> {
        AnonAggState::new(kind, args, &self.ctx)
    }

    /// Builds a validated bucket descriptor sharing this engine's context.
    pub fn bucket_descriptor(&self, attrs: Vec<BucketAttribute>) -> Result<BucketDescriptor> {
        BucketDescriptor::new(Arc::clone(&self.ctx), attrs)
    }

    /// Runs the cross-bucket post-processing pipeline and emits the
    /// finalized rows. `cancel` is probed between buckets.
    pub fn process_buckets(
        &self,
        buckets: &mut Vec<Bucket>,
        desc: &BucketDescriptor,
        cancel: Option<CancelProbe<'_>>,
    ) -> Result<Vec<BucketRow>> {
        process_buckets(buckets, desc, cancel)
    }
}
