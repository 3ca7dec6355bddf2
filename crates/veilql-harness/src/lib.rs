//! Test harness for the VeilQL engine.
//!
//! [`BucketSet`] pairs an [`Engine`] with a streaming
//! [`veilql::BucketAccumulator`], standing in for the host executor's
//! aggregation node. [`population`] generates deterministic synthetic
//! datasets for scenario and property tests.

pub mod population;

use std::sync::Once;

use veilql::{
    BucketAccumulator, Bucket, BucketAttribute, BucketRow, Engine, Result, Value,
};

/// Installs a debug-level subscriber once per test binary.
pub fn init_test_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init();
    });
}

/// An engine plus its buckets under construction.
pub struct BucketSet {
    engine: Engine,
    accumulator: BucketAccumulator,
}

impl BucketSet {
    pub fn new(engine: Engine, attrs: Vec<BucketAttribute>) -> Result<Self> {
        let desc = engine.bucket_descriptor(attrs)?;
        Ok(Self {
            engine,
            accumulator: BucketAccumulator::new(desc),
        })
    }

    #[must_use]
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Feeds one row: `agg_args[k]` is the argument tuple for the k-th
    /// aggregate attribute (in attribute order).
    pub fn ingest(
        &mut self,
        labels: Vec<Option<Value>>,
        agg_args: &[Vec<Option<Value>>],
    ) -> Result<()> {
        self.accumulator.ingest(labels, agg_args)
    }

    /// Runs the post-processing pipeline and returns the emitted rows.
    pub fn finish(self) -> Result<Vec<BucketRow>> {
        self.accumulator.finish(None)
    }

    /// Access to the raw buckets before post-processing.
    #[must_use]
    pub fn buckets(&self) -> &[Bucket] {
        self.accumulator.buckets()
    }
}
