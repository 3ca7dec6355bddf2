//! The cross-bucket post-processing pipeline.
//!
//! Order matters: low-count flags are evaluated first, the linked-extension
//! pass then marks merged buckets, and only the still-unmerged low-count
//! buckets feed the star bucket. Finalize runs last, once per emitted
//! bucket. Buckets that are merged or suppressed are never finalized; their
//! states drop with the bucket list.

use tracing::debug;
use veilql_error::{Result, VeilError};
use veilql_types::Value;

use crate::bucket::{Bucket, BucketDescriptor, BucketValue, eval_low_count};
use crate::led::led_pass;
use crate::star::star_bucket;

/// One emitted output row: a value per descriptor attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct BucketRow {
    pub values: Vec<Option<Value>>,
}

/// Host cancel probe, checked between buckets.
pub type CancelProbe<'a> = &'a dyn Fn() -> bool;

fn check_cancel(cancel: Option<CancelProbe<'_>>) -> Result<()> {
    if cancel.is_some_and(|probe| probe()) {
        return Err(VeilError::Cancelled);
    }
    Ok(())
}

fn finalize_bucket(bucket: &mut Bucket, desc: &BucketDescriptor) -> Result<BucketRow> {
    let bucket_seed = bucket.seed(desc);
    let is_global = desc.is_global();
    let ctx = desc.ctx();

    let mut values = Vec::with_capacity(desc.attrs().len());
    for index in 0..desc.attrs().len() {
        let value = match &mut bucket.values_mut()[index] {
            BucketValue::Value(value) => value.clone(),
            BucketValue::Agg(state) => state.finalize(ctx, bucket_seed, is_global)?,
        };
        values.push(value);
    }
    Ok(BucketRow { values })
}

/// Runs the full post-processing pipeline and emits the surviving rows:
/// the star bucket first (when reportable), then the high-count buckets in
/// input order.
pub fn process_buckets(
    buckets: &mut Vec<Bucket>,
    desc: &BucketDescriptor,
    cancel: Option<CancelProbe<'_>>,
) -> Result<Vec<BucketRow>> {
    for bucket in buckets.iter_mut() {
        check_cancel(cancel)?;
        bucket.low_count = eval_low_count(bucket, desc);
    }

    led_pass(buckets, desc)?;
    let star = star_bucket(buckets, desc)?;

    let mut rows = Vec::new();
    let mut suppressed = 0usize;
    let mut merged = 0usize;

    if let Some(mut star) = star {
        rows.push(finalize_bucket(&mut star, desc)?);
    }
    for bucket in buckets.iter_mut() {
        check_cancel(cancel)?;
        if bucket.merged {
            merged += 1;
            continue;
        }
        if bucket.low_count {
            suppressed += 1;
            continue;
        }
        rows.push(finalize_bucket(bucket, desc)?);
    }

    debug!(
        emitted = rows.len(),
        merged, suppressed, "bucket post-processing done"
    );
    Ok(rows)
}
