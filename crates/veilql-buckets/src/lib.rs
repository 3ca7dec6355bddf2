//! Bucket model and cross-bucket post-processing.
//!
//! A bucket is one group of the aggregation: its grouping label values plus
//! one anonymizing aggregator state per aggregate column. After the
//! executor has streamed every row, the post-processor evaluates low-count
//! flags, runs the linked-extension pass, absorbs the remaining low-count
//! buckets into the suppress bucket, and finalizes the survivors into rows.

mod accumulator;
mod bucket;
mod led;
mod pipeline;
mod star;

pub use accumulator::BucketAccumulator;
pub use bucket::{
    AggSpec, AttrKind, Bucket, BucketAttribute, BucketDescriptor, BucketValue, eval_low_count,
    merge_bucket, merge_buckets_at,
};
pub use led::led_pass;
pub use pipeline::{BucketRow, CancelProbe, process_buckets};
pub use star::star_bucket;
