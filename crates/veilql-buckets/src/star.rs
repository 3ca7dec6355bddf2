//! The star (suppress) bucket.

use tracing::debug;
use veilql_error::Result;
use veilql_types::{Value, ValueType};

use crate::bucket::{AttrKind, Bucket, BucketDescriptor, eval_low_count, merge_bucket};

/// Collects every low-count, unmerged bucket into a synthetic bucket whose
/// labels are NULL (or the configured text marker). Returns `None` when
/// suppress-bin computation is disabled, fewer than two buckets were
/// absorbed, or the star bucket is itself low count.
pub fn star_bucket(buckets: &[Bucket], desc: &BucketDescriptor) -> Result<Option<Bucket>> {
    let config = desc.ctx().config();
    if !config.compute_suppress_bin {
        return Ok(None);
    }

    let labels = desc.attrs()[..desc.num_labels()]
        .iter()
        .map(|attr| {
            if attr.kind == AttrKind::Label && attr.value_type == ValueType::Text {
                config
                    .text_label_for_suppress_bin
                    .as_ref()
                    .map(|marker| Value::Text(marker.clone()))
            } else {
                None
            }
        })
        .collect();

    let mut star = Bucket::new(desc, labels)?;

    let mut absorbed = 0usize;
    for bucket in buckets {
        if bucket.low_count && !bucket.merged {
            merge_bucket(&mut star, bucket, desc)?;
            absorbed += 1;
        }
    }

    star.low_count = eval_low_count(&star, desc);
    debug!(absorbed, star_low_count = star.low_count, "star bucket absorption");

    if star.low_count || absorbed < 2 {
        Ok(None)
    } else {
        Ok(Some(star))
    }
}
