//! Linked-extension detection.
//!
//! A low-count bucket that differs from a high-count sibling in exactly one
//! label column, while being alone in some other column, isolates a victim:
//! the extra column's value extends the sibling's population by (almost)
//! one individual. Such buckets are merged into every isolating sibling
//! and marked merged, so later suppression does not count them twice.

use hashbrown::HashMap;
use smallvec::SmallVec;
use tracing::debug;
use veilql_error::Result;

use crate::bucket::{Bucket, BucketDescriptor, merge_buckets_at};

/// Siblings tracked per label subset; more carry no extra signal.
const MAX_SIBLINGS: usize = 3;

type SiblingGroup = SmallVec<[usize; MAX_SIBLINGS]>;

/// The bucket's labels with `skipped_column` removed, as a hashable key.
/// Length prefixes keep variable-width labels unambiguous.
fn subset_key(bucket: &Bucket, desc: &BucketDescriptor, skipped_column: usize) -> Vec<u8> {
    let mut key = Vec::with_capacity(desc.num_labels() * 12);
    for column in 0..desc.num_labels() {
        if column == skipped_column {
            continue;
        }
        match bucket.label(column) {
            Some(value) => {
                let mut encoded = Vec::with_capacity(12);
                value.encode_canonical(&mut encoded);
                key.push(1);
                key.extend_from_slice(&(encoded.len() as u32).to_le_bytes());
                key.extend_from_slice(&encoded);
            }
            None => key.push(0),
        }
    }
    key
}

/// Runs linked-extension detection over the bucket list, merging isolated
/// low-count buckets into their isolating siblings.
///
/// Requires at least 3 label columns: with 2 an attack would have to
/// isolate a victim against the whole dataset, and with fewer there is no
/// unknown column to exploit.
pub fn led_pass(buckets: &mut [Bucket], desc: &BucketDescriptor) -> Result<()> {
    let num_labels = desc.num_labels();
    if num_labels <= 2 {
        return Ok(());
    }

    // For each column, group buckets by their labels excluding that column;
    // every group associates siblings that differ only there.
    let mut groups: Vec<SiblingGroup> = Vec::new();
    let mut assignment = vec![usize::MAX; buckets.len() * num_labels];
    for column in 0..num_labels {
        let mut cache: HashMap<Vec<u8>, usize> = HashMap::with_capacity(buckets.len());
        for (bucket_index, bucket) in buckets.iter().enumerate() {
            let group_index = *cache
                .entry(subset_key(bucket, desc, column))
                .or_insert_with(|| {
                    groups.push(SiblingGroup::new());
                    groups.len() - 1
                });
            let group = &mut groups[group_index];
            if group.len() < MAX_SIBLINGS {
                group.push(bucket_index);
            }
            assignment[bucket_index * num_labels + column] = group_index;
        }
    }

    let mut buckets_merged = 0usize;
    let mut total_merges = 0usize;

    for bucket_index in 0..buckets.len() {
        if !buckets[bucket_index].low_count {
            continue;
        }

        let mut has_unknown_column = false;
        let mut merge_targets: SmallVec<[usize; 8]> = SmallVec::new();

        for column in 0..num_labels {
            let group = &groups[assignment[bucket_index * num_labels + column]];
            match group.len() {
                // Alone in the subset: an unknown column.
                1 => {
                    debug_assert_eq!(group[0], bucket_index);
                    has_unknown_column = true;
                }
                // Exactly one sibling; if it is high count, this column
                // isolates the victim.
                2 => {
                    let other = if group[0] == bucket_index {
                        group[1]
                    } else {
                        group[0]
                    };
                    if !buckets[other].low_count {
                        merge_targets.push(other);
                    }
                }
                _ => {}
            }
        }

        if !has_unknown_column || merge_targets.is_empty() {
            continue;
        }

        for &target in &merge_targets {
            merge_buckets_at(buckets, target, bucket_index, desc)?;
        }
        buckets[bucket_index].merged = true;
        buckets_merged += 1;
        total_merges += merge_targets.len();
    }

    debug!(buckets_merged, total_merges, "linked-extension pass done");
    Ok(())
}
