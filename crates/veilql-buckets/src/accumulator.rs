//! Streaming bucket accumulation.
//!
//! Hosts with their own hash aggregation feed buckets directly; hosts
//! without one can stream `(labels, aggregate arguments)` tuples into a
//! [`BucketAccumulator`], which groups rows by label values in first-seen
//! order and fans each row out to every aggregate of its bucket.

use hashbrown::HashMap;
use veilql_error::{Result, VeilError};
use veilql_types::Value;

use crate::bucket::{AttrKind, Bucket, BucketDescriptor};
use crate::pipeline::{BucketRow, CancelProbe, process_buckets};

/// Unambiguous grouping key for a label tuple: NULL markers plus
/// length-prefixed canonical encodings.
fn group_key(labels: &[Option<Value>]) -> Vec<u8> {
    let mut key = Vec::with_capacity(labels.len() * 12);
    for label in labels {
        match label {
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

/// Buckets under construction, grouped by label values.
#[derive(Debug)]
pub struct BucketAccumulator {
    desc: BucketDescriptor,
    buckets: Vec<Bucket>,
    index: HashMap<Vec<u8>, usize>,
    agg_indexes: Vec<usize>,
}

impl BucketAccumulator {
    #[must_use]
    pub fn new(desc: BucketDescriptor) -> Self {
        let agg_indexes = desc
            .attrs()
            .iter()
            .enumerate()
            .filter(|(_, attr)| attr.kind == AttrKind::AnonAgg)
            .map(|(index, _)| index)
            .collect();
        Self {
            desc,
            buckets: Vec::new(),
            index: HashMap::new(),
            agg_indexes,
        }
    }

    #[must_use]
    pub fn descriptor(&self) -> &BucketDescriptor {
        &self.desc
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    #[must_use]
    pub fn buckets(&self) -> &[Bucket] {
        &self.buckets
    }

    /// Feeds one row. `agg_args[k]` is the argument tuple for the k-th
    /// aggregate attribute, in attribute order.
    pub fn ingest(
        &mut self,
        labels: Vec<Option<Value>>,
        agg_args: &[Vec<Option<Value>>],
    ) -> Result<()> {
        if agg_args.len() != self.agg_indexes.len() {
            return Err(VeilError::misuse(format!(
                "row carries {} aggregate argument tuples, descriptor declares {}",
                agg_args.len(),
                self.agg_indexes.len()
            )));
        }

        let key = group_key(&labels);
        let bucket_index = match self.index.get(&key) {
            Some(&index) => index,
            None => {
                let bucket = Bucket::new(&self.desc, labels)?;
                self.buckets.push(bucket);
                let index = self.buckets.len() - 1;
                self.index.insert(key, index);
                index
            }
        };

        let bucket = &mut self.buckets[bucket_index];
        for (attr_index, args) in self.agg_indexes.iter().zip(agg_args) {
            bucket.transition(*attr_index, args)?;
        }
        Ok(())
    }

    /// Runs the post-processing pipeline over the accumulated buckets and
    /// emits the surviving rows.
    pub fn finish(self, cancel: Option<CancelProbe<'_>>) -> Result<Vec<BucketRow>> {
        let mut buckets = self.buckets;
        process_buckets(&mut buckets, &self.desc, cancel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucket::BucketAttribute;
    use std::sync::Arc;
    use veilql_agg::{AggKind, ArgSpec, ArgsDescriptor};
    use veilql_noise::AnonContext;
    use veilql_types::{AnonConfig, ValueType};

    fn descriptor() -> BucketDescriptor {
        let ctx = Arc::new(AnonContext::new(AnonConfig::with_salt("t")).unwrap());
        BucketDescriptor::new(
            ctx,
            vec![
                BucketAttribute::label("city", ValueType::Text),
                BucketAttribute::anon_agg(
                    "count",
                    AggKind::Count,
                    ArgsDescriptor::new(vec![ArgSpec::column(ValueType::Int)]),
                )
                .unwrap(),
                BucketAttribute::anon_agg(
                    "lcf",
                    AggKind::LowCount,
                    ArgsDescriptor::new(vec![ArgSpec::column(ValueType::Int)]),
                )
                .unwrap(),
            ],
        )
        .unwrap()
    }

    fn ingest_user(acc: &mut BucketAccumulator, city: &str, user: i64) {
        acc.ingest(
            vec![Some(Value::Text(city.into()))],
            &[vec![Some(Value::Int(user))], vec![Some(Value::Int(user))]],
        )
        .unwrap();
    }

    #[test]
    fn rows_group_in_first_seen_order() {
        let mut acc = BucketAccumulator::new(descriptor());
        for user in 0..30 {
            ingest_user(&mut acc, "b", user);
            ingest_user(&mut acc, "a", user);
        }
        assert_eq!(acc.len(), 2);
        assert_eq!(acc.buckets()[0].label(0), &Some(Value::Text("b".into())));

        let rows = acc.finish(None).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].values[0], Some(Value::Text("b".into())));
        assert_eq!(rows[1].values[0], Some(Value::Text("a".into())));
    }

    #[test]
    fn null_labels_form_their_own_bucket() {
        let mut acc = BucketAccumulator::new(descriptor());
        for user in 0..30 {
            ingest_user(&mut acc, "a", user);
            acc.ingest(
                vec![None],
                &[vec![Some(Value::Int(user))], vec![Some(Value::Int(user))]],
            )
            .unwrap();
        }
        assert_eq!(acc.len(), 2);
    }

    #[test]
    fn tuple_arity_is_checked() {
        let mut acc = BucketAccumulator::new(descriptor());
        let err = acc
            .ingest(vec![None], &[vec![Some(Value::Int(1))]])
            .unwrap_err();
        assert!(matches!(err, VeilError::AggregateMisuse(_)));
    }

    #[test]
    fn empty_accumulator_emits_nothing() {
        let acc = BucketAccumulator::new(descriptor());
        assert!(acc.is_empty());
        assert!(acc.finish(None).unwrap().is_empty());
    }
}
