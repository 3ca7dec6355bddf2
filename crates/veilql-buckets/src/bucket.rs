//! Buckets, their descriptors, and merge semantics.

use std::sync::Arc;

use veilql_agg::{AggKind, AnonAggState, ArgsDescriptor};
use veilql_error::{Result, VeilError};
use veilql_noise::{AnonContext, Seed};
use veilql_types::{Value, ValueType};

/// What one bucket attribute holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrKind {
    /// A grouping label value.
    Label,
    /// An anonymizing aggregator state.
    AnonAgg,
    /// A non-anonymizing value carried through untouched.
    Passthrough,
}

/// An anonymizing aggregate column: kind plus declared argument layout.
#[derive(Debug, Clone, PartialEq)]
pub struct AggSpec {
    pub kind: AggKind,
    pub args: ArgsDescriptor,
}

/// Static description of one bucket attribute.
#[derive(Debug, Clone)]
pub struct BucketAttribute {
    pub name: String,
    pub kind: AttrKind,
    pub value_type: ValueType,
    pub agg: Option<AggSpec>,
}

impl BucketAttribute {
    /// A grouping label column.
    #[must_use]
    pub fn label(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            kind: AttrKind::Label,
            value_type,
            agg: None,
        }
    }

    /// An anonymizing aggregate column; resolves the final value type.
    pub fn anon_agg(
        name: impl Into<String>,
        kind: AggKind,
        args: ArgsDescriptor,
    ) -> Result<Self> {
        let value_type = AnonAggState::final_type(kind, &args)?;
        Ok(Self {
            name: name.into(),
            kind: AttrKind::AnonAgg,
            value_type,
            agg: Some(AggSpec { kind, args }),
        })
    }

    /// A passthrough column.
    #[must_use]
    pub fn passthrough(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            kind: AttrKind::Passthrough,
            value_type,
            agg: None,
        }
    }
}

/// Shape of every bucket of one aggregation: attribute layout plus the
/// anonymization context. Immutable and shareable across the bucket list.
#[derive(Debug, Clone)]
pub struct BucketDescriptor {
    attrs: Vec<BucketAttribute>,
    num_labels: usize,
    low_count_index: Option<usize>,
    ctx: Arc<AnonContext>,
}

impl BucketDescriptor {
    /// Validates the layout: grouping labels form a prefix, aggregate
    /// attributes carry their spec, and at most one low-count filter
    /// exists.
    pub fn new(ctx: Arc<AnonContext>, attrs: Vec<BucketAttribute>) -> Result<Self> {
        let num_labels = attrs
            .iter()
            .take_while(|attr| attr.kind == AttrKind::Label)
            .count();
        if attrs[num_labels..].iter().any(|attr| attr.kind == AttrKind::Label) {
            return Err(VeilError::misuse("grouping labels must form a prefix"));
        }
        for attr in &attrs {
            if attr.kind == AttrKind::AnonAgg && attr.agg.is_none() {
                return Err(VeilError::misuse(format!(
                    "aggregate attribute `{}` has no aggregator spec",
                    attr.name
                )));
            }
        }

        let mut low_count_index = None;
        for (index, attr) in attrs.iter().enumerate() {
            if attr.agg.as_ref().is_some_and(|agg| agg.kind == AggKind::LowCount) {
                if low_count_index.is_some() {
                    return Err(VeilError::misuse("more than one low-count filter attribute"));
                }
                low_count_index = Some(index);
            }
        }

        Ok(Self {
            attrs,
            num_labels,
            low_count_index,
            ctx,
        })
    }

    #[must_use]
    pub fn attrs(&self) -> &[BucketAttribute] {
        &self.attrs
    }

    #[must_use]
    pub fn num_labels(&self) -> usize {
        self.num_labels
    }

    #[must_use]
    pub fn low_count_index(&self) -> Option<usize> {
        self.low_count_index
    }

    #[must_use]
    pub fn ctx(&self) -> &AnonContext {
        &self.ctx
    }

    /// A label-less aggregation is global: exempt from low-count filtering
    /// and from the count floor.
    #[must_use]
    pub fn is_global(&self) -> bool {
        self.num_labels == 0
    }
}

/// One bucket attribute cell.
#[derive(Debug, Clone)]
pub enum BucketValue {
    Value(Option<Value>),
    Agg(AnonAggState),
}

/// One group of the aggregation, owning its aggregator states. States are
/// dropped when the bucket is emitted or absorbed by a merge.
#[derive(Debug, Clone)]
pub struct Bucket {
    values: Vec<BucketValue>,
    pub low_count: bool,
    pub merged: bool,
}

impl Bucket {
    /// A bucket for the given label values, with fresh aggregator states.
    pub fn new(desc: &BucketDescriptor, labels: Vec<Option<Value>>) -> Result<Self> {
        if labels.len() != desc.num_labels() {
            return Err(VeilError::misuse(format!(
                "bucket has {} labels, descriptor declares {}",
                labels.len(),
                desc.num_labels()
            )));
        }

        let mut values: Vec<BucketValue> = labels.into_iter().map(BucketValue::Value).collect();
        for attr in &desc.attrs()[desc.num_labels()..] {
            match attr.kind {
                AttrKind::AnonAgg => {
                    // Validated by the descriptor.
                    let spec = attr.agg.as_ref().ok_or_else(|| {
                        VeilError::misuse("aggregate attribute without a spec")
                    })?;
                    values.push(BucketValue::Agg(AnonAggState::new(
                        spec.kind,
                        &spec.args,
                        desc.ctx(),
                    )?));
                }
                AttrKind::Passthrough => values.push(BucketValue::Value(None)),
                AttrKind::Label => unreachable!("labels form a prefix"),
            }
        }

        Ok(Self {
            values,
            low_count: false,
            merged: false,
        })
    }

    #[must_use]
    pub fn values(&self) -> &[BucketValue] {
        &self.values
    }

    #[must_use]
    pub fn values_mut(&mut self) -> &mut [BucketValue] {
        &mut self.values
    }

    /// The grouping label at `index`.
    #[must_use]
    pub fn label(&self, index: usize) -> &Option<Value> {
        match &self.values[index] {
            BucketValue::Value(value) => value,
            BucketValue::Agg(_) => panic!("attribute {index} is not a label"),
        }
    }

    /// Mutable access to the aggregator state at attribute `index`.
    #[must_use]
    pub fn agg_state_mut(&mut self, index: usize) -> Option<&mut AnonAggState> {
        match &mut self.values[index] {
            BucketValue::Agg(state) => Some(state),
            BucketValue::Value(_) => None,
        }
    }

    #[must_use]
    pub fn agg_state(&self, index: usize) -> Option<&AnonAggState> {
        match &self.values[index] {
            BucketValue::Agg(state) => Some(state),
            BucketValue::Value(_) => None,
        }
    }

    /// Feeds one row into the aggregator at attribute `index`.
    pub fn transition(&mut self, index: usize, args: &[Option<Value>]) -> Result<()> {
        let state = self
            .agg_state_mut(index)
            .ok_or_else(|| VeilError::misuse(format!("attribute {index} is not an aggregate")))?;
        state.transition(args)
    }

    /// Stores a passthrough value.
    pub fn set_passthrough(&mut self, index: usize, value: Option<Value>) -> Result<()> {
        match &mut self.values[index] {
            BucketValue::Value(slot) => {
                *slot = value;
                Ok(())
            }
            BucketValue::Agg(_) => Err(VeilError::misuse(format!(
                "attribute {index} is not a passthrough"
            ))),
        }
    }

    /// The bucket's noise layer seed: XOR of the canonical hashes of its
    /// non-NULL grouping labels. The global (label-less) bucket seeds 0.
    #[must_use]
    pub fn seed(&self, desc: &BucketDescriptor) -> Seed {
        (0..desc.num_labels()).fold(0, |seed, index| {
            seed ^ self.label(index).as_ref().map_or(0, Value::hash64)
        })
    }

    /// One `name: state` line per aggregate attribute, for EXPLAIN-style
    /// host output.
    pub fn explain(&self, desc: &BucketDescriptor) -> Result<Vec<String>> {
        let bucket_seed = self.seed(desc);
        let mut lines = Vec::new();
        for (index, attr) in desc.attrs().iter().enumerate() {
            if let Some(state) = self.agg_state(index) {
                let text = state.explain(desc.ctx(), bucket_seed)?;
                lines.push(format!("{}: {}", attr.name, text));
            }
        }
        Ok(lines)
    }
}

/// The bucket's low-count verdict via its low-count filter attribute;
/// buckets without one (global aggregation) never count as low.
#[must_use]
pub fn eval_low_count(bucket: &Bucket, desc: &BucketDescriptor) -> bool {
    let Some(index) = desc.low_count_index() else {
        return false;
    };
    let bucket_seed = bucket.seed(desc);
    bucket
        .agg_state(index)
        .and_then(|state| state.peek_low_count(desc.ctx(), bucket_seed))
        .unwrap_or(false)
}

/// Merges `src` into `dst`: aggregate attributes merge state-wise, label
/// and passthrough attributes keep the destination's values.
pub fn merge_bucket(dst: &mut Bucket, src: &Bucket, desc: &BucketDescriptor) -> Result<()> {
    for (index, attr) in desc.attrs().iter().enumerate() {
        if attr.kind != AttrKind::AnonAgg {
            continue;
        }
        match (&mut dst.values[index], &src.values[index]) {
            (BucketValue::Agg(dst_state), BucketValue::Agg(src_state)) => {
                dst_state.merge(src_state)?;
            }
            _ => {
                return Err(VeilError::misuse(format!(
                    "attribute {index} is not an aggregate in both buckets"
                )));
            }
        }
    }
    Ok(())
}

/// Merges `buckets[src]` into `buckets[dst]` in place.
pub fn merge_buckets_at(
    buckets: &mut [Bucket],
    dst: usize,
    src: usize,
    desc: &BucketDescriptor,
) -> Result<()> {
    if dst == src {
        return Err(VeilError::misuse("cannot merge a bucket into itself"));
    }
    let (dst_bucket, src_bucket) = if dst < src {
        let (left, right) = buckets.split_at_mut(src);
        (&mut left[dst], &right[0])
    } else {
        let (left, right) = buckets.split_at_mut(dst);
        (&mut right[0], &left[src])
    };
    merge_bucket(dst_bucket, src_bucket, desc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use veilql_agg::ArgSpec;
    use veilql_types::AnonConfig;

    fn ctx() -> Arc<AnonContext> {
        Arc::new(AnonContext::new(AnonConfig::with_salt("t")).unwrap())
    }

    fn count_agg(name: &str) -> BucketAttribute {
        BucketAttribute::anon_agg(
            name,
            AggKind::Count,
            ArgsDescriptor::new(vec![ArgSpec::column(ValueType::Int)]),
        )
        .unwrap()
    }

    fn low_count_agg() -> BucketAttribute {
        BucketAttribute::anon_agg(
            "lcf",
            AggKind::LowCount,
            ArgsDescriptor::new(vec![ArgSpec::column(ValueType::Int)]),
        )
        .unwrap()
    }

    fn descriptor() -> BucketDescriptor {
        BucketDescriptor::new(
            ctx(),
            vec![
                BucketAttribute::label("city", ValueType::Text),
                count_agg("count"),
                low_count_agg(),
            ],
        )
        .unwrap()
    }

    fn feed(bucket: &mut Bucket, users: impl IntoIterator<Item = i64>) {
        for user in users {
            bucket.transition(1, &[Some(Value::Int(user))]).unwrap();
            bucket.transition(2, &[Some(Value::Int(user))]).unwrap();
        }
    }

    #[test]
    fn labels_must_form_a_prefix() {
        let err = BucketDescriptor::new(
            ctx(),
            vec![
                count_agg("count"),
                BucketAttribute::label("city", ValueType::Text),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, VeilError::AggregateMisuse(_)));
    }

    #[test]
    fn only_one_low_count_filter_is_allowed() {
        let err = BucketDescriptor::new(
            ctx(),
            vec![low_count_agg(), low_count_agg()],
        )
        .unwrap_err();
        assert!(matches!(err, VeilError::AggregateMisuse(_)));
    }

    #[test]
    fn descriptor_locates_the_low_count_filter() {
        let desc = descriptor();
        assert_eq!(desc.num_labels(), 1);
        assert_eq!(desc.low_count_index(), Some(2));
        assert!(!desc.is_global());
    }

    #[test]
    fn bucket_seed_ignores_label_order_content() {
        let desc = descriptor();
        let a = Bucket::new(&desc, vec![Some(Value::Text("berlin".into()))]).unwrap();
        let b = Bucket::new(&desc, vec![Some(Value::Text("berlin".into()))]).unwrap();
        let c = Bucket::new(&desc, vec![Some(Value::Text("madrid".into()))]).unwrap();
        assert_eq!(a.seed(&desc), b.seed(&desc));
        assert_ne!(a.seed(&desc), c.seed(&desc));

        let null_label = Bucket::new(&desc, vec![None]).unwrap();
        assert_eq!(null_label.seed(&desc), 0);
    }

    #[test]
    fn wrong_label_arity_is_rejected() {
        let desc = descriptor();
        assert!(Bucket::new(&desc, vec![]).is_err());
    }

    #[test]
    fn low_count_follows_the_filter_attribute() {
        let desc = descriptor();
        let mut small = Bucket::new(&desc, vec![Some(Value::Text("x".into()))]).unwrap();
        feed(&mut small, [1]);
        assert!(eval_low_count(&small, &desc));

        let mut big = Bucket::new(&desc, vec![Some(Value::Text("x".into()))]).unwrap();
        feed(&mut big, 1..=40);
        assert!(!eval_low_count(&big, &desc));
    }

    #[test]
    fn merge_combines_aggregates_and_keeps_labels() {
        let desc = descriptor();
        let mut dst = Bucket::new(&desc, vec![Some(Value::Text("keep".into()))]).unwrap();
        let mut src = Bucket::new(&desc, vec![Some(Value::Text("gone".into()))]).unwrap();
        feed(&mut dst, 1..=10);
        feed(&mut src, 11..=20);

        merge_bucket(&mut dst, &src, &desc).unwrap();
        assert_eq!(dst.label(0), &Some(Value::Text("keep".into())));

        let mut whole = Bucket::new(&desc, vec![Some(Value::Text("keep".into()))]).unwrap();
        feed(&mut whole, 1..=20);
        let seed = dst.seed(&desc);
        let merged_count = dst
            .agg_state_mut(1)
            .unwrap()
            .finalize(desc.ctx(), seed, false)
            .unwrap();
        let whole_count = whole
            .agg_state_mut(1)
            .unwrap()
            .finalize(desc.ctx(), seed, false)
            .unwrap();
        assert_eq!(merged_count, whole_count);
    }

    #[test]
    fn merge_at_works_in_both_directions() {
        let desc = descriptor();
        let mut buckets = vec![
            Bucket::new(&desc, vec![Some(Value::Text("a".into()))]).unwrap(),
            Bucket::new(&desc, vec![Some(Value::Text("b".into()))]).unwrap(),
        ];
        feed(&mut buckets[0], 1..=5);
        feed(&mut buckets[1], 6..=10);

        merge_buckets_at(&mut buckets, 0, 1, &desc).unwrap();
        merge_buckets_at(&mut buckets, 1, 0, &desc).unwrap();
        assert!(merge_buckets_at(&mut buckets, 1, 1, &desc).is_err());
    }

    #[test]
    fn explain_covers_every_aggregate_attribute() {
        let desc = descriptor();
        let mut bucket = Bucket::new(&desc, vec![Some(Value::Text("x".into()))]).unwrap();
        feed(&mut bucket, 1..=10);
        let lines = bucket.explain(&desc).unwrap();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("count: uniq=10"), "{}", lines[0]);
        assert!(lines[1].starts_with("lcf: uniq=10"), "{}", lines[1]);
    }

    #[test]
    fn passthrough_cells_hold_values() {
        let desc = BucketDescriptor::new(
            ctx(),
            vec![
                BucketAttribute::label("city", ValueType::Text),
                BucketAttribute::passthrough("note", ValueType::Text),
            ],
        )
        .unwrap();
        let mut bucket = Bucket::new(&desc, vec![None]).unwrap();
        bucket
            .set_passthrough(1, Some(Value::Text("kept".into())))
            .unwrap();
        assert!(bucket.set_passthrough(0, None).is_ok());
        assert!(bucket.transition(1, &[]).is_err());
    }
}
