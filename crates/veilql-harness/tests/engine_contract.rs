//! Engine-level contract checks: configuration, misuse, cancellation,
//! result digests.

use veilql::{
    AggKind, AnonConfig, ArgSpec, ArgsDescriptor, BucketAttribute, Engine, RecordHasher, Value,
    ValueType, VeilError,
};
use veilql_harness::{BucketSet, init_test_logging, population};

fn engine() -> Engine {
    Engine::new(AnonConfig::with_salt("t")).unwrap()
}

fn counting_attrs() -> Vec<BucketAttribute> {
    vec![
        BucketAttribute::label("dept", ValueType::Text),
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
    ]
}

#[test]
fn invalid_configs_never_build_an_engine() {
    init_test_logging();
    let mut config = AnonConfig::with_salt("t");
    config.outlier_count_max = 0;
    let err = Engine::new(config).unwrap_err();
    assert!(matches!(err, VeilError::ConfigInvalid { .. }));

    let err = Engine::new(AnonConfig::default()).unwrap_err();
    assert!(matches!(err, VeilError::ConfigInvalid { key: "salt", .. }));
}

#[test]
fn aggregate_misuse_is_rejected_not_absorbed() {
    init_test_logging();
    let engine = engine();
    let args = ArgsDescriptor::new(vec![ArgSpec::column(ValueType::Int)]);
    let mut state = engine.create_state(AggKind::Count, &args).unwrap();
    state.transition(&[Some(Value::Int(1))]).unwrap();
    state.finalize(engine.context(), 0, false).unwrap();

    assert!(matches!(
        state.finalize(engine.context(), 0, false),
        Err(VeilError::AggregateMisuse(_))
    ));
    assert!(matches!(
        state.transition(&[Some(Value::Int(2))]),
        Err(VeilError::AggregateMisuse(_))
    ));

    // Kind mismatches refuse to merge.
    let mut count = engine.create_state(AggKind::Count, &args).unwrap();
    let distinct_args = ArgsDescriptor::new(vec![
        ArgSpec::column(ValueType::Text),
        ArgSpec::column(ValueType::Int),
    ]);
    let other = engine
        .create_state(AggKind::CountDistinct, &distinct_args)
        .unwrap();
    assert!(matches!(
        count.merge(&other),
        Err(VeilError::AggregateMisuse(_))
    ));
}

#[test]
fn cancellation_aborts_the_pipeline() {
    init_test_logging();
    let engine = engine();
    let desc = engine.bucket_descriptor(counting_attrs()).unwrap();
    let mut bucket = veilql::Bucket::new(&desc, vec![Some(Value::Text("x".into()))]).unwrap();
    for user in 0..30i64 {
        bucket.transition(1, &[Some(Value::Int(user))]).unwrap();
        bucket.transition(2, &[Some(Value::Int(user))]).unwrap();
    }

    let cancel = || true;
    let err = engine
        .process_buckets(&mut vec![bucket], &desc, Some(&cancel))
        .unwrap_err();
    assert!(matches!(err, VeilError::Cancelled));
}

#[test]
fn identical_runs_produce_identical_row_digests() {
    init_test_logging();
    let rows = population::skewed_user_rows(23, 40, 3, 0, 0);

    let digest = || {
        let mut set = BucketSet::new(engine(), counting_attrs()).unwrap();
        for row in &rows {
            set.ingest(
                vec![Some(Value::Text(format!("dept-{}", row.user % 4)))],
                &[
                    vec![Some(Value::Int(row.user))],
                    vec![Some(Value::Int(row.user))],
                ],
            )
            .unwrap();
        }
        let mut hasher = RecordHasher::new();
        for row in set.finish().unwrap() {
            hasher.update(&row.values);
        }
        hasher.finalize_hex()
    };

    let first = digest();
    assert_eq!(first, digest());
    assert_eq!(first.len(), 64);
}

#[test]
fn explain_lines_cover_the_bucket() {
    init_test_logging();
    let engine = engine();
    let desc = engine.bucket_descriptor(counting_attrs()).unwrap();
    let mut bucket = veilql::Bucket::new(&desc, vec![Some(Value::Text("x".into()))]).unwrap();
    for user in 0..25i64 {
        bucket.transition(1, &[Some(Value::Int(user))]).unwrap();
        bucket.transition(2, &[Some(Value::Int(user))]).unwrap();
    }

    let lines = bucket.explain(&desc).unwrap();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("count: uniq=25, top=["), "{}", lines[0]);
    assert!(lines[0].contains("seeds: bkt="), "{}", lines[0]);
    assert!(lines[1].starts_with("lcf: uniq=25, thresh="), "{}", lines[1]);
}
