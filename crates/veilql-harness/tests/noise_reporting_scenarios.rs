//! The `*_noise` reporting aggregators.

use veilql::{
    AggKind, AnonConfig, ArgSpec, ArgsDescriptor, Engine, Value, ValueType, money_round,
};
use veilql_harness::init_test_logging;

fn engine() -> Engine {
    Engine::new(AnonConfig::with_salt("t")).unwrap()
}

#[test]
fn count_noise_reports_the_rounded_layer_sd() {
    init_test_logging();
    let engine = engine();
    let args = ArgsDescriptor::new(vec![ArgSpec::column(ValueType::Int)]);
    let mut state = engine.create_state(AggKind::CountNoise, &args).unwrap();
    for user in 0..100i64 {
        state.transition(&[Some(Value::Int(user))]).unwrap();
    }

    let value = state.finalize(engine.context(), 0, false).unwrap().unwrap();
    let Value::Real(sd) = value else {
        panic!("expected a real noise report, got {value:?}")
    };
    // Single-row contributors: the noise layer sits at the configured SD.
    assert_eq!(sd, 1.0);
}

#[test]
fn count_noise_is_null_for_tiny_populations() {
    init_test_logging();
    let engine = engine();
    let args = ArgsDescriptor::new(vec![ArgSpec::column(ValueType::Int)]);
    let mut state = engine.create_state(AggKind::CountNoise, &args).unwrap();
    state.transition(&[Some(Value::Int(1))]).unwrap();
    assert_eq!(state.finalize(engine.context(), 0, false).unwrap(), None);
}

#[test]
fn sum_noise_scales_with_contribution_magnitude() {
    init_test_logging();
    let engine = engine();
    let args = ArgsDescriptor::new(vec![
        ArgSpec::column(ValueType::Int),
        ArgSpec::column(ValueType::Int),
    ]);

    let report_for = |amount: i64| {
        let mut state = engine.create_state(AggKind::SumNoise, &args).unwrap();
        for user in 0..20i64 {
            state
                .transition(&[Some(Value::Int(amount)), Some(Value::Int(user))])
                .unwrap();
        }
        let value = state.finalize(engine.context(), 0, false).unwrap().unwrap();
        match value {
            Value::Real(sd) => sd,
            other => panic!("expected a real noise report, got {other:?}"),
        }
    };

    let small = report_for(10);
    let large = report_for(1000);
    assert!(small > 0.0);
    assert!(
        large > 50.0 * small,
        "noise report did not scale: {small} vs {large}"
    );
    // Reports land on money-rounded steps.
    assert_eq!(small, money_round(small));
    assert_eq!(large, money_round(large));
}

#[test]
fn noise_reports_are_salt_deterministic() {
    init_test_logging();
    let args = ArgsDescriptor::new(vec![ArgSpec::column(ValueType::Int)]);
    let report = |salt: &str| {
        let engine = Engine::new(AnonConfig::with_salt(salt)).unwrap();
        let mut state = engine.create_state(AggKind::CountNoise, &args).unwrap();
        for user in 0..50i64 {
            state.transition(&[Some(Value::Int(user))]).unwrap();
        }
        state.finalize(engine.context(), 0, false).unwrap()
    };
    assert_eq!(report("alpha"), report("alpha"));
}
