mod common;

use std::collections::{BTreeSet, HashSet};

use common::*;
use proptest::prelude::*;
use serde_json::{json, Value};

use replaygen::domain::models::{AssertionKind, Literal, MethodId, ObservedValue};
use replaygen::services::reconstruction_analyzer::ValueStrategy;
use replaygen::services::TestAssembler;

fn sum_document(calls: &[(i64, i64)]) -> replaygen::adapters::TraceDocument {
    let mut events = Vec::new();
    for (call, (a, b)) in (1u64..).zip(calls) {
        events.push(start(call, 1, None, vec![int(*a), int(*b)]));
        events.push(end(call, None, Some(int(a + b))));
    }
    document(
        json!([{ "name": "com.acme.MathUtil" }]),
        json!([method(1, "com.acme.MathUtil", "add", "static", &["int", "int"], "int")]),
        json!([]),
        events,
    )
}

/// Nested `Object[]` chain whose innermost array points back at the root.
fn cyclic_chain(depth: u64, tail: i64) -> ObservedValue {
    let mut current = ObservedValue::Sequence {
        ty: "java.lang.Object[]".to_string(),
        identity: Some(depth),
        components: vec![ObservedValue::BackRef { identity: 1 }, ObservedValue::int(tail)],
    };
    for identity in (1..depth).rev() {
        current = ObservedValue::Sequence {
            ty: "java.lang.Object[]".to_string(),
            identity: Some(identity),
            components: vec![current],
        };
    }
    current
}

fn shared_values_document(array: &[i64], a: i64, b: i64, same_box: bool) -> replaygen::adapters::TraceDocument {
    let ints: Vec<Value> = array.iter().map(|v| int(*v)).collect();
    let array_value = json!({ "kind": "sequence", "type": "int[]", "identity": 50, "components": ints });
    let first = object("com.acme.Box", 60, "box=1");
    let second = if same_box { first.clone() } else { object("com.acme.Box", 61, "box=2") };
    document(
        json!([{ "name": "com.acme.Mixer" }, { "name": "com.acme.Box" }]),
        json!([method(
            1,
            "com.acme.Mixer",
            "mix",
            "static",
            &["int[]", "int", "int", "com.acme.Box", "com.acme.Box"],
            "int"
        )]),
        json!([]),
        vec![
            start(1, 1, None, vec![array_value, int(a), int(b), first, second]),
            end(1, None, Some(int(a))),
        ],
    )
}

/// Each step builds a `Point` (object identity varies, snapshot depends on
/// `x` only) and passes it to the static `Geometry.norm`.
fn point_document(calls: &[(u64, i64)]) -> replaygen::adapters::TraceDocument {
    let mut events = Vec::new();
    for (step, (identity, x)) in (0u64..).zip(calls) {
        let point = object("com.acme.Point", *identity, &format!("x={x};y=2"));
        events.push(start(step * 2, 2, None, vec![]));
        events.push(end(step * 2, Some(point.clone()), None));
        events.push(start(step * 2 + 1, 1, None, vec![point]));
        events.push(end(step * 2 + 1, None, Some(int(*x))));
    }
    document(
        json!([{ "name": "com.acme.Geometry" }, { "name": "com.acme.Point" }]),
        json!([
            method(1, "com.acme.Geometry", "norm", "static", &["com.acme.Point"], "int"),
            method(2, "com.acme.Point", "<init>", "constructor", &[], "void"),
        ]),
        json!([]),
        events,
    )
}

proptest! {
    /// Recording the same call with the same outcome any number of times
    /// leaves one execution per distinct call.
    #[test]
    fn prop_duplicate_calls_collapse(calls in prop::collection::vec((0i64..4, 0i64..4), 1..24)) {
        let loaded = load(&sum_document(&calls));
        let distinct: HashSet<(i64, i64)> = calls.iter().copied().collect();
        prop_assert_eq!(loaded.summary.executions, distinct.len());
        prop_assert_eq!(loaded.summary.incomplete, 0);
        for execution in loaded.trace.executions() {
            prop_assert!(loaded.trace.find_equivalent(execution.id).unwrap().is_none());
        }
    }

    /// Objects compare by snapshot: calls that differ only in which
    /// equal-state instance they received are the same call, and repeated
    /// construction of equal instances is deterministic and replayable.
    #[test]
    fn prop_equal_snapshots_collapse(calls in prop::collection::vec((1u64..5, 0i64..3), 1..12)) {
        let loaded = load(&point_document(&calls));
        let distinct: HashSet<i64> = calls.iter().map(|(_, x)| *x).collect();
        prop_assert_eq!(loaded.summary.executions, 2 * distinct.len());

        let mut analyzer = analyzer(&loaded);
        let mut trace = loaded.trace;
        let constructors: Vec<_> = trace
            .executions()
            .filter(|e| e.method == MethodId(2))
            .map(|e| e.id)
            .collect();
        for constructor in constructors {
            prop_assert!(!trace.has_divergent_outcomes(constructor).unwrap());
        }

        let target = execution_of(&trace, 1);
        let point = trace.execution(target).unwrap().params[0];
        let plan = analyzer.analyze(&mut trace, target).unwrap().unwrap();
        prop_assert!(
            matches!(plan.strategy(point), Some(ValueStrategy::Replay { .. })),
            "point should be rebuilt by its constructor, got {:?}",
            plan.strategy(point)
        );
    }

    /// Analysis of self-referencing containers terminates and keeps the
    /// back reference as a container.
    #[test]
    fn prop_cyclic_parameters_terminate(depth in 1u64..7, tail in -5i64..5) {
        let chain = serde_json::to_value(cyclic_chain(depth, tail)).unwrap();
        let doc = document(
            json!([{ "name": "com.acme.Walker" }]),
            json!([method(1, "com.acme.Walker", "take", "static", &["java.lang.Object[]"], "int")]),
            json!([]),
            vec![start(1, 1, None, vec![chain]), end(1, None, Some(int(tail)))],
        );
        let loaded = load(&doc);
        let mut analyzer = analyzer(&loaded);
        let catalog = loaded.catalog.clone();
        let mut trace = loaded.trace;
        let target = execution_of(&trace, 1);

        let plan = analyzer.analyze(&mut trace, target).unwrap().unwrap();
        prop_assert_eq!(plan.assertion, Some(AssertionKind::Value));
        prop_assert!(plan.mocks().is_empty());

        let case = TestAssembler::new(catalog, 0.0).assemble(&trace, &plan, 0).unwrap();
        prop_assert!(case.declaration_counts().values().all(|count| *count == 1));
    }

    /// Every value is declared once, and a value is either a test double or
    /// built concretely, never both.
    #[test]
    fn prop_values_materialize_once(
        array in prop::collection::vec(0i64..3, 0..6),
        a in 0i64..3,
        b in 0i64..3,
        same_box in any::<bool>(),
    ) {
        let loaded = load(&shared_values_document(&array, a, b, same_box));
        let mut analyzer = analyzer(&loaded);
        let catalog = loaded.catalog.clone();
        let mut trace = loaded.trace;
        let target = execution_of(&trace, 1);

        let plan = analyzer.analyze(&mut trace, target).unwrap().unwrap();
        let case = TestAssembler::new(catalog, 0.0).assemble(&trace, &plan, 0).unwrap();

        let counts = case.declaration_counts();
        prop_assert!(counts.values().all(|count| *count == 1), "counts: {:?}", counts);

        let mocked: BTreeSet<_> = case.mocked_values().into_iter().collect();
        prop_assert_eq!(&mocked, &plan.mocks());
        prop_assert_eq!(mocked.len(), if same_box { 1 } else { 2 });
        for value in &mocked {
            prop_assert!(trace.value(*value).unwrap().kind.is_composite());
        }
    }
}

#[test]
fn test_float_literals_collapse_bitwise() {
    let double = |v: f64| {
        json!({ "kind": "primitive", "type": "double", "value": { "float": v } })
    };
    let doc = document(
        json!([{ "name": "com.acme.Scale" }]),
        json!([method(1, "com.acme.Scale", "half", "static", &["double"], "double")]),
        json!([]),
        vec![
            start(1, 1, None, vec![double(0.0)]),
            end(1, None, Some(double(0.0))),
            start(2, 1, None, vec![double(-0.0)]),
            end(2, None, Some(double(-0.0))),
        ],
    );
    let loaded = load(&doc);
    // 0.0 and -0.0 are different inputs.
    assert_eq!(loaded.summary.executions, 2);
    assert_ne!(Literal::Float(0.0), Literal::Float(-0.0));
}
