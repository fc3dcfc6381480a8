use std::collections::BTreeMap;

use comex::{is_parameter_name, ComexError, Experiment, Namespace, ParameterStore};
use proptest::prelude::*;

fn name_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        "[A-Z][A-Z0-9_]{0,8}",
        "[a-z][a-z0-9_]{0,8}",
        "[A-Z][a-z][A-Za-z]{0,6}",
        "__[A-Z]{1,6}__",
    ]
}

proptest! {
    #[test]
    fn discovery_keeps_exactly_upper_case_names(
        entries in proptest::collection::btree_map(name_strategy(), any::<i64>(), 0..16)
    ) {
        let namespace = Namespace::new("exp.rs");
        for (name, value) in &entries {
            namespace.set(name.clone(), *value);
        }
        let mut store = ParameterStore::new();
        store.discover(&namespace);

        let expected: Vec<&String> = entries
            .keys()
            .filter(|name| name.chars().any(char::is_uppercase) && !name.chars().any(char::is_lowercase))
            .collect();
        let found: Vec<&str> = store.names().collect();
        prop_assert_eq!(found.len(), expected.len());
        for name in expected {
            prop_assert!(store.contains(name));
            prop_assert_eq!(store.get(name).unwrap().as_i64(), Some(entries[name]));
        }
    }

    #[test]
    fn rediscovery_merges_and_never_clears(
        first in proptest::collection::btree_map("[A-Z]{1,5}", any::<i32>(), 1..8),
        second in proptest::collection::btree_map("[A-Z]{1,5}", any::<i32>(), 0..8),
    ) {
        let namespace = Namespace::new("exp.rs");
        for (name, value) in &first {
            namespace.set(name.clone(), *value);
        }
        let mut store = ParameterStore::bound(&namespace);
        for name in first.keys() {
            namespace.remove(name);
        }
        for (name, value) in &second {
            namespace.set(name.clone(), *value);
        }
        store.update();

        let mut merged: BTreeMap<String, i32> = first.clone();
        merged.extend(second.clone());
        prop_assert_eq!(store.len(), merged.len());
        for (name, value) in merged {
            prop_assert_eq!(store.get(&name).unwrap().as_i64(), Some(i64::from(value)));
        }
    }
}

#[test]
fn special_names_count_as_parameters() {
    for name in ["__DEBUG__", "__TESTING__", "__REPRODUCIBLE__", "__CACHING__", "__PREFIX__"] {
        assert!(is_parameter_name(name));
    }
}

#[test]
fn experiment_parameters_write_through_to_namespace() {
    let globals = Namespace::new("exp.rs").with("LEARNING_RATE", 0.1).with("helper", 3);
    let mut experiment = Experiment::new("/tmp", "results/exp", &globals).unwrap();

    assert!(experiment.parameters().contains("LEARNING_RATE"));
    assert!(!experiment.parameters().contains("helper"));

    experiment.set_param("LEARNING_RATE", 0.5).unwrap();
    assert_eq!(globals.get("LEARNING_RATE").unwrap().as_f64(), Some(0.5));
    assert_eq!(experiment.param_as::<f64>("LEARNING_RATE").unwrap(), 0.5);
    assert_eq!(
        experiment.metadata().parameters["LEARNING_RATE"].value,
        Some(serde_json::json!(0.5))
    );
}

#[test]
fn unknown_and_non_parameter_lookups_fail_differently() {
    let globals = Namespace::new("exp.rs").with("helper", 3);
    let experiment = Experiment::new("/tmp", "results/exp", &globals).unwrap();

    assert!(matches!(experiment.param("NOT_THERE"), Err(ComexError::Parameter(_))));
    assert!(matches!(experiment.param("helper"), Err(ComexError::Attribute(_))));
}

#[test]
fn opaque_parameters_export_as_unusable_strings() {
    #[derive(Debug)]
    struct Model {
        layers: usize,
    }

    let globals = Namespace::new("exp.rs").with("MODEL", comex::ParamValue::opaque(Model { layers: 3 }));
    let experiment = Experiment::new("/tmp", "results/exp", &globals).unwrap();
    let (exported, usable) = experiment.param("MODEL").unwrap().export();
    assert!(!usable);
    assert_eq!(exported, serde_json::json!("<Model { layers: 3 }>"));
}
