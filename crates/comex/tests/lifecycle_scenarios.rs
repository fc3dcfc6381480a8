mod common;

use std::cell::RefCell;
use std::rc::Rc;

use comex::{
    digest_bytes, is_archive, ArchivedExperiment, ComexError, Experiment, HookArgs, HookPoint,
    HookPolicy, LifecycleState, Namespace, ParamValue, Plugin, PluginHooks, PluginManager,
    DATA_FILE_NAME, DEPENDENCIES_FILE_NAME, ERROR_FILE_NAME, LOG_FILE_NAME, METADATA_FILE_NAME,
};
use serde_json::{json, Value};
use tempfile::tempdir;

use common::{archive, quiet, read_json, read_text, write_source};

#[derive(Debug, thiserror::Error)]
#[error("boom")]
struct ValueError;

#[test]
fn successful_run_persists_nested_data_and_done_metadata() {
    let root = tempdir().unwrap();
    let globals = Namespace::new(root.path().join("exp.rs"));
    let mut experiment = quiet(root.path(), "ns", &globals).build().unwrap();
    experiment.body(|e| {
        e.set_data("metrics/x", 5)?;
        Ok(())
    });

    experiment.run().unwrap();

    let path = archive(&experiment);
    assert_eq!(path.parent().unwrap(), root.path().join("ns"));
    assert_eq!(read_json(&path.join(DATA_FILE_NAME)), json!({"metrics": {"x": 5}}));
    let metadata = read_json(&path.join(METADATA_FILE_NAME));
    assert_eq!(metadata["status"], "done");
    assert_eq!(metadata["has_error"], false);
    assert_eq!(metadata["error_type"], Value::Null);
    assert!(metadata["duration"].as_f64().unwrap() >= 0.0);
    assert_eq!(metadata["namespace"], "ns");
    assert!(experiment.error().is_none());
    assert_eq!(experiment.state(), LifecycleState::Done);
}

#[test]
fn failing_body_is_captured_and_still_archived() {
    let root = tempdir().unwrap();
    let globals = Namespace::new(root.path().join("exp.rs"));
    let mut experiment = quiet(root.path(), "ns", &globals).build().unwrap();
    experiment.body(|e| {
        e.set_data("partial", json!([1, 2, 3]))?;
        Err(ValueError.into())
    });

    experiment.run().unwrap();

    let failure = experiment.error().expect("failure captured");
    assert!(failure.type_name().contains("ValueError"));
    let path = archive(&experiment);
    let metadata = read_json(&path.join(METADATA_FILE_NAME));
    assert_eq!(metadata["status"], "done");
    assert_eq!(metadata["has_error"], true);
    assert!(metadata["error_type"].as_str().unwrap().contains("ValueError"));
    assert!(read_text(&path.join(ERROR_FILE_NAME)).contains("boom"));
    assert_eq!(read_json(&path.join(DATA_FILE_NAME)), json!({"partial": [1, 2, 3]}));
}

#[test]
fn panicking_body_is_captured() {
    let root = tempdir().unwrap();
    let globals = Namespace::new(root.path().join("exp.rs"));
    let mut experiment = quiet(root.path(), "ns", &globals).build().unwrap();
    experiment.body(|_| panic!("kaboom"));

    experiment.run().unwrap();

    assert_eq!(experiment.error().unwrap().type_name(), "panic");
    let path = archive(&experiment);
    assert!(read_text(&path.join(ERROR_FILE_NAME)).contains("kaboom"));
    assert_eq!(read_json(&path.join(METADATA_FILE_NAME))["has_error"], true);
}

#[test]
fn underscore_keys_stay_in_memory_only() {
    let root = tempdir().unwrap();
    let globals = Namespace::new(root.path().join("exp.rs"));
    let mut experiment = quiet(root.path(), "ns", &globals).build().unwrap();
    experiment.body(|e| {
        e.set_data("_scratch/buffer", json!([0, 0]))?;
        e.set_data("result", "ok")?;
        Ok(())
    });
    experiment.run().unwrap();

    assert!(experiment.get_data("_scratch/buffer").is_ok());
    assert_eq!(
        read_json(&archive(&experiment).join(DATA_FILE_NAME)),
        json!({"result": "ok"})
    );
}

#[test]
fn committed_json_reads_back_exactly() {
    let root = tempdir().unwrap();
    let globals = Namespace::new(root.path().join("exp.rs"));
    let mut experiment = quiet(root.path(), "ns", &globals).build().unwrap();
    experiment.body(|e| {
        e.commit_json("r.json", &json!({"a": 1}))?;
        e.commit_raw("notes.txt", "plain text")?;
        Ok(())
    });
    experiment.run().unwrap();

    let path = archive(&experiment);
    assert_eq!(read_json(&path.join("r.json")), json!({"a": 1}));
    assert_eq!(read_text(&path.join("notes.txt")), "plain text");
}

#[test]
fn tracked_scalars_and_figures_land_in_data_and_track_folder() {
    let root = tempdir().unwrap();
    let globals = Namespace::new(root.path().join("exp.rs"));
    let mut experiment = quiet(root.path(), "ns", &globals).build().unwrap();
    experiment.body(|e| {
        e.track("loss", 0.5)?;
        e.track("loss", 0.25)?;
        let svg = String::from("<svg xmlns=\"http://www.w3.org/2000/svg\"/>");
        e.track("plot", &svg)?;
        e.track_many(vec![("accuracy".to_string(), 0.75)])?;
        Ok(())
    });
    experiment.run().unwrap();

    let path = archive(&experiment);
    let data = read_json(&path.join(DATA_FILE_NAME));
    assert_eq!(data["loss"], json!([0.5, 0.25]));
    assert_eq!(data["plot"], json!([".track/plot_001.png"]));
    assert_eq!(data["accuracy"], json!([0.75]));
    assert!(path.join(".track").join("plot_001.png").is_file());
    let metadata = read_json(&path.join(METADATA_FILE_NAME));
    assert_eq!(metadata["__track__"], json!(["loss", "plot", "accuracy"]));
}

#[test]
fn run_hooks_wrap_the_body_in_order() {
    let root = tempdir().unwrap();
    let globals = Namespace::new(root.path().join("exp.rs"));
    let mut experiment = quiet(root.path(), "ns", &globals).build().unwrap();
    experiment.hook("before_run", HookPolicy::APPEND, |e, _| {
        e.data_mut().append("order", "before")?;
        Ok(Value::Null)
    });
    experiment.hook("after_run", HookPolicy::APPEND, |e, _| {
        e.data_mut().append("order", "after")?;
        Ok(Value::Null)
    });
    experiment.body(|e| {
        e.data_mut().append("order", "body")?;
        Ok(())
    });
    experiment.run().unwrap();

    assert_eq!(experiment.get_data("order").unwrap(), &json!(["before", "body", "after"]));
}

#[test]
fn failing_hook_propagates_like_a_body_failure() {
    let root = tempdir().unwrap();
    let globals = Namespace::new(root.path().join("exp.rs"));
    let mut experiment = quiet(root.path(), "ns", &globals).build().unwrap();
    experiment.hook("before_run", HookPolicy::APPEND, |_, _| Err(ValueError.into()));
    experiment.body(|e| {
        e.set_data("reached", true)?;
        Ok(())
    });
    experiment.run().unwrap();

    assert!(experiment.error().is_some());
    assert!(experiment.get_data("reached").is_err());
}

#[test]
fn body_can_dispatch_custom_hooks_with_arguments() {
    let root = tempdir().unwrap();
    let globals = Namespace::new(root.path().join("exp.rs"));
    let mut experiment = quiet(root.path(), "ns", &globals).build().unwrap();
    experiment.hook("filter_words", HookPolicy::APPEND, |_, args| {
        Ok(json!(args["words"].as_array().map_or(0, Vec::len)))
    });
    experiment.body(|e| {
        let args = comex::hook_args(json!({ "words": ["a", "b", "c"] }));
        let count = e.apply_hook("filter_words", json!(0), &args)?;
        let fallback = e.apply_hook("unbound", json!("default"), &HookArgs::new())?;
        e.set_data("count", count)?;
        e.set_data("fallback", fallback)?;
        Ok(())
    });
    experiment.run().unwrap();

    assert_eq!(experiment.get_data("count").unwrap(), &json!(3));
    assert_eq!(experiment.get_data("fallback").unwrap(), &json!("default"));
}

#[test]
fn an_experiment_runs_only_once() {
    let root = tempdir().unwrap();
    let globals = Namespace::new(root.path().join("exp.rs"));
    let mut experiment = quiet(root.path(), "ns", &globals).build().unwrap();
    experiment.body(|_| Ok(()));
    experiment.run().unwrap();

    let err = experiment.run().unwrap_err();
    assert!(matches!(err, ComexError::Config(_)));
    assert_eq!(err.info().code, "experiment.already_run");
}

#[test]
fn missing_base_path_fails_before_any_archive_exists() {
    let root = tempdir().unwrap();
    let base = root.path().join("missing");
    let globals = Namespace::new(root.path().join("exp.rs"));
    let mut experiment = quiet(&base, "ns", &globals).build().unwrap();
    experiment.body(|_| Ok(()));

    let err = experiment.run().unwrap_err();
    assert!(err.is_config());
    assert!(experiment.path().is_none());
    assert!(!base.exists());
}

#[test]
fn entry_point_guard_decides_whether_to_run() {
    let root = tempdir().unwrap();

    let imported = Namespace::new(root.path().join("lib_exp.rs"));
    let mut skipped = quiet(root.path(), "ns", &imported).build().unwrap();
    skipped.body(|_| Ok(()));
    assert!(!skipped.run_if_entry_point().unwrap());
    assert!(skipped.path().is_none());

    let main = Namespace::new(root.path().join("main_exp.rs")).entry_point();
    let mut ran = quiet(root.path(), "ns", &main).build().unwrap();
    ran.body(|_| Ok(()));
    assert!(ran.run_if_entry_point().unwrap());
    assert!(ran.path().is_some());
}

#[test]
fn testing_mode_runs_the_testing_routine_once_before_the_body() {
    let root = tempdir().unwrap();
    let globals = Namespace::new(root.path().join("exp.rs"))
        .with("__TESTING__", true)
        .with("NUM_EPOCHS", 100);
    let mut experiment = quiet(root.path(), "ns", &globals).build().unwrap();
    experiment.hook("before_testing", HookPolicy::APPEND, |e, _| {
        e.data_mut().append("order", "before_testing")?;
        Ok(Value::Null)
    });
    experiment
        .testing(|e| {
            e.set_param("NUM_EPOCHS", 1)?;
            e.data_mut().append("order", "testing")?;
            Ok(())
        })
        .unwrap();
    experiment.body(|e| {
        let epochs: i64 = e.param_as("NUM_EPOCHS")?;
        e.set_data("epochs", epochs)?;
        e.apply_testing_if_possible()?;
        Ok(())
    });
    experiment.run().unwrap();

    assert!(experiment.is_testing());
    assert_eq!(experiment.get_data("epochs").unwrap(), &json!(1));
    assert_eq!(
        experiment.get_data("order").unwrap(),
        &json!(["before_testing", "testing"])
    );
}

#[test]
fn testing_routine_is_ignored_outside_testing_mode() {
    let root = tempdir().unwrap();
    let globals = Namespace::new(root.path().join("exp.rs")).with("NUM_EPOCHS", 100);
    let mut experiment = quiet(root.path(), "ns", &globals).build().unwrap();
    experiment
        .testing(|e| {
            e.set_param("NUM_EPOCHS", 1)?;
            Ok(())
        })
        .unwrap();
    experiment.body(|_| Ok(()));
    experiment.run().unwrap();

    assert!(!experiment.is_testing());
    assert_eq!(experiment.param("NUM_EPOCHS").unwrap().as_i64(), Some(100));
}

#[test]
fn analyses_run_after_finalize() {
    let root = tempdir().unwrap();
    let globals = Namespace::new(root.path().join("exp.rs"));
    let mut experiment = quiet(root.path(), "ns", &globals).build().unwrap();
    let observed = Rc::new(RefCell::new(None));
    let sink = Rc::clone(&observed);
    experiment.body(|_| Ok(()));
    experiment.analysis(move |e| {
        *sink.borrow_mut() = Some(e.state());
        e.commit_raw("analysis.txt", "summary")?;
        Ok(())
    });
    experiment.run().unwrap();

    assert_eq!(*observed.borrow(), Some(LifecycleState::Done));
    assert!(archive(&experiment).join("analysis.txt").is_file());
}

struct Recorder {
    seen: Rc<RefCell<Vec<&'static str>>>,
}

impl Plugin for Recorder {
    fn name(&self) -> &str {
        "recorder"
    }

    fn register(&self, hooks: &mut PluginHooks<'_>) {
        for point in HookPoint::ALL {
            let seen = Rc::clone(&self.seen);
            hooks.on(point, move |_, _| {
                seen.borrow_mut().push(point.as_str());
                Ok(Value::Null)
            });
        }
    }
}

#[test]
fn plugin_hook_points_fire_across_the_lifecycle() {
    let root = tempdir().unwrap();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let plugins = PluginManager::new().with_plugin(&Recorder {
        seen: Rc::clone(&seen),
    });
    assert_eq!(plugins.plugin_names(), ["recorder".to_string()]);

    let globals = Namespace::new(root.path().join("exp.rs"));
    let mut experiment = quiet(root.path(), "ns", &globals)
        .plugins(Rc::new(plugins))
        .build()
        .unwrap();
    experiment.body(|e| {
        e.commit_raw("a.txt", "a")?;
        e.commit_json("b.json", &json!([1]))?;
        e.commit_fig("c.svg", &String::from("<svg/>"))?;
        e.track("loss", 1.0)?;
        Ok(())
    });
    experiment.run().unwrap();

    assert_eq!(
        *seen.borrow(),
        vec![
            "before_experiment_parameters",
            "experiment_constructed",
            "after_experiment_initialize",
            "experiment_commit_raw",
            "experiment_commit_json",
            "experiment_commit_fig",
            "experiment_track",
            "after_experiment_finalize",
        ]
    );
}

#[test]
fn failing_construction_plugin_is_a_plugin_error() {
    let mut plugins = PluginManager::new();
    plugins.on(HookPoint::ExperimentConstructed, |_, _| {
        Err(comex::Failure::msg("refused"))
    });
    let globals = Namespace::new("exp.rs");
    let err = Experiment::builder("/tmp", "ns", &globals)
        .plugins(Rc::new(plugins))
        .build()
        .unwrap_err();
    assert!(matches!(err, ComexError::Plugin(_)));
    assert_eq!(err.info().context["hook"], "experiment_constructed");
}

#[test]
fn source_is_snapshotted_and_digested_in_reproducible_mode() {
    let root = tempdir().unwrap();
    let contents = "// :param SEED:\n//     Random seed.\nconst SEED: u64 = 1;\n";
    let source = write_source(root.path(), "train.rs", contents);
    let globals = Namespace::new(&source)
        .with("SEED", 1)
        .with("__REPRODUCIBLE__", true);
    let mut experiment = quiet(root.path(), "results/train", &globals).build().unwrap();
    experiment.body(|_| Ok(()));
    experiment.run().unwrap();

    let path = archive(&experiment);
    assert_eq!(read_text(&path.join("experiment_code.rs")), contents);
    let snapshot = read_json(&path.join(DEPENDENCIES_FILE_NAME));
    assert_eq!(snapshot["sources"][0]["archive_name"], "experiment_code.rs");
    assert_eq!(snapshot["sources"][0]["sha256"], digest_bytes(contents.as_bytes()));

    let metadata = read_json(&path.join(METADATA_FILE_NAME));
    assert_eq!(metadata["name"], "train");
    assert_eq!(metadata["parameters"]["SEED"]["description"], "Random seed.");
}

#[test]
fn run_log_is_written_into_the_archive() {
    let root = tempdir().unwrap();
    let globals = Namespace::new(root.path().join("exp.rs"));
    let mut experiment = quiet(root.path(), "ns", &globals).build().unwrap();
    experiment.body(|e| {
        e.log("hello from the body");
        Ok(())
    });
    experiment.run().unwrap();

    let log = read_text(&archive(&experiment).join(LOG_FILE_NAME));
    assert!(log.contains("hello from the body"), "{log}");
}

#[test]
fn finished_archive_loads_back() {
    #[derive(Debug)]
    struct Handle;

    let root = tempdir().unwrap();
    let globals = Namespace::new(root.path().join("exp.rs"))
        .with("RATE", 0.5)
        .with("HANDLE", ParamValue::opaque(Handle));
    let mut experiment = quiet(root.path(), "ns", &globals).build().unwrap();
    experiment.body(|e| {
        e.set_data("score", 0.9)?;
        Ok(())
    });
    experiment.run().unwrap();

    let path = archive(&experiment);
    assert!(is_archive(&path));
    let loaded = ArchivedExperiment::load(&path.join(METADATA_FILE_NAME)).unwrap();
    assert_eq!(loaded.path, path);
    assert_eq!(loaded.parameters["RATE"], json!(0.5));
    assert!(!loaded.parameters.contains_key("HANDLE"));
    assert_eq!(loaded.data.get("score").unwrap(), &json!(0.9));
    assert!(!loaded.has_error());
}
