#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use comex::{Experiment, ExperimentBuilder, Namespace, Settings};
use serde_json::Value;

pub fn quiet(base_path: &Path, namespace: &str, globals: &Namespace) -> ExperimentBuilder {
    Experiment::builder(base_path, namespace, globals).settings(Settings::quiet())
}

pub fn write_source(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, contents).unwrap();
    path
}

pub fn read_json(path: &Path) -> Value {
    serde_json::from_slice(&fs::read(path).unwrap()).unwrap()
}

pub fn read_text(path: &Path) -> String {
    fs::read_to_string(path).unwrap()
}

pub fn archive(experiment: &Experiment) -> PathBuf {
    experiment.path().expect("experiment has an archive").to_path_buf()
}
