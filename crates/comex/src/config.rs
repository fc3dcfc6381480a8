//! YAML settings and experiment config files.

use std::fs;
use std::path::{Path, PathBuf};

use comex_core::{ComexError, ErrorInfo};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::archive::DEFAULT_NAME_FORMAT;
use crate::serde::from_yaml_slice;

/// Engine-wide knobs shared by every experiment of a process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Template for generated archive names (`{date}`, `{time}`, `{id}`).
    #[serde(default = "default_name_format")]
    pub name_format: String,
    /// `EnvFilter` directives for run logs; `COMEX_LOG` takes precedence.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    /// Mirror run logs on stdout.
    #[serde(default = "default_console")]
    pub console: bool,
    /// Length of the random id in generated archive names.
    #[serde(default = "default_id_length")]
    pub id_length: usize,
}

fn default_name_format() -> String {
    DEFAULT_NAME_FORMAT.to_string()
}

fn default_log_filter() -> String {
    "info".to_string()
}

fn default_console() -> bool {
    true
}

fn default_id_length() -> usize {
    4
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            name_format: default_name_format(),
            log_filter: default_log_filter(),
            console: default_console(),
            id_length: default_id_length(),
        }
    }
}

impl Settings {
    /// Reads settings from a YAML file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self, ComexError> {
        let bytes = read_config(path)?;
        from_yaml_slice(&bytes).map_err(|err| with_path(err, path))
    }

    /// Settings without console mirroring, convenient for tests and batch runs.
    pub fn quiet() -> Self {
        Self {
            console: false,
            ..Self::default()
        }
    }
}

/// A YAML file that runs an existing experiment with different parameters.
///
/// ```yaml
/// extend: base_experiment.rs
/// parameters:
///   NUM_EPOCHS: 10
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    /// Module to extend, resolved relative to the config file.
    pub extend: String,
    /// Parameter overrides.
    pub parameters: Map<String, Value>,
    /// Mixin modules merged after extending.
    #[serde(default)]
    pub include: Vec<String>,
    /// Experiment name; defaults to the file stem.
    #[serde(default)]
    pub name: Option<String>,
    /// Defaults to the config's folder.
    #[serde(default)]
    pub base_path: Option<PathBuf>,
    /// Defaults to `results/{stem}`.
    #[serde(default)]
    pub namespace: Option<String>,
    /// Replaces the parent's description when set.
    #[serde(default)]
    pub description: Option<String>,
    /// File the config was read from; drives the defaults above.
    #[serde(skip)]
    pub path: PathBuf,
}

impl ExperimentConfig {
    /// Reads a config and fills `name`, `base_path` and `namespace` from its location.
    pub fn load(path: &Path) -> Result<Self, ComexError> {
        let bytes = read_config(path)?;
        let mut config: ExperimentConfig =
            from_yaml_slice(&bytes).map_err(|err| with_path(err, path))?;
        config.path = path.to_path_buf();
        if config.name.is_none() {
            config.name = Some(file_stem(path));
        }
        if config.base_path.is_none() {
            config.base_path = Some(folder_path(path));
        }
        if config.namespace.is_none() {
            config.namespace = Some(file_namespace(path, "results"));
        }
        Ok(config)
    }

    /// Configured name or the file stem.
    pub fn name(&self) -> String {
        self.name.clone().unwrap_or_else(|| file_stem(&self.path))
    }

    /// Configured base path or the config's folder.
    pub fn base_path(&self) -> PathBuf {
        self.base_path
            .clone()
            .unwrap_or_else(|| folder_path(&self.path))
    }

    /// Configured namespace or `results/{stem}`.
    pub fn namespace(&self) -> String {
        self.namespace
            .clone()
            .unwrap_or_else(|| file_namespace(&self.path, "results"))
    }
}

fn read_config(path: &Path) -> Result<Vec<u8>, ComexError> {
    fs::read(path).map_err(|err| {
        ComexError::Config(
            ErrorInfo::new("config.read", err.to_string())
                .with_context("path", path.display().to_string()),
        )
    })
}

fn with_path(err: ComexError, path: &Path) -> ComexError {
    let info = err.info().clone().with_context("path", path.display().to_string());
    ComexError::Config(info)
}

fn file_stem(path: &Path) -> String {
    path.file_name()
        .and_then(|name| name.to_str())
        .and_then(|name| name.split('.').next())
        .unwrap_or_default()
        .to_string()
}

/// Directory that contains `file`.
pub fn folder_path(file: &Path) -> PathBuf {
    file.parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Archive namespace derived from a file name: `{prefix}/{stem}`.
pub fn file_namespace(file: &Path, prefix: &str) -> String {
    let stem = file_stem(file);
    if prefix.is_empty() {
        stem
    } else {
        format!("{prefix}/{stem}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn helpers_derive_location_defaults() {
        let file = Path::new("/work/experiments/train_model.rs");
        assert_eq!(folder_path(file), PathBuf::from("/work/experiments"));
        assert_eq!(file_namespace(file, "results"), "results/train_model");
        assert_eq!(file_namespace(file, ""), "train_model");
    }

    #[test]
    fn empty_settings_document_uses_defaults() {
        let settings: Settings = from_yaml_slice(b"{}").expect("parse");
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.name_format, "{date}__{time}__{id}");
    }
}
