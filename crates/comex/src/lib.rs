//! Experiment bookkeeping: parameter discovery, hook composition and
//! versioned run archives.

#![deny(missing_docs)]

mod archive;
mod artifact;
mod compose;
mod config;
mod datastore;
mod experiment;
mod hooks;
mod logging;
mod metadata;
mod mixin;
mod namespace;
mod parameters;
mod plugin;
mod reader;
mod reproducible;
mod serde;

pub use archive::{
    append_text, namespace_segments, validate_base_path, write_atomic, ArchiveNamer,
    CODE_FILE_STEM, DATA_FILE_NAME, DEBUG_NAME, DEFAULT_NAME_FORMAT, ERROR_FILE_NAME,
    LOG_FILE_NAME, METADATA_FILE_NAME, TRACK_DIR_NAME,
};
pub use artifact::{Figure, Tracked};
pub use compose::{normalize_path, Export, ModuleContext, ModuleDefinition, ModuleExports, ModuleRegistry};
pub use config::{file_namespace, folder_path, ExperimentConfig, Settings};
pub use datastore::DataStore;
pub use experiment::{Experiment, ExperimentBuilder, LifecycleState, Routine};
pub use hooks::{dispatch, hook_args, HookArgs, HookFn, HookPolicy, HookRegistry, HookResult, Registration};
pub use logging::{init_logging, LogSession, EXPERIMENT_TARGET, LOG_ENV};
pub use metadata::{
    comment_text, parse_tagged_info, short_description, ExperimentMetadata, HookInfo,
    ParameterInfo, RunStatus, SpecialParameter, SPECIAL_PARAMETERS,
};
pub use mixin::Mixin;
pub use namespace::Namespace;
pub use parameters::{is_parameter_name, is_special_name, ParameterStore};
pub use plugin::{HookPoint, Plugin, PluginHooks, PluginManager};
pub use reader::{is_archive, load_metadata, ArchivedExperiment};
pub use reproducible::{digest_bytes, snapshot_sources, DependencySnapshot, SourceDigest, DEPENDENCIES_FILE_NAME};
pub use crate::serde::{from_json_slice, from_yaml_slice, to_canonical_json_bytes, to_pretty_json_bytes};

pub use comex_core::{ComexError, ErrorInfo, Failure, Opaque, ParamValue, RunResult};
