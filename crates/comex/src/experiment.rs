//! The experiment record and its run lifecycle.

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use chrono::Utc;
use comex_core::{archive_io, ComexError, ErrorInfo, Failure, ParamValue, RunResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::archive::{
    append_text, write_atomic, ArchiveNamer, CODE_FILE_STEM, DATA_FILE_NAME, ERROR_FILE_NAME,
    LOG_FILE_NAME, METADATA_FILE_NAME, TRACK_DIR_NAME,
};
use crate::artifact::{Figure, Tracked};
use crate::config::Settings;
use crate::datastore::DataStore;
use crate::hooks::{dispatch, hook_args, HookArgs, HookPolicy, HookRegistry, HookResult, Registration};
use crate::logging::{LogSession, EXPERIMENT_TARGET};
use crate::metadata::{
    comment_text, parse_tagged_info, short_description, special_defaults, ExperimentMetadata,
    RunStatus, SHORT_DESCRIPTION_WIDTH,
};
use crate::namespace::Namespace;
use crate::parameters::{is_special_name, ParameterStore};
use crate::plugin::{HookPoint, PluginManager};
use crate::reproducible::{snapshot_sources, DEPENDENCIES_FILE_NAME};
use crate::serde::to_pretty_json_bytes;

/// Body, testing routine or analysis run against an experiment.
pub type Routine = Rc<dyn Fn(&mut Experiment) -> RunResult>;

/// Where an experiment is in its lifecycle.
///
/// A failed run still ends in `Done`; the failure is a flag on the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Built, not yet run.
    Constructed,
    /// Parameters resolved and the archive being created.
    Initializing,
    /// The body is executing.
    Running,
    /// Writing metadata, data and snapshots.
    Finalizing,
    /// Finished, with or without a failure.
    Done,
}

/// Builder for [`Experiment`].
pub struct ExperimentBuilder {
    base_path: PathBuf,
    namespace: String,
    globals: Namespace,
    debug: Option<bool>,
    name: Option<String>,
    plugins: Rc<PluginManager>,
    settings: Settings,
}

impl ExperimentBuilder {
    /// Forces debug mode on or off regardless of `__DEBUG__` in the namespace.
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = Some(debug);
        self
    }

    /// Fixed archive folder name instead of the generated one.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Plugin manager fired at every hook point.
    pub fn plugins(mut self, plugins: Rc<PluginManager>) -> Self {
        self.plugins = plugins;
        self
    }

    /// Naming, logging and console options.
    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    /// Discovers parameters and fires the construction hook points. No I/O.
    pub fn build(self) -> Result<Experiment, ComexError> {
        let metadata = ExperimentMetadata::new(
            self.base_path.display().to_string(),
            self.namespace.clone(),
        );
        let mut parameters = ParameterStore::new();
        for (name, value) in special_defaults() {
            parameters.insert_default(name, value);
        }
        parameters.rebind(&self.globals);

        let mut experiment = Experiment {
            base_path: self.base_path,
            namespace: self.namespace,
            archive_name: self.name,
            title: None,
            globals: self.globals,
            parameters,
            hooks: HookRegistry::new(),
            data: DataStore::new(),
            metadata,
            dependencies: Vec::new(),
            mixins: Vec::new(),
            body: None,
            testing: None,
            analyses: Vec::new(),
            plugins: self.plugins,
            settings: self.settings,
            debug: false,
            caching: true,
            state: LifecycleState::Constructed,
            testing_applied: false,
            path: None,
            error: None,
            log_session: None,
        };

        experiment.fire_lifecycle(HookPoint::BeforeExperimentParameters)?;
        experiment.update_parameters();
        if let Some(debug) = self.debug {
            experiment.set_param("__DEBUG__", debug)?;
        }
        experiment.read_module_metadata();
        experiment.fire_lifecycle(HookPoint::ExperimentConstructed)?;
        debug!(
            namespace = %experiment.namespace,
            parameters = experiment.parameters.len(),
            "experiment constructed"
        );
        Ok(experiment)
    }
}

/// One experiment: parameters, hooks, data and the archive of a single run.
pub struct Experiment {
    pub(crate) base_path: PathBuf,
    pub(crate) namespace: String,
    pub(crate) archive_name: Option<String>,
    pub(crate) title: Option<String>,
    pub(crate) globals: Namespace,
    pub(crate) parameters: ParameterStore,
    pub(crate) hooks: HookRegistry<Experiment>,
    pub(crate) data: DataStore,
    pub(crate) metadata: ExperimentMetadata,
    pub(crate) dependencies: Vec<PathBuf>,
    pub(crate) mixins: Vec<String>,
    pub(crate) body: Option<Routine>,
    pub(crate) testing: Option<Routine>,
    pub(crate) analyses: Vec<Routine>,
    pub(crate) plugins: Rc<PluginManager>,
    pub(crate) settings: Settings,
    debug: bool,
    caching: bool,
    state: LifecycleState,
    testing_applied: bool,
    path: Option<PathBuf>,
    error: Option<Failure>,
    log_session: Option<LogSession>,
}

impl std::fmt::Debug for Experiment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Experiment")
            .field("base_path", &self.base_path)
            .field("namespace", &self.namespace)
            .field("state", &self.state)
            .field("path", &self.path)
            .field("parameters", &self.parameters)
            .field("hooks", &self.hooks)
            .field("error", &self.error)
            .finish()
    }
}

fn unix_now() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

impl Experiment {
    /// Starts building an experiment archived under `base_path/namespace`.
    ///
    /// Parameters are discovered from `globals`, which stays shared with the
    /// caller; `set_param` writes back into it.
    pub fn builder(
        base_path: impl Into<PathBuf>,
        namespace: impl Into<String>,
        globals: &Namespace,
    ) -> ExperimentBuilder {
        ExperimentBuilder {
            base_path: base_path.into(),
            namespace: namespace.into(),
            globals: globals.clone(),
            debug: None,
            name: None,
            plugins: Rc::new(PluginManager::new()),
            settings: Settings::default(),
        }
    }

    /// Builds an experiment with default settings and no plugins.
    pub fn new(
        base_path: impl Into<PathBuf>,
        namespace: impl Into<String>,
        globals: &Namespace,
    ) -> Result<Self, ComexError> {
        Self::builder(base_path, namespace, globals).build()
    }

    // ~ inspection

    /// Folder that archives are created under.
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Slash separated path below the base path.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Module namespace the parameters are bound to.
    pub fn globals(&self) -> &Namespace {
        &self.globals
    }

    /// Discovered parameters.
    pub fn parameters(&self) -> &ParameterStore {
        &self.parameters
    }

    /// Hooks, parent and mixin callbacks included.
    pub fn hooks(&self) -> &HookRegistry<Experiment> {
        &self.hooks
    }

    /// Data recorded so far.
    pub fn data(&self) -> &DataStore {
        &self.data
    }

    /// Metadata written at initialize and finalize.
    pub fn metadata(&self) -> &ExperimentMetadata {
        &self.metadata
    }

    /// Sources of extended parents and included mixins, most distant ancestor first.
    pub fn dependencies(&self) -> &[PathBuf] {
        &self.dependencies
    }

    /// File stems of the dependency chain.
    pub fn dependency_names(&self) -> Vec<String> {
        self.dependencies
            .iter()
            .filter_map(|path| path.file_stem())
            .map(|stem| stem.to_string_lossy().into_owned())
            .collect()
    }

    /// Names of included mixins, in include order.
    pub fn mixins(&self) -> &[String] {
        &self.mixins
    }

    /// Settings in effect.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Plugin manager in effect.
    pub fn plugins(&self) -> &Rc<PluginManager> {
        &self.plugins
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// True while the body executes.
    pub fn is_running(&self) -> bool {
        self.state == LifecycleState::Running
    }

    /// True when testing overrides were applied.
    pub fn is_testing(&self) -> bool {
        self.testing_applied
    }

    /// True when runs write to the shared debug folder.
    pub fn is_debug(&self) -> bool {
        self.debug
    }

    /// Mirrors `__CACHING__` for the external cache.
    pub fn caching_enabled(&self) -> bool {
        self.caching
    }

    /// Archive folder; `None` until the run has been initialized.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Failure captured from the body, if any.
    pub fn error(&self) -> Option<&Failure> {
        self.error.as_ref()
    }

    /// Archive folder, or an `Archive` error before initialize.
    pub fn archive_path(&self) -> Result<&Path, ComexError> {
        self.path.as_deref().ok_or_else(|| {
            ComexError::Archive(
                ErrorInfo::new("archive.no_path", "experiment has no archive folder yet")
                    .with_context("namespace", self.namespace.clone())
                    .with_hint("archive files are only available once the run is initialized"),
            )
        })
    }

    // ~ parameters

    /// Looks up a parameter. Unknown names are a `Parameter` error.
    pub fn param(&self, name: &str) -> Result<&ParamValue, ComexError> {
        self.parameters.get(name)
    }

    /// Deserializes a JSON parameter into `T`.
    pub fn param_as<T: DeserializeOwned>(&self, name: &str) -> Result<T, ComexError> {
        let value = self.parameters.get(name)?;
        let json = value.as_json().ok_or_else(|| {
            ComexError::Parameter(
                ErrorInfo::new("parameters.opaque", "parameter holds an opaque value")
                    .with_context("name", name),
            )
        })?;
        serde_json::from_value(json.clone()).map_err(|err| {
            ComexError::Parameter(
                ErrorInfo::new("parameters.type_mismatch", err.to_string()).with_context("name", name),
            )
        })
    }

    /// Sets a parameter, writing through to the namespace and metadata.
    pub fn set_param(&mut self, name: &str, value: impl Into<ParamValue>) -> Result<(), ComexError> {
        let value = value.into();
        self.parameters.set(name, value.clone())?;
        let info = self.metadata.parameters.entry(name.to_string()).or_default();
        info.name.get_or_insert_with(|| name.to_string());
        info.kind.get_or_insert_with(|| value.type_label());
        let (exported, usable) = value.export();
        info.value = Some(exported);
        info.usable = Some(usable);
        if is_special_name(name) {
            self.update_parameters_special();
        }
        Ok(())
    }

    /// Re-discovers parameters from the namespace and re-applies special flags.
    pub fn update_parameters(&mut self) {
        self.parameters.update();
        self.update_parameters_special();
    }

    pub(crate) fn update_parameters_special(&mut self) {
        if let Some(value) = self.parameters.try_get("__DEBUG__") {
            self.debug = value.is_truthy();
        }
        if let Some(value) = self.parameters.try_get("__CACHING__") {
            self.caching = value.is_truthy();
        }
    }

    fn flag(&self, name: &str) -> bool {
        self.parameters
            .try_get(name)
            .is_some_and(ParamValue::is_truthy)
    }

    /// Refreshes name, description and parameter/hook metadata.
    ///
    /// Descriptions come from `:param NAME:` and `:hook NAME:` comment blocks
    /// of every dependency source and of the defining source, in that order.
    pub fn read_module_metadata(&mut self) {
        if let Some(title) = &self.title {
            self.metadata.name = title.clone();
        } else if let Some(stem) = self
            .globals
            .source()
            .as_deref()
            .and_then(Path::file_name)
            .and_then(|name| name.to_str())
            .and_then(|name| name.split('.').next())
        {
            self.metadata.name = stem.to_string();
        }

        let doc = self.globals.doc().unwrap_or_default();
        self.metadata.description = doc.trim_start_matches([' ', '\n']).to_string();
        self.metadata.short_description = short_description(&doc, SHORT_DESCRIPTION_WIDTH);

        for (name, value) in self.parameters.iter() {
            let info = self.metadata.parameters.entry(name.to_string()).or_default();
            info.name.get_or_insert_with(|| name.to_string());
            info.kind.get_or_insert_with(|| value.type_label());
        }

        let mut sources = self.dependencies.clone();
        sources.extend(self.globals.source());
        for source in sources {
            let Ok(text) = fs::read_to_string(&source) else {
                continue;
            };
            let comments = comment_text(&text);
            for (name, description) in parse_tagged_info(&comments, "param") {
                if let Some(info) = self.metadata.parameters.get_mut(&name) {
                    if self.parameters.contains(&name) {
                        info.description = Some(description);
                    }
                }
            }
            for (name, description) in parse_tagged_info(&comments, "hook") {
                let info = self.metadata.hooks.entry(name.clone()).or_default();
                info.name = name;
                info.description = Some(description);
            }
        }

        let counts: Vec<(String, usize)> = self
            .hooks
            .names()
            .map(|name| (name.to_string(), self.hooks.count(name)))
            .collect();
        for (name, count) in counts {
            let info = self.metadata.hooks.entry(name.clone()).or_default();
            info.name = name;
            info.num = Some(count);
        }
        self.metadata.dependencies = self
            .dependencies
            .iter()
            .map(|path| path.display().to_string())
            .collect();
        self.metadata.mixins = self.mixins.clone();
    }

    // ~ hooks

    /// Registers a hook callback under `name`.
    pub fn hook<F>(&mut self, name: &str, policy: HookPolicy, callback: F) -> Registration
    where
        F: Fn(&mut Experiment, &HookArgs) -> HookResult + 'static,
    {
        let outcome = self.hooks.on(name, policy, callback);
        let info = self.metadata.hooks.entry(name.to_string()).or_default();
        info.name = name.to_string();
        info.num = Some(self.hooks.count(name));
        outcome
    }

    /// Runs every callback bound to `name`; the last return value wins.
    pub fn apply_hook(&mut self, name: &str, default: Value, args: &HookArgs) -> HookResult {
        let callbacks = self.hooks.callbacks(name);
        dispatch(&callbacks, self, default, args)
    }

    fn fire(&mut self, point: HookPoint, args: &HookArgs) -> Result<Value, ComexError> {
        let plugins = Rc::clone(&self.plugins);
        plugins.apply(point, self, args)
    }

    fn fire_lifecycle(&mut self, point: HookPoint) -> Result<Value, ComexError> {
        self.fire(point, &HookArgs::new())
    }

    // ~ routines

    /// Sets the experiment body.
    pub fn body<F>(&mut self, body: F)
    where
        F: Fn(&mut Experiment) -> RunResult + 'static,
    {
        self.body = Some(Rc::new(body));
    }

    /// Registers the testing routine, replacing any previous one.
    ///
    /// When called from a running body with `__TESTING__` set, the routine
    /// runs immediately.
    pub fn testing<F>(&mut self, routine: F) -> RunResult
    where
        F: Fn(&mut Experiment) -> RunResult + 'static,
    {
        self.testing = Some(Rc::new(routine));
        self.apply_testing_if_possible()
    }

    /// Runs the testing routine once, and only while running in testing mode.
    pub fn apply_testing_if_possible(&mut self) -> RunResult {
        if !self.flag("__TESTING__") || !self.is_running() || self.testing_applied {
            return Ok(());
        }
        let Some(routine) = self.testing.clone() else {
            return Ok(());
        };
        self.apply_hook("before_testing", Value::Null, &HookArgs::new())?;
        routine(self)?;
        self.testing_applied = true;
        info!(target: EXPERIMENT_TARGET, "testing mode applied");
        Ok(())
    }

    /// Adds a routine that runs after the experiment has been finalized.
    pub fn analysis<F>(&mut self, routine: F)
    where
        F: Fn(&mut Experiment) -> RunResult + 'static,
    {
        self.analyses.push(Rc::new(routine));
    }

    // ~ data

    /// Stores `value` under the slash separated `key`.
    pub fn set_data(&mut self, key: &str, value: impl Into<Value>) -> Result<(), ComexError> {
        self.data.set(key, value)
    }

    /// Reads the value under `key`.
    pub fn get_data(&self, key: &str) -> Result<&Value, ComexError> {
        self.data.get(key)
    }

    /// Direct access to the data store.
    pub fn data_mut(&mut self) -> &mut DataStore {
        &mut self.data
    }

    // ~ logging

    /// Logs one line to the run log.
    pub fn log(&self, message: impl AsRef<str>) {
        info!(target: EXPERIMENT_TARGET, "{}", message.as_ref());
    }

    /// Logs each line in turn.
    pub fn log_lines<I, S>(&self, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for line in lines {
            self.log(line);
        }
    }

    /// Logs the current value of every parameter, or only of `names`.
    pub fn log_parameters(&self, names: Option<&[&str]>) {
        for (name, value) in self.parameters.iter() {
            if names.is_some_and(|names| !names.contains(&name)) {
                continue;
            }
            let (exported, _) = value.export();
            self.log(format!(" * {name}: {exported}"));
        }
    }

    // ~ lifecycle

    /// Runs the experiment only when its namespace is the program entry point.
    pub fn run_if_entry_point(&mut self) -> Result<bool, ComexError> {
        if !self.globals.is_entry_point() {
            debug!(namespace = %self.namespace, "not the entry point, skipping run");
            return Ok(false);
        }
        self.run()?;
        Ok(true)
    }

    /// Drives the full lifecycle.
    ///
    /// Failures of the body and its hooks (including panics) are captured onto
    /// the record and the run still finalizes; only configuration and archive
    /// errors are returned.
    pub fn run(&mut self) -> Result<(), ComexError> {
        if self.state != LifecycleState::Constructed {
            return Err(ComexError::Config(
                ErrorInfo::new("experiment.already_run", "an experiment runs at most once")
                    .with_context("namespace", self.namespace.clone()),
            ));
        }
        let body = self.body.clone().ok_or_else(|| {
            ComexError::Config(
                ErrorInfo::new("experiment.no_body", "experiment has no body to run")
                    .with_context("namespace", self.namespace.clone()),
            )
        })?;

        self.initialize()?;
        let initialized = self.fire_lifecycle(HookPoint::AfterExperimentInitialize);
        if initialized.is_ok() {
            self.execute(&body);
        }
        self.finalize()?;
        initialized?;
        self.fire_lifecycle(HookPoint::AfterExperimentFinalize)?;
        self.execute_analyses();
        Ok(())
    }

    fn execute(&mut self, body: &Routine) {
        self.state = LifecycleState::Running;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| -> RunResult {
            self.apply_testing_if_possible()?;
            self.apply_hook("before_run", Value::Null, &HookArgs::new())?;
            body(self)?;
            self.apply_hook("after_run", Value::Null, &HookArgs::new())?;
            Ok(())
        }));
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(failure)) => self.record_failure(failure),
            Err(payload) => self.record_failure(Failure::from_panic(payload)),
        }
    }

    fn record_failure(&mut self, failure: Failure) {
        error!(
            target: EXPERIMENT_TARGET,
            error_type = failure.type_name(),
            "experiment failed: {}",
            failure.message()
        );
        self.metadata.has_error = true;
        self.metadata.error_type = Some(failure.type_name().to_string());
        self.metadata.error_message = Some(failure.message().to_string());
        self.error = Some(failure);
    }

    /// Creates the archive folder, attaches the run log and writes the first metadata.
    pub fn initialize(&mut self) -> Result<(), ComexError> {
        if self.path.is_some() {
            return Err(ComexError::Config(
                ErrorInfo::new("experiment.already_initialized", "archive path is assigned once per run")
                    .with_context("namespace", self.namespace.clone()),
            ));
        }
        self.state = LifecycleState::Initializing;

        let mut namer = ArchiveNamer::new(&self.settings.name_format, self.settings.id_length);
        if let Some(prefix) = self.parameters.try_get("__PREFIX__").and_then(ParamValue::as_str) {
            namer = namer.with_prefix(prefix);
        }
        if let Some(name) = &self.archive_name {
            namer = namer.with_name(name.clone());
        }
        let path = namer.resolve(&self.base_path, &self.namespace, self.debug)?;
        self.path = Some(path.clone());

        self.log_session = Some(LogSession::open(&path.join(LOG_FILE_NAME), &self.settings)?);
        let track = path.join(TRACK_DIR_NAME);
        fs::create_dir(&track).map_err(|err| archive_io("archive.create_track", &track, err))?;

        self.save_dependencies()?;
        self.save_code()?;

        self.metadata.status = Some(RunStatus::Running);
        self.metadata.start_time = Some(unix_now());
        self.metadata.duration = Some(0.0);
        self.read_module_metadata();
        self.save_metadata()?;

        self.log(format!("starting experiment {}", self.metadata.name));
        self.log(format!("archive: {}", path.display()));
        self.log_parameters(None);
        Ok(())
    }

    /// Persists final metadata and data, and the traceback of a captured failure.
    pub fn finalize(&mut self) -> Result<(), ComexError> {
        self.state = LifecycleState::Finalizing;
        let end_time = unix_now();
        let start_time = self.metadata.start_time.unwrap_or(end_time);
        self.metadata.end_time = Some(end_time);
        self.metadata.duration = Some(end_time - start_time);
        self.metadata.status = Some(RunStatus::Done);

        self.save_metadata()?;
        self.save_data()?;

        if let Some(failure) = &self.error {
            let traceback = failure.traceback();
            let error_path = self.archive_path()?.join(ERROR_FILE_NAME);
            append_text(&error_path, &traceback)?;
            for line in traceback.lines() {
                error!(target: EXPERIMENT_TARGET, "{line}");
            }
        }
        self.log(format!(
            "experiment {} ended after {:.1}s{}",
            self.metadata.name,
            end_time - start_time,
            if self.error.is_some() { " with an error" } else { "" }
        ));

        if self.flag("__REPRODUCIBLE__") {
            self.finalize_reproducible()?;
        }
        self.log_session = None;
        self.state = LifecycleState::Done;
        Ok(())
    }

    fn finalize_reproducible(&mut self) -> Result<(), ComexError> {
        self.log("packaging for reproducibility");
        let sources = self.snapshot_sources();
        let snapshot = snapshot_sources(self.archive_path()?, &sources)?;
        self.commit_json(DEPENDENCIES_FILE_NAME, &snapshot)
    }

    fn execute_analyses(&mut self) {
        for analysis in self.analyses.clone() {
            if let Err(failure) = analysis(self) {
                error!(
                    target: EXPERIMENT_TARGET,
                    error_type = failure.type_name(),
                    "analysis failed: {}",
                    failure.message()
                );
                if let Some(path) = &self.path {
                    if let Err(err) = append_text(&path.join(ERROR_FILE_NAME), &failure.traceback()) {
                        warn!(error = %err, "could not record analysis failure");
                    }
                }
            }
        }
    }

    // ~ archive files

    /// `(archive file name, original path)` of every source copied into the archive.
    fn snapshot_sources(&self) -> Vec<(String, PathBuf)> {
        let mut sources = self.archived_dependencies();
        if let Some(source) = self.globals.source().filter(|source| source.is_file()) {
            sources.push((code_file_name(&source), source));
        }
        sources
    }

    /// Existing dependency files with the name each copy gets in the archive.
    ///
    /// The first file keeps its own name; later files with a name already in
    /// use get a numeric suffix (`shared.rs`, `shared_1.rs`, ...).
    fn archived_dependencies(&self) -> Vec<(String, PathBuf)> {
        let mut taken: BTreeSet<String> = self
            .globals
            .source()
            .map(|source| code_file_name(&source))
            .into_iter()
            .collect();
        let mut archived: Vec<(String, PathBuf)> = Vec::new();
        for dependency in &self.dependencies {
            if !dependency.is_file() || archived.iter().any(|(_, path)| path == dependency) {
                continue;
            }
            let Some(file_name) = dependency.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            let name = unused_name(file_name, &taken);
            taken.insert(name.clone());
            archived.push((name, dependency.clone()));
        }
        archived
    }

    fn save_code(&self) -> Result<(), ComexError> {
        let Some(source) = self.globals.source() else {
            warn!(namespace = %self.namespace, "experiment has no source file to snapshot");
            return Ok(());
        };
        if !source.is_file() {
            warn!(source = %source.display(), "source file missing, snapshot skipped");
            return Ok(());
        }
        let destination = self.archive_path()?.join(code_file_name(&source));
        fs::copy(&source, &destination)
            .map_err(|err| archive_io("archive.save_code", &destination, err))?;
        Ok(())
    }

    fn save_dependencies(&mut self) -> Result<(), ComexError> {
        for dependency in self.dependencies.iter().filter(|dependency| !dependency.is_file()) {
            warn!(dependency = %dependency.display(), "dependency source missing, snapshot skipped");
        }
        let archive = self.archive_path()?.to_path_buf();
        let archived = self.archived_dependencies();
        for (name, dependency) in &archived {
            let destination = archive.join(name);
            fs::copy(dependency, &destination)
                .map_err(|err| archive_io("archive.save_dependency", &destination, err))?;
        }
        self.metadata.sources = archived
            .into_iter()
            .map(|(name, dependency)| (name, dependency.display().to_string()))
            .collect();
        Ok(())
    }

    /// Writes `experiment_meta.json` with current parameter values.
    pub fn save_metadata(&mut self) -> Result<(), ComexError> {
        self.metadata.record_values(self.parameters.iter());
        let bytes = to_pretty_json_bytes(&self.metadata)?;
        write_atomic(&self.archive_path()?.join(METADATA_FILE_NAME), &bytes)
    }

    /// Writes `experiment_data.json`; keys starting with `_` are left out.
    pub fn save_data(&self) -> Result<(), ComexError> {
        let bytes = to_pretty_json_bytes(&self.data.persisted())?;
        write_atomic(&self.archive_path()?.join(DATA_FILE_NAME), &bytes)
    }

    /// Opens (truncating) a file inside the archive folder.
    pub fn open(&self, file_name: &str) -> Result<File, ComexError> {
        let path = self.archive_path()?.join(file_name);
        File::create(&path).map_err(|err| archive_io("archive.open", &path, err))
    }

    /// Writes `content` to `file_name` inside the archive.
    pub fn commit_raw(&mut self, file_name: &str, content: &str) -> Result<(), ComexError> {
        let path = self.archive_path()?.join(file_name);
        fs::write(&path, content).map_err(|err| archive_io("archive.commit_raw", &path, err))?;
        self.fire(
            HookPoint::ExperimentCommitRaw,
            &hook_args(json!({ "name": file_name, "content": content })),
        )?;
        Ok(())
    }

    /// Writes `data` as indented JSON inside the archive.
    pub fn commit_json<T: Serialize + ?Sized>(&mut self, file_name: &str, data: &T) -> Result<(), ComexError> {
        let path = self.archive_path()?.join(file_name);
        let value = serde_json::to_value(data).map_err(|err| {
            ComexError::Serde(
                ErrorInfo::new("json.serialize", err.to_string())
                    .with_context("path", path.display().to_string()),
            )
        })?;
        let bytes = to_pretty_json_bytes(&value)?;
        fs::write(&path, &bytes).map_err(|err| archive_io("archive.commit_json", &path, err))?;
        self.fire(
            HookPoint::ExperimentCommitJson,
            &hook_args(json!({ "name": file_name, "data": value })),
        )?;
        Ok(())
    }

    /// Writes an encoded figure inside the archive.
    pub fn commit_fig(&mut self, file_name: &str, figure: &dyn Figure) -> Result<(), ComexError> {
        let path = self.archive_path()?.join(file_name);
        let bytes = figure.encode()?;
        fs::write(&path, bytes).map_err(|err| archive_io("archive.commit_fig", &path, err))?;
        self.fire(
            HookPoint::ExperimentCommitFig,
            &hook_args(json!({ "name": file_name, "figure": figure.describe() })),
        )?;
        Ok(())
    }

    /// Appends a scalar or figure to the tracked series `name`.
    ///
    /// Figures are stored as `.track/{name}_{index:03}.png` and the relative
    /// path is appended instead of the value.
    pub fn track<'a>(&mut self, name: &str, value: impl Into<Tracked<'a>>) -> Result<(), ComexError> {
        let value = value.into();
        if self.data.try_get(name).is_none() {
            self.data.set(name, Value::Array(Vec::new()))?;
            self.metadata.tracked.push(name.to_string());
        }
        match &value {
            Tracked::Scalar(scalar) => {
                self.data.append(name, *scalar)?;
            }
            Tracked::Figure(figure) => {
                let index = match self.data.try_get(name) {
                    Some(Value::Array(items)) => items.len() + 1,
                    _ => 1,
                };
                let relative = format!("{TRACK_DIR_NAME}/{name}_{index:03}.png");
                let path = self.archive_path()?.join(&relative);
                fs::write(&path, figure.encode()?)
                    .map_err(|err| archive_io("archive.track", &path, err))?;
                self.data.append(name, relative)?;
            }
        }
        self.fire(
            HookPoint::ExperimentTrack,
            &hook_args(json!({ "name": name, "value": value.describe() })),
        )?;
        Ok(())
    }

    /// Tracks several scalars at once.
    pub fn track_many<I>(&mut self, values: I) -> Result<(), ComexError>
    where
        I: IntoIterator<Item = (String, f64)>,
    {
        for (name, value) in values {
            self.track(&name, value)?;
        }
        Ok(())
    }
}

/// `file_name`, or the first `{stem}_{n}{.ext}` not in `taken`.
fn unused_name(file_name: &str, taken: &BTreeSet<String>) -> String {
    if !taken.contains(file_name) {
        return file_name.to_string();
    }
    let (stem, extension) = match file_name.rsplit_once('.') {
        Some((stem, extension)) if !stem.is_empty() => (stem, format!(".{extension}")),
        _ => (file_name, String::new()),
    };
    let mut index = 1;
    loop {
        let candidate = format!("{stem}_{index}{extension}");
        if !taken.contains(&candidate) {
            return candidate;
        }
        index += 1;
    }
}

fn code_file_name(source: &Path) -> String {
    match source.extension().and_then(|ext| ext.to_str()) {
        Some(ext) => format!("{CODE_FILE_STEM}.{ext}"),
        None => CODE_FILE_STEM.to_string(),
    }
}
