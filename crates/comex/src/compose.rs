//! Module loading and experiment composition: `extend`, `include` and config files.
//!
//! A module is a definition function registered under a path. Loading runs
//! the function afresh every time, so two loads of the same module never
//! share hook lists or parameter stores.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::rc::Rc;

use comex_core::{ComexError, ErrorInfo};
use tracing::debug;

use crate::config::{ExperimentConfig, Settings};
use crate::experiment::{Experiment, ExperimentBuilder};
use crate::mixin::Mixin;
use crate::namespace::Namespace;
use crate::plugin::PluginManager;

/// Function that defines a module's experiment or mixin.
pub type ModuleDefinition = Rc<dyn Fn(&ModuleContext<'_>) -> Result<ModuleExports, ComexError>>;

/// A named item exported by a module.
#[derive(Debug)]
pub enum Export {
    /// An experiment; `extend` picks it up.
    Experiment(Experiment),
    /// A mixin; `include` picks it up.
    Mixin(Mixin),
}

impl From<Experiment> for Export {
    fn from(experiment: Experiment) -> Self {
        Export::Experiment(experiment)
    }
}

impl From<Mixin> for Export {
    fn from(mixin: Mixin) -> Self {
        Export::Mixin(mixin)
    }
}

/// What loading a module produced.
///
/// `experiment` and `mixin` are looked at first; the named items are scanned
/// by type when those are empty.
#[derive(Debug, Default)]
pub struct ModuleExports {
    /// Primary experiment of the module.
    pub experiment: Option<Experiment>,
    /// Primary mixin of the module.
    pub mixin: Option<Mixin>,
    /// Further named exports, scanned in order.
    pub items: Vec<(String, Export)>,
}

impl ModuleExports {
    /// Exports nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Exports `experiment` as the primary experiment.
    pub fn experiment(experiment: Experiment) -> Self {
        Self {
            experiment: Some(experiment),
            ..Self::default()
        }
    }

    /// Exports `mixin` as the primary mixin.
    pub fn mixin(mixin: Mixin) -> Self {
        Self {
            mixin: Some(mixin),
            ..Self::default()
        }
    }

    /// Adds a named export.
    pub fn export(mut self, name: impl Into<String>, item: impl Into<Export>) -> Self {
        self.items.push((name.into(), item.into()));
        self
    }

    /// The primary experiment, else the first exported one.
    pub fn into_experiment(self) -> Option<Experiment> {
        self.experiment.or_else(|| {
            self.items.into_iter().find_map(|(_, item)| match item {
                Export::Experiment(experiment) => Some(experiment),
                Export::Mixin(_) => None,
            })
        })
    }

    /// The primary mixin, else the first exported one.
    pub fn into_mixin(self) -> Option<Mixin> {
        self.mixin.or_else(|| {
            self.items.into_iter().find_map(|(_, item)| match item {
                Export::Mixin(mixin) => Some(mixin),
                Export::Experiment(_) => None,
            })
        })
    }
}

/// Handed to a definition function while its module loads.
pub struct ModuleContext<'a> {
    registry: &'a ModuleRegistry,
    path: PathBuf,
}

impl<'a> ModuleContext<'a> {
    /// Resolved path of the module being loaded.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Registry the module is being loaded from.
    pub fn registry(&self) -> &'a ModuleRegistry {
        self.registry
    }

    /// Shared plugin manager.
    pub fn plugins(&self) -> Rc<PluginManager> {
        Rc::clone(&self.registry.plugins)
    }

    /// Settings applied to experiments built here.
    pub fn settings(&self) -> &Settings {
        &self.registry.settings
    }

    /// Empty namespace whose source is this module.
    pub fn namespace(&self) -> Namespace {
        Namespace::new(self.path.clone())
    }

    /// Experiment builder wired to the registry's plugins and settings.
    pub fn experiment(
        &self,
        base_path: impl Into<PathBuf>,
        namespace: impl Into<String>,
        globals: &Namespace,
    ) -> ExperimentBuilder {
        Experiment::builder(base_path, namespace, globals)
            .plugins(self.plugins())
            .settings(self.registry.settings.clone())
    }

    /// Mixin over `globals`.
    pub fn mixin(&self, globals: &Namespace) -> Mixin {
        Mixin::new(globals)
    }

    /// Extends `parent`, resolved relative to this module.
    pub fn extend(
        &self,
        parent: &str,
        base_path: impl Into<PathBuf>,
        namespace: &str,
        globals: &Namespace,
    ) -> Result<Experiment, ComexError> {
        self.registry.extend(parent, base_path, namespace, globals)
    }
}

/// Composition root: module definitions plus the injected plugins and settings.
pub struct ModuleRegistry {
    modules: BTreeMap<PathBuf, ModuleDefinition>,
    plugins: Rc<PluginManager>,
    settings: Settings,
    loading: RefCell<Vec<PathBuf>>,
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new(Rc::new(PluginManager::new()), Settings::default())
    }
}

impl fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("modules", &self.modules.keys().collect::<Vec<_>>())
            .field("settings", &self.settings)
            .finish()
    }
}

/// Lexically normalizes a path, dropping `.` and folding `..` where possible.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let can_pop = matches!(out.components().next_back(), Some(Component::Normal(_)));
                if can_pop {
                    out.pop();
                } else {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

impl ModuleRegistry {
    /// Empty registry using `plugins` and `settings` for every experiment it builds.
    pub fn new(plugins: Rc<PluginManager>, settings: Settings) -> Self {
        Self {
            modules: BTreeMap::new(),
            plugins,
            settings,
            loading: RefCell::new(Vec::new()),
        }
    }

    /// Plugin manager handed to every experiment.
    pub fn plugins(&self) -> &Rc<PluginManager> {
        &self.plugins
    }

    /// Settings handed to every experiment.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Registers the definition of the module at `path`, replacing any previous one.
    pub fn define<F>(&mut self, path: impl AsRef<Path>, definition: F)
    where
        F: Fn(&ModuleContext<'_>) -> Result<ModuleExports, ComexError> + 'static,
    {
        self.modules
            .insert(normalize_path(path.as_ref()), Rc::new(definition));
    }

    /// Whether a definition is registered for `path`.
    pub fn contains(&self, path: impl AsRef<Path>) -> bool {
        self.modules.contains_key(&normalize_path(path.as_ref()))
    }

    /// Resolves `path` as given, then relative to `caller_dir`.
    pub fn resolve(&self, path: &str, caller_dir: Option<&Path>) -> Result<PathBuf, ComexError> {
        let direct = normalize_path(Path::new(path));
        if self.modules.contains_key(&direct) {
            return Ok(direct);
        }
        if let Some(dir) = caller_dir {
            let relative = normalize_path(&dir.join(path));
            if self.modules.contains_key(&relative) {
                return Ok(relative);
            }
        }
        let mut info = ErrorInfo::new("compose.module_missing", format!("no module registered at '{path}'"))
            .with_context("path", path);
        if let Some(dir) = caller_dir {
            info = info.with_context("caller_dir", dir.display().to_string());
        }
        Err(ComexError::Compose(info.with_hint("define the module on the registry before extending or including it")))
    }

    /// Runs the definition of the module at `path` and returns its exports.
    pub fn load(&self, path: &str, caller_dir: Option<&Path>) -> Result<ModuleExports, ComexError> {
        let resolved = self.resolve(path, caller_dir)?;
        if self.loading.borrow().contains(&resolved) {
            return Err(ComexError::Compose(
                ErrorInfo::new("compose.cycle", "module composition is cyclic")
                    .with_context("path", resolved.display().to_string()),
            ));
        }
        let definition = match self.modules.get(&resolved) {
            Some(definition) => Rc::clone(definition),
            None => return Err(ComexError::Compose(ErrorInfo::new("compose.module_missing", "module vanished"))),
        };
        debug!(module = %resolved.display(), "loading module");
        self.loading.borrow_mut().push(resolved.clone());
        let context = ModuleContext {
            registry: self,
            path: resolved,
        };
        let exports = definition(&context);
        self.loading.borrow_mut().pop();
        exports
    }

    /// Loads a module and returns its experiment without running it.
    pub fn import_experiment(&self, path: &str, caller_dir: Option<&Path>) -> Result<Experiment, ComexError> {
        self.load(path, caller_dir)?.into_experiment().ok_or_else(|| {
            ComexError::Compose(
                ErrorInfo::new("compose.no_experiment", "module does not define an experiment")
                    .with_context("path", path),
            )
        })
    }

    /// Loads a module and returns its mixin.
    pub fn import_mixin(&self, path: &str, caller_dir: Option<&Path>) -> Result<Mixin, ComexError> {
        self.load(path, caller_dir)?.into_mixin().ok_or_else(|| {
            ComexError::Compose(
                ErrorInfo::new("compose.no_mixin", "module does not define a mixin")
                    .with_context("path", path),
            )
        })
    }

    /// Builds a child experiment from a fresh copy of the parent at `parent`.
    ///
    /// The child gets its own coordinates and namespace. Parent bindings fill
    /// in names the child namespace leaves unbound, so child values win. Hooks,
    /// body, testing routine, analyses and mixins carry over, and the parent's
    /// source joins the dependency list.
    pub fn extend(
        &self,
        parent: &str,
        base_path: impl Into<PathBuf>,
        namespace: &str,
        globals: &Namespace,
    ) -> Result<Experiment, ComexError> {
        let caller_dir = globals.source_dir();
        let parent = self.import_experiment(parent, caller_dir.as_deref())?;
        derive_child(parent, base_path.into(), namespace, globals)
    }

    /// Extends the experiment named in a YAML config with its parameters.
    pub fn from_config(&self, config_path: &Path) -> Result<Experiment, ComexError> {
        let config = ExperimentConfig::load(config_path)?;
        let globals = Namespace::new(config_path);
        for (name, value) in &config.parameters {
            globals.set(name.clone(), value.clone());
        }
        globals.set_doc(config.description.clone());
        let mut experiment =
            self.extend(&config.extend, config.base_path(), &config.namespace(), &globals)?;
        for mixin in &config.include {
            experiment.include(self, mixin)?;
        }
        experiment.title = Some(config.name());
        experiment.read_module_metadata();
        Ok(experiment)
    }

    /// Loads the experiment at `path`, marks it as entry point and runs it.
    pub fn run_module(&self, path: &str) -> Result<Experiment, ComexError> {
        let mut experiment = self.import_experiment(path, None)?;
        experiment.globals.set_entry_point(true);
        experiment.run_if_entry_point()?;
        Ok(experiment)
    }
}

fn derive_child(
    parent: Experiment,
    base_path: PathBuf,
    namespace: &str,
    globals: &Namespace,
) -> Result<Experiment, ComexError> {
    let inherited = globals.merge_missing(&parent.globals);
    if globals.doc().is_none() {
        globals.set_doc(parent.globals.doc());
    }
    debug!(
        parent = ?parent.globals.source(),
        namespace,
        inherited = inherited.len(),
        "extending experiment"
    );

    let mut child = Experiment::builder(base_path, namespace, globals)
        .plugins(Rc::clone(&parent.plugins))
        .settings(parent.settings.clone())
        .build()?;

    for (name, value) in parent.parameters.iter() {
        if !child.parameters.contains(name) {
            child.parameters.insert_default(name, value.clone());
        }
    }
    for (name, info) in &parent.metadata.parameters {
        let entry = child
            .metadata
            .parameters
            .entry(name.clone())
            .or_insert_with(|| info.clone());
        if entry.description.is_none() {
            entry.description = info.description.clone();
        }
    }
    for (name, info) in &parent.metadata.hooks {
        let entry = child
            .metadata
            .hooks
            .entry(name.clone())
            .or_insert_with(|| info.clone());
        if entry.description.is_none() {
            entry.description = info.description.clone();
        }
    }

    let mut hooks = parent.hooks.clone();
    hooks.merge_from(&child.hooks, false);
    child.hooks = hooks;
    child.body = parent.body.clone();
    child.testing = parent.testing.clone();
    child.analyses = parent.analyses.clone();
    child.mixins = parent.mixins.clone();
    child.dependencies = parent.dependencies.clone();
    if let Some(source) = parent.globals.source() {
        child.dependencies.push(source);
    }

    // Parent closures keep reading their own module namespace, so it has to
    // see the child's bindings and every later write.
    let upstream: Vec<Namespace> = parent
        .parameters
        .mirrors()
        .iter()
        .cloned()
        .chain(std::iter::once(parent.globals.clone()))
        .collect();
    for namespace in &upstream {
        for (name, value) in globals.snapshot() {
            namespace.set(name, value);
        }
        child.parameters.mirror(namespace);
    }

    child.update_parameters();
    child.read_module_metadata();
    Ok(child)
}

impl Experiment {
    /// See [`ModuleRegistry::extend`].
    pub fn extend(
        registry: &ModuleRegistry,
        parent: &str,
        base_path: impl Into<PathBuf>,
        namespace: &str,
        globals: &Namespace,
    ) -> Result<Experiment, ComexError> {
        registry.extend(parent, base_path, namespace, globals)
    }

    /// See [`ModuleRegistry::import_experiment`]; relative paths resolve against `caller`.
    pub fn import_from(registry: &ModuleRegistry, path: &str, caller: &Namespace) -> Result<Experiment, ComexError> {
        registry.import_experiment(path, caller.source_dir().as_deref())
    }

    /// Loads the mixin at `path` (relative to this experiment's source) and merges it.
    pub fn include(&mut self, registry: &ModuleRegistry, path: &str) -> Result<(), ComexError> {
        let caller_dir = self.globals.source_dir();
        let mixin = registry.import_mixin(path, caller_dir.as_deref())?;
        self.include_mixin(mixin);
        Ok(())
    }

    /// Includes each module of `paths` in order.
    ///
    /// Stops at the first module that fails; earlier ones stay merged.
    pub fn include_all(&mut self, registry: &ModuleRegistry, paths: &[&str]) -> Result<(), ComexError> {
        for path in paths {
            self.include(registry, path)?;
        }
        Ok(())
    }

    /// Appends the mixin's hooks and adds its parameters where the host has none.
    pub fn include_mixin(&mut self, mut mixin: Mixin) {
        mixin.update_parameters();
        self.hooks.merge_from(mixin.hooks(), false);
        let mut added = 0;
        for (name, value) in mixin.parameters().iter() {
            if self.parameters.insert_default(name, value.clone()) {
                added += 1;
            }
        }
        if let Some(source) = mixin.source() {
            self.dependencies.push(source);
        }
        let name = mixin.name();
        debug!(mixin = %name, parameters = added, "mixin included");
        self.mixins.push(name);
        self.update_parameters_special();
        self.read_module_metadata();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_folds_dot_segments() {
        assert_eq!(normalize_path(Path::new("a/./b/../c.rs")), PathBuf::from("a/c.rs"));
        assert_eq!(normalize_path(Path::new("../x.rs")), PathBuf::from("../x.rs"));
        assert_eq!(normalize_path(Path::new("/r/a/../b.rs")), PathBuf::from("/r/b.rs"));
    }

    #[test]
    fn missing_module_is_a_config_class_error() {
        let registry = ModuleRegistry::default();
        let err = registry.load("nowhere.rs", Some(Path::new("/tmp"))).expect_err("missing");
        assert!(err.is_config());
        assert_eq!(err.info().code, "compose.module_missing");
    }

    #[test]
    fn exports_fall_back_to_type_scan() {
        let mixin = Mixin::new(&Namespace::new("m.rs"));
        let exports = ModuleExports::new().export("helper", mixin);
        assert!(exports.into_mixin().is_some());
    }
}
