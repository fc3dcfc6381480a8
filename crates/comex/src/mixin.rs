//! Reusable bundles of hooks and default parameters.

use std::path::PathBuf;

use crate::experiment::Experiment;
use crate::hooks::{HookArgs, HookPolicy, HookRegistry, HookResult, Registration};
use crate::namespace::Namespace;
use crate::parameters::ParameterStore;

/// Hooks and parameter defaults merged into experiments by `include`.
///
/// A mixin has no archive and never runs on its own.
#[derive(Debug, Clone)]
pub struct Mixin {
    globals: Namespace,
    parameters: ParameterStore,
    hooks: HookRegistry<Experiment>,
}

impl Mixin {
    /// Mixin whose parameters come from `globals`.
    pub fn new(globals: &Namespace) -> Self {
        Self {
            globals: globals.clone(),
            parameters: ParameterStore::bound(globals),
            hooks: HookRegistry::new(),
        }
    }

    /// Registers a hook. Mixins append by default; pass another policy to change that.
    pub fn hook<F>(&mut self, name: &str, policy: HookPolicy, callback: F) -> Registration
    where
        F: Fn(&mut Experiment, &HookArgs) -> HookResult + 'static,
    {
        self.hooks.on(name, policy, callback)
    }

    /// Picks up parameters bound in the namespace after construction.
    pub fn update_parameters(&mut self) {
        self.parameters.update();
    }

    /// Parameters discovered so far.
    pub fn parameters(&self) -> &ParameterStore {
        &self.parameters
    }

    /// Registered hooks.
    pub fn hooks(&self) -> &HookRegistry<Experiment> {
        &self.hooks
    }

    /// Namespace the mixin was defined in.
    pub fn globals(&self) -> &Namespace {
        &self.globals
    }

    /// Source file of the defining module.
    pub fn source(&self) -> Option<PathBuf> {
        self.globals.source()
    }

    /// File stem of the defining source, or `mixin` when there is none.
    pub fn name(&self) -> String {
        self.globals
            .source()
            .as_deref()
            .and_then(|path| path.file_stem())
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "mixin".to_string())
    }
}
