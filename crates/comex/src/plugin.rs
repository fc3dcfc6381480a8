//! Lifecycle hook points exposed to plugins and the injected plugin manager.

use std::fmt;

use comex_core::{ComexError, ErrorInfo, Failure};
use serde_json::Value;
use tracing::debug;

use crate::experiment::Experiment;
use crate::hooks::{HookArgs, HookPolicy, HookRegistry, HookResult, Registration};

/// Named points in the experiment lifecycle that plugins can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HookPoint {
    /// The experiment was built.
    ExperimentConstructed,
    /// During build, before parameters are discovered.
    BeforeExperimentParameters,
    /// The archive exists; the body runs next.
    AfterExperimentInitialize,
    /// A figure was committed.
    ExperimentCommitFig,
    /// A JSON file was committed.
    ExperimentCommitJson,
    /// A raw file was committed.
    ExperimentCommitRaw,
    /// A value was tracked.
    ExperimentTrack,
    /// Metadata and data are on disk.
    AfterExperimentFinalize,
}

impl HookPoint {
    /// Every hook point, in lifecycle order.
    pub const ALL: [HookPoint; 8] = [
        HookPoint::ExperimentConstructed,
        HookPoint::BeforeExperimentParameters,
        HookPoint::AfterExperimentInitialize,
        HookPoint::ExperimentCommitFig,
        HookPoint::ExperimentCommitJson,
        HookPoint::ExperimentCommitRaw,
        HookPoint::ExperimentTrack,
        HookPoint::AfterExperimentFinalize,
    ];

    /// Name used in hook registries and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            HookPoint::ExperimentConstructed => "experiment_constructed",
            HookPoint::BeforeExperimentParameters => "before_experiment_parameters",
            HookPoint::AfterExperimentInitialize => "after_experiment_initialize",
            HookPoint::ExperimentCommitFig => "experiment_commit_fig",
            HookPoint::ExperimentCommitJson => "experiment_commit_json",
            HookPoint::ExperimentCommitRaw => "experiment_commit_raw",
            HookPoint::ExperimentTrack => "experiment_track",
            HookPoint::AfterExperimentFinalize => "after_experiment_finalize",
        }
    }

    /// Inverse of `as_str`.
    pub fn parse(name: &str) -> Option<HookPoint> {
        HookPoint::ALL.into_iter().find(|point| point.as_str() == name)
    }
}

impl fmt::Display for HookPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registration surface handed to [`Plugin::register`].
pub struct PluginHooks<'a> {
    plugin: &'a str,
    hooks: &'a mut HookRegistry<Experiment>,
}

impl PluginHooks<'_> {
    /// Subscribes `callback` to `point`.
    pub fn on<F>(&mut self, point: HookPoint, callback: F) -> Registration
    where
        F: Fn(&mut Experiment, &HookArgs) -> HookResult + 'static,
    {
        debug!(plugin = self.plugin, point = point.as_str(), "plugin hook registered");
        self.hooks.on(point.as_str(), HookPolicy::APPEND, callback)
    }
}

/// An extension that subscribes callbacks to [`HookPoint`]s.
pub trait Plugin {
    /// Name recorded by the manager.
    fn name(&self) -> &str;

    /// Subscribes the plugin's callbacks.
    fn register(&self, hooks: &mut PluginHooks<'_>);
}

/// Owns the plugin hook registry. Built by the caller and handed to each
/// experiment; nothing is discovered from ambient state.
#[derive(Default)]
pub struct PluginManager {
    hooks: HookRegistry<Experiment>,
    plugins: Vec<String>,
}

impl fmt::Debug for PluginManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginManager")
            .field("plugins", &self.plugins)
            .field("hooks", &self.hooks)
            .finish()
    }
}

impl PluginManager {
    /// Manager without plugins.
    pub fn new() -> Self {
        Self::default()
    }

    /// Lets `plugin` subscribe its callbacks.
    pub fn register(&mut self, plugin: &dyn Plugin) {
        let name = plugin.name().to_string();
        let mut hooks = PluginHooks {
            plugin: &name,
            hooks: &mut self.hooks,
        };
        plugin.register(&mut hooks);
        self.plugins.push(name);
    }

    /// Builder form of `register`.
    pub fn with_plugin(mut self, plugin: &dyn Plugin) -> Self {
        self.register(plugin);
        self
    }

    /// Subscribes a bare callback without a named plugin.
    pub fn on<F>(&mut self, point: HookPoint, callback: F) -> Registration
    where
        F: Fn(&mut Experiment, &HookArgs) -> HookResult + 'static,
    {
        self.hooks.on(point.as_str(), HookPolicy::APPEND, callback)
    }

    /// Registered plugin names, in order.
    pub fn plugin_names(&self) -> &[String] {
        &self.plugins
    }

    /// Whether any callback listens on `point`.
    pub fn is_subscribed(&self, point: HookPoint) -> bool {
        self.hooks.contains(point.as_str())
    }

    /// Fires `point` against `experiment`; a failing callback becomes a plugin error.
    pub fn apply(&self, point: HookPoint, experiment: &mut Experiment, args: &HookArgs) -> Result<Value, ComexError> {
        self.hooks
            .invoke(experiment, point.as_str(), Value::Null, args)
            .map_err(|failure| plugin_error(point, &failure))
    }
}

fn plugin_error(point: HookPoint, failure: &Failure) -> ComexError {
    ComexError::Plugin(
        ErrorInfo::new("plugin.hook_failed", failure.message())
            .with_context("hook", point.as_str())
            .with_context("type", failure.type_name()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hook_point_names_round_trip() {
        for point in HookPoint::ALL {
            assert_eq!(HookPoint::parse(point.as_str()), Some(point));
        }
        assert_eq!(HookPoint::parse("before_experiment_error"), None);
    }
}
