//! Named, ordered callback lists with replace/default/append registration.

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use comex_core::Failure;
use serde_json::{Map, Value};

/// Keyword arguments handed to every hook callback.
pub type HookArgs = Map<String, Value>;

/// Result of a single hook callback.
pub type HookResult = Result<Value, Failure>;

/// A hook callback; the first argument is the owning object.
pub type HookFn<O> = Rc<dyn Fn(&mut O, &HookArgs) -> HookResult>;

/// Builds [`HookArgs`] from a JSON object literal. Non-objects give empty args.
pub fn hook_args(value: Value) -> HookArgs {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Registration policy for [`HookRegistry::register`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HookPolicy {
    /// Discard every prior binding for the name.
    pub replace: bool,
    /// Only bind when nothing else is bound for the name.
    pub default: bool,
}

impl HookPolicy {
    /// Add after existing callbacks.
    pub const APPEND: HookPolicy = HookPolicy {
        replace: false,
        default: false,
    };
    /// Drop existing callbacks first.
    pub const REPLACE: HookPolicy = HookPolicy {
        replace: true,
        default: false,
    };
    /// Bind only when nothing is bound yet.
    pub const DEFAULT: HookPolicy = HookPolicy {
        replace: false,
        default: true,
    };
}

/// What [`HookRegistry::register`] did with a callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// Added after existing callbacks.
    Appended,
    /// Existing callbacks were dropped.
    Replaced,
    /// Ignored because the name was already bound.
    Skipped,
}

/// Per-name lists of callbacks owned by `O`.
pub struct HookRegistry<O> {
    hooks: BTreeMap<String, Vec<HookFn<O>>>,
}

impl<O> Default for HookRegistry<O> {
    fn default() -> Self {
        Self {
            hooks: BTreeMap::new(),
        }
    }
}

impl<O> Clone for HookRegistry<O> {
    fn clone(&self) -> Self {
        Self {
            hooks: self.hooks.clone(),
        }
    }
}

impl<O> fmt::Debug for HookRegistry<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: BTreeMap<&str, usize> = self
            .hooks
            .iter()
            .map(|(name, list)| (name.as_str(), list.len()))
            .collect();
        f.debug_struct("HookRegistry").field("hooks", &counts).finish()
    }
}

impl<O> HookRegistry<O> {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `callback` under `name`.
    ///
    /// `default` is checked first: it skips when the name already has
    /// bindings. Otherwise `replace` resets the list to `[callback]` and the
    /// plain policy appends.
    pub fn register(&mut self, name: &str, callback: HookFn<O>, policy: HookPolicy) -> Registration {
        let bound = self.hooks.get(name).is_some_and(|list| !list.is_empty());
        if policy.default && bound {
            return Registration::Skipped;
        }
        if policy.replace {
            self.hooks.insert(name.to_string(), vec![callback]);
            return Registration::Replaced;
        }
        self.hooks.entry(name.to_string()).or_default().push(callback);
        Registration::Appended
    }

    /// Convenience wrapper over [`HookRegistry::register`] for closures.
    pub fn on<F>(&mut self, name: &str, policy: HookPolicy, callback: F) -> Registration
    where
        F: Fn(&mut O, &HookArgs) -> HookResult + 'static,
    {
        self.register(name, Rc::new(callback), policy)
    }

    /// Snapshot of the callbacks bound under `name`, in registration order.
    pub fn callbacks(&self, name: &str) -> Vec<HookFn<O>> {
        self.hooks.get(name).cloned().unwrap_or_default()
    }

    /// Number of callbacks bound to `name`.
    pub fn count(&self, name: &str) -> usize {
        self.hooks.get(name).map_or(0, Vec::len)
    }

    /// Whether any callback is bound to `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.count(name) > 0
    }

    /// Bound names.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.hooks
            .iter()
            .filter(|(_, list)| !list.is_empty())
            .map(|(name, _)| name.as_str())
    }

    /// True when no name is bound.
    pub fn is_empty(&self) -> bool {
        self.names().next().is_none()
    }

    /// Calls every callback bound to `name` and returns the last result.
    ///
    /// Returns `default` untouched when nothing is bound. The first failing
    /// callback stops the chain and its failure propagates.
    pub fn invoke(&self, owner: &mut O, name: &str, default: Value, args: &HookArgs) -> HookResult {
        dispatch(&self.callbacks(name), owner, default, args)
    }

    /// Folds another registry into this one.
    ///
    /// With `replace_behavior` each non-empty incoming list overwrites the
    /// local list; otherwise incoming callbacks are appended after the
    /// existing ones.
    pub fn merge_from(&mut self, other: &HookRegistry<O>, replace_behavior: bool) {
        for (name, incoming) in &other.hooks {
            if incoming.is_empty() {
                continue;
            }
            if replace_behavior {
                self.hooks.insert(name.clone(), incoming.clone());
            } else {
                self.hooks
                    .entry(name.clone())
                    .or_default()
                    .extend(incoming.iter().cloned());
            }
        }
    }

    /// True when both registries hold the very same callback objects per name.
    pub fn shares_callbacks(&self, other: &HookRegistry<O>, name: &str) -> bool {
        let mine = self.callbacks(name);
        let theirs = other.callbacks(name);
        mine.len() == theirs.len()
            && mine
                .iter()
                .zip(theirs.iter())
                .all(|(left, right)| Rc::ptr_eq(left, right))
    }
}

/// Runs `callbacks` in order against `owner`; the last return value wins.
///
/// Used when the registry lives inside the owner and must be snapshotted
/// before the owner can be borrowed mutably.
pub fn dispatch<O>(callbacks: &[HookFn<O>], owner: &mut O, default: Value, args: &HookArgs) -> HookResult {
    let mut result = default;
    for callback in callbacks {
        result = callback(owner, args)?;
    }
    Ok(result)
}
