//! Discovery and write-through storage of experiment parameters.

use std::collections::BTreeMap;

use comex_core::{ComexError, ErrorInfo, ParamValue};

use crate::namespace::Namespace;

/// Returns true when `name` is parameter-shaped: it contains at least one
/// cased character and every cased character is upper case.
///
/// Dunder names such as `__DEBUG__` qualify; `lower`, `Mixed` and `_` do not.
pub fn is_parameter_name(name: &str) -> bool {
    let mut cased = false;
    for ch in name.chars() {
        if ch.is_lowercase() {
            return false;
        }
        if ch.is_uppercase() {
            cased = true;
        }
    }
    cased
}

/// Returns true for the double-underscore wrapped special parameters.
pub fn is_special_name(name: &str) -> bool {
    name.len() > 4 && name.starts_with("__") && name.ends_with("__") && is_parameter_name(name)
}

/// Current values of every discovered parameter.
///
/// The store keeps a handle on the namespace it discovered from so that
/// [`ParameterStore::set`] writes through to the module-level binding.
/// Mirrors are further namespaces that receive every write as well; an
/// extended experiment mirrors the namespaces of its parents.
#[derive(Debug, Clone, Default)]
pub struct ParameterStore {
    values: BTreeMap<String, ParamValue>,
    namespace: Option<Namespace>,
    mirrors: Vec<Namespace>,
}

impl ParameterStore {
    /// Store without a namespace; writes stay local.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store bound to `namespace` and discovers its parameters.
    pub fn bound(namespace: &Namespace) -> Self {
        let mut store = Self {
            values: BTreeMap::new(),
            namespace: Some(namespace.clone()),
            mirrors: Vec::new(),
        };
        store.discover(namespace);
        store
    }

    /// Records every parameter-shaped binding of `namespace`.
    ///
    /// Existing values absent from the namespace are kept.
    pub fn discover(&mut self, namespace: &Namespace) -> Vec<String> {
        let mut found = Vec::new();
        for (name, value) in namespace.snapshot() {
            if is_parameter_name(&name) {
                self.values.insert(name.clone(), value);
                found.push(name);
            }
        }
        found
    }

    /// Re-scans the retained namespace. A merge, never a reset.
    pub fn update(&mut self) -> Vec<String> {
        match self.namespace.clone() {
            Some(namespace) => self.discover(&namespace),
            None => Vec::new(),
        }
    }

    /// Namespace that writes go to, if any.
    pub fn namespace(&self) -> Option<&Namespace> {
        self.namespace.as_ref()
    }

    /// Rebinds the store to another namespace without touching current values.
    pub fn rebind(&mut self, namespace: &Namespace) {
        self.namespace = Some(namespace.clone());
    }

    /// Copies every current value into `namespace` and keeps writing to it.
    ///
    /// The retained namespace and namespaces that are already mirrored are
    /// ignored.
    pub fn mirror(&mut self, namespace: &Namespace) {
        if self
            .namespace
            .iter()
            .chain(&self.mirrors)
            .any(|bound| bound.ptr_eq(namespace))
        {
            return;
        }
        for (name, value) in &self.values {
            namespace.set(name.clone(), value.clone());
        }
        self.mirrors.push(namespace.clone());
    }

    /// Namespaces receiving writes besides the retained one.
    pub fn mirrors(&self) -> &[Namespace] {
        &self.mirrors
    }

    /// Value of `name`, or a `Parameter` error naming the known parameters.
    pub fn get(&self, name: &str) -> Result<&ParamValue, ComexError> {
        if !is_parameter_name(name) {
            return Err(ComexError::Attribute(
                ErrorInfo::new(
                    "parameters.not_a_parameter",
                    format!("'{name}' is not a parameter name"),
                )
                .with_context("name", name)
                .with_hint("parameter names are upper case"),
            ));
        }
        self.values.get(name).ok_or_else(|| {
            ComexError::Parameter(
                ErrorInfo::new(
                    "parameters.missing",
                    format!("no parameter named '{name}'"),
                )
                .with_context("name", name),
            )
        })
    }

    /// Value of `name`, if discovered.
    pub fn try_get(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(name)
    }

    /// Whether `name` was discovered.
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Sets a value and writes it through to the retained namespace.
    pub fn set(&mut self, name: &str, value: impl Into<ParamValue>) -> Result<(), ComexError> {
        if !is_parameter_name(name) {
            return Err(ComexError::Attribute(
                ErrorInfo::new(
                    "parameters.not_a_parameter",
                    format!("cannot set '{name}' as a parameter"),
                )
                .with_context("name", name),
            ));
        }
        let value = value.into();
        for namespace in self.namespace.iter().chain(&self.mirrors) {
            namespace.set(name, value.clone());
        }
        self.values.insert(name.to_string(), value);
        Ok(())
    }

    /// Inserts `value` only when `name` is unknown, writing through on insert.
    pub fn insert_default(&mut self, name: &str, value: impl Into<ParamValue>) -> bool {
        if self.values.contains_key(name) {
            return false;
        }
        let value = value.into();
        for namespace in self.namespace.iter().chain(&self.mirrors) {
            namespace.set_default(name, value.clone());
        }
        self.values.insert(name.to_string(), value);
        true
    }

    /// Discovered names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Names with their values, sorted by name.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.values.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Number of parameters.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True when nothing was discovered.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Deep copy detached from any namespace.
    pub fn detached(&self) -> Self {
        Self {
            values: self.values.clone(),
            namespace: None,
            mirrors: Vec::new(),
        }
    }
}
