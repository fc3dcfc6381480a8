//! Module-like namespaces that experiments discover their parameters from.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use comex_core::ParamValue;

#[derive(Debug, Default)]
struct NamespaceInner {
    source: Option<PathBuf>,
    doc: Option<String>,
    entry_point: bool,
    entries: BTreeMap<String, ParamValue>,
}

/// Shared handle over the global names of an experiment or mixin definition.
///
/// Clones alias the same mapping, so a value written through one handle is
/// visible through every other handle. Use [`Namespace::fork`] for an
/// independent copy.
#[derive(Debug, Clone, Default)]
pub struct Namespace {
    inner: Rc<RefCell<NamespaceInner>>,
}

impl Namespace {
    /// Creates an empty namespace defined by the given source file.
    pub fn new(source: impl Into<PathBuf>) -> Self {
        let namespace = Self::default();
        namespace.inner.borrow_mut().source = Some(source.into());
        namespace
    }

    /// Creates a namespace with no backing source file.
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Builder-style insert used when declaring a namespace.
    pub fn with(self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.set(name, value);
        self
    }

    /// Builder-style doc string.
    pub fn with_doc(self, doc: impl Into<String>) -> Self {
        self.inner.borrow_mut().doc = Some(doc.into());
        self
    }

    /// Marks the namespace as the program entry point.
    pub fn entry_point(self) -> Self {
        self.set_entry_point(true);
        self
    }

    /// Marks the namespace as the program entry point.
    pub fn set_entry_point(&self, flag: bool) {
        self.inner.borrow_mut().entry_point = flag;
    }

    /// Whether this namespace is the entry point.
    pub fn is_entry_point(&self) -> bool {
        self.inner.borrow().entry_point
    }

    /// Source file of the module, if any.
    pub fn source(&self) -> Option<PathBuf> {
        self.inner.borrow().source.clone()
    }

    /// Directory containing the source file, used to resolve relative module paths.
    pub fn source_dir(&self) -> Option<PathBuf> {
        self.inner
            .borrow()
            .source
            .as_deref()
            .and_then(Path::parent)
            .map(Path::to_path_buf)
    }

    /// Module doc.
    pub fn doc(&self) -> Option<String> {
        self.inner.borrow().doc.clone()
    }

    /// Replaces the module doc.
    pub fn set_doc(&self, doc: Option<String>) {
        self.inner.borrow_mut().doc = doc;
    }

    /// Value bound to `name`.
    pub fn get(&self, name: &str) -> Option<ParamValue> {
        self.inner.borrow().entries.get(name).cloned()
    }

    /// Whether `name` is bound.
    pub fn contains(&self, name: &str) -> bool {
        self.inner.borrow().entries.contains_key(name)
    }

    /// Binds `name`, replacing any previous value.
    pub fn set(&self, name: impl Into<String>, value: impl Into<ParamValue>) {
        self.inner
            .borrow_mut()
            .entries
            .insert(name.into(), value.into());
    }

    /// Inserts the value only when the name is not yet bound. Returns true on insert.
    pub fn set_default(&self, name: impl Into<String>, value: impl Into<ParamValue>) -> bool {
        let mut inner = self.inner.borrow_mut();
        let name = name.into();
        if inner.entries.contains_key(&name) {
            return false;
        }
        inner.entries.insert(name, value.into());
        true
    }

    /// Unbinds `name` and returns its value.
    pub fn remove(&self, name: &str) -> Option<ParamValue> {
        self.inner.borrow_mut().entries.remove(name)
    }

    /// Bound names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.inner.borrow().entries.keys().cloned().collect()
    }

    /// Point-in-time copy of every binding.
    pub fn snapshot(&self) -> Vec<(String, ParamValue)> {
        self.inner
            .borrow()
            .entries
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }

    /// Number of bindings.
    pub fn len(&self) -> usize {
        self.inner.borrow().entries.len()
    }

    /// True when nothing is bound.
    pub fn is_empty(&self) -> bool {
        self.inner.borrow().entries.is_empty()
    }

    /// Copies bindings from `other` that are absent here. Returns the names added.
    pub fn merge_missing(&self, other: &Namespace) -> Vec<String> {
        if self.ptr_eq(other) {
            return Vec::new();
        }
        let mut added = Vec::new();
        for (name, value) in other.snapshot() {
            if self.set_default(name.clone(), value) {
                added.push(name);
            }
        }
        added
    }

    /// Independent deep copy of this namespace.
    pub fn fork(&self) -> Namespace {
        let inner = self.inner.borrow();
        Namespace {
            inner: Rc::new(RefCell::new(NamespaceInner {
                source: inner.source.clone(),
                doc: inner.doc.clone(),
                entry_point: inner.entry_point,
                entries: inner.entries.clone(),
            })),
        }
    }

    /// True when both handles alias the same mapping.
    pub fn ptr_eq(&self, other: &Namespace) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_alias_and_forks_do_not() {
        let ns = Namespace::new("exp.rs").with("X", 1);
        let alias = ns.clone();
        let fork = ns.fork();
        alias.set("X", 2);
        assert_eq!(ns.get("X").and_then(|v| v.as_i64()), Some(2));
        assert_eq!(fork.get("X").and_then(|v| v.as_i64()), Some(1));
        assert!(ns.ptr_eq(&alias));
        assert!(!ns.ptr_eq(&fork));
    }

    #[test]
    fn merge_missing_keeps_existing_bindings() {
        let child = Namespace::new("child.rs").with("X", 2);
        let parent = Namespace::new("parent.rs").with("X", 1).with("Y", 3);
        let added = child.merge_missing(&parent);
        assert_eq!(added, vec!["Y".to_string()]);
        assert_eq!(child.get("X").and_then(|v| v.as_i64()), Some(2));
        assert_eq!(child.get("Y").and_then(|v| v.as_i64()), Some(3));
    }
}
