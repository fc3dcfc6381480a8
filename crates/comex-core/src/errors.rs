//! Structured error types shared across comex crates.

use std::collections::BTreeMap;
use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structured payload attached to every [`ComexError`] variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable machine readable error code.
    pub code: String,
    /// Human readable diagnostic message.
    pub message: String,
    /// Contextual key value pairs (paths, parameter names, hook names, etc.).
    #[serde(default)]
    pub context: BTreeMap<String, String>,
    /// Optional hint that may help the caller resolve the issue.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl ErrorInfo {
    /// Creates a new error payload with the provided code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            context: BTreeMap::new(),
            hint: None,
        }
    }

    /// Adds a context entry to the payload.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Sets a human readable hint for remediation.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

/// Canonical error type for the comex engine.
///
/// Failures raised by user experiment code are not represented here; those
/// are captured as [`crate::Failure`] and recorded onto the experiment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "family", content = "detail")]
pub enum ComexError {
    /// Invalid configuration detected before any archive mutation.
    #[error("config error: {0}")]
    Config(ErrorInfo),
    /// Filesystem failures while creating or writing an archive.
    #[error("archive error: {0}")]
    Archive(ErrorInfo),
    /// A parameter-shaped name that is not a known parameter.
    #[error("parameter error: {0}")]
    Parameter(ErrorInfo),
    /// A name that is not parameter-shaped was used as a parameter.
    #[error("attribute error: {0}")]
    Attribute(ErrorInfo),
    /// Misuse of the nested data store.
    #[error("data error: {0}")]
    Data(ErrorInfo),
    /// Module loading, extend and include failures.
    #[error("compose error: {0}")]
    Compose(ErrorInfo),
    /// Failures raised by plugin hook callbacks.
    #[error("plugin error: {0}")]
    Plugin(ErrorInfo),
    /// Serialization and schema errors.
    #[error("serde error: {0}")]
    Serde(ErrorInfo),
}

impl Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code: {})", self.message, self.code)?;
        if !self.context.is_empty() {
            write!(f, " | context: [")?;
            for (idx, (key, value)) in self.context.iter().enumerate() {
                if idx > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{key}={value}")?;
            }
            write!(f, "]")?;
        }
        if let Some(hint) = &self.hint {
            write!(f, " | hint: {hint}")?;
        }
        Ok(())
    }
}

impl ComexError {
    /// Returns a reference to the payload describing the error.
    pub fn info(&self) -> &ErrorInfo {
        match self {
            ComexError::Config(info)
            | ComexError::Archive(info)
            | ComexError::Parameter(info)
            | ComexError::Attribute(info)
            | ComexError::Data(info)
            | ComexError::Compose(info)
            | ComexError::Plugin(info)
            | ComexError::Serde(info) => info,
        }
    }

    /// Returns true when the error was raised before any archive mutation.
    pub fn is_config(&self) -> bool {
        matches!(self, ComexError::Config(_) | ComexError::Compose(_))
    }
}

/// Wraps an I/O failure into an archive error tagged with the offending path.
pub fn archive_io(code: &str, path: &std::path::Path, err: impl ToString) -> ComexError {
    ComexError::Archive(
        ErrorInfo::new(code, err.to_string()).with_context("path", path.display().to_string()),
    )
}
