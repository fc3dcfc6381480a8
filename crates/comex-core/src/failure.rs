//! Captured failures raised by experiment bodies and hook callbacks.

use std::any::Any;
use std::backtrace::Backtrace;
use std::fmt::{self, Display};

/// A failure raised by user code running inside an experiment.
///
/// Any `std::error::Error` converts into a `Failure` through `?`, recording the
/// concrete error type name at the conversion site. `Failure` deliberately does
/// not implement `std::error::Error` itself so that the blanket conversion stays
/// coherent.
pub struct Failure {
    type_name: String,
    message: String,
    chain: Vec<String>,
    backtrace: String,
}

impl Failure {
    /// Creates a failure from a plain message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self {
            type_name: "comex_core::Failure".to_string(),
            message: message.into(),
            chain: Vec::new(),
            backtrace: Backtrace::force_capture().to_string(),
        }
    }

    /// Creates a failure with an explicit type label.
    pub fn with_type(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            ..Self::msg(message)
        }
    }

    /// Converts a caught panic payload into a failure.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(text) = payload.downcast_ref::<&str>() {
            (*text).to_string()
        } else if let Some(text) = payload.downcast_ref::<String>() {
            text.clone()
        } else {
            "panic with non-string payload".to_string()
        };
        Self::with_type("panic", message)
    }

    /// Fully qualified type name of the original error.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Display message of the original error.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Messages of the `source()` chain below the original error.
    pub fn chain(&self) -> &[String] {
        &self.chain
    }

    /// Backtrace captured when the failure was created.
    pub fn backtrace(&self) -> &str {
        &self.backtrace
    }

    /// Human readable report combining type, message, cause chain and backtrace.
    pub fn traceback(&self) -> String {
        let mut out = format!("{}: {}\n", self.type_name, self.message);
        if !self.chain.is_empty() {
            out.push_str("\nCaused by:\n");
            for (idx, cause) in self.chain.iter().enumerate() {
                out.push_str(&format!("    {idx}: {cause}\n"));
            }
        }
        if !self.backtrace.is_empty() {
            out.push_str("\nBacktrace:\n");
            out.push_str(&self.backtrace);
            out.push('\n');
        }
        out
    }
}

impl<E> From<E> for Failure
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(err: E) -> Self {
        let mut chain = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            chain.push(cause.to_string());
            source = cause.source();
        }
        Self {
            type_name: std::any::type_name::<E>().to_string(),
            message: err.to_string(),
            chain,
            backtrace: Backtrace::force_capture().to_string(),
        }
    }
}

impl Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.type_name, self.message)
    }
}

impl fmt::Debug for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Failure")
            .field("type_name", &self.type_name)
            .field("message", &self.message)
            .field("chain", &self.chain)
            .finish()
    }
}
