#![deny(missing_docs)]
#![doc = "Shared error, failure and parameter value types for the comex experiment engine."]

pub mod errors;
pub mod failure;
pub mod value;

pub use errors::{archive_io, ComexError, ErrorInfo};
pub use failure::Failure;
pub use value::{Opaque, ParamValue};

/// Result type returned by experiment bodies and hook callbacks.
pub type RunResult<T = ()> = Result<T, Failure>;
