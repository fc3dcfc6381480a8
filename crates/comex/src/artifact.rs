//! Figures and tracked quantities.

use comex_core::ComexError;
use serde_json::Value;

/// Anything that can be rendered into the bytes of an image file.
pub trait Figure {
    /// Raw bytes written to the archive file.
    fn encode(&self) -> Result<Vec<u8>, ComexError>;

    /// Short description passed to plugin hooks.
    fn describe(&self) -> String {
        std::any::type_name::<Self>().to_string()
    }
}

impl Figure for Vec<u8> {
    fn encode(&self) -> Result<Vec<u8>, ComexError> {
        Ok(self.clone())
    }

    fn describe(&self) -> String {
        format!("{} bytes", self.len())
    }
}

impl Figure for [u8] {
    fn encode(&self) -> Result<Vec<u8>, ComexError> {
        Ok(self.to_vec())
    }

    fn describe(&self) -> String {
        format!("{} bytes", self.len())
    }
}

/// Text figures such as SVG documents.
impl Figure for str {
    fn encode(&self) -> Result<Vec<u8>, ComexError> {
        Ok(self.as_bytes().to_vec())
    }

    fn describe(&self) -> String {
        format!("{} chars", self.len())
    }
}

impl Figure for String {
    fn encode(&self) -> Result<Vec<u8>, ComexError> {
        self.as_str().encode()
    }

    fn describe(&self) -> String {
        self.as_str().describe()
    }
}

/// A value passed to [`crate::Experiment::track`].
pub enum Tracked<'a> {
    /// Appended to the series as a number.
    Scalar(f64),
    /// Written under `.track/`; the series stores its relative path.
    Figure(&'a dyn Figure),
}

impl Tracked<'_> {
    pub(crate) fn describe(&self) -> Value {
        match self {
            Tracked::Scalar(value) => Value::from(*value),
            Tracked::Figure(figure) => Value::String(figure.describe()),
        }
    }
}

impl From<f64> for Tracked<'_> {
    fn from(value: f64) -> Self {
        Tracked::Scalar(value)
    }
}

impl From<f32> for Tracked<'_> {
    fn from(value: f32) -> Self {
        Tracked::Scalar(f64::from(value))
    }
}

impl From<i32> for Tracked<'_> {
    fn from(value: i32) -> Self {
        Tracked::Scalar(f64::from(value))
    }
}

impl<'a, F: Figure> From<&'a F> for Tracked<'a> {
    fn from(figure: &'a F) -> Self {
        Tracked::Figure(figure)
    }
}
