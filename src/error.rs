//! Error types shared by every layer variant.
//!
//! Configuration problems are reported when a layer is constructed or read
//! back from a record, shape problems when a network is being wired up.

use thiserror::Error;

/// Errors raised by layer construction, shape inference and parameter records.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LayerError {
    /// A static layer parameter is out of its allowed range.
    #[error("invalid configuration for {field}: {message}")]
    Configuration { field: String, message: String },

    /// Input or output shapes are incompatible with the layer.
    #[error("shape mismatch in layer {layer}: {message}")]
    ShapeMismatch { layer: String, message: String },

    /// A required field is absent from a layer record.
    #[error("missing field {field} for layer {layer}")]
    MissingField { layer: String, field: String },

    /// A backward action or inverse shape request names a non-existent input.
    #[error("input index {index} is out of range for layer {layer} with {input_count} inputs")]
    InputIndexOutOfRange {
        layer: String,
        index: usize,
        input_count: usize,
    },

    /// The registry holds no prototype for the requested type tag.
    #[error("unknown layer type {0}")]
    UnknownLayerType(String),

    /// An internal invariant failed; this indicates a defect, not bad input.
    #[error("internal invariant violated: {0}")]
    InvariantViolation(String),
}

pub type Result<T> = std::result::Result<T, LayerError>;

impl LayerError {
    pub(crate) fn configuration(field: &str, message: impl Into<String>) -> Self {
        LayerError::Configuration {
            field: field.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn shape(layer: String, message: impl Into<String>) -> Self {
        LayerError::ShapeMismatch {
            layer,
            message: message.into(),
        }
    }

    pub(crate) fn missing(layer: String, field: &str) -> Self {
        LayerError::MissingField {
            layer,
            field: field.to_string(),
        }
    }
}

/// Formats a layer for diagnostics as `"name" (Type)`.
pub(crate) fn layer_label(instance_name: &str, type_name: &str) -> String {
    format!("\"{}\" ({})", instance_name, type_name)
}
