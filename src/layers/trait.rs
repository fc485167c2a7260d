//! Layer trait definition for network layers
//!
//! This module defines the core Layer trait that all layer types must implement.
//! The trait provides a common interface for shape inference in both directions,
//! compute cost estimation, parameter records and weight initialization.

use crate::error::Result;
use crate::layers::data::{LayerData, LayerDataConfiguration, LayerDataCustom};
use crate::record::LayerRecord;
use crate::shape::{LayerAction, ShapeDescriptor};
use rand::RngCore;
use std::collections::BTreeSet;
use std::fmt;

/// Core trait for network layers.
///
/// All layer types (loss, prefix sum, sparse convolution) implement this trait
/// so a topology can wire them together without knowing the concrete type.
///
/// # Example
///
/// ```
/// use nn_layer_forge::layers::{Layer, NegativeLogLikelihoodLayer};
/// use nn_layer_forge::ShapeDescriptor;
///
/// let layer = NegativeLogLikelihoodLayer::new(1.0);
/// let input = ShapeDescriptor::new(10, vec![1]);
/// let output = layer.output_shape(&[input.clone(), input]).unwrap();
/// assert_eq!(output, ShapeDescriptor::new(1, vec![1]));
/// ```
pub trait Layer: fmt::Debug + Send + Sync {
    /// Stable type tag used by the registry and in layer records.
    fn type_name(&self) -> &'static str;

    /// Name of this instance within a network.
    fn instance_name(&self) -> &str;

    fn set_instance_name(&mut self, name: &str);

    fn clone_box(&self) -> Box<dyn Layer>;

    /// Computes the output shape for the given input shapes.
    ///
    /// # Errors
    ///
    /// Returns `ShapeMismatch` when feature-map counts, dimension counts or any
    /// layer-specific size constraint are violated.
    fn output_shape(&self, input_shapes: &[ShapeDescriptor]) -> Result<ShapeDescriptor>;

    /// Recovers the shape of input `input_index` from an output shape.
    ///
    /// Returns `Ok(None)` when the layer cannot invert its shape algebra.
    fn input_shape_for_output(
        &self,
        output_shape: &ShapeDescriptor,
        input_index: usize,
    ) -> Result<Option<ShapeDescriptor>>;

    /// Estimated floating-point operation count per entry for `action`.
    ///
    /// Phases the layer does not implement cost 0.
    fn compute_cost(&self, input_shapes: &[ShapeDescriptor], action: LayerAction) -> Result<f32>;

    /// Writes the non-default parameters of this layer into `record`.
    fn write_record(&self, record: &mut LayerRecord);

    /// Reads parameters from `record`, replacing the current configuration.
    ///
    /// # Errors
    ///
    /// Returns `MissingField` when a required field is absent, and
    /// `Configuration` when the values read fail validation.
    fn read_record(&mut self, record: &LayerRecord) -> Result<()>;

    /// Human-readable summary, one line per parameter group.
    fn describe_parameters(&self) -> Vec<String>;

    /// Element counts of the learnable parameter groups.
    fn data_config(&self) -> Vec<usize> {
        Vec::new()
    }

    /// Element counts of the integer side buffers (e.g. sparsity indices).
    fn data_custom_config(&self) -> Vec<usize> {
        Vec::new()
    }

    fn layer_data_configuration_list(&self) -> Vec<LayerDataConfiguration> {
        Vec::new()
    }

    /// Indices of parameter groups that weight decay applies to.
    fn weight_decay_part_ids(&self) -> BTreeSet<usize> {
        BTreeSet::new()
    }

    /// Zero-filled weight store sized from `data_config`.
    fn create_data(&self) -> LayerData {
        LayerData::zeroed(&self.data_config())
    }

    /// Zero-filled side buffers sized from `data_custom_config`.
    fn create_data_custom(&self) -> LayerDataCustom {
        LayerDataCustom::zeroed(&self.data_custom_config())
    }

    /// Overwrites `data` and `data_custom` with freshly initialized values.
    ///
    /// Layers without learnable parameters leave both stores untouched.
    fn randomize_data(
        &self,
        _data: &mut LayerData,
        _data_custom: &mut LayerDataCustom,
        _rng: &mut dyn RngCore,
    ) -> Result<()> {
        Ok(())
    }
}

impl Clone for Box<dyn Layer> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}
