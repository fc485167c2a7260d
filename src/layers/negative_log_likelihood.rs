//! Negative log-likelihood loss layer
//!
//! Takes predicted probabilities and one-hot targets of identical shape, plus
//! an optional per-neuron scale input, and produces one loss value per
//! spatial position.

use crate::error::{layer_label, LayerError, Result};
use crate::layers::Layer;
use crate::record::{LayerRecord, NegativeLogLikelihoodParam};
use crate::shape::{LayerAction, ShapeDescriptor};

/// Loss layer with two or three inputs and no learnable parameters.
///
/// # Example
///
/// ```
/// use nn_layer_forge::layers::{Layer, NegativeLogLikelihoodLayer};
/// use nn_layer_forge::ShapeDescriptor;
///
/// let layer = NegativeLogLikelihoodLayer::new(0.5);
/// assert_eq!(layer.describe_parameters(), vec!["scale 0.5".to_string()]);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct NegativeLogLikelihoodLayer {
    instance_name: String,
    scale: f32,
}

impl NegativeLogLikelihoodLayer {
    pub const TYPE_NAME: &'static str = "NegativeLogLikelihood";

    pub fn new(scale: f32) -> Self {
        Self {
            instance_name: String::new(),
            scale,
        }
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    fn label(&self) -> String {
        layer_label(&self.instance_name, Self::TYPE_NAME)
    }
}

impl Default for NegativeLogLikelihoodLayer {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl Layer for NegativeLogLikelihoodLayer {
    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn instance_name(&self) -> &str {
        &self.instance_name
    }

    fn set_instance_name(&mut self, name: &str) {
        self.instance_name = name.to_string();
    }

    fn clone_box(&self) -> Box<dyn Layer> {
        Box::new(self.clone())
    }

    fn output_shape(&self, input_shapes: &[ShapeDescriptor]) -> Result<ShapeDescriptor> {
        let (predicted, target) = match input_shapes {
            [predicted, target] | [predicted, target, _] => (predicted, target),
            _ => {
                return Err(LayerError::shape(
                    self.label(),
                    format!("expected 2 or 3 inputs, got {}", input_shapes.len()),
                ))
            }
        };

        if predicted.feature_map_count != target.feature_map_count {
            return Err(LayerError::shape(
                self.label(),
                format!(
                    "feature map counts in 2 input layers don't match: {} and {}",
                    predicted.feature_map_count, target.feature_map_count
                ),
            ));
        }

        if predicted.neuron_count_per_feature_map() != target.neuron_count_per_feature_map() {
            return Err(LayerError::shape(
                self.label(),
                format!(
                    "neuron counts per feature map in 2 input layers don't match: {} and {}",
                    predicted.neuron_count_per_feature_map(),
                    target.neuron_count_per_feature_map()
                ),
            ));
        }

        if let Some(scaling) = input_shapes.get(2) {
            if scaling.feature_map_count != 1 {
                return Err(LayerError::shape(
                    self.label(),
                    format!(
                        "feature map count for scaling should be equal to 1, while it is {}",
                        scaling.feature_map_count
                    ),
                ));
            }
            if scaling.neuron_count_per_feature_map() != predicted.neuron_count_per_feature_map() {
                return Err(LayerError::shape(
                    self.label(),
                    format!(
                        "neuron count per feature map for scaling equals {}, expected {}",
                        scaling.neuron_count_per_feature_map(),
                        predicted.neuron_count_per_feature_map()
                    ),
                ));
            }
        }

        Ok(ShapeDescriptor::new(1, predicted.dimension_sizes.clone()))
    }

    fn input_shape_for_output(
        &self,
        _output_shape: &ShapeDescriptor,
        _input_index: usize,
    ) -> Result<Option<ShapeDescriptor>> {
        Ok(None)
    }

    fn compute_cost(&self, input_shapes: &[ShapeDescriptor], action: LayerAction) -> Result<f32> {
        match action {
            LayerAction::Forward => {
                let neuron_count = self.output_shape(input_shapes)?.neuron_count();
                let per_item_flops = input_shapes[0].feature_map_count * 3;
                Ok(neuron_count as f32 * per_item_flops as f32)
            }
            LayerAction::BackwardData { input_index } => {
                let input = input_shapes.get(input_index).ok_or_else(|| {
                    LayerError::InputIndexOutOfRange {
                        layer: self.label(),
                        index: input_index,
                        input_count: input_shapes.len(),
                    }
                })?;
                Ok(input.neuron_count() as f32 * 2.0)
            }
            LayerAction::BackwardWeights => Ok(0.0),
        }
    }

    fn write_record(&self, record: &mut LayerRecord) {
        if self.scale != 1.0 {
            record.negative_log_likelihood_param = Some(NegativeLogLikelihoodParam {
                scale: Some(self.scale),
            });
        }
    }

    fn read_record(&mut self, record: &LayerRecord) -> Result<()> {
        self.scale = record
            .negative_log_likelihood_param
            .as_ref()
            .and_then(|param| param.scale)
            .unwrap_or(1.0);
        Ok(())
    }

    fn describe_parameters(&self) -> Vec<String> {
        if self.scale != 1.0 {
            vec![format!("scale {}", self.scale)]
        } else {
            vec![String::new()]
        }
    }
}
