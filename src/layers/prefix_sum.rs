//! Clamped prefix-sum layer
//!
//! Runs a cumulative sum along the feature-map axis, restarting every
//! `feature_map_segment_length` feature maps and clamping each partial sum
//! into `[clamp_min, clamp_max]`. The shape is passed through unchanged.

use crate::error::{layer_label, LayerError, Result};
use crate::layers::Layer;
use crate::record::{LayerRecord, PrefixSumParam};
use crate::shape::{LayerAction, ShapeDescriptor};

#[derive(Debug, Clone, PartialEq)]
pub struct PrefixSumLayer {
    instance_name: String,
    feature_map_segment_length: usize,
    clamp_min: f32,
    clamp_max: f32,
}

impl PrefixSumLayer {
    pub const TYPE_NAME: &'static str = "PrefixSum";

    /// Unclamped prefix sum over segments of `feature_map_segment_length`.
    pub fn new(feature_map_segment_length: usize) -> Result<Self> {
        Self::with_clamp(feature_map_segment_length, -f32::MAX, f32::MAX)
    }

    pub fn with_clamp(feature_map_segment_length: usize, clamp_min: f32, clamp_max: f32) -> Result<Self> {
        let layer = Self {
            instance_name: String::new(),
            feature_map_segment_length,
            clamp_min,
            clamp_max,
        };
        layer.check()?;
        Ok(layer)
    }

    pub fn feature_map_segment_length(&self) -> usize {
        self.feature_map_segment_length
    }

    pub fn clamp_min(&self) -> f32 {
        self.clamp_min
    }

    pub fn clamp_max(&self) -> f32 {
        self.clamp_max
    }

    fn check(&self) -> Result<()> {
        if self.feature_map_segment_length == 0 {
            return Err(LayerError::configuration(
                "feature_map_segment_length",
                "may not be zero",
            ));
        }
        if !(self.clamp_min <= self.clamp_max) {
            return Err(LayerError::configuration(
                "clamp_min",
                format!(
                    "clamp_min {} is greater than clamp_max {}",
                    self.clamp_min, self.clamp_max
                ),
            ));
        }
        Ok(())
    }

    fn label(&self) -> String {
        layer_label(&self.instance_name, Self::TYPE_NAME)
    }

    fn check_segments(&self, shape: &ShapeDescriptor) -> Result<()> {
        if shape.feature_map_count % self.feature_map_segment_length != 0 {
            return Err(LayerError::shape(
                self.label(),
                format!(
                    "feature map count {} is not a multiple of segment length {}",
                    shape.feature_map_count, self.feature_map_segment_length
                ),
            ));
        }
        Ok(())
    }
}

impl Default for PrefixSumLayer {
    /// Segment length 1 without clamping.
    fn default() -> Self {
        Self {
            instance_name: String::new(),
            feature_map_segment_length: 1,
            clamp_min: -f32::MAX,
            clamp_max: f32::MAX,
        }
    }
}

impl Layer for PrefixSumLayer {
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
        let input = input_shapes.first().ok_or_else(|| {
            LayerError::shape(self.label(), "expected 1 input, got 0")
        })?;
        self.check_segments(input)?;
        Ok(input.clone())
    }

    fn input_shape_for_output(
        &self,
        output_shape: &ShapeDescriptor,
        input_index: usize,
    ) -> Result<Option<ShapeDescriptor>> {
        if input_index != 0 {
            return Err(LayerError::InputIndexOutOfRange {
                layer: self.label(),
                index: input_index,
                input_count: 1,
            });
        }
        self.check_segments(output_shape)?;
        Ok(Some(output_shape.clone()))
    }

    fn compute_cost(&self, input_shapes: &[ShapeDescriptor], action: LayerAction) -> Result<f32> {
        let neuron_count = self.output_shape(input_shapes)?.neuron_count() as f32;
        match action {
            // One add and two clamp comparisons per neuron.
            LayerAction::Forward => Ok(neuron_count * 3.0),
            LayerAction::BackwardData { input_index: 0 } => Ok(neuron_count),
            LayerAction::BackwardData { input_index } => Err(LayerError::InputIndexOutOfRange {
                layer: self.label(),
                index: input_index,
                input_count: input_shapes.len(),
            }),
            LayerAction::BackwardWeights => Ok(0.0),
        }
    }

    fn write_record(&self, record: &mut LayerRecord) {
        record.prefix_sum_param = Some(PrefixSumParam {
            feature_map_segment_length: Some(self.feature_map_segment_length),
            clamp_min: (self.clamp_min != -f32::MAX).then_some(self.clamp_min),
            clamp_max: (self.clamp_max != f32::MAX).then_some(self.clamp_max),
        });
    }

    fn read_record(&mut self, record: &LayerRecord) -> Result<()> {
        let param = record
            .prefix_sum_param
            .as_ref()
            .ok_or_else(|| LayerError::missing(self.label(), "prefix_sum_param"))?;
        let layer = Self {
            instance_name: self.instance_name.clone(),
            feature_map_segment_length: param
                .feature_map_segment_length
                .ok_or_else(|| LayerError::missing(self.label(), "feature_map_segment_length"))?,
            clamp_min: param.clamp_min.unwrap_or(-f32::MAX),
            clamp_max: param.clamp_max.unwrap_or(f32::MAX),
        };
        layer.check()?;
        *self = layer;
        Ok(())
    }

    fn describe_parameters(&self) -> Vec<String> {
        let mut line = format!("segment length {}", self.feature_map_segment_length);
        if self.clamp_min != -f32::MAX || self.clamp_max != f32::MAX {
            line.push_str(&format!(", clamp [{}, {}]", self.clamp_min, self.clamp_max));
        }
        vec![line]
    }
}
