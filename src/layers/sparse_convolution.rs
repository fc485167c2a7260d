//! Sparse convolution layer implementation
//!
//! This module provides a SparseConvolutionLayer: an N-dimensional convolution
//! in which each output feature map reads from only a subset of the input
//! feature maps. Which pairs are connected is drawn once at initialization by
//! the connectivity generator and stored in compressed-row form next to the
//! weights.

use crate::config::ConnectivityConfig;
use crate::error::{layer_label, LayerError, Result};
use crate::layers::connectivity;
use crate::layers::data::{LayerData, LayerDataConfiguration, LayerDataCustom};
use crate::layers::Layer;
use crate::record::{LayerRecord, SparseConvolutionDimensionParam, SparseConvolutionParam};
use crate::shape::{LayerAction, ShapeDescriptor};
use rand::RngCore;
use rand_distr::{Distribution, Normal};
use std::collections::BTreeSet;
use tracing::debug;

/// How many input-output feature-map pairs are connected.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Sparsity {
    /// Exact number of connected pairs.
    ConnectionCount(usize),
    /// Fraction of all pairs, rounded to the nearest count.
    Ratio(f32),
}

/// Sparse convolution with per-dimension window, padding and stride.
///
/// # Fields
///
/// * `window_sizes` - Kernel extent per spatial dimension
/// * `feature_map_connection_count` - Number of connected feature-map pairs
/// * `feature_map_connection_sparsity_ratio` - Ratio the count was derived from, if any
/// * `left_zero_padding` / `right_zero_padding` - Zero padding per dimension
/// * `strides` - Stride per dimension
/// * `bias` - Whether a per-output-feature-map bias is learned
///
/// # Example
///
/// ```
/// use nn_layer_forge::layers::{Layer, SparseConvolutionLayer, Sparsity};
/// use nn_layer_forge::ShapeDescriptor;
///
/// let layer = SparseConvolutionLayer::new(
///     vec![3, 3], 8, 16, Sparsity::Ratio(0.25), vec![], vec![], vec![], true,
/// ).unwrap();
/// assert_eq!(layer.feature_map_connection_count(), 32);
///
/// let output = layer.output_shape(&[ShapeDescriptor::new(8, vec![10, 10])]).unwrap();
/// assert_eq!(output, ShapeDescriptor::new(16, vec![8, 8]));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct SparseConvolutionLayer {
    instance_name: String,
    window_sizes: Vec<usize>,
    input_feature_map_count: usize,
    output_feature_map_count: usize,
    feature_map_connection_sparsity_ratio: Option<f32>,
    feature_map_connection_count: usize,
    left_zero_padding: Vec<usize>,
    right_zero_padding: Vec<usize>,
    strides: Vec<usize>,
    bias: bool,
    connectivity: ConnectivityConfig,
}

/// Largest weight magnitude kept by the sampler, in standard deviations.
const MAX_ABS_WEIGHT_IN_STD_DEVS: f32 = 100.0;

fn edge_count_from_ratio(input_feature_map_count: usize, output_feature_map_count: usize, ratio: f32) -> usize {
    (input_feature_map_count as f32 * output_feature_map_count as f32 * ratio + 0.5) as usize
}

fn expand_per_dimension(
    field: &str,
    values: Vec<usize>,
    dimension_count: usize,
    default: usize,
) -> Result<Vec<usize>> {
    if values.is_empty() {
        return Ok(vec![default; dimension_count]);
    }
    if values.len() != dimension_count {
        return Err(LayerError::configuration(
            field,
            format!(
                "invalid dimension count {}, expected {}",
                values.len(),
                dimension_count
            ),
        ));
    }
    Ok(values)
}

impl SparseConvolutionLayer {
    pub const TYPE_NAME: &'static str = "SparseConvolution";

    /// Create a new SparseConvolutionLayer and validate it.
    ///
    /// Empty padding or stride vectors mean zero padding and unit stride in
    /// every dimension.
    ///
    /// # Arguments
    ///
    /// * `window_sizes` - Kernel size per spatial dimension; empty for a fully connected layer
    /// * `input_feature_map_count` - Number of input feature maps
    /// * `output_feature_map_count` - Number of output feature maps
    /// * `sparsity` - Connection count, or ratio of the dense count
    /// * `left_zero_padding` - Leading zero padding per dimension
    /// * `right_zero_padding` - Trailing zero padding per dimension
    /// * `strides` - Stride per dimension
    /// * `bias` - Whether to learn a bias per output feature map
    ///
    /// # Errors
    ///
    /// Returns `Configuration` naming the first invalid field.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        window_sizes: Vec<usize>,
        input_feature_map_count: usize,
        output_feature_map_count: usize,
        sparsity: Sparsity,
        left_zero_padding: Vec<usize>,
        right_zero_padding: Vec<usize>,
        strides: Vec<usize>,
        bias: bool,
    ) -> Result<Self> {
        let dimension_count = window_sizes.len();
        let left_zero_padding =
            expand_per_dimension("left_zero_padding", left_zero_padding, dimension_count, 0)?;
        let right_zero_padding =
            expand_per_dimension("right_zero_padding", right_zero_padding, dimension_count, 0)?;
        let strides = expand_per_dimension("strides", strides, dimension_count, 1)?;

        let (feature_map_connection_sparsity_ratio, feature_map_connection_count) = match sparsity {
            Sparsity::ConnectionCount(count) => (None, count),
            Sparsity::Ratio(ratio) => (
                Some(ratio),
                edge_count_from_ratio(input_feature_map_count, output_feature_map_count, ratio),
            ),
        };

        let layer = Self {
            instance_name: String::new(),
            window_sizes,
            input_feature_map_count,
            output_feature_map_count,
            feature_map_connection_sparsity_ratio,
            feature_map_connection_count,
            left_zero_padding,
            right_zero_padding,
            strides,
            bias,
            connectivity: ConnectivityConfig::default(),
        };
        layer.check()?;
        Ok(layer)
    }

    /// Replaces the tuning constants of the connectivity generator.
    pub fn with_connectivity_config(mut self, config: ConnectivityConfig) -> Result<Self> {
        config.validate()?;
        self.connectivity = config;
        Ok(self)
    }

    pub fn window_sizes(&self) -> &[usize] {
        &self.window_sizes
    }

    pub fn input_feature_map_count(&self) -> usize {
        self.input_feature_map_count
    }

    pub fn output_feature_map_count(&self) -> usize {
        self.output_feature_map_count
    }

    pub fn feature_map_connection_count(&self) -> usize {
        self.feature_map_connection_count
    }

    pub fn feature_map_connection_sparsity_ratio(&self) -> Option<f32> {
        self.feature_map_connection_sparsity_ratio
    }

    pub fn left_zero_padding(&self) -> &[usize] {
        &self.left_zero_padding
    }

    pub fn right_zero_padding(&self) -> &[usize] {
        &self.right_zero_padding
    }

    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    pub fn bias(&self) -> bool {
        self.bias
    }

    pub fn connectivity_config(&self) -> &ConnectivityConfig {
        &self.connectivity
    }

    /// Product of the window sizes; 1 when there are no spatial dimensions.
    pub fn window_volume(&self) -> usize {
        self.window_sizes.iter().product()
    }

    fn label(&self) -> String {
        layer_label(&self.instance_name, Self::TYPE_NAME)
    }

    fn check(&self) -> Result<()> {
        for (i, &window_size) in self.window_sizes.iter().enumerate() {
            if window_size == 0 {
                return Err(LayerError::configuration(
                    "window_sizes",
                    format!("window size of dimension ({}) may not be zero", i),
                ));
            }
        }

        if self.input_feature_map_count == 0 {
            return Err(LayerError::configuration(
                "input_feature_map_count",
                "may not be zero",
            ));
        }
        if self.output_feature_map_count == 0 {
            return Err(LayerError::configuration(
                "output_feature_map_count",
                "may not be zero",
            ));
        }

        if let Some(ratio) = self.feature_map_connection_sparsity_ratio {
            if !(0.0..=1.0).contains(&ratio) {
                return Err(LayerError::configuration(
                    "feature_map_connection_sparsity_ratio",
                    format!("ratio {} is outside [0, 1]", ratio),
                ));
            }
        }

        let edges = self.feature_map_connection_count;
        if edges < self.input_feature_map_count {
            return Err(LayerError::configuration(
                "feature_map_connection_count",
                format!(
                    "{} may not be smaller than input_feature_map_count {}",
                    edges, self.input_feature_map_count
                ),
            ));
        }
        if edges < self.output_feature_map_count {
            return Err(LayerError::configuration(
                "feature_map_connection_count",
                format!(
                    "{} may not be smaller than output_feature_map_count {}",
                    edges, self.output_feature_map_count
                ),
            ));
        }
        let dense_count = self
            .input_feature_map_count
            .checked_mul(self.output_feature_map_count)
            .ok_or_else(|| {
                LayerError::configuration(
                    "output_feature_map_count",
                    format!(
                        "dense connection count of {}x{} feature maps overflows",
                        self.input_feature_map_count, self.output_feature_map_count
                    ),
                )
            })?;
        if edges > dense_count {
            return Err(LayerError::configuration(
                "feature_map_connection_count",
                format!("{} may not be larger than in dense case {}", edges, dense_count),
            ));
        }
        // Connections are indexed by u32 in the custom data store.
        if u32::try_from(edges).is_err() {
            return Err(LayerError::configuration(
                "feature_map_connection_count",
                format!("{} does not fit the u32 connection index", edges),
            ));
        }
        let weight_count = self
            .window_sizes
            .iter()
            .try_fold(edges, |count, &window_size| count.checked_mul(window_size));
        if weight_count.is_none() {
            return Err(LayerError::configuration(
                "window_sizes",
                format!("weight count of {} connections overflows", edges),
            ));
        }

        for (i, (&padding, &window_size)) in self
            .left_zero_padding
            .iter()
            .zip(&self.window_sizes)
            .enumerate()
        {
            if padding >= window_size {
                return Err(LayerError::configuration(
                    "left_zero_padding",
                    format!(
                        "left zero padding {} of dimension ({}) is greater or equal than layer window size ({})",
                        padding, i, window_size
                    ),
                ));
            }
        }

        for (i, (&padding, &window_size)) in self
            .right_zero_padding
            .iter()
            .zip(&self.window_sizes)
            .enumerate()
        {
            if padding >= window_size {
                return Err(LayerError::configuration(
                    "right_zero_padding",
                    format!(
                        "right zero padding {} of dimension ({}) is greater or equal than layer window size ({})",
                        padding, i, window_size
                    ),
                ));
            }
        }

        for (i, &stride) in self.strides.iter().enumerate() {
            if stride == 0 {
                return Err(LayerError::configuration(
                    "strides",
                    format!("stride of dimension ({}) is 0", i),
                ));
            }
        }

        Ok(())
    }

    fn check_dimension_count(&self, shape: &ShapeDescriptor, side: &str) -> Result<()> {
        if shape.dimension_count() != self.window_sizes.len() {
            return Err(LayerError::shape(
                self.label(),
                format!(
                    "dimension count in layer ({}) and {} configuration ({}) don't match",
                    self.window_sizes.len(),
                    side,
                    shape.dimension_count()
                ),
            ));
        }
        Ok(())
    }

    /// Samples weights for the connections recorded in `data_custom`.
    ///
    /// Each output feature map with `k` connected inputs draws from
    /// N(0, sqrt(1 / (sqrt(k * output_feature_map_count) * window_volume))),
    /// redrawing any value beyond 100 standard deviations. Bias is zeroed.
    pub fn randomize_weights(
        &self,
        data: &mut LayerData,
        data_custom: &LayerDataCustom,
        rng: &mut dyn RngCore,
    ) -> Result<()> {
        data.check_sizes(&self.data_config())?;
        data_custom.check_sizes(&self.data_custom_config())?;

        let window_volume = self.window_volume();
        let row_offsets = &data_custom.parts[1];
        let weights = &mut data.parts[0];

        let mut current_weight_index = 0;
        for output_feature_map_id in 0..self.output_feature_map_count {
            let start = row_offsets[output_feature_map_id] as usize;
            let end = row_offsets[output_feature_map_id + 1] as usize;
            let fan_in = end.checked_sub(start).ok_or_else(|| {
                LayerError::InvariantViolation(format!(
                    "row offsets decrease at output feature map {}",
                    output_feature_map_id
                ))
            })?;
            if fan_in == 0 {
                continue;
            }

            let average_feature_map_count =
                (fan_in as f32 * self.output_feature_map_count as f32).sqrt();
            let standard_deviation =
                (1.0 / (average_feature_map_count * window_volume as f32)).sqrt();
            let max_abs_value = MAX_ABS_WEIGHT_IN_STD_DEVS * standard_deviation;
            let distribution = Normal::new(0.0f32, standard_deviation)
                .map_err(|e| LayerError::InvariantViolation(e.to_string()))?;

            let weight_count = window_volume * fan_in;
            let run = weights
                .get_mut(current_weight_index..current_weight_index + weight_count)
                .ok_or_else(|| {
                    LayerError::InvariantViolation(format!(
                        "connections of output feature map {} overrun the weight buffer",
                        output_feature_map_id
                    ))
                })?;
            for value in run.iter_mut() {
                let mut sample = distribution.sample(rng);
                while sample.abs() > max_abs_value {
                    sample = distribution.sample(rng);
                }
                *value = sample;
            }
            current_weight_index += weight_count;
        }

        if self.bias {
            data.parts[1].fill(0.0);
        }
        debug!(
            layer = %self.instance_name,
            weights = current_weight_index,
            "sparse convolution weights initialized"
        );

        Ok(())
    }
}

impl Default for SparseConvolutionLayer {
    /// A fully connected 1x1 layer; used as the registry prototype.
    fn default() -> Self {
        Self {
            instance_name: String::new(),
            window_sizes: Vec::new(),
            input_feature_map_count: 1,
            output_feature_map_count: 1,
            feature_map_connection_sparsity_ratio: None,
            feature_map_connection_count: 1,
            left_zero_padding: Vec::new(),
            right_zero_padding: Vec::new(),
            strides: Vec::new(),
            bias: true,
            connectivity: ConnectivityConfig::default(),
        }
    }
}

impl Layer for SparseConvolutionLayer {
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
        let input = input_shapes
            .first()
            .ok_or_else(|| LayerError::shape(self.label(), "expected 1 input, got 0"))?;

        if input.feature_map_count != self.input_feature_map_count {
            return Err(LayerError::shape(
                self.label(),
                format!(
                    "feature map count in layer ({}) and input configuration ({}) don't match",
                    self.input_feature_map_count, input.feature_map_count
                ),
            ));
        }
        self.check_dimension_count(input, "input")?;

        let mut dimension_sizes = Vec::with_capacity(self.window_sizes.len());
        for i in 0..self.window_sizes.len() {
            let total_input_dimension_size = input.dimension_sizes[i]
                .checked_add(self.left_zero_padding[i])
                .and_then(|size| size.checked_add(self.right_zero_padding[i]))
                .ok_or_else(|| {
                    LayerError::shape(
                        self.label(),
                        format!(
                            "total size with padding of dimension ({}) overflows for input size ({})",
                            i, input.dimension_sizes[i]
                        ),
                    )
                })?;
            if total_input_dimension_size < self.window_sizes[i] {
                return Err(LayerError::shape(
                    self.label(),
                    format!(
                        "total size with padding ({}) of dimension ({}) is smaller than layer window size ({})",
                        total_input_dimension_size, i, self.window_sizes[i]
                    ),
                ));
            }
            dimension_sizes
                .push((total_input_dimension_size - self.window_sizes[i]) / self.strides[i] + 1);
        }

        Ok(ShapeDescriptor::new(self.output_feature_map_count, dimension_sizes))
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
        if output_shape.feature_map_count != self.output_feature_map_count {
            return Err(LayerError::shape(
                self.label(),
                format!(
                    "feature map count in layer ({}) and output configuration ({}) don't match",
                    self.output_feature_map_count, output_shape.feature_map_count
                ),
            ));
        }
        self.check_dimension_count(output_shape, "output")?;

        let mut dimension_sizes = Vec::with_capacity(self.window_sizes.len());
        for i in 0..self.window_sizes.len() {
            let output_size = output_shape.dimension_sizes[i];
            let padding = self.left_zero_padding[i].checked_add(self.right_zero_padding[i]);
            let input_size = output_size
                .checked_sub(1)
                .and_then(|steps| steps.checked_mul(self.strides[i]))
                .and_then(|span| span.checked_add(self.window_sizes[i]))
                .zip(padding)
                .and_then(|(size, padding)| size.checked_sub(padding))
                .filter(|&size| size > 0)
                .ok_or_else(|| {
                    LayerError::shape(
                        self.label(),
                        format!(
                            "output size ({}) of dimension ({}) has no input size with window ({}) and padding ({}, {})",
                            output_size,
                            i,
                            self.window_sizes[i],
                            self.left_zero_padding[i],
                            self.right_zero_padding[i]
                        ),
                    )
                })?;
            dimension_sizes.push(input_size);
        }

        Ok(Some(ShapeDescriptor::new(
            self.input_feature_map_count,
            dimension_sizes,
        )))
    }

    fn compute_cost(&self, input_shapes: &[ShapeDescriptor], action: LayerAction) -> Result<f32> {
        let neuron_count = self
            .output_shape(input_shapes)?
            .neuron_count_per_feature_map() as f32;
        let multiply_adds =
            self.feature_map_connection_count as f32 * self.window_volume() as f32 * 2.0;
        match action {
            LayerAction::Forward => {
                let bias_adjustment = if self.bias { 0.0 } else { 1.0 };
                Ok(neuron_count * (multiply_adds - bias_adjustment))
            }
            LayerAction::BackwardData { input_index: 0 } => Ok(neuron_count * (multiply_adds - 1.0)),
            LayerAction::BackwardData { input_index } => Err(LayerError::InputIndexOutOfRange {
                layer: self.label(),
                index: input_index,
                input_count: input_shapes.len(),
            }),
            LayerAction::BackwardWeights => {
                let bias_gradient = if self.bias { neuron_count } else { 0.0 };
                Ok(neuron_count * multiply_adds + bias_gradient)
            }
        }
    }

    fn write_record(&self, record: &mut LayerRecord) {
        let mut param = SparseConvolutionParam {
            input_feature_map_count: Some(self.input_feature_map_count),
            output_feature_map_count: Some(self.output_feature_map_count),
            bias: (!self.bias).then_some(false),
            ..SparseConvolutionParam::default()
        };

        match self.feature_map_connection_sparsity_ratio {
            Some(ratio) => param.feature_map_connection_sparsity_ratio = Some(ratio),
            None => param.feature_map_connection_count = Some(self.feature_map_connection_count),
        }

        param.dimension_param = (0..self.window_sizes.len())
            .map(|i| SparseConvolutionDimensionParam {
                kernel_size: Some(self.window_sizes[i]),
                left_padding: (self.left_zero_padding[i] > 0).then_some(self.left_zero_padding[i]),
                right_padding: (self.right_zero_padding[i] > 0).then_some(self.right_zero_padding[i]),
                stride: (self.strides[i] > 1).then_some(self.strides[i]),
            })
            .collect();

        record.sparse_convolution_param = Some(param);
    }

    fn read_record(&mut self, record: &LayerRecord) -> Result<()> {
        let label = self.label();
        let param = record
            .sparse_convolution_param
            .as_ref()
            .ok_or_else(|| LayerError::missing(label.clone(), "sparse_convolution_param"))?;

        let input_feature_map_count = param
            .input_feature_map_count
            .ok_or_else(|| LayerError::missing(label.clone(), "input_feature_map_count"))?;
        let output_feature_map_count = param
            .output_feature_map_count
            .ok_or_else(|| LayerError::missing(label.clone(), "output_feature_map_count"))?;

        let window_sizes = param
            .dimension_param
            .iter()
            .enumerate()
            .map(|(i, dimension)| {
                dimension.kernel_size.ok_or_else(|| {
                    LayerError::missing(label.clone(), &format!("dimension_param[{}].kernel_size", i))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let (feature_map_connection_sparsity_ratio, feature_map_connection_count) =
            match (
                param.feature_map_connection_count,
                param.feature_map_connection_sparsity_ratio,
            ) {
                (Some(count), _) => (None, count),
                (None, Some(ratio)) => (
                    Some(ratio),
                    edge_count_from_ratio(input_feature_map_count, output_feature_map_count, ratio),
                ),
                (None, None) => {
                    return Err(LayerError::missing(label, "feature_map_connection_count"))
                }
            };

        let layer = Self {
            instance_name: self.instance_name.clone(),
            window_sizes,
            input_feature_map_count,
            output_feature_map_count,
            feature_map_connection_sparsity_ratio,
            feature_map_connection_count,
            left_zero_padding: param
                .dimension_param
                .iter()
                .map(|d| d.left_padding.unwrap_or(0))
                .collect(),
            right_zero_padding: param
                .dimension_param
                .iter()
                .map(|d| d.right_padding.unwrap_or(0))
                .collect(),
            strides: param
                .dimension_param
                .iter()
                .map(|d| d.stride.unwrap_or(1))
                .collect(),
            bias: param.bias.unwrap_or(true),
            connectivity: self.connectivity.clone(),
        };
        layer.check()?;
        *self = layer;
        Ok(())
    }

    fn describe_parameters(&self) -> Vec<String> {
        let mut geometry = if self.window_sizes.is_empty() {
            "fc".to_string()
        } else {
            join_sizes(self.window_sizes.iter().map(|s| s.to_string()))
        };
        geometry.push_str(&format!(
            ", fm {}x{}",
            self.input_feature_map_count, self.output_feature_map_count
        ));

        let has_padding = self
            .left_zero_padding
            .iter()
            .chain(&self.right_zero_padding)
            .any(|&p| p != 0);
        if has_padding {
            let padding = self
                .left_zero_padding
                .iter()
                .zip(&self.right_zero_padding)
                .map(|(&left, &right)| {
                    if left == right {
                        left.to_string()
                    } else {
                        format!("{}_{}", left, right)
                    }
                });
            geometry.push_str(&format!(", pad {}", join_sizes(padding)));
        }

        if self.strides.iter().any(|&s| s != 1) {
            geometry.push_str(&format!(
                ", stride {}",
                join_sizes(self.strides.iter().map(|s| s.to_string()))
            ));
        }

        if !self.bias {
            geometry.push_str(", w/out bias");
        }

        let sparsity = match self.feature_map_connection_sparsity_ratio {
            Some(ratio) => format!("sparsity ratio {:.5}", ratio),
            None => format!("connections {}", self.feature_map_connection_count),
        };

        vec![geometry, sparsity]
    }

    fn data_config(&self) -> Vec<usize> {
        let mut sizes = vec![self.feature_map_connection_count * self.window_volume()];
        if self.bias {
            sizes.push(self.output_feature_map_count);
        }
        sizes
    }

    fn data_custom_config(&self) -> Vec<usize> {
        // Column indices, then row offsets.
        vec![
            self.feature_map_connection_count,
            self.output_feature_map_count + 1,
        ]
    }

    fn layer_data_configuration_list(&self) -> Vec<LayerDataConfiguration> {
        let mut list = vec![LayerDataConfiguration::new(
            1,
            self.feature_map_connection_count,
            self.window_sizes.clone(),
        )];
        if self.bias {
            list.push(LayerDataConfiguration::new(
                1,
                self.output_feature_map_count,
                Vec::new(),
            ));
        }
        list
    }

    fn weight_decay_part_ids(&self) -> BTreeSet<usize> {
        BTreeSet::from([0])
    }

    fn randomize_data(
        &self,
        data: &mut LayerData,
        data_custom: &mut LayerDataCustom,
        rng: &mut dyn RngCore,
    ) -> Result<()> {
        data_custom.check_sizes(&self.data_custom_config())?;

        let pattern = connectivity::generate(
            &mut *rng,
            self.output_feature_map_count,
            self.input_feature_map_count,
            self.feature_map_connection_count,
            &self.connectivity,
        )?;
        data_custom.parts[0].copy_from_slice(pattern.column_indices());
        data_custom.parts[1].copy_from_slice(pattern.row_offsets());
        debug!(
            layer = %self.instance_name,
            connections = pattern.edge_count(),
            margin = pattern.margin(),
            "sparse connectivity initialized"
        );

        self.randomize_weights(data, data_custom, rng)
    }
}

fn join_sizes(parts: impl Iterator<Item = String>) -> String {
    parts.collect::<Vec<_>>().join("x")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::rng::SimpleRng;

    fn dense_3x3(input: usize, output: usize, connections: usize) -> SparseConvolutionLayer {
        SparseConvolutionLayer::new(
            vec![3, 3],
            input,
            output,
            Sparsity::ConnectionCount(connections),
            vec![],
            vec![],
            vec![],
            true,
        )
        .unwrap()
    }

    fn configuration_field(result: Result<SparseConvolutionLayer>) -> String {
        match result {
            Err(LayerError::Configuration { field, .. }) => field,
            other => panic!("expected configuration error, got {:?}", other),
        }
    }

    #[test]
    fn test_ratio_derives_edge_count() {
        let layer = SparseConvolutionLayer::new(
            vec![3],
            4,
            6,
            Sparsity::Ratio(0.5),
            vec![],
            vec![],
            vec![],
            true,
        )
        .unwrap();
        assert_eq!(layer.feature_map_connection_count(), 12);
        assert_eq!(layer.feature_map_connection_sparsity_ratio(), Some(0.5));
    }

    #[test]
    fn test_defaults_for_padding_and_stride() {
        let layer = dense_3x3(4, 4, 8);
        assert_eq!(layer.left_zero_padding(), &[0, 0]);
        assert_eq!(layer.right_zero_padding(), &[0, 0]);
        assert_eq!(layer.strides(), &[1, 1]);
    }

    #[test]
    fn test_check_failures_name_field() {
        let build = |window: Vec<usize>, connections: usize, left: Vec<usize>, strides: Vec<usize>| {
            SparseConvolutionLayer::new(
                window,
                4,
                6,
                Sparsity::ConnectionCount(connections),
                left,
                vec![],
                strides,
                true,
            )
        };

        assert_eq!(configuration_field(build(vec![3, 0], 12, vec![], vec![])), "window_sizes");
        assert_eq!(
            configuration_field(build(vec![3, 3], 5, vec![], vec![])),
            "feature_map_connection_count"
        );
        assert_eq!(
            configuration_field(build(vec![3, 3], 25, vec![], vec![])),
            "feature_map_connection_count"
        );
        assert_eq!(
            configuration_field(build(vec![3, 3], 12, vec![3, 0], vec![])),
            "left_zero_padding"
        );
        assert_eq!(configuration_field(build(vec![3, 3], 12, vec![], vec![1, 0])), "strides");
        assert_eq!(configuration_field(build(vec![3, 3], 12, vec![1], vec![])), "left_zero_padding");
    }

    #[test]
    fn test_right_padding_must_be_below_window() {
        let result = SparseConvolutionLayer::new(
            vec![2],
            2,
            2,
            Sparsity::ConnectionCount(2),
            vec![],
            vec![2],
            vec![],
            true,
        );
        assert_eq!(configuration_field(result), "right_zero_padding");
    }

    #[test]
    fn test_output_shape_valid_convolution() {
        let layer = dense_3x3(8, 4, 16);
        let output = layer
            .output_shape(&[ShapeDescriptor::new(8, vec![10, 10])])
            .unwrap();
        assert_eq!(output, ShapeDescriptor::new(4, vec![8, 8]));
    }

    #[test]
    fn test_output_shape_with_padding_and_stride() {
        let layer = SparseConvolutionLayer::new(
            vec![3, 5],
            2,
            3,
            Sparsity::ConnectionCount(4),
            vec![1, 2],
            vec![1, 0],
            vec![2, 1],
            true,
        )
        .unwrap();
        let output = layer
            .output_shape(&[ShapeDescriptor::new(2, vec![9, 7])])
            .unwrap();
        // (9 + 2 - 3) / 2 + 1 = 5 and (7 + 2 - 5) / 1 + 1 = 5
        assert_eq!(output.dimension_sizes, vec![5, 5]);
    }

    #[test]
    fn test_output_shape_errors() {
        let mut layer = dense_3x3(8, 4, 16);
        layer.set_instance_name("conv");

        let wrong_feature_maps = layer.output_shape(&[ShapeDescriptor::new(7, vec![10, 10])]);
        match wrong_feature_maps {
            Err(LayerError::ShapeMismatch { layer, message }) => {
                assert!(layer.contains("conv") && layer.contains("SparseConvolution"));
                assert!(message.contains('8') && message.contains('7'));
            }
            other => panic!("unexpected result {:?}", other),
        }

        assert!(layer
            .output_shape(&[ShapeDescriptor::new(8, vec![10])])
            .is_err());

        let too_small = layer.output_shape(&[ShapeDescriptor::new(8, vec![10, 2])]);
        match too_small {
            Err(LayerError::ShapeMismatch { message, .. }) => {
                assert!(message.contains("dimension (1)"));
                assert!(message.contains("(2)") && message.contains("(3)"));
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_input_shape_for_output_inverts_forward() {
        let layer = SparseConvolutionLayer::new(
            vec![3, 4],
            2,
            3,
            Sparsity::ConnectionCount(3),
            vec![1, 0],
            vec![1, 2],
            vec![2, 3],
            true,
        )
        .unwrap();
        let input = ShapeDescriptor::new(2, vec![11, 14]);
        let output = layer.output_shape(&[input.clone()]).unwrap();
        let recovered = layer.input_shape_for_output(&output, 0).unwrap();
        assert_eq!(recovered, Some(input));
    }

    #[test]
    fn test_input_shape_for_output_checks_feature_maps() {
        let layer = dense_3x3(8, 4, 16);
        assert!(layer
            .input_shape_for_output(&ShapeDescriptor::new(5, vec![8, 8]), 0)
            .is_err());
        assert!(layer
            .input_shape_for_output(&ShapeDescriptor::new(4, vec![8, 8]), 1)
            .is_err());
    }

    #[test]
    fn test_data_config_sizes() {
        let layer = dense_3x3(4, 6, 12);
        assert_eq!(layer.data_config(), vec![12 * 9, 6]);
        assert_eq!(layer.data_custom_config(), vec![12, 7]);
        assert_eq!(layer.weight_decay_part_ids(), BTreeSet::from([0]));

        let no_bias = SparseConvolutionLayer::new(
            vec![3, 3],
            4,
            6,
            Sparsity::ConnectionCount(12),
            vec![],
            vec![],
            vec![],
            false,
        )
        .unwrap();
        assert_eq!(no_bias.data_config(), vec![108]);
        assert_eq!(no_bias.layer_data_configuration_list().len(), 1);
    }

    #[test]
    fn test_compute_cost_differs_per_phase() {
        let layer = dense_3x3(4, 6, 12);
        let shapes = [ShapeDescriptor::new(4, vec![5, 5])];
        // 3x3 output neurons, 12 * 9 * 2 = 216 multiply-adds each.
        assert_eq!(layer.compute_cost(&shapes, LayerAction::Forward).unwrap(), 9.0 * 216.0);
        assert_eq!(
            layer
                .compute_cost(&shapes, LayerAction::BackwardData { input_index: 0 })
                .unwrap(),
            9.0 * 215.0
        );
        assert_eq!(
            layer.compute_cost(&shapes, LayerAction::BackwardWeights).unwrap(),
            9.0 * 216.0 + 9.0
        );
    }

    #[test]
    fn test_describe_parameters() {
        let layer = SparseConvolutionLayer::new(
            vec![3, 3],
            4,
            6,
            Sparsity::Ratio(0.5),
            vec![1, 0],
            vec![1, 1],
            vec![2, 2],
            false,
        )
        .unwrap();
        assert_eq!(
            layer.describe_parameters(),
            vec![
                "3x3, fm 4x6, pad 1x0_1, stride 2x2, w/out bias".to_string(),
                "sparsity ratio 0.50000".to_string(),
            ]
        );
        assert_eq!(layer.describe_parameters(), layer.describe_parameters());

        let fc = SparseConvolutionLayer::new(
            vec![],
            4,
            6,
            Sparsity::ConnectionCount(12),
            vec![],
            vec![],
            vec![],
            true,
        )
        .unwrap();
        assert_eq!(
            fc.describe_parameters(),
            vec!["fc, fm 4x6".to_string(), "connections 12".to_string()]
        );
    }

    #[test]
    fn test_randomize_data_fills_pattern_and_weights() {
        let layer = dense_3x3(4, 6, 12);
        let mut data = layer.create_data();
        let mut custom = layer.create_data_custom();
        let mut rng = SimpleRng::new(42);

        layer.randomize_data(&mut data, &mut custom, &mut rng).unwrap();

        assert_eq!(custom.parts[1][0], 0);
        assert_eq!(custom.parts[1][6], 12);
        assert!(custom.parts[0].iter().all(|&input| input < 4));
        assert!(data.parts[0].iter().any(|&w| w != 0.0));
        assert!(data.parts[1].iter().all(|&b| b == 0.0));
    }

    #[test]
    fn test_failed_read_record_keeps_layer() {
        let mut layer = dense_3x3(4, 6, 12);
        layer.set_instance_name("conv");
        let before = layer.clone();

        let mut record = LayerRecord::new("conv", SparseConvolutionLayer::TYPE_NAME);
        record.sparse_convolution_param = Some(SparseConvolutionParam {
            input_feature_map_count: Some(1),
            output_feature_map_count: Some(1),
            dimension_param: vec![SparseConvolutionDimensionParam::default()],
            ..SparseConvolutionParam::default()
        });
        assert!(matches!(
            layer.read_record(&record),
            Err(LayerError::MissingField { .. })
        ));
        assert_eq!(layer, before);

        record.sparse_convolution_param = Some(SparseConvolutionParam {
            input_feature_map_count: Some(1),
            output_feature_map_count: Some(1),
            feature_map_connection_count: Some(12),
            ..SparseConvolutionParam::default()
        });
        assert!(matches!(
            layer.read_record(&record),
            Err(LayerError::Configuration { .. })
        ));
        assert_eq!(layer, before);

        let mut data = layer.create_data();
        let mut custom = layer.create_data_custom();
        layer
            .randomize_data(&mut data, &mut custom, &mut SimpleRng::new(4))
            .unwrap();
    }

    #[test]
    fn test_oversized_counts_are_configuration_errors() {
        let huge_edges = SparseConvolutionLayer::new(
            vec![],
            usize::MAX / 2,
            4,
            Sparsity::ConnectionCount(usize::MAX),
            vec![],
            vec![],
            vec![],
            true,
        );
        assert_eq!(configuration_field(huge_edges), "output_feature_map_count");

        let huge_window = SparseConvolutionLayer::new(
            vec![usize::MAX, 2],
            4,
            4,
            Sparsity::ConnectionCount(4),
            vec![],
            vec![],
            vec![],
            true,
        );
        assert_eq!(configuration_field(huge_window), "window_sizes");

        let beyond_index = SparseConvolutionLayer::new(
            vec![],
            1 << 33,
            1,
            Sparsity::ConnectionCount(1 << 33),
            vec![],
            vec![],
            vec![],
            true,
        );
        assert_eq!(configuration_field(beyond_index), "feature_map_connection_count");
    }

    #[test]
    fn test_shape_overflow_is_shape_mismatch() {
        let layer = SparseConvolutionLayer::new(
            vec![3],
            2,
            2,
            Sparsity::ConnectionCount(2),
            vec![2],
            vec![2],
            vec![usize::MAX],
            true,
        )
        .unwrap();
        assert!(matches!(
            layer.output_shape(&[ShapeDescriptor::new(2, vec![usize::MAX])]),
            Err(LayerError::ShapeMismatch { .. })
        ));
        assert!(matches!(
            layer.input_shape_for_output(&ShapeDescriptor::new(2, vec![3]), 0),
            Err(LayerError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_randomize_weights_rejects_wrong_buffer() {
        let layer = dense_3x3(4, 6, 12);
        let mut data = LayerData::zeroed(&[5]);
        let custom = layer.create_data_custom();
        let mut rng = SimpleRng::new(1);
        assert!(matches!(
            layer.randomize_weights(&mut data, &custom, &mut rng),
            Err(LayerError::InvariantViolation(_))
        ));
    }
}
