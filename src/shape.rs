//! Tensor shape descriptors and layer actions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Feature-map count plus per-dimension spatial sizes of a tensor.
///
/// # Example
///
/// ```
/// use nn_layer_forge::ShapeDescriptor;
///
/// let shape = ShapeDescriptor::new(8, vec![10, 10]);
/// assert_eq!(shape.neuron_count_per_feature_map(), 100);
/// assert_eq!(shape.neuron_count(), 800);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShapeDescriptor {
    pub feature_map_count: usize,
    pub dimension_sizes: Vec<usize>,
}

impl ShapeDescriptor {
    pub fn new(feature_map_count: usize, dimension_sizes: Vec<usize>) -> Self {
        Self {
            feature_map_count,
            dimension_sizes,
        }
    }

    /// Shape with no spatial dimensions (one neuron per feature map).
    pub fn flat(feature_map_count: usize) -> Self {
        Self::new(feature_map_count, Vec::new())
    }

    pub fn dimension_count(&self) -> usize {
        self.dimension_sizes.len()
    }

    /// Product of the spatial sizes; 1 for a shape without dimensions.
    pub fn neuron_count_per_feature_map(&self) -> usize {
        self.dimension_sizes.iter().product()
    }

    pub fn neuron_count(&self) -> usize {
        self.neuron_count_per_feature_map() * self.feature_map_count
    }
}

impl fmt::Display for ShapeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.feature_map_count)?;
        for size in &self.dimension_sizes {
            write!(f, "x{}", size)?;
        }
        Ok(())
    }
}

/// Compute phase a cost estimate or code path is requested for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayerAction {
    Forward,
    /// Gradient with respect to the input at `input_index`.
    BackwardData { input_index: usize },
    BackwardWeights,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_neuron_counts() {
        let shape = ShapeDescriptor::new(3, vec![4, 5, 2]);
        assert_eq!(shape.dimension_count(), 3);
        assert_eq!(shape.neuron_count_per_feature_map(), 40);
        assert_eq!(shape.neuron_count(), 120);
    }

    #[test]
    fn test_flat_shape_has_single_neuron_per_feature_map() {
        let shape = ShapeDescriptor::flat(10);
        assert_eq!(shape.dimension_count(), 0);
        assert_eq!(shape.neuron_count_per_feature_map(), 1);
        assert_eq!(shape.neuron_count(), 10);
    }

    #[test]
    fn test_display() {
        assert_eq!(ShapeDescriptor::new(8, vec![10, 12]).to_string(), "8x10x12");
        assert_eq!(ShapeDescriptor::flat(4).to_string(), "4");
    }
}
