//! Weight stores owned by layer instances.

use crate::error::{LayerError, Result};
use serde::{Deserialize, Serialize};

/// One `f32` buffer per learnable parameter group (e.g. weights, bias).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LayerData {
    pub parts: Vec<Vec<f32>>,
}

impl LayerData {
    pub fn zeroed(sizes: &[usize]) -> Self {
        Self {
            parts: sizes.iter().map(|&size| vec![0.0f32; size]).collect(),
        }
    }

    pub fn sizes(&self) -> Vec<usize> {
        self.parts.iter().map(Vec::len).collect()
    }

    /// Fails unless the buffer sizes equal `expected`.
    pub fn check_sizes(&self, expected: &[usize]) -> Result<()> {
        check_part_sizes("layer data", &self.sizes(), expected)
    }
}

/// Integer side buffers such as compressed sparsity indices.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LayerDataCustom {
    pub parts: Vec<Vec<u32>>,
}

impl LayerDataCustom {
    pub fn zeroed(sizes: &[usize]) -> Self {
        Self {
            parts: sizes.iter().map(|&size| vec![0u32; size]).collect(),
        }
    }

    pub fn sizes(&self) -> Vec<usize> {
        self.parts.iter().map(Vec::len).collect()
    }

    pub fn check_sizes(&self, expected: &[usize]) -> Result<()> {
        check_part_sizes("layer custom data", &self.sizes(), expected)
    }
}

fn check_part_sizes(what: &str, actual: &[usize], expected: &[usize]) -> Result<()> {
    if actual != expected {
        return Err(LayerError::InvariantViolation(format!(
            "{} part sizes {:?} do not match layer configuration {:?}",
            what, actual, expected
        )));
    }
    Ok(())
}

/// Shape of one learnable parameter group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerDataConfiguration {
    pub input_feature_map_count: usize,
    pub output_feature_map_count: usize,
    pub dimension_sizes: Vec<usize>,
}

impl LayerDataConfiguration {
    pub fn new(
        input_feature_map_count: usize,
        output_feature_map_count: usize,
        dimension_sizes: Vec<usize>,
    ) -> Self {
        Self {
            input_feature_map_count,
            output_feature_map_count,
            dimension_sizes,
        }
    }
}
