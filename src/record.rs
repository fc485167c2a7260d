//! Serializable layer records
//!
//! A `LayerRecord` describes one layer of a network schema: its instance name,
//! type tag, the layers it reads from, and one optional parameter block per
//! layer variant. Optional fields are omitted on write when they carry their
//! documented default, so a record only lists what differs from the defaults.
//!
//! # Example
//!
//! ```json
//! {
//!   "name": "conv1",
//!   "type": "SparseConvolution",
//!   "input_layer_names": ["images"],
//!   "sparse_convolution_param": {
//!     "input_feature_map_count": 4,
//!     "output_feature_map_count": 6,
//!     "feature_map_connection_sparsity_ratio": 0.5,
//!     "dimension_param": [{ "kernel_size": 3 }, { "kernel_size": 3, "left_padding": 1 }]
//!   }
//! }
//! ```

use serde::{Deserialize, Serialize};

/// One layer entry of a network schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LayerRecord {
    pub name: String,

    #[serde(rename = "type")]
    pub layer_type: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub input_layer_names: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negative_log_likelihood_param: Option<NegativeLogLikelihoodParam>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix_sum_param: Option<PrefixSumParam>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sparse_convolution_param: Option<SparseConvolutionParam>,
}

impl LayerRecord {
    pub fn new(name: &str, layer_type: &str) -> Self {
        Self {
            name: name.to_string(),
            layer_type: layer_type.to_string(),
            ..Self::default()
        }
    }
}

/// Parameters of the negative log-likelihood loss. `scale` defaults to 1.0.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NegativeLogLikelihoodParam {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<f32>,
}

/// Parameters of the clamped prefix-sum layer.
///
/// `feature_map_segment_length` is required; the clamp bounds default to
/// `-f32::MAX` and `f32::MAX`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrefixSumParam {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature_map_segment_length: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clamp_min: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clamp_max: Option<f32>,
}

/// Parameters of the sparse convolution layer.
///
/// Feature-map counts are required. Exactly one of the connection count or
/// the sparsity ratio is expected; when both are present the count wins.
/// `bias` defaults to true.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SparseConvolutionParam {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_feature_map_count: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_feature_map_count: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature_map_connection_count: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature_map_connection_sparsity_ratio: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bias: Option<bool>,

    #[serde(default)]
    pub dimension_param: Vec<SparseConvolutionDimensionParam>,
}

/// Per spatial dimension window, padding and stride. Padding defaults to 0,
/// stride to 1.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SparseConvolutionDimensionParam {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kernel_size: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left_padding: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub right_padding: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stride: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_omitted_on_write() {
        let record = LayerRecord::new("loss", "NegativeLogLikelihood");
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(json, r#"{"name":"loss","type":"NegativeLogLikelihood"}"#);
    }

    #[test]
    fn test_parse_sparse_convolution_record() {
        let json = r#"{
            "name": "conv1",
            "type": "SparseConvolution",
            "input_layer_names": ["images"],
            "sparse_convolution_param": {
                "input_feature_map_count": 4,
                "output_feature_map_count": 6,
                "feature_map_connection_count": 12,
                "dimension_param": [{ "kernel_size": 3, "stride": 2 }]
            }
        }"#;
        let record: LayerRecord = serde_json::from_str(json).unwrap();
        let param = record.sparse_convolution_param.unwrap();
        assert_eq!(record.input_layer_names, vec!["images".to_string()]);
        assert_eq!(param.feature_map_connection_count, Some(12));
        assert_eq!(param.bias, None);
        assert_eq!(param.dimension_param[0].kernel_size, Some(3));
        assert_eq!(param.dimension_param[0].stride, Some(2));
        assert_eq!(param.dimension_param[0].left_padding, None);
    }
}
