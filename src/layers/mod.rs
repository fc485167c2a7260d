//! Layer abstractions for neural networks
//!
//! This module provides the Layer trait, the weight stores layers size and
//! initialize, and the concrete layer types with the registry that creates
//! them by type tag.

mod r#trait;
pub mod connectivity;
pub mod data;
pub mod factory;
pub mod negative_log_likelihood;
pub mod prefix_sum;
pub mod sparse_convolution;

// Re-export the Layer trait for convenience
pub use r#trait::Layer;
pub use data::{LayerData, LayerDataConfiguration, LayerDataCustom};
pub use factory::LayerFactory;
pub use negative_log_likelihood::NegativeLogLikelihoodLayer;
pub use prefix_sum::PrefixSumLayer;
pub use sparse_convolution::{SparseConvolutionLayer, Sparsity};
