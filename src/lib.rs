//! Neural network layer definitions
//!
//! This library describes network layers independently of any compute
//! backend: shape inference in both directions, per-entry cost estimates,
//! typed parameter records and weight-store initialization.
//!
//! # Modules
//!
//! - `shape`: Shape descriptors and layer actions
//! - `layers`: Layer trait, weight stores, layer types and the type registry
//! - `record`: Serializable layer records
//! - `topology`: Network schemas and shape propagation over a layer graph
//! - `stats`: Per-feature-map statistics over layer outputs
//! - `config`: Connectivity generator configuration
//! - `utils`: Seedable random number generator

pub mod config;
pub mod error;
pub mod layers;
pub mod record;
pub mod shape;
pub mod stats;
pub mod topology;
pub mod utils;

pub use error::{LayerError, Result};
pub use shape::{LayerAction, ShapeDescriptor};
