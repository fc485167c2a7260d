//! Network schemas and the layer graphs built from them
//!
//! A schema is an ordered list of layer records stored as JSON. Building a
//! topology instantiates every record through a `LayerFactory` and checks the
//! wiring: names are unique and a layer only reads from earlier layers or from
//! external data (any input name no layer in the schema defines).

use crate::error::LayerError;
use crate::layers::{Layer, LayerData, LayerDataCustom, LayerFactory};
use crate::record::LayerRecord;
use crate::shape::{LayerAction, ShapeDescriptor};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

/// Errors raised while loading, saving or wiring a network schema.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("failed to access schema file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid schema JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("layer \"{name}\" is invalid: {source}")]
    Layer {
        name: String,
        #[source]
        source: LayerError,
    },

    #[error("layer name \"{0}\" is used more than once")]
    DuplicateLayer(String),

    /// The input names the layer itself or a layer defined after it.
    #[error("layer \"{layer}\" reads from \"{input}\", which is not defined before it")]
    UnknownInput { layer: String, input: String },

    #[error("no shape given for external input \"{0}\"")]
    MissingInputShape(String),
}

/// Ordered list of layer records.
///
/// # Example
///
/// ```json
/// {
///   "layers": [
///     {
///       "name": "conv1",
///       "type": "SparseConvolution",
///       "input_layer_names": ["images"],
///       "sparse_convolution_param": {
///         "input_feature_map_count": 3,
///         "output_feature_map_count": 8,
///         "feature_map_connection_count": 12,
///         "dimension_param": [{ "kernel_size": 3 }, { "kernel_size": 3 }]
///       }
///     }
///   ]
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkSchema {
    pub layers: Vec<LayerRecord>,
}

impl NetworkSchema {
    /// Reads a schema from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the file cannot be read and `Json` if it does not parse.
    pub fn load_schema(path: impl AsRef<Path>) -> Result<Self, SchemaError> {
        let contents = fs::read_to_string(path)?;
        let schema: NetworkSchema = serde_json::from_str(&contents)?;
        Ok(schema)
    }

    /// Writes the schema as pretty-printed JSON.
    pub fn save_schema(&self, path: impl AsRef<Path>) -> Result<(), SchemaError> {
        let contents = serde_json::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct TopologyNode {
    layer: Box<dyn Layer>,
    input_layer_names: Vec<String>,
}

/// Layers instantiated from a schema, in schema order.
#[derive(Debug, Clone)]
pub struct NetworkTopology {
    nodes: Vec<TopologyNode>,
}

impl NetworkTopology {
    /// Instantiates every record of `schema` through `factory`.
    ///
    /// # Errors
    ///
    /// * `DuplicateLayer` if two records share a name
    /// * `UnknownInput` if a layer reads from itself or a later layer
    /// * `Layer` if the type tag is unknown or the record fails to load
    pub fn from_schema(schema: &NetworkSchema, factory: &LayerFactory) -> Result<Self, SchemaError> {
        let all_names: BTreeSet<&str> = schema.layers.iter().map(|r| r.name.as_str()).collect();
        let mut defined: BTreeSet<&str> = BTreeSet::new();
        let mut nodes = Vec::with_capacity(schema.layers.len());

        for record in &schema.layers {
            if defined.contains(record.name.as_str()) {
                return Err(SchemaError::DuplicateLayer(record.name.clone()));
            }

            for input in &record.input_layer_names {
                let is_layer = all_names.contains(input.as_str());
                if is_layer && !defined.contains(input.as_str()) {
                    return Err(SchemaError::UnknownInput {
                        layer: record.name.clone(),
                        input: input.clone(),
                    });
                }
            }

            let wrap = |source| SchemaError::Layer {
                name: record.name.clone(),
                source,
            };
            let mut layer = factory.create_layer(&record.layer_type).map_err(wrap)?;
            layer.set_instance_name(&record.name);
            layer.read_record(record).map_err(wrap)?;
            debug!(layer = %record.name, layer_type = %record.layer_type, "layer loaded");

            defined.insert(record.name.as_str());
            nodes.push(TopologyNode {
                layer,
                input_layer_names: record.input_layer_names.clone(),
            });
        }

        info!(layer_count = nodes.len(), "network topology built");
        Ok(Self { nodes })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Finds a layer by instance name.
    pub fn layer(&self, name: &str) -> Option<&dyn Layer> {
        self.nodes
            .iter()
            .find(|node| node.layer.instance_name() == name)
            .map(|node| &*node.layer as &dyn Layer)
    }

    pub fn layers(&self) -> impl Iterator<Item = &dyn Layer> {
        self.nodes.iter().map(|node| &*node.layer as &dyn Layer)
    }

    /// Names of the inputs that are not produced by any layer.
    pub fn external_inputs(&self) -> BTreeSet<String> {
        let layer_names: BTreeSet<&str> = self.nodes.iter().map(|n| n.layer.instance_name()).collect();
        self.nodes
            .iter()
            .flat_map(|node| node.input_layer_names.iter())
            .filter(|input| !layer_names.contains(input.as_str()))
            .cloned()
            .collect()
    }

    /// Propagates shapes from the external inputs through every layer.
    ///
    /// Returns the output shape of every layer keyed by name.
    pub fn output_shapes(
        &self,
        external_inputs: &BTreeMap<String, ShapeDescriptor>,
    ) -> Result<BTreeMap<String, ShapeDescriptor>, SchemaError> {
        let mut shapes = BTreeMap::new();
        for node in &self.nodes {
            let input_shapes = Self::gather_input_shapes(node, &shapes, external_inputs)?;
            let output = node
                .layer
                .output_shape(&input_shapes)
                .map_err(|source| Self::layer_error(node, source))?;
            shapes.insert(node.layer.instance_name().to_string(), output);
        }
        Ok(shapes)
    }

    /// Total forward cost per entry over all layers.
    pub fn forward_flops(&self, external_inputs: &BTreeMap<String, ShapeDescriptor>) -> Result<f32, SchemaError> {
        let mut shapes = BTreeMap::new();
        let mut flops = 0.0f32;
        for node in &self.nodes {
            let input_shapes = Self::gather_input_shapes(node, &shapes, external_inputs)?;
            let output = node
                .layer
                .output_shape(&input_shapes)
                .map_err(|source| Self::layer_error(node, source))?;
            flops += node
                .layer
                .compute_cost(&input_shapes, LayerAction::Forward)
                .map_err(|source| Self::layer_error(node, source))?;
            shapes.insert(node.layer.instance_name().to_string(), output);
        }
        Ok(flops)
    }

    /// Creates and randomly initializes the weight stores of every layer.
    ///
    /// Layers without learnable parameters get empty stores.
    pub fn initialize_data(
        &self,
        rng: &mut dyn RngCore,
    ) -> Result<BTreeMap<String, (LayerData, LayerDataCustom)>, SchemaError> {
        let mut stores = BTreeMap::new();
        for node in &self.nodes {
            let mut data = node.layer.create_data();
            let mut data_custom = node.layer.create_data_custom();
            node.layer
                .randomize_data(&mut data, &mut data_custom, &mut *rng)
                .map_err(|source| Self::layer_error(node, source))?;
            stores.insert(node.layer.instance_name().to_string(), (data, data_custom));
        }
        Ok(stores)
    }

    /// Writes every layer back into a schema.
    pub fn to_schema(&self) -> NetworkSchema {
        let layers = self
            .nodes
            .iter()
            .map(|node| {
                let mut record = LayerRecord::new(node.layer.instance_name(), node.layer.type_name());
                record.input_layer_names = node.input_layer_names.clone();
                node.layer.write_record(&mut record);
                record
            })
            .collect();
        NetworkSchema { layers }
    }

    /// One line per layer: name, type and its non-empty parameter strings.
    pub fn parameter_summary(&self) -> Vec<String> {
        self.nodes
            .iter()
            .map(|node| {
                let parameters: Vec<String> = node
                    .layer
                    .describe_parameters()
                    .into_iter()
                    .filter(|s| !s.is_empty())
                    .collect();
                let mut line = format!("{} ({})", node.layer.instance_name(), node.layer.type_name());
                if !parameters.is_empty() {
                    line.push_str(": ");
                    line.push_str(&parameters.join("; "));
                }
                line
            })
            .collect()
    }

    fn gather_input_shapes(
        node: &TopologyNode,
        layer_shapes: &BTreeMap<String, ShapeDescriptor>,
        external_inputs: &BTreeMap<String, ShapeDescriptor>,
    ) -> Result<Vec<ShapeDescriptor>, SchemaError> {
        node.input_layer_names
            .iter()
            .map(|name| {
                layer_shapes
                    .get(name)
                    .or_else(|| external_inputs.get(name))
                    .cloned()
                    .ok_or_else(|| SchemaError::MissingInputShape(name.clone()))
            })
            .collect()
    }

    fn layer_error(node: &TopologyNode, source: LayerError) -> SchemaError {
        SchemaError::Layer {
            name: node.layer.instance_name().to_string(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::{NegativeLogLikelihoodLayer, PrefixSumLayer};

    fn record(name: &str, layer_type: &str, inputs: &[&str]) -> LayerRecord {
        let mut record = LayerRecord::new(name, layer_type);
        record.input_layer_names = inputs.iter().map(|s| s.to_string()).collect();
        record
    }

    fn prefix_sum(name: &str, inputs: &[&str], segment_length: usize) -> LayerRecord {
        let mut record = record(name, PrefixSumLayer::TYPE_NAME, inputs);
        PrefixSumLayer::new(segment_length)
            .unwrap()
            .write_record(&mut record);
        record
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let schema = NetworkSchema {
            layers: vec![prefix_sum("a", &["x"], 1), prefix_sum("a", &["x"], 1)],
        };
        let err = NetworkTopology::from_schema(&schema, &LayerFactory::with_builtin_layers()).unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateLayer(name) if name == "a"));
    }

    #[test]
    fn test_forward_reference_rejected() {
        let schema = NetworkSchema {
            layers: vec![prefix_sum("a", &["b"], 1), prefix_sum("b", &["x"], 1)],
        };
        let err = NetworkTopology::from_schema(&schema, &LayerFactory::with_builtin_layers()).unwrap_err();
        assert!(matches!(err, SchemaError::UnknownInput { layer, input } if layer == "a" && input == "b"));
    }

    #[test]
    fn test_external_inputs_collected() {
        let schema = NetworkSchema {
            layers: vec![
                prefix_sum("a", &["x"], 1),
                record("loss", NegativeLogLikelihoodLayer::TYPE_NAME, &["a", "labels"]),
            ],
        };
        let topology = NetworkTopology::from_schema(&schema, &LayerFactory::with_builtin_layers()).unwrap();
        let expected: BTreeSet<String> = ["labels".to_string(), "x".to_string()].into_iter().collect();
        assert_eq!(topology.external_inputs(), expected);
    }

    #[test]
    fn test_missing_external_shape() {
        let schema = NetworkSchema {
            layers: vec![prefix_sum("a", &["x"], 1)],
        };
        let topology = NetworkTopology::from_schema(&schema, &LayerFactory::with_builtin_layers()).unwrap();
        let err = topology.output_shapes(&BTreeMap::new()).unwrap_err();
        assert!(matches!(err, SchemaError::MissingInputShape(name) if name == "x"));
    }

    #[test]
    fn test_parameter_summary_skips_empty_strings() {
        let schema = NetworkSchema {
            layers: vec![
                prefix_sum("cumsum", &["x"], 2),
                record("loss", NegativeLogLikelihoodLayer::TYPE_NAME, &["cumsum", "labels"]),
            ],
        };
        let topology = NetworkTopology::from_schema(&schema, &LayerFactory::with_builtin_layers()).unwrap();
        assert_eq!(
            topology.parameter_summary(),
            vec![
                "cumsum (PrefixSum): segment length 2".to_string(),
                "loss (NegativeLogLikelihood)".to_string(),
            ]
        );
    }
}
