//! Registry of layer prototypes keyed by type tag
//!
//! A factory is an ordinary value owned by whoever builds networks; there is
//! no process-wide instance. Layers are produced by cloning the registered
//! prototype, so a new layer starts from the prototype's configuration until
//! a record is read into it.

use crate::error::{LayerError, Result};
use crate::layers::{Layer, NegativeLogLikelihoodLayer, PrefixSumLayer, SparseConvolutionLayer};
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct LayerFactory {
    prototypes: BTreeMap<String, Box<dyn Layer>>,
    type_ids: BTreeMap<String, u32>,
    next_type_id: u32,
}

impl LayerFactory {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every layer variant defined in this crate.
    pub fn with_builtin_layers() -> Self {
        let mut factory = Self::new();
        factory.register_layer(Box::new(NegativeLogLikelihoodLayer::default()));
        factory.register_layer(Box::new(PrefixSumLayer::default()));
        factory.register_layer(Box::new(SparseConvolutionLayer::default()));
        factory
    }

    /// Registers `prototype` under its type tag.
    ///
    /// Returns `false`, leaving the registry unchanged, when the tag is taken.
    pub fn register_layer(&mut self, prototype: Box<dyn Layer>) -> bool {
        let type_name = prototype.type_name().to_string();
        if self.prototypes.contains_key(&type_name) {
            return false;
        }

        debug!(layer_type = %type_name, type_id = self.next_type_id, "registered layer type");
        self.type_ids.insert(type_name.clone(), self.next_type_id);
        self.next_type_id += 1;
        self.prototypes.insert(type_name, prototype);
        true
    }

    /// Removes the prototype for `type_name`. Its id is not reused.
    pub fn unregister_layer(&mut self, type_name: &str) -> bool {
        self.type_ids.remove(type_name);
        self.prototypes.remove(type_name).is_some()
    }

    /// Fresh copy of the prototype registered for `type_name`.
    pub fn create_layer(&self, type_name: &str) -> Result<Box<dyn Layer>> {
        self.prototypes
            .get(type_name)
            .map(|prototype| prototype.clone_box())
            .ok_or_else(|| LayerError::UnknownLayerType(type_name.to_string()))
    }

    pub fn layer_type_id(&self, type_name: &str) -> Option<u32> {
        self.type_ids.get(type_name).copied()
    }

    pub fn is_registered(&self, type_name: &str) -> bool {
        self.prototypes.contains_key(type_name)
    }

    /// Registered type tags in sorted order.
    pub fn layer_types(&self) -> impl Iterator<Item = &str> {
        self.prototypes.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_layers_registered_in_order() {
        let factory = LayerFactory::with_builtin_layers();
        assert_eq!(factory.layer_type_id(NegativeLogLikelihoodLayer::TYPE_NAME), Some(0));
        assert_eq!(factory.layer_type_id(PrefixSumLayer::TYPE_NAME), Some(1));
        assert_eq!(factory.layer_type_id(SparseConvolutionLayer::TYPE_NAME), Some(2));
        assert_eq!(factory.layer_types().count(), 3);
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut factory = LayerFactory::with_builtin_layers();
        assert!(!factory.register_layer(Box::new(PrefixSumLayer::default())));
        assert_eq!(factory.layer_type_id(PrefixSumLayer::TYPE_NAME), Some(1));
    }

    #[test]
    fn test_create_unknown_layer() {
        let factory = LayerFactory::new();
        match factory.create_layer("Dense") {
            Err(LayerError::UnknownLayerType(name)) => assert_eq!(name, "Dense"),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_created_layers_are_independent() {
        let factory = LayerFactory::with_builtin_layers();
        let mut first = factory.create_layer(PrefixSumLayer::TYPE_NAME).unwrap();
        first.set_instance_name("a");
        let second = factory.create_layer(PrefixSumLayer::TYPE_NAME).unwrap();
        assert_eq!(second.instance_name(), "");
    }

    #[test]
    fn test_unregister_does_not_reuse_ids() {
        let mut factory = LayerFactory::with_builtin_layers();
        assert!(factory.unregister_layer(NegativeLogLikelihoodLayer::TYPE_NAME));
        assert!(!factory.unregister_layer(NegativeLogLikelihoodLayer::TYPE_NAME));
        assert!(!factory.is_registered(NegativeLogLikelihoodLayer::TYPE_NAME));

        assert!(factory.register_layer(Box::new(NegativeLogLikelihoodLayer::default())));
        assert_eq!(factory.layer_type_id(NegativeLogLikelihoodLayer::TYPE_NAME), Some(3));
    }
}
