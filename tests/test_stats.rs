//! Tests for the statistics aggregator
//!
//! This file tests the stats module including:
//! - Per-feature-map statistics across several entries
//! - Concurrent writers sharing one aggregator
//! - Unconfigured layers and short buffers

use approx::assert_relative_eq;
use nn_layer_forge::stats::StatAggregator;
use nn_layer_forge::ShapeDescriptor;
use std::collections::BTreeMap;
use std::thread;

fn configured(layers: &[(&str, ShapeDescriptor)]) -> StatAggregator {
    let mut aggregator = StatAggregator::new();
    let config: BTreeMap<String, ShapeDescriptor> = layers
        .iter()
        .map(|(name, shape)| (name.to_string(), shape.clone()))
        .collect();
    aggregator.set_config_map(&config);
    aggregator
}

// ============================================================================
// Aggregation Tests
// ============================================================================

mod aggregation_tests {
    use super::*;

    #[test]
    fn test_statistics_across_entries() {
        let aggregator = configured(&[("fc", ShapeDescriptor::flat(2))]);
        for entry in [[1.0f32, 10.0], [3.0, 10.0], [5.0, 10.0]] {
            aggregator.write(&BTreeMap::from([("fc".to_string(), &entry[..])]));
        }

        let stats = aggregator.get_stat();
        let fc = &stats["fc"];
        assert_eq!(aggregator.entry_count(), 3);
        assert_relative_eq!(fc[0].average, 3.0);
        assert_relative_eq!(fc[0].std_dev, (8.0f32 / 3.0).sqrt(), max_relative = 1e-6);
        assert_eq!((fc[0].min, fc[0].max), (1.0, 5.0));
        assert_relative_eq!(fc[1].average, 10.0);
        assert_relative_eq!(fc[1].std_dev, 0.0);
    }

    #[test]
    fn test_multiple_layers_in_one_write() {
        let aggregator = configured(&[
            ("a", ShapeDescriptor::new(1, vec![2])),
            ("b", ShapeDescriptor::new(2, vec![1])),
        ]);
        let a = [2.0f32, 4.0];
        let b = [-1.0f32, 1.0];
        aggregator.write(&BTreeMap::from([
            ("a".to_string(), &a[..]),
            ("b".to_string(), &b[..]),
        ]));

        let stats = aggregator.get_stat();
        assert_relative_eq!(stats["a"][0].average, 3.0);
        assert_eq!(stats["b"][0].min, -1.0);
        assert_eq!(stats["b"][1].max, 1.0);
    }

    #[test]
    fn test_short_buffer_is_skipped() {
        let aggregator = configured(&[("fc", ShapeDescriptor::flat(4))]);
        let short = [1.0f32, 2.0];
        aggregator.write(&BTreeMap::from([("fc".to_string(), &short[..])]));
        let full = [1.0f32, 2.0, 3.0, 4.0];
        aggregator.write(&BTreeMap::from([("fc".to_string(), &full[..])]));

        let stats = aggregator.get_stat();
        assert_eq!(stats["fc"][2].max, 3.0);
        assert_eq!(aggregator.entry_count(), 2);
    }
}

// ============================================================================
// Concurrency Tests
// ============================================================================

mod concurrency_tests {
    use super::*;

    #[test]
    fn test_concurrent_writers() {
        let aggregator = configured(&[("conv", ShapeDescriptor::new(3, vec![2, 2]))]);

        thread::scope(|scope| {
            for worker in 0..8 {
                let aggregator = &aggregator;
                scope.spawn(move || {
                    for entry in 0..50 {
                        let value = (worker * 50 + entry) as f32;
                        let data = vec![value; 12];
                        aggregator.write(&BTreeMap::from([("conv".to_string(), data.as_slice())]));
                    }
                });
            }
        });

        assert_eq!(aggregator.entry_count(), 400);
        let stats = aggregator.get_stat();
        for stat in &stats["conv"] {
            assert_eq!(stat.min, 0.0);
            assert_eq!(stat.max, 399.0);
            assert_relative_eq!(stat.average, 199.5, max_relative = 1e-6);
        }
    }
}
