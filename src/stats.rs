//! Per-feature-map statistics over layer outputs
//!
//! `StatAggregator` collects min, max, mean and standard deviation of every
//! feature map of the configured layers across any number of entries. Writers
//! reduce each buffer locally and only take the lock to merge, so it can be
//! shared between threads.

use crate::shape::ShapeDescriptor;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;
use tracing::warn;

/// Summary of one feature map.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureMapDataStat {
    pub average: f32,
    pub std_dev: f32,
    pub min: f32,
    pub max: f32,
}

#[derive(Debug, Clone, Copy)]
struct RunningStat {
    min: f32,
    max: f32,
    sum: f64,
    sum_squared: f64,
}

impl Default for RunningStat {
    fn default() -> Self {
        Self {
            min: f32::MAX,
            max: -f32::MAX,
            sum: 0.0,
            sum_squared: 0.0,
        }
    }
}

impl RunningStat {
    fn push(&mut self, value: f32) {
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.sum += value as f64;
        self.sum_squared += (value as f64) * (value as f64);
    }

    fn merge(&mut self, other: &RunningStat) {
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        self.sum += other.sum;
        self.sum_squared += other.sum_squared;
    }
}

#[derive(Debug, Default)]
struct AggregatorState {
    running_stats: BTreeMap<String, Vec<RunningStat>>,
    entry_count: u64,
}

#[derive(Debug, Default)]
pub struct StatAggregator {
    layer_shapes: BTreeMap<String, ShapeDescriptor>,
    state: Mutex<AggregatorState>,
}

impl StatAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the layers to observe and clears everything collected so far.
    pub fn set_config_map(&mut self, config_map: &BTreeMap<String, ShapeDescriptor>) {
        self.layer_shapes = config_map.clone();

        let state = self.state.get_mut().unwrap_or_else(|e| e.into_inner());
        state.entry_count = 0;
        state.running_stats = config_map
            .iter()
            .map(|(name, shape)| {
                (
                    name.clone(),
                    vec![RunningStat::default(); shape.feature_map_count],
                )
            })
            .collect();
    }

    /// Adds one entry: for each layer, a buffer laid out feature map by
    /// feature map.
    ///
    /// Layers that were not configured, or whose buffer is too short, are
    /// skipped with a warning.
    pub fn write(&self, data_map: &BTreeMap<String, &[f32]>) {
        let mut local: Vec<(&str, Vec<RunningStat>)> = Vec::with_capacity(data_map.len());
        for (layer_name, data) in data_map {
            let Some(shape) = self.layer_shapes.get(layer_name) else {
                warn!(layer = %layer_name, "statistics requested for unconfigured layer");
                continue;
            };
            let neuron_count = shape.neuron_count_per_feature_map();
            let feature_map_count = shape.feature_map_count;
            if neuron_count == 0 {
                continue;
            }

            if data.len() < feature_map_count * neuron_count {
                warn!(
                    layer = %layer_name,
                    expected = feature_map_count * neuron_count,
                    actual = data.len(),
                    "layer buffer too short for statistics"
                );
                continue;
            }

            let stats = data
                .chunks_exact(neuron_count)
                .take(feature_map_count)
                .map(|feature_map| {
                    let mut stat = RunningStat::default();
                    feature_map.iter().for_each(|&value| stat.push(value));
                    stat
                })
                .collect();
            local.push((layer_name.as_str(), stats));
        }

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        for (layer_name, stats) in local {
            if let Some(running_stats) = state.running_stats.get_mut(layer_name) {
                for (running, current) in running_stats.iter_mut().zip(&stats) {
                    running.merge(current);
                }
            }
        }
        state.entry_count += 1;
    }

    /// Number of entries written since the last `set_config_map`.
    pub fn entry_count(&self) -> u64 {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).entry_count
    }

    /// Current statistics of every configured layer.
    ///
    /// Before the first write every feature map reports zeros.
    pub fn get_stat(&self) -> BTreeMap<String, Vec<FeatureMapDataStat>> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state
            .running_stats
            .iter()
            .map(|(layer_name, running_stats)| {
                let neuron_count = self
                    .layer_shapes
                    .get(layer_name)
                    .map_or(0, ShapeDescriptor::neuron_count_per_feature_map);
                let sample_count = state.entry_count as f64 * neuron_count as f64;
                let stats = running_stats
                    .iter()
                    .map(|running| summarize(running, sample_count))
                    .collect();
                (layer_name.clone(), stats)
            })
            .collect()
    }
}

fn summarize(running: &RunningStat, sample_count: f64) -> FeatureMapDataStat {
    if sample_count == 0.0 {
        return FeatureMapDataStat {
            average: 0.0,
            std_dev: 0.0,
            min: 0.0,
            max: 0.0,
        };
    }
    let average = running.sum / sample_count;
    let average_squared = running.sum_squared / sample_count;
    FeatureMapDataStat {
        average: average as f32,
        std_dev: (average_squared - average * average).max(0.0).sqrt() as f32,
        min: running.min,
        max: running.max,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn aggregator(feature_maps: usize, dims: Vec<usize>) -> StatAggregator {
        let mut aggregator = StatAggregator::new();
        let mut config = BTreeMap::new();
        config.insert("conv".to_string(), ShapeDescriptor::new(feature_maps, dims));
        aggregator.set_config_map(&config);
        aggregator
    }

    #[test]
    fn test_single_entry_statistics() {
        let aggregator = aggregator(2, vec![2]);
        let data = [1.0f32, 3.0, -2.0, 2.0];
        aggregator.write(&BTreeMap::from([("conv".to_string(), &data[..])]));

        let all_stats = aggregator.get_stat();
        let stats = &all_stats["conv"];
        assert_eq!(stats.len(), 2);
        assert_relative_eq!(stats[0].average, 2.0);
        assert_relative_eq!(stats[0].std_dev, 1.0);
        assert_eq!((stats[0].min, stats[0].max), (1.0, 3.0));
        assert_relative_eq!(stats[1].average, 0.0);
        assert_relative_eq!(stats[1].std_dev, 2.0);
    }

    #[test]
    fn test_unknown_layer_still_counts_entry() {
        let aggregator = aggregator(1, vec![1]);
        let data = [5.0f32];
        aggregator.write(&BTreeMap::from([("other".to_string(), &data[..])]));
        assert_eq!(aggregator.entry_count(), 1);
        assert_eq!(aggregator.get_stat()["conv"][0].min, f32::MAX);
    }

    #[test]
    fn test_empty_aggregator_reports_zeros() {
        let aggregator = aggregator(3, vec![4, 4]);
        let stats = aggregator.get_stat();
        assert!(stats["conv"].iter().all(|s| s.average == 0.0 && s.std_dev == 0.0));
    }

    #[test]
    fn test_set_config_map_resets() {
        let mut aggregator = aggregator(1, vec![1]);
        let data = [5.0f32];
        aggregator.write(&BTreeMap::from([("conv".to_string(), &data[..])]));

        let mut config = BTreeMap::new();
        config.insert("fc".to_string(), ShapeDescriptor::flat(4));
        aggregator.set_config_map(&config);
        assert_eq!(aggregator.entry_count(), 0);
        assert!(aggregator.get_stat().contains_key("fc"));
        assert!(!aggregator.get_stat().contains_key("conv"));
    }
}
