//! Connectivity generator configuration
//!
//! The random edge placement used by sparse convolution is a heuristic with a
//! handful of tuning constants. They are grouped here so experiments can load
//! them from JSON instead of recompiling.

use crate::error::{LayerError, Result};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fs;

/// Tuning constants for the connectivity generator.
///
/// Every field is optional in JSON; missing fields take the defaults below.
///
/// - `cursor_attempts` (20): tries pairing the cursor output with a random input
/// - `random_attempts` (100): tries with both endpoints random under the strict caps
/// - `overflow_attempts` (100): tries with both endpoints random under the overflow caps
/// - `overflow_tolerance` (0.01): relative headroom of the overflow caps
/// - `max_relaxations` (4096): margin increments allowed before giving up
///
/// # Example
///
/// ```json
/// {
///   "random_attempts": 200,
///   "overflow_tolerance": 0.05
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectivityConfig {
    pub cursor_attempts: usize,
    pub random_attempts: usize,
    pub overflow_attempts: usize,
    pub overflow_tolerance: f32,
    pub max_relaxations: usize,
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            cursor_attempts: 20,
            random_attempts: 100,
            overflow_attempts: 100,
            overflow_tolerance: 0.01,
            max_relaxations: 4096,
        }
    }
}

impl ConnectivityConfig {
    /// Checks that every attempt count and the relaxation ceiling are positive.
    pub fn validate(&self) -> Result<()> {
        if self.cursor_attempts == 0 {
            return Err(LayerError::configuration(
                "cursor_attempts",
                "must be greater than 0",
            ));
        }
        if self.random_attempts == 0 {
            return Err(LayerError::configuration(
                "random_attempts",
                "must be greater than 0",
            ));
        }
        if self.overflow_attempts == 0 {
            return Err(LayerError::configuration(
                "overflow_attempts",
                "must be greater than 0",
            ));
        }
        if !(self.overflow_tolerance >= 0.0) {
            return Err(LayerError::configuration(
                "overflow_tolerance",
                format!("must be non-negative, got {}", self.overflow_tolerance),
            ));
        }
        if self.max_relaxations == 0 {
            return Err(LayerError::configuration(
                "max_relaxations",
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// Loads a connectivity configuration from a JSON file.
///
/// # Returns
///
/// `Ok(ConnectivityConfig)` on success, or an error if the file cannot be read,
/// the JSON is invalid, or a value fails validation.
///
/// # Examples
///
/// ```no_run
/// use nn_layer_forge::config::load_config;
///
/// let cfg = load_config("config/connectivity.json").unwrap();
/// assert!(cfg.random_attempts > 0);
/// ```
pub fn load_config(path: &str) -> std::result::Result<ConnectivityConfig, Box<dyn Error>> {
    let contents = fs::read_to_string(path)?;
    let config: ConnectivityConfig = serde_json::from_str(&contents)?;
    config.validate()?;
    Ok(config)
}
