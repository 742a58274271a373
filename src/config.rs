//! Engine configuration.

use crate::error::{Result, TelemetryError};
use crate::metrics::derive::EstimationModels;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration for the telemetry engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Samples kept per history series
    pub history_capacity: usize,
    /// Whether to query the accelerator driver at all
    pub enable_gpu: bool,
    /// Whether to read the module inventory before falling back
    pub enable_module_inventory: bool,
    /// Coefficients of every derived metric
    pub models: EstimationModels,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            history_capacity: crate::DEFAULT_HISTORY_CAPACITY,
            enable_gpu: true,
            enable_module_inventory: true,
            models: EstimationModels::default(),
        }
    }
}

impl EngineConfig {
    /// Create a configuration with a custom history capacity.
    pub fn new(history_capacity: usize) -> Self {
        Self {
            history_capacity,
            ..Default::default()
        }
    }

    /// Load a configuration from a JSON file. Missing keys take defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw).map_err(|e| {
            TelemetryError::config_error(format!("{}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Set the number of samples kept per history series.
    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }

    /// Enable or disable the accelerator driver.
    pub fn with_gpu(mut self, enable: bool) -> Self {
        self.enable_gpu = enable;
        self
    }

    /// Enable or disable the module inventory query.
    pub fn with_module_inventory(mut self, enable: bool) -> Self {
        self.enable_module_inventory = enable;
        self
    }

    /// Set the memory bus width assumed for accelerators.
    pub fn with_vram_bus_width(mut self, bits: u32) -> Self {
        self.models.vram_bus_width_bits = bits;
        self
    }

    /// Replace all estimation models.
    pub fn with_models(mut self, models: EstimationModels) -> Self {
        self.models = models;
        self
    }

    /// Check the configuration for values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.history_capacity == 0 {
            return Err(TelemetryError::config_error(
                "history_capacity must be at least 1",
            ));
        }
        if self.history_capacity > crate::MAX_HISTORY_CAPACITY {
            return Err(TelemetryError::config_error(format!(
                "history_capacity {} exceeds the maximum of {}",
                self.history_capacity,
                crate::MAX_HISTORY_CAPACITY
            )));
        }
        let voltage = &self.models.voltage;
        if voltage.ceiling_mv < voltage.floor_mv {
            return Err(TelemetryError::config_error(format!(
                "voltage ceiling {} mV is below floor {} mV",
                voltage.ceiling_mv, voltage.floor_mv
            )));
        }
        if self.models.memory_table.classes.is_empty() {
            return Err(TelemetryError::config_error(
                "memory bandwidth table must have at least one row",
            ));
        }
        Ok(())
    }
}
