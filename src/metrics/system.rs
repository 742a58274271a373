//! Processor and memory counters via sysinfo.

use crate::error::{Result, TelemetryError};
use crate::metrics::traits::{CpuReading, CpuSource, MemoryReading, MemorySource};
use sysinfo::{Components, System};

/// Sensor labels that identify the processor package across drivers.
const PACKAGE_SENSOR_HINTS: [&str; 5] = ["package", "tctl", "tdie", "coretemp", "cpu"];

/// Hottest finite reading among sensors whose label names the processor.
pub fn package_temperature<'a>(sensors: impl IntoIterator<Item = (&'a str, f32)>) -> Option<f32> {
    sensors
        .into_iter()
        .filter(|(label, celsius)| {
            let label = label.to_ascii_lowercase();
            celsius.is_finite()
                && *celsius > 0.0
                && PACKAGE_SENSOR_HINTS.iter().any(|hint| label.contains(hint))
        })
        .map(|(_, celsius)| celsius)
        .reduce(f32::max)
}

/// Global and per-core processor load from sysinfo, plus the package
/// temperature when a sensor is exposed.
///
/// sysinfo computes usage as a delta between two refreshes, so the source
/// is primed once at initialization.
pub struct SysinfoCpuSource {
    system: System,
    components: Option<Components>,
}

impl SysinfoCpuSource {
    pub fn new() -> Self {
        Self {
            system: System::new(),
            components: None,
        }
    }

    fn temperature(&mut self) -> Option<f32> {
        let components = self.components.as_mut()?;
        components.refresh();
        package_temperature(
            components
                .list()
                .iter()
                .map(|component| (component.label(), component.temperature())),
        )
    }
}

impl Default for SysinfoCpuSource {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuSource for SysinfoCpuSource {
    fn prime(&mut self) -> Result<()> {
        self.system.refresh_cpu_usage();
        if self.system.cpus().is_empty() {
            return Err(TelemetryError::unavailable("CPU", "no processors reported"));
        }
        let components = Components::new_with_refreshed_list();
        tracing::debug!("Found {} temperature sensors", components.list().len());
        self.components = Some(components);
        Ok(())
    }

    fn sample(&mut self) -> Result<CpuReading> {
        self.system.refresh_cpu_usage();
        if self.system.cpus().is_empty() {
            return Err(TelemetryError::unavailable("CPU", "no processors reported"));
        }
        let usage = self.system.global_cpu_usage();
        if !usage.is_finite() {
            return Err(TelemetryError::transient("non-finite CPU usage"));
        }
        let core_utilization = self.system.cpus().iter().map(|cpu| cpu.cpu_usage()).collect();
        Ok(CpuReading {
            utilization: usage,
            core_utilization,
            temperature_celsius: self.temperature(),
        })
    }

    fn release(&mut self) {
        self.components = None;
    }
}

/// Physical memory status from sysinfo.
pub struct SysinfoMemorySource {
    system: System,
}

impl SysinfoMemorySource {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }
}

impl Default for SysinfoMemorySource {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySource for SysinfoMemorySource {
    fn sample(&mut self) -> Result<MemoryReading> {
        self.system.refresh_memory();
        let total_bytes = self.system.total_memory();
        if total_bytes == 0 {
            return Err(TelemetryError::transient("memory status reported zero total"));
        }
        Ok(MemoryReading {
            total_bytes,
            available_bytes: self.system.available_memory(),
        })
    }
}
