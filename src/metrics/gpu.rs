//! NVIDIA accelerator counters through NVML.

use crate::error::{Result, TelemetryError};
use crate::metrics::traits::{GpuReading, GpuSource};
use nvml_wrapper::enum_wrappers::device::{Clock, TemperatureSensor};
use nvml_wrapper::error::NvmlError;
use nvml_wrapper::Nvml;

/// GPU source backed by the NVML driver library.
///
/// The library handle is opened by `enumerate` and closed by `release`.
/// Device handles are re-acquired by index on every sample so a device
/// that disappears surfaces as a structural error rather than a stale
/// handle.
#[derive(Default)]
pub struct NvmlGpuSource {
    nvml: Option<Nvml>,
}

impl NvmlGpuSource {
    pub fn new() -> Self {
        Self::default()
    }

    fn nvml(&self) -> Result<&Nvml> {
        self.nvml
            .as_ref()
            .ok_or_else(|| TelemetryError::unavailable("GPU", "NVML not initialized"))
    }
}

/// Reduce one attribute read to `Some`/`None`, escalating only failures
/// that invalidate the whole device.
fn attribute<T>(read: std::result::Result<T, NvmlError>) -> Result<Option<T>> {
    match read {
        Ok(value) => Ok(Some(value)),
        Err(NvmlError::GpuLost) => Err(TelemetryError::Nvml(NvmlError::GpuLost)),
        Err(err) => {
            tracing::trace!("NVML attribute read failed: {}", err);
            Ok(None)
        }
    }
}

impl GpuSource for NvmlGpuSource {
    fn enumerate(&mut self) -> Result<u32> {
        if self.nvml.is_none() {
            let nvml = Nvml::init()
                .map_err(|e| TelemetryError::unavailable("GPU", e.to_string()))?;
            self.nvml = Some(nvml);
        }
        Ok(self.nvml()?.device_count()?)
    }

    fn sample(&mut self, index: u32) -> Result<GpuReading> {
        let device = self.nvml()?.device_by_index(index)?;

        let utilization = attribute(device.utilization_rates())?;
        let memory = attribute(device.memory_info())?;
        let power_limit = attribute(device.power_management_limit_constraints())?;

        Ok(GpuReading {
            name: attribute(device.name())?,
            utilization: utilization.as_ref().map(|u| u.gpu as f32),
            memory_controller_load: utilization.as_ref().map(|u| u.memory as f32),
            memory_bytes: memory.map(|m| (m.used, m.total)),
            temperature_celsius: attribute(device.temperature(TemperatureSensor::Gpu))?
                .map(|t| t as f32),
            core_clock_mhz: attribute(device.clock_info(Clock::Graphics))?,
            memory_clock_mhz: attribute(device.clock_info(Clock::Memory))?,
            fan_percent: attribute(device.fan_speed(0))?.map(|f| f as f32),
            power_draw_watts: attribute(device.power_usage())?.map(|mw| mw as f32 / 1000.0),
            power_limit_watts: power_limit.map(|c| c.max_limit as f32 / 1000.0),
            encoder_load: attribute(device.encoder_utilization())?
                .map(|e| e.utilization as f32),
            decoder_load: attribute(device.decoder_utilization())?
                .map(|d| d.utilization as f32),
            // NVML has no core voltage query
            voltage_mv: None,
            pcie_link_width: attribute(device.current_pcie_link_width())?,
            pcie_generation: attribute(device.current_pcie_link_gen())?,
        })
    }

    fn release(&mut self) {
        if let Some(nvml) = self.nvml.take() {
            if let Err(e) = nvml.shutdown() {
                tracing::warn!("NVML shutdown failed: {}", e);
            }
        }
    }
}
