//! Counter source traits.
//!
//! Every hardware or OS telemetry source sits behind one of these traits.
//! A source is pull-based: the engine calls `sample` once per tick and the
//! source either returns a reading or an error describing why it could not.
//! Sources may keep internal handles between calls (a driver context, a
//! previous counter value) and must drop them in `release`.

use crate::error::Result;

/// Raw attributes of one accelerator for one tick.
///
/// Each attribute is optional: `None` means this particular read failed and
/// the previous value should be kept.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GpuReading {
    pub name: Option<String>,
    /// Core utilization in percent
    pub utilization: Option<f32>,
    /// Memory controller utilization in percent
    pub memory_controller_load: Option<f32>,
    /// (used, total) video memory in bytes
    pub memory_bytes: Option<(u64, u64)>,
    pub temperature_celsius: Option<f32>,
    pub core_clock_mhz: Option<u32>,
    pub memory_clock_mhz: Option<u32>,
    pub fan_percent: Option<f32>,
    pub power_draw_watts: Option<f32>,
    /// Upper power-limit constraint in watts
    pub power_limit_watts: Option<f32>,
    pub encoder_load: Option<f32>,
    pub decoder_load: Option<f32>,
    /// Direct core voltage reading in mV, when the driver exposes one
    pub voltage_mv: Option<f32>,
    pub pcie_link_width: Option<u32>,
    pub pcie_generation: Option<u32>,
}

/// Accelerator driver.
pub trait GpuSource: Send {
    /// Number of devices. Called once at initialization.
    fn enumerate(&mut self) -> Result<u32>;

    /// Read all attributes of device `index`.
    fn sample(&mut self, index: u32) -> Result<GpuReading>;

    /// Drop driver handles. Must tolerate being called without a prior
    /// `enumerate` and being called more than once.
    fn release(&mut self) {}
}

/// Processor load for one tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CpuReading {
    /// Whole-package utilization in percent
    pub utilization: f32,
    /// Per logical core, in percent. Empty when the source cannot split it.
    pub core_utilization: Vec<f32>,
    /// Package temperature, when a sensor is exposed
    pub temperature_celsius: Option<f32>,
}

impl CpuReading {
    /// A reading with only the package figure.
    pub fn new(utilization: f32) -> Self {
        Self {
            utilization,
            ..Default::default()
        }
    }
}

/// System-wide processor load counter.
pub trait CpuSource: Send {
    /// Establish the baseline for delta-based counters.
    fn prime(&mut self) -> Result<()> {
        Ok(())
    }

    fn sample(&mut self) -> Result<CpuReading>;

    fn release(&mut self) {}
}

/// Physical memory status in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryReading {
    pub total_bytes: u64,
    pub available_bytes: u64,
}

/// Physical memory status query.
pub trait MemorySource: Send {
    fn sample(&mut self) -> Result<MemoryReading>;

    fn release(&mut self) {}
}

/// What the operating system says about a volume's medium.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportedMedium {
    Rotational,
    SolidState,
    Unknown,
}

/// Static description of a fixed volume.
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeInfo {
    /// Block device name without the `/dev/` prefix
    pub device: String,
    pub mount_point: String,
    pub total_bytes: u64,
    pub medium: ReportedMedium,
    pub model: Option<String>,
}

/// Read and write throughput of a volume in bytes per second.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DiskThroughput {
    pub read_bytes_per_sec: f64,
    pub write_bytes_per_sec: f64,
}

/// Per-volume I/O counters.
pub trait DiskSource: Send {
    /// List fixed volumes. Called once, on the first disk tick.
    fn enumerate(&mut self) -> Result<Vec<VolumeInfo>>;

    /// One throughput result per enumerated volume, in enumeration order.
    /// A failure of one volume must not hide the others.
    fn sample(&mut self) -> Vec<Result<DiskThroughput>>;

    fn release(&mut self) {}
}

/// One module from an authoritative hardware inventory.
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleRecord {
    pub locator: String,
    pub bank_locator: Option<String>,
    pub capacity_gb: f32,
    pub speed_mhz: Option<u32>,
    pub memory_type: Option<String>,
}

/// Memory module inventory.
pub trait ModuleInventorySource: Send {
    /// Installed modules. An error or an empty list sends the engine to the
    /// synthesized layout.
    fn inventory(&mut self) -> Result<Vec<ModuleRecord>>;

    fn release(&mut self) {}
}
