//! Data structures for the normalized telemetry snapshot.

use crate::metrics::history::HistoryRing;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The complete set of metrics published at the end of one update cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    /// Number of completed update cycles
    pub tick: u64,
    /// When the last cycle was published (None before the first update)
    pub timestamp: Option<DateTime<Utc>>,
    /// One entry per enumerated accelerator
    pub gpus: Vec<GpuMetric>,
    /// System-wide CPU load
    pub cpu: CpuMetric,
    /// Physical memory and module layout
    pub memory: MemoryMetric,
    /// One entry per fixed volume
    pub disks: Vec<DiskMetric>,
    /// Aggregate per-bus bandwidth
    pub bandwidth: SystemBandwidthMetric,
}

/// One physical accelerator.
///
/// Values read directly from the driver sit next to derived estimates
/// (voltage, PCIe throughput, transfer wait). Derived fields are zero until
/// their inputs are known.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpuMetric {
    /// Whether the last sampling attempt reached the device
    pub available: bool,
    /// Marketing name reported by the driver
    pub name: String,
    /// Core utilization percentage (0.0 to 100.0)
    pub utilization: f32,
    /// Used video memory in MB
    pub memory_used_mb: f32,
    /// Total video memory in MB
    pub memory_total_mb: f32,
    /// Video memory usage percentage (0.0 to 100.0)
    pub memory_percent: f32,
    /// Core temperature in Celsius
    pub temperature_celsius: f32,
    /// Graphics clock in MHz
    pub core_clock_mhz: u32,
    /// Memory clock in MHz
    pub memory_clock_mhz: u32,
    /// Fan speed percentage (0.0 to 100.0)
    pub fan_percent: f32,
    /// Power draw in watts
    pub power_draw_watts: f32,
    /// Upper power-limit constraint in watts
    pub power_limit_watts: f32,
    /// Memory controller load percentage (0.0 to 100.0)
    pub memory_controller_load: f32,
    /// Video engine load percentage, max of encoder and decoder
    pub video_engine_load: f32,
    /// Estimated or measured core voltage in mV
    pub current_voltage_mv: f32,
    /// Estimated maximum core voltage in mV
    pub max_voltage_mv: f32,
    /// Position of the current voltage in the model range (0.0 to 100.0)
    pub voltage_percent: f32,
    /// PCIe link width in lanes
    pub pcie_link_width: u32,
    /// PCIe link generation
    pub pcie_generation: u32,
    /// Theoretical PCIe bandwidth in GB/s
    pub pcie_bandwidth_gbps: f32,
    /// Estimated host-to-device throughput in MB/s
    pub pcie_rx_mbps: f32,
    /// Estimated device-to-host throughput in MB/s
    pub pcie_tx_mbps: f32,
    /// Estimated PCIe utilization percentage (0.0 to 100.0)
    pub pcie_utilization: f32,
    /// Estimated host-to-device transfer wait in milliseconds
    pub transfer_wait_ms: f32,

    pub utilization_history: HistoryRing,
    pub memory_history: HistoryRing,
    pub temperature_history: HistoryRing,
    pub pcie_rx_history: HistoryRing,
    pub pcie_tx_history: HistoryRing,
    pub transfer_wait_history: HistoryRing,
}

impl GpuMetric {
    /// Create an empty device entry whose histories hold `capacity` samples.
    pub fn new(capacity: usize) -> Self {
        Self {
            available: false,
            name: "Unknown".to_string(),
            utilization: 0.0,
            memory_used_mb: 0.0,
            memory_total_mb: 0.0,
            memory_percent: 0.0,
            temperature_celsius: 0.0,
            core_clock_mhz: 0,
            memory_clock_mhz: 0,
            fan_percent: 0.0,
            power_draw_watts: 0.0,
            power_limit_watts: 0.0,
            memory_controller_load: 0.0,
            video_engine_load: 0.0,
            current_voltage_mv: 0.0,
            max_voltage_mv: 0.0,
            voltage_percent: 0.0,
            pcie_link_width: 0,
            pcie_generation: 0,
            pcie_bandwidth_gbps: 0.0,
            pcie_rx_mbps: 0.0,
            pcie_tx_mbps: 0.0,
            pcie_utilization: 0.0,
            transfer_wait_ms: 0.0,
            utilization_history: HistoryRing::new(capacity),
            memory_history: HistoryRing::new(capacity),
            temperature_history: HistoryRing::new(capacity),
            pcie_rx_history: HistoryRing::new(capacity),
            pcie_tx_history: HistoryRing::new(capacity),
            transfer_wait_history: HistoryRing::new(capacity),
        }
    }
}

/// System-wide CPU load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CpuMetric {
    /// Whether the last sample succeeded
    pub available: bool,
    /// CPU usage percentage (0.0 to 100.0)
    pub utilization: f32,
    /// Usage per logical core (0.0 to 100.0 each)
    pub core_utilization: Vec<f32>,
    /// Package temperature in Celsius, 0.0 when no sensor is exposed
    pub temperature_celsius: f32,
    pub utilization_history: HistoryRing,
}

impl CpuMetric {
    pub fn new(capacity: usize) -> Self {
        Self {
            available: false,
            utilization: 0.0,
            core_utilization: Vec::new(),
            temperature_celsius: 0.0,
            utilization_history: HistoryRing::new(capacity),
        }
    }
}

/// One installed (or synthesized) memory module.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryModule {
    /// Slot label (e.g., "DIMM_A1")
    pub name: String,
    /// Capacity in GB
    pub capacity_gb: f32,
    /// Speed in MHz (MT/s)
    pub speed_mhz: u32,
    /// Memory type (e.g., "DDR4")
    pub memory_type: String,
    /// Memory channel index
    pub channel: u32,
    /// Peak module bandwidth in GB/s
    pub max_bandwidth_gbps: f32,
    /// Estimated current bandwidth in GB/s
    pub realtime_bandwidth_gbps: f32,
    /// Estimated bandwidth utilization percentage (0.0 to 100.0)
    pub utilization: f32,
    pub bandwidth_history: HistoryRing,
}

/// Physical memory status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryMetric {
    /// Whether the last sample succeeded
    pub available: bool,
    /// Total physical memory in GB
    pub total_gb: f32,
    /// Used memory in GB, always `total_gb - available_gb`
    pub used_gb: f32,
    /// Available memory in GB
    pub available_gb: f32,
    /// Memory usage percentage (0.0 to 100.0)
    pub percent: f32,
    /// Installed modules
    pub modules: Vec<MemoryModule>,
    pub percent_history: HistoryRing,
}

impl MemoryMetric {
    pub fn new(capacity: usize) -> Self {
        Self {
            available: false,
            total_gb: 0.0,
            used_gb: 0.0,
            available_gb: 0.0,
            percent: 0.0,
            modules: Vec::new(),
            percent_history: HistoryRing::new(capacity),
        }
    }
}

/// Storage technology of a volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiskType {
    Hdd,
    Ssd,
    Nvme,
    Unknown,
}

impl fmt::Display for DiskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DiskType::Hdd => "HDD",
            DiskType::Ssd => "SSD",
            DiskType::Nvme => "NVMe",
            DiskType::Unknown => "Unknown",
        };
        f.write_str(label)
    }
}

/// One fixed volume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskMetric {
    /// Whether the last counter read succeeded
    pub available: bool,
    /// Block device name (e.g., "nvme0n1p2")
    pub name: String,
    /// Mount point (e.g., "/")
    pub mount_point: String,
    /// Inferred storage technology
    pub disk_type: DiskType,
    /// Device model label
    pub model: String,
    /// Total size in GB
    pub total_size_gb: f32,
    /// Read ceiling in GB/s
    pub max_read_gbps: f32,
    /// Write ceiling in GB/s
    pub max_write_gbps: f32,
    /// Measured read bandwidth in GB/s
    pub realtime_read_gbps: f32,
    /// Measured write bandwidth in GB/s
    pub realtime_write_gbps: f32,
    /// Read utilization percentage (0.0 to 100.0)
    pub read_utilization: f32,
    /// Write utilization percentage (0.0 to 100.0)
    pub write_utilization: f32,
    /// Combined utilization percentage (0.0 to 100.0)
    pub utilization: f32,
    pub read_history: HistoryRing,
    pub write_history: HistoryRing,
}

impl DiskMetric {
    pub fn new(capacity: usize) -> Self {
        Self {
            available: false,
            name: "Unknown".to_string(),
            mount_point: String::new(),
            disk_type: DiskType::Unknown,
            model: "Unknown".to_string(),
            total_size_gb: 0.0,
            max_read_gbps: 0.0,
            max_write_gbps: 0.0,
            realtime_read_gbps: 0.0,
            realtime_write_gbps: 0.0,
            read_utilization: 0.0,
            write_utilization: 0.0,
            utilization: 0.0,
            read_history: HistoryRing::new(capacity),
            write_history: HistoryRing::new(capacity),
        }
    }
}

/// Max, current and utilization of one interconnect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusBandwidth {
    /// Theoretical bandwidth in GB/s
    pub max_gbps: f32,
    /// Estimated current bandwidth in GB/s
    pub realtime_gbps: f32,
    /// Utilization percentage (0.0 to 100.0)
    pub utilization: f32,
    /// Real-time bandwidth history
    pub history: HistoryRing,
}

impl BusBandwidth {
    pub fn new(capacity: usize) -> Self {
        Self {
            max_gbps: 0.0,
            realtime_gbps: 0.0,
            utilization: 0.0,
            history: HistoryRing::new(capacity),
        }
    }
}

/// Aggregate bandwidth across the four buses of the machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemBandwidthMetric {
    /// Sum of the four bus maxima in GB/s
    pub total_system_bandwidth: f32,
    /// CPU to GPU
    pub pcie: BusBandwidth,
    /// CPU to RAM
    pub memory: BusBandwidth,
    /// Disk to RAM
    pub storage: BusBandwidth,
    /// GPU to its own memory
    pub vram: BusBandwidth,

    // Older dashboard panels read these scalars.
    /// Deprecated, 1.2x the memory bandwidth
    pub cpu_bandwidth: f32,
    /// Deprecated, same as `memory.max_gbps`
    pub memory_bandwidth: f32,
    /// Deprecated, same as `pcie.max_gbps`
    pub pcie_total_bandwidth: f32,
    /// Memory type from the bandwidth table
    pub memory_type: String,
    /// Memory speed from the bandwidth table in MHz
    pub memory_speed_mhz: u32,

    /// Sum of the four real-time figures
    pub total_history: HistoryRing,
    /// Real-time memory bandwidth scaled like `cpu_bandwidth`
    pub cpu_history: HistoryRing,
}

impl SystemBandwidthMetric {
    pub fn new(capacity: usize) -> Self {
        Self {
            total_system_bandwidth: 0.0,
            pcie: BusBandwidth::new(capacity),
            memory: BusBandwidth::new(capacity),
            storage: BusBandwidth::new(capacity),
            vram: BusBandwidth::new(capacity),
            cpu_bandwidth: 0.0,
            memory_bandwidth: 0.0,
            pcie_total_bandwidth: 0.0,
            memory_type: "Unknown".to_string(),
            memory_speed_mhz: 0,
            total_history: HistoryRing::new(capacity),
            cpu_history: HistoryRing::new(capacity),
        }
    }
}

impl TelemetrySnapshot {
    /// Create an empty snapshot whose histories hold `capacity` samples.
    pub fn new(capacity: usize) -> Self {
        Self {
            tick: 0,
            timestamp: None,
            gpus: Vec::new(),
            cpu: CpuMetric::new(capacity),
            memory: MemoryMetric::new(capacity),
            disks: Vec::new(),
            bandwidth: SystemBandwidthMetric::new(capacity),
        }
    }
}

impl Default for TelemetrySnapshot {
    fn default() -> Self {
        Self::new(crate::DEFAULT_HISTORY_CAPACITY)
    }
}

impl Default for GpuMetric {
    fn default() -> Self {
        Self::new(crate::DEFAULT_HISTORY_CAPACITY)
    }
}

impl Default for CpuMetric {
    fn default() -> Self {
        Self::new(crate::DEFAULT_HISTORY_CAPACITY)
    }
}

impl Default for MemoryMetric {
    fn default() -> Self {
        Self::new(crate::DEFAULT_HISTORY_CAPACITY)
    }
}

impl Default for DiskMetric {
    fn default() -> Self {
        Self::new(crate::DEFAULT_HISTORY_CAPACITY)
    }
}

impl Default for SystemBandwidthMetric {
    fn default() -> Self {
        Self::new(crate::DEFAULT_HISTORY_CAPACITY)
    }
}
