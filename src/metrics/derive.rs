//! Derived metrics.
//!
//! Everything here is a pure function of values the sources already
//! delivered this tick. None of these numbers are measurements: voltage,
//! PCIe throughput, transfer wait and bus bandwidth are heuristic models
//! whose coefficients live in the `*Model` structs so they can be tuned
//! without touching the update cycle.
//!
//! Every division is guarded; a zero or non-finite denominator yields 0.

use crate::metrics::data::{DiskMetric, DiskType, GpuMetric, MemoryModule};
use crate::metrics::history::HistoryRing;
use crate::metrics::traits::{ModuleRecord, ReportedMedium};
use serde::{Deserialize, Serialize};

/// Clamp to [0, 100], mapping NaN and infinities to 0.
pub fn clamp_percent(value: f32) -> f32 {
    if value.is_finite() {
        value.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

/// Clamp to [0, 1], mapping NaN and infinities to 0.
pub fn clamp_unit(value: f32) -> f32 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// `numerator / denominator`, or 0 when the denominator is not positive.
pub fn safe_ratio(numerator: f32, denominator: f32) -> f32 {
    if denominator > 0.0 && denominator.is_finite() && numerator.is_finite() {
        numerator / denominator
    } else {
        0.0
    }
}

/// `part` as a clamped percentage of `whole`.
pub fn percent_of(part: f32, whole: f32) -> f32 {
    clamp_percent(safe_ratio(part, whole) * 100.0)
}

// ---------------------------------------------------------------------------
// Voltage
// ---------------------------------------------------------------------------

/// Square-root mapping from power fraction to core voltage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoltageModel {
    /// Voltage at idle in mV
    pub floor_mv: f32,
    /// Highest plausible core voltage in mV
    pub ceiling_mv: f32,
    /// Maximum used when the power limit is unknown
    pub default_max_mv: f32,
    /// Power limit that maps to `ceiling_mv`
    pub reference_limit_watts: f32,
}

impl Default for VoltageModel {
    fn default() -> Self {
        Self {
            floor_mv: 700.0,
            ceiling_mv: 1100.0,
            default_max_mv: 1000.0,
            reference_limit_watts: 450.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VoltageEstimate {
    pub current_mv: f32,
    pub max_mv: f32,
    pub percent: f32,
}

/// Estimate core voltage from power draw and the power-limit constraint.
///
/// A direct reading, when present, replaces the estimated current value but
/// the maximum still comes from the model.
pub fn estimate_voltage(
    model: &VoltageModel,
    direct_mv: Option<f32>,
    power_draw_watts: f32,
    power_limit_watts: f32,
) -> VoltageEstimate {
    let span = (model.ceiling_mv - model.floor_mv).max(0.0);

    let max_mv = if power_limit_watts > 0.0 {
        let limit_fraction = clamp_unit(safe_ratio(
            power_limit_watts,
            model.reference_limit_watts,
        ));
        model.floor_mv + span * limit_fraction.sqrt()
    } else {
        model.default_max_mv
    };

    let current_mv = match direct_mv {
        Some(mv) if mv.is_finite() && mv > 0.0 => mv,
        _ if power_draw_watts > 0.0 => {
            let limit = if power_limit_watts > 0.0 {
                power_limit_watts
            } else {
                model.reference_limit_watts
            };
            let fraction = clamp_unit(safe_ratio(power_draw_watts, limit));
            model.floor_mv + (max_mv - model.floor_mv).max(0.0) * fraction.sqrt()
        }
        _ => 0.0,
    };

    let percent = if current_mv > 0.0 {
        percent_of(current_mv - model.floor_mv, max_mv - model.floor_mv)
    } else {
        0.0
    };

    VoltageEstimate {
        current_mv,
        max_mv,
        percent,
    }
}

// ---------------------------------------------------------------------------
// PCIe
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PcieModel {
    /// GT/s contributed per generation step
    pub gt_per_generation: f32,
    /// Weight of core utilization in the activity factor
    pub utilization_weight: f32,
    /// Weight of video memory usage in the activity factor
    pub memory_weight: f32,
    /// Share of traffic flowing host to device
    pub rx_share: f32,
}

impl Default for PcieModel {
    fn default() -> Self {
        Self {
            gt_per_generation: 2.5,
            utilization_weight: 0.3,
            memory_weight: 0.2,
            rx_share: 0.65,
        }
    }
}

/// Theoretical link bandwidth in GB/s: `width * generation * 2.5 / 8`.
pub fn pcie_theoretical_bandwidth(model: &PcieModel, link_width: u32, generation: u32) -> f32 {
    link_width as f32 * generation as f32 * model.gt_per_generation / 8.0
}

/// Blend of utilization and memory usage in [0, 1].
pub fn pcie_activity_factor(model: &PcieModel, utilization: f32, memory_percent: f32) -> f32 {
    clamp_unit(
        clamp_percent(utilization) / 100.0 * model.utilization_weight
            + clamp_percent(memory_percent) / 100.0 * model.memory_weight,
    )
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PcieThroughput {
    pub rx_mbps: f32,
    pub tx_mbps: f32,
    pub utilization: f32,
}

/// Synthesize link throughput from device activity.
pub fn estimate_pcie_throughput(
    model: &PcieModel,
    theoretical_gbps: f32,
    utilization: f32,
    memory_percent: f32,
) -> PcieThroughput {
    if utilization <= 0.0 || theoretical_gbps <= 0.0 || !theoretical_gbps.is_finite() {
        return PcieThroughput::default();
    }

    let activity = pcie_activity_factor(model, utilization, memory_percent);
    let total_mbps = theoretical_gbps * 1024.0 * activity;
    let rx_share = clamp_unit(model.rx_share);
    let rx_mbps = total_mbps * rx_share;
    let tx_mbps = total_mbps * (1.0 - rx_share);

    PcieThroughput {
        rx_mbps,
        tx_mbps,
        utilization: percent_of((rx_mbps + tx_mbps) / 1024.0, theoretical_gbps),
    }
}

// ---------------------------------------------------------------------------
// Transfer wait
// ---------------------------------------------------------------------------

/// One load factor of the wait model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WaitFactor {
    /// Normalized load below which the factor contributes nothing
    pub threshold: f32,
    /// Contribution in ms at full load
    pub weight_ms: f32,
}

impl WaitFactor {
    fn contribution(&self, load_percent: f32) -> f32 {
        let load = clamp_unit(load_percent / 100.0);
        if load <= self.threshold || self.threshold >= 1.0 {
            return 0.0;
        }
        self.weight_ms * (load - self.threshold) / (1.0 - self.threshold)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaitModel {
    pub memory_controller: WaitFactor,
    pub gpu: WaitFactor,
    pub pcie: WaitFactor,
    pub memory: WaitFactor,
    /// GPU and memory-controller load (normalized) under which the sum is damped
    pub low_load_cutoff: f32,
    /// Multiplier applied when both loads are under the cutoff
    pub low_load_scale: f32,
    pub max_ms: f32,
}

impl Default for WaitModel {
    fn default() -> Self {
        Self {
            memory_controller: WaitFactor {
                threshold: 0.70,
                weight_ms: 4.0,
            },
            gpu: WaitFactor {
                threshold: 0.80,
                weight_ms: 3.0,
            },
            pcie: WaitFactor {
                threshold: 0.75,
                weight_ms: 2.0,
            },
            memory: WaitFactor {
                threshold: 0.85,
                weight_ms: 1.0,
            },
            low_load_cutoff: 0.5,
            low_load_scale: 0.3,
            max_ms: 10.0,
        }
    }
}

/// Loads feeding the wait model, all in percent.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WaitInputs {
    pub memory_controller_load: f32,
    pub gpu_utilization: f32,
    pub pcie_utilization: f32,
    pub memory_percent: f32,
}

/// Estimated host-to-device wait in milliseconds.
pub fn estimate_transfer_wait(model: &WaitModel, inputs: WaitInputs) -> f32 {
    let mut wait = model
        .memory_controller
        .contribution(inputs.memory_controller_load)
        + model.gpu.contribution(inputs.gpu_utilization)
        + model.pcie.contribution(inputs.pcie_utilization)
        + model.memory.contribution(inputs.memory_percent);

    let gpu_load = clamp_unit(inputs.gpu_utilization / 100.0);
    let controller_load = clamp_unit(inputs.memory_controller_load / 100.0);
    if gpu_load < model.low_load_cutoff && controller_load < model.low_load_cutoff {
        wait *= model.low_load_scale;
    }

    if wait.is_finite() {
        wait.clamp(0.0, model.max_ms.max(0.0))
    } else {
        0.0
    }
}

/// Busier of the encoder and decoder, 0 when neither is reported.
pub fn video_engine_load(encoder: Option<f32>, decoder: Option<f32>) -> f32 {
    let encoder = encoder.map(clamp_percent).unwrap_or(0.0);
    let decoder = decoder.map(clamp_percent).unwrap_or(0.0);
    encoder.max(decoder)
}

// ---------------------------------------------------------------------------
// System activity and memory
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivityModel {
    pub cpu_weight: f32,
    pub memory_weight: f32,
}

impl Default for ActivityModel {
    fn default() -> Self {
        Self {
            cpu_weight: 0.6,
            memory_weight: 0.4,
        }
    }
}

/// Shared [0, 1] factor scaling memory-bus and module bandwidth.
pub fn system_activity_factor(
    model: &ActivityModel,
    cpu_utilization: f32,
    memory_percent: f32,
) -> f32 {
    clamp_unit(
        clamp_percent(cpu_utilization) / 100.0 * model.cpu_weight
            + clamp_percent(memory_percent) / 100.0 * model.memory_weight,
    )
}

/// One row of the memory bandwidth table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryClass {
    /// Smallest total memory (GB) this row applies to
    pub min_total_gb: f32,
    pub bandwidth_gbps: f32,
    pub memory_type: String,
    pub speed_mhz: u32,
}

/// Memory bandwidth keyed by total physical memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemoryBandwidthTable {
    pub classes: Vec<MemoryClass>,
}

impl Default for MemoryBandwidthTable {
    fn default() -> Self {
        let class = |min_total_gb: f32, bandwidth_gbps: f32, memory_type: &str, speed_mhz: u32| {
            MemoryClass {
                min_total_gb,
                bandwidth_gbps,
                memory_type: memory_type.to_string(),
                speed_mhz,
            }
        };
        Self {
            classes: vec![
                class(64.0, 76.8, "DDR5", 4800),
                class(32.0, 51.2, "DDR4", 3200),
                class(16.0, 42.7, "DDR4", 2666),
                class(8.0, 38.4, "DDR4", 2400),
                class(0.0, 25.6, "DDR3", 1600),
            ],
        }
    }
}

impl MemoryBandwidthTable {
    /// Row with the largest `min_total_gb` not above `total_gb`, falling back
    /// to the smallest row. `None` only for an empty table.
    pub fn lookup(&self, total_gb: f32) -> Option<&MemoryClass> {
        let fitting = self
            .classes
            .iter()
            .filter(|class| class.min_total_gb <= total_gb)
            .max_by(|a, b| a.min_total_gb.total_cmp(&b.min_total_gb));
        fitting.or_else(|| {
            self.classes
                .iter()
                .min_by(|a, b| a.min_total_gb.total_cmp(&b.min_total_gb))
        })
    }
}

/// Peak bandwidth of one 64-bit channel in GB/s.
pub fn module_bandwidth_gbps(speed_mhz: u32) -> f32 {
    speed_mhz as f32 * 8.0 / 1000.0
}

/// Module count used when no inventory is available: one per 8 GB,
/// even when more than one, bounded to [1, 8].
pub fn fallback_module_count(total_gb: f32) -> usize {
    if !total_gb.is_finite() || total_gb <= 0.0 {
        return 1;
    }
    let mut count = (total_gb / 8.0).ceil().clamp(1.0, 8.0) as usize;
    if count > 1 && count % 2 == 1 {
        count += 1;
    }
    count.min(8)
}

/// Plausible module layout for a machine without an inventory.
pub fn synthesize_modules(
    table: &MemoryBandwidthTable,
    total_gb: f32,
    history_capacity: usize,
) -> Vec<MemoryModule> {
    let count = fallback_module_count(total_gb);
    let per_module = if total_gb.is_finite() && total_gb > 0.0 {
        total_gb / count as f32
    } else {
        0.0
    };
    let class = table.lookup(total_gb);
    let speed_mhz = class.map(|c| c.speed_mhz).unwrap_or(0);
    let memory_type = class
        .map(|c| c.memory_type.clone())
        .unwrap_or_else(|| "Unknown".to_string());

    (0..count)
        .map(|index| MemoryModule {
            name: format!("DIMM{}", index),
            capacity_gb: per_module,
            speed_mhz,
            memory_type: memory_type.clone(),
            channel: (index % 2) as u32,
            max_bandwidth_gbps: module_bandwidth_gbps(speed_mhz),
            realtime_bandwidth_gbps: 0.0,
            utilization: 0.0,
            bandwidth_history: HistoryRing::new(history_capacity),
        })
        .collect()
}

/// Module entries from an authoritative inventory; gaps (speed, type) are
/// filled from the bandwidth table.
pub fn modules_from_inventory(
    records: &[ModuleRecord],
    table: &MemoryBandwidthTable,
    total_gb: f32,
    history_capacity: usize,
) -> Vec<MemoryModule> {
    let class = table.lookup(total_gb);

    records
        .iter()
        .enumerate()
        .map(|(index, record)| {
            let speed_mhz = record
                .speed_mhz
                .or_else(|| class.map(|c| c.speed_mhz))
                .unwrap_or(0);
            let memory_type = record
                .memory_type
                .clone()
                .or_else(|| class.map(|c| c.memory_type.clone()))
                .unwrap_or_else(|| "Unknown".to_string());
            let channel = record
                .bank_locator
                .as_deref()
                .and_then(channel_from_bank_locator)
                .unwrap_or((index % 2) as u32);

            MemoryModule {
                name: record.locator.clone(),
                capacity_gb: record.capacity_gb,
                speed_mhz,
                memory_type,
                channel,
                max_bandwidth_gbps: module_bandwidth_gbps(speed_mhz),
                realtime_bandwidth_gbps: 0.0,
                utilization: 0.0,
                bandwidth_history: HistoryRing::new(history_capacity),
            }
        })
        .collect()
}

/// "P0 CHANNEL B" -> 1, "BANK 2" -> 2.
fn channel_from_bank_locator(bank: &str) -> Option<u32> {
    let upper = bank.to_ascii_uppercase();
    if let Some(rest) = upper.split("CHANNEL").nth(1) {
        let letter = rest.trim().chars().next()?;
        if letter.is_ascii_uppercase() {
            return Some(letter as u32 - 'A' as u32);
        }
        return letter.to_digit(10);
    }
    upper
        .split(|c: char| !c.is_ascii_digit())
        .filter(|part| !part.is_empty())
        .last()
        .and_then(|digits| digits.parse().ok())
}

// ---------------------------------------------------------------------------
// Disks and storage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiskClassifier {
    /// Trust the operating system's rotational flag when it has one
    pub prefer_reported: bool,
    /// Volumes up to this size are assumed solid state
    pub ssd_max_capacity_gb: f32,
}

impl Default for DiskClassifier {
    fn default() -> Self {
        Self {
            prefer_reported: true,
            ssd_max_capacity_gb: 1024.0,
        }
    }
}

/// Infer the storage technology of a volume.
pub fn classify_disk(
    classifier: &DiskClassifier,
    device: &str,
    medium: ReportedMedium,
    total_gb: f32,
) -> DiskType {
    if device.to_ascii_lowercase().contains("nvme") {
        return DiskType::Nvme;
    }
    if classifier.prefer_reported {
        match medium {
            ReportedMedium::SolidState => return DiskType::Ssd,
            ReportedMedium::Rotational => return DiskType::Hdd,
            ReportedMedium::Unknown => {}
        }
    }
    if total_gb <= 0.0 || !total_gb.is_finite() {
        DiskType::Unknown
    } else if total_gb <= classifier.ssd_max_capacity_gb {
        DiskType::Ssd
    } else {
        DiskType::Hdd
    }
}

/// Read/write ceiling in GB/s.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DiskCeiling {
    pub read_gbps: f32,
    pub write_gbps: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageModel {
    pub nvme: DiskCeiling,
    pub ssd: DiskCeiling,
    pub hdd: DiskCeiling,
}

impl Default for StorageModel {
    fn default() -> Self {
        Self {
            nvme: DiskCeiling {
                read_gbps: 3.5,
                write_gbps: 3.0,
            },
            ssd: DiskCeiling {
                read_gbps: 0.55,
                write_gbps: 0.52,
            },
            hdd: DiskCeiling {
                read_gbps: 0.2,
                write_gbps: 0.18,
            },
        }
    }
}

impl StorageModel {
    /// Ceiling for a disk type; unknown media get the HDD ceiling.
    pub fn ceiling(&self, disk_type: DiskType) -> DiskCeiling {
        match disk_type {
            DiskType::Nvme => self.nvme,
            DiskType::Ssd => self.ssd,
            DiskType::Hdd | DiskType::Unknown => self.hdd,
        }
    }
}

/// Storage activity implied by memory pressure, three tiers split at 80 %
/// and 90 %. Continuous, in [0.05, 0.8].
pub fn storage_pressure_factor(memory_percent: f32) -> f32 {
    let p = clamp_percent(memory_percent);
    let factor = if p < 80.0 {
        0.05 + 0.10 * (p / 80.0)
    } else if p <= 90.0 {
        0.15 + 0.25 * ((p - 80.0) / 10.0)
    } else {
        0.40 + 0.40 * ((p - 90.0) / 10.0)
    };
    factor.min(0.8)
}

/// Video memory bandwidth in GB/s for one device.
pub fn vram_bandwidth_gbps(memory_clock_mhz: u32, bus_width_bits: u32) -> f32 {
    memory_clock_mhz as f32 * bus_width_bits as f32 / 8.0 / 1000.0
}

// ---------------------------------------------------------------------------
// System bandwidth aggregation
// ---------------------------------------------------------------------------

/// All heuristics of the engine in one place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimationModels {
    pub voltage: VoltageModel,
    pub pcie: PcieModel,
    pub wait: WaitModel,
    pub activity: ActivityModel,
    pub memory_table: MemoryBandwidthTable,
    pub disk_classifier: DiskClassifier,
    pub storage: StorageModel,
    /// Memory bus width assumed for every accelerator
    pub vram_bus_width_bits: u32,
    /// Legacy CPU bandwidth as a multiple of memory bandwidth
    pub legacy_cpu_factor: f32,
}

impl Default for EstimationModels {
    fn default() -> Self {
        Self {
            voltage: VoltageModel::default(),
            pcie: PcieModel::default(),
            wait: WaitModel::default(),
            activity: ActivityModel::default(),
            memory_table: MemoryBandwidthTable::default(),
            disk_classifier: DiskClassifier::default(),
            storage: StorageModel::default(),
            vram_bus_width_bits: 256,
            legacy_cpu_factor: 1.2,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BusFigures {
    pub max_gbps: f32,
    pub realtime_gbps: f32,
    pub utilization: f32,
}

impl BusFigures {
    fn new(max_gbps: f32, realtime_gbps: f32) -> Self {
        Self {
            max_gbps,
            realtime_gbps,
            utilization: percent_of(realtime_gbps, max_gbps),
        }
    }
}

/// Result of one bandwidth aggregation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BandwidthFigures {
    pub pcie: BusFigures,
    pub memory: BusFigures,
    pub storage: BusFigures,
    pub vram: BusFigures,
    pub total_gbps: f32,
    pub cpu_bandwidth_gbps: f32,
    pub memory_type: String,
    pub memory_speed_mhz: u32,
}

/// Inputs of the bandwidth aggregation, already updated this tick.
pub struct BandwidthInputs<'a> {
    pub gpus: &'a [GpuMetric],
    pub disks: &'a [DiskMetric],
    pub memory_total_gb: f32,
    pub memory_percent: f32,
    pub cpu_utilization: f32,
}

/// Combine per-device figures into the four system buses.
pub fn aggregate_bandwidth(models: &EstimationModels, inputs: &BandwidthInputs<'_>) -> BandwidthFigures {
    let available_gpus = || inputs.gpus.iter().filter(|gpu| gpu.available);

    let pcie_max: f32 = available_gpus().map(|gpu| gpu.pcie_bandwidth_gbps).sum();
    let pcie_real: f32 = available_gpus()
        .map(|gpu| (gpu.pcie_rx_mbps + gpu.pcie_tx_mbps) / 1024.0)
        .sum();

    let class = models.memory_table.lookup(inputs.memory_total_gb);
    let memory_max = if inputs.memory_total_gb > 0.0 {
        class.map(|c| c.bandwidth_gbps).unwrap_or(0.0)
    } else {
        0.0
    };
    let activity = system_activity_factor(
        &models.activity,
        inputs.cpu_utilization,
        inputs.memory_percent,
    );
    let memory_real = memory_max * activity;

    let storage_max: f32 = inputs
        .disks
        .iter()
        .map(|disk| models.storage.ceiling(disk.disk_type).read_gbps)
        .sum();
    let storage_real = storage_max * storage_pressure_factor(inputs.memory_percent);

    let (vram_max, vram_real) = available_gpus().fold((0.0f32, 0.0f32), |(max, real), gpu| {
        let device_max = vram_bandwidth_gbps(gpu.memory_clock_mhz, models.vram_bus_width_bits);
        let device_real = device_max * clamp_percent(gpu.memory_controller_load) / 100.0;
        (max + device_max, real + device_real)
    });

    BandwidthFigures {
        pcie: BusFigures::new(pcie_max, pcie_real),
        memory: BusFigures::new(memory_max, memory_real),
        storage: BusFigures::new(storage_max, storage_real),
        vram: BusFigures::new(vram_max, vram_real),
        total_gbps: pcie_max + memory_max + storage_max + vram_max,
        cpu_bandwidth_gbps: memory_max * models.legacy_cpu_factor,
        memory_type: class
            .map(|c| c.memory_type.clone())
            .unwrap_or_else(|| "Unknown".to_string()),
        memory_speed_mhz: class.map(|c| c.speed_mhz).unwrap_or(0),
    }
}
