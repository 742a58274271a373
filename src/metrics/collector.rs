//! Telemetry engine: owns the sources and the published snapshot, and runs
//! one update cycle per tick.

use crate::config::EngineConfig;
use crate::error::{Result, TelemetryError};
use crate::metrics::data::*;
use crate::metrics::derive::{self, BandwidthInputs, WaitInputs};
use crate::metrics::traits::{
    CpuSource, DiskSource, DiskThroughput, GpuReading, GpuSource, MemorySource,
    ModuleInventorySource,
};
use chrono::Utc;
use lazy_static::lazy_static;

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;
const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

lazy_static! {
    static ref EMPTY_GPU: GpuMetric = GpuMetric::new(1);
    static ref EMPTY_DISK: DiskMetric = DiskMetric::new(1);
    static ref EMPTY_MODULE: MemoryModule = MemoryModule {
        name: "Unknown".to_string(),
        capacity_gb: 0.0,
        speed_mhz: 0,
        memory_type: "Unknown".to_string(),
        channel: 0,
        max_bandwidth_gbps: 0.0,
        realtime_bandwidth_gbps: 0.0,
        utilization: 0.0,
        bandwidth_history: crate::metrics::history::HistoryRing::new(1),
    };
}

/// The counter sources an engine samples.
pub struct Sources {
    /// Absent when accelerator support is disabled
    pub gpu: Option<Box<dyn GpuSource>>,
    pub cpu: Box<dyn CpuSource>,
    pub memory: Box<dyn MemorySource>,
    pub disks: Box<dyn DiskSource>,
    /// Absent when only the synthesized module layout is wanted
    pub modules: Option<Box<dyn ModuleInventorySource>>,
}

impl Sources {
    /// The real sources of this machine.
    pub fn platform(config: &EngineConfig) -> Self {
        use crate::metrics::{disk, modules, system};

        #[cfg(feature = "nvml")]
        let gpu: Option<Box<dyn GpuSource>> = if config.enable_gpu {
            Some(Box::new(crate::metrics::gpu::NvmlGpuSource::new()))
        } else {
            None
        };
        #[cfg(not(feature = "nvml"))]
        let gpu: Option<Box<dyn GpuSource>> = None;

        let modules: Option<Box<dyn ModuleInventorySource>> = if config.enable_module_inventory {
            Some(Box::new(modules::DmidecodeInventory::new()))
        } else {
            None
        };

        Self {
            gpu,
            cpu: Box::new(system::SysinfoCpuSource::new()),
            memory: Box::new(system::SysinfoMemorySource::new()),
            disks: Box::new(disk::SysinfoDiskSource::new()),
            modules,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Uninitialized,
    Running,
    ShutDown,
}

/// Polls every source once per tick and keeps the resulting snapshot.
///
/// The engine is single-threaded: `update` runs a full cycle before
/// returning, so readers holding `&self` always see a complete snapshot.
pub struct TelemetryEngine {
    config: EngineConfig,
    sources: Sources,
    state: EngineState,
    snapshot: TelemetrySnapshot,
    disks_enumerated: bool,
    modules_resolved: bool,
}

impl TelemetryEngine {
    /// Create an engine over the platform sources.
    pub fn new(config: EngineConfig) -> Self {
        let sources = Sources::platform(&config);
        Self::with_sources(config, sources)
    }

    /// Create an engine over caller-supplied sources.
    pub fn with_sources(config: EngineConfig, sources: Sources) -> Self {
        let snapshot = TelemetrySnapshot::new(config.history_capacity);
        Self {
            config,
            sources,
            state: EngineState::Uninitialized,
            snapshot,
            disks_enumerated: false,
            modules_resolved: false,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Enumerate devices and prime delta counters.
    ///
    /// Idempotent. A missing subsystem degrades to zero entries; only an
    /// unusable configuration is reported as an error.
    pub fn initialize(&mut self) -> Result<()> {
        match self.state {
            EngineState::Running => return Ok(()),
            EngineState::ShutDown => {
                tracing::debug!("initialize called after shutdown, ignoring");
                return Ok(());
            }
            EngineState::Uninitialized => {}
        }

        self.config.validate()?;
        let capacity = self.config.history_capacity;

        if let Some(gpu) = self.sources.gpu.as_mut() {
            match gpu.enumerate() {
                Ok(count) => {
                    tracing::info!("Found {} GPU device(s)", count);
                    self.snapshot.gpus = (0..count).map(|_| GpuMetric::new(capacity)).collect();
                }
                Err(e) => {
                    tracing::warn!("GPU enumeration failed, continuing without GPUs: {}", e);
                    self.snapshot.gpus.clear();
                }
            }
        }

        if let Err(e) = self.sources.cpu.prime() {
            tracing::warn!("CPU counters unavailable: {}", e);
        }

        self.state = EngineState::Running;
        tracing::info!("Telemetry engine initialized");
        Ok(())
    }

    /// Run one full cycle. Initializes on first use; does nothing after
    /// shutdown. Source failures only degrade their own metrics.
    pub fn update(&mut self) {
        if self.state == EngineState::Uninitialized {
            if let Err(e) = self.initialize() {
                tracing::error!("Telemetry engine cannot start: {}", e);
                return;
            }
        }
        if self.state != EngineState::Running {
            return;
        }

        self.update_gpus();
        self.update_cpu();
        self.update_memory();
        self.update_modules();
        self.update_disks();
        self.update_bandwidth();

        self.snapshot.tick += 1;
        self.snapshot.timestamp = Some(Utc::now());
        tracing::trace!("Published tick {}", self.snapshot.tick);
    }

    /// Release every source. Safe to call repeatedly and without a prior
    /// `initialize`.
    pub fn shutdown(&mut self) {
        if self.state == EngineState::ShutDown {
            return;
        }
        if let Some(gpu) = self.sources.gpu.as_mut() {
            gpu.release();
        }
        self.sources.cpu.release();
        self.sources.memory.release();
        self.sources.disks.release();
        if let Some(modules) = self.sources.modules.as_mut() {
            modules.release();
        }
        self.state = EngineState::ShutDown;
        tracing::info!("Telemetry engine shut down");
    }

    fn update_gpus(&mut self) {
        let Some(source) = self.sources.gpu.as_mut() else {
            return;
        };
        let models = &self.config.models;

        for (index, gpu) in self.snapshot.gpus.iter_mut().enumerate() {
            match source.sample(index as u32) {
                Ok(reading) => {
                    if !gpu.available {
                        tracing::debug!("GPU {} available", index);
                    }
                    gpu.available = true;
                    apply_gpu_reading(gpu, &reading);
                    derive_gpu_fields(gpu, &reading, models);

                    gpu.utilization_history.append(gpu.utilization);
                    gpu.memory_history.append(gpu.memory_percent);
                    gpu.temperature_history.append(gpu.temperature_celsius);
                    gpu.pcie_rx_history.append(gpu.pcie_rx_mbps);
                    gpu.pcie_tx_history.append(gpu.pcie_tx_mbps);
                    gpu.transfer_wait_history.append(gpu.transfer_wait_ms);
                }
                Err(e) => {
                    let subject = format!("GPU {}", index);
                    note_failure(&subject, gpu.available, &e);
                    if e.is_structural() {
                        gpu.available = false;
                    }
                }
            }
        }
    }

    fn update_cpu(&mut self) {
        let cpu = &mut self.snapshot.cpu;
        match self.sources.cpu.sample() {
            Ok(reading) => {
                cpu.available = true;
                cpu.utilization = derive::clamp_percent(reading.utilization);
                cpu.core_utilization = reading
                    .core_utilization
                    .into_iter()
                    .map(derive::clamp_percent)
                    .collect();
                if let Some(celsius) = reading.temperature_celsius.filter(|c| c.is_finite()) {
                    cpu.temperature_celsius = celsius;
                }
                cpu.utilization_history.append(cpu.utilization);
            }
            Err(e) => {
                note_failure("CPU", cpu.available, &e);
                if e.is_structural() {
                    cpu.available = false;
                }
            }
        }
    }

    fn update_memory(&mut self) {
        let memory = &mut self.snapshot.memory;
        match self.sources.memory.sample() {
            Ok(reading) => {
                let available_bytes = reading.available_bytes.min(reading.total_bytes);
                memory.available = true;
                memory.total_gb = (reading.total_bytes as f64 / BYTES_PER_GB) as f32;
                memory.available_gb = (available_bytes as f64 / BYTES_PER_GB) as f32;
                memory.used_gb = memory.total_gb - memory.available_gb;
                memory.percent = derive::percent_of(memory.used_gb, memory.total_gb);
                memory.percent_history.append(memory.percent);
            }
            Err(e) => {
                note_failure("Memory", memory.available, &e);
                if e.is_structural() {
                    memory.available = false;
                }
            }
        }
    }

    fn update_modules(&mut self) {
        let total_gb = self.snapshot.memory.total_gb;
        if !self.modules_resolved && total_gb > 0.0 {
            self.snapshot.memory.modules = self.resolve_modules(total_gb);
            self.modules_resolved = true;
        }

        let factor = derive::system_activity_factor(
            &self.config.models.activity,
            self.snapshot.cpu.utilization,
            self.snapshot.memory.percent,
        );
        for module in self.snapshot.memory.modules.iter_mut() {
            module.realtime_bandwidth_gbps = module.max_bandwidth_gbps * factor;
            module.utilization =
                derive::percent_of(module.realtime_bandwidth_gbps, module.max_bandwidth_gbps);
            module.bandwidth_history.append(module.realtime_bandwidth_gbps);
        }
    }

    fn resolve_modules(&mut self, total_gb: f32) -> Vec<MemoryModule> {
        let table = &self.config.models.memory_table;
        let capacity = self.config.history_capacity;

        let inventory = match self.sources.modules.as_mut() {
            Some(source) => source.inventory(),
            None => Err(TelemetryError::unavailable(
                "Memory modules",
                "inventory disabled",
            )),
        };

        match inventory {
            Ok(records) if !records.is_empty() => {
                derive::modules_from_inventory(&records, table, total_gb, capacity)
            }
            Ok(_) | Err(_) => {
                let modules = derive::synthesize_modules(table, total_gb, capacity);
                tracing::debug!(
                    "Synthesized {} memory modules for {:.1} GB",
                    modules.len(),
                    total_gb
                );
                modules
            }
        }
    }

    fn update_disks(&mut self) {
        if !self.disks_enumerated {
            self.disks_enumerated = true;
            self.snapshot.disks = match self.sources.disks.enumerate() {
                Ok(volumes) => volumes
                    .into_iter()
                    .map(|volume| {
                        let models = &self.config.models;
                        let total_size_gb = (volume.total_bytes as f64 / BYTES_PER_GB) as f32;
                        let disk_type = derive::classify_disk(
                            &models.disk_classifier,
                            &volume.device,
                            volume.medium,
                            total_size_gb,
                        );
                        let ceiling = models.storage.ceiling(disk_type);
                        DiskMetric {
                            name: volume.device,
                            mount_point: volume.mount_point,
                            disk_type,
                            model: volume.model.unwrap_or_else(|| disk_type.to_string()),
                            total_size_gb,
                            max_read_gbps: ceiling.read_gbps,
                            max_write_gbps: ceiling.write_gbps,
                            ..DiskMetric::new(self.config.history_capacity)
                        }
                    })
                    .collect(),
                Err(e) => {
                    tracing::warn!("Disk enumeration failed, continuing without disks: {}", e);
                    Vec::new()
                }
            };
            tracing::info!("Tracking {} disk(s)", self.snapshot.disks.len());
        }

        if self.snapshot.disks.is_empty() {
            return;
        }

        let mut results = self.sources.disks.sample().into_iter();
        for disk in self.snapshot.disks.iter_mut() {
            let result = results.next().unwrap_or_else(|| {
                Err(TelemetryError::transient("source returned no sample for this volume"))
            });
            match result {
                Ok(throughput) => {
                    disk.available = true;
                    apply_disk_throughput(disk, throughput);
                    disk.read_history.append(disk.realtime_read_gbps);
                    disk.write_history.append(disk.realtime_write_gbps);
                }
                Err(e) => {
                    let subject = format!("Disk {}", disk.name);
                    note_failure(&subject, disk.available, &e);
                    if e.is_structural() {
                        disk.available = false;
                    }
                }
            }
        }
    }

    fn update_bandwidth(&mut self) {
        let models = &self.config.models;
        let figures = derive::aggregate_bandwidth(
            models,
            &BandwidthInputs {
                gpus: &self.snapshot.gpus,
                disks: &self.snapshot.disks,
                memory_total_gb: self.snapshot.memory.total_gb,
                memory_percent: self.snapshot.memory.percent,
                cpu_utilization: self.snapshot.cpu.utilization,
            },
        );

        let bandwidth = &mut self.snapshot.bandwidth;
        for (bus, bus_figures) in [
            (&mut bandwidth.pcie, figures.pcie),
            (&mut bandwidth.memory, figures.memory),
            (&mut bandwidth.storage, figures.storage),
            (&mut bandwidth.vram, figures.vram),
        ] {
            bus.max_gbps = bus_figures.max_gbps;
            bus.realtime_gbps = bus_figures.realtime_gbps;
            bus.utilization = bus_figures.utilization;
            bus.history.append(bus.realtime_gbps);
        }

        bandwidth.total_system_bandwidth = figures.total_gbps;
        bandwidth.cpu_bandwidth = figures.cpu_bandwidth_gbps;
        bandwidth.memory_bandwidth = figures.memory.max_gbps;
        bandwidth.pcie_total_bandwidth = figures.pcie.max_gbps;
        bandwidth.memory_type = figures.memory_type;
        bandwidth.memory_speed_mhz = figures.memory_speed_mhz;

        let total_realtime = bandwidth.pcie.realtime_gbps
            + bandwidth.memory.realtime_gbps
            + bandwidth.storage.realtime_gbps
            + bandwidth.vram.realtime_gbps;
        bandwidth.total_history.append(total_realtime);
        bandwidth
            .cpu_history
            .append(bandwidth.memory.realtime_gbps * models.legacy_cpu_factor);
    }

    /// The snapshot published by the last completed cycle.
    pub fn snapshot(&self) -> &TelemetrySnapshot {
        &self.snapshot
    }

    pub fn gpu_count(&self) -> usize {
        self.snapshot.gpus.len()
    }

    /// Device by index. Negative or out-of-range indices give an empty,
    /// unavailable device.
    pub fn gpu<I: TryInto<usize>>(&self, index: I) -> &GpuMetric {
        bounded(&self.snapshot.gpus, index, &EMPTY_GPU)
    }

    pub fn cpu(&self) -> &CpuMetric {
        &self.snapshot.cpu
    }

    pub fn memory(&self) -> &MemoryMetric {
        &self.snapshot.memory
    }

    pub fn system_bandwidth(&self) -> &SystemBandwidthMetric {
        &self.snapshot.bandwidth
    }

    pub fn module_count(&self) -> usize {
        self.snapshot.memory.modules.len()
    }

    /// Memory module by index, with the same bounds contract as [`gpu`](Self::gpu).
    pub fn module<I: TryInto<usize>>(&self, index: I) -> &MemoryModule {
        bounded(&self.snapshot.memory.modules, index, &EMPTY_MODULE)
    }

    pub fn disk_count(&self) -> usize {
        self.snapshot.disks.len()
    }

    /// Disk by index, with the same bounds contract as [`gpu`](Self::gpu).
    pub fn disk<I: TryInto<usize>>(&self, index: I) -> &DiskMetric {
        bounded(&self.snapshot.disks, index, &EMPTY_DISK)
    }
}

impl Drop for TelemetryEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn bounded<'a, T, I: TryInto<usize>>(items: &'a [T], index: I, empty: &'a T) -> &'a T {
    index
        .try_into()
        .ok()
        .and_then(|i| items.get(i))
        .unwrap_or(empty)
}

fn note_failure(subject: &str, was_available: bool, err: &TelemetryError) {
    if was_available && err.is_structural() {
        tracing::warn!("{} became unavailable: {}", subject, err);
    } else {
        tracing::debug!("{} read failed: {}", subject, err);
    }
}

/// Merge the attributes that were read this tick; missing ones keep their
/// previous value.
fn apply_gpu_reading(gpu: &mut GpuMetric, reading: &GpuReading) {
    if let Some(name) = &reading.name {
        gpu.name.clone_from(name);
    }
    if let Some(utilization) = reading.utilization {
        gpu.utilization = derive::clamp_percent(utilization);
    }
    if let Some(load) = reading.memory_controller_load {
        gpu.memory_controller_load = derive::clamp_percent(load);
    }
    if let Some((used, total)) = reading.memory_bytes {
        let used = used.min(total);
        gpu.memory_used_mb = (used as f64 / BYTES_PER_MB) as f32;
        gpu.memory_total_mb = (total as f64 / BYTES_PER_MB) as f32;
        gpu.memory_percent = derive::percent_of(used as f32, total as f32);
    }
    if let Some(temperature) = reading.temperature_celsius {
        gpu.temperature_celsius = temperature;
    }
    if let Some(clock) = reading.core_clock_mhz {
        gpu.core_clock_mhz = clock;
    }
    if let Some(clock) = reading.memory_clock_mhz {
        gpu.memory_clock_mhz = clock;
    }
    if let Some(fan) = reading.fan_percent {
        gpu.fan_percent = derive::clamp_percent(fan);
    }
    if let Some(draw) = reading.power_draw_watts {
        gpu.power_draw_watts = draw.max(0.0);
    }
    if let Some(limit) = reading.power_limit_watts {
        gpu.power_limit_watts = limit.max(0.0);
    }
    if let Some(width) = reading.pcie_link_width {
        gpu.pcie_link_width = width;
    }
    if let Some(generation) = reading.pcie_generation {
        gpu.pcie_generation = generation;
    }
}

fn derive_gpu_fields(gpu: &mut GpuMetric, reading: &GpuReading, models: &derive::EstimationModels) {
    gpu.video_engine_load = derive::video_engine_load(reading.encoder_load, reading.decoder_load);

    let voltage = derive::estimate_voltage(
        &models.voltage,
        reading.voltage_mv,
        gpu.power_draw_watts,
        gpu.power_limit_watts,
    );
    gpu.current_voltage_mv = voltage.current_mv;
    gpu.max_voltage_mv = voltage.max_mv;
    gpu.voltage_percent = voltage.percent;

    gpu.pcie_bandwidth_gbps =
        derive::pcie_theoretical_bandwidth(&models.pcie, gpu.pcie_link_width, gpu.pcie_generation);
    let throughput = derive::estimate_pcie_throughput(
        &models.pcie,
        gpu.pcie_bandwidth_gbps,
        gpu.utilization,
        gpu.memory_percent,
    );
    gpu.pcie_rx_mbps = throughput.rx_mbps;
    gpu.pcie_tx_mbps = throughput.tx_mbps;
    gpu.pcie_utilization = throughput.utilization;

    gpu.transfer_wait_ms = derive::estimate_transfer_wait(
        &models.wait,
        WaitInputs {
            memory_controller_load: gpu.memory_controller_load,
            gpu_utilization: gpu.utilization,
            pcie_utilization: gpu.pcie_utilization,
            memory_percent: gpu.memory_percent,
        },
    );
}

fn apply_disk_throughput(disk: &mut DiskMetric, throughput: DiskThroughput) {
    let to_gbps = |bytes_per_sec: f64| {
        if bytes_per_sec.is_finite() && bytes_per_sec > 0.0 {
            (bytes_per_sec / BYTES_PER_GB) as f32
        } else {
            0.0
        }
    };
    disk.realtime_read_gbps = to_gbps(throughput.read_bytes_per_sec);
    disk.realtime_write_gbps = to_gbps(throughput.write_bytes_per_sec);
    disk.read_utilization = derive::percent_of(disk.realtime_read_gbps, disk.max_read_gbps);
    disk.write_utilization = derive::percent_of(disk.realtime_write_gbps, disk.max_write_gbps);
    disk.utilization = derive::percent_of(
        disk.realtime_read_gbps + disk.realtime_write_gbps,
        disk.max_read_gbps + disk.max_write_gbps,
    );
}
