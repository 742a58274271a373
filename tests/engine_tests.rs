//! Engine behaviour over scripted sources.

use deep_insight::metrics::traits::*;
use deep_insight::{
    DiskType, EngineConfig, EngineState, Result, Sources, TelemetryEngine, TelemetryError,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const GIB: u64 = 1024 * 1024 * 1024;

#[derive(Clone, Default)]
struct Probes {
    gpu_releases: Arc<AtomicUsize>,
    cpu_releases: Arc<AtomicUsize>,
    memory_releases: Arc<AtomicUsize>,
    disk_releases: Arc<AtomicUsize>,
    disk_enumerations: Arc<AtomicUsize>,
    module_probes: Arc<AtomicUsize>,
}

impl Probes {
    fn releases(&self) -> [usize; 4] {
        [
            self.gpu_releases.load(Ordering::SeqCst),
            self.cpu_releases.load(Ordering::SeqCst),
            self.memory_releases.load(Ordering::SeqCst),
            self.disk_releases.load(Ordering::SeqCst),
        ]
    }
}

struct FakeGpu {
    count: Option<u32>,
    script: VecDeque<Result<GpuReading>>,
    steady: GpuReading,
    releases: Arc<AtomicUsize>,
}

impl GpuSource for FakeGpu {
    fn enumerate(&mut self) -> Result<u32> {
        self.count
            .ok_or_else(|| TelemetryError::unavailable("GPU", "no driver"))
    }

    fn sample(&mut self, _index: u32) -> Result<GpuReading> {
        self.script
            .pop_front()
            .unwrap_or_else(|| Ok(self.steady.clone()))
    }

    fn release(&mut self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

struct FakeCpu {
    script: VecDeque<Result<f32>>,
    steady: f32,
    cores: Vec<f32>,
    temperature: Option<f32>,
    releases: Arc<AtomicUsize>,
}

impl CpuSource for FakeCpu {
    fn sample(&mut self) -> Result<CpuReading> {
        let usage = self.script.pop_front().unwrap_or(Ok(self.steady));
        usage.map(|utilization| CpuReading {
            utilization,
            core_utilization: self.cores.clone(),
            temperature_celsius: self.temperature,
        })
    }

    fn release(&mut self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

struct FakeMemory {
    script: VecDeque<Result<MemoryReading>>,
    steady: MemoryReading,
    releases: Arc<AtomicUsize>,
}

impl MemorySource for FakeMemory {
    fn sample(&mut self) -> Result<MemoryReading> {
        self.script.pop_front().unwrap_or(Ok(self.steady))
    }

    fn release(&mut self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

struct FakeDisks {
    volumes: Vec<VolumeInfo>,
    /// `None` fails that volume with a transient error
    steady: Vec<Option<DiskThroughput>>,
    enumerations: Arc<AtomicUsize>,
    releases: Arc<AtomicUsize>,
}

impl DiskSource for FakeDisks {
    fn enumerate(&mut self) -> Result<Vec<VolumeInfo>> {
        self.enumerations.fetch_add(1, Ordering::SeqCst);
        Ok(self.volumes.clone())
    }

    fn sample(&mut self) -> Vec<Result<DiskThroughput>> {
        self.steady
            .iter()
            .map(|rate| rate.ok_or_else(|| TelemetryError::transient("counter missing")))
            .collect()
    }

    fn release(&mut self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

struct FakeModules {
    records: Option<Vec<ModuleRecord>>,
    probes: Arc<AtomicUsize>,
}

impl ModuleInventorySource for FakeModules {
    fn inventory(&mut self) -> Result<Vec<ModuleRecord>> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        self.records
            .clone()
            .ok_or_else(|| TelemetryError::unavailable("Memory modules", "no SMBIOS"))
    }
}

fn busy_gpu() -> GpuReading {
    GpuReading {
        name: Some("Fake RTX".to_string()),
        utilization: Some(60.0),
        memory_controller_load: Some(40.0),
        memory_bytes: Some((4 * GIB, 16 * GIB)),
        temperature_celsius: Some(65.0),
        core_clock_mhz: Some(2100),
        memory_clock_mhz: Some(10_000),
        fan_percent: Some(45.0),
        power_draw_watts: Some(200.0),
        power_limit_watts: Some(450.0),
        encoder_load: Some(10.0),
        decoder_load: Some(30.0),
        voltage_mv: None,
        pcie_link_width: Some(16),
        pcie_generation: Some(4),
    }
}

fn volume(device: &str, total_gb: u64, medium: ReportedMedium) -> VolumeInfo {
    VolumeInfo {
        device: device.to_string(),
        mount_point: format!("/mnt/{}", device),
        total_bytes: total_gb * GIB,
        medium,
        model: None,
    }
}

/// Everything healthy: one GPU, 16 GB of memory, two disks, no inventory.
struct Rig {
    gpu: FakeGpu,
    cpu: FakeCpu,
    memory: FakeMemory,
    disks: FakeDisks,
    modules: FakeModules,
    probes: Probes,
}

impl Rig {
    fn new() -> Self {
        let probes = Probes::default();
        Self {
            gpu: FakeGpu {
                count: Some(1),
                script: VecDeque::new(),
                steady: busy_gpu(),
                releases: probes.gpu_releases.clone(),
            },
            cpu: FakeCpu {
                script: VecDeque::new(),
                steady: 25.0,
                cores: vec![20.0, 30.0],
                temperature: Some(55.0),
                releases: probes.cpu_releases.clone(),
            },
            memory: FakeMemory {
                script: VecDeque::new(),
                steady: MemoryReading {
                    total_bytes: 16 * GIB,
                    available_bytes: 4 * GIB,
                },
                releases: probes.memory_releases.clone(),
            },
            disks: FakeDisks {
                volumes: vec![
                    volume("nvme0n1p2", 1000, ReportedMedium::SolidState),
                    volume("sda1", 4000, ReportedMedium::Rotational),
                ],
                steady: vec![
                    Some(DiskThroughput {
                        read_bytes_per_sec: 0.5 * GIB as f64,
                        write_bytes_per_sec: 0.25 * GIB as f64,
                    }),
                    Some(DiskThroughput::default()),
                ],
                enumerations: probes.disk_enumerations.clone(),
                releases: probes.disk_releases.clone(),
            },
            modules: FakeModules {
                records: None,
                probes: probes.module_probes.clone(),
            },
            probes,
        }
    }

    fn engine(self, config: EngineConfig) -> (TelemetryEngine, Probes) {
        let sources = Sources {
            gpu: Some(Box::new(self.gpu)),
            cpu: Box::new(self.cpu),
            memory: Box::new(self.memory),
            disks: Box::new(self.disks),
            modules: Some(Box::new(self.modules)),
        };
        (TelemetryEngine::with_sources(config, sources), self.probes)
    }
}

fn running(rig: Rig) -> (TelemetryEngine, Probes) {
    let (mut engine, probes) = rig.engine(EngineConfig::default());
    engine.initialize().expect("initialize");
    (engine, probes)
}

fn all_percentages(engine: &TelemetryEngine) -> Vec<f32> {
    let snapshot = engine.snapshot();
    let mut values = vec![snapshot.cpu.utilization, snapshot.memory.percent];
    values.extend(snapshot.cpu.core_utilization.iter().copied());
    for gpu in &snapshot.gpus {
        values.extend([
            gpu.utilization,
            gpu.memory_percent,
            gpu.fan_percent,
            gpu.memory_controller_load,
            gpu.video_engine_load,
            gpu.voltage_percent,
            gpu.pcie_utilization,
        ]);
    }
    for module in &snapshot.memory.modules {
        values.push(module.utilization);
    }
    for disk in &snapshot.disks {
        values.extend([disk.read_utilization, disk.write_utilization, disk.utilization]);
    }
    let bandwidth = &snapshot.bandwidth;
    for bus in [&bandwidth.pcie, &bandwidth.memory, &bandwidth.storage, &bandwidth.vram] {
        values.push(bus.utilization);
    }
    values
}

#[test]
fn test_percentages_stay_in_range() {
    let mut rig = Rig::new();
    rig.gpu.steady.utilization = Some(250.0);
    rig.gpu.steady.fan_percent = Some(-20.0);
    rig.gpu.steady.memory_bytes = Some((20 * GIB, 16 * GIB));
    rig.gpu.steady.power_draw_watts = Some(900.0);
    rig.cpu.script = VecDeque::from(vec![Ok(f32::NAN), Ok(180.0)]);
    rig.disks.steady[1] = Some(DiskThroughput {
        read_bytes_per_sec: 50.0 * GIB as f64,
        write_bytes_per_sec: 50.0 * GIB as f64,
    });
    let (mut engine, _) = running(rig);

    for _ in 0..5 {
        engine.update();
        for value in all_percentages(&engine) {
            assert!(
                value.is_finite() && (0.0..=100.0).contains(&value),
                "percentage out of range: {}",
                value
            );
        }
    }
    assert!(engine.cpu().utilization_history.iter().all(|v| v.is_finite()));
}

#[test]
fn test_memory_used_is_total_minus_available() {
    let mut rig = Rig::new();
    rig.memory.script = VecDeque::from(vec![
        Ok(MemoryReading {
            total_bytes: 16 * GIB,
            available_bytes: 5 * GIB + 12345,
        }),
        Ok(MemoryReading {
            total_bytes: 8 * GIB,
            available_bytes: 9 * GIB,
        }),
    ]);
    let (mut engine, _) = running(rig);

    engine.update();
    let memory = engine.memory();
    assert_eq!(memory.used_gb, memory.total_gb - memory.available_gb);

    engine.update();
    let memory = engine.memory();
    assert_eq!(memory.used_gb, memory.total_gb - memory.available_gb);
    assert_eq!(memory.used_gb, 0.0);
    assert_eq!(memory.percent, 0.0);
}

#[test]
fn test_zero_total_memory_gives_zero_percent() {
    let mut rig = Rig::new();
    rig.memory.steady = MemoryReading {
        total_bytes: 0,
        available_bytes: 0,
    };
    let (mut engine, _) = running(rig);
    engine.update();

    assert!(engine.memory().available);
    assert_eq!(engine.memory().percent, 0.0);
    assert_eq!(engine.memory().percent_history.last(), Some(0.0));
    assert_eq!(engine.module_count(), 0);
    assert_eq!(engine.system_bandwidth().memory.max_gbps, 0.0);
}

#[test]
fn test_out_of_range_accessors_return_defaults() {
    let (mut engine, _) = running(Rig::new());
    engine.update();

    assert_eq!(engine.gpu_count(), 1);
    assert!(engine.gpu(0).available);
    assert!(!engine.gpu(-1).available);
    assert!(!engine.gpu(1).available);
    assert!(!engine.gpu(usize::MAX).available);
    assert_eq!(engine.gpu(-1).utilization, 0.0);

    assert_eq!(engine.disk_count(), 2);
    assert!(!engine.disk(-1).available);
    assert!(!engine.disk(2i64).available);
    assert_eq!(engine.disk(2u8).name, "Unknown");

    assert_eq!(engine.module(-3).capacity_gb, 0.0);
    assert_eq!(engine.module(engine.module_count()).capacity_gb, 0.0);
}

#[test]
fn test_shutdown_twice_releases_once() {
    let (mut engine, probes) = running(Rig::new());
    engine.update();

    engine.shutdown();
    engine.shutdown();
    assert_eq!(engine.state(), EngineState::ShutDown);
    assert_eq!(probes.releases(), [1, 1, 1, 1]);

    let tick = engine.snapshot().tick;
    engine.update();
    assert_eq!(engine.snapshot().tick, tick);

    drop(engine);
    assert_eq!(probes.releases(), [1, 1, 1, 1]);
}

#[test]
fn test_shutdown_without_initialize() {
    let (mut engine, probes) = Rig::new().engine(EngineConfig::default());
    engine.shutdown();
    engine.shutdown();
    assert_eq!(probes.releases(), [1, 1, 1, 1]);
    assert_eq!(probes.disk_enumerations.load(Ordering::SeqCst), 0);
}

#[test]
fn test_drop_releases_sources() {
    let (engine, probes) = running(Rig::new());
    drop(engine);
    assert_eq!(probes.releases(), [1, 1, 1, 1]);
}

#[test]
fn test_update_initializes_lazily() {
    let (mut engine, _) = Rig::new().engine(EngineConfig::default());
    assert_eq!(engine.state(), EngineState::Uninitialized);

    engine.update();
    assert_eq!(engine.state(), EngineState::Running);
    assert_eq!(engine.snapshot().tick, 1);
    assert!(engine.snapshot().timestamp.is_some());

    // Idempotent
    engine.initialize().unwrap();
    assert_eq!(engine.gpu_count(), 1);
}

#[test]
fn test_invalid_config_is_rejected() {
    let (mut engine, _) = Rig::new().engine(EngineConfig::default().with_history_capacity(0));
    assert!(matches!(engine.initialize(), Err(TelemetryError::Config(_))));

    engine.update();
    assert_eq!(engine.snapshot().tick, 0);
    assert_eq!(engine.state(), EngineState::Uninitialized);
}

#[test]
fn test_oversized_history_capacity_is_rejected() {
    let config = EngineConfig::default().with_history_capacity(usize::MAX);
    let (mut engine, _) = Rig::new().engine(config);

    assert_eq!(
        engine.snapshot().cpu.utilization_history.capacity(),
        deep_insight::MAX_HISTORY_CAPACITY
    );
    assert!(matches!(engine.initialize(), Err(TelemetryError::Config(_))));
    assert_eq!(engine.state(), EngineState::Uninitialized);
}

#[test]
fn test_missing_gpu_subsystem_degrades_to_zero_devices() {
    let mut rig = Rig::new();
    rig.gpu.count = None;
    let (mut engine, _) = rig.engine(EngineConfig::default());

    assert!(engine.initialize().is_ok());
    engine.update();
    assert_eq!(engine.gpu_count(), 0);
    assert_eq!(engine.system_bandwidth().pcie.max_gbps, 0.0);
    assert_eq!(engine.system_bandwidth().vram.max_gbps, 0.0);
    assert!(engine.cpu().available);
}

#[test]
fn test_structural_gpu_failure_marks_unavailable() {
    let mut rig = Rig::new();
    rig.gpu.script = VecDeque::from(vec![
        Ok(busy_gpu()),
        Err(TelemetryError::structural("gpu lost")),
    ]);
    let (mut engine, _) = running(rig);

    engine.update();
    assert!(engine.gpu(0).available);
    let before = engine.gpu(0).utilization_history.to_vec();

    engine.update();
    let gpu = engine.gpu(0);
    assert!(!gpu.available);
    assert_eq!(gpu.utilization_history.to_vec(), before);
    assert_eq!(gpu.temperature_history.len(), 1);
    // Other subsystems carry on
    assert_eq!(engine.cpu().utilization_history.len(), 2);
    // Unavailable devices drop out of the bus totals
    assert_eq!(engine.system_bandwidth().pcie.max_gbps, 0.0);
}

#[test]
fn test_transient_gpu_failure_keeps_last_values() {
    let mut rig = Rig::new();
    rig.gpu.script = VecDeque::from(vec![
        Ok(busy_gpu()),
        Err(TelemetryError::transient("timeout")),
    ]);
    let (mut engine, _) = running(rig);

    engine.update();
    engine.update();
    let gpu = engine.gpu(0);
    assert!(gpu.available);
    assert_eq!(gpu.utilization, 60.0);
    assert_eq!(gpu.utilization_history.len(), 1);

    engine.update();
    assert_eq!(engine.gpu(0).utilization_history.len(), 2);
}

#[test]
fn test_missing_attribute_keeps_previous_value() {
    let mut rig = Rig::new();
    let mut partial = busy_gpu();
    partial.temperature_celsius = None;
    partial.utilization = Some(80.0);
    rig.gpu.script = VecDeque::from(vec![Ok(busy_gpu()), Ok(partial)]);
    let (mut engine, _) = running(rig);

    engine.update();
    engine.update();
    let gpu = engine.gpu(0);
    assert_eq!(gpu.temperature_celsius, 65.0);
    assert_eq!(gpu.utilization, 80.0);
    assert_eq!(gpu.temperature_history.to_vec(), vec![65.0, 65.0]);
}

#[test]
fn test_gpu_derivations() {
    let (mut engine, _) = running(Rig::new());
    engine.update();
    let gpu = engine.gpu(0);

    assert_eq!(gpu.name, "Fake RTX");
    assert!((gpu.pcie_bandwidth_gbps - 20.0).abs() < 1e-4);
    assert_eq!(gpu.video_engine_load, 30.0);
    assert_eq!(gpu.memory_percent, 25.0);
    // Loads sit below every wait threshold
    assert_eq!(gpu.transfer_wait_ms, 0.0);
    assert!(gpu.current_voltage_mv > 700.0 && gpu.current_voltage_mv <= gpu.max_voltage_mv);
    assert!(gpu.pcie_rx_mbps > gpu.pcie_tx_mbps);
    assert_eq!(gpu.pcie_rx_history.len(), 1);
}

#[test]
fn test_partial_disk_failure() {
    let mut rig = Rig::new();
    rig.disks.steady[1] = None;
    let (mut engine, probes) = running(rig);

    assert_eq!(engine.disk_count(), 0);
    for _ in 0..3 {
        engine.update();
    }
    assert_eq!(probes.disk_enumerations.load(Ordering::SeqCst), 1);

    let nvme = engine.disk(0);
    assert!(nvme.available);
    assert_eq!(nvme.disk_type, DiskType::Nvme);
    assert!((nvme.realtime_read_gbps - 0.5).abs() < 1e-6);
    assert_eq!(nvme.read_history.len(), 3);

    let hdd = engine.disk(1);
    assert!(!hdd.available);
    assert_eq!(hdd.disk_type, DiskType::Hdd);
    assert!(hdd.read_history.is_empty());
    // Classified disks still count toward the storage bus
    let storage = &engine.system_bandwidth().storage;
    assert!((storage.max_gbps - (3.5 + 0.2)).abs() < 1e-4);
}

#[test]
fn test_short_disk_sample_fails_trailing_volumes() {
    let mut rig = Rig::new();
    rig.disks.steady.truncate(1);
    let (mut engine, _) = running(rig);

    for _ in 0..3 {
        engine.update();
    }

    assert_eq!(engine.disk_count(), 2);
    assert!(engine.disk(0).available);
    assert_eq!(engine.disk(0).read_history.len(), 3);

    let trailing = engine.disk(1);
    assert!(!trailing.available);
    assert!(trailing.read_history.is_empty());
    assert!(trailing.write_history.is_empty());
}

#[test]
fn test_fallback_modules_for_16_gb() {
    let (mut engine, probes) = running(Rig::new());
    for _ in 0..3 {
        engine.update();
    }

    let count = engine.module_count();
    assert!((1..=8).contains(&count));
    let total: f32 = (0..count).map(|i| engine.module(i).capacity_gb).sum();
    assert!((total - 16.0).abs() < 0.01);
    assert_eq!(engine.module(0).memory_type, "DDR4");
    assert_eq!(engine.module(0).bandwidth_history.len(), 3);
    assert_eq!(probes.module_probes.load(Ordering::SeqCst), 1);
}

#[test]
fn test_authoritative_inventory_wins() {
    let mut rig = Rig::new();
    rig.modules.records = Some(vec![
        ModuleRecord {
            locator: "ChannelA-DIMM0".to_string(),
            bank_locator: Some("BANK 0".to_string()),
            capacity_gb: 8.0,
            speed_mhz: Some(3200),
            memory_type: Some("DDR4".to_string()),
        },
        ModuleRecord {
            locator: "ChannelB-DIMM0".to_string(),
            bank_locator: Some("BANK 1".to_string()),
            capacity_gb: 8.0,
            speed_mhz: Some(3200),
            memory_type: Some("DDR4".to_string()),
        },
    ]);
    let (mut engine, _) = running(rig);
    engine.update();

    assert_eq!(engine.module_count(), 2);
    assert_eq!(engine.module(1).name, "ChannelB-DIMM0");
    assert_eq!(engine.module(1).channel, 1);
    assert!((engine.module(0).max_bandwidth_gbps - 25.6).abs() < 1e-4);
}

#[test]
fn test_history_capacity_is_respected() {
    let mut rig = Rig::new();
    rig.cpu.script = (0..12).map(|i| Ok(i as f32)).collect();
    let (mut engine, _) = rig.engine(EngineConfig::default().with_history_capacity(5));
    engine.initialize().unwrap();

    for _ in 0..12 {
        engine.update();
    }
    assert_eq!(engine.cpu().utilization_history.to_vec(), vec![7.0, 8.0, 9.0, 10.0, 11.0]);
    assert_eq!(engine.gpu(0).utilization_history.len(), 5);
    assert_eq!(engine.system_bandwidth().total_history.len(), 5);
    assert_eq!(engine.disk(0).write_history.len(), 5);
}

#[test]
fn test_system_bandwidth_totals() {
    let (mut engine, _) = running(Rig::new());
    engine.update();
    let bandwidth = engine.system_bandwidth();

    let sum = bandwidth.pcie.max_gbps
        + bandwidth.memory.max_gbps
        + bandwidth.storage.max_gbps
        + bandwidth.vram.max_gbps;
    assert!((bandwidth.total_system_bandwidth - sum).abs() < 1e-3);
    assert!((bandwidth.memory.max_gbps - 42.7).abs() < 1e-4);
    assert!((bandwidth.vram.max_gbps - 320.0).abs() < 1e-3);
    assert_eq!(bandwidth.memory_bandwidth, bandwidth.memory.max_gbps);
    assert_eq!(bandwidth.pcie_total_bandwidth, bandwidth.pcie.max_gbps);
    assert_eq!(bandwidth.memory_type, "DDR4");
    assert_eq!(bandwidth.memory_speed_mhz, 2666);
}

#[test]
fn test_cpu_failure_is_isolated() {
    let mut rig = Rig::new();
    rig.cpu.script = VecDeque::from(vec![
        Ok(10.0),
        Err(TelemetryError::unavailable("CPU", "no processors reported")),
    ]);
    let (mut engine, _) = running(rig);

    engine.update();
    engine.update();
    assert!(!engine.cpu().available);
    assert_eq!(engine.cpu().utilization_history.len(), 1);
    assert_eq!(engine.memory().percent_history.len(), 2);
    assert_eq!(engine.snapshot().tick, 2);
}

#[test]
fn test_cpu_cores_and_temperature() {
    let mut rig = Rig::new();
    rig.cpu.cores = vec![12.0, 140.0, -3.0, f32::NAN];
    rig.cpu.script = VecDeque::from([Ok(40.0), Err(TelemetryError::transient("busy"))]);
    let (mut engine, _) = running(rig);

    engine.update();
    let cpu = engine.cpu();
    assert_eq!(cpu.core_utilization, vec![12.0, 100.0, 0.0, 0.0]);
    assert_eq!(cpu.temperature_celsius, 55.0);

    // A failed tick keeps the previous per-core figures
    engine.update();
    let cpu = engine.cpu();
    assert_eq!(cpu.core_utilization.len(), 4);
    assert_eq!(cpu.utilization, 40.0);
    assert_eq!(cpu.utilization_history.len(), 1);
}
