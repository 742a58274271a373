//! Deep Insight - Desktop Telemetry Binary
//!
//! Drives the telemetry engine at frame cadence and prints what it sees.

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use deep_insight::{EngineConfig, TelemetryEngine, TelemetrySnapshot, DEFAULT_FRAME_INTERVAL_MS};
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "deep_insight")]
#[command(about = "Deep Insight - GPU, CPU, memory and bandwidth telemetry")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(author = "Austin Couch")]
#[command(
    long_about = "Samples hardware counters once per frame, estimates what the drivers do not report, and keeps a rolling history"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Frame interval in milliseconds
    #[arg(short, long, default_value_t = DEFAULT_FRAME_INTERVAL_MS)]
    interval: u64,

    /// Engine configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Disable GPU sampling
    #[arg(long)]
    no_gpu: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the update loop (default)
    Run(RunArgs),

    /// Take a single snapshot and exit
    Snapshot(SnapshotArgs),

    /// Show detected devices, disks and memory modules
    Info,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// One line per emitted tick
    Summary,
    /// Full report
    Pretty,
    /// Snapshot as JSON
    Json,
}

#[derive(Args)]
struct RunArgs {
    /// Stop after this many ticks
    #[arg(long)]
    ticks: Option<u64>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Summary)]
    format: OutputFormat,

    /// Emit output every N ticks
    #[arg(long, default_value_t = 60)]
    every: u64,
}

impl Default for RunArgs {
    fn default() -> Self {
        Self {
            ticks: None,
            format: OutputFormat::Summary,
            every: 60,
        }
    }
}

#[derive(Args)]
struct SnapshotArgs {
    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Pretty)]
    format: OutputFormat,

    /// Delay between the baseline and the reported sample in milliseconds
    #[arg(long, default_value_t = 250)]
    delay_ms: u64,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing/logging
    init_logging(&cli)?;

    match &cli.command {
        Some(Commands::Run(args)) => run_command(&cli, args).await?,
        Some(Commands::Snapshot(args)) => snapshot_command(&cli, args).await?,
        Some(Commands::Info) => info_command(&cli)?,
        None => run_command(&cli, &RunArgs::default()).await?,
    }

    Ok(())
}

fn init_logging(cli: &Cli) -> anyhow::Result<()> {
    let level = if cli.debug {
        Level::DEBUG
    } else if cli.verbose {
        Level::INFO
    } else {
        Level::WARN
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    Ok(())
}

fn load_config(cli: &Cli) -> anyhow::Result<EngineConfig> {
    let config = match &cli.config {
        Some(path) => EngineConfig::from_json_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => EngineConfig::default(),
    };
    Ok(if cli.no_gpu {
        config.with_gpu(false)
    } else {
        config
    })
}

fn print_banner() {
    println!("Deep Insight - Desktop Telemetry");
    println!("   Version: {}", env!("CARGO_PKG_VERSION"));
    println!();
}

async fn run_command(cli: &Cli, args: &RunArgs) -> anyhow::Result<()> {
    let mut engine = TelemetryEngine::new(load_config(cli)?);
    engine.initialize()?;

    if args.format != OutputFormat::Json {
        print_banner();
    }
    info!("Running update loop every {}ms", cli.interval);

    let period = Duration::from_millis(cli.interval.max(1));
    let start = tokio::time::Instant::now() + first_tick_delay(period);
    let mut interval = tokio::time::interval_at(start, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let result = loop {
        tokio::select! {
            _ = interval.tick() => {
                engine.update();
                let snapshot = engine.snapshot();

                if args.every > 0 && snapshot.tick % args.every == 0 {
                    if let Err(e) = emit(snapshot, args.format) {
                        break Err(e);
                    }
                }
                if args.ticks.is_some_and(|limit| snapshot.tick >= limit) {
                    break Ok(());
                }
            }
            _ = &mut ctrl_c => {
                info!("Interrupted, shutting down");
                break Ok(());
            }
        }
    };

    engine.shutdown();
    result
}

/// Delay before the first loop tick. CPU usage is a delta against the
/// baseline taken in `initialize`, so it needs at least sysinfo's minimum
/// refresh interval.
fn first_tick_delay(period: Duration) -> Duration {
    period.max(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL)
}

async fn snapshot_command(cli: &Cli, args: &SnapshotArgs) -> anyhow::Result<()> {
    let mut engine = TelemetryEngine::new(load_config(cli)?);
    engine.initialize()?;

    // The first cycle only establishes counter baselines.
    engine.update();
    tokio::time::sleep(Duration::from_millis(args.delay_ms)).await;
    engine.update();

    let result = emit(engine.snapshot(), args.format);
    engine.shutdown();
    result
}

fn info_command(cli: &Cli) -> anyhow::Result<()> {
    let mut engine = TelemetryEngine::new(load_config(cli)?);
    engine.initialize()?;
    engine.update();

    print_banner();
    println!("GPUs: {}", engine.gpu_count());
    for index in 0..engine.gpu_count() {
        let gpu = engine.gpu(index);
        println!(
            "  [{}] {} ({:.0} MB, PCIe {}.0 x{}, {:.1} GB/s)",
            index,
            gpu.name,
            gpu.memory_total_mb,
            gpu.pcie_generation,
            gpu.pcie_link_width,
            gpu.pcie_bandwidth_gbps
        );
    }
    println!();

    let memory = engine.memory();
    println!(
        "Memory: {:.1} GB {} @ {} MHz",
        memory.total_gb,
        engine.system_bandwidth().memory_type,
        engine.system_bandwidth().memory_speed_mhz
    );
    for index in 0..engine.module_count() {
        let module = engine.module(index);
        println!(
            "  {}: {:.1} GB {} {} MHz, channel {}",
            module.name, module.capacity_gb, module.memory_type, module.speed_mhz, module.channel
        );
    }
    println!();

    println!("Disks: {}", engine.disk_count());
    for index in 0..engine.disk_count() {
        let disk = engine.disk(index);
        println!(
            "  {} on {}: {} {}, {:.1} GB",
            disk.name, disk.mount_point, disk.disk_type, disk.model, disk.total_size_gb
        );
    }
    println!();

    println!("Features compiled:");
    #[cfg(feature = "nvml")]
    println!("  - NVML support: ✓");
    #[cfg(not(feature = "nvml"))]
    println!("  - NVML support: ✗");

    engine.shutdown();
    Ok(())
}

fn emit(snapshot: &TelemetrySnapshot, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Summary => print_summary(snapshot),
        OutputFormat::Pretty => print_pretty_snapshot(snapshot),
        OutputFormat::Json => println!("{}", serde_json::to_string(snapshot)?),
    }
    Ok(())
}

fn print_summary(snapshot: &TelemetrySnapshot) {
    let gpu = snapshot
        .gpus
        .iter()
        .find(|gpu| gpu.available)
        .map(|gpu| format!("GPU {:5.1}% {:4.1} ms", gpu.utilization, gpu.transfer_wait_ms))
        .unwrap_or_else(|| "GPU   n/a".to_string());
    println!(
        "#{:<6} CPU {:5.1}%  MEM {:5.1}%  {}  BW {:6.1}/{:6.1} GB/s",
        snapshot.tick,
        snapshot.cpu.utilization,
        snapshot.memory.percent,
        gpu,
        snapshot.bandwidth.memory.realtime_gbps
            + snapshot.bandwidth.pcie.realtime_gbps
            + snapshot.bandwidth.storage.realtime_gbps
            + snapshot.bandwidth.vram.realtime_gbps,
        snapshot.bandwidth.total_system_bandwidth
    );
}

fn print_pretty_snapshot(snapshot: &TelemetrySnapshot) {
    let taken = snapshot
        .timestamp
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "never".to_string());
    println!("Telemetry Snapshot #{} ({})", snapshot.tick, taken);
    println!("==========================================");
    println!();

    for (index, gpu) in snapshot.gpus.iter().enumerate() {
        println!("🎮 GPU {}: {}", index, gpu.name);
        if !gpu.available {
            println!("  Status: unavailable");
            println!();
            continue;
        }
        println!("  Usage: {:.1}%", gpu.utilization);
        println!(
            "  Memory: {:.0} / {:.0} MB ({:.1}%)",
            gpu.memory_used_mb, gpu.memory_total_mb, gpu.memory_percent
        );
        println!("  Temperature: {:.1}°C", gpu.temperature_celsius);
        println!(
            "  Clocks: {} MHz core, {} MHz memory",
            gpu.core_clock_mhz, gpu.memory_clock_mhz
        );
        println!(
            "  Power: {:.1} / {:.1} W, fan {:.0}%",
            gpu.power_draw_watts, gpu.power_limit_watts, gpu.fan_percent
        );
        println!(
            "  Voltage (est.): {:.0} / {:.0} mV ({:.1}%)",
            gpu.current_voltage_mv, gpu.max_voltage_mv, gpu.voltage_percent
        );
        println!(
            "  PCIe {}.0 x{}: RX {:.0} MB/s, TX {:.0} MB/s ({:.1}% of {:.1} GB/s)",
            gpu.pcie_generation,
            gpu.pcie_link_width,
            gpu.pcie_rx_mbps,
            gpu.pcie_tx_mbps,
            gpu.pcie_utilization,
            gpu.pcie_bandwidth_gbps
        );
        println!(
            "  Memory controller {:.1}%, video engine {:.1}%, transfer wait {:.2} ms",
            gpu.memory_controller_load, gpu.video_engine_load, gpu.transfer_wait_ms
        );
        println!();
    }

    println!("⚡ CPU:");
    println!("  Usage: {:.1}%", snapshot.cpu.utilization);
    if snapshot.cpu.temperature_celsius > 0.0 {
        println!("  Temperature: {:.1}°C", snapshot.cpu.temperature_celsius);
    }
    if !snapshot.cpu.core_utilization.is_empty() {
        let cores: Vec<String> = snapshot
            .cpu
            .core_utilization
            .iter()
            .map(|usage| format!("{:.0}%", usage))
            .collect();
        println!("  Cores: {}", cores.join(" "));
    }
    println!();

    let memory = &snapshot.memory;
    println!("🧠 Memory:");
    println!("  Total: {:.1} GB", memory.total_gb);
    println!("  Used: {:.1} GB ({:.1}%)", memory.used_gb, memory.percent);
    println!("  Available: {:.1} GB", memory.available_gb);
    for module in &memory.modules {
        println!(
            "  {}: {:.1} GB {} {} MHz, {:.1} / {:.1} GB/s",
            module.name,
            module.capacity_gb,
            module.memory_type,
            module.speed_mhz,
            module.realtime_bandwidth_gbps,
            module.max_bandwidth_gbps
        );
    }
    println!();

    if !snapshot.disks.is_empty() {
        println!("💾 Disks:");
        for disk in &snapshot.disks {
            println!(
                "  {} ({}, {}): R {:.3} / W {:.3} GB/s, {:.1}% busy",
                disk.mount_point,
                disk.name,
                disk.disk_type,
                disk.realtime_read_gbps,
                disk.realtime_write_gbps,
                disk.utilization
            );
        }
        println!();
    }

    let bandwidth = &snapshot.bandwidth;
    println!("🔀 Bandwidth (GB/s):");
    for (label, bus) in [
        ("PCIe", &bandwidth.pcie),
        ("Memory", &bandwidth.memory),
        ("Storage", &bandwidth.storage),
        ("VRAM", &bandwidth.vram),
    ] {
        println!(
            "  {:<8} {:8.2} / {:8.2} ({:.1}%)",
            label, bus.realtime_gbps, bus.max_gbps, bus.utilization
        );
    }
    println!("  Total    {:8.2}", bandwidth.total_system_bandwidth);
}
