//! # Deep Insight - Desktop Telemetry Synthesis
//!
//! A telemetry engine for a desktop hardware dashboard. It samples GPU, CPU,
//! memory, disk and memory-module counters once per frame, fills the gaps the
//! drivers leave with explicit estimation models, and keeps a bounded rolling
//! history for every series.
//!
//! ## Features
//!
//! - **GPU counters via NVML**: utilization, memory, clocks, power, PCIe link (feature `nvml`)
//! - **Derived metrics**: voltage, PCIe throughput, transfer wait, per-bus bandwidth
//! - **Graceful degradation**: a missing subsystem becomes zero entries, a failed read keeps the last value
//! - **Pluggable sources**: every counter sits behind a trait, so tests and other platforms swap them
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use deep_insight::{EngineConfig, TelemetryEngine};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut engine = TelemetryEngine::new(EngineConfig::default());
//!     engine.initialize()?;
//!
//!     for _ in 0..60 {
//!         engine.update();
//!         println!("CPU {:.1}%", engine.cpu().utilization);
//!         std::thread::sleep(std::time::Duration::from_millis(16));
//!     }
//!
//!     engine.shutdown();
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod metrics;

// Re-export public API
pub use config::EngineConfig;
pub use error::{Result, TelemetryError};
pub use metrics::{
    collector::{EngineState, Sources, TelemetryEngine},
    data::{
        BusBandwidth, CpuMetric, DiskMetric, DiskType, GpuMetric, MemoryMetric, MemoryModule,
        SystemBandwidthMetric, TelemetrySnapshot,
    },
    derive::EstimationModels,
    history::HistoryRing,
};

/// Samples kept per history series (about two minutes at one sample per second)
pub const DEFAULT_HISTORY_CAPACITY: usize = 120;

/// Largest accepted history capacity (one day at one sample per second)
pub const MAX_HISTORY_CAPACITY: usize = 86_400;

/// The default frame interval in milliseconds
pub const DEFAULT_FRAME_INTERVAL_MS: u64 = 16;
