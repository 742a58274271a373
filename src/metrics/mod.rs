//! Telemetry collection, derivation and data structures.
//!
//! Sources sit behind the traits in [`traits`]; the concrete adapters for
//! NVML, sysinfo, `/proc/diskstats` and `dmidecode` live beside them. The
//! [`collector::TelemetryEngine`] pulls from every source once per tick,
//! runs the models in [`derive`] and appends to the history rings.

pub mod collector;
pub mod data;
pub mod derive;
pub mod disk;
pub mod history;
pub mod modules;
pub mod system;
pub mod traits;

#[cfg(feature = "nvml")]
pub mod gpu;

// Re-export commonly used items
pub use collector::{EngineState, Sources, TelemetryEngine};
pub use data::TelemetrySnapshot;
pub use history::HistoryRing;
