//! Memory module inventory from the SMBIOS tables.

use crate::error::{Result, TelemetryError};
use crate::metrics::traits::{ModuleInventorySource, ModuleRecord};
use std::process::Command;

/// Parse `dmidecode --type 17` output into installed modules.
///
/// Empty slots and blocks without a usable size are skipped. A configured
/// speed takes precedence over the rated speed.
pub fn parse_dmidecode(output: &str) -> Vec<ModuleRecord> {
    let mut modules = Vec::new();
    let mut current: Option<DeviceBlock> = None;

    for line in output.lines() {
        if line.trim() == "Memory Device" {
            if let Some(block) = current.take() {
                modules.extend(block.into_record());
            }
            current = Some(DeviceBlock::default());
            continue;
        }
        if line.starts_with("Handle ") {
            if let Some(block) = current.take() {
                modules.extend(block.into_record());
            }
            continue;
        }
        let Some(block) = current.as_mut() else {
            continue;
        };
        let Some((key, value)) = line.trim().split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "Size" => block.capacity_gb = parse_size_gb(value),
            "Locator" => block.locator = known(value),
            "Bank Locator" => block.bank_locator = known(value),
            "Type" => block.memory_type = known(value),
            "Speed" => block.rated_speed = parse_speed_mhz(value),
            "Configured Memory Speed" | "Configured Clock Speed" => {
                block.configured_speed = parse_speed_mhz(value)
            }
            _ => {}
        }
    }
    if let Some(block) = current {
        modules.extend(block.into_record());
    }
    modules
}

#[derive(Default)]
struct DeviceBlock {
    capacity_gb: Option<f32>,
    locator: Option<String>,
    bank_locator: Option<String>,
    memory_type: Option<String>,
    rated_speed: Option<u32>,
    configured_speed: Option<u32>,
}

impl DeviceBlock {
    fn into_record(self) -> Option<ModuleRecord> {
        let capacity_gb = self.capacity_gb.filter(|gb| *gb > 0.0)?;
        Some(ModuleRecord {
            locator: self.locator.unwrap_or_else(|| "DIMM".to_string()),
            bank_locator: self.bank_locator,
            capacity_gb,
            speed_mhz: self.configured_speed.or(self.rated_speed),
            memory_type: self.memory_type,
        })
    }
}

fn known(value: &str) -> Option<String> {
    match value {
        "" | "Unknown" | "Not Specified" | "Other" => None,
        v => Some(v.to_string()),
    }
}

/// "16 GB" -> 16.0, "8192 MB" -> 8.0. Anything else is an empty slot.
fn parse_size_gb(value: &str) -> Option<f32> {
    let mut parts = value.split_whitespace();
    let amount: f32 = parts.next()?.parse().ok()?;
    match parts.next()? {
        "TB" => Some(amount * 1024.0),
        "GB" => Some(amount),
        "MB" => Some(amount / 1024.0),
        "kB" | "KB" => Some(amount / 1024.0 / 1024.0),
        _ => None,
    }
}

/// "3200 MT/s" or "3200 MHz" -> 3200.
fn parse_speed_mhz(value: &str) -> Option<u32> {
    value
        .split_whitespace()
        .next()?
        .parse::<u32>()
        .ok()
        .filter(|mhz| *mhz > 0)
}

enum InventoryState {
    Unprobed,
    Ready(Vec<ModuleRecord>),
    Unavailable(String),
}

/// Module inventory read from `dmidecode`, probed once per engine lifetime.
pub struct DmidecodeInventory {
    program: String,
    state: InventoryState,
}

impl DmidecodeInventory {
    pub fn new() -> Self {
        Self::with_program("dmidecode")
    }

    /// Use a different executable, e.g. a wrapper that runs through sudo.
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            state: InventoryState::Unprobed,
        }
    }

    fn probe(&self) -> Result<Vec<ModuleRecord>> {
        let output = Command::new(&self.program)
            .args(["--type", "17"])
            .output()
            .map_err(|e| {
                TelemetryError::unavailable("Memory modules", format!("{}: {}", self.program, e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TelemetryError::unavailable(
                "Memory modules",
                format!("{} exited with {}: {}", self.program, output.status, stderr.trim()),
            ));
        }

        let modules = parse_dmidecode(&String::from_utf8_lossy(&output.stdout));
        if modules.is_empty() {
            return Err(TelemetryError::unavailable(
                "Memory modules",
                "no populated memory devices reported",
            ));
        }
        Ok(modules)
    }
}

impl Default for DmidecodeInventory {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleInventorySource for DmidecodeInventory {
    fn inventory(&mut self) -> Result<Vec<ModuleRecord>> {
        if let InventoryState::Unprobed = self.state {
            self.state = match self.probe() {
                Ok(modules) => {
                    tracing::info!("Found {} memory modules", modules.len());
                    InventoryState::Ready(modules)
                }
                Err(e) => {
                    tracing::warn!("{}, using synthesized module layout", e);
                    InventoryState::Unavailable(e.to_string())
                }
            };
        }

        match &self.state {
            InventoryState::Ready(modules) => Ok(modules.clone()),
            InventoryState::Unavailable(reason) => {
                Err(TelemetryError::unavailable("Memory modules", reason.clone()))
            }
            InventoryState::Unprobed => Err(TelemetryError::unavailable(
                "Memory modules",
                "inventory not probed",
            )),
        }
    }

    fn release(&mut self) {
        self.state = InventoryState::Unprobed;
    }
}
