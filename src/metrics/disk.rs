//! Volume enumeration and I/O counters.
//!
//! Volumes come from sysinfo; throughput comes from the sector counters in
//! `/proc/diskstats`, differenced against the previous sample.

use crate::error::{Result, TelemetryError};
use crate::metrics::traits::{DiskSource, DiskThroughput, ReportedMedium, VolumeInfo};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::PathBuf;
use std::time::Instant;
use sysinfo::{DiskKind, Disks};

const SECTOR_BYTES: u64 = 512;

/// Cumulative sector counters of one block device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiskCounters {
    pub sectors_read: u64,
    pub sectors_written: u64,
}

/// Parse `/proc/diskstats` into counters keyed by device name.
///
/// Lines with fewer than ten fields or non-numeric counters are skipped.
pub fn parse_diskstats(contents: &str) -> HashMap<String, DiskCounters> {
    contents
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 10 {
                return None;
            }
            let sectors_read = fields[5].parse().ok()?;
            let sectors_written = fields[9].parse().ok()?;
            Some((
                fields[2].to_string(),
                DiskCounters {
                    sectors_read,
                    sectors_written,
                },
            ))
        })
        .collect()
}

/// Whole-disk device for a partition: `nvme0n1p2` -> `nvme0n1`,
/// `sda1` -> `sda`. Names that are not partitions come back unchanged.
pub fn block_device_parent(device: &str) -> &str {
    let digits_start = device
        .rfind(|c: char| !c.is_ascii_digit())
        .map(|i| i + 1)
        .unwrap_or(0);
    if digits_start == device.len() || digits_start == 0 {
        return device;
    }
    let stem = &device[..digits_start];

    // nvme0n1p1, mmcblk0p1, loop0p1
    if let Some(base) = stem.strip_suffix('p') {
        if base.ends_with(|c: char| c.is_ascii_digit()) {
            return base;
        }
    }
    // sda1, vdb2, xvda1, hdc3
    if ["sd", "vd", "hd", "xvd"]
        .iter()
        .any(|prefix| stem.starts_with(prefix))
        && !stem.ends_with(|c: char| c.is_ascii_digit())
    {
        return stem;
    }
    device
}

/// Rates between two counter samples taken `elapsed_secs` apart. Counter
/// resets produce zero rather than a negative rate.
pub fn throughput_between(
    previous: DiskCounters,
    current: DiskCounters,
    elapsed_secs: f64,
) -> DiskThroughput {
    if elapsed_secs <= 0.0 || !elapsed_secs.is_finite() {
        return DiskThroughput::default();
    }
    let read = current.sectors_read.saturating_sub(previous.sectors_read) * SECTOR_BYTES;
    let written = current.sectors_written.saturating_sub(previous.sectors_written) * SECTOR_BYTES;
    DiskThroughput {
        read_bytes_per_sec: read as f64 / elapsed_secs,
        write_bytes_per_sec: written as f64 / elapsed_secs,
    }
}

fn read_model(device: &str) -> Option<String> {
    let path = format!("/sys/block/{}/device/model", block_device_parent(device));
    fs::read_to_string(path)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn reported_medium(kind: DiskKind) -> ReportedMedium {
    match kind {
        DiskKind::HDD => ReportedMedium::Rotational,
        DiskKind::SSD => ReportedMedium::SolidState,
        DiskKind::Unknown(_) => ReportedMedium::Unknown,
    }
}

struct TrackedVolume {
    device: String,
    previous: Option<(DiskCounters, Instant)>,
}

/// Disk source over sysinfo volumes and kernel block-device counters.
pub struct SysinfoDiskSource {
    diskstats_path: PathBuf,
    volumes: Vec<TrackedVolume>,
}

impl SysinfoDiskSource {
    pub fn new() -> Self {
        Self::with_diskstats_path("/proc/diskstats")
    }

    /// Read counters from a different file, for containers that mount the
    /// host's proc elsewhere.
    pub fn with_diskstats_path(path: impl Into<PathBuf>) -> Self {
        Self {
            diskstats_path: path.into(),
            volumes: Vec::new(),
        }
    }

    /// Read and parse the counter file. A readable file without a single
    /// well-formed device line is a parse failure.
    fn load_counters(&self) -> Result<HashMap<String, DiskCounters>> {
        let contents = fs::read_to_string(&self.diskstats_path).map_err(|e| {
            TelemetryError::transient(format!("{}: {}", self.diskstats_path.display(), e))
        })?;
        let stats = parse_diskstats(&contents);
        if stats.is_empty() && !contents.trim().is_empty() {
            return Err(TelemetryError::parse_error(format!(
                "{}: no device counters found",
                self.diskstats_path.display()
            )));
        }
        Ok(stats)
    }

    fn counters_for<'a>(
        stats: &'a HashMap<String, DiskCounters>,
        device: &str,
    ) -> Option<&'a DiskCounters> {
        stats
            .get(device)
            .or_else(|| stats.get(block_device_parent(device)))
    }
}

impl Default for SysinfoDiskSource {
    fn default() -> Self {
        Self::new()
    }
}

impl DiskSource for SysinfoDiskSource {
    fn enumerate(&mut self) -> Result<Vec<VolumeInfo>> {
        let disks = Disks::new_with_refreshed_list();
        let mut seen = HashSet::new();
        let mut volumes = Vec::new();

        for disk in disks.list() {
            if disk.is_removable() || disk.total_space() == 0 {
                continue;
            }
            let name = disk.name().to_string_lossy();
            let device = name.trim_start_matches("/dev/").to_string();
            if device.is_empty() || !seen.insert(device.clone()) {
                continue;
            }
            volumes.push(VolumeInfo {
                model: read_model(&device),
                device,
                mount_point: disk.mount_point().to_string_lossy().to_string(),
                total_bytes: disk.total_space(),
                medium: reported_medium(disk.kind()),
            });
        }

        self.volumes = volumes
            .iter()
            .map(|volume| TrackedVolume {
                device: volume.device.clone(),
                previous: None,
            })
            .collect();

        tracing::debug!("Enumerated {} fixed volumes", volumes.len());
        Ok(volumes)
    }

    fn sample(&mut self) -> Vec<Result<DiskThroughput>> {
        let stats = match self.load_counters() {
            Ok(stats) => stats,
            Err(e) => {
                return self
                    .volumes
                    .iter()
                    .map(|_| {
                        Err(match &e {
                            TelemetryError::ParseError(reason) => {
                                TelemetryError::parse_error(reason.clone())
                            }
                            other => TelemetryError::transient(other.to_string()),
                        })
                    })
                    .collect();
            }
        };
        let now = Instant::now();

        self.volumes
            .iter_mut()
            .map(|volume| {
                let current = *Self::counters_for(&stats, &volume.device).ok_or_else(|| {
                    TelemetryError::transient(format!("no counters for {}", volume.device))
                })?;
                let throughput = match volume.previous {
                    Some((previous, at)) => {
                        throughput_between(previous, current, now.duration_since(at).as_secs_f64())
                    }
                    None => DiskThroughput::default(),
                };
                volume.previous = Some((current, now));
                Ok(throughput)
            })
            .collect()
    }

    fn release(&mut self) {
        self.volumes.clear();
    }
}
