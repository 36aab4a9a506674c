use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// System-wide memory capacity as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemMemory {
    pub capacity_bytes: u64,
    pub available_bytes: u64,
}

impl SystemMemory {
    /// Share of capacity in use, in percent. `None` when capacity is unknown.
    pub fn used_percent(&self) -> Option<f64> {
        if self.capacity_bytes == 0 {
            return None;
        }
        let used = self.capacity_bytes.saturating_sub(self.available_bytes);
        Some((used as f64 / self.capacity_bytes as f64 * 100.0).clamp(0.0, 100.0))
    }
}

/// Source abstraction for system memory capacity.
pub trait SystemMemorySource {
    /// Samples current capacity. Returns `None` if the source is unavailable.
    fn sample(&mut self) -> Option<SystemMemory>;
}

/// Reads `MemTotal` and `MemAvailable` from `/proc/meminfo`.
#[derive(Debug)]
pub struct MemInfoSource {
    path: PathBuf,
    buffer: Vec<u8>,
}

impl MemInfoSource {
    pub fn new() -> Self {
        Self::with_path("/proc/meminfo")
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            buffer: Vec::with_capacity(4096),
        }
    }
}

impl Default for MemInfoSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemMemorySource for MemInfoSource {
    fn sample(&mut self) -> Option<SystemMemory> {
        let bytes = read_to_buffer(&self.path, &mut self.buffer).ok()?;
        let (total, available) = parse_meminfo(bytes)?;
        Some(SystemMemory {
            capacity_bytes: total,
            available_bytes: available,
        })
    }
}

fn read_to_buffer<'a>(path: &Path, buffer: &'a mut Vec<u8>) -> io::Result<&'a [u8]> {
    buffer.clear();
    let mut file = File::open(path)?;
    file.read_to_end(buffer)?;
    Ok(buffer.as_slice())
}

fn parse_meminfo(bytes: &[u8]) -> Option<(u64, u64)> {
    let mut total: Option<u64> = None;
    let mut available: Option<u64> = None;

    for line in bytes.split(|b| *b == b'\n') {
        if total.is_none() && line.starts_with(b"MemTotal:") {
            total = parse_kb_value(line).map(|v| v.saturating_mul(1024));
        } else if available.is_none() && line.starts_with(b"MemAvailable:") {
            available = parse_kb_value(line).map(|v| v.saturating_mul(1024));
        }

        if total.is_some() && available.is_some() {
            break;
        }
    }

    Some((total?, available?))
}

fn parse_kb_value(line: &[u8]) -> Option<u64> {
    let mut value: u64 = 0;
    let mut saw_digit = false;
    for byte in line.iter().copied() {
        if byte.is_ascii_digit() {
            saw_digit = true;
            value = value
                .saturating_mul(10)
                .saturating_add((byte - b'0') as u64);
        } else if saw_digit {
            break;
        }
    }
    saw_digit.then_some(value)
}
