use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::TelemetryError;
use super::source::SnapshotSource;

/// Memory and swap usage, all in kB as reported by the kernel
#[derive(Deserialize, Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryUsage {
    pub used_kb: u64,
    pub available_kb: u64,
    pub total_kb: u64,
    pub swap_used_kb: u64,
    pub swap_total_kb: u64,
}

impl MemoryUsage {
    /// Read a fresh snapshot from `source` and derive usage from it
    pub fn capture<S: SnapshotSource + ?Sized>(source: &S) -> Result<Self, TelemetryError> {
        let snapshot = source.read_snapshot()?;
        Self::parse(&snapshot)
    }

    /// Derive usage from the text of one `key: value [unit]` snapshot
    pub fn parse(snapshot: &str) -> Result<Self, TelemetryError> {
        let fields = parse_fields(snapshot)?;
        let field = |name: &'static str| fields.get(name).copied().ok_or(TelemetryError::MissingField(name));

        let mem_total = field("MemTotal")?;
        let mem_free = field("MemFree")?;
        let mem_available = field("MemAvailable")?;
        let cached = field("Cached")?;
        let s_reclaimable = field("SReclaimable")?;
        let buffers = field("Buffers")?;
        let swap_total = field("SwapTotal")?;
        let swap_free = field("SwapFree")?;

        let main_cached = cached.saturating_add(s_reclaimable);

        // Inside a container MemAvailable can describe the host while MemTotal describes the
        // container; MemFree is the only figure that stays consistent there.
        let available_kb = if mem_available > mem_total {
            debug!(mem_available, mem_total, "MemAvailable exceeds MemTotal, using MemFree");
            mem_free
        } else {
            mem_available
        };

        let used_kb = mem_total
            .checked_sub(mem_free)
            .and_then(|used| used.checked_sub(main_cached))
            .and_then(|used| used.checked_sub(buffers))
            .unwrap_or_else(|| mem_total.saturating_sub(mem_free));

        Ok(Self {
            used_kb,
            available_kb,
            total_kb: mem_total,
            swap_used_kb: swap_total.saturating_sub(swap_free),
            swap_total_kb: swap_total,
        })
    }

    pub fn used_percent(&self) -> f64 {
        ratio(self.used_kb, self.total_kb)
    }

    pub fn swap_percent(&self) -> f64 {
        ratio(self.swap_used_kb, self.swap_total_kb)
    }
}

fn ratio(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

/// Collect `key: value [unit]` lines into a map keyed without the trailing colon
fn parse_fields(snapshot: &str) -> Result<HashMap<&str, u64>, TelemetryError> {
    let mut fields = HashMap::new();

    for line in snapshot.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.is_empty() {
            continue;
        }
        // Anything else means the file format changed under us
        if parts.len() != 2 && parts.len() != 3 {
            return Err(TelemetryError::corrupt(
                line,
                format!("expected \"key: value [unit]\", found {} tokens", parts.len()),
            ));
        }

        let Some(key) = parts[0].strip_suffix(':') else {
            continue;
        };
        let value = parts[1]
            .parse()
            .map_err(|_| TelemetryError::corrupt(line, format!("value \"{}\" is not a number", parts[1])))?;
        fields.insert(key, value);
    }

    Ok(fields)
}
