use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::system::{CpuLoad, MemoryUsage};

pub trait Reportable {
    fn default_path(&self) -> String;
    fn report_data(&self) -> Result<String, serde_json::Error>;

    /// Write the report as JSON, creating parent directories as needed
    fn generate_report(&self, path: Option<&str>) -> std::io::Result<String> {
        let default_path = self.default_path();
        let report_path = path.unwrap_or(&default_path);

        if let Some(parent) = Path::new(report_path).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let data = self.report_data().map_err(std::io::Error::other)?;

        let mut file = File::create(report_path)?;
        file.write_all(data.as_bytes())?;
        info!(%report_path, "Telemetry report written");

        Ok(report_path.to_string())
    }
}

/// One CPU reading and one memory reading taken together
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct TelemetryReport {
    pub collected_at: DateTime<Local>,
    pub interval_ms: u64,
    pub cpu: CpuLoad,
    pub memory: MemoryUsage,
}

impl TelemetryReport {
    pub fn new(interval_ms: u64, cpu: CpuLoad, memory: MemoryUsage) -> Self {
        Self {
            collected_at: Local::now(),
            interval_ms,
            cpu,
            memory,
        }
    }
}

impl Reportable for TelemetryReport {
    fn default_path(&self) -> String {
        "reports/telemetry.json".into()
    }

    fn report_data(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
