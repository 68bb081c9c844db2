use std::path::{Path, PathBuf};

use tracing::trace;

use super::error::TelemetryError;

pub const PROC_STAT: &str = "/proc/stat";
pub const PROC_MEMINFO: &str = "/proc/meminfo";

/// Anything that can hand out a fresh snapshot of a counter file on demand
pub trait SnapshotSource {
    fn read_snapshot(&self) -> Result<String, TelemetryError>;
}

/// A pseudo-file re-read on every snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcFile {
    path: PathBuf,
}

impl ProcFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn stat() -> Self {
        Self::new(PROC_STAT)
    }

    pub fn meminfo() -> Self {
        Self::new(PROC_MEMINFO)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SnapshotSource for ProcFile {
    fn read_snapshot(&self) -> Result<String, TelemetryError> {
        let content =
            std::fs::read_to_string(&self.path).map_err(|source| TelemetryError::SourceUnavailable {
                path: self.path.clone(),
                source,
            })?;
        trace!(path = %self.path.display(), bytes = content.len(), "Snapshot read");
        Ok(content)
    }
}

// In-memory snapshots, used by callers that already hold the text
impl SnapshotSource for str {
    fn read_snapshot(&self) -> Result<String, TelemetryError> {
        Ok(self.to_string())
    }
}

impl SnapshotSource for String {
    fn read_snapshot(&self) -> Result<String, TelemetryError> {
        Ok(self.clone())
    }
}
