pub mod cpu;
pub mod error;
pub mod memory;
pub mod source;

pub use cpu::{CoreId, CpuLoad, CpuLoadTracker, HotPlugPolicy, Sample, TrackerConfig};
pub use error::TelemetryError;
pub use memory::MemoryUsage;
pub use source::{ProcFile, SnapshotSource};
