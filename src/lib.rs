//! Per-core CPU load and memory usage derived from the kernel's cumulative counters.
//!
//! [`system::CpuLoadTracker`] turns consecutive `/proc/stat` snapshots into whole-percent
//! load per core, and [`system::MemoryUsage`] parses one `/proc/meminfo` snapshot.

pub mod config;
pub mod report;
pub mod runner;
pub mod system;
