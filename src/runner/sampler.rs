use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::system::{CpuLoad, CpuLoadTracker, MemoryUsage, ProcFile, Sample, TelemetryError};

/// Latest values published by the sampling loop
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct Readings {
    pub cpu: Option<CpuLoad>,
    pub memory: Option<MemoryUsage>,
    pub updated_at: Option<DateTime<Local>>,
    pub last_error: Option<String>,
}

/// Owns the tracker and both sources; the only writer of tracker state
#[derive(Debug)]
pub struct Sampler {
    tracker: CpuLoadTracker,
    stat: ProcFile,
    meminfo: ProcFile,
}

impl Sampler {
    pub fn new(config: &Config) -> Self {
        Self {
            tracker: CpuLoadTracker::with_config(config.tracker),
            stat: ProcFile::new(&config.stat_path),
            meminfo: ProcFile::new(&config.meminfo_path),
        }
    }

    pub fn memory(&self) -> Result<MemoryUsage, TelemetryError> {
        MemoryUsage::capture(&self.meminfo)
    }

    pub fn next_reading(&mut self) -> Result<Sample, TelemetryError> {
        self.tracker.sample(&self.stat)
    }

    /// Sample until the tracker produces a reading, waiting `interval` between attempts.
    ///
    /// An unreadable source only costs a cycle; hard failures are returned.
    pub async fn first_reading(&mut self, interval: Duration) -> Result<CpuLoad, TelemetryError> {
        loop {
            match self.next_reading() {
                Ok(Sample::Load(load)) => return Ok(load),
                Ok(Sample::WarmingUp { tracked }) => {
                    debug!(%tracked, "Warming up, sampling again in {:?}", interval);
                }
                Err(e) if e.is_soft() => {
                    warn!(%e, "CPU counters unavailable, retrying in {:?}", interval);
                }
                Err(e) => return Err(e),
            }
            tokio::time::sleep(interval).await;
        }
    }

    /// Sample the CPU counters once and fold the outcome into `readings`
    pub fn tick(&mut self, readings: &mut Readings) {
        match self.next_reading() {
            Ok(Sample::Load(load)) => {
                readings.cpu = Some(load);
                readings.last_error = None;
            }
            Ok(Sample::WarmingUp { tracked }) => {
                info!(%tracked, "CPU tracker warming up");
            }
            Err(e) if e.is_soft() => {
                warn!(%e, "CPU counters unavailable this cycle");
                readings.last_error = Some(e.to_string());
            }
            Err(e @ TelemetryError::UnknownCore(_)) => {
                // Topology changed; start over with a fresh baseline
                error!(%e, "Restarting CPU tracker");
                self.tracker.reset();
                readings.last_error = Some(e.to_string());
            }
            Err(e) => {
                error!(%e, "Discarding CPU snapshot");
                readings.last_error = Some(e.to_string());
            }
        }

        match self.memory() {
            Ok(memory) => readings.memory = Some(memory),
            Err(e) if e.is_soft() => {
                warn!(%e, "Memory counters unavailable this cycle");
                readings.last_error = Some(e.to_string());
            }
            Err(e) => {
                error!(%e, "Discarding memory snapshot");
                readings.last_error = Some(e.to_string());
            }
        }

        readings.updated_at = Some(Local::now());
    }

    /// Tick every `interval` until `stop` is raised, publishing into `readings`.
    ///
    /// Reads go through the blocking pool since the configured paths need not be procfs.
    pub async fn run(self, interval: Duration, readings: Arc<RwLock<Readings>>, stop: Arc<AtomicBool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut sampler = self;

        while !stop.load(Ordering::Acquire) {
            ticker.tick().await;

            let mut next = readings.read().await.clone();
            let ticked = tokio::task::spawn_blocking(move || {
                sampler.tick(&mut next);
                (sampler, next)
            })
            .await;

            match ticked {
                Ok((returned, next)) => {
                    sampler = returned;
                    *readings.write().await = next;
                }
                Err(e) => {
                    error!(%e, "Sampling task failed");
                    break;
                }
            }
        }

        debug!("Sampling loop stopped");
    }
}
