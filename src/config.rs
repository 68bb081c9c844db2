use std::path::PathBuf;
use std::time::Duration;

use tracing::{debug, warn};

use crate::system::cpu::{DEFAULT_MAX_CORE_ID, HotPlugPolicy, TrackerConfig};
use crate::system::source::{PROC_MEMINFO, PROC_STAT};

pub const DEFAULT_INTERVAL_MS: u64 = 2000;

/// Runtime settings resolved from `LOADSCOPE_*` environment variables
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub stat_path: PathBuf,
    pub meminfo_path: PathBuf,
    pub interval: Duration,
    pub tracker: TrackerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            stat_path: PathBuf::from(PROC_STAT),
            meminfo_path: PathBuf::from(PROC_MEMINFO),
            interval: Duration::from_millis(DEFAULT_INTERVAL_MS),
            tracker: TrackerConfig::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let stat_path = lookup("LOADSCOPE_STAT_PATH").map(PathBuf::from).unwrap_or_else(|| {
            debug!("LOADSCOPE_STAT_PATH environment variable not set, using default ({PROC_STAT})");
            defaults.stat_path
        });
        let meminfo_path = lookup("LOADSCOPE_MEMINFO_PATH").map(PathBuf::from).unwrap_or_else(|| {
            debug!("LOADSCOPE_MEMINFO_PATH environment variable not set, using default ({PROC_MEMINFO})");
            defaults.meminfo_path
        });
        let interval_ms = parse_or("LOADSCOPE_INTERVAL_MS", &lookup, DEFAULT_INTERVAL_MS);
        let max_core_id = parse_or("LOADSCOPE_MAX_CORE_ID", &lookup, DEFAULT_MAX_CORE_ID);
        let hot_plug = parse_or("LOADSCOPE_HOT_PLUG", &lookup, HotPlugPolicy::default());

        Self {
            stat_path,
            meminfo_path,
            interval: Duration::from_millis(interval_ms),
            tracker: TrackerConfig { max_core_id, hot_plug },
        }
    }

    /// Apply a `--interval` flag on top of the environment
    pub fn with_interval_ms(mut self, interval_ms: Option<u64>) -> Self {
        if let Some(ms) = interval_ms {
            self.interval = Duration::from_millis(ms);
        }
        self
    }
}

fn parse_or<T>(key: &str, lookup: &impl Fn(&str) -> Option<String>, default: T) -> T
where
    T: std::str::FromStr + std::fmt::Debug,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(%key, %raw, ?default, "Invalid value, using default");
            default
        }),
        None => {
            debug!("{key} environment variable not set, using default ({default:?})");
            default
        }
    }
}
