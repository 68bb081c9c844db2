use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::Display;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use super::error::TelemetryError;
use super::source::SnapshotSource;

/// Highest core index accepted before a label is treated as corrupt input
pub const DEFAULT_MAX_CORE_ID: u32 = 128;

/// Counters on a `cpu` line: user nice system idle iowait irq softirq steal guest guest_nice
const COUNTERS_PER_LINE: usize = 10;

/// Identifies a row of the counter file, either the system-wide row or one logical core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CoreId {
    Aggregate,
    Core(u32),
}

impl Display for CoreId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CoreId::Aggregate => write!(f, "cpu"),
            CoreId::Core(n) => write!(f, "cpu{n}"),
        }
    }
}

/// Cumulative times for one row, in clock ticks since boot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CoreTimes {
    /// user + nice; the kernel already folds guest time into these
    pub user_time: u64,
    /// user + nice + system + irq + softirq + idle + steal; iowait is left out
    pub total_time: u64,
}

impl CoreTimes {
    fn from_counters(counters: &[u64; COUNTERS_PER_LINE]) -> Self {
        let [user, nice, system, idle, _iowait, irq, softirq, steal, _guest, _guest_nice] = *counters;

        let user_time = user.saturating_add(nice);
        let system_all = system.saturating_add(irq).saturating_add(softirq);
        let total_time = user_time
            .saturating_add(system_all)
            .saturating_add(idle)
            .saturating_add(steal);

        Self {
            user_time,
            total_time,
        }
    }

    /// Percentage of `total_time` spent in user time since `earlier`.
    ///
    /// Both deltas are `max(0, new - old)`, so a counter that went backwards reads as no load
    /// instead of wrapping around.
    pub fn load_since(&self, earlier: &CoreTimes) -> u8 {
        let delta_user = self.user_time.saturating_sub(earlier.user_time);
        let delta_total = self.total_time.saturating_sub(earlier.total_time);

        if delta_total == 0 {
            return 0;
        }

        let percent = u128::from(delta_user) * 100 / u128::from(delta_total);
        percent.min(100) as u8
    }
}

/// What to do with a core that shows up after initialization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HotPlugPolicy {
    /// Fail the sample with [`TelemetryError::UnknownCore`]
    #[default]
    Reject,
    /// Record a baseline for the new core and report it from the next sample on
    Adopt,
}

impl FromStr for HotPlugPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reject" => Ok(Self::Reject),
            "adopt" => Ok(Self::Adopt),
            other => Err(format!("unknown hot-plug policy \"{other}\", expected reject or adopt")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerConfig {
    pub max_core_id: u32,
    pub hot_plug: HotPlugPolicy,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_core_id: DEFAULT_MAX_CORE_ID,
            hot_plug: HotPlugPolicy::default(),
        }
    }
}

/// Utilization between two consecutive snapshots, in whole percent
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuLoad {
    /// `None` when the snapshot had no aggregate row
    pub aggregate: Option<u8>,
    pub cores: BTreeMap<u32, u8>,
}

/// Outcome of a successful call to [`CpuLoadTracker::sample`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sample {
    /// Baselines were recorded; sample again to get a reading
    WarmingUp { tracked: usize },
    Load(CpuLoad),
}

/// Turns cumulative CPU counters into per-core load by remembering the previous snapshot.
///
/// The first sample only records baselines. Every later sample computes deltas against
/// the stored baselines and replaces them. A snapshot that fails validation leaves the
/// stored state untouched.
///
/// Sampling needs `&mut self`; callers sharing a tracker between threads must serialize
/// access themselves.
#[derive(Debug, Clone, Default)]
pub struct CpuLoadTracker {
    config: TrackerConfig,
    state: HashMap<CoreId, CoreTimes>,
}

impl CpuLoadTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: TrackerConfig) -> Self {
        Self {
            config,
            state: HashMap::new(),
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn is_initialized(&self) -> bool {
        !self.state.is_empty()
    }

    /// Rows currently tracked, aggregate first
    pub fn tracked_cores(&self) -> Vec<CoreId> {
        let mut cores: Vec<CoreId> = self.state.keys().copied().collect();
        cores.sort();
        cores
    }

    pub fn baseline(&self, core: CoreId) -> Option<CoreTimes> {
        self.state.get(&core).copied()
    }

    /// Forget every baseline; the next sample warms up again
    pub fn reset(&mut self) {
        self.state.clear();
    }

    /// Read a fresh snapshot from `source` and update the tracker with it
    pub fn sample<S: SnapshotSource + ?Sized>(&mut self, source: &S) -> Result<Sample, TelemetryError> {
        let snapshot = source.read_snapshot()?;
        self.update(&snapshot)
    }

    /// Update the tracker from the text of one counter snapshot
    pub fn update(&mut self, snapshot: &str) -> Result<Sample, TelemetryError> {
        let rows = parse_snapshot(snapshot, self.config.max_core_id)?;

        if self.state.is_empty() {
            self.state = rows.into_iter().collect();
            debug!(tracked = self.state.len(), "CPU load tracker initialized");
            return Ok(Sample::WarmingUp {
                tracked: self.state.len(),
            });
        }

        if self.config.hot_plug == HotPlugPolicy::Reject {
            if let Some((id, _)) = rows.iter().find(|(id, _)| !self.state.contains_key(id)) {
                return Err(TelemetryError::UnknownCore(*id));
            }
        }

        let mut load = CpuLoad::default();
        for (id, times) in rows {
            let Some(previous) = self.state.insert(id, times) else {
                warn!(core = %id, "Adopting core that appeared after initialization");
                continue;
            };

            let percent = times.load_since(&previous);
            trace!(core = %id, percent, "Core load");
            match id {
                CoreId::Aggregate => load.aggregate = Some(percent),
                CoreId::Core(n) => {
                    load.cores.insert(n, percent);
                }
            }
        }

        Ok(Sample::Load(load))
    }
}

/// Parse every counter row of a snapshot, rejecting duplicates and empty snapshots
fn parse_snapshot(snapshot: &str, max_core_id: u32) -> Result<Vec<(CoreId, CoreTimes)>, TelemetryError> {
    let mut seen = HashSet::new();
    let mut rows = vec![];

    for line in snapshot.lines() {
        let Some((id, times)) = parse_counter_line(line, max_core_id)? else {
            continue;
        };
        if !seen.insert(id) {
            return Err(TelemetryError::DuplicateCore(id));
        }
        rows.push((id, times));
    }

    if rows.is_empty() {
        return Err(TelemetryError::corrupt(
            snapshot.lines().next().unwrap_or_default(),
            "snapshot has no cpu rows",
        ));
    }

    Ok(rows)
}

/// `Ok(None)` for lines that are not cpu rows (intr, ctxt, btime, ...)
fn parse_counter_line(line: &str, max_core_id: u32) -> Result<Option<(CoreId, CoreTimes)>, TelemetryError> {
    let mut tokens = line.split_whitespace();
    let Some(label) = tokens.next() else {
        return Ok(None);
    };
    let is_cpu_row = label.get(..3).is_some_and(|prefix| prefix.eq_ignore_ascii_case("cpu"));
    if !is_cpu_row {
        return Ok(None);
    }

    let id = parse_core_id(line, label, max_core_id)?;

    let fields: Vec<&str> = tokens.collect();
    if fields.len() != COUNTERS_PER_LINE {
        return Err(TelemetryError::corrupt(
            line,
            format!("expected {COUNTERS_PER_LINE} counters, found {}", fields.len()),
        ));
    }

    let mut counters = [0u64; COUNTERS_PER_LINE];
    for (slot, field) in counters.iter_mut().zip(fields) {
        *slot = field
            .parse()
            .map_err(|_| TelemetryError::corrupt(line, format!("counter \"{field}\" is not a number")))?;
    }

    Ok(Some((id, CoreTimes::from_counters(&counters))))
}

fn parse_core_id(line: &str, label: &str, max_core_id: u32) -> Result<CoreId, TelemetryError> {
    let index = &label[3..];
    if index.is_empty() {
        return Ok(CoreId::Aggregate);
    }

    let index: i64 = index
        .parse()
        .map_err(|_| TelemetryError::corrupt(line, format!("\"{label}\" has no numeric core index")))?;

    match u32::try_from(index) {
        Ok(n) if n <= max_core_id => Ok(CoreId::Core(n)),
        _ => Err(TelemetryError::CoreOutOfRange {
            label: label.to_string(),
            max: max_core_id,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a stat row where only user, system and idle move
    fn row(label: &str, user: u64, system: u64, idle: u64) -> String {
        format!("{label} {user} 0 {system} {idle} 0 0 0 0 0 0")
    }

    fn snapshot(rows: &[String]) -> String {
        let mut text = rows.join("\n");
        text.push_str("\nintr 1234 0 0\nctxt 5678\nbtime 1700000000\nprocesses 42\n");
        text
    }

    fn load(sample: Sample) -> CpuLoad {
        match sample {
            Sample::Load(load) => load,
            Sample::WarmingUp { .. } => panic!("Expected a load reading, got warming up"),
        }
    }

    #[test]
    fn test_first_sample_is_warming_up() {
        let mut tracker = CpuLoadTracker::new();
        let text = snapshot(&[row("cpu", 100, 50, 850), row("cpu0", 50, 25, 425), row("cpu1", 50, 25, 425)]);

        let sample = tracker.update(&text).unwrap();

        assert_eq!(sample, Sample::WarmingUp { tracked: 3 });
        assert!(tracker.is_initialized());
        assert_eq!(
            tracker.tracked_cores(),
            vec![CoreId::Aggregate, CoreId::Core(0), CoreId::Core(1)]
        );
    }

    #[test]
    fn test_steady_state_percentages() {
        let mut tracker = CpuLoadTracker::new();
        tracker
            .update(&snapshot(&[row("cpu", 0, 0, 0), row("cpu0", 0, 0, 0), row("cpu1", 0, 0, 0)]))
            .unwrap();

        // cpu0: 30 user of 100 total, cpu1: 75 of 100, aggregate: 105 of 200
        let sample = tracker
            .update(&snapshot(&[
                row("cpu", 105, 20, 75),
                row("cpu0", 30, 10, 60),
                row("cpu1", 75, 10, 15),
            ]))
            .unwrap();

        let load = load(sample);
        assert_eq!(load.aggregate, Some(52));
        assert_eq!(load.cores, BTreeMap::from([(0, 30), (1, 75)]));
    }

    #[test]
    fn test_aggregate_never_lands_in_core_slots() {
        let mut tracker = CpuLoadTracker::new();
        tracker.update(&snapshot(&[row("cpu", 0, 0, 0), row("cpu0", 0, 0, 0)])).unwrap();

        let load = load(tracker.update(&snapshot(&[row("cpu", 90, 0, 10), row("cpu0", 10, 0, 90)])).unwrap());

        assert_eq!(load.aggregate, Some(90));
        assert_eq!(load.cores.len(), 1);
        assert_eq!(load.cores.get(&0), Some(&10));
    }

    #[test]
    fn test_user_time_includes_nice_and_total_skips_iowait() {
        let before = CoreTimes::from_counters(&[0; 10]);
        // user nice system idle iowait irq softirq steal guest guest_nice
        let after = CoreTimes::from_counters(&[10, 10, 5, 60, 500, 5, 5, 5, 7, 7]);

        assert_eq!(after.user_time, 20);
        assert_eq!(after.total_time, 100);
        assert_eq!(after.load_since(&before), 20);
    }

    #[test]
    fn test_unchanged_total_reports_zero() {
        let mut tracker = CpuLoadTracker::new();
        let text = snapshot(&[row("cpu", 400, 100, 500), row("cpu0", 400, 100, 500)]);
        tracker.update(&text).unwrap();

        let load = load(tracker.update(&text).unwrap());

        assert_eq!(load.aggregate, Some(0));
        assert_eq!(load.cores.get(&0), Some(&0));
    }

    #[test]
    fn test_counter_regression_clamps_to_zero() {
        let old = CoreTimes {
            user_time: 1000,
            total_time: 5000,
        };
        let new = CoreTimes {
            user_time: 900,
            total_time: 4800,
        };
        assert_eq!(new.load_since(&old), 0);

        // Same example through the tracker: user 900 with total 4800
        let mut tracker = CpuLoadTracker::new();
        tracker.update(&row("cpu0", 1000, 0, 4000)).unwrap();
        let load = load(tracker.update(&row("cpu0", 900, 0, 3900)).unwrap());

        assert_eq!(load.cores.get(&0), Some(&0));
        assert_eq!(
            tracker.baseline(CoreId::Core(0)),
            Some(CoreTimes {
                user_time: 900,
                total_time: 4800
            })
        );
    }

    #[test]
    fn test_user_growth_beyond_total_is_capped() {
        let old = CoreTimes {
            user_time: 0,
            total_time: 100,
        };
        let new = CoreTimes {
            user_time: 500,
            total_time: 110,
        };
        assert_eq!(new.load_since(&old), 100);
    }

    #[test]
    fn test_huge_deltas_do_not_overflow() {
        let old = CoreTimes::default();
        let new = CoreTimes {
            user_time: u64::MAX / 2,
            total_time: u64::MAX,
        };
        assert_eq!(new.load_since(&old), 49);
    }

    #[test]
    fn test_percentages_stay_in_range_over_many_samples() {
        let mut tracker = CpuLoadTracker::new();
        let (mut user, mut system, mut idle) = (0u64, 0u64, 0u64);

        for step in 0..50u64 {
            user += step * 7 % 13;
            system += step % 5;
            idle += 11 - step % 11;
            let sample = tracker
                .update(&snapshot(&[row("cpu", user, system, idle), row("cpu0", user, system, idle)]))
                .unwrap();
            if let Sample::Load(load) = sample {
                assert!(load.aggregate.is_some_and(|p| p <= 100));
                assert!(load.cores.values().all(|p| *p <= 100));
            }
        }
    }

    #[test]
    fn test_unknown_core_is_rejected_and_not_tracked() {
        let mut tracker = CpuLoadTracker::new();
        tracker.update(&snapshot(&[row("cpu", 0, 0, 0), row("cpu0", 0, 0, 0)])).unwrap();

        let err = tracker
            .update(&snapshot(&[row("cpu", 10, 0, 10), row("cpu0", 10, 0, 10), row("cpu1", 10, 0, 10)]))
            .unwrap_err();

        assert!(matches!(err, TelemetryError::UnknownCore(CoreId::Core(1))));
        assert!(!err.is_soft());
        assert_eq!(tracker.tracked_cores(), vec![CoreId::Aggregate, CoreId::Core(0)]);
        // Nothing was committed, including the rows that came before the unknown one
        assert_eq!(tracker.baseline(CoreId::Core(0)), Some(CoreTimes::default()));
    }

    #[test]
    fn test_adopt_policy_tracks_new_core_from_next_sample() {
        let mut tracker = CpuLoadTracker::with_config(TrackerConfig {
            hot_plug: HotPlugPolicy::Adopt,
            ..Default::default()
        });
        tracker.update(&row("cpu0", 0, 0, 0)).unwrap();

        let text = format!("{}\n{}", row("cpu0", 50, 0, 50), row("cpu1", 10, 0, 10));
        let first = load(tracker.update(&text).unwrap());
        assert_eq!(first.cores, BTreeMap::from([(0, 50)]));

        let text = format!("{}\n{}", row("cpu0", 50, 0, 150), row("cpu1", 30, 0, 10));
        let second = load(tracker.update(&text).unwrap());
        assert_eq!(second.cores, BTreeMap::from([(0, 0), (1, 100)]));
    }

    #[test]
    fn test_missing_core_keeps_old_baseline() {
        let mut tracker = CpuLoadTracker::new();
        tracker.update(&snapshot(&[row("cpu0", 0, 0, 0), row("cpu1", 0, 0, 0)])).unwrap();

        let load = load(tracker.update(&row("cpu0", 10, 0, 10)).unwrap());

        assert_eq!(load.aggregate, None);
        assert_eq!(load.cores, BTreeMap::from([(0, 50)]));
        assert_eq!(tracker.baseline(CoreId::Core(1)), Some(CoreTimes::default()));
    }

    #[test]
    fn test_duplicate_core_during_initialization() {
        let mut tracker = CpuLoadTracker::new();
        let err = tracker
            .update(&snapshot(&[row("cpu0", 0, 0, 0), row("cpu0", 1, 0, 0)]))
            .unwrap_err();

        assert!(matches!(err, TelemetryError::DuplicateCore(CoreId::Core(0))));
        assert!(!tracker.is_initialized());
    }

    #[test]
    fn test_duplicate_core_in_steady_state() {
        let mut tracker = CpuLoadTracker::new();
        tracker.update(&row("cpu", 0, 0, 0)).unwrap();

        let err = tracker
            .update(&snapshot(&[row("cpu", 5, 0, 5), row("CPU", 6, 0, 6)]))
            .unwrap_err();

        assert!(matches!(err, TelemetryError::DuplicateCore(CoreId::Aggregate)));
        assert_eq!(tracker.baseline(CoreId::Aggregate), Some(CoreTimes::default()));
    }

    #[test]
    fn test_core_index_bounds() {
        let mut tracker = CpuLoadTracker::new();
        assert!(matches!(
            tracker.update(&row("cpu129", 0, 0, 0)).unwrap_err(),
            TelemetryError::CoreOutOfRange { max: 128, .. }
        ));
        assert!(matches!(
            tracker.update(&row("cpu-1", 0, 0, 0)).unwrap_err(),
            TelemetryError::CoreOutOfRange { .. }
        ));
        assert!(matches!(
            tracker.update(&row("cpux", 0, 0, 0)).unwrap_err(),
            TelemetryError::CorruptSnapshot { .. }
        ));

        let sample = tracker.update(&row("cpu128", 0, 0, 0)).unwrap();
        assert_eq!(sample, Sample::WarmingUp { tracked: 1 });
    }

    #[test]
    fn test_configured_core_limit() {
        let mut tracker = CpuLoadTracker::with_config(TrackerConfig {
            max_core_id: 3,
            ..Default::default()
        });
        let err = tracker.update(&row("cpu4", 0, 0, 0)).unwrap_err();
        assert!(matches!(err, TelemetryError::CoreOutOfRange { max: 3, .. }));
    }

    #[test]
    fn test_wrong_field_count_is_corrupt() {
        let mut tracker = CpuLoadTracker::new();

        let short = tracker.update("cpu 1 2 3 4 5 6 7").unwrap_err();
        assert!(matches!(short, TelemetryError::CorruptSnapshot { .. }));

        let long = tracker.update("cpu 1 2 3 4 5 6 7 8 9 10 11").unwrap_err();
        assert!(matches!(long, TelemetryError::CorruptSnapshot { .. }));

        let garbage = tracker.update("cpu 1 2 3 four 5 6 7 8 9 10").unwrap_err();
        assert!(matches!(garbage, TelemetryError::CorruptSnapshot { .. }));

        assert!(!tracker.is_initialized());
    }

    #[test]
    fn test_corrupt_snapshot_leaves_steady_state_untouched() {
        let mut tracker = CpuLoadTracker::new();
        tracker.update(&snapshot(&[row("cpu", 0, 0, 0), row("cpu0", 0, 0, 0)])).unwrap();

        let text = format!("{}\ncpu0 1 2 3", row("cpu", 10, 0, 10));
        assert!(tracker.update(&text).is_err());

        assert_eq!(tracker.baseline(CoreId::Aggregate), Some(CoreTimes::default()));
    }

    #[test]
    fn test_snapshot_without_cpu_rows_is_corrupt() {
        let mut tracker = CpuLoadTracker::new();
        let err = tracker.update("intr 1 2 3\nctxt 4\n").unwrap_err();

        assert!(matches!(err, TelemetryError::CorruptSnapshot { .. }));
        assert!(!tracker.is_initialized());
    }

    #[test]
    fn test_unreadable_source_leaves_state_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let missing = crate::system::source::ProcFile::new(dir.path().join("stat"));

        let mut tracker = CpuLoadTracker::new();
        tracker.update(&row("cpu", 0, 0, 0)).unwrap();

        let err = tracker.sample(&missing).unwrap_err();
        assert!(err.is_soft());
        assert_eq!(tracker.tracked_cores(), vec![CoreId::Aggregate]);
    }

    #[test]
    fn test_sample_from_source() {
        let mut tracker = CpuLoadTracker::new();
        assert!(matches!(tracker.sample(row("cpu", 0, 0, 0).as_str()), Ok(Sample::WarmingUp { tracked: 1 })));

        let load = load(tracker.sample(&row("cpu", 25, 0, 75)).unwrap());
        assert_eq!(load.aggregate, Some(25));
    }

    #[test]
    fn test_reset_warms_up_again() {
        let mut tracker = CpuLoadTracker::new();
        tracker.update(&row("cpu", 0, 0, 0)).unwrap();
        tracker.reset();

        assert!(!tracker.is_initialized());
        assert_eq!(tracker.update(&row("cpu", 1, 0, 1)).unwrap(), Sample::WarmingUp { tracked: 1 });
    }

    #[test]
    fn test_hot_plug_policy_from_str() {
        assert_eq!("reject".parse::<HotPlugPolicy>(), Ok(HotPlugPolicy::Reject));
        assert_eq!(" Adopt ".parse::<HotPlugPolicy>(), Ok(HotPlugPolicy::Adopt));
        assert!("sometimes".parse::<HotPlugPolicy>().is_err());
    }

    #[test]
    fn test_core_id_display() {
        assert_eq!(CoreId::Aggregate.to_string(), "cpu");
        assert_eq!(CoreId::Core(7).to_string(), "cpu7");
    }
}
