use std::path::PathBuf;

use thiserror::Error;

use super::cpu::CoreId;

/// Errors raised while reading or interpreting a telemetry snapshot
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("cannot read snapshot from {}: {source}", .path.display())]
    SourceUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt snapshot line \"{line}\": {reason}")]
    CorruptSnapshot { line: String, reason: String },

    #[error("core label \"{label}\" is outside the sane range 0..={max}")]
    CoreOutOfRange { label: String, max: u32 },

    #[error("core {0} appears more than once in the snapshot")]
    DuplicateCore(CoreId),

    #[error("core {0} was not present when the tracker was initialized")]
    UnknownCore(CoreId),

    #[error("required field {0} is missing from the memory snapshot")]
    MissingField(&'static str),
}

impl TelemetryError {
    pub(crate) fn corrupt(line: &str, reason: impl Into<String>) -> Self {
        Self::CorruptSnapshot {
            line: line.to_string(),
            reason: reason.into(),
        }
    }

    /// Soft failures mean "no result this cycle"; the caller retries on its own schedule.
    pub fn is_soft(&self) -> bool {
        matches!(self, Self::SourceUnavailable { .. })
    }
}
