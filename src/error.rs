//! Typed error taxonomy for the hardware control core (spec §7).
//!
//! These are the values that drive retry/skip behavior and must be
//! matched by callers, not just displayed — `anyhow::Error` is reserved for
//! the CLI/boot boundary where a failure simply needs to be reported.

use thiserror::Error;

/// Failures surfaced by a transport adapter or port worker read/write.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PortError {
    #[error("no reply within deadline")]
    Timeout,
    #[error("framing error (CRC mismatch)")]
    Crc,
    #[error("protocol exception {0}")]
    Exception(u8),
    #[error("transport disconnected")]
    Disconnected,
    #[error("failed to encode request")]
    EncodingFailed,
    #[error("unknown command")]
    UnknownCmd,
    #[error("write attempted on a skipped slave")]
    DeviceOfflineSkipped,
    #[error("converted value outside configured valid range")]
    InvalidRange,
}

impl PortError {
    /// Collapses adapter-level failures into the subset the port worker's
    /// per-slave failure counter advances on (spec §4.2, §7):
    /// `Disconnected` folds into `Timeout`; everything else is untouched.
    pub fn normalize(self) -> Self {
        match self {
            PortError::Disconnected => PortError::Timeout,
            other => other,
        }
    }

    /// Whether this error kind advances a slave's consecutive-failure counter.
    pub fn counts_toward_skip(&self) -> bool {
        matches!(self, PortError::Timeout)
    }
}

/// Status-level errors surfaced by equipment controllers (spec §4.4, §7).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EquipmentError {
    #[error("command is on but running feedback never asserted")]
    OnButNotRunning,
    #[error("feedback asserted while command is off")]
    OffButRunning,
    #[error("mutually exclusive feedbacks are both asserted")]
    Disagreement,
    #[error("underlying data point read failed: {0}")]
    Port(#[from] PortError),
    #[error("blocked by interlock: {0}")]
    InterlockBlocked(String),
}

/// Data-point-tree parse failures at configuration load time (spec §6, §7).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("data point tree line has an empty key")]
    EmptyKey,
    #[error("data point tree line has an empty value for key {0:?}")]
    EmptyValue(String),
    #[error("equipment {equipment:?} of kind {kind:?} is missing required key {key:?}")]
    MissingRequiredKey {
        equipment: String,
        kind: String,
        key: String,
    },
    #[error("data point {0:?} references unknown port {1:?}")]
    UnknownPort(String, String),
    #[error("duplicate data point name {0:?}")]
    DuplicateDataPoint(String),
    #[error("interlock rule upstream and downstream are the same equipment {0:?}")]
    SelfLoop(String),
    #[error("duplicate interlock rule {upstream:?} -> {downstream:?}")]
    DuplicateRule { upstream: String, downstream: String },
}
