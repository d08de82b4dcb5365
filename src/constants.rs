//! # System Constants
//!
//! Core constants and enums that define the operational boundaries of the
//! step execution layer: execution statuses, lifecycle event names and the
//! limits used by verification analysis.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle events emitted through structured logging
pub mod events {
    pub const STEP_EXECUTE_REQUESTED: &str = "step.execute_requested";
    pub const STEP_SUSPENDED: &str = "step.suspended";
    pub const STEP_RESUMED: &str = "step.resumed";
    pub const STEP_COMPLETED: &str = "step.completed";
    pub const STEP_ABORTED: &str = "step.aborted";
    pub const STEP_EXPIRED: &str = "step.expired";
    pub const STEP_LATE_RESPONSE_IGNORED: &str = "step.late_response_ignored";

    pub const SPAWN_STARTED: &str = "spawn.started";
    pub const SPAWN_CHILD_COMPLETED: &str = "spawn.child_completed";
    pub const SPAWN_COMPLETED: &str = "spawn.completed";

    pub const ANALYSIS_TRIGGERED: &str = "analysis.triggered";
    pub const ANALYSIS_SKIPPED: &str = "analysis.skipped";
    pub const ANALYSIS_VERDICT: &str = "analysis.verdict";
    pub const ANALYSIS_ABORTED: &str = "analysis.aborted";
}

/// Status of a step instance, composite or leaf
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    #[default]
    New,
    Running,
    Success,
    Failed,
    Error,
    Aborted,
    Queued,
    Skipped,
}

impl ExecutionStatus {
    /// Terminal statuses never transition again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Success | Self::Failed | Self::Error | Self::Aborted | Self::Skipped
        )
    }

    /// FAILED, ERROR or ABORTED
    pub fn is_broken(&self) -> bool {
        matches!(self, Self::Failed | Self::Error | Self::Aborted)
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running | Self::Queued)
    }

    /// Weight used when rolling child statuses up into a parent.
    pub(crate) fn dominance(&self) -> u8 {
        match self {
            Self::Aborted => 4,
            Self::Error => 3,
            Self::Failed => 2,
            Self::Success => 1,
            _ => 0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Running => "RUNNING",
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
            Self::Error => "ERROR",
            Self::Aborted => "ABORTED",
            Self::Queued => "QUEUED",
            Self::Skipped => "SKIPPED",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NEW" => Ok(Self::New),
            "RUNNING" => Ok(Self::Running),
            "SUCCESS" => Ok(Self::Success),
            "FAILED" => Ok(Self::Failed),
            "ERROR" => Ok(Self::Error),
            "ABORTED" => Ok(Self::Aborted),
            "QUEUED" => Ok(Self::Queued),
            "SKIPPED" => Ok(Self::Skipped),
            _ => Err(format!("Invalid execution status: {s}")),
        }
    }
}

/// Status groupings for validation and logic
pub mod status_groups {
    use super::ExecutionStatus;

    pub const TERMINAL: [ExecutionStatus; 5] = [
        ExecutionStatus::Success,
        ExecutionStatus::Failed,
        ExecutionStatus::Error,
        ExecutionStatus::Aborted,
        ExecutionStatus::Skipped,
    ];

    pub const BROKEN: [ExecutionStatus; 3] = [
        ExecutionStatus::Failed,
        ExecutionStatus::Error,
        ExecutionStatus::Aborted,
    ];

    pub const ABORTABLE: [ExecutionStatus; 3] = [
        ExecutionStatus::New,
        ExecutionStatus::Queued,
        ExecutionStatus::Running,
    ];
}

/// System-wide constants
pub mod system {
    /// Group name used when the deployment type carries no workload name
    pub const DEFAULT_GROUP_NAME: &str = "DEFAULT";

    /// Upper bound on hosts sampled from a single group
    pub const MAX_SAMPLING_SIZE_PER_GROUP: usize = 10;

    /// Hosts per log collection task
    pub const LOG_HOST_BATCH_SIZE: usize = 5;

    /// Longest analysis window accepted at validation time
    pub const MAX_ANALYSIS_DURATION_MINUTES: u32 = 240;

    /// Minutes added on top of an analysis window for its step timeout
    pub const ANALYSIS_TIMEOUT_BUFFER_MINUTES: u32 = 150;

    /// Default lifetime of a step instance before the scheduler expires it
    pub const DEFAULT_STATE_TIMEOUT_MILLIS: u64 = 4 * 60 * 60 * 1000;

    /// Responses kept for wait ids that arrive before their step registers them
    pub const EARLY_RESPONSE_BUFFER_SIZE: usize = 1024;

    /// Default Helm steady state wait
    pub const DEFAULT_STEADY_STATE_TIMEOUT_MINUTES: u32 = 10;

    /// Timeout for the inline Helm release history lookup
    pub const DEFAULT_TILLER_CONNECTION_TIMEOUT_MILLIS: u64 = 60 * 1000;

    /// Sweeping output names
    pub const INSTANCE_INFO_OUTPUT: &str = "instanceInfo";
    pub const HELM_RELEASE_INFO_OUTPUT: &str = "helmReleaseInfo";
    pub const PHASE_OUTPUT: &str = "phaseOutput";
}
