//! Roll child statuses up into a parent status.
//!
//! ABORTED > ERROR > FAILED > SUCCESS. SKIPPED children are neutral: they
//! only decide the outcome when every child was skipped. An empty set is a
//! SUCCESS.

use crate::constants::ExecutionStatus;

pub fn aggregate_status<I>(statuses: I) -> ExecutionStatus
where
    I: IntoIterator<Item = ExecutionStatus>,
{
    let mut seen_any = false;
    let mut skipped_only = true;
    let mut dominant = ExecutionStatus::Success;

    for status in statuses {
        seen_any = true;
        if status == ExecutionStatus::Skipped {
            continue;
        }
        skipped_only = false;
        if status.dominance() > dominant.dominance() {
            dominant = status;
        }
    }

    if seen_any && skipped_only {
        ExecutionStatus::Skipped
    } else {
        dominant
    }
}
