//! Risk to status classification.

use super::types::{AnalysisSummary, AnalysisTolerance, RiskLevel};
use crate::constants::ExecutionStatus;

/// Map a risk level onto a step status under the given tolerance
///
/// HIGH always fails. MEDIUM fails when the tolerance is at most MEDIUM. LOW
/// fails only under a LOW tolerance.
pub fn verdict(risk: RiskLevel, tolerance: AnalysisTolerance) -> ExecutionStatus {
    let failed = match risk {
        RiskLevel::High => true,
        RiskLevel::Medium => tolerance <= AnalysisTolerance::Medium,
        RiskLevel::Low => tolerance == AnalysisTolerance::Low,
    };
    if failed {
        ExecutionStatus::Failed
    } else {
        ExecutionStatus::Success
    }
}

/// Outcome forced for accounts flagged for QA verification
pub fn qa_override(summary: Option<&AnalysisSummary>) -> ExecutionStatus {
    match summary {
        Some(summary) if !summary.is_empty() => ExecutionStatus::Success,
        _ => ExecutionStatus::Failed,
    }
}
