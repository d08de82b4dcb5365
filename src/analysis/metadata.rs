//! Verification metadata side channel.
//!
//! Dashboards list verifications from these records. Saving one is best
//! effort: a failure is logged and never changes the step outcome.

use crate::error::StateResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationMetadata {
    pub account_id: String,
    pub app_id: String,
    pub workflow_id: String,
    pub workflow_execution_id: String,
    pub state_execution_id: String,
    pub state_type: String,
    pub service_id: String,
    pub phase_name: String,
    pub artifact_name: Option<String>,
    pub started_at: DateTime<Utc>,
}

#[async_trait]
pub trait VerificationMetadataRecorder: Send + Sync {
    async fn record(&self, metadata: VerificationMetadata) -> StateResult<()>;
}

/// Save metadata, logging instead of failing
pub async fn record_best_effort(
    recorder: &dyn VerificationMetadataRecorder,
    metadata: VerificationMetadata,
) {
    let state_execution_id = metadata.state_execution_id.clone();
    if let Err(e) = recorder.record(metadata).await {
        warn!(
            state_execution_id = %state_execution_id,
            error = %e,
            "Failed to save verification metadata"
        );
    }
}

#[derive(Debug, Default)]
pub struct InMemoryMetadataRecorder {
    records: Mutex<Vec<VerificationMetadata>>,
    failing: Mutex<bool>,
}

impl InMemoryMetadataRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<VerificationMetadata> {
        self.records.lock().clone()
    }

    /// Make every subsequent save fail
    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock() = failing;
    }
}

#[async_trait]
impl VerificationMetadataRecorder for InMemoryMetadataRecorder {
    async fn record(&self, metadata: VerificationMetadata) -> StateResult<()> {
        if *self.failing.lock() {
            return Err(crate::error::StateError::Persistence(
                "metadata store unavailable".to_string(),
            ));
        }
        self.records.lock().push(metadata);
        Ok(())
    }
}
