//! Bounded wait for the analysis summary after collection finishes.
//!
//! The analysis service writes its summary shortly after the last collection
//! task reports back, so the first read can miss it. The poller re-reads a
//! fixed number of times with a fixed backoff; the caller decides what an
//! exhausted poll means.

use super::store::AnalysisSummaryStore;
use super::types::{AnalysisSummary, AnalysisType};
use crate::error::StateResult;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Records requested sleeps and returns immediately
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    sleeps: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().push(duration);
    }
}

pub struct SummaryPoller {
    attempts: u32,
    backoff: Duration,
    sleeper: Arc<dyn Sleeper>,
}

impl std::fmt::Debug for SummaryPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SummaryPoller")
            .field("attempts", &self.attempts)
            .field("backoff", &self.backoff)
            .finish()
    }
}

impl SummaryPoller {
    pub fn new(attempts: u32, backoff: Duration, sleeper: Arc<dyn Sleeper>) -> Self {
        Self {
            attempts: attempts.max(1),
            backoff,
            sleeper,
        }
    }

    /// Read the summary, sleeping between misses; `None` once attempts run out
    pub async fn poll(
        &self,
        store: &dyn AnalysisSummaryStore,
        app_id: &str,
        state_execution_id: &str,
        analysis_type: AnalysisType,
    ) -> StateResult<Option<AnalysisSummary>> {
        for attempt in 1..=self.attempts {
            if let Some(summary) = store
                .latest_summary(app_id, state_execution_id, analysis_type)
                .await?
            {
                return Ok(Some(summary));
            }
            debug!(
                state_execution_id = %state_execution_id,
                attempt = attempt,
                max_attempts = self.attempts,
                "Analysis summary not available yet"
            );
            if attempt < self.attempts {
                self.sleeper.sleep(self.backoff).await;
            }
        }
        Ok(None)
    }
}
