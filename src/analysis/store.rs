//! Stores the analysis service and the orchestrator share.

use super::types::{AnalysisContext, AnalysisSummary, AnalysisType};
use crate::error::StateResult;
use async_trait::async_trait;
use dashmap::DashMap;

/// Analysis summaries keyed by `(app_id, state_execution_id, analysis_type)`
#[async_trait]
pub trait AnalysisSummaryStore: Send + Sync {
    async fn latest_summary(
        &self,
        app_id: &str,
        state_execution_id: &str,
        analysis_type: AnalysisType,
    ) -> StateResult<Option<AnalysisSummary>>;

    /// Replace the latest summary
    async fn save_summary(&self, summary: AnalysisSummary) -> StateResult<()>;
}

#[async_trait]
pub trait AnalysisContextStore: Send + Sync {
    async fn save_context(&self, context: AnalysisContext) -> StateResult<()>;

    async fn context(&self, state_execution_id: &str) -> StateResult<Option<AnalysisContext>>;
}

type SummaryKey = (String, String, AnalysisType);

#[derive(Debug, Default)]
pub struct InMemoryAnalysisStore {
    summaries: DashMap<SummaryKey, AnalysisSummary>,
    contexts: DashMap<String, AnalysisContext>,
}

impl InMemoryAnalysisStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn context_count(&self) -> usize {
        self.contexts.len()
    }
}

#[async_trait]
impl AnalysisSummaryStore for InMemoryAnalysisStore {
    async fn latest_summary(
        &self,
        app_id: &str,
        state_execution_id: &str,
        analysis_type: AnalysisType,
    ) -> StateResult<Option<AnalysisSummary>> {
        let key = (app_id.to_string(), state_execution_id.to_string(), analysis_type);
        Ok(self.summaries.get(&key).map(|entry| entry.value().clone()))
    }

    async fn save_summary(&self, summary: AnalysisSummary) -> StateResult<()> {
        let key = (
            summary.app_id.clone(),
            summary.state_execution_id.clone(),
            summary.analysis_type,
        );
        self.summaries.insert(key, summary);
        Ok(())
    }
}

#[async_trait]
impl AnalysisContextStore for InMemoryAnalysisStore {
    async fn save_context(&self, context: AnalysisContext) -> StateResult<()> {
        self.contexts
            .insert(context.state_execution_id.clone(), context);
        Ok(())
    }

    async fn context(&self, state_execution_id: &str) -> StateResult<Option<AnalysisContext>> {
        Ok(self
            .contexts
            .get(state_execution_id)
            .map(|entry| entry.value().clone()))
    }
}
