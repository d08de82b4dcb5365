use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Which hosts a verification compares against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComparisonStrategy {
    /// Current phase hosts against the hosts of the last successful execution
    #[default]
    CompareWithPrevious,
    /// New hosts against the old hosts running side by side
    CompareWithCurrent,
    /// Baseline learned from a window before the deployment
    Predictive,
}

/// How much risk the user accepts before the verification fails
///
/// Ordered `Low < Medium < High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnalysisTolerance {
    Low,
    #[default]
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnalysisType {
    Log,
    Metric,
}

impl fmt::Display for AnalysisType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Log => f.write_str("LOG"),
            Self::Metric => f.write_str("METRIC"),
        }
    }
}

/// Everything the analysis service needs to score one verification
///
/// Saved before any collection task is submitted and never changed after the
/// verification completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisContext {
    pub correlation_id: String,
    pub account_id: String,
    pub app_id: String,
    pub env_id: Option<String>,
    pub workflow_id: String,
    pub workflow_execution_id: String,
    pub state_execution_id: String,
    pub service_id: String,
    pub phase_name: String,
    /// Provider tag, e.g. `APP_DYNAMICS` or `ELK`
    pub state_type: String,
    pub analysis_type: AnalysisType,
    pub comparison_strategy: ComparisonStrategy,
    pub tolerance: AnalysisTolerance,
    /// hostname -> group
    pub control_nodes: BTreeMap<String, String>,
    pub test_nodes: BTreeMap<String, String>,
    /// Hosts of the baseline execution for `CompareWithPrevious`
    #[serde(default)]
    pub last_execution_nodes: BTreeMap<String, String>,
    pub time_duration_minutes: u32,
    /// Epoch minute the collection window starts at
    pub start_data_collection_minute: i64,
    pub prev_workflow_execution_id: Option<String>,
    pub per_minute_collection: bool,
    pub new_nodes_traffic_shift_percent: Option<u32>,
    pub created_at: DateTime<Utc>,
}

impl AnalysisContext {
    /// Hosts data is collected from: test first, then control
    pub fn collection_hosts(&self) -> Vec<String> {
        let mut hosts: Vec<String> = self.test_nodes.keys().cloned().collect();
        hosts.extend(
            self.control_nodes
                .keys()
                .filter(|host| !self.test_nodes.contains_key(*host))
                .cloned(),
        );
        hosts
    }
}

/// Latest result the analysis service saved for a verification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSummary {
    pub app_id: String,
    pub state_execution_id: String,
    pub analysis_type: AnalysisType,
    /// `None` when the analysis had no data to score
    pub risk_level: Option<RiskLevel>,
    pub analysis_minute: i64,
    pub analyzed_records: usize,
    pub message: Option<String>,
    #[serde(default)]
    pub aborted: bool,
}

impl AnalysisSummary {
    pub fn new(app_id: &str, state_execution_id: &str, analysis_type: AnalysisType) -> Self {
        Self {
            app_id: app_id.to_string(),
            state_execution_id: state_execution_id.to_string(),
            analysis_type,
            risk_level: None,
            analysis_minute: 0,
            analyzed_records: 0,
            message: None,
            aborted: false,
        }
    }

    pub fn with_risk(mut self, risk_level: RiskLevel, analyzed_records: usize) -> Self {
        self.risk_level = Some(risk_level);
        self.analyzed_records = analyzed_records;
        self
    }

    /// Placeholder written when a verification is aborted before any result
    pub fn aborted(app_id: &str, state_execution_id: &str, analysis_type: AnalysisType) -> Self {
        let mut summary = Self::new(app_id, state_execution_id, analysis_type);
        summary.aborted = true;
        summary.message = Some("Verification aborted".to_string());
        summary
    }

    /// Nothing was scored
    pub fn is_empty(&self) -> bool {
        self.risk_level.is_none() && self.analyzed_records == 0
    }
}

/// Resume data of an analysis step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisExecutionData {
    pub activity_id: String,
    pub correlation_id: String,
    pub analysis_type: AnalysisType,
    pub state_type: String,
    pub comparison_strategy: ComparisonStrategy,
    pub tolerance: AnalysisTolerance,
    pub analysis_minute: i64,
    pub time_duration_minutes: u32,
    pub control_nodes: BTreeMap<String, String>,
    pub test_nodes: BTreeMap<String, String>,
    #[serde(default)]
    pub last_execution_nodes: BTreeMap<String, String>,
    pub baseline_execution_id: Option<String>,
    pub wait_ids: Vec<String>,
    pub message: Option<String>,
}
