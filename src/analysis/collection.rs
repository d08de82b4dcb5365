//! Collection scheduling: per-minute eligibility, the collection window and
//! the provider capability that turns an analysis context into tasks.

use super::flags::{FeatureFlags, FeatureName};
use super::types::{AnalysisContext, AnalysisType, ComparisonStrategy};
use crate::config::AnalysisConfig;
use crate::context::ExecutionContext;
use crate::dispatch::TaskDescriptor;
use crate::error::{FieldErrors, StateResult};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Settable clock for tests and replays
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Minute-aligned span data is collected over
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionWindow {
    pub start_minute: i64,
    pub duration_minutes: u32,
}

impl CollectionWindow {
    /// Window starting at the current minute boundary
    pub fn starting_now(clock: &dyn Clock, duration_minutes: u32) -> Self {
        Self {
            start_minute: clock.now().timestamp().div_euclid(60),
            duration_minutes,
        }
    }

    pub fn end_minute(&self) -> i64 {
        self.start_minute + i64::from(self.duration_minutes)
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        minute_to_time(self.start_minute)
    }

    pub fn end_time(&self) -> DateTime<Utc> {
        minute_to_time(self.end_minute())
    }
}

fn minute_to_time(minute: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(minute * 60, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Whether a provider collects one task per minute instead of one per window
///
/// PREDICTIVE always qualifies. Otherwise the provider must be on the GA
/// allowlist, or on the flagged allowlist with the flag on for the account.
pub fn is_eligible_for_per_minute_task(
    strategy: ComparisonStrategy,
    state_type: &str,
    account_id: &str,
    flags: &dyn FeatureFlags,
    config: &AnalysisConfig,
) -> bool {
    if strategy == ComparisonStrategy::Predictive {
        return true;
    }
    let flagged = flags.is_enabled(FeatureName::PerMinuteCvCollection, account_id)
        && config.per_minute_cv_states.iter().any(|s| s == state_type);
    flagged || config.ga_per_minute_cv_states.iter().any(|s| s == state_type)
}

/// Provider half of an analysis step
///
/// A collector knows how to address one monitoring system. It never submits
/// anything itself: it turns an [`AnalysisContext`] into one task descriptor
/// per remote unit of work and the orchestrator dispatches them.
#[async_trait]
pub trait DataCollector: Send + Sync {
    /// Provider tag matched against the per-minute allowlists
    fn state_type(&self) -> &str;

    fn analysis_type(&self) -> AnalysisType;

    /// Whether the provider can run per-minute collection at all
    fn supports_v2_data_collection(&self) -> bool;

    fn validate_fields(&self) -> FieldErrors {
        FieldErrors::new()
    }

    async fn collection_tasks(
        &self,
        context: &dyn ExecutionContext,
        analysis: &AnalysisContext,
        config: &AnalysisConfig,
    ) -> StateResult<Vec<TaskDescriptor>>;
}
