//! Feature flag lookups consumed by verification.
//!
//! Rule content lives outside this crate; only the yes/no answer per scope
//! (account or application id) is consumed here.

use dashmap::DashSet;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeatureName {
    /// Per-minute collection for the non-GA provider allowlist
    PerMinuteCvCollection,
    /// Force the verification outcome for QA accounts
    QaVerificationOverride,
}

pub trait FeatureFlags: Send + Sync {
    fn is_enabled(&self, feature: FeatureName, scope_id: &str) -> bool;
}

#[derive(Debug, Default)]
pub struct InMemoryFeatureFlags {
    enabled: DashSet<(FeatureName, String)>,
}

impl InMemoryFeatureFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enable(&self, feature: FeatureName, scope_id: &str) {
        self.enabled.insert((feature, scope_id.to_string()));
    }

    pub fn disable(&self, feature: FeatureName, scope_id: &str) {
        self.enabled.remove(&(feature, scope_id.to_string()));
    }
}

impl FeatureFlags for InMemoryFeatureFlags {
    fn is_enabled(&self, feature: FeatureName, scope_id: &str) -> bool {
        self.enabled.contains(&(feature, scope_id.to_string()))
    }
}
