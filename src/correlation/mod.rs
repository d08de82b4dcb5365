//! # Wait Correlation Registry
//!
//! Join barrier that multiplexes N outstanding wait ids into a single resume
//! of the step instance that registered them ("wait for all").
//!
//! ## Guarantees
//!
//! - A [`ResumeEvent`] fires exactly once per registration, after the last
//!   expected response arrives, regardless of arrival order
//! - An error response short-circuits the join and fires immediately
//! - A response that beats its registration (a worker answering before the
//!   submitting step has suspended) is held and replayed by `register`
//! - Held responses are bounded; the oldest is evicted first
//!
//! The "have all arrived" decision is taken under a single lock, so
//! concurrent notifications converging on one instance cannot double-fire.

use crate::constants::system::EARLY_RESPONSE_BUFFER_SIZE;
use crate::dispatch::ResponseData;
use crate::error::{StateError, StateResult};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::{debug, warn};

/// Aggregate delivered to the waiting step instance
#[derive(Debug, Clone, PartialEq)]
pub struct ResumeEvent {
    pub instance_id: String,
    pub responses: HashMap<String, ResponseData>,
}

#[derive(Debug, Default)]
struct PendingJoin {
    expected: HashSet<String>,
    received: HashMap<String, ResponseData>,
}

impl PendingJoin {
    fn is_ready(&self) -> bool {
        self.received.values().any(ResponseData::is_error)
            || self.received.len() >= self.expected.len()
    }
}

/// Responses for wait ids nobody registered yet, oldest first
#[derive(Debug, Default)]
struct EarlyResponses {
    responses: HashMap<String, ResponseData>,
    order: VecDeque<String>,
}

impl EarlyResponses {
    fn hold(&mut self, wait_id: &str, response: ResponseData, capacity: usize) {
        if capacity == 0 {
            return;
        }
        if self.responses.insert(wait_id.to_string(), response).is_none() {
            self.order.push_back(wait_id.to_string());
        }
        while self.responses.len() > capacity {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            if self.responses.remove(&oldest).is_some() {
                warn!(wait_id = %oldest, "Early response evicted before registration");
            }
        }
    }

    fn take(&mut self, wait_id: &str) -> Option<ResponseData> {
        let response = self.responses.remove(wait_id)?;
        self.order.retain(|id| id != wait_id);
        Some(response)
    }
}

#[derive(Debug, Default)]
struct JoinState {
    /// instance id -> outstanding join
    joins: HashMap<String, PendingJoin>,
    early: EarlyResponses,
}

#[derive(Debug)]
pub struct WaitCorrelationRegistry {
    /// wait id -> instance id
    waits: DashMap<String, String>,
    state: Mutex<JoinState>,
    buffer_capacity: usize,
}

impl Default for WaitCorrelationRegistry {
    fn default() -> Self {
        Self::with_buffer_capacity(EARLY_RESPONSE_BUFFER_SIZE)
    }
}

impl WaitCorrelationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding at most `buffer_capacity` early responses
    pub fn with_buffer_capacity(buffer_capacity: usize) -> Self {
        Self {
            waits: DashMap::new(),
            state: Mutex::new(JoinState::default()),
            buffer_capacity,
        }
    }

    /// Register the correlation set of an instance, replacing any earlier one.
    ///
    /// Responses that arrived before the registration are applied at once;
    /// when they complete the join the aggregate is returned here instead of
    /// from a later `notify`.
    pub fn register(&self, instance_id: &str, wait_ids: &[String]) -> StateResult<Option<ResumeEvent>> {
        if wait_ids.is_empty() {
            return Err(StateError::InvalidRequest(format!(
                "instance {instance_id} registered an empty correlation set"
            )));
        }

        let mut state = self.state.lock();
        if let Some(previous) = state.joins.remove(instance_id) {
            for wait_id in previous.expected {
                self.waits.remove(&wait_id);
            }
        }

        let mut join = PendingJoin {
            expected: wait_ids.iter().cloned().collect(),
            received: HashMap::new(),
        };
        for wait_id in &join.expected {
            match state.early.take(wait_id) {
                Some(response) => {
                    join.received.insert(wait_id.clone(), response);
                }
                None => {
                    self.waits.insert(wait_id.clone(), instance_id.to_string());
                }
            }
        }

        debug!(
            instance_id = %instance_id,
            wait_count = join.expected.len(),
            replayed = join.received.len(),
            "⏸️ Correlation set registered"
        );

        if !join.received.is_empty() && join.is_ready() {
            return Ok(Some(self.release(instance_id.to_string(), join)));
        }

        state.joins.insert(instance_id.to_string(), join);
        Ok(None)
    }

    /// Record one response; returns the aggregate once the join completes
    pub fn notify(&self, wait_id: &str, response: ResponseData) -> Option<ResumeEvent> {
        let mut state = self.state.lock();

        let Some((_, instance_id)) = self.waits.remove(wait_id) else {
            debug!(wait_id = %wait_id, "Response for unregistered wait id held");
            state.early.hold(wait_id, response, self.buffer_capacity);
            return None;
        };

        let join = state.joins.get_mut(&instance_id)?;
        join.received.insert(wait_id.to_string(), response);

        if !join.is_ready() {
            debug!(
                instance_id = %instance_id,
                received = join.received.len(),
                expected = join.expected.len(),
                "Waiting for remaining responses"
            );
            return None;
        }

        let join = state.joins.remove(&instance_id)?;
        Some(self.release(instance_id, join))
    }

    /// Retire a completed join and its unanswered wait ids
    fn release(&self, instance_id: String, join: PendingJoin) -> ResumeEvent {
        for wait_id in &join.expected {
            if !join.received.contains_key(wait_id) {
                self.waits.remove(wait_id);
            }
        }
        ResumeEvent {
            instance_id,
            responses: join.received,
        }
    }

    /// Drop an instance's outstanding waits; returns how many were pending
    pub fn cancel(&self, instance_id: &str) -> usize {
        let mut state = self.state.lock();
        let Some(join) = state.joins.remove(instance_id) else {
            return 0;
        };

        let mut pending = 0;
        for wait_id in &join.expected {
            if self.waits.remove(wait_id).is_some() {
                pending += 1;
            }
        }
        pending
    }

    /// Wait ids still outstanding for an instance
    pub fn pending_count(&self, instance_id: &str) -> usize {
        self.state
            .lock()
            .joins
            .get(instance_id)
            .map(|join| join.expected.len() - join.received.len())
            .unwrap_or(0)
    }

    pub fn is_waiting(&self, wait_id: &str) -> bool {
        self.waits.contains_key(wait_id)
    }

    /// Responses held for wait ids not registered yet
    pub fn held_count(&self) -> usize {
        self.state.lock().early.responses.len()
    }
}
