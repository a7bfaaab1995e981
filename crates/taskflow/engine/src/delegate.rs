//! Delegates: the roles that actually perform step work
//!
//! The engine never executes a step itself. It hands a
//! [`DelegationRequest`] to the delegate registered for the step's role
//! and interprets the response. Timeouts and retries inside a delegate
//! are the delegate's business; they surface here as failures.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use taskflow_types::{DelegationRequest, DelegationResponse, RoleId};
use thiserror::Error;

/// Errors raised while reaching a delegate
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DelegateError {
    #[error("Delegate unavailable: {0}")]
    Unavailable(String),

    #[error("Delegate timed out: {0}")]
    Timeout(String),

    #[error("Delegate rejected request: {0}")]
    Rejected(String),
}

/// A role that performs step work
#[async_trait]
pub trait Delegate: Send + Sync {
    async fn invoke(&self, request: DelegationRequest) -> Result<DelegationResponse, DelegateError>;
}

// ── Registry ─────────────────────────────────────────────────────────

/// Delegates keyed by role.
///
/// Lookup is by role name at dispatch time. Roles stay open-ended
/// strings in workflow files, so the closed check happens once instead:
/// `WorkflowEngine::new` refuses a graph that names a role with no
/// delegate here, which leaves the dispatch-time miss unreachable for a
/// running engine. The executor still records it as a step failure
/// rather than panicking.
#[derive(Clone, Default)]
pub struct DelegateRegistry {
    delegates: HashMap<RoleId, Arc<dyn Delegate>>,
}

impl DelegateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the delegate for a role
    pub fn register(&mut self, role: impl Into<String>, delegate: Arc<dyn Delegate>) {
        let role = RoleId::new(role);
        tracing::debug!(role = %role, "Delegate registered");
        self.delegates.insert(role, delegate);
    }

    pub fn with(mut self, role: impl Into<String>, delegate: Arc<dyn Delegate>) -> Self {
        self.register(role, delegate);
        self
    }

    pub fn get(&self, role: &RoleId) -> Option<Arc<dyn Delegate>> {
        self.delegates.get(role).cloned()
    }

    pub fn contains(&self, role: &RoleId) -> bool {
        self.delegates.contains_key(role)
    }

    pub fn roles(&self) -> Vec<&RoleId> {
        let mut roles: Vec<&RoleId> = self.delegates.keys().collect();
        roles.sort();
        roles
    }

    pub fn len(&self) -> usize {
        self.delegates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.delegates.is_empty()
    }
}

impl std::fmt::Debug for DelegateRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelegateRegistry")
            .field("roles", &self.roles())
            .finish()
    }
}

// ── Mock Delegate ────────────────────────────────────────────────────

/// A scripted delegate for testing.
///
/// Queued responses are returned in order; once the queue is empty every
/// call gets the fallback response. Every request is recorded.
pub struct MockDelegate {
    script: Mutex<VecDeque<Result<DelegationResponse, DelegateError>>>,
    fallback: Result<DelegationResponse, DelegateError>,
    requests: Mutex<Vec<DelegationRequest>>,
}

impl MockDelegate {
    /// Always succeeds with no outputs
    pub fn succeeding() -> Self {
        Self::with_fallback(Ok(DelegationResponse::success(BTreeMap::new())))
    }

    /// Always succeeds with the given outputs
    pub fn producing<I, K, V>(outputs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let outputs = outputs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self::with_fallback(Ok(DelegationResponse::success(outputs)))
    }

    /// Always reports failure
    pub fn failing(detail: impl Into<String>) -> Self {
        Self::with_fallback(Ok(DelegationResponse::failure(detail)))
    }

    pub fn with_fallback(fallback: Result<DelegationResponse, DelegateError>) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue a response for the next unscripted call
    pub fn then(self, response: Result<DelegationResponse, DelegateError>) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(response);
        }
        self
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn requests(&self) -> Vec<DelegationRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn last_request(&self) -> Option<DelegationRequest> {
        self.requests.lock().ok().and_then(|r| r.last().cloned())
    }
}

#[async_trait]
impl Delegate for MockDelegate {
    async fn invoke(&self, request: DelegationRequest) -> Result<DelegationResponse, DelegateError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }
        let scripted = self.script.lock().ok().and_then(|mut s| s.pop_front());
        scripted.unwrap_or_else(|| self.fallback.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskflow_types::{DelegationContext, StepId, TaskId};

    fn request(step: &str) -> DelegationRequest {
        DelegationRequest {
            task_id: TaskId::new("t1"),
            step_id: StepId::new(step),
            role: RoleId::new("writer"),
            inputs: BTreeMap::new(),
            context: DelegationContext::default(),
        }
    }

    #[tokio::test]
    async fn test_mock_script_then_fallback() {
        let mock = MockDelegate::succeeding()
            .then(Ok(DelegationResponse::failure("first attempt")))
            .then(Err(DelegateError::Timeout("30s".into())));

        let first = mock.invoke(request("S1")).await.unwrap();
        assert!(!first.is_success());
        assert!(matches!(
            mock.invoke(request("S1")).await,
            Err(DelegateError::Timeout(_))
        ));
        assert!(mock.invoke(request("S2")).await.unwrap().is_success());

        assert_eq!(mock.call_count(), 3);
        assert_eq!(mock.last_request().unwrap().step_id, StepId::new("S2"));
    }

    #[tokio::test]
    async fn test_registry_lookup() {
        let writer = Arc::new(MockDelegate::producing([("draft", "text")]));
        let registry = DelegateRegistry::new()
            .with("writer", writer.clone())
            .with("reviewer", Arc::new(MockDelegate::failing("no")));

        assert_eq!(registry.len(), 2);
        assert!(registry.contains(&RoleId::new("writer")));
        assert!(registry.get(&RoleId::new("publisher")).is_none());

        let delegate = registry.get(&RoleId::new("writer")).unwrap();
        let response = delegate.invoke(request("S1")).await.unwrap();
        assert_eq!(response.outputs.get("draft").unwrap(), "text");
        assert_eq!(writer.call_count(), 1);
    }
}
