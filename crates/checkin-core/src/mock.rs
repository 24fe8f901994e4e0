//! Scriptable in-memory [`Transport`] for tests.
//!
//! Every request is recorded. Responses are looked up per path: one-shot
//! responses queued with [`MockTransport::push_response`] are consumed first,
//! then the sticky response set with [`MockTransport::respond`], and finally a
//! plain `{"status": 200}` success.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::transport::{Method, Transport, TransportResult};

/// A request seen by the mock.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    /// Verb used.
    pub method: Method,
    /// Path requested.
    pub path: String,
    /// POST body.
    pub body: Option<Value>,
}

#[derive(Debug, Default)]
struct MockState {
    requests: Vec<RecordedRequest>,
    queued: HashMap<String, VecDeque<TransportResult<Value>>>,
    sticky: HashMap<String, TransportResult<Value>>,
}

/// Recording, scriptable transport.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    /// Create a mock answering every request with success.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every request to `path` with `response`.
    pub fn respond(&self, path: &str, response: TransportResult<Value>) {
        self.lock().sticky.insert(path.to_string(), response);
    }

    /// Answer the next request to `path` with `response`.
    pub fn push_response(&self, path: &str, response: TransportResult<Value>) {
        self.lock()
            .queued
            .entry(path.to_string())
            .or_default()
            .push_back(response);
    }

    /// All requests so far, oldest first.
    #[must_use]
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.lock().requests.clone()
    }

    /// Requests made to `path`.
    #[must_use]
    pub fn requests_to(&self, path: &str) -> Vec<RecordedRequest> {
        self.lock()
            .requests
            .iter()
            .filter(|r| r.path == path)
            .cloned()
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        // A poisoned mock only happens after a test already panicked.
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn record(&self, method: Method, path: &str, body: Option<Value>) -> TransportResult<Value> {
        let mut state = self.lock();
        state.requests.push(RecordedRequest {
            method,
            path: path.to_string(),
            body,
        });
        if let Some(response) = state.queued.get_mut(path).and_then(VecDeque::pop_front) {
            return response;
        }
        state
            .sticky
            .get(path)
            .cloned()
            .unwrap_or_else(|| Ok(json!({ "status": 200 })))
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn get(&self, path: &str) -> TransportResult<Value> {
        self.record(Method::Get, path, None)
    }

    async fn post(&self, path: &str, body: Value) -> TransportResult<Value> {
        self.record(Method::Post, path, Some(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportError;

    #[tokio::test]
    async fn test_response_precedence() {
        let mock = MockTransport::new();
        mock.respond("a", Err(TransportError::new(500, "down")));
        mock.push_response("a", Ok(json!({ "status": 200, "once": true })));

        assert_eq!(mock.get("a").await.unwrap()["once"], true);
        assert_eq!(mock.get("a").await.unwrap_err().code, 500);
        assert!(mock.post("b", json!({})).await.is_ok());

        assert_eq!(mock.requests().len(), 3);
        assert_eq!(mock.requests_to("a").len(), 2);
        assert_eq!(mock.requests_to("b")[0].body, Some(json!({})));
    }
}
