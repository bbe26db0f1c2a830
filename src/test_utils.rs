//! Test utilities for mathchat
//!
//! Scripted completion transports and store helpers shared by the unit
//! tests of several modules.

use crate::pipeline::{
    CompletionRequest, CompletionTransport, TransportError, TransportErrorKind, TransportResponse,
};
use crate::storage::{MemoryBackend, SessionStore, DEFAULT_STORAGE_KEY};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

type Scripted = std::result::Result<TransportResponse, TransportError>;

/// Replays a fixed list of attempt results in order
///
/// Once the script runs out every further attempt fails to connect.
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedTransport {
    pub fn new(script: Vec<Scripted>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().expect("requests lock").len()
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().expect("requests lock").clone()
    }
}

#[async_trait]
impl CompletionTransport for ScriptedTransport {
    async fn post(&self, request: &CompletionRequest) -> Scripted {
        self.requests
            .lock()
            .expect("requests lock")
            .push(request.clone());
        self.script
            .lock()
            .expect("script lock")
            .pop_front()
            .unwrap_or_else(|| {
                Err(TransportError::new(
                    TransportErrorKind::Connect,
                    "script exhausted",
                ))
            })
    }
}

/// Fails every attempt with the same error kind
pub struct FailingTransport {
    kind: TransportErrorKind,
    calls: AtomicUsize,
}

impl FailingTransport {
    pub fn new(kind: TransportErrorKind) -> Self {
        Self {
            kind,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionTransport for FailingTransport {
    async fn post(&self, _request: &CompletionRequest) -> Scripted {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(TransportError::new(self.kind, "simulated failure"))
    }
}

/// Successful completion body carrying `text`
pub fn completion_response(text: &str) -> TransportResponse {
    TransportResponse {
        status: 200,
        body: serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": text}}]
        })
        .to_string(),
    }
}

/// Two views over one in-memory medium
pub fn two_views() -> (SessionStore, SessionStore) {
    let backend = Arc::new(MemoryBackend::new());
    (
        SessionStore::new(backend.clone(), DEFAULT_STORAGE_KEY),
        SessionStore::new(backend, DEFAULT_STORAGE_KEY),
    )
}
