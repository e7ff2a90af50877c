//! Test doubles for code that runs queries.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::Value;

use crate::{
    Error, Result,
    commands::{QueryCommand, RawResponse, RequestExecutor, ServerNode},
    query::{IndexQuery, QueryResponse},
};

enum Scripted {
    Response(RawResponse),
    Failure(Error),
}

#[derive(Default)]
struct StubState {
    script: Mutex<VecDeque<Scripted>>,
    submitted: Mutex<Vec<IndexQuery>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A scripted execution layer. Queued responses are replayed in order
/// through [`QueryCommand::set_response`], so error mapping behaves as it
/// would against a server. Clones share the same script and history.
#[derive(Clone)]
pub struct StubExecutor {
    node: ServerNode,
    state: Arc<StubState>,
}

impl Default for StubExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl StubExecutor {
    pub fn new() -> Self {
        Self {
            node: ServerNode::new("http://stub.local", "stub"),
            state: Arc::new(StubState::default()),
        }
    }

    pub fn node(&self) -> &ServerNode {
        &self.node
    }

    pub fn push_response(&self, response: RawResponse) -> &Self {
        lock(&self.state.script).push_back(Scripted::Response(response));
        self
    }

    /// Queues a 200 carrying `response` as its body.
    pub fn push_results(&self, response: QueryResponse) -> &Self {
        let body = serde_json::to_value(response).unwrap_or(Value::Null);
        self.push_response(RawResponse::ok(body))
    }

    pub fn push_no_content(&self) -> &Self {
        self.push_response(RawResponse::no_content())
    }

    /// Queues a transport failure that never reaches response validation.
    pub fn push_failure(&self, error: Error) -> &Self {
        lock(&self.state.script).push_back(Scripted::Failure(error));
        self
    }

    pub fn submitted_queries(&self) -> Vec<IndexQuery> {
        lock(&self.state.submitted).clone()
    }

    pub fn last_query(&self) -> Option<IndexQuery> {
        lock(&self.state.submitted).last().cloned()
    }

    pub fn remaining(&self) -> usize {
        lock(&self.state.script).len()
    }
}

#[async_trait]
impl RequestExecutor for StubExecutor {
    async fn execute(&self, command: &mut QueryCommand) -> Result<Option<QueryResponse>> {
        if let Some(payload) = command.payload() {
            let query: IndexQuery = serde_json::from_value(payload.clone())?;
            lock(&self.state.submitted).push(query);
        }
        let next = lock(&self.state.script).pop_front();
        match next {
            None => Ok(None),
            Some(Scripted::Response(response)) => {
                let outcome = command.set_response(response);
                if outcome.is_err() {
                    command.add_failed_node(self.node.clone());
                }
                outcome
            }
            Some(Scripted::Failure(error)) => {
                command.add_failed_node(self.node.clone());
                Err(error)
            }
        }
    }
}
