#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cropwatch_core::executor::{QueryError, QueryExecutor, QueryParam, QueryRow};
use cropwatch_core::llm::{ChatMessage, ChatModel, ChatRequest, LlmError};

/// Replays queued replies in order and records every request it receives.
#[derive(Clone, Default)]
pub struct ScriptedModel {
    replies: Arc<Mutex<VecDeque<Result<ChatMessage, String>>>>,
    requests: Arc<Mutex<Vec<ChatRequest>>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, message: ChatMessage) -> Self {
        self.replies.lock().unwrap().push_back(Ok(message));
        self
    }

    pub fn fail(self, message: &str) -> Self {
        self.replies.lock().unwrap().push_back(Err(message.to_string()));
        self
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatMessage, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        match self.replies.lock().unwrap().pop_front() {
            Some(Ok(message)) => Ok(message),
            Some(Err(message)) => Err(LlmError::Status {
                status: 503,
                body: message,
            }),
            None => Err(LlmError::Malformed("script exhausted".to_string())),
        }
    }
}

/// Returns fixed rows (or a fixed failure) and records each statement.
#[derive(Clone, Default)]
pub struct FakeExecutor {
    outcome: Arc<Mutex<Option<Result<Vec<QueryRow>, String>>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl FakeExecutor {
    pub fn returning(rows: Vec<QueryRow>) -> Self {
        let fake = Self::default();
        *fake.outcome.lock().unwrap() = Some(Ok(rows));
        fake
    }

    pub fn failing(message: &str) -> Self {
        let fake = Self::default();
        *fake.outcome.lock().unwrap() = Some(Err(message.to_string()));
        fake
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl QueryExecutor for FakeExecutor {
    async fn execute(&self, sql: &str, _params: &[QueryParam]) -> Result<Vec<QueryRow>, QueryError> {
        self.calls.lock().unwrap().push(sql.to_string());
        match self.outcome.lock().unwrap().clone() {
            Some(Ok(rows)) => Ok(rows),
            Some(Err(message)) => Err(QueryError::Database(sqlx::Error::Protocol(message))),
            None => Ok(Vec::new()),
        }
    }
}

pub fn row(pairs: serde_json::Value) -> QueryRow {
    pairs.as_object().cloned().expect("object literal")
}
