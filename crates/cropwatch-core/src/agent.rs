//! Reason-then-act loop around the chat model and the registered tools.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::llm::{ChatMessage, ChatModel, ChatRequest, LlmError, Role, ToolCall};
use crate::tools::ToolRegistry;

pub const AGENT_SYSTEM_PROMPT: &str = "You are an intelligent assistant for an agricultural monitoring system. \
You can help farmers analyze crop health conditions and answer questions about farm data.

You have the following capabilities:
1. Answer agriculture-related questions from users
2. Query the farm monitoring database for information such as crop health status, temperature and humidity data, problem category statistics, etc.

Please adhere to the following principles:
1. Keep your answers professional, helpful, and provide valuable advice. All answers must be in English.
2. For questions involving real-time information, use the timestamp from the database.
3. Keep responses to 100 words or less.";

/// Model calls allowed per turn before giving up.
pub const DEFAULT_MAX_STEPS: usize = 25;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Model(#[from] LlmError),

    #[error("conversation has no user or assistant messages")]
    EmptyConversation,

    #[error("agent did not produce a final answer within {0} model calls")]
    StepLimit(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentReply {
    pub content: String,
    pub role: Role,
}

pub struct FarmAgent {
    model: Arc<dyn ChatModel>,
    tools: ToolRegistry,
    system_prompt: String,
    temperature: f32,
    max_steps: usize,
}

impl FarmAgent {
    pub fn new(model: Arc<dyn ChatModel>, tools: ToolRegistry) -> Self {
        Self {
            model,
            tools,
            system_prompt: AGENT_SYSTEM_PROMPT.to_string(),
            temperature: 0.0,
            max_steps: DEFAULT_MAX_STEPS,
        }
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    /// Answers the last turn of `history`. Only user and assistant turns are
    /// kept; the system instruction is always this agent's own.
    pub async fn respond(&self, history: &[ChatMessage]) -> Result<AgentReply, AgentError> {
        let mut transcript = Vec::with_capacity(history.len() + 1);
        transcript.push(ChatMessage::system(self.system_prompt.clone()));
        transcript.extend(
            history
                .iter()
                .filter(|m| matches!(m.role, Role::User | Role::Assistant))
                .map(|m| ChatMessage {
                    role: m.role,
                    content: m.content.clone(),
                    tool_calls: Vec::new(),
                    tool_call_id: None,
                }),
        );
        if transcript.len() == 1 {
            return Err(AgentError::EmptyConversation);
        }

        let specs = self.tools.specs();
        for step in 1..=self.max_steps {
            let request = ChatRequest::new(transcript.clone())
                .with_temperature(self.temperature)
                .with_tools(specs.clone());
            let reply = self.model.chat(&request).await?;

            if reply.tool_calls.is_empty() {
                info!(step, "agent produced final answer");
                return Ok(AgentReply {
                    content: reply.content,
                    role: Role::Assistant,
                });
            }

            let calls = reply.tool_calls.clone();
            transcript.push(reply);
            for call in &calls {
                let result = self.dispatch(call).await;
                transcript.push(ChatMessage::tool_result(call.id.clone(), result));
            }
        }

        Err(AgentError::StepLimit(self.max_steps))
    }

    async fn dispatch(&self, call: &ToolCall) -> String {
        let Some(tool) = self.tools.get(&call.name) else {
            warn!(tool = %call.name, "model requested an unknown tool");
            return format!(
                "Unknown tool '{}'. Available tools: {}",
                call.name,
                self.tools.list().join(", ")
            );
        };

        let args = if call.arguments.trim().is_empty() {
            Value::Object(Default::default())
        } else {
            serde_json::from_str(&call.arguments)
                .unwrap_or_else(|_| Value::String(call.arguments.clone()))
        };

        debug!(tool = %call.name, call_id = %call.id, "invoking tool");
        tool.call(args).await
    }
}
