//! Model gateway trait and implementations
//!
//! A gateway maps the full message history plus the tool schemas to either
//! a final assistant message or a batch of tool calls. It keeps no session
//! memory between calls and never retries on its own.

use crate::error::AgentError;
use crate::models::{Message, ToolCallRequest};
use crate::tools::ToolSchema;
use crate::Result;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use uuid::Uuid;

pub mod gemini;
pub mod keyword;

pub use gemini::GeminiGateway;
pub use keyword::KeywordGateway;

#[derive(Debug, Clone, PartialEq)]
pub enum ModelOutcome {
    FinalMessage(String),
    /// One or more calls, in the order the backend returned them
    ToolCallBatch(Vec<ToolCallRequest>),
}

#[async_trait]
pub trait ModelGateway: Send + Sync {
    async fn converse(&self, history: &[Message], tools: &[ToolSchema]) -> Result<ModelOutcome>;
}

/// Call id for backends that do not assign their own.
pub fn new_call_id() -> String {
    format!("call_{}", Uuid::new_v4().simple())
}

/// Replays a fixed sequence of outcomes, one per call.
pub struct ScriptedGateway {
    outcomes: Mutex<VecDeque<Result<ModelOutcome>>>,
}

impl ScriptedGateway {
    pub fn new(outcomes: Vec<ModelOutcome>) -> Self {
        Self::with_results(outcomes.into_iter().map(Ok).collect())
    }

    /// Like [`ScriptedGateway::new`] but allows scripting failures.
    pub fn with_results(results: Vec<Result<ModelOutcome>>) -> Self {
        Self {
            outcomes: Mutex::new(results.into()),
        }
    }

    pub fn remaining(&self) -> usize {
        self.outcomes
            .lock()
            .map(|queue| queue.len())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ModelGateway for ScriptedGateway {
    async fn converse(&self, _history: &[Message], _tools: &[ToolSchema]) -> Result<ModelOutcome> {
        let mut queue = self
            .outcomes
            .lock()
            .map_err(|_| AgentError::Gateway("scripted gateway lock poisoned".to_string()))?;

        queue
            .pop_front()
            .unwrap_or_else(|| Err(AgentError::Gateway("script exhausted".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_gateway_replays_in_order() {
        let gateway = ScriptedGateway::with_results(vec![
            Ok(ModelOutcome::FinalMessage("first".into())),
            Err(AgentError::Gateway("backend down".into())),
        ]);

        assert_eq!(
            gateway.converse(&[], &[]).await.unwrap(),
            ModelOutcome::FinalMessage("first".into())
        );
        assert!(matches!(
            gateway.converse(&[], &[]).await,
            Err(AgentError::Gateway(msg)) if msg == "backend down"
        ));
        assert!(matches!(
            gateway.converse(&[], &[]).await,
            Err(AgentError::Gateway(msg)) if msg == "script exhausted"
        ));
        assert_eq!(gateway.remaining(), 0);
    }
}
