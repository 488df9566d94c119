//! Execution graph - the conversation state machine
//!
//! AWAITING_INPUT → MODEL_TURN → (TOOL_TURN → MODEL_TURN)* → DONE
//!                                 TOOL_TURN → SUSPENDED → resume → TOOL_TURN
//!
//! Suspension happens inside a tool call. The run returns to the caller
//! with the checkpoint holding the suspended call; `resume` is a fresh
//! invocation that hands the decision to that call and carries on with the
//! rest of its batch.
//!
//! A storage failure after a tool has acted leaves that call without a
//! recorded result. Such calls are never run again: a decision already
//! handed to a tool and calls left open in the last batch are closed with
//! an error result on the next invocation, so side effects happen at most
//! once.

use crate::checkpoint::CheckpointStore;
use crate::config::DEFAULT_MAX_MODEL_TURNS;
use crate::error::AgentError;
use crate::gateway::{ModelGateway, ModelOutcome};
use crate::models::{
    ConversationState, GraphState, Message, PendingInterrupt, RunResult, ToolCallRequest,
};
use crate::tools::{SuspendSignal, ToolOutcome, ToolRegistry, ToolSchema};
use crate::Result;
use serde_json::json;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, error, info, warn};

enum ToolStep {
    Resolved(Message),
    Suspended(SuspendSignal),
}

/// Marks a thread as having a run in flight until dropped.
struct RunGuard<'a> {
    active: &'a Mutex<HashSet<String>>,
    thread_id: String,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        active.remove(&self.thread_id);
    }
}

fn error_result(call_id: &str, error: &AgentError) -> Message {
    Message::tool_result(call_id, json!({ "error": error.to_string() }))
}

pub struct ExecutionGraph {
    gateway: Box<dyn ModelGateway>,
    registry: ToolRegistry,
    schemas: Vec<ToolSchema>,
    store: Arc<dyn CheckpointStore>,
    active_runs: Mutex<HashSet<String>>,
    max_model_turns: u32,
}

impl ExecutionGraph {
    pub fn new(
        gateway: Box<dyn ModelGateway>,
        registry: ToolRegistry,
        store: Arc<dyn CheckpointStore>,
    ) -> Self {
        let schemas = registry.schemas();
        Self {
            gateway,
            registry,
            schemas,
            store,
            active_runs: Mutex::new(HashSet::new()),
            max_model_turns: DEFAULT_MAX_MODEL_TURNS,
        }
    }

    /// Model turns allowed in a single submit or resume.
    pub fn with_max_model_turns(mut self, max_model_turns: u32) -> Self {
        self.max_model_turns = max_model_turns;
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Current snapshot of a thread. Never mutates it.
    pub async fn thread_state(&self, thread_id: &str) -> Result<ConversationState> {
        self.store.load(thread_id).await
    }

    /// Append a user message and run until a final answer or a suspension.
    pub async fn submit(&self, thread_id: &str, user_text: &str) -> Result<RunResult> {
        let _guard = self.begin_run(thread_id)?;
        let mut state = self.store.load(thread_id).await?;

        if let Some(pending) = &state.pending_interrupt {
            warn!(thread_id, call_id = %pending.call_id, "Rejected new message for suspended thread");
            return Err(AgentError::invalid_state(
                thread_id,
                format!(
                    "tool call {} is awaiting a decision; resume it first",
                    pending.call_id
                ),
            ));
        }

        let interrupted = state.unanswered_calls();
        if !interrupted.is_empty() {
            warn!(thread_id, calls = interrupted.len(), "Closing tool calls left without results");
            for call in interrupted {
                state.append(Message::tool_result(
                    call.call_id,
                    json!({ "error": "call was interrupted before its result was recorded" }),
                ));
            }
        }

        info!(thread_id, state = %GraphState::AwaitingInput, "Run started");
        state.append(Message::user(user_text));

        self.drive(&mut state, Vec::new()).await
    }

    /// Deliver a human decision to the suspended tool call and continue.
    pub async fn resume(&self, thread_id: &str, decision: &str) -> Result<RunResult> {
        let _guard = self.begin_run(thread_id)?;
        let mut state = self.store.load(thread_id).await?;

        let Some(mut pending) = state.pending_interrupt.clone() else {
            return Err(AgentError::invalid_state(
                thread_id,
                "no tool call is awaiting a decision",
            ));
        };

        let remaining = state.requests_after(&pending.call_id).ok_or_else(|| {
            AgentError::CheckpointError(format!(
                "suspended call {} is missing from the history of thread {}",
                pending.call_id, thread_id
            ))
        })?;

        info!(
            thread_id,
            call_id = %pending.call_id,
            tool_name = %pending.tool_name,
            remaining = remaining.len(),
            "Resuming suspended run"
        );

        let result = match pending.decision.clone() {
            Some(earlier) => {
                warn!(
                    thread_id,
                    call_id = %pending.call_id,
                    "Decision was delivered before but its result was never recorded"
                );
                Message::tool_result(
                    pending.call_id.clone(),
                    json!({
                        "error": format!(
                            "decision '{}' was already delivered to {} but its outcome was not recorded",
                            earlier, pending.tool_name
                        )
                    }),
                )
            }
            None => {
                // Claim the decision before the tool acts on it.
                pending.decision = Some(decision.to_string());
                state.pending_interrupt = Some(pending.clone());
                self.checkpoint(&mut state).await?;

                match self
                    .registry
                    .resume(&pending.call_id, &pending.tool_name, &pending.arguments, decision)
                    .await
                {
                    Ok(value) => Message::tool_result(pending.call_id.clone(), value),
                    Err(e) if e.is_recoverable() => {
                        warn!(thread_id, call_id = %pending.call_id, error = %e, "Resumed tool call failed");
                        error_result(&pending.call_id, &e)
                    }
                    Err(e) => return Err(e),
                }
            }
        };

        state.pending_interrupt = None;
        state.append(result);
        self.checkpoint(&mut state).await?;

        self.drive(&mut state, remaining).await
    }

    fn begin_run(&self, thread_id: &str) -> Result<RunGuard<'_>> {
        let mut active = self
            .active_runs
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if !active.insert(thread_id.to_string()) {
            warn!(thread_id, "Rejected concurrent run");
            return Err(AgentError::ConcurrentRun(thread_id.to_string()));
        }

        Ok(RunGuard {
            active: &self.active_runs,
            thread_id: thread_id.to_string(),
        })
    }

    async fn checkpoint(&self, state: &mut ConversationState) -> Result<()> {
        let version = self.store.save(&state.thread_id, state).await?;
        state.version = version;
        debug!(
            thread_id = %state.thread_id,
            version = state.version,
            messages = state.history.len(),
            suspended = state.pending_interrupt.is_some(),
            "Checkpoint written"
        );
        Ok(())
    }

    async fn run_tool_call(&self, request: &ToolCallRequest) -> Result<ToolStep> {
        match self
            .registry
            .dispatch(&request.call_id, &request.tool_name, &request.arguments)
            .await
        {
            Ok(ToolOutcome::Complete(value)) => Ok(ToolStep::Resolved(Message::tool_result(
                request.call_id.clone(),
                value,
            ))),
            Ok(ToolOutcome::Suspend(signal)) => Ok(ToolStep::Suspended(signal)),
            Err(e) if e.is_recoverable() => {
                warn!(
                    call_id = %request.call_id,
                    tool_name = %request.tool_name,
                    error = %e,
                    "Tool call failed; reporting to model"
                );
                Ok(ToolStep::Resolved(error_result(&request.call_id, &e)))
            }
            Err(e) => Err(e),
        }
    }

    /// The control loop: drain pending tool calls, then consult the model,
    /// until a final message or a suspension.
    async fn drive(
        &self,
        state: &mut ConversationState,
        pending: Vec<ToolCallRequest>,
    ) -> Result<RunResult> {
        let thread = state.thread_id.clone();
        let thread_id = thread.as_str();
        let mut queue: VecDeque<ToolCallRequest> = pending.into();
        let mut model_turns = 0u32;

        loop {
            if !queue.is_empty() {
                debug!(thread_id, state = %GraphState::ToolTurn, calls = queue.len(), "Dispatching tool calls");
            }

            while let Some(request) = queue.pop_front() {
                match self.run_tool_call(&request).await? {
                    ToolStep::Resolved(message) => {
                        state.append(message);
                        self.checkpoint(state).await?;
                    }
                    ToolStep::Suspended(signal) => {
                        state.pending_interrupt = Some(PendingInterrupt {
                            call_id: request.call_id.clone(),
                            tool_name: request.tool_name.clone(),
                            arguments: request.arguments.clone(),
                            prompt: signal.prompt.clone(),
                            decision: None,
                        });
                        self.checkpoint(state).await?;

                        info!(
                            thread_id,
                            call_id = %request.call_id,
                            tool_name = %request.tool_name,
                            skipped = queue.len(),
                            state = %GraphState::Suspended,
                            "Run suspended awaiting approval"
                        );
                        return Ok(RunResult::Suspended {
                            prompt: signal.prompt,
                            call_id: request.call_id,
                        });
                    }
                }
            }

            if model_turns >= self.max_model_turns {
                warn!(thread_id, limit = self.max_model_turns, "Model turn limit reached");
                return Err(AgentError::MaxTurnsExceeded(self.max_model_turns));
            }
            model_turns += 1;

            debug!(thread_id, state = %GraphState::ModelTurn, turn = model_turns, "Consulting model");

            let outcome = self
                .gateway
                .converse(&state.history, &self.schemas)
                .await
                .map_err(|e| {
                    error!(thread_id, error = %e, "Model turn failed; run aborted");
                    e
                })?;

            match outcome {
                ModelOutcome::FinalMessage(text) => {
                    state.append(Message::assistant(text.clone()));
                    self.checkpoint(state).await?;
                    info!(thread_id, state = %GraphState::Done, turns = model_turns, "Run completed");
                    return Ok(RunResult::Completed { final_text: text });
                }
                ModelOutcome::ToolCallBatch(requests) => {
                    validate_batch(&requests)?;
                    state.append(Message::assistant_with_tool_calls(requests.clone()));
                    self.checkpoint(state).await?;
                    queue = requests.into();
                }
            }
        }
    }
}

fn validate_batch(requests: &[ToolCallRequest]) -> Result<()> {
    if requests.is_empty() {
        return Err(AgentError::Gateway(
            "model returned an empty tool call batch".to_string(),
        ));
    }

    let mut seen = HashSet::with_capacity(requests.len());
    for request in requests {
        if !seen.insert(request.call_id.as_str()) {
            return Err(AgentError::Gateway(format!(
                "model reused call id {} within one batch",
                request.call_id
            )));
        }
    }
    Ok(())
}
