use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::state::LoopState;
use crate::completion::{CompletionClient, CompletionOutcome};
use crate::config::{OrchestrationConfig, RoundLimitPolicy};
use crate::conversation::{ConversationHistory, Message, ToolCallRequest};
use crate::error::{Error, Result, ToolError};
use crate::tools::ToolSchema;
use crate::transport::ToolTransport;

/// Owns a conversation and runs user turns against a completion client and
/// a tool transport.
pub struct OrchestrationLoop {
    client: Arc<dyn CompletionClient>,
    transport: Arc<dyn ToolTransport>,
    config: OrchestrationConfig,
    schemas: Vec<ToolSchema>,
    history: ConversationHistory,
    state: LoopState,
}

impl OrchestrationLoop {
    pub fn new(
        client: Arc<dyn CompletionClient>,
        transport: Arc<dyn ToolTransport>,
        config: OrchestrationConfig,
    ) -> Result<Self> {
        config.validate()?;
        let schemas = transport.list_schemas();
        debug!(
            tools = schemas.len(),
            max_rounds = config.max_rounds,
            model = client.model(),
            "Orchestration loop ready"
        );

        Ok(Self {
            client,
            transport,
            config,
            schemas,
            history: ConversationHistory::new(),
            state: LoopState::AwaitingInput,
        })
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn tool_schemas(&self) -> &[ToolSchema] {
        &self.schemas
    }

    pub fn config(&self) -> &OrchestrationConfig {
        &self.config
    }

    pub fn model(&self) -> &str {
        self.client.model()
    }

    /// Run one user turn to its final answer
    pub async fn run_turn(&mut self, text: &str) -> Result<String> {
        self.run_turn_cancellable(text, &CancellationToken::new()).await
    }

    /// Run one user turn, aborting when `cancel` fires.
    ///
    /// On cancellation every call still unanswered is closed with an error
    /// result so the history stays sendable, and `Error::Cancelled` is returned.
    pub async fn run_turn_cancellable(&mut self, text: &str, cancel: &CancellationToken) -> Result<String> {
        if self.history.is_empty() {
            if let Some(prompt) = &self.config.system_prompt {
                self.history.append(Message::system(prompt.clone()));
            }
        }
        self.history.append(Message::user(text));

        let result = self.drive(cancel).await;

        if matches!(result, Err(Error::Cancelled)) {
            let closed = self.history.close_unanswered(&ToolError::Cancelled);
            info!(closed, "Turn cancelled");
        }
        self.transition(LoopState::AwaitingInput);
        result
    }

    /// Shut down the tool transport
    pub async fn shutdown(&self) -> Result<()> {
        self.transport
            .shutdown()
            .await
            .map_err(|e| Error::Protocol(e.to_string()))
    }

    fn transition(&mut self, next: LoopState) {
        debug!(from = %self.state, to = %next, "Loop state");
        self.state = next;
    }

    async fn drive(&mut self, cancel: &CancellationToken) -> Result<String> {
        let max_rounds = self.config.max_rounds;
        let mut round = 0;

        loop {
            round += 1;
            let final_round = round >= max_rounds;
            self.transition(LoopState::RequestingCompletion { round });

            let tools: &[ToolSchema] = if final_round && !self.config.offer_tools_on_final_round {
                &[]
            } else {
                &self.schemas
            };
            let snapshot = self.history.snapshot_for_request();

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                outcome = self.client.request(&snapshot, tools) => outcome?,
            };

            let (text, calls) = match outcome {
                CompletionOutcome::Answer { text } => return Ok(self.answer(text)),
                CompletionOutcome::ToolCallBatch { text, calls } if calls.is_empty() => {
                    return Ok(self.answer(text.unwrap_or_default()));
                }
                CompletionOutcome::ToolCallBatch { text, calls } => (text, calls),
            };

            if final_round {
                return match self.config.round_limit {
                    RoundLimitPolicy::ForceAnswer => {
                        warn!(rounds = max_rounds, discarded = calls.len(), "Round limit reached, forcing answer");
                        Ok(self.answer(text.unwrap_or_default()))
                    }
                    RoundLimitPolicy::Error => {
                        warn!(rounds = max_rounds, "Round limit reached with tool calls pending");
                        Err(Error::RoundLimitExceeded { rounds: max_rounds })
                    }
                };
            }

            let calls = self.with_fresh_ids(calls);
            self.history.append(Message::assistant_with_calls(text, calls.clone()));
            self.transition(LoopState::ExecutingTools { round, calls: calls.len() });
            self.execute_tools(&calls, cancel).await?;
        }
    }

    /// Give a new id to any call whose id is repeated within the batch or
    /// was already issued earlier in the conversation
    fn with_fresh_ids(&self, calls: Vec<ToolCallRequest>) -> Vec<ToolCallRequest> {
        let mut seen: HashSet<String> = HashSet::new();
        calls
            .into_iter()
            .map(|mut call| {
                if self.history.contains_call_id(&call.id) || !seen.insert(call.id.clone()) {
                    let id = format!("call_{}", uuid::Uuid::new_v4().simple());
                    warn!(tool = %call.tool_name, reused = %call.id, id = %id, "Replacing reused tool call id");
                    call.id = id.clone();
                    seen.insert(id);
                }
                call
            })
            .collect()
    }

    fn answer(&mut self, text: String) -> String {
        self.history.append(Message::assistant(text.clone()));
        self.transition(LoopState::Answered);
        text
    }

    /// Resolve every call of a batch, appending one result per call in
    /// request order. A session-fatal error still answers the whole batch
    /// before the turn fails.
    async fn execute_tools(&mut self, calls: &[ToolCallRequest], cancel: &CancellationToken) -> Result<()> {
        let transport = Arc::clone(&self.transport);
        let mut fatal: Option<ToolError> = None;

        if self.config.parallel_tools {
            let invocations = calls.iter().map(|call| invoke(transport.as_ref(), call));
            let outcomes = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                outcomes = join_all(invocations) => outcomes,
            };

            for (call, outcome) in calls.iter().zip(outcomes) {
                if let Err(e) = &outcome {
                    if e.is_session_fatal() && fatal.is_none() {
                        fatal = Some(e.clone());
                    }
                }
                self.history.append(Message::tool_result(call, outcome));
            }
        } else {
            for call in calls {
                let outcome = match &fatal {
                    Some(e) => Err(ToolError::Protocol(format!("Not executed: {}", e))),
                    None => tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(Error::Cancelled),
                        outcome = invoke(transport.as_ref(), call) => outcome,
                    },
                };

                if let Err(e) = &outcome {
                    if e.is_session_fatal() && fatal.is_none() {
                        fatal = Some(e.clone());
                    }
                }
                self.history.append(Message::tool_result(call, outcome));
            }
        }

        match fatal {
            Some(e) => Err(Error::Protocol(e.to_string())),
            None => Ok(()),
        }
    }
}

async fn invoke(transport: &dyn ToolTransport, call: &ToolCallRequest) -> std::result::Result<Value, ToolError> {
    info!(tool = %call.tool_name, id = %call.id, "Executing tool call");
    let outcome = transport.invoke(&call.tool_name, call.arguments.clone()).await;
    if let Err(e) = &outcome {
        warn!(tool = %call.tool_name, id = %call.id, error = %e, "Tool call failed");
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::ScriptedClient;
    use crate::transport::InProcessTransport;
    use crate::tools::ToolRegistry;

    fn looped(client: ScriptedClient, config: OrchestrationConfig) -> (Arc<ScriptedClient>, OrchestrationLoop) {
        let client = Arc::new(client);
        let transport = Arc::new(InProcessTransport::new(ToolRegistry::new()));
        let lp = OrchestrationLoop::new(client.clone(), transport, config).unwrap();
        (client, lp)
    }

    #[tokio::test]
    async fn test_plain_answer_is_one_round() {
        let (client, mut lp) = looped(
            ScriptedClient::new(vec![Ok(CompletionOutcome::answer("Hello!"))]),
            OrchestrationConfig::default(),
        );

        assert_eq!(lp.run_turn("hi").await.unwrap(), "Hello!");
        assert_eq!(lp.history().len(), 2);
        assert_eq!(client.requests().len(), 1);
        assert_eq!(lp.state(), LoopState::AwaitingInput);
    }

    #[tokio::test]
    async fn test_system_prompt_leads_fresh_and_cleared_history() {
        let config = OrchestrationConfig {
            system_prompt: Some("Be brief.".to_string()),
            ..Default::default()
        };
        let (client, mut lp) = looped(ScriptedClient::echo(), config);

        lp.run_turn("one").await.unwrap();
        lp.run_turn("two").await.unwrap();
        lp.clear_history();
        lp.run_turn("three").await.unwrap();

        let systems = lp
            .history()
            .messages()
            .iter()
            .filter(|m| matches!(m, Message::System { .. }))
            .count();
        assert_eq!(systems, 1);
        assert_eq!(client.requests()[2].messages[0], Message::system("Be brief."));
    }

    #[tokio::test]
    async fn test_empty_batch_is_treated_as_answer() {
        let (_, mut lp) = looped(
            ScriptedClient::new(vec![Ok(CompletionOutcome::ToolCallBatch {
                text: Some("Nothing to look up.".to_string()),
                calls: Vec::new(),
            })]),
            OrchestrationConfig::default(),
        );

        assert_eq!(lp.run_turn("hi").await.unwrap(), "Nothing to look up.");
        assert_eq!(lp.history().last(), Some(&Message::assistant("Nothing to look up.")));
    }

    #[test]
    fn test_zero_rounds_is_a_config_error() {
        let client = Arc::new(ScriptedClient::echo());
        let transport = Arc::new(InProcessTransport::new(ToolRegistry::new()));
        let config = OrchestrationConfig {
            max_rounds: 0,
            ..Default::default()
        };
        assert!(matches!(
            OrchestrationLoop::new(client, transport, config),
            Err(Error::Config(_))
        ));
    }
}
