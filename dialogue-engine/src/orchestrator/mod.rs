//! Conversation orchestrator - drives one bounded exchange between two roles
//!
//! The orchestrator owns the turn loop. It seeds the first speaker, waits for
//! the reply on that role's output queue, durably appends the turn, then
//! relays the utterance to the other role. Every envelope it pushes carries
//! the sequence number of the turn it follows (the seed is 0), and a reply is
//! only accepted when it carries exactly the next sequence number for this
//! conversation; anything else is discarded as stale. That discard rule makes
//! redelivery by an at-least-once broker harmless.
//!
//! Stop conditions are checked after every appended turn (turn limit, time
//! limit). Abort conditions surface between pops: a control-queue signal, a
//! cancelled token, a worker-reported failure, or a participant that stays
//! silent through the timeout and its retries.

use std::time::{Duration, Instant};

use chrono::Utc;
use dialogue_types::{
    AbortReason, ControlSignal, Conversation, ConversationId, ConversationLimits,
    ConversationOutcome, DialoguePhase, MessageContent, MessageMetadata, QueueMessage,
    RoleBinding, RoleId, StopReason, Turn,
};
use ractor::ActorRef;
use tokio_util::sync::CancellationToken;

use crate::actors::{self, ConversationStoreMsg, StoreError};
use crate::queue::{QueueClient, QueueError};

/// Additional full-timeout waits granted to a silent participant before the
/// conversation is aborted as unresponsive.
const EXTRA_WAIT_RETRIES: u32 = 2;

/// Pop slice between control-queue and cancellation checks.
const POLL_SLICE: Duration = Duration::from_millis(250);

const CORRECTIVE_HINT: &str =
    "Your previous reply could not be used. Respond again with a plain text answer.";

/// Errors that end a run without a recorded outcome. Broker loss mid-run is
/// handled internally (it becomes an aborted outcome); what escapes here is
/// the store being gone or refusing operations it should accept.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("conversation store unavailable: {0}")]
    StoreUnavailable(String),
}

/// Everything needed to run one conversation.
#[derive(Debug, Clone)]
pub struct ConversationRequest {
    pub id: ConversationId,
    /// First binding speaks first.
    pub bindings: [RoleBinding; 2],
    pub limits: ConversationLimits,
    pub topic: String,
    pub guidance: Option<String>,
}

pub struct Orchestrator {
    queue: QueueClient,
    store: ActorRef<ConversationStoreMsg>,
}

enum WaitResult {
    Reply(QueueMessage),
    Unresponsive,
    Control(ControlSignal),
    Cancelled,
}

impl Orchestrator {
    pub fn new(queue: QueueClient, store: ActorRef<ConversationStoreMsg>) -> Self {
        Self { queue, store }
    }

    /// Run a conversation to its terminal state and return the finalized
    /// record. Aborted conversations return `Ok` too; their outcome is in
    /// the record.
    pub async fn run(
        &self,
        request: ConversationRequest,
        cancel: CancellationToken,
    ) -> Result<Conversation, OrchestratorError> {
        let ConversationRequest {
            id,
            bindings,
            limits,
            topic,
            guidance,
        } = request;

        store_call(
            actors::create_conversation(&self.store, id.clone(), bindings.to_vec(), limits).await,
        )?;
        tracing::info!(
            conversation_id = %id,
            first_speaker = %bindings[0].role,
            max_turns = limits.max_turns,
            max_duration_ms = limits.max_duration_ms,
            "conversation started"
        );

        let outcome = match self
            .drive(&id, &bindings, &limits, topic, guidance, &cancel)
            .await
        {
            Ok(outcome) => outcome,
            Err(OrchestratorError::Queue(QueueError::BrokerUnavailable(detail))) => {
                ConversationOutcome::Aborted {
                    reason: AbortReason::BrokerUnavailable,
                    detail,
                }
            }
            Err(e) => return Err(e),
        };

        self.shutdown(&id, &bindings, outcome).await
    }

    /// The turn loop proper. Returns the terminal outcome; queue and store
    /// errors bubble up to `run`.
    async fn drive(
        &self,
        id: &ConversationId,
        bindings: &[RoleBinding; 2],
        limits: &ConversationLimits,
        topic: String,
        guidance: Option<String>,
        cancel: &CancellationToken,
    ) -> Result<ConversationOutcome, OrchestratorError> {
        let started = Instant::now();
        let mut speaker = 0usize;
        let mut seq: u32 = 0;
        let mut author = RoleId::from("orchestrator");
        let mut content = MessageContent::Seed { topic, guidance };
        let mut corrective_pending = false;
        let mut corrective_used = false;

        loop {
            if started.elapsed() >= limits.max_duration() {
                return Ok(ConversationOutcome::Completed {
                    stop_reason: StopReason::TimeLimitReached,
                });
            }
            if cancel.is_cancelled() {
                return Ok(cancelled_outcome());
            }

            let binding = &bindings[speaker];
            let metadata = MessageMetadata {
                corrective_hint: corrective_pending.then(|| CORRECTIVE_HINT.to_string()),
                ..Default::default()
            };
            corrective_pending = false;

            let envelope =
                QueueMessage::new(id.clone(), seq, author.clone(), content.clone(), metadata);
            self.queue.push(&binding.input_queue(), envelope)?;
            tracing::debug!(
                conversation_id = %id,
                seq,
                to = %binding.role,
                kind = content.kind(),
                "prompt dispatched"
            );

            let expected_seq = seq + 1;
            let wait = self
                .await_reply(id, &binding.output_queue(), expected_seq, limits, cancel)
                .await?;

            let reply = match wait {
                WaitResult::Reply(reply) => reply,
                WaitResult::Unresponsive => {
                    return Ok(ConversationOutcome::Aborted {
                        reason: AbortReason::ParticipantUnresponsive,
                        detail: format!(
                            "{} produced nothing within {}ms over {} waits",
                            binding.role,
                            limits.turn_timeout_ms,
                            1 + EXTRA_WAIT_RETRIES
                        ),
                    });
                }
                WaitResult::Control(signal) => {
                    return Ok(ConversationOutcome::Aborted {
                        reason: AbortReason::Cancelled,
                        detail: format!("control signal: {}", signal_str(signal)),
                    });
                }
                WaitResult::Cancelled => return Ok(cancelled_outcome()),
            };

            let QueueMessage {
                content: reply_content,
                metadata: reply_metadata,
                ..
            } = reply;

            match reply_content {
                MessageContent::Utterance { text, phase } if !text.trim().is_empty() => {
                    // Workers don't know the turn budget; annotate the phase
                    // here unless the participant already set one.
                    let phase = phase.or_else(|| {
                        Some(DialoguePhase::for_progress(expected_seq, limits.max_turns))
                    });
                    let utterance = MessageContent::Utterance { text, phase };
                    let turn = Turn {
                        seq: expected_seq,
                        role: binding.role.clone(),
                        content: utterance.clone(),
                        latency_ms: reply_metadata.generation_time_ms,
                        tokens: reply_metadata.tokens_generated,
                        timestamp: Utc::now(),
                    };
                    store_call(actors::append_turn(&self.store, id.clone(), turn).await)?;
                    tracing::info!(
                        conversation_id = %id,
                        seq = expected_seq,
                        role = %binding.role,
                        latency_ms = reply_metadata.generation_time_ms,
                        "turn recorded"
                    );

                    seq = expected_seq;
                    corrective_used = false;

                    if seq >= limits.max_turns {
                        return Ok(ConversationOutcome::Completed {
                            stop_reason: StopReason::TurnLimitReached,
                        });
                    }
                    if started.elapsed() >= limits.max_duration() {
                        return Ok(ConversationOutcome::Completed {
                            stop_reason: StopReason::TimeLimitReached,
                        });
                    }

                    author = binding.role.clone();
                    content = utterance;
                    speaker = 1 - speaker;
                }
                MessageContent::Failure { ref code, ref detail } => {
                    if code == "invalid_response" && !corrective_used {
                        tracing::warn!(
                            conversation_id = %id,
                            role = %binding.role,
                            detail = %detail,
                            "invalid reply, issuing corrective re-prompt"
                        );
                        corrective_used = true;
                        corrective_pending = true;
                        // Same speaker, same sequence, same prompt content.
                    } else {
                        let reason = if code == "invalid_response" {
                            AbortReason::InvalidResponse
                        } else {
                            AbortReason::GatewayFailure
                        };
                        return Ok(ConversationOutcome::Aborted {
                            reason,
                            detail: format!("{} reported: {}", binding.role, detail),
                        });
                    }
                }
                ref other => {
                    // Wrong kind or empty text on the reply queue: treat the
                    // same as an invalid reply.
                    if !corrective_used {
                        tracing::warn!(
                            conversation_id = %id,
                            role = %binding.role,
                            kind = other.kind(),
                            "unusable reply, issuing corrective re-prompt"
                        );
                        corrective_used = true;
                        corrective_pending = true;
                    } else {
                        return Ok(ConversationOutcome::Aborted {
                            reason: AbortReason::InvalidResponse,
                            detail: format!(
                                "{} replied with unusable content of kind '{}'",
                                binding.role,
                                other.kind()
                            ),
                        });
                    }
                }
            }
        }
    }

    /// Wait for the reply carrying `expected_seq`, bounded by the turn
    /// timeout and its retries. Control-queue signals and cancellation are
    /// observed between pop slices.
    async fn await_reply(
        &self,
        id: &ConversationId,
        queue: &str,
        expected_seq: u32,
        limits: &ConversationLimits,
        cancel: &CancellationToken,
    ) -> Result<WaitResult, OrchestratorError> {
        for attempt in 1..=(1 + EXTRA_WAIT_RETRIES) {
            let deadline = Instant::now() + limits.turn_timeout();
            loop {
                if let Some(signal) = self.poll_control(id).await? {
                    return Ok(WaitResult::Control(signal));
                }

                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                let slice = POLL_SLICE.min(deadline - now);

                let popped = tokio::select! {
                    _ = cancel.cancelled() => return Ok(WaitResult::Cancelled),
                    popped = self.queue.pop(queue, slice) => popped,
                };

                match popped {
                    Ok(message)
                        if message.conversation_id == *id
                            && message.sequence_number == expected_seq =>
                    {
                        return Ok(WaitResult::Reply(message));
                    }
                    Ok(stale) => {
                        tracing::debug!(
                            conversation_id = %id,
                            queue = %queue,
                            got_conversation = %stale.conversation_id,
                            got_seq = stale.sequence_number,
                            expected_seq,
                            "discarding stale envelope"
                        );
                    }
                    Err(QueueError::Timeout { .. }) => {}
                    Err(e) => return Err(e.into()),
                }
            }
            tracing::warn!(
                conversation_id = %id,
                queue = %queue,
                attempt,
                timeout_ms = limits.turn_timeout_ms,
                "no reply within turn timeout"
            );
        }
        Ok(WaitResult::Unresponsive)
    }

    async fn poll_control(
        &self,
        id: &ConversationId,
    ) -> Result<Option<ControlSignal>, OrchestratorError> {
        let Some(message) = self.queue.try_pop(&id.control_queue()).await? else {
            return Ok(None);
        };
        match message.content {
            MessageContent::Control { signal } => {
                tracing::info!(
                    conversation_id = %id,
                    signal = signal_str(signal),
                    "control signal received"
                );
                Ok(Some(signal))
            }
            other => {
                tracing::warn!(
                    conversation_id = %id,
                    kind = other.kind(),
                    "ignoring non-control content on control queue"
                );
                Ok(None)
            }
        }
    }

    /// Drain this conversation's queues, record the outcome, and return the
    /// finalized record. Queue cleanup is best effort; the broker may
    /// already be gone.
    async fn shutdown(
        &self,
        id: &ConversationId,
        bindings: &[RoleBinding; 2],
        outcome: ConversationOutcome,
    ) -> Result<Conversation, OrchestratorError> {
        let mut queues = vec![id.control_queue()];
        for binding in bindings {
            queues.push(binding.input_queue());
            queues.push(binding.output_queue());
        }
        for queue in queues {
            match self.queue.drain(&queue).await {
                Ok(leftover) if !leftover.is_empty() => {
                    tracing::debug!(queue = %queue, count = leftover.len(), "drained leftovers");
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(queue = %queue, error = %e, "queue cleanup skipped");
                }
            }
        }

        match &outcome {
            ConversationOutcome::Completed { stop_reason } => {
                tracing::info!(
                    conversation_id = %id,
                    stop_reason = stop_reason.as_str(),
                    "conversation completed"
                );
            }
            ConversationOutcome::Aborted { reason, detail } => {
                tracing::warn!(
                    conversation_id = %id,
                    reason = reason.as_str(),
                    detail = %detail,
                    "conversation aborted"
                );
            }
        }

        store_call(actors::finalize_conversation(&self.store, id.clone(), outcome).await)?;
        store_call(actors::get_conversation(&self.store, id.clone()).await)
    }
}

fn cancelled_outcome() -> ConversationOutcome {
    ConversationOutcome::Aborted {
        reason: AbortReason::Cancelled,
        detail: "cancellation requested".to_string(),
    }
}

fn signal_str(signal: ControlSignal) -> &'static str {
    match signal {
        ControlSignal::Stop => "stop",
        ControlSignal::Abort => "abort",
    }
}

fn store_call<T>(
    result: Result<Result<T, StoreError>, ractor::RactorErr<ConversationStoreMsg>>,
) -> Result<T, OrchestratorError> {
    match result {
        Ok(inner) => inner.map_err(OrchestratorError::Store),
        Err(e) => Err(OrchestratorError::StoreUnavailable(e.to_string())),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actors::{ConversationStoreActor, ConversationStoreArguments, QueueBrokerActor};
    use dialogue_types::ConversationStatus;
    use ractor::Actor;

    fn binding(role: &str) -> RoleBinding {
        RoleBinding {
            role: RoleId::from(role),
            model: "llama2".to_string(),
            provider_url: "http://localhost:11434".to_string(),
            temperature: 0.7,
        }
    }

    fn fast_limits(max_turns: u32, turn_timeout_ms: u64) -> ConversationLimits {
        ConversationLimits {
            max_duration_ms: 30_000,
            max_turns,
            turn_timeout_ms,
        }
    }

    fn request(max_turns: u32, turn_timeout_ms: u64) -> ConversationRequest {
        ConversationRequest {
            id: ConversationId::new(),
            bindings: [binding("model_a"), binding("model_b")],
            limits: fast_limits(max_turns, turn_timeout_ms),
            topic: "whether tests should sleep".to_string(),
            guidance: None,
        }
    }

    async fn harness() -> (Orchestrator, QueueClient) {
        let (broker, _bh) = Actor::spawn(None, QueueBrokerActor, ()).await.unwrap();
        let (store, _sh) = Actor::spawn(
            None,
            ConversationStoreActor,
            ConversationStoreArguments::InMemory,
        )
        .await
        .unwrap();
        let queue = QueueClient::new(broker);
        (Orchestrator::new(queue.clone(), store), queue)
    }

    /// Scripted participant: pops its input queue and answers each prompt
    /// with an utterance, until cancelled.
    fn spawn_echo_role(queue: QueueClient, role: &str, cancel: CancellationToken) {
        let role = RoleId::from(role);
        tokio::spawn(async move {
            loop {
                let input_queue = role.input_queue();
                let popped = tokio::select! {
                    _ = cancel.cancelled() => return,
                    popped = queue.pop(&input_queue, Duration::from_millis(200)) => popped,
                };
                let Ok(message) = popped else { continue };
                // Keep turns from completing instantly so duration-bounded
                // tests see more than a handful of exchanges.
                tokio::time::sleep(Duration::from_millis(25)).await;
                let reply = QueueMessage::new(
                    message.conversation_id.clone(),
                    message.sequence_number + 1,
                    role.clone(),
                    MessageContent::Utterance {
                        text: format!("{} says turn {}", role, message.sequence_number + 1),
                        phase: None,
                    },
                    MessageMetadata {
                        tokens_generated: Some(5),
                        generation_time_ms: 3,
                        corrective_hint: None,
                    },
                );
                if queue.push(&role.output_queue(), reply).is_err() {
                    return;
                }
            }
        });
    }

    #[tokio::test]
    async fn test_completes_at_turn_limit_with_alternating_roles() {
        let (orchestrator, queue) = harness().await;
        let cancel = CancellationToken::new();
        spawn_echo_role(queue.clone(), "model_a", cancel.clone());
        spawn_echo_role(queue.clone(), "model_b", cancel.clone());

        let conversation = orchestrator
            .run(request(3, 2_000), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(conversation.status, ConversationStatus::Completed);
        assert_eq!(conversation.stop_reason, Some(StopReason::TurnLimitReached));
        assert_eq!(conversation.turns.len(), 3);
        let roles: Vec<&str> = conversation
            .turns
            .iter()
            .map(|t| t.role.as_str())
            .collect();
        assert_eq!(roles, ["model_a", "model_b", "model_a"]);
        let seqs: Vec<u32> = conversation.turns.iter().map(|t| t.seq).collect();
        assert_eq!(seqs, [1, 2, 3]);

        // Phases are annotated from turn-budget progress.
        let phases: Vec<Option<DialoguePhase>> = conversation
            .turns
            .iter()
            .map(|t| match &t.content {
                MessageContent::Utterance { phase, .. } => *phase,
                _ => None,
            })
            .collect();
        assert_eq!(
            phases,
            [
                Some(DialoguePhase::Exploration),
                Some(DialoguePhase::Challenge),
                Some(DialoguePhase::Conclusion),
            ]
        );

        cancel.cancel();
    }

    #[tokio::test]
    async fn test_silent_participant_aborts_as_unresponsive() {
        let (orchestrator, _queue) = harness().await;

        // No workers at all; first speaker never answers.
        let conversation = orchestrator
            .run(request(5, 150), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(conversation.status, ConversationStatus::Aborted);
        assert_eq!(
            conversation.abort_reason,
            Some(AbortReason::ParticipantUnresponsive)
        );
        assert!(conversation.turns.is_empty());
        assert!(conversation.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_stale_envelopes_are_discarded() {
        let (orchestrator, queue) = harness().await;
        let req = request(1, 2_000);
        let conversation_id = req.id.clone();

        // Responder that litters the output queue before the real reply.
        {
            let queue = queue.clone();
            let conversation_id = conversation_id.clone();
            tokio::spawn(async move {
                let prompt = queue
                    .pop("model_a_in", Duration::from_secs(2))
                    .await
                    .unwrap();

                let stale_conv = QueueMessage::new(
                    ConversationId::new(),
                    prompt.sequence_number + 1,
                    RoleId::from("model_a"),
                    MessageContent::Utterance {
                        text: "from another conversation".to_string(),
                        phase: None,
                    },
                    MessageMetadata::default(),
                );
                let stale_seq = QueueMessage::new(
                    conversation_id.clone(),
                    99,
                    RoleId::from("model_a"),
                    MessageContent::Utterance {
                        text: "redelivered old reply".to_string(),
                        phase: None,
                    },
                    MessageMetadata::default(),
                );
                let real = QueueMessage::new(
                    conversation_id,
                    prompt.sequence_number + 1,
                    RoleId::from("model_a"),
                    MessageContent::Utterance {
                        text: "the real reply".to_string(),
                        phase: None,
                    },
                    MessageMetadata::default(),
                );
                queue.push("model_a_out", stale_conv).unwrap();
                queue.push("model_a_out", stale_seq).unwrap();
                queue.push("model_a_out", real).unwrap();
            });
        }

        let conversation = orchestrator
            .run(req, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(conversation.status, ConversationStatus::Completed);
        assert_eq!(conversation.turns.len(), 1);
        assert_eq!(
            conversation.turns[0].content.prompt_text(),
            Some("the real reply")
        );
    }

    #[tokio::test]
    async fn test_control_abort_signal_stops_conversation() {
        let (orchestrator, queue) = harness().await;
        let req = request(10, 5_000);
        let conversation_id = req.id.clone();

        queue
            .push(
                &conversation_id.control_queue(),
                QueueMessage::new(
                    conversation_id.clone(),
                    0,
                    RoleId::from("manager"),
                    MessageContent::Control {
                        signal: ControlSignal::Abort,
                    },
                    MessageMetadata::default(),
                ),
            )
            .unwrap();

        let conversation = orchestrator
            .run(req, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(conversation.status, ConversationStatus::Aborted);
        assert_eq!(conversation.abort_reason, Some(AbortReason::Cancelled));
    }

    #[tokio::test]
    async fn test_cancellation_token_aborts_promptly() {
        let (orchestrator, _queue) = harness().await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let started = Instant::now();
        let conversation = orchestrator
            .run(request(10, 5_000), cancel)
            .await
            .unwrap();

        assert_eq!(conversation.status, ConversationStatus::Aborted);
        assert_eq!(conversation.abort_reason, Some(AbortReason::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_worker_failure_aborts_as_gateway_failure() {
        let (orchestrator, queue) = harness().await;
        let req = request(5, 2_000);

        {
            let queue = queue.clone();
            tokio::spawn(async move {
                let prompt = queue
                    .pop("model_a_in", Duration::from_secs(2))
                    .await
                    .unwrap();
                let failure = QueueMessage::new(
                    prompt.conversation_id.clone(),
                    prompt.sequence_number + 1,
                    RoleId::from("model_a"),
                    MessageContent::Failure {
                        code: "provider_unavailable".to_string(),
                        detail: "connection refused".to_string(),
                    },
                    MessageMetadata::default(),
                );
                queue.push("model_a_out", failure).unwrap();
            });
        }

        let conversation = orchestrator
            .run(req, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(conversation.status, ConversationStatus::Aborted);
        assert_eq!(conversation.abort_reason, Some(AbortReason::GatewayFailure));
        assert!(conversation
            .abort_detail
            .as_deref()
            .is_some_and(|d| d.contains("connection refused")));
    }

    #[tokio::test]
    async fn test_invalid_reply_gets_one_corrective_reprompt() {
        let (orchestrator, queue) = harness().await;
        let req = request(1, 2_000);

        {
            let queue = queue.clone();
            tokio::spawn(async move {
                // First prompt: report an invalid response.
                let first = queue
                    .pop("model_a_in", Duration::from_secs(2))
                    .await
                    .unwrap();
                assert!(first.metadata.corrective_hint.is_none());
                let failure = QueueMessage::new(
                    first.conversation_id.clone(),
                    first.sequence_number + 1,
                    RoleId::from("model_a"),
                    MessageContent::Failure {
                        code: "invalid_response".to_string(),
                        detail: "empty body".to_string(),
                    },
                    MessageMetadata::default(),
                );
                queue.push("model_a_out", failure).unwrap();

                // Re-prompt must carry the corrective hint and the same seq.
                let second = queue
                    .pop("model_a_in", Duration::from_secs(2))
                    .await
                    .unwrap();
                assert!(second.metadata.corrective_hint.is_some());
                assert_eq!(second.sequence_number, first.sequence_number);
                let reply = QueueMessage::new(
                    second.conversation_id.clone(),
                    second.sequence_number + 1,
                    RoleId::from("model_a"),
                    MessageContent::Utterance {
                        text: "better this time".to_string(),
                        phase: None,
                    },
                    MessageMetadata::default(),
                );
                queue.push("model_a_out", reply).unwrap();
            });
        }

        let conversation = orchestrator
            .run(req, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(conversation.status, ConversationStatus::Completed);
        assert_eq!(conversation.turns.len(), 1);
        assert_eq!(
            conversation.turns[0].content.prompt_text(),
            Some("better this time")
        );
    }

    #[tokio::test]
    async fn test_repeated_invalid_reply_aborts() {
        let (orchestrator, queue) = harness().await;
        let req = request(1, 2_000);

        {
            let queue = queue.clone();
            tokio::spawn(async move {
                for _ in 0..2 {
                    let prompt = queue
                        .pop("model_a_in", Duration::from_secs(2))
                        .await
                        .unwrap();
                    let failure = QueueMessage::new(
                        prompt.conversation_id.clone(),
                        prompt.sequence_number + 1,
                        RoleId::from("model_a"),
                        MessageContent::Failure {
                            code: "invalid_response".to_string(),
                            detail: "still garbage".to_string(),
                        },
                        MessageMetadata::default(),
                    );
                    queue.push("model_a_out", failure).unwrap();
                }
            });
        }

        let conversation = orchestrator
            .run(req, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(conversation.status, ConversationStatus::Aborted);
        assert_eq!(
            conversation.abort_reason,
            Some(AbortReason::InvalidResponse)
        );
    }

    #[tokio::test]
    async fn test_time_limit_completes_conversation() {
        let (orchestrator, queue) = harness().await;
        let cancel = CancellationToken::new();
        spawn_echo_role(queue.clone(), "model_a", cancel.clone());
        spawn_echo_role(queue.clone(), "model_b", cancel.clone());

        let req = ConversationRequest {
            id: ConversationId::new(),
            bindings: [binding("model_a"), binding("model_b")],
            limits: ConversationLimits {
                max_duration_ms: 400,
                max_turns: 50,
                turn_timeout_ms: 2_000,
            },
            topic: "a topic that outlives its welcome".to_string(),
            guidance: None,
        };

        let conversation = orchestrator
            .run(req, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(conversation.status, ConversationStatus::Completed);
        assert_eq!(conversation.stop_reason, Some(StopReason::TimeLimitReached));

        cancel.cancel();
    }
}
