//! ParticipantWorker - one LLM participant consuming its role's queues
//!
//! A worker is stateless between envelopes: everything it needs to answer
//! arrives in the popped message, so the process can restart mid-conversation
//! without resynchronization. It pops from `{role}_in`, generates through its
//! gateway, and pushes to `{role}_out` with the envelope's sequence number
//! advanced by one. On exhausted gateway retries it pushes a `Failure`
//! payload instead of going silent, so the orchestrator can abort promptly
//! rather than time out.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dialogue_types::{
    ConversationId, MessageContent, MessageMetadata, QueueMessage, RoleBinding,
};
use tokio_util::sync::CancellationToken;

use crate::gateway::{generate_with_retry, GatewayError, LlmGateway, PromptContext, RetryPolicy};
use crate::queue::{QueueClient, QueueError};

/// How long each blocking pop waits before re-checking cancellation.
const POP_SLICE: Duration = Duration::from_millis(500);

/// Errors that terminate a worker's run loop.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error(transparent)]
    Queue(#[from] QueueError),
}

pub struct ParticipantWorker {
    binding: RoleBinding,
    /// Persona/system guidance for this role, when configured.
    persona: Option<String>,
    queue: QueueClient,
    gateway: Arc<dyn LlmGateway>,
    retry: RetryPolicy,
}

impl ParticipantWorker {
    pub fn new(
        binding: RoleBinding,
        persona: Option<String>,
        queue: QueueClient,
        gateway: Arc<dyn LlmGateway>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            binding,
            persona,
            queue,
            gateway,
            retry,
        }
    }

    /// Serve one conversation until cancelled or the broker goes away.
    pub async fn run(
        &self,
        conversation_id: ConversationId,
        cancel: CancellationToken,
    ) -> Result<(), WorkerError> {
        let input_queue = self.binding.input_queue();
        tracing::info!(
            role = %self.binding.role,
            model = %self.binding.model,
            conversation_id = %conversation_id,
            "participant worker started"
        );

        loop {
            let popped = tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(role = %self.binding.role, "participant worker cancelled");
                    return Ok(());
                }
                popped = self.queue.pop(&input_queue, POP_SLICE) => popped,
            };

            let message = match popped {
                Ok(message) => message,
                Err(QueueError::Timeout { .. }) => continue,
                Err(e) => return Err(e.into()),
            };

            if message.conversation_id != conversation_id {
                tracing::warn!(
                    role = %self.binding.role,
                    expected = %conversation_id,
                    got = %message.conversation_id,
                    "discarding envelope for another conversation"
                );
                continue;
            }

            let Some(prompt) = message.content.prompt_text().map(str::to_string) else {
                tracing::warn!(
                    role = %self.binding.role,
                    kind = message.content.kind(),
                    "discarding non-prompt content on input queue"
                );
                continue;
            };

            self.respond(&message, prompt).await?;
        }
    }

    async fn respond(&self, message: &QueueMessage, prompt: String) -> Result<(), WorkerError> {
        let context = PromptContext {
            model: self.binding.model.clone(),
            temperature: self.binding.temperature,
            system: self.persona.clone(),
            prompt: match &message.metadata.corrective_hint {
                Some(hint) => format!("{prompt}\n\n{hint}"),
                None => prompt,
            },
        };

        let started = Instant::now();
        let reply_seq = message.sequence_number + 1;

        let (content, metadata) = match generate_with_retry(
            self.gateway.as_ref(),
            &context,
            self.retry,
        )
        .await
        {
            Ok(output) => {
                let latency_ms = started.elapsed().as_millis() as u64;
                tracing::debug!(
                    role = %self.binding.role,
                    seq = reply_seq,
                    latency_ms,
                    tokens = ?output.tokens_generated,
                    "generated reply"
                );
                (
                    MessageContent::Utterance {
                        text: output.text,
                        phase: None,
                    },
                    MessageMetadata {
                        tokens_generated: output.tokens_generated,
                        generation_time_ms: latency_ms,
                        corrective_hint: None,
                    },
                )
            }
            Err(e) => {
                tracing::error!(
                    role = %self.binding.role,
                    seq = reply_seq,
                    error = %e,
                    "generation failed after retries, reporting failure"
                );
                (
                    MessageContent::Failure {
                        code: failure_code(&e).to_string(),
                        detail: e.to_string(),
                    },
                    MessageMetadata {
                        tokens_generated: None,
                        generation_time_ms: started.elapsed().as_millis() as u64,
                        corrective_hint: None,
                    },
                )
            }
        };

        let reply = QueueMessage::new(
            message.conversation_id.clone(),
            reply_seq,
            self.binding.role.clone(),
            content,
            metadata,
        );
        self.queue.push(&self.binding.output_queue(), reply)?;
        Ok(())
    }
}

fn failure_code(error: &GatewayError) -> &'static str {
    match error {
        GatewayError::ProviderUnavailable(_) => "provider_unavailable",
        GatewayError::RateLimited(_) => "rate_limited",
        GatewayError::InvalidResponse(_) => "invalid_response",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actors::QueueBrokerActor;
    use async_trait::async_trait;
    use dialogue_types::RoleId;
    use ractor::Actor;
    use std::sync::Mutex;

    struct EchoGateway {
        prompts: Mutex<Vec<PromptContext>>,
    }

    impl EchoGateway {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LlmGateway for EchoGateway {
        async fn generate(
            &self,
            context: &PromptContext,
        ) -> Result<GenerateOutput, GatewayError> {
            self.prompts.lock().unwrap().push(context.clone());
            Ok(GenerateOutput {
                text: format!("echo: {}", context.prompt),
                tokens_generated: Some(7),
            })
        }
    }

    struct BrokenGateway;

    #[async_trait]
    impl LlmGateway for BrokenGateway {
        async fn generate(
            &self,
            _context: &PromptContext,
        ) -> Result<GenerateOutput, GatewayError> {
            Err(GatewayError::ProviderUnavailable(
                "connection refused".to_string(),
            ))
        }
    }

    use crate::gateway::GenerateOutput;

    fn binding() -> RoleBinding {
        RoleBinding {
            role: RoleId::from("model_a"),
            model: "llama2".to_string(),
            provider_url: "http://localhost:11434".to_string(),
            temperature: 0.7,
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 2,
            base_backoff: Duration::from_millis(1),
        }
    }

    fn seed(conversation_id: &ConversationId, seq: u32, topic: &str) -> QueueMessage {
        QueueMessage::new(
            conversation_id.clone(),
            seq,
            RoleId::from("orchestrator"),
            MessageContent::Seed {
                topic: topic.to_string(),
                guidance: None,
            },
            MessageMetadata::default(),
        )
    }

    async fn spawn_worker(
        gateway: Arc<dyn LlmGateway>,
    ) -> (
        QueueClient,
        ConversationId,
        CancellationToken,
        tokio::task::JoinHandle<Result<(), WorkerError>>,
    ) {
        let (broker, _handle) = Actor::spawn(None, QueueBrokerActor, ()).await.unwrap();
        let queue = QueueClient::new(broker);
        let conversation_id = ConversationId::new();
        let cancel = CancellationToken::new();

        let worker = ParticipantWorker::new(
            binding(),
            Some("be brief".to_string()),
            queue.clone(),
            gateway,
            fast_retry(),
        );
        let run = {
            let conversation_id = conversation_id.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { worker.run(conversation_id, cancel).await })
        };

        (queue, conversation_id, cancel, run)
    }

    #[tokio::test]
    async fn test_worker_replies_with_incremented_sequence() {
        let gateway = EchoGateway::new();
        let (queue, conversation_id, cancel, run) = spawn_worker(gateway.clone()).await;

        queue
            .push("model_a_in", seed(&conversation_id, 0, "the seed topic"))
            .unwrap();

        let reply = queue
            .pop("model_a_out", Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(reply.sequence_number, 1);
        assert_eq!(reply.role.as_str(), "model_a");
        assert_eq!(reply.content.prompt_text(), Some("echo: the seed topic"));
        assert_eq!(reply.metadata.tokens_generated, Some(7));

        let prompts = gateway.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert_eq!(prompts[0].system.as_deref(), Some("be brief"));

        cancel.cancel();
        run.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_worker_discards_envelope_for_other_conversation() {
        let gateway = EchoGateway::new();
        let (queue, conversation_id, cancel, run) = spawn_worker(gateway.clone()).await;

        let stranger = ConversationId::new();
        queue
            .push("model_a_in", seed(&stranger, 0, "wrong conversation"))
            .unwrap();
        queue
            .push("model_a_in", seed(&conversation_id, 0, "right conversation"))
            .unwrap();

        let reply = queue
            .pop("model_a_out", Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(
            reply.content.prompt_text(),
            Some("echo: right conversation")
        );

        // Only the matching envelope reached the gateway.
        assert_eq!(gateway.prompts.lock().unwrap().len(), 1);

        cancel.cancel();
        run.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_worker_reports_failure_on_exhausted_retries() {
        let (queue, conversation_id, cancel, run) = spawn_worker(Arc::new(BrokenGateway)).await;

        queue
            .push("model_a_in", seed(&conversation_id, 0, "doomed"))
            .unwrap();

        let reply = queue
            .pop("model_a_out", Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(reply.sequence_number, 1);
        match reply.content {
            MessageContent::Failure { ref code, .. } => {
                assert_eq!(code, "provider_unavailable")
            }
            ref other => panic!("expected failure content, got {other:?}"),
        }

        cancel.cancel();
        run.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_corrective_hint_is_appended_to_prompt() {
        let gateway = EchoGateway::new();
        let (queue, conversation_id, cancel, run) = spawn_worker(gateway.clone()).await;

        let mut message = seed(&conversation_id, 2, "retry this");
        message.metadata.corrective_hint =
            Some("Your previous reply was not usable. Answer in plain text.".to_string());
        queue.push("model_a_in", message).unwrap();

        let reply = queue
            .pop("model_a_out", Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(reply.sequence_number, 3);

        let prompts = gateway.prompts.lock().unwrap();
        assert!(prompts[0].prompt.starts_with("retry this\n\n"));
        assert!(prompts[0].prompt.contains("not usable"));

        cancel.cancel();
        run.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_cancellation_stops_idle_worker() {
        let gateway = EchoGateway::new();
        let (_queue, _conversation_id, cancel, run) = spawn_worker(gateway).await;

        cancel.cancel();
        let result = tokio::time::timeout(Duration::from_secs(2), run)
            .await
            .expect("worker should exit promptly after cancellation");
        result.unwrap().unwrap();
    }
}
