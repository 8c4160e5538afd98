//! Shared types for the DialogueLLM conversation orchestrator.
//!
//! These types cross every component boundary:
//! - the orchestrator and participant workers (queue envelopes)
//! - the conversation store (persisted conversations and turns)
//! - the analysis stage (finalized transcripts)
//!
//! Everything is serde-serializable; queue envelopes and stored rows are JSON.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier for a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name of the manager/control queue for this conversation.
    pub fn control_queue(&self) -> String {
        format!("{}_control", self.0)
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier for a participant role within a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct RoleId(pub String);

impl RoleId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Queue this role consumes prompts from.
    pub fn input_queue(&self) -> String {
        format!("{}_in", self.0)
    }

    /// Queue this role publishes replies to.
    pub fn output_queue(&self) -> String {
        format!("{}_out", self.0)
    }
}

impl From<&str> for RoleId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for RoleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Conversation Lifecycle
// ============================================================================

/// Lifecycle status of a conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Initializing,
    Active,
    Completed,
    Aborted,
}

impl ConversationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Aborted)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Aborted => "aborted",
        }
    }
}

/// Why a completed conversation stopped.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    TurnLimitReached,
    TimeLimitReached,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TurnLimitReached => "turn_limit_reached",
            Self::TimeLimitReached => "time_limit_reached",
        }
    }
}

/// Why an aborted conversation was aborted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AbortReason {
    /// A participant produced nothing within timeout x retries.
    ParticipantUnresponsive,
    /// A participant's gateway reported an unrecoverable failure.
    GatewayFailure,
    /// Schema-invalid payload persisted past the corrective re-prompt.
    InvalidResponse,
    /// The queue broker became unreachable mid-conversation.
    BrokerUnavailable,
    /// External cancellation or a control-queue stop/abort signal.
    Cancelled,
}

impl AbortReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ParticipantUnresponsive => "participant_unresponsive",
            Self::GatewayFailure => "gateway_failure",
            Self::InvalidResponse => "invalid_response",
            Self::BrokerUnavailable => "broker_unavailable",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Terminal outcome passed to the store's finalize operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ConversationOutcome {
    Completed {
        stop_reason: StopReason,
    },
    Aborted {
        reason: AbortReason,
        detail: String,
    },
}

impl ConversationOutcome {
    pub fn status(&self) -> ConversationStatus {
        match self {
            Self::Completed { .. } => ConversationStatus::Completed,
            Self::Aborted { .. } => ConversationStatus::Aborted,
        }
    }

    /// Whether two outcomes represent the same terminal state.
    ///
    /// Finalize idempotency compares status and reason; the free-form abort
    /// detail is informational and does not participate.
    pub fn same_terminal(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Completed { stop_reason: a }, Self::Completed { stop_reason: b }) => a == b,
            (Self::Aborted { reason: a, .. }, Self::Aborted { reason: b, .. }) => a == b,
            _ => false,
        }
    }
}

// ============================================================================
// Content Payloads
// ============================================================================

/// Coarse phase annotation for an utterance. Declaration order is the
/// progression order.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
#[serde(rename_all = "snake_case")]
pub enum DialoguePhase {
    Introduction,
    Exploration,
    Challenge,
    Synthesis,
    Conclusion,
}

impl DialoguePhase {
    /// Phase of the given turn, derived from how far through the turn budget
    /// the conversation is.
    pub fn for_progress(turn: u32, max_turns: u32) -> Self {
        let progress = f64::from(turn) / f64::from(max_turns.max(1));
        if progress <= 0.2 {
            Self::Introduction
        } else if progress <= 0.5 {
            Self::Exploration
        } else if progress <= 0.75 {
            Self::Challenge
        } else if progress <= 0.9 {
            Self::Synthesis
        } else {
            Self::Conclusion
        }
    }
}

/// Control-queue signals from the manager role.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ControlSignal {
    Stop,
    Abort,
}

/// Structured message content, tagged by a declared content kind.
///
/// Each kind has a fixed schema validated at the consuming boundary; there is
/// no open-ended dynamic payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageContent {
    /// Opening material: topic and optional persona guidance.
    Seed {
        topic: String,
        guidance: Option<String>,
    },
    /// One participant's contribution.
    Utterance {
        text: String,
        phase: Option<DialoguePhase>,
    },
    /// Unrecoverable participant-side failure, surfaced instead of a reply.
    Failure { code: String, detail: String },
    /// Manager/control message.
    Control { signal: ControlSignal },
}

impl MessageContent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Seed { .. } => "seed",
            Self::Utterance { .. } => "utterance",
            Self::Failure { .. } => "failure",
            Self::Control { .. } => "control",
        }
    }

    /// Text a participant should respond to, if this content carries any.
    pub fn prompt_text(&self) -> Option<&str> {
        match self {
            Self::Seed { topic, .. } => Some(topic),
            Self::Utterance { text, .. } => Some(text),
            _ => None,
        }
    }
}

// ============================================================================
// Queue Envelope
// ============================================================================

/// Wire-visible metadata attached to a queue envelope.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MessageMetadata {
    pub tokens_generated: Option<u32>,
    pub generation_time_ms: u64,
    /// Set by the orchestrator on a corrective re-prompt after a
    /// schema-invalid reply.
    pub corrective_hint: Option<String>,
}

/// Envelope for all queue traffic. Consumed at most once by its target
/// queue's reader.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueMessage {
    /// Unique message id (ULID).
    pub message_id: String,
    pub conversation_id: ConversationId,
    /// Sequence number of the turn this content belongs to; the seed is 0.
    pub sequence_number: u32,
    pub role: RoleId,
    pub content: MessageContent,
    pub metadata: MessageMetadata,
}

impl QueueMessage {
    pub fn new(
        conversation_id: ConversationId,
        sequence_number: u32,
        role: RoleId,
        content: MessageContent,
        metadata: MessageMetadata,
    ) -> Self {
        Self {
            message_id: ulid::Ulid::new().to_string(),
            conversation_id,
            sequence_number,
            role,
            content,
            metadata,
        }
    }
}

// ============================================================================
// Bindings and Limits
// ============================================================================

/// Static mapping of a participant role to its queues and model.
/// Fixed for the conversation's lifetime; no runtime renegotiation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoleBinding {
    pub role: RoleId,
    /// Model identifier understood by the provider.
    pub model: String,
    /// Base URL of the provider endpoint.
    pub provider_url: String,
    pub temperature: f32,
}

impl RoleBinding {
    pub fn input_queue(&self) -> String {
        self.role.input_queue()
    }

    pub fn output_queue(&self) -> String {
        self.role.output_queue()
    }
}

/// Bounds on a conversation's duration and size.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationLimits {
    pub max_duration_ms: u64,
    pub max_turns: u32,
    pub turn_timeout_ms: u64,
}

impl ConversationLimits {
    pub const MIN_DURATION: Duration = Duration::from_secs(1);
    pub const MAX_DURATION: Duration = Duration::from_secs(2 * 60 * 60);
    pub const MAX_TURNS: u32 = 50;

    /// Construct limits clamped to sane operational bounds. Tests that need
    /// sub-second limits build the struct directly.
    pub fn new(max_duration: Duration, max_turns: u32, turn_timeout: Duration) -> Self {
        let max_duration = max_duration.clamp(Self::MIN_DURATION, Self::MAX_DURATION);
        Self {
            max_duration_ms: max_duration.as_millis() as u64,
            max_turns: max_turns.clamp(1, Self::MAX_TURNS),
            turn_timeout_ms: turn_timeout
                .clamp(Duration::from_millis(100), Duration::from_secs(120))
                .as_millis() as u64,
        }
    }

    pub fn max_duration(&self) -> Duration {
        Duration::from_millis(self.max_duration_ms)
    }

    pub fn turn_timeout(&self) -> Duration {
        Duration::from_millis(self.turn_timeout_ms)
    }
}

// ============================================================================
// Transcript
// ============================================================================

/// One role's single structured contribution. Immutable once appended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Turn {
    /// Monotonic per conversation, starting at 1, no gaps.
    pub seq: u32,
    pub role: RoleId,
    pub content: MessageContent,
    pub latency_ms: u64,
    pub tokens: Option<u32>,
    pub timestamp: DateTime<Utc>,
}

/// One bounded exchange session between two participant roles.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Conversation {
    pub id: ConversationId,
    /// Exactly two participant bindings.
    pub bindings: Vec<RoleBinding>,
    pub limits: ConversationLimits,
    pub turns: Vec<Turn>,
    pub status: ConversationStatus,
    pub stop_reason: Option<StopReason>,
    pub abort_reason: Option<AbortReason>,
    pub abort_detail: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Conversation {
    /// Sequence number the next appended turn must carry.
    pub fn expected_next_seq(&self) -> u32 {
        self.turns.len() as u32 + 1
    }
}

// ============================================================================
// Tests
// ============================================================================
