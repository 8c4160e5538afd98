//! ConversationStoreActor - durable conversation + turn records using ractor
//!
//! Crash-consistent record of conversations and their transcripts, backed by
//! SQLite (libsql). Supports both file-based and in-memory databases.
//!
//! The actor serializes all operations, which makes `AppendTurn` atomic per
//! conversation id: the sequence check and the insert cannot interleave with
//! another append. Cross-conversation operations need no mutual exclusion
//! beyond that.
//!
//! # Example
//!
//! ```rust,ignore
//! use ractor::{Actor, call};
//!
//! let (store, _handle) = Actor::spawn(
//!     None,
//!     ConversationStoreActor,
//!     ConversationStoreArguments::File("/path/to/conversations.db".to_string()),
//! ).await?;
//!
//! let created = call!(store, |reply| ConversationStoreMsg::Create {
//!     id: conversation_id,
//!     bindings,
//!     limits,
//!     reply,
//! })?;
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dialogue_types::{
    AbortReason, Conversation, ConversationId, ConversationLimits, ConversationOutcome,
    ConversationStatus, MessageContent, RoleBinding, RoleId, StopReason, Turn,
};
use libsql::Connection;
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};

/// Actor that manages the conversation store.
#[derive(Debug, Default)]
pub struct ConversationStoreActor;

/// Arguments for spawning ConversationStoreActor
#[derive(Debug, Clone)]
pub enum ConversationStoreArguments {
    /// File-based database path
    File(String),
    /// In-memory database (for testing)
    InMemory,
}

/// State for ConversationStoreActor
pub struct ConversationStoreState {
    conn: Connection,
}

// ============================================================================
// Messages
// ============================================================================

/// Messages handled by ConversationStoreActor
pub enum ConversationStoreMsg {
    /// Register a new conversation in Active status.
    Create {
        id: ConversationId,
        bindings: Vec<RoleBinding>,
        limits: ConversationLimits,
        reply: RpcReplyPort<Result<(), StoreError>>,
    },
    /// Append the next turn; the turn's seq must be exactly current_len + 1.
    AppendTurn {
        id: ConversationId,
        turn: Turn,
        reply: RpcReplyPort<Result<(), StoreError>>,
    },
    /// Record the terminal outcome. Idempotent for a repeated identical
    /// outcome; a conflicting outcome fails without mutating the first.
    Finalize {
        id: ConversationId,
        outcome: ConversationOutcome,
        reply: RpcReplyPort<Result<(), StoreError>>,
    },
    /// Fetch the full conversation including its transcript.
    Get {
        id: ConversationId,
        reply: RpcReplyPort<Result<Conversation, StoreError>>,
    },
    /// Liveness probe.
    Ping { reply: RpcReplyPort<()> },
}

impl std::fmt::Debug for ConversationStoreMsg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Create { id, .. } => f.debug_struct("Create").field("id", id).finish(),
            Self::AppendTurn { id, turn, .. } => f
                .debug_struct("AppendTurn")
                .field("id", id)
                .field("seq", &turn.seq)
                .finish(),
            Self::Finalize { id, outcome, .. } => f
                .debug_struct("Finalize")
                .field("id", id)
                .field("outcome", outcome)
                .finish(),
            Self::Get { id, .. } => f.debug_struct("Get").field("id", id).finish(),
            Self::Ping { .. } => f.debug_struct("Ping").finish(),
        }
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur in ConversationStoreActor
#[derive(Debug, thiserror::Error, Clone)]
pub enum StoreError {
    #[error("conversation already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid turn sequence: expected {expected}, got {got}")]
    InvalidSequence { expected: u32, got: u32 },

    #[error("conversation is not active: {0}")]
    NotActive(String),

    #[error("conversation already finalized with a conflicting outcome: {0}")]
    AlreadyFinalized(String),

    #[error("conversation not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("invalid timestamp format: {0}")]
    InvalidTimestamp(String),
}

impl From<libsql::Error> for StoreError {
    fn from(e: libsql::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

// ============================================================================
// Actor Implementation
// ============================================================================

impl ConversationStoreActor {
    async fn new_with_path(database_path: &str) -> Result<Connection, libsql::Error> {
        if database_path != ":memory:" {
            if let Some(parent) = std::path::Path::new(database_path).parent() {
                std::fs::create_dir_all(parent).ok();
            }
        }

        let db = libsql::Builder::new_local(database_path).build().await?;
        let conn = db.connect()?;
        Self::run_migrations(&conn).await?;
        Ok(conn)
    }

    async fn run_migrations(conn: &Connection) -> Result<(), libsql::Error> {
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS conversations (
                conversation_id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                stop_reason TEXT,
                abort_reason TEXT,
                abort_detail TEXT,
                bindings TEXT NOT NULL,
                limits TEXT NOT NULL,
                created_at TEXT NOT NULL,
                completed_at TEXT
            )
            "#,
            (),
        )
        .await?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS turns (
                conversation_id TEXT NOT NULL,
                seq INTEGER NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                latency_ms INTEGER NOT NULL,
                tokens INTEGER,
                timestamp TEXT NOT NULL,
                PRIMARY KEY (conversation_id, seq)
            )
            "#,
            (),
        )
        .await?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_turns_conversation ON turns(conversation_id)",
            (),
        )
        .await?;

        Ok(())
    }
}

#[async_trait]
impl Actor for ConversationStoreActor {
    type Msg = ConversationStoreMsg;
    type State = ConversationStoreState;
    type Arguments = ConversationStoreArguments;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!(actor_id = %myself.get_id(), "ConversationStoreActor starting");

        let conn = match args {
            ConversationStoreArguments::File(path) => {
                tracing::info!(database_path = %path, "Opening file-based database");
                Self::new_with_path(&path).await.map_err(|e| {
                    ActorProcessingErr::from(format!("Failed to open database: {e}"))
                })?
            }
            ConversationStoreArguments::InMemory => {
                tracing::info!("Opening in-memory database");
                Self::new_with_path(":memory:").await.map_err(|e| {
                    ActorProcessingErr::from(format!("Failed to open in-memory database: {e}"))
                })?
            }
        };

        Ok(ConversationStoreState { conn })
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            ConversationStoreMsg::Create {
                id,
                bindings,
                limits,
                reply,
            } => {
                let result = self.handle_create(&id, &bindings, &limits, state).await;
                let _ = reply.send(result);
            }
            ConversationStoreMsg::AppendTurn { id, turn, reply } => {
                let result = self.handle_append_turn(&id, &turn, state).await;
                let _ = reply.send(result);
            }
            ConversationStoreMsg::Finalize { id, outcome, reply } => {
                let result = self.handle_finalize(&id, &outcome, state).await;
                let _ = reply.send(result);
            }
            ConversationStoreMsg::Get { id, reply } => {
                let result = self.handle_get(&id, state).await;
                let _ = reply.send(result);
            }
            ConversationStoreMsg::Ping { reply } => {
                let _ = reply.send(());
            }
        }
        Ok(())
    }
}

// ============================================================================
// Message Handlers
// ============================================================================

impl ConversationStoreActor {
    async fn handle_create(
        &self,
        id: &ConversationId,
        bindings: &[RoleBinding],
        limits: &ConversationLimits,
        state: &mut ConversationStoreState,
    ) -> Result<(), StoreError> {
        let conn = &state.conn;

        let mut rows = conn
            .query(
                "SELECT 1 FROM conversations WHERE conversation_id = ?1",
                [id.as_str()],
            )
            .await?;
        if rows.next().await?.is_some() {
            return Err(StoreError::AlreadyExists(id.to_string()));
        }

        let bindings_json = serde_json::to_string(bindings)?;
        let limits_json = serde_json::to_string(limits)?;
        let created_at = Utc::now().to_rfc3339();

        conn.execute(
            r#"
            INSERT INTO conversations
                (conversation_id, status, bindings, limits, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            libsql::params![
                id.as_str(),
                ConversationStatus::Active.as_str(),
                bindings_json,
                limits_json,
                created_at
            ],
        )
        .await?;

        Ok(())
    }

    async fn handle_append_turn(
        &self,
        id: &ConversationId,
        turn: &Turn,
        state: &mut ConversationStoreState,
    ) -> Result<(), StoreError> {
        let conn = &state.conn;

        let status = self.load_status(id, state).await?;
        if status.is_terminal() {
            return Err(StoreError::NotActive(id.to_string()));
        }

        let mut rows = conn
            .query(
                "SELECT COUNT(*) FROM turns WHERE conversation_id = ?1",
                [id.as_str()],
            )
            .await?;
        let row = rows
            .next()
            .await?
            .ok_or_else(|| StoreError::Database("count query returned no row".to_string()))?;
        let current_len: i64 = row.get(0)?;
        let expected = current_len as u32 + 1;

        if turn.seq != expected {
            return Err(StoreError::InvalidSequence {
                expected,
                got: turn.seq,
            });
        }

        let content_json = serde_json::to_string(&turn.content)?;
        conn.execute(
            r#"
            INSERT INTO turns
                (conversation_id, seq, role, content, latency_ms, tokens, timestamp)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            libsql::params![
                id.as_str(),
                turn.seq as i64,
                turn.role.as_str(),
                content_json,
                turn.latency_ms as i64,
                turn.tokens.map(|t| t as i64),
                turn.timestamp.to_rfc3339()
            ],
        )
        .await?;

        Ok(())
    }

    async fn handle_finalize(
        &self,
        id: &ConversationId,
        outcome: &ConversationOutcome,
        state: &mut ConversationStoreState,
    ) -> Result<(), StoreError> {
        let conn = &state.conn;

        let mut rows = conn
            .query(
                r#"
                SELECT status, stop_reason, abort_reason, abort_detail
                FROM conversations WHERE conversation_id = ?1
                "#,
                [id.as_str()],
            )
            .await?;
        let row = rows
            .next()
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        let status = status_from_str(&row.get::<String>(0)?)?;
        if status.is_terminal() {
            let stored = stored_outcome(
                status,
                row.get::<Option<String>>(1)?,
                row.get::<Option<String>>(2)?,
                row.get::<Option<String>>(3)?,
            )?;
            return if stored.same_terminal(outcome) {
                Ok(())
            } else {
                Err(StoreError::AlreadyFinalized(id.to_string()))
            };
        }

        let (status_str, stop_reason, abort_reason, abort_detail) = match outcome {
            ConversationOutcome::Completed { stop_reason } => (
                ConversationStatus::Completed.as_str(),
                Some(stop_reason.as_str().to_string()),
                None,
                None,
            ),
            ConversationOutcome::Aborted { reason, detail } => (
                ConversationStatus::Aborted.as_str(),
                None,
                Some(reason.as_str().to_string()),
                Some(detail.clone()),
            ),
        };

        conn.execute(
            r#"
            UPDATE conversations
            SET status = ?2, stop_reason = ?3, abort_reason = ?4,
                abort_detail = ?5, completed_at = ?6
            WHERE conversation_id = ?1
            "#,
            libsql::params![
                id.as_str(),
                status_str,
                stop_reason,
                abort_reason,
                abort_detail,
                Utc::now().to_rfc3339()
            ],
        )
        .await?;

        Ok(())
    }

    async fn handle_get(
        &self,
        id: &ConversationId,
        state: &mut ConversationStoreState,
    ) -> Result<Conversation, StoreError> {
        let conn = &state.conn;

        let mut rows = conn
            .query(
                r#"
                SELECT status, stop_reason, abort_reason, abort_detail,
                       bindings, limits, created_at, completed_at
                FROM conversations WHERE conversation_id = ?1
                "#,
                [id.as_str()],
            )
            .await?;
        let row = rows
            .next()
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        let status = status_from_str(&row.get::<String>(0)?)?;
        let stop_reason = row
            .get::<Option<String>>(1)?
            .map(|s| stop_reason_from_str(&s))
            .transpose()?;
        let abort_reason = row
            .get::<Option<String>>(2)?
            .map(|s| abort_reason_from_str(&s))
            .transpose()?;
        let abort_detail = row.get::<Option<String>>(3)?;
        let bindings: Vec<RoleBinding> = serde_json::from_str(&row.get::<String>(4)?)?;
        let limits: ConversationLimits = serde_json::from_str(&row.get::<String>(5)?)?;
        let created_at = parse_timestamp(&row.get::<String>(6)?)?;
        let completed_at = row
            .get::<Option<String>>(7)?
            .map(|s| parse_timestamp(&s))
            .transpose()?;

        let mut turn_rows = conn
            .query(
                r#"
                SELECT seq, role, content, latency_ms, tokens, timestamp
                FROM turns WHERE conversation_id = ?1
                ORDER BY seq ASC
                "#,
                [id.as_str()],
            )
            .await?;

        let mut turns = Vec::new();
        while let Some(row) = turn_rows.next().await? {
            let content: MessageContent = serde_json::from_str(&row.get::<String>(2)?)?;
            turns.push(Turn {
                seq: row.get::<i64>(0)? as u32,
                role: RoleId(row.get(1)?),
                content,
                latency_ms: row.get::<i64>(3)? as u64,
                tokens: row.get::<Option<i64>>(4)?.map(|t| t as u32),
                timestamp: parse_timestamp(&row.get::<String>(5)?)?,
            });
        }

        Ok(Conversation {
            id: id.clone(),
            bindings,
            limits,
            turns,
            status,
            stop_reason,
            abort_reason,
            abort_detail,
            created_at,
            completed_at,
        })
    }

    async fn load_status(
        &self,
        id: &ConversationId,
        state: &ConversationStoreState,
    ) -> Result<ConversationStatus, StoreError> {
        let mut rows = state
            .conn
            .query(
                "SELECT status FROM conversations WHERE conversation_id = ?1",
                [id.as_str()],
            )
            .await?;
        let row = rows
            .next()
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        status_from_str(&row.get::<String>(0)?)
    }
}

// ============================================================================
// Row Mapping Helpers
// ============================================================================

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::InvalidTimestamp(e.to_string()))
}

fn status_from_str(raw: &str) -> Result<ConversationStatus, StoreError> {
    match raw {
        "initializing" => Ok(ConversationStatus::Initializing),
        "active" => Ok(ConversationStatus::Active),
        "completed" => Ok(ConversationStatus::Completed),
        "aborted" => Ok(ConversationStatus::Aborted),
        other => Err(StoreError::Serialization(format!(
            "unknown conversation status: {other}"
        ))),
    }
}

fn stop_reason_from_str(raw: &str) -> Result<StopReason, StoreError> {
    match raw {
        "turn_limit_reached" => Ok(StopReason::TurnLimitReached),
        "time_limit_reached" => Ok(StopReason::TimeLimitReached),
        other => Err(StoreError::Serialization(format!(
            "unknown stop reason: {other}"
        ))),
    }
}

fn abort_reason_from_str(raw: &str) -> Result<AbortReason, StoreError> {
    match raw {
        "participant_unresponsive" => Ok(AbortReason::ParticipantUnresponsive),
        "gateway_failure" => Ok(AbortReason::GatewayFailure),
        "invalid_response" => Ok(AbortReason::InvalidResponse),
        "broker_unavailable" => Ok(AbortReason::BrokerUnavailable),
        "cancelled" => Ok(AbortReason::Cancelled),
        other => Err(StoreError::Serialization(format!(
            "unknown abort reason: {other}"
        ))),
    }
}

fn stored_outcome(
    status: ConversationStatus,
    stop_reason: Option<String>,
    abort_reason: Option<String>,
    abort_detail: Option<String>,
) -> Result<ConversationOutcome, StoreError> {
    match status {
        ConversationStatus::Completed => {
            let raw = stop_reason.ok_or_else(|| {
                StoreError::Serialization("completed conversation missing stop reason".to_string())
            })?;
            Ok(ConversationOutcome::Completed {
                stop_reason: stop_reason_from_str(&raw)?,
            })
        }
        ConversationStatus::Aborted => {
            let raw = abort_reason.ok_or_else(|| {
                StoreError::Serialization("aborted conversation missing abort reason".to_string())
            })?;
            Ok(ConversationOutcome::Aborted {
                reason: abort_reason_from_str(&raw)?,
                detail: abort_detail.unwrap_or_default(),
            })
        }
        other => Err(StoreError::Serialization(format!(
            "stored_outcome called with non-terminal status: {}",
            other.as_str()
        ))),
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Convenience function to create a conversation record.
pub async fn create_conversation(
    store: &ActorRef<ConversationStoreMsg>,
    id: ConversationId,
    bindings: Vec<RoleBinding>,
    limits: ConversationLimits,
) -> Result<Result<(), StoreError>, ractor::RactorErr<ConversationStoreMsg>> {
    ractor::call!(store, |reply| ConversationStoreMsg::Create {
        id,
        bindings,
        limits,
        reply,
    })
}

/// Convenience function to append a turn.
pub async fn append_turn(
    store: &ActorRef<ConversationStoreMsg>,
    id: ConversationId,
    turn: Turn,
) -> Result<Result<(), StoreError>, ractor::RactorErr<ConversationStoreMsg>> {
    ractor::call!(store, |reply| ConversationStoreMsg::AppendTurn {
        id,
        turn,
        reply,
    })
}

/// Convenience function to finalize a conversation.
pub async fn finalize_conversation(
    store: &ActorRef<ConversationStoreMsg>,
    id: ConversationId,
    outcome: ConversationOutcome,
) -> Result<Result<(), StoreError>, ractor::RactorErr<ConversationStoreMsg>> {
    ractor::call!(store, |reply| ConversationStoreMsg::Finalize {
        id,
        outcome,
        reply,
    })
}

/// Convenience function to fetch a conversation.
pub async fn get_conversation(
    store: &ActorRef<ConversationStoreMsg>,
    id: ConversationId,
) -> Result<Result<Conversation, StoreError>, ractor::RactorErr<ConversationStoreMsg>> {
    ractor::call!(store, |reply| ConversationStoreMsg::Get { id, reply })
}

// ============================================================================
// Tests
// ============================================================================
