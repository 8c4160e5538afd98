//! QueueBrokerActor - named durable-FIFO queues using ractor
//!
//! Provides the push/blocking-pop surface the rest of the system treats as a
//! broker. Each named queue is an ordered buffer plus a line of parked
//! poppers; a message is handed to exactly one consumer of its logical queue.
//!
//! Blocking pop is implemented with parked reply ports: a `Pop` against an
//! empty queue parks its reply port, and the caller bounds the wait with
//! `call_t!`. A parked port whose caller has given up fails on send and is
//! skipped, so abandoned waits never swallow messages.

use std::collections::HashMap;
use std::collections::VecDeque;

use async_trait::async_trait;
use dialogue_types::QueueMessage;
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};

/// Actor that owns all named queues.
#[derive(Debug, Default)]
pub struct QueueBrokerActor;

/// State for QueueBrokerActor
#[derive(Default)]
pub struct QueueBrokerState {
    queues: HashMap<String, NamedQueue>,
}

#[derive(Default)]
struct NamedQueue {
    messages: VecDeque<QueueMessage>,
    waiters: VecDeque<RpcReplyPort<QueueMessage>>,
}

// ============================================================================
// Messages
// ============================================================================

/// Messages handled by QueueBrokerActor
pub enum QueueBrokerMsg {
    /// Append a message to the tail of a queue.
    Push {
        queue: String,
        message: QueueMessage,
    },
    /// Deliver the oldest message, parking the reply until one arrives.
    /// Callers bound the wait with `ractor::call_t!`.
    Pop {
        queue: String,
        reply: RpcReplyPort<QueueMessage>,
    },
    /// Non-blocking pop; `None` when the queue is empty.
    TryPop {
        queue: String,
        reply: RpcReplyPort<Option<QueueMessage>>,
    },
    /// Remove and return every buffered message.
    Drain {
        queue: String,
        reply: RpcReplyPort<Vec<QueueMessage>>,
    },
    /// Number of buffered (undelivered) messages.
    Depth {
        queue: String,
        reply: RpcReplyPort<usize>,
    },
    /// Number of live queues (buffered messages or parked waiters).
    QueueCount { reply: RpcReplyPort<usize> },
    /// Liveness probe.
    Ping { reply: RpcReplyPort<()> },
}

impl std::fmt::Debug for QueueBrokerMsg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Push { queue, message } => f
                .debug_struct("Push")
                .field("queue", queue)
                .field("message_id", &message.message_id)
                .finish(),
            Self::Pop { queue, .. } => f.debug_struct("Pop").field("queue", queue).finish(),
            Self::TryPop { queue, .. } => f.debug_struct("TryPop").field("queue", queue).finish(),
            Self::Drain { queue, .. } => f.debug_struct("Drain").field("queue", queue).finish(),
            Self::Depth { queue, .. } => f.debug_struct("Depth").field("queue", queue).finish(),
            Self::QueueCount { .. } => f.debug_struct("QueueCount").finish(),
            Self::Ping { .. } => f.debug_struct("Ping").finish(),
        }
    }
}

#[async_trait]
impl Actor for QueueBrokerActor {
    type Msg = QueueBrokerMsg;
    type State = QueueBrokerState;
    type Arguments = ();

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        _args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!(actor_id = %myself.get_id(), "QueueBrokerActor starting");
        Ok(QueueBrokerState::default())
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            QueueBrokerMsg::Push { queue, message } => {
                Self::handle_push(state, queue, message);
            }
            QueueBrokerMsg::Pop { queue, reply } => {
                Self::handle_pop(state, queue, reply);
            }
            QueueBrokerMsg::TryPop { queue, reply } => {
                let message = state
                    .queues
                    .get_mut(&queue)
                    .and_then(|q| q.messages.pop_front());
                let _ = reply.send(message);
                Self::remove_if_idle(state, &queue);
            }
            QueueBrokerMsg::Drain { queue, reply } => {
                let drained: Vec<QueueMessage> = state
                    .queues
                    .get_mut(&queue)
                    .map(|q| q.messages.drain(..).collect())
                    .unwrap_or_default();
                let _ = reply.send(drained);
                Self::remove_if_idle(state, &queue);
            }
            QueueBrokerMsg::Depth { queue, reply } => {
                let depth = state
                    .queues
                    .get(&queue)
                    .map(|q| q.messages.len())
                    .unwrap_or(0);
                let _ = reply.send(depth);
            }
            QueueBrokerMsg::QueueCount { reply } => {
                let _ = reply.send(state.queues.len());
            }
            QueueBrokerMsg::Ping { reply } => {
                let _ = reply.send(());
            }
        }
        Ok(())
    }
}

impl QueueBrokerActor {
    fn handle_push(state: &mut QueueBrokerState, queue: String, message: QueueMessage) {
        let q = state.queues.entry(queue.clone()).or_default();

        // Hand to the first live waiter; skip ports whose callers timed out.
        let mut delivered = false;
        while let Some(waiter) = q.waiters.pop_front() {
            if waiter.send(message.clone()).is_ok() {
                delivered = true;
                break;
            }
        }

        if !delivered {
            tracing::debug!(queue = %queue, message_id = %message.message_id, "buffered");
            q.messages.push_back(message);
            return;
        }

        tracing::debug!(queue = %queue, message_id = %message.message_id, "delivered to waiter");
        Self::remove_if_idle(state, &queue);
    }

    fn handle_pop(state: &mut QueueBrokerState, queue: String, reply: RpcReplyPort<QueueMessage>) {
        let q = state.queues.entry(queue.clone()).or_default();
        match q.messages.pop_front() {
            Some(message) => {
                // Caller may have timed out between sending Pop and now; keep
                // the message in that case.
                if reply.send(message.clone()).is_err() {
                    q.messages.push_front(message);
                    return;
                }
            }
            None => {
                q.waiters.push_back(reply);
                return;
            }
        }
        Self::remove_if_idle(state, &queue);
    }

    /// Drop the map entry once a queue holds no messages and no live
    /// waiters, so per-conversation queue names don't accumulate in a
    /// long-lived broker.
    fn remove_if_idle(state: &mut QueueBrokerState, queue: &str) {
        if let Some(q) = state.queues.get_mut(queue) {
            q.waiters.retain(|waiter| !waiter.is_closed());
            if q.messages.is_empty() && q.waiters.is_empty() {
                state.queues.remove(queue);
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
