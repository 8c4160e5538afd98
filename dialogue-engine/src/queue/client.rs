//! QueueClient - typed handle to the queue broker
//!
//! Thin wrapper over `ActorRef<QueueBrokerMsg>` that gives the orchestrator
//! and workers a push/pop surface without exposing ractor plumbing. Broker
//! failures collapse into two cases: the broker is gone, or a bounded wait
//! elapsed with nothing to deliver.

use std::time::Duration;

use dialogue_types::QueueMessage;
use ractor::{call, call_t, cast, ActorRef, RactorErr};

use crate::actors::QueueBrokerMsg;

/// Errors surfaced by queue operations.
#[derive(Debug, thiserror::Error, Clone)]
pub enum QueueError {
    #[error("queue broker unavailable: {0}")]
    BrokerUnavailable(String),

    #[error("timed out waiting on queue '{queue}' after {waited_ms}ms")]
    Timeout { queue: String, waited_ms: u64 },
}

/// Cloneable client for one broker.
#[derive(Clone)]
pub struct QueueClient {
    broker: ActorRef<QueueBrokerMsg>,
}

impl QueueClient {
    pub fn new(broker: ActorRef<QueueBrokerMsg>) -> Self {
        Self { broker }
    }

    /// Append a message to the tail of `queue`. Fire-and-forget; ordering is
    /// guaranteed by the broker's single mailbox.
    pub fn push(&self, queue: &str, message: QueueMessage) -> Result<(), QueueError> {
        cast!(self.broker, QueueBrokerMsg::Push {
            queue: queue.to_string(),
            message,
        })
        .map_err(|e| QueueError::BrokerUnavailable(e.to_string()))
    }

    /// Pop the oldest message, waiting up to `timeout` for one to arrive.
    pub async fn pop(&self, queue: &str, timeout: Duration) -> Result<QueueMessage, QueueError> {
        let waited_ms = timeout.as_millis() as u64;
        let queue_name = queue.to_string();
        call_t!(
            self.broker,
            |reply| QueueBrokerMsg::Pop {
                queue: queue_name,
                reply,
            },
            waited_ms
        )
        .map_err(|e| match e {
            RactorErr::Timeout => QueueError::Timeout {
                queue: queue.to_string(),
                waited_ms,
            },
            other => QueueError::BrokerUnavailable(other.to_string()),
        })
    }

    /// Non-blocking pop.
    pub async fn try_pop(&self, queue: &str) -> Result<Option<QueueMessage>, QueueError> {
        call!(self.broker, |reply| QueueBrokerMsg::TryPop {
            queue: queue.to_string(),
            reply,
        })
        .map_err(|e| QueueError::BrokerUnavailable(e.to_string()))
    }

    /// Remove and return everything buffered on `queue`.
    pub async fn drain(&self, queue: &str) -> Result<Vec<QueueMessage>, QueueError> {
        call!(self.broker, |reply| QueueBrokerMsg::Drain {
            queue: queue.to_string(),
            reply,
        })
        .map_err(|e| QueueError::BrokerUnavailable(e.to_string()))
    }

    /// Number of buffered messages on `queue`.
    pub async fn depth(&self, queue: &str) -> Result<usize, QueueError> {
        call!(self.broker, |reply| QueueBrokerMsg::Depth {
            queue: queue.to_string(),
            reply,
        })
        .map_err(|e| QueueError::BrokerUnavailable(e.to_string()))
    }

    /// Liveness probe with a short bound.
    pub async fn ping(&self, timeout: Duration) -> Result<(), QueueError> {
        let waited_ms = timeout.as_millis() as u64;
        call_t!(
            self.broker,
            |reply| QueueBrokerMsg::Ping { reply },
            waited_ms
        )
        .map_err(|e| QueueError::BrokerUnavailable(e.to_string()))
    }
}
