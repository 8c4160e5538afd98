//! Liveness probes for the broker and the store.

use std::time::{Duration, Instant};

use ractor::{call_t, ActorRef};
use serde::Serialize;

use crate::actors::ConversationStoreMsg;
use crate::queue::QueueClient;

#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub healthy: bool,
    pub latency_ms: u64,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub broker: ComponentHealth,
    pub store: ComponentHealth,
}

impl HealthReport {
    pub fn healthy(&self) -> bool {
        self.broker.healthy && self.store.healthy
    }
}

/// Ping the broker and the store, each bounded by `timeout`.
pub async fn check_health(
    queue: &QueueClient,
    store: &ActorRef<ConversationStoreMsg>,
    timeout: Duration,
) -> HealthReport {
    let started = Instant::now();
    let broker = match queue.ping(timeout).await {
        Ok(()) => ComponentHealth {
            healthy: true,
            latency_ms: started.elapsed().as_millis() as u64,
            detail: None,
        },
        Err(e) => ComponentHealth {
            healthy: false,
            latency_ms: started.elapsed().as_millis() as u64,
            detail: Some(e.to_string()),
        },
    };

    let started = Instant::now();
    let timeout_ms = timeout.as_millis() as u64;
    let store = match call_t!(store, |reply| ConversationStoreMsg::Ping { reply }, timeout_ms) {
        Ok(()) => ComponentHealth {
            healthy: true,
            latency_ms: started.elapsed().as_millis() as u64,
            detail: None,
        },
        Err(e) => ComponentHealth {
            healthy: false,
            latency_ms: started.elapsed().as_millis() as u64,
            detail: Some(e.to_string()),
        },
    };

    HealthReport { broker, store }
}
