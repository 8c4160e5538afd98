//! dialogue-engine - turn-based LLM conversation orchestration
//!
//! Two LLM participants exchange utterances through named queues until a
//! turn or time limit is reached. The pieces:
//!
//! - [`actors::QueueBrokerActor`]: in-process named FIFO queues
//! - [`actors::ConversationStoreActor`]: durable conversations and turns (libsql)
//! - [`worker::ParticipantWorker`]: one LLM participant per role
//! - [`orchestrator::Orchestrator`]: the turn loop and its stop/abort rules
//! - [`analysis`]: post-hoc transcript statistics
//!
//! Shared wire and storage types live in the `dialogue-types` crate.

pub mod actors;
pub mod analysis;
pub mod config;
pub mod gateway;
pub mod health;
pub mod orchestrator;
pub mod queue;
pub mod worker;

pub use config::EngineConfig;
pub use orchestrator::{ConversationRequest, Orchestrator, OrchestratorError};
pub use queue::QueueClient;
pub use worker::ParticipantWorker;
