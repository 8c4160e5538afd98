//! Actor implementations for the dialogue engine.
//!
//! Two long-lived actors back the whole system: the queue broker (in-process
//! named FIFO queues) and the conversation store (libsql persistence).

pub mod conversation_store;
pub mod queue_broker;

pub use conversation_store::{
    append_turn, create_conversation, finalize_conversation, get_conversation,
    ConversationStoreActor, ConversationStoreArguments, ConversationStoreMsg, StoreError,
};
pub use queue_broker::{QueueBrokerActor, QueueBrokerMsg};
