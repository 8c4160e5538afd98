//! Queue client facade over the broker actor.

pub mod client;

pub use client::{QueueClient, QueueError};
