//! dialogue-engine binary
//!
//! Spawns the broker and the store, runs two participant workers against the
//! configured providers, drives one conversation to its terminal state, and
//! prints the analysis report.

use std::sync::Arc;
use std::time::Duration;

use dialogue_engine::actors::{
    ConversationStoreActor, ConversationStoreArguments, QueueBrokerActor,
};
use dialogue_engine::gateway::{OllamaGateway, RetryPolicy};
use dialogue_engine::{
    analysis, config, health, ConversationRequest, EngineConfig, Orchestrator, ParticipantWorker,
    QueueClient,
};
use dialogue_types::ConversationId;
use ractor::Actor;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    config::load_env_file();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let engine_config = EngineConfig::from_env();
    tracing::info!(
        db_path = %engine_config.db_path,
        model_a = %engine_config.bindings[0].model,
        model_b = %engine_config.bindings[1].model,
        max_turns = engine_config.limits.max_turns,
        "dialogue-engine starting"
    );

    let (broker, broker_handle) = Actor::spawn(None, QueueBrokerActor, ()).await?;
    let (store, store_handle) = Actor::spawn(
        None,
        ConversationStoreActor,
        ConversationStoreArguments::File(engine_config.db_path.clone()),
    )
    .await?;
    let queue = QueueClient::new(broker.clone());

    let report = health::check_health(&queue, &store, Duration::from_secs(2)).await;
    if !report.healthy() {
        tracing::error!(?report, "components unhealthy at startup");
        return Err("startup health check failed".into());
    }

    // Ctrl-C aborts the conversation; workers share a child token so they
    // wind down with it.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received, aborting conversation");
                cancel.cancel();
            }
        });
    }

    let conversation_id = ConversationId::new();
    // Keep the provider call bounded below the turn timeout so a hung call
    // surfaces as a gateway error, not an unresponsive participant.
    let request_timeout = engine_config.limits.turn_timeout().mul_f64(0.8);
    let mut worker_tasks = Vec::new();
    for (i, binding) in engine_config.bindings.iter().enumerate() {
        let gateway = Arc::new(OllamaGateway::with_timeout(
            &binding.provider_url,
            request_timeout,
        )?);
        let worker = ParticipantWorker::new(
            binding.clone(),
            engine_config.personas[i].clone(),
            queue.clone(),
            gateway,
            RetryPolicy::default(),
        );
        let worker_cancel = cancel.child_token();
        let worker_conversation = conversation_id.clone();
        let role = binding.role.clone();
        worker_tasks.push(tokio::spawn(async move {
            if let Err(e) = worker.run(worker_conversation, worker_cancel).await {
                tracing::error!(role = %role, error = %e, "participant worker failed");
            }
        }));
    }

    let orchestrator = Orchestrator::new(queue.clone(), store.clone());
    let request = ConversationRequest {
        id: conversation_id,
        bindings: engine_config.bindings.clone(),
        limits: engine_config.limits,
        topic: engine_config.topic.clone(),
        guidance: engine_config.guidance.clone(),
    };
    let conversation = orchestrator.run(request, cancel.clone()).await?;

    let analysis = analysis::analyze(&conversation);
    println!("{}", analysis.render_report());

    cancel.cancel();
    for task in worker_tasks {
        let _ = task.await;
    }
    broker.stop(None);
    store.stop(None);
    let _ = broker_handle.await;
    let _ = store_handle.await;

    Ok(())
}
