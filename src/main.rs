//! Fraud Feature Pipeline - Main Entry Point
//!
//! Loads reference data and history, then serves scoring requests from NATS:
//! each request carries a batch of transactions and is answered with one
//! approve/decline result per transaction. A reload subject swaps in a fresh
//! record store without stopping the worker.

use anyhow::Result;
use fraud_feature_pipeline::{
    config::{AppConfig, DataConfig},
    consumer::{respond, RequestConsumer},
    ingest::{self, ScoringRequest},
    metrics::{MetricsReporter, PipelineMetrics},
    models::OnnxClassifier,
    pipeline::FraudPipeline,
    producer::{run_publisher, PredictionLogProducer, PredictionLogQueue},
    store::StoreHandle,
    types::{ErrorReply, ReloadReply, ScoringReply},
};
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

fn init_logging(config: &AppConfig) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level))
        .add_directive("fraud_feature_pipeline=info".parse()?);

    if config.logging.format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;
    init_logging(&config)?;

    info!("Starting Fraud Feature Pipeline");
    info!(
        threshold = config.scoring.threshold,
        workers = config.pipeline.workers,
        "Configuration loaded successfully"
    );

    let metrics = Arc::new(PipelineMetrics::new());

    // Reference data and history
    let store = ingest::load_store(&config.data)?;
    info!(
        cards = store.card_count(),
        terminals = store.terminal_count(),
        transactions = store.transaction_count(),
        "Record store loaded"
    );
    let store = Arc::new(StoreHandle::new(store));

    let classifier = OnnxClassifier::new(&config.models)?.with_metrics(metrics.clone());
    info!(
        "Classifier initialized with {} models: {:?}",
        classifier.model_count(),
        classifier.model_names()
    );

    // Connect to NATS
    let client = async_nats::connect(&config.nats.url).await?;
    info!("Connected to NATS at {}", config.nats.url);

    // Prediction logs are published off the scoring path
    let (log_queue, log_receiver) = PredictionLogQueue::bounded(config.pipeline.log_queue_capacity);
    let log_producer = PredictionLogProducer::new(client.clone(), &config.nats.prediction_log_subject);
    tokio::spawn(run_publisher(log_receiver, log_producer));

    let pipeline = Arc::new(
        FraudPipeline::new(store.clone(), Arc::new(classifier), config.scoring.threshold)?
            .with_workers(config.pipeline.workers)
            .with_metrics(metrics.clone())
            .with_prediction_log(log_queue),
    );

    if config.pipeline.metrics_interval_secs > 0 {
        let reporter = MetricsReporter::new(metrics.clone(), config.pipeline.metrics_interval_secs);
        tokio::spawn(reporter.start());
    }

    let consumer = RequestConsumer::new(
        client.clone(),
        &config.nats.request_subject,
        &config.nats.reload_subject,
    );

    // Store reloads
    let mut reloads = consumer.subscribe_reloads().await?;
    let reload_client = client.clone();
    let reload_store = store.clone();
    let data_config = Arc::new(config.data.clone());
    tokio::spawn(async move {
        while let Some(message) = reloads.next().await {
            let reply = reload(reload_store.clone(), data_config.clone()).await;
            let sent = match reply {
                Ok(reply) => respond(&reload_client, message.reply, &reply).await,
                Err(e) => {
                    error!(error = %e, "Store reload failed, keeping current store");
                    let reply = ErrorReply {
                        request_id: None,
                        error: format!("{:#}", e),
                    };
                    respond(&reload_client, message.reply, &reply).await
                }
            };
            if let Err(e) = sent {
                warn!(error = %e, "Failed to answer reload request");
            }
        }
    });

    // Scoring requests, at most `workers` batches in flight
    let semaphore = Arc::new(Semaphore::new(config.pipeline.workers.max(1)));
    let mut requests = consumer.subscribe_requests().await?;
    info!(subject = %consumer.subject(), "Waiting for scoring requests");

    while let Some(message) = requests.next().await {
        let permit = match semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => {
                error!(error = %e, "Worker semaphore closed");
                break;
            }
        };

        let pipeline = pipeline.clone();
        let client = client.clone();

        tokio::spawn(async move {
            let outcome = tokio::task::spawn_blocking(move || {
                let request = match ScoringRequest::from_slice(&message.payload) {
                    Ok(request) => request,
                    Err(e) => return (None, Err(e)),
                };
                let results = request
                    .decode()
                    .and_then(|batch| pipeline.score_batch(&batch))
                    .map(|results| ScoringReply::new(request.request_id.clone(), pipeline.threshold(), results));
                (request.request_id, results)
            })
            .await;

            let sent = match outcome {
                Ok((_, Ok(reply))) => respond(&client, message.reply, &reply).await,
                Ok((request_id, Err(e))) => {
                    warn!(error = %e, input_error = e.is_input_error(), "Scoring request rejected");
                    let reply = ErrorReply {
                        request_id,
                        error: e.to_string(),
                    };
                    respond(&client, message.reply, &reply).await
                }
                Err(e) => {
                    error!(error = %e, "Scoring task panicked");
                    let reply = ErrorReply {
                        request_id: None,
                        error: "internal error".to_string(),
                    };
                    respond(&client, message.reply, &reply).await
                }
            };
            if let Err(e) = sent {
                warn!(error = %e, "Failed to publish scoring reply");
            }

            drop(permit);
        });
    }

    info!("Pipeline shutting down...");
    metrics.print_summary();

    Ok(())
}

/// Rebuild the record store from disk and swap it in
async fn reload(store: Arc<StoreHandle>, data: Arc<DataConfig>) -> Result<ReloadReply> {
    info!("Reloading record store");
    let fresh = tokio::task::spawn_blocking(move || ingest::load_store(&data)).await??;

    let (cards, terminals, transactions) = (
        fresh.card_count(),
        fresh.terminal_count(),
        fresh.transaction_count(),
    );
    store.replace(fresh);
    let reply = ReloadReply {
        generation: store.generation(),
        cards,
        terminals,
        transactions,
    };

    info!(
        generation = reply.generation,
        cards = reply.cards,
        terminals = reply.terminals,
        transactions = reply.transactions,
        "Record store replaced"
    );
    Ok(reply)
}
