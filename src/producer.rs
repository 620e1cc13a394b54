//! Prediction log output: a bounded in-process queue drained into NATS.
//!
//! Scoring never waits on the broker. Records are queued with `try_send`; a
//! background task publishes them. When the queue is full the record is dropped.

use crate::types::PredictionLog;
use anyhow::Result;
use async_nats::Client;
use tokio::sync::mpsc::{self, error::TrySendError, Receiver, Sender};
use tracing::{debug, error, info, warn};

/// Producer for publishing prediction logs to NATS
#[derive(Clone)]
pub struct PredictionLogProducer {
    client: Client,
    subject: String,
}

impl PredictionLogProducer {
    /// Create a new prediction log producer
    pub fn new(client: Client, subject: &str) -> Self {
        Self {
            client,
            subject: subject.to_string(),
        }
    }

    /// Publish one prediction log record
    pub async fn publish(&self, log: &PredictionLog) -> Result<()> {
        let payload = serde_json::to_vec(log)?;

        self.client
            .publish(self.subject.clone(), payload.into())
            .await?;

        debug!(
            log_id = %log.log_id,
            transaction_id = %log.transaction_id,
            is_fraud = log.is_fraud,
            "Published prediction log"
        );

        Ok(())
    }

    /// Get the subject name
    pub fn subject(&self) -> &str {
        &self.subject
    }
}

/// Sending half of the prediction log channel
#[derive(Clone)]
pub struct PredictionLogQueue {
    sender: Sender<PredictionLog>,
}

impl PredictionLogQueue {
    /// Create a queue holding at most `capacity` pending records
    pub fn bounded(capacity: usize) -> (Self, Receiver<PredictionLog>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }

    /// Queue a record without blocking; returns false if it was dropped
    pub fn enqueue(&self, log: PredictionLog) -> bool {
        match self.sender.try_send(log) {
            Ok(()) => true,
            Err(TrySendError::Full(log)) => {
                warn!(transaction_id = %log.transaction_id, "Prediction log queue full, dropping record");
                false
            }
            Err(TrySendError::Closed(log)) => {
                warn!(transaction_id = %log.transaction_id, "Prediction log publisher stopped, dropping record");
                false
            }
        }
    }
}

/// Drain the queue into NATS until every sender is gone
pub async fn run_publisher(mut receiver: Receiver<PredictionLog>, producer: PredictionLogProducer) {
    info!(subject = %producer.subject(), "Prediction log publisher started");
    while let Some(log) = receiver.recv().await {
        if let Err(e) = producer.publish(&log).await {
            error!(
                transaction_id = %log.transaction_id,
                error = %e,
                "Failed to publish prediction log"
            );
        }
    }
    info!("Prediction log publisher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ScoredTransaction;

    fn log(id: &str) -> PredictionLog {
        PredictionLog::from_result(&ScoredTransaction::scored(id.into(), 0.7, 0.5), "v-test")
    }

    #[tokio::test]
    async fn test_full_queue_drops_instead_of_blocking() {
        let (queue, mut receiver) = PredictionLogQueue::bounded(1);
        assert!(queue.enqueue(log("a")));
        assert!(!queue.enqueue(log("b")));

        let received = receiver.recv().await.unwrap();
        assert_eq!(received.transaction_id, "a");
        assert!(queue.enqueue(log("c")));
    }

    #[tokio::test]
    async fn test_closed_queue_drops() {
        let (queue, receiver) = PredictionLogQueue::bounded(4);
        drop(receiver);
        assert!(!queue.enqueue(log("a")));
    }
}
