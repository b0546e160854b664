//! SQS consumer: long-polls the notification queue and hands each received
//! batch to the dispatcher.
//!
//! Messages are deleted only when the dispatcher returned `Ok` for their
//! batch. Otherwise they become visible again after the queue's visibility
//! timeout and are redelivered as a whole.

use std::time::Duration;

use anyhow::{Context, Result};
use aws_config::meta::region::RegionProviderChain;
use aws_config::BehaviorVersion;
use aws_sdk_sqs::types::{DeleteMessageBatchRequestEntry, Message};
use aws_sdk_sqs::Client as SqsClient;
use marketcast_core::WorkerConfig;
use tokio_util::sync::CancellationToken;

use crate::dispatcher::Dispatcher;

const RECEIVE_ERROR_BACKOFF: Duration = Duration::from_secs(5);

pub struct SqsConsumer {
    client: SqsClient,
    queue_url: String,
    max_messages: i32,
    wait_time_secs: i32,
    batch_timeout: Duration,
    dispatcher: Dispatcher,
}

impl SqsConsumer {
    pub async fn new(config: &WorkerConfig, dispatcher: Dispatcher) -> Result<Self> {
        let queue_url = config
            .queue
            .sqs_queue_url
            .clone()
            .context("SQS_QUEUE_URL must be set to consume the notification queue")?;

        let region = RegionProviderChain::default_provider().or_else("us-east-1");
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(region)
            .load()
            .await;

        Ok(Self {
            client: SqsClient::new(&sdk_config),
            queue_url,
            max_messages: config.queue.max_messages,
            wait_time_secs: config.queue.wait_time_secs,
            batch_timeout: config.batch_timeout(),
            dispatcher,
        })
    }

    /// Poll until `shutdown` fires. A batch already being dispatched is
    /// allowed to finish.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        tracing::info!(
            queue_url = %self.queue_url,
            max_messages = self.max_messages,
            wait_time_secs = self.wait_time_secs,
            concurrency = self.dispatcher.concurrency(),
            "SQS consumer started"
        );

        loop {
            let received = tokio::select! {
                _ = shutdown.cancelled() => break,
                received = self.receive() => received,
            };

            match received {
                Ok(messages) if messages.is_empty() => continue,
                Ok(messages) => self.handle_batch(messages).await,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to receive messages");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(RECEIVE_ERROR_BACKOFF) => {}
                    }
                }
            }
        }

        tracing::info!("SQS consumer stopped");
        Ok(())
    }

    async fn receive(&self) -> Result<Vec<Message>> {
        let output = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(self.max_messages)
            .wait_time_seconds(self.wait_time_secs)
            .send()
            .await
            .context("ReceiveMessage failed")?;

        Ok(output.messages.unwrap_or_default())
    }

    /// Dispatch one batch under the invocation deadline, then acknowledge it
    /// if it succeeded.
    async fn handle_batch(&self, messages: Vec<Message>) {
        let bodies: Vec<String> = messages
            .iter()
            .map(|m| m.body().unwrap_or_default().to_string())
            .collect();

        let invocation = CancellationToken::new();
        let dispatch = self.dispatcher.dispatch(&bodies, &invocation);
        tokio::pin!(dispatch);

        let result = tokio::select! {
            result = &mut dispatch => result,
            _ = tokio::time::sleep(self.batch_timeout) => {
                tracing::warn!(
                    timeout_secs = self.batch_timeout.as_secs(),
                    "Batch deadline exceeded, cancelling in-flight records"
                );
                invocation.cancel();
                dispatch.await
            }
        };

        match result {
            Ok(_) => {
                if let Err(e) = self.delete(&messages).await {
                    tracing::error!(error = %e, "Failed to delete processed messages");
                }
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    messages = messages.len(),
                    "Batch left on queue for redelivery"
                );
            }
        }
    }

    async fn delete(&self, messages: &[Message]) -> Result<()> {
        let mut entries = Vec::with_capacity(messages.len());
        for (index, message) in messages.iter().enumerate() {
            let Some(handle) = message.receipt_handle() else {
                continue;
            };
            entries.push(
                DeleteMessageBatchRequestEntry::builder()
                    .id(index.to_string())
                    .receipt_handle(handle)
                    .build()
                    .context("Invalid delete entry")?,
            );
        }
        if entries.is_empty() {
            return Ok(());
        }

        let output = self
            .client
            .delete_message_batch()
            .queue_url(&self.queue_url)
            .set_entries(Some(entries))
            .send()
            .await
            .context("DeleteMessageBatch failed")?;

        for failed in output.failed() {
            tracing::warn!(
                id = %failed.id(),
                code = %failed.code(),
                message = ?failed.message(),
                "Message could not be deleted and will be redelivered"
            );
        }

        Ok(())
    }
}
