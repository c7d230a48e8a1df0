use async_trait::async_trait;

use crate::config::Config;

use super::{EventQueue, QueueError, QueueMessage, MAX_RECEIVE_BATCH};

/// Long-poll interval for receive calls.
const WAIT_TIME_SECONDS: i32 = 20;

/// SQS-backed event queue.
#[derive(Debug, Clone)]
pub struct SqsEventQueue {
    client: aws_sdk_sqs::Client,
    queue_url: String,
}

impl SqsEventQueue {
    pub fn new(client: aws_sdk_sqs::Client, queue_url: impl Into<String>) -> Self {
        Self {
            client,
            queue_url: queue_url.into(),
        }
    }

    /// Build a client from configuration. Returns `None` when no queue URL is
    /// configured (publishing disabled; tests and single-process modes).
    pub async fn connect(config: &Config) -> Option<Self> {
        let queue_url = config.sqs_queue_url.clone()?;

        let base = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(config.aws_region.clone()))
            .load()
            .await;

        let mut builder = aws_sdk_sqs::config::Builder::from(&base);
        if let Some(endpoint) = &config.sqs_endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        Some(Self::new(
            aws_sdk_sqs::Client::from_conf(builder.build()),
            queue_url,
        ))
    }
}

#[async_trait]
impl EventQueue for SqsEventQueue {
    async fn publish(&self, body: String) -> Result<(), QueueError> {
        self.client
            .send_message()
            .queue_url(&self.queue_url)
            .message_body(body)
            .send()
            .await
            .map_err(|e| {
                QueueError::Other(format!("{}", aws_sdk_sqs::error::DisplayErrorContext(&e)))
            })?;
        Ok(())
    }

    async fn receive(&self, max: usize) -> Result<Vec<QueueMessage>, QueueError> {
        let response = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(max.min(MAX_RECEIVE_BATCH) as i32)
            .wait_time_seconds(WAIT_TIME_SECONDS)
            .send()
            .await
            .map_err(|e| {
                QueueError::Other(format!("{}", aws_sdk_sqs::error::DisplayErrorContext(&e)))
            })?;

        Ok(response
            .messages()
            .iter()
            .filter_map(|message| {
                let receipt = message.receipt_handle()?.to_string();
                let body = message.body()?.to_string();
                Some(QueueMessage { receipt, body })
            })
            .collect())
    }

    async fn delete(&self, receipt: &str) -> Result<(), QueueError> {
        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt)
            .send()
            .await
            .map_err(|e| {
                QueueError::Other(format!("{}", aws_sdk_sqs::error::DisplayErrorContext(&e)))
            })?;
        Ok(())
    }
}
