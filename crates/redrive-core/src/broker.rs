//! The primitive operations this crate needs from a message broker.
//!
//! [`AwsBroker`](crate::aws::AwsBroker) talks to SQS and SNS;
//! [`InMemoryBroker`](crate::memory::InMemoryBroker) models the same semantics in
//! process for tests and local development.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

/// Queue or topic attributes, keyed by the broker's attribute name.
pub type Attributes = BTreeMap<String, String>;

/// Resource tags.
pub type Tags = BTreeMap<String, String>;

/// A broker client shared by every component.
pub type SharedBroker = Arc<dyn BrokerClient>;

pub type BrokerResult<T> = Result<T, BrokerError>;

/// Attribute names understood by the broker.
pub mod attribute {
    pub const DELAY_SECONDS: &str = "DelaySeconds";
    pub const MESSAGE_RETENTION_PERIOD: &str = "MessageRetentionPeriod";
    pub const REDRIVE_POLICY: &str = "RedrivePolicy";
    pub const FIFO_QUEUE: &str = "FifoQueue";
    pub const VISIBILITY_TIMEOUT: &str = "VisibilityTimeout";
    pub const QUEUE_ARN: &str = "QueueArn";
    pub const FIFO_TOPIC: &str = "FifoTopic";
    pub const APPROXIMATE_RECEIVE_COUNT: &str = "ApproximateReceiveCount";
}

/// Subscription protocol used to bind a queue to a topic.
pub const QUEUE_PROTOCOL: &str = "sqs";

/// A failed broker call.
#[derive(Debug, thiserror::Error)]
#[error("{operation} failed: {message}")]
pub struct BrokerError {
    /// The broker operation, e.g. `CreateQueue`.
    pub operation: &'static str,
    pub message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl BrokerError {
    /// Wraps an error returned by a broker SDK.
    pub fn sdk<E>(operation: &'static str, message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            operation,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// A call the broker refused, or a response missing a required field.
    pub fn rejected(operation: &'static str, message: impl Into<String>) -> Self {
        Self {
            operation,
            message: message.into(),
            source: None,
        }
    }
}

/// A message delivered by the broker.
///
/// The receipt handle belongs to this delivery only; it is what
/// [`BrokerClient::delete_message`] needs to acknowledge the message.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct Message {
    /// Unique identifier assigned by the broker
    pub message_id: String,
    /// Handle used to delete the message
    pub receipt_handle: String,
    /// The message content
    pub body: String,
    /// System attributes such as `ApproximateReceiveCount`
    pub attributes: Attributes,
}

impl Message {
    /// How many times the broker has delivered this message, if it reported it.
    pub fn receive_count(&self) -> Option<u32> {
        self.attributes
            .get(attribute::APPROXIMATE_RECEIVE_COUNT)
            .and_then(|count| count.parse().ok())
    }
}

/// Parameters of a single `SendMessage` call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SendMessageRequest {
    pub queue_url: String,
    pub body: String,
    pub delay_seconds: Option<u32>,
    pub message_group_id: Option<String>,
    pub message_deduplication_id: Option<String>,
}

/// Parameters of a single `ReceiveMessage` call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReceiveOptions {
    /// At most this many messages are returned (1 to 10).
    pub max_messages: u32,
    /// Long-poll wait when the queue is empty.
    pub wait_time: Duration,
    /// Overrides the queue's visibility timeout for these deliveries.
    pub visibility_timeout: Option<Duration>,
}

impl Default for ReceiveOptions {
    fn default() -> Self {
        Self {
            max_messages: 10,
            wait_time: Duration::from_secs(20),
            visibility_timeout: None,
        }
    }
}

/// The broker primitives used by the provisioner, resolver, dispatcher and consumer.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Creates a queue and returns its URL.
    async fn create_queue(
        &self,
        name: &str,
        attributes: &Attributes,
        tags: &Tags,
    ) -> BrokerResult<String>;

    /// Returns the ARN of the queue at `queue_url`.
    async fn queue_arn(&self, queue_url: &str) -> BrokerResult<String>;

    /// Lists every queue URL whose name starts with `prefix`.
    async fn list_queues(&self, prefix: &str) -> BrokerResult<Vec<String>>;

    /// Sends a message and returns the broker's message id.
    async fn send_message(&self, request: SendMessageRequest) -> BrokerResult<String>;

    /// Receives up to `options.max_messages` messages.
    async fn receive_messages(
        &self,
        queue_url: &str,
        options: &ReceiveOptions,
    ) -> BrokerResult<Vec<Message>>;

    /// Acknowledges a delivery.
    async fn delete_message(&self, queue_url: &str, receipt_handle: &str) -> BrokerResult<()>;

    /// Creates a topic and returns its ARN.
    async fn create_topic(
        &self,
        name: &str,
        attributes: &Attributes,
        tags: &Tags,
    ) -> BrokerResult<String>;

    /// Lists every topic ARN. `None` means the broker returned no topic list at all.
    async fn list_topics(&self) -> BrokerResult<Option<Vec<String>>>;

    /// Subscribes `endpoint_arn` to `topic_arn` and returns the subscription ARN.
    async fn subscribe(
        &self,
        topic_arn: &str,
        protocol: &str,
        endpoint_arn: &str,
    ) -> BrokerResult<String>;
}
