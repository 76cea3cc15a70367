//! One entry point for provisioning, lookup, sending, and consuming.

use crate::broker::SharedBroker;
use crate::consumer::{Consumer, ConsumerConfig, ConsumerHandle, MessageHandler};
use crate::dispatcher::{Dispatcher, OutboundMessage};
use crate::error::{Error, ResourceKind, Result};
use crate::naming::QueueKind;
use crate::provisioner::{ProvisionedQueue, Provisioner, QueueSpec, TopicSpec};
use crate::resolver::Resolver;

/// Every queue and topic operation behind one shared broker client.
///
/// Build it once at startup and pass it where needed.
#[derive(Clone)]
pub struct QueueService {
    broker: SharedBroker,
    provisioner: Provisioner,
    resolver: Resolver,
    dispatcher: Dispatcher,
}

impl QueueService {
    /// Wires every component to the same broker client.
    ///
    /// # Arguments
    /// * `broker` - An AWS or in-memory broker behind an `Arc`
    pub fn new(broker: SharedBroker) -> Self {
        Self {
            provisioner: Provisioner::new(broker.clone()),
            resolver: Resolver::new(broker.clone()),
            dispatcher: Dispatcher::new(broker.clone()),
            broker,
        }
    }

    pub fn broker(&self) -> &SharedBroker {
        &self.broker
    }

    /// Creates the queue described by `spec` after its dead letter queue.
    ///
    /// # Errors
    /// Returns [`Error::Provisioning`] naming the step that failed. Whatever
    /// was created before that step stays in place.
    pub async fn create_queue(&self, spec: &QueueSpec) -> Result<ProvisionedQueue> {
        self.provisioner.create_queue(spec).await
    }

    /// Creates a topic and returns its ARN.
    pub async fn create_topic(&self, spec: &TopicSpec) -> Result<String> {
        self.provisioner.create_topic(spec).await
    }

    /// Lists queue URLs whose names start with `prefix`; an empty prefix lists all.
    pub async fn list_queues(&self, prefix: &str) -> Result<Vec<String>> {
        self.provisioner.list_queues(prefix).await
    }

    pub async fn list_topics(&self) -> Result<Vec<String>> {
        self.provisioner.list_topics().await
    }

    /// Returns the URL of the queue named exactly `full_queue_name`, if any.
    pub async fn resolve_queue_url(&self, full_queue_name: &str) -> Result<Option<String>> {
        self.resolver.resolve_queue_url(full_queue_name).await
    }

    /// Returns the first queue under `prefix` of the given kind, if any.
    pub async fn resolve_queue_url_of_kind(
        &self,
        prefix: &str,
        kind: QueueKind,
    ) -> Result<Option<String>> {
        self.resolver.resolve_queue_url_of_kind(prefix, kind).await
    }

    /// # Errors
    /// Returns [`Error::NotFound`] when no queue has exactly this name.
    pub async fn resolve_queue_arn(&self, full_queue_name: &str) -> Result<String> {
        self.resolver.resolve_queue_arn(full_queue_name).await
    }

    /// # Errors
    /// Returns [`Error::NotFound`] when no topic has exactly this name.
    pub async fn resolve_topic_arn(&self, full_topic_name: &str) -> Result<String> {
        self.resolver.resolve_topic_arn(full_topic_name).await
    }

    /// Subscribes the queue to the topic and returns the subscription ARN.
    pub async fn subscribe(&self, topic_name: &str, queue_name: &str) -> Result<String> {
        self.provisioner.subscribe(topic_name, queue_name).await
    }

    /// Sends one message and returns the broker's message id.
    pub async fn send(&self, message: OutboundMessage) -> Result<String> {
        self.dispatcher.send(message).await
    }

    /// Resolves `queue_name` and binds `handler` to it without starting.
    ///
    /// Use this over [`QueueService::start_consumer`] to call
    /// [`Consumer::subscribe`] before the loop runs.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] when no queue has exactly this name.
    pub async fn consumer(
        &self,
        queue_name: &str,
        handler: impl MessageHandler,
        config: ConsumerConfig,
    ) -> Result<Consumer> {
        let queue_url = self
            .resolver
            .resolve_queue_url(queue_name)
            .await?
            .ok_or_else(|| Error::not_found(ResourceKind::Queue, queue_name))?;

        Ok(Consumer::create(self.broker.clone(), queue_url, handler)?.with_config(config))
    }

    /// Resolves `queue_name` and starts consuming it with `handler`.
    ///
    /// Events are only logged.
    pub async fn start_consumer(
        &self,
        queue_name: &str,
        handler: impl MessageHandler,
        config: ConsumerConfig,
    ) -> Result<ConsumerHandle> {
        Ok(self.consumer(queue_name, handler, config).await?.start())
    }
}
